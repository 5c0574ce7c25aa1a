use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

/// Stateless text completion: one prompt in, one text out.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[async_trait]
impl<T: TextModel + ?Sized> TextModel for Arc<T> {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        (**self).complete(prompt).await
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        (**self).embed(texts).await
    }
}

/// Retries each call to the wrapped collaborator with exponential backoff
/// before giving up.
#[derive(Debug, Clone)]
pub struct Retrying<T> {
    inner: T,
    retries: usize,
    base_delay: Duration,
}

impl<T> Retrying<T> {
    pub fn new(inner: T, retries: usize) -> Self {
        Self {
            inner,
            retries,
            base_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub(crate) async fn attempt<R, F, Fut>(&self, what: &str, mut call: F) -> anyhow::Result<R>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<R>>,
    {
        let attempts = self.retries.saturating_add(1);
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt as u32 - 1);
                    tracing::warn!(
                        call = what,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %format!("{err:#}"),
                        "external call failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("{what} (attempt {attempt}/{attempts})"));
                }
            }
        }
    }
}

#[async_trait]
impl<M: TextModel> TextModel for Retrying<M> {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.attempt("call model", || self.inner.complete(prompt)).await
    }
}

#[async_trait]
impl<E: Embedder> Embedder for Retrying<E> {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        self.attempt("embed texts", || self.inner.embed(texts)).await
    }
}
