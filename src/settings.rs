use std::fmt;
use std::time::Duration;

use anyhow::Context as _;
use url::Url;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_IMAGE_BASE_URL: &str = "https://api.thenextleg.io/v2";

/// Everything needed to talk to external collaborators. Built once at
/// startup and handed to each client; nothing reads the environment later.
#[derive(Debug, Clone)]
pub struct Settings {
    pub openai: OpenAiSettings,
    pub image: ImageApiSettings,
    /// Retries for every model, embedding and image API call.
    pub model_retries: usize,
    pub poll_interval: Duration,
    pub max_poll_attempts: u32,
    pub illustration_concurrency: usize,
    pub cache_lock_timeout: Duration,
}

#[derive(Clone)]
pub struct OpenAiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f32,
}

#[derive(Clone)]
pub struct ImageApiSettings {
    pub api_key: Option<String>,
    pub base_url: String,
}

impl fmt::Debug for OpenAiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiSettings")
            .field("api_key", &redact(self.api_key.as_deref()))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl fmt::Debug for ImageApiSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageApiSettings")
            .field("api_key", &redact(self.api_key.as_deref()))
            .field("base_url", &self.base_url)
            .finish()
    }
}

fn redact(key: Option<&str>) -> &'static str {
    match key {
        Some(_) => "<set>",
        None => "<unset>",
    }
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_owned())
                .filter(|v| !v.is_empty())
        };

        let openai_base_url = var("KATHA_OPENAI_BASE_URL")
            .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned());
        Url::parse(&openai_base_url)
            .with_context(|| format!("invalid KATHA_OPENAI_BASE_URL={openai_base_url:?}"))?;

        let image_base_url =
            var("KATHA_IMAGE_BASE_URL").unwrap_or_else(|| DEFAULT_IMAGE_BASE_URL.to_owned());
        Url::parse(&image_base_url)
            .with_context(|| format!("invalid KATHA_IMAGE_BASE_URL={image_base_url:?}"))?;

        let temperature = parse_var(&var, "KATHA_OPENAI_TEMPERATURE")?.unwrap_or(0.0_f32);
        let model_retries = parse_var(&var, "KATHA_MODEL_RETRIES")?.unwrap_or(2_usize);
        let poll_interval_ms = parse_var(&var, "KATHA_POLL_INTERVAL_MS")?.unwrap_or(5_000_u64);
        let max_poll_attempts = parse_var(&var, "KATHA_MAX_POLL_ATTEMPTS")?.unwrap_or(120_u32);
        let illustration_concurrency =
            parse_var(&var, "KATHA_ILLUSTRATION_CONCURRENCY")?.unwrap_or(1_usize);
        let cache_lock_timeout_ms =
            parse_var(&var, "KATHA_CACHE_LOCK_TIMEOUT_MS")?.unwrap_or(30_000_u64);

        if max_poll_attempts == 0 {
            anyhow::bail!("KATHA_MAX_POLL_ATTEMPTS must be > 0");
        }

        Ok(Self {
            openai: OpenAiSettings {
                api_key: var("OPENAI_API_KEY"),
                base_url: openai_base_url,
                model: var("KATHA_OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_owned()),
                embedding_model: var("KATHA_EMBEDDING_MODEL")
                    .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_owned()),
                temperature,
            },
            image: ImageApiSettings {
                api_key: var("KATHA_IMAGE_API_KEY"),
                base_url: image_base_url,
            },
            model_retries,
            poll_interval: Duration::from_millis(poll_interval_ms),
            max_poll_attempts,
            illustration_concurrency: illustration_concurrency.max(1),
            cache_lock_timeout: Duration::from_millis(cache_lock_timeout_ms),
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, name: &str) -> anyhow::Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(name)
        .map(|raw| {
            raw.parse::<T>()
                .with_context(|| format!("invalid {name}={raw:?}"))
        })
        .transpose()
}
