use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::Deserialize;

use crate::error::StoryError;
use crate::llm::Retrying;
use crate::settings::ImageApiSettings;

/// Status of an image job; `progress` runs from 0 to 100.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobProgress {
    pub progress: u8,
    pub image_urls: Vec<String>,
}

impl JobProgress {
    pub fn is_done(&self) -> bool {
        self.progress >= 100
    }
}

/// Asynchronous image generation: submit a prompt, then poll the job.
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn submit(&self, prompt: &str) -> anyhow::Result<String>;
    async fn poll(&self, job_id: &str) -> anyhow::Result<JobProgress>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 120,
        }
    }
}

#[async_trait]
impl<G: ImageGenerator> ImageGenerator for Retrying<G> {
    async fn submit(&self, prompt: &str) -> anyhow::Result<String> {
        self.attempt("submit image job", || self.inner().submit(prompt)).await
    }

    async fn poll(&self, job_id: &str) -> anyhow::Result<JobProgress> {
        self.attempt("poll image job", || self.inner().poll(job_id)).await
    }
}

/// Submits `prompt` and waits for the job's first image URL.
pub async fn generate_image(
    generator: &dyn ImageGenerator,
    prompt: &str,
    policy: PollPolicy,
) -> anyhow::Result<String> {
    let job_id = generator.submit(prompt).await.context("submit image job")?;
    tracing::debug!(job_id = %job_id, "submitted image job");

    for attempt in 1..=policy.max_attempts {
        let status = generator
            .poll(&job_id)
            .await
            .with_context(|| format!("poll image job {job_id}"))?;

        if status.is_done() {
            let url = status
                .image_urls
                .into_iter()
                .next()
                .ok_or_else(|| StoryError::MissingImageUrl {
                    job_id: job_id.clone(),
                })?;
            tracing::debug!(job_id = %job_id, attempt, "image job finished");
            return Ok(url);
        }

        tracing::debug!(job_id = %job_id, attempt, progress = status.progress, "image job pending");
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }

    Err(StoryError::ImageGenerationTimedOut {
        job_id,
        attempts: policy.max_attempts,
    }
    .into())
}

/// Client for the imagine/message job API.
#[derive(Debug, Clone)]
pub struct HttpImageGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImagineResponse {
    message_id: String,
}

#[derive(Deserialize)]
struct MessageResponse {
    #[serde(default)]
    progress: serde_json::Value,
    #[serde(default)]
    response: Option<MessageResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResult {
    #[serde(default)]
    image_urls: Vec<String>,
}

impl HttpImageGenerator {
    pub fn new(settings: &ImageApiSettings) -> anyhow::Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("KATHA_IMAGE_API_KEY is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_owned(),
            api_key,
        })
    }

    fn imagine_endpoint(&self) -> String {
        format!("{}/imagine", self.base_url)
    }

    fn message_endpoint(&self, job_id: &str) -> String {
        format!("{}/message/{job_id}?expireMins=2", self.base_url)
    }
}

#[async_trait]
impl ImageGenerator for HttpImageGenerator {
    async fn submit(&self, prompt: &str) -> anyhow::Result<String> {
        let endpoint = self.imagine_endpoint();
        let body = serde_json::json!({
            "msg": prompt,
            "ref": "",
            "webhookOverride": "",
            "ignorePrefilter": "false",
        });
        let response = self
            .client
            .post(&endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {endpoint}"))?;
        let raw = read_success_body(response).await?;
        let parsed: ImagineResponse =
            serde_json::from_str(&raw).context("parse imagine response")?;
        Ok(parsed.message_id)
    }

    async fn poll(&self, job_id: &str) -> anyhow::Result<JobProgress> {
        let endpoint = self.message_endpoint(job_id);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(&self.api_key)
            .send()
            .await
            .with_context(|| format!("GET {endpoint}"))?;
        let raw = read_success_body(response).await?;
        let parsed: MessageResponse =
            serde_json::from_str(&raw).context("parse message response")?;

        Ok(JobProgress {
            progress: parse_progress(&parsed.progress),
            image_urls: parsed.response.map(|r| r.image_urls).unwrap_or_default(),
        })
    }
}

async fn read_success_body(response: reqwest::Response) -> anyhow::Result<String> {
    let status = response.status();
    let raw = response.text().await.context("read image API response body")?;
    if !status.is_success() {
        anyhow::bail!("image API error ({status}): {raw}");
    }
    Ok(raw)
}

// The API reports a number while running and may send a string such as
// "incomplete" before the job starts.
fn parse_progress(value: &serde_json::Value) -> u8 {
    let progress = match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    progress.clamp(0.0, 100.0) as u8
}
