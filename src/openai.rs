use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::llm::{Embedder, TextModel};
use crate::settings::OpenAiSettings;

const INSTRUCTIONS: &str = "Follow the task in the input exactly. Output only what it asks for.";

pub fn responses_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/responses")
}

pub fn embeddings_endpoint(base_url: &str) -> String {
    let base_url = base_url.trim_end_matches('/');
    format!("{base_url}/embeddings")
}

/// OpenAI-compatible client for text completion and embeddings.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    embedding_model: String,
    temperature: f32,
}

impl OpenAiClient {
    pub fn new(settings: &OpenAiSettings) -> anyhow::Result<Self> {
        let api_key = settings
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            base_url: settings.base_url.clone(),
            api_key,
            model: settings.model.clone(),
            embedding_model: settings.embedding_model.clone(),
            temperature: settings.temperature,
        })
    }
}

#[async_trait]
impl TextModel for OpenAiClient {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        tracing::debug!(model = %self.model, prompt_chars = prompt.len(), "openai complete");
        responses_text(
            &self.client,
            &responses_endpoint(&self.base_url),
            &self.api_key,
            &self.model,
            INSTRUCTIONS,
            prompt,
            self.temperature,
        )
        .await
    }
}

#[async_trait]
impl Embedder for OpenAiClient {
    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        tracing::debug!(model = %self.embedding_model, inputs = texts.len(), "openai embed");
        embeddings(
            &self.client,
            &embeddings_endpoint(&self.base_url),
            &self.api_key,
            &self.embedding_model,
            texts,
        )
        .await
    }
}

pub async fn responses_text(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    instructions: &str,
    input: &str,
    temperature: f32,
) -> anyhow::Result<String> {
    let mut body = serde_json::json!({
        "model": model,
        "instructions": instructions,
        "input": input,
        "text": { "format": { "type": "text" } },
        "store": false,
    });

    // GPT-5 models reject sampling params like `temperature`.
    if !model.starts_with("gpt-5")
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert("temperature".to_owned(), serde_json::json!(temperature));
    }

    let raw = post_json(client, endpoint, api_key, &body).await?;
    let value: serde_json::Value = serde_json::from_str(&raw).context("parse OpenAI response")?;
    extract_output_text(&value).context("extract output text")
}

pub async fn embeddings(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    model: &str,
    inputs: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    #[derive(serde::Deserialize)]
    struct EmbeddingResponse {
        data: Vec<EmbeddingRow>,
    }

    #[derive(serde::Deserialize)]
    struct EmbeddingRow {
        index: usize,
        embedding: Vec<f32>,
    }

    let body = serde_json::json!({
        "model": model,
        "input": inputs,
    });
    let raw = post_json(client, endpoint, api_key, &body).await?;
    let mut response: EmbeddingResponse =
        serde_json::from_str(&raw).context("parse OpenAI embeddings response")?;

    if response.data.len() != inputs.len() {
        anyhow::bail!(
            "OpenAI returned {} embeddings for {} inputs",
            response.data.len(),
            inputs.len()
        );
    }
    response.data.sort_by_key(|row| row.index);
    Ok(response.data.into_iter().map(|row| row.embedding).collect())
}

async fn post_json(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    body: &serde_json::Value,
) -> anyhow::Result<String> {
    let response = client
        .post(endpoint)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await
        .with_context(|| format!("POST {endpoint}"))?;

    let status = response.status();
    let raw = response.text().await.context("read OpenAI response body")?;
    if !status.is_success() {
        let message = parse_error_message(&raw).unwrap_or_else(|| raw.clone());
        anyhow::bail!("OpenAI API error ({status}): {message}");
    }
    Ok(raw)
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    let message = value.get("error")?.get("message")?.as_str()?.to_owned();
    Some(message)
}

fn extract_output_text(value: &serde_json::Value) -> anyhow::Result<String> {
    let output = value
        .get("output")
        .and_then(|v| v.as_array())
        .ok_or_else(|| anyhow::anyhow!("missing `output` array in response"))?;

    let mut text = String::new();
    for item in output {
        if item.get("type").and_then(|v| v.as_str()) != Some("message") {
            continue;
        }
        let Some(content) = item.get("content").and_then(|v| v.as_array()) else {
            continue;
        };
        for part in content {
            if part.get("type").and_then(|v| v.as_str()) != Some("output_text") {
                continue;
            }
            if let Some(part_text) = part.get("text").and_then(|v| v.as_str()) {
                text.push_str(part_text);
            }
        }
    }

    if text.trim().is_empty() {
        anyhow::bail!("OpenAI output text is empty");
    }
    Ok(text)
}
