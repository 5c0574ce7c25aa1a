use std::sync::Arc;

use anyhow::Context as _;

use crate::llm::TextModel;

/// Rewrites a free-form query into a request to hear a story.
#[derive(Clone)]
pub struct StoryQuery {
    model: Arc<dyn TextModel>,
}

impl StoryQuery {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    pub async fn transform(&self, query: &str) -> anyhow::Result<String> {
        let storied = self
            .model
            .complete(&transform_prompt(query))
            .await
            .context("transform query")?;
        tracing::info!(query, storied_query = %storied.trim(), "storied query");
        Ok(storied)
    }
}

pub fn transform_prompt(query: &str) -> String {
    format!(
        "You are an AI model. Your goal is to take the query given to you and convert it \
to a query that represents the user asking to hear a story. This is the query: {query}"
    )
}
