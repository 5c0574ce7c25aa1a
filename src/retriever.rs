use std::sync::Arc;

use anyhow::Context as _;

use crate::cli::RetrieveArgs;
use crate::error::StoryError;
use crate::llm::{Embedder, Retrying, TextModel};
use crate::openai::OpenAiClient;
use crate::query::StoryQuery;
use crate::settings::Settings;
use crate::vector_store::{JsonlVectorStore, ScoredPassage, VectorStore};

pub async fn run(args: RetrieveArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("load settings")?;
    let openai = Arc::new(Retrying::new(
        OpenAiClient::new(&settings.openai)?,
        settings.model_retries,
    ));
    let embedder: Arc<dyn Embedder> = openai.clone();
    let store = JsonlVectorStore::load(std::path::Path::new(&args.db), embedder)?;

    let passage = StoryRetriever::new(openai, Arc::new(store))
        .with_query_variants(args.query_variants)
        .retrieve(&args.query)
        .await?;

    println!("{passage}");
    Ok(())
}

/// Finds the single source passage that best answers a query.
///
/// The query is first rewritten into a story request, then expanded into
/// several phrasings. Each phrasing is searched independently and the hits are
/// merged, so a passage missed by one wording can still be found by another.
#[derive(Clone)]
pub struct StoryRetriever {
    model: Arc<dyn TextModel>,
    store: Arc<dyn VectorStore>,
    query_variants: usize,
    min_score: f32,
}

impl StoryRetriever {
    pub fn new(model: Arc<dyn TextModel>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            model,
            store,
            query_variants: 3,
            min_score: f32::NEG_INFINITY,
        }
    }

    #[must_use]
    pub fn with_query_variants(mut self, query_variants: usize) -> Self {
        self.query_variants = query_variants;
        self
    }

    /// Hits scoring below `min_score` are discarded.
    #[must_use]
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub async fn retrieve(&self, query: &str) -> anyhow::Result<String> {
        let storied = StoryQuery::new(Arc::clone(&self.model))
            .transform(query)
            .await?;
        let storied = storied.trim();

        let queries = self.generate_queries(storied).await?;
        tracing::info!(queries = ?queries, "multi-query retrieval");

        let mut hits: Vec<ScoredPassage> = Vec::new();
        for q in &queries {
            let found = self
                .store
                .similarity_search(q, 1)
                .await
                .with_context(|| format!("similarity search: {q}"))?;
            merge_hits(&mut hits, found);
        }

        let best = hits
            .into_iter()
            .filter(|hit| hit.score >= self.min_score)
            .fold(None::<ScoredPassage>, |best, hit| match best {
                Some(best) if best.score >= hit.score => Some(best),
                _ => Some(hit),
            })
            .ok_or_else(|| StoryError::NoRelevantPassage {
                query: query.to_owned(),
            })?;

        tracing::info!(score = best.score, chars = best.content.len(), "retrieved passage");
        Ok(best.content)
    }

    async fn generate_queries(&self, storied: &str) -> anyhow::Result<Vec<String>> {
        let mut queries = vec![storied.to_owned()];
        if self.query_variants == 0 {
            return Ok(queries);
        }

        let raw = self
            .model
            .complete(&multi_query_prompt(storied, self.query_variants))
            .await
            .context("generate alternative queries")?;

        for line in parse_query_lines(&raw).into_iter().take(self.query_variants) {
            if !queries.contains(&line) {
                queries.push(line);
            }
        }
        Ok(queries)
    }
}

pub fn multi_query_prompt(question: &str, variants: usize) -> String {
    format!(
        "You are an AI language model assistant. Your task is to generate {variants} \
different versions of the given user question to retrieve relevant documents from a vector \
database. By generating multiple perspectives on the user question, your goal is to help \
the user overcome some of the limitations of distance-based similarity search.\n\
Provide these alternative questions separated by newlines, without numbering.\n\
Original question: {question}"
    )
}

fn parse_query_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches(|c: char| c.is_ascii_digit())
                .trim_start_matches(['.', ')', '-', '*'])
                .trim()
                .to_owned()
        })
        .filter(|line| !line.is_empty())
        .collect()
}

// Union by content; a passage found by several queries keeps its best score.
fn merge_hits(hits: &mut Vec<ScoredPassage>, found: Vec<ScoredPassage>) {
    for hit in found {
        match hits.iter_mut().find(|h| h.content == hit.content) {
            Some(existing) => existing.score = existing.score.max(hit.score),
            None => hits.push(hit),
        }
    }
}
