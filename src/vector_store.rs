use std::fs::OpenOptions;
use std::io::{BufRead as _, BufReader, Write as _};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::Embedder;

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub content: String,
    pub score: f32,
}

/// Top-k similarity search over an embedded corpus.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns at most `k` passages, best match first.
    async fn similarity_search(&self, query: &str, k: usize)
    -> anyhow::Result<Vec<ScoredPassage>>;
}

/// One line of the on-disk corpus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddedChunk {
    pub content: String,
    pub source: String,
    pub embedding: Vec<f32>,
}

/// In-memory store loaded from a JSONL file of [`EmbeddedChunk`] rows.
pub struct JsonlVectorStore {
    chunks: Vec<EmbeddedChunk>,
    embedder: Arc<dyn Embedder>,
}

impl JsonlVectorStore {
    pub fn new(chunks: Vec<EmbeddedChunk>, embedder: Arc<dyn Embedder>) -> Self {
        Self { chunks, embedder }
    }

    pub fn load(path: &Path, embedder: Arc<dyn Embedder>) -> anyhow::Result<Self> {
        let chunks = read_chunks(path)?;
        tracing::info!(path = %path.display(), chunks = chunks.len(), "loaded vector store");
        Ok(Self::new(chunks, embedder))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

#[async_trait]
impl VectorStore for JsonlVectorStore {
    async fn similarity_search(
        &self,
        query: &str,
        k: usize,
    ) -> anyhow::Result<Vec<ScoredPassage>> {
        if self.chunks.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(&[query.to_owned()])
            .await
            .context("embed query")?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embedder returned no vector for query"))?;

        let mut scored = self
            .chunks
            .iter()
            .map(|chunk| ScoredPassage {
                content: chunk.content.clone(),
                score: cosine_similarity(&query_embedding, &chunk.embedding),
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(k);
        Ok(scored)
    }
}

/// Cosine similarity; zero when dimensions differ or a vector has no length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

pub fn read_chunks(path: &Path) -> anyhow::Result<Vec<EmbeddedChunk>> {
    let file = OpenOptions::new()
        .read(true)
        .open(path)
        .with_context(|| format!("open vector store: {}", path.display()))?;
    let reader = BufReader::new(file);

    let mut chunks = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.context("read vector store line")?;
        if line.trim().is_empty() {
            continue;
        }
        let chunk: EmbeddedChunk = serde_json::from_str(&line)
            .with_context(|| format!("parse vector store line {}", idx + 1))?;
        chunks.push(chunk);
    }
    Ok(chunks)
}

pub fn write_chunks(path: &Path, chunks: &[EmbeddedChunk]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create vector store dir: {}", parent.display()))?;
    }

    let mut out = OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(path)
        .with_context(|| format!("create vector store: {}", path.display()))?;
    for chunk in chunks {
        serde_json::to_writer(&mut out, chunk).context("serialize embedded chunk")?;
        out.write_all(b"\n").context("write vector store newline")?;
    }
    out.flush().context("flush vector store")?;
    Ok(())
}
