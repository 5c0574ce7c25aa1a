use std::path::{Path, PathBuf};

use anyhow::Context as _;

use crate::cli::IndexArgs;
use crate::llm::{Embedder, Retrying};
use crate::openai::OpenAiClient;
use crate::settings::Settings;
use crate::vector_store::{EmbeddedChunk, write_chunks};

const SEPARATORS: [char; 3] = [' ', ',', '\n'];
const EMBED_BATCH: usize = 64;

pub async fn run(args: IndexArgs) -> anyhow::Result<()> {
    if args.chunk_size == 0 {
        anyhow::bail!("--chunk-size must be > 0");
    }
    let corpus_dir = PathBuf::from(&args.corpus);
    let out_path = PathBuf::from(&args.out);
    if out_path.exists() {
        anyhow::bail!("vector store already exists: {}", out_path.display());
    }

    let settings = Settings::from_env().context("load settings")?;
    let client = Retrying::new(OpenAiClient::new(&settings.openai)?, settings.model_retries);

    let chunks = build_index(&corpus_dir, args.chunk_size, &client).await?;
    write_chunks(&out_path, &chunks)?;
    tracing::info!(out = %out_path.display(), chunks = chunks.len(), "index written");
    Ok(())
}

/// Splits every `.txt` file under `corpus_dir` and embeds the chunks.
pub async fn build_index(
    corpus_dir: &Path,
    chunk_size: usize,
    embedder: &dyn Embedder,
) -> anyhow::Result<Vec<EmbeddedChunk>> {
    let files = corpus_files(corpus_dir)?;
    if files.is_empty() {
        anyhow::bail!("no .txt files found under: {}", corpus_dir.display());
    }

    let mut pending: Vec<(String, String)> = Vec::new();
    for path in &files {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read corpus file: {}", path.display()))?;
        let source = path
            .strip_prefix(corpus_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let chunks = split_text(&text, chunk_size);
        tracing::debug!(source = %source, chunks = chunks.len(), "split corpus file");
        pending.extend(chunks.into_iter().map(|chunk| (source.clone(), chunk)));
    }
    tracing::info!(files = files.len(), chunks = pending.len(), "embedding corpus");

    let mut out = Vec::with_capacity(pending.len());
    for (batch_idx, batch) in pending.chunks(EMBED_BATCH).enumerate() {
        let texts = batch.iter().map(|(_, text)| text.clone()).collect::<Vec<_>>();
        let embeddings = embedder
            .embed(&texts)
            .await
            .with_context(|| format!("embed batch {}", batch_idx + 1))?;
        if embeddings.len() != batch.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                batch.len()
            );
        }
        out.extend(
            batch
                .iter()
                .zip(embeddings)
                .map(|((source, content), embedding)| EmbeddedChunk {
                    content: content.clone(),
                    source: source.clone(),
                    embedding,
                }),
        );
    }
    Ok(out)
}

fn corpus_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir)
            .with_context(|| format!("read corpus dir: {}", dir.display()))?;
        for entry in entries {
            let path = entry.context("read corpus dir entry")?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().is_some_and(|ext| ext == "txt") {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}

/// Splits `text` into chunks of at most `chunk_size` characters.
///
/// Spaces are preferred as break points, then commas, then newlines; a run
/// with none of them is cut at the character limit.
pub fn split_text(text: &str, chunk_size: usize) -> Vec<String> {
    let mut out = Vec::new();
    split_recursive(text, &SEPARATORS, chunk_size.max(1), &mut out);
    out
}

fn split_recursive(text: &str, separators: &[char], chunk_size: usize, out: &mut Vec<String>) {
    let Some(pos) = separators.iter().position(|sep| text.contains(*sep)) else {
        hard_split(text, chunk_size, out);
        return;
    };
    let separator = separators[pos];
    let rest = &separators[pos + 1..];

    let mut current = String::new();
    let mut current_len = 0usize;
    for piece in text.split(separator).filter(|piece| !piece.is_empty()) {
        let piece_len = piece.chars().count();
        if piece_len > chunk_size {
            flush(&mut current, &mut current_len, out);
            split_recursive(piece, rest, chunk_size, out);
            continue;
        }

        let joined_len = if current.is_empty() {
            piece_len
        } else {
            current_len + 1 + piece_len
        };
        if joined_len > chunk_size {
            flush(&mut current, &mut current_len, out);
        }
        if !current.is_empty() {
            current.push(separator);
            current_len += 1;
        }
        current.push_str(piece);
        current_len += piece_len;
    }
    flush(&mut current, &mut current_len, out);
}

fn flush(current: &mut String, current_len: &mut usize, out: &mut Vec<String>) {
    let chunk = current.trim();
    if !chunk.is_empty() {
        out.push(chunk.to_owned());
    }
    current.clear();
    *current_len = 0;
}

fn hard_split(text: &str, chunk_size: usize, out: &mut Vec<String>) {
    let chars = text.chars().collect::<Vec<_>>();
    for window in chars.chunks(chunk_size) {
        let chunk = window.iter().collect::<String>();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            out.push(chunk.to_owned());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    struct LengthEmbedder {
        batches: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.batches.lock().unwrap().push(texts.len());
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[test]
    fn chunks_respect_size_and_word_boundaries() {
        let text = "Arjuna drew his bow and Krishna smiled at the chariot wheel";
        let chunks = split_text(text, 20);
        assert!(chunks.iter().all(|c| c.chars().count() <= 20));
        assert_eq!(chunks.join(" "), text);
        assert_eq!(chunks[0], "Arjuna drew his bow");
    }

    #[test]
    fn long_runs_fall_back_to_commas_then_characters() {
        let chunks = split_text("alpha,beta,gamma", 10);
        assert_eq!(chunks, vec!["alpha,beta", "gamma"]);

        let chunks = split_text("abcdefghij", 4);
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn blank_text_yields_no_chunks() {
        assert!(split_text("", 100).is_empty());
        assert!(split_text("   \n  ", 100).is_empty());
    }

    #[tokio::test]
    async fn indexes_nested_txt_files_only() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let corpus = temp.path().join("corpus");
        std::fs::create_dir_all(corpus.join("adi_parva"))?;
        std::fs::write(corpus.join("adi_parva").join("01.txt"), "Santanu met Ganga")?;
        std::fs::write(corpus.join("sabha.txt"), "The dice game")?;
        std::fs::write(corpus.join("notes.md"), "ignored")?;

        let embedder = LengthEmbedder {
            batches: Mutex::new(Vec::new()),
        };
        let chunks = build_index(&corpus, 1000, &embedder).await?;

        let sources = chunks.iter().map(|c| c.source.as_str()).collect::<Vec<_>>();
        assert_eq!(sources, vec!["adi_parva/01.txt", "sabha.txt"]);
        assert_eq!(chunks[0].content, "Santanu met Ganga");
        assert_eq!(chunks[0].embedding, vec![17.0, 1.0]);
        assert_eq!(*embedder.batches.lock().unwrap(), vec![2]);
        Ok(())
    }

    #[tokio::test]
    async fn empty_corpus_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::TempDir::new()?;
        let embedder = LengthEmbedder {
            batches: Mutex::new(Vec::new()),
        };
        assert!(build_index(temp.path(), 1000, &embedder).await.is_err());
        Ok(())
    }
}
