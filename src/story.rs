use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::cli::ShowArgs;
use crate::error::StoryError;
use crate::llm::TextModel;
use crate::story_config::StoryConfig;

const SEGMENT_DELIMITER: &str = "\n\n";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageContent {
    pub text: String,
    #[serde(rename = "imageURL")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(rename = "pageNo")]
    pub page_number: u32,
    pub content: PageContent,
}

/// Page index (0-based) to generated image URL for one illustration run.
pub type IllustrationStore = BTreeMap<usize, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoryStage {
    Empty,
    TextBuilt,
    Paginated,
    Illustrated,
}

/// One generated narrative and its pages.
#[derive(Debug, Clone)]
pub struct Story {
    config: StoryConfig,
    narrative_text: Option<String>,
    pages: Vec<Page>,
    character_images: BTreeMap<String, String>,
    stage: StoryStage,
}

/// Serialized form of a [`Story`], as persisted and as served over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryArtifact {
    pub config: StoryConfig,
    pub pages: Vec<Page>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub character_images: BTreeMap<String, String>,
}

impl Story {
    pub fn new(config: StoryConfig) -> Self {
        Self {
            config,
            narrative_text: None,
            pages: Vec::new(),
            character_images: BTreeMap::new(),
            stage: StoryStage::Empty,
        }
    }

    pub fn config(&self) -> &StoryConfig {
        &self.config
    }

    pub fn stage(&self) -> StoryStage {
        self.stage
    }

    pub fn narrative_text(&self) -> Option<&str> {
        self.narrative_text.as_deref()
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn character_images(&self) -> &BTreeMap<String, String> {
        &self.character_images
    }

    /// Asks the model to retell the source text; the output is kept verbatim.
    pub async fn build_story(&mut self, model: &dyn TextModel) -> anyhow::Result<()> {
        if self.narrative_text.is_some() {
            return Err(StoryError::TextAlreadyBuilt.into());
        }
        let text = model
            .complete(&self.config.prompt())
            .await
            .context("generate narrative text")?;
        tracing::info!(
            content_id = %short_id(self.config.content_id()),
            chars = text.len(),
            "built story text"
        );
        self.set_narrative_text(text)?;
        Ok(())
    }

    pub fn set_narrative_text(&mut self, text: impl Into<String>) -> Result<(), StoryError> {
        if self.narrative_text.is_some() {
            return Err(StoryError::TextAlreadyBuilt);
        }
        self.narrative_text = Some(text.into());
        self.stage = StoryStage::TextBuilt;
        Ok(())
    }

    /// Splits the narrative into pages. Rebuilding discards any merged images.
    pub fn build_pages(&mut self) -> Result<(), StoryError> {
        let text = self
            .narrative_text
            .as_deref()
            .ok_or(StoryError::TextNotBuilt)?;
        self.pages = split_pages(text);
        self.stage = StoryStage::Paginated;
        tracing::info!(pages = self.pages.len(), "built pages");
        Ok(())
    }

    /// Merges generated image URLs into pages by index.
    ///
    /// Every index is checked before any page changes, so a store that refers
    /// to a missing page leaves the story untouched.
    pub fn populate_images(&mut self, store: &IllustrationStore) -> Result<(), StoryError> {
        if !matches!(self.stage, StoryStage::Paginated | StoryStage::Illustrated) {
            return Err(StoryError::NotPaginated);
        }
        if let Some((&index, _)) = store.iter().find(|(index, _)| **index >= self.pages.len()) {
            return Err(StoryError::PageIndexOutOfRange {
                index,
                pages: self.pages.len(),
            });
        }

        for (&index, url) in store {
            self.pages[index].content.image_url = Some(url.clone());
        }
        self.stage = StoryStage::Illustrated;
        Ok(())
    }

    pub fn set_character_images(&mut self, images: BTreeMap<String, String>) {
        self.character_images = images;
    }

    pub fn artifact(&self) -> StoryArtifact {
        StoryArtifact {
            config: self.config.clone(),
            pages: self.pages.clone(),
            character_images: self.character_images.clone(),
        }
    }

    pub fn artifact_name(&self) -> String {
        self.config.artifact_name()
    }

    /// Writes the story into `dir`; never replaces an existing artifact.
    pub fn persist(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        if !matches!(self.stage, StoryStage::Paginated | StoryStage::Illustrated) {
            return Err(StoryError::NotPaginated.into());
        }

        std::fs::create_dir_all(dir)
            .with_context(|| format!("create story dir: {}", dir.display()))?;
        let path = dir.join(self.artifact_name());

        // The final name only ever appears with a complete document.
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .with_context(|| format!("create temp file in: {}", dir.display()))?;
        serde_json::to_writer_pretty(&mut tmp, &self.artifact()).context("serialize story")?;
        tmp.write_all(b"\n").context("write story newline")?;
        tmp.flush().context("flush story")?;
        if let Err(err) = tmp.persist_noclobber(&path) {
            if err.error.kind() == std::io::ErrorKind::AlreadyExists {
                return Err(StoryError::ArtifactExists { path }.into());
            }
            return Err(err.error).with_context(|| format!("write story: {}", path.display()));
        }

        tracing::info!(path = %path.display(), "persisted story");
        Ok(path)
    }
}

impl StoryArtifact {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read story: {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parse story: {}", path.display()))
    }
}

/// Path of an already generated story with the same fingerprint, if any.
pub fn existing_artifact(dir: &Path, config: &StoryConfig) -> Option<PathBuf> {
    let path = dir.join(config.artifact_name());
    path.is_file().then_some(path)
}

/// Splits on blank-line boundaries; whitespace-only segments never become pages.
pub fn split_pages(text: &str) -> Vec<Page> {
    text.split(SEGMENT_DELIMITER)
        .filter(|segment| !segment.trim().is_empty())
        .enumerate()
        .map(|(idx, segment)| Page {
            page_number: idx as u32 + 1,
            content: PageContent {
                text: segment.to_owned(),
                image_url: None,
            },
        })
        .collect()
}

pub fn show(args: ShowArgs) -> anyhow::Result<()> {
    let artifact = StoryArtifact::load(Path::new(&args.story))?;
    print!("{}", render_text(&artifact));
    Ok(())
}

/// Plain-text rendering of a story for the terminal.
pub fn render_text(artifact: &StoryArtifact) -> String {
    let config = &artifact.config;
    let mut out = format!(
        "story {} ({}, {}, {}, {})\n",
        short_id(config.content_id()),
        config.age().as_str(),
        config.language().name(),
        config.image_style().label(),
        config.color().label(),
    );
    for page in &artifact.pages {
        out.push_str(&format!("\n--- page {} ---\n", page.page_number));
        out.push_str(page.content.text.trim_end());
        out.push('\n');
        if let Some(url) = &page.content.image_url {
            out.push_str(&format!("[image] {url}\n"));
        }
    }
    if !artifact.character_images.is_empty() {
        out.push_str("\n--- characters ---\n");
        for (name, url) in &artifact.character_images {
            out.push_str(&format!("{name}: {url}\n"));
        }
    }
    out
}

pub(crate) fn short_id(content_id: &str) -> &str {
    &content_id[..content_id.len().min(12)]
}
