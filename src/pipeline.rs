use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;

use crate::character_cache::CharacterCache;
use crate::characters::{CharacterRoster, StoryCharacters};
use crate::cli::GenerateArgs;
use crate::error::StoryError;
use crate::illustrator::{IllustratorOptions, StoryIllustrator};
use crate::image_gen::{HttpImageGenerator, ImageGenerator, JobProgress};
use crate::llm::{Embedder, Retrying, TextModel};
use crate::openai::OpenAiClient;
use crate::request::ValidatedRequest;
use crate::retriever::StoryRetriever;
use crate::settings::Settings;
use crate::story::{Story, existing_artifact, short_id};
use crate::story_config::{PageSize, StoryConfig};
use crate::vector_store::{JsonlVectorStore, VectorStore};

/// External services a story run talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub model: Arc<dyn TextModel>,
    pub store: Arc<dyn VectorStore>,
    pub images: Arc<dyn ImageGenerator>,
}

impl Collaborators {
    /// Real clients: OpenAI for text and embeddings, the JSONL store at `db`
    /// and, when `with_images` is set, the image job API.
    pub fn from_settings(settings: &Settings, db: &Path, with_images: bool) -> anyhow::Result<Self> {
        let openai = Arc::new(Retrying::new(
            OpenAiClient::new(&settings.openai)?,
            settings.model_retries,
        ));
        let embedder: Arc<dyn Embedder> = openai.clone();
        let store = JsonlVectorStore::load(db, embedder)?;
        let images: Arc<dyn ImageGenerator> = if with_images {
            Arc::new(Retrying::new(
                HttpImageGenerator::new(&settings.image)?,
                settings.model_retries,
            ))
        } else {
            Arc::new(ImagesDisabled)
        };

        Ok(Self {
            model: openai,
            store: Arc::new(store),
            images,
        })
    }
}

struct ImagesDisabled;

#[async_trait]
impl ImageGenerator for ImagesDisabled {
    async fn submit(&self, _prompt: &str) -> anyhow::Result<String> {
        anyhow::bail!("image generation is disabled for this run")
    }

    async fn poll(&self, _job_id: &str) -> anyhow::Result<JobProgress> {
        anyhow::bail!("image generation is disabled for this run")
    }
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub page_size: PageSize,
    /// Generate one image per page.
    pub illustrate: bool,
    /// Generate character reference portraits through this cache.
    pub character_cache: Option<CharacterCache>,
    pub illustrator: IllustratorOptions,
    pub query_variants: usize,
    pub min_score: Option<f32>,
    /// Persist the finished story here; also used to detect duplicates.
    pub artifact_dir: Option<PathBuf>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            page_size: PageSize::default(),
            illustrate: true,
            character_cache: None,
            illustrator: IllustratorOptions::default(),
            query_variants: 3,
            min_score: None,
            artifact_dir: None,
        }
    }
}

/// Query in, illustrated story out.
///
/// Stages run strictly in order: retrieval, narrative, pagination, roster,
/// illustration, merge, persistence. Any failing stage fails the run; nothing
/// is persisted for a failed run.
pub struct StoryPipeline {
    collaborators: Collaborators,
    options: GenerateOptions,
}

impl StoryPipeline {
    pub fn new(collaborators: Collaborators, options: GenerateOptions) -> Self {
        Self {
            collaborators,
            options,
        }
    }

    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    pub async fn generate(&self, request: &ValidatedRequest) -> anyhow::Result<Story> {
        let mut retriever = StoryRetriever::new(
            Arc::clone(&self.collaborators.model),
            Arc::clone(&self.collaborators.store),
        )
        .with_query_variants(self.options.query_variants);
        if let Some(min_score) = self.options.min_score {
            retriever = retriever.with_min_score(min_score);
        }

        let source_text = retriever
            .retrieve(&request.query)
            .await
            .context("retrieve source passage")?;

        let config = StoryConfig::new(
            request.age,
            request.language,
            source_text,
            request.image_style,
        )
        .with_color(request.color)
        .with_page_size(self.options.page_size);

        self.generate_from_source(config).await
    }

    /// Runs every stage after retrieval for an already chosen passage.
    pub async fn generate_from_source(&self, config: StoryConfig) -> anyhow::Result<Story> {
        if let Some(dir) = &self.options.artifact_dir
            && let Some(path) = existing_artifact(dir, &config)
        {
            tracing::info!(path = %path.display(), "story already generated");
            return Err(StoryError::ArtifactExists { path }.into());
        }

        tracing::info!(
            content_id = %short_id(config.content_id()),
            age = config.age().as_str(),
            style = config.image_style().as_str(),
            color = config.color().as_str(),
            "generating story"
        );

        let model = &self.collaborators.model;
        let mut story = Story::new(config);
        story.build_story(model.as_ref()).await?;
        story.build_pages()?;

        let wants_roster = self.options.illustrate || self.options.character_cache.is_some();
        let roster = if wants_roster {
            let text = story.narrative_text().ok_or(StoryError::TextNotBuilt)?;
            StoryCharacters::new(Arc::clone(model))
                .fetch_characters(text)
                .await?
        } else {
            CharacterRoster::new()
        };

        let illustrator = StoryIllustrator::new(
            Arc::clone(model),
            Arc::clone(&self.collaborators.images),
            self.options.illustrator,
        );

        if self.options.illustrate {
            let store = illustrator
                .populate_store(story.pages(), &roster, story.config())
                .await?;
            story.populate_images(&store)?;
        }

        if let Some(cache) = &self.options.character_cache {
            let faces = illustrator
                .generate_character_faces(&roster, story.config(), cache)
                .await?;
            story.set_character_images(faces);
        }

        if let Some(dir) = &self.options.artifact_dir {
            story.persist(dir)?;
        }

        tracing::info!(pages = story.pages().len(), stage = ?story.stage(), "story complete");
        Ok(story)
    }
}

pub async fn run(args: GenerateArgs) -> anyhow::Result<()> {
    let settings = Settings::from_env().context("load settings")?;
    tracing::debug!(?settings, "loaded settings");

    let with_images = !args.no_images || args.faces;
    let collaborators = Collaborators::from_settings(&settings, Path::new(&args.db), with_images)?;
    let out_dir = PathBuf::from(&args.out);
    let options = GenerateOptions {
        page_size: args.page_size,
        illustrate: !args.no_images,
        character_cache: args.faces.then(|| {
            CharacterCache::new(&args.cache).with_lock_timeout(settings.cache_lock_timeout)
        }),
        illustrator: IllustratorOptions::from_settings(&settings),
        query_variants: args.query_variants,
        min_score: args.min_score,
        artifact_dir: Some(out_dir.clone()),
    };

    let request = ValidatedRequest {
        query: args.query.clone(),
        age: args.age,
        language: args.language,
        image_style: args.style,
        color: args.color,
    };

    let path = match StoryPipeline::new(collaborators, options)
        .generate(&request)
        .await
    {
        Ok(story) => out_dir.join(story.artifact_name()),
        Err(err) => match err.downcast_ref::<StoryError>() {
            Some(StoryError::ArtifactExists { path }) => {
                tracing::warn!(path = %path.display(), "reusing existing story");
                path.clone()
            }
            _ => return Err(err),
        },
    };

    println!("{}", path.display());
    Ok(())
}
