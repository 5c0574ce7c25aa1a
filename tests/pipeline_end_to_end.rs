use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use katha::characters::StoryCharacters;
use katha::illustrator::{IllustratorOptions, StoryIllustrator};
use katha::image_gen::{ImageGenerator, JobProgress};
use katha::llm::TextModel;
use katha::pipeline::{Collaborators, GenerateOptions, StoryPipeline};
use katha::request::ValidatedRequest;
use katha::retriever::StoryRetriever;
use katha::server::{AppState, router};
use katha::story::Story;
use katha::story_config::{AgeRange, ColorMode, ImageStyle, Language, StoryConfig};
use katha::vector_store::{ScoredPassage, VectorStore};

const PASSAGE: &str = "In Hastinapura there lived a just king who listened to every subject.";
const ROSTER: &str =
    r#"{"King":{"description":"...","name":"King","attire":"robe","gender":"male","age":"40"}}"#;

/// First rule whose needle appears in the prompt wins.
struct Scripted {
    rules: Vec<(&'static str, &'static str)>,
}

impl Scripted {
    fn story() -> Self {
        Self {
            rules: vec![
                ("This is the query", "Tell me a story about a king"),
                ("Original question", "A story about a just king"),
                ("BEGIN_STORY", ROSTER),
                ("Page:\nSeg1", "A king in a robe on a throne"),
                ("Page:\nSeg2", "A king in a robe among his subjects"),
                ("sequence of segments", "Seg1\n\nSeg2"),
            ],
        }
    }
}

#[async_trait]
impl TextModel for Scripted {
    async fn complete(&self, prompt: &str) -> anyhow::Result<String> {
        self.rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle))
            .map(|(_, text)| (*text).to_owned())
            .ok_or_else(|| anyhow::anyhow!("unexpected prompt: {prompt}"))
    }
}

struct FixedPassage;

struct EmptyStore;

#[async_trait]
impl VectorStore for EmptyStore {
    async fn similarity_search(&self, _query: &str, _k: usize) -> anyhow::Result<Vec<ScoredPassage>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl VectorStore for FixedPassage {
    async fn similarity_search(&self, _query: &str, k: usize) -> anyhow::Result<Vec<ScoredPassage>> {
        Ok(vec![ScoredPassage {
            content: PASSAGE.to_owned(),
            score: 0.8,
        }]
        .into_iter()
        .take(k)
        .collect())
    }
}

/// Each job finishes on its first poll with `url{n}`.
#[derive(Default)]
struct InstantImages {
    prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageGenerator for InstantImages {
    async fn submit(&self, prompt: &str) -> anyhow::Result<String> {
        let mut prompts = self.prompts.lock().unwrap();
        prompts.push(prompt.to_owned());
        Ok((prompts.len() - 1).to_string())
    }

    async fn poll(&self, job_id: &str) -> anyhow::Result<JobProgress> {
        Ok(JobProgress {
            progress: 100,
            image_urls: vec![format!("url{job_id}")],
        })
    }
}

fn fast_illustrator() -> IllustratorOptions {
    IllustratorOptions::from_parts(Duration::from_millis(1), 3, 1)
}

#[tokio::test]
async fn king_query_becomes_two_illustrated_pages() -> anyhow::Result<()> {
    let model: Arc<dyn TextModel> = Arc::new(Scripted::story());
    let images = Arc::new(InstantImages::default());

    let passage = StoryRetriever::new(Arc::clone(&model), Arc::new(FixedPassage))
        .retrieve("tell me about a king")
        .await?;
    assert_eq!(passage, PASSAGE);

    let config = StoryConfig::new(AgeRange::Teen, Language::English, passage, ImageStyle::Comic)
        .with_color(ColorMode::Color);
    let mut story = Story::new(config);
    story.build_story(model.as_ref()).await?;
    story.build_pages()?;
    assert_eq!(story.pages().len(), 2);

    let roster = StoryCharacters::new(Arc::clone(&model))
        .fetch_characters(story.narrative_text().unwrap_or_default())
        .await?;
    assert_eq!(roster.keys().collect::<Vec<_>>(), vec!["king"]);

    let store = StoryIllustrator::new(Arc::clone(&model), images.clone(), fast_illustrator())
        .populate_store(story.pages(), &roster, story.config())
        .await?;
    assert_eq!(store.get(&0).map(String::as_str), Some("url0"));
    assert_eq!(store.get(&1).map(String::as_str), Some("url1"));

    story.populate_images(&store)?;
    assert_eq!(story.pages()[0].content.image_url.as_deref(), Some("url0"));
    assert_eq!(story.pages()[1].content.image_url.as_deref(), Some("url1"));
    Ok(())
}

fn pipeline(images: Arc<InstantImages>, artifact_dir: &std::path::Path) -> StoryPipeline {
    StoryPipeline::new(
        Collaborators {
            model: Arc::new(Scripted::story()),
            store: Arc::new(FixedPassage),
            images,
        },
        GenerateOptions {
            illustrator: fast_illustrator(),
            artifact_dir: Some(artifact_dir.to_path_buf()),
            ..GenerateOptions::default()
        },
    )
}

#[tokio::test]
async fn pipeline_persists_exactly_what_it_returns() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let images = Arc::new(InstantImages::default());
    let request = ValidatedRequest {
        query: "tell me about a king".to_owned(),
        age: AgeRange::Teen,
        language: Language::English,
        image_style: ImageStyle::Comic,
        color: ColorMode::Color,
    };

    let story = pipeline(images, temp.path()).generate(&request).await?;
    let loaded = katha::story::StoryArtifact::load(&temp.path().join(story.artifact_name()))?;
    assert_eq!(loaded, story.artifact());
    assert_eq!(loaded.pages[0].content.image_url.as_deref(), Some("url0"));
    Ok(())
}

async fn serve(state: AppState) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, router(state)).await;
    });
    Ok(format!("http://{addr}"))
}

fn body(age: &str, style: &str) -> serde_json::Value {
    serde_json::json!({
        "query": "tell me about a king",
        "age": age,
        "language": "english",
        "imageGenStyle": style,
        "color": "Color",
    })
}

#[tokio::test]
async fn getstory_validates_then_generates_once() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let images = Arc::new(InstantImages::default());
    let base = serve(AppState::new(pipeline(images.clone(), temp.path()))).await?;
    let client = reqwest::Client::new();

    let health = client.get(format!("{base}/healthz")).send().await?;
    assert_eq!(health.text().await?, "ok\n");

    let rejected = client
        .post(format!("{base}/getstory/"))
        .json(&body("toddler", "Comic"))
        .send()
        .await?;
    assert_eq!(rejected.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(rejected.text().await?.contains("unsupported age"));
    assert!(images.prompts.lock().unwrap().is_empty());

    let first: serde_json::Value = client
        .post(format!("{base}/getstory/"))
        .json(&body("teen", "Comic"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(first["pages"][0]["content"]["imageURL"], "url0");
    assert_eq!(first["pages"][1]["pageNo"], 2);
    assert_eq!(first["config"]["imageStyle"], "comic");

    let second: serde_json::Value = client
        .post(format!("{base}/getstory/"))
        .json(&body("teen", "Comic"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(second, first);
    assert_eq!(images.prompts.lock().unwrap().len(), 2);

    let monochrome: serde_json::Value = client
        .post(format!("{base}/getstory/"))
        .json(&body("teen", "Black and White"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(monochrome["config"]["color"], "black-and-white");
    let prompts = images.prompts.lock().unwrap().clone();
    assert!(prompts[2].ends_with(", Black and White, Comic"), "{prompts:?}");
    Ok(())
}

#[tokio::test]
async fn getstory_maps_missing_passage_and_upstream_failure() -> anyhow::Result<()> {
    let temp = tempfile::TempDir::new()?;
    let client = reqwest::Client::new();

    let empty = StoryPipeline::new(
        Collaborators {
            model: Arc::new(Scripted::story()),
            store: Arc::new(EmptyStore),
            images: Arc::new(InstantImages::default()),
        },
        GenerateOptions {
            artifact_dir: Some(temp.path().to_path_buf()),
            ..GenerateOptions::default()
        },
    );
    let base = serve(AppState::new(empty)).await?;
    let missing = client
        .post(format!("{base}/getstory/"))
        .json(&body("teen", "Comic"))
        .send()
        .await?;
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);
    assert!(missing.text().await?.contains("tell me about a king"));

    let images = Arc::new(InstantImages::default());
    let broken = StoryPipeline::new(
        Collaborators {
            model: Arc::new(Scripted { rules: Vec::new() }),
            store: Arc::new(FixedPassage),
            images: images.clone(),
        },
        GenerateOptions {
            artifact_dir: Some(temp.path().to_path_buf()),
            ..GenerateOptions::default()
        },
    );
    let base = serve(AppState::new(broken)).await?;
    let failed = client
        .post(format!("{base}/getstory/"))
        .json(&body("adult", "Watercolor"))
        .send()
        .await?;
    assert_eq!(failed.status(), reqwest::StatusCode::BAD_GATEWAY);
    assert!(failed.text().await?.contains("story generation failed"));
    assert!(images.prompts.lock().unwrap().is_empty());
    assert_eq!(std::fs::read_dir(temp.path())?.count(), 0);
    Ok(())
}
