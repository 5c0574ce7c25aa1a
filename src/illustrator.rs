use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::character_cache::CharacterCache;
use crate::characters::CharacterRoster;
use crate::illustrator_query::{StoryIllustratorQuery, character_prompt};
use crate::image_gen::{ImageGenerator, PollPolicy, generate_image};
use crate::llm::TextModel;
use crate::settings::Settings;
use crate::story::{IllustrationStore, Page};
use crate::story_config::StoryConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IllustratorOptions {
    pub poll: PollPolicy,
    /// Pages illustrated at once; 1 keeps the run strictly sequential.
    pub concurrency: usize,
}

impl Default for IllustratorOptions {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            concurrency: 1,
        }
    }
}

/// Generates one illustration per page, and reference portraits per character.
#[derive(Clone)]
pub struct StoryIllustrator {
    query: StoryIllustratorQuery,
    images: Arc<dyn ImageGenerator>,
    options: IllustratorOptions,
}

impl StoryIllustrator {
    pub fn new(
        model: Arc<dyn TextModel>,
        images: Arc<dyn ImageGenerator>,
        options: IllustratorOptions,
    ) -> Self {
        Self {
            query: StoryIllustratorQuery::new(model),
            images,
            options,
        }
    }

    /// Illustrates every page; the store is keyed by 0-based page index.
    /// Any failing page fails the whole run.
    pub async fn populate_store(
        &self,
        pages: &[Page],
        roster: &CharacterRoster,
        config: &StoryConfig,
    ) -> anyhow::Result<IllustrationStore> {
        let total = pages.len();
        let concurrency = self.options.concurrency.max(1).min(total.max(1));
        tracing::info!(pages = total, concurrency, "illustrating story");

        let roster = Arc::new(roster.clone());
        let config = Arc::new(config.clone());
        let mut join_set = tokio::task::JoinSet::new();
        let mut next_idx = 0usize;
        let mut store = IllustrationStore::new();
        let started_at = std::time::Instant::now();

        while next_idx < total || !join_set.is_empty() {
            while next_idx < total && join_set.len() < concurrency {
                let page_index = next_idx;
                let page = pages[page_index].clone();
                let illustrator = self.clone();
                let roster = Arc::clone(&roster);
                let config = Arc::clone(&config);

                join_set.spawn(async move {
                    let url = illustrator
                        .illustrate_page(&page, &roster, &config)
                        .await
                        .with_context(|| format!("illustrate page {}", page.page_number));
                    (page_index, url)
                });
                next_idx += 1;
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            let (page_index, url) = joined.context("join illustration task")?;
            let url = url?;
            tracing::info!(
                page = page_index + 1,
                total,
                done = store.len() + 1,
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "page illustrated"
            );
            store.insert(page_index, url);
        }

        Ok(store)
    }

    async fn illustrate_page(
        &self,
        page: &Page,
        roster: &CharacterRoster,
        config: &StoryConfig,
    ) -> anyhow::Result<String> {
        let prompt = self.query.generate_prompt(page, roster, config).await?;
        tracing::debug!(page = page.page_number, prompt = %prompt, "illustration prompt");
        generate_image(self.images.as_ref(), &prompt, self.options.poll).await
    }

    /// Returns a reference portrait URL for every character in the roster,
    /// keyed by lowercase name.
    ///
    /// Names already in the cache are reused as-is and never regenerated. New
    /// portraits are merged into the cache once all characters succeed; the
    /// cache lock is only taken for that merge.
    pub async fn generate_character_faces(
        &self,
        roster: &CharacterRoster,
        config: &StoryConfig,
        cache: &CharacterCache,
    ) -> anyhow::Result<BTreeMap<String, String>> {
        let mut session = cache.open_session().await.context("open character cache")?;
        let mut faces = BTreeMap::new();

        for (name, record) in roster {
            if let Some(url) = session.get(name) {
                tracing::info!(character = %name, "character cache hit");
                faces.insert(name.clone(), url.to_owned());
                continue;
            }

            tracing::info!(character = %name, "character cache miss; generating portrait");
            let prompt = character_prompt(record, config);
            let url = generate_image(self.images.as_ref(), &prompt, self.options.poll)
                .await
                .with_context(|| format!("generate portrait for {name}"))?;
            session.insert(name, url.clone());
            faces.insert(name.clone(), url);
        }

        session.commit().await.context("save character cache")?;
        Ok(faces)
    }
}

impl IllustratorOptions {
    pub fn from_parts(interval: Duration, max_attempts: u32, concurrency: usize) -> Self {
        Self {
            poll: PollPolicy {
                interval,
                max_attempts,
            },
            concurrency,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_parts(
            settings.poll_interval,
            settings.max_poll_attempts,
            settings.illustration_concurrency,
        )
    }
}
