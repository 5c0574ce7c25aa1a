use std::sync::Arc;

use anyhow::Context as _;

use crate::characters::{CharacterRecord, CharacterRoster};
use crate::llm::TextModel;
use crate::story::Page;
use crate::story_config::StoryConfig;

/// Turns a page and the story's cast into a short image-generation prompt.
#[derive(Clone)]
pub struct StoryIllustratorQuery {
    model: Arc<dyn TextModel>,
}

impl StoryIllustratorQuery {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    pub async fn generate_prompt(
        &self,
        page: &Page,
        roster: &CharacterRoster,
        config: &StoryConfig,
    ) -> anyhow::Result<String> {
        let roster_json = serde_json::to_string(roster).context("serialize character roster")?;
        let raw = self
            .model
            .complete(&page_prompt_request(&page.content.text, &roster_json, config))
            .await
            .with_context(|| format!("generate illustration prompt for page {}", page.page_number))?;
        Ok(finalize_prompt(&raw, config))
    }
}

pub fn page_prompt_request(page_text: &str, roster_json: &str, config: &StoryConfig) -> String {
    format!(
        "You are a helpful AI assistant.\n\
Your goal is to take a page from a story and a JSON object describing the characters in \
the story, and output a prompt for an image generator that depicts the scene on the page.\n\
\n\
Rules:\n\
- Describe the scene; do not give directives and do not include any narrative.\n\
- Describe the characters' physical features and clothing succinctly, using the JSON.\n\
- Use at most two sentences. Do not make the prompt flowery or long.\n\
- End with the color and style, separated by commas: \", {color}, {style}\".\n\
\n\
Page:\n\
{page_text}\n\
\n\
Characters JSON:\n\
{roster_json}\n",
        color = config.color().label(),
        style = config.image_style().label(),
    )
}

/// Flattens the model's answer to one line and makes sure it ends with the
/// color and style qualifiers.
pub fn finalize_prompt(raw: &str, config: &StoryConfig) -> String {
    let flat = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut prompt = flat.trim_end_matches(['.', ',', ' ']).to_owned();

    let color = config.color().label();
    let style = config.image_style().label();
    let suffix = format!(", {color}, {style}");
    if !prompt.to_lowercase().ends_with(&suffix.to_lowercase()) {
        prompt.push_str(&suffix);
    }
    prompt
}

/// Prompt for a character's reference portrait; built locally, no model call.
pub fn character_prompt(record: &CharacterRecord, config: &StoryConfig) -> String {
    format!(
        "Portrait of {name}, a {age} year old {gender}, {description}, wearing {attire}, {color}, {style}",
        name = record.name.trim(),
        age = record.age.trim(),
        gender = record.gender.trim(),
        description = record.description.trim().trim_end_matches('.'),
        attire = record.attire.trim().trim_end_matches('.'),
        color = config.color().label(),
        style = config.image_style().label(),
    )
}
