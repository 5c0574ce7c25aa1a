use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Context as _;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};

use crate::error::StoryError;
use crate::llm::TextModel;

pub const REQUIRED_FIELDS: [&str; 5] = ["name", "description", "attire", "gender", "age"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRecord {
    pub name: String,
    pub description: String,
    pub attire: String,
    pub gender: String,
    pub age: String,
}

/// Lowercase character name to record.
pub type CharacterRoster = BTreeMap<String, CharacterRecord>;

/// Extracts the cast of a story with visual descriptions.
#[derive(Clone)]
pub struct StoryCharacters {
    model: Arc<dyn TextModel>,
}

impl StoryCharacters {
    pub fn new(model: Arc<dyn TextModel>) -> Self {
        Self { model }
    }

    pub async fn fetch_characters(&self, story_text: &str) -> anyhow::Result<CharacterRoster> {
        let raw = self
            .model
            .complete(&roster_prompt(story_text))
            .await
            .context("extract characters")?;
        let roster = parse_roster(&raw)?;
        tracing::info!(
            characters = ?roster.keys().collect::<Vec<_>>(),
            "extracted character roster"
        );
        Ok(roster)
    }
}

pub fn roster_prompt(story_text: &str) -> String {
    format!(
        "Your goal is to analyze the story below and produce a JSON object that maps each \
character in the story to a physical description that you come up with.\n\
\n\
Rules:\n\
- Each value is an object with the string fields `name`, `description`, `attire`, `gender` and `age`.\n\
- `description` is a short label plus comma-separated adjectives for physical and facial \
features, for example \"Indian warrior, tall, broad-shouldered, sharp eyes\". No sentences.\n\
- `attire` describes the clothing you come up with for the character.\n\
- `gender` and `age` are inferred from the story; `age` is an approximate number of years.\n\
- Output ONLY the JSON object (no markdown fences, no commentary).\n\
- Schema: {{\"<name>\":{{\"name\":\"...\",\"description\":\"...\",\"attire\":\"...\",\"gender\":\"...\",\"age\":\"...\"}}}}\n\
\n\
BEGIN_STORY\n\
{story_text}\n\
END_STORY\n"
    )
}

/// Parses model output into a roster. The output must be a JSON object of
/// complete records; names are folded to lowercase and the first spelling of
/// a name wins when the model lists it twice with different casing.
pub fn parse_roster(raw: &str) -> Result<CharacterRoster, StoryError> {
    let json = strip_code_fence(raw.trim());
    let entries: OrderedEntries =
        serde_json::from_str(json).map_err(|err| StoryError::MalformedRoster {
            reason: err.to_string(),
        })?;

    let mut roster = CharacterRoster::new();
    for (name, value) in entries.0 {
        let record = character_record(&name, &value)?;
        let key = name.trim().to_lowercase();
        if roster.contains_key(&key) {
            tracing::debug!(character = %name, key = %key, "merging differently cased character");
            continue;
        }
        roster.insert(key, record);
    }
    Ok(roster)
}

fn character_record(name: &str, value: &serde_json::Value) -> Result<CharacterRecord, StoryError> {
    let object = value.as_object().ok_or_else(|| StoryError::MalformedRoster {
        reason: format!("character `{name}` is not an object"),
    })?;

    let field = |field: &str| -> Result<String, StoryError> {
        match object.get(field) {
            Some(serde_json::Value::String(s)) => Ok(s.clone()),
            Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
            Some(serde_json::Value::Null) | None => Err(StoryError::MissingCharacterField {
                character: name.to_owned(),
                field: field.to_owned(),
            }),
            Some(_) => Err(StoryError::MalformedRoster {
                reason: format!("field `{field}` of character `{name}` must be a string"),
            }),
        }
    };

    let [name_field, description, attire, gender, age] = REQUIRED_FIELDS;
    Ok(CharacterRecord {
        name: field(name_field)?,
        description: field(description)?,
        attire: field(attire)?,
        gender: field(gender)?,
        age: field(age)?,
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

// A JSON object read as key/value pairs in document order.
struct OrderedEntries(Vec<(String, serde_json::Value)>);

impl<'de> Deserialize<'de> for OrderedEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object mapping character names to records")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some(entry) = map.next_entry::<String, serde_json::Value>()? {
                    entries.push(entry);
                }
                Ok(OrderedEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}
