use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha512};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum AgeRange {
    Preteen,
    Teen,
    Adult,
}

impl AgeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Preteen => "preteen",
            Self::Teen => "teen",
            Self::Adult => "adult",
        }
    }

    /// Audience wording used inside prompts.
    pub fn descriptor(self) -> &'static str {
        match self {
            Self::Preteen => "preteens",
            Self::Teen => "teenagers",
            Self::Adult => "adults",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Language {
    English,
    Hindi,
}

impl Language {
    pub fn name(self) -> &'static str {
        match self {
            Self::English => "English",
            Self::Hindi => "Hindi",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ImageStyle {
    Hyperrealistic,
    Comic,
    Watercolor,
}

impl ImageStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hyperrealistic => "hyperrealistic",
            Self::Comic => "comic",
            Self::Watercolor => "watercolor",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Hyperrealistic => "Hyperrealistic",
            Self::Comic => "Comic",
            Self::Watercolor => "Watercolor",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum ColorMode {
    #[default]
    Color,
    BlackAndWhite,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Color => "color",
            Self::BlackAndWhite => "black-and-white",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Color => "Color",
            Self::BlackAndWhite => "Black and White",
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum PageSize {
    Small,
    Medium,
    #[default]
    Large,
}

impl PageSize {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Small => "small",
            Self::Medium => "medium",
            Self::Large => "large",
        }
    }

    fn length_hint(self) -> &'static str {
        match self {
            Self::Small => "two to three sentences",
            Self::Medium => "four to six sentences",
            Self::Large => "eight to ten sentences",
        }
    }
}

/// Generation parameters for one story. Immutable once built; the content id
/// is derived from the source text and names persisted artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StoryConfigFields")]
pub struct StoryConfig {
    age: AgeRange,
    language: Language,
    source_text: String,
    image_style: ImageStyle,
    color: ColorMode,
    page_size: PageSize,
    content_id: String,
}

// Persisted content ids are recomputed on load rather than trusted.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoryConfigFields {
    age: AgeRange,
    language: Language,
    source_text: String,
    image_style: ImageStyle,
    #[serde(default)]
    color: ColorMode,
    #[serde(default)]
    page_size: PageSize,
}

impl From<StoryConfigFields> for StoryConfig {
    fn from(fields: StoryConfigFields) -> Self {
        StoryConfig::new(
            fields.age,
            fields.language,
            fields.source_text,
            fields.image_style,
        )
        .with_color(fields.color)
        .with_page_size(fields.page_size)
    }
}

impl StoryConfig {
    pub fn new(
        age: AgeRange,
        language: Language,
        source_text: impl Into<String>,
        image_style: ImageStyle,
    ) -> Self {
        let source_text = source_text.into();
        let content_id = content_id(&source_text);
        Self {
            age,
            language,
            source_text,
            image_style,
            color: ColorMode::default(),
            page_size: PageSize::default(),
            content_id,
        }
    }

    #[must_use]
    pub fn with_color(mut self, color: ColorMode) -> Self {
        self.color = color;
        self
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: PageSize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn age(&self) -> AgeRange {
        self.age
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    pub fn image_style(&self) -> ImageStyle {
        self.image_style
    }

    pub fn color(&self) -> ColorMode {
        self.color
    }

    pub fn page_size(&self) -> PageSize {
        self.page_size
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    /// File name of the persisted story for this configuration fingerprint.
    pub fn artifact_name(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}.json",
            self.content_id,
            self.age.as_str(),
            self.color.as_str(),
            self.image_style.as_str(),
            self.page_size.as_str(),
        )
    }

    /// Instruction that turns the source text into page-sized narrative segments.
    pub fn prompt(&self) -> String {
        format!(
            "You are a storyteller retelling a mythological tale.\n\
\n\
Task: Convert the text below into a story in {language}, told as a sequence of segments.\n\
\n\
Rules:\n\
- Each segment narrates one scene and includes dialogue between the characters.\n\
- Make each segment {size} in size ({length}).\n\
- Separate consecutive segments with two new lines.\n\
- Do not label, number or title the segments.\n\
- The target audience for this story is {age}. Keep the tone and vocabulary appropriate for them.\n\
\n\
Text:\n\
{text}\n",
            language = self.language.name(),
            size = self.page_size.as_str(),
            length = self.page_size.length_hint(),
            age = self.age.descriptor(),
            text = self.source_text,
        )
    }
}

/// Hex-encoded SHA-512 of the source text.
pub fn content_id(source_text: &str) -> String {
    hex::encode(Sha512::digest(source_text.as_bytes()))
}
