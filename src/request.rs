use serde::Deserialize;

use crate::error::StoryError;
use crate::story_config::{AgeRange, ColorMode, ImageStyle, Language};

/// Body of `POST /getstory/`, exactly as clients send it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryRequest {
    pub query: String,
    pub age: String,
    pub language: String,
    pub image_gen_style: String,
    pub color: String,
}

/// A request whose choices have been parsed into closed enums.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRequest {
    pub query: String,
    pub age: AgeRange,
    pub language: Language,
    pub image_style: ImageStyle,
    pub color: ColorMode,
}

impl StoryRequest {
    pub fn validate(&self) -> Result<ValidatedRequest, StoryError> {
        let query = self.query.trim();
        if query.is_empty() {
            return Err(StoryError::InvalidRequest("query must not be empty".to_owned()));
        }

        let age = match self.age.as_str() {
            "preteen" => AgeRange::Preteen,
            "teen" => AgeRange::Teen,
            "adult" => AgeRange::Adult,
            other => return Err(invalid("age", other, "preteen, teen, adult")),
        };

        let language = match self.language.as_str() {
            "english" => Language::English,
            other => return Err(invalid("language", other, "english")),
        };

        // "Black and White" is offered as a style; it means comic art without color.
        let (image_style, style_color) = match self.image_gen_style.as_str() {
            "Hyperrealistic" => (ImageStyle::Hyperrealistic, None),
            "Comic" => (ImageStyle::Comic, None),
            "Watercolor" => (ImageStyle::Watercolor, None),
            "Black and White" => (ImageStyle::Comic, Some(ColorMode::BlackAndWhite)),
            other => {
                return Err(invalid(
                    "imageGenStyle",
                    other,
                    "Hyperrealistic, Comic, Black and White, Watercolor",
                ));
            }
        };

        let color = match self.color.as_str() {
            "Color" => ColorMode::Color,
            "Black and White" => ColorMode::BlackAndWhite,
            other => return Err(invalid("color", other, "Color, Black and White")),
        };

        Ok(ValidatedRequest {
            query: query.to_owned(),
            age,
            language,
            image_style,
            color: style_color.unwrap_or(color),
        })
    }
}

fn invalid(field: &str, value: &str, allowed: &str) -> StoryError {
    StoryError::InvalidRequest(format!(
        "unsupported {field} {value:?} (expected one of: {allowed})"
    ))
}
