use clap::{Args, Parser, Subcommand};

use crate::story_config::{AgeRange, ColorMode, ImageStyle, Language, PageSize};

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Retrieve a passage, retell it and illustrate every page.
    Generate(GenerateArgs),
    /// Embed a directory of `.txt` files into a JSONL vector store.
    Index(IndexArgs),
    /// Print the passage that best matches a query.
    Retrieve(RetrieveArgs),
    /// Print the pages of a generated story.
    Show(ShowArgs),
}

#[derive(Debug, Args)]
pub struct GenerateArgs {
    /// What the story should be about.
    #[arg(long)]
    pub query: String,

    #[arg(long, value_enum, default_value_t = AgeRange::Teen)]
    pub age: AgeRange,

    #[arg(long, value_enum, default_value_t = Language::English)]
    pub language: Language,

    #[arg(long, value_enum, default_value_t = ImageStyle::Comic)]
    pub style: ImageStyle,

    #[arg(long, value_enum, default_value_t = ColorMode::Color)]
    pub color: ColorMode,

    #[arg(long, value_enum, default_value_t = PageSize::Large)]
    pub page_size: PageSize,

    /// Output directory for story JSON files.
    #[arg(long, default_value = "stories")]
    pub out: String,

    /// Vector store written by `katha index`.
    #[arg(long, default_value = "db/passages.jsonl")]
    pub db: String,

    /// Character reference image cache.
    #[arg(long, default_value = "characters.json")]
    pub cache: String,

    /// Also generate a reference portrait per character.
    #[arg(long, default_value_t = false)]
    pub faces: bool,

    /// Skip page illustrations (text only).
    #[arg(long, default_value_t = false)]
    pub no_images: bool,

    /// Alternative phrasings searched per query.
    #[arg(long, default_value_t = 3)]
    pub query_variants: usize,

    /// Discard passages scoring below this similarity.
    #[arg(long)]
    pub min_score: Option<f32>,
}

#[derive(Debug, Args)]
pub struct IndexArgs {
    /// Directory searched recursively for `.txt` files.
    #[arg(long)]
    pub corpus: String,

    /// Output JSONL file (must not exist).
    #[arg(long)]
    pub out: String,

    /// Maximum characters per chunk.
    #[arg(long, default_value_t = 1000)]
    pub chunk_size: usize,
}

#[derive(Debug, Args)]
pub struct RetrieveArgs {
    #[arg(long)]
    pub query: String,

    #[arg(long, default_value = "db/passages.jsonl")]
    pub db: String,

    #[arg(long, default_value_t = 3)]
    pub query_variants: usize,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Story JSON written by `katha generate`.
    #[arg(long)]
    pub story: String,
}
