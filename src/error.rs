use std::path::PathBuf;

/// Failure kinds callers can tell apart with `anyhow::Error::downcast_ref`.
#[derive(Debug, thiserror::Error)]
pub enum StoryError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("no relevant passage found for query: {query}")]
    NoRelevantPassage { query: String },

    #[error("character roster is not valid JSON: {reason}")]
    MalformedRoster { reason: String },

    #[error("character `{character}` is missing required field `{field}`")]
    MissingCharacterField { character: String, field: String },

    #[error("story text has already been built")]
    TextAlreadyBuilt,

    #[error("story text has not been built yet")]
    TextNotBuilt,

    #[error("story has not been paginated yet")]
    NotPaginated,

    #[error("illustration for page index {index} is out of range (story has {pages} pages)")]
    PageIndexOutOfRange { index: usize, pages: usize },

    #[error("story artifact already exists: {}", path.display())]
    ArtifactExists { path: PathBuf },

    #[error("image generation timed out: job {job_id} still running after {attempts} polls")]
    ImageGenerationTimedOut { job_id: String, attempts: u32 },

    #[error("image job {job_id} completed without an image url")]
    MissingImageUrl { job_id: String },

    #[error("character cache is locked by another session: {}", path.display())]
    CacheLocked { path: PathBuf },
}
