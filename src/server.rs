use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use tower_http::trace::TraceLayer;

use crate::error::StoryError;
use crate::pipeline::StoryPipeline;
use crate::request::StoryRequest;
use crate::story::StoryArtifact;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<StoryPipeline>,
}

impl AppState {
    pub fn new(pipeline: StoryPipeline) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok\n" }))
        .route("/getstory/", post(get_story))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn get_story(
    State(state): State<AppState>,
    Json(body): Json<StoryRequest>,
) -> Result<Json<StoryArtifact>, (StatusCode, String)> {
    let request = body
        .validate()
        .map_err(|err| (StatusCode::BAD_REQUEST, err.to_string()))?;
    tracing::info!(query = %request.query, age = request.age.as_str(), "story requested");

    let err = match state.pipeline.generate(&request).await {
        Ok(story) => return Ok(Json(story.artifact())),
        Err(err) => err,
    };

    match err.downcast_ref::<StoryError>() {
        Some(StoryError::ArtifactExists { path }) => {
            tracing::info!(path = %path.display(), "serving previously generated story");
            StoryArtifact::load(path).map(Json).map_err(|err| {
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("load story: {err:#}"),
                )
            })
        }
        Some(StoryError::NoRelevantPassage { .. }) => {
            Err((StatusCode::NOT_FOUND, format!("{err:#}")))
        }
        _ => {
            tracing::error!(error = %format!("{err:#}"), "story generation failed");
            Err((
                StatusCode::BAD_GATEWAY,
                format!("story generation failed: {err:#}"),
            ))
        }
    }
}
