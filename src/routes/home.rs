//! Chat page handler.

use axum::{extract::State, response::Html, Extension};
use tracing::instrument;

use crate::agents::mermaid::DiagramType;
use crate::config::DEFAULT_DIAGRAM_TYPE;
use crate::error::AppError;
use crate::middleware::RequestId;
use crate::state::AppState;

/// Renders the single-page chat UI with the current agent list.
#[instrument(name = "home::index", skip(state, request_id))]
pub async fn index(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
) -> Result<Html<String>, AppError> {
    let diagram_types: Vec<&str> = DiagramType::ALL.iter().map(|t| t.as_str()).collect();

    let mut context = tera::Context::new();
    context.insert("agents", &state.agents.info());
    context.insert("diagram_types", &diagram_types);
    context.insert("default_diagram_type", DEFAULT_DIAGRAM_TYPE);
    context.insert("version", env!("CARGO_PKG_VERSION"));
    context.insert("environment", &state.config.environment);

    let html = state.tera.render("index.html", &context).map_err(|e| {
        tracing::error!(request_id = %request_id.0, "Failed to render index page");
        AppError::from(e)
    })?;
    Ok(Html(html))
}
