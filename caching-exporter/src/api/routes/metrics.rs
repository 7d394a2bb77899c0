//! Prometheus scrape endpoint.

use axum::{Router, extract::State, http::header, response::IntoResponse, routing::get};

use crate::api::error::ApiResult;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(scrape))
}

/// Render every series in the text exposition format.
async fn scrape(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state.exporter.export().await?;
    Ok(([(header::CONTENT_TYPE, state.exporter.content_type())], body))
}
