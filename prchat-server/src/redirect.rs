//! `GET /app/openSlackChannel/v1/{repoName}/{pullNumber}`: send the browser
//! to the PR's channel, creating it first for an open PR.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use prchat_core::ReconcileError;
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;

/// The PR number a redirect request names, or `None` when it is for another
/// repository or the number is not a plain decimal.
pub fn redirect_target(served_repo: &str, repo_name: &str, pull_number: &str) -> Option<u64> {
    if !repo_name.eq_ignore_ascii_case(served_repo) {
        return None;
    }
    if pull_number.is_empty() || !pull_number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    pull_number.parse().ok()
}

pub async fn open_channel_handler(
    State(state): State<Arc<AppState>>,
    Path((repo_name, pull_number)): Path<(String, String)>,
) -> Response {
    let served = &state.repository.repository().name;
    let Some(number) = redirect_target(served, &repo_name, &pull_number) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state.engine.open_channel(number).await {
        Ok(opened) => {
            info!("PR #{}: redirecting to #{}", number, opened.channel.name);
            Redirect::to(&opened.deep_link).into_response()
        }
        Err(ReconcileError::NotFound(_)) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!("PR #{}: cannot open channel: {}", number, e);
            StatusCode::BAD_GATEWAY.into_response()
        }
    }
}

pub fn redirect_router() -> Router<Arc<AppState>> {
    Router::new().route(
        "/app/openSlackChannel/v1/{repo_name}/{pull_number}",
        get(open_channel_handler),
    )
}
