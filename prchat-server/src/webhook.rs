use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use prchat_core::github::{PullRequestResponse, ReviewCommentResponse, UserResponse};
use prchat_core::{
    CorrelationId, Direction, EventOutcome, EventType, PullRequest, PullRequestEvent,
    RecordedEvent, ReviewVerdict, Sanitizer,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::AppState;

const EVENT_HEADER: &str = "x-github-event";

#[derive(Debug, Deserialize)]
pub struct GitHubWebhookPayload {
    pub action: Option<String>,
    pub pull_request: Option<PullRequestResponse>,
    pub repository: Option<Repository>,
    pub review: Option<Review>,
    pub comment: Option<ReviewCommentResponse>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
}

#[derive(Debug, Deserialize)]
pub struct Review {
    pub state: String,
    pub user: Option<UserResponse>,
}

#[derive(Serialize)]
pub struct WebhookResponse {
    pub message: String,
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    // Decode the hex signature to bytes
    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Use constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    // Extract request parts for recording
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get("x-hub-signature-256")
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if let Some(ref logger) = state.recording_logger {
        let headers_map = headers_to_hashmap(&parts.headers);
        let webhook_event = RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.0.clone(),
            event_type: EventType::WebhookReceived,
            direction: Direction::Request,
            operation: "webhook".to_string(),
            data: serde_json::json!({
                "headers": Sanitizer::sanitize_headers(&headers_map),
                "body": serde_json::from_slice::<serde_json::Value>(&bytes)
                    .unwrap_or(serde_json::Value::Null)
            }),
            metadata: HashMap::new(),
        };
        logger.record(webhook_event);
    }

    // Add correlation_id to request extensions for use in handlers and HTTP clients
    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

pub(crate) fn headers_to_hashmap(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for (name, value) in headers {
        if let Ok(value_str) = value.to_str() {
            map.insert(name.to_string(), value_str.to_string());
        }
    }
    map
}

/// Map a delivery to the PR it concerns and the engine event it implies.
/// Deliveries without a channel consequence map to `None`.
pub fn parse_delivery(
    event_name: &str,
    payload: GitHubWebhookPayload,
) -> Option<(PullRequest, PullRequestEvent)> {
    let action = payload.action?;
    let pr = PullRequest::from(payload.pull_request?);

    let event = match (event_name, action.as_str()) {
        ("pull_request", action) => PullRequestEvent::from_pull_request_action(action),
        ("pull_request_review", "submitted") => {
            let review = payload.review?;
            PullRequestEvent::ReviewSubmitted {
                reviewer: review.user.map(|u| u.login)?,
                verdict: ReviewVerdict::from_github(&review.state),
            }
        }
        ("pull_request_review_comment", "created") => PullRequestEvent::ReviewCommentCreated {
            comment: payload.comment?.into(),
        },
        _ => return None,
    };

    match event {
        PullRequestEvent::Other(_) => None,
        event => Some((pr, event)),
    }
}

fn describe(outcome: &EventOutcome) -> String {
    match outcome {
        EventOutcome::Ignored => "ignored".to_string(),
        EventOutcome::Converged(c) => format!(
            "{} write(s), {} failure(s), {} anomal{}",
            c.writes,
            c.failures.len(),
            c.anomalies.len(),
            if c.anomalies.len() == 1 { "y" } else { "ies" }
        ),
        EventOutcome::Moved(m) => format!("moved {} comment(s) to #{}", m.comments, m.channel.name),
        EventOutcome::Failed(e) => format!("failed: {}", e),
    }
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, StatusCode> {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone());

    let (parts, body) = request.into_parts();
    let event_name = parts
        .headers
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let payload: GitHubWebhookPayload = serde_json::from_slice(&bytes).map_err(|e| {
        warn!("Unparseable {} payload: {}", event_name, e);
        StatusCode::BAD_REQUEST
    })?;

    info!(
        "Received {} webhook, action {:?}",
        event_name, payload.action
    );

    let expected = state.repository.repository().full_name();
    match &payload.repository {
        Some(repo) if repo.full_name.eq_ignore_ascii_case(&expected) => {}
        other => {
            warn!(
                "Ignoring delivery for {}",
                other.as_ref().map(|r| r.full_name.as_str()).unwrap_or("unknown repository")
            );
            return Ok(Json(WebhookResponse {
                message: "Ignored: repository not served".to_string(),
            }));
        }
    }

    let Some((pr, event)) = parse_delivery(&event_name, payload) else {
        return Ok(Json(WebhookResponse {
            message: "Ignored".to_string(),
        }));
    };

    info!("PR #{}: handling {:?}", pr.number, event);
    let engine = state.engine_for(correlation_id.as_deref());
    tokio::spawn(async move {
        let outcome = engine.handle_event(&pr, event).await;
        info!("PR #{}: {}", pr.number, describe(&outcome));
    });

    Ok(Json(WebhookResponse {
        message: "Accepted".to_string(),
    }))
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}
