//! The `/prchat` slash command.
//!
//! `sync` starts a sweep, `<number>` or `#<number>` converges that PR and
//! answers with its channel; anything else gets the usage text. Slack wants
//! an answer within three seconds, so the channel link follows through the
//! request's `response_url`.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{Json, Response},
    routing::post,
    Form, Router,
};
use hmac::{Hmac, Mac};
use prchat_core::{
    CorrelationId, Direction, EventType, OpenedChannel, RecordedEvent, ReconcileError, Sanitizer,
};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::sweep::run_sweep;
use crate::webhook::headers_to_hashmap;
use crate::AppState;

/// Requests older (or newer) than this are replays.
pub const MAX_REQUEST_AGE_SECS: i64 = 300;

pub const USAGE: &str = "Usage: `/prchat sync` reconciles every PR, `/prchat <number>` opens that PR's channel.";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
pub struct SlashCommandForm {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub response_url: Option<String>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct SlashCommandResponse {
    pub response_type: &'static str,
    pub text: String,
}

impl SlashCommandResponse {
    fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: "ephemeral",
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Sync,
    Open(u64),
    Usage,
}

pub fn parse_command(text: &str) -> Command {
    let text = text.trim();
    if text.eq_ignore_ascii_case("sync") {
        return Command::Sync;
    }
    let digits = text.strip_prefix('#').unwrap_or(text);
    if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        if let Ok(number) = digits.parse::<u64>() {
            return Command::Open(number);
        }
    }
    Command::Usage
}

/// Slack's `v0` request signature over `v0:{timestamp}:{body}`.
pub fn verify_slack_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature: &str,
    now: i64,
) -> bool {
    let Ok(sent_at) = timestamp.parse::<i64>() else {
        return false;
    };
    if (now - sent_at).abs() > MAX_REQUEST_AGE_SECS {
        return false;
    }

    let Some(signature_hex) = signature.strip_prefix("v0=") else {
        return false;
    };
    let Ok(signature_bytes) = hex::decode(signature_hex) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(b"v0:");
    mac.update(timestamp.as_bytes());
    mac.update(b":");
    mac.update(body);

    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_slack_request(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let correlation_id = CorrelationId(Uuid::new_v4().to_string());

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|h| h.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)
    };
    let timestamp = header("x-slack-request-timestamp")?;
    let signature = header("x-slack-signature")?;

    let now = chrono::Utc::now().timestamp();
    if !verify_slack_signature(&state.slack_signing_secret, timestamp, &bytes, signature, now) {
        error!("Invalid Slack request signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    if let Some(ref logger) = state.recording_logger {
        logger.record(RecordedEvent {
            timestamp: chrono::Utc::now().to_rfc3339(),
            correlation_id: correlation_id.0.clone(),
            event_type: EventType::SlashCommandReceived,
            direction: Direction::Request,
            operation: "slash_command".to_string(),
            data: serde_json::json!({
                "headers": Sanitizer::sanitize_headers(&headers_to_hashmap(&parts.headers)),
                "body": String::from_utf8_lossy(&bytes),
            }),
            metadata: HashMap::new(),
        });
    }

    let mut new_request = Request::from_parts(parts, axum::body::Body::from(bytes));
    new_request.extensions_mut().insert(correlation_id);

    Ok(next.run(new_request).await)
}

fn open_response(
    number: u64,
    result: Result<OpenedChannel, ReconcileError>,
) -> SlashCommandResponse {
    match result {
        Ok(opened) => SlashCommandResponse::ephemeral(format!(
            "PR #{}: <{}|#{}>",
            number, opened.deep_link, opened.channel.name
        )),
        Err(ReconcileError::NotFound(_)) => SlashCommandResponse::ephemeral(format!(
            "PR #{} is not open and has no channel.",
            number
        )),
        Err(e) => {
            warn!("Slash command for PR #{} failed: {}", number, e);
            SlashCommandResponse::ephemeral(format!(
                "Could not open the channel for PR #{}: {}",
                number, e
            ))
        }
    }
}

/// Answer a slash command after its acknowledgement.
pub async fn send_delayed_response(
    client: &reqwest::Client,
    response_url: &str,
    response: &SlashCommandResponse,
) -> anyhow::Result<()> {
    client
        .post(response_url)
        .json(response)
        .send()
        .await?
        .error_for_status()?;
    Ok(())
}

pub async fn slash_command_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<SlashCommandForm>,
) -> Json<SlashCommandResponse> {
    let command = parse_command(&form.text);
    info!("Slash command from {}: {:?}", form.user_name, command);

    let response = match command {
        Command::Sync => {
            let engine = state.engine.clone();
            tokio::spawn(async move {
                run_sweep(&engine).await;
            });
            SlashCommandResponse::ephemeral("Sweep started.")
        }
        Command::Open(number) => match form.response_url {
            Some(response_url) => {
                let state = state.clone();
                tokio::spawn(async move {
                    let response = open_response(number, state.engine.open_channel(number).await);
                    if let Err(e) =
                        send_delayed_response(&state.response_client, &response_url, &response)
                            .await
                    {
                        error!("Failed to answer slash command for PR #{}: {}", number, e);
                    }
                });
                SlashCommandResponse::ephemeral(format!(
                    "Opening the channel for PR #{}...",
                    number
                ))
            }
            None => open_response(number, state.engine.open_channel(number).await),
        },
        Command::Usage => SlashCommandResponse::ephemeral(USAGE),
    };

    Json(response)
}

pub fn slack_command_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/slack/commands", post(slash_command_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_slack_request,
        ))
}
