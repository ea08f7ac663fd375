use anyhow::{Context, Result};
use axum::{http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use prchat_core::{
    ChatPlatform, CodeHost, Engine, EngineSettings, GitHubClient, RecordingLogger,
    RepositoryHandle, SlackClient,
};
use prchat_server::config::Config;
use prchat_server::redirect::redirect_router;
use prchat_server::slack_command::slack_command_router;
use prchat_server::sweep::{run_sweep, sweep_loop};
use prchat_server::webhook::webhook_router;
use prchat_server::AppState;

async fn health_check() -> Result<Json<serde_json::Value>, StatusCode> {
    Ok(Json(json!({
        "status": "healthy",
        "service": "prchat"
    })))
}

async fn help_handler() -> Json<serde_json::Value> {
    let version = prchat_server::get_bot_version();
    Json(json!({
        "service": "prchat",
        "version": version,
        "description": "Keeps one Slack channel per open pull request",
        "endpoints": [
            {
                "path": "/health",
                "method": "GET",
                "description": "Health check endpoint",
                "authentication": "None"
            },
            {
                "path": "/webhook",
                "method": "POST",
                "description": "GitHub webhook receiver for pull request and review events",
                "authentication": "GitHub webhook signature (X-Hub-Signature-256)"
            },
            {
                "path": "/slack/commands",
                "method": "POST",
                "description": "Slash command: `sync` or a PR number",
                "authentication": "Slack request signature (X-Slack-Signature)"
            },
            {
                "path": "/app/openSlackChannel/v1/{repoName}/{pullNumber}",
                "method": "GET",
                "description": "Redirect to the PR's channel, creating it for open PRs",
                "authentication": "None"
            },
            {
                "path": "/help",
                "method": "GET",
                "description": "API documentation and service information",
                "authentication": "None"
            }
        ],
        "configuration": {
            "required_env_vars": [
                "GITHUB_APP_ID",
                "GITHUB_PRIVATE_KEY",
                "GITHUB_INSTALLATION_ID",
                "GITHUB_WEBHOOK_SECRET",
                "GITHUB_OWNER",
                "GITHUB_REPO",
                "SLACK_BOT_TOKEN",
                "SLACK_SIGNING_SECRET"
            ],
            "optional_env_vars": [
                "GIT_USER_TO_SLACK_ID (default: {})",
                "SLACK_TEAM_ID",
                "PORT (default: 3000)",
                "SWEEP_INTERVAL_SECS (default: 900, 0 disables)",
                "SWEEP_ON_STARTUP (default: true)",
                "CHANNEL_NAME_INCLUDES_REPO (default: false)",
                "MOVE_TO_CHAT_PHRASE (default: move to slack)",
                "RECORDING_ENABLED (default: false)",
                "RECORDING_LOG_PATH (default: recordings.jsonl)"
            ]
        }
    }))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        "Starting prchat server, version {}",
        prchat_server::get_bot_version()
    );

    let config = Config::from_env().context("Failed to load configuration from environment")?;

    let recording_logger = if config.recording_enabled {
        match RecordingLogger::new(PathBuf::from(&config.recording_log_path)) {
            Ok(logger) => {
                info!(
                    "Recording enabled, logging to: {}",
                    config.recording_log_path
                );
                Some(logger)
            }
            Err(e) => {
                error!("Failed to initialize recording logger: {}", e);
                None
            }
        }
    } else {
        None
    };

    let github_client = GitHubClient::new_with_recording(
        prchat_core::github::GITHUB_API_BASE.to_string(),
        config.github_app_id,
        config.github_private_key.clone(),
        recording_logger.clone(),
    )?;
    let slack_client = SlackClient::new_with_recording(
        prchat_core::slack::SLACK_API_BASE.to_string(),
        config.slack_bot_token.clone(),
        recording_logger.clone(),
    )?;

    let bot_user_id = slack_client
        .auth_test()
        .await
        .context("Failed to resolve the bot's Slack user (auth.test)")?;
    let bot_login = github_client
        .get_bot_login()
        .await
        .context("Failed to resolve the GitHub App's bot login")?;
    info!("Slack bot user {}, GitHub bot {}", bot_user_id, bot_login);

    if config.identities.is_empty() {
        warn!("GIT_USER_TO_SLACK_ID is empty; nobody will be invited");
    } else {
        info!("Loaded {} identity mapping(s)", config.identities.len());
    }

    let repository = RepositoryHandle::new(
        github_client,
        config.github_installation_id,
        config.repository.clone(),
        bot_login.clone(),
    );

    let chat: Arc<dyn ChatPlatform> = Arc::new(slack_client);
    let host: Arc<dyn CodeHost> = Arc::new(repository.clone());
    let engine = Engine::new(
        chat,
        host,
        EngineSettings {
            namer: config.channel_namer(),
            identities: Arc::new(config.identities.clone()),
            bot_user_id,
            bot_login,
            team_id: config.slack_team_id.clone(),
            move_to_chat_phrase: config.move_to_chat_phrase.clone(),
        },
    );

    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        repository,
        webhook_secret: config.github_webhook_secret.clone(),
        slack_signing_secret: config.slack_signing_secret.clone(),
        recording_logger,
        response_client: reqwest::Client::new(),
    });

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/help", get(help_handler))
        .merge(webhook_router(app_state.clone()))
        .merge(slack_command_router(app_state.clone()))
        .merge(redirect_router())
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(app_state.clone());

    if config.sweep_interval_secs > 0 {
        let period = Duration::from_secs(config.sweep_interval_secs);
        let sweep_on_startup = config.sweep_on_startup;
        tokio::spawn(async move {
            sweep_loop(engine, period, sweep_on_startup).await;
        });
    } else if config.sweep_on_startup {
        tokio::spawn(async move {
            run_sweep(&engine).await;
        });
    }

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;
    info!("Server listening on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
