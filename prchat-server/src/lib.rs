pub mod config;
pub mod redirect;
pub mod slack_command;
pub mod sweep;
pub mod webhook;

use std::sync::Arc;

use prchat_core::{CodeHost, Engine, RecordingLogger, RepositoryHandle};

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_bot_version() -> String {
    // First check for git hash from the build environment
    if let Some(git_hash) = option_env!("PRCHAT_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        // Fall back to built crate's git detection (for cargo builds)
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

pub struct AppState {
    pub engine: Engine,
    /// The repository handle the engine was built with; tagged per delivery.
    pub repository: RepositoryHandle,
    pub webhook_secret: String,
    pub slack_signing_secret: String,
    pub recording_logger: Option<RecordingLogger>,
    /// Posts delayed slash-command answers to Slack's `response_url`.
    pub response_client: reqwest::Client,
}

impl AppState {
    /// The engine, with GitHub calls tagged by `correlation_id` when present.
    pub fn engine_for(&self, correlation_id: Option<&str>) -> Engine {
        match correlation_id {
            Some(cid) => {
                let host: Arc<dyn CodeHost> = Arc::new(self.repository.with_correlation_id(cid));
                self.engine.with_code_host(host)
            }
            None => self.engine.clone(),
        }
    }
}
