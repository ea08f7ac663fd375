use anyhow::{Context, Result};
use prchat_core::relay::{mentions_trigger, thread_moved_reply};
use prchat_core::{ChannelNamer, IdentityMap, Repository};
use std::env;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 900;

#[derive(Clone)]
pub struct Config {
    pub github_app_id: u64,
    pub github_private_key: String,
    pub github_installation_id: u64,
    pub github_webhook_secret: String,
    pub repository: Repository,
    pub slack_bot_token: String,
    pub slack_signing_secret: String,
    pub slack_team_id: Option<String>,
    pub identities: IdentityMap,
    pub port: u16,
    /// Zero disables the periodic sweep.
    pub sweep_interval_secs: u64,
    pub sweep_on_startup: bool,
    pub channel_name_includes_repo: bool,
    pub move_to_chat_phrase: String,
    pub recording_enabled: bool,
    pub recording_log_path: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let required = |key: &str| {
            lookup(key).with_context(|| format!("{} environment variable is required", key))
        };

        let github_app_id = required("GITHUB_APP_ID")?
            .parse::<u64>()
            .context("GITHUB_APP_ID must be a valid number")?;

        let github_private_key = required("GITHUB_PRIVATE_KEY")?.replace("\\n", "\n");

        let github_installation_id = required("GITHUB_INSTALLATION_ID")?
            .parse::<u64>()
            .context("GITHUB_INSTALLATION_ID must be a valid number")?;

        let github_webhook_secret = required("GITHUB_WEBHOOK_SECRET")?;

        let repository = Repository::new(required("GITHUB_OWNER")?, required("GITHUB_REPO")?);

        let slack_bot_token = required("SLACK_BOT_TOKEN")?;
        let slack_signing_secret = required("SLACK_SIGNING_SECRET")?;
        let slack_team_id = lookup("SLACK_TEAM_ID").filter(|s| !s.trim().is_empty());

        let identities = IdentityMap::from_json(&lookup("GIT_USER_TO_SLACK_ID").unwrap_or_default())
            .context("GIT_USER_TO_SLACK_ID is invalid")?;

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let sweep_interval_secs = match lookup("SWEEP_INTERVAL_SECS") {
            Some(value) => value
                .parse::<u64>()
                .context("SWEEP_INTERVAL_SECS must be a valid number")?,
            None => DEFAULT_SWEEP_INTERVAL_SECS,
        };

        let sweep_on_startup = parse_flag(lookup("SWEEP_ON_STARTUP"), true);
        let channel_name_includes_repo = parse_flag(lookup("CHANNEL_NAME_INCLUDES_REPO"), false);

        let move_to_chat_phrase = lookup("MOVE_TO_CHAT_PHRASE")
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| prchat_core::reconcile::DEFAULT_MOVE_TO_CHAT_PHRASE.to_string());
        if mentions_trigger(&thread_moved_reply(""), &move_to_chat_phrase) {
            anyhow::bail!(
                "MOVE_TO_CHAT_PHRASE {:?} appears in the bot's own thread reply",
                move_to_chat_phrase
            );
        }

        let recording_enabled = parse_flag(lookup("RECORDING_ENABLED"), false);
        let recording_log_path =
            lookup("RECORDING_LOG_PATH").unwrap_or_else(|| "recordings.jsonl".to_string());

        Ok(Config {
            github_app_id,
            github_private_key,
            github_installation_id,
            github_webhook_secret,
            repository,
            slack_bot_token,
            slack_signing_secret,
            slack_team_id,
            identities,
            port,
            sweep_interval_secs,
            sweep_on_startup,
            channel_name_includes_repo,
            move_to_chat_phrase,
            recording_enabled,
            recording_log_path,
        })
    }

    pub fn channel_namer(&self) -> ChannelNamer {
        ChannelNamer::new(&self.repository.name, self.channel_name_includes_repo)
    }
}

/// Booleans accept `true`/`false` in any case; anything else (or unset)
/// falls back to `default`.
pub fn parse_flag(value: Option<String>, default: bool) -> bool {
    value
        .and_then(|v| v.trim().to_ascii_lowercase().parse::<bool>().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base() -> HashMap<&'static str, String> {
        HashMap::from([
            ("GITHUB_APP_ID", "12345".to_string()),
            ("GITHUB_PRIVATE_KEY", "-----BEGIN-----\\nabc\\n-----END-----".to_string()),
            ("GITHUB_INSTALLATION_ID", "678".to_string()),
            ("GITHUB_WEBHOOK_SECRET", "whsec".to_string()),
            ("GITHUB_OWNER", "acme".to_string()),
            ("GITHUB_REPO", "widgets".to_string()),
            ("SLACK_BOT_TOKEN", "xoxb-1".to_string()),
            ("SLACK_SIGNING_SECRET", "signing".to_string()),
        ])
    }

    fn load(vars: &HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&base()).unwrap();
        assert_eq!(config.github_app_id, 12345);
        assert_eq!(config.github_private_key, "-----BEGIN-----\nabc\n-----END-----");
        assert_eq!(config.repository.full_name(), "acme/widgets");
        assert_eq!(config.port, 3000);
        assert_eq!(config.sweep_interval_secs, DEFAULT_SWEEP_INTERVAL_SECS);
        assert!(config.sweep_on_startup);
        assert!(!config.channel_name_includes_repo);
        assert!(!config.recording_enabled);
        assert_eq!(config.recording_log_path, "recordings.jsonl");
        assert_eq!(config.move_to_chat_phrase, "move to slack");
        assert!(config.identities.is_empty());
        assert_eq!(config.slack_team_id, None);
        assert_eq!(config.channel_namer().name(42), "pr-42");
    }

    #[test]
    fn test_missing_required_variable_names_it() {
        let mut vars = base();
        vars.remove("SLACK_SIGNING_SECRET");
        let err = load(&vars).err().unwrap();
        assert!(err.to_string().contains("SLACK_SIGNING_SECRET"));
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut vars = base();
        vars.insert("PORT", "http".to_string());
        assert!(load(&vars).is_err());

        let mut vars = base();
        vars.insert("GITHUB_INSTALLATION_ID", "-1".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_optional_settings() {
        let mut vars = base();
        vars.insert("GIT_USER_TO_SLACK_ID", r#"{"alice": "U123"}"#.to_string());
        vars.insert("SLACK_TEAM_ID", "T1".to_string());
        vars.insert("SWEEP_INTERVAL_SECS", "0".to_string());
        vars.insert("SWEEP_ON_STARTUP", "FALSE".to_string());
        vars.insert("CHANNEL_NAME_INCLUDES_REPO", "true".to_string());
        vars.insert("MOVE_TO_CHAT_PHRASE", "take it to chat".to_string());

        let config = load(&vars).unwrap();
        assert_eq!(config.identities.slack_id("alice"), Some("U123"));
        assert_eq!(config.slack_team_id.as_deref(), Some("T1"));
        assert_eq!(config.sweep_interval_secs, 0);
        assert!(!config.sweep_on_startup);
        assert_eq!(config.channel_namer().name(42), "pr-42-widgets");
        assert_eq!(config.move_to_chat_phrase, "take it to chat");
    }

    #[test]
    fn test_phrase_matching_the_bot_reply_is_rejected() {
        let mut vars = base();
        vars.insert("MOVE_TO_CHAT_PHRASE", "Slack".to_string());
        let err = load(&vars).err().expect("phrase must be rejected");
        assert!(err.to_string().contains("MOVE_TO_CHAT_PHRASE"));

        vars.insert("MOVE_TO_CHAT_PHRASE", "thread continues".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_bad_identity_map_is_fatal() {
        let mut vars = base();
        vars.insert("GIT_USER_TO_SLACK_ID", "[]".to_string());
        assert!(load(&vars).is_err());
    }

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag(Some(" True ".to_string()), false));
        assert!(!parse_flag(Some("nope".to_string()), false));
        assert!(parse_flag(None, true));
    }
}
