use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use prchat_core::{
    build_from_emails, ChannelNamer, ChatPlatform, CodeHost, Engine, EngineSettings,
    GitHubClient, IdentityMap, Repository, RepositoryHandle, SlackClient,
};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// prchat: keep one Slack channel per open pull request
#[derive(Parser, Debug)]
#[command(name = "prchat")]
#[command(about = "Operator tool for the PR channel reconciler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Reconcile every PR with its channel once
    Sweep(SweepArgs),
    /// Build the login -> Slack id map from a login -> email table
    MapUsers(MapUsersArgs),
    /// Print the channel name for a PR number
    ChannelName(ChannelNameArgs),
}

#[derive(Args, Debug)]
struct GitHubArgs {
    #[arg(long, env = "GITHUB_APP_ID")]
    github_app_id: u64,

    /// PEM contents; `\n` escapes are expanded
    #[arg(long, env = "GITHUB_PRIVATE_KEY", hide_env_values = true)]
    github_private_key: String,

    #[arg(long, env = "GITHUB_INSTALLATION_ID")]
    github_installation_id: u64,

    #[arg(long, env = "GITHUB_OWNER")]
    owner: String,

    #[arg(long, env = "GITHUB_REPO")]
    repo: String,
}

#[derive(Parser, Debug)]
struct SweepArgs {
    #[command(flatten)]
    github: GitHubArgs,

    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    slack_bot_token: String,

    #[arg(long, env = "SLACK_TEAM_ID")]
    slack_team_id: Option<String>,

    /// JSON object of GitHub login -> Slack user id
    #[arg(long, env = "GIT_USER_TO_SLACK_ID", default_value = "{}")]
    identities: String,

    /// Use `pr-{number}-{repo}` channel names
    #[arg(long, env = "CHANNEL_NAME_INCLUDES_REPO")]
    include_repo: bool,

    /// If set, do not make any changes, just print what would be done
    #[arg(long)]
    dry_run: bool,
}

#[derive(Parser, Debug)]
struct MapUsersArgs {
    /// JSON file mapping GitHub login -> email
    #[arg(long)]
    emails: PathBuf,

    #[arg(long, env = "SLACK_BOT_TOKEN", hide_env_values = true)]
    slack_bot_token: String,
}

#[derive(Parser, Debug)]
struct ChannelNameArgs {
    number: u64,

    /// Qualify the name with this repository
    #[arg(long)]
    repo: Option<String>,
}

fn read_login_emails(path: &Path) -> Result<BTreeMap<String, String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text)
        .with_context(|| format!("{} must be a JSON object of login -> email", path.display()))
}

fn channel_name(args: &ChannelNameArgs) -> String {
    let namer = match &args.repo {
        Some(repo) => ChannelNamer::qualified(repo),
        None => ChannelNamer::unqualified(),
    };
    namer.name(args.number)
}

async fn build_engine(args: &SweepArgs) -> Result<Engine> {
    let identities = IdentityMap::from_json(&args.identities)?;
    let github = GitHubClient::new(
        args.github.github_app_id,
        args.github.github_private_key.replace("\\n", "\n"),
    )?;
    let slack = SlackClient::new(args.slack_bot_token.clone())?;

    let bot_user_id = slack
        .auth_test()
        .await
        .context("Failed to resolve the bot's Slack user")?;
    let bot_login = github
        .get_bot_login()
        .await
        .context("Failed to resolve the GitHub App's bot login")?;

    let repository = Repository::new(args.github.owner.clone(), args.github.repo.clone());
    let namer = ChannelNamer::new(&repository.name, args.include_repo);
    let host: Arc<dyn CodeHost> = Arc::new(RepositoryHandle::new(
        github,
        args.github.github_installation_id,
        repository,
        bot_login.clone(),
    ));
    let chat: Arc<dyn ChatPlatform> = Arc::new(slack);

    Ok(Engine::new(
        chat,
        host,
        EngineSettings {
            namer,
            identities: Arc::new(identities),
            bot_user_id,
            bot_login,
            team_id: args.slack_team_id.clone(),
            move_to_chat_phrase: prchat_core::reconcile::DEFAULT_MOVE_TO_CHAT_PHRASE.to_string(),
        },
    ))
}

async fn run_sweep(args: SweepArgs) -> Result<()> {
    let engine = build_engine(&args).await?;

    if args.dry_run {
        let plan = engine.plan_sweep().await?;
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    let report = engine.sweep().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.failures.is_empty() {
        anyhow::bail!("{} item(s) failed", report.failures.len());
    }
    Ok(())
}

async fn run_map_users(args: MapUsersArgs) -> Result<()> {
    let logins = read_login_emails(&args.emails)?;
    let slack = SlackClient::new(args.slack_bot_token)?;
    let by_email = slack.user_ids_by_email().await?;

    let built = build_from_emails(&logins, &by_email);
    for login in &built.unresolved {
        eprintln!("No Slack account for {}", login);
    }
    println!("{}", serde_json::to_string_pretty(&built.map.to_sorted())?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sweep(args) => run_sweep(args).await,
        Commands::MapUsers(args) => run_map_users(args).await,
        Commands::ChannelName(args) => {
            println!("{}", channel_name(&args));
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_channel_name_command() {
        let cli = Cli::try_parse_from(["prchat", "channel-name", "42"]).unwrap();
        let Commands::ChannelName(args) = cli.command else {
            panic!("expected channel-name");
        };
        assert_eq!(channel_name(&args), "pr-42");

        let cli =
            Cli::try_parse_from(["prchat", "channel-name", "42", "--repo", "Widgets"]).unwrap();
        let Commands::ChannelName(args) = cli.command else {
            panic!("expected channel-name");
        };
        assert_eq!(channel_name(&args), "pr-42-widgets");
    }

    #[test]
    fn test_sweep_args_parse() {
        let cli = Cli::try_parse_from([
            "prchat",
            "sweep",
            "--dry-run",
            "--github-app-id",
            "1",
            "--github-private-key",
            "key",
            "--github-installation-id",
            "2",
            "--owner",
            "acme",
            "--repo",
            "widgets",
            "--slack-bot-token",
            "xoxb",
        ])
        .unwrap();
        let Commands::Sweep(args) = cli.command else {
            panic!("expected sweep");
        };
        assert!(args.dry_run);
        assert_eq!(args.github.github_installation_id, 2);
        assert_eq!(args.github.repo, "widgets");
    }

    #[test]
    fn test_read_login_emails() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"alice": "alice@example.com"}}"#).unwrap();

        let logins = read_login_emails(file.path()).unwrap();
        assert_eq!(logins.get("alice").map(String::as_str), Some("alice@example.com"));
    }

    #[test]
    fn test_read_login_emails_rejects_lists() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"["alice@example.com"]"#).unwrap();
        assert!(read_login_emails(file.path()).is_err());
    }
}
