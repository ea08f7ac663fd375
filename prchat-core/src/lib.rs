pub mod channel_name;
pub mod directory;
pub mod github;
pub mod identity;
pub mod model;
pub mod platform;
pub mod reconcile;
pub mod recording;
pub mod relay;
pub mod slack;
pub mod snapshot;

#[cfg(test)]
mod testing;

pub use channel_name::ChannelNamer;
pub use directory::{ChannelDirectory, DirectoryView};
pub use github::{create_github_client, GitHubClient, RepositoryHandle};
pub use identity::{build_from_emails, IdentityMap, ReverseBuild};
pub use model::*;
pub use platform::{ChatPlatform, CodeHost};
pub use reconcile::{
    Anomaly, Convergence, Engine, EngineSettings, EventOutcome, MovedThread, OpenedChannel,
    PullRequestEvent, ReconcileError, SweepPlan, SweepReport,
};
pub use recording::{
    CorrelationId, Direction, EventType, RecordedEvent, RecordingLogger, RecordingMiddleware,
    Sanitizer, ServiceType, CORRELATION_ID_HEADER,
};
pub use slack::{create_slack_client, is_slack_error, SlackApiError, SlackClient};
pub use snapshot::{OpenSet, PullRequestSnapshot};
