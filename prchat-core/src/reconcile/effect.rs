//! Writes as data.
//!
//! The planner turns observed state into a list of effects for one PR; the
//! interpreter performs them. Every effect targets the PR's one channel,
//! which the interpreter resolves (or creates) as it goes.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Effect {
    /// Create the channel, post the managed first message when there is
    /// one, then set the topic. Later effects run against the new channel.
    CreateChannel {
        name: String,
        topic: String,
        first_message: Option<String>,
    },

    SetTopic { topic: String },

    InviteUsers { user_ids: Vec<String> },

    UpdateManagedMessage { ts: String, text: String },

    /// Write the channel link to the PR, in place when a link comment
    /// already exists.
    UpsertLinkComment { existing_comment_id: Option<u64> },

    ArchiveChannel,

    PostNotice { text: String },

    /// Nothing to write; surface the anomaly.
    Report { anomaly: Anomaly },
}

impl Effect {
    pub fn is_write(&self) -> bool {
        !matches!(self, Effect::Report { .. })
    }
}

/// State the engine refuses to repair automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Anomaly {
    /// The PR has a body but the channel has no managed message to update.
    ManagedMessageMissing { pr_number: u64, channel: String },

    /// The PR is open but its channel name belongs to an archived channel.
    ArchivedChannel { pr_number: u64, channel: String },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::ManagedMessageMissing { pr_number, channel } => write!(
                f,
                "PR #{}: no managed message found in #{}",
                pr_number, channel
            ),
            Anomaly::ArchivedChannel { pr_number, channel } => write!(
                f,
                "PR #{} is open but #{} is archived",
                pr_number, channel
            ),
        }
    }
}
