//! Domain types shared by the directory, snapshot and reconciliation code.
//!
//! These are our own types, not the wire formats of either API. The GitHub
//! and Slack clients convert their responses into them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The one repository this deployment serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub owner: String,
    pub name: String,
}

impl Repository {
    pub fn new(owner: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn pull_request_url(&self, number: u64) -> String {
        format!("https://github.com/{}/pull/{}", self.full_name(), number)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullRequestState {
    Open,
    Closed,
}

impl PullRequestState {
    /// GitHub reports merged PRs as `closed` too, so anything that is not
    /// `open` counts as closed.
    pub fn from_github(state: &str) -> Self {
        if state.eq_ignore_ascii_case("open") {
            Self::Open
        } else {
            Self::Closed
        }
    }
}

impl fmt::Display for PullRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Read-only view of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub state: PullRequestState,
    pub author: String,
    /// Requested reviewer logins in the order GitHub returns them, deduplicated.
    pub requested_reviewers: Vec<String>,
    pub html_url: String,
}

impl PullRequest {
    pub fn is_open(&self) -> bool {
        self.state == PullRequestState::Open
    }

    /// Body with surrounding whitespace removed, `None` when effectively empty.
    pub fn body_text(&self) -> Option<&str> {
        self.body
            .as_deref()
            .map(str::trim)
            .filter(|body| !body.is_empty())
    }

    /// Author first, then reviewers, without duplicates.
    pub fn participants(&self) -> Vec<&str> {
        let mut logins: Vec<&str> = Vec::with_capacity(self.requested_reviewers.len() + 1);
        for login in std::iter::once(self.author.as_str())
            .chain(self.requested_reviewers.iter().map(String::as_str))
        {
            if !logins.contains(&login) {
                logins.push(login);
            }
        }
        logins
    }
}

/// A review comment (a comment on the diff) on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: u64,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// Set on replies; points at the top-level comment of the thread.
    pub in_reply_to_id: Option<u64>,
    pub html_url: Option<String>,
}

impl ReviewComment {
    /// Id of the top-level comment of the thread this comment belongs to.
    pub fn thread_anchor(&self) -> u64 {
        self.in_reply_to_id.unwrap_or(self.id)
    }
}

/// A conversation (issue) comment on a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueComment {
    pub id: u64,
    pub author: String,
    pub body: String,
}

/// Submitted review verdicts. Only approvals produce a notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewVerdict {
    Approved,
    ChangesRequested,
    Commented,
    Other(String),
}

impl ReviewVerdict {
    pub fn from_github(state: &str) -> Self {
        match state.to_ascii_lowercase().as_str() {
            "approved" => Self::Approved,
            "changes_requested" => Self::ChangesRequested,
            "commented" => Self::Commented,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A Slack channel as seen in `conversations.list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub is_archived: bool,
    pub topic: String,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// `None` (or an empty cursor, normalised to `None`) ends the listing.
    pub next_cursor: Option<String>,
}

/// A message from channel history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    pub user: Option<String>,
    pub text: String,
    /// Set by Slack on system events such as `channel_join`.
    #[serde(default)]
    pub subtype: Option<String>,
}

impl HistoryMessage {
    /// Whether this is something a user or bot posted, as opposed to a
    /// membership or channel-settings event Slack wrote on their behalf.
    pub fn is_posted(&self) -> bool {
        matches!(self.subtype.as_deref(), None | Some("bot_message"))
    }
}

/// A message we posted, addressed by channel and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// Slack timestamps are `"<seconds>.<micros>"`; compare them numerically.
pub fn parse_slack_ts(ts: &str) -> Option<(u64, u64)> {
    let (seconds, fraction) = ts.split_once('.').unwrap_or((ts, "0"));
    Some((seconds.parse().ok()?, fraction.parse().ok()?))
}
