//! Pull Request Snapshot: what the code host currently says about one PR or
//! about every open PR.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use tracing::info;

use crate::model::{PullRequest, ReviewComment};
use crate::platform::CodeHost;
use crate::relay::thread_window;

/// Open PRs keyed by number.
#[derive(Debug, Clone, Default)]
pub struct OpenSet {
    by_number: BTreeMap<u64, PullRequest>,
}

impl OpenSet {
    pub fn new(prs: impl IntoIterator<Item = PullRequest>) -> Self {
        Self {
            by_number: prs
                .into_iter()
                .filter(PullRequest::is_open)
                .map(|pr| (pr.number, pr))
                .collect(),
        }
    }

    pub fn contains(&self, number: u64) -> bool {
        self.by_number.contains_key(&number)
    }

    pub fn get(&self, number: u64) -> Option<&PullRequest> {
        self.by_number.get(&number)
    }

    /// Ascending by number.
    pub fn iter(&self) -> impl Iterator<Item = &PullRequest> {
        self.by_number.values()
    }

    pub fn len(&self) -> usize {
        self.by_number.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_number.is_empty()
    }
}

pub struct PullRequestSnapshot<'a> {
    host: &'a dyn CodeHost,
}

impl<'a> PullRequestSnapshot<'a> {
    pub fn new(host: &'a dyn CodeHost) -> Self {
        Self { host }
    }

    pub async fn open_set(&self) -> Result<OpenSet> {
        let prs = self
            .host
            .open_pull_requests()
            .await
            .context("Failed to list open pull requests")?;
        let open = OpenSet::new(prs);
        info!("Snapshot has {} open PRs", open.len());
        Ok(open)
    }

    pub async fn pull_request(&self, number: u64) -> Result<Option<PullRequest>> {
        self.host
            .pull_request(number)
            .await
            .with_context(|| format!("Failed to fetch PR #{}", number))
    }

    /// The thread `trigger` belongs to, oldest first, bounded to the relay
    /// window. `trigger` is included even if the listing does not show it
    /// yet.
    pub async fn review_thread(
        &self,
        number: u64,
        trigger: &ReviewComment,
    ) -> Result<Vec<ReviewComment>> {
        let mut comments = self
            .host
            .review_comments(number)
            .await
            .with_context(|| format!("Failed to fetch review comments for PR #{}", number))?;
        if !comments.iter().any(|c| c.id == trigger.id) {
            comments.push(trigger.clone());
        }
        Ok(thread_window(&comments, trigger.thread_anchor())
            .into_iter()
            .cloned()
            .collect())
    }
}
