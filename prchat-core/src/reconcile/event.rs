use crate::model::{ReviewComment, ReviewVerdict};

/// One PR transition, as delivered by the code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullRequestEvent {
    Opened,
    Reopened,
    Edited,
    Synchronize,
    ReadyForReview,
    ReviewRequested,
    ReviewRequestRemoved,
    Closed,
    ReviewSubmitted {
        reviewer: String,
        verdict: ReviewVerdict,
    },
    ReviewCommentCreated {
        comment: ReviewComment,
    },
    /// Actions with no channel consequence.
    Other(String),
}

impl PullRequestEvent {
    /// Map a `pull_request` webhook action.
    pub fn from_pull_request_action(action: &str) -> Self {
        match action {
            "opened" => Self::Opened,
            "reopened" => Self::Reopened,
            "edited" => Self::Edited,
            "synchronize" => Self::Synchronize,
            "ready_for_review" => Self::ReadyForReview,
            "review_requested" => Self::ReviewRequested,
            "review_request_removed" => Self::ReviewRequestRemoved,
            "closed" => Self::Closed,
            other => Self::Other(other.to_string()),
        }
    }

    /// Events that converge the PR's channel fully, creating it if needed.
    pub fn converges(&self) -> bool {
        matches!(
            self,
            Self::Opened
                | Self::Reopened
                | Self::Edited
                | Self::Synchronize
                | Self::ReadyForReview
                | Self::ReviewRequested
                | Self::ReviewRequestRemoved
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pull_request_actions() {
        assert_eq!(
            PullRequestEvent::from_pull_request_action("closed"),
            PullRequestEvent::Closed
        );
        assert!(PullRequestEvent::from_pull_request_action("review_requested").converges());
        assert!(!PullRequestEvent::Closed.converges());
        assert_eq!(
            PullRequestEvent::from_pull_request_action("labeled"),
            PullRequestEvent::Other("labeled".to_string())
        );
    }
}
