//! The two external systems, as seen by the engine.
//!
//! Both traits are implemented by the REST clients in [`crate::slack`] and
//! [`crate::github`], and by in-memory fakes in tests.

use anyhow::Result;
use async_trait::async_trait;

use crate::model::{
    Channel, HistoryMessage, IssueComment, Page, PostedMessage, PullRequest, ReviewComment,
};
use crate::relay::OutboundMessage;

/// The messaging workspace.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// One page of the channel listing, archived channels included.
    async fn list_channels_page(&self, cursor: Option<&str>) -> Result<Page<Channel>>;

    async fn create_channel(&self, name: &str) -> Result<Channel>;

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<()>;

    async fn post_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<PostedMessage>;

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &OutboundMessage,
    ) -> Result<()>;

    /// Most recent `limit` messages, newest first.
    async fn history(&self, channel_id: &str, limit: u32) -> Result<Vec<HistoryMessage>>;

    async fn members_page(&self, channel_id: &str, cursor: Option<&str>) -> Result<Page<String>>;

    /// Users already in the channel are not an error.
    async fn invite(&self, channel_id: &str, user_ids: &[String]) -> Result<()>;

    /// Archiving an archived channel is not an error.
    async fn archive(&self, channel_id: &str) -> Result<()>;

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String>;
}

/// The code-hosting side, already bound to one repository.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn open_pull_requests(&self) -> Result<Vec<PullRequest>>;

    /// `None` when the repository has no such pull request.
    async fn pull_request(&self, number: u64) -> Result<Option<PullRequest>>;

    async fn review_comments(&self, number: u64) -> Result<Vec<ReviewComment>>;

    /// The comment carrying the channel link, if this app has written one.
    async fn find_link_comment(&self, number: u64) -> Result<Option<IssueComment>>;

    async fn create_issue_comment(&self, number: u64, body: &str) -> Result<u64>;

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()>;

    async fn reply_to_review_comment(
        &self,
        number: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()>;
}

/// Collect every page of a cursor-paginated listing. Any page failure fails
/// the whole listing.
pub async fn collect_pages<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: std::future::Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = fetch(cursor.take()).await?;
        items.extend(page.items);
        match page.next_cursor.filter(|c| !c.is_empty()) {
            Some(next) => cursor = Some(next),
            None => return Ok(items),
        }
    }
}

/// All members of a channel.
pub async fn channel_members(chat: &dyn ChatPlatform, channel_id: &str) -> Result<Vec<String>> {
    collect_pages(|cursor| async move { chat.members_page(channel_id, cursor.as_deref()).await })
        .await
}
