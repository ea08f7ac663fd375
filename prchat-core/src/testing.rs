//! In-memory stand-ins for Slack and GitHub that record every write.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::channel_name::ChannelNamer;
use crate::identity::IdentityMap;
use crate::model::{
    Channel, HistoryMessage, IssueComment, Page, PostedMessage, PullRequest, PullRequestState,
    ReviewComment,
};
use crate::platform::{ChatPlatform, CodeHost};
use crate::reconcile::{Engine, EngineSettings, DEFAULT_MOVE_TO_CHAT_PHRASE};
use crate::relay::{is_link_comment, OutboundMessage};
use crate::slack::SlackApiError;

pub const BOT_USER: &str = "UBOT";
pub const BOT_LOGIN: &str = "prchat[bot]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatWrite {
    Create { name: String },
    SetTopic { channel: String, topic: String },
    Post { channel: String, text: String },
    Update { channel: String, ts: String, text: String },
    Invite { channel: String, users: Vec<String> },
    Archive { channel: String },
}

#[derive(Default)]
struct ChatState {
    channels: Vec<Channel>,
    /// Exist in Slack but missing from the listing until a create collides.
    unlisted: Vec<Channel>,
    members: HashMap<String, BTreeSet<String>>,
    /// Oldest first.
    messages: HashMap<String, Vec<HistoryMessage>>,
    writes: Vec<ChatWrite>,
    failing: HashSet<&'static str>,
    failing_names: HashSet<String>,
    next_id: u64,
    next_ts: u64,
}

impl ChatState {
    fn push_message(
        &mut self,
        channel_id: &str,
        user: &str,
        text: &str,
        subtype: Option<&str>,
    ) -> String {
        self.next_ts += 1;
        let ts = format!("1700000000.{:06}", self.next_ts);
        self.messages
            .entry(channel_id.to_string())
            .or_default()
            .push(HistoryMessage {
                ts: ts.clone(),
                user: Some(user.to_string()),
                text: text.to_string(),
                subtype: subtype.map(str::to_string),
            });
        ts
    }

    fn push_join(&mut self, channel_id: &str, user: &str) -> String {
        let text = format!("<@{}> has joined the channel", user);
        self.push_message(channel_id, user, &text, Some("channel_join"))
    }
}

pub struct FakeChat {
    state: Mutex<ChatState>,
    page_size: usize,
}

fn slack_error(method: &'static str, code: &str) -> anyhow::Error {
    SlackApiError {
        method,
        code: code.to_string(),
    }
    .into()
}

impl FakeChat {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ChatState::default()),
            page_size: 2,
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ChatState> {
        self.state.lock().unwrap()
    }

    pub fn add_channel(&self, name: &str, archived: bool) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("C{:04}", state.next_id);
        state.channels.push(Channel {
            id: id.clone(),
            name: name.to_string(),
            is_archived: archived,
            topic: String::new(),
        });
        id
    }

    /// A channel that a concurrent handler created after our listing.
    pub fn add_unlisted_channel(&self, name: &str) -> String {
        let mut state = self.state();
        state.next_id += 1;
        let id = format!("C{:04}", state.next_id);
        state.unlisted.push(Channel {
            id: id.clone(),
            name: name.to_string(),
            is_archived: false,
            topic: String::new(),
        });
        id
    }

    pub fn add_member(&self, channel_id: &str, user: &str) {
        self.state()
            .members
            .entry(channel_id.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn add_message(&self, channel_id: &str, user: &str, text: &str) -> String {
        self.state().push_message(channel_id, user, text, None)
    }

    /// The `channel_join` event Slack writes when `user` joins.
    pub fn add_join_message(&self, channel_id: &str, user: &str) -> String {
        self.state().push_join(channel_id, user)
    }

    pub fn fail(&self, method: &'static str) {
        self.state().failing.insert(method);
    }

    /// Make creating this one channel fail.
    pub fn fail_create(&self, name: &str) {
        self.state().failing_names.insert(name.to_string());
    }

    pub fn channel(&self, name: &str) -> Option<Channel> {
        self.state()
            .channels
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    pub fn channels(&self) -> Vec<Channel> {
        self.state().channels.clone()
    }

    pub fn members(&self, channel_id: &str) -> BTreeSet<String> {
        self.state()
            .members
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Posted messages, oldest first, without Slack's system events.
    pub fn messages(&self, channel_id: &str) -> Vec<HistoryMessage> {
        self.history_of(channel_id)
            .into_iter()
            .filter(HistoryMessage::is_posted)
            .collect()
    }

    fn history_of(&self, channel_id: &str) -> Vec<HistoryMessage> {
        self.state()
            .messages
            .get(channel_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<ChatWrite> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }

    fn check(&self, method: &'static str) -> Result<()> {
        if self.state().failing.contains(method) {
            Err(slack_error(method, "fatal_error"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChatPlatform for FakeChat {
    async fn list_channels_page(&self, cursor: Option<&str>) -> Result<Page<Channel>> {
        self.check("conversations.list")?;
        let start: usize = match cursor {
            Some(c) => c.parse()?,
            None => 0,
        };
        let state = self.state();
        let end = (start + self.page_size).min(state.channels.len());
        Ok(Page {
            items: state.channels[start..end].to_vec(),
            next_cursor: (end < state.channels.len()).then(|| end.to_string()),
        })
    }

    async fn create_channel(&self, name: &str) -> Result<Channel> {
        self.check("conversations.create")?;
        let mut state = self.state();
        state.writes.push(ChatWrite::Create {
            name: name.to_string(),
        });
        if state.failing_names.contains(name) {
            return Err(slack_error("conversations.create", "restricted_action"));
        }
        if let Some(pos) = state.unlisted.iter().position(|c| c.name == name) {
            let channel = state.unlisted.remove(pos);
            state.channels.push(channel);
            return Err(slack_error("conversations.create", "name_taken"));
        }
        if state.channels.iter().any(|c| c.name == name) {
            return Err(slack_error("conversations.create", "name_taken"));
        }
        state.next_id += 1;
        let channel = Channel {
            id: format!("C{:04}", state.next_id),
            name: name.to_string(),
            is_archived: false,
            topic: String::new(),
        };
        state.channels.push(channel.clone());
        state
            .members
            .entry(channel.id.clone())
            .or_default()
            .insert(BOT_USER.to_string());
        state.push_join(&channel.id, BOT_USER);
        Ok(channel)
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<()> {
        self.check("conversations.setTopic")?;
        let mut state = self.state();
        state.writes.push(ChatWrite::SetTopic {
            channel: channel_id.to_string(),
            topic: topic.to_string(),
        });
        let channel = state
            .channels
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| slack_error("conversations.setTopic", "channel_not_found"))?;
        channel.topic = topic.to_string();
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<PostedMessage> {
        self.check("chat.postMessage")?;
        self.state().writes.push(ChatWrite::Post {
            channel: channel_id.to_string(),
            text: message.text.clone(),
        });
        let ts = self.add_message(channel_id, BOT_USER, &message.text);
        Ok(PostedMessage {
            channel: channel_id.to_string(),
            ts,
        })
    }

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &OutboundMessage,
    ) -> Result<()> {
        self.check("chat.update")?;
        let mut state = self.state();
        state.writes.push(ChatWrite::Update {
            channel: channel_id.to_string(),
            ts: ts.to_string(),
            text: message.text.clone(),
        });
        let stored = state
            .messages
            .get_mut(channel_id)
            .and_then(|messages| messages.iter_mut().find(|m| m.ts == ts))
            .ok_or_else(|| slack_error("chat.update", "message_not_found"))?;
        stored.text = message.text.clone();
        Ok(())
    }

    async fn history(&self, channel_id: &str, limit: u32) -> Result<Vec<HistoryMessage>> {
        self.check("conversations.history")?;
        Ok(self
            .history_of(channel_id)
            .into_iter()
            .rev()
            .take(limit as usize)
            .collect())
    }

    async fn members_page(&self, channel_id: &str, cursor: Option<&str>) -> Result<Page<String>> {
        self.check("conversations.members")?;
        assert!(cursor.is_none(), "fake returns a single members page");
        Ok(Page {
            items: self.members(channel_id).into_iter().collect(),
            next_cursor: None,
        })
    }

    async fn invite(&self, channel_id: &str, user_ids: &[String]) -> Result<()> {
        self.check("conversations.invite")?;
        let mut state = self.state();
        state.writes.push(ChatWrite::Invite {
            channel: channel_id.to_string(),
            users: user_ids.to_vec(),
        });
        let members = state.members.entry(channel_id.to_string()).or_default();
        for user in user_ids {
            members.insert(user.clone());
        }
        Ok(())
    }

    async fn archive(&self, channel_id: &str) -> Result<()> {
        self.check("conversations.archive")?;
        let mut state = self.state();
        state.writes.push(ChatWrite::Archive {
            channel: channel_id.to_string(),
        });
        if let Some(channel) = state.channels.iter_mut().find(|c| c.id == channel_id) {
            channel.is_archived = true;
        }
        Ok(())
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String> {
        self.check("chat.getPermalink")?;
        Ok(format!(
            "https://acme.slack.com/archives/{}/p{}",
            channel_id,
            ts.replace('.', "")
        ))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostWrite {
    CreateComment { pr: u64, body: String },
    UpdateComment { id: u64, body: String },
    Reply { pr: u64, comment_id: u64, body: String },
}

#[derive(Default)]
struct HostState {
    prs: BTreeMap<u64, PullRequest>,
    review_comments: HashMap<u64, Vec<ReviewComment>>,
    issue_comments: HashMap<u64, Vec<IssueComment>>,
    writes: Vec<HostWrite>,
    next_comment_id: u64,
    fail_listing: bool,
}

pub struct FakeCodeHost {
    state: Mutex<HostState>,
}

impl FakeCodeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(HostState {
                next_comment_id: 1000,
                ..HostState::default()
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, HostState> {
        self.state.lock().unwrap()
    }

    pub fn add_pr(&self, pr: PullRequest) {
        self.state().prs.insert(pr.number, pr);
    }

    pub fn add_review_comment(&self, pr: u64, comment: ReviewComment) {
        self.state()
            .review_comments
            .entry(pr)
            .or_default()
            .push(comment);
    }

    pub fn add_issue_comment(&self, pr: u64, author: &str, body: &str) -> u64 {
        let mut state = self.state();
        state.next_comment_id += 1;
        let id = state.next_comment_id;
        state
            .issue_comments
            .entry(pr)
            .or_default()
            .push(IssueComment {
                id,
                author: author.to_string(),
                body: body.to_string(),
            });
        id
    }

    pub fn fail_listing(&self) {
        self.state().fail_listing = true;
    }

    pub fn issue_comments(&self, pr: u64) -> Vec<IssueComment> {
        self.state()
            .issue_comments
            .get(&pr)
            .cloned()
            .unwrap_or_default()
    }

    pub fn writes(&self) -> Vec<HostWrite> {
        self.state().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.state().writes.clear();
    }
}

#[async_trait]
impl CodeHost for FakeCodeHost {
    async fn open_pull_requests(&self) -> Result<Vec<PullRequest>> {
        let state = self.state();
        if state.fail_listing {
            return Err(anyhow!("GitHub API error listing open pull requests: 502"));
        }
        Ok(state.prs.values().filter(|p| p.is_open()).cloned().collect())
    }

    async fn pull_request(&self, number: u64) -> Result<Option<PullRequest>> {
        Ok(self.state().prs.get(&number).cloned())
    }

    async fn review_comments(&self, number: u64) -> Result<Vec<ReviewComment>> {
        Ok(self
            .state()
            .review_comments
            .get(&number)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_link_comment(&self, number: u64) -> Result<Option<IssueComment>> {
        Ok(self
            .issue_comments(number)
            .into_iter()
            .find(|c| c.author == BOT_LOGIN && is_link_comment(&c.body)))
    }

    async fn create_issue_comment(&self, number: u64, body: &str) -> Result<u64> {
        let id = self.add_issue_comment(number, BOT_LOGIN, body);
        self.state().writes.push(HostWrite::CreateComment {
            pr: number,
            body: body.to_string(),
        });
        Ok(id)
    }

    async fn update_issue_comment(&self, comment_id: u64, body: &str) -> Result<()> {
        let mut state = self.state();
        state.writes.push(HostWrite::UpdateComment {
            id: comment_id,
            body: body.to_string(),
        });
        let comment = state
            .issue_comments
            .values_mut()
            .flatten()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| anyhow!("comment {} not found", comment_id))?;
        comment.body = body.to_string();
        Ok(())
    }

    async fn reply_to_review_comment(
        &self,
        number: u64,
        comment_id: u64,
        body: &str,
    ) -> Result<()> {
        self.state().writes.push(HostWrite::Reply {
            pr: number,
            comment_id,
            body: body.to_string(),
        });
        Ok(())
    }
}

pub fn pull_request(number: u64, body: Option<&str>, reviewers: &[&str]) -> PullRequest {
    PullRequest {
        number,
        title: format!("Change number {}", number),
        body: body.map(str::to_string),
        state: PullRequestState::Open,
        author: "carol".to_string(),
        requested_reviewers: reviewers.iter().map(|r| r.to_string()).collect(),
        html_url: format!("https://github.com/acme/widgets/pull/{}", number),
    }
}

pub fn identities() -> IdentityMap {
    IdentityMap::new([
        ("alice".to_string(), "U123".to_string()),
        ("bob".to_string(), "U456".to_string()),
        ("carol".to_string(), "U777".to_string()),
    ])
}

pub fn settings() -> EngineSettings {
    EngineSettings {
        namer: ChannelNamer::unqualified(),
        identities: Arc::new(identities()),
        bot_user_id: BOT_USER.to_string(),
        bot_login: BOT_LOGIN.to_string(),
        team_id: None,
        move_to_chat_phrase: DEFAULT_MOVE_TO_CHAT_PHRASE.to_string(),
    }
}

pub fn engine(chat: &Arc<FakeChat>, host: &Arc<FakeCodeHost>) -> Engine {
    Engine::new(chat.clone(), host.clone(), settings())
}
