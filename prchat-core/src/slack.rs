//! Slack Web API client, authenticated with the bot token.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error, info};

use crate::model::{Channel, HistoryMessage, Page, PostedMessage};
use crate::platform::{collect_pages, ChatPlatform};
use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType};
use crate::relay::OutboundMessage;

pub const SLACK_API_BASE: &str = "https://slack.com/api";

const PAGE_LIMIT: u32 = 200;

/// A Slack method that answered `ok: false`.
#[derive(Debug, thiserror::Error)]
#[error("slack {method} failed: {code}")]
pub struct SlackApiError {
    pub method: &'static str,
    pub code: String,
}

/// Whether `err` (or anything it wraps) is a Slack error with this code.
pub fn is_slack_error(err: &anyhow::Error, code: &str) -> bool {
    err.downcast_ref::<SlackApiError>()
        .is_some_and(|slack| slack.code == code)
}

#[derive(Clone)]
pub struct SlackClient {
    client: ClientWithMiddleware,
    api_base: String,
    bot_token: String,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelResponse {
    id: String,
    name: String,
    #[serde(default)]
    is_archived: bool,
    #[serde(default)]
    topic: Option<TopicResponse>,
}

#[derive(Debug, Deserialize)]
struct TopicResponse {
    #[serde(default)]
    value: String,
}

impl From<ChannelResponse> for Channel {
    fn from(channel: ChannelResponse) -> Self {
        Channel {
            id: channel.id,
            name: channel.name,
            is_archived: channel.is_archived,
            topic: channel.topic.map(|t| t.value).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConversationsListResponse {
    #[serde(default)]
    channels: Vec<ChannelResponse>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ConversationsCreateResponse {
    channel: ChannelResponse,
}

#[derive(Debug, Deserialize)]
struct ConversationsHistoryResponse {
    #[serde(default)]
    messages: Vec<HistoryMessageResponse>,
}

#[derive(Debug, Deserialize)]
struct HistoryMessageResponse {
    ts: String,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    text: String,
    #[serde(default)]
    subtype: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConversationsMembersResponse {
    #[serde(default)]
    members: Vec<String>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    channel: String,
    ts: String,
}

#[derive(Debug, Deserialize)]
struct PermalinkResponse {
    permalink: String,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UsersListResponse {
    #[serde(default)]
    members: Vec<UserResponse>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(default)]
    profile: Option<UserProfileResponse>,
}

#[derive(Debug, Deserialize)]
struct UserProfileResponse {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Empty {}

fn next_cursor(metadata: Option<ResponseMetadata>) -> Option<String> {
    metadata
        .and_then(|m| m.next_cursor)
        .filter(|cursor| !cursor.is_empty())
}

impl SlackClient {
    pub fn new(bot_token: String) -> Result<Self> {
        Self::new_with_recording(SLACK_API_BASE.to_string(), bot_token, None)
    }

    pub fn new_with_recording(
        api_base: String,
        bot_token: String,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        let client = create_slack_client(recording_logger)?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.trim().to_string(),
        })
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.api_base, method)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &'static str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let request = self.client.get(self.url(method)).query(query);
        self.send(method, request).await
    }

    async fn post<T: DeserializeOwned>(&self, method: &'static str, body: Value) -> Result<T> {
        let request = self
            .client
            .post(self.url(method))
            .header("Content-Type", "application/json; charset=utf-8")
            .body(serde_json::to_string(&body)?);
        self.send(method, request).await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        method: &'static str,
        request: RequestBuilder,
    ) -> Result<T> {
        let response = request
            .header("Authorization", format!("Bearer {}", self.bot_token))
            .send()
            .await
            .with_context(|| format!("Failed to send slack {} request", method))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Slack API error on {}: {} - {}", method, status, error_text);
            return Err(anyhow!(
                "slack {} failed with HTTP {}: {}",
                method,
                status,
                error_text
            ));
        }

        let body: Value = response
            .json()
            .await
            .with_context(|| format!("Failed to parse slack {} response", method))?;

        if !body.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            let code = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error")
                .to_string();
            return Err(SlackApiError { method, code }.into());
        }

        serde_json::from_value(body)
            .with_context(|| format!("Unexpected slack {} response shape", method))
    }

    /// The bot's own user id, used to recognise its messages in history.
    pub async fn auth_test(&self) -> Result<String> {
        let response: AuthTestResponse = self.post("auth.test", json!({})).await?;
        response
            .user_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| anyhow!("slack auth.test did not return user_id"))
    }

    /// One page of `users.list` as (email, user id) pairs. Deleted users and
    /// users without a visible email are left out.
    pub async fn users_page(&self, cursor: Option<&str>) -> Result<Page<(String, String)>> {
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let response: UsersListResponse = self.get("users.list", &query).await?;
        let items = response
            .members
            .into_iter()
            .filter(|user| !user.deleted)
            .filter_map(|user| {
                let email = user.profile?.email?;
                Some((email, user.id))
            })
            .collect();
        Ok(Page {
            items,
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    /// email → user id for the whole workspace.
    pub async fn user_ids_by_email(&self) -> Result<HashMap<String, String>> {
        let users =
            collect_pages(|cursor| async move { self.users_page(cursor.as_deref()).await })
                .await?;
        Ok(users.into_iter().collect())
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn list_channels_page(&self, cursor: Option<&str>) -> Result<Page<Channel>> {
        let mut query = vec![
            ("limit", PAGE_LIMIT.to_string()),
            ("exclude_archived", "false".to_string()),
            ("types", "public_channel".to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let response: ConversationsListResponse = self.get("conversations.list", &query).await?;
        Ok(Page {
            items: response.channels.into_iter().map(Channel::from).collect(),
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn create_channel(&self, name: &str) -> Result<Channel> {
        let response: ConversationsCreateResponse = self
            .post("conversations.create", json!({ "name": name }))
            .await?;
        info!("Created channel #{} ({})", name, response.channel.id);
        Ok(response.channel.into())
    }

    async fn set_topic(&self, channel_id: &str, topic: &str) -> Result<()> {
        let _: Empty = self
            .post(
                "conversations.setTopic",
                json!({ "channel": channel_id, "topic": topic }),
            )
            .await?;
        Ok(())
    }

    async fn post_message(
        &self,
        channel_id: &str,
        message: &OutboundMessage,
    ) -> Result<PostedMessage> {
        let mut payload = json!({
            "channel": channel_id,
            "text": message.text,
            "unfurl_links": false,
        });
        if !message.blocks.is_empty() {
            payload["blocks"] = serde_json::to_value(&message.blocks)?;
        }
        let response: PostMessageResponse = self.post("chat.postMessage", payload).await?;
        Ok(PostedMessage {
            channel: response.channel,
            ts: response.ts,
        })
    }

    async fn update_message(
        &self,
        channel_id: &str,
        ts: &str,
        message: &OutboundMessage,
    ) -> Result<()> {
        let mut payload = json!({
            "channel": channel_id,
            "ts": ts,
            "text": message.text,
        });
        if !message.blocks.is_empty() {
            payload["blocks"] = serde_json::to_value(&message.blocks)?;
        }
        let _: Empty = self.post("chat.update", payload).await?;
        Ok(())
    }

    async fn history(&self, channel_id: &str, limit: u32) -> Result<Vec<HistoryMessage>> {
        let response: ConversationsHistoryResponse = self
            .get(
                "conversations.history",
                &[
                    ("channel", channel_id.to_string()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;
        Ok(response
            .messages
            .into_iter()
            .map(|m| HistoryMessage {
                ts: m.ts,
                user: m.user,
                text: m.text,
                subtype: m.subtype,
            })
            .collect())
    }

    async fn members_page(&self, channel_id: &str, cursor: Option<&str>) -> Result<Page<String>> {
        let mut query = vec![
            ("channel", channel_id.to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let response: ConversationsMembersResponse =
            self.get("conversations.members", &query).await?;
        Ok(Page {
            items: response.members,
            next_cursor: next_cursor(response.response_metadata),
        })
    }

    async fn invite(&self, channel_id: &str, user_ids: &[String]) -> Result<()> {
        if user_ids.is_empty() {
            return Ok(());
        }
        let result: Result<Empty> = self
            .post(
                "conversations.invite",
                json!({
                    "channel": channel_id,
                    "users": user_ids.join(","),
                    "force": true,
                }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_slack_error(&e, "already_in_channel") => {
                debug!("Users {:?} already in {}", user_ids, channel_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn archive(&self, channel_id: &str) -> Result<()> {
        let result: Result<Empty> = self
            .post("conversations.archive", json!({ "channel": channel_id }))
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if is_slack_error(&e, "already_archived") => {
                debug!("Channel {} was already archived", channel_id);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn permalink(&self, channel_id: &str, ts: &str) -> Result<String> {
        let response: PermalinkResponse = self
            .get(
                "chat.getPermalink",
                &[
                    ("channel", channel_id.to_string()),
                    ("message_ts", ts.to_string()),
                ],
            )
            .await?;
        Ok(response.permalink)
    }
}

pub fn create_slack_client(
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    use reqwest_middleware::ClientBuilder;

    let client = Client::builder()
        .user_agent(concat!("prchat/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create Slack HTTP client")?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger, ServiceType::Slack));
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::ChannelDirectory;
    use crate::relay::Block;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> SlackClient {
        SlackClient::new_with_recording(server.base_url(), "xoxb-test".to_string(), None).unwrap()
    }

    #[tokio::test]
    async fn test_channel_listing_follows_cursors() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.list")
                .header("authorization", "Bearer xoxb-test")
                .query_param_missing("cursor");
            then.status(200).json_body(json!({
                "ok": true,
                "channels": [
                    {"id": "C1", "name": "pr-1", "is_archived": false, "topic": {"value": "One"}},
                    {"id": "C2", "name": "general", "is_archived": false}
                ],
                "response_metadata": {"next_cursor": "page2"}
            }));
        });
        let second = server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.list")
                .query_param("cursor", "page2");
            then.status(200).json_body(json!({
                "ok": true,
                "channels": [{"id": "C3", "name": "pr-2", "is_archived": true}],
                "response_metadata": {"next_cursor": ""}
            }));
        });

        let slack = client(&server);
        let channels = ChannelDirectory::new(&slack).list_channels().await.unwrap();

        let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["pr-1", "general", "pr-2"]);
        assert_eq!(channels[0].topic, "One");
        assert!(channels[2].is_archived);
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_page_fails_whole_listing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.list")
                .query_param_missing("cursor");
            then.status(200).json_body(json!({
                "ok": true,
                "channels": [{"id": "C1", "name": "pr-1"}],
                "response_metadata": {"next_cursor": "page2"}
            }));
        });
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.list")
                .query_param("cursor", "page2");
            then.status(200)
                .json_body(json!({"ok": false, "error": "ratelimited"}));
        });

        let slack = client(&server);
        let err = ChannelDirectory::new(&slack)
            .list_channels()
            .await
            .unwrap_err();
        assert!(is_slack_error(&err, "ratelimited"));
    }

    #[tokio::test]
    async fn test_slack_error_codes_are_exposed() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/conversations.create")
                .json_body(json!({"name": "pr-42"}));
            then.status(200)
                .json_body(json!({"ok": false, "error": "name_taken"}));
        });

        let err = client(&server).create_channel("pr-42").await.unwrap_err();
        assert!(is_slack_error(&err, "name_taken"));
        assert!(!is_slack_error(&err, "already_archived"));
        assert_eq!(
            err.to_string(),
            "slack conversations.create failed: name_taken"
        );
    }

    #[tokio::test]
    async fn test_http_errors_are_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/conversations.setTopic");
            then.status(503).body("unavailable");
        });

        let err = client(&server).set_topic("C1", "t").await.unwrap_err();
        assert!(err.to_string().contains("503"));
    }

    #[tokio::test]
    async fn test_benign_invite_and_archive_errors_are_success() {
        let server = MockServer::start();
        let invite = server.mock(|when, then| {
            when.method(POST)
                .path("/conversations.invite")
                .json_body(json!({"channel": "C1", "users": "U1,U2", "force": true}));
            then.status(200)
                .json_body(json!({"ok": false, "error": "already_in_channel"}));
        });
        server.mock(|when, then| {
            when.method(POST).path("/conversations.archive");
            then.status(200)
                .json_body(json!({"ok": false, "error": "already_archived"}));
        });

        let slack = client(&server);
        slack
            .invite("C1", &["U1".to_string(), "U2".to_string()])
            .await
            .unwrap();
        slack.archive("C1").await.unwrap();
        assert_eq!(invite.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_invite_makes_no_request() {
        let server = MockServer::start();
        let invite = server.mock(|when, then| {
            when.method(POST).path("/conversations.invite");
            then.status(200).json_body(json!({"ok": true}));
        });

        client(&server).invite("C1", &[]).await.unwrap();
        assert_eq!(invite.calls(), 0);
    }

    #[tokio::test]
    async fn test_post_message_sends_blocks() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST)
                .path("/chat.postMessage")
                .body_includes("\"blocks\"")
                .body_includes("\"divider\"");
            then.status(200).json_body(json!({
                "ok": true,
                "channel": "C1",
                "ts": "1700000000.000100"
            }));
        });

        let message = OutboundMessage {
            text: "hello".to_string(),
            blocks: vec![Block::markdown("hello"), Block::Divider],
        };
        let posted = client(&server).post_message("C1", &message).await.unwrap();
        assert_eq!(posted.ts, "1700000000.000100");
    }

    #[tokio::test]
    async fn test_users_skip_deleted_and_emailless_accounts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/users.list");
            then.status(200).json_body(json!({
                "ok": true,
                "members": [
                    {"id": "U1", "profile": {"email": "alice@example.com"}},
                    {"id": "U2", "deleted": true, "profile": {"email": "gone@example.com"}},
                    {"id": "U3", "profile": {}}
                ]
            }));
        });

        let users = client(&server).user_ids_by_email().await.unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(
            users.get("alice@example.com").map(String::as_str),
            Some("U1")
        );
    }

    #[tokio::test]
    async fn test_history_keeps_message_subtypes() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/conversations.history")
                .query_param("channel", "C1")
                .query_param("limit", "200");
            then.status(200).json_body(json!({
                "ok": true,
                "messages": [
                    {"ts": "1700000001.000200", "user": "UBOT", "text": "PR Opened! <https://github.com/acme/widgets/pull/1|#1>"},
                    {"ts": "1700000000.000100", "user": "UBOT", "subtype": "channel_join", "text": "<@UBOT> has joined the channel"}
                ]
            }));
        });

        let history = client(&server).history("C1", 200).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].subtype.as_deref(), Some("channel_join"));
        assert!(!history[1].is_posted());

        let managed = crate::reconcile::find_managed_message(&history, "UBOT").unwrap();
        assert_eq!(managed.ts, "1700000001.000200");
    }

    #[tokio::test]
    async fn test_auth_test_returns_bot_user() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/auth.test");
            then.status(200)
                .json_body(json!({"ok": true, "user_id": "UBOT"}));
        });

        assert_eq!(client(&server).auth_test().await.unwrap(), "UBOT");
    }
}
