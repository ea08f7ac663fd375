//! Rendering of PR content for Slack and of channel links for GitHub.

use serde::Serialize;

use crate::identity::IdentityMap;
use crate::model::{PullRequest, ReviewComment};

/// Marker identifying the comment that carries the channel link.
pub const LINK_COMMENT_MARKER: &str = "<!-- prchat:channel-link -->";

/// How many thread comments a "move to chat" request carries over.
pub const MOVE_TO_CHAT_WINDOW: usize = 15;

/// Slack caps topics at 250 characters.
pub const MAX_TOPIC_CHARS: usize = 250;

/// Leading text of every managed first message.
pub const MANAGED_MESSAGE_PREFIX: &str = "PR Opened!";

/// Slack caps section text at 3000 characters.
const MAX_SECTION_CHARS: usize = 3000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: TextObject },
    Divider,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl Block {
    pub fn markdown(text: impl Into<String>) -> Self {
        Block::Section {
            text: TextObject {
                kind: "mrkdwn",
                text: truncate_chars(&text.into(), MAX_SECTION_CHARS),
            },
        }
    }
}

/// An outbound Slack message. `text` is always set and doubles as the
/// notification fallback when `blocks` are present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub text: String,
    pub blocks: Vec<Block>,
}

impl OutboundMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            blocks: Vec::new(),
        }
    }
}

/// Text of the managed first message for a PR.
pub fn pull_request_text(pr: &PullRequest) -> String {
    format!(
        "{} <{}|#{}>\n\nPR Title: `{}`\nPR Description:\n```\n{}\n```",
        MANAGED_MESSAGE_PREFIX,
        pr.html_url,
        pr.number,
        pr.title,
        pr.body_text().unwrap_or_default()
    )
}

/// Undo the entity escaping Slack applies to `&`, `<` and `>` in stored
/// message text.
pub fn slack_unescape(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

/// Whether message text read back from history is what we posted as
/// `expected`. Slack wraps bare URLs and email addresses it auto-links in
/// `<...>` markup and escapes `&`, `<` and `>`; both are undone first.
pub fn slack_text_matches(stored: &str, expected: &str) -> bool {
    slack_unescape(&strip_autolinks(stored)) == strip_autolinks(expected)
}

/// Replace `<url>` and `<url|label>` where the label just repeats the URL
/// with the plain text. Labelled links such as `<url|#42>` stay.
fn strip_autolinks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('<') {
        out.push_str(&rest[..start]);
        let after = &rest[start + 1..];
        match after.find(['<', '>']) {
            Some(end) if after[end..].starts_with('>') => {
                let inner = &after[..end];
                match autolink_text(inner) {
                    Some(plain) => out.push_str(plain),
                    None => {
                        out.push('<');
                        out.push_str(inner);
                        out.push('>');
                    }
                }
                rest = &after[end + 1..];
            }
            _ => {
                out.push('<');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn autolink_text(inner: &str) -> Option<&str> {
    let (target, label) = match inner.split_once('|') {
        Some((target, label)) => (target, Some(label)),
        None => (inner, None),
    };
    let is_link = ["http://", "https://", "mailto:"]
        .iter()
        .any(|scheme| target.starts_with(scheme))
        && !target.contains(char::is_whitespace);
    if !is_link {
        return None;
    }
    match label {
        None => Some(target),
        Some(label)
            if label == target
                || target.strip_prefix("mailto:") == Some(label)
                || target.strip_prefix("http://") == Some(label) =>
        {
            Some(label)
        }
        Some(_) => None,
    }
}

pub fn topic_for(pr: &PullRequest) -> String {
    truncate_chars(pr.title.trim(), MAX_TOPIC_CHARS)
}

pub fn approval_notice(reviewer: &str) -> String {
    format!(":white_check_mark: {} approved this PR!", reviewer)
}

/// Deep link that opens the channel in the Slack client.
pub fn channel_deep_link(channel_id: &str, team_id: Option<&str>) -> String {
    match team_id {
        Some(team) => format!(
            "https://slack.com/app_redirect?channel={}&team={}",
            channel_id, team
        ),
        None => format!("https://slack.com/app_redirect?channel={}", channel_id),
    }
}

pub fn link_comment_body(deep_link: &str) -> String {
    format!(
        "{}\n:speech_balloon: Discussion channel: {}",
        LINK_COMMENT_MARKER, deep_link
    )
}

pub fn is_link_comment(body: &str) -> bool {
    body.starts_with(LINK_COMMENT_MARKER)
}

pub fn thread_moved_reply(permalink: &str) -> String {
    format!(
        ":speech_balloon: This thread continues in Slack: {}",
        permalink
    )
}

/// Case-insensitive trigger match against the comment body.
pub fn mentions_trigger(body: &str, phrase: &str) -> bool {
    let phrase = phrase.trim();
    !phrase.is_empty() && body.to_lowercase().contains(&phrase.to_lowercase())
}

/// The comments of `anchor`'s thread, oldest first, limited to the most
/// recent [`MOVE_TO_CHAT_WINDOW`].
pub fn thread_window(comments: &[ReviewComment], anchor: u64) -> Vec<&ReviewComment> {
    let mut thread: Vec<&ReviewComment> = comments
        .iter()
        .filter(|comment| comment.thread_anchor() == anchor)
        .collect();
    thread.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
    let skip = thread.len().saturating_sub(MOVE_TO_CHAT_WINDOW);
    thread.split_off(skip)
}

/// One message carrying a review thread: a header, then one section per
/// comment separated by dividers.
pub fn thread_message(
    pr: &PullRequest,
    thread: &[&ReviewComment],
    identities: &IdentityMap,
) -> OutboundMessage {
    let header = format!(
        ":arrow_right: Review thread moved from <{}|#{}> ({} comment{})",
        pr.html_url,
        pr.number,
        thread.len(),
        if thread.len() == 1 { "" } else { "s" }
    );

    let mut blocks = vec![Block::markdown(header.clone())];
    let mut text = header;

    for comment in thread {
        let entry = format!(
            "*{}*\n{}",
            identities.mention(&comment.author),
            comment.body.trim()
        );
        blocks.push(Block::Divider);
        blocks.push(Block::markdown(entry.clone()));
        text.push_str("\n\n");
        text.push_str(&entry);
    }

    OutboundMessage { text, blocks }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}
