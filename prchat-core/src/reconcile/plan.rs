//! Pure planning: observed state in, effects out.
//!
//! Nothing here performs I/O, so every decision the engine makes can be
//! tested directly. Plans only contain writes whose target differs from
//! what was observed, which is what makes converging twice a no-op.

use std::collections::BTreeSet;

use serde::Serialize;

use super::effect::{Anomaly, Effect};
use crate::channel_name::ChannelNamer;
use crate::directory::DirectoryView;
use crate::identity::IdentityMap;
use crate::model::{parse_slack_ts, Channel, HistoryMessage, IssueComment, PullRequest};
use crate::relay::{
    approval_notice, channel_deep_link, link_comment_body, pull_request_text, slack_text_matches,
    slack_unescape, topic_for, MANAGED_MESSAGE_PREFIX,
};
use crate::snapshot::OpenSet;

/// Fixed inputs shared by every plan.
#[derive(Debug, Clone, Copy)]
pub struct PlanContext<'a> {
    pub identities: &'a IdentityMap,
    /// The engine's own Slack user; never invited, and the author of the
    /// managed message.
    pub bot_user_id: &'a str,
    pub team_id: Option<&'a str>,
}

/// What is currently true for one PR on both sides.
#[derive(Debug, Clone, Default)]
pub struct Observed {
    pub channel: Option<Channel>,
    pub members: BTreeSet<String>,
    pub managed_message: Option<HistoryMessage>,
    pub link_comment: Option<IssueComment>,
}

/// Slack ids of the PR's mapped participants, author first, excluding the
/// bot and anyone in `already_present`.
pub fn invitees(
    ctx: &PlanContext<'_>,
    pr: &PullRequest,
    already_present: &BTreeSet<String>,
) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for login in pr.participants() {
        match ctx.identities.slack_id(login) {
            Some(id) => {
                if id != ctx.bot_user_id
                    && !already_present.contains(id)
                    && !ids.iter().any(|existing| existing == id)
                {
                    ids.push(id.to_string());
                }
            }
            None => tracing::debug!("PR #{}: no Slack user for {}", pr.number, login),
        }
    }
    ids
}

/// The oldest message in `history` posted by the bot, if it is a managed
/// message. Another bot message in that position (a notice, a moved
/// thread) means the managed message is gone. System events such as the
/// bot's own `channel_join` are skipped.
pub fn find_managed_message<'h>(
    history: &'h [HistoryMessage],
    bot_user_id: &str,
) -> Option<&'h HistoryMessage> {
    history
        .iter()
        .filter(|m| m.is_posted() && m.user.as_deref() == Some(bot_user_id))
        .min_by_key(|m| parse_slack_ts(&m.ts).unwrap_or((u64::MAX, u64::MAX)))
        .filter(|m| slack_unescape(&m.text).starts_with(MANAGED_MESSAGE_PREFIX))
}

/// Effects that create the channel for `pr` and bring it fully up to date.
pub fn plan_creation(
    ctx: &PlanContext<'_>,
    pr: &PullRequest,
    name: &str,
    link_comment: Option<&IssueComment>,
) -> Vec<Effect> {
    let mut effects = vec![Effect::CreateChannel {
        name: name.to_string(),
        topic: topic_for(pr),
        first_message: pr.body_text().map(|_| pull_request_text(pr)),
    }];

    let user_ids = invitees(ctx, pr, &BTreeSet::new());
    if !user_ids.is_empty() {
        effects.push(Effect::InviteUsers { user_ids });
    }

    effects.push(Effect::UpsertLinkComment {
        existing_comment_id: link_comment.map(|c| c.id),
    });
    effects
}

/// Per-PR convergence. `require_channel` forces creation for a closed PR.
pub fn plan_convergence(
    ctx: &PlanContext<'_>,
    pr: &PullRequest,
    name: &str,
    observed: &Observed,
    require_channel: bool,
) -> Vec<Effect> {
    let channel = match &observed.channel {
        None if pr.is_open() || require_channel => {
            return plan_creation(ctx, pr, name, observed.link_comment.as_ref())
        }
        None => return Vec::new(),
        Some(channel) => channel,
    };

    if channel.is_archived {
        // Terminal: never reopened, and the name stays taken.
        return if pr.is_open() {
            vec![Effect::Report {
                anomaly: Anomaly::ArchivedChannel {
                    pr_number: pr.number,
                    channel: channel.name.clone(),
                },
            }]
        } else {
            Vec::new()
        };
    }

    if !pr.is_open() {
        return vec![Effect::ArchiveChannel];
    }

    let mut effects = Vec::new();

    let user_ids = invitees(ctx, pr, &observed.members);
    if !user_ids.is_empty() {
        effects.push(Effect::InviteUsers { user_ids });
    }

    let expected_text = pull_request_text(pr);
    match &observed.managed_message {
        Some(message) if !slack_text_matches(&message.text, &expected_text) => {
            effects.push(Effect::UpdateManagedMessage {
                ts: message.ts.clone(),
                text: expected_text,
            });
        }
        Some(_) => {}
        None if pr.body_text().is_some() => effects.push(Effect::Report {
            anomaly: Anomaly::ManagedMessageMissing {
                pr_number: pr.number,
                channel: channel.name.clone(),
            },
        }),
        None => {}
    }

    let topic = topic_for(pr);
    if channel.topic != topic {
        effects.push(Effect::SetTopic { topic });
    }

    let expected_link = link_comment_body(&channel_deep_link(&channel.id, ctx.team_id));
    match &observed.link_comment {
        Some(comment) if comment.body == expected_link => {}
        existing => effects.push(Effect::UpsertLinkComment {
            existing_comment_id: existing.as_ref().map(|c| c.id),
        }),
    }

    effects
}

/// A closed event only ever archives.
pub fn plan_close(channel: Option<&Channel>) -> Vec<Effect> {
    match channel {
        Some(channel) if !channel.is_archived => vec![Effect::ArchiveChannel],
        _ => Vec::new(),
    }
}

/// Approval notices go to active channels only.
pub fn plan_approval(channel: Option<&Channel>, reviewer: &str) -> Vec<Effect> {
    match channel {
        Some(channel) if !channel.is_archived => vec![Effect::PostNotice {
            text: approval_notice(reviewer),
        }],
        _ => Vec::new(),
    }
}

/// What a sweep will do.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepPlan {
    /// Active PR channels whose PR is not open, with that PR's number.
    pub archive: Vec<(u64, Channel)>,
    /// Open PRs with no channel under their name, active or archived.
    pub create: Vec<u64>,
    pub anomalies: Vec<Anomaly>,
}

impl SweepPlan {
    pub fn is_empty(&self) -> bool {
        self.archive.is_empty() && self.create.is_empty()
    }
}

pub fn plan_sweep(view: &DirectoryView, open: &OpenSet, namer: &ChannelNamer) -> SweepPlan {
    let mut plan = SweepPlan::default();

    for (number, channel) in view.pr_channels() {
        if !open.contains(number) && !channel.is_archived {
            plan.archive.push((number, channel.clone()));
        }
    }

    for pr in open.iter() {
        match view.find(&namer.name(pr.number)) {
            None => plan.create.push(pr.number),
            Some(channel) if channel.is_archived => {
                plan.anomalies.push(Anomaly::ArchivedChannel {
                    pr_number: pr.number,
                    channel: channel.name.clone(),
                })
            }
            Some(_) => {}
        }
    }

    plan
}
