//! Executes planned effects against the chat platform and the code host.
//!
//! Effects run in order. A failed effect is recorded and the rest still
//! run, except after a failed channel creation: every later effect needs
//! the channel, so execution stops there.

use tracing::{error, info, warn};

use super::effect::{Anomaly, Effect};
use crate::directory::ChannelDirectory;
use crate::model::Channel;
use crate::platform::{ChatPlatform, CodeHost};
use crate::relay::{channel_deep_link, link_comment_body, OutboundMessage};
use crate::slack::is_slack_error;

pub struct InterpreterContext<'a> {
    pub chat: &'a dyn ChatPlatform,
    pub host: &'a dyn CodeHost,
    pub pr_number: u64,
    pub team_id: Option<&'a str>,
    /// The PR's channel; filled in by `CreateChannel`.
    pub channel: Option<Channel>,
}

/// What executing one plan did.
#[derive(Debug, Default)]
pub struct Execution {
    pub channel: Option<Channel>,
    pub created: bool,
    pub writes: usize,
    pub failures: Vec<String>,
    pub anomalies: Vec<Anomaly>,
}

impl Execution {
    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

enum Step {
    Done,
    /// Nothing was written.
    Skipped,
    Failed(String),
    /// Failed, and later effects cannot run.
    Abort(String),
}

pub async fn execute_effects(mut ctx: InterpreterContext<'_>, effects: Vec<Effect>) -> Execution {
    let mut execution = Execution::default();

    for effect in effects {
        if let Effect::Report { anomaly } = effect {
            warn!("{}", anomaly);
            execution.anomalies.push(anomaly);
            continue;
        }

        match execute_effect(&mut ctx, &mut execution, effect).await {
            Step::Done => execution.writes += 1,
            Step::Skipped => {}
            Step::Failed(err) => {
                error!("PR #{}: effect failed: {}", ctx.pr_number, err);
                execution.failures.push(err);
            }
            Step::Abort(err) => {
                error!("PR #{}: {}", ctx.pr_number, err);
                execution.failures.push(err);
                break;
            }
        }
    }

    execution.channel = ctx.channel;
    execution
}

async fn execute_effect(
    ctx: &mut InterpreterContext<'_>,
    execution: &mut Execution,
    effect: Effect,
) -> Step {
    match effect {
        Effect::CreateChannel {
            name,
            topic,
            first_message,
        } => execute_create_channel(ctx, execution, &name, &topic, first_message).await,
        Effect::Report { .. } => Step::Skipped,
        other => execute_on_channel(ctx, other).await,
    }
}

async fn execute_on_channel(ctx: &mut InterpreterContext<'_>, effect: Effect) -> Step {
    let Some(channel) = ctx.channel.clone() else {
        return Step::Abort(format!("no channel for {:?}", effect));
    };

    let result = match effect {
        Effect::SetTopic { topic } => ctx.chat.set_topic(&channel.id, &topic).await,
        Effect::InviteUsers { user_ids } => {
            info!("Inviting {:?} to #{}", user_ids, channel.name);
            ctx.chat.invite(&channel.id, &user_ids).await
        }
        Effect::UpdateManagedMessage { ts, text } => {
            ctx.chat
                .update_message(&channel.id, &ts, &OutboundMessage::text(text))
                .await
        }
        Effect::UpsertLinkComment {
            existing_comment_id,
        } => {
            let body = link_comment_body(&channel_deep_link(&channel.id, ctx.team_id));
            match existing_comment_id {
                Some(id) => ctx.host.update_issue_comment(id, &body).await,
                None => ctx
                    .host
                    .create_issue_comment(ctx.pr_number, &body)
                    .await
                    .map(|_| ()),
            }
        }
        Effect::ArchiveChannel => {
            let result = ctx.chat.archive(&channel.id).await;
            if result.is_ok() {
                info!("Archived channel #{}", channel.name);
                if let Some(c) = ctx.channel.as_mut() {
                    c.is_archived = true;
                }
            }
            result
        }
        Effect::PostNotice { text } => ctx
            .chat
            .post_message(&channel.id, &OutboundMessage::text(text))
            .await
            .map(|_| ()),
        Effect::CreateChannel { .. } | Effect::Report { .. } => return Step::Skipped,
    };

    match result {
        Ok(()) => Step::Done,
        Err(e) => Step::Failed(format!("{:#}", e)),
    }
}

async fn execute_create_channel(
    ctx: &mut InterpreterContext<'_>,
    execution: &mut Execution,
    name: &str,
    topic: &str,
    first_message: Option<String>,
) -> Step {
    let channel = match ctx.chat.create_channel(name).await {
        Ok(channel) => channel,
        Err(e) if is_slack_error(&e, "name_taken") => {
            // Lost a race with another handler; adopt its channel as is.
            warn!("Channel #{} already exists, adopting it", name);
            return match adopt_existing(ctx.chat, name).await {
                Ok(channel) if channel.is_archived => {
                    execution.anomalies.push(Anomaly::ArchivedChannel {
                        pr_number: ctx.pr_number,
                        channel: channel.name.clone(),
                    });
                    ctx.channel = Some(channel);
                    Step::Abort(format!("channel #{} is archived", name))
                }
                Ok(channel) => {
                    ctx.channel = Some(channel);
                    Step::Skipped
                }
                Err(err) => Step::Abort(err),
            };
        }
        Err(e) => {
            return Step::Abort(format!("failed to create channel #{}: {:#}", name, e));
        }
    };

    info!("PR #{}: created channel #{}", ctx.pr_number, channel.name);
    execution.created = true;
    let channel_id = channel.id.clone();
    ctx.channel = Some(Channel {
        topic: String::new(),
        ..channel
    });

    let mut failures = Vec::new();
    if let Some(text) = first_message {
        match ctx
            .chat
            .post_message(&channel_id, &OutboundMessage::text(text))
            .await
        {
            Ok(_) => execution.writes += 1,
            Err(e) => failures.push(format!("failed to post first message: {:#}", e)),
        }
    }

    match ctx.chat.set_topic(&channel_id, topic).await {
        Ok(()) => {
            if let Some(c) = ctx.channel.as_mut() {
                c.topic = topic.to_string();
            }
        }
        Err(e) => failures.push(format!("failed to set topic: {:#}", e)),
    }

    if failures.is_empty() {
        Step::Done
    } else {
        // The channel exists, so later effects can still run.
        Step::Failed(failures.join("; "))
    }
}

async fn adopt_existing(chat: &dyn ChatPlatform, name: &str) -> Result<Channel, String> {
    let channels = ChannelDirectory::new(chat)
        .list_channels()
        .await
        .map_err(|e| format!("failed to re-read directory: {:#}", e))?;
    channels
        .into_iter()
        .find(|c| c.name == name)
        .ok_or_else(|| format!("channel #{} is taken but not listed", name))
}
