//! The reconciliation engine: observe both systems, plan, execute.

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::anyhow;
use serde::Serialize;
use tracing::{error, info, warn};

use super::effect::{Anomaly, Effect};
use super::error::{ReconcileError, ReconcileResult};
use super::event::PullRequestEvent;
use super::interpreter::{execute_effects, Execution, InterpreterContext};
use super::plan::{
    find_managed_message, plan_approval, plan_close, plan_convergence, plan_creation, plan_sweep,
    Observed, PlanContext, SweepPlan,
};
use crate::channel_name::ChannelNamer;
use crate::directory::{ChannelDirectory, DirectoryView};
use crate::identity::IdentityMap;
use crate::model::{Channel, PullRequest, ReviewComment, ReviewVerdict};
use crate::platform::{channel_members, ChatPlatform, CodeHost};
use crate::relay::{channel_deep_link, mentions_trigger, thread_message, thread_moved_reply};
use crate::snapshot::{OpenSet, PullRequestSnapshot};

/// One page of history is scanned for the managed message.
pub const MANAGED_MESSAGE_HISTORY_LIMIT: u32 = 200;

pub const DEFAULT_MOVE_TO_CHAT_PHRASE: &str = "move to slack";

/// Fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub namer: ChannelNamer,
    pub identities: Arc<IdentityMap>,
    /// The bot's Slack user id.
    pub bot_user_id: String,
    /// The GitHub App's bot login; its own review comments never trigger.
    pub bot_login: String,
    pub team_id: Option<String>,
    pub move_to_chat_phrase: String,
}

/// Result of converging one PR.
#[derive(Debug, Clone, Serialize)]
pub struct Convergence {
    pub pr_number: u64,
    pub channel: Option<Channel>,
    pub created: bool,
    pub writes: usize,
    pub failures: Vec<String>,
    pub anomalies: Vec<Anomaly>,
}

impl Convergence {
    fn from_execution(pr_number: u64, execution: Execution) -> Self {
        Self {
            pr_number,
            channel: execution.channel,
            created: execution.created,
            writes: execution.writes,
            failures: execution.failures,
            anomalies: execution.anomalies,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepFailure {
    pub subject: String,
    pub error: String,
}

/// Per-item results of one sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub open_prs: usize,
    pub channels: usize,
    pub archived: Vec<String>,
    pub created: Vec<String>,
    pub failures: Vec<SweepFailure>,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone)]
pub struct OpenedChannel {
    pub channel: Channel,
    pub deep_link: String,
}

#[derive(Debug, Clone)]
pub struct MovedThread {
    pub channel: Channel,
    pub permalink: String,
    pub comments: usize,
}

/// What handling one event did. Errors are data here: event handling never
/// fails its caller.
#[derive(Debug)]
pub enum EventOutcome {
    Ignored,
    Converged(Convergence),
    Moved(MovedThread),
    Failed(ReconcileError),
}

#[derive(Clone)]
pub struct Engine {
    chat: Arc<dyn ChatPlatform>,
    host: Arc<dyn CodeHost>,
    settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(
        chat: Arc<dyn ChatPlatform>,
        host: Arc<dyn CodeHost>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            chat,
            host,
            settings: Arc::new(settings),
        }
    }

    /// The same engine talking to the code host through `host`, e.g. a
    /// handle tagged with a delivery's correlation id.
    pub fn with_code_host(&self, host: Arc<dyn CodeHost>) -> Self {
        Self {
            host,
            ..self.clone()
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn channel_name(&self, pr_number: u64) -> String {
        self.settings.namer.name(pr_number)
    }

    fn plan_context(&self) -> PlanContext<'_> {
        PlanContext {
            identities: &self.settings.identities,
            bot_user_id: &self.settings.bot_user_id,
            team_id: self.settings.team_id.as_deref(),
        }
    }

    async fn directory_view(&self) -> ReconcileResult<DirectoryView> {
        ChannelDirectory::new(self.chat.as_ref())
            .view(&self.settings.namer)
            .await
            .map_err(ReconcileError::Directory)
    }

    async fn execute(
        &self,
        pr_number: u64,
        channel: Option<Channel>,
        effects: Vec<Effect>,
    ) -> Execution {
        let ctx = InterpreterContext {
            chat: self.chat.as_ref(),
            host: self.host.as_ref(),
            pr_number,
            team_id: self.settings.team_id.as_deref(),
            channel,
        };
        execute_effects(ctx, effects).await
    }

    /// Read everything the plan for `pr` depends on. Nothing is written if
    /// any read fails.
    async fn observe(
        &self,
        pr: &PullRequest,
        channel: Option<Channel>,
        require_channel: bool,
    ) -> ReconcileResult<Observed> {
        let mut observed = Observed::default();

        match &channel {
            Some(c) if !c.is_archived && pr.is_open() => {
                observed.members = channel_members(self.chat.as_ref(), &c.id)
                    .await
                    .map_err(ReconcileError::External)?
                    .into_iter()
                    .collect::<BTreeSet<_>>();
                let history = self
                    .chat
                    .history(&c.id, MANAGED_MESSAGE_HISTORY_LIMIT)
                    .await
                    .map_err(ReconcileError::External)?;
                observed.managed_message =
                    find_managed_message(&history, &self.settings.bot_user_id).cloned();
                observed.link_comment = self
                    .host
                    .find_link_comment(pr.number)
                    .await
                    .map_err(ReconcileError::External)?;
            }
            None if pr.is_open() || require_channel => {
                observed.link_comment = self
                    .host
                    .find_link_comment(pr.number)
                    .await
                    .map_err(ReconcileError::External)?;
            }
            _ => {}
        }

        observed.channel = channel;
        Ok(observed)
    }

    async fn converge_in(
        &self,
        pr: &PullRequest,
        view: &DirectoryView,
        require_channel: bool,
    ) -> ReconcileResult<Convergence> {
        let name = self.channel_name(pr.number);
        let channel = view.find(&name).cloned();
        let observed = self.observe(pr, channel, require_channel).await?;
        let effects = plan_convergence(
            &self.plan_context(),
            pr,
            &name,
            &observed,
            require_channel,
        );
        if effects.iter().any(Effect::is_write) {
            info!("PR #{}: applying {} effect(s)", pr.number, effects.len());
        }
        let execution = self.execute(pr.number, observed.channel, effects).await;
        Ok(Convergence::from_execution(pr.number, execution))
    }

    /// Full per-PR convergence against a freshly listed directory.
    pub async fn converge(&self, pr: &PullRequest) -> ReconcileResult<Convergence> {
        let view = self.directory_view().await?;
        self.converge_in(pr, &view, false).await
    }

    /// What a sweep would do, without doing it.
    pub async fn plan_sweep(&self) -> ReconcileResult<SweepPlan> {
        let (view, open) = self.sweep_inputs().await?;
        Ok(plan_sweep(&view, &open, &self.settings.namer))
    }

    async fn sweep_inputs(&self) -> ReconcileResult<(DirectoryView, OpenSet)> {
        let view = self.directory_view().await?;
        let open = PullRequestSnapshot::new(self.host.as_ref())
            .open_set()
            .await
            .map_err(ReconcileError::External)?;
        Ok((view, open))
    }

    /// Archive channels of PRs that are no longer open and create channels
    /// for open PRs that have none. One item failing never stops the rest.
    pub async fn sweep(&self) -> ReconcileResult<SweepReport> {
        let (view, open) = self.sweep_inputs().await?;
        let plan = plan_sweep(&view, &open, &self.settings.namer);

        info!(
            "Sweep: {} channels, {} open PRs, {} to archive, {} to create",
            view.len(),
            open.len(),
            plan.archive.len(),
            plan.create.len()
        );

        let mut report = SweepReport {
            open_prs: open.len(),
            channels: view.len(),
            anomalies: plan.anomalies.clone(),
            ..SweepReport::default()
        };
        for anomaly in &plan.anomalies {
            warn!("{}", anomaly);
        }

        for (number, channel) in plan.archive {
            let name = channel.name.clone();
            let execution = self
                .execute(number, Some(channel), vec![Effect::ArchiveChannel])
                .await;
            if execution.succeeded() {
                report.archived.push(name);
            } else {
                report.failures.push(SweepFailure {
                    subject: format!("#{}", name),
                    error: execution.failures.join("; "),
                });
            }
        }

        for number in plan.create {
            let Some(pr) = open.get(number) else {
                continue;
            };
            match self.converge_in(pr, &view, false).await {
                Ok(convergence) => {
                    if convergence.created {
                        report.created.push(self.channel_name(number));
                    }
                    if !convergence.succeeded() {
                        report.failures.push(SweepFailure {
                            subject: format!("PR #{}", number),
                            error: convergence.failures.join("; "),
                        });
                    }
                    report.anomalies.extend(convergence.anomalies);
                }
                Err(e) => {
                    error!("PR #{}: {}", number, e);
                    report.failures.push(SweepFailure {
                        subject: format!("PR #{}", number),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            "Sweep finished: archived {}, created {}, {} failure(s)",
            report.archived.len(),
            report.created.len(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Apply what `event` implies for `pr`. Never fails; failures are logged
    /// and returned as [`EventOutcome::Failed`].
    pub async fn handle_event(&self, pr: &PullRequest, event: PullRequestEvent) -> EventOutcome {
        let result = match event {
            event if event.converges() => self.converge(pr).await.map(EventOutcome::Converged),
            PullRequestEvent::Closed => self.close(pr).await.map(EventOutcome::Converged),
            PullRequestEvent::ReviewSubmitted {
                reviewer,
                verdict: ReviewVerdict::Approved,
            } => self
                .notify_approval(pr, &reviewer)
                .await
                .map(EventOutcome::Converged),
            PullRequestEvent::ReviewCommentCreated { comment }
                if comment.author.eq_ignore_ascii_case(&self.settings.bot_login) =>
            {
                Ok(EventOutcome::Ignored)
            }
            PullRequestEvent::ReviewCommentCreated { comment }
                if mentions_trigger(&comment.body, &self.settings.move_to_chat_phrase) =>
            {
                self.move_to_chat(pr, &comment)
                    .await
                    .map(EventOutcome::Moved)
            }
            _ => Ok(EventOutcome::Ignored),
        };

        result.unwrap_or_else(|e| {
            error!("PR #{}: {}", pr.number, e);
            EventOutcome::Failed(e)
        })
    }

    async fn close(&self, pr: &PullRequest) -> ReconcileResult<Convergence> {
        let view = self.directory_view().await?;
        let channel = view.find(&self.channel_name(pr.number)).cloned();
        let effects = plan_close(channel.as_ref());
        if effects.is_empty() {
            info!("PR #{}: no active channel to archive", pr.number);
        }
        let execution = self.execute(pr.number, channel, effects).await;
        Ok(Convergence::from_execution(pr.number, execution))
    }

    async fn notify_approval(
        &self,
        pr: &PullRequest,
        reviewer: &str,
    ) -> ReconcileResult<Convergence> {
        let view = self.directory_view().await?;
        let channel = view.find(&self.channel_name(pr.number)).cloned();
        let effects = plan_approval(channel.as_ref(), reviewer);
        if effects.is_empty() {
            warn!(
                "PR #{}: approval by {} not posted, no active channel",
                pr.number, reviewer
            );
        }
        let execution = self.execute(pr.number, channel, effects).await;
        Ok(Convergence::from_execution(pr.number, execution))
    }

    /// Resolve PR `number`'s channel, converging (and so creating) it if the
    /// PR is open. Closed PRs only resolve an existing channel.
    pub async fn open_channel(&self, number: u64) -> ReconcileResult<OpenedChannel> {
        let pr = PullRequestSnapshot::new(self.host.as_ref())
            .pull_request(number)
            .await
            .map_err(ReconcileError::External)?
            .ok_or(ReconcileError::NotFound(number))?;
        let view = self.directory_view().await?;
        let name = self.channel_name(number);

        let channel = if pr.is_open() {
            let convergence = self.converge_in(&pr, &view, false).await?;
            convergence.channel.ok_or_else(|| {
                ReconcileError::External(anyhow!(
                    "channel #{} could not be created: {}",
                    name,
                    convergence.failures.join("; ")
                ))
            })?
        } else {
            view.find(&name)
                .cloned()
                .ok_or(ReconcileError::NotFound(number))?
        };

        Ok(OpenedChannel {
            deep_link: channel_deep_link(&channel.id, self.settings.team_id.as_deref()),
            channel,
        })
    }

    /// Relay the review thread `comment` belongs to into the PR's channel,
    /// then point the thread at the relayed message.
    pub async fn move_to_chat(
        &self,
        pr: &PullRequest,
        comment: &ReviewComment,
    ) -> ReconcileResult<MovedThread> {
        let view = self.directory_view().await?;
        let name = self.channel_name(pr.number);

        let channel = match view.find(&name) {
            Some(channel) if channel.is_archived => {
                return Err(ReconcileError::ChannelUnavailable {
                    name,
                    reason: "archived".to_string(),
                })
            }
            Some(channel) => channel.clone(),
            None => self.create_for_move(pr, &name).await?,
        };

        let thread = PullRequestSnapshot::new(self.host.as_ref())
            .review_thread(pr.number, comment)
            .await
            .map_err(ReconcileError::External)?;
        let refs: Vec<&ReviewComment> = thread.iter().collect();
        let message = thread_message(pr, &refs, &self.settings.identities);

        let posted = self
            .chat
            .post_message(&channel.id, &message)
            .await
            .map_err(ReconcileError::External)?;
        let permalink = self
            .chat
            .permalink(&channel.id, &posted.ts)
            .await
            .map_err(ReconcileError::External)?;
        self.host
            .reply_to_review_comment(
                pr.number,
                comment.thread_anchor(),
                &thread_moved_reply(&permalink),
            )
            .await
            .map_err(ReconcileError::External)?;

        info!(
            "PR #{}: moved {} comment(s) to #{}",
            pr.number,
            thread.len(),
            channel.name
        );
        Ok(MovedThread {
            channel,
            permalink,
            comments: thread.len(),
        })
    }

    async fn create_for_move(&self, pr: &PullRequest, name: &str) -> ReconcileResult<Channel> {
        let observed = self.observe(pr, None, true).await?;
        let effects = plan_creation(
            &self.plan_context(),
            pr,
            name,
            observed.link_comment.as_ref(),
        );
        let execution = self.execute(pr.number, None, effects).await;
        match execution.channel {
            Some(channel) if channel.is_archived => Err(ReconcileError::ChannelUnavailable {
                name: name.to_string(),
                reason: "archived".to_string(),
            }),
            Some(channel) => Ok(channel),
            None => Err(ReconcileError::External(anyhow!(
                "channel #{} could not be created: {}",
                name,
                execution.failures.join("; ")
            ))),
        }
    }
}
