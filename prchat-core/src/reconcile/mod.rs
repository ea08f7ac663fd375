//! Reconciliation Engine.
//!
//! Both modes go through the same per-PR path: observe the channel and the
//! PR, compute a plan of [`Effect`]s from the difference, execute it. Sweeps
//! run that path for every PR that needs a channel and archive the rest.

mod effect;
mod engine;
mod error;
mod event;
mod interpreter;
mod plan;


pub use effect::{Anomaly, Effect};
pub use engine::{
    Convergence, Engine, EngineSettings, EventOutcome, MovedThread, OpenedChannel, SweepFailure,
    SweepReport, DEFAULT_MOVE_TO_CHAT_PHRASE, MANAGED_MESSAGE_HISTORY_LIMIT,
};
pub use error::{ReconcileError, ReconcileResult};
pub use event::PullRequestEvent;
pub use interpreter::{execute_effects, Execution, InterpreterContext};
pub use plan::{
    find_managed_message, invitees, plan_approval, plan_close, plan_convergence, plan_creation,
    plan_sweep, Observed, PlanContext, SweepPlan,
};
