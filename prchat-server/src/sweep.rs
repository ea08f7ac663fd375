//! Periodic full reconciliation.
//!
//! Webhooks can be lost or arrive out of order; the sweep repairs whatever
//! they missed. Each sweep reads both systems afresh.

use std::time::Duration;

use prchat_core::{Engine, SweepReport};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

/// Run one sweep and log its report. Errors are logged, never propagated.
pub async fn run_sweep(engine: &Engine) -> Option<SweepReport> {
    match engine.sweep().await {
        Ok(report) => {
            for failure in &report.failures {
                warn!("Sweep: {} failed: {}", failure.subject, failure.error);
            }
            Some(report)
        }
        Err(e) => {
            error!("Sweep abandoned: {}", e);
            None
        }
    }
}

/// Sweep every `period`. The first tick fires immediately, so
/// `sweep_on_startup` decides whether it is skipped.
pub async fn sweep_loop(engine: Engine, period: Duration, sweep_on_startup: bool) {
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if !sweep_on_startup {
        interval.tick().await;
    }

    loop {
        interval.tick().await;
        info!("Starting scheduled sweep");
        run_sweep(&engine).await;
    }
}
