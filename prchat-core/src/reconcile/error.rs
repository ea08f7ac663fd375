use thiserror::Error;

/// Why one reconciliation operation was abandoned. Every variant is safe
/// to retry on the next event or sweep.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The channel listing could not be fetched; nothing was written.
    #[error("channel directory unavailable: {0:#}")]
    Directory(#[source] anyhow::Error),

    /// A read or write against one of the external systems failed.
    #[error("external call failed: {0:#}")]
    External(#[source] anyhow::Error),

    /// The channel exists but cannot be used, e.g. it is archived.
    #[error("channel #{name} is unavailable: {reason}")]
    ChannelUnavailable { name: String, reason: String },

    #[error("pull request #{0} not found")]
    NotFound(u64),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;
