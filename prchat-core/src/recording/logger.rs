//! JSON-lines sink for recorded API traffic.

use super::types::RecordedEvent;
use anyhow::{Context, Result};
use std::path::PathBuf;
use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Handle onto the recording file. Clones share one background writer,
/// which drains whatever is queued and flushes once the queue is empty.
#[derive(Clone)]
pub struct RecordingLogger {
    sender: mpsc::UnboundedSender<RecordedEvent>,
}

impl RecordingLogger {
    /// Opens `path` for appending, creating it and its parent directory as
    /// needed, and starts the writer. Must be called inside a Tokio runtime.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open recording log {}", path.display()))?;

        info!("Recording API traffic to {}", path.display());
        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(write_events(BufWriter::new(File::from_std(file)), receiver));

        Ok(Self { sender })
    }

    pub fn record(&self, event: RecordedEvent) {
        if self.sender.send(event).is_err() {
            warn!("Recording writer has stopped; event dropped");
        }
    }
}

async fn write_events(
    mut out: BufWriter<File>,
    mut events: mpsc::UnboundedReceiver<RecordedEvent>,
) {
    while let Some(event) = events.recv().await {
        append(&mut out, &event).await;
        while let Ok(event) = events.try_recv() {
            append(&mut out, &event).await;
        }
        if let Err(e) = out.flush().await {
            error!("Failed to flush recording log: {}", e);
        }
    }
    debug!("Recording writer stopped");
}

async fn append(out: &mut BufWriter<File>, event: &RecordedEvent) {
    let mut line = match serde_json::to_vec(event) {
        Ok(line) => line,
        Err(e) => {
            error!("Failed to serialize {} event: {}", event.operation, e);
            return;
        }
    };
    line.push(b'\n');
    if let Err(e) = out.write_all(&line).await {
        error!("Failed to write {} event: {}", event.operation, e);
    }
}
