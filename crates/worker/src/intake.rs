//! Newline-delimited JSON event intake.
//!
//! Each line on the reader is one [`NotificationEvent`]. Lines that do not
//! parse are logged and skipped; the intake ends at end of input.

use std::sync::Arc;

use quill_events::{EventBus, NotificationEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Publish every event read from `reader`. Returns the number published.
pub async fn run<R>(reader: R, bus: Arc<EventBus>) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut published = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<NotificationEvent>(line) {
            Ok(event) => {
                bus.publish(event);
                published += 1;
            }
            Err(e) => tracing::warn!(error = %e, "Skipping unparseable event line"),
        }
    }

    tracing::info!(published, "Event intake reached end of input");
    Ok(published)
}
