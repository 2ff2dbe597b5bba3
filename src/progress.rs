//! Progress and status notifications.
//!
//! The pipeline calls a `ProgressReporter` at run start, at periodic checkpoints,
//! and once at the end. Notifications are one-way: reporters swallow their own
//! delivery failures and the pipeline never waits on them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use tracing::{error, info};

/// A periodic checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    /// Bytes read as a percentage of the source size, capped below 100 until finalized.
    pub percent: Option<f64>,
    pub rows_written: u64,
    pub bytes_read: u64,
    pub message: String,
}

/// Terminal outcome of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Success {
        rows: u64,
        /// Absent when the run produced no rows.
        output: Option<PathBuf>,
    },
    Failure {
        error: String,
    },
}

/// Receiver of run notifications, keyed by run identifier.
pub trait ProgressReporter: Send + Sync {
    fn on_start(&self, run_id: &str);
    fn on_progress(&self, run_id: &str, progress: &Progress);
    fn on_finish(&self, run_id: &str, outcome: &RunOutcome);
}

/// Computes a capped percentage of `bytes_read` over `total`.
pub fn percent_of(bytes_read: u64, total: Option<u64>, cap: f64) -> Option<f64> {
    match total {
        Some(total) if total > 0 => {
            let pct = (bytes_read as f64 * 10_000.0 / total as f64).round() / 100.0;
            Some(pct.min(cap))
        }
        _ => None,
    }
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_start(&self, _run_id: &str) {}
    fn on_progress(&self, _run_id: &str, _progress: &Progress) {}
    fn on_finish(&self, _run_id: &str, _outcome: &RunOutcome) {}
}

/// Console adapter: renders notifications as `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl ProgressReporter for LogReporter {
    fn on_start(&self, run_id: &str) {
        info!(run_id, "Parsing started");
    }

    fn on_progress(&self, run_id: &str, progress: &Progress) {
        info!(
            run_id,
            percent = progress.percent,
            rows = progress.rows_written,
            bytes = progress.bytes_read,
            "{}",
            progress.message
        );
    }

    fn on_finish(&self, run_id: &str, outcome: &RunOutcome) {
        match outcome {
            RunOutcome::Success { rows, output } => {
                info!(run_id, rows, output = ?output, "Completed");
            }
            RunOutcome::Failure { error } => {
                error!(run_id, error = %error, "Failed");
            }
        }
    }
}

/// A notification as delivered through a channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Started { run_id: String },
    Progress { run_id: String, progress: Progress },
    Finished { run_id: String, outcome: RunOutcome },
}

impl RunEvent {
    /// The run this event belongs to.
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::Started { run_id }
            | RunEvent::Progress { run_id, .. }
            | RunEvent::Finished { run_id, .. } => run_id,
        }
    }
}

/// Forwards notifications into an mpsc channel.
///
/// Any number of concurrent runs may share clones of one sender; events carry
/// their run id. A disconnected receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: Sender<RunEvent>,
}

impl ChannelReporter {
    pub fn new(sender: Sender<RunEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }
}

impl ProgressReporter for ChannelReporter {
    fn on_start(&self, run_id: &str) {
        self.send(RunEvent::Started {
            run_id: run_id.to_string(),
        });
    }

    fn on_progress(&self, run_id: &str, progress: &Progress) {
        self.send(RunEvent::Progress {
            run_id: run_id.to_string(),
            progress: progress.clone(),
        });
    }

    fn on_finish(&self, run_id: &str, outcome: &RunOutcome) {
        self.send(RunEvent::Finished {
            run_id: run_id.to_string(),
            outcome: outcome.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_percent_capped() {
        assert_eq!(percent_of(50, Some(200), 90.0), Some(25.0));
        assert_eq!(percent_of(199, Some(200), 90.0), Some(90.0));
        assert_eq!(percent_of(1, Some(3), 90.0), Some(33.33));
        assert_eq!(percent_of(10, None, 90.0), None);
        assert_eq!(percent_of(10, Some(0), 90.0), None);
    }

    #[test]
    fn test_channel_reporter_delivers_events() {
        let (tx, rx) = mpsc::channel();
        let reporter = ChannelReporter::new(tx);

        reporter.on_start("run-1");
        reporter.on_finish(
            "run-1",
            &RunOutcome::Success {
                rows: 3,
                output: None,
            },
        );

        let events: Vec<RunEvent> = rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], RunEvent::Started { run_id: "run-1".to_string() });
        assert!(events.iter().all(|e| e.run_id() == "run-1"));
    }

    #[test]
    fn test_channel_reporter_ignores_dropped_receiver() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let reporter = ChannelReporter::new(tx);
        reporter.on_start("run-2");
    }

    #[test]
    fn test_event_json_shape() {
        let event = RunEvent::Finished {
            run_id: "r".to_string(),
            outcome: RunOutcome::Failure {
                error: "boom".to_string(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "finished");
        assert_eq!(json["outcome"]["status"], "failure");
    }
}
