//! Console and file logging on top of `tracing`.
//!
//! Library code emits plain `tracing` events. Step and command code goes
//! through the [`Log`] trait so output can be styled (stage headers, dry-run
//! notes) and step outcomes collected for the end-of-run summary.

mod file;
mod logger;
mod subscriber;

use std::fmt;

pub use logger::Logger;
pub use subscriber::init_subscriber;

/// How a step ended up in one run, as shown in the summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// Ran and finished in this run.
    Done,
    /// Nothing to do, or finished in an earlier run.
    AlreadyDone,
    /// Ran in dry-run mode.
    DryRun,
    /// Ran and failed, or failed earlier and was not retried.
    Failed,
    /// Cannot run on this node, e.g. it needs a display.
    Unsupported,
    /// Did not start because a dependency is not done.
    Blocked,
}

impl StepStatus {
    /// Whether this status makes the run unsuccessful.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Unsupported)
    }

    const fn glyph(self) -> &'static str {
        match self {
            Self::Done => "✓",
            Self::AlreadyDone => "·",
            Self::DryRun => "~",
            Self::Failed | Self::Unsupported => "✗",
            Self::Blocked => "○",
        }
    }

    const fn colour(self) -> &'static str {
        match self {
            Self::Done => "\x1b[32m",
            Self::AlreadyDone => "\x1b[2m",
            Self::DryRun => "\x1b[37m",
            Self::Failed | Self::Unsupported => "\x1b[31m",
            Self::Blocked => "\x1b[33m",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Done => "done",
            Self::AlreadyDone => "already done",
            Self::DryRun => "dry-run",
            Self::Failed => "failed",
            Self::Unsupported => "unsupported",
            Self::Blocked => "blocked",
        })
    }
}

/// One line of the run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSummary {
    /// Step name.
    pub name: String,
    /// Status at the end of the run.
    pub status: StepStatus,
    /// Reason or detail, e.g. the failure message.
    pub message: Option<String>,
}

/// Sink for operator-facing output.
///
/// [`Logger`] is the implementation used by the binary; steps and the
/// sequencer only see this trait.
pub trait Log: Send + Sync {
    /// Header for a major section, e.g. a step starting.
    fn stage(&self, msg: &str);
    /// Normal progress message.
    fn info(&self, msg: &str);
    /// Detail shown on the console only with `-v`.
    fn debug(&self, msg: &str);
    /// Something the operator should look at.
    fn warn(&self, msg: &str);
    /// A failure.
    fn error(&self, msg: &str);
    /// An action skipped because of `--dry-run`.
    fn dry_run(&self, msg: &str);
    /// Record a step's outcome for the summary.
    fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>);
}

/// A logger writing to a log file inside a fresh temp dir, with a
/// thread-local subscriber so events reach that file.
///
/// Keep the guard alive for the whole test.
#[cfg(test)]
#[allow(clippy::expect_used)]
pub(crate) fn isolated_logger() -> (Logger, tempfile::TempDir, tracing::dispatcher::DefaultGuard) {
    use tracing_subscriber::{Layer as _, filter::LevelFilter, layer::SubscriberExt as _};

    let tmp = tempfile::tempdir().expect("create temp dir");
    let path = tmp.path().join("test.log");
    let layer = file::FileLayer::open(&path).expect("open log file");
    let log = Logger::with_log_file(Some(path));
    let subscriber = tracing_subscriber::registry().with(layer.with_filter(LevelFilter::DEBUG));
    let guard = tracing::dispatcher::set_default(&tracing::Dispatch::new(subscriber));
    (log, tmp, guard)
}
