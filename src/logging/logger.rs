//! The [`Logger`] facade and the end-of-run summary.
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Mutex;

use super::file::log_path;
use super::subscriber::{DRY_RUN_TARGET, FACADE_TARGET, STAGE_TARGET};
use super::{Log, StepStatus, StepSummary};

/// Emits styled `tracing` events and collects step outcomes.
///
/// The log file itself is opened by [`init_subscriber`](super::init_subscriber);
/// the logger only remembers its path to print it under the summary.
#[derive(Debug, Default)]
pub struct Logger {
    steps: Mutex<Vec<StepSummary>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Logger for the subcommand `command`.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self::with_log_file(log_path(command))
    }

    /// Logger that reports `log_file` as the run's log.
    #[must_use]
    pub const fn with_log_file(log_file: Option<PathBuf>) -> Self {
        Self {
            steps: Mutex::new(Vec::new()),
            log_file,
        }
    }

    /// Path of the run's log file, if one could be opened.
    #[must_use]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Step outcomes recorded so far, in recording order.
    #[must_use]
    pub fn step_entries(&self) -> Vec<StepSummary> {
        self.steps.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Number of recorded steps that failed or were unsupported.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.step_entries()
            .iter()
            .filter(|s| s.status.is_failure())
            .count()
    }

    /// Print every recorded step with its status, then the totals.
    pub fn print_summary(&self) {
        let steps = self.step_entries();
        if steps.is_empty() {
            return;
        }
        self.stage("Summary");
        for line in summary_lines(&steps) {
            self.info(&line);
        }
        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

/// One coloured line per step, then a totals line listing only non-zero
/// counts.
fn summary_lines(steps: &[StepSummary]) -> Vec<String> {
    const ORDER: [StepStatus; 6] = [
        StepStatus::Done,
        StepStatus::AlreadyDone,
        StepStatus::DryRun,
        StepStatus::Failed,
        StepStatus::Unsupported,
        StepStatus::Blocked,
    ];

    let mut lines: Vec<String> = steps
        .iter()
        .map(|step| {
            let mut line = format!(
                "{}{} {}",
                step.status.colour(),
                step.status.glyph(),
                step.name
            );
            if let Some(message) = &step.message {
                let _ = write!(line, " ({message})");
            }
            line.push_str("\x1b[0m");
            line
        })
        .collect();

    let counts: Vec<String> = ORDER
        .iter()
        .filter_map(|status| {
            let n = steps.iter().filter(|s| s.status == *status).count();
            (n > 0).then(|| format!("{}{n} {status}\x1b[0m", status.colour()))
        })
        .collect();
    lines.push(format!("{} steps: {}", steps.len(), counts.join(", ")));
    lines
}

impl Log for Logger {
    fn stage(&self, msg: &str) {
        tracing::info!(target: STAGE_TARGET, "{msg}");
    }

    fn info(&self, msg: &str) {
        tracing::info!(target: FACADE_TARGET, "{msg}");
    }

    fn debug(&self, msg: &str) {
        tracing::debug!(target: FACADE_TARGET, "{msg}");
    }

    fn warn(&self, msg: &str) {
        tracing::warn!(target: FACADE_TARGET, "{msg}");
    }

    fn error(&self, msg: &str) {
        tracing::error!(target: FACADE_TARGET, "{msg}");
    }

    fn dry_run(&self, msg: &str) {
        tracing::info!(target: DRY_RUN_TARGET, "{msg}");
    }

    fn record_step(&self, name: &str, status: StepStatus, message: Option<&str>) {
        if let Ok(mut steps) = self.steps.lock() {
            steps.push(StepSummary {
                name: name.to_string(),
                status,
                message: message.map(str::to_string),
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::logging::isolated_logger;

    fn strip(s: &str) -> String {
        let mut out = String::new();
        let mut in_escape = false;
        for c in s.chars() {
            match (in_escape, c) {
                (false, '\x1b') => in_escape = true,
                (true, 'm') => in_escape = false,
                (true, _) => {}
                (false, c) => out.push(c),
            }
        }
        out
    }

    #[test]
    fn failures_include_unsupported_steps() {
        let log = Logger::with_log_file(None);
        log.record_step("Add package repository", StepStatus::Done, None);
        log.record_step("Install daemon", StepStatus::Failed, Some("apt-get exited 100"));
        log.record_step("Open config editor", StepStatus::Unsupported, None);
        log.record_step("Enable service", StepStatus::Blocked, None);
        assert_eq!(log.failure_count(), 2);
        assert_eq!(
            log.step_entries()[1].message.as_deref(),
            Some("apt-get exited 100")
        );
    }

    #[test]
    fn summary_lists_steps_and_nonzero_totals() {
        let steps = [
            StepSummary {
                name: "Apply boot config".to_string(),
                status: StepStatus::Done,
                message: Some("reboot required".to_string()),
            },
            StepSummary {
                name: "Install daemon".to_string(),
                status: StepStatus::AlreadyDone,
                message: None,
            },
            StepSummary {
                name: "Enable service".to_string(),
                status: StepStatus::Blocked,
                message: None,
            },
        ];
        let lines: Vec<String> = summary_lines(&steps).iter().map(|l| strip(l)).collect();
        assert_eq!(
            lines,
            [
                "✓ Apply boot config (reboot required)",
                "· Install daemon",
                "○ Enable service",
                "3 steps: 1 done, 1 already done, 1 blocked",
            ]
        );
    }

    #[test]
    fn events_reach_the_log_file() {
        let (log, _tmp, _guard) = isolated_logger();
        log.stage("Install daemon");
        log.dry_run("would run apt-get install meshtasticd");
        log.warn("radio region not set");
        log.debug("probing dpkg");
        let text = std::fs::read_to_string(log.log_path().unwrap()).unwrap();
        assert!(text.contains("==> Install daemon"));
        assert!(text.contains("[dry run] would run apt-get install meshtasticd"));
        assert!(text.contains("[warn] radio region not set"));
        assert!(text.contains("[debug] probing dpkg"));
    }

    #[test]
    fn summary_reaches_the_log_file_without_colour() {
        let (log, _tmp, _guard) = isolated_logger();
        log.record_step("Configure Avahi", StepStatus::Failed, Some("avahi-daemon missing"));
        log.print_summary();
        let text = std::fs::read_to_string(log.log_path().unwrap()).unwrap();
        assert!(text.contains("✗ Configure Avahi (avahi-daemon missing)"));
        assert!(text.contains("1 steps: 1 failed"));
        assert!(!text.contains('\x1b'));
    }
}
