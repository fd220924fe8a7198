//! The persistent log file: where it lives and the layer that writes it.

use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::subscriber::{EventKind, MessageVisitor};

/// System-wide log directory, used when it is writable (running as root).
const SYSTEM_LOG_DIR: &str = "/var/log/meshnode";

/// Log file for one subcommand, e.g. `/var/log/meshnode/install.log`.
///
/// `MESHNODE_LOG_DIR` wins; otherwise `/var/log/meshnode` when the file can
/// be opened there (running as root), else `$XDG_STATE_HOME/meshnode`
/// (`~/.local/state/meshnode`). `None` when no candidate works; logging then
/// stays on the console.
pub(super) fn log_path(command: &str) -> Option<PathBuf> {
    let file_name = format!("{command}.log");
    if let Some(dir) = std::env::var_os("MESHNODE_LOG_DIR").filter(|v| !v.is_empty()) {
        let path = PathBuf::from(dir).join(&file_name);
        return appendable(&path).then_some(path);
    }
    let user_dir = std::env::var_os("XDG_STATE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local/state")))
        .map(|base| base.join("meshnode"));

    std::iter::once(PathBuf::from(SYSTEM_LOG_DIR))
        .chain(user_dir)
        .map(|dir| dir.join(&file_name))
        .find(|path| appendable(path))
}

/// Whether `path` can be created (with its parents) and opened for append.
fn appendable(path: &Path) -> bool {
    path.parent().is_none_or(|dir| fs::create_dir_all(dir).is_ok())
        && fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .is_ok()
}

/// Remove ANSI CSI sequences (colours, cursor movement).
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\x1b' {
            out.push(c);
            continue;
        }
        if chars.next() == Some('[') {
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
    }
    out
}

/// One file line, without the trailing newline.
fn render_line(time: &str, kind: EventKind<'_>, msg: &str) -> String {
    let msg = strip_ansi(msg);
    match kind {
        EventKind::Stage => format!("[{time}] ==> {msg}"),
        EventKind::DryRun => format!("[{time}]     [dry run] {msg}"),
        EventKind::Error => format!("[{time}]     [error] {msg}"),
        EventKind::Warn => format!("[{time}]     [warn] {msg}"),
        EventKind::Info => format!("[{time}]     {msg}"),
        EventKind::Debug(Some(module)) => format!("[{time}]     [debug] {module}: {msg}"),
        EventKind::Debug(None) => format!("[{time}]     [debug] {msg}"),
    }
}

/// A [`tracing_subscriber::Layer`] appending every event it sees to a file.
#[derive(Debug)]
pub(super) struct FileLayer {
    file: Mutex<fs::File>,
}

impl FileLayer {
    /// Truncate `path`, write a run header, and keep it open for appending.
    pub(super) fn open(path: &Path) -> Option<Self> {
        let version = option_env!("MESHNODE_VERSION").unwrap_or(env!("CARGO_PKG_VERSION"));
        let started = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        fs::write(path, format!("# meshnode {version}, started {started}\n")).ok()?;
        let file = fs::OpenOptions::new().append(true).open(path).ok()?;
        Some(Self {
            file: Mutex::new(file),
        })
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for FileLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let time = chrono::Utc::now().format("%H:%M:%S").to_string();
        let line = render_line(
            &time,
            EventKind::of(*meta.level(), meta.target()),
            &visitor.message,
        );
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{line}");
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn colours_and_cursor_codes_are_stripped() {
        assert_eq!(strip_ansi("\x1b[31mERROR\x1b[0m boom"), "ERROR boom");
        assert_eq!(strip_ansi("\x1b[2Kdone"), "done");
        assert_eq!(strip_ansi("plain"), "plain");
    }

    #[test]
    fn lines_are_tagged_by_kind() {
        assert_eq!(
            render_line("09:30:00", EventKind::Stage, "\x1b[1mInstall daemon\x1b[0m"),
            "[09:30:00] ==> Install daemon"
        );
        assert_eq!(
            render_line("09:30:00", EventKind::Debug(Some("store")), "renamed"),
            "[09:30:00]     [debug] store: renamed"
        );
        assert_eq!(
            render_line("09:30:00", EventKind::DryRun, "would run apt-get"),
            "[09:30:00]     [dry run] would run apt-get"
        );
    }

    #[test]
    fn open_writes_a_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apply.log");
        std::fs::write(&path, "old run\n").unwrap();
        FileLayer::open(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# meshnode "));
        assert!(!text.contains("old run"));
    }
}
