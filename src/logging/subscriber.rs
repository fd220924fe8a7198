//! Global subscriber: coloured console output plus the log file.

use std::fmt;

use super::file::{FileLayer, log_path};

/// Target of plain [`Logger`](super::Logger) messages.
pub(super) const FACADE_TARGET: &str = "meshnode";
/// Target the [`Logger`](super::Logger) uses for stage headers.
pub(super) const STAGE_TARGET: &str = "meshnode::stage";
/// Target the [`Logger`](super::Logger) uses for dry-run notes.
pub(super) const DRY_RUN_TARGET: &str = "meshnode::dry_run";

/// How an event is presented, shared by the console and the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum EventKind<'a> {
    Stage,
    DryRun,
    Info,
    Warn,
    Error,
    /// Debug or trace, with the library module it came from.
    Debug(Option<&'a str>),
}

impl<'a> EventKind<'a> {
    pub(super) fn of(level: tracing::Level, target: &'a str) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => match target {
                STAGE_TARGET => Self::Stage,
                DRY_RUN_TARGET => Self::DryRun,
                _ => Self::Info,
            },
            _ => Self::Debug(
                target
                    .strip_prefix("meshnode_cli::")
                    .and_then(|rest| rest.split("::").next()),
            ),
        }
    }
}

/// Collects the `message` field of an event.
#[derive(Debug, Default)]
pub(super) struct MessageVisitor {
    pub(super) message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        }
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

/// Console formatter: bare messages with coloured prefixes, no timestamps.
#[derive(Debug)]
struct ConsoleFormat;

impl<S, N> tracing_subscriber::fmt::FormatEvent<S, N> for ConsoleFormat
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    N: for<'a> tracing_subscriber::fmt::FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &tracing_subscriber::fmt::FmtContext<'_, S, N>,
        mut writer: tracing_subscriber::fmt::format::Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let msg = visitor.message;
        match EventKind::of(*meta.level(), meta.target()) {
            EventKind::Stage => writeln!(writer, "\x1b[1;36m::\x1b[0m \x1b[1m{msg}\x1b[0m"),
            EventKind::DryRun => writeln!(writer, "   \x1b[35mdry-run\x1b[0m {msg}"),
            EventKind::Info => writeln!(writer, "   {msg}"),
            EventKind::Warn => writeln!(writer, "\x1b[33mwarning:\x1b[0m {msg}"),
            EventKind::Error => writeln!(writer, "\x1b[1;31merror:\x1b[0m {msg}"),
            EventKind::Debug(_) => writeln!(writer, "   \x1b[2m{msg}\x1b[0m"),
        }
    }
}

/// Install the global subscriber. Call once, before any logging.
///
/// The console shows `info` and above, or `debug` with `verbose`;
/// `MESHNODE_LOG` (`EnvFilter` syntax) overrides either. Warnings and
/// errors go to stderr. The log file for `command` receives every event at
/// `debug` and above regardless of the console level.
pub fn init_subscriber(verbose: bool, command: &str) {
    use tracing_subscriber::fmt::writer::MakeWriterExt as _;
    use tracing_subscriber::{
        EnvFilter, Layer as _, filter::LevelFilter, fmt, layer::SubscriberExt as _,
        util::SubscriberInitExt as _,
    };

    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .with_env_var("MESHNODE_LOG")
        .from_env_lossy();
    let writer = std::io::stderr
        .with_max_level(tracing::Level::WARN)
        .and(std::io::stdout.with_min_level(tracing::Level::INFO));
    let console = fmt::layer()
        .event_format(ConsoleFormat)
        .with_writer(writer)
        .with_filter(filter);

    let file = log_path(command)
        .and_then(|path| FileLayer::open(&path))
        .map(|layer| layer.with_filter(LevelFilter::DEBUG));

    tracing_subscriber::registry().with(console).with(file).init();
}
