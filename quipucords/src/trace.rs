//! Logging options shared by every subcommand.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use getset::CopyGetters;
use strum::Display;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{fmt::format::FmtSpan, prelude::*, EnvFilter, Registry};

/// Configures logging.
///
/// Logs are written to stderr so that subcommands printing documents keep stdout clean.
#[derive(Debug, Parser, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct TracingConfig {
    /// Set the minimum level for logs. Logs below this level are dropped.
    #[clap(long, global = true, default_value_t = Level::Info, env = "QPC_LOG_LEVEL")]
    trace_level: Level,

    /// Log span events: the start and end of each job and task.
    #[clap(long, global = true, default_value_t = Span::Off)]
    trace_spans: Span,

    /// The formatter to use for logs.
    #[clap(long, global = true, default_value_t = Format::Text)]
    trace_format: Format,

    /// The coloring mode to use for text logs.
    #[clap(long, global = true, default_value_t = Colors::Enable)]
    trace_colors: Colors,
}

impl TracingConfig {
    /// Install the global subscriber.
    ///
    /// `RUST_LOG` directives, when set, refine the configured level per module.
    pub fn init(&self) -> Result<()> {
        let filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.trace_level).into())
            .from_env_lossy();
        let spans = FmtSpan::from(self.trace_spans);
        match self.trace_format {
            Format::Text => tracing::subscriber::set_global_default(
                Registry::default().with(
                    tracing_subscriber::fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_ansi(self.trace_colors == Colors::Enable)
                        .with_span_events(spans)
                        .with_filter(filter),
                ),
            ),
            Format::Json => tracing::subscriber::set_global_default(
                Registry::default().with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_writer(std::io::stderr)
                        .with_span_events(spans)
                        .with_filter(filter),
                ),
            ),
        }
        .context("set global tracing subscriber")
    }
}

/// The log formatting to use.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Format {
    /// Text for humans.
    Text,

    /// One JSON object per event, for machines.
    Json,
}

/// Whether text logs are colored.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Colors {
    /// Color text logs.
    Enable,

    /// Plain text logs.
    Disable,
}

/// The minimum level to output.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Level {
    /// Do not emit events.
    Off,

    /// Emit 'Error' events.
    Error,

    /// Emit 'Warn' level events or higher.
    Warn,

    /// Emit 'Info' level events or higher.
    Info,

    /// Emit 'Debug' level events or higher.
    Debug,

    /// Emit every event.
    Trace,
}

impl From<Level> for LevelFilter {
    fn from(value: Level) -> Self {
        match value {
            Level::Off => LevelFilter::OFF,
            Level::Error => LevelFilter::ERROR,
            Level::Warn => LevelFilter::WARN,
            Level::Info => LevelFilter::INFO,
            Level::Debug => LevelFilter::DEBUG,
            Level::Trace => LevelFilter::TRACE,
        }
    }
}

/// Which span events to log.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum, Display)]
#[strum(serialize_all = "lowercase")]
pub enum Span {
    /// No span events.
    Off,

    /// When a span closes, with its busy and idle time.
    Close,

    /// Every span event.
    Full,
}

impl From<Span> for FmtSpan {
    fn from(value: Span) -> Self {
        match value {
            Span::Off => FmtSpan::NONE,
            Span::Close => FmtSpan::CLOSE,
            Span::Full => FmtSpan::FULL,
        }
    }
}
