//! Tracing subscriber initialization.

use std::{fmt, io, sync::Once};

use tracing::{
    Event, Subscriber,
    field::{Field, Visit},
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{
        FmtContext, MakeWriter,
        format::{FormatEvent, FormatFields, Writer},
        time::{FormatTime, SystemTime},
    },
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::{FileLogConfig, LOG_FILE_NAME, LogConfig, LogFormat, LogRotation};

/// Writes each event as one logfmt line:
/// `ts=2026-01-01T00:00:00Z level=info target=evm_bench::injector msg="burst complete" worker=0 built=400`.
///
/// Every structured field becomes its own pair, so report lines stay greppable
/// by key. Values with spaces, quotes or `=` are quoted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogfmtFormatter;

impl<S, N> FormatEvent<S, N> for LogfmtFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        write!(writer, "ts=")?;
        SystemTime.format_time(&mut writer)?;
        write!(writer, " level={} target={}", meta.level().as_str().to_ascii_lowercase(), meta.target())?;

        let mut pairs = PairWriter { writer: &mut writer, result: Ok(()) };
        event.record(&mut pairs);
        pairs.result?;

        writeln!(writer)
    }
}

struct PairWriter<'a, 'w> {
    writer: &'a mut Writer<'w>,
    result: fmt::Result,
}

impl PairWriter<'_, '_> {
    fn pair(&mut self, key: &str, value: &str) {
        if self.result.is_err() {
            return;
        }
        let key = if key == "message" { "msg" } else { key };
        let quote = value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"' || c == '=');
        self.result = if quote {
            write!(self.writer, " {key}={value:?}")
        } else {
            write!(self.writer, " {key}={value}")
        };
    }
}

impl Visit for PairWriter<'_, '_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.pair(field.name(), value);
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.pair(field.name(), &format!("{value:?}"));
    }
}

/// Keeps the background file writer alive. Buffered lines are flushed when
/// it is dropped, so hold it until the process exits.
#[derive(Debug, Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard(Option<WorkerGuard>);

impl LogConfig {
    /// Installs the global subscriber. `RUST_LOG` directives override the
    /// configured level. Fails if a subscriber is already set.
    pub fn init_tracing_subscriber(&self) -> eyre::Result<LogGuard> {
        let filter =
            EnvFilter::builder().with_default_directive(self.global_level.into()).from_env_lossy();

        let stdout = self.stdout_logs.map(|stdout| fmt_layer(io::stdout, true, stdout.format));
        let (file, guard) = match &self.file_logs {
            Some(config) => {
                let (writer, guard) = tracing_appender::non_blocking(appender(config));
                (Some(fmt_layer(writer, false, config.format)), Some(guard))
            }
            None => (None, None),
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(stdout)
            .with(file)
            .try_init()
            .map_err(|e| eyre::eyre!("failed to initialize tracing subscriber: {e}"))?;
        Ok(LogGuard(guard))
    }
}

fn appender(config: &FileLogConfig) -> RollingFileAppender {
    let rotation = match config.rotation {
        LogRotation::Minutely => Rotation::MINUTELY,
        LogRotation::Hourly => Rotation::HOURLY,
        LogRotation::Daily => Rotation::DAILY,
        LogRotation::Never => Rotation::NEVER,
    };
    RollingFileAppender::new(rotation, &config.directory_path, LOG_FILE_NAME)
}

fn fmt_layer<S, W>(writer: W, ansi: bool, format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a> + Send + Sync,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(ansi);
    match format {
        LogFormat::Full => Box::new(base),
        LogFormat::Compact => Box::new(base.compact()),
        LogFormat::Json => Box::new(base.json()),
        LogFormat::Pretty => Box::new(base.pretty()),
        LogFormat::Logfmt => Box::new(base.with_ansi(false).event_format(LogfmtFormatter)),
    }
}

/// Installs a test-writer subscriber once per process.
pub fn init_test_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let filter = EnvFilter::builder()
            .with_default_directive(tracing::level_filters::LevelFilter::INFO.into())
            .from_env_lossy();

        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}
