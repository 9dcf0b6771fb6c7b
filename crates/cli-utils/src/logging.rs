//! Logging configuration types.

use std::path::PathBuf;

use clap::ValueEnum;
use tracing::level_filters::LevelFilter;

/// Name of the file written under the log directory.
pub const LOG_FILE_NAME: &str = "evm-bench.log";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, ValueEnum)]
#[clap(rename_all = "lowercase")]
pub enum LogFormat {
    /// Timestamp, level, target and spans.
    #[default]
    Full,
    /// Level and message only.
    Compact,
    /// One JSON object per event.
    Json,
    /// Multi-line human readable output.
    Pretty,
    /// `key=value` pairs.
    Logfmt,
}

/// When the log file is rotated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogRotation {
    /// Every minute.
    Minutely,
    /// Every hour.
    Hourly,
    /// Every day at midnight.
    Daily,
    /// A single growing file.
    #[default]
    Never,
}

/// File logging settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLogConfig {
    /// Directory holding the log files.
    pub directory_path: PathBuf,
    /// Format of file logs.
    pub format: LogFormat,
    /// Rotation strategy.
    pub rotation: LogRotation,
}

/// Stdout logging settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StdoutLogConfig {
    /// Format of stdout logs.
    pub format: LogFormat,
}

/// Global logging configuration. Defaults to full-format stdout at `INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Level applied unless `RUST_LOG` overrides it.
    pub global_level: LevelFilter,
    /// Stdout logging, if enabled.
    pub stdout_logs: Option<StdoutLogConfig>,
    /// File logging, if enabled.
    pub file_logs: Option<FileLogConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global_level: LevelFilter::INFO,
            stdout_logs: Some(StdoutLogConfig { format: LogFormat::Full }),
            file_logs: None,
        }
    }
}

/// Maps a `-v` count to a level: 1=ERROR, 2=WARN, 3=INFO, 4=DEBUG, 5+=TRACE.
/// Zero turns logging off.
pub const fn verbosity_to_level_filter(verbosity: u8) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::OFF,
        1 => LevelFilter::ERROR,
        2 => LevelFilter::WARN,
        3 => LevelFilter::INFO,
        4 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, LevelFilter::OFF)]
    #[case(1, LevelFilter::ERROR)]
    #[case(2, LevelFilter::WARN)]
    #[case(3, LevelFilter::INFO)]
    #[case(4, LevelFilter::DEBUG)]
    #[case(5, LevelFilter::TRACE)]
    #[case(9, LevelFilter::TRACE)]
    fn verbosity_mapping(#[case] verbosity: u8, #[case] expected: LevelFilter) {
        assert_eq!(verbosity_to_level_filter(verbosity), expected);
    }

    #[test]
    fn default_logs_to_stdout_only() {
        let config = LogConfig::default();
        assert_eq!(config.global_level, LevelFilter::INFO);
        assert_eq!(config.stdout_logs, Some(StdoutLogConfig { format: LogFormat::Full }));
        assert!(config.file_logs.is_none());
    }
}
