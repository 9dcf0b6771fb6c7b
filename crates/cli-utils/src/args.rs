//! Argument groups shared by every `evm-bench` command.

use std::{
    net::{IpAddr, Ipv4Addr},
    path::PathBuf,
};

use clap::{ArgAction, Parser};

use crate::{
    FileLogConfig, LogConfig, LogFormat, LogRotation, StdoutLogConfig, verbosity_to_level_filter,
};

/// Log-related CLI arguments.
///
/// Verbosity levels: 1=ERROR, 2=WARN, 3=INFO (default), 4=DEBUG, 5=TRACE.
/// Use `-q` to suppress stdout logging entirely.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(next_help_heading = "Logging")]
pub struct LogArgs {
    /// Increase logging verbosity (1=ERROR, 2=WARN, 3=INFO, 4=DEBUG, 5=TRACE).
    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        default_value = "3",
        env = "EVM_BENCH_LOG_VERBOSITY",
        global = true
    )]
    pub level: u8,

    /// Suppress stdout logging.
    #[arg(long = "quiet", short = 'q', global = true)]
    pub stdout_quiet: bool,

    /// Stdout log format.
    #[arg(long = "log-format", default_value = "full", env = "EVM_BENCH_LOG_FORMAT", global = true)]
    pub stdout_format: LogFormat,

    /// Directory for file logging (enables file logging when set).
    #[arg(long = "log-dir", env = "EVM_BENCH_LOG_DIR", global = true)]
    pub file_directory: Option<PathBuf>,

    /// File log format.
    #[arg(long = "log-file-format", default_value = "json", global = true)]
    pub file_format: LogFormat,

    /// File log rotation strategy.
    #[arg(long = "log-rotation", default_value = "never", global = true)]
    pub file_rotation: LogRotation,
}

impl Default for LogArgs {
    fn default() -> Self {
        Self {
            level: 3,
            stdout_quiet: false,
            stdout_format: LogFormat::Full,
            file_directory: None,
            file_format: LogFormat::Json,
            file_rotation: LogRotation::Never,
        }
    }
}

impl From<LogArgs> for LogConfig {
    fn from(args: LogArgs) -> Self {
        let stdout_logs =
            (!args.stdout_quiet).then_some(StdoutLogConfig { format: args.stdout_format });

        let file_logs = args.file_directory.map(|dir| FileLogConfig {
            directory_path: dir,
            format: args.file_format,
            rotation: args.file_rotation,
        });

        Self { global_level: verbosity_to_level_filter(args.level), stdout_logs, file_logs }
    }
}

/// Prometheus exporter arguments.
#[derive(Debug, Clone, PartialEq, Eq, Parser)]
#[command(next_help_heading = "Metrics")]
pub struct MetricsArgs {
    /// Serve Prometheus metrics. Disabled by default.
    #[arg(
        id = "metrics_enabled",
        long = "metrics.enabled",
        global = true,
        default_value_t = false,
        env = "EVM_BENCH_METRICS_ENABLED"
    )]
    pub enabled: bool,

    /// Process metrics collection interval in seconds.
    #[arg(
        long = "metrics.interval",
        global = true,
        default_value = "5",
        env = "EVM_BENCH_METRICS_INTERVAL"
    )]
    pub interval: u64,

    /// Port to serve metrics on.
    #[arg(
        id = "metrics_port",
        long = "metrics.port",
        global = true,
        default_value = "9100",
        env = "EVM_BENCH_METRICS_PORT"
    )]
    pub port: u16,

    /// Address to serve metrics on.
    #[arg(
        id = "metrics_addr",
        long = "metrics.addr",
        global = true,
        default_value = "0.0.0.0",
        env = "EVM_BENCH_METRICS_ADDR"
    )]
    pub addr: IpAddr,
}

impl Default for MetricsArgs {
    fn default() -> Self {
        Self { enabled: false, interval: 5, port: 9100, addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED) }
    }
}
