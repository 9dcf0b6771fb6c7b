#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod args;
pub use args::{LogArgs, MetricsArgs};

mod logging;
pub use logging::{
    FileLogConfig, LOG_FILE_NAME, LogConfig, LogFormat, LogRotation, StdoutLogConfig,
    verbosity_to_level_filter,
};

mod prometheus;
pub use prometheus::PrometheusServer;

mod styles;
pub use styles::CliStyles;

mod tracing;
pub use tracing::{LogGuard, LogfmtFormatter, init_test_tracing};
