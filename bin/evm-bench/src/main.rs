#![doc = include_str!("../README.md")]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

mod cli;

use clap::Parser;
use dotenvy::dotenv;
use evm_bench_cli_utils::{LogConfig, PrometheusServer};
use eyre::WrapErr;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenv().ok();
    let cli = cli::Cli::parse();

    let _log_guard = LogConfig::from(cli.log.clone()).init_tracing_subscriber()?;
    PrometheusServer::init_from_args(&cli.metrics).wrap_err("failed to start metrics server")?;

    cli.run().await
}
