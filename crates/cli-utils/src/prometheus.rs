//! Prometheus exporter.

use std::{
    net::{IpAddr, SocketAddr},
    thread,
    time::Duration,
};

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use metrics_process::Collector;
use tracing::info;

use crate::MetricsArgs;

/// Installs the global Prometheus recorder and its HTTP listener.
#[derive(Debug, Clone, Copy)]
pub struct PrometheusServer;

impl PrometheusServer {
    /// Serves metrics on `addr:port` and samples process metrics every
    /// `interval` seconds (5 when unset).
    pub fn init(addr: IpAddr, port: u16, interval: Option<u64>) -> Result<(), BuildError> {
        let listen = SocketAddr::from((addr, port));
        PrometheusBuilder::new().with_http_listener(listen).install()?;

        let collector = Collector::default();
        collector.describe();
        let period = Duration::from_secs(interval.unwrap_or(5).max(1));
        thread::spawn(move || {
            loop {
                collector.collect();
                thread::sleep(period);
            }
        });

        info!(target: "prometheus", "serving metrics at http://{listen}");
        Ok(())
    }

    /// Starts the exporter when `args.enabled` is set.
    pub fn init_from_args(args: &MetricsArgs) -> Result<bool, BuildError> {
        if !args.enabled {
            return Ok(false);
        }
        Self::init(args.addr, args.port, Some(args.interval))?;
        Ok(true)
    }
}
