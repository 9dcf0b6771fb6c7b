use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;

/// Process-wide benchmark metrics.
#[derive(Metrics, Clone)]
#[metrics(scope = "evm_bench")]
pub struct BenchMetrics {
    #[metric(describe = "Transactions accepted into the node's pool")]
    pub submitted: Counter,

    #[metric(describe = "Transactions observed in a block")]
    pub confirmed: Counter,

    #[metric(describe = "Transactions refused by the node on submission")]
    pub rejected: Counter,

    #[metric(describe = "Transactions abandoned after exhausting inclusion lookups")]
    pub abandoned: Counter,

    #[metric(describe = "Websocket reconnects performed by injectors and trackers")]
    pub reconnects: Counter,

    #[metric(describe = "Records with a non-positive confirmation latency")]
    pub data_quality_warnings: Counter,

    #[metric(describe = "Smoothed confirmed transactions per second")]
    pub tps: Gauge,

    #[metric(describe = "Submitted transactions neither confirmed nor failed")]
    pub backlog: Gauge,

    #[metric(describe = "Pending-pool size observed before each burst")]
    pub observed_pending: Gauge,

    #[metric(describe = "Seconds from submission to inclusion block timestamp")]
    pub confirmation_latency: Histogram,
}
