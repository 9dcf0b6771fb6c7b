//! Streaming throughput and latency statistics.

use std::{fmt, time::Duration};

use chrono::TimeDelta;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::info;

use crate::{BenchMetrics, FailureReason, RecordStatus, SubmissionRecord};

/// Exponentially smoothed confirmations per second, weight one half.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TpsEstimator {
    tps: f64,
}

impl TpsEstimator {
    /// Folds in `confirmed` confirmations observed over `elapsed`.
    pub fn update(&mut self, confirmed: u64, elapsed: Duration) -> f64 {
        if !elapsed.is_zero() {
            self.tps = 0.5 * self.tps + 0.5 * (confirmed as f64 / elapsed.as_secs_f64());
        }
        self.tps
    }

    /// Current estimate.
    pub const fn tps(&self) -> f64 {
        self.tps
    }
}

/// Running totals owned by the aggregator.
#[derive(Debug, Clone)]
pub struct AggregateStats {
    /// Transactions handed to the node, accepted or rejected.
    pub submitted: u64,
    /// Transactions observed in a block.
    pub confirmed: u64,
    /// Rejected plus abandoned.
    pub failed: u64,
    /// Refused on submission.
    pub rejected: u64,
    /// Never observed in a block.
    pub abandoned: u64,
    /// Confirmations with a non-positive latency.
    pub data_quality_warnings: u64,
    /// Sum of confirmation latencies.
    pub latency_sum: TimeDelta,
    /// Smallest confirmation latency.
    pub latency_min: Option<TimeDelta>,
    /// Largest confirmation latency.
    pub latency_max: Option<TimeDelta>,
    /// Start of the measurement window.
    pub window_start: Instant,
    /// Time of the previous report.
    pub last_report_at: Instant,
    /// Confirmed count at the previous report.
    pub last_confirmed: u64,
    /// Smoothed throughput.
    pub tps: TpsEstimator,
}

impl AggregateStats {
    /// Empty totals with the window starting at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            submitted: 0,
            confirmed: 0,
            failed: 0,
            rejected: 0,
            abandoned: 0,
            data_quality_warnings: 0,
            latency_sum: TimeDelta::zero(),
            latency_min: None,
            latency_max: None,
            window_start: now,
            last_report_at: now,
            last_confirmed: 0,
            tps: TpsEstimator::default(),
        }
    }

    /// Submitted transactions neither confirmed nor failed.
    pub const fn backlog(&self) -> u64 {
        self.submitted.saturating_sub(self.confirmed).saturating_sub(self.failed)
    }

    /// `confirmed / submitted`, zero before the first submission.
    pub fn success_ratio(&self) -> f64 {
        if self.submitted == 0 {
            return 0.0;
        }
        self.confirmed as f64 / self.submitted as f64
    }

    /// Mean confirmation latency.
    pub fn average_latency(&self) -> Option<TimeDelta> {
        let confirmed = i32::try_from(self.confirmed).ok().filter(|n| *n > 0)?;
        Some(self.latency_sum / confirmed)
    }
}

/// One periodic report line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    /// Total submitted.
    pub submitted: u64,
    /// Total confirmed.
    pub confirmed: u64,
    /// Total failed.
    pub failed: u64,
    /// Submitted minus confirmed minus failed.
    pub backlog: u64,
    /// Smoothed confirmations per second.
    pub tps: f64,
    /// Confirmed over submitted.
    pub success_ratio: f64,
    /// Time since the window started.
    pub elapsed: Duration,
}

/// Final figures of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    /// Total submitted.
    pub submitted: u64,
    /// Total confirmed.
    pub confirmed: u64,
    /// Total failed.
    pub failed: u64,
    /// Refused on submission.
    pub rejected: u64,
    /// Never observed in a block.
    pub abandoned: u64,
    /// Confirmed over submitted.
    pub success_ratio: f64,
    /// Mean confirmation latency.
    pub average_latency: Option<TimeDelta>,
    /// Smallest confirmation latency.
    pub min_latency: Option<TimeDelta>,
    /// Largest confirmation latency.
    pub max_latency: Option<TimeDelta>,
    /// Confirmations with a non-positive latency.
    pub data_quality_warnings: u64,
    /// Length of the measurement window.
    pub elapsed: Duration,
    /// Confirmed over the whole window.
    pub average_tps: f64,
}

fn millis(latency: Option<TimeDelta>) -> String {
    latency.map_or_else(|| "n/a".to_string(), |latency| format!("{}ms", latency.num_milliseconds()))
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "elapsed:        {:.1}s", self.elapsed.as_secs_f64())?;
        writeln!(f, "submitted:      {}", self.submitted)?;
        writeln!(f, "confirmed:      {}", self.confirmed)?;
        writeln!(f, "failed:         {} (rejected {}, abandoned {})", self.failed, self.rejected, self.abandoned)?;
        writeln!(f, "success ratio:  {:.2}%", self.success_ratio * 100.0)?;
        writeln!(f, "average tps:    {:.2}", self.average_tps)?;
        writeln!(
            f,
            "latency:        avg {} / min {} / max {}",
            millis(self.average_latency),
            millis(self.min_latency),
            millis(self.max_latency)
        )?;
        write!(f, "data warnings:  {}", self.data_quality_warnings)
    }
}

/// Single consumer of every worker's records.
#[derive(Clone)]
pub struct StatsAggregator {
    stats: AggregateStats,
    interval: Duration,
    metrics: BenchMetrics,
}

impl fmt::Debug for StatsAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatsAggregator")
            .field("stats", &self.stats)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl StatsAggregator {
    /// An aggregator reporting every `interval`, window starting now.
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    /// An aggregator whose window starts at `start`.
    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self { stats: AggregateStats::new(start), interval, metrics: BenchMetrics::default() }
    }

    /// Current totals.
    pub const fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    /// Accounts for one record.
    pub fn observe(&mut self, record: &SubmissionRecord) {
        let stats = &mut self.stats;
        match &record.status {
            RecordStatus::Pending => stats.submitted += 1,
            RecordStatus::Accepted => {
                stats.confirmed += 1;
                if let Some(latency) = record.latency {
                    stats.latency_sum += latency;
                    stats.latency_min = Some(stats.latency_min.map_or(latency, |min| min.min(latency)));
                    stats.latency_max = Some(stats.latency_max.map_or(latency, |max| max.max(latency)));
                    if latency <= TimeDelta::zero() {
                        stats.data_quality_warnings += 1;
                    }
                }
            }
            RecordStatus::Failed(FailureReason::Rejected { .. }) => {
                stats.submitted += 1;
                stats.failed += 1;
                stats.rejected += 1;
            }
            RecordStatus::Failed(FailureReason::Abandoned { .. }) => {
                stats.failed += 1;
                stats.abandoned += 1;
            }
        }
    }

    /// Updates the throughput estimate and returns a report as of `now`.
    pub fn report(&mut self, now: Instant) -> StatsReport {
        let stats = &mut self.stats;
        let delta = stats.confirmed - stats.last_confirmed;
        let tps = stats.tps.update(delta, now.saturating_duration_since(stats.last_report_at));
        stats.last_confirmed = stats.confirmed;
        stats.last_report_at = now;

        self.metrics.tps.set(tps);
        self.metrics.backlog.set(stats.backlog() as f64);

        StatsReport {
            submitted: stats.submitted,
            confirmed: stats.confirmed,
            failed: stats.failed,
            backlog: stats.backlog(),
            tps,
            success_ratio: stats.success_ratio(),
            elapsed: now.saturating_duration_since(stats.window_start),
        }
    }

    /// Final figures as of `now`.
    pub fn summary(&self, now: Instant) -> Summary {
        let stats = &self.stats;
        let elapsed = now.saturating_duration_since(stats.window_start);
        let average_tps =
            if elapsed.is_zero() { 0.0 } else { stats.confirmed as f64 / elapsed.as_secs_f64() };

        Summary {
            submitted: stats.submitted,
            confirmed: stats.confirmed,
            failed: stats.failed,
            rejected: stats.rejected,
            abandoned: stats.abandoned,
            success_ratio: stats.success_ratio(),
            average_latency: stats.average_latency(),
            min_latency: stats.latency_min,
            max_latency: stats.latency_max,
            data_quality_warnings: stats.data_quality_warnings,
            elapsed,
            average_tps,
        }
    }

    /// Consumes `records` until every producer is gone, reporting on a fixed cadence.
    pub async fn run(mut self, mut records: mpsc::Receiver<SubmissionRecord>) -> Summary {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = records.recv() => match received {
                    Some(record) => self.observe(&record),
                    None => break,
                },
                _ = ticker.tick() => {
                    let report = self.report(Instant::now());
                    info!(
                        submitted = report.submitted,
                        confirmed = report.confirmed,
                        failed = report.failed,
                        backlog = report.backlog,
                        tps = format!("{:.2}", report.tps),
                        success = format!("{:.2}%", report.success_ratio * 100.0),
                        "stats"
                    );
                }
            }
        }

        let summary = self.summary(Instant::now());
        info!(
            submitted = summary.submitted,
            confirmed = summary.confirmed,
            failed = summary.failed,
            average_tps = format!("{:.2}", summary.average_tps),
            "all records aggregated"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::{AccountId, RpcRejection, WorkerId, transport::BlockSummary};

    fn pending(nonce: u64) -> SubmissionRecord {
        SubmissionRecord::new(WorkerId(0), AccountId(0), nonce, Utc::now())
    }

    fn accepted(nonce: u64, latency_secs: i64) -> SubmissionRecord {
        let mut record = pending(nonce);
        let timestamp = (record.submitted_at.timestamp() + latency_secs) as u64;
        record.confirm(&BlockSummary { number: 1, timestamp, hash: Default::default() });
        record.latency = Some(TimeDelta::seconds(latency_secs));
        record
    }

    #[test]
    fn tps_converges_to_constant_rate() {
        let start = Instant::now();
        let mut aggregator = StatsAggregator::starting_at(Duration::from_secs(1), start);

        let mut nonce = 0;
        let mut reports = Vec::new();
        for second in 1..=10u64 {
            for _ in 0..100 {
                aggregator.observe(&pending(nonce));
                aggregator.observe(&accepted(nonce, 2));
                nonce += 1;
            }
            reports.push(aggregator.report(start + Duration::from_secs(second)));
        }
        let tps = reports.last().unwrap().tps;
        assert!(reports.windows(2).all(|pair| pair[0].tps <= pair[1].tps));
        assert!((tps - 100.0).abs() / 100.0 < 0.05, "tps {tps} did not converge");
    }

    #[test]
    fn counts_by_status() {
        let mut aggregator = StatsAggregator::new(Duration::from_secs(1));
        for nonce in 0..5 {
            aggregator.observe(&pending(nonce));
        }
        aggregator.observe(&accepted(0, 1));
        aggregator.observe(&accepted(1, 3));
        aggregator.observe(&pending(5).reject(&RpcRejection { code: -32000, message: "x".into() }));
        let mut abandoned = pending(2);
        abandoned.abandon(60);
        aggregator.observe(&abandoned);

        let stats = aggregator.stats();
        assert_eq!(stats.submitted, 6);
        assert_eq!(stats.confirmed, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!((stats.rejected, stats.abandoned), (1, 1));
        assert_eq!(stats.backlog(), 2);
        assert_eq!(stats.average_latency(), Some(TimeDelta::seconds(2)));
        assert_eq!(stats.latency_min, Some(TimeDelta::seconds(1)));
        assert_eq!(stats.latency_max, Some(TimeDelta::seconds(3)));
    }

    #[test]
    fn summary_ratios() {
        let start = Instant::now();
        let mut aggregator = StatsAggregator::starting_at(Duration::from_secs(1), start);
        for nonce in 0..4 {
            aggregator.observe(&pending(nonce));
        }
        for nonce in 0..3 {
            aggregator.observe(&accepted(nonce, 0));
        }

        let summary = aggregator.summary(start + Duration::from_secs(2));
        assert_eq!(summary.success_ratio, 0.75);
        assert_eq!(summary.average_tps, 1.5);
        assert_eq!(summary.data_quality_warnings, 3);
        assert!(summary.to_string().contains("success ratio:  75.00%"));
    }

    #[test]
    fn empty_summary() {
        let start = Instant::now();
        let summary = StatsAggregator::starting_at(Duration::from_secs(1), start).summary(start);
        assert_eq!(summary.success_ratio, 0.0);
        assert_eq!(summary.average_tps, 0.0);
        assert_eq!(summary.average_latency, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_drains_until_producers_close() {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(StatsAggregator::new(Duration::from_secs(1)).run(rx));

        for nonce in 0..3 {
            tx.send(pending(nonce)).await.unwrap();
        }
        tokio::time::sleep(Duration::from_secs(3)).await;
        tx.send(accepted(0, 1)).await.unwrap();
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.submitted, 3);
        assert_eq!(summary.confirmed, 1);
        assert_eq!(summary.elapsed, Duration::from_secs(3));
    }
}
