//! Command line arguments for the `evm-bench` binary.

use std::{path::PathBuf, time::Duration};

use alloy_primitives::{Address, U256};
use alloy_signer_local::PrivateKeySigner;
use clap::{Args, Parser, Subcommand};
use evm_bench::{
    Bench, BenchConfig, ConfigError, DEFAULT_RECIPIENT, Funder, KeyFile, TrackerConfig,
    TransferFunder, TransferTemplate, parse_private_key,
    transport::{RpcClient, SessionOptions, WsSession},
};
use evm_bench_cli_utils::{CliStyles, LogArgs, MetricsArgs};
use eyre::WrapErr;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use url::Url;

/// Load generator measuring throughput and confirmation latency of an EVM node.
#[derive(Debug, Parser)]
#[command(name = "evm-bench", version, about, styles = CliStyles::init())]
pub(crate) struct Cli {
    #[command(flatten)]
    pub(crate) log: LogArgs,

    #[command(flatten)]
    pub(crate) metrics: MetricsArgs,

    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Run a benchmark.
    Run(RunArgs),
    /// Create test accounts in a key file and optionally fund them.
    Accounts(AccountsArgs),
}

/// Where signing keys come from.
#[derive(Debug, Clone, Default, Args)]
#[command(next_help_heading = "Accounts")]
pub(crate) struct KeyArgs {
    /// Hex private keys, comma separated.
    #[arg(long = "private-key", env = "EVM_BENCH_PRIVATE_KEYS", value_delimiter = ',')]
    pub(crate) private_keys: Vec<String>,

    /// File of hex private keys, one per line.
    #[arg(long = "key-file", env = "EVM_BENCH_KEY_FILE")]
    pub(crate) key_file: Option<PathBuf>,

    /// Keys to use from the key file; missing ones are generated and appended.
    #[arg(long = "accounts", env = "EVM_BENCH_ACCOUNTS", requires = "key_file")]
    pub(crate) accounts: Option<usize>,
}

impl KeyArgs {
    /// Inline keys followed by key file keys.
    pub(crate) fn load(&self) -> eyre::Result<Vec<PrivateKeySigner>> {
        let mut keys = self
            .private_keys
            .iter()
            .filter(|key| !key.trim().is_empty())
            .map(|key| parse_private_key(key))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(path) = &self.key_file {
            let file = KeyFile::new(path);
            let loaded = match self.accounts {
                Some(count) => file.provision(count),
                None => file.load(),
            }
            .wrap_err_with(|| format!("failed to read keys from {}", path.display()))?;
            keys.extend(loaded);
        }

        if keys.is_empty() {
            return Err(ConfigError::NoAccounts.into());
        }
        Ok(keys)
    }
}

/// Shape of the benchmark transfers.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Transfers")]
pub(crate) struct TransferArgs {
    /// Transfer recipient.
    #[arg(long = "recipient", env = "EVM_BENCH_RECIPIENT", default_value_t = DEFAULT_RECIPIENT)]
    pub(crate) recipient: Address,

    /// Transfer value in wei.
    #[arg(long = "value", env = "EVM_BENCH_VALUE", default_value = "1000000000")]
    pub(crate) value: U256,

    /// Gas limit per transfer.
    #[arg(long = "gas-limit", env = "EVM_BENCH_GAS_LIMIT", default_value_t = 42_000)]
    pub(crate) gas_limit: u64,

    /// Gas price in wei.
    #[arg(long = "gas-price", env = "EVM_BENCH_GAS_PRICE", default_value_t = 100)]
    pub(crate) gas_price: u128,
}

impl From<&TransferArgs> for TransferTemplate {
    fn from(args: &TransferArgs) -> Self {
        Self {
            to: args.recipient,
            value: args.value,
            gas_limit: args.gas_limit,
            gas_price: args.gas_price,
        }
    }
}

/// Confirmation tracker tuning.
#[derive(Debug, Clone, Args)]
#[command(next_help_heading = "Tracker")]
pub(crate) struct TrackerArgs {
    /// Delay before looking up a transaction that was not yet included, in milliseconds.
    #[arg(long = "tracker.backoff-ms", env = "EVM_BENCH_TRACKER_BACKOFF_MS", default_value_t = 1_000)]
    pub(crate) backoff_ms: u64,

    /// Lookups per transaction before it is abandoned.
    #[arg(long = "tracker.max-attempts", env = "EVM_BENCH_TRACKER_MAX_ATTEMPTS", default_value_t = 60)]
    pub(crate) max_attempts: u32,

    /// Transactions waiting for a retry before the tracker stops taking new ones.
    #[arg(long = "tracker.queue-capacity", env = "EVM_BENCH_TRACKER_QUEUE_CAPACITY", default_value_t = 10_000)]
    pub(crate) queue_capacity: usize,
}

impl From<&TrackerArgs> for TrackerConfig {
    fn from(args: &TrackerArgs) -> Self {
        Self {
            retry_backoff: Duration::from_millis(args.backoff_ms),
            max_attempts: args.max_attempts,
            queue_capacity: args.queue_capacity,
            ..Self::default()
        }
    }
}

/// Arguments of `evm-bench run`.
#[derive(Debug, Clone, Args)]
pub(crate) struct RunArgs {
    /// Websocket endpoints, comma separated; workers are spread across them.
    #[arg(
        long = "ws-url",
        env = "EVM_BENCH_WS_URL",
        default_value = "ws://127.0.0.1:8546",
        value_delimiter = ','
    )]
    pub(crate) endpoints: Vec<Url>,

    /// Base URL serving `/num_unconfirmed_txs`, e.g. `http://127.0.0.1:26657`.
    #[arg(long = "metrics-url", env = "EVM_BENCH_METRICS_URL")]
    pub(crate) metrics_url: Option<Url>,

    /// Expected chain id.
    #[arg(long = "chain-id", env = "EVM_BENCH_CHAIN_ID", default_value_t = 5151)]
    pub(crate) chain_id: u64,

    /// Injector/tracker pairs.
    #[arg(long = "workers", env = "EVM_BENCH_WORKERS", default_value_t = 1)]
    pub(crate) workers: usize,

    /// Pending pool size above which no more transactions are submitted.
    #[arg(long = "max-pending", env = "EVM_BENCH_MAX_PENDING", default_value_t = 7_000)]
    pub(crate) max_pending: u64,

    /// Injection duration in seconds.
    #[arg(long = "duration", env = "EVM_BENCH_DURATION", default_value_t = 120)]
    pub(crate) duration_secs: u64,

    /// Largest number of transactions submitted per cycle.
    #[arg(long = "burst", env = "EVM_BENCH_BURST", default_value_t = 400)]
    pub(crate) burst_size: u64,

    /// Pause between cycles in milliseconds.
    #[arg(long = "poll-interval-ms", env = "EVM_BENCH_POLL_INTERVAL_MS", default_value_t = 1_000)]
    pub(crate) poll_interval_ms: u64,

    /// Stats report cadence in milliseconds.
    #[arg(long = "report-interval-ms", env = "EVM_BENCH_REPORT_INTERVAL_MS", default_value_t = 1_000)]
    pub(crate) report_interval_ms: u64,

    /// Websocket idle deadline in seconds.
    #[arg(long = "idle-timeout", env = "EVM_BENCH_IDLE_TIMEOUT", default_value_t = 120)]
    pub(crate) idle_timeout_secs: u64,

    /// Reconnect-and-retry budget per step.
    #[arg(long = "max-retries", env = "EVM_BENCH_MAX_RETRIES", default_value_t = 5)]
    pub(crate) max_transport_retries: u32,

    #[command(flatten)]
    pub(crate) keys: KeyArgs,

    #[command(flatten)]
    pub(crate) transfer: TransferArgs,

    #[command(flatten)]
    pub(crate) tracker: TrackerArgs,
}

impl TryFrom<&RunArgs> for BenchConfig {
    type Error = ConfigError;

    fn try_from(args: &RunArgs) -> Result<Self, Self::Error> {
        let config = args
            .endpoints
            .iter()
            .cloned()
            .fold(Self::default(), Self::with_endpoint)
            .with_metrics_url(args.metrics_url.clone())
            .with_chain_id(args.chain_id)
            .with_workers(args.workers)
            .with_ceiling(args.max_pending)
            .with_duration(Duration::from_secs(args.duration_secs))
            .with_burst_size(args.burst_size)
            .with_poll_interval(Duration::from_millis(args.poll_interval_ms))
            .with_report_interval(Duration::from_millis(args.report_interval_ms))
            .with_idle_timeout(Duration::from_secs(args.idle_timeout_secs))
            .with_max_transport_retries(args.max_transport_retries)
            .with_transfer((&args.transfer).into())
            .with_tracker((&args.tracker).into());
        config.validate()?;
        Ok(config)
    }
}

impl RunArgs {
    async fn run(self) -> eyre::Result<()> {
        let config = BenchConfig::try_from(&self)?;
        let keys = self.keys.load()?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("ctrl-c received, stopping injection");
                token.cancel();
            }
        });

        let report = Bench::new(config, keys).run(shutdown).await?;
        println!("{}", report.summary);
        Ok(())
    }
}

/// Arguments of `evm-bench accounts`.
#[derive(Debug, Clone, Args)]
pub(crate) struct AccountsArgs {
    /// Key file to create or extend.
    #[arg(long = "key-file", env = "EVM_BENCH_KEY_FILE")]
    pub(crate) key_file: PathBuf,

    /// Number of accounts the key file should hold.
    #[arg(long = "count", default_value_t = 10)]
    pub(crate) count: usize,

    /// Key paying for the funding transfers. Accounts are only funded when set.
    #[arg(long = "funder-key", env = "EVM_BENCH_FUNDER_KEY", requires = "fund_amount")]
    pub(crate) funder_key: Option<String>,

    /// Wei sent to every account.
    #[arg(long = "fund-amount", env = "EVM_BENCH_FUND_AMOUNT")]
    pub(crate) fund_amount: Option<U256>,

    /// Websocket endpoint used for funding.
    #[arg(long = "ws-url", env = "EVM_BENCH_WS_URL", default_value = "ws://127.0.0.1:8546")]
    pub(crate) endpoint: Url,

    /// Expected chain id.
    #[arg(long = "chain-id", env = "EVM_BENCH_CHAIN_ID", default_value_t = 5151)]
    pub(crate) chain_id: u64,

    /// Gas price of funding transfers in wei.
    #[arg(long = "gas-price", env = "EVM_BENCH_GAS_PRICE", default_value_t = 100)]
    pub(crate) gas_price: u128,
}

impl AccountsArgs {
    async fn run(self) -> eyre::Result<()> {
        let keys = KeyFile::new(&self.key_file)
            .provision(self.count)
            .wrap_err_with(|| format!("failed to provision {}", self.key_file.display()))?;
        let addresses: Vec<Address> = keys.iter().map(|key| key.address()).collect();
        for address in &addresses {
            println!("{address}");
        }

        let (Some(funder_key), Some(amount)) = (&self.funder_key, self.fund_amount) else {
            return Ok(());
        };
        let funder_key = parse_private_key(funder_key)?;

        let session = WsSession::connect(self.endpoint.clone(), SessionOptions::default())
            .await
            .wrap_err_with(|| format!("failed to connect to {}", self.endpoint))?;
        let mut client = RpcClient::new(session);
        let actual = client.chain_id().await?;
        if actual != self.chain_id {
            return Err(ConfigError::ChainIdMismatch { expected: self.chain_id, actual }.into());
        }

        let mut funder =
            TransferFunder::new(client, funder_key, self.chain_id).with_gas_price(self.gas_price);
        let outcomes = funder.fund(&addresses, amount).await.wrap_err("funding failed")?;

        let mut failed = 0;
        for outcome in &outcomes {
            match &outcome.result {
                Ok(funded) => {
                    info!(address = %outcome.address, tx = %funded.tx_hash, block = funded.block, "account funded")
                }
                Err(error) => {
                    failed += 1;
                    warn!(address = %outcome.address, %error, "account not funded");
                }
            }
        }
        if failed > 0 {
            eyre::bail!("{failed} of {} accounts were not funded", outcomes.len());
        }
        Ok(())
    }
}

impl Cli {
    /// Runs the selected subcommand.
    pub(crate) async fn run(self) -> eyre::Result<()> {
        match self.command {
            Command::Run(args) => args.run().await,
            Command::Accounts(args) => args.run().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;
    use rstest::rstest;
    use tempfile::tempdir;

    use super::*;

    const ANVIL_KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn parse(args: &[&str]) -> Cli {
        Cli::parse_from(std::iter::once("evm-bench").chain(args.iter().copied()))
    }

    fn run_args(args: &[&str]) -> RunArgs {
        match parse(&[&["run"][..], args].concat()).command {
            Command::Run(args) => args,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn run_defaults() {
        let config = BenchConfig::try_from(&run_args(&[])).unwrap();

        assert_eq!(config.endpoints, vec![Url::parse("ws://127.0.0.1:8546").unwrap()]);
        assert_eq!(config.chain_id, 5151);
        assert_eq!(config.ceiling, 7_000);
        assert_eq!(config.burst_size, 400);
        assert_eq!(config.duration, Duration::from_secs(120));
        assert_eq!(config.transfer, TransferTemplate::default());
        assert_eq!(config.tracker, TrackerConfig::default());
        assert!(config.metrics_url.is_none());
    }

    #[test]
    fn run_overrides() {
        let args = run_args(&[
            "--ws-url",
            "ws://a:1,ws://b:2",
            "--metrics-url",
            "http://127.0.0.1:26657",
            "--workers",
            "4",
            "--max-pending",
            "500",
            "--tracker.max-attempts",
            "3",
            "--gas-price",
            "7",
        ]);
        let config = BenchConfig::try_from(&args).unwrap();

        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoint_for(3).unwrap().as_str(), "ws://b:2/");
        assert_eq!(config.workers, 4);
        assert_eq!(config.ceiling, 500);
        assert_eq!(config.tracker.max_attempts, 3);
        assert_eq!(config.transfer.gas_price, 7);
    }

    #[rstest]
    #[case::http_endpoint(&["--ws-url", "http://127.0.0.1:8545"])]
    #[case::zero_workers(&["--workers", "0"])]
    #[case::zero_burst(&["--burst", "0"])]
    #[case::ws_metrics_url(&["--metrics-url", "ws://127.0.0.1:26657"])]
    fn invalid_run_args(#[case] args: &[&str]) {
        assert!(BenchConfig::try_from(&run_args(args)).is_err());
    }

    #[test]
    fn keys_from_flag_and_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        let path_arg = path.to_str().unwrap();

        let args = run_args(&["--private-key", ANVIL_KEY, "--key-file", path_arg, "--accounts", "2"]);
        let keys = args.keys.load().unwrap();
        assert_eq!(keys.len(), 3);
        assert_eq!(KeyFile::new(&path).load().unwrap().len(), 2);
    }

    #[test]
    fn no_keys_is_an_error() {
        let error = KeyArgs::default().load().unwrap_err();
        assert!(matches!(error.downcast_ref::<ConfigError>(), Some(ConfigError::NoAccounts)));
    }

    #[test]
    fn accounts_subcommand() {
        let cli = parse(&["accounts", "--key-file", "keys.txt", "--count", "3"]);
        let Command::Accounts(args) = cli.command else { panic!("expected accounts") };
        assert_eq!(args.count, 3);
        assert!(args.funder_key.is_none());
    }
}
