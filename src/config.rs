//! Layered startup configuration (§10.3). `Cli` holds the handful of knobs that are
//! genuinely process-wide (bind address, sqlite path, log format); everything else
//! is a component config built from its own `Default`, with a few high-value knobs
//! threaded through from the environment. `AppConfig::load` is the single place
//! `main` calls to get a fully-populated, typed configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::data_mapper_cache::DataMapperCacheConfig;
use crate::orchestrator::OrchestratorConfig;
use crate::recovery::RecoveryEngineConfig;
use crate::storage::StorageConfig;
use crate::stream::StreamReceiverConfig;
use crate::symbol::SymbolCacheConfig;
use crate::transformer::TransformerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Process-wide flags, overridable by environment variable or `.env` (§10.3:
/// `dotenvy` for `.env`, `clap` with `env` for CLI/env precedence).
#[derive(Parser, Debug, Clone)]
#[command(name = "marketdata-gateway", about = "Market data gateway")]
pub struct Cli {
    #[arg(long, env = "GATEWAY_BIND_ADDR", default_value = "0.0.0.0:8080")]
    pub bind_addr: String,

    #[arg(long, env = "GATEWAY_METRICS_ADDR", default_value = "0.0.0.0:9100")]
    pub metrics_addr: String,

    #[arg(long, env = "GATEWAY_SQLITE_PATH", default_value = "marketdata-gateway.sqlite3")]
    pub sqlite_path: PathBuf,

    #[arg(long, env = "LOG_FORMAT", default_value = "compact")]
    pub log_format: String,

    /// Overrides `OrchestratorConfig::base_max_concurrent_operations` (§5).
    #[arg(long, env = "GATEWAY_MAX_CONCURRENT_OPERATIONS")]
    pub max_concurrent_operations: Option<usize>,

    /// Overrides `RecoveryEngineConfig::rate_limiter_qps` (§4.G).
    #[arg(long, env = "GATEWAY_RECOVERY_RATE_LIMITER_QPS")]
    pub recovery_rate_limiter_qps: Option<f64>,

    /// Upper bound on how long the graceful-shutdown drain phase waits before
    /// force-aborting remaining work (§5 "Cancellation & timeouts").
    #[arg(long, env = "GATEWAY_SHUTDOWN_TIMEOUT_SECS", default_value_t = 30)]
    pub graceful_shutdown_timeout_secs: u64,
}

pub struct AppConfig {
    pub bind_addr: String,
    pub metrics_addr: SocketAddr,
    pub sqlite_path: PathBuf,
    pub log_format: LogFormat,
    pub graceful_shutdown_timeout: std::time::Duration,
    pub storage: StorageConfig,
    pub symbol_cache: SymbolCacheConfig,
    pub data_mapper_cache: DataMapperCacheConfig,
    pub orchestrator: OrchestratorConfig,
    pub stream_receiver: StreamReceiverConfig,
    pub recovery_engine: RecoveryEngineConfig,
    pub transformer: TransformerConfig,
}

impl AppConfig {
    /// Loads `.env` (if present), parses `Cli` from args + environment, and layers
    /// the few tunable overrides on top of each component's `Default`.
    pub fn load() -> anyhow::Result<Self> {
        load_dotenv();
        let cli = Cli::parse();
        Ok(Self::from_cli(cli))
    }

    fn from_cli(cli: Cli) -> Self {
        let mut orchestrator = OrchestratorConfig::default();
        if let Some(max_ops) = cli.max_concurrent_operations {
            orchestrator.base_max_concurrent_operations = max_ops;
        }

        let mut recovery_engine = RecoveryEngineConfig::default();
        if let Some(qps) = cli.recovery_rate_limiter_qps {
            recovery_engine.rate_limiter_qps = qps;
        }

        let metrics_addr = cli
            .metrics_addr
            .parse()
            .unwrap_or_else(|_| "0.0.0.0:9100".parse().expect("fallback metrics address is valid"));

        Self {
            bind_addr: cli.bind_addr,
            metrics_addr,
            sqlite_path: cli.sqlite_path,
            log_format: LogFormat::parse(&cli.log_format),
            graceful_shutdown_timeout: std::time::Duration::from_secs(cli.graceful_shutdown_timeout_secs),
            storage: StorageConfig::default(),
            symbol_cache: SymbolCacheConfig::default(),
            data_mapper_cache: DataMapperCacheConfig::default(),
            orchestrator,
            stream_receiver: StreamReceiverConfig::default(),
            recovery_engine,
            transformer: TransformerConfig::default(),
        }
    }
}

/// Mirrors the teacher's multi-candidate `.env` search: the working directory and
/// its parent, so `cargo run` from either the workspace root or a subdirectory
/// still picks it up.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }
    if let Ok(cwd) = std::env::current_dir() {
        let _ = dotenvy::from_path(cwd.join("../.env"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_parse_cleanly() {
        let cli = Cli::parse_from(["marketdata-gateway"]);
        let config = AppConfig::from_cli(cli);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn explicit_overrides_win_over_component_defaults() {
        let cli = Cli::parse_from(["marketdata-gateway", "--max-concurrent-operations", "64", "--log-format", "json"]);
        let config = AppConfig::from_cli(cli);
        assert_eq!(config.orchestrator.base_max_concurrent_operations, 64);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
