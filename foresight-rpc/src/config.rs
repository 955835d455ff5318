//! Configuration for the Foresight RPC proxy.

use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{Context, Result};

use crate::ethrpc::RetryPolicy;
use crate::wire::parse_address;

#[derive(Debug, Clone)]
pub struct Config {
    /// Upstream Ethereum RPC URL. Reads are proxied here and simulations run
    /// against it.
    pub upstream_rpc_url: String,

    /// Where approved requests are forwarded for signing. Defaults to the
    /// upstream node.
    pub signer_rpc_url: String,

    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Keep the cached latest block fresh with a polling loop
    pub block_polling_enabled: bool,

    pub block_polling_interval_ms: u64,

    /// Per-request HTTP timeout towards the node
    pub rpc_timeout_ms: u64,

    /// Retries for transient RPC failures
    pub rpc_retries: u32,

    /// Linear backoff step between retries
    pub rpc_backoff_ms: u64,

    /// Seconds between overlay blocks when a transaction asks for a new one
    pub default_block_time_secs: u64,

    /// Simulate every request as if sent by this address
    pub impersonation_address: Option<Address>,

    /// How long a confirmation may wait for a decision before it counts as
    /// rejected. 0 waits forever.
    pub confirmation_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let upstream_rpc_url = var("FORESIGHT_UPSTREAM_RPC", "http://127.0.0.1:8545");
        let impersonation_address = match lookup("FORESIGHT_IMPERSONATE") {
            Some(raw) if !raw.is_empty() => Some(
                parse_address(&raw).context("Invalid FORESIGHT_IMPERSONATE")?,
            ),
            _ => None,
        };

        Ok(Config {
            signer_rpc_url: lookup("FORESIGHT_SIGNER_RPC").unwrap_or_else(|| upstream_rpc_url.clone()),
            upstream_rpc_url,
            host: var("FORESIGHT_HOST", "127.0.0.1"),
            port: var("FORESIGHT_PORT", "8546")
                .parse()
                .context("Invalid FORESIGHT_PORT")?,
            block_polling_enabled: var("FORESIGHT_BLOCK_POLLING", "true")
                .parse()
                .unwrap_or(true),
            block_polling_interval_ms: var("FORESIGHT_POLL_INTERVAL_MS", "4000")
                .parse()
                .unwrap_or(4_000),
            rpc_timeout_ms: var("FORESIGHT_RPC_TIMEOUT_MS", "10000")
                .parse()
                .context("Invalid FORESIGHT_RPC_TIMEOUT_MS")?,
            rpc_retries: var("FORESIGHT_RPC_RETRIES", "3").parse().unwrap_or(3),
            rpc_backoff_ms: var("FORESIGHT_RPC_BACKOFF_MS", "250")
                .parse()
                .unwrap_or(250),
            default_block_time_secs: var("FORESIGHT_BLOCK_TIME_SECS", "12")
                .parse()
                .context("Invalid FORESIGHT_BLOCK_TIME_SECS")?,
            impersonation_address,
            confirmation_timeout_secs: var("FORESIGHT_CONFIRMATION_TIMEOUT_SECS", "0")
                .parse()
                .unwrap_or(0),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.rpc_retries,
            backoff: Duration::from_millis(self.rpc_backoff_ms),
        }
    }

    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.block_polling_interval_ms)
    }

    pub fn settings(&self) -> Settings {
        Settings {
            block_time_secs: self.default_block_time_secs,
            impersonation_address: self.impersonation_address,
            confirmation_timeout: (self.confirmation_timeout_secs > 0)
                .then(|| Duration::from_secs(self.confirmation_timeout_secs)),
        }
    }
}

/// The part of the configuration the engine and confirmation flow read.
/// Taken once at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub block_time_secs: u64,
    pub impersonation_address: Option<Address>,
    pub confirmation_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            block_time_secs: 12,
            impersonation_address: None,
            confirmation_timeout: None,
        }
    }
}
