//! Configuration loading and validation.
//!
//! Settings are loaded from an optional TOML file plus `TRACKER_`-prefixed
//! environment variable overrides, the same layering the signer crate uses
//! via the `config` crate.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::model::{ChainKey, ChainTarget, Network};

/// Per-`(chain, network)` RPC connection settings. The fields that apply
/// vary by chain family; unused fields are simply left `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainEndpoint {
    /// Whether this `(chain, network)` pair should be monitored at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// HTTP(S) JSON-RPC URL (EVM, Bitcoin, Tron) or WebSocket URL (XRP,
    /// optionally EVM for push-mode subscription).
    pub rpc_url: String,
    /// Optional WebSocket URL for push-mode subscription (EVM only). When
    /// absent, the pipeline falls back to polling `tipHeight`.
    pub ws_url: Option<String>,
    /// HTTP basic-auth username, for Bitcoin Core RPC.
    pub rpc_user: Option<String>,
    /// HTTP basic-auth password, for Bitcoin Core RPC.
    pub rpc_password: Option<String>,
    /// `TRON-PRO-API-KEY` header value, for Tron's HTTP API.
    pub api_key: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Per-chain-family processing delay (between blocks) and tick interval
/// (pull mode), in milliseconds. Defaults match spec.md §6.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Timing {
    /// Sleep between processing consecutive blocks, milliseconds.
    pub block_delay_ms: u64,
    /// Pull-mode timer period, milliseconds.
    pub check_interval_ms: u64,
}

/// Required confirmation counts, mainnet and testnet, for one chain
/// family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfirmationRequirement {
    /// Confirmations required on mainnet.
    pub mainnet: u64,
    /// Confirmations required on testnet.
    pub testnet: u64,
}

impl ConfirmationRequirement {
    /// The required confirmation count for a given network.
    pub fn for_network(&self, network: Network) -> u64 {
        match network {
            Network::Mainnet => self.mainnet,
            Network::Testnet => self.testnet,
        }
    }
}

/// Top-level settings for the tracker daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Database connection string for the storage gateway.
    pub database_url: String,
    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Whether to install the Prometheus metrics recorder/exporter.
    #[serde(default)]
    pub metrics_enabled: bool,
    /// RPC endpoints, keyed by `"{chain}_{network}"`, e.g. `"eth_mainnet"`.
    pub endpoints: HashMap<String, ChainEndpoint>,
    /// Per-chain-family timing. Defaults applied per spec.md §6 when a
    /// chain is absent from this map.
    #[serde(default)]
    pub timing: HashMap<String, Timing>,
    /// Per-chain-family confirmation requirements. Defaults applied per
    /// spec.md §6 when a chain is absent from this map.
    #[serde(default)]
    pub confirmations: HashMap<String, ConfirmationRequirement>,
    /// Bitcoin pull-mode batch size (blocks per tick). Default 50.
    #[serde(default = "default_btc_batch_size")]
    pub btc_batch_size: u64,
    /// Tron pull-mode batch size (blocks per tick). Default 5.
    #[serde(default = "default_trx_batch_size")]
    pub trx_batch_size: u64,
    /// RPC call timeout, seconds. Default 30.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
}

fn default_btc_batch_size() -> u64 {
    50
}

fn default_trx_batch_size() -> u64 {
    5
}

fn default_rpc_timeout_secs() -> u64 {
    30
}

/// Log output format, selectable via `--log-format` or config.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable, ANSI-colored output. Default for local development.
    #[default]
    Pretty,
    /// Newline-delimited JSON, for log aggregation.
    Json,
}

impl Settings {
    /// Load settings from an optional TOML file plus `TRACKER_`-prefixed
    /// environment variable overrides.
    pub fn load(path: Option<&str>) -> Result<Self, Error> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::with_name(path));
        }
        builder = builder.add_source(
            ::config::Environment::with_prefix("TRACKER")
                .separator("__")
                .try_parsing(true),
        );
        let settings: Settings = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Eagerly validate that every enabled `(chain, network)` pair has a
    /// non-empty RPC endpoint configured. Run at startup so
    /// misconfiguration is a startup error, not a runtime surprise.
    pub fn validate(&self) -> Result<(), Error> {
        for target in self.enabled_targets() {
            let key = endpoint_key(target.chain, target.network);
            let endpoint = self.endpoints.get(&key).expect("enabled_targets only returns present keys");
            if endpoint.rpc_url.trim().is_empty() {
                return Err(Error::Config(format!(
                    "no rpc endpoint configured for enabled chain {target}"
                )));
            }
        }
        Ok(())
    }

    /// All `(chain, network)` pairs with `enabled = true` in their
    /// endpoint entry. Chains with no endpoint entry at all are
    /// considered disabled.
    pub fn enabled_targets(&self) -> Vec<ChainTarget> {
        let mut targets = Vec::new();
        for chain in ChainKey::ALL {
            for network in [Network::Mainnet, Network::Testnet] {
                let key = endpoint_key(chain, network);
                if self.endpoints.get(&key).is_some_and(|e| e.enabled) {
                    targets.push(ChainTarget::new(chain, network));
                }
            }
        }
        targets
    }

    /// The endpoint configuration for a target, if any.
    pub fn endpoint(&self, target: ChainTarget) -> Option<&ChainEndpoint> {
        self.endpoints.get(&endpoint_key(target.chain, target.network))
    }

    /// The timing for a chain family, falling back to the spec.md §6
    /// defaults.
    pub fn timing(&self, chain: ChainKey) -> Timing {
        self.timing.get(chain.as_str()).copied().unwrap_or_else(|| default_timing(chain))
    }

    /// The confirmation requirement for a chain family, falling back to
    /// the spec.md §6 defaults.
    pub fn confirmation_requirement(&self, chain: ChainKey) -> ConfirmationRequirement {
        self.confirmations
            .get(chain.as_str())
            .copied()
            .unwrap_or_else(|| default_confirmation_requirement(chain))
    }
}

fn endpoint_key(chain: ChainKey, network: Network) -> String {
    format!("{chain}_{network}")
}

/// Default processing delay / check interval per chain family, per
/// spec.md §6.
fn default_timing(chain: ChainKey) -> Timing {
    match chain {
        ChainKey::Eth => Timing { block_delay_ms: 1000, check_interval_ms: 30_000 },
        ChainKey::Bsc => Timing { block_delay_ms: 500, check_interval_ms: 30_000 },
        ChainKey::Btc => Timing { block_delay_ms: 2000, check_interval_ms: 120_000 },
        ChainKey::Trx => Timing { block_delay_ms: 5000, check_interval_ms: 10_000 },
        ChainKey::Xrp => Timing { block_delay_ms: 2000, check_interval_ms: 30_000 },
    }
}

/// Default required confirmations per chain family, per spec.md §6.
fn default_confirmation_requirement(chain: ChainKey) -> ConfirmationRequirement {
    match chain {
        ChainKey::Eth => ConfirmationRequirement { mainnet: 12, testnet: 5 },
        ChainKey::Bsc => ConfirmationRequirement { mainnet: 15, testnet: 6 },
        ChainKey::Btc => ConfirmationRequirement { mainnet: 3, testnet: 2 },
        ChainKey::Trx => ConfirmationRequirement { mainnet: 20, testnet: 10 },
        ChainKey::Xrp => ConfirmationRequirement { mainnet: 4, testnet: 2 },
    }
}
