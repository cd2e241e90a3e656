//! The error currency threaded through every module in this crate.

use crate::model::{ChainKey, Network};

/// Errors produced by the deposit tracker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A chain adapter's RPC call failed after exhausting its retry budget.
    #[error("rpc call to {chain}/{network} failed after retries: {source}")]
    Rpc {
        /// Chain the failing adapter belongs to.
        chain: ChainKey,
        /// Network the failing adapter belongs to.
        network: Network,
        /// Underlying transport error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A requested block does not exist (yet) on the chain.
    #[error("block {height} not found on {chain}/{network}")]
    MissingBlock {
        /// Chain queried.
        chain: ChainKey,
        /// Network queried.
        network: Network,
        /// Height requested.
        height: u64,
    },

    /// The RPC response could not be decoded into a normalized shape.
    #[error("malformed response from {chain}/{network}: {message}")]
    MalformedResponse {
        /// Chain queried.
        chain: ChainKey,
        /// Network queried.
        network: Network,
        /// Human-readable description of what was wrong.
        message: String,
    },

    /// The checkpoint read back after a write did not match what was written.
    #[error("checkpoint verify-after-write mismatch on {chain}/{network}: wrote {written}, read back {read}")]
    CheckpointMismatch {
        /// Chain whose checkpoint failed to verify.
        chain: ChainKey,
        /// Network whose checkpoint failed to verify.
        network: Network,
        /// The height that was written.
        written: u64,
        /// The height that was read back.
        read: u64,
    },

    /// No active token configuration matches an otherwise-valid transfer.
    /// Not fatal: the transfer is simply not a tracked asset.
    #[error("no active token found for transfer on {chain}/{network}")]
    TokenNotFound {
        /// Chain of the transfer.
        chain: ChainKey,
        /// Network of the transfer.
        network: Network,
    },

    /// A single-active-token chain (BTC, XRP) has no active token row at
    /// all, as opposed to [`Error::TokenNotFound`]'s "this transfer isn't
    /// a tracked asset". Fatal configuration error (spec.md §4.4 point 4);
    /// aborts the tick rather than being swallowed per-transfer.
    #[error("no active token configured for {chain}/{network}; check token configuration")]
    ActiveTokenMissing {
        /// Chain missing its single active token.
        chain: ChainKey,
        /// Network missing its single active token.
        network: Network,
    },

    /// A configuration value was missing or invalid at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Error propagated from the `config` crate while building `Settings`.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(#[from] ::config::ConfigError),

    /// Error from the storage gateway.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// Error converting a raw chain amount into a decimal.
    #[error("amount decode error: {0}")]
    Decimal(#[from] rust_decimal::Error),

    /// Error decoding a JSON RPC payload.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error performing an HTTP request against a chain's RPC endpoint.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Error from the Bitcoin Core RPC client.
    #[error("bitcoin rpc error: {0}")]
    BitcoinRpc(#[from] bitcoincore_rpc::Error),

    /// Error establishing or using the XRP Ledger websocket connection.
    #[error("xrp websocket error: {0}")]
    Websocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Adapter initialization failed for a `(chain, network)` pair at
    /// startup. The pair is excluded from the run set; not retried.
    #[error("adapter init failed for {chain}/{network}: {message}")]
    AdapterInit {
        /// Chain that failed to initialize.
        chain: ChainKey,
        /// Network that failed to initialize.
        network: Network,
        /// Human-readable description of the failure.
        message: String,
    },

    /// The shutdown signal channel closed unexpectedly.
    #[error("signal channel closed")]
    SignalChannelClosed,

    /// An I/O error at the process boundary (signal handling, metrics
    /// exporter bind).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build a [`Error::Rpc`] from any transport error, attaching chain
    /// context at the adapter boundary.
    pub fn rpc(
        chain: ChainKey,
        network: Network,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Error::Rpc {
            chain,
            network,
            source: Box::new(source),
        }
    }

    /// A short, stable label for the `kind` tag on
    /// `chain_adapter_errors_total` (SPEC_FULL.md §9.5).
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Rpc { .. } => "rpc",
            Error::MissingBlock { .. } => "missing_block",
            Error::MalformedResponse { .. } => "malformed_response",
            Error::CheckpointMismatch { .. } => "checkpoint_mismatch",
            Error::TokenNotFound { .. } => "token_not_found",
            Error::ActiveTokenMissing { .. } => "active_token_missing",
            Error::Config(_) | Error::ConfigLoad(_) => "config",
            Error::Storage(_) => "storage",
            Error::Decimal(_) => "decimal",
            Error::Json(_) => "json",
            Error::Http(_) => "http",
            Error::BitcoinRpc(_) => "bitcoin_rpc",
            Error::Websocket(_) => "websocket",
            Error::AdapterInit { .. } => "init",
            Error::SignalChannelClosed => "signal_channel_closed",
            Error::Io(_) => "io",
        }
    }
}
