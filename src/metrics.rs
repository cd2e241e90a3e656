//! Centralized metric names and recording helpers. Every counter/gauge
//! name used anywhere in the crate is defined here once, matching the
//! signer crate's convention of a single `metrics` module rather than
//! ad-hoc string literals scattered at call sites.

use crate::model::{ChainKey, Network};

const DEPOSITS_INSERTED_TOTAL: &str = "deposits_inserted_total";
const BLOCKS_PROCESSED_TOTAL: &str = "blocks_processed_total";
const CHECKPOINT_HEIGHT: &str = "checkpoint_height";
const CHAIN_ADAPTER_ERRORS_TOTAL: &str = "chain_adapter_errors_total";
const LEDGER_CREDIT_FAILURES_TOTAL: &str = "ledger_credit_failures_total";

/// Install the process-wide Prometheus recorder and start its HTTP
/// exporter. Call once at startup when `Settings::metrics_enabled`.
pub fn install_recorder(listen_addr: std::net::SocketAddr) -> Result<(), crate::error::Error> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(listen_addr)
        .install()
        .map_err(|e| crate::error::Error::Config(format!("failed to install metrics recorder: {e}")))
}

/// Record one deposit insert for `(chain, network)`.
pub fn deposit_inserted(chain: ChainKey, network: Network) {
    metrics::counter!(
        DEPOSITS_INSERTED_TOTAL,
        "chain" => chain.as_str().to_string(),
        "network" => network.to_string(),
    )
    .increment(1);
}

/// Record one fully-processed block for `(chain, network)`.
pub fn block_processed(chain: ChainKey, network: Network) {
    metrics::counter!(
        BLOCKS_PROCESSED_TOTAL,
        "chain" => chain.as_str().to_string(),
        "network" => network.to_string(),
    )
    .increment(1);
}

/// Report the current checkpoint height for `(chain, network)`.
pub fn checkpoint_height(chain: ChainKey, network: Network, height: u64) {
    metrics::gauge!(
        CHECKPOINT_HEIGHT,
        "chain" => chain.as_str().to_string(),
        "network" => network.to_string(),
    )
    .set(height as f64);
}

/// Record one chain-adapter failure of `kind` for `(chain, network)`:
/// init, probe, or tick-ingestion failures. Not for storage-layer
/// credit failures; use [`credit_failure`] for those.
pub fn adapter_error(chain: ChainKey, network: Network, kind: &'static str) {
    metrics::counter!(
        CHAIN_ADAPTER_ERRORS_TOTAL,
        "chain" => chain.as_str().to_string(),
        "network" => network.to_string(),
        "kind" => kind,
    )
    .increment(1);
}

/// Record one confirmed-but-uncredited deposit for `(chain, network)`:
/// the status transition committed but the spot balance row was missing
/// (spec.md §7.5). A storage-layer condition, distinct from
/// [`adapter_error`]'s chain-adapter failures.
pub fn credit_failure(chain: ChainKey, network: Network) {
    metrics::counter!(
        LEDGER_CREDIT_FAILURES_TOTAL,
        "chain" => chain.as_str().to_string(),
        "network" => network.to_string(),
    )
    .increment(1);
}
