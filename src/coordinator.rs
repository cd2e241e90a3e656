//! Coordinator: owns the lifecycle of every Chain Monitor. See spec.md
//! §4.1.
//!
//! Adapter construction is chain-family-specific (each family has its own
//! `ChainAdapter` implementation), so monitors are spawned as independent
//! tasks rather than held in one homogeneous collection — the same shape
//! the signer crate uses for its per-component tokio tasks in the main
//! binary, just generalized to a dynamic, config-driven set of targets
//! instead of a fixed list.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::chains::bitcoin::BitcoinAdapter;
use crate::chains::evm::EvmAdapter;
use crate::chains::tron::TronAdapter;
use crate::chains::xrp::XrpAdapter;
use crate::chains::{test_connection, ChainAdapter, ConnectionStatus};
use crate::config::Settings;
use crate::context::{AppContext, TerminationHandle};
use crate::error::Error;
use crate::model::{ChainKey, ChainTarget};
use crate::monitor::ChainMonitor;
use crate::storage::Storage;

/// Owns every running Chain Monitor task and the shared shutdown signal.
pub struct Coordinator<S> {
    context: AppContext<S>,
    settings: Arc<Settings>,
    handles: Vec<(ChainTarget, JoinHandle<Result<(), Error>>)>,
}

impl<S> Coordinator<S>
where
    S: Storage + Clone + 'static,
{
    /// Build a coordinator over a storage gateway and its settings.
    pub fn new(settings: Settings, storage: S) -> Self {
        let settings = Arc::new(settings);
        let context = AppContext::new((*settings).clone(), storage);
        Self {
            context,
            settings,
            handles: Vec::new(),
        }
    }

    /// Instantiate an adapter for every enabled `(chain, network)` pair
    /// and spawn its monitor. A pair whose adapter fails to initialize is
    /// logged and excluded from the run set for the lifetime of the
    /// process (spec.md §4.1 Failure) rather than aborting startup.
    ///
    /// Returns once every spawned monitor has signalled readiness (its
    /// first adapter probe and checkpoint load have completed; see
    /// [`ChainMonitor::run`]), per spec.md §4.1.
    pub async fn start(&mut self) {
        let mut ready_rxs = Vec::new();

        for target in self.settings.enabled_targets() {
            let Some(endpoint) = self.settings.endpoint(target) else {
                continue;
            };
            let rpc_timeout = std::time::Duration::from_secs(self.settings.rpc_timeout_secs);

            let spawned = match target.chain {
                ChainKey::Eth | ChainKey::Bsc => EvmAdapter::new(
                    target.chain,
                    target.network,
                    endpoint.rpc_url.clone(),
                    rpc_timeout,
                )
                .map(|adapter| self.spawn(adapter)),
                ChainKey::Btc => BitcoinAdapter::new(
                    target.network,
                    &endpoint.rpc_url,
                    endpoint.rpc_user.clone(),
                    endpoint.rpc_password.clone(),
                )
                .map(|adapter| self.spawn(adapter)),
                ChainKey::Trx => TronAdapter::new(
                    target.network,
                    endpoint.rpc_url.clone(),
                    endpoint.api_key.clone(),
                    rpc_timeout,
                )
                .map(|adapter| self.spawn(adapter)),
                ChainKey::Xrp => Ok(self.spawn(XrpAdapter::new(target.network, endpoint.rpc_url.clone()))),
            };

            match spawned {
                Ok((handle, ready_rx)) => {
                    info!(%target, "chain monitor started");
                    self.handles.push((target, handle));
                    ready_rxs.push(ready_rx);
                }
                Err(error) => {
                    error!(%target, %error, "adapter initialization failed; excluding target from this run");
                    crate::metrics::adapter_error(target.chain, target.network, error.kind());
                }
            }
        }

        for ready_rx in ready_rxs {
            // A closed sender means the monitor task ended (panicked)
            // before signalling; nothing more to wait for on its behalf.
            let _ = ready_rx.await;
        }
    }

    fn spawn<A>(&self, adapter: A) -> (JoinHandle<Result<(), Error>>, oneshot::Receiver<()>)
    where
        A: ChainAdapter + 'static,
    {
        let monitor = ChainMonitor::new(adapter, self.context.storage().clone());
        let settings = Arc::clone(&self.settings);
        let term = self.context.termination_handle();
        let (ready_tx, ready_rx) = oneshot::channel();
        let handle = tokio::spawn(async move { monitor.run(&settings, term, ready_tx).await });
        (handle, ready_rx)
    }

    /// Broadcast shutdown and wait for every monitor to drain its
    /// in-flight block and persist its checkpoint.
    pub async fn stop(self) {
        if let Err(error) = self.context.signal_shutdown() {
            error!(%error, "failed to signal shutdown");
        }
        for (target, handle) in self.handles {
            match handle.await {
                Ok(Ok(())) => info!(%target, "chain monitor stopped cleanly"),
                Ok(Err(error)) => error!(%target, %error, "chain monitor exited with error"),
                Err(join_error) => error!(%target, %join_error, "chain monitor task panicked"),
            }
        }
    }

    /// A termination handle observing this coordinator's shutdown signal,
    /// for wiring to e.g. a `ctrl_c` listener in the binary entry point.
    pub fn termination_handle(&self) -> TerminationHandle {
        self.context.termination_handle()
    }
}

/// Probe every enabled `(chain, network)` pair with `testConnection`
/// (spec.md §9 "Operational surface") and return each result without
/// starting any monitor. Backs the `check` CLI subcommand.
pub async fn check_all(settings: &Settings) -> Vec<(ChainTarget, Result<ConnectionStatus, Error>)> {
    let mut results = Vec::new();
    for target in settings.enabled_targets() {
        let Some(endpoint) = settings.endpoint(target) else {
            continue;
        };
        let rpc_timeout = std::time::Duration::from_secs(settings.rpc_timeout_secs);

        let result = async {
            match target.chain {
                ChainKey::Eth | ChainKey::Bsc => {
                    let adapter = EvmAdapter::new(target.chain, target.network, endpoint.rpc_url.clone(), rpc_timeout)?;
                    test_connection(&adapter).await
                }
                ChainKey::Btc => {
                    let adapter = BitcoinAdapter::new(
                        target.network,
                        &endpoint.rpc_url,
                        endpoint.rpc_user.clone(),
                        endpoint.rpc_password.clone(),
                    )?;
                    test_connection(&adapter).await
                }
                ChainKey::Trx => {
                    let adapter =
                        TronAdapter::new(target.network, endpoint.rpc_url.clone(), endpoint.api_key.clone(), rpc_timeout)?;
                    test_connection(&adapter).await
                }
                ChainKey::Xrp => {
                    let adapter = XrpAdapter::new(target.network, endpoint.rpc_url.clone());
                    test_connection(&adapter).await
                }
            }
        }
        .await;

        results.push((target, result));
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use std::collections::HashMap;

    fn settings_with(chain_key: &str, rpc_url: &str) -> Settings {
        let mut endpoints = HashMap::new();
        endpoints.insert(
            format!("{chain_key}_mainnet"),
            crate::config::ChainEndpoint {
                enabled: true,
                rpc_url: rpc_url.to_string(),
                ws_url: None,
                rpc_user: None,
                rpc_password: None,
                api_key: None,
            },
        );
        Settings {
            database_url: "postgres://localhost/test".into(),
            log_format: Default::default(),
            metrics_enabled: false,
            endpoints,
            timing: HashMap::new(),
            confirmations: HashMap::new(),
            btc_batch_size: 50,
            trx_batch_size: 5,
            rpc_timeout_secs: 1,
        }
    }

    #[tokio::test]
    async fn starts_one_monitor_per_enabled_target_and_stops_cleanly() {
        // Adapter construction for both families here only builds an HTTP
        // client / in-memory fields; it never touches the network, so this
        // exercises spawn-and-shutdown without a live RPC endpoint.
        let mut settings = settings_with("eth", "http://127.0.0.1:0");
        settings.endpoints.insert(
            "xrp_mainnet".to_string(),
            crate::config::ChainEndpoint {
                enabled: true,
                rpc_url: "ws://127.0.0.1:0".to_string(),
                ws_url: None,
                rpc_user: None,
                rpc_password: None,
                api_key: None,
            },
        );
        let storage = MemoryStorage::new();
        let mut coordinator = Coordinator::new(settings, storage);

        coordinator.start().await;
        assert_eq!(coordinator.handles.len(), 2);

        coordinator.stop().await;
    }
}
