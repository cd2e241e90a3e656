//! Chain Monitor: binds one Chain Adapter to the Block Ingestion Pipeline
//! and Confirmation Updater for a single `(chain, network)` target. See
//! spec.md §2 point 6 and §5.
//!
//! Modeled on the signer crate's long-running-task convention
//! (`block_observer::BlockObserver::run`): a `tokio::select!` races the
//! monitor's own tick loop against the shared termination handle, so a
//! shutdown signal is observed at the next suspension point rather than
//! cutting off in-flight block processing.

use std::time::Duration;

use tracing::{error, info};

use crate::chains::ChainAdapter;
use crate::confirmation::ConfirmationUpdater;
use crate::config::Settings;
use crate::context::TerminationHandle;
use crate::error::Error;
use crate::model::ChainTarget;
use crate::pipeline::BlockIngestionPipeline;
use crate::storage::Storage;

/// Drives ingestion and confirmation updates for one `(chain, network)`
/// target until shutdown.
pub struct ChainMonitor<A, S> {
    pipeline: BlockIngestionPipeline<A, S>,
    confirmation_updater: ConfirmationUpdater<S>,
    target: ChainTarget,
}

impl<A, S> ChainMonitor<A, S>
where
    A: ChainAdapter,
    S: Storage + Clone,
{
    /// Build a monitor over one adapter and the shared storage gateway.
    pub fn new(adapter: A, storage: S) -> Self {
        let target = ChainTarget::new(adapter.chain(), adapter.network());
        Self {
            pipeline: BlockIngestionPipeline::new(adapter, storage.clone()),
            confirmation_updater: ConfirmationUpdater::new(storage),
            target,
        }
    }

    /// The target this monitor drives.
    pub fn target(&self) -> ChainTarget {
        self.target
    }

    /// Run until `term` signals shutdown. Before entering the tick loop,
    /// probes the adapter and loads the checkpoint once and signals
    /// `ready` so [`crate::coordinator::Coordinator::start`] can return
    /// once every monitor has reached this point (spec.md §4.1). The
    /// probe's outcome doesn't gate the signal: a failure is logged and
    /// counted the same as any other adapter error, and the monitor
    /// still enters its tick loop to retry on the next interval, rather
    /// than blocking startup on an adapter that may never come up.
    ///
    /// Each iteration after that: wait `checkInterval` (push-mode EVM
    /// chains poll tightly enough that this plays the role of the
    /// subscription callback; see SPEC_FULL.md's resolution of spec.md
    /// §4.3's push/pull split), ingest whatever new blocks are
    /// available, then run the confirmation updater against the height
    /// just reached.
    #[tracing::instrument(skip(self, settings, term, ready), fields(chain = %self.target.chain, network = %self.target.network))]
    pub async fn run(
        &self,
        settings: &Settings,
        mut term: TerminationHandle,
        ready: tokio::sync::oneshot::Sender<()>,
    ) -> Result<(), Error> {
        let check_interval = Duration::from_millis(settings.timing(self.target.chain).check_interval_ms);
        info!("chain monitor starting");

        if let Err(error) = self.pipeline.probe_readiness().await {
            error!(%error, "initial adapter probe failed; will keep retrying on the tick interval");
            crate::metrics::adapter_error(self.target.chain, self.target.network, error.kind());
        }
        let _ = ready.send(());

        loop {
            tokio::select! {
                _ = term.wait_for_shutdown() => {
                    info!("chain monitor received shutdown signal");
                    return Ok(());
                }
                _ = tokio::time::sleep(check_interval) => {}
            }

            match self.pipeline.run_tick(settings).await {
                Ok(outcome) => {
                    if let Some(height) = outcome.advanced_to {
                        if let Err(error) = self.confirmation_updater.run(self.target, height, settings).await {
                            error!(%error, "confirmation updater failed for this tick");
                        }
                    }
                }
                Err(error) => {
                    // Block-level failure: logged and retried next tick
                    // from the same checkpoint (spec.md §4.3 Failure).
                    error!(%error, "block ingestion tick failed");
                    crate::metrics::adapter_error(self.target.chain, self.target.network, error.kind());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{NormalizedBlock, NormalizedTx};
    use crate::model::{ChainKey, Network};
    use crate::storage::memory::MemoryStorage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct CountingAdapter {
        tip: Arc<AtomicU64>,
    }

    impl ChainAdapter for CountingAdapter {
        async fn tip_height(&self) -> Result<u64, Error> {
            Ok(self.tip.load(Ordering::SeqCst))
        }

        async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
            Ok(NormalizedBlock {
                height,
                hash: format!("hash-{height}"),
                txs: vec![NormalizedTx::NativeTransfer {
                    tx_hash: format!("tx-{height}"),
                    from: "0xsender".into(),
                    to: "0xnobody".into(),
                    amount_raw: "1".into(),
                }],
            })
        }

        fn chain(&self) -> ChainKey {
            ChainKey::Eth
        }

        fn network(&self) -> Network {
            Network::Mainnet
        }
    }

    fn settings() -> Settings {
        let mut timing = HashMap::new();
        timing.insert(
            "eth".to_string(),
            crate::config::Timing {
                block_delay_ms: 0,
                check_interval_ms: 10,
            },
        );
        Settings {
            database_url: "postgres://localhost/test".into(),
            log_format: Default::default(),
            metrics_enabled: false,
            endpoints: HashMap::new(),
            timing,
            confirmations: HashMap::new(),
            btc_batch_size: 50,
            trx_batch_size: 5,
            rpc_timeout_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_stops_cleanly_on_shutdown_signal() {
        let storage = MemoryStorage::new();
        let adapter = CountingAdapter { tip: Arc::new(AtomicU64::new(3)) };
        let monitor = ChainMonitor::new(adapter, storage.clone());
        let settings = settings();

        let ctx = crate::context::AppContext::new(settings.clone(), storage.clone());
        let term = ctx.termination_handle();
        let shutdown_term = term.clone();

        let (ready_tx, _ready_rx) = tokio::sync::oneshot::channel();
        let run = monitor.run(&settings, term, ready_tx);
        let trigger_shutdown = async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_term.signal_shutdown();
        };

        let (run_result, _) = tokio::time::timeout(Duration::from_secs(1), futures::future::join(run, trigger_shutdown))
            .await
            .expect("monitor should exit promptly on shutdown");
        run_result.unwrap();

        assert!(storage.get_checkpoint(monitor.target()).await.unwrap() >= 1);
    }
}
