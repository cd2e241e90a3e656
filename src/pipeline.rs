//! Block Ingestion Pipeline. See spec.md §4.3.
//!
//! Drives one `(chain, network)` target: fetch the next unprocessed
//! block(s), run the wallet filter over each, then write and verify the
//! checkpoint. The [`crate::monitor::ChainMonitor`] owns the tick timer
//! and calls [`BlockIngestionPipeline::run_tick`] once per interval; this
//! module only knows about one tick's worth of work.

use std::time::Duration;

use tracing::warn;

use crate::chains::ChainAdapter;
use crate::config::Settings;
use crate::error::Error;
use crate::model::{ChainKey, ChainTarget};
use crate::storage::Storage;
use crate::wallet_filter::WalletFilter;

/// Per-chain batch cap applied to one tick's block range (spec.md §4.3).
/// `None` means the full gap is processed in one tick (EVM push-mode
/// chains poll `tipHeight` tightly enough that the gap is normally one
/// block; XRP is explicitly "full gap ledger-by-ledger").
fn batch_cap(chain: ChainKey) -> Option<u64> {
    match chain {
        ChainKey::Btc => Some(50),
        ChainKey::Trx => Some(5),
        ChainKey::Eth | ChainKey::Bsc | ChainKey::Xrp => None,
    }
}

/// The outcome of one tick: how far the checkpoint advanced, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickOutcome {
    /// The highest height fully processed and checkpointed this tick.
    /// `None` if nothing advanced (no new blocks, or the first block in
    /// the range was missing/failed).
    pub advanced_to: Option<u64>,
}

/// Consumes block heights for one `(chain, network)` target in strictly
/// increasing order.
#[derive(Debug, Clone)]
pub struct BlockIngestionPipeline<A, S> {
    adapter: A,
    storage: S,
    wallet_filter: WalletFilter<S>,
}

impl<A, S> BlockIngestionPipeline<A, S>
where
    A: ChainAdapter,
    S: Storage + Clone,
{
    /// Build a pipeline over one adapter and the shared storage gateway.
    pub fn new(adapter: A, storage: S) -> Self {
        Self {
            wallet_filter: WalletFilter::new(storage.clone()),
            adapter,
            storage,
        }
    }

    /// The target this pipeline drives.
    pub fn target(&self) -> ChainTarget {
        ChainTarget::new(self.adapter.chain(), self.adapter.network())
    }

    /// Probe the adapter and load the checkpoint once, without processing
    /// any blocks. Used by [`crate::monitor::ChainMonitor::run`] to
    /// signal startup readiness (spec.md §4.1: "adapter probed,
    /// checkpoint loaded").
    pub async fn probe_readiness(&self) -> Result<(), Error> {
        self.adapter.tip_height().await?;
        self.storage.get_checkpoint(self.target()).await?;
        Ok(())
    }

    /// Process one tick's worth of blocks: `[checkpoint+1, tip]`, capped
    /// per spec.md §4.3's per-chain batch size. Returns as soon as the
    /// checkpoint stops advancing, either because the range is exhausted
    /// or because a block-level error occurred (propagated to the
    /// caller; per-transaction errors are absorbed by the wallet filter).
    #[tracing::instrument(skip(self, settings), fields(chain = %self.adapter.chain(), network = %self.adapter.network()))]
    pub async fn run_tick(&self, settings: &Settings) -> Result<TickOutcome, Error> {
        let target = self.target();
        let tip = self.adapter.tip_height().await?;
        let checkpoint = self.storage.get_checkpoint(target).await?;

        if tip <= checkpoint {
            return Ok(TickOutcome { advanced_to: None });
        }

        let end = match batch_cap(target.chain) {
            Some(cap) => checkpoint.saturating_add(cap).min(tip),
            None => tip,
        };

        let block_delay = Duration::from_millis(settings.timing(target.chain).block_delay_ms);
        let mut advanced_to = None;

        for height in (checkpoint + 1)..=end {
            match self.adapter.fetch_block(height).await {
                Ok(block) => {
                    self.wallet_filter.process_block(target, &block).await?;
                    self.write_checkpoint(target, height).await?;
                    crate::metrics::block_processed(target.chain, target.network);
                    crate::metrics::checkpoint_height(target.chain, target.network, height);
                    advanced_to = Some(height);
                }
                Err(Error::MissingBlock { .. }) => {
                    // Not yet available at the adapter's view of the
                    // chain; stop the tick here rather than erroring,
                    // the next tick will retry from the same point.
                    warn!(height, "block not found, stopping tick at last good height");
                    break;
                }
                Err(error) => return Err(error),
            }

            if height != end {
                tokio::time::sleep(block_delay).await;
            }
        }

        Ok(TickOutcome { advanced_to })
    }

    async fn write_checkpoint(&self, target: ChainTarget, height: u64) -> Result<(), Error> {
        self.storage.set_checkpoint(target, height).await?;
        let read_back = self.storage.get_checkpoint(target).await?;
        if read_back != height {
            return Err(Error::CheckpointMismatch {
                chain: target.chain,
                network: target.network,
                written: height,
                read: read_back,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::{NormalizedBlock, NormalizedTx};
    use crate::model::Network;
    use crate::storage::memory::MemoryStorage;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct StubAdapter {
        tip: u64,
        missing_from: Option<u64>,
        calls: Arc<AtomicU64>,
    }

    impl ChainAdapter for StubAdapter {
        async fn tip_height(&self) -> Result<u64, Error> {
            Ok(self.tip)
        }

        async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.missing_from.is_some_and(|m| height >= m) {
                return Err(Error::MissingBlock {
                    chain: ChainKey::Eth,
                    network: Network::Mainnet,
                    height,
                });
            }
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
        Settings {
            database_url: "postgres://localhost/test".into(),
            log_format: Default::default(),
            metrics_enabled: false,
            endpoints: HashMap::new(),
            timing: HashMap::new(),
            confirmations: HashMap::new(),
            btc_batch_size: 50,
            trx_batch_size: 5,
            rpc_timeout_secs: 30,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tick_advances_checkpoint_through_full_gap() {
        let storage = MemoryStorage::new();
        let adapter = StubAdapter {
            tip: 5,
            missing_from: None,
            calls: Arc::new(AtomicU64::new(0)),
        };
        let pipeline = BlockIngestionPipeline::new(adapter, storage.clone());

        let outcome = pipeline.run_tick(&settings()).await.unwrap();
        assert_eq!(outcome.advanced_to, Some(5));
        assert_eq!(storage.get_checkpoint(pipeline.target()).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_block_stops_tick_without_erroring() {
        let storage = MemoryStorage::new();
        let adapter = StubAdapter {
            tip: 10,
            missing_from: Some(3),
            calls: Arc::new(AtomicU64::new(0)),
        };
        let pipeline = BlockIngestionPipeline::new(adapter, storage.clone());

        let outcome = pipeline.run_tick(&settings()).await.unwrap();
        assert_eq!(outcome.advanced_to, Some(2));
        assert_eq!(storage.get_checkpoint(pipeline.target()).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn no_new_blocks_is_a_no_op() {
        let storage = MemoryStorage::new();
        storage
            .set_checkpoint(ChainTarget::new(ChainKey::Eth, Network::Mainnet), 5)
            .await
            .unwrap();
        let adapter = StubAdapter {
            tip: 5,
            missing_from: None,
            calls: Arc::new(AtomicU64::new(0)),
        };
        let pipeline = BlockIngestionPipeline::new(adapter.clone(), storage.clone());

        let outcome = pipeline.run_tick(&settings()).await.unwrap();
        assert_eq!(outcome.advanced_to, None);
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn bitcoin_batch_caps_a_large_gap_to_fifty_blocks() {
        let storage = MemoryStorage::new();
        #[derive(Clone)]
        struct BtcStub {
            calls: Arc<AtomicU64>,
        }
        impl ChainAdapter for BtcStub {
            async fn tip_height(&self) -> Result<u64, Error> {
                Ok(1000)
            }
            async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
                self.calls.fetch_add(1, Ordering::SeqCst);
                Ok(NormalizedBlock {
                    height,
                    hash: "h".into(),
                    txs: vec![],
                })
            }
            fn chain(&self) -> ChainKey {
                ChainKey::Btc
            }
            fn network(&self) -> Network {
                Network::Mainnet
            }
        }
        let adapter = BtcStub { calls: Arc::new(AtomicU64::new(0)) };
        let pipeline = BlockIngestionPipeline::new(adapter.clone(), storage.clone());

        let outcome = pipeline.run_tick(&settings()).await.unwrap();
        assert_eq!(outcome.advanced_to, Some(50));
        assert_eq!(adapter.calls.load(Ordering::SeqCst), 50);
    }
}
