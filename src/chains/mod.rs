//! Chain Adapters: one normalized capability set per blockchain family.
//! See spec.md §4.2.

pub mod bitcoin;
pub mod evm;
pub mod tron;
pub mod xrp;

use std::future::Future;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::error::Error;
use crate::model::{ChainKey, Network};

/// A block (or XRP ledger), normalized across chain families.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedBlock {
    /// Height or ledger index.
    pub height: u64,
    /// Block/ledger hash.
    pub hash: String,
    /// Normalized transactions contained in this block.
    pub txs: Vec<NormalizedTx>,
}

/// A single matched output within a [`NormalizedTx::MultiOutput`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiOutputEntry {
    /// Destination address.
    pub address: String,
    /// Already-decimal amount, e.g. Bitcoin's `vout[i].value`.
    pub amount_decimal: Decimal,
}

/// A normalized transaction payload. Downstream logic (the wallet filter)
/// dispatches on this tag rather than poking at chain-specific shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizedTx {
    /// A transfer of a chain's base asset (EVM, value != 0 & calldata empty;
    /// or Tron's `TransferContract`).
    ///
    /// Carries no `decimals`: the wallet filter resolves the native
    /// [`crate::model::Token`] first and scales `amount_raw` by its
    /// `decimals` (spec.md §4.4 point 4-5), rather than the adapter
    /// guessing a value that may not match the registered token.
    NativeTransfer {
        /// Transaction hash.
        tx_hash: String,
        /// Sender address.
        from: String,
        /// Recipient address.
        to: String,
        /// Raw on-chain integer amount, as a decimal-digit string.
        amount_raw: String,
    },
    /// An ERC-20/BEP-20/TRC-20 token transfer.
    TokenTransfer {
        /// Transaction hash.
        tx_hash: String,
        /// Sender address.
        from: String,
        /// Recipient address.
        to: String,
        /// Contract address the transfer was decoded from (EVM), already
        /// lowercased.
        contract_address: Option<String>,
        /// Raw on-chain integer amount, as a decimal-digit string.
        amount_raw: String,
        /// Ticker symbol, when known from the adapter's own resolution
        /// (Tron `TransferAssetContract` carries `asset_name` directly;
        /// EVM resolves by `contract_address` instead and leaves this
        /// `None`).
        symbol: Option<String>,
    },
    /// A Bitcoin transaction's outputs, already matched against no wallet
    /// in particular — the wallet filter iterates `outputs`.
    MultiOutput {
        /// Transaction id.
        tx_id: String,
        /// Every output, regardless of destination.
        outputs: Vec<MultiOutputEntry>,
    },
    /// An XRP Ledger `Payment` transaction.
    Payment {
        /// Transaction hash.
        tx_hash: String,
        /// Sender classic address.
        from: String,
        /// Destination classic address.
        to: String,
        /// Already-decimal amount, normalized at the adapter boundary
        /// (see SPEC_FULL.md §10) regardless of drops/issued-currency
        /// source shape.
        amount: Decimal,
    },
}

/// The capability set every chain adapter exposes, regardless of
/// underlying protocol. See spec.md §4.2.
pub trait ChainAdapter: Send + Sync {
    /// Current best block / ledger index.
    fn tip_height(&self) -> impl Future<Output = Result<u64, Error>> + Send;

    /// Fetch a normalized block at `height`. Returns
    /// [`Error::MissingBlock`] if the chain does not yet have it.
    fn fetch_block(&self, height: u64) -> impl Future<Output = Result<NormalizedBlock, Error>> + Send;

    /// The chain this adapter serves, for logging/error context.
    fn chain(&self) -> ChainKey;

    /// The network this adapter serves, for logging/error context.
    fn network(&self) -> Network;
}

/// A read-only health-check result. See spec.md §9 "Operational surface".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// The chain probed.
    pub chain: ChainKey,
    /// The network probed.
    pub network: Network,
    /// Current tip height observed.
    pub block_number: u64,
}

/// `testConnection`: probe an adapter's tip height without mutating any
/// state. Used by the `check` CLI subcommand for container health probes.
pub async fn test_connection<A: ChainAdapter>(adapter: &A) -> Result<ConnectionStatus, Error> {
    let block_number = adapter.tip_height().await?;
    Ok(ConnectionStatus {
        chain: adapter.chain(),
        network: adapter.network(),
        block_number,
    })
}

/// The linear backoff policy from spec.md §4.2: `1s * (attempt + 1)`, up
/// to `max_attempts`, floored at `floor`.
struct LinearBackoff {
    attempt: u32,
    max_attempts: u32,
    base: Duration,
    floor: Duration,
}

impl backoff::backoff::Backoff for LinearBackoff {
    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt > self.max_attempts {
            return None;
        }
        Some(std::cmp::max(self.base * self.attempt, self.floor))
    }

    fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Retry a fallible chain RPC call with the spec.md §4.2 linear backoff.
/// `op` is responsible for attaching `chain`/`network` context to its own
/// errors (via [`Error::rpc`]) before the retry budget is exhausted.
///
/// `max_attempts` is 3 for every adapter except Tron's HTTP-403 path,
/// which uses 5 with a 2s floor (see [`crate::chains::tron`]).
pub async fn retry_with_backoff<F, Fut, T>(
    max_attempts: u32,
    floor: Duration,
    mut op: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    let policy = LinearBackoff {
        attempt: 0,
        max_attempts,
        base: Duration::from_secs(1),
        floor,
    };

    backoff::future::retry(policy, || async {
        op().await.map_err(backoff::Error::transient)
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_succeeds_before_exhausting_attempts() {
        let calls = AtomicU32::new(0);
        let result = retry_with_backoff(3, Duration::from_millis(0), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(Error::Config("transient".into()))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_surfaces_error_after_exhaustion() {
        let result: Result<(), Error> = retry_with_backoff(2, Duration::from_millis(0), || async {
            Err(Error::rpc(ChainKey::Trx, Network::Mainnet, RetryExhaustedForTest))
        })
        .await;
        assert!(matches!(
            result,
            Err(Error::Rpc {
                chain: ChainKey::Trx,
                ..
            })
        ));
    }

    #[derive(Debug)]
    struct RetryExhaustedForTest;

    impl std::fmt::Display for RetryExhaustedForTest {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str("still broken")
        }
    }

    impl std::error::Error for RetryExhaustedForTest {}
}
