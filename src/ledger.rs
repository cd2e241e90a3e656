//! Ledger Applier. See spec.md §4.6.
//!
//! The atomic status-compare-and-set-plus-credit transaction itself lives
//! in [`crate::storage::Storage::apply_confirmation_update`] — atomicity
//! requires both the status write and the balance increment to share one
//! storage transaction (see SPEC_FULL.md §11's exactly-once resolution),
//! so splitting a separate "credit" call here would reopen the
//! two-operation race the spec explicitly calls out. This module is the
//! thin facade the Confirmation Updater calls through: it owns the
//! observability (logging, metrics) around a credit attempt, keeping that
//! concern out of the updater's block/height loop.

use tracing::{error, info};

use crate::error::Error;
use crate::model::{ChainTarget, DepositStatus};
use crate::storage::{ConfirmationOutcome, Storage};

/// Applies confirmation-count/status updates and reports the outcome of
/// any resulting credit attempt.
#[derive(Debug, Clone)]
pub struct LedgerApplier<S> {
    storage: S,
}

impl<S> LedgerApplier<S>
where
    S: Storage,
{
    /// Wrap a storage gateway.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Access the wrapped storage gateway, e.g. for read-only queries the
    /// Confirmation Updater needs before deciding what to apply.
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Apply one deposit's confirmation update, logging and recording
    /// metrics for the outcome. See [`ConfirmationOutcome`].
    #[tracing::instrument(skip(self), fields(chain = %target.chain, network = %target.network, deposit_id))]
    pub async fn apply(
        &self,
        target: ChainTarget,
        deposit_id: &str,
        confirmations: u64,
        new_status: DepositStatus,
    ) -> Result<ConfirmationOutcome, Error> {
        let outcome = self
            .storage
            .apply_confirmation_update(deposit_id, confirmations, new_status)
            .await?;

        match &outcome {
            ConfirmationOutcome::NoChange => {}
            ConfirmationOutcome::Advanced { status } => {
                info!(deposit_id, confirmations, ?status, "deposit confirmation advanced");
            }
            ConfirmationOutcome::Confirmed { credited: true, .. } => {
                info!(deposit_id, confirmations, "deposit confirmed and credited");
            }
            ConfirmationOutcome::Confirmed {
                credited: false,
                credit_failure,
            } => {
                // §7.5: fatal for this deposit; status still committed,
                // balance did not move. Requires operator intervention,
                // not an automatic retry.
                error!(
                    deposit_id,
                    reason = credit_failure.as_deref().unwrap_or("unknown"),
                    "deposit confirmed but uncredited"
                );
                crate::metrics::credit_failure(target.chain, target.network);
            }
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChainKey, DepositMetadata, Network, NetworkVersion, Token};
    use crate::storage::memory::MemoryStorage;
    use crate::storage::NewDeposit;
    use rust_decimal_macros::dec;

    fn target() -> ChainTarget {
        ChainTarget::new(ChainKey::Eth, Network::Mainnet)
    }

    #[tokio::test]
    async fn apply_credits_balance_on_first_confirmed_transition() {
        let storage = MemoryStorage::new();
        storage
            .insert_token(Token {
                id: "tok1".into(),
                symbol: "ETH".into(),
                base_symbol: None,
                blockchain: ChainKey::Eth,
                contract_address: None,
                network_version: NetworkVersion::Native,
                decimals: 18,
                is_active: true,
                metadata: serde_json::Value::Null,
            })
            .await;
        storage.set_balance("u1", "ETH", dec!(0)).await;
        storage
            .insert_deposit(NewDeposit {
                user_id: "u1".into(),
                wallet_id: "w1".into(),
                token_id: "tok1".into(),
                tx_hash: "0xhash".into(),
                amount: dec!(2.0),
                blockchain: ChainKey::Eth,
                network: Network::Mainnet,
                network_version: NetworkVersion::Native,
                block_number: 1000,
                metadata: DepositMetadata {
                    from: Some("0xsender".into()),
                    contract_address: None,
                    block_hash: "0xblockhash".into(),
                },
            })
            .await
            .unwrap();
        let deposit_id = storage.all_deposits().await[0].id.clone();

        let applier = LedgerApplier::new(storage.clone());
        let outcome = applier
            .apply(target(), &deposit_id, 12, DepositStatus::Confirmed)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed {
                credited: true,
                credit_failure: None
            }
        );
        assert_eq!(storage.get_balance("u1", "ETH").await, Some(dec!(2.0)));
    }
}
