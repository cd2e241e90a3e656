//! Confirmation Updater. Runs after each processed block for one chain.
//! See spec.md §4.5.

use crate::config::Settings;
use crate::error::Error;
use crate::ledger::LedgerApplier;
use crate::model::{ChainTarget, DepositStatus};
use crate::storage::Storage;

/// Advances the confirmation count and status of every open deposit for a
/// `(chain, network)` target, handing off any resulting credit to the
/// [`LedgerApplier`].
#[derive(Debug, Clone)]
pub struct ConfirmationUpdater<S> {
    ledger: LedgerApplier<S>,
}

impl<S> ConfirmationUpdater<S>
where
    S: Storage,
{
    /// Build an updater over a storage gateway.
    pub fn new(storage: S) -> Self {
        Self {
            ledger: LedgerApplier::new(storage),
        }
    }

    /// Update every `pending`/`confirming` deposit for `target` against
    /// `current_height`. See spec.md §4.5 for the per-deposit rule and
    /// the negative-confirmations-clamped-to-zero edge case.
    #[tracing::instrument(skip(self, settings), fields(chain = %target.chain, network = %target.network, current_height))]
    pub async fn run(
        &self,
        target: ChainTarget,
        current_height: u64,
        settings: &Settings,
    ) -> Result<(), Error> {
        let required = settings.confirmation_requirement(target.chain).for_network(target.network);
        let deposits = self.ledger.storage().find_confirmable_deposits(target).await?;

        for deposit in deposits {
            let Some(block_number) = deposit.block_number else {
                continue;
            };

            // Re-org to a shorter chain: clamp to zero rather than go
            // negative (spec.md §4.5 edge cases).
            let confirmations = current_height.saturating_sub(block_number);
            let new_status = if confirmations >= required {
                DepositStatus::Confirmed
            } else {
                DepositStatus::Confirming
            };

            self.ledger.apply(target, &deposit.id, confirmations, new_status).await?;
        }

        Ok(())
    }
}
