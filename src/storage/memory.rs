//! An in-memory [`Storage`] implementation used as the default test
//! double, mirroring the signer crate's `storage::in_memory::Store`.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::model::{ChainTarget, Deposit, DepositStatus, Token, Wallet};

use super::{ConfirmationOutcome, InsertOutcome, NewDeposit, Storage, TokenLookup};

#[derive(Debug, Default)]
struct State {
    wallets: Vec<Wallet>,
    tokens: Vec<Token>,
    deposits: Vec<Deposit>,
    checkpoints: HashMap<String, u64>,
    /// `(user_id, base_symbol) -> balance`.
    balances: HashMap<(String, String), Decimal>,
    next_deposit_id: u64,
}

/// A `Clone`-able, `Send + Sync` in-memory storage gateway.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    state: Arc<Mutex<State>>,
}

impl MemoryStorage {
    /// A fresh, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a wallet for tests.
    pub async fn insert_wallet(&self, wallet: Wallet) {
        self.state.lock().await.wallets.push(wallet);
    }

    /// Seed a token for tests.
    pub async fn insert_token(&self, token: Token) {
        self.state.lock().await.tokens.push(token);
    }

    /// Seed (or overwrite) a spot balance row for tests.
    pub async fn set_balance(&self, user_id: &str, base_symbol: &str, balance: Decimal) {
        self.state
            .lock()
            .await
            .balances
            .insert((user_id.to_string(), base_symbol.to_string()), balance);
    }

    /// Read back a spot balance for tests/assertions.
    pub async fn get_balance(&self, user_id: &str, base_symbol: &str) -> Option<Decimal> {
        self.state
            .lock()
            .await
            .balances
            .get(&(user_id.to_string(), base_symbol.to_string()))
            .copied()
    }

    /// Read back a deposit by id for tests/assertions.
    pub async fn get_deposit(&self, id: &str) -> Option<Deposit> {
        self.state
            .lock()
            .await
            .deposits
            .iter()
            .find(|d| d.id == id)
            .cloned()
    }

    /// All deposits currently stored, for assertions.
    pub async fn all_deposits(&self) -> Vec<Deposit> {
        self.state.lock().await.deposits.clone()
    }
}

impl Storage for MemoryStorage {
    async fn find_wallets(&self, target: ChainTarget) -> Result<Vec<Wallet>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .iter()
            .filter(|w| w.chain == target.chain && w.network == target.network)
            .cloned()
            .collect())
    }

    async fn find_token(&self, lookup: TokenLookup) -> Result<Option<Token>, Error> {
        let state = self.state.lock().await;
        let found = state.tokens.iter().find(|t| {
            if !t.is_active {
                return false;
            }
            match &lookup {
                TokenLookup::Native { chain } => {
                    t.blockchain == *chain
                        && t.network_version == crate::model::NetworkVersion::Native
                }
                TokenLookup::ContractAddress {
                    chain,
                    contract_address,
                } => {
                    t.blockchain == *chain
                        && t
                            .contract_address
                            .as_deref()
                            .is_some_and(|addr| addr.eq_ignore_ascii_case(contract_address))
                }
                TokenLookup::Symbol {
                    chain,
                    network_version,
                    symbol,
                } => {
                    t.blockchain == *chain
                        && t.network_version == *network_version
                        && t.symbol.eq_ignore_ascii_case(symbol)
                }
            }
        });
        Ok(found.cloned())
    }

    async fn insert_deposit(&self, deposit: NewDeposit) -> Result<InsertOutcome, Error> {
        let mut state = self.state.lock().await;
        let exists = state.deposits.iter().any(|d| {
            d.tx_hash == deposit.tx_hash
                && d.wallet_id == deposit.wallet_id
                && d.token_id == deposit.token_id
        });
        if exists {
            return Ok(InsertOutcome::AlreadyExists);
        }

        state.next_deposit_id += 1;
        let id = state.next_deposit_id.to_string();
        let now = now();
        state.deposits.push(Deposit {
            id,
            user_id: deposit.user_id,
            wallet_id: deposit.wallet_id,
            token_id: deposit.token_id,
            tx_hash: deposit.tx_hash,
            amount: deposit.amount,
            blockchain: deposit.blockchain,
            network: deposit.network,
            network_version: deposit.network_version,
            block_number: Some(deposit.block_number),
            status: DepositStatus::Pending,
            confirmations: 0,
            metadata: deposit.metadata,
            created_at: now,
            updated_at: now,
        });
        Ok(InsertOutcome::Inserted)
    }

    async fn find_confirmable_deposits(&self, target: ChainTarget) -> Result<Vec<Deposit>, Error> {
        let state = self.state.lock().await;
        Ok(state
            .deposits
            .iter()
            .filter(|d| {
                d.blockchain == target.chain
                    && d.network == target.network
                    && d.block_number.is_some()
                    && matches!(d.status, DepositStatus::Pending | DepositStatus::Confirming)
            })
            .cloned()
            .collect())
    }

    async fn apply_confirmation_update(
        &self,
        deposit_id: &str,
        confirmations: u64,
        new_status: DepositStatus,
    ) -> Result<ConfirmationOutcome, Error> {
        let mut state = self.state.lock().await;

        let Some(deposit) = state.deposits.iter_mut().find(|d| d.id == deposit_id) else {
            return Ok(ConfirmationOutcome::NoChange);
        };

        // I3: confirmed is terminal.
        if deposit.status == DepositStatus::Confirmed {
            return Ok(ConfirmationOutcome::NoChange);
        }

        // I2: confirmations is monotonically non-decreasing.
        deposit.confirmations = confirmations.max(deposit.confirmations);
        deposit.status = new_status;
        deposit.updated_at = now();

        if new_status != DepositStatus::Confirmed {
            return Ok(ConfirmationOutcome::Advanced { status: new_status });
        }

        let token = state.tokens.iter().find(|t| t.id == deposit.token_id).cloned();
        let Some(token) = token else {
            return Ok(ConfirmationOutcome::Confirmed {
                credited: false,
                credit_failure: Some(format!("token {} not found", deposit.token_id)),
            });
        };
        let settlement_symbol = token.settlement_symbol().to_string();
        let user_id = deposit.user_id.clone();
        let amount = deposit.amount;

        let balance_key = (user_id.clone(), settlement_symbol.clone());
        match state.balances.get_mut(&balance_key) {
            Some(balance) => {
                *balance += amount;
                Ok(ConfirmationOutcome::Confirmed {
                    credited: true,
                    credit_failure: None,
                })
            }
            None => Ok(ConfirmationOutcome::Confirmed {
                credited: false,
                credit_failure: Some(format!(
                    "no spot balance row for {user_id}/{settlement_symbol}"
                )),
            }),
        }
    }

    async fn get_checkpoint(&self, target: ChainTarget) -> Result<u64, Error> {
        let state = self.state.lock().await;
        Ok(state
            .checkpoints
            .get(&target.checkpoint_key())
            .copied()
            .unwrap_or(0))
    }

    async fn set_checkpoint(&self, target: ChainTarget, height: u64) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        state.checkpoints.insert(target.checkpoint_key(), height);
        Ok(())
    }
}

fn now() -> OffsetDateTime {
    // `OffsetDateTime::now_utc` relies on the system clock, not on the
    // disallowed `std::time`/`rand` nondeterminism this crate otherwise
    // avoids in hot paths; acceptable here since it only stamps audit
    // columns.
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChainKey, DepositMetadata, Network, NetworkVersion};
    use rust_decimal_macros::dec;

    fn target() -> ChainTarget {
        ChainTarget::new(ChainKey::Eth, Network::Mainnet)
    }

    fn sample_token() -> Token {
        Token {
            id: "tok1".into(),
            symbol: "ETH".into(),
            base_symbol: None,
            blockchain: ChainKey::Eth,
            contract_address: None,
            network_version: NetworkVersion::Native,
            decimals: 18,
            is_active: true,
            metadata: serde_json::Value::Null,
        }
    }

    fn sample_new_deposit() -> NewDeposit {
        NewDeposit {
            user_id: "u1".into(),
            wallet_id: "w1".into(),
            token_id: "tok1".into(),
            tx_hash: "0xhash".into(),
            amount: dec!(1.0),
            blockchain: ChainKey::Eth,
            network: Network::Mainnet,
            network_version: NetworkVersion::Native,
            block_number: 1000,
            metadata: DepositMetadata {
                from: Some("0xabc".into()),
                contract_address: None,
                block_hash: "0xblockhash".into(),
            },
        }
    }

    #[tokio::test]
    async fn insert_deposit_is_idempotent_on_dedupe_key() {
        let storage = MemoryStorage::new();
        let first = storage.insert_deposit(sample_new_deposit()).await.unwrap();
        let second = storage.insert_deposit(sample_new_deposit()).await.unwrap();
        assert_eq!(first, InsertOutcome::Inserted);
        assert_eq!(second, InsertOutcome::AlreadyExists);
        assert_eq!(storage.all_deposits().await.len(), 1);
    }

    #[tokio::test]
    async fn checkpoint_round_trips() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_checkpoint(target()).await.unwrap(), 0);
        storage.set_checkpoint(target(), 1000).await.unwrap();
        assert_eq!(storage.get_checkpoint(target()).await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn confirmation_update_credits_balance_exactly_once() {
        let storage = MemoryStorage::new();
        storage.insert_token(sample_token()).await;
        storage.set_balance("u1", "ETH", dec!(0)).await;
        storage.insert_deposit(sample_new_deposit()).await.unwrap();
        let deposit_id = storage.all_deposits().await[0].id.clone();

        let outcome = storage
            .apply_confirmation_update(&deposit_id, 12, DepositStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed {
                credited: true,
                credit_failure: None
            }
        );
        assert_eq!(storage.get_balance("u1", "ETH").await, Some(dec!(1.0)));

        // A second attempt at the same deposit must not double credit (P5, I3).
        let second = storage
            .apply_confirmation_update(&deposit_id, 20, DepositStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(second, ConfirmationOutcome::NoChange);
        assert_eq!(storage.get_balance("u1", "ETH").await, Some(dec!(1.0)));
    }

    #[tokio::test]
    async fn confirmation_update_reports_missing_balance_row() {
        let storage = MemoryStorage::new();
        storage.insert_token(sample_token()).await;
        storage.insert_deposit(sample_new_deposit()).await.unwrap();
        let deposit_id = storage.all_deposits().await[0].id.clone();

        let outcome = storage
            .apply_confirmation_update(&deposit_id, 12, DepositStatus::Confirmed)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            ConfirmationOutcome::Confirmed {
                credited: false,
                credit_failure: Some("no spot balance row for u1/ETH".to_string())
            }
        );
        // The deposit is confirmed despite the failed credit.
        let deposit = storage.get_deposit(&deposit_id).await.unwrap();
        assert_eq!(deposit.status, DepositStatus::Confirmed);
    }

    #[tokio::test]
    async fn confirmations_never_decrease() {
        let storage = MemoryStorage::new();
        storage.insert_deposit(sample_new_deposit()).await.unwrap();
        let deposit_id = storage.all_deposits().await[0].id.clone();

        storage
            .apply_confirmation_update(&deposit_id, 5, DepositStatus::Confirming)
            .await
            .unwrap();
        storage
            .apply_confirmation_update(&deposit_id, 0, DepositStatus::Confirming)
            .await
            .unwrap();

        let deposit = storage.get_deposit(&deposit_id).await.unwrap();
        assert_eq!(deposit.confirmations, 5);
    }
}
