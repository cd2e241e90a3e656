//! The Storage Gateway: the single abstract contract every component above
//! it talks to. See spec.md §4.7.
//!
//! [`memory::MemoryStorage`] is the in-process test double used throughout
//! this crate's unit tests; [`postgres::PostgresStorage`] is the production
//! implementation backing the persisted schema in spec.md §6.

pub mod memory;
pub mod postgres;

use crate::error::Error;
use crate::model::{ChainKey, ChainTarget, Deposit, DepositStatus, NetworkVersion, Token, Wallet};

/// How to resolve a [`Token`] for a matched transfer. Mirrors the
/// resolution rules in spec.md §4.4 point 4.
#[derive(Debug, Clone)]
pub enum TokenLookup {
    /// The chain's native asset.
    Native {
        /// Chain the transfer was observed on.
        chain: ChainKey,
    },
    /// A token identified by its contract address (EVM).
    ContractAddress {
        /// Chain the transfer was observed on.
        chain: ChainKey,
        /// Contract address, already lowercased.
        contract_address: String,
    },
    /// A token identified by symbol and implementation (Tron TRC-20,
    /// single-asset chains like BTC/XRP).
    Symbol {
        /// Chain the transfer was observed on.
        chain: ChainKey,
        /// How the token is implemented on-chain.
        network_version: NetworkVersion,
        /// Ticker symbol.
        symbol: String,
    },
}

/// A not-yet-persisted deposit row, as produced by the wallet filter.
#[derive(Debug, Clone)]
pub struct NewDeposit {
    /// Owning user id.
    pub user_id: String,
    /// Matched wallet id.
    pub wallet_id: String,
    /// Resolved token id.
    pub token_id: String,
    /// On-chain transaction hash.
    pub tx_hash: String,
    /// Human-decimal amount.
    pub amount: rust_decimal::Decimal,
    /// Chain the deposit was observed on.
    pub blockchain: ChainKey,
    /// Network the deposit was observed on.
    pub network: crate::model::Network,
    /// How the token is implemented on-chain.
    pub network_version: NetworkVersion,
    /// Height of the including block.
    pub block_number: u64,
    /// Extra context.
    pub metadata: crate::model::DepositMetadata,
}

/// Whether an insert produced a new row or was a no-op because the
/// `(tx_hash, wallet_id, token_id)` key already existed (I1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new deposit row was created.
    Inserted,
    /// A row with this key already existed; nothing was written.
    AlreadyExists,
}

/// The outcome of one confirmation-update call on a single deposit. See
/// spec.md §4.5 and §4.6 and SPEC_FULL.md §11 for the exactly-once credit
/// design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationOutcome {
    /// The deposit was already `confirmed`; no write was performed (I3).
    NoChange,
    /// Confirmations and/or status were updated, but the deposit did not
    /// reach `confirmed` on this call.
    Advanced {
        /// The status after the update.
        status: DepositStatus,
    },
    /// The deposit transitioned into `confirmed` on this call.
    Confirmed {
        /// Whether the balance credit succeeded. `false` means the
        /// deposit is confirmed but uncredited; the caller logs
        /// `credit_failure` and records it as a fatal-for-this-deposit
        /// condition (spec.md §7.5) requiring operator intervention.
        credited: bool,
        /// Present when `credited` is false: why the credit did not
        /// happen.
        credit_failure: Option<String>,
    },
}

/// The abstract persistence contract. See spec.md §4.7.
pub trait Storage: Send + Sync {
    /// All wallets registered for a `(chain, network)` pair.
    fn find_wallets(
        &self,
        target: ChainTarget,
    ) -> impl std::future::Future<Output = Result<Vec<Wallet>, Error>> + Send;

    /// Resolve a token by one of the lookup strategies in spec.md §4.4.
    /// Only ever returns an active token.
    fn find_token(
        &self,
        lookup: TokenLookup,
    ) -> impl std::future::Future<Output = Result<Option<Token>, Error>> + Send;

    /// Insert a new deposit, idempotent on `(tx_hash, wallet_id, token_id)`
    /// (I1).
    fn insert_deposit(
        &self,
        deposit: NewDeposit,
    ) -> impl std::future::Future<Output = Result<InsertOutcome, Error>> + Send;

    /// All deposits in `pending`/`confirming` status for a chain target
    /// that have a known block number.
    fn find_confirmable_deposits(
        &self,
        target: ChainTarget,
    ) -> impl std::future::Future<Output = Result<Vec<Deposit>, Error>> + Send;

    /// Apply a confirmation-count/status update to one deposit, crediting
    /// the wallet balance atomically with the `confirmed` transition when
    /// applicable. See [`ConfirmationOutcome`].
    fn apply_confirmation_update(
        &self,
        deposit_id: &str,
        confirmations: u64,
        new_status: DepositStatus,
    ) -> impl std::future::Future<Output = Result<ConfirmationOutcome, Error>> + Send;

    /// The last fully-processed block height for a target, or `0` if
    /// none has been recorded yet.
    fn get_checkpoint(
        &self,
        target: ChainTarget,
    ) -> impl std::future::Future<Output = Result<u64, Error>> + Send;

    /// Upsert the checkpoint for a target.
    fn set_checkpoint(
        &self,
        target: ChainTarget,
        height: u64,
    ) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}
