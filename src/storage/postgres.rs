//! The production [`Storage`] implementation, backed by the schema in
//! spec.md §6.
//!
//! `deposits` and `system_settings` are owned by this crate. `wallets`,
//! `tokens` and `wallet_balances` are owned by the surrounding exchange
//! backend (see spec.md §1/§3); this module only ever reads the first two
//! and increments the third inside [`Storage::apply_confirmation_update`].
//!
//! Queries are written against the runtime-checked `sqlx::query`/
//! `query_as` API rather than the `query!`/`query_as!` macros: this crate
//! is built and shipped independently of the schema-owning services, so
//! there is no single `DATABASE_URL` to check macros against at compile
//! time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rust_decimal::Decimal;
use serde_json::Value as Json;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use time::OffsetDateTime;

use crate::error::Error;
use crate::model::{
    ChainKey, ChainTarget, Deposit, DepositMetadata, DepositStatus, Network, NetworkVersion, Token,
    Wallet,
};

use super::{ConfirmationOutcome, InsertOutcome, NewDeposit, Storage, TokenLookup};

/// Default TTL for the per-target wallet cache (spec.md §9 open question
/// (a)): well under every configured `checkInterval` in spec.md §6, so a
/// wallet added to the directory is visible within one monitor tick.
const DEFAULT_WALLET_CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
struct WalletCache {
    entries: Mutex<HashMap<ChainTarget, (Instant, Vec<Wallet>)>>,
    ttl: Duration,
}

impl WalletCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn get(&self, target: ChainTarget) -> Option<Vec<Wallet>> {
        let entries = self.entries.lock().expect("wallet cache lock poisoned");
        let (fetched_at, wallets) = entries.get(&target)?;
        if fetched_at.elapsed() < self.ttl {
            Some(wallets.clone())
        } else {
            None
        }
    }

    fn put(&self, target: ChainTarget, wallets: Vec<Wallet>) {
        let mut entries = self.entries.lock().expect("wallet cache lock poisoned");
        entries.insert(target, (Instant::now(), wallets));
    }
}

/// A `sqlx`-backed storage gateway.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
    wallet_cache: Arc<WalletCache>,
}

impl PostgresStorage {
    /// Connect a pool against `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool,
            wallet_cache: Arc::new(WalletCache::new(DEFAULT_WALLET_CACHE_TTL)),
        })
    }

    /// Wrap an already-established pool, for callers that manage pool
    /// lifecycle themselves (e.g. sharing one pool with the rest of the
    /// exchange backend).
    pub fn from_pool(pool: PgPool) -> Self {
        Self {
            pool,
            wallet_cache: Arc::new(WalletCache::new(DEFAULT_WALLET_CACHE_TTL)),
        }
    }

    /// Wrap an already-established pool with a non-default wallet cache
    /// TTL (configurable per spec.md §9 open question (a)).
    pub fn from_pool_with_wallet_cache_ttl(pool: PgPool, ttl: Duration) -> Self {
        Self {
            pool,
            wallet_cache: Arc::new(WalletCache::new(ttl)),
        }
    }
}

fn chain_to_str(chain: ChainKey) -> &'static str {
    chain.as_str()
}

fn chain_from_str(value: &str) -> Result<ChainKey, Error> {
    ChainKey::from_external_name(value).ok_or_else(|| Error::MalformedResponse {
        chain: ChainKey::Eth,
        network: Network::Mainnet,
        message: format!("unknown chain key in storage row: {value}"),
    })
}

fn network_to_str(network: Network) -> &'static str {
    match network {
        Network::Mainnet => "mainnet",
        Network::Testnet => "testnet",
    }
}

fn network_from_str(value: &str) -> Network {
    match value {
        "testnet" => Network::Testnet,
        _ => Network::Mainnet,
    }
}

fn network_version_to_str(v: NetworkVersion) -> &'static str {
    match v {
        NetworkVersion::Native => "NATIVE",
        NetworkVersion::Erc20 => "ERC20",
        NetworkVersion::Bep20 => "BEP20",
        NetworkVersion::Trc20 => "TRC20",
    }
}

fn network_version_from_str(value: &str) -> NetworkVersion {
    match value {
        "ERC20" => NetworkVersion::Erc20,
        "BEP20" => NetworkVersion::Bep20,
        "TRC20" => NetworkVersion::Trc20,
        _ => NetworkVersion::Native,
    }
}

fn status_to_str(status: DepositStatus) -> &'static str {
    match status {
        DepositStatus::Pending => "pending",
        DepositStatus::Confirming => "confirming",
        DepositStatus::Confirmed => "confirmed",
    }
}

#[derive(FromRow)]
struct WalletRow {
    id: String,
    user_id: String,
    address: String,
    chain: String,
    network: String,
}

impl WalletRow {
    fn into_wallet(self) -> Result<Wallet, Error> {
        Ok(Wallet {
            id: self.id,
            user_id: self.user_id,
            address: self.address,
            chain: chain_from_str(&self.chain)?,
            network: network_from_str(&self.network),
        })
    }
}

#[derive(FromRow)]
struct TokenRow {
    id: String,
    symbol: String,
    base_symbol: Option<String>,
    blockchain: String,
    contract_address: Option<String>,
    network_version: String,
    decimals: i32,
    is_active: bool,
    metadata: Json,
}

impl TokenRow {
    fn into_token(self) -> Result<Token, Error> {
        Ok(Token {
            id: self.id,
            symbol: self.symbol,
            base_symbol: self.base_symbol,
            blockchain: chain_from_str(&self.blockchain)?,
            contract_address: self.contract_address,
            network_version: network_version_from_str(&self.network_version),
            decimals: self.decimals.max(0) as u32,
            is_active: self.is_active,
            metadata: self.metadata,
        })
    }
}

#[derive(FromRow)]
struct DepositRow {
    id: String,
    user_id: String,
    wallet_id: String,
    token_id: String,
    tx_hash: String,
    amount: String,
    blockchain: String,
    network: String,
    network_version: String,
    block_number: Option<i64>,
    status: String,
    confirmations: i64,
    metadata: Json,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl DepositRow {
    fn into_deposit(self) -> Result<Deposit, Error> {
        let metadata: DepositMetadata = serde_json::from_value(self.metadata).unwrap_or_default();
        Ok(Deposit {
            id: self.id,
            user_id: self.user_id,
            wallet_id: self.wallet_id,
            token_id: self.token_id,
            tx_hash: self.tx_hash,
            amount: Decimal::from_str_exact(&self.amount)?,
            blockchain: chain_from_str(&self.blockchain)?,
            network: network_from_str(&self.network),
            network_version: network_version_from_str(&self.network_version),
            block_number: self.block_number.map(|h| h as u64),
            status: self
                .status
                .parse()
                .map_err(|message| Error::MalformedResponse {
                    chain: chain_from_str(&self.blockchain).unwrap_or(ChainKey::Eth),
                    network: network_from_str(&self.network),
                    message,
                })?,
            confirmations: self.confirmations.max(0) as u64,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const TOKEN_COLUMNS: &str = "id, symbol, base_symbol, blockchain, contract_address, \
     network_version, decimals, is_active, metadata";

const DEPOSIT_COLUMNS: &str = "id, user_id, wallet_id, token_id, tx_hash, amount, blockchain, \
     network, network_version, block_number, status, confirmations, metadata, created_at, updated_at";

impl Storage for PostgresStorage {
    async fn find_wallets(&self, target: ChainTarget) -> Result<Vec<Wallet>, Error> {
        if let Some(cached) = self.wallet_cache.get(target) {
            return Ok(cached);
        }

        let rows = sqlx::query_as::<_, WalletRow>(
            "SELECT id, user_id, address, chain, network FROM wallets \
             WHERE chain = $1 AND network = $2",
        )
        .bind(chain_to_str(target.chain))
        .bind(network_to_str(target.network))
        .fetch_all(&self.pool)
        .await?;

        let wallets = rows
            .into_iter()
            .map(WalletRow::into_wallet)
            .collect::<Result<Vec<_>, _>>()?;
        self.wallet_cache.put(target, wallets.clone());
        Ok(wallets)
    }

    async fn find_token(&self, lookup: TokenLookup) -> Result<Option<Token>, Error> {
        let row = match lookup {
            TokenLookup::Native { chain } => {
                sqlx::query_as::<_, TokenRow>(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens \
                     WHERE blockchain = $1 AND network_version = 'NATIVE' AND is_active = true \
                     LIMIT 1"
                ))
                .bind(chain_to_str(chain))
                .fetch_optional(&self.pool)
                .await?
            }
            TokenLookup::ContractAddress {
                chain,
                contract_address,
            } => {
                sqlx::query_as::<_, TokenRow>(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens \
                     WHERE blockchain = $1 AND lower(contract_address) = lower($2) \
                           AND is_active = true LIMIT 1"
                ))
                .bind(chain_to_str(chain))
                .bind(contract_address)
                .fetch_optional(&self.pool)
                .await?
            }
            TokenLookup::Symbol {
                chain,
                network_version,
                symbol,
            } => {
                sqlx::query_as::<_, TokenRow>(&format!(
                    "SELECT {TOKEN_COLUMNS} FROM tokens \
                     WHERE blockchain = $1 AND network_version = $2 \
                           AND lower(symbol) = lower($3) AND is_active = true LIMIT 1"
                ))
                .bind(chain_to_str(chain))
                .bind(network_version_to_str(network_version))
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        row.map(TokenRow::into_token).transpose()
    }

    async fn insert_deposit(&self, deposit: NewDeposit) -> Result<InsertOutcome, Error> {
        let metadata = serde_json::to_value(&deposit.metadata)?;
        let result = sqlx::query(
            "INSERT INTO deposits \
                 (user_id, wallet_id, token_id, tx_hash, amount, blockchain, network, \
                  network_version, block_number, status, confirmations, metadata, \
                  created_at, updated_at) \
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'pending', 0, $10, now(), now()) \
               ON CONFLICT (tx_hash, wallet_id, token_id) DO NOTHING",
        )
        .bind(deposit.user_id)
        .bind(deposit.wallet_id)
        .bind(deposit.token_id)
        .bind(deposit.tx_hash)
        .bind(deposit.amount.to_string())
        .bind(chain_to_str(deposit.blockchain))
        .bind(network_to_str(deposit.network))
        .bind(network_version_to_str(deposit.network_version))
        .bind(deposit.block_number as i64)
        .bind(metadata)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 1 {
            InsertOutcome::Inserted
        } else {
            InsertOutcome::AlreadyExists
        })
    }

    async fn find_confirmable_deposits(&self, target: ChainTarget) -> Result<Vec<Deposit>, Error> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {DEPOSIT_COLUMNS} FROM deposits \
             WHERE blockchain = $1 AND network = $2 AND block_number IS NOT NULL \
                   AND status IN ('pending', 'confirming')"
        ))
        .bind(chain_to_str(target.chain))
        .bind(network_to_str(target.network))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DepositRow::into_deposit).collect()
    }

    async fn apply_confirmation_update(
        &self,
        deposit_id: &str,
        confirmations: u64,
        new_status: DepositStatus,
    ) -> Result<ConfirmationOutcome, Error> {
        let mut tx = self.pool.begin().await?;

        let current = sqlx::query(
            "SELECT status, confirmations, token_id, user_id, amount \
             FROM deposits WHERE id = $1 FOR UPDATE",
        )
        .bind(deposit_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.commit().await?;
            return Ok(ConfirmationOutcome::NoChange);
        };

        let current_status: String = current.try_get("status")?;
        let current_confirmations: i64 = current.try_get("confirmations")?;
        let token_id: String = current.try_get("token_id")?;
        let user_id: String = current.try_get("user_id")?;
        let amount: String = current.try_get("amount")?;

        // I3: confirmed is terminal.
        if current_status == "confirmed" {
            tx.commit().await?;
            return Ok(ConfirmationOutcome::NoChange);
        }

        // I2: confirmations is monotonically non-decreasing.
        let next_confirmations = confirmations.max(current_confirmations.max(0) as u64);
        let next_status = status_to_str(new_status);

        sqlx::query(
            "UPDATE deposits SET confirmations = $1, status = $2, updated_at = now() \
             WHERE id = $3",
        )
        .bind(next_confirmations as i64)
        .bind(next_status)
        .bind(deposit_id)
        .execute(&mut *tx)
        .await?;

        if new_status != DepositStatus::Confirmed {
            tx.commit().await?;
            return Ok(ConfirmationOutcome::Advanced { status: new_status });
        }

        let outcome = credit_in_transaction(&mut tx, &token_id, &user_id, &amount).await?;

        tx.commit().await?;
        Ok(outcome)
    }

    async fn get_checkpoint(&self, target: ChainTarget) -> Result<u64, Error> {
        let row = sqlx::query("SELECT value FROM system_settings WHERE key = $1")
            .bind(target.checkpoint_key())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row
            .and_then(|r| r.try_get::<String, _>("value").ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0))
    }

    async fn set_checkpoint(&self, target: ChainTarget, height: u64) -> Result<(), Error> {
        sqlx::query(
            "INSERT INTO system_settings (key, value, created_at, updated_at) \
               VALUES ($1, $2, now(), now()) \
               ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = now()",
        )
        .bind(target.checkpoint_key())
        .bind(height.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Resolve the token and spot-balance row for a newly-confirmed deposit
/// and increment the balance, all inside the caller's transaction. The
/// status write already happened in the same transaction, so this either
/// commits alongside it or (on missing balance) simply doesn't touch the
/// balance table — the confirmed status still commits, per spec.md §4.6.
async fn credit_in_transaction(
    tx: &mut Transaction<'_, Postgres>,
    token_id: &str,
    user_id: &str,
    amount: &str,
) -> Result<ConfirmationOutcome, Error> {
    let token = sqlx::query("SELECT symbol, base_symbol FROM tokens WHERE id = $1")
        .bind(token_id)
        .fetch_optional(&mut **tx)
        .await?;

    let Some(token) = token else {
        return Ok(ConfirmationOutcome::Confirmed {
            credited: false,
            credit_failure: Some(format!("token {token_id} not found")),
        });
    };
    let symbol: String = token.try_get("symbol")?;
    let base_symbol: Option<String> = token.try_get("base_symbol")?;
    let settlement_symbol = base_symbol.unwrap_or(symbol);

    let updated = sqlx::query(
        "UPDATE wallet_balances SET balance = balance + $1::numeric \
           WHERE user_id = $2 AND base_symbol = $3 AND type = 'spot'",
    )
    .bind(amount)
    .bind(user_id)
    .bind(&settlement_symbol)
    .execute(&mut **tx)
    .await?;

    if updated.rows_affected() == 1 {
        Ok(ConfirmationOutcome::Confirmed {
            credited: true,
            credit_failure: None,
        })
    } else {
        Ok(ConfirmationOutcome::Confirmed {
            credited: false,
            credit_failure: Some(format!(
                "no spot balance row for {user_id}/{settlement_symbol}"
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Network;

    fn target() -> ChainTarget {
        ChainTarget::new(ChainKey::Eth, Network::Mainnet)
    }

    fn wallet() -> Wallet {
        Wallet {
            id: "w1".into(),
            user_id: "u1".into(),
            address: "0xabc".into(),
            chain: ChainKey::Eth,
            network: Network::Mainnet,
        }
    }

    #[test]
    fn wallet_cache_misses_until_populated_then_hits() {
        let cache = WalletCache::new(Duration::from_secs(5));
        assert!(cache.get(target()).is_none());
        cache.put(target(), vec![wallet()]);
        assert_eq!(cache.get(target()).unwrap().len(), 1);
    }

    #[test]
    fn wallet_cache_expires_after_ttl() {
        let cache = WalletCache::new(Duration::from_millis(0));
        cache.put(target(), vec![wallet()]);
        std::thread::sleep(Duration::from_millis(1));
        assert!(cache.get(target()).is_none());
    }
}
