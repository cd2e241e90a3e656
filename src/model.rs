//! Core data types shared by every layer: chain identity, wallets, tokens,
//! deposits and checkpoints.
//!
//! See spec.md §3 for the canonical definitions; this module is a direct
//! translation into Rust types with the invariants enforced where the type
//! system can express them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use time::OffsetDateTime;

/// One of the five blockchain families this tracker understands.
///
/// The external name `bitcoin` is normalized to `btc` at every storage and
/// checkpoint-key boundary; see [`ChainKey::from_external_name`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKey {
    /// Ethereum mainnet/testnet.
    Eth,
    /// BNB Smart Chain.
    Bsc,
    /// Bitcoin.
    Btc,
    /// Tron.
    Trx,
    /// XRP Ledger.
    Xrp,
}

impl ChainKey {
    /// All chain keys this tracker monitors, in a fixed order used for
    /// deterministic startup logging.
    pub const ALL: [ChainKey; 5] = [
        ChainKey::Eth,
        ChainKey::Bsc,
        ChainKey::Btc,
        ChainKey::Trx,
        ChainKey::Xrp,
    ];

    /// Normalize an externally-supplied chain name (as might come from
    /// configuration or an operator) to the canonical storage key. Maps
    /// `bitcoin` to `btc`; every other name is matched case-insensitively
    /// against the canonical keys.
    pub fn from_external_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "eth" | "ethereum" => Some(ChainKey::Eth),
            "bsc" | "binance-smart-chain" => Some(ChainKey::Bsc),
            "btc" | "bitcoin" => Some(ChainKey::Btc),
            "trx" | "tron" => Some(ChainKey::Trx),
            "xrp" | "ripple" => Some(ChainKey::Xrp),
            _ => None,
        }
    }

    /// The canonical short code used in storage keys and log lines.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChainKey::Eth => "eth",
            ChainKey::Bsc => "bsc",
            ChainKey::Btc => "btc",
            ChainKey::Trx => "trx",
            ChainKey::Xrp => "xrp",
        }
    }
}

impl fmt::Display for ChainKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mainnet or testnet, for a given [`ChainKey`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Production network.
    Mainnet,
    /// Test network.
    Testnet,
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Mainnet => f.write_str("mainnet"),
            Network::Testnet => f.write_str("testnet"),
        }
    }
}

/// The unique key used in queues, checkpoints and log lines: `(chain,
/// network)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainTarget {
    /// Which chain family.
    pub chain: ChainKey,
    /// Which network on that chain.
    pub network: Network,
}

impl ChainTarget {
    /// Construct a new target.
    pub fn new(chain: ChainKey, network: Network) -> Self {
        Self { chain, network }
    }

    /// The checkpoint key for this target: `last_processed_block_{chain}_{network}`.
    pub fn checkpoint_key(&self) -> String {
        format!("last_processed_block_{}_{}", self.chain, self.network)
    }
}

impl fmt::Display for ChainTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain, self.network)
    }
}

/// A wallet owned by the exchange. Immutable from the tracker's point of
/// view: it is read-only against the wallet directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wallet {
    /// Wallet id.
    pub id: String,
    /// Owning user id.
    pub user_id: String,
    /// On-chain address, in the canonical form for its chain (see
    /// [`Wallet::matches_address`]).
    pub address: String,
    /// Chain this wallet lives on.
    pub chain: ChainKey,
    /// Network this wallet lives on.
    pub network: Network,
}

impl Wallet {
    /// Compare a normalized transfer destination address against this
    /// wallet's address, using the per-chain comparison rule from spec.md
    /// §3: case-sensitive for Tron and XRP, case-insensitive for EVM,
    /// exact-string for Bitcoin.
    pub fn matches_address(&self, candidate: &str) -> bool {
        match self.chain {
            ChainKey::Eth | ChainKey::Bsc => self.address.eq_ignore_ascii_case(candidate),
            ChainKey::Btc | ChainKey::Trx | ChainKey::Xrp => self.address == candidate,
        }
    }
}

/// How a token is implemented on its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkVersion {
    /// The chain's native asset.
    Native,
    /// ERC-20 token on an EVM chain.
    Erc20,
    /// BEP-20 token on BSC.
    Bep20,
    /// TRC-20 token on Tron.
    Trc20,
}

impl fmt::Display for NetworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NetworkVersion::Native => "NATIVE",
            NetworkVersion::Erc20 => "ERC20",
            NetworkVersion::Bep20 => "BEP20",
            NetworkVersion::Trc20 => "TRC20",
        };
        f.write_str(s)
    }
}

/// An asset the exchange tracks deposits of.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Token id.
    pub id: String,
    /// Ticker symbol, e.g. `USDT`.
    pub symbol: String,
    /// The symbol balances are denominated in, if different from `symbol`
    /// (e.g. a wrapped or chain-specific variant settling to a base
    /// asset).
    pub base_symbol: Option<String>,
    /// Which chain this token lives on.
    pub blockchain: ChainKey,
    /// Contract address, for non-native tokens.
    pub contract_address: Option<String>,
    /// How the token is implemented on-chain.
    pub network_version: NetworkVersion,
    /// Number of decimal places used to convert raw on-chain integer
    /// amounts to human-decimal amounts.
    pub decimals: u32,
    /// Only active tokens may produce deposits.
    pub is_active: bool,
    /// Free-form metadata, e.g. display name.
    pub metadata: serde_json::Value,
}

impl Token {
    /// The symbol a credited balance should be denominated in.
    pub fn settlement_symbol(&self) -> &str {
        self.base_symbol.as_deref().unwrap_or(&self.symbol)
    }
}

/// A deposit's position in the confirmation state machine. See spec.md §3
/// for the transition rules: `pending -> confirming -> confirmed`,
/// `confirmed` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepositStatus {
    /// Just inserted, zero confirmations observed.
    Pending,
    /// `0 < confirmations < required`.
    Confirming,
    /// `confirmations >= required`. Terminal; credited exactly once on
    /// first entry.
    Confirmed,
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DepositStatus::Pending => "pending",
            DepositStatus::Confirming => "confirming",
            DepositStatus::Confirmed => "confirmed",
        };
        f.write_str(s)
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DepositStatus::Pending),
            "confirming" => Ok(DepositStatus::Confirming),
            "confirmed" => Ok(DepositStatus::Confirmed),
            other => Err(format!("unknown deposit status: {other}")),
        }
    }
}

/// Extra context about a deposit's origin, stored as `jsonb`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DepositMetadata {
    /// The sending address, if known.
    pub from: Option<String>,
    /// The token contract address, for token transfers.
    pub contract_address: Option<String>,
    /// The hash of the block the deposit transaction was included in.
    pub block_hash: String,
}

/// A tracked on-chain transfer, from first sight through credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    /// Deposit id.
    pub id: String,
    /// Owning user id, copied from the matched wallet.
    pub user_id: String,
    /// Matched wallet id.
    pub wallet_id: String,
    /// Resolved token id.
    pub token_id: String,
    /// On-chain transaction hash.
    pub tx_hash: String,
    /// Human-decimal amount, e.g. `"1.5"`.
    pub amount: Decimal,
    /// Chain the deposit was observed on.
    pub blockchain: ChainKey,
    /// Network the deposit was observed on.
    pub network: Network,
    /// How the token is implemented on-chain.
    pub network_version: NetworkVersion,
    /// Height of the block the deposit was included in. Non-null for any
    /// deposit not in an explicit orphaned state (I4).
    pub block_number: Option<u64>,
    /// Current status.
    pub status: DepositStatus,
    /// Monotonically non-decreasing confirmation count (I2).
    pub confirmations: u64,
    /// Extra context about the deposit's origin.
    pub metadata: DepositMetadata,
    /// Creation timestamp.
    pub created_at: OffsetDateTime,
    /// Last-update timestamp.
    pub updated_at: OffsetDateTime,
}

impl Deposit {
    /// The natural uniqueness key for a deposit (I1).
    pub fn dedupe_key(&self) -> (String, String, String) {
        (
            self.tx_hash.clone(),
            self.wallet_id.clone(),
            self.token_id.clone(),
        )
    }
}

/// A key/value checkpoint entry: `last_processed_block_{chain}_{network}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// The checkpoint key.
    pub key: String,
    /// The highest fully-processed block height, or `0` if none.
    pub height: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitcoin_external_name_normalizes_to_btc() {
        assert_eq!(
            ChainKey::from_external_name("bitcoin"),
            Some(ChainKey::Btc)
        );
        assert_eq!(ChainKey::from_external_name("BTC"), Some(ChainKey::Btc));
    }

    #[test]
    fn checkpoint_key_uses_normalized_chain_key() {
        let target = ChainTarget::new(ChainKey::Btc, Network::Mainnet);
        assert_eq!(target.checkpoint_key(), "last_processed_block_btc_mainnet");
    }

    #[test]
    fn evm_address_match_is_case_insensitive() {
        let wallet = Wallet {
            id: "w1".into(),
            user_id: "u1".into(),
            address: "0xABCDEF".into(),
            chain: ChainKey::Eth,
            network: Network::Mainnet,
        };
        assert!(wallet.matches_address("0xabcdef"));
        assert!(!wallet.matches_address("0xabcdee"));
    }

    #[test]
    fn tron_address_match_is_case_sensitive() {
        let wallet = Wallet {
            id: "w1".into(),
            user_id: "u1".into(),
            address: "TAbCdEf".into(),
            chain: ChainKey::Trx,
            network: Network::Mainnet,
        };
        assert!(wallet.matches_address("TAbCdEf"));
        assert!(!wallet.matches_address("tabcdef"));
    }

    #[test]
    fn settlement_symbol_falls_back_to_symbol() {
        let token = Token {
            id: "t1".into(),
            symbol: "USDT".into(),
            base_symbol: None,
            blockchain: ChainKey::Eth,
            contract_address: Some("0xdead".into()),
            network_version: NetworkVersion::Erc20,
            decimals: 6,
            is_active: true,
            metadata: serde_json::Value::Null,
        };
        assert_eq!(token.settlement_symbol(), "USDT");
    }
}
