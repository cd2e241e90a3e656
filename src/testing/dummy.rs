//! Utilities for generating dummy values on this crate's domain types.

use fake::Fake;
use rand::Rng;
use rust_decimal::Decimal;
use time::OffsetDateTime;

use crate::chains::{MultiOutputEntry, NormalizedBlock, NormalizedTx};
use crate::model::{
    ChainKey, Deposit, DepositMetadata, DepositStatus, Network, NetworkVersion, Token, Wallet,
};

/// Dummy on-chain address, shaped for `chain`'s native format. Good enough
/// to round-trip through [`Wallet::matches_address`]; not a
/// validly-checksummed address.
fn address<R: rand::RngCore + ?Sized>(chain: ChainKey, rng: &mut R) -> String {
    let hex: String = (0..40).map(|_| format!("{:x}", rng.gen_range(0..16))).collect();
    match chain {
        ChainKey::Eth | ChainKey::Bsc => format!("0x{hex}"),
        ChainKey::Btc => format!("bc1q{}", &hex[..20]),
        ChainKey::Trx => format!("T{}", &hex[..33]),
        ChainKey::Xrp => format!("r{}", &hex[..25]),
    }
}

/// Dummy transaction/block hash, hex-encoded.
fn hash<R: rand::RngCore + ?Sized>(rng: &mut R) -> String {
    (0..64).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
}

/// Dummy row id, hex-encoded.
fn id<R: rand::RngCore + ?Sized>(rng: &mut R) -> String {
    (0..32).map(|_| format!("{:x}", rng.gen_range(0..16))).collect()
}

/// Dummy wallet on `chain`/`network`, owned by a random user.
pub fn wallet<R: rand::RngCore + ?Sized>(
    _config: &fake::Faker,
    chain: ChainKey,
    network: Network,
    rng: &mut R,
) -> Wallet {
    Wallet {
        id: id(rng),
        user_id: id(rng),
        address: address(chain, rng),
        chain,
        network,
    }
}

/// Dummy active token on `chain`, native or contract-backed depending on
/// `network_version`.
pub fn token<R: rand::RngCore + ?Sized>(
    _config: &fake::Faker,
    chain: ChainKey,
    network_version: NetworkVersion,
    rng: &mut R,
) -> Token {
    let contract_address = match network_version {
        NetworkVersion::Native => None,
        NetworkVersion::Erc20 | NetworkVersion::Bep20 | NetworkVersion::Trc20 => {
            Some(address(chain, rng))
        }
    };
    let decimals = *[6u32, 8, 18].get(rng.gen_range(0..3)).unwrap();
    Token {
        id: id(rng),
        symbol: fake::faker::lorem::en::Word()
            .fake_with_rng::<String, _>(rng)
            .to_uppercase(),
        base_symbol: None,
        blockchain: chain,
        contract_address,
        network_version,
        decimals,
        is_active: true,
        metadata: serde_json::Value::Null,
    }
}

/// Dummy pending deposit for `wallet`/`token`, with zero confirmations and
/// no block assigned yet, matching a just-inserted row (I4).
pub fn pending_deposit<R: rand::RngCore + ?Sized>(
    _config: &fake::Faker,
    wallet: &Wallet,
    token: &Token,
    rng: &mut R,
) -> Deposit {
    let now = OffsetDateTime::now_utc();
    Deposit {
        id: id(rng),
        user_id: wallet.user_id.clone(),
        wallet_id: wallet.id.clone(),
        token_id: token.id.clone(),
        tx_hash: hash(rng),
        amount: Decimal::new(rng.gen_range(1..1_000_000), 2),
        blockchain: wallet.chain,
        network: wallet.network,
        network_version: token.network_version,
        block_number: None,
        status: DepositStatus::Pending,
        confirmations: 0,
        metadata: DepositMetadata {
            from: Some(address(wallet.chain, rng)),
            contract_address: token.contract_address.clone(),
            block_hash: hash(rng),
        },
        created_at: now,
        updated_at: now,
    }
}

/// Dummy normalized block for `chain` at `height`, containing a single
/// transfer into `to`. Bitcoin produces a [`NormalizedTx::MultiOutput`],
/// XRP a [`NormalizedTx::Payment`], everything else a
/// [`NormalizedTx::NativeTransfer`].
pub fn normalized_block<R: rand::RngCore + ?Sized>(
    _config: &fake::Faker,
    chain: ChainKey,
    height: u64,
    to: &str,
    rng: &mut R,
) -> NormalizedBlock {
    let tx_hash = hash(rng);
    let from = address(chain, rng);
    let tx = match chain {
        ChainKey::Btc => NormalizedTx::MultiOutput {
            tx_id: tx_hash,
            outputs: vec![MultiOutputEntry {
                address: to.to_string(),
                amount_decimal: Decimal::new(rng.gen_range(1..100_000), 8),
            }],
        },
        ChainKey::Xrp => NormalizedTx::Payment {
            tx_hash,
            from,
            to: to.to_string(),
            amount: Decimal::new(rng.gen_range(1..100_000), 6),
        },
        ChainKey::Eth | ChainKey::Bsc | ChainKey::Trx => NormalizedTx::NativeTransfer {
            tx_hash,
            from,
            to: to.to_string(),
            amount_raw: rng.gen_range(1u64..1_000_000_000_000u64).to_string(),
        },
    };
    NormalizedBlock {
        height,
        hash: hash(rng),
        txs: vec![tx],
    }
}
