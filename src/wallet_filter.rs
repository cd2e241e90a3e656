//! Wallet Filter & Deposit Writer. See spec.md §4.4.
//!
//! Matches each normalized transaction's destination(s) against the
//! wallet directory for one `(chain, network)`, resolves the transferred
//! [`crate::model::Token`], converts the amount to human-decimal form,
//! and writes a `pending` deposit row.

use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use crate::amount::scale_raw_integer;
use crate::chains::{NormalizedBlock, NormalizedTx};
use crate::error::Error;
use crate::model::{ChainKey, ChainTarget, DepositMetadata, NetworkVersion, Wallet};
use crate::storage::{NewDeposit, Storage, TokenLookup};

/// Stateless over one call: wallets are reloaded per block (see spec.md
/// §9 open question (a); a TTL cache sits in front of
/// [`Storage::find_wallets`] in the production Storage Gateway instead
/// of being re-implemented here).
#[derive(Debug, Clone)]
pub struct WalletFilter<S> {
    storage: S,
}

impl<S> WalletFilter<S>
where
    S: Storage,
{
    /// Build a filter over a storage gateway.
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Apply the wallet filter to every transaction in `block`, inserting
    /// a `pending` deposit for each match. A single transaction's
    /// processing error is logged and skipped (spec.md §7.3), except
    /// [`Error::ActiveTokenMissing`] (spec.md §4.4 point 4's fatal
    /// configuration case), which aborts the rest of the block.
    #[tracing::instrument(skip(self, block), fields(chain = %target.chain, network = %target.network, height = block.height))]
    pub async fn process_block(&self, target: ChainTarget, block: &NormalizedBlock) -> Result<(), Error> {
        let wallets = self.storage.find_wallets(target).await?;
        if wallets.is_empty() {
            return Ok(());
        }

        for tx in &block.txs {
            match self.process_tx(target, &wallets, block, tx).await {
                Ok(()) => {}
                Err(error @ Error::ActiveTokenMissing { .. }) => {
                    error!(%error, "aborting block: no active token configured for this chain");
                    crate::metrics::adapter_error(target.chain, target.network, error.kind());
                    return Err(error);
                }
                Err(error) => {
                    warn!(%error, "skipping transaction after processing error");
                }
            }
        }
        Ok(())
    }

    async fn process_tx(
        &self,
        target: ChainTarget,
        wallets: &[Wallet],
        block: &NormalizedBlock,
        tx: &NormalizedTx,
    ) -> Result<(), Error> {
        match tx {
            NormalizedTx::NativeTransfer {
                tx_hash,
                from,
                to,
                amount_raw,
            } => {
                let Some(wallet) = match_one(wallets, to) else {
                    return Ok(());
                };
                self.write_deposit(
                    target,
                    block,
                    wallet,
                    tx_hash,
                    Some(from.clone()),
                    None,
                    amount_raw,
                    TokenLookup::Native { chain: target.chain },
                )
                .await
            }
            NormalizedTx::TokenTransfer {
                tx_hash,
                from,
                to,
                contract_address,
                amount_raw,
                symbol,
            } => {
                let Some(wallet) = match_one(wallets, to) else {
                    return Ok(());
                };
                let lookup = token_lookup_for_transfer(target.chain, contract_address.as_deref(), symbol.as_deref())?;
                self.write_deposit(
                    target,
                    block,
                    wallet,
                    tx_hash,
                    Some(from.clone()),
                    contract_address.clone(),
                    amount_raw,
                    lookup,
                )
                .await
            }
            NormalizedTx::MultiOutput { tx_id, outputs } => {
                for output in outputs {
                    let Some(wallet) = match_one(wallets, &output.address) else {
                        continue;
                    };
                    self.write_decimal_deposit(
                        target,
                        block,
                        wallet,
                        tx_id,
                        None,
                        None,
                        output.amount_decimal,
                        TokenLookup::Symbol {
                            chain: ChainKey::Btc,
                            network_version: NetworkVersion::Native,
                            symbol: "BTC".to_string(),
                        },
                    )
                    .await?;
                }
                Ok(())
            }
            NormalizedTx::Payment { tx_hash, from, to, amount } => {
                let Some(wallet) = match_one(wallets, to) else {
                    return Ok(());
                };
                self.write_decimal_deposit(
                    target,
                    block,
                    wallet,
                    tx_hash,
                    Some(from.clone()),
                    None,
                    *amount,
                    TokenLookup::Symbol {
                        chain: ChainKey::Xrp,
                        network_version: NetworkVersion::Native,
                        symbol: "XRP".to_string(),
                    },
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_deposit(
        &self,
        target: ChainTarget,
        block: &NormalizedBlock,
        wallet: &Wallet,
        tx_hash: &str,
        from: Option<String>,
        contract_address: Option<String>,
        amount_raw: &str,
        lookup: TokenLookup,
    ) -> Result<(), Error> {
        let Some(token) = self.storage.find_token(lookup).await? else {
            // §7.4: token not found for an otherwise-valid transfer is
            // silently ignored, not an error.
            debug!(tx_hash, "no active token matched transfer; ignoring");
            return Ok(());
        };
        let amount = scale_raw_integer(amount_raw, token.decimals)?;
        self.insert(target, block, wallet, &token.id, tx_hash, from, contract_address, amount, token.network_version)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_decimal_deposit(
        &self,
        target: ChainTarget,
        block: &NormalizedBlock,
        wallet: &Wallet,
        tx_hash: &str,
        from: Option<String>,
        contract_address: Option<String>,
        amount: Decimal,
        lookup: TokenLookup,
    ) -> Result<(), Error> {
        let Some(token) = self.storage.find_token(lookup).await? else {
            // §4.4 point 4: BTC/XRP track exactly one active token; its
            // absence is a configuration error, not a routine miss.
            return Err(Error::ActiveTokenMissing {
                chain: target.chain,
                network: target.network,
            });
        };
        self.insert(target, block, wallet, &token.id, tx_hash, from, contract_address, amount, token.network_version)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert(
        &self,
        target: ChainTarget,
        block: &NormalizedBlock,
        wallet: &Wallet,
        token_id: &str,
        tx_hash: &str,
        from: Option<String>,
        contract_address: Option<String>,
        amount: Decimal,
        network_version: NetworkVersion,
    ) -> Result<(), Error> {
        let new_deposit = NewDeposit {
            user_id: wallet.user_id.clone(),
            wallet_id: wallet.id.clone(),
            token_id: token_id.to_string(),
            tx_hash: tx_hash.to_string(),
            amount,
            blockchain: target.chain,
            network: target.network,
            network_version,
            block_number: block.height,
            metadata: DepositMetadata {
                from,
                contract_address,
                block_hash: block.hash.clone(),
            },
        };
        if self.storage.insert_deposit(new_deposit).await? == crate::storage::InsertOutcome::Inserted {
            crate::metrics::deposit_inserted(target.chain, target.network);
        }
        Ok(())
    }
}

fn match_one<'a>(wallets: &'a [Wallet], candidate: &str) -> Option<&'a Wallet> {
    wallets.iter().find(|w| w.matches_address(candidate))
}

/// Resolve a [`TokenLookup`] for a token transfer per spec.md §4.4 point 4.
fn token_lookup_for_transfer(
    chain: ChainKey,
    contract_address: Option<&str>,
    symbol: Option<&str>,
) -> Result<TokenLookup, Error> {
    if let Some(contract_address) = contract_address {
        return Ok(TokenLookup::ContractAddress {
            chain,
            contract_address: contract_address.to_ascii_lowercase(),
        });
    }
    if let Some(symbol) = symbol {
        return Ok(TokenLookup::Symbol {
            chain,
            network_version: NetworkVersion::Trc20,
            symbol: symbol.to_string(),
        });
    }
    Err(Error::MalformedResponse {
        chain,
        network: crate::model::Network::Mainnet,
        message: "token transfer carries neither a contract address nor a symbol".into(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChainKey, DepositStatus, Network, Token};
    use crate::storage::memory::MemoryStorage;
    use rust_decimal_macros::dec;

    fn target() -> ChainTarget {
        ChainTarget::new(ChainKey::Eth, Network::Mainnet)
    }

    fn eth_wallet() -> Wallet {
        Wallet {
            id: "w1".into(),
            user_id: "u1".into(),
            address: "0xabc".into(),
            chain: ChainKey::Eth,
            network: Network::Mainnet,
        }
    }

    fn native_eth_token() -> Token {
        Token {
            id: "tok-eth".into(),
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

    #[tokio::test]
    async fn native_transfer_matching_wallet_produces_pending_deposit() {
        let storage = MemoryStorage::new();
        storage.insert_wallet(eth_wallet()).await;
        storage.insert_token(native_eth_token()).await;
        let filter = WalletFilter::new(storage.clone());

        let block = NormalizedBlock {
            height: 1000,
            hash: "0xblockhash".into(),
            txs: vec![NormalizedTx::NativeTransfer {
                tx_hash: "0xhash".into(),
                from: "0xsender".into(),
                to: "0xABC".into(),
                amount_raw: "1000000000000000000".into(),
            }],
        };

        filter.process_block(target(), &block).await.unwrap();

        let deposits = storage.all_deposits().await;
        assert_eq!(deposits.len(), 1);
        assert_eq!(deposits[0].amount, dec!(1.0));
        assert_eq!(deposits[0].status, DepositStatus::Pending);
        assert_eq!(deposits[0].block_number, Some(1000));
    }

    #[tokio::test]
    async fn unmatched_destination_produces_no_deposit() {
        let storage = MemoryStorage::new();
        storage.insert_wallet(eth_wallet()).await;
        storage.insert_token(native_eth_token()).await;
        let filter = WalletFilter::new(storage.clone());

        let block = NormalizedBlock {
            height: 1000,
            hash: "0xblockhash".into(),
            txs: vec![NormalizedTx::NativeTransfer {
                tx_hash: "0xhash".into(),
                from: "0xsender".into(),
                to: "0xdeadbeef".into(),
                amount_raw: "1000000000000000000".into(),
            }],
        };

        filter.process_block(target(), &block).await.unwrap();
        assert!(storage.all_deposits().await.is_empty());
    }

    #[tokio::test]
    async fn bitcoin_multi_output_produces_one_deposit_per_matched_wallet() {
        let storage = MemoryStorage::new();
        storage
            .insert_wallet(Wallet {
                id: "w1".into(),
                user_id: "u1".into(),
                address: "bc1q1".into(),
                chain: ChainKey::Btc,
                network: Network::Mainnet,
            })
            .await;
        storage
            .insert_wallet(Wallet {
                id: "w3".into(),
                user_id: "u3".into(),
                address: "bc1q3".into(),
                chain: ChainKey::Btc,
                network: Network::Mainnet,
            })
            .await;
        storage
            .insert_token(Token {
                id: "tok-btc".into(),
                symbol: "BTC".into(),
                base_symbol: None,
                blockchain: ChainKey::Btc,
                contract_address: None,
                network_version: NetworkVersion::Native,
                decimals: 8,
                is_active: true,
                metadata: serde_json::Value::Null,
            })
            .await;
        let filter = WalletFilter::new(storage.clone());

        let block = NormalizedBlock {
            height: 800_000,
            hash: "blockhash".into(),
            txs: vec![NormalizedTx::MultiOutput {
                tx_id: "txid".into(),
                outputs: vec![
                    crate::chains::MultiOutputEntry {
                        address: "bc1q1".into(),
                        amount_decimal: dec!(0.1),
                    },
                    crate::chains::MultiOutputEntry {
                        address: "bc1q2".into(),
                        amount_decimal: dec!(0.2),
                    },
                    crate::chains::MultiOutputEntry {
                        address: "bc1q3".into(),
                        amount_decimal: dec!(0.3),
                    },
                ],
            }],
        };

        filter
            .process_block(ChainTarget::new(ChainKey::Btc, Network::Mainnet), &block)
            .await
            .unwrap();

        let deposits = storage.all_deposits().await;
        assert_eq!(deposits.len(), 2);
        let amounts: Vec<_> = deposits.iter().map(|d| d.amount).collect();
        assert!(amounts.contains(&dec!(0.1)));
        assert!(amounts.contains(&dec!(0.3)));
    }

    #[tokio::test]
    async fn bitcoin_deposit_with_no_active_token_aborts_the_block() {
        // No BTC token registered at all: a configuration error, distinct
        // from an unmatched-transfer miss.
        let storage = MemoryStorage::new();
        storage
            .insert_wallet(Wallet {
                id: "w1".into(),
                user_id: "u1".into(),
                address: "bc1q1".into(),
                chain: ChainKey::Btc,
                network: Network::Mainnet,
            })
            .await;
        let filter = WalletFilter::new(storage.clone());

        let block = NormalizedBlock {
            height: 800_000,
            hash: "blockhash".into(),
            txs: vec![NormalizedTx::MultiOutput {
                tx_id: "txid".into(),
                outputs: vec![crate::chains::MultiOutputEntry {
                    address: "bc1q1".into(),
                    amount_decimal: dec!(0.1),
                }],
            }],
        };

        let result = filter
            .process_block(ChainTarget::new(ChainKey::Btc, Network::Mainnet), &block)
            .await;

        assert!(matches!(result, Err(Error::ActiveTokenMissing { .. })));
        assert!(storage.all_deposits().await.is_empty());
    }
}
