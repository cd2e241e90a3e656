//! Ethereum/BSC adapter: JSON-RPC over HTTP via `reqwest`. See spec.md §4.2
//! and §6 for the exact methods and log-decoding contract.

use std::time::Duration;

use serde_json::{json, Value};

use crate::error::Error;
use crate::model::{ChainKey, Network};

use super::{retry_with_backoff, ChainAdapter, NormalizedBlock, NormalizedTx};

/// `keccak256("Transfer(address,address,uint256)")`, the ERC-20/BEP-20
/// `Transfer` event topic0.
const TRANSFER_TOPIC: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

const MAX_ATTEMPTS: u32 = 3;

/// An EVM chain adapter (eth/bsc), read-only against a JSON-RPC endpoint.
#[derive(Debug, Clone)]
pub struct EvmAdapter {
    client: reqwest::Client,
    rpc_url: String,
    chain: ChainKey,
    network: Network,
}

impl EvmAdapter {
    /// Build an adapter against `rpc_url`, timing out individual requests
    /// after `rpc_timeout`.
    pub fn new(
        chain: ChainKey,
        network: Network,
        rpc_url: String,
        rpc_timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| Error::AdapterInit {
                chain,
                network,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            rpc_url,
            chain,
            network,
        })
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, Error> {
        let chain = self.chain;
        let network = self.network;
        retry_with_backoff(MAX_ATTEMPTS, Duration::from_secs(0), || async {
            let body = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params,
            });
            let response = self
                .client
                .post(&self.rpc_url)
                .json(&body)
                .send()
                .await
                .map_err(|e| Error::rpc(chain, network, e))?;

            if !response.status().is_success() {
                let status = response.status();
                return Err(Error::rpc(
                    chain,
                    network,
                    TransportFailure(format!("http status {status}")),
                ));
            }

            let payload: Value = response
                .json()
                .await
                .map_err(|e| Error::rpc(chain, network, e))?;

            if let Some(error) = payload.get("error") {
                return Err(Error::MalformedResponse {
                    chain,
                    network,
                    message: format!("rpc error: {error}"),
                });
            }

            payload
                .get("result")
                .cloned()
                .ok_or_else(|| Error::MalformedResponse {
                    chain,
                    network,
                    message: "missing result field".into(),
                })
        })
        .await
    }

    async fn fetch_receipt_logs(&self, tx_hash: &str) -> Result<Vec<Value>, Error> {
        let receipt = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if receipt.is_null() {
            return Ok(Vec::new());
        }
        Ok(receipt
            .get("logs")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default())
    }
}

impl ChainAdapter for EvmAdapter {
    async fn tip_height(&self) -> Result<u64, Error> {
        let result = self.call("eth_blockNumber", json!([])).await?;
        parse_hex_u64(&result, self.chain, self.network)
    }

    async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
        let height_hex = format!("0x{height:x}");
        let block = self
            .call("eth_getBlockByNumber", json!([height_hex, true]))
            .await?;

        if block.is_null() {
            return Err(Error::MissingBlock {
                chain: self.chain,
                network: self.network,
                height,
            });
        }

        let hash = block
            .get("hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let raw_txs = block
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut txs = Vec::new();
        for tx in raw_txs {
            txs.extend(self.normalize_tx(&tx).await?);
        }

        Ok(NormalizedBlock { height, hash, txs })
    }

    fn chain(&self) -> ChainKey {
        self.chain
    }

    fn network(&self) -> Network {
        self.network
    }
}

impl EvmAdapter {
    async fn normalize_tx(&self, tx: &Value) -> Result<Vec<NormalizedTx>, Error> {
        let tx_hash = str_field(tx, "hash")?;
        let from = str_field(tx, "from")?.to_ascii_lowercase();
        let to = match tx.get("to").and_then(|v| v.as_str()) {
            Some(to) => to.to_ascii_lowercase(),
            // Contract-creation transactions have no `to`; never a deposit.
            None => return Ok(Vec::new()),
        };
        let input = tx.get("input").and_then(|v| v.as_str()).unwrap_or("0x");
        let value_raw = parse_hex_amount(tx.get("value"), self.chain, self.network)?;

        if input == "0x" || input.is_empty() {
            if value_raw == "0" {
                return Ok(Vec::new());
            }
            return Ok(vec![NormalizedTx::NativeTransfer {
                tx_hash,
                from,
                to,
                amount_raw: value_raw,
            }]);
        }

        // Calldata present: a contract interaction. Only emit a deposit if
        // the receipt contains a decodable ERC-20 `Transfer` log.
        let logs = self.fetch_receipt_logs(&tx_hash).await?;
        let mut out = Vec::new();
        for log in logs {
            let topics = log.get("topics").and_then(|v| v.as_array());
            let Some(topics) = topics else { continue };
            if topics.first().and_then(|v| v.as_str()) != Some(TRANSFER_TOPIC) {
                continue;
            }
            if topics.len() < 3 {
                continue;
            }
            let log_to = topic_to_address(topics[2].as_str().unwrap_or_default());
            let log_from = topic_to_address(topics[1].as_str().unwrap_or_default());
            let contract_address = log
                .get("address")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_ascii_lowercase();
            let amount_raw = parse_hex_amount(log.get("data"), self.chain, self.network)?;

            out.push(NormalizedTx::TokenTransfer {
                tx_hash: tx_hash.clone(),
                from: log_from,
                to: log_to,
                contract_address: Some(contract_address),
                amount_raw,
                symbol: None,
            });
        }
        Ok(out)
    }
}

fn str_field(value: &Value, field: &str) -> Result<String, Error> {
    value
        .get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::MalformedResponse {
            chain: ChainKey::Eth,
            network: Network::Mainnet,
            message: format!("missing field `{field}` on transaction"),
        })
}

fn parse_hex_u64(value: &Value, chain: ChainKey, network: Network) -> Result<u64, Error> {
    let hex = value.as_str().ok_or_else(|| Error::MalformedResponse {
        chain,
        network,
        message: "expected hex string".into(),
    })?;
    u64::from_str_radix(hex.trim_start_matches("0x"), 16).map_err(|e| Error::MalformedResponse {
        chain,
        network,
        message: format!("invalid hex height {hex}: {e}"),
    })
}

/// Parse a `0x`-prefixed hex quantity into a base-10 digit string, without
/// ever routing through a fixed-width integer type (on-chain amounts
/// routinely exceed `u128`).
fn parse_hex_amount(value: Option<&Value>, chain: ChainKey, network: Network) -> Result<String, Error> {
    let hex = value
        .and_then(|v| v.as_str())
        .unwrap_or("0x0")
        .trim_start_matches("0x");
    if hex.is_empty() {
        return Ok("0".to_string());
    }
    let digits = u128::from_str_radix(hex, 16).map_err(|e| Error::MalformedResponse {
        chain,
        network,
        message: format!("invalid hex amount 0x{hex}: {e}"),
    })?;
    Ok(digits.to_string())
}

/// A 32-byte topic encodes an address right-aligned; strip the leading
/// zero padding.
fn topic_to_address(topic: &str) -> String {
    let hex = topic.trim_start_matches("0x");
    let addr = if hex.len() >= 40 {
        &hex[hex.len() - 40..]
    } else {
        hex
    };
    format!("0x{}", addr.to_ascii_lowercase())
}

#[derive(Debug)]
struct TransportFailure(String);

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for TransportFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_amount_without_u64_overflow() {
        // 2^70, well beyond u64 range, still decodes correctly.
        let value = Value::String("0x400000000000000000".to_string());
        let amount = parse_hex_amount(Some(&value), ChainKey::Eth, Network::Mainnet).unwrap();
        assert_eq!(amount, (1u128 << 70).to_string());
    }

    #[test]
    fn topic_to_address_strips_zero_padding() {
        let topic = "0x000000000000000000000000aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        assert_eq!(topic_to_address(topic), "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
    }

    #[tokio::test]
    async fn fetch_block_returns_missing_block_for_null_result() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":null}"#)
            .create_async()
            .await;

        let adapter = EvmAdapter::new(
            ChainKey::Eth,
            Network::Mainnet,
            server.url(),
            Duration::from_secs(5),
        )
        .unwrap();

        let result = adapter.fetch_block(1000).await;
        assert!(matches!(result, Err(Error::MissingBlock { height: 1000, .. })));
    }

    #[tokio::test]
    async fn tip_height_parses_hex_block_number() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"jsonrpc":"2.0","id":1,"result":"0x3e8"}"#)
            .create_async()
            .await;

        let adapter = EvmAdapter::new(
            ChainKey::Eth,
            Network::Mainnet,
            server.url(),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(adapter.tip_height().await.unwrap(), 1000);
    }
}
