//! Tron adapter: HTTP API with `TRON-PRO-API-KEY`, `getCurrentBlock` /
//! `getBlock(height)`. See spec.md §4.2, §6.

use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};

use crate::error::Error;
use crate::model::{ChainKey, Network};

use super::{retry_with_backoff, ChainAdapter, NormalizedBlock, NormalizedTx};

const MAX_ATTEMPTS: u32 = 5;
const RATE_LIMIT_FLOOR: Duration = Duration::from_secs(2);

/// A Tron HTTP API adapter.
#[derive(Debug, Clone)]
pub struct TronAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    network: Network,
}

impl TronAdapter {
    /// Build an adapter against `base_url`, sending `api_key` as
    /// `TRON-PRO-API-KEY` on every request when present.
    pub fn new(
        network: Network,
        base_url: String,
        api_key: Option<String>,
        rpc_timeout: Duration,
    ) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .timeout(rpc_timeout)
            .build()
            .map_err(|e| Error::AdapterInit {
                chain: ChainKey::Trx,
                network,
                message: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url,
            api_key,
            network,
        })
    }

    async fn call(&self, path: &str, body: Value) -> Result<Value, Error> {
        let network = self.network;
        let url = format!("{}{}", self.base_url, path);
        // §4.2: Tron's HTTP 403 rate-limit response gets a taller retry
        // budget (5 attempts) with a 2s floor, rather than the default
        // 3-attempt policy every other adapter uses.
        retry_with_backoff(MAX_ATTEMPTS, RATE_LIMIT_FLOOR, || async {
            let mut request = self.client.post(&url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("TRON-PRO-API-KEY", key);
            }
            let response = request.send().await.map_err(|e| Error::rpc(ChainKey::Trx, network, e))?;

            if response.status() == reqwest::StatusCode::FORBIDDEN {
                return Err(Error::rpc(ChainKey::Trx, network, RateLimited));
            }
            if !response.status().is_success() {
                let status = response.status();
                return Err(Error::rpc(ChainKey::Trx, network, HttpFailure(status.as_u16())));
            }

            response.json().await.map_err(|e| Error::rpc(ChainKey::Trx, network, e))
        })
        .await
    }
}

impl ChainAdapter for TronAdapter {
    async fn tip_height(&self) -> Result<u64, Error> {
        let block = self.call("/wallet/getnowblock", json!({})).await?;
        block_number(&block, self.network)
    }

    async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
        let block = self
            .call("/wallet/getblockbynum", json!({ "num": height }))
            .await?;

        if block.get("blockID").is_none() {
            return Err(Error::MissingBlock {
                chain: ChainKey::Trx,
                network: self.network,
                height,
            });
        }

        let hash = block
            .get("blockID")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut txs = Vec::new();
        for tx in block
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
        {
            if let Some(normalized) = normalize_tx(&tx, self.network)? {
                txs.push(normalized);
            }
        }

        Ok(NormalizedBlock { height, hash, txs })
    }

    fn chain(&self) -> ChainKey {
        ChainKey::Trx
    }

    fn network(&self) -> Network {
        self.network
    }
}

fn block_number(block: &Value, network: Network) -> Result<u64, Error> {
    block
        .pointer("/block_header/raw_data/number")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::MalformedResponse {
            chain: ChainKey::Trx,
            network,
            message: "missing block_header.raw_data.number".into(),
        })
}

fn normalize_tx(tx: &Value, network: Network) -> Result<Option<NormalizedTx>, Error> {
    let tx_hash = tx
        .get("txID")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let Some(contract) = tx.pointer("/raw_data/contract/0") else {
        return Ok(None);
    };
    let contract_type = contract.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let Some(value) = contract.pointer("/parameter/value") else {
        return Ok(None);
    };

    let owner_hex = value.get("owner_address").and_then(|v| v.as_str());
    let to_hex = value.get("to_address").and_then(|v| v.as_str());
    let (Some(owner_hex), Some(to_hex)) = (owner_hex, to_hex) else {
        return Ok(None);
    };
    let from = hex_to_base58check(owner_hex, network)?;
    let to = hex_to_base58check(to_hex, network)?;
    let amount = value.get("amount").and_then(|v| v.as_u64()).unwrap_or(0);

    match contract_type {
        "TransferContract" => Ok(Some(NormalizedTx::NativeTransfer {
            tx_hash,
            from,
            to,
            amount_raw: amount.to_string(),
        })),
        "TransferAssetContract" => {
            let symbol = value
                .get("asset_name")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(Some(NormalizedTx::TokenTransfer {
                tx_hash,
                from,
                to,
                contract_address: None,
                amount_raw: amount.to_string(),
                symbol,
            }))
        }
        _ => Ok(None),
    }
}

/// Convert a hex-encoded Tron address (21 bytes: `0x41` prefix + 20-byte
/// hash) into its base58check representation, per spec.md §4.2/§6.
fn hex_to_base58check(hex_address: &str, network: Network) -> Result<String, Error> {
    let bytes = hex::decode(hex_address).map_err(|e| Error::MalformedResponse {
        chain: ChainKey::Trx,
        network,
        message: format!("invalid hex address {hex_address}: {e}"),
    })?;

    let checksum = Sha256::digest(Sha256::digest(&bytes));
    let mut payload = bytes;
    payload.extend_from_slice(&checksum[..4]);
    Ok(bs58::encode(payload).into_string())
}

#[derive(Debug)]
struct RateLimited;

impl std::fmt::Display for RateLimited {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("rate limited (http 403)")
    }
}

impl std::error::Error for RateLimited {}

#[derive(Debug)]
struct HttpFailure(u16);

impl std::fmt::Display for HttpFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "http status {}", self.0)
    }
}

impl std::error::Error for HttpFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_address_round_trips_through_base58check() {
        let hex_address = "41e9d79cc8b2e23c68897e0380c827ad7080a0b665";
        let encoded = hex_to_base58check(hex_address, Network::Mainnet).unwrap();

        let decoded = bs58::decode(&encoded).into_vec().unwrap();
        assert_eq!(decoded.len(), 25); // 21-byte payload + 4-byte checksum
        let (payload, checksum) = decoded.split_at(21);
        assert_eq!(payload, hex::decode(hex_address).unwrap());
        let expected_checksum = Sha256::digest(Sha256::digest(payload));
        assert_eq!(checksum, &expected_checksum[..4]);
    }

    #[test]
    fn rejects_malformed_hex_address() {
        assert!(hex_to_base58check("not-hex", Network::Mainnet).is_err());
    }

    #[tokio::test]
    async fn fetch_block_returns_missing_block_without_block_id() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/wallet/getblockbynum")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let adapter = TronAdapter::new(
            Network::Mainnet,
            server.url(),
            None,
            Duration::from_secs(5),
        )
        .unwrap();

        let result = adapter.fetch_block(100).await;
        assert!(matches!(result, Err(Error::MissingBlock { height: 100, .. })));
    }
}
