//! XRP Ledger adapter: WebSocket, `server_info` / `ledger` commands. See
//! spec.md §4.2, §6.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use crate::amount::{drops_to_xrp, parse_decimal_string};
use crate::error::Error;
use crate::model::{ChainKey, Network};

use super::{retry_with_backoff, ChainAdapter, NormalizedBlock, NormalizedTx};

const MAX_ATTEMPTS: u32 = 3;

/// An XRP Ledger adapter. Each call opens a short-lived WebSocket
/// connection: the pull-mode pipeline calls this infrequently enough
/// (per `checkInterval`) that holding a long-lived connection open isn't
/// worth the reconnect-on-drop complexity.
#[derive(Debug, Clone)]
pub struct XrpAdapter {
    ws_url: String,
    network: Network,
}

impl XrpAdapter {
    /// Build an adapter against a `ws://`/`wss://` endpoint.
    pub fn new(network: Network, ws_url: String) -> Self {
        Self { ws_url, network }
    }

    async fn call(&self, command: Value) -> Result<Value, Error> {
        let network = self.network;
        let ws_url = self.ws_url.clone();
        retry_with_backoff(MAX_ATTEMPTS, Duration::from_secs(0), move || {
            let ws_url = ws_url.clone();
            let command = command.clone();
            async move {
                let (mut stream, _) = tokio_tungstenite::connect_async(&ws_url)
                    .await
                    .map_err(|e| Error::rpc(ChainKey::Xrp, network, e))?;

                stream
                    .send(Message::Text(command.to_string()))
                    .await
                    .map_err(|e| Error::rpc(ChainKey::Xrp, network, e))?;

                let message = stream
                    .next()
                    .await
                    .ok_or_else(|| Error::MalformedResponse {
                        chain: ChainKey::Xrp,
                        network,
                        message: "websocket closed without a response".into(),
                    })?
                    .map_err(|e| Error::rpc(ChainKey::Xrp, network, e))?;

                let text = message.into_text().map_err(|e| Error::rpc(ChainKey::Xrp, network, e))?;
                let value: Value = serde_json::from_str(&text)?;

                if let Some(err) = value.get("error") {
                    return Err(Error::MalformedResponse {
                        chain: ChainKey::Xrp,
                        network,
                        message: format!("xrpl error: {err}"),
                    });
                }

                value.get("result").cloned().ok_or_else(|| Error::MalformedResponse {
                    chain: ChainKey::Xrp,
                    network,
                    message: "missing result field".into(),
                })
            }
        })
        .await
    }
}

impl ChainAdapter for XrpAdapter {
    async fn tip_height(&self) -> Result<u64, Error> {
        let result = self.call(json!({ "command": "server_info" })).await?;
        result
            .pointer("/info/validated_ledger/seq")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| Error::MalformedResponse {
                chain: ChainKey::Xrp,
                network: self.network,
                message: "missing info.validated_ledger.seq".into(),
            })
    }

    async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
        let result = self
            .call(json!({
                "command": "ledger",
                "ledger_index": height,
                "transactions": true,
                "expand": true,
            }))
            .await?;

        let Some(ledger) = result.get("ledger") else {
            return Err(Error::MissingBlock {
                chain: ChainKey::Xrp,
                network: self.network,
                height,
            });
        };

        let hash = ledger
            .get("ledger_hash")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let mut txs = Vec::new();
        for tx in ledger
            .get("transactions")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
        {
            if let Some(payment) = self.normalize_payment(&tx)? {
                txs.push(payment);
            }
        }

        Ok(NormalizedBlock { height, hash, txs })
    }

    fn chain(&self) -> ChainKey {
        ChainKey::Xrp
    }

    fn network(&self) -> Network {
        self.network
    }
}

impl XrpAdapter {
    fn normalize_payment(&self, tx: &Value) -> Result<Option<NormalizedTx>, Error> {
        if tx.get("TransactionType").and_then(|v| v.as_str()) != Some("Payment") {
            return Ok(None);
        }
        let tx_hash = tx.get("hash").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let from = tx.get("Account").and_then(|v| v.as_str()).unwrap_or_default().to_string();
        let to = tx
            .get("Destination")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let amount = normalize_amount(tx.get("Amount"), self.network)?;

        Ok(Some(NormalizedTx::Payment {
            tx_hash,
            from,
            to,
            amount,
        }))
    }
}

/// Normalize an XRPL `Amount` field: a drops string for native XRP, or an
/// object `{currency, issuer, value}` for issued currencies. Resolved to
/// decimal form here, at the adapter boundary, per SPEC_FULL.md §10.
fn normalize_amount(amount: Option<&Value>, network: Network) -> Result<Decimal, Error> {
    match amount {
        Some(Value::String(drops)) => drops_to_xrp(drops),
        Some(Value::Object(obj)) => {
            let value = obj.get("value").and_then(|v| v.as_str()).ok_or_else(|| {
                Error::MalformedResponse {
                    chain: ChainKey::Xrp,
                    network,
                    message: "issued-currency amount missing `value`".into(),
                }
            })?;
            parse_decimal_string(value)
        }
        _ => Err(Error::MalformedResponse {
            chain: ChainKey::Xrp,
            network,
            message: "missing or unrecognized Amount shape".into(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn normalizes_drops_amount() {
        let amount = normalize_amount(Some(&json!("1000000")), Network::Mainnet).unwrap();
        assert_eq!(amount, dec!(1));
    }

    #[test]
    fn normalizes_issued_currency_amount() {
        let amount = normalize_amount(
            Some(&json!({ "currency": "USD", "issuer": "rIssuer", "value": "12.5" })),
            Network::Mainnet,
        )
        .unwrap();
        assert_eq!(amount, dec!(12.5));
    }
}
