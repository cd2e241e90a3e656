//! Bitcoin adapter: `bitcoincore-rpc` against `getblockhash`/`getblock`
//! verbosity 2. See spec.md §4.2, §6.

use std::sync::Arc;
use std::time::Duration;

use bitcoincore_rpc::{Auth, RpcApi};

use crate::amount::scale_raw_integer;
use crate::error::Error;
use crate::model::{ChainKey, Network};

use super::{retry_with_backoff, ChainAdapter, MultiOutputEntry, NormalizedBlock, NormalizedTx};

const MAX_ATTEMPTS: u32 = 3;
const BTC_DECIMALS: u32 = 8;

/// A Bitcoin Core-backed adapter. The underlying RPC client is
/// synchronous, so every call is dispatched through
/// [`tokio::task::spawn_blocking`].
#[derive(Clone)]
pub struct BitcoinAdapter {
    client: Arc<bitcoincore_rpc::Client>,
    network: Network,
    bitcoin_network: bitcoin::Network,
}

impl std::fmt::Debug for BitcoinAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BitcoinAdapter")
            .field("network", &self.network)
            .finish()
    }
}

impl BitcoinAdapter {
    /// Connect to `rpc_url`, with HTTP basic auth when credentials are
    /// present, otherwise unauthenticated (per spec.md §6).
    pub fn new(
        network: Network,
        rpc_url: &str,
        rpc_user: Option<String>,
        rpc_password: Option<String>,
    ) -> Result<Self, Error> {
        let auth = match (rpc_user, rpc_password) {
            (Some(user), Some(password)) => Auth::UserPass(user, password),
            _ => Auth::None,
        };
        let client = bitcoincore_rpc::Client::new(rpc_url, auth).map_err(|e| Error::AdapterInit {
            chain: ChainKey::Btc,
            network,
            message: e.to_string(),
        })?;
        let bitcoin_network = match network {
            Network::Mainnet => bitcoin::Network::Bitcoin,
            Network::Testnet => bitcoin::Network::Testnet,
        };
        Ok(Self {
            client: Arc::new(client),
            network,
            bitcoin_network,
        })
    }

    /// Run `f` against the RPC client on the blocking pool, retrying
    /// transient failures with the spec.md §4.2 linear backoff. `f` is
    /// cloned into each attempt's blocking task rather than shared by
    /// reference, so every retry gets its own `'static` task.
    async fn call_blocking<T, F>(&self, f: F) -> Result<T, Error>
    where
        T: Send + 'static,
        F: Fn(&bitcoincore_rpc::Client) -> Result<T, bitcoincore_rpc::Error>
            + Clone
            + Send
            + 'static,
    {
        let network = self.network;
        let client = Arc::clone(&self.client);
        retry_with_backoff(MAX_ATTEMPTS, Duration::from_secs(0), move || {
            let client = Arc::clone(&client);
            let f = f.clone();
            async move {
                tokio::task::spawn_blocking(move || f(&client))
                    .await
                    .map_err(|e| Error::rpc(ChainKey::Btc, network, JoinFailure(e.to_string())))?
                    .map_err(|e| Error::rpc(ChainKey::Btc, network, e))
            }
        })
        .await
    }
}

impl ChainAdapter for BitcoinAdapter {
    async fn tip_height(&self) -> Result<u64, Error> {
        self.call_blocking(|c| c.get_block_count()).await
    }

    async fn fetch_block(&self, height: u64) -> Result<NormalizedBlock, Error> {
        let hash = match self
            .call_blocking(move |c| c.get_block_hash(height))
            .await
        {
            Ok(hash) => hash,
            Err(_) => {
                return Err(Error::MissingBlock {
                    chain: ChainKey::Btc,
                    network: self.network,
                    height,
                })
            }
        };

        let block = self.call_blocking(move |c| c.get_block(&hash)).await?;

        let mut txs = Vec::new();
        for tx in &block.txdata {
            let tx_id = tx.compute_txid().to_string();
            let mut outputs = Vec::new();
            for out in &tx.output {
                let Ok(address) =
                    bitcoin::Address::from_script(&out.script_pubkey, self.bitcoin_network)
                else {
                    continue;
                };
                let amount_decimal = scale_raw_integer(&out.value.to_sat().to_string(), BTC_DECIMALS)?;
                outputs.push(MultiOutputEntry {
                    address: address.to_string(),
                    amount_decimal,
                });
            }
            if !outputs.is_empty() {
                txs.push(NormalizedTx::MultiOutput { tx_id, outputs });
            }
        }

        Ok(NormalizedBlock {
            height,
            hash: block.block_hash().to_string(),
            txs,
        })
    }

    fn chain(&self) -> ChainKey {
        ChainKey::Btc
    }

    fn network(&self) -> Network {
        self.network
    }
}

#[derive(Debug)]
struct JoinFailure(String);

impl std::fmt::Display for JoinFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for JoinFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_network_to_bitcoin_network() {
        let adapter = BitcoinAdapter::new(Network::Testnet, "http://127.0.0.1:18332", None, None)
            .expect("constructing the rpc client does not itself connect");
        assert_eq!(adapter.bitcoin_network, bitcoin::Network::Testnet);
        assert_eq!(adapter.chain(), ChainKey::Btc);
    }
}
