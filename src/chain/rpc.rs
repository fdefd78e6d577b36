//! wRPC adapter: `ChainClient` over a kaspad Borsh endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kaspa_addresses::Address;
use kaspa_consensus_core::tx::{Transaction, TransactionId, TransactionOutpoint};
use kaspa_rpc_core::{RpcError, RpcTransaction};
use kaspa_wrpc_client::KaspaRpcClient;
use kaspa_wrpc_client::client::ConnectOptions;
use kaspa_wrpc_client::prelude::{NetworkId, NetworkType, RpcApi, WrpcEncoding};
use tokio::time::timeout;

use super::{ChainClient, ChainError, ContractUtxo};
use crate::config::NodeConfig;

/// Upper bound for any single node call.
pub const RPC_CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct RpcChainClient {
    client: Arc<KaspaRpcClient>,
    url: String,
    call_timeout: Duration,
}

/// Map a network name from config onto a wRPC network id.
pub fn parse_network(network: &str) -> NetworkId {
    match network {
        "mainnet" => NetworkId::new(NetworkType::Mainnet),
        "testnet-10" | "testnet10" => NetworkId::with_suffix(NetworkType::Testnet, 10),
        "devnet" => NetworkId::new(NetworkType::Devnet),
        "simnet" => NetworkId::new(NetworkType::Simnet),
        _ => NetworkId::with_suffix(NetworkType::Testnet, 12),
    }
}

impl RpcChainClient {
    /// Build an unconnected client for `node`.
    pub fn new(node: &NodeConfig) -> Result<Self, ChainError> {
        let client = KaspaRpcClient::new(
            WrpcEncoding::Borsh,
            Some(node.rpc_url.as_str()),
            None,
            Some(parse_network(&node.network)),
            None,
        )
        .map_err(|e| ChainError::Unavailable(format!("client construction: {e}")))?;
        Ok(Self {
            client: Arc::new(client),
            url: node.rpc_url.clone(),
            call_timeout: Duration::from_secs(node.call_timeout_secs.max(1)),
        })
    }

    /// Connect, blocking until the socket is up or the call timeout elapses.
    pub async fn connect(&self) -> Result<(), ChainError> {
        let options = ConnectOptions {
            block_async_connect: true,
            connect_timeout: Some(self.call_timeout),
            ..Default::default()
        };
        self.client
            .connect(Some(options))
            .await
            .map_err(|e| ChainError::Unavailable(format!("connect: {e}")))?;
        tracing::info!(url = %self.url, "connected to kaspad");
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Err(e) = self.client.disconnect().await {
            tracing::debug!(error = %e, "disconnect failed");
        }
    }

    async fn bounded<T, F>(&self, what: &str, fut: F) -> Result<T, ChainError>
    where
        F: std::future::Future<Output = Result<T, RpcError>>,
    {
        match timeout(self.call_timeout, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(classify_rpc_error(e)),
            Err(_) => Err(ChainError::Unavailable(format!(
                "{what} timed out after {}s",
                self.call_timeout.as_secs()
            ))),
        }
    }
}

/// Node-side refusals are `Rejected`; anything else is transport trouble.
fn classify_rpc_error(e: RpcError) -> ChainError {
    match e {
        RpcError::RejectedTransaction(_, reason) => ChainError::Rejected(reason),
        other => ChainError::Unavailable(other.to_string()),
    }
}

#[async_trait]
impl ChainClient for RpcChainClient {
    async fn get_utxos_by_address(
        &self,
        address: &Address,
    ) -> Result<Vec<ContractUtxo>, ChainError> {
        let entries = self
            .bounded(
                "get_utxos_by_addresses",
                self.client.get_utxos_by_addresses(vec![address.clone()]),
            )
            .await?;
        Ok(entries
            .into_iter()
            .map(|e| ContractUtxo {
                outpoint: TransactionOutpoint::new(e.outpoint.transaction_id, e.outpoint.index),
                amount: e.utxo_entry.amount,
                block_daa_score: e.utxo_entry.block_daa_score,
                script_public_key: e.utxo_entry.script_public_key.clone(),
                is_coinbase: e.utxo_entry.is_coinbase,
            })
            .collect())
    }

    async fn get_virtual_daa_score(&self) -> Result<u64, ChainError> {
        let info = self
            .bounded("get_block_dag_info", self.client.get_block_dag_info())
            .await?;
        Ok(info.virtual_daa_score)
    }

    async fn submit_transaction(
        &self,
        tx: &Transaction,
        allow_orphan: bool,
    ) -> Result<TransactionId, ChainError> {
        let rpc_tx: RpcTransaction = tx.into();
        self.bounded(
            "submit_transaction",
            self.client.submit_transaction(rpc_tx, allow_orphan),
        )
        .await
    }
}
