//! Ledger access.
//!
//! The claim pipeline only ever talks to the node through [`ChainClient`], so
//! the RPC adapter, a test double, or any future CLI shim are interchangeable.
//!
//! # Data Flow
//! ```text
//! UtxoSelector ──get_utxos_by_address──┐
//!              ──get_virtual_daa_score─┤──▶ RetryingClient ──▶ RpcChainClient ──▶ kaspad (wRPC)
//! Broadcaster  ──submit_transaction────┘
//! ```

pub mod backoff;
pub mod rpc;

use async_trait::async_trait;
use kaspa_addresses::Address;
use kaspa_consensus_core::tx::{ScriptPublicKey, Transaction, TransactionId, TransactionOutpoint};
use thiserror::Error;

pub use backoff::{RetryPolicy, calculate_backoff};
pub use rpc::RpcChainClient;

/// Errors crossing the chain boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    /// Transport failure, timeout, or node not reachable. Retryable.
    #[error("node unavailable: {0}")]
    Unavailable(String),

    /// The node understood the request and refused it.
    #[error("rejected by node: {0}")]
    Rejected(String),
}

/// A UTXO as observed at the contract address.
///
/// Stale as soon as it is spent or reorganized away; never cache one across
/// claim attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractUtxo {
    pub outpoint: TransactionOutpoint,
    pub amount: u64,
    /// DAA score of the block that created the output.
    pub block_daa_score: u64,
    pub script_public_key: ScriptPublicKey,
    pub is_coinbase: bool,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn get_utxos_by_address(&self, address: &Address)
    -> Result<Vec<ContractUtxo>, ChainError>;

    /// Current virtual DAA score, the chain-height clock used for covenant ages.
    async fn get_virtual_daa_score(&self) -> Result<u64, ChainError>;

    async fn submit_transaction(
        &self,
        tx: &Transaction,
        allow_orphan: bool,
    ) -> Result<TransactionId, ChainError>;
}

#[async_trait]
impl<T: ChainClient + ?Sized> ChainClient for std::sync::Arc<T> {
    async fn get_utxos_by_address(
        &self,
        address: &Address,
    ) -> Result<Vec<ContractUtxo>, ChainError> {
        (**self).get_utxos_by_address(address).await
    }

    async fn get_virtual_daa_score(&self) -> Result<u64, ChainError> {
        (**self).get_virtual_daa_score().await
    }

    async fn submit_transaction(
        &self,
        tx: &Transaction,
        allow_orphan: bool,
    ) -> Result<TransactionId, ChainError> {
        (**self).submit_transaction(tx, allow_orphan).await
    }
}

/// Decorator that retries [`ChainError::Unavailable`] with bounded backoff.
/// Rejections pass through untouched.
pub struct RetryingClient<C> {
    inner: C,
    policy: RetryPolicy,
}

impl<C: ChainClient> RetryingClient<C> {
    pub fn new(inner: C, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

/// Run `op` until it succeeds, is rejected, or the attempt budget runs out.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T, ChainError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ChainError>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op().await {
            Ok(v) => return Ok(v),
            Err(ChainError::Unavailable(msg)) if attempt < attempts => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                tracing::warn!(
                    call = what,
                    attempt,
                    max_attempts = attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %msg,
                    "node unavailable, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(ChainError::Unavailable(msg)) => {
                return Err(ChainError::Unavailable(format!(
                    "{what} failed after {attempt} attempts: {msg}"
                )));
            }
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl<C: ChainClient> ChainClient for RetryingClient<C> {
    async fn get_utxos_by_address(
        &self,
        address: &Address,
    ) -> Result<Vec<ContractUtxo>, ChainError> {
        with_retry(&self.policy, "get_utxos_by_address", || {
            self.inner.get_utxos_by_address(address)
        })
        .await
    }

    async fn get_virtual_daa_score(&self) -> Result<u64, ChainError> {
        with_retry(&self.policy, "get_virtual_daa_score", || {
            self.inner.get_virtual_daa_score()
        })
        .await
    }

    async fn submit_transaction(
        &self,
        tx: &Transaction,
        allow_orphan: bool,
    ) -> Result<TransactionId, ChainError> {
        with_retry(&self.policy, "submit_transaction", || {
            self.inner.submit_transaction(tx, allow_orphan)
        })
        .await
    }
}
