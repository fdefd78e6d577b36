use kaspa_consensus_core::tx::{Transaction, TransactionId};

use super::error::GuardianError;
use crate::chain::{ChainClient, ChainError, RetryPolicy, calculate_backoff};

/// What the node said about a submitted claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    Accepted(TransactionId),
    /// The covenant inputs are gone: an earlier claim already took them.
    AlreadySpent(String),
}

/// Rejection reasons that mean the inputs were consumed. With orphans
/// disallowed, a missing outpoint is reported as an orphan.
const SPENT_MARKERS: &[&str] = &["already spent", "double spend", "orphan"];

/// Rejections for a transaction the node already holds. Seen when a submit
/// reached the node but its reply was lost and the call was retried.
const DUPLICATE_MARKERS: &[&str] = &["already in the mempool", "already accepted"];

/// Whether the node refused because the inputs are not in its UTXO set.
pub fn is_orphan_rejection(reason: &str) -> bool {
    reason.to_ascii_lowercase().contains("orphan")
}

/// Whether `reason` says the node already has `tx`.
pub fn is_duplicate_of(reason: &str, tx: &Transaction) -> bool {
    let lower = reason.to_ascii_lowercase();
    DUPLICATE_MARKERS.iter().any(|m| lower.contains(m)) && lower.contains(&tx.id().to_string())
}

/// Finality lag right after the UTXO matured; the same tx may be accepted
/// a moment later.
const NOT_FINALIZED_MARKER: &str = "not finalized";

/// Map a submit failure onto the guardian taxonomy.
pub fn classify_submit_error(e: ChainError) -> GuardianError {
    match e {
        ChainError::Unavailable(msg) => GuardianError::ChainUnavailable(msg),
        ChainError::Rejected(reason) => {
            let lower = reason.to_ascii_lowercase();
            if SPENT_MARKERS.iter().any(|m| lower.contains(m)) {
                GuardianError::AlreadySpent(reason)
            } else {
                GuardianError::SubmitRejected(reason)
            }
        }
    }
}

pub struct Broadcaster<'a> {
    chain: &'a dyn ChainClient,
    policy: RetryPolicy,
}

impl<'a> Broadcaster<'a> {
    /// `chain` is expected to retry transport failures itself; this layer
    /// only re-submits on finality lag.
    pub fn new(chain: &'a dyn ChainClient, policy: RetryPolicy) -> Self {
        Self { chain, policy }
    }

    pub async fn submit(&self, tx: &Transaction) -> Result<BroadcastOutcome, GuardianError> {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.chain.submit_transaction(tx, false).await {
                Ok(id) => {
                    tracing::info!(tx_id = %id, attempt, "claim accepted by node");
                    return Ok(BroadcastOutcome::Accepted(id));
                }
                Err(ChainError::Rejected(reason)) if is_duplicate_of(&reason, tx) => {
                    tracing::info!(tx_id = %tx.id(), attempt, %reason, "claim already held by node");
                    return Ok(BroadcastOutcome::Accepted(tx.id()));
                }
                Err(ChainError::Rejected(reason))
                    if reason.contains(NOT_FINALIZED_MARKER) && attempt < attempts =>
                {
                    let delay =
                        calculate_backoff(attempt, self.policy.base_delay_ms, self.policy.max_delay_ms);
                    tracing::warn!(attempt, delay_ms = delay.as_millis() as u64, "claim not finalized yet, resubmitting");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return match classify_submit_error(e) {
                        GuardianError::AlreadySpent(reason) => {
                            tracing::info!(tx_id = %tx.id(), %reason, "covenant inputs already spent");
                            Ok(BroadcastOutcome::AlreadySpent(reason))
                        }
                        other => {
                            tracing::error!(tx_id = %tx.id(), error = %other, "claim submission failed");
                            Err(other)
                        }
                    };
                }
            }
        }
    }
}
