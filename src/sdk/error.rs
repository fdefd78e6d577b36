use thiserror::Error;

use crate::chain::ChainError;

/// Every failure the guardian can report. Callers get a typed variant, never a
/// silent default.
#[derive(Debug, Error)]
pub enum GuardianError {
    #[error("config missing: {0}")]
    ConfigMissing(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("unauthorized: heartbeat key mismatch")]
    Unauthorized,

    #[error("no heartbeat has been recorded yet")]
    NoHeartbeatYet,

    #[error("timeout not reached: elapsed {elapsed_secs}s, required {required_secs}s")]
    NotExpired { elapsed_secs: u64, required_secs: u64 },

    #[error("covenant UTXO not yet eligible: age {current_age} DAA < required {required_age}")]
    NotYetEligible { current_age: u64, required_age: u64 },

    #[error("no eligible UTXO at the contract address")]
    NoEligibleUtxo,

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("insufficient amount: {available} sompi leaves {output} after fee {fee}, at or below dust {dust}")]
    InsufficientAmount {
        available: u64,
        fee: u64,
        output: u64,
        dust: u64,
    },

    #[error("claim script layout invalid: {0}")]
    ScriptLayoutInvalid(String),

    #[error("UTXO already spent: {0}")]
    AlreadySpent(String),

    /// The node reported the inputs missing while the contract address still
    /// holds covenant funds.
    #[error("claim inputs not found by the node: {0}")]
    InputsMissing(String),

    #[error("claim already executed for this heartbeat epoch")]
    AlreadyExecuted { tx_id: Option<String> },

    #[error("transaction rejected: {0}")]
    SubmitRejected(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("signing error: {0}")]
    Signing(String),
}

impl GuardianError {
    /// Whether the next monitor tick may succeed where this one failed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable(_)
                | Self::NotYetEligible { .. }
                | Self::NoEligibleUtxo
                | Self::InputsMissing(_)
                | Self::Storage(_)
                | Self::ConfigMissing(_)
        )
    }
}

impl From<ChainError> for GuardianError {
    fn from(e: ChainError) -> Self {
        match e {
            ChainError::Unavailable(msg) => Self::ChainUnavailable(msg),
            ChainError::Rejected(msg) => Self::SubmitRejected(msg),
        }
    }
}

impl From<kaspa_txscript::script_builder::ScriptBuilderError> for GuardianError {
    fn from(e: kaspa_txscript::script_builder::ScriptBuilderError) -> Self {
        Self::ScriptLayoutInvalid(format!("{e:?}"))
    }
}

impl From<std::io::Error> for GuardianError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for GuardianError {
    fn from(e: serde_json::Error) -> Self {
        Self::Storage(format!("json: {e}"))
    }
}
