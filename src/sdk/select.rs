//! Covenant UTXO selection against the chain-height clock.

use kaspa_addresses::Address;
use kaspa_consensus_core::tx::ScriptPublicKey;
use serde::Serialize;

use super::error::GuardianError;
use crate::chain::{ChainClient, ContractUtxo};

/// DAA units before a coinbase output becomes spendable.
pub const COINBASE_MATURITY_DAA: u64 = 1_000;

/// Every UTXO at the contract address, classified at one DAA score.
#[derive(Debug, Clone)]
pub struct Survey {
    pub daa_score: u64,
    pub required_age: u64,
    /// Outputs locked by the expected covenant, with their ages.
    pub candidates: Vec<(ContractUtxo, u64)>,
    /// Outputs at the address whose locking script is something else.
    pub foreign: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurveySummary {
    pub daa_score: u64,
    pub contract_balance: u64,
    pub utxo_count: usize,
    pub eligible_utxos: usize,
    pub required_age: u64,
}

impl Survey {
    pub fn classify(
        utxos: Vec<ContractUtxo>,
        expected_spk: &ScriptPublicKey,
        daa_score: u64,
        required_age: u64,
    ) -> Self {
        let mut candidates = Vec::new();
        let mut foreign = 0;
        for utxo in utxos {
            if &utxo.script_public_key != expected_spk {
                foreign += 1;
                continue;
            }
            if utxo.is_coinbase
                && daa_score < utxo.block_daa_score.saturating_add(COINBASE_MATURITY_DAA)
            {
                continue;
            }
            let age = daa_score.saturating_sub(utxo.block_daa_score);
            candidates.push((utxo, age));
        }
        candidates.sort_by(|(a, _), (b, _)| {
            a.outpoint
                .transaction_id
                .as_bytes()
                .cmp(&b.outpoint.transaction_id.as_bytes())
                .then(a.outpoint.index.cmp(&b.outpoint.index))
        });
        Self {
            daa_score,
            required_age,
            candidates,
            foreign,
        }
    }

    /// Candidates old enough to take the claim branch, in outpoint order.
    pub fn eligible(&self) -> Vec<ContractUtxo> {
        self.candidates
            .iter()
            .filter(|(_, age)| *age >= self.required_age)
            .map(|(u, _)| u.clone())
            .collect()
    }

    /// Eligible set, or why there is none.
    pub fn into_selection(self) -> Result<Vec<ContractUtxo>, GuardianError> {
        let eligible = self.eligible();
        if !eligible.is_empty() {
            return Ok(eligible);
        }
        match self.candidates.iter().map(|(_, age)| *age).max() {
            Some(current_age) => Err(GuardianError::NotYetEligible {
                current_age,
                required_age: self.required_age,
            }),
            None => Err(GuardianError::NoEligibleUtxo),
        }
    }

    pub fn summary(&self) -> SurveySummary {
        SurveySummary {
            daa_score: self.daa_score,
            contract_balance: self.candidates.iter().map(|(u, _)| u.amount).sum(),
            utxo_count: self.candidates.len(),
            eligible_utxos: self
                .candidates
                .iter()
                .filter(|(_, age)| *age >= self.required_age)
                .count(),
            required_age: self.required_age,
        }
    }
}

pub struct UtxoSelector<'a> {
    chain: &'a dyn ChainClient,
}

impl<'a> UtxoSelector<'a> {
    pub fn new(chain: &'a dyn ChainClient) -> Self {
        Self { chain }
    }

    /// Fetch UTXOs and a fresh DAA score, then classify.
    pub async fn survey(
        &self,
        address: &Address,
        expected_spk: &ScriptPublicKey,
        required_age: u64,
    ) -> Result<Survey, GuardianError> {
        let utxos = self.chain.get_utxos_by_address(address).await?;
        let daa_score = self.chain.get_virtual_daa_score().await?;
        let survey = Survey::classify(utxos, expected_spk, daa_score, required_age);
        if survey.foreign > 0 {
            tracing::warn!(
                contract = %address,
                foreign = survey.foreign,
                "ignoring UTXOs whose locking script is not the covenant"
            );
        }
        tracing::debug!(
            contract = %address,
            daa_score,
            candidates = survey.candidates.len(),
            required_age,
            "surveyed contract UTXOs"
        );
        Ok(survey)
    }

    pub async fn select(
        &self,
        address: &Address,
        expected_spk: &ScriptPublicKey,
        required_age: u64,
    ) -> Result<Vec<ContractUtxo>, GuardianError> {
        self.survey(address, expected_spk, required_age)
            .await?
            .into_selection()
    }
}
