use kaspa_consensus_core::tx::{
    ScriptPublicKey, Transaction, TransactionId, TransactionInput, TransactionOutput, UtxoEntry,
};
use serde::Serialize;

use super::covenant::CompiledCovenant;
use super::error::GuardianError;
use crate::chain::ContractUtxo;

/// Minimum relay fee, and the default claim fee.
pub const MIN_RELAY_FEE_SOMPI: u64 = 1_000;

/// Outputs at or below this are refused.
pub const DUST_THRESHOLD_SOMPI: u64 = 600;

/// Transaction version on covenant-enabled networks.
pub const CLAIM_TX_VERSION: u16 = 1;

/// An unsigned claim spend plus the UTXO entries it consumes.
#[derive(Debug, Clone)]
pub struct ClaimPlan {
    pub tx: Transaction,
    /// Entries in input order, needed for sighash and script verification.
    pub entries: Vec<UtxoEntry>,
    pub input_total: u64,
    pub fee: u64,
    pub output_amount: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanInput {
    pub outpoint: String,
    pub amount: u64,
    pub block_daa_score: u64,
}

/// JSON view of a plan for dry runs.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanSummary {
    pub tx_id: String,
    pub inputs: Vec<PlanInput>,
    pub input_total: u64,
    pub fee: u64,
    pub output_amount: u64,
    pub output_script: String,
}

impl ClaimPlan {
    pub fn tx_id(&self) -> TransactionId {
        self.tx.id()
    }

    /// Value conservation and fee floor. Must hold before anything is signed.
    pub fn validate(&self) -> Result<(), GuardianError> {
        if self.tx.inputs.len() != self.entries.len() || self.tx.inputs.is_empty() {
            return Err(GuardianError::ScriptLayoutInvalid(format!(
                "{} inputs but {} UTXO entries",
                self.tx.inputs.len(),
                self.entries.len()
            )));
        }
        let inputs: u64 = self.entries.iter().map(|e| e.amount).sum();
        let outputs: u64 = self.tx.outputs.iter().map(|o| o.value).sum();
        if outputs.checked_add(self.fee) != Some(inputs) || inputs != self.input_total {
            return Err(GuardianError::InvalidConfig(format!(
                "value not conserved: inputs {inputs}, outputs {outputs}, fee {}",
                self.fee
            )));
        }
        if self.fee < MIN_RELAY_FEE_SOMPI {
            return Err(GuardianError::InvalidConfig(format!(
                "fee {} below minimum relay fee {MIN_RELAY_FEE_SOMPI}",
                self.fee
            )));
        }
        Ok(())
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            tx_id: self.tx_id().to_string(),
            inputs: self
                .tx
                .inputs
                .iter()
                .zip(&self.entries)
                .map(|(i, e)| PlanInput {
                    outpoint: format!(
                        "{}:{}",
                        i.previous_outpoint.transaction_id, i.previous_outpoint.index
                    ),
                    amount: e.amount,
                    block_daa_score: e.block_daa_score,
                })
                .collect(),
            input_total: self.input_total,
            fee: self.fee,
            output_amount: self.output_amount,
            output_script: self
                .tx
                .outputs
                .first()
                .map(|o| hex::encode(o.script_public_key.script()))
                .unwrap_or_default(),
        }
    }
}

/// Assembles the claim spend: every eligible UTXO in, one output to the
/// beneficiary, fixed fee.
pub struct ClaimTransactionBuilder<'a> {
    covenant: &'a CompiledCovenant,
    beneficiary_spk: ScriptPublicKey,
    fee: u64,
}

impl<'a> ClaimTransactionBuilder<'a> {
    pub fn new(covenant: &'a CompiledCovenant, beneficiary_spk: ScriptPublicKey, fee: u64) -> Self {
        Self {
            covenant,
            beneficiary_spk,
            fee,
        }
    }

    pub fn build(&self, utxos: &[ContractUtxo]) -> Result<ClaimPlan, GuardianError> {
        if utxos.is_empty() {
            return Err(GuardianError::NoEligibleUtxo);
        }
        let expected_spk = self.covenant.p2sh_spk();
        let sig_op_count = self.covenant.sig_op_count()?;

        let mut inputs = Vec::with_capacity(utxos.len());
        let mut entries = Vec::with_capacity(utxos.len());
        let mut input_total: u64 = 0;
        for utxo in utxos {
            if utxo.script_public_key != expected_spk {
                return Err(GuardianError::InvalidConfig(format!(
                    "UTXO {}:{} is not locked by this covenant",
                    utxo.outpoint.transaction_id, utxo.outpoint.index
                )));
            }
            inputs.push(TransactionInput {
                previous_outpoint: utxo.outpoint,
                signature_script: vec![],
                sequence: 0,
                sig_op_count,
            });
            entries.push(UtxoEntry::new(
                utxo.amount,
                utxo.script_public_key.clone(),
                utxo.block_daa_score,
                utxo.is_coinbase,
                None,
            ));
            input_total = input_total
                .checked_add(utxo.amount)
                .ok_or_else(|| GuardianError::InvalidConfig("UTXO total overflows u64".into()))?;
        }

        let output_amount = input_total.saturating_sub(self.fee);
        if input_total <= self.fee || output_amount <= DUST_THRESHOLD_SOMPI {
            return Err(GuardianError::InsufficientAmount {
                available: input_total,
                fee: self.fee,
                output: output_amount,
                dust: DUST_THRESHOLD_SOMPI,
            });
        }

        let output = TransactionOutput {
            value: output_amount,
            script_public_key: self.beneficiary_spk.clone(),
            covenant: None,
        };
        let tx = Transaction::new(
            CLAIM_TX_VERSION,
            inputs,
            vec![output],
            0,
            Default::default(),
            0,
            vec![],
        );

        let plan = ClaimPlan {
            tx,
            entries,
            input_total,
            fee: self.fee,
            output_amount,
        };
        plan.validate()?;
        Ok(plan)
    }
}
