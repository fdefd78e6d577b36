//! Beneficiary signing for the claim spend.
//!
//! The beneficiary secret is parsed into a keypair inside [`Signer::sign`] and
//! dropped when it returns. It is never logged.

use kaspa_addresses::Version;
use kaspa_consensus_core::{
    hashing::{
        sighash::{SigHashReusedValuesUnsync, calc_schnorr_signature_hash},
        sighash_type::SIG_HASH_ALL,
    },
    tx::{MutableTransaction, Transaction, UtxoEntry},
};
use secp256k1::Keypair;

use super::covenant::CompiledCovenant;
use super::error::GuardianError;
use super::script::{build_claim_sig_script, validate_claim_layout};
use super::tx::ClaimPlan;
use crate::config::Beneficiary;
use crate::verify_script_input;

pub fn keypair_from_hex(secret_hex: &str) -> Result<Keypair, GuardianError> {
    let bytes = hex::decode(secret_hex.trim())
        .map_err(|e| GuardianError::Signing(format!("signing key is not hex: {e}")))?;
    Keypair::from_seckey_slice(secp256k1::SECP256K1, &bytes)
        .map_err(|e| GuardianError::Signing(format!("signing key rejected: {e}")))
}

/// Sign input `input_index` with SIG_HASH_ALL.
/// Returns the 65-byte signature (64-byte sig + sighash type byte).
pub fn schnorr_sign_input(
    tx: &Transaction,
    utxo_entries: &[UtxoEntry],
    keypair: &Keypair,
    input_index: usize,
) -> Result<Vec<u8>, GuardianError> {
    if input_index >= tx.inputs.len() || input_index >= utxo_entries.len() {
        return Err(GuardianError::Signing(format!(
            "input_index {input_index} out of bounds for {} inputs / {} entries",
            tx.inputs.len(),
            utxo_entries.len()
        )));
    }
    let reused_values = SigHashReusedValuesUnsync::new();
    let mtx = MutableTransaction::with_entries(tx.clone(), utxo_entries.to_vec());
    let sig_hash = calc_schnorr_signature_hash(
        &mtx.as_verifiable(),
        input_index,
        SIG_HASH_ALL,
        &reused_values,
    );
    let msg = secp256k1::Message::from_digest_slice(sig_hash.as_bytes().as_slice())
        .map_err(|e| GuardianError::Signing(format!("sighash: {e}")))?;
    let sig = keypair.sign_schnorr(msg);
    let mut signature = Vec::with_capacity(65);
    signature.extend_from_slice(sig.as_ref().as_slice());
    signature.push(SIG_HASH_ALL.to_u8());
    Ok(signature)
}

pub struct Signer<'a> {
    covenant: &'a CompiledCovenant,
    selector: i64,
}

impl<'a> Signer<'a> {
    pub fn new(covenant: &'a CompiledCovenant, selector: i64) -> Self {
        Self { covenant, selector }
    }

    /// Sign every input of `plan` through the covenant's claim entrypoint and
    /// run each through the script engine before returning.
    pub fn sign(
        &self,
        plan: &ClaimPlan,
        beneficiary: &Beneficiary,
    ) -> Result<Transaction, GuardianError> {
        plan.validate()?;

        let secret = beneficiary.signing_key.as_deref().ok_or_else(|| {
            GuardianError::ConfigMissing("beneficiaries[0].signingKey".into())
        })?;
        let keypair = keypair_from_hex(secret)?;
        let pubkey = keypair.x_only_public_key().0.serialize();

        let address = beneficiary.parsed_address()?;
        if address.version != Version::PubKey || address.payload.as_slice() != pubkey.as_slice() {
            return Err(GuardianError::InvalidConfig(format!(
                "signing key does not belong to beneficiary address {address}"
            )));
        }

        let mut signed = plan.tx.clone();
        for i in 0..plan.tx.inputs.len() {
            let signature = schnorr_sign_input(&plan.tx, &plan.entries, &keypair, i)?;
            let sig_script =
                build_claim_sig_script(&signature, self.selector, &pubkey, &self.covenant.script)?;
            validate_claim_layout(&sig_script, self.selector, &pubkey, &self.covenant.script)?;
            signed.inputs[i].signature_script = sig_script;
        }
        signed.finalize();

        for i in 0..signed.inputs.len() {
            verify_script_input(&signed, &plan.entries, i).map_err(|e| {
                GuardianError::ScriptLayoutInvalid(format!("input {i} failed local verification: {e}"))
            })?;
        }
        tracing::debug!(
            tx_id = %signed.id(),
            inputs = signed.inputs.len(),
            "claim signed and verified locally"
        );
        Ok(signed)
    }
}
