//! Compiled covenant artifact and P2SH derivation.
//!
//! The covenant compiler's output is consumed as opaque bytes plus an ABI
//! listing entrypoints. Artifacts written by the compiler carry the script as
//! a JSON byte array; a hex string is accepted too.

use std::path::Path;

use kaspa_addresses::{Address, Prefix};
use kaspa_consensus_core::tx::ScriptPublicKey;
use kaspa_txscript::{
    opcodes::codes::{OpBlake2b, OpData32, OpEqual},
    pay_to_script_hash_script,
    standard::extract_script_pub_key_address,
};
use serde::{Deserialize, Deserializer, Serialize};

use super::error::GuardianError;
use super::script::count_sig_ops;
use crate::config::GuardianConfig;

/// Name of the entrypoint the beneficiary spends through.
pub const CLAIM_ENTRYPOINT: &str = "claim";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiInput {
    pub name: String,
    #[serde(alias = "type", alias = "typeName")]
    pub type_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbiEntry {
    pub name: String,
    #[serde(default)]
    pub inputs: Vec<AbiInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledCovenant {
    #[serde(default, alias = "contractName")]
    pub contract_name: String,
    #[serde(deserialize_with = "script_bytes")]
    pub script: Vec<u8>,
    #[serde(default)]
    pub abi: Vec<AbiEntry>,
    /// Claim timeout in DAA units baked into the script at compile time.
    #[serde(default, alias = "timeoutDaa", skip_serializing_if = "Option::is_none")]
    pub timeout_daa: Option<u64>,
}

fn script_bytes<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Bytes(Vec<u8>),
        Hex(String),
    }
    match Repr::deserialize(d)? {
        Repr::Bytes(b) => Ok(b),
        Repr::Hex(s) => hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom),
    }
}

/// Locking script of a P2SH output committing to `hash`.
pub fn p2sh_spk_for_hash(hash: &[u8; 32]) -> ScriptPublicKey {
    let mut script = Vec::with_capacity(35);
    script.push(OpBlake2b);
    script.push(OpData32);
    script.extend_from_slice(hash);
    script.push(OpEqual);
    ScriptPublicKey::from_vec(0, script)
}

impl CompiledCovenant {
    /// Wrap raw redeem-script bytes that came without an artifact.
    pub fn from_redeem_script(script: Vec<u8>) -> Self {
        Self {
            contract_name: String::new(),
            script,
            abi: Vec::new(),
            timeout_daa: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self, GuardianError> {
        let bytes = std::fs::read(path).map_err(|e| {
            GuardianError::ConfigMissing(format!("covenant artifact {}: {e}", path.display()))
        })?;
        let covenant: Self = serde_json::from_slice(&bytes).map_err(|e| {
            GuardianError::InvalidConfig(format!("covenant artifact {}: {e}", path.display()))
        })?;
        if covenant.script.is_empty() {
            return Err(GuardianError::InvalidConfig(format!(
                "covenant artifact {} has an empty script",
                path.display()
            )));
        }
        Ok(covenant)
    }

    /// Resolve the covenant for `config`: inline `redeemScript` first, then
    /// the artifact path relative to `data_dir`.
    pub fn from_config(config: &GuardianConfig, data_dir: &Path) -> Result<Self, GuardianError> {
        if let Some(hex_script) = &config.contract.redeem_script {
            let script = hex::decode(hex_script).map_err(|e| {
                GuardianError::InvalidConfig(format!("contract.redeemScript: {e}"))
            })?;
            return Ok(Self::from_redeem_script(script));
        }
        match &config.contract.artifact {
            Some(path) => Self::load(&data_dir.join(path)),
            None => Err(GuardianError::ConfigMissing(
                "contract.redeemScript or contract.artifact".into(),
            )),
        }
    }

    pub fn p2sh_spk(&self) -> ScriptPublicKey {
        pay_to_script_hash_script(&self.script)
    }

    /// Blake2b-256 of the redeem script, as committed in the P2SH output.
    pub fn script_hash(&self) -> [u8; 32] {
        let spk = self.p2sh_spk();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&spk.script()[2..34]);
        hash
    }

    pub fn address(&self, prefix: Prefix) -> Result<Address, GuardianError> {
        extract_script_pub_key_address(&self.p2sh_spk(), prefix)
            .map_err(|e| GuardianError::InvalidConfig(format!("p2sh address: {e}")))
    }

    /// Fail unless the configured hash and address both commit to this script.
    pub fn check_against(&self, config: &GuardianConfig) -> Result<(), GuardianError> {
        let expected = config.script_hash()?;
        if expected != self.script_hash() {
            return Err(GuardianError::InvalidConfig(format!(
                "contract.scriptHash {} does not match redeem script hash {}",
                hex::encode(expected),
                hex::encode(self.script_hash())
            )));
        }
        let address = config.contract_address()?;
        let derived = self.address(address.prefix)?;
        if derived != address {
            return Err(GuardianError::InvalidConfig(format!(
                "contract.address {address} does not match redeem script address {derived}"
            )));
        }
        Ok(())
    }

    /// Minimum UTXO age in DAA units before the claim branch unlocks.
    pub fn required_age(&self, configured: Option<u64>) -> Result<u64, GuardianError> {
        match (self.timeout_daa, configured) {
            (Some(a), Some(c)) if a != c => Err(GuardianError::InvalidConfig(format!(
                "contract.timeoutDaa {c} conflicts with compiled timeout {a}"
            ))),
            (Some(a), _) => Ok(a),
            (None, Some(c)) => Ok(c),
            (None, None) => Err(GuardianError::ConfigMissing("contract.timeoutDaa".into())),
        }
    }

    /// Selector for the claim entrypoint. With an ABI the entrypoint's index
    /// is authoritative; without one the configured value is used.
    pub fn claim_selector(&self, configured: i64) -> Result<i64, GuardianError> {
        if self.abi.is_empty() {
            return Ok(configured);
        }
        let index = self
            .abi
            .iter()
            .position(|e| e.name.eq_ignore_ascii_case(CLAIM_ENTRYPOINT))
            .ok_or_else(|| {
                GuardianError::InvalidConfig(format!(
                    "covenant {:?} has no `{CLAIM_ENTRYPOINT}` entrypoint",
                    self.contract_name
                ))
            })?;
        let selector = index as i64;
        if selector != configured {
            tracing::warn!(
                configured,
                abi = selector,
                "claim selector from ABI overrides policy.claimSelector"
            );
        }
        Ok(selector)
    }

    pub fn sig_op_count(&self) -> Result<u8, GuardianError> {
        count_sig_ops(&self.script)
    }
}
