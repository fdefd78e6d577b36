//! Guardian configuration: one JSON document holding owner, contract,
//! beneficiaries, timing, node endpoint and claim policy.
//!
//! Field names are camelCase; the older layout (`privateKey`, `timeoutPeriod`,
//! `gracePeriod`, `checkInterval`, `warningLevels[].days`) is accepted through
//! aliases so an existing `config.json` loads unchanged.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use kaspa_addresses::Address;
use serde::{Deserialize, Serialize};

use crate::chain::RetryPolicy;
use crate::chain::rpc::RPC_CALL_TIMEOUT;
use crate::sdk::GuardianError;
use crate::sdk::tx::MIN_RELAY_FEE_SOMPI;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub owner: OwnerConfig,
    #[serde(default)]
    pub contract: ContractConfig,
    #[serde(default)]
    pub beneficiaries: Vec<Beneficiary>,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub policy: ClaimPolicy,
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerConfig {
    #[serde(default, alias = "privateKey", skip_serializing_if = "Option::is_none")]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default)]
    pub heartbeat_key: String,
}

impl fmt::Debug for OwnerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnerConfig")
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("address", &self.address)
            .field("heartbeat_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractConfig {
    /// P2SH address holding the locked funds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Hex blake2b-256 of the redeem script.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_hash: Option<String>,
    /// Redeem script bytes as hex. Takes precedence over `artifact`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeem_script: Option<String>,
    /// Compiled covenant JSON, relative to the data directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
    /// Claim timeout in DAA score units, when the artifact does not carry one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_daa: Option<u64>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployed_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beneficiary {
    pub address: String,
    #[serde(default)]
    pub name: String,
    /// Hex secp256k1 secret key whose x-only public key is `address`'s payload.
    #[serde(default, alias = "privateKey", skip_serializing_if = "Option::is_none")]
    pub signing_key: Option<String>,
}

impl fmt::Debug for Beneficiary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Beneficiary")
            .field("address", &self.address)
            .field("name", &self.name)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Beneficiary {
    pub fn parsed_address(&self) -> Result<Address, GuardianError> {
        parse_address(&self.address, "beneficiary address")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarningLevel {
    #[serde(alias = "days")]
    pub days_elapsed: u64,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimingConfig {
    #[serde(alias = "timeoutPeriod")]
    pub timeout_period_seconds: u64,
    #[serde(alias = "gracePeriod")]
    pub grace_period_seconds: u64,
    #[serde(alias = "checkInterval")]
    pub check_interval_seconds: u64,
    pub warning_levels: Vec<WarningLevel>,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            timeout_period_seconds: 600,
            grace_period_seconds: 60,
            check_interval_seconds: 60,
            warning_levels: Vec::new(),
        }
    }
}

impl TimingConfig {
    pub fn total_wait_seconds(&self) -> u64 {
        self.timeout_period_seconds
            .saturating_add(self.grace_period_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NodeConfig {
    pub rpc_url: String,
    pub network: String,
    pub call_timeout_secs: u64,
    pub retry: RetryPolicy,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_url: "ws://127.0.0.1:17110".to_string(),
            network: "testnet-12".to_string(),
            call_timeout_secs: RPC_CALL_TIMEOUT.as_secs(),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClaimPolicy {
    pub fee_sompi: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority_fee_sompi: Option<u64>,
    /// Entrypoint selector pushed in the claim unlocking script.
    pub claim_selector: i64,
    /// Allow the automatic claim when no heartbeat was ever recorded.
    pub claim_without_heartbeat: bool,
}

impl Default for ClaimPolicy {
    fn default() -> Self {
        Self {
            fee_sompi: MIN_RELAY_FEE_SOMPI,
            priority_fee_sompi: None,
            claim_selector: 1,
            claim_without_heartbeat: false,
        }
    }
}

impl ClaimPolicy {
    /// Base fee plus any configured priority fee.
    pub fn total_fee(&self) -> u64 {
        self.fee_sompi
            .saturating_add(self.priority_fee_sompi.unwrap_or(0))
    }
}

fn parse_address(s: &str, what: &str) -> Result<Address, GuardianError> {
    Address::try_from(s).map_err(|e| GuardianError::InvalidConfig(format!("{what} {s:?}: {e}")))
}

impl GuardianConfig {
    /// Structural checks that do not need the covenant bytes or the node.
    pub fn validate(&self) -> Result<(), GuardianError> {
        self.heartbeat_key()?;
        if self.timing.timeout_period_seconds == 0 {
            return Err(GuardianError::InvalidConfig(
                "timeoutPeriodSeconds must be > 0".into(),
            ));
        }
        if self.timing.check_interval_seconds == 0 {
            return Err(GuardianError::InvalidConfig(
                "checkIntervalSeconds must be > 0".into(),
            ));
        }
        if self.policy.fee_sompi < MIN_RELAY_FEE_SOMPI {
            return Err(GuardianError::InvalidConfig(format!(
                "feeSompi {} below minimum relay fee {MIN_RELAY_FEE_SOMPI}",
                self.policy.fee_sompi
            )));
        }
        if let Some(addr) = &self.contract.address {
            parse_address(addr, "contract address")?;
        }
        if self.contract.script_hash.is_some() {
            self.script_hash()?;
        }
        self.primary_beneficiary()?;
        for b in &self.beneficiaries {
            b.parsed_address()?;
        }
        Ok(())
    }

    pub fn heartbeat_key(&self) -> Result<&str, GuardianError> {
        if self.owner.heartbeat_key.is_empty() {
            return Err(GuardianError::ConfigMissing("owner.heartbeatKey".into()));
        }
        Ok(&self.owner.heartbeat_key)
    }

    pub fn contract_address(&self) -> Result<Address, GuardianError> {
        let addr = self
            .contract
            .address
            .as_deref()
            .ok_or_else(|| GuardianError::ConfigMissing("contract.address".into()))?;
        parse_address(addr, "contract address")
    }

    pub fn script_hash(&self) -> Result<[u8; 32], GuardianError> {
        let hex_str = self
            .contract
            .script_hash
            .as_deref()
            .ok_or_else(|| GuardianError::ConfigMissing("contract.scriptHash".into()))?;
        let bytes = hex::decode(hex_str)
            .map_err(|e| GuardianError::InvalidConfig(format!("contract.scriptHash: {e}")))?;
        bytes
            .try_into()
            .map_err(|_| GuardianError::InvalidConfig("contract.scriptHash must be 32 bytes".into()))
    }

    /// The claim always pays the first listed beneficiary.
    pub fn primary_beneficiary(&self) -> Result<&Beneficiary, GuardianError> {
        self.beneficiaries
            .first()
            .ok_or_else(|| GuardianError::ConfigMissing("beneficiaries".into()))
    }

    pub fn has_contract(&self) -> bool {
        self.contract.address.is_some()
    }

    /// Copy safe to hand to any caller: secrets reduced to presence flags.
    pub fn redacted(&self) -> RedactedConfig {
        RedactedConfig {
            name: self.name.clone(),
            owner: RedactedOwner {
                address: self.owner.address.clone(),
                has_secret_key: self.owner.secret_key.is_some(),
                has_heartbeat_key: !self.owner.heartbeat_key.is_empty(),
            },
            contract: self.contract.clone(),
            beneficiaries: self
                .beneficiaries
                .iter()
                .map(|b| RedactedBeneficiary {
                    name: b.name.clone(),
                    address: b.address.clone(),
                    has_signing_key: b.signing_key.is_some(),
                })
                .collect(),
            timing: self.timing.clone(),
            node: self.node.clone(),
            policy: self.policy.clone(),
            has_owner: self.owner.secret_key.is_some(),
            has_contract: self.has_contract(),
        }
    }

    /// Apply an explicit update. Only fields present in `update` change.
    pub fn apply_update(&mut self, update: ConfigUpdate, now: DateTime<Utc>) {
        if let Some(key) = update.private_key {
            self.owner.secret_key = Some(key);
        }
        if let Some(addr) = update.owner_address {
            self.owner.address = Some(addr);
        }
        if let Some(addr) = update.contract_address {
            if self.contract.address.as_deref() != Some(addr.as_str()) {
                self.contract.deployed_at = Some(now);
            }
            self.contract.address = Some(addr);
            self.contract.kind = Some(
                update
                    .contract_type
                    .unwrap_or_else(|| "DeadmanSwitch".to_string()),
            );
        }
        if let Some(hash) = update.script_hash {
            self.contract.script_hash = Some(hash);
        }
        if let Some(script) = update.redeem_script {
            self.contract.redeem_script = Some(script);
        }
        if let Some(daa) = update.timeout_daa {
            self.contract.timeout_daa = Some(daa);
        }
        if let Some(address) = update.beneficiary_address {
            self.beneficiaries = vec![Beneficiary {
                address,
                name: update
                    .beneficiary_name
                    .unwrap_or_else(|| "Primary Beneficiary".to_string()),
                signing_key: update.beneficiary_signing_key,
            }];
        } else if let Some(key) = update.beneficiary_signing_key
            && let Some(first) = self.beneficiaries.first_mut()
        {
            first.signing_key = Some(key);
        }
        if let Some(t) = update.timeout_period {
            self.timing.timeout_period_seconds = t;
        }
        if let Some(g) = update.grace_period {
            self.timing.grace_period_seconds = g;
        }
    }

    /// Starting point written by `kaspa-guardian init`.
    pub fn template(heartbeat_key: String, beneficiary_address: String) -> Self {
        Self {
            name: Some("kaspa-guardian".to_string()),
            owner: OwnerConfig {
                secret_key: None,
                address: None,
                heartbeat_key,
            },
            contract: ContractConfig {
                kind: Some("DeadmanSwitch".to_string()),
                timeout_daa: Some(600),
                ..Default::default()
            },
            beneficiaries: vec![Beneficiary {
                address: beneficiary_address,
                name: "Primary Beneficiary".to_string(),
                signing_key: None,
            }],
            timing: TimingConfig::default(),
            node: NodeConfig::default(),
            policy: ClaimPolicy::default(),
        }
    }
}

/// Body of `POST /update`.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub private_key: Option<String>,
    pub owner_address: Option<String>,
    pub contract_address: Option<String>,
    pub contract_type: Option<String>,
    pub script_hash: Option<String>,
    pub redeem_script: Option<String>,
    pub timeout_daa: Option<u64>,
    pub beneficiary_address: Option<String>,
    pub beneficiary_name: Option<String>,
    pub beneficiary_signing_key: Option<String>,
    pub timeout_period: Option<u64>,
    pub grace_period: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedOwner {
    pub address: Option<String>,
    pub has_secret_key: bool,
    pub has_heartbeat_key: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedBeneficiary {
    pub name: String,
    pub address: String,
    pub has_signing_key: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedactedConfig {
    pub name: Option<String>,
    pub owner: RedactedOwner,
    pub contract: ContractConfig,
    pub beneficiaries: Vec<RedactedBeneficiary>,
    pub timing: TimingConfig,
    pub node: NodeConfig,
    pub policy: ClaimPolicy,
    pub has_owner: bool,
    pub has_contract: bool,
}
