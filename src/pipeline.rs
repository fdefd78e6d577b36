//! Claim pipeline and the context object every operation runs against.
//!
//! ```text
//! TimeoutMonitor / POST /execute
//!        │
//!        ▼
//!   ClaimMarker check ──▶ UtxoSelector ──▶ ClaimTransactionBuilder ──▶ Signer
//!                                                                        │
//!   heartbeat re-read, ClaimMarker(Pending) saved ◀───────────────────────┘
//!        │
//!        ▼
//!   Broadcaster ──▶ ClaimMarker(Broadcast | AlreadySpent | Failed)
//! ```
//!
//! At most one claim per heartbeat epoch: the marker is persisted before the
//! transaction leaves the process and only a valid heartbeat removes it. The
//! heartbeat is read again right before the marker is written, so a heartbeat
//! that lands while a claim is being prepared aborts it.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use kaspa_addresses::Address;
use kaspa_consensus_core::tx::{ScriptPublicKey, Transaction};
use kaspa_txscript::pay_to_address_script;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::chain::{ChainClient, RetryingClient, RpcChainClient};
use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigUpdate, GuardianConfig, RedactedBeneficiary, RedactedConfig};
use crate::heartbeat::{HeartbeatGateway, HeartbeatRecord};
use crate::monitor::{LivenessReport, LivenessState, elapsed_millis, evaluate};
use crate::sdk::broadcast::is_orphan_rejection;
use crate::sdk::select::SurveySummary;
use crate::sdk::tx::PlanSummary;
use crate::sdk::{
    BroadcastOutcome, Broadcaster, ClaimPlan, ClaimTransactionBuilder, CompiledCovenant,
    GuardianError, Signer, Survey, UtxoSelector,
};
use crate::store::{FileStore, GuardianStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClaimTrigger {
    Monitor,
    Manual,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ClaimOutcome {
    /// Signed and about to be submitted. Left in place if the process dies.
    Pending,
    Broadcast,
    AlreadySpent { reason: String },
    Failed { reason: String },
}

/// Durable "already executed" flag for one heartbeat epoch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMarker {
    /// Timestamp of the heartbeat the claim was made against.
    pub epoch: Option<i64>,
    pub executed_at: DateTime<Utc>,
    pub trigger: ClaimTrigger,
    pub tx_id: Option<String>,
    pub outcome: ClaimOutcome,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimReport {
    pub tx_id: String,
    pub outcome: ClaimOutcome,
    pub plan: PlanSummary,
}

/// Covenant material resolved from config, checked for consistency.
#[derive(Debug, Clone)]
pub struct ResolvedCovenant {
    pub covenant: CompiledCovenant,
    pub address: Address,
    pub spk: ScriptPublicKey,
    pub required_age: u64,
    pub selector: i64,
}

impl ResolvedCovenant {
    pub fn resolve(config: &GuardianConfig, data_dir: &std::path::Path) -> Result<Self, GuardianError> {
        let covenant = CompiledCovenant::from_config(config, data_dir)?;
        covenant.check_against(config)?;
        let required_age = covenant.required_age(config.contract.timeout_daa)?;
        let selector = covenant.claim_selector(config.policy.claim_selector)?;
        Ok(Self {
            address: config.contract_address()?,
            spk: covenant.p2sh_spk(),
            covenant,
            required_age,
            selector,
        })
    }
}

/// A claim built (and signed, when a key is available) but not submitted.
#[derive(Debug, Clone)]
pub struct PreparedClaim {
    pub plan: ClaimPlan,
    pub signed: Option<Transaction>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainSnapshot {
    pub available: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub survey: Option<SurveySummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub status: LivenessState,
    pub last_heartbeat: String,
    pub elapsed: Option<u64>,
    pub remaining: u64,
    pub grace_remaining: u64,
    pub timeout: u64,
    pub grace: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub contract: Option<String>,
    pub has_contract: bool,
    pub executed: Option<ClaimMarker>,
    pub chain: ChainSnapshot,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOptions {
    #[serde(default)]
    pub dry_run: bool,
    /// Re-attempt when the marker for this epoch records a failed submit.
    #[serde(default)]
    pub retry_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub success: bool,
    pub dry_run: bool,
    pub would_execute: bool,
    pub elapsed: Option<u64>,
    pub required: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    pub contract: Option<String>,
    pub beneficiaries: Vec<RedactedBeneficiary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan_error: Option<String>,
    pub signed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ClaimOutcome>,
}

/// Everything an operation needs: storage, ledger, time, and the claim guard.
#[derive(Clone)]
pub struct GuardianContext {
    pub store: Arc<dyn GuardianStore>,
    pub chain: Arc<dyn ChainClient>,
    pub clock: Arc<dyn Clock>,
    /// Base for relative covenant artifact paths.
    pub data_dir: PathBuf,
    claim_guard: Arc<Mutex<()>>,
}

impl GuardianContext {
    pub fn new(
        store: Arc<dyn GuardianStore>,
        chain: Arc<dyn ChainClient>,
        clock: Arc<dyn Clock>,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            chain,
            clock,
            data_dir: data_dir.into(),
            claim_guard: Arc::new(Mutex::new(())),
        }
    }

    /// Production wiring: file store in `data_dir`, kaspad over wRPC with
    /// retry, system clock. An unreachable node is logged, not fatal.
    pub async fn connect(data_dir: impl Into<PathBuf>) -> Result<Self, GuardianError> {
        let data_dir = data_dir.into();
        let store = FileStore::new(&data_dir);
        let node = store.load_config()?.map(|c| c.node).unwrap_or_default();
        let rpc = RpcChainClient::new(&node)?;
        if let Err(e) = rpc.connect().await {
            tracing::warn!(url = %node.rpc_url, error = %e, "kaspad not reachable, chain calls will fail until it is");
        }
        let chain = RetryingClient::new(rpc, node.retry);
        Ok(Self::new(
            Arc::new(store),
            Arc::new(chain),
            Arc::new(SystemClock),
            data_dir,
        ))
    }

    /// Non-blocking: `None` while another pass or execute is running.
    pub fn try_claim_guard(&self) -> Option<OwnedMutexGuard<()>> {
        self.claim_guard.clone().try_lock_owned().ok()
    }

    /// Current config, heartbeat, and the state they imply.
    pub fn liveness(
        &self,
    ) -> Result<(GuardianConfig, Option<HeartbeatRecord>, LivenessReport), GuardianError> {
        let config = self.store.require_config()?;
        let heartbeat = self.store.load_heartbeat()?;
        let elapsed = elapsed_millis(heartbeat.as_ref(), self.clock.now_millis());
        let report = evaluate(elapsed, &config.timing);
        Ok((config, heartbeat, report))
    }

    pub fn heartbeat(&self, presented_key: &str) -> Result<HeartbeatRecord, GuardianError> {
        HeartbeatGateway::new(self.store.as_ref(), self.clock.as_ref()).beat(presented_key)
    }

    pub fn authorize(&self, presented_key: &str) -> Result<GuardianConfig, GuardianError> {
        let config = self.store.require_config()?;
        HeartbeatGateway::authorize(&config, presented_key)?;
        Ok(config)
    }

    /// Apply an authenticated config update and save the whole document.
    pub fn update_config(
        &self,
        presented_key: &str,
        update: ConfigUpdate,
    ) -> Result<RedactedConfig, GuardianError> {
        let mut config = self.authorize(presented_key)?;
        config.apply_update(update, self.clock.now());
        config.validate()?;
        self.store.save_config(&config)?;
        tracing::info!(contract = config.contract.address.as_deref().unwrap_or("none"), "config updated");
        Ok(config.redacted())
    }

    /// Status never fails on chain trouble; the `chain` section says why.
    pub async fn status(&self) -> Result<StatusSnapshot, GuardianError> {
        let (config, heartbeat, report) = self.liveness()?;
        let executed = self.store.load_claim_marker()?;
        let chain = self.chain_snapshot(&config).await;
        Ok(StatusSnapshot {
            status: report.state,
            last_heartbeat: heartbeat
                .map(|h| h.iso_date)
                .unwrap_or_else(|| "never".to_string()),
            elapsed: report.elapsed_secs,
            remaining: report.remaining_secs,
            grace_remaining: report.grace_remaining_secs,
            timeout: config.timing.timeout_period_seconds,
            grace: config.timing.grace_period_seconds,
            message: report.message,
            contract: config.contract.address.clone(),
            has_contract: config.has_contract(),
            executed,
            chain,
        })
    }

    async fn survey(&self, config: &GuardianConfig) -> Result<Survey, GuardianError> {
        let resolved = ResolvedCovenant::resolve(config, &self.data_dir)?;
        UtxoSelector::new(self.chain.as_ref())
            .survey(&resolved.address, &resolved.spk, resolved.required_age)
            .await
    }

    async fn chain_snapshot(&self, config: &GuardianConfig) -> ChainSnapshot {
        match self.survey(config).await {
            Ok(s) => ChainSnapshot {
                available: true,
                survey: Some(s.summary()),
                error: None,
            },
            Err(e) => ChainSnapshot {
                available: false,
                survey: None,
                error: Some(e.to_string()),
            },
        }
    }

    /// Select, build and (if the beneficiary key is configured) sign.
    pub async fn prepare_claim(
        &self,
        config: &GuardianConfig,
        require_signature: bool,
    ) -> Result<PreparedClaim, GuardianError> {
        let resolved = ResolvedCovenant::resolve(config, &self.data_dir)?;
        let beneficiary = config.primary_beneficiary()?;
        let beneficiary_spk = pay_to_address_script(&beneficiary.parsed_address()?);

        let eligible = UtxoSelector::new(self.chain.as_ref())
            .select(&resolved.address, &resolved.spk, resolved.required_age)
            .await?;
        let plan = ClaimTransactionBuilder::new(
            &resolved.covenant,
            beneficiary_spk,
            config.policy.total_fee(),
        )
        .build(&eligible)?;

        let signed = if require_signature || beneficiary.signing_key.is_some() {
            Some(Signer::new(&resolved.covenant, resolved.selector).sign(&plan, beneficiary)?)
        } else {
            None
        };
        Ok(PreparedClaim { plan, signed })
    }

    /// Run the claim. Caller holds the claim guard.
    pub async fn claim_locked(
        &self,
        config: &GuardianConfig,
        heartbeat: Option<&HeartbeatRecord>,
        trigger: ClaimTrigger,
        retry_failed: bool,
    ) -> Result<ClaimReport, GuardianError> {
        if heartbeat.is_none()
            && trigger == ClaimTrigger::Monitor
            && !config.policy.claim_without_heartbeat
        {
            return Err(GuardianError::NoHeartbeatYet);
        }
        let epoch = heartbeat.map(|h| h.timestamp_millis);

        if let Some(marker) = self.store.load_claim_marker()?
            && marker.epoch == epoch
        {
            let retryable =
                retry_failed && matches!(marker.outcome, ClaimOutcome::Failed { .. });
            if !retryable {
                return Err(GuardianError::AlreadyExecuted {
                    tx_id: marker.tx_id,
                });
            }
            tracing::info!(previous = ?marker.tx_id, "retrying failed claim");
        }

        let prepared = self.prepare_claim(config, true).await?;
        let Some(signed) = prepared.signed else {
            return Err(GuardianError::Signing("claim was not signed".into()));
        };
        let tx_id = signed.id().to_string();
        self.confirm_still_expired(config, epoch)?;

        let mut marker = ClaimMarker {
            epoch,
            executed_at: self.clock.now(),
            trigger,
            tx_id: Some(tx_id.clone()),
            outcome: ClaimOutcome::Pending,
        };
        self.store.save_claim_marker(&marker)?;
        tracing::info!(
            tx_id = %tx_id,
            inputs = signed.inputs.len(),
            amount = prepared.plan.output_amount,
            fee = prepared.plan.fee,
            ?trigger,
            "broadcasting claim"
        );

        let result = match Broadcaster::new(self.chain.as_ref(), config.node.retry)
            .submit(&signed)
            .await
        {
            Ok(BroadcastOutcome::AlreadySpent(reason)) if is_orphan_rejection(&reason) => {
                self.confirm_inputs_gone(config, reason).await
            }
            other => other,
        };

        let result = match result {
            Err(GuardianError::InputsMissing(reason)) => {
                tracing::warn!(tx_id = %tx_id, %reason, "covenant funds still present, claim stays open");
                self.store.clear_claim_marker()?;
                return Err(GuardianError::InputsMissing(reason));
            }
            other => other,
        };

        marker.outcome = match &result {
            Ok(BroadcastOutcome::Accepted(_)) => ClaimOutcome::Broadcast,
            Ok(BroadcastOutcome::AlreadySpent(reason)) => ClaimOutcome::AlreadySpent {
                reason: reason.clone(),
            },
            Err(e) => ClaimOutcome::Failed {
                reason: e.to_string(),
            },
        };
        self.store.save_claim_marker(&marker)?;
        result?;

        Ok(ClaimReport {
            tx_id,
            outcome: marker.outcome,
            plan: prepared.plan.summary(),
        })
    }

    /// Re-read the heartbeat just before committing to a broadcast.
    fn confirm_still_expired(
        &self,
        config: &GuardianConfig,
        epoch: Option<i64>,
    ) -> Result<(), GuardianError> {
        let current = self.store.load_heartbeat()?;
        let current_epoch = current.as_ref().map(|h| h.timestamp_millis);
        let report = evaluate(
            elapsed_millis(current.as_ref(), self.clock.now_millis()),
            &config.timing,
        );
        if current_epoch != epoch || !report.is_expired() {
            tracing::info!(?epoch, ?current_epoch, state = ?report.state, "heartbeat arrived during claim, aborting");
            return Err(GuardianError::NotExpired {
                elapsed_secs: report.elapsed_secs.unwrap_or(0),
                required_secs: config.timing.total_wait_seconds(),
            });
        }
        Ok(())
    }

    /// An orphan rejection only means the inputs are gone if the contract
    /// address no longer holds covenant UTXOs.
    async fn confirm_inputs_gone(
        &self,
        config: &GuardianConfig,
        reason: String,
    ) -> Result<BroadcastOutcome, GuardianError> {
        let resolved = ResolvedCovenant::resolve(config, &self.data_dir)?;
        let utxos = match self.chain.get_utxos_by_address(&resolved.address).await {
            Ok(utxos) => utxos,
            Err(e) => {
                return Err(GuardianError::InputsMissing(format!(
                    "{reason}; contract recheck failed: {e}"
                )));
            }
        };
        if utxos.iter().any(|u| u.script_public_key == resolved.spk) {
            return Err(GuardianError::InputsMissing(reason));
        }
        Ok(BroadcastOutcome::AlreadySpent(reason))
    }

    /// Authenticated manual execute, dry run or real.
    pub async fn execute(
        &self,
        presented_key: &str,
        options: ExecuteOptions,
    ) -> Result<ExecuteResponse, GuardianError> {
        let config = self.authorize(presented_key)?;
        // Held from the expiry check through the broadcast.
        let _guard = if options.dry_run {
            None
        } else {
            Some(self.claim_guard.clone().lock_owned().await)
        };
        let heartbeat = self.store.load_heartbeat()?;
        let report = evaluate(
            elapsed_millis(heartbeat.as_ref(), self.clock.now_millis()),
            &config.timing,
        );
        let required = config.timing.total_wait_seconds();
        let expired = report.is_expired();

        let mut response = ExecuteResponse {
            success: false,
            dry_run: options.dry_run,
            would_execute: expired,
            elapsed: report.elapsed_secs,
            required,
            remaining: (!expired).then_some(report.grace_remaining_secs),
            contract: config.contract.address.clone(),
            beneficiaries: config.redacted().beneficiaries,
            plan: None,
            plan_error: None,
            signed: false,
            tx_id: None,
            outcome: None,
        };

        if options.dry_run {
            match self.prepare_claim(&config, false).await {
                Ok(prepared) => {
                    response.tx_id = prepared.signed.as_ref().map(|t| t.id().to_string());
                    response.signed = prepared.signed.is_some();
                    response.plan = Some(prepared.plan.summary());
                }
                Err(e) => response.plan_error = Some(e.to_string()),
            }
            response.success = true;
            return Ok(response);
        }

        if !expired {
            return Err(GuardianError::NotExpired {
                elapsed_secs: report.elapsed_secs.unwrap_or(0),
                required_secs: required,
            });
        }

        let claim = self
            .claim_locked(&config, heartbeat.as_ref(), ClaimTrigger::Manual, options.retry_failed)
            .await?;
        response.success = true;
        response.signed = true;
        response.tx_id = Some(claim.tx_id);
        response.outcome = Some(claim.outcome);
        response.plan = Some(claim.plan);
        Ok(response)
    }
}
