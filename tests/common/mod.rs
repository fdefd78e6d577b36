//! Shared fixtures: a scriptable in-memory chain, a two-branch covenant
//! fixture, and a fully wired context with a manual clock.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kaspa_addresses::{Address, Prefix};
use kaspa_consensus_core::tx::{Transaction, TransactionId, TransactionOutpoint};
use kaspa_guardian::chain::{ChainClient, ChainError, ContractUtxo, RetryPolicy};
use kaspa_guardian::clock::ManualClock;
use kaspa_guardian::config::{
    Beneficiary, ClaimPolicy, ContractConfig, GuardianConfig, NodeConfig, OwnerConfig,
    TimingConfig,
};
use kaspa_guardian::heartbeat::HeartbeatRecord;
use kaspa_guardian::pipeline::{ClaimMarker, GuardianContext};
use kaspa_guardian::sdk::CompiledCovenant;
use kaspa_guardian::store::{GuardianStore, MemoryStore};
use kaspa_guardian::{generate_keypair, testnet_address};
use kaspa_txscript::{
    opcodes::codes::{
        OpCheckSig, OpDrop, OpDup, OpElse, OpEndIf, OpEqualVerify, OpFalse, OpIf, OpNumEqual,
        OpNumEqualVerify, OpSwap,
    },
    script_builder::ScriptBuilder,
};
use secp256k1::Keypair;

pub const HEARTBEAT_KEY: &str = "hb-test-key";
pub const T0_MILLIS: i64 = 1_700_000_000_000;
pub const TIMEOUT_DAA: u64 = 600;

// ─── Mock chain ─────────────────────────────────────────────

#[derive(Default)]
pub struct MockChain {
    pub utxos: Mutex<Vec<ContractUtxo>>,
    pub daa_score: AtomicU64,
    pub unavailable: AtomicBool,
    pub utxo_calls: AtomicU64,
    pub submitted: Mutex<Vec<Transaction>>,
    /// Responses for successive submits; empty means accept.
    pub submit_script: Mutex<VecDeque<ChainError>>,
    /// When set, the claim marker is read at every submit.
    pub observer: Mutex<Option<Arc<dyn GuardianStore>>>,
    pub markers_at_submit: Mutex<Vec<Option<ClaimMarker>>>,
    /// Accepted submits remove the contract UTXOs, as a mined claim would.
    pub spend_on_submit: AtomicBool,
    /// Saved into the store on the next UTXO fetch: an owner heartbeat that
    /// lands while a claim is being prepared.
    pub beat_on_fetch: Mutex<Option<(Arc<dyn GuardianStore>, HeartbeatRecord)>>,
}

impl MockChain {
    pub fn new(daa_score: u64) -> Self {
        let chain = Self::default();
        chain.daa_score.store(daa_score, Ordering::SeqCst);
        chain
    }

    pub fn set_utxos(&self, utxos: Vec<ContractUtxo>) {
        *self.utxos.lock().unwrap() = utxos;
    }

    pub fn script_submit(&self, errors: impl IntoIterator<Item = ChainError>) {
        self.submit_script.lock().unwrap().extend(errors);
    }

    pub fn submissions(&self) -> usize {
        self.submitted.lock().unwrap().len()
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_utxos_by_address(
        &self,
        _address: &Address,
    ) -> Result<Vec<ContractUtxo>, ChainError> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((store, record)) = self.beat_on_fetch.lock().unwrap().take() {
            store.save_heartbeat(&record).unwrap();
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("connection refused".into()));
        }
        Ok(self.utxos.lock().unwrap().clone())
    }

    async fn get_virtual_daa_score(&self) -> Result<u64, ChainError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ChainError::Unavailable("connection refused".into()));
        }
        Ok(self.daa_score.load(Ordering::SeqCst))
    }

    async fn submit_transaction(
        &self,
        tx: &Transaction,
        _allow_orphan: bool,
    ) -> Result<TransactionId, ChainError> {
        if let Some(store) = self.observer.lock().unwrap().as_ref() {
            let marker = store.load_claim_marker().unwrap();
            self.markers_at_submit.lock().unwrap().push(marker);
        }
        self.submitted.lock().unwrap().push(tx.clone());
        if self.spend_on_submit.load(Ordering::SeqCst) {
            self.utxos.lock().unwrap().clear();
        }
        match self.submit_script.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(tx.id()),
        }
    }
}

// ─── Covenant fixture ───────────────────────────────────────

/// Two-entrypoint dead-man covenant: selector 0 is the owner path, selector 1
/// the beneficiary claim. Unlocking stack is `<sig> <selector> <pubkey>`.
pub fn deadman_script(owner_pk: &[u8; 32], beneficiary_pk: &[u8; 32]) -> Vec<u8> {
    ScriptBuilder::new()
        .add_op(OpSwap)
        .unwrap()
        .add_op(OpDup)
        .unwrap()
        .add_op(OpFalse)
        .unwrap()
        .add_op(OpNumEqual)
        .unwrap()
        .add_op(OpIf)
        .unwrap()
        .add_op(OpDrop)
        .unwrap()
        .add_op(OpDup)
        .unwrap()
        .add_data(owner_pk)
        .unwrap()
        .add_op(OpEqualVerify)
        .unwrap()
        .add_op(OpCheckSig)
        .unwrap()
        .add_op(OpElse)
        .unwrap()
        .add_i64(1)
        .unwrap()
        .add_op(OpNumEqualVerify)
        .unwrap()
        .add_op(OpDup)
        .unwrap()
        .add_data(beneficiary_pk)
        .unwrap()
        .add_op(OpEqualVerify)
        .unwrap()
        .add_op(OpCheckSig)
        .unwrap()
        .add_op(OpEndIf)
        .unwrap()
        .drain()
}

pub struct Fixture {
    pub owner_kp: Keypair,
    pub beneficiary_kp: Keypair,
    pub beneficiary_pk: [u8; 32],
    pub covenant: CompiledCovenant,
    pub contract_address: Address,
    pub config: GuardianConfig,
}

impl Fixture {
    pub fn new() -> Self {
        let (owner_kp, owner_pk) = generate_keypair();
        let (beneficiary_kp, beneficiary_pk) = generate_keypair();
        let covenant =
            CompiledCovenant::from_redeem_script(deadman_script(&owner_pk, &beneficiary_pk));
        let contract_address = covenant.address(Prefix::Testnet).unwrap();

        let config = GuardianConfig {
            name: Some("test-guardian".into()),
            owner: OwnerConfig {
                secret_key: Some(hex::encode(owner_kp.secret_bytes())),
                address: Some(testnet_address(&owner_pk).to_string()),
                heartbeat_key: HEARTBEAT_KEY.into(),
            },
            contract: ContractConfig {
                address: Some(contract_address.to_string()),
                script_hash: Some(hex::encode(covenant.script_hash())),
                redeem_script: Some(hex::encode(&covenant.script)),
                artifact: None,
                timeout_daa: Some(TIMEOUT_DAA),
                kind: Some("DeadmanSwitch".into()),
                deployed_at: None,
            },
            beneficiaries: vec![Beneficiary {
                address: testnet_address(&beneficiary_pk).to_string(),
                name: "Primary Beneficiary".into(),
                signing_key: Some(hex::encode(beneficiary_kp.secret_bytes())),
            }],
            timing: TimingConfig {
                timeout_period_seconds: 600,
                grace_period_seconds: 60,
                check_interval_seconds: 10,
                warning_levels: vec![],
            },
            node: NodeConfig {
                retry: fast_retry(),
                ..NodeConfig::default()
            },
            policy: ClaimPolicy::default(),
        };

        Self {
            owner_kp,
            beneficiary_kp,
            beneficiary_pk,
            covenant,
            contract_address,
            config,
        }
    }

    /// A covenant-locked UTXO; `tag` fills the transaction id.
    pub fn utxo(&self, tag: u8, index: u32, amount: u64, block_daa_score: u64) -> ContractUtxo {
        ContractUtxo {
            outpoint: TransactionOutpoint::new(TransactionId::from_bytes([tag; 32]), index),
            amount,
            block_daa_score,
            script_public_key: self.covenant.p2sh_spk(),
            is_coinbase: false,
        }
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        base_delay_ms: 1,
        max_delay_ms: 2,
    }
}

// ─── Wired context ──────────────────────────────────────────

pub struct Harness {
    pub fixture: Fixture,
    pub chain: Arc<MockChain>,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub ctx: GuardianContext,
}

/// Context over a chain at DAA 10_000 holding one eligible 1 KAS UTXO.
pub fn harness() -> Harness {
    let fixture = Fixture::new();
    let chain = Arc::new(MockChain::new(10_000));
    chain.set_utxos(vec![fixture.utxo(7, 0, 100_000_000, 1_000)]);
    let store = Arc::new(MemoryStore::with_config(fixture.config.clone()));
    let clock = Arc::new(ManualClock::new(T0_MILLIS));
    let ctx = GuardianContext::new(
        store.clone(),
        chain.clone(),
        clock.clone(),
        std::env::temp_dir(),
    );
    Harness {
        fixture,
        chain,
        store,
        clock,
        ctx,
    }
}

impl Harness {
    /// Record a heartbeat now, then move the clock `secs` forward.
    pub fn beat_then_wait(&self, secs: i64) {
        self.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
        self.clock.advance_secs(secs);
    }

    /// Arrange for a fresh heartbeat, stamped `millis`, to land mid-claim.
    pub fn beat_during_claim(&self, millis: i64) {
        *self.chain.beat_on_fetch.lock().unwrap() = Some((
            self.store.clone() as Arc<dyn GuardianStore>,
            HeartbeatRecord::new(HEARTBEAT_KEY.into(), millis),
        ));
    }

    pub fn observe_markers(&self) {
        *self.chain.observer.lock().unwrap() = Some(self.store.clone() as Arc<dyn GuardianStore>);
    }
}
