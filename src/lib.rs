//! Kaspa Guardian
//!
//! Dead-man switch for funds locked in a Kaspa P2SH covenant. The owner sends
//! periodic heartbeats; once they stop for longer than the configured timeout
//! plus grace period, the guardian spends the covenant UTXOs to the first
//! beneficiary through the covenant's claim entrypoint.
//!
//! - [`monitor`]: liveness state machine and periodic monitor
//! - [`heartbeat`]: authenticated liveness signal
//! - [`pipeline`]: selection, build, sign, broadcast, at most once per epoch
//! - [`sdk`]: covenant, script, transaction and signing primitives
//! - [`chain`]: node access with retry and timeouts
//! - [`api`]: HTTP control surface

pub mod api;
pub mod chain;
pub mod clock;
pub mod config;
pub mod heartbeat;
pub mod monitor;
pub mod pipeline;
pub mod sdk;
pub mod store;

use kaspa_addresses::{Address, Prefix, Version};
use kaspa_consensus_core::{
    hashing::sighash::SigHashReusedValuesUnsync,
    tx::{PopulatedTransaction, ScriptPublicKey, Transaction, UtxoEntry},
};
use kaspa_txscript::{EngineCtx, TxScriptEngine, caches::Cache, pay_to_address_script};
use rand::thread_rng;
use secp256k1::Keypair;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the fmt subscriber. `RUST_LOG` overrides the default filter.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kaspa_guardian=info,api=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Generate a new Schnorr keypair. Returns the keypair and its 32-byte x-only public key.
pub fn generate_keypair() -> (Keypair, [u8; 32]) {
    let kp = Keypair::new(secp256k1::SECP256K1, &mut thread_rng());
    let pk = kp.x_only_public_key().0.serialize();
    (kp, pk)
}

/// Testnet P2PK address for a 32-byte x-only public key.
pub fn testnet_address(pubkey: &[u8; 32]) -> Address {
    Address::new(Prefix::Testnet, Version::PubKey, pubkey.as_slice())
}

/// P2PK ScriptPublicKey for an x-only pubkey. Prefix-independent.
pub fn p2pk_spk(pubkey: &[u8; 32]) -> ScriptPublicKey {
    pay_to_address_script(&testnet_address(pubkey))
}

/// Run the script engine on `input_index`, with all of `utxo_entries`
/// populated so multi-input sighashes resolve.
pub fn verify_script_input(
    tx: &Transaction,
    utxo_entries: &[UtxoEntry],
    input_index: usize,
) -> Result<(), String> {
    let entry = utxo_entries
        .get(input_index)
        .ok_or_else(|| format!("no UTXO entry for input {input_index}"))?;
    let input = tx
        .inputs
        .get(input_index)
        .ok_or_else(|| format!("no input {input_index}"))?;
    let sig_cache = Cache::new(10_000);
    let reused_values = SigHashReusedValuesUnsync::new();
    let ctx = EngineCtx::new(&sig_cache).with_reused(&reused_values);
    let populated = PopulatedTransaction::new(tx, utxo_entries.to_vec());
    let mut vm = TxScriptEngine::from_transaction_input(
        &populated,
        input,
        input_index,
        entry,
        ctx,
        Default::default(),
    );
    vm.execute().map_err(|e| format!("{:?}", e))
}

