//! Heartbeat gateway: authentication, last-write-wins, marker reset.

mod common;

use chrono::Utc;
use common::*;
use kaspa_guardian::pipeline::{ClaimMarker, ClaimOutcome, ClaimTrigger};
use kaspa_guardian::sdk::GuardianError;
use kaspa_guardian::store::GuardianStore;

fn marker(epoch: Option<i64>) -> ClaimMarker {
    ClaimMarker {
        epoch,
        executed_at: Utc::now(),
        trigger: ClaimTrigger::Monitor,
        tx_id: Some("abcd".into()),
        outcome: ClaimOutcome::Broadcast,
    }
}

#[test]
fn wrong_key_is_unauthorized_and_changes_nothing() {
    let h = harness();
    h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
    let before = h.store.load_heartbeat().unwrap();
    h.store.save_claim_marker(&marker(Some(T0_MILLIS))).unwrap();

    h.clock.advance_secs(30);
    for bad in ["", "hb-test-ke", "hb-test-key ", "HB-TEST-KEY"] {
        assert!(matches!(h.ctx.heartbeat(bad), Err(GuardianError::Unauthorized)));
    }

    assert_eq!(h.store.load_heartbeat().unwrap(), before);
    assert!(h.store.load_claim_marker().unwrap().is_some());
}

#[test]
fn wrong_key_on_empty_store_leaves_no_record() {
    let h = harness();
    assert!(matches!(h.ctx.heartbeat("nope"), Err(GuardianError::Unauthorized)));
    assert!(h.store.load_heartbeat().unwrap().is_none());
}

#[test]
fn repeated_heartbeats_overwrite_fully() {
    let h = harness();
    let first = h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
    h.clock.advance_secs(5);
    let second = h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();

    assert_eq!(second.timestamp_millis - first.timestamp_millis, 5_000);
    assert_eq!(h.store.load_heartbeat().unwrap(), Some(second));
}

#[test]
fn valid_heartbeat_clears_executed_marker() {
    let h = harness();
    h.store.save_claim_marker(&marker(None)).unwrap();
    h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
    assert!(h.store.load_claim_marker().unwrap().is_none());

    // a second heartbeat with nothing to clear is fine
    h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
    assert!(h.store.load_claim_marker().unwrap().is_none());
}

#[test]
fn heartbeat_without_config_is_config_missing() {
    let h = harness();
    let empty = kaspa_guardian::store::MemoryStore::default();
    let gateway = kaspa_guardian::heartbeat::HeartbeatGateway::new(&empty, h.clock.as_ref());
    assert!(matches!(
        gateway.beat(HEARTBEAT_KEY),
        Err(GuardianError::ConfigMissing(_))
    ));
}
