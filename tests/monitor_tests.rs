//! Timeout monitor: state function properties, end-to-end expiry, and the
//! at-most-once claim guarantee.

mod common;

use common::*;
use kaspa_guardian::chain::ChainError;
use kaspa_guardian::config::{TimingConfig, WarningLevel};
use kaspa_guardian::monitor::{LivenessState, TickOutcome, TimeoutMonitor, evaluate};
use kaspa_guardian::pipeline::{ClaimOutcome, ClaimTrigger};
use kaspa_guardian::sdk::GuardianError;
use kaspa_guardian::store::GuardianStore;
use proptest::prelude::*;

// ─── State function ─────────────────────────────────────────

fn arb_timing() -> impl Strategy<Value = TimingConfig> {
    (
        1u64..10_000_000,
        0u64..1_000_000,
        prop::collection::vec((0u64..200, "[a-z]{1,8}"), 0..4),
    )
        .prop_map(|(timeout, grace, levels)| TimingConfig {
            timeout_period_seconds: timeout,
            grace_period_seconds: grace,
            check_interval_seconds: 60,
            warning_levels: levels
                .into_iter()
                .map(|(days_elapsed, message)| WarningLevel { days_elapsed, message })
                .collect(),
        })
}

proptest! {
    #[test]
    fn state_never_improves_as_time_passes(
        timing in arb_timing(),
        a in 0u64..20_000_000_000,
        b in 0u64..20_000_000_000,
    ) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let earlier = evaluate(Some(lo), &timing);
        let later = evaluate(Some(hi), &timing);
        prop_assert!(earlier.state <= later.state);
        prop_assert!(later.state <= evaluate(None, &timing).state);
    }

    #[test]
    fn state_matches_the_priority_rule(timing in arb_timing(), elapsed in 0u64..20_000_000_000) {
        let report = evaluate(Some(elapsed), &timing);
        let timeout_ms = timing.timeout_period_seconds * 1000;
        let total_ms = timing.total_wait_seconds() * 1000;
        let days = elapsed / 86_400_000;
        let reached = timing
            .warning_levels
            .iter()
            .map(|l| l.days_elapsed)
            .filter(|d| *d <= days)
            .max();
        let expected = if elapsed > total_ms {
            LivenessState::Expired
        } else if elapsed > timeout_ms {
            LivenessState::GracePeriod
        } else if reached.is_some() {
            LivenessState::Warning
        } else {
            LivenessState::Ok
        };
        prop_assert_eq!(report.state, expected);
        if let (LivenessState::Warning, Some(level_days)) = (report.state, reached) {
            let message = report.message.clone().unwrap_or_default();
            prop_assert!(timing
                .warning_levels
                .iter()
                .any(|l| l.days_elapsed == level_days && l.message == message));
        }
        if report.state == LivenessState::Ok {
            prop_assert_eq!(report.remaining_secs, (timeout_ms - elapsed) / 1000);
        }
    }
}

// ─── End-to-end expiry ──────────────────────────────────────

#[test]
fn grace_then_expired_on_the_clock() {
    let h = harness();
    h.beat_then_wait(601);
    let (_, _, report) = h.ctx.liveness().unwrap();
    assert_eq!(report.state, LivenessState::GracePeriod);
    assert_eq!(report.grace_remaining_secs, 59);

    h.clock.advance_secs(60);
    let (_, _, report) = h.ctx.liveness().unwrap();
    assert_eq!(report.state, LivenessState::Expired);
}

#[tokio::test]
async fn alive_owner_means_no_claim() {
    let h = harness();
    h.beat_then_wait(100);
    let outcome = TimeoutMonitor::new(h.ctx.clone()).tick().await;
    assert!(matches!(outcome, TickOutcome::Evaluated(r) if r.state == LivenessState::Ok));
    assert_eq!(h.chain.submissions(), 0);
    assert_eq!(h.chain.utxo_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expiry_claims_exactly_once_per_epoch() {
    let h = harness();
    h.beat_then_wait(661);
    let monitor = TimeoutMonitor::new(h.ctx.clone());

    let (report, claim) = match monitor.tick().await {
        TickOutcome::Claimed(report, claim) => (report, claim),
        other => panic!("expected a claim, got {other:?}"),
    };
    assert!(report.is_expired());
    assert_eq!(claim.outcome, ClaimOutcome::Broadcast);
    assert_eq!(claim.plan.output_amount, 99_999_000);
    assert_eq!(h.chain.submissions(), 1);

    for _ in 0..3 {
        h.clock.advance_secs(10);
        let again = monitor.tick().await;
        assert!(matches!(
            again,
            TickOutcome::ClaimDeferred(_, GuardianError::AlreadyExecuted { .. })
        ));
    }
    assert_eq!(h.chain.submissions(), 1);

    // a new heartbeat opens a new epoch
    h.beat_then_wait(661);
    assert!(matches!(monitor.tick().await, TickOutcome::Claimed(..)));
    assert_eq!(h.chain.submissions(), 2);
}

#[tokio::test]
async fn marker_is_durable_before_broadcast() {
    let h = harness();
    h.observe_markers();
    h.beat_then_wait(661);
    TimeoutMonitor::new(h.ctx.clone()).tick().await;

    let seen = h.chain.markers_at_submit.lock().unwrap().clone();
    assert_eq!(seen.len(), 1);
    let marker = seen[0].clone().expect("marker saved before submit");
    assert_eq!(marker.outcome, ClaimOutcome::Pending);
    assert_eq!(marker.epoch, Some(T0_MILLIS));
    assert_eq!(marker.trigger, ClaimTrigger::Monitor);

    let stored = h.store.load_claim_marker().unwrap().unwrap();
    assert_eq!(stored.outcome, ClaimOutcome::Broadcast);
    assert_eq!(stored.tx_id, marker.tx_id);
}

#[tokio::test]
async fn already_spent_counts_as_done() {
    let h = harness();
    h.chain.spend_on_submit.store(true, std::sync::atomic::Ordering::SeqCst);
    h.chain.script_submit([ChainError::Rejected(
        "transaction ab is an orphan where orphan is disallowed".into(),
    )]);
    h.beat_then_wait(661);
    let claim = match TimeoutMonitor::new(h.ctx.clone()).tick().await {
        TickOutcome::Claimed(_, claim) => claim,
        other => panic!("expected success-equivalent, got {other:?}"),
    };
    assert!(matches!(claim.outcome, ClaimOutcome::AlreadySpent { .. }));
    assert_eq!(h.chain.submissions(), 1);
}

#[tokio::test]
async fn orphan_with_funds_still_locked_keeps_the_claim_open() {
    let h = harness();
    h.chain.script_submit([ChainError::Rejected(
        "transaction ab is an orphan where orphan is disallowed".into(),
    )]);
    h.beat_then_wait(661);
    let monitor = TimeoutMonitor::new(h.ctx.clone());

    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(_, GuardianError::InputsMissing(r)) if r.contains("orphan")
    ));
    assert!(h.store.load_claim_marker().unwrap().is_none());

    assert!(matches!(monitor.tick().await, TickOutcome::Claimed(..)));
    assert_eq!(h.chain.submissions(), 2);
}

#[tokio::test]
async fn heartbeat_during_claim_aborts_it() {
    let h = harness();
    h.beat_then_wait(661);
    h.beat_during_claim(T0_MILLIS + 661_000);
    let outcome = TimeoutMonitor::new(h.ctx.clone()).tick().await;
    assert!(matches!(
        outcome,
        TickOutcome::ClaimDeferred(_, GuardianError::NotExpired { elapsed_secs: 0, .. })
    ));
    assert_eq!(h.chain.submissions(), 0);
    assert!(h.store.load_claim_marker().unwrap().is_none());

    let (_, _, report) = h.ctx.liveness().unwrap();
    assert_eq!(report.state, LivenessState::Ok);
}

#[tokio::test]
async fn fatal_rejection_is_recorded_and_not_repeated() {
    let h = harness();
    h.chain.script_submit([ChainError::Rejected("fee too low".into())]);
    h.beat_then_wait(661);
    let monitor = TimeoutMonitor::new(h.ctx.clone());

    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(_, GuardianError::SubmitRejected(r)) if r == "fee too low"
    ));
    let marker = h.store.load_claim_marker().unwrap().unwrap();
    assert!(matches!(marker.outcome, ClaimOutcome::Failed { .. }));

    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(_, GuardianError::AlreadyExecuted { .. })
    ));
    assert_eq!(h.chain.submissions(), 1);
}

#[tokio::test]
async fn failures_before_signing_leave_no_marker() {
    let h = harness();
    h.chain.set_utxos(vec![h.fixture.utxo(1, 0, 100_000_000, 9_900)]);
    h.beat_then_wait(661);
    let monitor = TimeoutMonitor::new(h.ctx.clone());

    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(_, GuardianError::NotYetEligible { current_age: 100, required_age: 600 })
    ));
    assert!(h.store.load_claim_marker().unwrap().is_none());

    h.chain.daa_score.store(10_500, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(monitor.tick().await, TickOutcome::Claimed(..)));
}

#[tokio::test]
async fn chain_outage_is_deferred_and_retried_next_tick() {
    let h = harness();
    h.chain.unavailable.store(true, std::sync::atomic::Ordering::SeqCst);
    h.beat_then_wait(661);
    let monitor = TimeoutMonitor::new(h.ctx.clone());

    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(_, GuardianError::ChainUnavailable(_))
    ));
    h.chain.unavailable.store(false, std::sync::atomic::Ordering::SeqCst);
    assert!(matches!(monitor.tick().await, TickOutcome::Claimed(..)));
}

#[tokio::test]
async fn never_beaten_waits_unless_policy_allows() {
    let h = harness();
    let monitor = TimeoutMonitor::new(h.ctx.clone());
    assert!(matches!(
        monitor.tick().await,
        TickOutcome::ClaimDeferred(r, GuardianError::NoHeartbeatYet) if r.is_expired()
    ));
    assert_eq!(h.chain.submissions(), 0);

    let mut config = h.fixture.config.clone();
    config.policy.claim_without_heartbeat = true;
    h.store.save_config(&config).unwrap();
    assert!(matches!(monitor.tick().await, TickOutcome::Claimed(..)));
    let marker = h.store.load_claim_marker().unwrap().unwrap();
    assert_eq!(marker.epoch, None);
}

#[tokio::test]
async fn tick_is_skipped_while_guard_is_held() {
    let h = harness();
    h.beat_then_wait(661);
    let guard = h.ctx.try_claim_guard().unwrap();
    assert!(matches!(
        TimeoutMonitor::new(h.ctx.clone()).tick().await,
        TickOutcome::Busy
    ));
    drop(guard);
    assert_eq!(h.chain.submissions(), 0);
}

#[tokio::test]
async fn missing_config_is_reported_not_fatal() {
    let h = harness();
    let empty = std::sync::Arc::new(kaspa_guardian::store::MemoryStore::default());
    let ctx = kaspa_guardian::pipeline::GuardianContext::new(
        empty,
        h.chain.clone(),
        h.clock.clone(),
        std::env::temp_dir(),
    );
    assert!(matches!(
        TimeoutMonitor::new(ctx).tick().await,
        TickOutcome::Unreadable(GuardianError::ConfigMissing(_))
    ));
}

#[tokio::test]
async fn execute_queued_behind_a_pass_sees_the_new_heartbeat() {
    let h = harness();
    h.beat_then_wait(700);
    let guard = h.ctx.try_claim_guard().unwrap();

    let ctx = h.ctx.clone();
    let pending = tokio::spawn(async move {
        ctx.execute(HEARTBEAT_KEY, kaspa_guardian::pipeline::ExecuteOptions::default())
            .await
    });
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }

    h.ctx.heartbeat(HEARTBEAT_KEY).unwrap();
    drop(guard);

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(GuardianError::NotExpired { elapsed_secs: 0, .. })));
    assert_eq!(h.chain.submissions(), 0);
    assert!(h.store.load_claim_marker().unwrap().is_none());
}
