//! Liveness state machine and the periodic monitor that acts on it.
//!
//! [`evaluate`] is a pure function of elapsed time and timing config. The
//! monitor loop reads state through the [`GuardianContext`], evaluates, and
//! hands an EXPIRED result to the claim pipeline.

use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;

use crate::config::TimingConfig;
use crate::heartbeat::HeartbeatRecord;
use crate::pipeline::{ClaimReport, ClaimTrigger, GuardianContext};
use crate::sdk::GuardianError;

const MILLIS_PER_DAY: u64 = 86_400_000;

/// Ordered by severity: a later variant is never followed by an earlier one
/// as elapsed time grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LivenessState {
    Ok,
    Warning,
    GracePeriod,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LivenessReport {
    pub state: LivenessState,
    /// Whole seconds since the last heartbeat; `None` when there never was one.
    pub elapsed_secs: Option<u64>,
    pub remaining_secs: u64,
    pub grace_remaining_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl LivenessReport {
    pub fn is_expired(&self) -> bool {
        self.state == LivenessState::Expired
    }
}

/// Milliseconds since `heartbeat`, with a heartbeat stamped in the future
/// counting as zero.
pub fn elapsed_millis(heartbeat: Option<&HeartbeatRecord>, now_millis: i64) -> Option<u64> {
    heartbeat.map(|hb| u64::try_from(now_millis.saturating_sub(hb.timestamp_millis)).unwrap_or(0))
}

/// Map elapsed time onto exactly one liveness state.
///
/// Checked in order: past timeout + grace is EXPIRED; past timeout is
/// GRACE_PERIOD; a reached warning level is WARNING (highest level's
/// message); otherwise OK.
///
/// A warning level stays in force once reached rather than applying only
/// during its one-day window, so the state never steps back to OK without a
/// heartbeat.
pub fn evaluate(elapsed_millis: Option<u64>, timing: &TimingConfig) -> LivenessReport {
    let timeout_ms = timing.timeout_period_seconds.saturating_mul(1000);
    let total_ms = timing.total_wait_seconds().saturating_mul(1000);

    let Some(elapsed) = elapsed_millis else {
        return LivenessReport {
            state: LivenessState::Expired,
            elapsed_secs: None,
            remaining_secs: 0,
            grace_remaining_secs: 0,
            message: None,
        };
    };

    let mut report = LivenessReport {
        state: LivenessState::Ok,
        elapsed_secs: Some(elapsed / 1000),
        remaining_secs: timeout_ms.saturating_sub(elapsed) / 1000,
        grace_remaining_secs: total_ms.saturating_sub(elapsed) / 1000,
        message: None,
    };

    if elapsed > total_ms {
        report.state = LivenessState::Expired;
    } else if elapsed > timeout_ms {
        report.state = LivenessState::GracePeriod;
    } else {
        let days = elapsed / MILLIS_PER_DAY;
        if let Some(level) = timing
            .warning_levels
            .iter()
            .filter(|l| l.days_elapsed <= days)
            .max_by_key(|l| l.days_elapsed)
        {
            report.state = LivenessState::Warning;
            report.message = Some(level.message.clone());
        }
    }
    report
}

/// Result of one monitor pass.
#[derive(Debug)]
pub enum TickOutcome {
    Evaluated(LivenessReport),
    Claimed(LivenessReport, ClaimReport),
    /// EXPIRED but the claim did not go out this tick.
    ClaimDeferred(LivenessReport, GuardianError),
    /// A previous tick or a manual execute still holds the claim guard.
    Busy,
    /// Config or heartbeat could not be read; retried next tick.
    Unreadable(GuardianError),
}

pub struct TimeoutMonitor {
    ctx: GuardianContext,
}

impl TimeoutMonitor {
    pub fn new(ctx: GuardianContext) -> Self {
        Self { ctx }
    }

    pub async fn tick(&self) -> TickOutcome {
        let Some(_guard) = self.ctx.try_claim_guard() else {
            tracing::debug!("previous pass still running, skipping tick");
            return TickOutcome::Busy;
        };

        let (config, heartbeat, report) = match self.ctx.liveness() {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "monitor could not read state");
                return TickOutcome::Unreadable(e);
            }
        };

        match report.state {
            LivenessState::Ok => {
                tracing::debug!(remaining_secs = report.remaining_secs, "owner alive");
                TickOutcome::Evaluated(report)
            }
            LivenessState::Warning => {
                tracing::warn!(
                    elapsed_secs = report.elapsed_secs,
                    message = report.message.as_deref().unwrap_or_default(),
                    "heartbeat overdue"
                );
                TickOutcome::Evaluated(report)
            }
            LivenessState::GracePeriod => {
                tracing::warn!(
                    grace_remaining_secs = report.grace_remaining_secs,
                    "timeout passed, in grace period"
                );
                TickOutcome::Evaluated(report)
            }
            LivenessState::Expired => {
                match self
                    .ctx
                    .claim_locked(&config, heartbeat.as_ref(), ClaimTrigger::Monitor, false)
                    .await
                {
                    Ok(claim) => TickOutcome::Claimed(report, claim),
                    Err(e) => {
                        if matches!(e, GuardianError::AlreadyExecuted { .. }) {
                            tracing::debug!("claim already executed for this epoch");
                        } else if e.is_retryable() || matches!(e, GuardianError::NoHeartbeatYet) {
                            tracing::info!(error = %e, "expired, claim deferred");
                        } else {
                            tracing::error!(error = %e, "expired, claim failed");
                        }
                        TickOutcome::ClaimDeferred(report, e)
                    }
                }
            }
        }
    }

    /// Run [`tick`](Self::tick) every `interval` until the task is aborted.
    pub fn start(self, interval: Duration) -> JoinHandle<()> {
        let monitor = std::sync::Arc::new(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tracing::info!(interval_secs = interval.as_secs(), "monitor started");
            loop {
                ticker.tick().await;
                // Spawned so a panic in one pass does not end the loop.
                let m = monitor.clone();
                if let Err(e) = tokio::spawn(async move { m.tick().await }).await {
                    tracing::error!(error = %e, "monitor pass panicked");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WarningLevel;

    fn timing() -> TimingConfig {
        TimingConfig {
            timeout_period_seconds: 600,
            grace_period_seconds: 60,
            check_interval_seconds: 10,
            warning_levels: vec![],
        }
    }

    #[test]
    fn scenario_grace_then_expired() {
        let t = timing();
        let ok = evaluate(Some(0), &t);
        assert_eq!(ok.state, LivenessState::Ok);
        assert_eq!(ok.remaining_secs, 600);

        let at_timeout = evaluate(Some(600_000), &t);
        assert_eq!(at_timeout.state, LivenessState::Ok);

        let grace = evaluate(Some(601_000), &t);
        assert_eq!(grace.state, LivenessState::GracePeriod);
        assert_eq!(grace.grace_remaining_secs, 59);

        assert_eq!(evaluate(Some(660_000), &t).state, LivenessState::GracePeriod);
        let expired = evaluate(Some(661_000), &t);
        assert_eq!(expired.state, LivenessState::Expired);
        assert_eq!(expired.grace_remaining_secs, 0);
    }

    #[test]
    fn never_beaten_is_expired() {
        let r = evaluate(None, &timing());
        assert_eq!(r.state, LivenessState::Expired);
        assert_eq!(r.elapsed_secs, None);
    }

    #[test]
    fn warning_uses_highest_reached_level() {
        let t = TimingConfig {
            timeout_period_seconds: 30 * 86_400,
            grace_period_seconds: 86_400,
            check_interval_seconds: 3_600,
            warning_levels: vec![
                WarningLevel { days_elapsed: 7, message: "one week".into() },
                WarningLevel { days_elapsed: 3, message: "three days".into() },
            ],
        };
        assert_eq!(evaluate(Some(2 * MILLIS_PER_DAY), &t).state, LivenessState::Ok);
        let three = evaluate(Some(3 * MILLIS_PER_DAY), &t);
        assert_eq!(three.message.as_deref(), Some("three days"));
        let eight = evaluate(Some(8 * MILLIS_PER_DAY + 5), &t);
        assert_eq!(eight.state, LivenessState::Warning);
        assert_eq!(eight.message.as_deref(), Some("one week"));
    }

    #[test]
    fn future_heartbeat_counts_as_now() {
        let hb = HeartbeatRecord::new("k".into(), 10_000);
        assert_eq!(elapsed_millis(Some(&hb), 4_000), Some(0));
        assert_eq!(elapsed_millis(Some(&hb), 12_500), Some(2_500));
        assert_eq!(elapsed_millis(None, 12_500), None);
    }
}
