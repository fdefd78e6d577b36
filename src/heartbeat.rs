//! Owner liveness signal.
//!
//! A heartbeat is valid only when the presented key equals
//! `owner.heartbeatKey`. A valid heartbeat overwrites the single
//! [`HeartbeatRecord`] and clears any claim marker from the previous epoch.

use std::fmt;

use chrono::{SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::config::GuardianConfig;
use crate::sdk::GuardianError;
use crate::store::GuardianStore;

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRecord {
    #[serde(alias = "key")]
    pub presented_key: String,
    #[serde(alias = "timestamp")]
    pub timestamp_millis: i64,
    #[serde(alias = "date")]
    pub iso_date: String,
}

impl fmt::Debug for HeartbeatRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeartbeatRecord")
            .field("presented_key", &"<redacted>")
            .field("timestamp_millis", &self.timestamp_millis)
            .field("iso_date", &self.iso_date)
            .finish()
    }
}

impl HeartbeatRecord {
    pub fn new(presented_key: String, timestamp_millis: i64) -> Self {
        let iso_date = Utc
            .timestamp_millis_opt(timestamp_millis)
            .single()
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
            .unwrap_or_default();
        Self {
            presented_key,
            timestamp_millis,
            iso_date,
        }
    }
}

/// Byte comparison whose running time depends only on the lengths.
pub fn keys_match(presented: &str, expected: &str) -> bool {
    let a = presented.as_bytes();
    let b = expected.as_bytes();
    let mut diff = a.len() ^ b.len();
    for i in 0..a.len().max(b.len()) {
        let x = a.get(i).copied().unwrap_or(0);
        let y = b.get(i).copied().unwrap_or(0);
        diff |= usize::from(x ^ y);
    }
    diff == 0
}

pub struct HeartbeatGateway<'a> {
    store: &'a dyn GuardianStore,
    clock: &'a dyn Clock,
}

impl<'a> HeartbeatGateway<'a> {
    pub fn new(store: &'a dyn GuardianStore, clock: &'a dyn Clock) -> Self {
        Self { store, clock }
    }

    /// Check `presented_key` against the configured heartbeat key.
    pub fn authorize(config: &GuardianConfig, presented_key: &str) -> Result<(), GuardianError> {
        if keys_match(presented_key, config.heartbeat_key()?) {
            Ok(())
        } else {
            Err(GuardianError::Unauthorized)
        }
    }

    /// Record liveness. On a key mismatch nothing is written.
    pub fn beat(&self, presented_key: &str) -> Result<HeartbeatRecord, GuardianError> {
        let config = self.store.require_config()?;
        if let Err(e) = Self::authorize(&config, presented_key) {
            tracing::warn!("heartbeat rejected: key mismatch");
            return Err(e);
        }

        let record = HeartbeatRecord::new(presented_key.to_string(), self.clock.now_millis());
        self.store.save_heartbeat(&record)?;
        self.store.clear_claim_marker()?;
        tracing::info!(at = %record.iso_date, "heartbeat recorded");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_comparison() {
        assert!(keys_match("guardian", "guardian"));
        assert!(!keys_match("guardian", "guardiaN"));
        assert!(!keys_match("guard", "guardian"));
        assert!(!keys_match("", "guardian"));
        assert!(keys_match("", ""));
    }

    #[test]
    fn iso_date_is_utc_millis() {
        let record = HeartbeatRecord::new("k".into(), 1_700_000_000_123);
        assert_eq!(record.iso_date, "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn debug_hides_key() {
        let record = HeartbeatRecord::new("super-secret".into(), 0);
        assert!(!format!("{record:?}").contains("super-secret"));
    }
}
