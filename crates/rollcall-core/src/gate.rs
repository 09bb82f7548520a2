//! Attendance gating — per-identity cooldown state machine.
//!
//! A successful match only becomes a recordable attendance event when the
//! identity is outside its cooldown window. The check and the timestamp
//! write happen inside one `&mut self` call, so a single owner of the gate
//! (the engine thread) cannot double-record an identity under concurrent
//! requests.

use crate::types::AttendanceEvent;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

/// Minimum interval between two recorded events for the same identity.
pub const DEFAULT_COOLDOWN_SECS: i64 = 60;

/// Outcome of presenting a successful match to the gate.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// Identity was idle: the event is recordable and the cooldown restarts.
    Record(AttendanceEvent),
    /// Identity is inside its cooldown window: the event is suppressed.
    Suppress {
        identity: String,
        remaining_seconds: i64,
    },
}

/// Per-identity cooldown state. Entries are created on first recording and
/// updated on each subsequent one, never removed; state lives for the
/// process lifetime only.
pub struct AttendanceGate {
    cooldown: Duration,
    last_recorded: HashMap<String, DateTime<Utc>>,
}

impl AttendanceGate {
    pub fn new() -> Self {
        Self::with_cooldown(Duration::seconds(DEFAULT_COOLDOWN_SECS))
    }

    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last_recorded: HashMap::new(),
        }
    }

    /// Decide whether a successful match for `identity` at `now` records or
    /// is suppressed.
    ///
    /// Remaining wait is `cooldown − elapsed` in whole seconds, with the
    /// elapsed time truncated: a retry at +59 s reports 1 second remaining,
    /// a retry at +60 s records.
    pub fn check(&mut self, identity: &str, confidence: f32, now: DateTime<Utc>) -> GateDecision {
        if let Some(last) = self.last_recorded.get(identity) {
            let elapsed = (now - *last).num_seconds();
            let cooldown = self.cooldown.num_seconds();
            if elapsed < cooldown {
                let remaining_seconds = cooldown - elapsed;
                tracing::debug!(identity, remaining_seconds, "attendance suppressed by cooldown");
                return GateDecision::Suppress {
                    identity: identity.to_string(),
                    remaining_seconds,
                };
            }
        }

        self.last_recorded.insert(identity.to_string(), now);
        tracing::info!(identity, confidence, "attendance recorded");
        GateDecision::Record(AttendanceEvent {
            identity: identity.to_string(),
            confidence,
            timestamp: now,
        })
    }
}

impl Default for AttendanceGate {
    fn default() -> Self {
        Self::new()
    }
}
