//! IdP health monitor with hysteresis.
//!
//! A single background probe loop drives a NORMAL ⇄ FALLBACK state machine.
//! Entry and exit are deliberately asymmetric: three consecutive failures
//! enter fallback, while leaving requires five consecutive successes followed
//! by a five-minute dwell with no failures. Without the dwell, a flaky network
//! path would toggle the authentication policy every probe interval.
//!
//! Request threads read an atomically swapped snapshot; the probe loop is the
//! only writer. The manual override is outside the automatic machine and is
//! audited at the call site.

use arc_swap::ArcSwap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::idp::IdpClient;
use crate::metrics::Metrics;

pub const FAILURE_THRESHOLD: u32 = 3;
pub const SUCCESS_THRESHOLD: u32 = 5;
pub const STABILITY_PERIOD_SECONDS: i64 = 300;
pub const PROBE_INTERVAL_NORMAL: Duration = Duration::from_secs(10);
/// Slower cadence during a sustained outage to reduce load on the IdP.
pub const PROBE_INTERVAL_FALLBACK: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Normal,
    Fallback,
}

/// Committed state transitions, for audit logging and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    EnteredFallback,
    ResumedNormal,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub state: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub entered_fallback_at: Option<i64>,
    pub stability_deadline: Option<i64>,
}

impl HealthSnapshot {
    fn initial() -> Self {
        Self {
            state: HealthState::Normal,
            consecutive_failures: 0,
            consecutive_successes: 0,
            entered_fallback_at: None,
            stability_deadline: None,
        }
    }
}

pub struct HealthMonitor {
    snapshot: ArcSwap<HealthSnapshot>,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HealthSnapshot::initial()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<HealthSnapshot> {
        self.snapshot.load_full()
    }

    #[must_use]
    pub fn is_fallback(&self) -> bool {
        self.snapshot.load().state == HealthState::Fallback
    }

    #[must_use]
    pub fn probe_interval(&self) -> Duration {
        match self.snapshot.load().state {
            HealthState::Normal => PROBE_INTERVAL_NORMAL,
            HealthState::Fallback => PROBE_INTERVAL_FALLBACK,
        }
    }

    /// Fold one probe outcome into the state machine. Called only by the
    /// probe loop (and tests); the snapshot swap is the single write point.
    pub fn record_probe(&self, success: bool, now_unix_seconds: i64) -> Option<Transition> {
        let current = self.snapshot.load_full();
        let (next, transition) = apply_probe(&current, success, now_unix_seconds);
        self.snapshot.store(Arc::new(next));
        transition
    }

    /// Manual override. Not part of the automatic machine; callers must
    /// audit the invocation.
    pub fn force_state(&self, state: HealthState, now_unix_seconds: i64) {
        let next = match state {
            HealthState::Normal => HealthSnapshot::initial(),
            HealthState::Fallback => HealthSnapshot {
                state: HealthState::Fallback,
                consecutive_failures: 0,
                consecutive_successes: 0,
                entered_fallback_at: Some(now_unix_seconds),
                stability_deadline: None,
            },
        };
        self.snapshot.store(Arc::new(next));
    }
}

fn apply_probe(
    current: &HealthSnapshot,
    success: bool,
    now_unix_seconds: i64,
) -> (HealthSnapshot, Option<Transition>) {
    let mut next = current.clone();
    match (current.state, success) {
        (HealthState::Normal, true) => {
            next.consecutive_failures = 0;
            (next, None)
        }
        (HealthState::Normal, false) => {
            next.consecutive_failures += 1;
            next.consecutive_successes = 0;
            if next.consecutive_failures >= FAILURE_THRESHOLD {
                next.state = HealthState::Fallback;
                next.entered_fallback_at = Some(now_unix_seconds);
                next.consecutive_successes = 0;
                next.stability_deadline = None;
                return (next, Some(Transition::EnteredFallback));
            }
            (next, None)
        }
        (HealthState::Fallback, false) => {
            // Any failure resets the exit process entirely.
            next.consecutive_failures += 1;
            next.consecutive_successes = 0;
            next.stability_deadline = None;
            (next, None)
        }
        (HealthState::Fallback, true) => {
            next.consecutive_failures = 0;
            next.consecutive_successes += 1;

            if let Some(deadline) = next.stability_deadline {
                if now_unix_seconds >= deadline {
                    return (HealthSnapshot::initial(), Some(Transition::ResumedNormal));
                }
                return (next, None);
            }

            if next.consecutive_successes >= SUCCESS_THRESHOLD {
                // Threshold met; start the dwell. The transition commits at
                // the first successful probe at or after the deadline.
                next.stability_deadline = Some(now_unix_seconds + STABILITY_PERIOD_SECONDS);
            }
            (next, None)
        }
    }
}

/// Spawn the single probe loop. Probe timeouts count as failures.
pub fn spawn_probe_loop(
    monitor: Arc<HealthMonitor>,
    idp: Arc<IdpClient>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let success = idp.probe().await;
            metrics.record_probe(success);

            let transition = monitor.record_probe(success, chrono::Utc::now().timestamp());
            match transition {
                Some(Transition::EnteredFallback) => {
                    metrics.set_fallback_active(true);
                    warn!("IdP unreachable; entering mTLS fallback mode");
                }
                Some(Transition::ResumedNormal) => {
                    metrics.set_fallback_active(false);
                    info!("IdP recovered and stable; resuming normal authentication");
                }
                None => {}
            }

            tokio::time::sleep(monitor.probe_interval()).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback_monitor(now: i64) -> HealthMonitor {
        let monitor = HealthMonitor::new();
        for offset in [0, 10, 20] {
            monitor.record_probe(false, now + offset);
        }
        assert!(monitor.is_fallback());
        monitor
    }

    #[test]
    fn enters_fallback_on_exactly_third_consecutive_failure() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.record_probe(false, 0), None);
        assert_eq!(monitor.record_probe(false, 10), None);
        assert!(!monitor.is_fallback());
        assert_eq!(
            monitor.record_probe(false, 20),
            Some(Transition::EnteredFallback)
        );
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, HealthState::Fallback);
        assert_eq!(snapshot.entered_fallback_at, Some(20));
    }

    #[test]
    fn intervening_success_resets_failure_count() {
        let monitor = HealthMonitor::new();
        monitor.record_probe(false, 0);
        monitor.record_probe(false, 10);
        monitor.record_probe(true, 20);
        monitor.record_probe(false, 30);
        monitor.record_probe(false, 40);
        assert!(!monitor.is_fallback());
        assert_eq!(
            monitor.record_probe(false, 50),
            Some(Transition::EnteredFallback)
        );
    }

    #[test]
    fn exit_requires_success_threshold_then_dwell() {
        let monitor = fallback_monitor(0);

        // Five successes arm the dwell but do not transition.
        for (index, offset) in [60, 120, 180, 240, 300].iter().enumerate() {
            assert_eq!(monitor.record_probe(true, *offset), None, "probe {index}");
        }
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, HealthState::Fallback);
        assert_eq!(snapshot.stability_deadline, Some(300 + 300));

        // Success before the deadline keeps waiting.
        assert_eq!(monitor.record_probe(true, 360), None);
        assert!(monitor.is_fallback());

        // First success at/after the deadline commits the transition.
        assert_eq!(
            monitor.record_probe(true, 600),
            Some(Transition::ResumedNormal)
        );
        assert!(!monitor.is_fallback());
        assert_eq!(monitor.snapshot().entered_fallback_at, None);
    }

    #[test]
    fn failure_during_dwell_resets_exit_process() {
        let monitor = fallback_monitor(0);
        for offset in [60, 120, 180, 240, 300] {
            monitor.record_probe(true, offset);
        }
        assert!(monitor.snapshot().stability_deadline.is_some());

        // Single failure at t=305: dwell and success count reset to zero.
        monitor.record_probe(false, 305);
        let snapshot = monitor.snapshot();
        assert_eq!(snapshot.state, HealthState::Fallback);
        assert_eq!(snapshot.consecutive_successes, 0);
        assert_eq!(snapshot.stability_deadline, None);

        // A lone recovery blip after the reset must not transition either,
        // even past the original deadline.
        assert_eq!(monitor.record_probe(true, 700), None);
        assert!(monitor.is_fallback());
    }

    #[test]
    fn failure_during_success_run_resets_count() {
        let monitor = fallback_monitor(0);
        for offset in [60, 120, 180, 240] {
            monitor.record_probe(true, offset);
        }
        monitor.record_probe(false, 300);
        assert_eq!(monitor.snapshot().consecutive_successes, 0);

        // Needs five fresh successes again before the dwell arms.
        for offset in [360, 420, 480, 540] {
            monitor.record_probe(true, offset);
        }
        assert_eq!(monitor.snapshot().stability_deadline, None);
        monitor.record_probe(true, 600);
        assert_eq!(monitor.snapshot().stability_deadline, Some(600 + 300));
    }

    #[test]
    fn probe_interval_follows_state() {
        let monitor = HealthMonitor::new();
        assert_eq!(monitor.probe_interval(), PROBE_INTERVAL_NORMAL);
        for offset in [0, 10, 20] {
            monitor.record_probe(false, offset);
        }
        assert_eq!(monitor.probe_interval(), PROBE_INTERVAL_FALLBACK);
    }

    #[test]
    fn manual_override_forces_state() {
        let monitor = HealthMonitor::new();
        monitor.force_state(HealthState::Fallback, 99);
        assert!(monitor.is_fallback());
        assert_eq!(monitor.snapshot().entered_fallback_at, Some(99));
        monitor.force_state(HealthState::Normal, 120);
        assert!(!monitor.is_fallback());
    }
}
