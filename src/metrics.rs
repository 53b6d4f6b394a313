//! Telemetry counters for the trust core.
//!
//! Plain atomics, sampled into a serializable snapshot by the `/metrics`
//! handler. External monitoring consumes the values; nothing in here drives
//! behavior.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct Metrics {
    probe_successes: AtomicU64,
    probe_failures: AtomicU64,
    /// 1 while the monitor is in fallback mode.
    fallback_active: AtomicU64,
    auth_attempts_oauth2: AtomicU64,
    auth_attempts_mtls: AtomicU64,
    token_rotations: AtomicU64,
    revoked_token_rejections: AtomicU64,
    crl_fetch_failures: AtomicU64,
    /// Allowlisted subjects whose certificate expires within the warning
    /// window, as observed during validation.
    cert_expiry_warnings: Mutex<BTreeSet<String>>,
    auth_failures: Mutex<BTreeMap<&'static str, u64>>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub probe_successes: u64,
    pub probe_failures: u64,
    pub fallback_active: bool,
    pub auth_attempts_oauth2: u64,
    pub auth_attempts_mtls: u64,
    pub token_rotations: u64,
    pub revoked_token_rejections: u64,
    pub crl_fetch_failures: u64,
    pub cert_expiry_warnings: BTreeSet<String>,
    pub auth_failures_by_reason: BTreeMap<&'static str, u64>,
}

impl Metrics {
    pub fn record_probe(&self, success: bool) {
        if success {
            self.probe_successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.probe_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn set_fallback_active(&self, active: bool) {
        self.fallback_active
            .store(u64::from(active), Ordering::Relaxed);
    }

    pub fn inc_auth_attempt_oauth2(&self) {
        self.auth_attempts_oauth2.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_attempt_mtls(&self) {
        self.auth_attempts_mtls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_auth_failure(&self, reason: &'static str) {
        if let Ok(mut failures) = self.auth_failures.lock() {
            *failures.entry(reason).or_insert(0) += 1;
        }
    }

    pub fn inc_token_rotations(&self) {
        self.token_rotations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_revoked_token_rejections(&self) {
        self.revoked_token_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_crl_fetch_failures(&self) {
        self.crl_fetch_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record or clear the expiry warning for one subject, so a renewed
    /// certificate drops its subject from the set again.
    pub fn set_cert_expiry_warning(&self, subject: &str, near_expiry: bool) {
        if let Ok(mut warnings) = self.cert_expiry_warnings.lock() {
            if near_expiry {
                warnings.insert(subject.to_string());
            } else {
                warnings.remove(subject);
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            probe_successes: self.probe_successes.load(Ordering::Relaxed),
            probe_failures: self.probe_failures.load(Ordering::Relaxed),
            fallback_active: self.fallback_active.load(Ordering::Relaxed) == 1,
            auth_attempts_oauth2: self.auth_attempts_oauth2.load(Ordering::Relaxed),
            auth_attempts_mtls: self.auth_attempts_mtls.load(Ordering::Relaxed),
            token_rotations: self.token_rotations.load(Ordering::Relaxed),
            revoked_token_rejections: self.revoked_token_rejections.load(Ordering::Relaxed),
            crl_fetch_failures: self.crl_fetch_failures.load(Ordering::Relaxed),
            cert_expiry_warnings: self
                .cert_expiry_warnings
                .lock()
                .map(|warnings| warnings.clone())
                .unwrap_or_default(),
            auth_failures_by_reason: self
                .auth_failures
                .lock()
                .map(|failures| failures.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = Metrics::default();
        metrics.record_probe(true);
        metrics.record_probe(false);
        metrics.record_probe(false);
        metrics.inc_auth_attempt_mtls();
        metrics.inc_token_rotations();
        metrics.inc_crl_fetch_failures();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.probe_successes, 1);
        assert_eq!(snapshot.probe_failures, 2);
        assert_eq!(snapshot.auth_attempts_mtls, 1);
        assert_eq!(snapshot.token_rotations, 1);
        assert_eq!(snapshot.crl_fetch_failures, 1);
    }

    #[test]
    fn fallback_gauge_toggles() {
        let metrics = Metrics::default();
        assert!(!metrics.snapshot().fallback_active);
        metrics.set_fallback_active(true);
        assert!(metrics.snapshot().fallback_active);
        metrics.set_fallback_active(false);
        assert!(!metrics.snapshot().fallback_active);
    }

    #[test]
    fn expiry_warnings_tracked_per_subject() {
        let metrics = Metrics::default();
        metrics.set_cert_expiry_warning("ops-admin", true);
        metrics.set_cert_expiry_warning("oncall-admin", true);
        assert_eq!(metrics.snapshot().cert_expiry_warnings.len(), 2);

        // A renewed certificate clears its subject without touching others.
        metrics.set_cert_expiry_warning("ops-admin", false);
        let snapshot = metrics.snapshot();
        assert!(!snapshot.cert_expiry_warnings.contains("ops-admin"));
        assert!(snapshot.cert_expiry_warnings.contains("oncall-admin"));
    }

    #[test]
    fn failures_grouped_by_reason() {
        let metrics = Metrics::default();
        metrics.inc_auth_failure("cert_revoked");
        metrics.inc_auth_failure("cert_revoked");
        metrics.inc_auth_failure("token_expired");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.auth_failures_by_reason.get("cert_revoked"), Some(&2));
        assert_eq!(snapshot.auth_failures_by_reason.get("token_expired"), Some(&1));
    }
}
