//! Per-issuer authentication diagnostics.
//!
//! Counters are lock-free atomics updated on every authentication attempt.
//! Reports are read-only snapshots for the diagnostics endpoint; they carry
//! no subjects, tokens or secrets.

use crate::auth::policy::IssuerType;
use crate::auth::registry::IssuerRegistry;
use crate::keys::{KeyCacheStatus, KeyMaterialResolver};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Why an issuer rejected a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Malformed,
    BadSignature,
    IssuerMismatch,
    AudienceMismatch,
    Expired,
    NotYetValid,
    KeyResolution,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 7] = [
        FailureCategory::Malformed,
        FailureCategory::BadSignature,
        FailureCategory::IssuerMismatch,
        FailureCategory::AudienceMismatch,
        FailureCategory::Expired,
        FailureCategory::NotYetValid,
        FailureCategory::KeyResolution,
    ];

    /// Stable label used in metrics and reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            FailureCategory::Malformed => "malformed",
            FailureCategory::BadSignature => "bad_signature",
            FailureCategory::IssuerMismatch => "issuer_mismatch",
            FailureCategory::AudienceMismatch => "audience_mismatch",
            FailureCategory::Expired => "expired",
            FailureCategory::NotYetValid => "not_yet_valid",
            FailureCategory::KeyResolution => "key_resolution",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sentinel for "never succeeded".
const NEVER: i64 = i64::MIN;

struct IssuerCounters {
    last_success_ms: AtomicI64,
    failures: [AtomicU64; FailureCategory::ALL.len()],
}

impl IssuerCounters {
    fn new() -> Self {
        Self {
            last_success_ms: AtomicI64::new(NEVER),
            failures: std::array::from_fn(|_| AtomicU64::new(0)),
        }
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            NEVER => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    fn failure_count(&self, category: FailureCategory) -> u64 {
        self.failures
            .get(category.index())
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }
}

/// Authentication counters for every registered issuer.
pub struct Diagnostics {
    issuers: HashMap<String, IssuerCounters>,
    malformed_tokens: AtomicU64,
}

impl Diagnostics {
    /// Create zeroed counters for every issuer in `registry`.
    #[must_use]
    pub fn new(registry: &IssuerRegistry) -> Self {
        Self {
            issuers: registry
                .names()
                .map(|name| (name.to_string(), IssuerCounters::new()))
                .collect(),
            malformed_tokens: AtomicU64::new(0),
        }
    }

    pub fn record_success(&self, issuer_name: &str, at: DateTime<Utc>) {
        if let Some(counters) = self.issuers.get(issuer_name) {
            counters
                .last_success_ms
                .fetch_max(at.timestamp_millis(), Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, issuer_name: &str, category: FailureCategory) {
        if let Some(counter) = self
            .issuers
            .get(issuer_name)
            .and_then(|c| c.failures.get(category.index()))
        {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count a token rejected before any issuer was tried.
    pub fn record_malformed(&self) {
        self.malformed_tokens.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn malformed_tokens(&self) -> u64 {
        self.malformed_tokens.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn last_success(&self, issuer_name: &str) -> Option<DateTime<Utc>> {
        self.issuers.get(issuer_name)?.last_success()
    }

    #[must_use]
    pub fn failure_count(&self, issuer_name: &str, category: FailureCategory) -> u64 {
        self.issuers
            .get(issuer_name)
            .map_or(0, |c| c.failure_count(category))
    }

    /// Build a report covering every issuer in registration order.
    pub async fn report(
        &self,
        registry: &IssuerRegistry,
        resolver: &KeyMaterialResolver,
    ) -> DiagnosticsReport {
        let mut issuers = Vec::with_capacity(registry.len());

        for policy in registry.policies() {
            let failures = FailureCategory::ALL
                .iter()
                .map(|&category| {
                    (
                        category.as_str(),
                        self.failure_count(policy.name(), category),
                    )
                })
                .collect();

            issuers.push(IssuerReport {
                name: policy.name().to_string(),
                issuer_type: policy.issuer_type(),
                issuer: policy.issuer().to_string(),
                last_success: self.last_success(policy.name()),
                failures,
                key_cache: resolver.cache_status(policy.name()).await,
            });
        }

        DiagnosticsReport {
            generated_at: Utc::now(),
            malformed_tokens: self.malformed_tokens(),
            issuers,
        }
    }
}

/// Diagnostics for one issuer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuerReport {
    pub name: String,
    #[serde(rename = "type")]
    pub issuer_type: IssuerType,
    pub issuer: String,
    pub last_success: Option<DateTime<Utc>>,
    pub failures: BTreeMap<&'static str, u64>,
    pub key_cache: Option<KeyCacheStatus>,
}

/// Diagnostics for all issuers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsReport {
    pub generated_at: DateTime<Utc>,
    /// Tokens rejected before any issuer was tried.
    pub malformed_tokens: u64,
    pub issuers: Vec<IssuerReport>,
}
