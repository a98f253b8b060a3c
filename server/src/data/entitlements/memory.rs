//! In-memory quota meter
//!
//! Counters live in a `DashMap` keyed by `(organization_id, key)`; the entry
//! lock makes check and adjust a single atomic step. Limits come from the
//! configured per-counter defaults, optionally overridden per organization.
//! Counters never reset: this backend is meant for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Meter, QuotaDecision, QuotaError, QuotaMeter};

type CounterKey = (String, String);

#[derive(Debug, Default)]
pub struct MemoryQuotaMeter {
    usage: DashMap<CounterKey, i64>,
    default_limits: HashMap<String, i64>,
    org_limits: DashMap<CounterKey, i64>,
}

impl MemoryQuotaMeter {
    /// Meter with no limits (every adjustment is allowed)
    pub fn new() -> Self {
        Self::default()
    }

    /// Meter with per-counter limits shared by all organizations
    pub fn with_limits(limits: HashMap<String, i64>) -> Self {
        Self {
            default_limits: limits,
            ..Default::default()
        }
    }

    /// Override the limit of one counter for one organization
    pub fn set_limit(&self, organization_id: &str, key: &str, limit: i64) {
        self.org_limits
            .insert((organization_id.to_string(), key.to_string()), limit);
    }

    /// Current value of a counter
    pub fn usage(&self, organization_id: &str, key: &str) -> i64 {
        self.usage
            .get(&(organization_id.to_string(), key.to_string()))
            .map(|v| *v)
            .unwrap_or(0)
    }

    fn limit_for(&self, counter: &CounterKey) -> Option<i64> {
        self.org_limits
            .get(counter)
            .map(|v| *v)
            .or_else(|| self.default_limits.get(&counter.1).copied())
    }
}

#[async_trait]
impl QuotaMeter for MemoryQuotaMeter {
    async fn check_and_adjust(
        &self,
        organization_id: &str,
        key: &str,
        delta: i64,
        _use_cache: bool,
    ) -> Result<QuotaDecision, QuotaError> {
        let counter = (organization_id.to_string(), key.to_string());
        let limit = self.limit_for(&counter);

        let mut value = self.usage.entry(counter).or_insert(0);
        let before = *value;
        let after = before.saturating_add(delta);

        let snapshot = |value: i64| Meter {
            organization_id: organization_id.to_string(),
            key: key.to_string(),
            value,
            limit,
        };

        if let Some(limit) = limit
            && delta > 0
            && after > limit
        {
            tracing::trace!(
                organization_id,
                key,
                value = before,
                delta,
                limit,
                "Quota exceeded"
            );
            return Ok(QuotaDecision {
                allowed: false,
                meter: Some(snapshot(before)),
                rollback: None,
            });
        }

        *value = after;
        Ok(QuotaDecision {
            allowed: true,
            meter: Some(snapshot(after)),
            rollback: Some(snapshot(before)),
        })
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::COUNTER_TRACES;

    #[tokio::test]
    async fn test_unlimited_meter_always_allows() {
        let meter = MemoryQuotaMeter::new();
        let decision = meter
            .check_and_adjust("org", COUNTER_TRACES, 1_000, false)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(meter.usage("org", COUNTER_TRACES), 1_000);
    }

    #[tokio::test]
    async fn test_adjusts_until_limit() {
        let meter =
            MemoryQuotaMeter::with_limits(HashMap::from([(COUNTER_TRACES.to_string(), 3)]));

        let first = meter
            .check_and_adjust("org", COUNTER_TRACES, 2, false)
            .await
            .unwrap();
        assert!(first.allowed);
        assert_eq!(first.meter.as_ref().unwrap().value, 2);
        assert_eq!(first.rollback.as_ref().unwrap().value, 0);

        let second = meter
            .check_and_adjust("org", COUNTER_TRACES, 2, false)
            .await
            .unwrap();
        assert!(!second.allowed);
        assert_eq!(second.meter.unwrap().value, 2);
        assert!(second.rollback.is_none());
        assert_eq!(meter.usage("org", COUNTER_TRACES), 2);
    }

    #[tokio::test]
    async fn test_org_limit_overrides_default() {
        let meter =
            MemoryQuotaMeter::with_limits(HashMap::from([(COUNTER_TRACES.to_string(), 100)]));
        meter.set_limit("small", COUNTER_TRACES, 1);

        let small = meter
            .check_and_adjust("small", COUNTER_TRACES, 2, false)
            .await
            .unwrap();
        let big = meter
            .check_and_adjust("big", COUNTER_TRACES, 2, false)
            .await
            .unwrap();

        assert!(!small.allowed);
        assert!(big.allowed);
    }

    #[tokio::test]
    async fn test_counters_are_per_organization() {
        let meter = MemoryQuotaMeter::new();
        meter
            .check_and_adjust("a", COUNTER_TRACES, 1, false)
            .await
            .unwrap();
        assert_eq!(meter.usage("a", COUNTER_TRACES), 1);
        assert_eq!(meter.usage("b", COUNTER_TRACES), 0);
    }
}
