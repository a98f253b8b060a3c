//! Per-organization quota enforcement
//!
//! Each organization bucket is charged for the traces it starts (spans
//! without a parent). A denied or failed check drops the whole bucket for
//! this cycle; its messages are still acknowledged by the worker.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::tenant::OrgBucket;
use crate::core::constants::COUNTER_TRACES;
use crate::data::entitlements::QuotaMeter;

/// Buckets that passed the gate plus drop counts
#[derive(Debug, Default)]
pub struct GateOutcome {
    pub admitted: BTreeMap<String, OrgBucket>,
    pub dropped_orgs: usize,
    pub dropped_spans: usize,
}

pub struct EntitlementGate {
    meter: Option<Arc<dyn QuotaMeter>>,
}

impl EntitlementGate {
    /// `None` admits every organization without metering
    pub fn new(meter: Option<Arc<dyn QuotaMeter>>) -> Self {
        Self { meter }
    }

    pub fn is_enabled(&self) -> bool {
        self.meter.is_some()
    }

    pub async fn admit(&self, orgs: BTreeMap<String, OrgBucket>) -> GateOutcome {
        let Some(meter) = &self.meter else {
            return GateOutcome {
                admitted: orgs,
                ..Default::default()
            };
        };

        let mut outcome = GateOutcome::default();
        for (organization_id, bucket) in orgs {
            let delta = bucket.root_count() as i64;
            if delta == 0 {
                outcome.admitted.insert(organization_id, bucket);
                continue;
            }

            let allowed = match meter
                .check_and_adjust(&organization_id, COUNTER_TRACES, delta, false)
                .await
            {
                Ok(decision) if decision.allowed => true,
                Ok(decision) => {
                    tracing::warn!(
                        organization_id = %organization_id,
                        delta,
                        value = decision.meter.as_ref().map(|m| m.value),
                        limit = decision.meter.as_ref().and_then(|m| m.limit),
                        "Trace quota exceeded, dropping organization spans"
                    );
                    false
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        organization_id = %organization_id,
                        "Quota check failed, dropping organization spans"
                    );
                    false
                }
            };

            if allowed {
                outcome.admitted.insert(organization_id, bucket);
            } else {
                outcome.dropped_orgs += 1;
                outcome.dropped_spans += bucket.span_count();
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::data::entitlements::{MemoryQuotaMeter, QuotaDecision, QuotaError};
    use crate::domain::traces::DomainSpan;
    use crate::domain::traces::test_support::domain_span;

    struct FailingMeter;

    #[async_trait]
    impl QuotaMeter for FailingMeter {
        async fn check_and_adjust(
            &self,
            _organization_id: &str,
            _key: &str,
            _delta: i64,
            _use_cache: bool,
        ) -> Result<QuotaDecision, QuotaError> {
            Err(QuotaError::Backend("unavailable".into()))
        }

        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    fn bucket(spans: Vec<DomainSpan>) -> OrgBucket {
        let mut bucket = OrgBucket::default();
        bucket
            .projects
            .insert(("p1".to_string(), "u1".to_string()), spans);
        bucket
    }

    fn orgs() -> BTreeMap<String, OrgBucket> {
        BTreeMap::from([
            (
                "a".to_string(),
                bucket(vec![
                    domain_span(1, None, 1),
                    domain_span(2, None, 2),
                    domain_span(3, Some(1), 3),
                ]),
            ),
            ("b".to_string(), bucket(vec![domain_span(4, Some(9), 4)])),
        ])
    }

    #[tokio::test]
    async fn test_disabled_gate_admits_everything() {
        let gate = EntitlementGate::new(None);
        assert!(!gate.is_enabled());
        let outcome = gate.admit(orgs()).await;
        assert_eq!(outcome.admitted.len(), 2);
        assert_eq!(outcome.dropped_orgs, 0);
    }

    #[tokio::test]
    async fn test_charges_root_spans_only() {
        let meter = Arc::new(MemoryQuotaMeter::new());
        let gate = EntitlementGate::new(Some(meter.clone()));
        let outcome = gate.admit(orgs()).await;

        assert_eq!(outcome.admitted.len(), 2);
        assert_eq!(meter.usage("a", COUNTER_TRACES), 2);
        // No roots, no check
        assert_eq!(meter.usage("b", COUNTER_TRACES), 0);
    }

    #[tokio::test]
    async fn test_denied_org_is_dropped_whole() {
        let meter = Arc::new(MemoryQuotaMeter::new());
        meter.set_limit("a", COUNTER_TRACES, 1);
        let gate = EntitlementGate::new(Some(meter.clone()));
        let outcome = gate.admit(orgs()).await;

        assert!(!outcome.admitted.contains_key("a"));
        assert!(outcome.admitted.contains_key("b"));
        assert_eq!(outcome.dropped_orgs, 1);
        assert_eq!(outcome.dropped_spans, 3);
        assert_eq!(meter.usage("a", COUNTER_TRACES), 0);
    }

    #[tokio::test]
    async fn test_meter_failure_drops_org() {
        let gate = EntitlementGate::new(Some(Arc::new(FailingMeter)));
        let outcome = gate.admit(orgs()).await;

        assert_eq!(outcome.admitted.keys().collect::<Vec<_>>(), vec!["b"]);
        assert_eq!(outcome.dropped_spans, 3);
    }
}
