//! Span tree aggregation
//!
//! Rebuilds the parent/child hierarchy of one trace from its `DomainSpan`s,
//! rolls incremental metrics up into cumulative ones and groups children by
//! span name for rendering.
//!
//! Spans are inserted in `start_time` order (stable). A span whose parent has
//! not been inserted yet is an orphan: it is logged, kept out of the tree and
//! listed by [`SpanTree::orphans`].

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use rustc_hash::FxHashMap;
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::ids::uuid_to_span_hex;
use super::types::DomainSpan;

// ============================================================================
// ARENA
// ============================================================================

#[derive(Debug, Clone)]
struct SpanNode {
    span: DomainSpan,
    children: Vec<usize>,
}

/// Span forest of one trace
#[derive(Debug, Clone, Default)]
pub struct SpanTree {
    nodes: Vec<SpanNode>,
    index: FxHashMap<Uuid, usize>,
    roots: Vec<usize>,
    orphans: Vec<DomainSpan>,
}

impl SpanTree {
    pub fn build(mut spans: Vec<DomainSpan>) -> Self {
        spans.sort_by_key(|span| span.start_time);

        let mut tree = Self::default();
        for span in spans {
            tree.insert(span);
        }
        tree
    }

    fn insert(&mut self, span: DomainSpan) {
        if self.index.contains_key(&span.span_id) {
            tracing::warn!(
                trace_id = %span.trace_id,
                span_id = %uuid_to_span_hex(&span.span_id),
                "Duplicate span id, keeping first"
            );
            return;
        }

        let parent = match span.parent_id {
            None => None,
            Some(parent_id) => match self.index.get(&parent_id) {
                Some(&parent) => Some(parent),
                None => {
                    tracing::error!(
                        trace_id = %span.trace_id,
                        span_id = %uuid_to_span_hex(&span.span_id),
                        parent_id = %uuid_to_span_hex(&parent_id),
                        "Orphan span, parent not inserted"
                    );
                    self.orphans.push(span);
                    return;
                }
            },
        };

        let idx = self.nodes.len();
        self.index.insert(span.span_id, idx);
        self.nodes.push(SpanNode {
            span,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => self.nodes[parent].children.push(idx),
            None => self.roots.push(idx),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, span_id: &Uuid) -> Option<&DomainSpan> {
        self.index.get(span_id).map(|&idx| &self.nodes[idx].span)
    }

    pub fn roots(&self) -> impl Iterator<Item = &DomainSpan> {
        self.roots.iter().map(|&idx| &self.nodes[idx].span)
    }

    /// Children in insertion order
    pub fn children(&self, span_id: &Uuid) -> Vec<&DomainSpan> {
        self.index
            .get(span_id)
            .map(|&idx| {
                self.nodes[idx]
                    .children
                    .iter()
                    .map(|&child| &self.nodes[child].span)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn orphans(&self) -> &[DomainSpan] {
        &self.orphans
    }

    /// Children before parents, roots in insertion order
    fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, bool)> = self.roots.iter().rev().map(|&r| (r, false)).collect();
        while let Some((idx, expanded)) = stack.pop() {
            if expanded {
                order.push(idx);
                continue;
            }
            stack.push((idx, true));
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push((child, false));
            }
        }
        order
    }

    // ========================================================================
    // ROLLUP
    // ========================================================================

    /// Roll up cost and token metrics
    pub fn rollup(&mut self) {
        self.rollup_metric(&CostMetric);
        self.rollup_metric(&TokenMetric);
    }

    /// `cumulative(node) = incremental(node) + Σ cumulative(child)`
    pub fn rollup_metric<M: RollupMetric>(&mut self, metric: &M) {
        let mut cumulative: Vec<M::Value> = vec![M::Value::default(); self.nodes.len()];
        for idx in self.post_order() {
            let node = &self.nodes[idx];
            let total = node
                .children
                .iter()
                .fold(metric.incremental(&node.span), |acc, &child| {
                    metric.accumulate(acc, cumulative[child])
                });
            cumulative[idx] = total;
            metric.set_cumulative(&mut self.nodes[idx].span, total);
        }
    }

    // ========================================================================
    // GROUPING
    // ========================================================================

    /// Roots and, recursively, children keyed by span name
    pub fn grouped(&self) -> BTreeMap<String, GroupedNodes> {
        let mut built: Vec<Option<GroupedSpan>> = (0..self.nodes.len()).map(|_| None).collect();
        for idx in self.post_order() {
            let children: Vec<GroupedSpan> = self.nodes[idx]
                .children
                .iter()
                .filter_map(|&child| built[child].take())
                .collect();
            built[idx] = Some(GroupedSpan {
                span: self.nodes[idx].span.clone(),
                nodes: group_by_name(children),
            });
        }
        let roots: Vec<GroupedSpan> = self
            .roots
            .iter()
            .filter_map(|&root| built[root].take())
            .collect();
        group_by_name(roots)
    }
}

/// Split a mixed span list by trace id, one tree per trace in first-seen order
pub fn build_trees(spans: Vec<DomainSpan>) -> Vec<(Uuid, SpanTree)> {
    let mut positions: FxHashMap<Uuid, usize> = FxHashMap::default();
    let mut partitions: Vec<(Uuid, Vec<DomainSpan>)> = Vec::new();
    for span in spans {
        let pos = *positions.entry(span.trace_id).or_insert_with(|| {
            partitions.push((span.trace_id, Vec::new()));
            partitions.len() - 1
        });
        partitions[pos].1.push(span);
    }
    partitions
        .into_iter()
        .map(|(trace_id, spans)| (trace_id, SpanTree::build(spans)))
        .collect()
}

// ============================================================================
// METRICS
// ============================================================================

/// A metric that can be rolled up the tree
pub trait RollupMetric {
    type Value: Copy + Default;

    fn incremental(&self, span: &DomainSpan) -> Self::Value;

    fn accumulate(&self, acc: Self::Value, value: Self::Value) -> Self::Value;

    /// Write the cumulative value; zero components stay absent
    fn set_cumulative(&self, span: &mut DomainSpan, value: Self::Value);
}

pub const COST_INCREMENTAL: &str = "costs.incremental.total";
pub const COST_CUMULATIVE: &str = "costs.cumulative.total";

const TOKEN_COMPONENTS: [&str; 3] = ["prompt", "completion", "total"];

fn metric_f64(span: &DomainSpan, key: &str) -> f64 {
    span.metrics.get(key).and_then(JsonValue::as_f64).unwrap_or(0.0)
}

fn metric_i64(span: &DomainSpan, key: &str) -> i64 {
    match span.metrics.get(key) {
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        None => 0,
    }
}

/// Total cost
#[derive(Debug, Default)]
pub struct CostMetric;

impl RollupMetric for CostMetric {
    type Value = f64;

    fn incremental(&self, span: &DomainSpan) -> f64 {
        metric_f64(span, COST_INCREMENTAL)
    }

    fn accumulate(&self, acc: f64, value: f64) -> f64 {
        acc + value
    }

    /// Non-finite sums are dropped
    fn set_cumulative(&self, span: &mut DomainSpan, value: f64) {
        if value.is_finite() && value != 0.0 {
            span.metrics
                .insert(COST_CUMULATIVE.to_string(), JsonValue::from(value));
        } else {
            span.metrics.remove(COST_CUMULATIVE);
        }
    }
}

/// Prompt, completion and total token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenCounts {
    pub prompt: i64,
    pub completion: i64,
    pub total: i64,
}

impl TokenCounts {
    fn components(&self) -> [i64; 3] {
        [self.prompt, self.completion, self.total]
    }
}

#[derive(Debug, Default)]
pub struct TokenMetric;

impl RollupMetric for TokenMetric {
    type Value = TokenCounts;

    fn incremental(&self, span: &DomainSpan) -> TokenCounts {
        TokenCounts {
            prompt: metric_i64(span, "tokens.incremental.prompt"),
            completion: metric_i64(span, "tokens.incremental.completion"),
            total: metric_i64(span, "tokens.incremental.total"),
        }
    }

    fn accumulate(&self, acc: TokenCounts, value: TokenCounts) -> TokenCounts {
        TokenCounts {
            prompt: acc.prompt.saturating_add(value.prompt),
            completion: acc.completion.saturating_add(value.completion),
            total: acc.total.saturating_add(value.total),
        }
    }

    fn set_cumulative(&self, span: &mut DomainSpan, value: TokenCounts) {
        for (name, count) in TOKEN_COMPONENTS.iter().zip(value.components()) {
            let key = format!("tokens.cumulative.{name}");
            if count != 0 {
                span.metrics.insert(key, JsonValue::from(count));
            } else {
                span.metrics.remove(&key);
            }
        }
    }
}

// ============================================================================
// GROUPED OUTPUT
// ============================================================================

/// Span with its children keyed by name
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupedSpan {
    #[serde(flatten)]
    pub span: DomainSpan,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub nodes: BTreeMap<String, GroupedNodes>,
}

/// A name used once maps to a single span, a repeated name to a list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GroupedNodes {
    Single(Box<GroupedSpan>),
    Many(Vec<GroupedSpan>),
}

impl GroupedNodes {
    pub fn len(&self) -> usize {
        match self {
            GroupedNodes::Single(_) => 1,
            GroupedNodes::Many(list) => list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn group_by_name(spans: Vec<GroupedSpan>) -> BTreeMap<String, GroupedNodes> {
    let mut grouped = BTreeMap::new();
    for item in spans {
        match grouped.entry(item.span.span_name.clone()) {
            Entry::Vacant(e) => {
                e.insert(GroupedNodes::Single(Box::new(item)));
            }
            Entry::Occupied(e) => {
                let slot = e.into_mut();
                *slot = match std::mem::replace(slot, GroupedNodes::Many(Vec::new())) {
                    GroupedNodes::Single(first) => GroupedNodes::Many(vec![*first, item]),
                    GroupedNodes::Many(mut list) => {
                        list.push(item);
                        GroupedNodes::Many(list)
                    }
                };
            }
        }
    }
    grouped
}
