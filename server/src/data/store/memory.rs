use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{SpanStore, StoreError};
use crate::core::constants::MEMORY_STORE_MAX_BATCHES;
use crate::domain::traces::DomainSpan;

/// One recorded `ingest` call
#[derive(Debug, Clone)]
pub struct IngestedBatch {
    pub project_id: String,
    pub user_id: String,
    pub spans: Vec<DomainSpan>,
}

#[derive(Debug, Default)]
struct StoreState {
    batches: VecDeque<IngestedBatch>,
    span_count: usize,
}

/// Span store that keeps the most recent batches in memory
///
/// Counts cover every call; only the last `max_batches` batches are kept.
#[derive(Debug)]
pub struct MemorySpanStore {
    state: Mutex<StoreState>,
    max_batches: usize,
}

impl Default for MemorySpanStore {
    fn default() -> Self {
        Self::with_capacity(MEMORY_STORE_MAX_BATCHES)
    }
}

impl MemorySpanStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(max_batches: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            max_batches: max_batches.max(1),
        }
    }

    /// Retained batches, oldest first
    pub fn batches(&self) -> Vec<IngestedBatch> {
        self.state.lock().batches.iter().cloned().collect()
    }

    /// Total number of spans received, evicted batches included
    pub fn span_count(&self) -> usize {
        self.state.lock().span_count
    }
}

#[async_trait]
impl SpanStore for MemorySpanStore {
    async fn ingest(
        &self,
        project_id: &str,
        user_id: &str,
        spans: Vec<DomainSpan>,
    ) -> Result<(), StoreError> {
        tracing::trace!(project_id, user_id, count = spans.len(), "Storing spans");
        let mut state = self.state.lock();
        state.span_count += spans.len();
        if state.batches.len() == self.max_batches {
            state.batches.pop_front();
        }
        state.batches.push_back(IngestedBatch {
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            spans,
        });
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
