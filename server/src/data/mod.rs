//! Boundaries to external systems
//!
//! - `topics` - Consumer-group streams (in-memory or Redis Streams)
//! - `entitlements` - Per-organization usage meters
//! - `store` - Span persistence

pub mod entitlements;
pub mod store;
pub mod topics;
