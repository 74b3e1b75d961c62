//! Replicated Map
//!
//! A map variant where every member holds the complete data set. Updates are
//! pushed to peers as `RecordMigrationInfo` payloads and applied through a
//! merge policy; members that fell behind resynchronize from a full snapshot.
//!
//! ## Core Concepts
//! - **Merge policies**: Pure functions choosing between an incoming and an existing entry.
//!   `LatestUpdateMapMergePolicy` assumes member clocks are closely synchronized.
//! - **Version counter**: Bumped by put, remove and clear. TTL expiry and eviction are
//!   local effects and leave it alone.
//! - **Resynchronization**: A member whose version is behind a peer's replaces its
//!   contents wholesale; no per-key history is kept.

pub mod handlers;
pub mod merge;
pub mod protocol;
pub mod record;
pub mod replicator;
pub mod service;
pub mod store;

#[cfg(test)]
mod tests;
