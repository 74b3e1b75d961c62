//! Near-Cache Invalidation
//!
//! Keeps members' near caches approximately fresh. Every authoritative
//! mutation on a map (put, remove, evict, expiry, clear) is turned into an
//! `InvalidationMessage` and pushed to the members registered as cache
//! consumers for that map.
//!
//! ## Core Concepts
//! - **Fire-and-forget**: Messages are UDP datagrams. Nothing is acknowledged, and a
//!   send failure never reaches the mutation that triggered it.
//! - **Consumers**: Registered per map. A map without consumers produces no traffic.
//! - **Configuration skew**: A member receiving invalidations for a map whose near cache
//!   it has disabled logs a warning and ignores them.

pub mod broadcaster;
pub mod message;
pub mod near_cache;
pub mod transport;

#[cfg(test)]
mod tests;
