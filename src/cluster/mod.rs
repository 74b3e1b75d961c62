//! Cluster View
//!
//! The parts of cluster membership this core consumes. Failure detection and
//! membership agreement happen elsewhere; this module only holds the current
//! member list and picks targets from it.
//!
//! - **`types`**: Member identity and addressing.
//! - **`directory`**: The `ClusterDirectory` seam and its in-memory `MemberList`.
//! - **`balancer`**: `LoadBalancer` strategies used to pick a target for client requests.

pub mod balancer;
pub mod directory;
pub mod types;

#[cfg(test)]
mod tests;
