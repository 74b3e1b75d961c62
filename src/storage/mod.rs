//! Partitioned Record Storage
//!
//! The authoritative side of a distributed map. Each member owns a subset of
//! partitions; for each (partition, map) pair it keeps a `RecordStore`.
//!
//! ## Core Concepts
//! - **Partitioning**: `PartitionTable` hashes keys to partitions and keeps the replica
//!   list (primary first, backups after) for each partition.
//! - **Single writer**: All record stores of one partition sit behind one async mutex,
//!   so operations on a partition are serialized even across keys and maps.
//! - **Write-behind**: Mutations land in memory synchronously and are handed to a
//!   per-partition `WriteBehindQueue`, coalesced per key, and drained by a per-map
//!   `StoreWorker` once due.
//! - **Backups**: Record state and pending writes are mirrored to backup members. A
//!   promoted backup keeps each pending write's original due instant.

pub mod backup;
pub mod handlers;
pub mod map_store;
pub mod partitioner;
pub mod protocol;
pub mod record;
pub mod record_store;
pub mod service;
pub mod worker;
pub mod write_behind;
