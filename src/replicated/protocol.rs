//! Replicated Map Network Protocol
//!
//! Peers push single records (`PUT_RECORD`) after every local update, push
//! removals (`REMOVE_RECORD`), and pull version numbers with content digests
//! and full snapshots during anti-entropy.

use serde::{Deserialize, Serialize};

use super::record::RecordMigrationInfo;

// --- API Endpoints ---

pub const ENDPOINT_PUT: &str = "/replicated/:name/put";
pub const ENDPOINT_GET: &str = "/replicated/:name/get/:key";
pub const ENDPOINT_REMOVE: &str = "/replicated/:name/remove/:key";
/// Applies a peer's record through the merge policy.
pub const ENDPOINT_PUT_RECORD: &str = "/replicated/:name/put_record";
pub const ENDPOINT_REMOVE_RECORD: &str = "/replicated/:name/remove_record";
pub const ENDPOINT_VERSION: &str = "/replicated/:name/version";
pub const ENDPOINT_SNAPSHOT: &str = "/replicated/:name/snapshot";

/// Fills the `:name` segment of an endpoint template.
pub fn path_for(endpoint: &str, name: &str) -> String {
    endpoint.replace(":name", name)
}

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicatedPutRequest {
    pub key: String,
    pub value_json: String,
    /// `None` or `0` keeps the entry until removed.
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicatedPutResponse {
    pub success: bool,
    pub previous_json: Option<String>,
    pub version: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicatedGetResponse {
    pub value_json: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRecordResponse {
    /// Whether the local copy changed.
    pub merged: bool,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveRecordRequest<K> {
    pub key: K,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionResponse {
    pub version: u64,
    #[serde(default)]
    pub digest: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotResponse<K, V> {
    pub version: u64,
    pub records: Vec<RecordMigrationInfo<K, V>>,
}
