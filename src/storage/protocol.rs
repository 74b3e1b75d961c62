//! Map Network Protocol
//!
//! Endpoints and DTOs for map operations served over HTTP. Values travel as
//! JSON strings so the protocol stays independent of the map's value type.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Stores a value and returns the previous one.
pub const ENDPOINT_PUT: &str = "/map/:name/put";
/// Reads a value, loading it from the map store if needed.
pub const ENDPOINT_GET: &str = "/map/:name/get/:key";
/// Removes a value and schedules its delete-behind.
pub const ENDPOINT_REMOVE: &str = "/map/:name/remove";
/// Drops the in-memory copy only.
pub const ENDPOINT_EVICT: &str = "/map/:name/evict";
/// Persists every pending write before answering.
pub const ENDPOINT_FLUSH: &str = "/map/:name/flush";
/// Number of entries owned by the answering member.
pub const ENDPOINT_SIZE: &str = "/map/:name/size";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PutRequest {
    pub key: String,
    /// The serialized JSON string of the value.
    pub value_json: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct KeyRequest {
    pub key: String,
}

/// Answer to put and remove: the value the key held before the call.
#[derive(Debug, Serialize, Deserialize)]
pub struct MutationResponse {
    pub success: bool,
    pub previous_json: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetResponse {
    /// `None` indicates the key does not exist.
    pub value_json: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EvictResponse {
    pub evicted: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FlushResponse {
    pub success: bool,
    pub error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SizeResponse {
    pub size: usize,
}
