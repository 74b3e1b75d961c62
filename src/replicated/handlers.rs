use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::{Serialize, de::DeserializeOwned};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use super::protocol::{
    PutRecordResponse, RemoveRecordRequest, ReplicatedGetResponse, ReplicatedPutRequest,
    ReplicatedPutResponse, SnapshotResponse, VersionResponse,
};
use super::record::RecordMigrationInfo;
use super::replicator::Replicator;
use super::service::ReplicatedMapService;
use crate::storage::record::{MapKey, MapValue};

fn put_failure(status: StatusCode) -> (StatusCode, Json<ReplicatedPutResponse>) {
    (
        status,
        Json(ReplicatedPutResponse {
            success: false,
            previous_json: None,
            version: 0,
        }),
    )
}

/// Local put followed by a fire-and-forget PUT_RECORD to every peer.
pub async fn handle_put<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Extension(replicator): Extension<Arc<Replicator<K, V>>>,
    Path(name): Path<String>,
    Json(req): Json<ReplicatedPutRequest>,
) -> (StatusCode, Json<ReplicatedPutResponse>)
where
    K: MapKey + FromStr + Serialize + DeserializeOwned,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + PartialEq + Serialize + DeserializeOwned,
{
    let key: K = match req.key.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return put_failure(StatusCode::BAD_REQUEST);
        }
    };

    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to deserialize value: {}", e);
            return put_failure(StatusCode::BAD_REQUEST);
        }
    };

    let store = service.get_or_create(&name);
    let ttl = Duration::from_secs(req.ttl_seconds.unwrap_or(0));
    let previous = store.put_with_ttl(key.clone(), value, ttl, false);

    if let Some(record) = store.get_replicated_record(&key) {
        replicator.broadcast_record(&name, record.entry_view(&key));
    }

    let previous_json = previous.and_then(|previous| serde_json::to_string(&previous).ok());
    (
        StatusCode::OK,
        Json(ReplicatedPutResponse {
            success: true,
            previous_json,
            version: store.version(),
        }),
    )
}

pub async fn handle_get<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Path((name, raw_key)): Path<(String, String)>,
) -> (StatusCode, Json<ReplicatedGetResponse>)
where
    K: MapKey + FromStr,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + PartialEq + Serialize,
{
    let key: K = match raw_key.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return (
                StatusCode::BAD_REQUEST,
                Json(ReplicatedGetResponse { value_json: None }),
            );
        }
    };

    let value = service.get(&name).and_then(|store| store.get(&key));
    match value.map(|value| serde_json::to_string(&value)) {
        Some(Ok(value_json)) => (
            StatusCode::OK,
            Json(ReplicatedGetResponse {
                value_json: Some(value_json),
            }),
        ),
        Some(Err(e)) => {
            tracing::error!("Failed to serialize value: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ReplicatedGetResponse { value_json: None }),
            )
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(ReplicatedGetResponse { value_json: None }),
        ),
    }
}

/// Local remove followed by a fire-and-forget REMOVE_RECORD to every peer.
pub async fn handle_remove<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Extension(replicator): Extension<Arc<Replicator<K, V>>>,
    Path((name, raw_key)): Path<(String, String)>,
) -> (StatusCode, Json<ReplicatedPutResponse>)
where
    K: MapKey + FromStr + Serialize + DeserializeOwned,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + PartialEq + Serialize + DeserializeOwned,
{
    let key: K = match raw_key.parse() {
        Ok(k) => k,
        Err(e) => {
            tracing::error!("Failed to parse key: {}", e);
            return put_failure(StatusCode::BAD_REQUEST);
        }
    };

    let store = service.get_or_create(&name);
    let previous = store.remove(&key);
    if previous.is_some() {
        replicator.broadcast_remove(&name, key);
    }
    let status = if previous.is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    (
        status,
        Json(ReplicatedPutResponse {
            success: previous.is_some(),
            previous_json: previous.and_then(|previous| serde_json::to_string(&previous).ok()),
            version: store.version(),
        }),
    )
}

pub async fn handle_put_record<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Path(name): Path<String>,
    Json(record): Json<RecordMigrationInfo<K, V>>,
) -> (StatusCode, Json<PutRecordResponse>)
where
    K: MapKey + DeserializeOwned,
    V: MapValue + PartialEq + DeserializeOwned,
{
    let merged = service.put_record(&name, record);
    let version = service
        .get(&name)
        .map(|store| store.version())
        .unwrap_or(0);

    tracing::debug!("PUT_RECORD on {}: merged={} version={}", name, merged, version);
    (StatusCode::OK, Json(PutRecordResponse { merged, version }))
}

pub async fn handle_remove_record<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Path(name): Path<String>,
    Json(req): Json<RemoveRecordRequest<K>>,
) -> (StatusCode, Json<PutRecordResponse>)
where
    K: MapKey + DeserializeOwned,
    V: MapValue + PartialEq,
{
    let merged = service.remove_record(&name, &req.key);
    let version = service
        .get(&name)
        .map(|store| store.version())
        .unwrap_or(0);

    tracing::debug!("REMOVE_RECORD on {}: removed={} version={}", name, merged, version);
    (StatusCode::OK, Json(PutRecordResponse { merged, version }))
}

pub async fn handle_version<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<VersionResponse>)
where
    K: MapKey,
    V: MapValue + PartialEq,
{
    let (version, digest) = service
        .get(&name)
        .map(|store| (store.version(), store.digest()))
        .unwrap_or((0, 0));
    (StatusCode::OK, Json(VersionResponse { version, digest }))
}

pub async fn handle_snapshot<K, V>(
    Extension(service): Extension<Arc<ReplicatedMapService<K, V>>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<SnapshotResponse<K, V>>)
where
    K: MapKey + Serialize,
    V: MapValue + PartialEq + Serialize,
{
    let (version, records) = service
        .get(&name)
        .map(|store| store.snapshot())
        .unwrap_or((0, Vec::new()));
    (StatusCode::OK, Json(SnapshotResponse { version, records }))
}
