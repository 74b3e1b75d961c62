use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
};
use serde::{Serialize, de::DeserializeOwned};
use std::str::FromStr;
use std::sync::Arc;

use super::protocol::{
    EvictResponse, FlushResponse, GetResponse, KeyRequest, MutationResponse, PutRequest,
    SizeResponse,
};
use super::record::{MapKey, MapValue};
use super::service::MapService;
use crate::error::MapError;
use crate::invalidation::near_cache::NearCacheRegistry;

pub fn status_for(error: &MapError) -> StatusCode {
    match error {
        MapError::UnknownMap { .. } => StatusCode::NOT_FOUND,
        MapError::NotOwner { .. } => StatusCode::MISDIRECTED_REQUEST,
        MapError::Load { .. } => StatusCode::SERVICE_UNAVAILABLE,
        MapError::Persistence { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        MapError::Destroyed { .. } => StatusCode::GONE,
    }
}

fn parse_key<K>(raw: &str) -> Result<K, String>
where
    K: FromStr,
    <K as FromStr>::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: <K as FromStr>::Err| {
        tracing::error!("Failed to parse key: {}", e);
        e.to_string()
    })
}

fn to_json<V: Serialize>(value: Option<V>) -> Option<String> {
    value.and_then(|value| match serde_json::to_string(&value) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!("Failed to serialize value: {}", e);
            None
        }
    })
}

fn mutation_failure(status: StatusCode, error: String) -> (StatusCode, Json<MutationResponse>) {
    (
        status,
        Json(MutationResponse {
            success: false,
            previous_json: None,
            error: Some(error),
        }),
    )
}

fn mutation_result<V: Serialize>(
    result: Result<Option<V>, MapError>,
) -> (StatusCode, Json<MutationResponse>) {
    match result {
        Ok(previous) => (
            StatusCode::OK,
            Json(MutationResponse {
                success: true,
                previous_json: to_json(previous),
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Map operation failed: {}", e);
            mutation_failure(status_for(&e), e.to_string())
        }
    }
}

pub async fn handle_put<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Path(name): Path<String>,
    Json(req): Json<PutRequest>,
) -> (StatusCode, Json<MutationResponse>)
where
    K: MapKey + FromStr,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + Serialize + DeserializeOwned,
{
    let key: K = match parse_key(&req.key) {
        Ok(key) => key,
        Err(e) => return mutation_failure(StatusCode::BAD_REQUEST, e),
    };

    let value: V = match serde_json::from_str(&req.value_json) {
        Ok(value) => value,
        Err(e) => {
            tracing::error!("Failed to deserialize value: {}", e);
            return mutation_failure(StatusCode::BAD_REQUEST, e.to_string());
        }
    };

    mutation_result(service.put(&name, key, value).await)
}

/// Serves from the member's near cache when it has one for the map.
pub async fn handle_get<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Extension(near_caches): Extension<Arc<NearCacheRegistry<K, V>>>,
    Path((name, raw_key)): Path<(String, String)>,
) -> (StatusCode, Json<GetResponse>)
where
    K: MapKey + FromStr,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + Serialize + DeserializeOwned,
{
    let key: K = match parse_key(&raw_key) {
        Ok(key) => key,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(GetResponse { value_json: None }),
            );
        }
    };

    let near_cache = near_caches.get(&name).filter(|cache| cache.is_enabled());
    if let Some(cache) = &near_cache
        && let Some(value) = cache.get(&key)
    {
        return (
            StatusCode::OK,
            Json(GetResponse {
                value_json: to_json(Some(value)),
            }),
        );
    }

    let reservation = near_cache
        .as_ref()
        .and_then(|cache| Some((cache.clone(), cache.try_reserve(&key)?)));

    match service.get(&name, &key).await {
        Ok(Some(value)) => {
            if let Some((cache, reservation)) = reservation
                && !cache.try_publish(key, reservation, value.clone())
            {
                tracing::trace!("Near cache {}: fill skipped after invalidation", name);
            }
            (
                StatusCode::OK,
                Json(GetResponse {
                    value_json: to_json(Some(value)),
                }),
            )
        }
        result => {
            if let Some((cache, reservation)) = reservation {
                cache.release(&key, reservation);
            }
            match result {
                Err(e) => {
                    tracing::error!("Failed to get from map {}: {}", name, e);
                    (status_for(&e), Json(GetResponse { value_json: None }))
                }
                _ => (
                    StatusCode::NOT_FOUND,
                    Json(GetResponse { value_json: None }),
                ),
            }
        }
    }
}

pub async fn handle_remove<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Path(name): Path<String>,
    Json(req): Json<KeyRequest>,
) -> (StatusCode, Json<MutationResponse>)
where
    K: MapKey + FromStr,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue + Serialize + DeserializeOwned,
{
    let key: K = match parse_key(&req.key) {
        Ok(key) => key,
        Err(e) => return mutation_failure(StatusCode::BAD_REQUEST, e),
    };

    mutation_result(service.remove(&name, &key).await)
}

pub async fn handle_evict<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Path(name): Path<String>,
    Json(req): Json<KeyRequest>,
) -> (StatusCode, Json<EvictResponse>)
where
    K: MapKey + FromStr,
    <K as FromStr>::Err: std::fmt::Display,
    V: MapValue,
{
    let key: K = match parse_key(&req.key) {
        Ok(key) => key,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(EvictResponse { evicted: false })),
    };

    match service.evict(&name, &key).await {
        Ok(evicted) => (StatusCode::OK, Json(EvictResponse { evicted })),
        Err(e) => {
            tracing::error!("Failed to evict from map {}: {}", name, e);
            (status_for(&e), Json(EvictResponse { evicted: false }))
        }
    }
}

pub async fn handle_flush<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<FlushResponse>)
where
    K: MapKey,
    V: MapValue,
{
    match service.flush(&name).await {
        Ok(()) => (
            StatusCode::OK,
            Json(FlushResponse {
                success: true,
                error: None,
            }),
        ),
        Err(e) => {
            tracing::error!("Flush of map {} failed: {}", name, e);
            (
                status_for(&e),
                Json(FlushResponse {
                    success: false,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

pub async fn handle_size<K, V>(
    Extension(service): Extension<Arc<MapService<K, V>>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<SizeResponse>)
where
    K: MapKey,
    V: MapValue,
{
    match service.size(&name).await {
        Ok(size) => (StatusCode::OK, Json(SizeResponse { size })),
        Err(e) => (status_for(&e), Json(SizeResponse { size: 0 })),
    }
}
