use axum::{Json, extract::Extension, http::StatusCode};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use super::protocol::{CreateProxyRequest, CreateProxyResponse, ObjectsResponse};
use super::types::ObjectNamespace;

/// Distributed objects created on this member, keyed by namespace.
pub struct ObjectCatalog {
    services: HashSet<String>,
    objects: DashMap<ObjectNamespace, Instant>,
}

impl ObjectCatalog {
    pub fn new(services: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            services: services.iter().map(|s| s.to_string()).collect(),
            objects: DashMap::new(),
        })
    }

    /// Records the object. `Ok(false)` if it already existed.
    pub fn create(&self, namespace: ObjectNamespace) -> Result<bool, String> {
        if !self.services.contains(&namespace.service_name) {
            return Err(format!("Unknown service: {}", namespace.service_name));
        }
        let mut created = false;
        self.objects.entry(namespace).or_insert_with(|| {
            created = true;
            Instant::now()
        });
        Ok(created)
    }

    pub fn contains(&self, namespace: &ObjectNamespace) -> bool {
        self.objects.contains_key(namespace)
    }

    pub fn objects(&self) -> Vec<ObjectNamespace> {
        let mut objects: Vec<ObjectNamespace> =
            self.objects.iter().map(|entry| entry.key().clone()).collect();
        objects.sort();
        objects
    }
}

pub async fn handle_create(
    Extension(catalog): Extension<Arc<ObjectCatalog>>,
    Json(req): Json<CreateProxyRequest>,
) -> (StatusCode, Json<CreateProxyResponse>) {
    let namespace = ObjectNamespace::new(&req.service_name, &req.object_id);

    match catalog.create(namespace.clone()) {
        Ok(created) => {
            if created {
                tracing::info!("Created distributed object {}", namespace);
            }
            (
                StatusCode::OK,
                Json(CreateProxyResponse {
                    success: true,
                    created,
                    error: None,
                }),
            )
        }
        Err(e) => {
            tracing::warn!("Rejected CREATE for {}: {}", namespace, e);
            (
                StatusCode::BAD_REQUEST,
                Json(CreateProxyResponse {
                    success: false,
                    created: false,
                    error: Some(e),
                }),
            )
        }
    }
}

pub async fn handle_objects(
    Extension(catalog): Extension<Arc<ObjectCatalog>>,
) -> (StatusCode, Json<ObjectsResponse>) {
    let objects = catalog
        .objects()
        .into_iter()
        .map(|namespace| CreateProxyRequest {
            service_name: namespace.service_name,
            object_id: namespace.object_id,
        })
        .collect();
    (StatusCode::OK, Json(ObjectsResponse { objects }))
}
