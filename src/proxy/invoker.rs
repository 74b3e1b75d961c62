//! CREATE Invocation
//!
//! `ProxyInvoker` is the seam between the registry's retry loop and the
//! network. Implementations classify failures: anything that may succeed on
//! another attempt comes back as `ProxyError::Transient`.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

use super::protocol::{CreateProxyRequest, CreateProxyResponse, ENDPOINT_CREATE};
use super::types::ObjectNamespace;
use crate::cluster::types::Member;
use crate::error::ProxyError;

#[async_trait]
pub trait ProxyInvoker: Send + Sync {
    /// Asks `target` to create and initialize the object.
    async fn create(&self, namespace: &ObjectNamespace, target: &Member) -> Result<(), ProxyError>;
}

pub struct HttpProxyInvoker {
    http_client: reqwest::Client,
    timeout: Duration,
}

impl HttpProxyInvoker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            timeout,
        }
    }
}

#[async_trait]
impl ProxyInvoker for HttpProxyInvoker {
    async fn create(&self, namespace: &ObjectNamespace, target: &Member) -> Result<(), ProxyError> {
        let url = format!("http://{}{}", target.http_addr, ENDPOINT_CREATE);
        let request = CreateProxyRequest {
            service_name: namespace.service_name.clone(),
            object_id: namespace.object_id.clone(),
        };

        let response = self
            .http_client
            .post(url)
            .json(&request)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ProxyError::Transient {
                namespace: namespace.clone(),
                message: format!("{} unreachable: {}", target.http_addr, e),
            })?;

        let status = response.status();
        if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::MISDIRECTED_REQUEST {
            return Err(ProxyError::Transient {
                namespace: namespace.clone(),
                message: format!("{} answered {}", target.http_addr, status),
            });
        }

        let body: CreateProxyResponse =
            response
                .json()
                .await
                .map_err(|e| ProxyError::Transient {
                    namespace: namespace.clone(),
                    message: format!("Unreadable CREATE response: {}", e),
                })?;

        if status.is_success() && body.success {
            Ok(())
        } else {
            Err(ProxyError::Initialization {
                namespace: namespace.clone(),
                message: body.error.unwrap_or_else(|| status.to_string()),
            })
        }
    }
}
