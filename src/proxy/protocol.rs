use serde::{Deserialize, Serialize};

pub const ENDPOINT_CREATE: &str = "/proxy/create";
pub const ENDPOINT_OBJECTS: &str = "/proxy/objects";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProxyRequest {
    pub service_name: String,
    pub object_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProxyResponse {
    pub success: bool,
    pub created: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectsResponse {
    pub objects: Vec<CreateProxyRequest>,
}
