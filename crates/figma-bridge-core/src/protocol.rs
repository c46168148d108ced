//! Wire types shared by the bridge, the leader and the follower.
//!
//! Two encodings of the same call:
//!
//! ```text
//! plugin socket   -> {"type","requestId","nodeIds"?,"params"?}
//! plugin socket   <- {"type","requestId","data"?,"error"?}
//! POST /rpc       -> {"tool","nodeIds"?,"params"?}
//! POST /rpc       <- {"data"?,"error"?}
//! ```
//!
//! Empty `nodeIds` and `params` are omitted on the way out.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed parameters attached to a request.
pub type Params = serde_json::Map<String, Value>;

fn non_empty_ids(ids: Option<Vec<String>>) -> Option<Vec<String>> {
    ids.filter(|ids| !ids.is_empty())
}

fn non_empty_params(params: Option<Params>) -> Option<Params> {
    params.filter(|params| !params.is_empty())
}

/// Request envelope written to the plugin connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl BridgeRequest {
    pub fn new(
        kind: impl Into<String>,
        request_id: impl Into<String>,
        node_ids: Option<Vec<String>>,
        params: Option<Params>,
    ) -> Self {
        Self {
            kind: kind.into(),
            request_id: request_id.into(),
            node_ids: non_empty_ids(node_ids),
            params: non_empty_params(params),
        }
    }
}

/// Response envelope read from the plugin connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeResponse {
    #[serde(rename = "type", default)]
    pub kind: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BridgeResponse {
    /// The error string, if the plugin reported a non-empty one.
    pub fn peer_error(&self) -> Option<&str> {
        self.error.as_deref().filter(|e| !e.is_empty())
    }
}

/// Body of `POST /rpc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardRequest {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Params>,
}

impl ForwardRequest {
    pub fn new(tool: impl Into<String>, node_ids: Option<Vec<String>>, params: Option<Params>) -> Self {
        Self {
            tool: tool.into(),
            node_ids: non_empty_ids(node_ids),
            params: non_empty_params(params),
        }
    }
}

/// Reply to `POST /rpc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ForwardResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ForwardResponse {
    /// A `null` payload is omitted from the body.
    pub fn success(data: Value) -> Self {
        Self {
            data: (!data.is_null()).then_some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Body of `GET /ping`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
}

impl HealthStatus {
    pub fn ok(version: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            version: version.into(),
        }
    }
}
