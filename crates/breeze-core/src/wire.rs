//! JSON shapes exchanged with the native layer
//!
//! Field names follow the boundary contract exactly (camelCase, `__async`
//! markers). Everything here is plain data; conversion into the façade
//! types lives in `request` and `response`.

use crate::pending::OperationId;
use crate::response::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

/// Serialized inbound request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireRequest {
    pub method: String,
    pub path: String,
    /// Pattern the native matcher resolved `path` to; falls back to `path`
    pub registered_path: String,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: WireBody,
    /// Raw `Cookie` header
    pub cookies: String,
    pub headers: HashMap<String, String>,
    pub ip: String,
    pub ips: Vec<String>,
    pub ip_source: Option<String>,
    pub custom_params: Map<String, Value>,
}

impl WireRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Path used for registry lookup
    pub fn route_path(&self) -> &str {
        if self.registered_path.is_empty() {
            &self.path
        } else {
            &self.registered_path
        }
    }
}

/// Tagged request body; binary data travels base64 encoded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WireBody {
    Form {
        #[serde(default)]
        data: Map<String, Value>,
    },
    Json {
        #[serde(default)]
        data: Value,
    },
    Text {
        #[serde(default)]
        data: String,
    },
    Binary {
        #[serde(default)]
        data: String,
        #[serde(rename = "contentType", default)]
        content_type: String,
        #[serde(default)]
        size: Option<usize>,
    },
}

impl Default for WireBody {
    fn default() -> Self {
        WireBody::Text { data: String::new() }
    }
}

/// Serialized handler result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResponse {
    pub status: u16,
    pub content: String,
    pub content_type: String,
    #[serde(default)]
    pub headers: BTreeMap<String, HeaderValue>,
    #[serde(default)]
    pub custom_params: Map<String, Value>,
    /// `content` holds base64 of a binary body
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_base64: bool,
}

impl WireResponse {
    pub fn plain(status: u16, content: impl Into<String>) -> Self {
        Self {
            status,
            content: content.into(),
            content_type: "text/plain".to_string(),
            headers: BTreeMap::new(),
            custom_params: Map::new(),
            is_base64: false,
        }
    }

    /// Status with its reason phrase as the body
    fn canned(status: StatusCode) -> Self {
        Self::plain(status.as_u16(), status.canonical_reason().unwrap_or_default())
    }

    pub fn not_found() -> Self {
        Self::canned(StatusCode::NOT_FOUND)
    }

    pub fn invalid_payload() -> Self {
        Self::plain(StatusCode::BAD_REQUEST.as_u16(), "Invalid request JSON")
    }

    pub fn internal_error() -> Self {
        Self::canned(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn timeout() -> Self {
        Self::canned(StatusCode::REQUEST_TIMEOUT)
    }
}

/// Serialized middleware chain result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMiddlewareResult {
    pub should_continue: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub response: WireResponse,
}

impl WireMiddlewareResult {
    pub fn failed(error: impl Into<String>, response: WireResponse) -> Self {
        Self {
            should_continue: false,
            error: Some(error.into()),
            response,
        }
    }
}

/// Marker returned in place of a result when work was deferred
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsyncMarker {
    #[serde(rename = "__async")]
    pub is_async: bool,
    #[serde(rename = "__promiseId")]
    pub promise_id: OperationId,
    #[serde(rename = "__status")]
    pub status: String,
}

impl AsyncMarker {
    pub fn started(id: OperationId) -> Self {
        Self {
            is_async: true,
            promise_id: id,
            status: "started".to_string(),
        }
    }
}

/// Reply of a dispatch call: a final result or a deferral marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Dispatched<T> {
    // listed first so untagged decoding checks for the marker before T
    Started(AsyncMarker),
    Completed(T),
}

impl<T> Dispatched<T> {
    pub fn operation_id(&self) -> Option<&OperationId> {
        match self {
            Dispatched::Started(marker) => Some(&marker.promise_id),
            Dispatched::Completed(_) => None,
        }
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Dispatched::Completed(value) => Some(value),
            Dispatched::Started(_) => None,
        }
    }
}

/// Serialize for the boundary. Values here always have string keys, so a
/// failure is a bug; it is logged and replaced by a generic 500 payload.
pub(crate) fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        tracing::error!(error = %err, "failed to encode dispatch result");
        r#"{"status":500,"content":"Internal Server Error","contentType":"text/plain","headers":{},"customParams":{}}"#
            .to_string()
    })
}
