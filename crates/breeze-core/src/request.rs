//! Request façade
//!
//! Built fresh from a [`WireRequest`] for every dispatch call and dropped
//! once the result is serialized. Custom params are the only part meant to
//! be mutated; they carry data from middleware to the handler.

use crate::cancel::CancellationToken;
use crate::cookie::CookieJar;
use crate::wire::{WireBody, WireRequest};
use crate::{Error, Result};
use base64::Engine as _;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// HTTP Methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Connect,
    Trace,
}

impl Method {
    /// Convert to string
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Connect => "CONNECT",
            Method::Trace => "TRACE",
        }
    }
}

impl FromStr for Method {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "PATCH" => Ok(Method::Patch),
            "HEAD" => Ok(Method::Head),
            "OPTIONS" => Ok(Method::Options),
            "CONNECT" => Ok(Method::Connect),
            "TRACE" => Ok(Method::Trace),
            _ => Err(Error::InvalidMethod(s.to_string())),
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Binary upload payload
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryBody {
    pub bytes: Bytes,
    pub content_type: String,
    pub size: usize,
}

/// Request body; exactly one variant is active
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Form(Map<String, Value>),
    Json(Value),
    Text(String),
    Binary(BinaryBody),
}

impl Default for Body {
    fn default() -> Self {
        Body::Text(String::new())
    }
}

impl TryFrom<WireBody> for Body {
    type Error = Error;

    fn try_from(wire: WireBody) -> Result<Self> {
        Ok(match wire {
            WireBody::Form { data } => Body::Form(data),
            WireBody::Json { data } => Body::Json(data),
            WireBody::Text { data } => Body::Text(data),
            WireBody::Binary { data, content_type, size } => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| Error::InvalidPayload(format!("binary body: {}", e)))?;
                let size = size.unwrap_or(bytes.len());
                Body::Binary(BinaryBody {
                    bytes: Bytes::from(bytes),
                    content_type,
                    size,
                })
            }
        })
    }
}

/// HTTP Request façade
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Live request path
    pub path: String,
    /// Pattern the route was registered under
    pub registered_path: String,
    pub path_params: HashMap<String, String>,
    pub query_params: HashMap<String, String>,
    pub body: Body,
    /// Header names keep the case they arrived with
    pub headers: HashMap<String, String>,
    /// Raw `Cookie` header
    pub cookies: String,
    pub ip: String,
    pub ips: Vec<String>,
    pub ip_source: Option<String>,
    custom_params: Map<String, Value>,
    token: CancellationToken,
}

impl Request {
    /// Create a bare request (mostly for tests and in-process callers)
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            method,
            registered_path: path.clone(),
            path,
            path_params: HashMap::new(),
            query_params: HashMap::new(),
            body: Body::default(),
            headers: HashMap::new(),
            cookies: String::new(),
            ip: String::new(),
            ips: Vec::new(),
            ip_source: None,
            custom_params: Map::new(),
            token: CancellationToken::new(),
        }
    }

    /// Build from the boundary payload, taking ownership of `token`
    pub fn from_wire(wire: WireRequest, token: CancellationToken) -> Result<Self> {
        let method = wire.method.parse()?;
        let registered_path = wire.route_path().to_string();
        Ok(Self {
            method,
            path: wire.path,
            registered_path,
            path_params: wire.path_params,
            query_params: wire.query_params,
            body: Body::try_from(wire.body)?,
            headers: wire.headers,
            cookies: wire.cookies,
            ip: wire.ip,
            ips: wire.ips,
            ip_source: wire.ip_source,
            custom_params: wire.custom_params,
            token,
        })
    }

    // Headers

    /// Get a header value (case-insensitive)
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.get_header(name).is_some()
    }

    pub fn content_type(&self) -> Option<&str> {
        self.get_header("content-type")
    }

    // Cookies, parsed from the raw header on every call

    pub fn get_cookie(&self, name: &str) -> Option<String> {
        CookieJar::parse(&self.cookies).get(name).map(str::to_string)
    }

    pub fn get_cookies(&self) -> HashMap<String, String> {
        CookieJar::parse(&self.cookies).into_map()
    }

    pub fn has_cookie(&self, name: &str) -> bool {
        CookieJar::parse(&self.cookies).contains(name)
    }

    // Path and query

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(|s| s.as_str())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_params.get(name).map(|s| s.as_str())
    }

    // Custom params

    pub fn get_param(&self, name: &str) -> Option<&Value> {
        self.custom_params.get(name)
    }

    /// Set a custom param, visible to later middleware and the handler
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.custom_params.insert(name.into(), value.into());
    }

    pub fn remove_param(&mut self, name: &str) -> Option<Value> {
        self.custom_params.remove(name)
    }

    pub fn custom_params(&self) -> &Map<String, Value> {
        &self.custom_params
    }

    pub fn into_custom_params(self) -> Map<String, Value> {
        self.custom_params
    }

    // Body

    pub fn is_form_data(&self) -> bool {
        matches!(self.body, Body::Form(_))
    }

    pub fn is_json_data(&self) -> bool {
        matches!(self.body, Body::Json(_))
    }

    pub fn is_text_data(&self) -> bool {
        matches!(self.body, Body::Text(_))
    }

    pub fn is_binary_data(&self) -> bool {
        matches!(self.body, Body::Binary(_))
    }

    pub fn form_data(&self) -> Option<&Map<String, Value>> {
        match &self.body {
            Body::Form(map) => Some(map),
            _ => None,
        }
    }

    pub fn json_data(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn text_data(&self) -> Option<&str> {
        match &self.body {
            Body::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn binary_data(&self) -> Option<&BinaryBody> {
        match &self.body {
            Body::Binary(bin) => Some(bin),
            _ => None,
        }
    }

    /// Decode a JSON (or JSON-in-text) body into `T`
    pub fn json_as<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.body {
            Body::Json(value) => Ok(T::deserialize(value)?),
            Body::Text(text) => Ok(serde_json::from_str(text)?),
            _ => Err(Error::InvalidPayload("body is not JSON".to_string())),
        }
    }

    // Cancellation

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Sleep for `ms`, failing with [`Error::Aborted`] if the request is
    /// cancelled first
    pub async fn sleep(&self, ms: u64) -> Result<()> {
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Aborted),
            _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(()),
        }
    }
}
