//! In-process native host
//!
//! [`LocalHost`] plays the native side of the boundary without sockets or
//! HTTP parsing: it learns routes through [`NativeBridge`], resolves live
//! paths with `breeze-router`, builds the boundary JSON, runs the middleware
//! chain and then the handler through an [`App`], and parks on deferred
//! operations until the bridge reports them.
//!
//! ```no_run
//! # async fn run() {
//! use breeze_core::{AppConfig, App, HostRequest, LocalHost, Router};
//!
//! let mut router = Router::new();
//! router.get("/hello", |_req, res| {
//!     res.text("hi");
//!     Ok(())
//! });
//!
//! let host = LocalHost::new();
//! let app = App::new(router, AppConfig::default(), host.clone());
//! let res = host.handle(&app, HostRequest::new("GET", "/hello")).await;
//! assert_eq!(res.content, "hi");
//! # }
//! ```

use crate::bridge::{NativeBridge, Settlement};
use crate::dispatch::App;
use crate::pending::OperationId;
use crate::response::{HeaderValue, StatusCode};
use crate::wire::{encode, Dispatched, WireBody, WireMiddlewareResult, WireRequest, WireResponse};
use base64::Engine as _;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::oneshot;

const SET_COOKIE: &str = "Set-Cookie";

/// Request as the native layer received it
#[derive(Debug, Clone, Default)]
pub struct HostRequest {
    pub method: String,
    /// Path with optional `?query`
    pub uri: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    /// Peer address
    pub ip: String,
}

impl HostRequest {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.headers.insert("Content-Type".to_string(), content_type.to_string());
        self.body = body.into();
        self
    }

    fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

enum Slot {
    Waiting(oneshot::Sender<Settlement>),
    /// Reported before anyone parked on it
    Settled(Settlement),
}

/// Native host running inside the process
#[derive(Default)]
pub struct LocalHost {
    routes: Mutex<breeze_router::Router<String>>,
    patterns: Mutex<Vec<String>>,
    slots: Mutex<HashMap<OperationId, Slot>>,
}

impl LocalHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Middleware patterns announced by the app
    pub fn middleware_patterns(&self) -> Vec<String> {
        self.patterns.lock().clone()
    }

    /// Serve one request: middleware chain, then the handler
    pub async fn handle(&self, app: &App, request: HostRequest) -> WireResponse {
        let mut wire = self.build_wire(request);

        let reply = app.dispatch_middleware(&encode(&wire), 0);
        let chain: WireMiddlewareResult = self.settle(&reply, middleware_failure).await;

        if !chain.should_continue {
            return match chain.error {
                Some(error) if !StatusCode::from(chain.response.status).is_error() => {
                    tracing::debug!(error = %error, "middleware failed without an error status");
                    WireResponse::internal_error()
                }
                _ => chain.response,
            };
        }

        let carried_headers = chain.response.headers;
        wire.custom_params = chain.response.custom_params;
        let reply = app.dispatch_request(&encode(&wire), 0);
        let mut response: WireResponse = self.settle(&reply, handler_failure).await;

        merge_headers(&mut response.headers, carried_headers);
        response
    }

    fn build_wire(&self, request: HostRequest) -> WireRequest {
        let (path, query) = match request.uri.split_once('?') {
            Some((path, query)) => (path.to_string(), query),
            None => (request.uri.clone(), ""),
        };
        let matched = self.routes.lock().find(&request.method, &path);

        let mut wire = WireRequest::new(request.method.to_uppercase(), path);
        if let Some(matched) = matched {
            wire.path_params = matched.params_map();
            wire.registered_path = matched.value;
        }
        wire.query_params = parse_pairs(query);
        wire.cookies = request.header_value("cookie").unwrap_or_default().to_string();

        let forwarded: Vec<String> = request
            .header_value("x-forwarded-for")
            .map(|v| v.split(',').map(|ip| ip.trim().to_string()).filter(|ip| !ip.is_empty()).collect())
            .unwrap_or_default();
        if let Some(first) = forwarded.first() {
            wire.ip = first.clone();
            wire.ip_source = Some("x-forwarded-for".to_string());
        } else {
            wire.ip = request.ip.clone();
            wire.ip_source = Some("socket".to_string());
        }
        wire.ips = forwarded;

        wire.body = decode_body(request.header_value("content-type").unwrap_or_default(), &request.body);
        wire.headers = request.headers;
        wire
    }

    /// Decode a dispatch reply, parking on the operation when it deferred
    async fn settle<T: DeserializeOwned>(&self, reply: &str, on_error: fn(String) -> T) -> T {
        let dispatched = match serde_json::from_str::<Dispatched<T>>(reply) {
            Ok(dispatched) => dispatched,
            Err(err) => {
                tracing::error!(error = %err, "undecodable dispatch reply");
                return on_error("Internal Server Error".to_string());
            }
        };
        let id = match dispatched {
            Dispatched::Completed(value) => return value,
            Dispatched::Started(marker) => marker.promise_id,
        };

        let settlement = match self.park(&id) {
            Ok(settled) => settled,
            Err(rx) => match rx.await {
                Ok(settled) => settled,
                Err(_) => return on_error("Internal Server Error".to_string()),
            },
        };
        match settlement {
            Settlement::Result { json, .. } => serde_json::from_str(&json).unwrap_or_else(|err| {
                tracing::error!(operation_id = %id, error = %err, "undecodable settlement");
                on_error("Internal Server Error".to_string())
            }),
            Settlement::Error { message, .. } => on_error(message),
        }
    }

    fn park(&self, id: &OperationId) -> std::result::Result<Settlement, oneshot::Receiver<Settlement>> {
        let mut slots = self.slots.lock();
        if let Some(Slot::Settled(settlement)) = slots.remove(id) {
            return Ok(settlement);
        }
        let (tx, rx) = oneshot::channel();
        slots.insert(id.clone(), Slot::Waiting(tx));
        Err(rx)
    }

    fn deliver(&self, settlement: Settlement) {
        let id = settlement.id().clone();
        let mut slots = self.slots.lock();
        match slots.remove(&id) {
            Some(Slot::Waiting(tx)) => {
                drop(slots);
                if tx.send(settlement).is_err() {
                    tracing::debug!(operation_id = %id, "waiter dropped before settlement");
                }
            }
            _ => {
                slots.insert(id, Slot::Settled(settlement));
            }
        }
    }
}

impl NativeBridge for LocalHost {
    fn register_route(&self, method: &str, path: &str) {
        self.routes.lock().insert(method, path, path.to_string());
    }

    fn register_middleware(&self, pattern: &str) {
        self.patterns.lock().push(pattern.to_string());
    }

    fn report_result(&self, id: &OperationId, json: String) {
        self.deliver(Settlement::Result { id: id.clone(), json });
    }

    fn report_error(&self, id: &OperationId, message: String) {
        self.deliver(Settlement::Error { id: id.clone(), message });
    }
}

/// Fold middleware headers into the handler's: the handler wins on plain
/// headers, `Set-Cookie` lists accumulate with middleware values first
fn merge_headers(handler: &mut BTreeMap<String, HeaderValue>, middleware: BTreeMap<String, HeaderValue>) {
    for (name, value) in middleware {
        let existing = handler.keys().find(|k| k.eq_ignore_ascii_case(&name)).cloned();
        match existing {
            None => {
                handler.insert(name, value);
            }
            Some(key) if name.eq_ignore_ascii_case(SET_COOKIE) => {
                if let Some(later) = handler.remove(&key) {
                    let values: Vec<String> = value.values().chain(later.values()).map(str::to_string).collect();
                    handler.insert(key, HeaderValue::Many(values));
                }
            }
            Some(_) => {}
        }
    }
}

fn is_timeout(message: &str) -> bool {
    message.starts_with("Request timeout")
}

fn handler_failure(message: String) -> WireResponse {
    if is_timeout(&message) {
        WireResponse::timeout()
    } else {
        WireResponse::plain(500, message)
    }
}

fn middleware_failure(message: String) -> WireMiddlewareResult {
    let response = if is_timeout(&message) {
        WireResponse::timeout()
    } else {
        WireResponse::internal_error()
    };
    WireMiddlewareResult::failed(message, response)
}

fn decode_body(content_type: &str, body: &[u8]) -> WireBody {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if body.is_empty() {
        return WireBody::default();
    }
    if mime == "application/json" || mime.ends_with("+json") {
        if let Ok(data) = serde_json::from_slice::<Value>(body) {
            return WireBody::Json { data };
        }
    }
    if mime == "application/x-www-form-urlencoded" {
        let data: Map<String, Value> = parse_pairs(&String::from_utf8_lossy(body))
            .into_iter()
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        return WireBody::Form { data };
    }
    if mime.is_empty() || mime.starts_with("text/") || mime == "application/json" {
        if let Ok(text) = std::str::from_utf8(body) {
            return WireBody::Text { data: text.to_string() };
        }
    }
    WireBody::Binary {
        data: base64::engine::general_purpose::STANDARD.encode(body),
        content_type: content_type.to_string(),
        size: Some(body.len()),
    }
}

/// Parse `a=1&b=2` pairs; later keys win
fn parse_pairs(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) => (url_decode(key), url_decode(value)),
            None => (url_decode(pair), String::new()),
        })
        .collect()
}

/// Percent-decode, treating `+` as space
fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .filter(|hex| hex.iter().all(u8::is_ascii_hexdigit))
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
            }
            b'+' => out.push(b' '),
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
