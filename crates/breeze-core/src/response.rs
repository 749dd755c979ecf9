//! Response façade
//!
//! Accumulates status, headers, cookies and body while middleware and the
//! handler run, then serializes into a [`WireResponse`].

use crate::cookie::{Cookie, CookieJar, CookieOptions};
use crate::wire::WireResponse;
use crate::Result;
use base64::Engine as _;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use smallvec::SmallVec;

/// HTTP status as carried on the boundary. Named constants cover the
/// codes breeze itself answers with; handlers may set any other code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NO_CONTENT: StatusCode = StatusCode(204);
    pub const FOUND: StatusCode = StatusCode(302);
    pub const BAD_REQUEST: StatusCode = StatusCode(400);
    pub const FORBIDDEN: StatusCode = StatusCode(403);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const REQUEST_TIMEOUT: StatusCode = StatusCode(408);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);

    pub fn as_u16(&self) -> u16 {
        self.0
    }

    /// Reason phrase for the named codes, `None` otherwise
    pub fn canonical_reason(&self) -> Option<&'static str> {
        Some(match *self {
            Self::OK => "OK",
            Self::NO_CONTENT => "No Content",
            Self::FOUND => "Found",
            Self::BAD_REQUEST => "Bad Request",
            Self::FORBIDDEN => "Forbidden",
            Self::NOT_FOUND => "Not Found",
            Self::REQUEST_TIMEOUT => "Request Timeout",
            Self::INTERNAL_SERVER_ERROR => "Internal Server Error",
            _ => return None,
        })
    }

    /// 4xx or 5xx
    pub fn is_error(&self) -> bool {
        self.0 >= 400
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> Self {
        StatusCode(code)
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.canonical_reason() {
            Some(reason) => write!(f, "{} {}", self.0, reason),
            None => write!(f, "{}", self.0),
        }
    }
}

/// Header value; repeated headers such as `Set-Cookie` become a list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HeaderValue {
    One(String),
    Many(Vec<String>),
}

impl HeaderValue {
    /// First value
    pub fn first(&self) -> Option<&str> {
        match self {
            HeaderValue::One(v) => Some(v.as_str()),
            HeaderValue::Many(vs) => vs.first().map(|v| v.as_str()),
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &str> {
        let slice: &[String] = match self {
            HeaderValue::One(v) => std::slice::from_ref(v),
            HeaderValue::Many(vs) => vs,
        };
        slice.iter().map(|v| v.as_str())
    }

    fn push(&mut self, value: String) {
        match self {
            HeaderValue::One(existing) => {
                let first = std::mem::take(existing);
                *self = HeaderValue::Many(vec![first, value]);
            }
            HeaderValue::Many(vs) => vs.push(value),
        }
    }
}

impl From<&str> for HeaderValue {
    fn from(v: &str) -> Self {
        HeaderValue::One(v.to_string())
    }
}

impl From<String> for HeaderValue {
    fn from(v: String) -> Self {
        HeaderValue::One(v)
    }
}

/// Response body payload
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResponseBody {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
}

const SET_COOKIE: &str = "Set-Cookie";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// HTTP Response façade
#[derive(Debug, Clone)]
pub struct Response {
    status: StatusCode,
    headers: SmallVec<[(String, HeaderValue); 8]>,
    body: ResponseBody,
    content_type: String,
    /// Raw `Cookie` header of the request, read only
    request_cookies: String,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    /// Create an empty 200 response
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: SmallVec::new(),
            body: ResponseBody::Empty,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            request_cookies: String::new(),
        }
    }

    /// Response bound to the raw cookie header of its request
    pub fn for_request(raw_cookies: impl Into<String>) -> Self {
        Self {
            request_cookies: raw_cookies.into(),
            ..Self::new()
        }
    }

    pub fn status(&mut self, code: u16) -> &mut Self {
        self.status = StatusCode(code);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    /// Set a header, replacing any existing value (case-insensitive name).
    /// `Content-Type` is routed to the content type field.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        if name.eq_ignore_ascii_case("content-type") {
            if let Some(v) = value.first() {
                self.content_type = v.to_string();
            }
            return self;
        }
        match self.position(&name) {
            Some(i) => self.headers[i].1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Add a value, keeping earlier ones
    pub fn append_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.position(&name) {
            Some(i) => self.headers[i].1.push(value),
            None => self.headers.push((name, HeaderValue::One(value))),
        }
        self
    }

    pub fn header(&self, name: &str) -> Option<&HeaderValue> {
        self.position(name).map(|i| &self.headers[i].1)
    }

    pub fn remove_header(&mut self, name: &str) -> Option<HeaderValue> {
        self.position(name).map(|i| self.headers.remove(i).1)
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v))
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Serialize `value` as the JSON body
    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<&mut Self> {
        let body = serde_json::to_string(value)?;
        self.body = ResponseBody::Text(body);
        self.content_type = "application/json".to_string();
        Ok(self)
    }

    pub fn text(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = ResponseBody::Text(body.into());
        self.content_type = "text/plain".to_string();
        self
    }

    pub fn html(&mut self, body: impl Into<String>) -> &mut Self {
        self.body = ResponseBody::Text(body.into());
        self.content_type = "text/html".to_string();
        self
    }

    /// Raw payload with an explicit content type
    pub fn send(&mut self, body: impl Into<Bytes>, content_type: impl Into<String>) -> &mut Self {
        self.body = ResponseBody::Bytes(body.into());
        self.content_type = content_type.into();
        self
    }

    /// 302 redirect
    pub fn redirect(&mut self, location: impl Into<String>) -> &mut Self {
        self.redirect_with(StatusCode::FOUND, location)
    }

    pub fn redirect_with(&mut self, status: StatusCode, location: impl Into<String>) -> &mut Self {
        self.status = status;
        self.set_header("Location", location.into());
        self
    }

    /// Append a `Set-Cookie` header
    pub fn set_cookie(&mut self, cookie: Cookie) -> &mut Self {
        self.append_header(SET_COOKIE, cookie.to_header_value())
    }

    pub fn set_cookie_with(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        options: &CookieOptions,
    ) -> &mut Self {
        self.set_cookie(Cookie::with_options(name, value, options))
    }

    /// Expire a cookie; path and domain must match the ones it was set with
    pub fn clear_cookie(&mut self, name: impl Into<String>, options: &CookieOptions) -> &mut Self {
        let mut cookie = Cookie::removal(name);
        cookie.path = options.path.clone();
        cookie.domain = options.domain.clone();
        self.set_cookie(cookie)
    }

    /// Cookie sent with the request this response answers
    pub fn request_cookie(&self, name: &str) -> Option<String> {
        CookieJar::parse(&self.request_cookies).get(name).map(str::to_string)
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &ResponseBody {
        &self.body
    }

    /// Body as text if it is not binary
    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Empty => Some(""),
            ResponseBody::Text(s) => Some(s),
            ResponseBody::Bytes(_) => None,
        }
    }

    /// Serialize for the boundary
    pub fn into_wire(self, custom_params: Map<String, Value>) -> WireResponse {
        let (content, is_base64) = match self.body {
            ResponseBody::Empty => (String::new(), false),
            ResponseBody::Text(s) => (s, false),
            ResponseBody::Bytes(b) => (base64::engine::general_purpose::STANDARD.encode(&b), true),
        };
        WireResponse {
            status: self.status.as_u16(),
            content,
            content_type: self.content_type,
            headers: self.headers.into_iter().collect(),
            custom_params,
            is_base64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_code() {
        assert!(!StatusCode::FOUND.is_error());
        assert!(StatusCode::REQUEST_TIMEOUT.is_error());
        assert_eq!(StatusCode::REQUEST_TIMEOUT.to_string(), "408 Request Timeout");
        assert_eq!(StatusCode(418).to_string(), "418");
        assert_eq!(StatusCode::from(404), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_body_setters_update_content_type() {
        let mut res = Response::new();
        assert_eq!(res.content_type(), "text/plain");

        res.json(&json!({"foo": "bar"})).unwrap();
        assert_eq!(res.content_type(), "application/json");
        assert_eq!(res.body_text(), Some(r#"{"foo":"bar"}"#));

        res.html("<h1>hi</h1>");
        assert_eq!(res.content_type(), "text/html");

        res.send(vec![0u8, 1, 2], "application/octet-stream");
        assert_eq!(res.content_type(), "application/octet-stream");
        assert_eq!(res.body_text(), None);
    }

    #[test]
    fn test_headers_case_insensitive_replace() {
        let mut res = Response::new();
        res.set_header("X-Custom", "a");
        res.set_header("x-custom", "b");

        assert_eq!(res.headers().count(), 1);
        assert_eq!(res.header("X-CUSTOM").and_then(|v| v.first()), Some("b"));
        assert!(res.remove_header("x-Custom").is_some());
        assert!(res.header("x-custom").is_none());
    }

    #[test]
    fn test_content_type_header_sets_field() {
        let mut res = Response::new();
        res.set_header("Content-Type", "application/xml");
        assert_eq!(res.content_type(), "application/xml");
        assert!(res.header("content-type").is_none());
    }

    #[test]
    fn test_set_cookie_accumulates() {
        let mut res = Response::new();
        res.set_cookie(Cookie::new("a", "1"));
        res.set_cookie(Cookie::new("b", "2"));

        let values: Vec<&str> = res.header("set-cookie").unwrap().values().collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_set_cookie_parses_back() {
        let mut res = Response::new();
        res.set_cookie_with("session", "abc", &CookieOptions::new().http_only().max_age(3600));

        let header = res.header("Set-Cookie").and_then(|v| v.first()).unwrap();
        let cookie = Cookie::parse_set_cookie(header).unwrap();
        assert_eq!(cookie.name, "session");
        assert_eq!(cookie.value, "abc");
        assert!(cookie.http_only);
        assert_eq!(cookie.max_age, Some(3600));
    }

    #[test]
    fn test_clear_cookie_keeps_path() {
        let mut res = Response::new();
        res.clear_cookie("session", &CookieOptions::new().path("/app"));
        let header = res.header("Set-Cookie").and_then(|v| v.first()).unwrap();
        assert!(header.contains("Path=/app"));
        assert!(header.contains("Max-Age=0"));
    }

    #[test]
    fn test_request_cookie_reads_raw_header() {
        let res = Response::for_request("theme=dark; session=xyz");
        assert_eq!(res.request_cookie("session").as_deref(), Some("xyz"));
        assert_eq!(res.request_cookie("missing"), None);
    }

    #[test]
    fn test_redirect() {
        let mut res = Response::new();
        res.redirect("/login");
        assert_eq!(res.status_code(), StatusCode::FOUND);
        assert_eq!(res.header("location").and_then(|v| v.first()), Some("/login"));
    }

    #[test]
    fn test_into_wire() {
        let mut res = Response::new();
        res.status(201).set_header("X-Id", "7");
        res.json(&json!({"ok": true})).unwrap();

        let mut params = Map::new();
        params.insert("user".to_string(), json!("alice"));
        let wire = res.into_wire(params);

        assert_eq!(wire.status, 201);
        assert_eq!(wire.content, r#"{"ok":true}"#);
        assert_eq!(wire.content_type, "application/json");
        assert_eq!(wire.headers.get("X-Id"), Some(&HeaderValue::from("7")));
        assert_eq!(wire.custom_params.get("user"), Some(&json!("alice")));
        assert!(!wire.is_base64);
    }

    #[test]
    fn test_into_wire_binary_is_base64() {
        let mut res = Response::new();
        res.send(&b"foo"[..], "application/octet-stream");
        let wire = res.into_wire(Map::new());
        assert_eq!(wire.content, "Zm9v");
        assert!(wire.is_base64);
    }
}
