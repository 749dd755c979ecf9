//! Cookie parsing and serialization
//!
//! Request cookies are parsed from the raw `Cookie` header on demand.
//! Response cookies are rendered into `Set-Cookie` values and can be parsed
//! back with [`Cookie::parse_set_cookie`].

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt::Write as _;

/// IMF-fixdate, the `Expires` format of RFC 6265
const EXPIRES_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Cookie SameSite attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

impl SameSite {
    pub fn as_str(&self) -> &'static str {
        match self {
            SameSite::Strict => "Strict",
            SameSite::Lax => "Lax",
            SameSite::None => "None",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Some(SameSite::Strict),
            "lax" => Some(SameSite::Lax),
            "none" => Some(SameSite::None),
            _ => None,
        }
    }
}

/// Option bag accepted by `Response::set_cookie_with`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CookieOptions {
    pub http_only: bool,
    pub secure: bool,
    pub same_site: Option<SameSite>,
    /// Seconds
    pub max_age: Option<i64>,
    /// Unix timestamp (seconds)
    pub expires: Option<i64>,
    pub path: Option<String>,
    pub domain: Option<String>,
}

impl CookieOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn expires(mut self, unix_seconds: i64) -> Self {
        self.expires = Some(unix_seconds);
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }
}

/// HTTP Cookie
#[derive(Debug, Clone, PartialEq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub path: Option<String>,
    pub domain: Option<String>,
    pub expires: Option<DateTime<Utc>>,
    pub max_age: Option<i64>,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: Option<SameSite>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: None,
            domain: None,
            expires: None,
            max_age: None,
            secure: false,
            http_only: false,
            same_site: None,
        }
    }

    /// Build a cookie from a name, value and option bag
    pub fn with_options(
        name: impl Into<String>,
        value: impl Into<String>,
        options: &CookieOptions,
    ) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: options.path.clone(),
            domain: options.domain.clone(),
            expires: options
                .expires
                .and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
            max_age: options.max_age,
            secure: options.secure,
            http_only: options.http_only,
            same_site: options.same_site,
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn expires(mut self, at: DateTime<Utc>) -> Self {
        self.expires = Some(at);
        self
    }

    pub fn max_age(mut self, seconds: i64) -> Self {
        self.max_age = Some(seconds);
        self
    }

    pub fn secure(mut self) -> Self {
        self.secure = true;
        self
    }

    pub fn http_only(mut self) -> Self {
        self.http_only = true;
        self
    }

    pub fn same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = Some(same_site);
        self
    }

    /// Render as a `Set-Cookie` value: `name=value` followed by Path,
    /// Domain, Expires, Max-Age, Secure, HttpOnly and SameSite when set
    pub fn to_header_value(&self) -> String {
        let mut out = format!("{}={}", self.name, self.value);
        // writing into a String cannot fail
        if let Some(path) = &self.path {
            let _ = write!(out, "; Path={path}");
        }
        if let Some(domain) = &self.domain {
            let _ = write!(out, "; Domain={domain}");
        }
        if let Some(at) = self.expires {
            let _ = write!(out, "; Expires={}", at.format(EXPIRES_FORMAT));
        }
        if let Some(seconds) = self.max_age {
            let _ = write!(out, "; Max-Age={seconds}");
        }
        for (flag, label) in [(self.secure, "Secure"), (self.http_only, "HttpOnly")] {
            if flag {
                out.push_str("; ");
                out.push_str(label);
            }
        }
        if let Some(same_site) = self.same_site {
            let _ = write!(out, "; SameSite={}", same_site.as_str());
        }
        out
    }

    /// Parse a Set-Cookie header value. Unknown attributes are ignored.
    pub fn parse_set_cookie(header: &str) -> Option<Self> {
        let mut parts = header.split(';');
        let (name, value) = parts.next()?.split_once('=')?;
        let name = name.trim();
        if name.is_empty() {
            return None;
        }
        let mut cookie = Cookie::new(name, value.trim());

        for attr in parts {
            let (key, val) = match attr.split_once('=') {
                Some((k, v)) => (k.trim(), Some(v.trim())),
                None => (attr.trim(), None),
            };
            match (key.to_ascii_lowercase().as_str(), val) {
                ("path", Some(v)) => cookie.path = Some(v.to_string()),
                ("domain", Some(v)) => cookie.domain = Some(v.to_string()),
                ("max-age", Some(v)) => cookie.max_age = v.parse().ok(),
                ("expires", Some(v)) => {
                    cookie.expires = DateTime::parse_from_rfc2822(v)
                        .ok()
                        .map(|dt| dt.with_timezone(&Utc));
                }
                ("samesite", Some(v)) => cookie.same_site = SameSite::parse(v),
                ("secure", _) => cookie.secure = true,
                ("httponly", _) => cookie.http_only = true,
                _ => {}
            }
        }

        Some(cookie)
    }

    /// Cookie that instructs the client to drop `name`
    pub fn removal(name: impl Into<String>) -> Self {
        let mut cookie = Self::new(name, "").max_age(0);
        cookie.expires = Utc.timestamp_opt(0, 0).single();
        cookie
    }
}

/// Cookies sent by the client
#[derive(Debug, Default, Clone)]
pub struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse cookies from a Cookie header. Later duplicates win.
    pub fn parse(header: &str) -> Self {
        let mut jar = Self::new();

        for part in header.split(';') {
            if let Some((name, value)) = part.trim().split_once('=') {
                let name = name.trim();
                if name.is_empty() {
                    continue;
                }
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .unwrap_or(value);
                jar.cookies.insert(name.to_string(), value.to_string());
            }
        }

        jar
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cookies.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.cookies
    }
}
