//! CORS (Cross-Origin Resource Sharing) middleware
//!
//! Adds CORS headers and answers preflight requests.

use super::{Middleware, Next, Step};
use crate::{Error, Method, Request, Response, StatusCode};
use smallvec::SmallVec;

/// CORS configuration
#[derive(Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = all)
    pub origins: SmallVec<[String; 4]>,
    /// Allowed methods
    pub methods: SmallVec<[Method; 8]>,
    /// Allowed headers
    pub headers: SmallVec<[String; 8]>,
    /// Exposed headers
    pub expose_headers: SmallVec<[String; 4]>,
    /// Allow credentials
    pub credentials: bool,
    /// Max age (seconds)
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: SmallVec::new(),
            methods: smallvec::smallvec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
                Method::Head,
                Method::Options,
            ],
            headers: smallvec::smallvec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Requested-With".to_string(),
            ],
            expose_headers: SmallVec::new(),
            credentials: false,
            max_age: 86400, // 24 hours
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn allow_method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.expose_headers.push(header.into());
        self
    }

    pub fn allow_credentials(mut self) -> Self {
        self.credentials = true;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }
}

/// CORS middleware
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Allow every origin
    pub fn permissive() -> Self {
        Self::new(CorsConfig::default())
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        self.config.origins.is_empty() || self.config.origins.iter().any(|o| o == origin || o == "*")
    }

    fn methods_string(&self) -> String {
        self.config
            .methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn add_cors_headers(&self, res: &mut Response, origin: &str) {
        // credentialed requests may not use the wildcard origin
        let origin_value = if self.config.origins.is_empty() && !self.config.credentials {
            "*".to_string()
        } else {
            origin.to_string()
        };
        res.set_header("Access-Control-Allow-Origin", origin_value);
        if !self.config.origins.is_empty() {
            res.append_header("Vary", "Origin");
        }

        if !self.config.expose_headers.is_empty() {
            res.set_header(
                "Access-Control-Expose-Headers",
                self.config.expose_headers.join(", "),
            );
        }

        if self.config.credentials {
            res.set_header("Access-Control-Allow-Credentials", "true");
        }
    }

    fn add_preflight_headers(&self, res: &mut Response) {
        res.set_header("Access-Control-Allow-Methods", self.methods_string());
        if !self.config.headers.is_empty() {
            res.set_header("Access-Control-Allow-Headers", self.config.headers.join(", "));
        }
        res.set_header("Access-Control-Max-Age", self.config.max_age.to_string());
    }
}

impl Middleware for Cors {
    fn call(&self, req: &mut Request, res: &mut Response) -> Step {
        let Some(origin) = req.get_header("origin").filter(|o| !o.is_empty()) else {
            // same-origin request
            return Step::Ready(Ok(Next::Continue));
        };

        if !self.is_origin_allowed(origin) {
            res.status(StatusCode::FORBIDDEN.as_u16());
            return Step::Ready(Err(Error::handler("CORS: Origin not allowed")));
        }

        self.add_cors_headers(res, origin);

        if req.method == Method::Options {
            self.add_preflight_headers(res);
            res.status(StatusCode::NO_CONTENT.as_u16()).text("");
            return Step::Ready(Ok(Next::Stop));
        }

        Step::Ready(Ok(Next::Continue))
    }
}
