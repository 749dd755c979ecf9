//! Request logging middleware

use super::{Middleware, Next, Step};
use crate::{Request, Response};

/// Logs each request passing through the chain at `info` level
#[derive(Debug, Clone, Default)]
pub struct Logger {
    /// Include the request id param when present
    pub with_request_id: bool,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_id(mut self) -> Self {
        self.with_request_id = true;
        self
    }
}

impl Middleware for Logger {
    fn call(&self, req: &mut Request, _res: &mut Response) -> Step {
        let request_id = if self.with_request_id {
            req.get_param("requestId").and_then(|v| v.as_str())
        } else {
            None
        };
        tracing::info!(
            method = %req.method,
            path = %req.path,
            route = %req.registered_path,
            ip = %req.ip,
            request_id = request_id.unwrap_or("-"),
            "request"
        );
        Step::Ready(Ok(Next::Continue))
    }
}
