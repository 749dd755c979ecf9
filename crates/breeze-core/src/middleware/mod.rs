//! Middleware contract and built-in middleware
//!
//! A middleware sees the same mutable request/response pair as every other
//! middleware in the chain and decides how the chain proceeds:
//! - `Ok(Next::Continue)` is `next()`
//! - `Err(e)` is `next(e)`: the chain halts and reports `e`
//! - `Ok(Next::Stop)` ends the chain; the middleware answered the request
//! - [`Step::Pending`] defers; the chain resumes when the future settles

pub mod cors;
pub mod logger;
pub mod request_id;

pub use cors::{Cors, CorsConfig};
pub use logger::Logger;
pub use request_id::{
    generate_counter_id, generate_nano_id, generate_short_id, generate_uuid, IdGenerator,
    RequestId, RequestIdConfig,
};

use crate::handler::BoxFuture;
use crate::{Request, Response, Result};
use std::future::Future;
use std::sync::Arc;

/// How the chain proceeds after a middleware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Continue,
    Stop,
}

/// Request/response pair handed back by a deferred middleware
#[derive(Debug)]
pub struct Exchange {
    pub request: Request,
    pub response: Response,
    pub next: Next,
}

impl Exchange {
    /// Continue the chain with the (possibly modified) pair
    pub fn next(request: Request, response: Response) -> Self {
        Self { request, response, next: Next::Continue }
    }

    /// End the chain with this response
    pub fn stop(request: Request, response: Response) -> Self {
        Self { request, response, next: Next::Stop }
    }
}

/// What a middleware produced
pub enum Step {
    Ready(Result<Next>),
    Pending(BoxFuture<Result<Exchange>>),
}

impl From<Result<Next>> for Step {
    fn from(result: Result<Next>) -> Self {
        Step::Ready(result)
    }
}

/// Middleware trait
pub trait Middleware: Send + Sync + 'static {
    fn call(&self, req: &mut Request, res: &mut Response) -> Step;
}

/// Shared middleware reference stored in the registry
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Wraps `Fn(&mut Request, &mut Response) -> Result<Next>`
pub struct SyncMiddleware<F>(pub F);

impl<F> Middleware for SyncMiddleware<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<Next> + Send + Sync + 'static,
{
    fn call(&self, req: &mut Request, res: &mut Response) -> Step {
        Step::Ready((self.0)(req, res))
    }
}

/// Wraps `Fn(Request, Response) -> impl Future<Output = Result<Exchange>>`
pub struct AsyncMiddleware<F>(pub F);

impl<F, Fut> Middleware for AsyncMiddleware<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Exchange>> + Send + 'static,
{
    fn call(&self, req: &mut Request, res: &mut Response) -> Step {
        Step::Pending(Box::pin((self.0)(req.clone(), res.clone())))
    }
}
