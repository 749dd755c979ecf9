//! Route handlers
//!
//! Handlers are stored as `Arc<dyn Handler>` and invoked with the request
//! and response façades. A handler either finishes in place
//! ([`Outcome::Ready`]) or hands back a future that owns copies of both
//! ([`Outcome::Pending`]); the dispatch engine parks pending work on the
//! pending-operation ledger.
//!
//! An async handler that changes custom params returns the request along
//! with the response; returning only the response keeps the params the
//! handler was called with.

use crate::{Request, Response, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Heap-allocated future driven by the tokio runtime
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// What a handler produced
pub enum Outcome {
    /// Completed synchronously; the response was filled in place
    Ready(Result<()>),
    /// Completes later with the final response
    Pending(BoxFuture<Result<Reply>>),
}

/// Final state of an async handler
#[derive(Debug)]
pub struct Reply {
    /// Set when the handler handed its request back
    pub request: Option<Request>,
    pub response: Response,
}

/// Values an async handler may resolve to
pub trait IntoReply: Send + 'static {
    fn into_reply(self) -> Reply;
}

impl IntoReply for Response {
    fn into_reply(self) -> Reply {
        Reply { request: None, response: self }
    }
}

impl IntoReply for (Request, Response) {
    fn into_reply(self) -> Reply {
        Reply { request: Some(self.0), response: self.1 }
    }
}

impl From<Result<()>> for Outcome {
    fn from(result: Result<()>) -> Self {
        Outcome::Ready(result)
    }
}

/// Route handler
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: &mut Request, res: &mut Response) -> Outcome;
}

/// Shared handler reference stored in the registry
pub type BoxedHandler = Arc<dyn Handler>;

/// Wraps `Fn(&mut Request, &mut Response) -> Result<()>`
pub struct SyncFn<F>(pub F);

impl<F> Handler for SyncFn<F>
where
    F: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
{
    fn call(&self, req: &mut Request, res: &mut Response) -> Outcome {
        Outcome::Ready((self.0)(req, res))
    }
}

/// Wraps `Fn(Request, Response) -> impl Future<Output = Result<R>>` where
/// `R` is a [`Response`] or a `(Request, Response)` pair
///
/// The future receives clones of the façades; the cancellation token is
/// shared, so `req.sleep()` still observes the request deadline.
pub struct AsyncFn<F>(pub F);

impl<F, Fut, R> Handler for AsyncFn<F>
where
    F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    R: IntoReply,
{
    fn call(&self, req: &mut Request, res: &mut Response) -> Outcome {
        let future = (self.0)(req.clone(), res.clone());
        Outcome::Pending(Box::pin(async move { Ok(future.await?.into_reply()) }))
    }
}

/// Handler answering every request with a fixed JSON value
pub struct StaticJson(pub serde_json::Value);

impl Handler for StaticJson {
    fn call(&self, _req: &mut Request, res: &mut Response) -> Outcome {
        Outcome::Ready(res.json(&self.0).map(|_| ()))
    }
}
