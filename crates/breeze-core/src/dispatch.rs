//! Dispatch and middleware engines
//!
//! [`App`] owns the frozen registry and the pending-operation ledger. It
//! answers the two boundary calls:
//!
//! - `dispatch_request`: resolve `METHOD:registeredPath` and run the handler
//! - `dispatch_middleware`: run every middleware whose pattern matches the
//!   live path, in registration order
//!
//! Work that completes in place is returned immediately. Deferred work is
//! parked on the ledger and the caller gets an async marker; the settlement
//! arrives later through the [`NativeBridge`]. The `*_async` variants await
//! deferred work inline instead.
//!
//! A middleware that defers does not end the chain: once it settles, the
//! remaining middleware run inside the same pending operation and the final
//! chain result is what gets reported.

use crate::bridge::NativeBridge;
use crate::cancel::CancellationToken;
use crate::config::AppConfig;
use crate::handler::{BoxFuture, BoxedHandler, Outcome, Reply};
use crate::middleware::{BoxedMiddleware, Exchange, Next, Step};
use crate::pending::{Computation, OperationId, PendingKind, PendingLedger};
use crate::router::{Registry, Router};
use crate::wire::{encode, AsyncMarker, Dispatched, WireMiddlewareResult, WireRequest, WireResponse};
use crate::{Error, Request, Response};
use futures_util::FutureExt;
use serde_json::{Map, Value};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

const INTERNAL_ERROR: &str = "Internal Server Error";

/// How a middleware chain ended
enum ChainEnd {
    Continue,
    Stop,
    Failed(Error),
}

enum ChainState {
    Finished(ChainEnd),
    /// Middleware at `resume_at - 1` deferred
    Deferred {
        resume_at: usize,
        future: BoxFuture<crate::Result<Exchange>>,
    },
}

/// Run `chain[start..]` synchronously until it ends or a middleware defers
fn run_chain(chain: &[BoxedMiddleware], start: usize, req: &mut Request, res: &mut Response) -> ChainState {
    for (index, middleware) in chain.iter().enumerate().skip(start) {
        let step = match panic::catch_unwind(AssertUnwindSafe(|| middleware.call(req, res))) {
            Ok(step) => step,
            Err(payload) => return ChainState::Finished(ChainEnd::Failed(Error::from_panic(payload))),
        };
        match step {
            Step::Ready(Ok(Next::Continue)) => {}
            Step::Ready(Ok(Next::Stop)) => return ChainState::Finished(ChainEnd::Stop),
            Step::Ready(Err(err)) => return ChainState::Finished(ChainEnd::Failed(err)),
            Step::Pending(future) => {
                return ChainState::Deferred {
                    resume_at: index + 1,
                    future,
                }
            }
        }
    }
    ChainState::Finished(ChainEnd::Continue)
}

/// Await a deferred middleware, adopt its exchange and keep running the
/// chain until it ends. Once the request token fires (timeout or abort)
/// no further middleware runs.
async fn resume_chain(
    chain: Vec<BoxedMiddleware>,
    mut resume_at: usize,
    mut future: BoxFuture<crate::Result<Exchange>>,
    mut req: Request,
    mut res: Response,
) -> (ChainEnd, Request, Response) {
    loop {
        match AssertUnwindSafe(future).catch_unwind().await {
            Err(payload) => return (ChainEnd::Failed(Error::from_panic(payload)), req, res),
            Ok(Err(err)) => return (ChainEnd::Failed(err), req, res),
            Ok(Ok(exchange)) => {
                req = exchange.request;
                res = exchange.response;
                if exchange.next == Next::Stop {
                    return (ChainEnd::Stop, req, res);
                }
            }
        }
        if req.is_aborted() {
            tracing::debug!(path = %req.path, remaining = chain.len() - resume_at, "request settled, chain dropped");
            return (ChainEnd::Failed(Error::Aborted), req, res);
        }
        match run_chain(&chain, resume_at, &mut req, &mut res) {
            ChainState::Finished(end) => return (end, req, res),
            ChainState::Deferred { resume_at: next, future: pending } => {
                resume_at = next;
                future = pending;
            }
        }
    }
}

/// Message safe to hand to the client for a failure in user code
fn public_message(err: &Error, expose_errors: bool) -> String {
    if expose_errors {
        err.to_string()
    } else {
        INTERNAL_ERROR.to_string()
    }
}

fn handler_failure(err: &Error, expose_errors: bool) -> WireResponse {
    WireResponse::plain(500, public_message(err, expose_errors))
}

fn chain_result(end: ChainEnd, req: Request, res: Response, expose_errors: bool) -> WireMiddlewareResult {
    let (should_continue, error) = match end {
        ChainEnd::Continue => (true, None),
        ChainEnd::Stop => (false, None),
        ChainEnd::Failed(err) => {
            let message = match err {
                // `next(err)` messages are part of the contract
                Error::Handler(message) => message,
                err @ Error::Panicked(_) => public_message(&err, expose_errors),
                other => other.to_string(),
            };
            tracing::debug!(path = %req.path, error = %message, "middleware chain halted");
            (false, Some(message))
        }
    };
    WireMiddlewareResult {
        should_continue,
        error,
        response: res.into_wire(req.into_custom_params()),
    }
}

/// Boundary form of an async handler's reply; `params` are used when the
/// handler kept its request
fn reply_wire(reply: Reply, params: Map<String, Value>) -> WireResponse {
    let params = reply.request.map_or(params, Request::into_custom_params);
    reply.response.into_wire(params)
}

/// Invoke a handler, turning a panic into a failed outcome
fn invoke(handler: &BoxedHandler, req: &mut Request, res: &mut Response) -> Outcome {
    panic::catch_unwind(AssertUnwindSafe(|| handler.call(req, res)))
        .unwrap_or_else(|payload| Outcome::Ready(Err(Error::from_panic(payload))))
}

/// A request ready for its handler
struct Prepared {
    handler: BoxedHandler,
    req: Request,
    res: Response,
    token: CancellationToken,
}

/// Dispatch bridge application
pub struct App {
    registry: Arc<Registry>,
    config: AppConfig,
    ledger: Arc<PendingLedger>,
}

impl App {
    /// Freeze `router` and announce its routes and middleware patterns to
    /// the native layer
    pub fn new(router: Router, config: AppConfig, bridge: Arc<dyn NativeBridge>) -> Self {
        let registry = Arc::new(router.into_registry());
        for (method, path) in registry.routes() {
            bridge.register_route(method.as_str(), path);
        }
        for pattern in registry.patterns() {
            bridge.register_middleware(pattern);
        }
        tracing::info!(
            routes = registry.route_count(),
            middleware = registry.middleware_count(),
            "app registered"
        );

        Self {
            registry,
            config,
            ledger: Arc::new(PendingLedger::new(bridge)),
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Number of parked operations
    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.ledger.contains(&OperationId::from(id))
    }

    /// Abort a parked operation (the client went away). Returns false if
    /// it already settled.
    pub fn cancel_pending(&self, id: &str) -> bool {
        self.ledger.cancel(&OperationId::from(id))
    }

    // Boundary entry points

    /// Handle a serialized request. `timeout_ms` of 0 uses the configured
    /// default.
    pub fn dispatch_request(&self, json: &str, timeout_ms: u64) -> String {
        match serde_json::from_str::<WireRequest>(json) {
            Ok(wire) => encode(&self.handle_request(wire, self.config.timeout_for(timeout_ms))),
            Err(err) => {
                tracing::warn!(error = %err, "invalid request payload");
                encode(&WireResponse::invalid_payload())
            }
        }
    }

    /// Run the middleware chain for a serialized request
    pub fn dispatch_middleware(&self, json: &str, timeout_ms: u64) -> String {
        match serde_json::from_str::<WireRequest>(json) {
            Ok(wire) => encode(&self.handle_middleware(wire, self.config.timeout_for(timeout_ms))),
            Err(err) => {
                tracing::warn!(error = %err, "invalid middleware payload");
                encode(&WireMiddlewareResult::failed(
                    "Invalid request JSON",
                    WireResponse::invalid_payload(),
                ))
            }
        }
    }

    /// Like [`dispatch_request`](Self::dispatch_request), awaiting deferred
    /// handlers inline
    pub async fn dispatch_request_async(&self, json: &str, timeout_ms: u64) -> String {
        match serde_json::from_str::<WireRequest>(json) {
            Ok(wire) => encode(
                &self
                    .handle_request_async(wire, self.config.timeout_for(timeout_ms))
                    .await,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "invalid request payload");
                encode(&WireResponse::invalid_payload())
            }
        }
    }

    /// Like [`dispatch_middleware`](Self::dispatch_middleware), awaiting
    /// deferred middleware inline
    pub async fn dispatch_middleware_async(&self, json: &str, timeout_ms: u64) -> String {
        match serde_json::from_str::<WireRequest>(json) {
            Ok(wire) => encode(
                &self
                    .handle_middleware_async(wire, self.config.timeout_for(timeout_ms))
                    .await,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "invalid middleware payload");
                encode(&WireMiddlewareResult::failed(
                    "Invalid request JSON",
                    WireResponse::invalid_payload(),
                ))
            }
        }
    }

    // Typed entry points

    fn prepare(&self, wire: WireRequest) -> std::result::Result<Prepared, WireResponse> {
        let Some(handler) = self.registry.handler(&wire.method, wire.route_path()).cloned() else {
            tracing::debug!(method = %wire.method, path = %wire.route_path(), "no handler registered");
            return Err(WireResponse::not_found());
        };

        let token = CancellationToken::new();
        let req = match Request::from_wire(wire, token.clone()) {
            Ok(req) => req,
            Err(err) => {
                tracing::warn!(error = %err, "invalid request payload");
                return Err(WireResponse::invalid_payload());
            }
        };
        if self.config.log_requests {
            tracing::info!(method = %req.method, path = %req.path, "dispatch request");
        }
        let res = Response::for_request(req.cookies.clone());
        Ok(Prepared { handler, req, res, token })
    }

    /// Run the handler registered for the request.
    ///
    /// Returns the final response, or an async marker when the handler
    /// deferred; the deferred result is reported through the bridge.
    pub fn handle_request(&self, wire: WireRequest, timeout: Duration) -> Dispatched<WireResponse> {
        let Prepared { handler, mut req, mut res, token } = match self.prepare(wire) {
            Ok(prepared) => prepared,
            Err(response) => return Dispatched::Completed(response),
        };
        let expose = self.config.expose_errors;

        match invoke(&handler, &mut req, &mut res) {
            Outcome::Ready(Ok(())) => Dispatched::Completed(res.into_wire(req.into_custom_params())),
            Outcome::Ready(Err(err)) => {
                tracing::error!(method = %req.method, path = %req.path, error = %err, "handler failed");
                Dispatched::Completed(handler_failure(&err, expose))
            }
            Outcome::Pending(future) => {
                let method = req.method;
                let path = req.path.clone();
                let params = req.into_custom_params();
                let computation: Computation = Box::pin(async move {
                    match future.await {
                        Ok(reply) => Ok(encode(&reply_wire(reply, params))),
                        Err(err) => {
                            tracing::error!(method = %method, path = %path, error = %err, "async handler failed");
                            Err(Error::Handler(public_message(&err, expose)))
                        }
                    }
                });
                match self.ledger.register(PendingKind::Handler, computation, timeout, token) {
                    Ok(id) => Dispatched::Started(AsyncMarker::started(id)),
                    Err(err) => {
                        tracing::error!(error = %err, "cannot defer handler");
                        Dispatched::Completed(WireResponse::internal_error())
                    }
                }
            }
        }
    }

    /// Run the handler, awaiting deferred work inline. A deadline miss
    /// yields 408 `Request Timeout`.
    pub async fn handle_request_async(&self, wire: WireRequest, timeout: Duration) -> WireResponse {
        let Prepared { handler, mut req, mut res, token } = match self.prepare(wire) {
            Ok(prepared) => prepared,
            Err(response) => return response,
        };
        let expose = self.config.expose_errors;

        let future = match invoke(&handler, &mut req, &mut res) {
            Outcome::Ready(Ok(())) => return res.into_wire(req.into_custom_params()),
            Outcome::Ready(Err(err)) => {
                tracing::error!(method = %req.method, path = %req.path, error = %err, "handler failed");
                return handler_failure(&err, expose);
            }
            Outcome::Pending(future) => future,
        };

        tokio::select! {
            settled = AssertUnwindSafe(future).catch_unwind() => match settled {
                Ok(Ok(reply)) => reply_wire(reply, req.into_custom_params()),
                Ok(Err(err)) => {
                    tracing::error!(method = %req.method, path = %req.path, error = %err, "async handler failed");
                    handler_failure(&err, expose)
                }
                Err(payload) => {
                    let err = Error::from_panic(payload);
                    tracing::error!(method = %req.method, path = %req.path, error = %err, "async handler panicked");
                    handler_failure(&err, expose)
                }
            },
            _ = tokio::time::sleep(timeout) => {
                let err = Error::Timeout(timeout);
                token.cancel(Some(err.to_string()));
                tracing::warn!(method = %req.method, path = %req.path, error = %err, "handler timed out");
                WireResponse::timeout()
            }
        }
    }

    fn prepare_chain(
        &self,
        wire: WireRequest,
    ) -> std::result::Result<(Request, Response, CancellationToken), WireMiddlewareResult> {
        let token = CancellationToken::new();
        let req = Request::from_wire(wire, token.clone()).map_err(|err| {
            tracing::warn!(error = %err, "invalid middleware payload");
            WireMiddlewareResult::failed(err.to_string(), WireResponse::invalid_payload())
        })?;
        if self.config.log_requests {
            tracing::info!(method = %req.method, path = %req.path, "dispatch middleware");
        }
        let res = Response::for_request(req.cookies.clone());
        Ok((req, res, token))
    }

    /// Run the middleware chain for the request's live path.
    ///
    /// Returns the chain result, or an async marker when a middleware
    /// deferred; the rest of the chain then runs in the pending operation.
    pub fn handle_middleware(&self, wire: WireRequest, timeout: Duration) -> Dispatched<WireMiddlewareResult> {
        let (mut req, mut res, token) = match self.prepare_chain(wire) {
            Ok(prepared) => prepared,
            Err(result) => return Dispatched::Completed(result),
        };
        let expose = self.config.expose_errors;
        let chain = self.registry.chain_for(&req.path);

        match run_chain(&chain, 0, &mut req, &mut res) {
            ChainState::Finished(end) => Dispatched::Completed(chain_result(end, req, res, expose)),
            ChainState::Deferred { resume_at, future } => {
                let computation: Computation = Box::pin(async move {
                    let (end, req, res) = resume_chain(chain, resume_at, future, req, res).await;
                    Ok(encode(&chain_result(end, req, res, expose)))
                });
                match self.ledger.register(PendingKind::Middleware, computation, timeout, token) {
                    Ok(id) => Dispatched::Started(AsyncMarker::started(id)),
                    Err(err) => {
                        tracing::error!(error = %err, "cannot defer middleware");
                        Dispatched::Completed(WireMiddlewareResult::failed(
                            INTERNAL_ERROR,
                            WireResponse::internal_error(),
                        ))
                    }
                }
            }
        }
    }

    /// Run the middleware chain, awaiting deferred middleware inline. A
    /// deadline miss halts the chain with the timeout error.
    pub async fn handle_middleware_async(&self, wire: WireRequest, timeout: Duration) -> WireMiddlewareResult {
        let (mut req, mut res, token) = match self.prepare_chain(wire) {
            Ok(prepared) => prepared,
            Err(result) => return result,
        };
        let expose = self.config.expose_errors;
        let chain = self.registry.chain_for(&req.path);

        let (resume_at, future) = match run_chain(&chain, 0, &mut req, &mut res) {
            ChainState::Finished(end) => return chain_result(end, req, res, expose),
            ChainState::Deferred { resume_at, future } => (resume_at, future),
        };

        let path = req.path.clone();
        tokio::select! {
            (end, req, res) = resume_chain(chain, resume_at, future, req, res) => {
                chain_result(end, req, res, expose)
            }
            _ = tokio::time::sleep(timeout) => {
                let err = Error::Timeout(timeout);
                token.cancel(Some(err.to_string()));
                tracing::warn!(path = %path, error = %err, "middleware timed out");
                WireMiddlewareResult::failed(err.to_string(), WireResponse::timeout())
            }
        }
    }
}
