//! breeze-core: Request/middleware dispatch bridge
//!
//! The native layer owns sockets and HTTP parsing; this crate owns
//! everything after the request is matched. It keeps the handler and
//! middleware registries, runs middleware chains and handlers against
//! request/response façades, and bridges deferred (async) work back to the
//! caller through a ledger of pending operations with per-request
//! cancellation and timeouts.
//!
//! ## Layers
//! - façade: [`Request`], [`Response`], cookies
//! - registries: [`Router`] frozen into a [`Registry`]
//! - engines: [`App`] (`dispatch_request`, `dispatch_middleware`)
//! - pending bridge: [`PendingLedger`] reporting through [`NativeBridge`]
//! - host: [`LocalHost`], an in-process native side

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod bridge;
pub mod cancel;
pub mod config;
pub mod cookie;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod host;
pub mod middleware;
pub mod pending;
pub mod request;
pub mod response;
pub mod router;
pub mod wire;

// Re-exports
pub use bridge::{ChannelBridge, NativeBridge, Settlement};
pub use cancel::CancellationToken;
pub use config::{AppConfig, DEFAULT_REQUEST_TIMEOUT_MS};
pub use cookie::{Cookie, CookieJar, CookieOptions, SameSite};
pub use dispatch::App;
pub use error::{Error, Result};
pub use handler::{
    AsyncFn, BoxFuture, BoxedHandler, Handler, IntoReply, Outcome, Reply, StaticJson, SyncFn,
};
pub use host::{HostRequest, LocalHost};
pub use pending::{OperationId, PendingKind, PendingLedger};
pub use request::{BinaryBody, Body, Method, Request};
pub use response::{HeaderValue, Response, ResponseBody, StatusCode};
pub use router::{Registry, Router, GLOBAL_PATTERN};
pub use wire::{AsyncMarker, Dispatched, WireBody, WireMiddlewareResult, WireRequest, WireResponse};

// Middleware re-exports
pub use middleware::{
    AsyncMiddleware, BoxedMiddleware, Cors, CorsConfig, Exchange, Logger, Middleware, Next,
    RequestId, RequestIdConfig, Step, SyncMiddleware,
};
