//! Handler and middleware registries
//!
//! A [`Router`] collects handlers keyed `METHOD:path` and middleware lists
//! keyed by path pattern. Sub-routers are composed with [`Router::mount`].
//! The finished router is frozen into a read-only [`Registry`] when the
//! [`App`](crate::App) is built.
//!
//! ```
//! use breeze_core::{Next, Router};
//!
//! let mut api = Router::new();
//! api.get("/users", |_req, res| {
//!     res.json(&["alice", "bob"])?;
//!     Ok(())
//! });
//!
//! let mut root = Router::new();
//! root.use_fn("*", |req, _res| {
//!     req.set_param("timestamp", 1700000000);
//!     Ok(Next::Continue)
//! });
//! root.mount("/api", api);
//!
//! let registry = root.into_registry();
//! assert!(registry.handler("GET", "/api/users").is_some());
//! ```

use crate::handler::{AsyncFn, BoxedHandler, Handler, IntoReply, SyncFn};
use crate::middleware::{AsyncMiddleware, BoxedMiddleware, Exchange, Middleware, Next, SyncMiddleware};
use crate::{Method, Request, Response, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

/// Pattern matching every path
pub const GLOBAL_PATTERN: &str = "*";

fn handler_key(method: Method, path: &str) -> String {
    format!("{}:{}", method.as_str(), path)
}

struct Route {
    method: Method,
    path: String,
    handler: BoxedHandler,
}

/// Compiled middleware pattern
#[derive(Debug, Clone)]
enum PathPattern {
    Any,
    Glob(glob::Pattern),
    /// Not a valid glob; compared verbatim
    Literal(String),
}

impl PathPattern {
    fn compile(pattern: &str) -> Self {
        if pattern == GLOBAL_PATTERN {
            return PathPattern::Any;
        }
        match glob::Pattern::new(pattern) {
            Ok(glob) => PathPattern::Glob(glob),
            Err(err) => {
                tracing::warn!(pattern, error = %err, "invalid middleware pattern, matching literally");
                PathPattern::Literal(pattern.to_string())
            }
        }
    }

    fn matches(&self, path: &str) -> bool {
        match self {
            PathPattern::Any => true,
            PathPattern::Glob(glob) => glob.matches(path),
            PathPattern::Literal(literal) => literal == path,
        }
    }
}

struct MiddlewareGroup {
    pattern: String,
    matcher: PathPattern,
    list: Vec<BoxedMiddleware>,
}

macro_rules! method_shorthands {
    ($($(#[$doc:meta])* $sync_name:ident, $async_name:ident => $method:expr;)*) => {
        $(
            $(#[$doc])*
            pub fn $sync_name<F>(&mut self, path: &str, handler: F) -> &mut Self
            where
                F: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
            {
                self.route($method, path, SyncFn(handler))
            }

            $(#[$doc])*
            pub fn $async_name<F, Fut, R>(&mut self, path: &str, handler: F) -> &mut Self
            where
                F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = Result<R>> + Send + 'static,
                R: IntoReply,
            {
                self.route($method, path, AsyncFn(handler))
            }
        )*
    };
}

/// Route and middleware builder
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    middleware: Vec<MiddlewareGroup>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route; an existing `METHOD:path` entry is replaced
    pub fn route<H: Handler>(&mut self, method: Method, path: &str, handler: H) -> &mut Self {
        self.route_boxed(method, path, Arc::new(handler))
    }

    pub fn route_boxed(&mut self, method: Method, path: &str, handler: BoxedHandler) -> &mut Self {
        if let Some(existing) = self
            .routes
            .iter_mut()
            .find(|r| r.method == method && r.path == path)
        {
            tracing::debug!(method = %method, path, "replacing route handler");
            existing.handler = handler;
        } else {
            self.routes.push(Route {
                method,
                path: path.to_string(),
                handler,
            });
        }
        self
    }

    /// Add an async route for any method
    pub fn route_async<F, Fut, R>(&mut self, method: Method, path: &str, handler: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: IntoReply,
    {
        self.route(method, path, AsyncFn(handler))
    }

    method_shorthands! {
        /// Add a GET route
        get, get_async => Method::Get;
        /// Add a POST route
        post, post_async => Method::Post;
        /// Add a PUT route
        put, put_async => Method::Put;
        /// Add a DELETE route
        delete, delete_async => Method::Delete;
        /// Add a PATCH route
        patch, patch_async => Method::Patch;
        /// Add a HEAD route
        head, head_async => Method::Head;
        /// Add an OPTIONS route
        options, options_async => Method::Options;
    }

    /// Append middleware to the list for `pattern`
    pub fn use_middleware<M: Middleware>(&mut self, pattern: &str, middleware: M) -> &mut Self {
        self.use_boxed(pattern, Arc::new(middleware))
    }

    pub fn use_boxed(&mut self, pattern: &str, middleware: BoxedMiddleware) -> &mut Self {
        match self.middleware.iter_mut().find(|g| g.pattern == pattern) {
            Some(group) => group.list.push(middleware),
            None => self.middleware.push(MiddlewareGroup {
                pattern: pattern.to_string(),
                matcher: PathPattern::compile(pattern),
                list: vec![middleware],
            }),
        }
        self
    }

    /// Append middleware that runs for every path
    pub fn use_global<M: Middleware>(&mut self, middleware: M) -> &mut Self {
        self.use_middleware(GLOBAL_PATTERN, middleware)
    }

    pub fn use_fn<F>(&mut self, pattern: &str, middleware: F) -> &mut Self
    where
        F: Fn(&mut Request, &mut Response) -> Result<Next> + Send + Sync + 'static,
    {
        self.use_middleware(pattern, SyncMiddleware(middleware))
    }

    pub fn use_async<F, Fut>(&mut self, pattern: &str, middleware: F) -> &mut Self
    where
        F: Fn(Request, Response) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Exchange>> + Send + 'static,
    {
        self.use_middleware(pattern, AsyncMiddleware(middleware))
    }

    /// Merge `router` under `prefix`.
    ///
    /// Handlers land at `{prefix}{path}`; middleware patterns become
    /// `{prefix}{pattern}`, and the global pattern becomes `{prefix}/*`.
    pub fn mount(&mut self, prefix: &str, router: Router) -> &mut Self {
        let prefix = prefix.trim_end_matches('/');
        for route in router.routes {
            let path = format!("{}{}", prefix, route.path);
            self.route_boxed(route.method, &path, route.handler);
        }
        for group in router.middleware {
            let pattern = if group.pattern == GLOBAL_PATTERN {
                format!("{}/*", prefix)
            } else {
                format!("{}{}", prefix, group.pattern)
            };
            for middleware in group.list {
                self.use_boxed(&pattern, middleware);
            }
        }
        self
    }

    /// Freeze into a read-only registry
    pub fn into_registry(self) -> Registry {
        let mut handlers = HashMap::with_capacity(self.routes.len());
        let mut routes = Vec::with_capacity(self.routes.len());
        for route in self.routes {
            handlers.insert(handler_key(route.method, &route.path), route.handler);
            routes.push((route.method, route.path));
        }
        Registry {
            handlers,
            routes,
            middleware: self.middleware,
        }
    }
}

/// Frozen handler and middleware registries
pub struct Registry {
    handlers: HashMap<String, BoxedHandler>,
    routes: Vec<(Method, String)>,
    middleware: Vec<MiddlewareGroup>,
}

impl Registry {
    /// Handler registered for exactly `method` and `path`
    pub fn handler(&self, method: &str, path: &str) -> Option<&BoxedHandler> {
        let method: Method = method.parse().ok()?;
        self.handlers.get(&handler_key(method, path))
    }

    /// Registered `(method, path)` pairs in registration order
    pub fn routes(&self) -> impl Iterator<Item = (Method, &str)> {
        self.routes.iter().map(|(m, p)| (*m, p.as_str()))
    }

    /// Middleware patterns in registration order
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.middleware.iter().map(|g| g.pattern.as_str())
    }

    /// Middleware applying to `path`: matching patterns in registration
    /// order, each list in its own order
    pub fn chain_for(&self, path: &str) -> Vec<BoxedMiddleware> {
        self.middleware
            .iter()
            .filter(|g| g.matcher.matches(path))
            .flat_map(|g| g.list.iter().cloned())
            .collect()
    }

    pub fn route_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn middleware_count(&self) -> usize {
        self.middleware.iter().map(|g| g.list.len()).sum()
    }
}
