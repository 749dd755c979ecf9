//! Calls from the core into the native layer
//!
//! The native layer owns sockets and HTTP parsing. It learns which routes
//! and middleware patterns exist through the `register_*` calls and
//! receives the settlement of every deferred operation through
//! `report_result` / `report_error`.

use crate::pending::OperationId;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Native-side callbacks
pub trait NativeBridge: Send + Sync + 'static {
    /// A handler exists for `method` at the registered `path`
    fn register_route(&self, method: &str, path: &str);

    /// A middleware list exists for `pattern`
    fn register_middleware(&self, pattern: &str);

    /// A deferred operation resolved; `json` is the full dispatch result
    fn report_result(&self, id: &OperationId, json: String);

    /// A deferred operation failed, timed out or was aborted
    fn report_error(&self, id: &OperationId, message: String);
}

/// Terminal outcome of a deferred operation as seen by the native layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    Result { id: OperationId, json: String },
    Error { id: OperationId, message: String },
}

impl Settlement {
    pub fn id(&self) -> &OperationId {
        match self {
            Settlement::Result { id, .. } | Settlement::Error { id, .. } => id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Settlement::Error { .. })
    }
}

/// Bridge that records registrations and forwards settlements over a
/// channel
pub struct ChannelBridge {
    routes: Mutex<Vec<(String, String)>>,
    patterns: Mutex<Vec<String>>,
    tx: mpsc::UnboundedSender<Settlement>,
}

impl ChannelBridge {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Settlement>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let bridge = Arc::new(Self {
            routes: Mutex::new(Vec::new()),
            patterns: Mutex::new(Vec::new()),
            tx,
        });
        (bridge, rx)
    }

    /// `(method, path)` pairs in registration order
    pub fn routes(&self) -> Vec<(String, String)> {
        self.routes.lock().clone()
    }

    pub fn middleware_patterns(&self) -> Vec<String> {
        self.patterns.lock().clone()
    }

    fn forward(&self, settlement: Settlement) {
        if self.tx.send(settlement).is_err() {
            tracing::debug!("settlement receiver dropped");
        }
    }
}

impl NativeBridge for ChannelBridge {
    fn register_route(&self, method: &str, path: &str) {
        self.routes.lock().push((method.to_string(), path.to_string()));
    }

    fn register_middleware(&self, pattern: &str) {
        self.patterns.lock().push(pattern.to_string());
    }

    fn report_result(&self, id: &OperationId, json: String) {
        self.forward(Settlement::Result { id: id.clone(), json });
    }

    fn report_error(&self, id: &OperationId, message: String) {
        self.forward(Settlement::Error { id: id.clone(), message });
    }
}
