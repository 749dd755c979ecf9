//! Pending-operation ledger
//!
//! Deferred handler and middleware work is parked here under an
//! [`OperationId`]. Each operation gets its own supervising task that races
//! the computation against its deadline and its cancellation token. The
//! ledger entry is retired exactly once; whoever retires it (the supervisor
//! or [`PendingLedger::cancel`]) is the only party that reports to the
//! native bridge, so every id sees a single terminal outcome.

use crate::bridge::NativeBridge;
use crate::cancel::CancellationToken;
use crate::handler::BoxFuture;
use crate::{Error, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

static NEXT_OPERATION: AtomicU64 = AtomicU64::new(1);

/// Identifier handed to the native layer with the async marker
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(String);

impl OperationId {
    /// `op_{unix_millis}_{counter}`, unique within the process
    pub fn generate() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let counter = NEXT_OPERATION.fetch_add(1, Ordering::Relaxed);
        Self(format!("op_{}_{}", millis, counter))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for OperationId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for OperationId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What was deferred
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingKind {
    Handler,
    Middleware,
}

impl PendingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingKind::Handler => "handler",
            PendingKind::Middleware => "middleware",
        }
    }
}

/// Deferred computation; `Ok` is the encoded result JSON, `Err` is
/// reported as a failure with its message
pub type Computation = BoxFuture<Result<String>>;

struct PendingEntry {
    kind: PendingKind,
    token: CancellationToken,
    deadline: Instant,
}

/// Snapshot of a parked operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingInfo {
    pub kind: PendingKind,
    pub deadline: Instant,
}

enum Settlement {
    Result(String),
    Error(String),
}

/// Registry of in-flight deferred operations
pub struct PendingLedger {
    entries: Mutex<HashMap<OperationId, PendingEntry>>,
    bridge: Arc<dyn NativeBridge>,
}

impl PendingLedger {
    pub fn new(bridge: Arc<dyn NativeBridge>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            bridge,
        }
    }

    /// Park `computation` and start supervising it on the ambient runtime.
    ///
    /// Fails with [`Error::NoRuntime`] outside a tokio runtime; nothing is
    /// registered in that case.
    pub fn register(
        self: &Arc<Self>,
        kind: PendingKind,
        computation: Computation,
        timeout: Duration,
        token: CancellationToken,
    ) -> Result<OperationId> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let id = OperationId::generate();
        let deadline = Instant::now() + timeout;

        self.entries.lock().insert(
            id.clone(),
            PendingEntry {
                kind,
                token: token.clone(),
                deadline,
            },
        );
        tracing::debug!(
            operation_id = %id,
            kind = kind.as_str(),
            timeout_ms = timeout.as_millis() as u64,
            "pending operation registered"
        );

        let ledger = Arc::clone(self);
        let task_id = id.clone();
        runtime.spawn(async move {
            ledger.supervise(task_id, computation, timeout, deadline, token).await;
        });
        Ok(id)
    }

    async fn supervise(
        &self,
        id: OperationId,
        computation: Computation,
        timeout: Duration,
        deadline: Instant,
        token: CancellationToken,
    ) {
        // own task, so a panic surfaces as a JoinError and a timed out
        // computation keeps running detached once the handle is dropped
        let mut task = tokio::spawn(computation);

        let settlement = tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(Ok(json)) => Settlement::Result(json),
                Ok(Err(err)) => Settlement::Error(err.to_string()),
                Err(join_error) => {
                    tracing::error!(operation_id = %id, error = %join_error, "pending operation panicked");
                    Settlement::Error("Internal Server Error".to_string())
                }
            },
            _ = token.cancelled() => Settlement::Error(Error::Aborted.to_string()),
            _ = tokio::time::sleep_until(deadline) => {
                let err = Error::Timeout(timeout);
                token.cancel(Some(err.to_string()));
                Settlement::Error(err.to_string())
            }
        };

        let Some(entry) = self.retire(&id) else {
            tracing::debug!(operation_id = %id, "pending operation already settled");
            return;
        };

        match settlement {
            Settlement::Result(json) => {
                tracing::debug!(operation_id = %id, kind = entry.kind.as_str(), "pending operation resolved");
                self.bridge.report_result(&id, json);
            }
            Settlement::Error(message) => {
                tracing::warn!(
                    operation_id = %id,
                    kind = entry.kind.as_str(),
                    error = %message,
                    "pending operation failed"
                );
                self.bridge.report_error(&id, message);
            }
        }
    }

    /// Abort a parked operation: fires its token and reports
    /// `Request aborted`. Returns false if the id is unknown or already
    /// settled.
    pub fn cancel(&self, id: &OperationId) -> bool {
        let Some(entry) = self.retire(id) else {
            return false;
        };
        entry.token.cancel(Some(Error::Aborted.to_string()));
        tracing::info!(operation_id = %id, kind = entry.kind.as_str(), "pending operation aborted");
        self.bridge.report_error(id, Error::Aborted.to_string());
        true
    }

    fn retire(&self, id: &OperationId) -> Option<PendingEntry> {
        self.entries.lock().remove(id)
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.entries.lock().contains_key(id)
    }

    pub fn info(&self, id: &OperationId) -> Option<PendingInfo> {
        self.entries.lock().get(id).map(|entry| PendingInfo {
            kind: entry.kind,
            deadline: entry.deadline,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{ChannelBridge, Settlement as Reported};
    use tokio::sync::mpsc::error::TryRecvError;

    fn ledger() -> (Arc<PendingLedger>, tokio::sync::mpsc::UnboundedReceiver<Reported>) {
        let (bridge, rx) = ChannelBridge::new();
        (Arc::new(PendingLedger::new(bridge)), rx)
    }

    #[test]
    fn test_operation_ids_unique() {
        let a = OperationId::generate();
        let b = OperationId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("op_"));
        assert_eq!(a.as_str().split('_').count(), 3);
    }

    #[test]
    fn test_register_without_runtime() {
        let (ledger, _rx) = ledger();
        let err = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async { Ok::<_, Error>(String::new()) }),
                Duration::from_millis(10),
                CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoRuntime));
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_reported_once() {
        let (ledger, mut rx) = ledger();
        let id = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok::<_, Error>("{\"status\":200}".to_string())
                }),
                Duration::from_millis(1000),
                CancellationToken::new(),
            )
            .unwrap();

        assert!(ledger.contains(&id));
        assert_eq!(ledger.info(&id).map(|i| i.kind), Some(PendingKind::Handler));

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported, Reported::Result { id: id.clone(), json: "{\"status\":200}".to_string() });
        assert!(!ledger.contains(&id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_discards_late_result() {
        let (ledger, mut rx) = ledger();
        let token = CancellationToken::new();
        let id = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(2000)).await;
                    Ok::<_, Error>("late".to_string())
                }),
                Duration::from_millis(100),
                token.clone(),
            )
            .unwrap();

        let reported = rx.recv().await.unwrap();
        assert_eq!(
            reported,
            Reported::Error { id, message: "Request timeout after 100ms".to_string() }
        );
        assert!(token.is_cancelled());

        tokio::time::sleep(Duration::from_millis(5000)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fires_at_registered_deadline() {
        let (ledger, mut rx) = ledger();
        let id = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(1000)).await;
                    Ok::<_, Error>(String::new())
                }),
                Duration::from_millis(100),
                CancellationToken::new(),
            )
            .unwrap();
        let deadline = ledger.info(&id).unwrap().deadline;

        // the clock moves before the supervisor is first polled
        tokio::time::advance(Duration::from_millis(60)).await;

        let reported = rx.recv().await.unwrap();
        assert!(matches!(reported, Reported::Error { .. }));
        let fired = Instant::now();
        assert!(fired >= deadline);
        assert!(fired - deadline < Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_reports_abort_once() {
        let (ledger, mut rx) = ledger();
        let token = CancellationToken::new();
        let id = ledger
            .register(
                PendingKind::Middleware,
                Box::pin(async {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    Ok::<_, Error>("done".to_string())
                }),
                Duration::from_millis(1000),
                token.clone(),
            )
            .unwrap();

        assert!(ledger.cancel(&id));
        assert!(!ledger.cancel(&id));
        assert!(token.is_cancelled());

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported, Reported::Error { id, message: "Request aborted".to_string() });

        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_panic_reported_as_internal_error() {
        let (ledger, mut rx) = ledger();
        let id = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async {
                    if true {
                        panic!("boom");
                    }
                    Ok::<_, Error>(String::new())
                }),
                Duration::from_millis(1000),
                CancellationToken::new(),
            )
            .unwrap();

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported, Reported::Error { id, message: "Internal Server Error".to_string() });
    }

    #[tokio::test]
    async fn test_failure_message_forwarded() {
        let (ledger, mut rx) = ledger();
        let id = ledger
            .register(
                PendingKind::Handler,
                Box::pin(async { Err::<String, _>(Error::handler("db down")) }),
                Duration::from_millis(1000),
                CancellationToken::new(),
            )
            .unwrap();

        let reported = rx.recv().await.unwrap();
        assert_eq!(reported, Reported::Error { id, message: "db down".to_string() });
    }
}
