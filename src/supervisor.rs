//! Fault supervisor. Intercepts uncaught faults at the workflow boundary.
//!
//! Faults are published on a process-wide broadcast channel. A mounted
//! supervisor listens on it, and for a resource-load fault schedules exactly
//! one recovery action after a fixed delay. Disposing the supervisor drops
//! its subscription.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const DEFAULT_FAULT_CAPACITY: usize = 64;

/// Markers of a failed fetch of a lazily loaded resource.
const RESOURCE_LOAD_MARKERS: &[&str] = &[
    "chunkloaderror",
    "loading chunk",
    "loading css chunk",
    "failed to fetch dynamically imported module",
    "error loading dynamically imported module",
    "importing a module script failed",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// A resource failed to load; recoverable by reloading.
    ResourceLoad { message: String },
    Generic { message: String },
}

impl Fault {
    pub fn message(&self) -> &str {
        match self {
            Self::ResourceLoad { message } | Self::Generic { message } => message,
        }
    }

    pub fn is_resource_load(&self) -> bool {
        matches!(self, Self::ResourceLoad { .. })
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ResourceLoad { message } => write!(f, "resource load fault: {message}"),
            Self::Generic { message } => write!(f, "fault: {message}"),
        }
    }
}

pub fn classify_fault(message: impl Into<String>) -> Fault {
    let message = message.into();
    let lower = message.to_lowercase();
    if RESOURCE_LOAD_MARKERS.iter().any(|m| lower.contains(m)) {
        Fault::ResourceLoad { message }
    } else {
        Fault::Generic { message }
    }
}

/// Broadcast channel carrying faults to every mounted supervisor.
pub struct FaultChannel {
    tx: broadcast::Sender<Fault>,
}

static GLOBAL_CHANNEL: LazyLock<FaultChannel> = LazyLock::new(FaultChannel::new);

impl Default for FaultChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultChannel {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_FAULT_CAPACITY);
        Self { tx }
    }

    /// The process-wide channel.
    pub fn global() -> &'static FaultChannel {
        &GLOBAL_CHANNEL
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Fault> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Classify and publish a fault. Returns the classified fault.
    pub fn report(&self, message: impl Into<String>) -> Fault {
        let fault = classify_fault(message);
        error!(fault = %fault, "Fault reported");
        // Ok if no supervisor is mounted
        let _ = self.tx.send(fault.clone());
        fault
    }
}

/// Report a fault on the process-wide channel.
pub fn report_fault(message: impl Into<String>) -> Fault {
    FaultChannel::global().report(message)
}

/// The action taken once after a resource-load fault.
#[async_trait]
pub trait Recovery: Send + Sync {
    async fn recover(&self, fault: &Fault);
}

/// A mounted supervisor. Dropping it has the same effect as `dispose()`.
pub struct FaultSupervisor {
    listener: Option<JoinHandle<()>>,
    last_fault: Arc<Mutex<Option<Fault>>>,
    recoveries: Arc<AtomicUsize>,
}

impl FaultSupervisor {
    /// Subscribe to `channel` and start listening.
    pub fn mount(
        channel: &FaultChannel,
        recovery: Arc<dyn Recovery>,
        reload_delay: Duration,
    ) -> Self {
        let mut rx = channel.subscribe();
        let last_fault = Arc::new(Mutex::new(None));
        let recoveries = Arc::new(AtomicUsize::new(0));

        let seen = last_fault.clone();
        let count = recoveries.clone();
        let listener = tokio::spawn(async move {
            let mut scheduled = false;
            loop {
                let fault = match rx.recv().await {
                    Ok(fault) => fault,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Fault supervisor lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                if let Ok(mut last) = seen.lock() {
                    *last = Some(fault.clone());
                }

                if !fault.is_resource_load() || scheduled {
                    continue;
                }
                scheduled = true;
                info!(
                    delay_ms = reload_delay.as_millis() as u64,
                    "Resource load fault, scheduling recovery"
                );
                tokio::time::sleep(reload_delay).await;
                count.fetch_add(1, Ordering::SeqCst);
                recovery.recover(&fault).await;
            }
        });

        info!("Fault supervisor mounted");
        Self {
            listener: Some(listener),
            last_fault,
            recoveries,
        }
    }

    pub fn last_fault(&self) -> Option<Fault> {
        self.last_fault.lock().ok().and_then(|f| f.clone())
    }

    /// How many recovery actions have run. At most one per mount.
    pub fn recoveries(&self) -> usize {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub fn is_mounted(&self) -> bool {
        self.listener.is_some()
    }

    /// Unsubscribe and cancel any pending recovery.
    pub fn dispose(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
            info!("Fault supervisor disposed");
        }
    }
}

impl Drop for FaultSupervisor {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Run a workflow, reporting its error or panic to `channel`.
pub async fn supervise<F, T, E>(channel: &FaultChannel, workflow: F) -> Result<T, Fault>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: fmt::Display,
{
    match AssertUnwindSafe(workflow).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(channel.report(e.to_string())),
        Err(payload) => Err(channel.report(panic_message(payload.as_ref()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingRecovery {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Recovery for CountingRecovery {
        async fn recover(&self, _: &Fault) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn classifies_resource_load_faults() {
        for msg in [
            "ChunkLoadError: Loading chunk 42 failed.",
            "Loading CSS chunk 7 failed",
            "TypeError: Failed to fetch dynamically imported module: /assets/x.js",
        ] {
            assert!(classify_fault(msg).is_resource_load(), "{msg}");
        }
        assert_eq!(
            classify_fault("TypeError: x is undefined"),
            Fault::Generic {
                message: "TypeError: x is undefined".into()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn resource_load_fault_recovers_once_after_delay() {
        let channel = FaultChannel::new();
        let recovery = Arc::new(CountingRecovery::default());
        let supervisor =
            FaultSupervisor::mount(&channel, recovery.clone(), Duration::from_millis(3000));

        channel.report("ChunkLoadError: Loading chunk 3 failed.");
        tokio::time::sleep(Duration::from_millis(2999)).await;
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 1);

        // A single retry, not a loop.
        channel.report("ChunkLoadError: Loading chunk 4 failed.");
        tokio::time::sleep(Duration::from_millis(10_000)).await;
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.recoveries(), 1);
        assert!(supervisor.last_fault().unwrap().message().contains("chunk 4"));
    }

    #[tokio::test(start_paused = true)]
    async fn generic_fault_is_recorded_without_recovery() {
        let channel = FaultChannel::new();
        let recovery = Arc::new(CountingRecovery::default());
        let supervisor =
            FaultSupervisor::mount(&channel, recovery.clone(), Duration::from_millis(3000));

        channel.report("boom");
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            supervisor.last_fault(),
            Some(Fault::Generic {
                message: "boom".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_unsubscribes_and_cancels_pending_recovery() {
        let channel = FaultChannel::new();
        let recovery = Arc::new(CountingRecovery::default());
        let mut supervisor =
            FaultSupervisor::mount(&channel, recovery.clone(), Duration::from_millis(3000));
        assert_eq!(channel.subscriber_count(), 1);

        channel.report("Loading chunk 9 failed");
        tokio::time::sleep(Duration::from_millis(100)).await;
        supervisor.dispose();
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!supervisor.is_mounted());
        assert_eq!(channel.subscriber_count(), 0);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(recovery.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn supervise_reports_errors_and_panics() {
        let channel = FaultChannel::new();
        let mut rx = channel.subscribe();

        let ok: Result<u8, Fault> = supervise(&channel, async { Ok::<_, String>(7) }).await;
        assert_eq!(ok.unwrap(), 7);

        let err = supervise(&channel, async { Err::<(), _>("Loading chunk 1 failed") }).await;
        assert!(err.unwrap_err().is_resource_load());
        assert!(rx.recv().await.unwrap().is_resource_load());

        let panicked = supervise(&channel, async {
            if true {
                panic!("workflow exploded");
            }
            Ok::<(), String>(())
        })
        .await;
        assert_eq!(
            panicked.unwrap_err(),
            Fault::Generic {
                message: "workflow exploded".into()
            }
        );
    }
}
