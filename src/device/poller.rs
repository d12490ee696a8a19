//! Background polling of device status.
//!
//! Read errors are expected while a device is busy or reconnecting, so the
//! poller drops them and keeps the last good value.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::DeviceError;

/// Something whose status can be read periodically.
#[async_trait]
pub trait StatusSource: Send + Sync + 'static {
    type Status: Clone + Send + Sync + 'static;

    async fn read_status(&self) -> Result<Self::Status, DeviceError>;
}

/// Polls a [`StatusSource`] on its own task and publishes the latest reading.
pub struct StatusPoller<S: StatusSource> {
    latest: watch::Receiver<Option<S::Status>>,
    failures: Arc<AtomicU64>,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<S: StatusSource> StatusPoller<S> {
    pub fn spawn(source: Arc<S>, interval: Duration) -> Self {
        let (tx, latest) = watch::channel(None);
        let failures = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();

        let handle = {
            let failures = failures.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    match source.read_status().await {
                        Ok(status) => {
                            tx.send_replace(Some(status));
                        }
                        Err(e) => {
                            failures.fetch_add(1, Ordering::Relaxed);
                            tracing::trace!(error = %e, "Ignoring status read error");
                        }
                    }
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(interval) => {}
                    }
                }
            })
        };

        Self {
            latest,
            failures,
            cancel,
            handle: Some(handle),
        }
    }

    /// Most recent successful reading.
    pub fn latest(&self) -> Option<S::Status> {
        self.latest.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<S::Status>> {
        self.latest.clone()
    }

    /// Number of reads that failed and were ignored.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Stop polling and wait for the task to exit.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl<S: StatusSource> Drop for StatusPoller<S> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
