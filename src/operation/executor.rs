//! Runs submitted operations one after another on a worker task.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::{Notify, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::engine::{OperationOutcome, OperationState, RecoverableOperation};
use crate::error::Result;

/// What the executor is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorStatus {
    Idle,
    Running,
    /// The running operation is waiting for the operator.
    InError,
    Disabled,
}

impl fmt::Display for ExecutorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

type Run = Box<dyn FnOnce(Arc<watch::Sender<ExecutorStatus>>) -> BoxFuture<'static, ()> + Send>;

struct Queued {
    name: String,
    cancel: CancellationToken,
    run: Run,
}

struct Shared {
    queue: Mutex<VecDeque<Queued>>,
    current: Mutex<Option<CancellationToken>>,
    notify: Notify,
    disabled: AtomicBool,
    status: Arc<watch::Sender<ExecutorStatus>>,
    cancel: CancellationToken,
}

/// FIFO of recoverable operations executed on one background task.
pub struct OperationExecutor {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl OperationExecutor {
    /// Start the worker task.
    pub fn spawn() -> Self {
        let (status, _) = watch::channel(ExecutorStatus::Idle);
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::new()),
            current: Mutex::new(None),
            notify: Notify::new(),
            disabled: AtomicBool::new(false),
            status: Arc::new(status),
            cancel: CancellationToken::new(),
        });
        let worker = tokio::spawn(work(shared.clone()));
        Self {
            shared,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue an operation. The receiver yields its outcome, or an error if
    /// the operation was flushed before it started.
    pub fn submit<C>(&self, mut operation: RecoverableOperation<C>, ctx: Arc<C>) -> oneshot::Receiver<Result<OperationOutcome>>
    where
        C: Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let name = operation.name().to_string();
        let cancel = operation.cancellation_token();
        let run: Run = Box::new(move |status| {
            async move {
                let mut states = operation.subscribe();
                let mirror = tokio::spawn(async move {
                    while states.changed().await.is_ok() {
                        let state = *states.borrow_and_update();
                        let mirrored = match state {
                            OperationState::Error(_) => ExecutorStatus::InError,
                            _ => ExecutorStatus::Running,
                        };
                        status.send_replace(mirrored);
                    }
                });
                let result = operation.run(&ctx).await;
                mirror.abort();
                let _ = mirror.await;
                let _ = tx.send(result);
            }
            .boxed()
        });

        tracing::debug!(operation = %name, "Operation queued");
        self.shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(Queued { name, cancel, run });
        self.shared.notify.notify_one();
        rx
    }

    pub fn status(&self) -> ExecutorStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutorStatus> {
        self.shared.status.subscribe()
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drop every queued operation that has not started. Returns how many.
    pub fn flush(&self) -> usize {
        let flushed: Vec<Queued> = self
            .shared
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        for queued in &flushed {
            tracing::info!(operation = %queued.name, "Flushed queued operation");
        }
        flushed.len()
    }

    /// Stop starting new operations. The running one finishes.
    pub fn disable(&self) {
        self.shared.disabled.store(true, Ordering::SeqCst);
        if self.status() == ExecutorStatus::Idle {
            self.shared.status.send_replace(ExecutorStatus::Disabled);
        }
    }

    pub fn enable(&self) {
        self.shared.disabled.store(false, Ordering::SeqCst);
        if self.status() == ExecutorStatus::Disabled {
            self.shared.status.send_replace(ExecutorStatus::Idle);
        }
        self.shared.notify.notify_one();
    }

    /// Abort the running operation, flush the queue and end the worker.
    pub async fn stop(&self) {
        self.shared.cancel.cancel();
        if let Some(current) = self.shared.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            current.cancel();
        }
        self.flush();
        let worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(worker) = worker {
            let _ = worker.await;
        }
    }
}

impl Drop for OperationExecutor {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
        if let Some(current) = self.shared.current.lock().unwrap_or_else(PoisonError::into_inner).take() {
            current.cancel();
        }
    }
}

async fn work(shared: Arc<Shared>) {
    loop {
        let next = loop {
            if shared.cancel.is_cancelled() {
                return;
            }
            if !shared.disabled.load(Ordering::SeqCst) {
                if let Some(next) = shared.queue.lock().unwrap_or_else(PoisonError::into_inner).pop_front() {
                    break next;
                }
                shared.status.send_replace(ExecutorStatus::Idle);
            } else {
                shared.status.send_replace(ExecutorStatus::Disabled);
            }
            tokio::select! {
                _ = shared.cancel.cancelled() => return,
                _ = shared.notify.notified() => {}
            }
        };

        let Queued { name, cancel, run } = next;
        *shared.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(cancel);
        shared.status.send_replace(ExecutorStatus::Running);
        tracing::info!(operation = %name, "Running operation");
        run(shared.status.clone()).await;
        shared.current.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::RecoveryPolicy;
    use crate::operation::step::{FnStep, StepError};
    use crate::operator::{ErrorChannel, RETRY, operator_channel};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn counting(name: &str, errors: Arc<dyn ErrorChannel>, fail_first: bool) -> RecoverableOperation<AtomicU32> {
        RecoverableOperation::new(name, errors).with_step(
            FnStep::new("count", move |calls: &AtomicU32| {
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if fail_first && n == 0 { Err(StepError::failed("first try fails")) } else { Ok(()) }
                }
                .boxed()
            }),
            RecoveryPolicy::default(),
        )
    }

    #[tokio::test]
    async fn test_runs_operations_in_order() {
        let (queue, _inbox) = operator_channel();
        let errors: Arc<dyn ErrorChannel> = Arc::new(queue);
        let executor = OperationExecutor::spawn();
        let calls = Arc::new(AtomicU32::new(0));

        let first = executor.submit(counting("first", errors.clone(), false), calls.clone());
        let second = executor.submit(counting("second", errors, false), calls.clone());
        assert_eq!(first.await.unwrap().unwrap(), OperationOutcome::Completed);
        assert_eq!(second.await.unwrap().unwrap(), OperationOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        executor.stop().await;
    }

    #[tokio::test]
    async fn test_status_reports_operator_wait() {
        let (queue, mut inbox) = operator_channel();
        let executor = OperationExecutor::spawn();
        let mut status = executor.subscribe();
        let done = executor.submit(counting("flaky", Arc::new(queue), true), Arc::new(AtomicU32::new(0)));

        tokio::time::timeout(Duration::from_secs(1), status.wait_for(|s| *s == ExecutorStatus::InError))
            .await
            .unwrap()
            .unwrap();
        let mut pending = inbox.next().await.unwrap();
        pending.resolve(RETRY).unwrap();

        assert_eq!(done.await.unwrap().unwrap(), OperationOutcome::Completed);
        tokio::time::timeout(Duration::from_secs(1), status.wait_for(|s| *s == ExecutorStatus::Idle))
            .await
            .unwrap()
            .unwrap();
        executor.stop().await;
    }

    #[tokio::test]
    async fn test_disabled_executor_holds_queue() {
        let (queue, _inbox) = operator_channel();
        let executor = OperationExecutor::spawn();
        executor.disable();
        let calls = Arc::new(AtomicU32::new(0));
        let mut done = executor.submit(counting("held", Arc::new(queue), false), calls.clone());

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(done.try_recv().is_err());
        assert_eq!(executor.pending(), 1);
        assert_eq!(executor.status(), ExecutorStatus::Disabled);

        executor.enable();
        assert_eq!(done.await.unwrap().unwrap(), OperationOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        executor.stop().await;
    }

    #[tokio::test]
    async fn test_flush_drops_unstarted() {
        let (queue, _inbox) = operator_channel();
        let executor = OperationExecutor::spawn();
        executor.disable();
        let done = executor.submit(counting("dropped", Arc::new(queue), false), Arc::new(AtomicU32::new(0)));
        assert_eq!(executor.flush(), 1);
        assert!(done.await.is_err());
        executor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_aborts_running_operation() {
        let (queue, _inbox) = operator_channel();
        let executor = OperationExecutor::spawn();
        let op = RecoverableOperation::<()>::new("slow", Arc::new(queue)).with_step(
            FnStep::new("sleep", |_: &()| {
                async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok(())
                }
                .boxed()
            }),
            RecoveryPolicy::default(),
        );
        let mut status = executor.subscribe();
        let done = executor.submit(op, Arc::new(()));
        status.wait_for(|s| *s == ExecutorStatus::Running).await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), executor.stop()).await.unwrap();
        assert_eq!(done.await.unwrap().unwrap(), OperationOutcome::Aborted { at: 0 });
    }
}
