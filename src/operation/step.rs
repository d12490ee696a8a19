//! Steps of a recoverable operation.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

/// Why a step attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StepError {
    #[error("{0}")]
    Failed(String),

    #[error("Timed out after {}ms waiting for {what}", .after.as_millis())]
    TimedOut { what: String, after: Duration },
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

impl From<crate::error::DeviceError> for StepError {
    fn from(e: crate::error::DeviceError) -> Self {
        Self::Failed(e.to_string())
    }
}

/// One risky action. Attempts may be repeated after an operator retry.
#[async_trait]
pub trait Step<C: Send + Sync>: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, ctx: &C) -> Result<(), StepError>;
}

/// A step built from a closure returning a boxed future.
pub struct FnStep<C, F> {
    name: String,
    f: F,
    _ctx: PhantomData<fn(&C)>,
}

impl<C, F> FnStep<C, F>
where
    F: for<'a> Fn(&'a C) -> BoxFuture<'a, Result<(), StepError>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
            _ctx: PhantomData,
        }
    }
}

#[async_trait]
impl<C, F> Step<C> for FnStep<C, F>
where
    C: Send + Sync,
    F: for<'a> Fn(&'a C) -> BoxFuture<'a, Result<(), StepError>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &C) -> Result<(), StepError> {
        (self.f)(ctx).await
    }
}

/// Default interval between condition checks.
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_millis(100);
/// Default limit on how long a condition may take to become true.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll a condition until it holds; time out as a failure.
pub struct WaitUntil<C, F> {
    name: String,
    condition: F,
    poll: Duration,
    timeout: Duration,
    _ctx: PhantomData<fn(&C)>,
}

impl<C, F> WaitUntil<C, F>
where
    F: Fn(&C) -> bool + Send + Sync,
{
    pub fn new(name: impl Into<String>, condition: F) -> Self {
        Self {
            name: name.into(),
            condition,
            poll: DEFAULT_WAIT_POLL,
            timeout: DEFAULT_WAIT_TIMEOUT,
            _ctx: PhantomData,
        }
    }

    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl<C, F> Step<C> for WaitUntil<C, F>
where
    C: Send + Sync,
    F: Fn(&C) -> bool + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &C) -> Result<(), StepError> {
        let poll = async {
            while !(self.condition)(ctx) {
                tokio::time::sleep(self.poll).await;
            }
        };
        tokio::time::timeout(self.timeout, poll)
            .await
            .map_err(|_| StepError::TimedOut {
                what: self.name.clone(),
                after: self.timeout,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[tokio::test]
    async fn test_fn_step_runs_closure() {
        let step = FnStep::new("count", |calls: &AtomicU32| {
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        let calls = AtomicU32::new(0);
        step.execute(&calls).await.unwrap();
        step.execute(&calls).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(step.name(), "count");
    }

    #[tokio::test]
    async fn test_wait_until_succeeds_when_condition_flips() {
        let flag = std::sync::Arc::new(AtomicBool::new(false));
        let step = WaitUntil::new("flag", |f: &std::sync::Arc<AtomicBool>| f.load(Ordering::SeqCst))
            .with_poll(Duration::from_millis(5))
            .with_timeout(Duration::from_secs(1));
        let setter = {
            let flag = flag.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                flag.store(true, Ordering::SeqCst);
            })
        };
        step.execute(&flag).await.unwrap();
        setter.await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_until_times_out() {
        let step = WaitUntil::new("never", |_: &()| false)
            .with_poll(Duration::from_millis(5))
            .with_timeout(Duration::from_millis(30));
        let err = step.execute(&()).await.unwrap_err();
        assert_eq!(err.to_string(), "Timed out after 30ms waiting for never");
    }

    #[test]
    fn test_wait_defaults() {
        assert_eq!(DEFAULT_WAIT_POLL, Duration::from_millis(100));
        assert_eq!(DEFAULT_WAIT_TIMEOUT, Duration::from_secs(30));
    }
}
