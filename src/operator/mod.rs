//! Operator-facing error channel.
//!
//! Components that need a human decision raise an [`ErrorReport`] with named
//! options and wait for one of them to be chosen. The in-process
//! [`OperatorQueue`] hands each report to whoever drains the paired
//! [`OperatorInbox`] (the CLI prompt, a GUI, or a test).

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::error::{PlateschedError, Result};

pub const RETRY: &str = "Retry";
pub const IGNORE: &str = "Ignore";
pub const ABORT: &str = "Abort";

/// An error waiting on an operator decision.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub options: Vec<String>,
    pub details: Option<String>,
    pub raised_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new<I, S>(message: impl Into<String>, options: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            message: message.into(),
            options: options.into_iter().map(Into::into).collect(),
            details: None,
            raised_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn offers(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.message, self.options.join("/"))
    }
}

/// Where operator-facing errors are raised.
#[async_trait]
pub trait ErrorChannel: Send + Sync {
    /// Raise an error and wait for the chosen option. `None` means nobody can
    /// answer any more.
    async fn add_error(&self, report: ErrorReport) -> Option<String>;
}

/// A raised error as seen by the operator side.
#[derive(Debug)]
pub struct PendingError {
    report: ErrorReport,
    responder: Option<oneshot::Sender<String>>,
}

impl PendingError {
    pub fn report(&self) -> &ErrorReport {
        &self.report
    }

    /// Choose one of the offered options. Options not offered are rejected and
    /// the error stays pending.
    pub fn resolve(&mut self, option: &str) -> Result<()> {
        let Some(chosen) = self.report.options.iter().find(|o| o.eq_ignore_ascii_case(option)) else {
            return Err(PlateschedError::InvalidOption(option.to_string()));
        };
        let chosen = chosen.clone();
        match self.responder.take() {
            Some(tx) => {
                tracing::info!(message = %self.report.message, option = %chosen, "Operator resolved error");
                // The raiser may have been cancelled meanwhile.
                let _ = tx.send(chosen);
                Ok(())
            }
            None => Err(PlateschedError::InvalidOption(format!("{} (already resolved)", option))),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.responder.is_none()
    }
}

/// Raising side of the in-process operator channel.
#[derive(Debug, Clone)]
pub struct OperatorQueue {
    tx: mpsc::UnboundedSender<PendingError>,
}

/// Operator side of the in-process channel.
#[derive(Debug)]
pub struct OperatorInbox {
    rx: mpsc::UnboundedReceiver<PendingError>,
}

/// Create a connected queue and inbox.
pub fn operator_channel() -> (OperatorQueue, OperatorInbox) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OperatorQueue { tx }, OperatorInbox { rx })
}

#[async_trait]
impl ErrorChannel for OperatorQueue {
    async fn add_error(&self, report: ErrorReport) -> Option<String> {
        tracing::warn!(message = %report.message, options = ?report.options, "Raising operator error");
        let (responder, response) = oneshot::channel();
        let pending = PendingError {
            report,
            responder: Some(responder),
        };
        self.tx.send(pending).ok()?;
        response.await.ok()
    }
}

impl OperatorInbox {
    /// Next raised error, or `None` once every queue handle is gone.
    pub async fn next(&mut self) -> Option<PendingError> {
        self.rx.recv().await
    }

    pub fn try_next(&mut self) -> Option<PendingError> {
        self.rx.try_recv().ok()
    }

    /// Answer every incoming error with the first offered option from
    /// `preferences`, falling back to the report's first option.
    pub fn spawn_auto_responder(mut self, preferences: Vec<String>) -> tokio::task::JoinHandle<usize> {
        tokio::spawn(async move {
            let mut answered = 0;
            while let Some(mut pending) = self.next().await {
                let choice = preferences
                    .iter()
                    .find(|p| pending.report().offers(p))
                    .or_else(|| pending.report().options.first())
                    .cloned();
                match choice {
                    Some(choice) if pending.resolve(&choice).is_ok() => answered += 1,
                    // Dropping the pending error closes its response channel.
                    _ => {}
                }
            }
            answered
        })
    }
}
