//! Audit logging of every completed request.
//!
//! The request path only ever enqueues a `LogRecord` on a bounded channel; a
//! background worker persists records to the record store. When the queue is
//! full or closed the record is dropped and counted, so a slow store can
//! neither delay responses nor grow memory without bound.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::application::error::bounded;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, RecordStore};
use crate::domain::client::ClientId;
use crate::domain::records::LogRecord;

/// Error returned when audit configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuditConfigError {
    /// The queue must hold at least one record
    #[error("audit queue capacity must be greater than 0")]
    ZeroQueueCapacity,
}

/// Error returned when the audit worker fails to shut down cleanly.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// The worker task panicked
    #[error("audit worker panicked")]
    TaskPanicked,
    /// The worker task was cancelled before it finished draining
    #[error("audit worker was cancelled")]
    TaskCancelled,
}

/// Configuration for the audit worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuditConfig {
    /// Maximum number of records waiting to be written
    pub queue_capacity: usize,
    /// Upper bound on a single record write
    pub write_timeout: Duration,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            write_timeout: Duration::from_secs(2),
        }
    }
}

impl AuditConfig {
    /// Create a config with the given queue capacity.
    ///
    /// # Errors
    /// Returns `AuditConfigError::ZeroQueueCapacity` if `queue_capacity` is zero.
    pub fn new(queue_capacity: usize) -> Result<Self, AuditConfigError> {
        if queue_capacity == 0 {
            return Err(AuditConfigError::ZeroQueueCapacity);
        }
        Ok(Self {
            queue_capacity,
            ..Self::default()
        })
    }

    /// Set the per-record write timeout.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Non-blocking entry point used on the response path.
///
/// Cheap to clone; all clones feed the same worker.
#[derive(Debug, Clone)]
pub struct AuditLogger {
    sender: mpsc::Sender<LogRecord>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl AuditLogger {
    /// Spawn the audit worker on the current tokio runtime.
    ///
    /// Returns the logger used on the request path and the handle that stops
    /// the worker. Dropping the handle does not stop the worker; call
    /// `AuditHandle::shutdown` to drain and stop it.
    pub fn start(
        records: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        config: AuditConfig,
    ) -> (Self, AuditHandle) {
        let (sender, receiver) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let worker = AuditWorker {
            receiver,
            records,
            metrics: metrics.clone(),
            write_timeout: config.write_timeout,
        };
        let join = tokio::spawn(worker.run(shutdown_rx));

        let logger = Self {
            sender,
            clock,
            metrics,
        };
        let handle = AuditHandle {
            shutdown_tx: Some(shutdown_tx),
            join,
        };
        (logger, handle)
    }

    /// Queue one record for the finished request. Never waits.
    ///
    /// Returns whether the record was queued.
    pub fn observe(&self, client: &ClientId, method: &str, endpoint: &str, status: u16) -> bool {
        let record = LogRecord::new(self.clock.utc_now(), client, endpoint, method, status);

        match self.sender.try_send(record) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(record)) => {
                self.metrics.record_log_dropped();
                tracing::warn!(
                    client = %record.ip,
                    endpoint = %record.endpoint,
                    status = record.status,
                    "audit queue full, dropping log record"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                self.metrics.record_log_dropped();
                tracing::debug!(
                    client = %record.ip,
                    endpoint = %record.endpoint,
                    "audit worker stopped, dropping log record"
                );
                false
            }
        }
    }
}

struct AuditWorker {
    receiver: mpsc::Receiver<LogRecord>,
    records: Arc<dyn RecordStore>,
    metrics: Metrics,
    write_timeout: Duration,
}

impl AuditWorker {
    async fn run(mut self, mut shutdown_rx: oneshot::Receiver<()>) {
        loop {
            tokio::select! {
                maybe_record = self.receiver.recv() => match maybe_record {
                    Some(record) => self.persist(record).await,
                    None => return,
                },
                _ = &mut shutdown_rx => break,
            }
        }

        // Stop accepting new records, then write out what is already queued
        self.receiver.close();
        let mut drained = 0usize;
        while let Some(record) = self.receiver.recv().await {
            self.persist(record).await;
            drained += 1;
        }
        tracing::info!(drained, "audit worker stopped");
    }

    async fn persist(&self, record: LogRecord) {
        let ip = record.ip.clone();
        match bounded(self.write_timeout, self.records.insert_log(record)).await {
            Ok(()) => self.metrics.record_log_written(),
            Err(e) => {
                self.metrics.record_log_failure();
                tracing::warn!(error = %e, client = %ip, "failed to persist log record");
            }
        }
    }
}

/// Handle controlling the audit worker's lifetime.
#[derive(Debug)]
pub struct AuditHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join: JoinHandle<()>,
}

impl AuditHandle {
    /// Stop the worker after it has written every record already queued.
    ///
    /// # Errors
    /// Returns `ShutdownError` if the worker panicked or was cancelled.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The worker may already have exited; that is not an error
            let _ = tx.send(());
        }

        match self.join.await {
            Ok(()) => Ok(()),
            Err(e) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Err(_) => Err(ShutdownError::TaskCancelled),
        }
    }

    /// Whether the worker task has exited.
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }
}
