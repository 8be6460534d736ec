//! Durable mutation queue with retry.
//!
//! [`MutationQueue`] holds write operations that could not complete online
//! (or were deliberately deferred) as serializable descriptors, journaled to
//! disk so pending writes survive restarts. [`MutationQueue::drain`] replays
//! them strictly in FIFO order against a [`MutationExecutor`]:
//!
//! - success removes the entry;
//! - a non-retryable failure (4xx-equivalent) abandons it after exactly one
//!   attempt and surfaces the error on the caller's ticket;
//! - a transient failure schedules a retry with exponential backoff and
//!   re-enqueues the entry at the **tail**, so one persistently failing
//!   mutation cannot head-of-line-block healthy ones.
//!
//! At most one live entry exists per dedup key: a later `enqueue` with the
//! same key supersedes the earlier one, and the earlier caller's ticket
//! resolves [`MutationOutcome::Superseded`].
//!
//! Draining is collapsed to a single active pass by an in-progress flag;
//! concurrent calls return immediately, and a drain while offline is a
//! no-op. Callers only ever observe final outcomes - intermediate retry
//! failures stay inside the queue.

pub mod policy;

pub use policy::RetryPolicy;

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::remote::{BoxFuture, RemoteError};
use crate::storage::{load_json, save_json, StorageError};

/// Errors from queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Journal persistence failed; the queue is unchanged.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A pending write operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedMutation<O> {
    /// Collapses repeated enqueues of logically-equivalent operations.
    pub dedup_key: String,
    /// Caller-defined operation descriptor.
    pub op: O,
    pub enqueued_at: DateTime<Utc>,
    /// Completed delivery attempts.
    pub attempts: u32,
    /// Earliest time the next attempt may run (backoff).
    #[serde(default)]
    pub not_before: Option<DateTime<Utc>>,
}

/// Final outcome of a queued mutation.
#[derive(Debug)]
pub enum MutationOutcome {
    /// The operation executed successfully.
    Delivered,
    /// A later enqueue with the same dedup key replaced this one.
    Superseded,
    /// The operation was abandoned; the terminal error is attached.
    Abandoned(RemoteError),
}

/// Deferred result handed to the caller at enqueue time.
///
/// Resolves once the mutation reaches a final outcome. Intermediate retry
/// failures are never surfaced here.
pub struct MutationTicket {
    rx: oneshot::Receiver<MutationOutcome>,
}

impl MutationTicket {
    /// Waits for the final outcome.
    pub async fn outcome(self) -> MutationOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            // The queue was dropped before the mutation resolved
            Err(_) => MutationOutcome::Abandoned(RemoteError::Transient(
                "queue shut down before delivery".to_string(),
            )),
        }
    }
}

/// Executes mutation descriptors against the remote store.
pub trait MutationExecutor<O>: Send + Sync {
    fn execute<'a>(&'a self, op: &'a O) -> BoxFuture<'a, Result<(), RemoteError>>;
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainReport {
    pub delivered: usize,
    pub abandoned: usize,
    /// Entries still pending (offline cut the pass short, or another pass
    /// was already running).
    pub remaining: usize,
}

impl std::fmt::Display for DrainReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "drain: {} delivered, {} abandoned, {} remaining",
            self.delivered, self.abandoned, self.remaining
        )
    }
}

/// Durable FIFO queue of pending mutations.
pub struct MutationQueue<O> {
    journal_path: PathBuf,
    entries: Mutex<VecDeque<QueuedMutation<O>>>,
    waiters: Mutex<HashMap<String, oneshot::Sender<MutationOutcome>>>,
    draining: AtomicBool,
    policy: RetryPolicy,
    monitor: ConnectivityMonitor,
}

impl<O> MutationQueue<O>
where
    O: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    /// Opens the queue, restoring any journaled entries.
    pub fn open(
        journal_path: impl Into<PathBuf>,
        policy: RetryPolicy,
        monitor: ConnectivityMonitor,
    ) -> Result<Self, QueueError> {
        let journal_path = journal_path.into();
        let entries: VecDeque<QueuedMutation<O>> =
            load_json(&journal_path)?.unwrap_or_default();

        if !entries.is_empty() {
            info!(pending = entries.len(), "restored mutation journal");
        }

        Ok(Self {
            journal_path,
            entries: Mutex::new(entries),
            waiters: Mutex::new(HashMap::new()),
            draining: AtomicBool::new(false),
            policy,
            monitor,
        })
    }

    /// Appends a mutation, superseding any live entry with the same key.
    ///
    /// The returned ticket resolves when the mutation reaches a final
    /// outcome. The journal is persisted before this returns; on a
    /// persistence failure the queue is left unchanged.
    pub fn enqueue(&self, dedup_key: &str, op: O) -> Result<MutationTicket, QueueError> {
        let (tx, rx) = oneshot::channel();

        let mut entries = self.entries.lock();

        let superseded = match entries.iter().position(|e| e.dedup_key == dedup_key) {
            Some(pos) => entries.remove(pos),
            None => None,
        };

        entries.push_back(QueuedMutation {
            dedup_key: dedup_key.to_string(),
            op,
            enqueued_at: Utc::now(),
            attempts: 0,
            not_before: None,
        });

        if let Err(e) = self.persist(&entries) {
            // Leave the queue exactly as it was
            entries.pop_back();
            if let Some(old) = superseded {
                entries.push_back(old);
            }
            return Err(e);
        }

        debug!(dedup_key = %dedup_key, pending = entries.len(), "mutation enqueued");

        // Register the waiter before releasing the queue lock so a drain
        // already in flight cannot settle this entry waiterless.
        {
            let mut waiters = self.waiters.lock();
            if superseded.is_some() {
                if let Some(old_tx) = waiters.remove(dedup_key) {
                    let _ = old_tx.send(MutationOutcome::Superseded);
                }
            }
            waiters.insert(dedup_key.to_string(), tx);
        }

        Ok(MutationTicket { rx })
    }

    /// Number of pending mutations.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Replays pending mutations in FIFO order.
    ///
    /// No-op while offline or when another pass is already active; in both
    /// cases the report only carries `remaining`.
    pub async fn drain<E>(&self, exec: &E) -> Result<DrainReport, QueueError>
    where
        E: MutationExecutor<O> + ?Sized,
    {
        let mut report = DrainReport::default();

        if !self.monitor.is_online() {
            report.remaining = self.len();
            debug!("drain skipped: offline");
            return Ok(report);
        }

        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            report.remaining = self.len();
            debug!("drain skipped: pass already active");
            return Ok(report);
        }
        let _guard = DrainGuard(&self.draining);

        loop {
            if !self.monitor.is_online() {
                debug!("drain interrupted: went offline");
                break;
            }

            // Pick the first entry whose backoff has elapsed; if everything
            // pending is still backing off, wait for the earliest one.
            let now = Utc::now();
            let next = {
                let entries = self.entries.lock();
                if entries.is_empty() {
                    break;
                }
                match entries
                    .iter()
                    .find(|e| e.not_before.map_or(true, |t| t <= now))
                {
                    Some(entry) => Ok(entry.clone()),
                    None => Err(entries.iter().filter_map(|e| e.not_before).min()),
                }
            };

            let entry = match next {
                Ok(entry) => entry,
                Err(Some(earliest)) => {
                    let wait = (earliest - now)
                        .to_std()
                        .unwrap_or(std::time::Duration::ZERO);
                    tokio::time::sleep(wait).await;
                    continue;
                }
                Err(None) => break,
            };

            let result = exec.execute(&entry.op).await;

            match result {
                Ok(()) => {
                    self.settle(&entry, MutationOutcome::Delivered)?;
                    report.delivered += 1;
                }
                Err(error) if !error.is_retryable() => {
                    warn!(
                        dedup_key = %entry.dedup_key,
                        error = %error,
                        "mutation rejected, abandoning"
                    );
                    self.settle(&entry, MutationOutcome::Abandoned(error))?;
                    report.abandoned += 1;
                }
                Err(error) => {
                    let attempts = entry.attempts + 1;
                    match self.policy.delay_for_attempt(attempts) {
                        Some(delay) => {
                            debug!(
                                dedup_key = %entry.dedup_key,
                                attempts,
                                delay_ms = delay.as_millis() as u64,
                                "transient failure, re-enqueueing at tail"
                            );
                            self.defer(&entry, attempts, delay)?;
                        }
                        None => {
                            warn!(
                                dedup_key = %entry.dedup_key,
                                attempts,
                                error = %error,
                                "retry budget exhausted, abandoning"
                            );
                            self.settle(&entry, MutationOutcome::Abandoned(error))?;
                            report.abandoned += 1;
                        }
                    }
                }
            }
        }

        report.remaining = self.len();
        info!(%report, "drain pass complete");
        Ok(report)
    }

    /// Removes a finished entry and resolves its waiter.
    ///
    /// If the entry was superseded while in flight, the replacement stays
    /// queued and its waiter is untouched.
    fn settle(
        &self,
        entry: &QueuedMutation<O>,
        outcome: MutationOutcome,
    ) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let Some(pos) = entries.iter().position(|e| {
            e.dedup_key == entry.dedup_key && e.enqueued_at == entry.enqueued_at
        }) else {
            return Ok(());
        };
        let _ = entries.remove(pos);
        self.persist(&entries)?;
        drop(entries);

        if let Some(tx) = self.waiters.lock().remove(&entry.dedup_key) {
            let _ = tx.send(outcome);
        }
        Ok(())
    }

    /// Moves a transiently-failed entry to the tail with its backoff stamp.
    fn defer(
        &self,
        entry: &QueuedMutation<O>,
        attempts: u32,
        delay: std::time::Duration,
    ) -> Result<(), QueueError> {
        let mut entries = self.entries.lock();
        let Some(pos) = entries.iter().position(|e| {
            e.dedup_key == entry.dedup_key && e.enqueued_at == entry.enqueued_at
        }) else {
            return Ok(());
        };
        let Some(mut deferred) = entries.remove(pos) else {
            return Ok(());
        };
        deferred.attempts = attempts;
        deferred.not_before =
            Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX));
        entries.push_back(deferred);
        self.persist(&entries)?;
        Ok(())
    }

    fn persist(&self, entries: &VecDeque<QueuedMutation<O>>) -> Result<(), QueueError> {
        save_json(&self.journal_path, entries)?;
        Ok(())
    }
}

/// Resets the in-progress flag when a drain pass ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
