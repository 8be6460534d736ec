//! Favorite locations ledger with bidirectional sync.
//!
//! [`LocationLedger`] is the local-first store of named geographic points.
//! Every write lands in the durable local table immediately; remote
//! delivery happens right away when online, or through the mutation queue
//! when not. Reads always come from the local table.
//!
//! # Reconciliation
//!
//! [`LocationLedger::refresh`] pulls the remote set and applies
//! last-write-wins by `modified_at`: a newer remote record overwrites the
//! local one; a newer (or never-pushed) local record is pushed to the
//! remote instead; equal timestamps are a no-op. There is no field-level
//! merge and no causality tracking - on a true concurrent edit of the same
//! record from two devices, the later timestamp silently wins and the other
//! edit is lost. Clock skew between devices is not addressed. This is an
//! accepted risk, not a solved problem.
//!
//! # Deletion
//!
//! Records are never hard-deleted mid-sync. `remove` soft-marks the record
//! and purges it only after the remote store acknowledges the delete; a
//! pull never resurrects a soft-deleted id in the meantime.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::queue::{DrainReport, MutationExecutor, MutationQueue, QueueError};
use crate::remote::{BoxFuture, FavoritesApi, RemoteError, RemoteFavorite};
use crate::storage::{load_json, save_json, StorageError};

/// Errors from ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Local persistence failed; remote state is untouched.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The remote store rejected or could not serve a request.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The mutation queue could not journal the deferred write.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Whether a record's latest edit has reached the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncState {
    /// Edited locally; not yet acknowledged by the remote.
    Local,
    /// Remote store holds this version.
    Synced,
}

/// A saved location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteLocation {
    pub id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub address: String,
    pub modified_at: DateTime<Utc>,
    pub sync_state: SyncState,
    /// Soft-delete mark; purged after the remote acknowledges.
    #[serde(default)]
    pub deleted: bool,
}

impl FavoriteLocation {
    /// Creates a fresh, never-synced favorite stamped with the current time.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        latitude: f64,
        longitude: f64,
        address: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            latitude,
            longitude,
            address: address.into(),
            modified_at: Utc::now(),
            sync_state: SyncState::Local,
            deleted: false,
        }
    }

    fn from_remote(remote: RemoteFavorite) -> Self {
        Self {
            id: remote.id,
            name: remote.name,
            latitude: remote.latitude,
            longitude: remote.longitude,
            address: remote.address,
            modified_at: remote.modified_at,
            sync_state: SyncState::Synced,
            deleted: false,
        }
    }
}

impl From<&FavoriteLocation> for RemoteFavorite {
    fn from(local: &FavoriteLocation) -> Self {
        Self {
            id: local.id.clone(),
            name: local.name.clone(),
            latitude: local.latitude,
            longitude: local.longitude,
            address: local.address.clone(),
            modified_at: local.modified_at,
        }
    }
}

/// Deferred write descriptors journaled by the mutation queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FavoriteMutation {
    /// Push this snapshot to the remote store.
    Push(RemoteFavorite),
    /// Delete the record remotely.
    Delete { id: String },
}

struct LedgerInner {
    table_path: PathBuf,
    records: Mutex<HashMap<String, FavoriteLocation>>,
}

impl LedgerInner {
    fn persist(&self, records: &HashMap<String, FavoriteLocation>) -> Result<(), StorageError> {
        save_json(&self.table_path, records)
    }

    /// Marks a record `Synced` if the delivered snapshot is still current.
    fn mark_synced(&self, id: &str, delivered_at: DateTime<Utc>) {
        let mut records = self.records.lock();
        let Some(record) = records.get_mut(id) else {
            return;
        };
        if record.modified_at != delivered_at {
            // Edited again since the push was captured; stays Local
            return;
        }
        record.sync_state = SyncState::Synced;
        if let Err(e) = self.persist(&records) {
            warn!(id = %id, error = %e, "failed to persist sync mark");
        }
    }

    /// Drops a soft-deleted record after the remote acknowledged the delete.
    fn purge(&self, id: &str) {
        let mut records = self.records.lock();
        let purged = matches!(records.get(id), Some(record) if record.deleted);
        if purged {
            records.remove(id);
            if let Err(e) = self.persist(&records) {
                warn!(id = %id, error = %e, "failed to persist purge");
            }
            debug!(id = %id, "purged acknowledged delete");
        }
    }
}

/// Executes journaled favorite mutations against the remote store.
pub struct LedgerExecutor {
    api: Arc<dyn FavoritesApi>,
    inner: Arc<LedgerInner>,
}

impl MutationExecutor<FavoriteMutation> for LedgerExecutor {
    fn execute<'a>(&'a self, op: &'a FavoriteMutation) -> BoxFuture<'a, Result<(), RemoteError>> {
        Box::pin(async move {
            match op {
                FavoriteMutation::Push(snapshot) => {
                    self.api.push(snapshot).await?;
                    self.inner.mark_synced(&snapshot.id, snapshot.modified_at);
                    Ok(())
                }
                FavoriteMutation::Delete { id } => {
                    self.api.delete(id).await?;
                    self.inner.purge(id);
                    Ok(())
                }
            }
        })
    }
}

/// Local-first favorites store reconciling with a remote endpoint.
pub struct LocationLedger {
    inner: Arc<LedgerInner>,
    queue: Arc<MutationQueue<FavoriteMutation>>,
    executor: LedgerExecutor,
    api: Arc<dyn FavoritesApi>,
    monitor: ConnectivityMonitor,
}

impl LocationLedger {
    /// Opens the ledger, restoring the durable favorites table.
    pub fn open(
        table_path: impl Into<PathBuf>,
        api: Arc<dyn FavoritesApi>,
        queue: Arc<MutationQueue<FavoriteMutation>>,
        monitor: ConnectivityMonitor,
    ) -> Result<Self, LedgerError> {
        let table_path = table_path.into();
        let records: HashMap<String, FavoriteLocation> =
            load_json(&table_path)?.unwrap_or_default();

        if !records.is_empty() {
            info!(count = records.len(), "restored favorites table");
        }

        let inner = Arc::new(LedgerInner {
            table_path,
            records: Mutex::new(records),
        });

        Ok(Self {
            executor: LedgerExecutor {
                api: Arc::clone(&api),
                inner: Arc::clone(&inner),
            },
            inner,
            queue,
            api,
            monitor,
        })
    }

    /// Saves a favorite, local-first.
    ///
    /// The record is durably written (marked `Local`) before any network
    /// traffic. When online, an immediate push follows; a transient push
    /// failure falls back to the mutation queue. A rejected push surfaces
    /// as an error while the local record stays `Local`.
    pub async fn save(&self, mut favorite: FavoriteLocation) -> Result<(), LedgerError> {
        favorite.modified_at = Utc::now();
        favorite.sync_state = SyncState::Local;
        favorite.deleted = false;

        let snapshot = RemoteFavorite::from(&favorite);
        {
            let mut records = self.inner.records.lock();
            records.insert(favorite.id.clone(), favorite.clone());
            self.inner.persist(&records)?;
        }
        debug!(id = %favorite.id, "favorite saved locally");

        if !self.monitor.is_online() {
            self.enqueue_push(snapshot)?;
            return Ok(());
        }

        match self.api.push(&snapshot).await {
            Ok(()) => {
                self.inner.mark_synced(&snapshot.id, snapshot.modified_at);
                Ok(())
            }
            Err(error) if error.is_retryable() => {
                // The failed call is itself a reachability observation
                self.monitor.set_online(false);
                self.enqueue_push(snapshot)?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Returns all live favorites from local storage, sorted by name.
    pub fn list(&self) -> Vec<FavoriteLocation> {
        let records = self.inner.records.lock();
        let mut favorites: Vec<FavoriteLocation> = records
            .values()
            .filter(|record| !record.deleted)
            .cloned()
            .collect();
        favorites.sort_by(|a, b| a.name.cmp(&b.name));
        favorites
    }

    /// Looks up one live favorite.
    pub fn get(&self, id: &str) -> Option<FavoriteLocation> {
        let records = self.inner.records.lock();
        records.get(id).filter(|record| !record.deleted).cloned()
    }

    /// Removes a favorite: soft-mark now, purge after remote acknowledgment.
    pub async fn remove(&self, id: &str) -> Result<(), LedgerError> {
        {
            let mut records = self.inner.records.lock();
            let Some(record) = records.get_mut(id) else {
                return Ok(());
            };
            record.deleted = true;
            record.modified_at = Utc::now();
            record.sync_state = SyncState::Local;
            self.inner.persist(&records)?;
        }
        debug!(id = %id, "favorite soft-deleted");

        if !self.monitor.is_online() {
            self.enqueue_delete(id)?;
            return Ok(());
        }

        match self.api.delete(id).await {
            Ok(()) => {
                self.inner.purge(id);
                Ok(())
            }
            Err(error) if error.is_retryable() => {
                self.monitor.set_online(false);
                self.enqueue_delete(id)?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Pulls the remote set and reconciles last-write-wins by timestamp.
    ///
    /// Remote-newer records overwrite local; local-newer and never-pushed
    /// records are pushed back; equal timestamps reconcile without a push.
    /// No-op while offline.
    pub async fn refresh(&self) -> Result<(), LedgerError> {
        if !self.monitor.is_online() {
            debug!("refresh skipped: offline");
            return Ok(());
        }

        let remote_records = match self.api.fetch_all().await {
            Ok(records) => records,
            Err(error) => {
                if error.is_retryable() {
                    self.monitor.set_online(false);
                }
                return Err(error.into());
            }
        };

        // A successful call is also a reachability observation
        self.monitor.set_online(true);

        let remote_ids: std::collections::HashSet<String> =
            remote_records.iter().map(|r| r.id.clone()).collect();

        let mut to_push: Vec<RemoteFavorite> = Vec::new();
        {
            use std::collections::hash_map::Entry;

            let mut records = self.inner.records.lock();
            let mut changed = false;

            for remote in remote_records {
                match records.entry(remote.id.clone()) {
                    Entry::Vacant(slot) => {
                        debug!(id = %remote.id, "adopting remote-only favorite");
                        slot.insert(FavoriteLocation::from_remote(remote));
                        changed = true;
                    }
                    Entry::Occupied(mut slot) => {
                        let local = slot.get_mut();
                        if local.deleted {
                            // Pending delete wins until the remote acknowledges it
                        } else if remote.modified_at > local.modified_at {
                            debug!(id = %remote.id, "remote newer, overwriting local");
                            *local = FavoriteLocation::from_remote(remote);
                            changed = true;
                        } else if local.modified_at > remote.modified_at {
                            debug!(id = %remote.id, "local newer, pushing");
                            to_push.push(RemoteFavorite::from(&*local));
                        } else if local.sync_state == SyncState::Local {
                            // Same timestamp: already converged, just mark it
                            local.sync_state = SyncState::Synced;
                            changed = true;
                        }
                    }
                }
            }

            // Never-pushed local records the remote has not seen yet
            for local in records.values() {
                if local.sync_state == SyncState::Local
                    && !local.deleted
                    && !remote_ids.contains(&local.id)
                {
                    to_push.push(RemoteFavorite::from(local));
                }
            }

            if changed {
                self.inner.persist(&records)?;
            }
        }

        for snapshot in to_push {
            match self.api.push(&snapshot).await {
                Ok(()) => self.inner.mark_synced(&snapshot.id, snapshot.modified_at),
                Err(error) if error.is_retryable() => {
                    self.monitor.set_online(false);
                    self.enqueue_push(snapshot)?;
                }
                Err(error) => {
                    warn!(id = %snapshot.id, error = %error, "push rejected during refresh");
                }
            }
        }

        Ok(())
    }

    /// Drains deferred writes, then pulls and reconciles.
    ///
    /// Wired to the connectivity monitor's offline-to-online transition by
    /// the engine; also safe to invoke manually.
    pub async fn sync(&self) -> Result<DrainReport, LedgerError> {
        let report = self.queue.drain(&self.executor).await?;
        self.refresh().await?;
        Ok(report)
    }

    fn enqueue_push(&self, snapshot: RemoteFavorite) -> Result<(), QueueError> {
        let key = format!("push:{}", snapshot.id);
        // The ticket is dropped: save() reports local durability, and final
        // delivery state is visible through sync_state.
        let _ticket = self.queue.enqueue(&key, FavoriteMutation::Push(snapshot))?;
        Ok(())
    }

    fn enqueue_delete(&self, id: &str) -> Result<(), QueueError> {
        let key = format!("delete:{}", id);
        let _ticket = self
            .queue
            .enqueue(&key, FavoriteMutation::Delete { id: id.to_string() })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RetryPolicy;
    use crate::remote::mock::MockFavoritesApi;
    use tempfile::tempdir;

    fn favorite(id: &str, name: &str) -> FavoriteLocation {
        FavoriteLocation {
            id: id.to_string(),
            name: name.to_string(),
            latitude: 9.0820,
            longitude: 8.6753,
            address: "1 Main St".to_string(),
            modified_at: Utc::now(),
            sync_state: SyncState::Local,
            deleted: false,
        }
    }

    fn remote_favorite(id: &str, name: &str, modified_at: DateTime<Utc>) -> RemoteFavorite {
        RemoteFavorite {
            id: id.to_string(),
            name: name.to_string(),
            latitude: 9.0820,
            longitude: 8.6753,
            address: "1 Main St".to_string(),
            modified_at,
        }
    }

    struct Fixture {
        ledger: LocationLedger,
        api: Arc<MockFavoritesApi>,
        monitor: ConnectivityMonitor,
        _dir: tempfile::TempDir,
    }

    fn fixture(online: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let monitor = ConnectivityMonitor::with_state(online);
        let api = Arc::new(MockFavoritesApi::new());
        let queue = Arc::new(
            MutationQueue::open(
                dir.path().join("queue.json"),
                RetryPolicy::exponential(3),
                monitor.clone(),
            )
            .unwrap(),
        );
        let ledger = LocationLedger::open(
            dir.path().join("favorites.json"),
            Arc::clone(&api) as Arc<dyn FavoritesApi>,
            queue,
            monitor.clone(),
        )
        .unwrap();
        Fixture {
            ledger,
            api,
            monitor,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_save_online_pushes_and_marks_synced() {
        let fx = fixture(true);

        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        let saved = fx.ledger.get("f1").unwrap();
        assert_eq!(saved.sync_state, SyncState::Synced);
        assert!(fx.api.records.lock().contains_key("f1"));
    }

    #[tokio::test]
    async fn test_save_offline_queues_push() {
        let fx = fixture(false);

        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        let saved = fx.ledger.get("f1").unwrap();
        assert_eq!(saved.sync_state, SyncState::Local, "no remote ack yet");
        assert!(fx.api.records.lock().is_empty());
        assert_eq!(fx.ledger.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_save_transient_failure_falls_back_to_queue() {
        let fx = fixture(true);
        fx.api.fail_next(RemoteError::Transient("down".into()));

        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        assert_eq!(fx.ledger.get("f1").unwrap().sync_state, SyncState::Local);
        assert_eq!(fx.ledger.queue.len(), 1);
        assert!(!fx.monitor.is_online(), "failed call corrects the monitor");
    }

    #[tokio::test]
    async fn test_save_rejection_surfaces_but_keeps_local_record() {
        let fx = fixture(true);
        fx.api.fail_next(RemoteError::Rejected {
            status: 422,
            message: "bad name".into(),
        });

        let result = fx.ledger.save(favorite("f1", "Home")).await;

        assert!(matches!(
            result,
            Err(LedgerError::Remote(RemoteError::Rejected { .. }))
        ));
        assert!(fx.ledger.get("f1").is_some(), "local write survives");
    }

    #[tokio::test]
    async fn test_sync_delivers_offline_saves() {
        let fx = fixture(false);
        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        fx.monitor.set_online(true);
        let report = fx.ledger.sync().await.unwrap();

        assert_eq!(report.delivered, 1);
        assert!(fx.api.records.lock().contains_key("f1"));
        assert_eq!(fx.ledger.get("f1").unwrap().sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_repeated_offline_saves_push_once() {
        let fx = fixture(false);
        fx.ledger.save(favorite("f1", "Home")).await.unwrap();
        fx.ledger.save(favorite("f1", "Home v2")).await.unwrap();

        assert_eq!(fx.ledger.queue.len(), 1, "same dedup key supersedes");

        fx.monitor.set_online(true);
        fx.ledger.sync().await.unwrap();

        assert_eq!(fx.api.records.lock().get("f1").unwrap().name, "Home v2");
        assert_eq!(*fx.api.push_count.lock(), 1);
    }

    #[tokio::test]
    async fn test_remove_soft_marks_then_purges_on_ack() {
        let fx = fixture(true);
        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        fx.ledger.remove("f1").await.unwrap();

        assert!(fx.ledger.get("f1").is_none());
        assert!(fx.ledger.list().is_empty());
        assert!(!fx.api.records.lock().contains_key("f1"));
        // Purged outright after the acknowledged delete
        assert!(fx.ledger.inner.records.lock().get("f1").is_none());
    }

    #[tokio::test]
    async fn test_remove_offline_keeps_soft_mark_until_ack() {
        let fx = fixture(false);
        fx.ledger.save(favorite("f1", "Home")).await.unwrap();

        fx.ledger.remove("f1").await.unwrap();

        // Hidden from reads but still present under the soft mark
        assert!(fx.ledger.get("f1").is_none());
        assert!(fx.ledger.inner.records.lock().get("f1").is_some());

        fx.monitor.set_online(true);
        fx.ledger.sync().await.unwrap();

        assert!(fx.ledger.inner.records.lock().get("f1").is_none());
    }

    #[tokio::test]
    async fn test_refresh_remote_newer_overwrites_local() {
        let now = Utc::now();
        let fx = fixture(true);
        fx.ledger.save(favorite("f1", "Old name")).await.unwrap();

        let newer = now + chrono::Duration::minutes(10);
        fx.api
            .records
            .lock()
            .insert("f1".into(), remote_favorite("f1", "New name", newer));

        fx.ledger.refresh().await.unwrap();

        let local = fx.ledger.get("f1").unwrap();
        assert_eq!(local.name, "New name");
        assert_eq!(local.modified_at, newer);
        assert_eq!(local.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_refresh_local_newer_pushes_instead() {
        let fx = fixture(true);
        fx.ledger.save(favorite("f1", "Fresh local")).await.unwrap();

        let local_modified = fx.ledger.get("f1").unwrap().modified_at;
        let older = local_modified - chrono::Duration::minutes(10);
        fx.api
            .records
            .lock()
            .insert("f1".into(), remote_favorite("f1", "Stale remote", older));
        let pushes_before = *fx.api.push_count.lock();

        fx.ledger.refresh().await.unwrap();

        let local = fx.ledger.get("f1").unwrap();
        assert_eq!(local.name, "Fresh local", "local edit wins");
        assert_eq!(*fx.api.push_count.lock(), pushes_before + 1);
        assert_eq!(
            fx.api.records.lock().get("f1").unwrap().name,
            "Fresh local"
        );
    }

    #[tokio::test]
    async fn test_refresh_equal_timestamps_no_push() {
        let fx = fixture(true);
        fx.ledger.save(favorite("f1", "Same")).await.unwrap();

        let modified = fx.ledger.get("f1").unwrap().modified_at;
        fx.api
            .records
            .lock()
            .insert("f1".into(), remote_favorite("f1", "Same", modified));
        let pushes_before = *fx.api.push_count.lock();

        fx.ledger.refresh().await.unwrap();

        assert_eq!(*fx.api.push_count.lock(), pushes_before, "no push issued");
        assert_eq!(fx.ledger.get("f1").unwrap().name, "Same");
    }

    #[tokio::test]
    async fn test_refresh_adopts_remote_only_records() {
        let fx = fixture(true);
        fx.api
            .records
            .lock()
            .insert("r1".into(), remote_favorite("r1", "Remote", Utc::now()));

        fx.ledger.refresh().await.unwrap();

        let adopted = fx.ledger.get("r1").unwrap();
        assert_eq!(adopted.sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn test_refresh_does_not_resurrect_soft_deleted() {
        let fx = fixture(false);
        fx.ledger.save(favorite("f1", "Home")).await.unwrap();
        fx.ledger.remove("f1").await.unwrap();

        fx.monitor.set_online(true);
        fx.api
            .records
            .lock()
            .insert("f1".into(), remote_favorite("f1", "Zombie", Utc::now()));

        fx.ledger.refresh().await.unwrap();

        assert!(
            fx.ledger.get("f1").is_none(),
            "pending delete wins over the pull"
        );
    }

    #[tokio::test]
    async fn test_refresh_offline_is_noop() {
        let fx = fixture(false);
        fx.api
            .records
            .lock()
            .insert("r1".into(), remote_favorite("r1", "Remote", Utc::now()));

        fx.ledger.refresh().await.unwrap();

        assert!(fx.ledger.get("r1").is_none(), "no pull while offline");
    }

    #[tokio::test]
    async fn test_list_sorted_and_excludes_deleted() {
        let fx = fixture(false);
        fx.ledger.save(favorite("f1", "Zebra crossing")).await.unwrap();
        fx.ledger.save(favorite("f2", "Airport")).await.unwrap();
        fx.ledger.save(favorite("f3", "Market")).await.unwrap();
        fx.ledger.remove("f3").await.unwrap();

        let names: Vec<String> = fx.ledger.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Airport", "Zebra crossing"]);
    }

    #[tokio::test]
    async fn test_table_survives_reopen() {
        let dir = tempdir().unwrap();
        let monitor = ConnectivityMonitor::with_state(false);
        let api = Arc::new(MockFavoritesApi::new());
        let queue = Arc::new(
            MutationQueue::open(
                dir.path().join("queue.json"),
                RetryPolicy::exponential(3),
                monitor.clone(),
            )
            .unwrap(),
        );

        {
            let ledger = LocationLedger::open(
                dir.path().join("favorites.json"),
                Arc::clone(&api) as Arc<dyn FavoritesApi>,
                Arc::clone(&queue),
                monitor.clone(),
            )
            .unwrap();
            ledger.save(favorite("f1", "Durable")).await.unwrap();
        }

        let reopened = LocationLedger::open(
            dir.path().join("favorites.json"),
            api as Arc<dyn FavoritesApi>,
            queue,
            monitor,
        )
        .unwrap();
        assert_eq!(reopened.get("f1").unwrap().name, "Durable");
    }
}
