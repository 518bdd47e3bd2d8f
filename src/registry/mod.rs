//! Registry: canonical Volume/Snapshot records, their indexes, locking and persistence.
//!
//! Locking discipline:
//! - per-entity lock (`EntityLocks`, keyed by UUID) held across the whole operation,
//!   driver call included;
//! - global `RwLock<State>`: read for resolve/inspect/list, write for in-memory
//!   mutations and commits. It is never held across a driver call;
//! - entity locks are always taken before the global lock.
//!
//! A mutation commits in one write-locked critical section: persist the record, then
//! update records and indexes together. Readers never see a half-applied change.

use log::{debug, warn};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;
use std::time::Duration;

use crate::consts::{DEFAULT_FS_TYPE, DEFAULT_MIN_ABBREV_LEN, DEFAULT_VOLUME_SIZE};
use crate::driver::Driver;
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{now_rfc3339, BackupRecord, BackupStatus, EntityKind, Snapshot, Volume};

mod backup;
mod locks;
mod resolve;
mod snapshot;
mod state;
mod store;
mod volume;

pub use resolve::validate_name;

use locks::EntityLocks;
use state::State;
use store::Store;

/// Source of fresh entity UUIDs.
pub trait IdSource: Send + Sync {
    /// Hyphenated UUID string.
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl IdSource for RandomIds {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// What `delete_volume` does with remaining snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeletePolicy {
    /// Refuse with `Conflict` while snapshots exist.
    #[default]
    Strict,
    /// Delete the snapshots first.
    Cascade,
}

#[derive(Clone)]
pub struct RegistryOptions {
    pub min_abbrev_len: usize,
    /// Prefix for default mount points; None -> <root>/mounts.
    pub mounts_dir: Option<PathBuf>,
    /// Size used when a create omits it.
    pub default_volume_size: u64,
    pub default_fs_type: String,
    /// Deadline for requests that carry none.
    pub driver_timeout: Option<Duration>,
    pub id_source: Arc<dyn IdSource>,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            min_abbrev_len: DEFAULT_MIN_ABBREV_LEN,
            mounts_dir: None,
            default_volume_size: DEFAULT_VOLUME_SIZE,
            default_fs_type: DEFAULT_FS_TYPE.to_string(),
            driver_timeout: None,
            id_source: Arc::new(RandomIds),
        }
    }
}

impl RegistryOptions {
    pub fn with_min_abbrev_len(mut self, n: usize) -> Self {
        self.min_abbrev_len = n;
        self
    }
    pub fn with_mounts_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.mounts_dir = Some(dir.into());
        self
    }
    pub fn with_default_volume_size(mut self, bytes: u64) -> Self {
        self.default_volume_size = bytes;
        self
    }
    pub fn with_driver_timeout(mut self, t: Option<Duration>) -> Self {
        self.driver_timeout = t;
        self
    }
    pub fn with_id_source(mut self, ids: Arc<dyn IdSource>) -> Self {
        self.id_source = ids;
        self
    }
}

/// Counts reported by `info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct RegistryStats {
    pub volumes: usize,
    pub snapshots: usize,
    pub backups: usize,
    pub mounted: usize,
}

struct Shared {
    root: PathBuf,
    mounts_dir: PathBuf,
    driver: Arc<dyn Driver>,
    store: Store,
    state: RwLock<State>,
    locks: Arc<EntityLocks>,
    opts: RegistryOptions,
}

/// Cheap to clone; all clones share one state.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Shared>,
}

impl Registry {
    /// Load every persisted record under `root` and rebuild the indexes.
    /// The caller owns the root lock.
    pub fn open(root: &Path, driver: Arc<dyn Driver>, opts: RegistryOptions) -> Result<Self> {
        let store = Store::new(root);
        let mut state = State::new(opts.min_abbrev_len);

        for v in store.load_volumes()? {
            let id = v.uuid.clone();
            state
                .insert_volume(v)
                .map_err(|e| Error::internal(format!("load volume {id}: {e}")))?;
        }
        state.retired = store.load_retired()?;
        state.backups = store.load_backups()?;
        // записи, оборванные прошлым запуском, уже не завершатся
        let mut interrupted = 0;
        for rec in state
            .backups
            .iter_mut()
            .filter(|r| r.status == BackupStatus::InProgress)
        {
            rec.status = BackupStatus::Failed;
            rec.error = Some("interrupted by daemon restart".to_string());
            rec.finished_time = Some(now_rfc3339());
            interrupted += 1;
        }
        if interrupted > 0 {
            warn!("registry: {} backup journal entries were interrupted", interrupted);
            store.save_backups(&state.backups)?;
        }
        state.verify()?;

        let mounts_dir = opts
            .mounts_dir
            .clone()
            .unwrap_or_else(|| root.join("mounts"));
        debug!(
            "registry: loaded {} volumes, {} snapshots, {} retired ids from {}",
            state.volumes.len(),
            state.snapshot_count(),
            state.retired.len(),
            root.display()
        );

        Ok(Self {
            inner: Arc::new(Shared {
                root: root.to_path_buf(),
                mounts_dir,
                driver,
                store,
                state: RwLock::new(state),
                locks: EntityLocks::new(),
                opts,
            }),
        })
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.inner.driver
    }

    pub fn min_abbrev_len(&self) -> usize {
        self.inner.opts.min_abbrev_len
    }

    // ---------- read side ----------

    /// (kind, full uuid) of any reference.
    pub fn resolve(&self, r: &str) -> Result<(EntityKind, String)> {
        self.read()?.resolve(r)
    }

    /// (snapshot uuid, volume uuid).
    pub fn resolve_snapshot(&self, r: &str, volume_ref: Option<&str>) -> Result<(String, String)> {
        self.read()?.resolve_snapshot(r, volume_ref)
    }

    pub fn inspect_volume(&self, r: &str) -> Result<Volume> {
        let st = self.read()?;
        let uuid = st.resolve_volume(r)?;
        st.volumes
            .get(&uuid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("volume '{r}'")))
    }

    /// All volumes, oldest first.
    pub fn list_volumes(&self) -> Result<Vec<Volume>> {
        let st = self.read()?;
        let mut out: Vec<Volume> = st.volumes.values().cloned().collect();
        out.sort_by(|a, b| {
            a.created_time
                .cmp(&b.created_time)
                .then_with(|| a.uuid.cmp(&b.uuid))
        });
        Ok(out)
    }

    pub fn inspect_snapshot(&self, r: &str, volume_ref: Option<&str>) -> Result<Snapshot> {
        let st = self.read()?;
        let (snap, _) = st.resolve_snapshot(r, volume_ref)?;
        st.snapshot(&snap)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("snapshot '{r}'")))
    }

    pub fn list_backups(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.read()?.backups.clone())
    }

    pub fn stats(&self) -> Result<RegistryStats> {
        let st = self.read()?;
        Ok(RegistryStats {
            volumes: st.volumes.len(),
            snapshots: st.snapshot_count(),
            backups: st.backups.len(),
            mounted: st.volumes.values().filter(|v| v.is_mounted()).count(),
        })
    }

    /// Cross-check the indexes against the records.
    pub fn verify(&self) -> Result<()> {
        self.read()?.verify()
    }

    /// True while no create/delete is between validation and commit.
    pub fn is_quiescent(&self) -> Result<bool> {
        Ok(self.read()?.in_flight.is_empty())
    }

    // ---------- internals ----------

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.inner
            .state
            .read()
            .map_err(|_| Error::internal("registry state lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.inner
            .state
            .write()
            .map_err(|_| Error::internal("registry state lock poisoned"))
    }

    fn default_mount_point(&self, uuid: &str) -> PathBuf {
        self.inner.mounts_dir.join(uuid)
    }

    /// Run `op` under a deadline. Without one (request or default) it runs inline.
    /// On timeout the caller gets `Timeout` and `op` keeps running on its own thread,
    /// holding its entity locks until it commits or rolls back.
    fn run<T, F>(&self, timeout: Option<Duration>, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Registry) -> Result<T> + Send + 'static,
    {
        let Some(limit) = timeout.or(self.inner.opts.driver_timeout) else {
            return op(self);
        };

        let reg = self.clone();
        let (tx, rx) = mpsc::channel();
        let late_what = what.to_string();
        thread::Builder::new()
            .name("volumed-op".into())
            .spawn(move || {
                let res = op(&reg);
                let ok = res.is_ok();
                if tx.send(res).is_err() {
                    // вызывающий уже получил Timeout
                    warn!(
                        "{} finished after its deadline ({})",
                        late_what,
                        if ok { "committed" } else { "failed" }
                    );
                }
            })
            .map_err(|e| Error::internal(format!("spawn {what}: {e}")))?;

        match rx.recv_timeout(limit) {
            Ok(res) => res,
            Err(RecvTimeoutError::Timeout) => {
                metrics::record_driver_timeout();
                warn!("{} timed out after {} ms", what, limit.as_millis());
                Err(Error::Timeout(format!(
                    "{} did not finish within {} ms; it continues in the background",
                    what,
                    limit.as_millis()
                )))
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Error::internal(format!("{what}: worker thread died")))
            }
        }
    }
}
