//! Backup and restore, journalled in `backups.json`.
//!
//! Журнал: запись `in_progress` сохраняется до вызова драйвера, финальный статус
//! (`completed` / `failed`) после. Формат бэкапа принадлежит драйверу.

use log::{debug, info, warn};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{now_rfc3339, BackupKind, BackupRecord, BackupStatus, Volume};

use super::{validate_name, Registry};

impl Registry {
    /// Back the snapshot up to `dest_url`. On success the record's `url` is the location
    /// the driver reports, usable with `restore_snapshot`.
    pub fn backup_snapshot(
        &self,
        r: &str,
        volume_ref: Option<&str>,
        dest_url: &str,
        timeout: Option<Duration>,
    ) -> Result<BackupRecord> {
        let dest_url = dest_url.trim().to_string();
        if dest_url.is_empty() {
            return Err(Error::invalid("backup destination url is empty"));
        }
        let (snap, vol) = self.read()?.resolve_snapshot(r, volume_ref)?;

        self.run(timeout, "backup snapshot", move |reg| {
            let _guard = reg.inner.locks.lock(&snap)?;
            if reg.read()?.snapshot(&snap).is_none() {
                return Err(Error::not_found(format!("snapshot {snap}")));
            }

            let record = BackupRecord {
                id: uuid::Uuid::new_v4().to_string(),
                kind: BackupKind::Backup,
                snapshot_uuid: snap.clone(),
                volume_uuid: vol.clone(),
                url: dest_url.clone(),
                status: BackupStatus::InProgress,
                error: None,
                created_time: now_rfc3339(),
                finished_time: None,
            };
            reg.journal_append(record.clone())?;

            let driver = &reg.inner.driver;
            debug!("driver {}: backup snapshot {} to {}", driver.name(), snap, dest_url);
            match driver.backup_snapshot(&snap, &vol, &dest_url) {
                Ok(url) => {
                    let done = reg.journal_finish(&record.id, Ok(url))?;
                    metrics::record_backup_completed();
                    info!("backed up snapshot {} to {}", snap, done.url);
                    Ok(done)
                }
                Err(e) => {
                    metrics::record_driver_error();
                    warn!("backup of snapshot {} failed: {}", snap, e);
                    let err = Error::from(e);
                    reg.journal_finish(&record.id, Err(err.to_string()))?;
                    Err(err)
                }
            }
        })
    }

    /// Materialise the backup at `source_url` as a new volume.
    pub fn restore_snapshot(
        &self,
        source_url: &str,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Volume> {
        let source_url = source_url.trim().to_string();
        if source_url.is_empty() {
            return Err(Error::invalid("restore source url is empty"));
        }
        let name = name.trim().to_string();
        if !name.is_empty() {
            validate_name("volume", &name)?;
        }

        let uuid = {
            let mut st = self.write()?;
            if !name.is_empty() && st.volume_name_taken(&name) {
                return Err(Error::conflict(format!("volume name '{name}' already in use")));
            }
            let uuid = st.allocate_uuid(self.inner.opts.id_source.as_ref())?;
            st.reserve_volume(&uuid, &name);
            uuid
        };

        self.run(timeout, "restore snapshot", move |reg| {
            let out = reg.restore_reserved(&uuid, &name, &source_url);
            if out.is_err() {
                if let Ok(mut st) = reg.write() {
                    st.release_volume(&uuid, &name);
                }
            }
            out
        })
    }

    fn restore_reserved(&self, uuid: &str, name: &str, source_url: &str) -> Result<Volume> {
        let _guard = self.inner.locks.lock(uuid)?;
        let record = BackupRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind: BackupKind::Restore,
            snapshot_uuid: String::new(),
            volume_uuid: uuid.to_string(),
            url: source_url.to_string(),
            status: BackupStatus::InProgress,
            error: None,
            created_time: now_rfc3339(),
            finished_time: None,
        };
        self.journal_append(record.clone())?;

        let driver = &self.inner.driver;
        debug!("driver {}: restore {} as volume {}", driver.name(), source_url, uuid);
        let restored = match driver.restore_snapshot(source_url, uuid) {
            Ok(r) => r,
            Err(e) => {
                metrics::record_driver_error();
                warn!("restore of {} failed: {}", source_url, e);
                self.rollback_volume(uuid);
                let err = Error::from(e);
                self.journal_finish(&record.id, Err(err.to_string()))?;
                return Err(err);
            }
        };

        let vol = Volume {
            uuid: uuid.to_string(),
            name: name.to_string(),
            size: restored.size,
            mount_point: String::new(),
            file_system: restored.file_system,
            created_time: now_rfc3339(),
            snapshots: Default::default(),
        };
        if let Err(e) = self.commit_new_volume(&vol) {
            self.journal_finish(&record.id, Err(e.to_string()))?;
            return Err(e);
        }
        self.journal_finish(&record.id, Ok(source_url.to_string()))?;
        metrics::record_volume_created();
        metrics::record_restore_completed();
        info!(
            "restored volume {} (name '{}') from {}",
            vol.uuid, vol.name, source_url
        );
        Ok(vol)
    }

    fn journal_append(&self, record: BackupRecord) -> Result<()> {
        let mut st = self.write()?;
        st.backups.push(record);
        if let Err(e) = self.inner.store.save_backups(&st.backups) {
            st.backups.pop();
            return Err(e);
        }
        Ok(())
    }

    /// Set the terminal status. `Ok(url)` also replaces the record's url.
    fn journal_finish(
        &self,
        id: &str,
        outcome: std::result::Result<String, String>,
    ) -> Result<BackupRecord> {
        let mut st = self.write()?;
        let rec = st
            .backups
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| Error::internal(format!("backup record {id} vanished")))?;
        match outcome {
            Ok(url) => {
                rec.status = BackupStatus::Completed;
                rec.url = url;
            }
            Err(msg) => {
                rec.status = BackupStatus::Failed;
                rec.error = Some(msg);
            }
        }
        rec.finished_time = Some(now_rfc3339());
        let done = rec.clone();
        self.inner.store.save_backups(&st.backups)?;
        Ok(done)
    }
}
