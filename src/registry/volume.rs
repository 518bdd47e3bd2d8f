//! Volume lifecycle: create, delete, mount, umount.

use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::driver::VolumeSpec;
use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{now_rfc3339, Volume};

use super::{validate_name, DeletePolicy, Registry};

impl Registry {
    /// Allocate a new volume. Empty `name` leaves it addressable by UUID only;
    /// `size`/`fs_type` default to the registry options.
    pub fn create_volume(
        &self,
        name: &str,
        size: Option<u64>,
        fs_type: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Volume> {
        let name = name.trim().to_string();
        if !name.is_empty() {
            validate_name("volume", &name)?;
        }
        let size = size.unwrap_or(self.inner.opts.default_volume_size);
        if size == 0 {
            return Err(Error::invalid("volume size must be greater than zero"));
        }
        let fs = fs_type
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(self.inner.opts.default_fs_type.as_str())
            .to_string();

        let uuid = {
            let mut st = self.write()?;
            if !name.is_empty() && st.volume_name_taken(&name) {
                return Err(Error::conflict(format!("volume name '{name}' already in use")));
            }
            let uuid = st.allocate_uuid(self.inner.opts.id_source.as_ref())?;
            st.reserve_volume(&uuid, &name);
            uuid
        };

        self.run(timeout, "create volume", move |reg| {
            let out = reg.create_volume_reserved(&uuid, &name, size, &fs);
            if out.is_err() {
                if let Ok(mut st) = reg.write() {
                    st.release_volume(&uuid, &name);
                }
            }
            out
        })
    }

    fn create_volume_reserved(&self, uuid: &str, name: &str, size: u64, fs: &str) -> Result<Volume> {
        let _guard = self.inner.locks.lock(uuid)?;
        let driver = &self.inner.driver;

        let spec = VolumeSpec {
            uuid: uuid.to_string(),
            size,
            file_system: fs.to_string(),
        };
        debug!("driver {}: create volume {}", driver.name(), uuid);
        if let Err(e) = driver.create_volume(&spec) {
            metrics::record_driver_error();
            warn!("create volume {} failed: {}", uuid, e);
            self.rollback_volume(uuid);
            return Err(e.into());
        }

        let vol = Volume {
            uuid: uuid.to_string(),
            name: name.to_string(),
            size,
            mount_point: String::new(),
            file_system: fs.to_string(),
            created_time: now_rfc3339(),
            snapshots: Default::default(),
        };
        self.commit_new_volume(&vol)?;
        metrics::record_volume_created();
        info!(
            "created volume {} (name '{}', {} bytes, {})",
            vol.uuid, vol.name, vol.size, vol.file_system
        );
        Ok(vol)
    }

    /// Persist + index a volume whose driver object already exists. Rolls the driver
    /// object back if the commit fails.
    pub(super) fn commit_new_volume(&self, vol: &Volume) -> Result<()> {
        let mut st = self.write()?;
        let committed = self
            .inner
            .store
            .save_volume(vol)
            .and_then(|_| match st.insert_volume(vol.clone()) {
                Ok(()) => Ok(()),
                Err(e) => {
                    let _ = self.inner.store.remove_volume(&vol.uuid);
                    Err(Error::internal(format!("index volume {}: {}", vol.uuid, e)))
                }
            });
        match committed {
            Ok(()) => {
                st.release_volume(&vol.uuid, &vol.name);
                Ok(())
            }
            Err(e) => {
                drop(st);
                self.rollback_volume(&vol.uuid);
                Err(e)
            }
        }
    }

    /// Best effort: remove whatever a failed create left behind in the driver.
    pub(super) fn rollback_volume(&self, uuid: &str) {
        let driver = &self.inner.driver;
        match driver.volume_exists(uuid) {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => warn!("re-query of volume {} failed: {}; deleting anyway", uuid, e),
        }
        match driver.delete_volume(uuid) {
            Ok(()) => {
                metrics::record_rollback();
                warn!("rolled back driver volume {}", uuid);
            }
            Err(e) => warn!("rollback of driver volume {} failed: {}", uuid, e),
        }
    }

    /// Delete a volume. With `Strict` a volume that still has snapshots is a `Conflict`;
    /// `Cascade` deletes the snapshots first. A mounted volume is always a `Conflict`.
    pub fn delete_volume(
        &self,
        r: &str,
        policy: DeletePolicy,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let uuid = self.read()?.resolve_volume(r)?;
        self.run(timeout, "delete volume", move |reg| {
            reg.delete_volume_locked(&uuid, policy)
        })
    }

    fn delete_volume_locked(&self, uuid: &str, policy: DeletePolicy) -> Result<()> {
        let _guard = self.inner.locks.lock(uuid)?;

        let snaps: Vec<String> = {
            let mut st = self.write()?;
            // пока ждали лок, том могли удалить
            let v = st
                .volumes
                .get(uuid)
                .ok_or_else(|| Error::not_found(format!("volume {uuid}")))?;
            if v.is_mounted() {
                return Err(Error::conflict(format!(
                    "volume {} is mounted at {}",
                    uuid, v.mount_point
                )));
            }
            if !v.snapshots.is_empty() && policy == DeletePolicy::Strict {
                return Err(Error::conflict(format!(
                    "volume {} has {} snapshot(s)",
                    uuid,
                    v.snapshots.len()
                )));
            }
            let snaps: Vec<String> = v.snapshots.keys().cloned().collect();
            let creating = st.snapshot_creates_in_flight(uuid);
            if creating > 0 {
                return Err(Error::conflict(format!(
                    "volume {uuid} has {creating} snapshot create(s) in progress"
                )));
            }
            st.mark_deleting(uuid);
            snaps
        };

        let out = self.delete_volume_marked(uuid, &snaps);
        if let Ok(mut st) = self.write() {
            st.unmark_deleting(uuid);
        }
        out
    }

    fn delete_volume_marked(&self, uuid: &str, snaps: &[String]) -> Result<()> {
        let driver = &self.inner.driver;

        if !snaps.is_empty() {
            let _snap_guards = self.inner.locks.lock_many(snaps)?;
            for s in snaps {
                self.delete_snapshot_held(s, uuid)?;
            }
            debug!("cascade: {} snapshot(s) of {} deleted", snaps.len(), uuid);
        }

        debug!("driver {}: delete volume {}", driver.name(), uuid);
        if let Err(e) = driver.delete_volume(uuid) {
            metrics::record_driver_error();
            match driver.volume_exists(uuid) {
                Ok(false) => warn!(
                    "delete volume {} reported '{}' but the driver no longer has it; committing",
                    uuid, e
                ),
                _ => return Err(e.into()),
            }
        }

        // драйвер уже удалил том; запись остаётся в реестре, пока не удалён её файл,
        // так что повторный delete доводит дело до конца
        let mut st = self.write()?;
        st.retired.insert(uuid.to_string());
        self.inner
            .store
            .save_retired(&st.retired)
            .and_then(|_| self.inner.store.remove_volume(uuid))
            .map_err(|e| {
                Error::internal(format!(
                    "volume {uuid} is gone from the driver but its record is still registered \
                     (delete half-committed, retry it): {e}"
                ))
            })?;
        let removed = st.remove_volume(uuid);
        drop(st);

        metrics::record_volume_deleted();
        if let Some(v) = removed {
            info!("deleted volume {} (name '{}')", v.uuid, v.name);
        }
        Ok(())
    }

    /// Expose a volume at `mount_point` (default `<mounts-dir>/<uuid>`). Mounting again
    /// at the same place is a no-op; at another place it is a `Conflict`.
    pub fn mount_volume(
        &self,
        r: &str,
        mount_point: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<Volume> {
        let target = match mount_point.map(str::trim).filter(|s| !s.is_empty()) {
            Some(p) if !Path::new(p).is_absolute() => {
                return Err(Error::invalid(format!("mount point '{p}' is not absolute")))
            }
            Some(p) => Some(PathBuf::from(p)),
            None => None,
        };
        let uuid = self.read()?.resolve_volume(r)?;
        self.run(timeout, "mount volume", move |reg| {
            reg.mount_volume_locked(&uuid, target)
        })
    }

    fn mount_volume_locked(&self, uuid: &str, target: Option<PathBuf>) -> Result<Volume> {
        let _guard = self.inner.locks.lock(uuid)?;
        let driver = &self.inner.driver;

        let v = self.current_volume(uuid)?;
        if v.is_mounted() {
            return match target {
                Some(t) if t != Path::new(&v.mount_point) => Err(Error::conflict(format!(
                    "volume {} is already mounted at {}",
                    uuid, v.mount_point
                ))),
                _ => Ok(v),
            };
        }
        let target = target.unwrap_or_else(|| self.default_mount_point(uuid));

        debug!("driver {}: mount {} at {}", driver.name(), uuid, target.display());
        let effective = driver.mount_volume(uuid, &target).map_err(|e| {
            metrics::record_driver_error();
            Error::from(e)
        })?;

        let nv = match self.commit_mount_point(uuid, &effective.to_string_lossy()) {
            Ok(nv) => nv,
            Err(e) => {
                if let Err(ue) = driver.umount_volume(uuid) {
                    warn!("umount {} after failed commit: {}", uuid, ue);
                }
                return Err(e);
            }
        };
        metrics::record_volume_mounted();
        info!("mounted volume {} at {}", uuid, nv.mount_point);
        Ok(nv)
    }

    /// Idempotent: unmounting an unmounted volume returns it unchanged.
    pub fn umount_volume(&self, r: &str, timeout: Option<Duration>) -> Result<Volume> {
        let uuid = self.read()?.resolve_volume(r)?;
        self.run(timeout, "umount volume", move |reg| reg.umount_volume_locked(&uuid))
    }

    fn umount_volume_locked(&self, uuid: &str) -> Result<Volume> {
        let _guard = self.inner.locks.lock(uuid)?;
        let driver = &self.inner.driver;

        let v = self.current_volume(uuid)?;
        if !v.is_mounted() {
            return Ok(v);
        }
        debug!("driver {}: umount {}", driver.name(), uuid);
        driver.umount_volume(uuid).map_err(|e| {
            metrics::record_driver_error();
            Error::from(e)
        })?;

        let nv = self.commit_mount_point(uuid, "")?;
        info!("unmounted volume {} from {}", uuid, v.mount_point);
        Ok(nv)
    }

    fn current_volume(&self, uuid: &str) -> Result<Volume> {
        self.read()?
            .volumes
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("volume {uuid}")))
    }

    /// Persist a new `mount_point`. The record is re-read under the write lock: snapshots
    /// of this volume commit under their own entity locks and may have changed since the
    /// caller looked.
    fn commit_mount_point(&self, uuid: &str, mount_point: &str) -> Result<Volume> {
        let mut st = self.write()?;
        let mut v = st
            .volumes
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("volume {uuid}")))?;
        v.mount_point = mount_point.to_string();
        self.inner.store.save_volume(&v)?;
        st.set_mount_point(uuid, mount_point)?;
        Ok(v)
    }
}
