//! Snapshot lifecycle: create, delete.

use log::{debug, info, warn};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::metrics;
use crate::model::{now_rfc3339, Snapshot};

use super::{validate_name, Registry};

impl Registry {
    /// Point-in-time snapshot of `volume_ref`. Empty `name` leaves it unnamed.
    pub fn create_snapshot(
        &self,
        volume_ref: &str,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<Snapshot> {
        let name = name.trim().to_string();
        if !name.is_empty() {
            validate_name("snapshot", &name)?;
        }

        let (uuid, vol) = {
            let mut st = self.write()?;
            let vol = st.resolve_volume(volume_ref)?;
            if st.is_deleting(&vol) {
                return Err(Error::conflict(format!("volume {vol} is being deleted")));
            }
            if !name.is_empty() && st.snapshot_name_taken(&vol, &name) {
                return Err(Error::conflict(format!(
                    "snapshot name '{name}' already in use in volume {vol}"
                )));
            }
            let uuid = st.allocate_uuid(self.inner.opts.id_source.as_ref())?;
            st.reserve_snapshot(&uuid, &vol, &name);
            (uuid, vol)
        };

        self.run(timeout, "create snapshot", move |reg| {
            let out = reg.create_snapshot_reserved(&uuid, &vol, &name);
            if let Ok(mut st) = reg.write() {
                st.release_snapshot(&uuid, &vol, &name);
            }
            out
        })
    }

    fn create_snapshot_reserved(&self, uuid: &str, vol: &str, name: &str) -> Result<Snapshot> {
        let _guard = self.inner.locks.lock(uuid)?;
        let driver = &self.inner.driver;

        debug!("driver {}: create snapshot {} of {}", driver.name(), uuid, vol);
        if let Err(e) = driver.create_snapshot(uuid, vol) {
            metrics::record_driver_error();
            warn!("create snapshot {} of {} failed: {}", uuid, vol, e);
            self.rollback_snapshot(uuid, vol);
            return Err(e.into());
        }

        let snap = Snapshot {
            uuid: uuid.to_string(),
            volume_uuid: vol.to_string(),
            name: name.to_string(),
            created_time: now_rfc3339(),
        };

        let committed = {
            let mut st = self.write()?;
            // удаление тома блокируется, пока идут создания снапшотов
            let mut v = st
                .volumes
                .get(vol)
                .cloned()
                .ok_or_else(|| Error::internal(format!("volume {vol} vanished during snapshot")))?;
            v.snapshots.insert(snap.uuid.clone(), snap.clone());
            self.inner
                .store
                .save_volume(&v)
                .and_then(|_| st.insert_snapshot(snap.clone()))
        };
        if let Err(e) = committed {
            self.rollback_snapshot(uuid, vol);
            return Err(e);
        }

        metrics::record_snapshot_created();
        info!("created snapshot {} (name '{}') of volume {}", uuid, name, vol);
        Ok(snap)
    }

    fn rollback_snapshot(&self, uuid: &str, vol: &str) {
        let driver = &self.inner.driver;
        match driver.snapshot_exists(uuid, vol) {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => warn!("re-query of snapshot {} failed: {}; deleting anyway", uuid, e),
        }
        match driver.delete_snapshot(uuid, vol) {
            Ok(()) => {
                metrics::record_rollback();
                warn!("rolled back driver snapshot {}", uuid);
            }
            Err(e) => warn!("rollback of driver snapshot {} failed: {}", uuid, e),
        }
    }

    /// Delete a snapshot by UUID, abbreviated UUID or (with `volume_ref`) by name.
    pub fn delete_snapshot(
        &self,
        r: &str,
        volume_ref: Option<&str>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let (snap, vol) = self.read()?.resolve_snapshot(r, volume_ref)?;
        self.run(timeout, "delete snapshot", move |reg| {
            let _guard = reg.inner.locks.lock(&snap)?;
            {
                let mut st = reg.write()?;
                if st.snapshot(&snap).is_none() {
                    return Err(Error::not_found(format!("snapshot {snap}")));
                }
                st.mark_deleting(&snap);
            }
            let out = reg.delete_snapshot_held(&snap, &vol);
            if let Ok(mut st) = reg.write() {
                st.unmark_deleting(&snap);
            }
            out.map(|_| ())
        })
    }

    /// Driver delete + commit for a snapshot whose entity lock the caller holds.
    /// `Ok(false)` if it was already gone.
    pub(super) fn delete_snapshot_held(&self, snap: &str, vol: &str) -> Result<bool> {
        if self.read()?.snapshot(snap).is_none() {
            return Ok(false);
        }
        let driver = &self.inner.driver;

        debug!("driver {}: delete snapshot {} of {}", driver.name(), snap, vol);
        if let Err(e) = driver.delete_snapshot(snap, vol) {
            metrics::record_driver_error();
            match driver.snapshot_exists(snap, vol) {
                Ok(false) => warn!(
                    "delete snapshot {} reported '{}' but the driver no longer has it; committing",
                    snap, e
                ),
                _ => return Err(e.into()),
            }
        }

        let mut st = self.write()?;
        let mut v = st
            .volumes
            .get(vol)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("volume {vol}")))?;
        v.snapshots.remove(snap);
        st.retired.insert(snap.to_string());
        self.inner.store.save_retired(&st.retired)?;
        self.inner.store.save_volume(&v)?;
        let removed = st.remove_snapshot(snap);
        drop(st);

        metrics::record_snapshot_deleted();
        if let Some(s) = removed {
            info!("deleted snapshot {} (name '{}') of volume {}", s.uuid, s.name, vol);
        }
        Ok(true)
    }
}
