//! In-memory registry state: canonical records plus the derived indexes.
//!
//! `volumes` is the single source of truth. The three indexes (volume names, snapshot
//! names per volume, snapshot -> volume) and the abbreviated-UUID index are derived from
//! it and are only ever changed together with it, through the mutators below, under the
//! registry write lock.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::consts::UUID_ALLOC_ATTEMPTS;
use crate::error::{Error, Result};
use crate::index::{Index, TruncIndex};
use crate::model::{BackupRecord, Snapshot, Volume};

use super::IdSource;

/// Operations that are past validation but not yet committed.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
    /// UUIDs handed out to creates.
    uuids: HashSet<String>,
    volume_names: HashSet<String>,
    /// (volume uuid, snapshot name)
    snapshot_names: HashSet<(String, String)>,
    /// volume uuid -> snapshot creates running against it
    snapshot_creates: HashMap<String, usize>,
    /// entities with a delete in progress
    deleting: HashSet<String>,
}

impl InFlight {
    pub(crate) fn is_empty(&self) -> bool {
        self.uuids.is_empty()
            && self.volume_names.is_empty()
            && self.snapshot_names.is_empty()
            && self.snapshot_creates.is_empty()
            && self.deleting.is_empty()
    }
}

#[derive(Debug)]
pub(crate) struct State {
    pub(crate) volumes: HashMap<String, Volume>,
    /// volume name -> volume uuid
    pub(crate) names: Index,
    /// volume uuid -> (snapshot name -> snapshot uuid)
    pub(crate) snapshot_names: HashMap<String, Index>,
    /// snapshot uuid -> volume uuid
    pub(crate) snapshot_volume: Index,
    /// volume and snapshot uuids together
    pub(crate) uuids: TruncIndex,
    pub(crate) retired: BTreeSet<String>,
    pub(crate) backups: Vec<BackupRecord>,
    pub(crate) in_flight: InFlight,
}

impl State {
    pub(crate) fn new(min_abbrev_len: usize) -> Self {
        Self {
            volumes: HashMap::new(),
            names: Index::new("volume name"),
            snapshot_names: HashMap::new(),
            snapshot_volume: Index::new("snapshot"),
            uuids: TruncIndex::new(min_abbrev_len),
            retired: BTreeSet::new(),
            backups: Vec::new(),
            in_flight: InFlight::default(),
        }
    }

    pub(crate) fn snapshot_count(&self) -> usize {
        self.snapshot_volume.len()
    }

    pub(crate) fn snapshot(&self, snap_uuid: &str) -> Option<&Snapshot> {
        let vol = self.snapshot_volume.get(snap_uuid)?;
        self.volumes.get(vol)?.snapshots.get(snap_uuid)
    }

    // ---------- UUID allocation ----------

    /// A UUID never seen by this root: not live, not retired, not reserved.
    pub(crate) fn allocate_uuid(&self, ids: &dyn IdSource) -> Result<String> {
        for _ in 0..UUID_ALLOC_ATTEMPTS {
            let id = ids.next_id();
            if uuid::Uuid::parse_str(&id).is_err() {
                return Err(Error::internal(format!("id source produced '{id}'")));
            }
            if !self.is_issued(&id) {
                return Ok(id);
            }
        }
        Err(Error::internal(format!(
            "no fresh uuid after {UUID_ALLOC_ATTEMPTS} attempts"
        )))
    }

    fn is_issued(&self, id: &str) -> bool {
        self.volumes.contains_key(id)
            || self.snapshot_volume.contains(id)
            || self.retired.contains(id)
            || self.in_flight.uuids.contains(id)
    }

    // ---------- in-flight table ----------

    pub(crate) fn volume_name_taken(&self, name: &str) -> bool {
        self.names.contains(name) || self.in_flight.volume_names.contains(name)
    }

    pub(crate) fn snapshot_name_taken(&self, volume_uuid: &str, name: &str) -> bool {
        self.snapshot_names
            .get(volume_uuid)
            .map(|idx| idx.contains(name))
            .unwrap_or(false)
            || self
                .in_flight
                .snapshot_names
                .contains(&(volume_uuid.to_string(), name.to_string()))
    }

    pub(crate) fn reserve_volume(&mut self, uuid: &str, name: &str) {
        self.in_flight.uuids.insert(uuid.to_string());
        if !name.is_empty() {
            self.in_flight.volume_names.insert(name.to_string());
        }
    }

    pub(crate) fn release_volume(&mut self, uuid: &str, name: &str) {
        self.in_flight.uuids.remove(uuid);
        if !name.is_empty() {
            self.in_flight.volume_names.remove(name);
        }
    }

    pub(crate) fn reserve_snapshot(&mut self, uuid: &str, volume_uuid: &str, name: &str) {
        self.in_flight.uuids.insert(uuid.to_string());
        if !name.is_empty() {
            self.in_flight
                .snapshot_names
                .insert((volume_uuid.to_string(), name.to_string()));
        }
        *self
            .in_flight
            .snapshot_creates
            .entry(volume_uuid.to_string())
            .or_insert(0) += 1;
    }

    pub(crate) fn release_snapshot(&mut self, uuid: &str, volume_uuid: &str, name: &str) {
        self.in_flight.uuids.remove(uuid);
        if !name.is_empty() {
            self.in_flight
                .snapshot_names
                .remove(&(volume_uuid.to_string(), name.to_string()));
        }
        if let Some(n) = self.in_flight.snapshot_creates.get_mut(volume_uuid) {
            *n -= 1;
            if *n == 0 {
                self.in_flight.snapshot_creates.remove(volume_uuid);
            }
        }
    }

    pub(crate) fn snapshot_creates_in_flight(&self, volume_uuid: &str) -> usize {
        self.in_flight
            .snapshot_creates
            .get(volume_uuid)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn mark_deleting(&mut self, uuid: &str) {
        self.in_flight.deleting.insert(uuid.to_string());
    }

    pub(crate) fn unmark_deleting(&mut self, uuid: &str) {
        self.in_flight.deleting.remove(uuid);
    }

    pub(crate) fn is_deleting(&self, uuid: &str) -> bool {
        self.in_flight.deleting.contains(uuid)
    }

    // ---------- mutators (records + indexes together) ----------

    /// Add a volume with its embedded snapshots. Nothing changes on error.
    pub(crate) fn insert_volume(&mut self, v: Volume) -> Result<()> {
        if self.volumes.contains_key(&v.uuid) || self.uuids.contains(&v.uuid) {
            return Err(Error::conflict(format!("volume {} already registered", v.uuid)));
        }
        if !v.name.is_empty() {
            if let Some(other) = self.names.get(&v.name) {
                return Err(Error::conflict(format!(
                    "volume name '{}' already in use by {}",
                    v.name, other
                )));
            }
        }
        let mut snap_names = HashSet::new();
        for (id, s) in &v.snapshots {
            if id != &s.uuid || s.volume_uuid != v.uuid {
                return Err(Error::internal(format!(
                    "volume {}: snapshot entry {} is inconsistent",
                    v.uuid, id
                )));
            }
            if self.uuids.contains(id) || self.snapshot_volume.contains(id) {
                return Err(Error::conflict(format!("snapshot {id} already registered")));
            }
            if !s.name.is_empty() && !snap_names.insert(s.name.as_str()) {
                return Err(Error::conflict(format!(
                    "volume {}: snapshot name '{}' used twice",
                    v.uuid, s.name
                )));
            }
        }

        self.uuids.add(&v.uuid)?;
        if !v.name.is_empty() {
            self.names.put(&v.name, &v.uuid)?;
        }
        let mut per_volume = Index::new("snapshot name");
        for s in v.snapshots.values() {
            self.uuids.add(&s.uuid)?;
            self.snapshot_volume.put(&s.uuid, &v.uuid)?;
            if !s.name.is_empty() {
                per_volume.put(&s.name, &s.uuid)?;
            }
        }
        self.snapshot_names.insert(v.uuid.clone(), per_volume);
        self.volumes.insert(v.uuid.clone(), v);
        Ok(())
    }

    /// Drop a volume, its snapshots and every index entry pointing at them.
    pub(crate) fn remove_volume(&mut self, uuid: &str) -> Option<Volume> {
        let v = self.volumes.remove(uuid)?;
        if !v.name.is_empty() {
            self.names.remove(&v.name);
        }
        self.uuids.remove(&v.uuid);
        for s in v.snapshots.keys() {
            self.snapshot_volume.remove(s);
            self.uuids.remove(s);
        }
        self.snapshot_names.remove(uuid);
        Some(v)
    }

    /// The only in-place change a live volume record takes; snapshots stay as they are.
    pub(crate) fn set_mount_point(&mut self, uuid: &str, mount_point: &str) -> Result<()> {
        let cur = self
            .volumes
            .get_mut(uuid)
            .ok_or_else(|| Error::not_found(format!("volume {uuid}")))?;
        cur.mount_point = mount_point.to_string();
        Ok(())
    }

    pub(crate) fn insert_snapshot(&mut self, s: Snapshot) -> Result<()> {
        if !self.volumes.contains_key(&s.volume_uuid) {
            return Err(Error::not_found(format!("volume {}", s.volume_uuid)));
        }
        if self.uuids.contains(&s.uuid) || self.snapshot_volume.contains(&s.uuid) {
            return Err(Error::conflict(format!("snapshot {} already registered", s.uuid)));
        }
        let per_volume = self
            .snapshot_names
            .entry(s.volume_uuid.clone())
            .or_insert_with(|| Index::new("snapshot name"));
        if !s.name.is_empty() {
            per_volume.put(&s.name, &s.uuid)?;
        }
        self.snapshot_volume.put(&s.uuid, &s.volume_uuid)?;
        self.uuids.add(&s.uuid)?;
        if let Some(v) = self.volumes.get_mut(&s.volume_uuid) {
            v.snapshots.insert(s.uuid.clone(), s);
        }
        Ok(())
    }

    pub(crate) fn remove_snapshot(&mut self, snap_uuid: &str) -> Option<Snapshot> {
        let vol = self.snapshot_volume.remove(snap_uuid)?;
        self.uuids.remove(snap_uuid);
        let s = self.volumes.get_mut(&vol)?.snapshots.remove(snap_uuid)?;
        if !s.name.is_empty() {
            if let Some(idx) = self.snapshot_names.get_mut(&vol) {
                idx.remove(&s.name);
            }
        }
        Some(s)
    }

    // ---------- consistency ----------

    /// Cross-check every index against the records.
    pub(crate) fn verify(&self) -> Result<()> {
        let bad = |msg: String| Err(Error::internal(format!("index inconsistency: {msg}")));

        let mut named_volumes = 0usize;
        let mut total_snapshots = 0usize;
        for (id, v) in &self.volumes {
            if id != &v.uuid {
                return bad(format!("volume key {} holds {}", id, v.uuid));
            }
            if !self.uuids.contains(id) {
                return bad(format!("volume {id} missing from abbreviated index"));
            }
            if !v.name.is_empty() {
                named_volumes += 1;
                if self.names.get(&v.name) != Some(id.as_str()) {
                    return bad(format!("volume name '{}' not bound to {}", v.name, id));
                }
            }
            let per_volume = self.snapshot_names.get(id);
            let mut named_snaps = 0usize;
            for (sid, s) in &v.snapshots {
                total_snapshots += 1;
                if sid != &s.uuid || s.volume_uuid != *id {
                    return bad(format!("snapshot entry {sid} of {id}"));
                }
                if self.snapshot_volume.get(sid) != Some(id.as_str()) {
                    return bad(format!("snapshot {sid} not mapped to volume {id}"));
                }
                if !self.uuids.contains(sid) {
                    return bad(format!("snapshot {sid} missing from abbreviated index"));
                }
                if !s.name.is_empty() {
                    named_snaps += 1;
                    if per_volume.and_then(|idx| idx.get(&s.name)) != Some(sid.as_str()) {
                        return bad(format!("snapshot name '{}' not bound to {}", s.name, sid));
                    }
                }
            }
            let indexed = per_volume.map(|idx| idx.len()).unwrap_or(0);
            if indexed != named_snaps {
                return bad(format!(
                    "volume {id}: {indexed} snapshot names indexed, {named_snaps} named snapshots"
                ));
            }
        }

        if self.names.len() != named_volumes {
            return bad(format!(
                "{} volume names indexed, {} named volumes",
                self.names.len(),
                named_volumes
            ));
        }
        if self.snapshot_volume.len() != total_snapshots {
            return bad(format!(
                "{} snapshot back-references, {} snapshots",
                self.snapshot_volume.len(),
                total_snapshots
            ));
        }
        if self.uuids.len() != self.volumes.len() + total_snapshots {
            return bad(format!(
                "{} abbreviated ids, {} entities",
                self.uuids.len(),
                self.volumes.len() + total_snapshots
            ));
        }
        if let Some(orphan) = self
            .snapshot_names
            .keys()
            .find(|vol| !self.volumes.contains_key(*vol))
        {
            return bad(format!("snapshot names kept for missing volume {orphan}"));
        }
        Ok(())
    }
}
