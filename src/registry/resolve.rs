//! Reference resolution: full UUID -> abbreviated UUID -> name.

use log::debug;

use crate::consts::{MAX_NAME_LEN, UUID_LEN};
use crate::error::{Error, Result};
use crate::model::EntityKind;

use super::state::State;

/// Characters a UUID (or a prefix of one) can contain.
fn is_uuid_chars(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

/// Volume and snapshot names: 1..=64 of `[A-Za-z0-9_.-]`, no leading '-', not a UUID.
pub fn validate_name(what: &str, name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::invalid(format!("{what} name is empty")));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::invalid(format!(
            "{what} name '{name}' is longer than {MAX_NAME_LEN} characters"
        )));
    }
    if name.starts_with('-') {
        return Err(Error::invalid(format!("{what} name '{name}' starts with '-'")));
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(Error::invalid(format!(
            "{what} name '{name}' contains invalid character {c:?}"
        )));
    }
    if uuid::Uuid::parse_str(name).is_ok() {
        return Err(Error::invalid(format!("{what} name '{name}' looks like a uuid")));
    }
    Ok(())
}

impl State {
    fn kind_of(&self, uuid: &str) -> Option<EntityKind> {
        if self.volumes.contains_key(uuid) {
            Some(EntityKind::Volume)
        } else if self.snapshot_volume.contains(uuid) {
            Some(EntityKind::Snapshot)
        } else {
            None
        }
    }

    /// Abbreviated step. `Ok(None)` means "no match, keep going".
    fn resolve_prefix(&self, r: &str) -> Result<Option<String>> {
        if r.len() < self.uuids.min_len() || !is_uuid_chars(r) {
            return Ok(None);
        }
        match self.uuids.get(r) {
            Ok(full) => Ok(Some(full)),
            Err(Error::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn too_short_or_missing(&self, r: &str, what: &str) -> Error {
        let min = self.uuids.min_len();
        if r.len() < min && is_uuid_chars(r) {
            Error::invalid(format!(
                "abbreviated id '{r}' is shorter than {min} characters"
            ))
        } else {
            Error::not_found(format!("{what} '{r}'"))
        }
    }

    /// Any entity by full UUID, abbreviated UUID or volume name.
    pub(crate) fn resolve(&self, r: &str) -> Result<(EntityKind, String)> {
        let r = r.trim();
        if r.is_empty() {
            return Err(Error::invalid("empty reference"));
        }
        if r.len() == UUID_LEN {
            if let Some(kind) = self.kind_of(r) {
                return Ok((kind, r.to_string()));
            }
        }
        if let Some(full) = self.resolve_prefix(r)? {
            if let Some(kind) = self.kind_of(&full) {
                debug!("resolve: '{}' -> {} {}", r, kind, full);
                return Ok((kind, full));
            }
        }
        if let Some(uuid) = self.names.get(r) {
            debug!("resolve: name '{}' -> volume {}", r, uuid);
            return Ok((EntityKind::Volume, uuid.to_string()));
        }
        Err(self.too_short_or_missing(r, "entity"))
    }

    pub(crate) fn resolve_volume(&self, r: &str) -> Result<String> {
        match self.resolve(r) {
            Ok((EntityKind::Volume, uuid)) => Ok(uuid),
            Ok((EntityKind::Snapshot, uuid)) => Err(Error::not_found(format!(
                "volume '{r}' ({uuid} is a snapshot)"
            ))),
            Err(Error::NotFound(_)) => Err(Error::not_found(format!("volume '{}'", r.trim()))),
            Err(e) => Err(e),
        }
    }

    /// Snapshot by full UUID, abbreviated UUID or, with `volume_ref`, by name within that
    /// volume. Returns (snapshot uuid, volume uuid).
    pub(crate) fn resolve_snapshot(
        &self,
        r: &str,
        volume_ref: Option<&str>,
    ) -> Result<(String, String)> {
        let r = r.trim();
        if r.is_empty() {
            return Err(Error::invalid("empty snapshot reference"));
        }
        let volume = match volume_ref.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => Some(self.resolve_volume(v)?),
            None => None,
        };
        let owned_by = |snap: &str| -> Result<(String, String)> {
            let owner = self.snapshot_volume.lookup(snap)?;
            match &volume {
                Some(v) if *v != owner => Err(Error::not_found(format!(
                    "snapshot '{r}' in volume {v}"
                ))),
                _ => Ok((snap.to_string(), owner)),
            }
        };

        if r.len() == UUID_LEN && self.snapshot_volume.contains(r) {
            return owned_by(r);
        }
        if let Some(full) = self.resolve_prefix(r)? {
            if self.snapshot_volume.contains(&full) {
                debug!("resolve snapshot: '{}' -> {}", r, full);
                return owned_by(&full);
            }
        }
        if let Some(v) = &volume {
            if let Some(snap) = self.snapshot_names.get(v).and_then(|idx| idx.get(r)) {
                debug!("resolve snapshot: name '{}' in {} -> {}", r, v, snap);
                return Ok((snap.to_string(), v.clone()));
            }
        }
        Err(self.too_short_or_missing(r, "snapshot"))
    }
}
