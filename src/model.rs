//! Volume / Snapshot / BackupRecord - записи реестра (и тела ответов API).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A logical block-storage unit managed by a driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub uuid: String,
    /// Empty when the volume is addressable by UUID only.
    #[serde(default)]
    pub name: String,
    pub size: u64,
    /// Empty when unmounted.
    #[serde(default)]
    pub mount_point: String,
    pub file_system: String,
    pub created_time: String,
    /// snapshot uuid -> snapshot; ordered so that the serialized record is canonical.
    #[serde(default)]
    pub snapshots: BTreeMap<String, Snapshot>,
}

impl Volume {
    pub fn is_mounted(&self) -> bool {
        !self.mount_point.is_empty()
    }
}

/// Immutable point-in-time capture of a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub uuid: String,
    pub volume_uuid: String,
    #[serde(default)]
    pub name: String,
    pub created_time: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Volume,
    Snapshot,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityKind::Volume => f.write_str("volume"),
            EntityKind::Snapshot => f.write_str("snapshot"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Backup,
    Restore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
}

/// Journal entry for a backup or restore request and its terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub kind: BackupKind,
    /// Source snapshot (backup) - empty for restores.
    #[serde(default)]
    pub snapshot_uuid: String,
    /// Source volume (backup) or the restored volume (restore).
    #[serde(default)]
    pub volume_uuid: String,
    /// Destination (backup, filled with the driver's backup URL on success) or source (restore).
    pub url: String,
    pub status: BackupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_time: Option<String>,
}

/// Текущее время в RFC 3339 (UTC, секунды).
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
