//! Wire types of the `/v1` API. Responses for entities are the model types themselves.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::model::EntityKind;
use crate::registry::RegistryStats;

pub const PREFIX: &str = "/v1";

// ---------- routes ----------
pub const INFO: &str = "/v1/info";
pub const VOLUMES: &str = "/v1/volumes";
pub const VOLUME_CREATE: &str = "/v1/volumes/create";
pub const VOLUME_DELETE: &str = "/v1/volumes/delete";
pub const VOLUME_INSPECT: &str = "/v1/volumes/inspect";
pub const VOLUME_MOUNT: &str = "/v1/volumes/mount";
pub const VOLUME_UMOUNT: &str = "/v1/volumes/umount";
pub const SNAPSHOT_CREATE: &str = "/v1/snapshots/create";
pub const SNAPSHOT_DELETE: &str = "/v1/snapshots/delete";
pub const SNAPSHOT_INSPECT: &str = "/v1/snapshots/inspect";
pub const BACKUP_CREATE: &str = "/v1/backups/create";
pub const BACKUP_RESTORE: &str = "/v1/backups/restore";
pub const BACKUPS: &str = "/v1/backups";
pub const RESOLVE: &str = "/v1/resolve";
pub const METRICS: &str = "/metrics";

fn timeout_of(ms: Option<u64>) -> Option<Duration> {
    ms.map(Duration::from_millis)
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeCreateRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeDeleteRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Delete remaining snapshots too.
    #[serde(default)]
    pub cascade: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Body of inspect/umount/resolve.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VolumeMountRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotCreateRequest {
    pub volume: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Body of snapshot delete/inspect.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotRefRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    /// Needed to address a snapshot by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupCreateRequest {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<String>,
    pub dest_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackupRestoreRequest {
    pub source_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveResponse {
    pub kind: EntityKind,
    pub uuid: String,
}

/// Empty JSON object, the body of successful deletes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Empty {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    pub version: String,
    pub api_version: String,
    pub root: String,
    pub socket: String,
    pub driver: String,
    pub driver_info: BTreeMap<String, String>,
    pub mounts_dir: String,
    pub default_volume_size: u64,
    pub min_abbrev_len: usize,
    pub stats: RegistryStats,
    /// "ok" or the first index inconsistency found.
    pub verify: String,
}

macro_rules! impl_timeout {
    ($($t:ty),*) => {
        $(impl $t {
            pub fn timeout(&self) -> Option<Duration> {
                timeout_of(self.timeout_ms)
            }
        })*
    };
}

impl_timeout!(
    VolumeCreateRequest,
    VolumeDeleteRequest,
    RefRequest,
    VolumeMountRequest,
    SnapshotCreateRequest,
    SnapshotRefRequest,
    BackupCreateRequest,
    BackupRestoreRequest
);
