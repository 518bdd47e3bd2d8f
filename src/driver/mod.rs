//! Storage driver contract.
//!
//! A driver performs the physical side of every registry operation and knows nothing
//! about names, indexes or locking. Handles are the UUIDs the registry allocates.
//!
//! Contract (every backend):
//! - idempotent on retry with the same handle: deleting a missing handle is success;
//!   creating an existing handle is success only if it already exists in the requested
//!   state, otherwise `DriverError::Conflict`;
//! - `create_snapshot` is a crash-consistent point-in-time copy;
//! - backup/restore URLs are opaque to the registry; the driver owns the format;
//! - `*_exists` must answer from the backing store, not from a cache, so the registry
//!   can re-query after a failure with unknown outcome.

use anyhow::{anyhow, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod vfs;

pub type DriverResult<T> = std::result::Result<T, DriverError>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unsupported url '{0}'")]
    UnsupportedUrl(String),

    #[error("corrupted data: {0}")]
    Corrupted(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

impl DriverError {
    pub fn io<S: Into<String>>(context: S, source: std::io::Error) -> Self {
        DriverError::Io {
            context: context.into(),
            source,
        }
    }
}

/// What the registry asks the driver to allocate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeSpec {
    pub uuid: String,
    pub size: u64,
    pub file_system: String,
}

/// Shape of a volume materialised by `restore_snapshot`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredVolume {
    pub size: u64,
    pub file_system: String,
}

pub trait Driver: Send + Sync {
    fn name(&self) -> &str;

    /// Free-form key/value description for `info`.
    fn info(&self) -> DriverResult<BTreeMap<String, String>>;

    fn create_volume(&self, spec: &VolumeSpec) -> DriverResult<()>;
    fn delete_volume(&self, uuid: &str) -> DriverResult<()>;
    fn volume_exists(&self, uuid: &str) -> DriverResult<bool>;

    /// Expose the volume at `mount_point`; returns the effective mount path.
    fn mount_volume(&self, uuid: &str, mount_point: &Path) -> DriverResult<PathBuf>;
    fn umount_volume(&self, uuid: &str) -> DriverResult<()>;

    fn create_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()>;
    fn delete_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()>;
    fn snapshot_exists(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<bool>;

    /// Returns the URL the backup can later be restored from.
    fn backup_snapshot(
        &self,
        snapshot_uuid: &str,
        volume_uuid: &str,
        dest_url: &str,
    ) -> DriverResult<String>;

    /// Materialise the backup at `source_url` as the new volume `new_volume_uuid`.
    fn restore_snapshot(&self, source_url: &str, new_volume_uuid: &str)
        -> DriverResult<RestoredVolume>;
}

type InitFn = fn(&Path, &BTreeMap<String, String>) -> Result<Arc<dyn Driver>>;

/// Known backends; new ones are added here.
const DRIVERS: &[(&str, InitFn)] = &[(vfs::DRIVER_NAME, vfs::init)];

pub fn supported_drivers() -> Vec<&'static str> {
    DRIVERS.iter().map(|(n, _)| *n).collect()
}

/// Construct the driver `name`. Its private state lives under `<root>/<name>/`.
pub fn init(name: &str, root: &Path, opts: &[String]) -> Result<Arc<dyn Driver>> {
    let opts = parse_driver_opts(opts)?;
    let (_, init_fn) = DRIVERS
        .iter()
        .find(|(n, _)| *n == name)
        .ok_or_else(|| {
            anyhow!(
                "unsupported driver '{}' (supported: {})",
                name,
                supported_drivers().join(", ")
            )
        })?;
    init_fn(&root.join(name), &opts)
}

/// "key=value" strings -> map. Later duplicates win.
pub fn parse_driver_opts(opts: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for o in opts {
        let (k, v) = o
            .split_once('=')
            .ok_or_else(|| anyhow!("driver option '{}' is not key=value", o))?;
        let k = k.trim();
        if k.is_empty() {
            return Err(anyhow!("driver option '{}' has an empty key", o));
        }
        out.insert(k.to_string(), v.trim().to_string());
    }
    Ok(out)
}

/// `vfs:///abs/path`, `file:///abs/path` or a bare absolute path -> local path.
pub fn local_path_from_url(url: &str) -> DriverResult<PathBuf> {
    let rest = url
        .strip_prefix("vfs://")
        .or_else(|| url.strip_prefix("file://"))
        .unwrap_or(url);
    if rest.is_empty() || !rest.starts_with('/') {
        return Err(DriverError::UnsupportedUrl(url.to_string()));
    }
    Ok(PathBuf::from(rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_opts_parse() {
        let m = parse_driver_opts(&["vfs.path=/tmp/x".into(), " a = b ".into()]).unwrap();
        assert_eq!(m.get("vfs.path").map(String::as_str), Some("/tmp/x"));
        assert_eq!(m.get("a").map(String::as_str), Some("b"));
        assert!(parse_driver_opts(&["novalue".into()]).is_err());
        assert!(parse_driver_opts(&["=x".into()]).is_err());
    }

    #[test]
    fn url_to_path() {
        assert_eq!(local_path_from_url("vfs:///b/k").unwrap(), PathBuf::from("/b/k"));
        assert_eq!(local_path_from_url("file:///b").unwrap(), PathBuf::from("/b"));
        assert_eq!(local_path_from_url("/b").unwrap(), PathBuf::from("/b"));
        assert!(local_path_from_url("s3://bucket/x").is_err());
        assert!(local_path_from_url("vfs://relative").is_err());
    }

    #[test]
    fn unknown_driver_is_refused() {
        let root = std::env::temp_dir();
        let err = init("devicemapper", &root, &[]).err().expect("must fail");
        assert!(err.to_string().contains("unsupported driver"));
    }
}
