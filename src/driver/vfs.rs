//! vfs - reference driver backed by plain directories.
//!
//! Layout (under `<root>/vfs/` or `vfs.path=`):
//!   volumes/<uuid>/volume.json        - descriptor {uuid,size,file_system}
//!   volumes/<uuid>/data/              - volume contents
//!   volumes/<uuid>/mount              - current mount path (present while mounted)
//!   snapshots/<vol>/<snap>/snapshot.json
//!   snapshots/<vol>/<snap>/data/      - frozen copy of the volume contents
//!
//! Mount exposes `data/` through a symlink at the mount path.
//! Every object is built in a `.tmp-*` sibling and renamed into place, so a crash leaves
//! either nothing or a complete object.
//!
//! Backup format (`<dest>/<snap_uuid>/`):
//!   backup.json  - manifest (descriptor + per-file {path, bytes, crc32, blob})
//!   blobs/<n>.zst - file payloads, zstd compressed

use anyhow::{Context, Result};
use crc32fast::Hasher as Crc32;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::{
    local_path_from_url, Driver, DriverError, DriverResult, RestoredVolume, VolumeSpec,
};

pub const DRIVER_NAME: &str = "vfs";
pub const OPT_PATH: &str = "vfs.path";

const VOLUME_DESC: &str = "volume.json";
const SNAPSHOT_DESC: &str = "snapshot.json";
const BACKUP_MANIFEST: &str = "backup.json";
const MOUNT_FILE: &str = "mount";
const DATA_DIR: &str = "data";
const BLOBS_DIR: &str = "blobs";
const BACKUP_FORMAT_VERSION: u32 = 1;
const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct VolumeDesc {
    uuid: String,
    size: u64,
    file_system: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SnapshotDesc {
    uuid: String,
    volume_uuid: String,
    size: u64,
    file_system: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupFile {
    path: String,
    bytes: u64,
    crc32: u32,
    blob: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BackupManifest {
    version: u32,
    snapshot_uuid: String,
    volume_uuid: String,
    size: u64,
    file_system: String,
    dirs: Vec<String>,
    files: Vec<BackupFile>,
}

pub struct VfsDriver {
    base: PathBuf,
}

pub fn init(default_base: &Path, opts: &BTreeMap<String, String>) -> Result<Arc<dyn Driver>> {
    let base = opts
        .get(OPT_PATH)
        .map(PathBuf::from)
        .unwrap_or_else(|| default_base.to_path_buf());
    Ok(Arc::new(VfsDriver::open(&base)?))
}

impl VfsDriver {
    pub fn open(base: &Path) -> Result<Self> {
        for sub in ["volumes", "snapshots"] {
            let d = base.join(sub);
            fs::create_dir_all(&d).with_context(|| format!("create {}", d.display()))?;
        }
        info!("vfs driver: base={}", base.display());
        Ok(Self {
            base: base.to_path_buf(),
        })
    }

    fn volume_dir(&self, uuid: &str) -> PathBuf {
        self.base.join("volumes").join(uuid)
    }

    fn snapshot_dir(&self, snap: &str, vol: &str) -> PathBuf {
        self.base.join("snapshots").join(vol).join(snap)
    }

    fn read_volume_desc(&self, uuid: &str) -> DriverResult<Option<VolumeDesc>> {
        read_json_opt(&self.volume_dir(uuid).join(VOLUME_DESC))
    }

    fn read_mount(&self, uuid: &str) -> DriverResult<Option<PathBuf>> {
        let p = self.volume_dir(uuid).join(MOUNT_FILE);
        match fs::read_to_string(&p) {
            Ok(s) => Ok(Some(PathBuf::from(s.trim()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DriverError::io(format!("read {}", p.display()), e)),
        }
    }
}

impl Driver for VfsDriver {
    fn name(&self) -> &str {
        DRIVER_NAME
    }

    fn info(&self) -> DriverResult<BTreeMap<String, String>> {
        let count = |dir: PathBuf| -> DriverResult<usize> {
            let rd = fs::read_dir(&dir)
                .map_err(|e| DriverError::io(format!("read_dir {}", dir.display()), e))?;
            Ok(rd
                .filter_map(|e| e.ok())
                .filter(|e| !e.file_name().to_string_lossy().starts_with(".tmp-"))
                .count())
        };
        let mut m = BTreeMap::new();
        m.insert("driver".to_string(), DRIVER_NAME.to_string());
        m.insert("base".to_string(), self.base.display().to_string());
        m.insert(
            "volumes".to_string(),
            count(self.base.join("volumes"))?.to_string(),
        );
        Ok(m)
    }

    fn create_volume(&self, spec: &VolumeSpec) -> DriverResult<()> {
        let want = VolumeDesc {
            uuid: spec.uuid.clone(),
            size: spec.size,
            file_system: spec.file_system.clone(),
        };
        if let Some(have) = self.read_volume_desc(&spec.uuid)? {
            return if have == want {
                debug!("vfs: volume {} already exists (retry)", spec.uuid);
                Ok(())
            } else {
                Err(DriverError::Conflict(format!(
                    "volume {} exists with a different shape",
                    spec.uuid
                )))
            };
        }

        let dst = self.volume_dir(&spec.uuid);
        let tmp = self.base.join("volumes").join(format!(".tmp-{}", spec.uuid));
        remove_dir_if_exists(&tmp)?;
        create_dir_all(&tmp.join(DATA_DIR))?;
        write_json(&tmp.join(VOLUME_DESC), &want)?;
        rename(&tmp, &dst)?;
        debug!("vfs: created volume {} ({} bytes)", spec.uuid, spec.size);
        Ok(())
    }

    fn delete_volume(&self, uuid: &str) -> DriverResult<()> {
        let dir = self.volume_dir(uuid);
        if !dir.exists() {
            return Ok(());
        }
        if let Some(mp) = self.read_mount(uuid)? {
            return Err(DriverError::Conflict(format!(
                "volume {} is mounted at {}",
                uuid,
                mp.display()
            )));
        }
        remove_dir_if_exists(&dir)?;
        // snapshots of a deleted volume have no owner left
        let snaps = self.base.join("snapshots").join(uuid);
        if let Err(e) = fs::remove_dir(&snaps) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("vfs: leftover snapshot dir {}: {}", snaps.display(), e);
            }
        }
        debug!("vfs: deleted volume {}", uuid);
        Ok(())
    }

    fn volume_exists(&self, uuid: &str) -> DriverResult<bool> {
        Ok(self.read_volume_desc(uuid)?.is_some())
    }

    fn mount_volume(&self, uuid: &str, mount_point: &Path) -> DriverResult<PathBuf> {
        if self.read_volume_desc(uuid)?.is_none() {
            return Err(DriverError::NotFound(format!("volume {uuid}")));
        }
        if let Some(cur) = self.read_mount(uuid)? {
            if cur == mount_point {
                return Ok(cur);
            }
            return Err(DriverError::Conflict(format!(
                "volume {} already mounted at {}",
                uuid,
                cur.display()
            )));
        }

        let data = self.volume_dir(uuid).join(DATA_DIR);
        match fs::symlink_metadata(mount_point) {
            Ok(md) if md.file_type().is_symlink() => {
                let target = fs::read_link(mount_point).map_err(|e| {
                    DriverError::io(format!("readlink {}", mount_point.display()), e)
                })?;
                if target != data {
                    return Err(DriverError::Conflict(format!(
                        "mount point {} is in use",
                        mount_point.display()
                    )));
                }
            }
            Ok(md) if md.is_dir() => {
                // an empty placeholder directory is replaced by the link
                fs::remove_dir(mount_point).map_err(|_| {
                    DriverError::Conflict(format!(
                        "mount point {} is not empty",
                        mount_point.display()
                    ))
                })?;
                symlink(&data, mount_point)?;
            }
            Ok(_) => {
                return Err(DriverError::Conflict(format!(
                    "mount point {} is a file",
                    mount_point.display()
                )))
            }
            Err(_) => {
                if let Some(parent) = mount_point.parent() {
                    create_dir_all(parent)?;
                }
                symlink(&data, mount_point)?;
            }
        }

        let mf = self.volume_dir(uuid).join(MOUNT_FILE);
        write_atomic(&mf, mount_point.display().to_string().as_bytes())?;
        debug!("vfs: mounted {} at {}", uuid, mount_point.display());
        Ok(mount_point.to_path_buf())
    }

    fn umount_volume(&self, uuid: &str) -> DriverResult<()> {
        let Some(mp) = self.read_mount(uuid)? else {
            return Ok(());
        };
        if let Ok(md) = fs::symlink_metadata(&mp) {
            if md.file_type().is_symlink() {
                fs::remove_file(&mp)
                    .map_err(|e| DriverError::io(format!("unlink {}", mp.display()), e))?;
            }
        }
        let mf = self.volume_dir(uuid).join(MOUNT_FILE);
        if let Err(e) = fs::remove_file(&mf) {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(DriverError::io(format!("remove {}", mf.display()), e));
            }
        }
        debug!("vfs: unmounted {} from {}", uuid, mp.display());
        Ok(())
    }

    fn create_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()> {
        let vol = self
            .read_volume_desc(volume_uuid)?
            .ok_or_else(|| DriverError::NotFound(format!("volume {volume_uuid}")))?;
        let want = SnapshotDesc {
            uuid: snapshot_uuid.to_string(),
            volume_uuid: volume_uuid.to_string(),
            size: vol.size,
            file_system: vol.file_system,
        };
        let dst = self.snapshot_dir(snapshot_uuid, volume_uuid);
        if let Some(have) = read_json_opt::<SnapshotDesc>(&dst.join(SNAPSHOT_DESC))? {
            return if have == want {
                Ok(())
            } else {
                Err(DriverError::Conflict(format!(
                    "snapshot {snapshot_uuid} exists with a different shape"
                )))
            };
        }

        let parent = self.base.join("snapshots").join(volume_uuid);
        create_dir_all(&parent)?;
        let tmp = parent.join(format!(".tmp-{snapshot_uuid}"));
        remove_dir_if_exists(&tmp)?;
        create_dir_all(&tmp)?;
        copy_tree(
            &self.volume_dir(volume_uuid).join(DATA_DIR),
            &tmp.join(DATA_DIR),
        )?;
        write_json(&tmp.join(SNAPSHOT_DESC), &want)?;
        rename(&tmp, &dst)?;
        debug!("vfs: snapshot {} of volume {}", snapshot_uuid, volume_uuid);
        Ok(())
    }

    fn delete_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()> {
        remove_dir_if_exists(&self.snapshot_dir(snapshot_uuid, volume_uuid))?;
        debug!("vfs: deleted snapshot {}", snapshot_uuid);
        Ok(())
    }

    fn snapshot_exists(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<bool> {
        let p = self
            .snapshot_dir(snapshot_uuid, volume_uuid)
            .join(SNAPSHOT_DESC);
        Ok(read_json_opt::<SnapshotDesc>(&p)?.is_some())
    }

    fn backup_snapshot(
        &self,
        snapshot_uuid: &str,
        volume_uuid: &str,
        dest_url: &str,
    ) -> DriverResult<String> {
        let dest_root = local_path_from_url(dest_url)?;
        let snap_dir = self.snapshot_dir(snapshot_uuid, volume_uuid);
        let desc: SnapshotDesc = read_json_opt(&snap_dir.join(SNAPSHOT_DESC))?
            .ok_or_else(|| DriverError::NotFound(format!("snapshot {snapshot_uuid}")))?;

        let dst = dest_root.join(snapshot_uuid);
        let url = format!("vfs://{}", dst.display());
        if let Some(m) = read_json_opt::<BackupManifest>(&dst.join(BACKUP_MANIFEST))? {
            if m.snapshot_uuid == snapshot_uuid {
                debug!("vfs: backup of {} already at {}", snapshot_uuid, url);
                return Ok(url);
            }
            return Err(DriverError::Conflict(format!(
                "{} holds a backup of another snapshot",
                dst.display()
            )));
        }

        create_dir_all(&dest_root)?;
        let tmp = dest_root.join(format!(".tmp-{snapshot_uuid}"));
        remove_dir_if_exists(&tmp)?;
        create_dir_all(&tmp.join(BLOBS_DIR))?;

        let data = snap_dir.join(DATA_DIR);
        let (dirs, files) = walk_tree(&data)?;
        let mut entries = Vec::with_capacity(files.len());
        for (n, rel) in files.iter().enumerate() {
            let src = data.join(rel);
            let bytes =
                fs::read(&src).map_err(|e| DriverError::io(format!("read {}", src.display()), e))?;
            let mut h = Crc32::new();
            h.update(&bytes);
            let packed = zstd::encode_all(&bytes[..], ZSTD_LEVEL)
                .map_err(|e| DriverError::io(format!("compress {}", src.display()), e))?;
            let blob = format!("{n}.zst");
            write_atomic(&tmp.join(BLOBS_DIR).join(&blob), &packed)?;
            entries.push(BackupFile {
                path: rel.clone(),
                bytes: bytes.len() as u64,
                crc32: h.finalize(),
                blob,
            });
        }

        let manifest = BackupManifest {
            version: BACKUP_FORMAT_VERSION,
            snapshot_uuid: desc.uuid,
            volume_uuid: desc.volume_uuid,
            size: desc.size,
            file_system: desc.file_system,
            dirs,
            files: entries,
        };
        write_json(&tmp.join(BACKUP_MANIFEST), &manifest)?;
        rename(&tmp, &dst)?;
        info!(
            "vfs: backup of snapshot {} written to {} ({} file(s))",
            snapshot_uuid,
            url,
            manifest.files.len()
        );
        Ok(url)
    }

    fn restore_snapshot(
        &self,
        source_url: &str,
        new_volume_uuid: &str,
    ) -> DriverResult<RestoredVolume> {
        let src = local_path_from_url(source_url)?;
        let manifest: BackupManifest = read_json_opt(&src.join(BACKUP_MANIFEST))?
            .ok_or_else(|| DriverError::NotFound(format!("backup at {source_url}")))?;
        if manifest.version != BACKUP_FORMAT_VERSION {
            return Err(DriverError::Corrupted(format!(
                "unsupported backup format version {}",
                manifest.version
            )));
        }
        let want = VolumeDesc {
            uuid: new_volume_uuid.to_string(),
            size: manifest.size,
            file_system: manifest.file_system.clone(),
        };
        let restored = RestoredVolume {
            size: manifest.size,
            file_system: manifest.file_system.clone(),
        };
        if let Some(have) = self.read_volume_desc(new_volume_uuid)? {
            return if have == want {
                Ok(restored)
            } else {
                Err(DriverError::Conflict(format!(
                    "volume {new_volume_uuid} exists with a different shape"
                )))
            };
        }

        let tmp = self
            .base
            .join("volumes")
            .join(format!(".tmp-{new_volume_uuid}"));
        remove_dir_if_exists(&tmp)?;
        let data = tmp.join(DATA_DIR);
        create_dir_all(&data)?;
        for d in &manifest.dirs {
            create_dir_all(&data.join(checked_rel(d)?))?;
        }
        for f in &manifest.files {
            let blob = src.join(BLOBS_DIR).join(&f.blob);
            let packed =
                fs::read(&blob).map_err(|e| DriverError::io(format!("read {}", blob.display()), e))?;
            let bytes = zstd::decode_all(&packed[..])
                .map_err(|e| DriverError::Corrupted(format!("{}: {}", blob.display(), e)))?;
            let mut h = Crc32::new();
            h.update(&bytes);
            if bytes.len() as u64 != f.bytes || h.finalize() != f.crc32 {
                return Err(DriverError::Corrupted(format!(
                    "checksum mismatch for '{}'",
                    f.path
                )));
            }
            let out = data.join(checked_rel(&f.path)?);
            if let Some(parent) = out.parent() {
                create_dir_all(parent)?;
            }
            // the whole tree is renamed into place below; no per-file tmp needed
            fs::write(&out, &bytes)
                .map_err(|e| DriverError::io(format!("write {}", out.display()), e))?;
        }
        write_json(&tmp.join(VOLUME_DESC), &want)?;
        rename(&tmp, &self.volume_dir(new_volume_uuid))?;
        info!(
            "vfs: restored {} into volume {}",
            source_url, new_volume_uuid
        );
        Ok(restored)
    }
}

// -------------------- fs helpers --------------------

fn create_dir_all(p: &Path) -> DriverResult<()> {
    fs::create_dir_all(p).map_err(|e| DriverError::io(format!("create {}", p.display()), e))
}

fn remove_dir_if_exists(p: &Path) -> DriverResult<()> {
    match fs::remove_dir_all(p) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DriverError::io(format!("remove {}", p.display()), e)),
    }
}

fn rename(from: &Path, to: &Path) -> DriverResult<()> {
    fs::rename(from, to).map_err(|e| {
        DriverError::io(format!("rename {} -> {}", from.display(), to.display()), e)
    })
}

fn symlink(target: &Path, link: &Path) -> DriverResult<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| {
        DriverError::io(
            format!("symlink {} -> {}", link.display(), target.display()),
            e,
        )
    })
}

fn write_atomic(path: &Path, bytes: &[u8]) -> DriverResult<()> {
    let tmp = path.with_extension("tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .map_err(|e| DriverError::io(format!("open {}", tmp.display()), e))?;
    f.write_all(bytes)
        .and_then(|_| f.sync_all())
        .map_err(|e| DriverError::io(format!("write {}", tmp.display()), e))?;
    rename(&tmp, path)
}

fn write_json<T: Serialize>(path: &Path, v: &T) -> DriverResult<()> {
    let data = serde_json::to_vec_pretty(v)
        .map_err(|e| DriverError::Other(format!("serialize {}: {}", path.display(), e)))?;
    write_atomic(path, &data)
}

fn read_json_opt<T: for<'de> Deserialize<'de>>(path: &Path) -> DriverResult<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(DriverError::io(format!("read {}", path.display()), e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| DriverError::Corrupted(format!("{}: {}", path.display(), e)))
}

/// Relative paths from a manifest must stay inside the volume.
fn checked_rel(rel: &str) -> DriverResult<PathBuf> {
    let p = PathBuf::from(rel);
    let ok = p
        .components()
        .all(|c| matches!(c, std::path::Component::Normal(_)));
    if !ok || rel.is_empty() {
        return Err(DriverError::Corrupted(format!("bad path '{rel}' in manifest")));
    }
    Ok(p)
}

/// Relative directories and regular files under `root`, sorted. Symlinks are skipped.
fn walk_tree(root: &Path) -> DriverResult<(Vec<String>, Vec<String>)> {
    let mut dirs = Vec::new();
    let mut files = Vec::new();
    let mut stack = vec![PathBuf::new()];
    while let Some(rel) = stack.pop() {
        let abs = root.join(&rel);
        let rd = fs::read_dir(&abs)
            .map_err(|e| DriverError::io(format!("read_dir {}", abs.display()), e))?;
        for entry in rd {
            let entry =
                entry.map_err(|e| DriverError::io(format!("read_dir {}", abs.display()), e))?;
            let ft = entry
                .file_type()
                .map_err(|e| DriverError::io(format!("stat {}", entry.path().display()), e))?;
            let child = rel.join(entry.file_name());
            if ft.is_dir() {
                dirs.push(child.to_string_lossy().into_owned());
                stack.push(child);
            } else if ft.is_file() {
                files.push(child.to_string_lossy().into_owned());
            }
        }
    }
    dirs.sort();
    files.sort();
    Ok((dirs, files))
}

fn copy_tree(src: &Path, dst: &Path) -> DriverResult<()> {
    create_dir_all(dst)?;
    let (dirs, files) = walk_tree(src)?;
    for d in dirs {
        create_dir_all(&dst.join(d))?;
    }
    for f in files {
        let from = src.join(&f);
        let to = dst.join(&f);
        fs::copy(&from, &to).map_err(|e| {
            DriverError::io(format!("copy {} -> {}", from.display(), to.display()), e)
        })?;
    }
    Ok(())
}
