//! On-disk records of the registry.
//!
//! Layout under root:
//!   volume_<uuid>.json   {"version":1,"crc32":N,"volume":{...}}   (snapshots embedded)
//!   retired.json         ["uuid", ...]                            (never reissued)
//!   backups.json         [BackupRecord, ...]                      (journal)
//!
//! Каждая запись пишется атомарно: tmp + fsync + rename. crc32 считается по
//! каноническому serde_json представлению тома (snapshots - BTreeMap).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::consts::{BACKUPS_FILE, CFG_POSTFIX, RETIRED_FILE, VOLUME_CFG_PREFIX};
use crate::error::{Error, Result};
use crate::model::{BackupRecord, Volume};

const RECORD_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct VolumeEnvelope {
    version: u32,
    crc32: u32,
    volume: Volume,
}

#[derive(Debug, Clone)]
pub(crate) struct Store {
    root: PathBuf,
}

impl Store {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    pub(crate) fn volume_path(&self, uuid: &str) -> PathBuf {
        self.root
            .join(format!("{}{}{}", VOLUME_CFG_PREFIX, uuid, CFG_POSTFIX))
    }

    // ---------- volumes ----------

    pub(crate) fn save_volume(&self, v: &Volume) -> Result<()> {
        let env = VolumeEnvelope {
            version: RECORD_VERSION,
            crc32: volume_crc(v)?,
            volume: v.clone(),
        };
        let data = serde_json::to_vec_pretty(&env)?;
        write_atomic(&self.volume_path(&v.uuid), &data)
    }

    /// Missing file is fine (delete is idempotent).
    pub(crate) fn remove_volume(&self, uuid: &str) -> Result<()> {
        let p = self.volume_path(uuid);
        match fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::internal(format!("remove {}: {}", p.display(), e))),
        }
    }

    /// Every `volume_<uuid>.json` under root. A record that fails to parse, carries a
    /// bad checksum or does not match its file name is `Internal`.
    pub(crate) fn load_volumes(&self) -> Result<Vec<Volume>> {
        let rd = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::internal(format!(
                    "read dir {}: {}",
                    self.root.display(),
                    e
                )))
            }
        };

        let mut out = Vec::new();
        for ent in rd {
            let ent = ent.map_err(|e| Error::internal(format!("read dir entry: {e}")))?;
            let fname = ent.file_name();
            let Some(fname) = fname.to_str() else {
                continue;
            };
            let Some(uuid) = fname
                .strip_prefix(VOLUME_CFG_PREFIX)
                .and_then(|s| s.strip_suffix(CFG_POSTFIX))
            else {
                continue;
            };
            let path = ent.path();
            let bytes = fs::read(&path)
                .map_err(|e| Error::internal(format!("read {}: {}", path.display(), e)))?;
            let env: VolumeEnvelope = serde_json::from_slice(&bytes).map_err(|e| {
                Error::internal(format!("corrupted record {}: {}", path.display(), e))
            })?;
            if env.version != RECORD_VERSION {
                return Err(Error::internal(format!(
                    "record {}: unsupported version {}",
                    path.display(),
                    env.version
                )));
            }
            let crc = volume_crc(&env.volume)?;
            if crc != env.crc32 {
                return Err(Error::internal(format!(
                    "corrupted record {}: checksum mismatch (stored {:08x}, computed {:08x})",
                    path.display(),
                    env.crc32,
                    crc
                )));
            }
            if env.volume.uuid != uuid {
                return Err(Error::internal(format!(
                    "corrupted record {}: holds volume {}",
                    path.display(),
                    env.volume.uuid
                )));
            }
            out.push(env.volume);
        }
        out.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        Ok(out)
    }

    // ---------- retired uuids ----------

    pub(crate) fn load_retired(&self) -> Result<BTreeSet<String>> {
        Ok(self.load_json_opt(RETIRED_FILE)?.unwrap_or_default())
    }

    pub(crate) fn save_retired(&self, retired: &BTreeSet<String>) -> Result<()> {
        let data = serde_json::to_vec_pretty(retired)?;
        write_atomic(&self.root.join(RETIRED_FILE), &data)
    }

    // ---------- backup journal ----------

    pub(crate) fn load_backups(&self) -> Result<Vec<BackupRecord>> {
        Ok(self.load_json_opt(BACKUPS_FILE)?.unwrap_or_default())
    }

    pub(crate) fn save_backups(&self, records: &[BackupRecord]) -> Result<()> {
        let data = serde_json::to_vec_pretty(records)?;
        write_atomic(&self.root.join(BACKUPS_FILE), &data)
    }

    fn load_json_opt<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        let p = self.root.join(name);
        let bytes = match fs::read(&p) {
            Ok(b) => b,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::internal(format!("read {}: {}", p.display(), e))),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| Error::internal(format!("corrupted {}: {}", p.display(), e)))
    }
}

fn volume_crc(v: &Volume) -> Result<u32> {
    let canon = serde_json::to_vec(v)?;
    Ok(crc32fast::hash(&canon))
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let fname = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| Error::internal(format!("bad record path {}", path.display())))?;
    let tmp = path.with_file_name(format!("{fname}.tmp"));
    let io = |what: &str, p: &Path, e: std::io::Error| {
        Error::internal(format!("{} {}: {}", what, p.display(), e))
    };

    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .map_err(|e| io("open", &tmp, e))?;
    f.write_all(data).map_err(|e| io("write", &tmp, e))?;
    f.sync_all().map_err(|e| io("fsync", &tmp, e))?;
    drop(f);
    fs::rename(&tmp, path).map_err(|e| io("rename", &tmp, e))?;
    Ok(())
}
