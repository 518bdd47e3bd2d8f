//! Centralized configuration for the volumed daemon.
//!
//! Sources, lowest to highest precedence:
//! - `DaemonConfig::default()`;
//! - environment (`DaemonConfig::from_env()`), `VOLUMED_*` variables;
//! - command-line flags (the binary applies them through the `with_*` setters);
//! - `<root>/volumed.cfg` for root-bound options, once it exists
//!   (see `reconcile_with_root`).
//!
//! Root-bound options describe data already on disk (driver, driver options, mounts dir,
//! default volume size); changing them under an existing root would orphan that data,
//! so the stored values win and command-line values for them are ignored.

use anyhow::{anyhow, Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::consts::{
    CONFIG_FILE, DEFAULT_DRIVER, DEFAULT_MIN_ABBREV_LEN, DEFAULT_ROOT, DEFAULT_SOCKET,
    DEFAULT_VOLUME_SIZE, DEFAULT_WORKERS, UUID_LEN,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Storage root: records, lock file, driver state.
    /// Env: VOLUMED_ROOT (default /var/lib/volumed)
    pub root: PathBuf,

    /// Unix socket the API is served on.
    /// Env: VOLUMED_SOCKET (default /var/run/volumed/volume.sock)
    pub socket: PathBuf,

    /// Storage driver name. Env: VOLUMED_DRIVER (default "vfs")
    pub driver: String,

    /// Opaque "key=value" options for the driver.
    /// Env: VOLUMED_DRIVER_OPTS (comma separated)
    #[serde(default)]
    pub driver_opts: Vec<String>,

    /// Default mount path prefix; None -> <root>/mounts.
    /// Env: VOLUMED_MOUNTS_DIR
    #[serde(default)]
    pub mounts_dir: Option<PathBuf>,

    /// Size used when a create request omits it. Env: VOLUMED_DEFAULT_VOLUME_SIZE ("10G")
    pub default_volume_size: u64,

    // ---------- not persisted (process-level tunables) ----------
    /// Request worker threads. Env: VOLUMED_WORKERS (default 4)
    #[serde(skip, default = "default_workers")]
    pub workers: usize,

    /// Shortest abbreviated UUID accepted. Env: VOLUMED_MIN_ABBREV_LEN (default 6)
    #[serde(skip, default = "default_min_abbrev_len")]
    pub min_abbrev_len: usize,

    /// Deadline for driver calls when a request carries none (None = wait forever).
    /// Env: VOLUMED_DRIVER_TIMEOUT_MS
    #[serde(skip)]
    pub driver_timeout_ms: Option<u64>,
}

fn default_workers() -> usize {
    DEFAULT_WORKERS
}

fn default_min_abbrev_len() -> usize {
    DEFAULT_MIN_ABBREV_LEN
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from(DEFAULT_ROOT),
            socket: PathBuf::from(DEFAULT_SOCKET),
            driver: DEFAULT_DRIVER.to_string(),
            driver_opts: Vec::new(),
            mounts_dir: None,
            default_volume_size: DEFAULT_VOLUME_SIZE,
            workers: DEFAULT_WORKERS,
            min_abbrev_len: DEFAULT_MIN_ABBREV_LEN,
            driver_timeout_ms: None,
        }
    }
}

impl DaemonConfig {
    /// Defaults overridden by `VOLUMED_*` environment variables.
    /// Unparsable values are ignored, as if unset.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Some(v) = env_str("VOLUMED_ROOT") {
            cfg.root = PathBuf::from(v);
        }
        if let Some(v) = env_str("VOLUMED_SOCKET") {
            cfg.socket = PathBuf::from(v);
        }
        if let Some(v) = env_str("VOLUMED_DRIVER") {
            cfg.driver = v;
        }
        if let Some(v) = env_str("VOLUMED_DRIVER_OPTS") {
            cfg.driver_opts = v
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = env_str("VOLUMED_MOUNTS_DIR") {
            cfg.mounts_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = env_str("VOLUMED_DEFAULT_VOLUME_SIZE") {
            if let Ok(n) = parse_size(&v) {
                cfg.default_volume_size = n;
            }
        }
        if let Some(v) = env_str("VOLUMED_WORKERS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.workers = n;
            }
        }
        if let Some(v) = env_str("VOLUMED_MIN_ABBREV_LEN") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.min_abbrev_len = n;
            }
        }
        if let Some(v) = env_str("VOLUMED_DRIVER_TIMEOUT_MS") {
            if let Ok(n) = v.parse::<u64>() {
                cfg.driver_timeout_ms = Some(n);
            }
        }

        cfg
    }

    pub fn with_root<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_socket<P: Into<PathBuf>>(mut self, socket: P) -> Self {
        self.socket = socket.into();
        self
    }

    pub fn with_driver<S: Into<String>>(mut self, driver: S) -> Self {
        self.driver = driver.into();
        self
    }

    pub fn with_driver_opts(mut self, opts: Vec<String>) -> Self {
        self.driver_opts = opts;
        self
    }

    pub fn with_mounts_dir<P: Into<PathBuf>>(mut self, dir: Option<P>) -> Self {
        self.mounts_dir = dir.map(Into::into);
        self
    }

    pub fn with_default_volume_size(mut self, bytes: u64) -> Self {
        self.default_volume_size = bytes;
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.workers = n;
        self
    }

    pub fn with_min_abbrev_len(mut self, n: usize) -> Self {
        self.min_abbrev_len = n;
        self
    }

    pub fn with_driver_timeout_ms(mut self, ms: Option<u64>) -> Self {
        self.driver_timeout_ms = ms;
        self
    }

    /// Effective mount prefix.
    pub fn mounts_dir(&self) -> PathBuf {
        self.mounts_dir
            .clone()
            .unwrap_or_else(|| self.root.join("mounts"))
    }

    /// Reject configurations the daemon must not start with.
    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(anyhow!("root must not be empty"));
        }
        if self.driver.trim().is_empty() {
            return Err(anyhow!("driver must not be empty"));
        }
        if self.default_volume_size == 0 {
            return Err(anyhow!("default-volume-size must be positive"));
        }
        if self.workers == 0 {
            return Err(anyhow!("workers must be at least 1"));
        }
        if self.min_abbrev_len == 0 || self.min_abbrev_len > UUID_LEN {
            return Err(anyhow!(
                "min-abbrev-len must be within 1..={}, got {}",
                UUID_LEN,
                self.min_abbrev_len
            ));
        }
        crate::driver::parse_driver_opts(&self.driver_opts)?;
        Ok(())
    }

    /// Apply `<root>/volumed.cfg` if present, otherwise persist the current values there.
    /// Must be called with the root lock held.
    pub fn reconcile_with_root(mut self) -> Result<Self> {
        let path = self.root.join(CONFIG_FILE);
        if path.exists() {
            let bytes = fs::read(&path).with_context(|| format!("read {}", path.display()))?;
            let stored: DaemonConfig = serde_json::from_slice(&bytes)
                .with_context(|| format!("parse {}", path.display()))?;
            if stored.driver != self.driver
                || stored.driver_opts != self.driver_opts
                || stored.mounts_dir != self.mounts_dir
                || stored.default_volume_size != self.default_volume_size
            {
                info!(
                    "config: {} exists, stored driver/driver-opts/mounts-dir/default-volume-size take precedence",
                    path.display()
                );
            }
            self.driver = stored.driver;
            self.driver_opts = stored.driver_opts;
            self.mounts_dir = stored.mounts_dir;
            self.default_volume_size = stored.default_volume_size;
        } else {
            save_json_atomic(&path, &self)?;
            info!("config: saved {}", path.display());
        }
        Ok(self)
    }
}

impl fmt::Display for DaemonConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DaemonConfig {{ \
             root: {}, \
             socket: {}, \
             driver: {}, \
             driver_opts: [{}], \
             mounts_dir: {}, \
             default_volume_size: {}, \
             workers: {}, \
             min_abbrev_len: {}, \
             driver_timeout_ms: {} \
             }}",
            self.root.display(),
            self.socket.display(),
            self.driver,
            self.driver_opts.join(", "),
            self.mounts_dir().display(),
            self.default_volume_size,
            self.workers,
            self.min_abbrev_len,
            self.driver_timeout_ms
                .map(|v| v.to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

fn env_str(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// "10G", "512M", "4096", "1.5T" -> bytes (binary multiples).
pub fn parse_size(s: &str) -> Result<u64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(anyhow!("empty size"));
    }
    let (num, mult): (&str, u64) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => {
            let mult = match c.to_ascii_uppercase() {
                'B' => 1,
                'K' => 1 << 10,
                'M' => 1 << 20,
                'G' => 1 << 30,
                'T' => 1 << 40,
                _ => return Err(anyhow!("unknown size suffix in '{}'", s)),
            };
            (&s[..i], mult)
        }
        _ => (s, 1),
    };
    let num = num.trim();
    let bytes = if let Ok(n) = num.parse::<u64>() {
        n.checked_mul(mult)
    } else {
        let f: f64 = num
            .parse()
            .map_err(|_| anyhow!("invalid size '{}'", s))?;
        if !f.is_finite() || f < 0.0 {
            return Err(anyhow!("invalid size '{}'", s));
        }
        let v = f * mult as f64;
        if v > u64::MAX as f64 {
            None
        } else {
            Some(v as u64)
        }
    };
    let bytes = bytes.ok_or_else(|| anyhow!("size '{}' overflows", s))?;
    if bytes == 0 {
        return Err(anyhow!("size must be positive"));
    }
    Ok(bytes)
}

/// tmp + fsync + rename.
pub(crate) fn save_json_atomic<T: Serialize>(path: &Path, v: &T) -> Result<()> {
    let tmp = path.with_extension("tmp");
    let mut f = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(&tmp)
        .with_context(|| format!("open {}", tmp.display()))?;
    let data = serde_json::to_vec_pretty(v).context("serialize json")?;
    f.write_all(&data)
        .with_context(|| format!("write {}", tmp.display()))?;
    f.sync_all()
        .with_context(|| format!("fsync {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes() {
        assert_eq!(parse_size("10G").unwrap(), 10_737_418_240);
        assert_eq!(parse_size("512m").unwrap(), 512 << 20);
        assert_eq!(parse_size("4096").unwrap(), 4096);
        assert_eq!(parse_size("1.5K").unwrap(), 1536);
        assert!(parse_size("0").is_err());
        assert!(parse_size("-1G").is_err());
        assert!(parse_size("10Q").is_err());
        assert!(parse_size("").is_err());
    }

    #[test]
    fn daemon_and_registry_share_the_default_size() {
        assert_eq!(parse_size("10G").unwrap(), DEFAULT_VOLUME_SIZE);
        assert_eq!(DaemonConfig::default().default_volume_size, DEFAULT_VOLUME_SIZE);
        assert_eq!(
            crate::registry::RegistryOptions::default().default_volume_size,
            DEFAULT_VOLUME_SIZE
        );
    }

    #[test]
    fn validate_rejects_bad_values() {
        let base = DaemonConfig::default();
        assert!(base.clone().validate().is_ok());
        assert!(base.clone().with_workers(0).validate().is_err());
        assert!(base.clone().with_min_abbrev_len(37).validate().is_err());
        assert!(base.clone().with_default_volume_size(0).validate().is_err());
        assert!(base.with_driver_opts(vec!["x".into()]).validate().is_err());
    }
}
