use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use volumed::driver::{vfs::VfsDriver, DriverError, DriverResult, RestoredVolume, VolumeSpec};
use volumed::{DeletePolicy, Driver, ErrorKind, Registry, RegistryOptions};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("volumed-{}-{}-{}", prefix, pid, t))
}

/// vfs with switchable failures.
#[derive(Default)]
struct Faults {
    /// fail before doing anything
    create_volume_fails: AtomicBool,
    /// do the work, then report failure
    create_volume_fails_after: AtomicBool,
    create_snapshot_fails_after: AtomicBool,
    delete_volume_fails: AtomicBool,
    delete_volume_fails_after: AtomicBool,
    /// sleep inside create_volume
    create_volume_delay_ms: AtomicU64,
}

struct FlakyDriver {
    inner: VfsDriver,
    faults: Arc<Faults>,
}

fn boom(op: &str) -> DriverError {
    DriverError::Other(format!("injected failure in {op}"))
}

impl Driver for FlakyDriver {
    fn name(&self) -> &str {
        "flaky"
    }
    fn info(&self) -> DriverResult<BTreeMap<String, String>> {
        self.inner.info()
    }
    fn create_volume(&self, spec: &VolumeSpec) -> DriverResult<()> {
        let delay = self.faults.create_volume_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        if self.faults.create_volume_fails.load(Ordering::SeqCst) {
            return Err(boom("create_volume"));
        }
        self.inner.create_volume(spec)?;
        if self.faults.create_volume_fails_after.load(Ordering::SeqCst) {
            return Err(boom("create_volume"));
        }
        Ok(())
    }
    fn delete_volume(&self, uuid: &str) -> DriverResult<()> {
        if self.faults.delete_volume_fails.load(Ordering::SeqCst) {
            return Err(boom("delete_volume"));
        }
        self.inner.delete_volume(uuid)?;
        if self.faults.delete_volume_fails_after.load(Ordering::SeqCst) {
            return Err(boom("delete_volume"));
        }
        Ok(())
    }
    fn volume_exists(&self, uuid: &str) -> DriverResult<bool> {
        self.inner.volume_exists(uuid)
    }
    fn mount_volume(&self, uuid: &str, mount_point: &Path) -> DriverResult<PathBuf> {
        self.inner.mount_volume(uuid, mount_point)
    }
    fn umount_volume(&self, uuid: &str) -> DriverResult<()> {
        self.inner.umount_volume(uuid)
    }
    fn create_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()> {
        self.inner.create_snapshot(snapshot_uuid, volume_uuid)?;
        if self.faults.create_snapshot_fails_after.load(Ordering::SeqCst) {
            return Err(boom("create_snapshot"));
        }
        Ok(())
    }
    fn delete_snapshot(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<()> {
        self.inner.delete_snapshot(snapshot_uuid, volume_uuid)
    }
    fn snapshot_exists(&self, snapshot_uuid: &str, volume_uuid: &str) -> DriverResult<bool> {
        self.inner.snapshot_exists(snapshot_uuid, volume_uuid)
    }
    fn backup_snapshot(&self, snap: &str, vol: &str, dest_url: &str) -> DriverResult<String> {
        self.inner.backup_snapshot(snap, vol, dest_url)
    }
    fn restore_snapshot(&self, source_url: &str, new_uuid: &str) -> DriverResult<RestoredVolume> {
        self.inner.restore_snapshot(source_url, new_uuid)
    }
}

fn open_flaky(root: &Path, opts: RegistryOptions) -> Result<(Registry, Arc<Faults>, VfsDriver)> {
    fs::create_dir_all(root)?;
    let faults = Arc::new(Faults::default());
    let drv = Arc::new(FlakyDriver {
        inner: VfsDriver::open(&root.join("vfs"))?,
        faults: Arc::clone(&faults),
    });
    let reg = Registry::open(root, drv, opts)?;
    // second handle on the same backing store, to look behind the registry
    let backing = VfsDriver::open(&root.join("vfs"))?;
    Ok((reg, faults, backing))
}

#[test]
fn failed_create_leaves_no_state() -> Result<()> {
    let root = unique_root("fault-create");
    let (reg, faults, backing) = open_flaky(&root, RegistryOptions::default())?;

    faults.create_volume_fails.store(true, Ordering::SeqCst);
    let err = reg.create_volume("f1", Some(4096), None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    assert!(err.to_string().contains("injected failure"));
    assert!(reg.list_volumes()?.is_empty());
    assert_eq!(reg.resolve("f1").unwrap_err().kind(), ErrorKind::NotFound);
    assert!(reg.is_quiescent()?);

    // the name is free again
    faults.create_volume_fails.store(false, Ordering::SeqCst);
    let v = reg.create_volume("f1", Some(4096), None, None)?;
    assert!(backing.volume_exists(&v.uuid)?);
    reg.verify()?;
    Ok(())
}

#[test]
fn create_with_side_effect_is_rolled_back() -> Result<()> {
    let root = unique_root("fault-rollback");
    let (reg, faults, backing) = open_flaky(&root, RegistryOptions::default())?;

    faults.create_volume_fails_after.store(true, Ordering::SeqCst);
    let err = reg.create_volume("half", Some(4096), None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    assert!(reg.list_volumes()?.is_empty());

    // nothing left behind in the driver either
    let leftovers = fs::read_dir(root.join("vfs").join("volumes"))?
        .filter_map(|e| e.ok())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .count();
    assert_eq!(leftovers, 0);

    faults.create_volume_fails_after.store(false, Ordering::SeqCst);
    let v = reg.create_volume("half", Some(4096), None, None)?;
    faults.create_snapshot_fails_after.store(true, Ordering::SeqCst);
    let err = reg.create_snapshot("half", "s", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    assert!(reg.inspect_volume("half")?.snapshots.is_empty());
    let snaps_dir = root.join("vfs").join("snapshots").join(&v.uuid);
    let left = fs::read_dir(&snaps_dir)
        .map(|rd| rd.filter_map(|e| e.ok()).count())
        .unwrap_or(0);
    assert_eq!(left, 0);

    // no snapshot left, so a strict delete goes through
    reg.delete_volume("half", DeletePolicy::Strict, None)?;
    assert!(!backing.volume_exists(&v.uuid)?);
    reg.verify()?;
    Ok(())
}

#[test]
fn failed_delete_keeps_the_record() -> Result<()> {
    let root = unique_root("fault-delete");
    let (reg, faults, backing) = open_flaky(&root, RegistryOptions::default())?;
    let v = reg.create_volume("keep", Some(4096), None, None)?;

    faults.delete_volume_fails.store(true, Ordering::SeqCst);
    let err = reg
        .delete_volume("keep", DeletePolicy::Strict, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    assert_eq!(reg.inspect_volume("keep")?, v);
    assert!(backing.volume_exists(&v.uuid)?);
    assert!(reg.is_quiescent()?);

    // the driver removed it but still said no: the re-query decides
    faults.delete_volume_fails.store(false, Ordering::SeqCst);
    faults.delete_volume_fails_after.store(true, Ordering::SeqCst);
    reg.delete_volume("keep", DeletePolicy::Strict, None)?;
    assert_eq!(reg.inspect_volume("keep").unwrap_err().kind(), ErrorKind::NotFound);
    reg.verify()?;
    Ok(())
}

#[test]
fn timeout_returns_early_and_commits_later() -> Result<()> {
    let root = unique_root("fault-timeout");
    let (reg, faults, _backing) = open_flaky(&root, RegistryOptions::default())?;

    faults.create_volume_delay_ms.store(400, Ordering::SeqCst);
    let err = reg
        .create_volume("slow", Some(4096), None, Some(Duration::from_millis(50)))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    // the name stays reserved while the create is still running
    let err = reg.create_volume("slow", Some(4096), None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert!(!reg.is_quiescent()?);

    let mut committed = false;
    for _ in 0..100 {
        if reg.inspect_volume("slow").is_ok() {
            committed = true;
            break;
        }
        thread::sleep(Duration::from_millis(20));
    }
    assert!(committed, "late create must still commit");
    assert!(reg.is_quiescent()?);
    reg.verify()?;
    Ok(())
}

#[test]
fn default_driver_timeout_applies_without_request_timeout() -> Result<()> {
    let root = unique_root("fault-deftimeout");
    let opts = RegistryOptions::default().with_driver_timeout(Some(Duration::from_millis(30)));
    let (reg, faults, _backing) = open_flaky(&root, opts)?;

    faults.create_volume_delay_ms.store(200, Ordering::SeqCst);
    let err = reg.create_volume("d", Some(4096), None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    faults.create_volume_delay_ms.store(0, Ordering::SeqCst);
    // a generous request timeout wins over the default
    reg.create_volume("e", Some(4096), None, Some(Duration::from_secs(10)))?;
    Ok(())
}

#[test]
fn half_committed_delete_is_reported_and_retry_finishes_it() -> Result<()> {
    let root = unique_root("fault-halfdel");
    let (reg, _faults, backing) = open_flaky(&root, RegistryOptions::default())?;
    let v = reg.create_volume("sticky", Some(4096), None, None)?;

    // a directory in place of the record file: the driver delete works, the record removal does not
    let record = root.join(format!("volume_{}.json", v.uuid));
    fs::remove_file(&record)?;
    fs::create_dir_all(record.join("blocker"))?;

    let err = reg
        .delete_volume("sticky", DeletePolicy::Strict, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("half-committed"), "{err}");
    assert!(!backing.volume_exists(&v.uuid)?);
    // still registered, so the caller can retry
    assert_eq!(reg.inspect_volume("sticky")?.uuid, v.uuid);
    reg.verify()?;

    fs::remove_dir_all(&record)?;
    reg.delete_volume("sticky", DeletePolicy::Strict, None)?;
    assert_eq!(reg.resolve("sticky").unwrap_err().kind(), ErrorKind::NotFound);
    assert!(reg.is_quiescent()?);
    reg.verify()?;
    Ok(())
}
