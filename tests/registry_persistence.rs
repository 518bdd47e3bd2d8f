use anyhow::Result;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use volumed::model::{BackupKind, BackupStatus};
use volumed::{
    driver, BackupRecord, DeletePolicy, ErrorKind, IdSource, RandomIds, Registry, RegistryOptions,
};

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("volumed-{}-{}-{}", prefix, pid, t))
}

struct ScriptedIds(Mutex<VecDeque<String>>);

impl ScriptedIds {
    fn new(ids: &[&str]) -> Arc<Self> {
        Arc::new(Self(Mutex::new(ids.iter().map(|s| s.to_string()).collect())))
    }
}

impl IdSource for ScriptedIds {
    fn next_id(&self) -> String {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| RandomIds.next_id())
    }
}

fn open_with(root: &Path, opts: RegistryOptions) -> volumed::Result<Registry> {
    fs::create_dir_all(root).map_err(|e| volumed::Error::internal(e.to_string()))?;
    let drv = driver::init("vfs", root, &[]).map_err(|e| volumed::Error::internal(e.to_string()))?;
    Registry::open(root, drv, opts)
}

fn open(root: &Path) -> volumed::Result<Registry> {
    open_with(root, RegistryOptions::default())
}

#[test]
fn reopen_restores_everything() -> Result<()> {
    let root = unique_root("persist-reopen");
    let (a, b, s, restored) = {
        let reg = open(&root)?;
        let a = reg.create_volume("alpha", Some(1 << 20), Some("xfs"), None)?;
        let b = reg.create_volume("", Some(4096), None, None)?;
        let s = reg.create_snapshot("alpha", "first", None)?;
        let a = reg.mount_volume("alpha", None, None)?;
        reg.backup_snapshot("first", Some("alpha"), &format!("vfs://{}/bk", root.display()), None)?;
        let bk = reg.list_backups()?;
        let restored = reg.restore_snapshot(&bk[0].url, "beta", None)?;
        (a, b, s, restored)
    };

    let reg = open(&root)?;
    assert_eq!(reg.inspect_volume("alpha")?, a);
    assert_eq!(reg.inspect_volume(&b.uuid)?, b);
    assert_eq!(reg.inspect_volume("beta")?, restored);
    assert_eq!(reg.inspect_snapshot("first", Some("alpha"))?, s);
    assert_eq!(reg.inspect_snapshot(&s.uuid, None)?, s);
    assert_eq!(reg.list_volumes()?.len(), 3);

    let journal = reg.list_backups()?;
    assert_eq!(journal.len(), 2);
    assert!(journal.iter().all(|r| r.status == BackupStatus::Completed));

    let st = reg.stats()?;
    assert_eq!((st.volumes, st.snapshots, st.backups, st.mounted), (3, 1, 2, 1));
    reg.verify()?;
    Ok(())
}

#[test]
fn retired_uuids_are_never_reissued() -> Result<()> {
    const GONE: &str = "5eed0000-0000-4000-8000-000000000001";
    let root = unique_root("persist-retired");

    let reg = open_with(
        &root,
        RegistryOptions::default().with_id_source(ScriptedIds::new(&[GONE])),
    )?;
    let v = reg.create_volume("tmp", Some(4096), None, None)?;
    assert_eq!(v.uuid, GONE);
    reg.delete_volume("tmp", DeletePolicy::Strict, None)?;

    // the source offers the dead uuid again; the registry must skip it
    let reg = open_with(
        &root,
        RegistryOptions::default().with_id_source(ScriptedIds::new(&[GONE, GONE])),
    )?;
    let again = reg.create_volume("tmp", Some(4096), None, None)?;
    assert_ne!(again.uuid, GONE);
    assert_eq!(reg.resolve(GONE).unwrap_err().kind(), ErrorKind::NotFound);

    // snapshots retire their uuids too
    const SNAP: &str = "5eed0000-0000-4000-8000-000000000002";
    let reg = open_with(
        &root,
        RegistryOptions::default().with_id_source(ScriptedIds::new(&[SNAP, SNAP])),
    )?;
    let s = reg.create_snapshot("tmp", "s", None)?;
    assert_eq!(s.uuid, SNAP);
    reg.delete_snapshot(SNAP, None, None)?;
    let s2 = reg.create_snapshot("tmp", "s", None)?;
    assert_ne!(s2.uuid, SNAP);
    Ok(())
}

#[test]
fn tampered_record_fails_to_load() -> Result<()> {
    let root = unique_root("persist-crc");
    let v = {
        let reg = open(&root)?;
        reg.create_volume("solid", Some(4096), None, None)?
    };

    let path = root.join(format!("volume_{}.json", v.uuid));
    let text = fs::read_to_string(&path)?;
    assert!(text.contains("\"crc32\""));
    fs::write(&path, text.replace("\"solid\"", "\"forged\""))?;

    let err = open(&root).err().expect("tampered record must not load");
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert!(err.to_string().contains("checksum"), "{err}");
    Ok(())
}

#[test]
fn garbage_record_fails_to_load() -> Result<()> {
    let root = unique_root("persist-garbage");
    {
        let reg = open(&root)?;
        reg.create_volume("ok", Some(4096), None, None)?;
    }
    fs::write(
        root.join("volume_00000000-0000-4000-8000-00000000dead.json"),
        b"{ not json",
    )?;
    let err = open(&root).err().expect("garbage must not load");
    assert_eq!(err.kind(), ErrorKind::Internal);

    // unrelated files under the root are ignored
    let root = unique_root("persist-other");
    fs::create_dir_all(&root)?;
    fs::write(root.join("notes.txt"), b"hello")?;
    fs::write(root.join("volume_x.json.tmp"), b"partial")?;
    assert!(open(&root)?.list_volumes()?.is_empty());
    Ok(())
}

#[test]
fn interrupted_journal_entries_become_failed() -> Result<()> {
    let root = unique_root("persist-journal");
    fs::create_dir_all(&root)?;
    let stale = BackupRecord {
        id: "job-1".to_string(),
        kind: BackupKind::Backup,
        snapshot_uuid: "5eed0000-0000-4000-8000-000000000003".to_string(),
        volume_uuid: "5eed0000-0000-4000-8000-000000000004".to_string(),
        url: "vfs:///nowhere".to_string(),
        status: BackupStatus::InProgress,
        error: None,
        created_time: "2026-01-01T00:00:00Z".to_string(),
        finished_time: None,
    };
    fs::write(root.join("backups.json"), serde_json::to_vec(&vec![stale])?)?;

    let reg = open(&root)?;
    let journal = reg.list_backups()?;
    assert_eq!(journal.len(), 1);
    assert_eq!(journal[0].status, BackupStatus::Failed);
    assert!(journal[0].error.as_deref().unwrap_or("").contains("interrupted"));
    assert!(journal[0].finished_time.is_some());
    drop(reg);

    // the fix-up is persisted
    let again = open(&root)?.list_backups()?;
    assert_eq!(again[0].status, BackupStatus::Failed);
    Ok(())
}
