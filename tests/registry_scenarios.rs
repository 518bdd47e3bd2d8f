use anyhow::Result;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use volumed::{
    driver, DeletePolicy, EntityKind, ErrorKind, IdSource, RandomIds, Registry, RegistryOptions,
};

/// Уникальный корневой путь для теста.
fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("volumed-{}-{}-{}", prefix, pid, t))
}

/// Hands out scripted ids first, random ones afterwards.
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

fn open_with(root: &Path, opts: RegistryOptions) -> Result<Registry> {
    fs::create_dir_all(root)?;
    let drv = driver::init("vfs", root, &[])?;
    Ok(Registry::open(root, drv, opts)?)
}

fn open(root: &Path) -> Result<Registry> {
    open_with(root, RegistryOptions::default())
}

#[test]
fn scenario_a_create_and_inspect_by_name_and_uuid() -> Result<()> {
    let root = unique_root("scen-a");
    let reg = open(&root)?;

    let v = reg.create_volume("data1", Some(10_737_418_240), None, None)?;
    assert_eq!(v.name, "data1");
    assert_eq!(v.size, 10_737_418_240);
    assert_eq!(v.uuid.len(), 36);
    assert!(!v.file_system.is_empty(), "file system must be set");
    assert!(v.snapshots.is_empty());

    let by_name = reg.inspect_volume("data1")?;
    let by_uuid = reg.inspect_volume(&v.uuid)?;
    assert_eq!(by_name, v);
    assert_eq!(by_uuid, v);
    assert_eq!(reg.resolve(&v.uuid)?, (EntityKind::Volume, v.uuid.clone()));

    reg.verify()?;
    Ok(())
}

#[test]
fn scenario_b_delete_refused_while_snapshot_exists() -> Result<()> {
    let root = unique_root("scen-b");
    let reg = open(&root)?;

    let v = reg.create_volume("v1", Some(1 << 20), None, None)?;
    let s = reg.create_snapshot("v1", "s1", None)?;
    assert_eq!(s.volume_uuid, v.uuid);

    let err = reg
        .delete_volume("v1", DeletePolicy::Strict, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(reg.inspect_volume("v1")?.snapshots.len(), 1);

    reg.delete_snapshot("s1", Some("v1"), None)?;
    reg.delete_volume("v1", DeletePolicy::Strict, None)?;

    assert_eq!(reg.inspect_volume("v1").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(reg.resolve(&v.uuid).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(reg.resolve(&s.uuid).unwrap_err().kind(), ErrorKind::NotFound);
    assert!(reg.list_volumes()?.is_empty());
    reg.verify()?;
    Ok(())
}

#[test]
fn scenario_c_shared_prefix_is_ambiguous() -> Result<()> {
    let root = unique_root("scen-c");
    let ids = ScriptedIds::new(&[
        "0badc0de-1111-4111-8111-111111111111",
        "0badc0de-2222-4222-8222-222222222222",
    ]);
    let reg = open_with(&root, RegistryOptions::default().with_id_source(ids))?;

    let a = reg.create_volume("", Some(4096), None, None)?;
    let b = reg.create_volume("", Some(4096), None, None)?;
    assert_eq!(&a.uuid[..8], &b.uuid[..8]);

    let err = reg.resolve("0badc0de").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AmbiguousId);
    assert_eq!(
        reg.inspect_volume("0badc0de").unwrap_err().kind(),
        ErrorKind::AmbiguousId
    );

    assert_eq!(reg.resolve("0badc0de-1")?, (EntityKind::Volume, a.uuid.clone()));
    assert_eq!(reg.inspect_volume("0badc0de-22")?.uuid, b.uuid);
    Ok(())
}

#[test]
fn short_prefix_is_invalid_and_unknown_is_not_found() -> Result<()> {
    let root = unique_root("short");
    let reg = open(&root)?;
    let v = reg.create_volume("alpha", Some(4096), None, None)?;

    assert_eq!(
        reg.resolve(&v.uuid[..3]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        reg.resolve(&v.uuid[..5]).unwrap_err().kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(reg.resolve(&v.uuid[..6])?.1, v.uuid);
    assert_eq!(reg.resolve("").unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(reg.resolve("no-such-name").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(
        reg.resolve("ffffffff-ffff-4fff-bfff-ffffffffffff")
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    Ok(())
}

#[test]
fn full_uuid_resolves_despite_name_collisions() -> Result<()> {
    let root = unique_root("fulluuid");
    let reg = open(&root)?;
    let a = reg.create_volume("same", Some(4096), None, None)?;
    let err = reg.create_volume("same", Some(4096), None, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
    let b = reg.create_volume("", Some(4096), None, None)?;

    assert_eq!(reg.resolve(&a.uuid)?.1, a.uuid);
    assert_eq!(reg.resolve(&b.uuid)?.1, b.uuid);
    assert_eq!(reg.list_volumes()?.len(), 2);
    Ok(())
}

#[test]
fn invalid_requests_are_rejected() -> Result<()> {
    let root = unique_root("invalid");
    let reg = open(&root)?;

    let bad = |r: volumed::Result<volumed::Volume>| r.unwrap_err().kind();
    assert_eq!(bad(reg.create_volume("x", Some(0), None, None)), ErrorKind::InvalidArgument);
    assert_eq!(bad(reg.create_volume("a b", None, None, None)), ErrorKind::InvalidArgument);
    assert_eq!(bad(reg.create_volume("-x", None, None, None)), ErrorKind::InvalidArgument);
    assert_eq!(
        bad(reg.create_volume("0f5ba3a4-8a6e-4c2d-9e55-6c8b2d3f1a10", None, None, None)),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        bad(reg.mount_volume("x", Some("relative/path"), None)),
        ErrorKind::InvalidArgument
    );
    assert!(reg.list_volumes()?.is_empty());
    assert!(reg.is_quiescent()?);
    Ok(())
}

#[test]
fn double_delete_is_not_found() -> Result<()> {
    let root = unique_root("double-del");
    let reg = open(&root)?;
    let v = reg.create_volume("gone", Some(4096), None, None)?;
    let s = reg.create_snapshot("gone", "", None)?;

    reg.delete_snapshot(&s.uuid, None, None)?;
    assert_eq!(
        reg.delete_snapshot(&s.uuid, None, None).unwrap_err().kind(),
        ErrorKind::NotFound
    );

    reg.delete_volume(&v.uuid, DeletePolicy::Strict, None)?;
    assert_eq!(
        reg.delete_volume(&v.uuid, DeletePolicy::Strict, None)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    assert_eq!(
        reg.delete_volume("gone", DeletePolicy::Strict, None)
            .unwrap_err()
            .kind(),
        ErrorKind::NotFound
    );
    reg.verify()?;
    Ok(())
}

#[test]
fn cascade_delete_removes_snapshots() -> Result<()> {
    let root = unique_root("cascade");
    let reg = open(&root)?;
    let v = reg.create_volume("c1", Some(4096), None, None)?;
    let s1 = reg.create_snapshot("c1", "a", None)?;
    let s2 = reg.create_snapshot(&v.uuid, "b", None)?;
    let s3 = reg.create_snapshot("c1", "", None)?;

    reg.delete_volume("c1", DeletePolicy::Cascade, None)?;

    for id in [&v.uuid, &s1.uuid, &s2.uuid, &s3.uuid] {
        assert_eq!(reg.resolve(id).unwrap_err().kind(), ErrorKind::NotFound);
    }
    let vfs = root.join("vfs");
    assert!(!vfs.join("volumes").join(&v.uuid).exists());
    assert!(!vfs.join("snapshots").join(&v.uuid).join(&s1.uuid).exists());
    assert_eq!(reg.stats()?.snapshots, 0);
    reg.verify()?;
    Ok(())
}

#[test]
fn snapshot_names_are_scoped_per_volume() -> Result<()> {
    let root = unique_root("snapnames");
    let reg = open(&root)?;
    reg.create_volume("va", Some(4096), None, None)?;
    reg.create_volume("vb", Some(4096), None, None)?;

    let a = reg.create_snapshot("va", "daily", None)?;
    let b = reg.create_snapshot("vb", "daily", None)?;
    assert_ne!(a.uuid, b.uuid);
    assert_eq!(
        reg.create_snapshot("va", "daily", None).unwrap_err().kind(),
        ErrorKind::Conflict
    );

    assert_eq!(reg.inspect_snapshot("daily", Some("va"))?, a);
    assert_eq!(reg.inspect_snapshot("daily", Some("vb"))?, b);
    // name lookup needs its volume
    assert_eq!(
        reg.inspect_snapshot("daily", None).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    // a snapshot uuid does not answer for another volume
    assert_eq!(
        reg.inspect_snapshot(&a.uuid, Some("vb")).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    assert_eq!(reg.resolve_snapshot(&b.uuid[..8], None)?, (b.uuid.clone(), b.volume_uuid.clone()));
    assert_eq!(reg.resolve(&a.uuid)?.0, EntityKind::Snapshot);
    // a snapshot is not a volume
    assert_eq!(
        reg.inspect_volume(&a.uuid).unwrap_err().kind(),
        ErrorKind::NotFound
    );
    Ok(())
}

#[test]
fn mount_umount_and_delete_mounted() -> Result<()> {
    let root = unique_root("mount");
    let reg = open(&root)?;
    let v = reg.create_volume("m1", Some(4096), None, None)?;

    let m = reg.mount_volume("m1", None, None)?;
    let expected = root.join("mounts").join(&v.uuid);
    assert_eq!(PathBuf::from(&m.mount_point), expected);
    assert!(expected.exists());

    // same place again is a no-op, elsewhere is a conflict
    assert_eq!(reg.mount_volume("m1", None, None)?, m);
    assert_eq!(
        reg.mount_volume("m1", Some(m.mount_point.as_str()), None)?,
        m
    );
    let other = root.join("elsewhere");
    assert_eq!(
        reg.mount_volume("m1", Some(other.to_str().unwrap()), None)
            .unwrap_err()
            .kind(),
        ErrorKind::Conflict
    );

    assert_eq!(
        reg.delete_volume("m1", DeletePolicy::Cascade, None)
            .unwrap_err()
            .kind(),
        ErrorKind::Conflict
    );

    let u = reg.umount_volume("m1", None)?;
    assert!(u.mount_point.is_empty());
    assert_eq!(reg.umount_volume("m1", None)?, u);
    reg.delete_volume("m1", DeletePolicy::Strict, None)?;
    assert!(!expected.exists());
    Ok(())
}

#[test]
fn backup_and_restore_through_registry() -> Result<()> {
    let root = unique_root("backup");
    let reg = open(&root)?;
    let v = reg.create_volume("src", Some(1 << 20), Some("xfs"), None)?;
    let m = reg.mount_volume("src", None, None)?;
    fs::write(Path::new(&m.mount_point).join("hello.txt"), b"hello volume")?;
    let s = reg.create_snapshot("src", "s1", None)?;

    let dest = root.join("backups");
    let rec = reg.backup_snapshot("s1", Some("src"), &format!("vfs://{}", dest.display()), None)?;
    assert_eq!(rec.status, volumed::model::BackupStatus::Completed);
    assert_eq!(rec.snapshot_uuid, s.uuid);
    assert!(rec.url.starts_with("vfs://"));

    let restored = reg.restore_snapshot(&rec.url, "copy", None)?;
    assert_ne!(restored.uuid, v.uuid);
    assert_eq!(restored.size, v.size);
    assert_eq!(restored.file_system, "xfs");

    let rm = reg.mount_volume("copy", None, None)?;
    let got = fs::read(Path::new(&rm.mount_point).join("hello.txt"))?;
    assert_eq!(got, b"hello volume");

    let journal = reg.list_backups()?;
    assert_eq!(journal.len(), 2);
    assert!(journal
        .iter()
        .all(|r| r.status == volumed::model::BackupStatus::Completed));

    let err = reg.backup_snapshot("s1", Some("src"), "s3://bucket/x", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Driver);
    let journal = reg.list_backups()?;
    assert_eq!(journal.last().map(|r| r.status), Some(volumed::model::BackupStatus::Failed));
    assert_eq!(reg.stats()?.backups, 3);
    reg.verify()?;
    Ok(())
}
