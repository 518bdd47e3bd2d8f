use anyhow::Result;
use serde::Serialize;

use volumed::config::parse_size;
use volumed::{BackupRecord, Volume};

pub fn print_json<T: Serialize>(v: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(v)?);
    Ok(())
}

pub fn size_arg(s: Option<String>) -> Result<Option<u64>> {
    s.as_deref().map(parse_size).transpose()
}

pub fn print_volumes(vols: &[Volume]) {
    println!(
        "{:<36}  {:<20}  {:>12}  {:<6}  {:>5}  MOUNT",
        "UUID", "NAME", "SIZE", "FS", "SNAPS"
    );
    for v in vols {
        println!(
            "{:<36}  {:<20}  {:>12}  {:<6}  {:>5}  {}",
            v.uuid,
            v.name,
            v.size,
            v.file_system,
            v.snapshots.len(),
            v.mount_point
        );
    }
}

pub fn print_backups(recs: &[BackupRecord]) {
    println!(
        "{:<36}  {:<7}  {:<11}  {:<20}  URL",
        "ID", "KIND", "STATUS", "CREATED"
    );
    for r in recs {
        let status = serde_json::to_value(r.status)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let kind = serde_json::to_value(r.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!(
            "{:<36}  {:<7}  {:<11}  {:<20}  {}",
            r.id, kind, status, r.created_time, r.url
        );
        if let Some(e) = &r.error {
            println!("    error: {}", e);
        }
    }
}
