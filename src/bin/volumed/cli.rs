use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use volumed::consts::DEFAULT_SOCKET;

/// volumed - локальный менеджер томов (daemon + клиент)
#[derive(Parser, Debug)]
#[command(name = "volumed", version, about = "Local volume manager daemon and client")]
pub struct Cli {
    /// API socket of the daemon
    #[arg(long, global = true, env = "VOLUMED_SOCKET", default_value = DEFAULT_SOCKET)]
    pub socket: PathBuf,

    /// Force debug logging (otherwise RUST_LOG, default info)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Append log output to this file instead of stderr
    #[arg(long, global = true)]
    pub log: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Run the daemon in the foreground
    Server(ServerArgs),
    /// Daemon and driver information
    Info,
    /// Volume operations
    #[command(subcommand)]
    Volume(VolumeCmd),
    /// Snapshot operations
    #[command(subcommand)]
    Snapshot(SnapshotCmd),
    /// Backup and restore
    #[command(subcommand)]
    Backup(BackupCmd),
    /// Resolve a name, uuid or abbreviated uuid
    Resolve {
        #[arg(value_name = "REF")]
        reference: String,
    },
}

/// Flags left unset fall back to VOLUMED_* environment variables, then defaults.
#[derive(Args, Debug, Default)]
pub struct ServerArgs {
    /// Storage root (records, lock, driver state)
    #[arg(long)]
    pub root: Option<PathBuf>,
    /// Storage driver
    #[arg(long)]
    pub driver: Option<String>,
    /// Driver option key=value (repeatable)
    #[arg(long = "driver-opts", value_name = "KEY=VALUE")]
    pub driver_opts: Vec<String>,
    /// Default mount path prefix (default <root>/mounts)
    #[arg(long)]
    pub mounts_dir: Option<PathBuf>,
    /// Size of volumes created without one, e.g. 10G
    #[arg(long)]
    pub default_volume_size: Option<String>,
    /// Request worker threads
    #[arg(long)]
    pub workers: Option<usize>,
    /// Shortest abbreviated uuid accepted
    #[arg(long)]
    pub min_abbrev_len: Option<usize>,
    /// Deadline for driver calls of requests that carry none
    #[arg(long)]
    pub driver_timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum VolumeCmd {
    /// Create a volume
    Create {
        #[arg(long)]
        name: Option<String>,
        /// Size, e.g. 10G (daemon default if omitted)
        #[arg(long)]
        size: Option<String>,
        #[arg(long)]
        fs_type: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Delete a volume (refused while it has snapshots unless --cascade)
    Delete {
        #[arg(value_name = "REF")]
        reference: String,
        #[arg(long)]
        cascade: bool,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// List volumes
    List,
    /// Show one volume
    Inspect {
        #[arg(value_name = "REF")]
        reference: String,
    },
    /// Mount a volume
    Mount {
        #[arg(value_name = "REF")]
        reference: String,
        /// Absolute path (default <mounts-dir>/<uuid>)
        #[arg(long)]
        mount_point: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Unmount a volume
    Umount {
        #[arg(value_name = "REF")]
        reference: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
}

#[derive(Subcommand, Debug)]
pub enum SnapshotCmd {
    /// Snapshot a volume
    Create {
        #[arg(value_name = "VOLUME")]
        volume: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Delete a snapshot (by name needs --volume)
    Delete {
        #[arg(value_name = "REF")]
        reference: String,
        #[arg(long)]
        volume: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Show one snapshot
    Inspect {
        #[arg(value_name = "REF")]
        reference: String,
        #[arg(long)]
        volume: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCmd {
    /// Back a snapshot up to a URL (vfs:///path or file:///path)
    Create {
        #[arg(value_name = "SNAPSHOT")]
        reference: String,
        #[arg(long)]
        volume: Option<String>,
        #[arg(long)]
        dest: String,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Restore a backup URL as a new volume
    Restore {
        #[arg(value_name = "URL")]
        source: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Backup/restore journal
    List,
}
