//! Общие константы: имена файлов в root, сокет, API, лимиты идентификаторов.

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const API_VERSION: &str = "1";

// -------- Root layout --------
pub const LOCK_FILE: &str = "lock";
pub const CONFIG_FILE: &str = "volumed.cfg";
pub const VOLUME_CFG_PREFIX: &str = "volume_";
pub const CFG_POSTFIX: &str = ".json";
pub const RETIRED_FILE: &str = "retired.json";
pub const BACKUPS_FILE: &str = "backups.json";

// -------- Defaults --------
pub const DEFAULT_ROOT: &str = "/var/lib/volumed";
pub const DEFAULT_SOCKET: &str = "/var/run/volumed/volume.sock";
pub const DEFAULT_DRIVER: &str = "vfs";
/// 10G
pub const DEFAULT_VOLUME_SIZE: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_FS_TYPE: &str = "ext4";
pub const DEFAULT_WORKERS: usize = 4;

// -------- Identifiers --------
/// Length of a hyphenated UUID string.
pub const UUID_LEN: usize = 36;
/// Shortest abbreviated UUID accepted by default.
pub const DEFAULT_MIN_ABBREV_LEN: usize = 6;
pub const MAX_NAME_LEN: usize = 64;
/// Allocation attempts before giving up on a fresh (never issued) UUID.
pub const UUID_ALLOC_ATTEMPTS: usize = 16;

// -------- Client --------
/// Socket read/write timeout of the client; driver operations may be slow.
pub const CLIENT_IO_TIMEOUT_SECS: u64 = 300;
