//! volumed: local volume manager daemon.

// Базовые модули
pub mod consts;
pub mod error;
pub mod model;
pub mod config;
pub mod metrics;
pub mod lock;

// Индексы: имя <-> uuid, сокращённые uuid
pub mod index; // src/index/{mod,name,trunc}.rs

// Драйверы хранилища
pub mod driver; // src/driver/{mod,vfs}.rs

// Ядро: записи, индексы, блокировки, персистентность
pub mod registry; // src/registry/{mod,state,store,locks,resolve,volume,snapshot,backup}.rs

// Внешние поверхности
pub mod api;
pub mod daemon; // src/daemon/{mod,handlers}.rs
pub mod client; // src/client/mod.rs

// Удобные реэкспорты
pub use config::DaemonConfig;
pub use daemon::Daemon;
pub use driver::{Driver, DriverError};
pub use error::{Error, ErrorKind, Result};
pub use model::{BackupRecord, EntityKind, Snapshot, Volume};
pub use registry::{DeletePolicy, IdSource, RandomIds, Registry, RegistryOptions};
