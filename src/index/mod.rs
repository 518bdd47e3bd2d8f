//! index - производные индексы реестра.
//! - name.rs  - `Index`: key -> uuid с обратным поиском (имена томов/снапшотов, snapshot -> volume)
//! - trunc.rs - `TruncIndex`: разрешение сокращённых UUID по префиксу
//!
//! Индексы не знают о блокировках: мутации выполняет только Registry под write-lock.

pub mod name;
pub mod trunc;

pub use name::Index;
pub use trunc::TruncIndex;
