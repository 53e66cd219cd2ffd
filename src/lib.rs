mod config;

pub(crate) mod file_lock;
pub(crate) mod segment;
pub(crate) mod testing;
pub(crate) mod types;
pub(crate) mod wal;

pub mod errors;

pub use config::BackendKind;
pub use config::Config;
pub use errors::WalError;
pub use types::Entry;
pub use types::HardState;
pub use types::Snapshot;
pub use wal::stat::SyncStat;
pub use wal::verify;
pub use wal::Wal;

#[cfg(test)]
mod tests;
