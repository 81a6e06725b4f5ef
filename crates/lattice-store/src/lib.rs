//! # lattice-store
//!
//! Durable storage for whiteboard documents:
//! - [`WriteQueue`]: per-path FIFO, backup, verify-then-rename writes
//! - [`BackupManager`]: timestamped backups with retention
//! - [`quarantine`](quarantine::quarantine): set aside unreadable files
//! - [`DocumentStore`]: index and per-document JSON files, legacy migration

pub mod atomic;
pub mod backup;
pub mod layout;
pub mod quarantine;
pub mod store;

pub use atomic::{QueueStats, RetryPolicy, WriteQueue};
pub use backup::BackupManager;
pub use layout::VaultLayout;
pub use store::{DocumentStore, IndexSource, LoadedIndex};
