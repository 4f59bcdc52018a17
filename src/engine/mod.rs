//! The persistence engine.
//!
//! On-disk layout of a store directory:
//!
//! - `MANIFEST`: magic, format version and the schema fingerprint
//! - `LOCK`: exclusive lock held while a store is open
//! - `objects.bin`: snapshot of committed objects (MessagePack, CRC32)
//! - `journal.log`: change sets committed since the snapshot
//!
//! The access layer treats all of this as opaque; it only calls
//! [`EntityStore`] to read through a unit of work and to save one.

mod journal;
mod snapshot;
mod store;

pub use journal::{ChangeSet, Journal};
pub use snapshot::Snapshot;
pub use store::{EntityStore, StoreConfig, StoreStats};
