//! Cross-worker coordination primitives built on the shared store.
//!
//! - `CollectionLock`: per-collection writer exclusion with a crash-safety TTL
//! - `CancelFlags`: per-job cooperative cancellation bits
//! - `InteractiveMarker`: advisory "interactive job running" signal that bulk
//!   jobs pause for
//! - `InsertedIdLedger`: per-job record of written member IDs, consumed by undo

pub mod flags;
pub mod ledger;
pub mod lock;

pub use flags::{CancelFlags, InteractiveGuard, InteractiveMarker};
pub use ledger::InsertedIdLedger;
pub use lock::{CollectionLock, LockLease};
