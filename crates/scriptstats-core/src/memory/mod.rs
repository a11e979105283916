//! In-process implementations of the collaborator traits.
//!
//! Used by the test suites and by `SCRIPTSTATS_BACKEND=memory` for
//! single-node development. Nothing here survives a restart.

pub mod channel;
pub mod counter;
pub mod hll;
pub mod search;

pub use channel::MemoryChannel;
pub use counter::MemoryCounterStore;
pub use hll::HyperLogLog;
pub use search::MemorySearchIndex;
