/// Re-export `Config` from `scriptstats-core` for use within this crate.
///
/// All environment-variable parsing lives in `scriptstats-core` so the
/// backend crates and integration tests share one definition.
pub use scriptstats_core::config::{Backend, Config};
