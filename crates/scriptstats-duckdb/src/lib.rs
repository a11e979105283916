pub mod backend;
pub mod schema;
pub mod statistics;

pub use backend::DuckDbBackend;

/// Re-export the `duckdb` crate so consumers (especially tests) can use
/// `scriptstats_duckdb::duckdb::params!` without an extra dependency.
pub use duckdb;
