pub mod channel;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod keys;
pub mod memory;
pub mod repository;
pub mod search;
pub mod statistics;
pub mod store;
pub mod visitor;
