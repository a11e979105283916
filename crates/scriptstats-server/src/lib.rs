pub mod aggregator;
pub mod app;
pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod query;
pub mod reconciler;
pub mod routes;
pub mod scheduler;
pub mod search;
pub mod state;
