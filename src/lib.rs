// Query load generator - library root

pub mod backoff;
pub mod cancel;
pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod remote;
pub mod report;
pub mod sink;
