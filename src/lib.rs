pub mod config;
pub mod consolidate;
pub mod constants;
pub mod domain;
pub mod error;
pub mod extraction;
pub mod fetch;
pub mod frontier;
pub mod idempotency;
pub mod logging;
pub mod metrics;
pub mod music;
pub mod pipeline;
pub mod promotion;
pub mod server;
pub mod service;
pub mod storage;
pub mod types;
