//! Infrastructure adapters and runtime bootstrap.

pub mod error;
pub mod http;
pub mod origin;
pub mod redis_store;
pub mod registration;
pub mod speedtest;
pub mod telemetry;
