//! Community node: a stale-while-revalidate caching gateway in front of the
//! community registry.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
