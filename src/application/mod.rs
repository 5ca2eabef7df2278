//! Application services: the cache-aside proxy and its collaborators.

pub mod error;
pub mod listing;
pub mod proxy;
pub mod refresh;
pub mod upstream;
