mod error;
mod middleware;
mod public;
mod rate_limit;

pub use error::{ApiError, ErrorBody};
pub use middleware::REQUEST_ID_HEADER;
pub use public::{CACHE_STATUS_HEADER, REGISTRY_HASH, build_router};
pub use rate_limit::RateLimiter;

use std::sync::Arc;

use crate::application::proxy::ProxyEngine;
use crate::cache::CacheStore;
use crate::infra::speedtest::SpeedTest;

#[derive(Clone)]
pub struct HttpState {
    pub proxy: Arc<ProxyEngine>,
    pub store: Arc<dyn CacheStore>,
    pub speedtest: Arc<SpeedTest>,
    pub rate_limiter: Arc<RateLimiter>,
    pub node_name: Arc<str>,
}
