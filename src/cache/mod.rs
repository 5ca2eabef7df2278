//! Response cache primitives.
//!
//! - **Keys**: deterministic identities derived from the upstream request line
//! - **Envelope**: the versioned wrapper persisted around each cached body
//! - **Store**: the key/value backend seam (Redis in production, memory for tests)
//!
//! Entries never expire here. They are served as long as they exist and are
//! overwritten whenever a refresh against the registry succeeds.

mod envelope;
mod keys;
mod store;

pub use envelope::{CacheEnvelope, CachedPayload, ENVELOPE_VERSION, EnvelopeError};
pub use keys::{CacheKey, UpstreamPath};
pub use store::{CacheError, CacheStore, MemoryStore};
