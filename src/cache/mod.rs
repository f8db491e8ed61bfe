//! Cache engine.
//!
//! - [`CacheKey`] fingerprints a request.
//! - [`CacheStore`] holds published responses and supports an atomic flush.
//! - [`Coordinator`] deduplicates concurrent misses so each key has at most
//!   one [`FetchWorker`] in flight, and fans the outcome out to every waiter.
//! - [`ConfigHandle`] hands each component the [`ProxyConfig`] snapshot that
//!   is current when it acts.

mod config;
mod coordinator;
mod keys;
mod store;
mod worker;

pub use config::{ConfigHandle, ControlPath, ProxyConfig};
pub use coordinator::{Coordinator, FlushListener, InvalidateReport};
pub use keys::{CacheKey, REQUEST_ID_HEADER, request_target};
pub use store::{CacheStore, CachedResponse};
pub use worker::{
    FetchError, FetchOutcome, FetchRequest, FetchResult, FetchWorker, Upstream, UpstreamResponse,
};

pub(crate) use store::is_hop_by_hop;
