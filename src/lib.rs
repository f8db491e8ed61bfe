//! Caching reverse proxy for content APIs.
//!
//! Identical concurrent GETs are coalesced into a single upstream fetch, the
//! buffered result is kept in memory until an operator flushes it, and every
//! flush is announced to a configurable set of webhooks.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
