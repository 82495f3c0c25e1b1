//! Network layer
//!
//! HTTP resource fetching with proxy resolution and manual redirect handling.

mod fetcher;

pub use fetcher::{FetchError, ProxyConfig, ResourceFetcher};
