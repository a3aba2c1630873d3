use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue};

use crate::retry::RetryPolicy;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/142.0.0.0 Safari/537.36";

/// HTTP client settings used for playlist and segment requests.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Overall timeout for a single request (0 disables it)
    pub timeout: Duration,

    /// Time allowed to establish the connection
    pub connect_timeout: Duration,

    pub user_agent: String,

    /// Extra headers sent with every request
    pub headers: HeaderMap,

    pub accept_invalid_certs: bool,

    /// Retry behaviour for every request
    pub retry: RetryPolicy,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(3),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
            headers: FetchConfig::default_headers(),
            accept_invalid_certs: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl FetchConfig {
    pub fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(reqwest::header::ACCEPT, HeaderValue::from_static("*/*"));
        headers
    }
}

/// Settings of a polling session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the entry queue between producer and consumer
    pub queue_capacity: usize,

    /// Number of recently seen references remembered for deduplication
    pub recency_capacity: usize,

    /// Refresh period used when a fragment carries no target duration
    pub fallback_refresh_interval: Duration,

    /// Use `#EXT-X-TARGETDURATION` as the refresh period when present
    pub honor_target_duration: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 5,
            recency_capacity: 200,
            fallback_refresh_interval: Duration::from_secs(2),
            honor_target_duration: true,
        }
    }
}

/// Settings of the archive packer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackerConfig {
    /// Size in bytes of the index header at the start of the archive
    pub header_budget: usize,

    /// Packing stops once fewer header bytes than this remain
    pub min_free_header: usize,
}

impl PackerConfig {
    pub const MIN_HEADER_KIB: usize = 4;
    pub const MAX_HEADER_KIB: usize = 512;

    /// Header budget in KiB, clamped to 4..=512.
    pub fn with_header_kib(mut self, kib: usize) -> Self {
        self.header_budget = kib.clamp(Self::MIN_HEADER_KIB, Self::MAX_HEADER_KIB) * 1024;
        self
    }
}

impl Default for PackerConfig {
    fn default() -> Self {
        Self {
            header_budget: 64 * 1024,
            min_free_header: 50,
        }
    }
}
