use std::cmp;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlerConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Global max in-flight requests.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Max in-flight requests per canonical host.
    #[serde(default = "default_concurrency_per_host")]
    pub concurrency_per_host: usize,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,

    /// Default request headers. `User-Agent` falls back to `user_agent`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Per-host proxy URLs.
    #[serde(default)]
    pub proxies: BTreeMap<String, String>,

    #[serde(default = "default_respect_robots")]
    pub respect_robots: bool,

    /// Non-member response statuses become fetch errors.
    #[serde(default = "default_allowed_response_codes")]
    pub allowed_response_codes: BTreeSet<u16>,

    #[serde(default = "default_allow_redirects")]
    pub allow_redirects: bool,

    #[serde(default)]
    pub auto_throttle: Option<AutoThrottleConfig>,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Fetched pages buffered between the downloader and the workers.
    #[serde(default = "default_page_buffer")]
    pub page_buffer: usize,

    /// CPU workers parsing pages and evaluating segments.
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: String::from("wxpath"),
            concurrency: 16,
            concurrency_per_host: 8,
            timeout: 15.0,
            headers: BTreeMap::new(),
            proxies: BTreeMap::new(),
            respect_robots: true,
            allowed_response_codes: BTreeSet::from([200]),
            allow_redirects: true,
            auto_throttle: None,
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            page_buffer: 1_000,
            num_workers: cmp::max(1, num_cpus::get().saturating_sub(2)),
        }
    }
}

fn default_user_agent() -> String {
    CrawlerConfig::default().user_agent
}

fn default_concurrency() -> usize {
    CrawlerConfig::default().concurrency
}

fn default_concurrency_per_host() -> usize {
    CrawlerConfig::default().concurrency_per_host
}

fn default_timeout() -> f64 {
    CrawlerConfig::default().timeout
}

fn default_respect_robots() -> bool {
    CrawlerConfig::default().respect_robots
}

fn default_allowed_response_codes() -> BTreeSet<u16> {
    CrawlerConfig::default().allowed_response_codes
}

fn default_allow_redirects() -> bool {
    CrawlerConfig::default().allow_redirects
}

fn default_page_buffer() -> usize {
    CrawlerConfig::default().page_buffer
}

fn default_num_workers() -> usize {
    CrawlerConfig::default().num_workers
}

/// Adaptive per-host throttling. Absent means no throttling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoThrottleConfig {
    /// Desired concurrent requests per host; bounds how far the delay decays.
    #[serde(default)]
    pub target_concurrency: Option<usize>,

    /// Initial per-host delay in seconds.
    #[serde(default = "default_start_delay")]
    pub start_delay: f64,

    /// Delay ceiling in seconds.
    #[serde(default = "default_max_delay")]
    pub max_delay: f64,
}

impl Default for AutoThrottleConfig {
    fn default() -> Self {
        Self {
            target_concurrency: None,
            start_delay: 0.25,
            max_delay: 10.0,
        }
    }
}

fn default_start_delay() -> f64 {
    AutoThrottleConfig::default().start_delay
}

fn default_max_delay() -> f64 {
    AutoThrottleConfig::default().max_delay
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Attempts beyond the first.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Statuses worth retrying.
    #[serde(default = "default_retry_statuses")]
    pub statuses: BTreeSet<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            statuses: BTreeSet::from([500, 502, 503, 504]),
        }
    }
}

fn default_max_retries() -> u32 {
    RetryConfig::default().max_retries
}

fn default_retry_statuses() -> BTreeSet<u16> {
    RetryConfig::default().statuses
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Sqlite,
    Redis,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cache_backend")]
    pub backend: CacheBackend,

    /// TTL in seconds.
    #[serde(default = "default_expire_after")]
    pub expire_after: f64,

    #[serde(default = "default_cache_methods")]
    pub allowed_methods: BTreeSet<String>,

    /// Query parameters excluded from cache keys; a trailing `*` matches a
    /// prefix.
    #[serde(default = "default_ignored_params")]
    pub ignored_params: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            backend: CacheBackend::Sqlite,
            expire_after: 7.0 * 24.0 * 3600.0,
            allowed_methods: BTreeSet::from([String::from("GET"), String::from("HEAD")]),
            ignored_params: vec![String::from("utm_*"), String::from("fbclid")],
        }
    }
}

fn default_cache_backend() -> CacheBackend {
    CacheConfig::default().backend
}

fn default_expire_after() -> f64 {
    CacheConfig::default().expire_after
}

fn default_cache_methods() -> BTreeSet<String> {
    CacheConfig::default().allowed_methods
}

fn default_ignored_params() -> Vec<String> {
    CacheConfig::default().ignored_params
}
