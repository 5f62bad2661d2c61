//! Expression-driven web crawler with streaming XPath extraction.
//!
//! One expression mixes XPath steps with a `url(...)` fetching operator:
//!
//! ```text
//! url('https://example.org')///url(//a/@href)/map{'t':(//h1)[1]}
//! ```
//!
//! [`Engine::run`](Engine::run) parses the expression into a segment
//! program, crawls breadth-first with bounded global and per-host
//! concurrency (robots.txt, adaptive throttling and retries included), and
//! streams extracted values as they are produced. Three hook points
//! ([`Hooks`](Hooks)) transform or drop data after fetch, after parse, and
//! after extraction; external sinks attach there. Crawled URLs are
//! deduplicated globally per run, so cyclic link graphs terminate.
//!
//! Results carry provenance: the custom XPath functions `wx:backlink(.)`,
//! `wx:depth(.)` and `base-uri(.)` answer from the crawl context of the
//! document under evaluation.

mod cache;
mod config;
mod dispatch;
mod engine;
mod error;
mod fetcher;
mod frontier;
mod hooks;
mod robots;
mod stats;
mod throttle;
mod urls;
mod value;
mod xpath;

pub use cache::{cache_key, CachedResponse, MemoryCache, ResponseCache};
pub use config::{AutoThrottleConfig, CacheBackend, CacheConfig, CrawlerConfig, RetryConfig};
pub use engine::{run, run_blocking, CancelToken, Engine, ResultStream, RunOptions};
pub use error::{Error, FetchError, FetchErrorKind};
pub use frontier::CrawlTask;
pub use hooks::{ExtractHook, FetchHook, HookAction, Hooks, ParseHook, TaskInfo};
pub use stats::{ProgressFn, StatsSnapshot};
pub use value::{ErrorValue, ProvenancedElement, ProvenancedString, Value};

pub use anyhow;
pub use wxpath_expr::{parse, ParseError, Program, Segment};
pub use wxpath_html::HtmlDom;
