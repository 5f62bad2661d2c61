use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::sleep;

use crate::cache::{cache_key, CachedResponse, ResponseCache};
use crate::config::CrawlerConfig;
use crate::error::{Error, FetchError, FetchErrorKind};
use crate::robots::RobotsCache;
use crate::throttle::HostThrottle;
use crate::urls;

const BACKOFF_BASE: Duration = Duration::from_millis(250);
const BACKOFF_JITTER_MS: u64 = 100;

/// A successfully fetched page.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub body: Vec<u8>,
    /// URL after redirects, canonicalised; the document base.
    pub final_url: String,
    pub status: u16,
}

impl From<CachedResponse> for FetchedPage {
    fn from(c: CachedResponse) -> Self {
        Self {
            body: c.body,
            final_url: c.final_url,
            status: c.status,
        }
    }
}

/// Issues requests under the run's politeness policies. Per request:
/// robots gate, cache lookup, throttle wait, per-host permit, then the
/// retry loop. Every request chain ends in exactly one outcome.
pub struct Fetcher {
    client: reqwest::Client,
    config: Arc<CrawlerConfig>,
    robots: RobotsCache,
    throttle: Option<HostThrottle>,
    hosts: Mutex<HashMap<String, Arc<Semaphore>>>,
    cache: Option<Arc<dyn ResponseCache>>,
}

impl Fetcher {
    pub fn new(
        config: Arc<CrawlerConfig>,
        cache: Option<Arc<dyn ResponseCache>>,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = name
                .parse::<HeaderName>()
                .map_err(|e| Error::Config(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Config(format!("invalid header value for {name}: {e}")))?;
            headers.insert(name, value);
        }
        if !headers.contains_key(USER_AGENT) {
            let ua = HeaderValue::from_str(&config.user_agent)
                .map_err(|e| Error::Config(format!("invalid user agent: {e}")))?;
            headers.insert(USER_AGENT, ua);
        }

        let redirect = if config.allow_redirects {
            reqwest::redirect::Policy::limited(10)
        } else {
            reqwest::redirect::Policy::none()
        };

        let mut builder = reqwest::ClientBuilder::new()
            .gzip(true)
            .deflate(true)
            .default_headers(headers)
            .redirect(redirect)
            .timeout(Duration::from_secs_f64(config.timeout));

        if !config.proxies.is_empty() {
            let proxies = config.proxies.clone();
            for value in proxies.values() {
                reqwest::Url::parse(value)
                    .map_err(|e| Error::Config(format!("invalid proxy URL `{value}`: {e}")))?;
            }
            builder = builder.proxy(reqwest::Proxy::custom(move |url| {
                url.host_str()
                    .and_then(|host| proxies.get(host))
                    .and_then(|proxy| reqwest::Url::parse(proxy).ok())
            }));
        }

        let client = builder
            .build()
            .map_err(|e| Error::Config(format!("couldn't build HTTP client: {e}")))?;

        Ok(Self {
            client,
            robots: RobotsCache::new(&config.user_agent),
            throttle: config.auto_throttle.map(HostThrottle::new),
            hosts: Mutex::new(HashMap::new()),
            cache,
            config,
        })
    }

    async fn host_permit(&self, host: &str) -> OwnedSemaphorePermit {
        let sem = self
            .hosts
            .lock()
            .unwrap()
            .entry(host.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.config.concurrency_per_host)))
            .clone();
        sem.acquire_owned().await.expect("semaphore never closed")
    }

    pub async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let host = urls::host_key(url).unwrap_or_default();

        // Served responses bypass the network, and with it the politeness
        // machinery below.
        let key = self
            .cache
            .as_ref()
            .filter(|_| self.config.cache.allowed_methods.contains("GET"))
            .map(|_| cache_key(url, &self.config.cache.ignored_params));
        if let (Some(cache), Some(key)) = (&self.cache, &key) {
            if let Some(hit) = cache.get(key) {
                log::debug!("Cache hit for {url}");
                return Ok(hit.into());
            }
        }

        // Queued -> Throttle-Wait -> Robots-Check -> In-Flight
        if let Some(throttle) = &self.throttle {
            let delay = throttle.delay(&host);
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        if self.config.respect_robots && !self.robots.allowed(&self.client, url).await {
            return Err(FetchError::new(
                FetchErrorKind::RobotsDenied,
                url,
                "disallowed by robots.txt",
            ));
        }

        let _permit = self.host_permit(&host).await;

        let mut attempt: u32 = 0;
        loop {
            let started = Instant::now();
            match self.client.get(url).send().await {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if let Some(throttle) = &self.throttle {
                        let slowdown = matches!(status, 429 | 503);
                        throttle.observe(&host, slowdown, started.elapsed());
                    }
                    if self.config.retry.statuses.contains(&status)
                        && attempt < self.config.retry.max_retries
                    {
                        attempt += 1;
                        sleep(backoff(attempt)).await;
                        continue;
                    }
                    if !self.config.allowed_response_codes.contains(&status) {
                        return Err(FetchError::new(
                            FetchErrorKind::StatusNotAllowed,
                            url,
                            format!("HTTP {status}"),
                        )
                        .with_status(status));
                    }
                    let final_url = urls::canonicalize(resp.url().as_str())
                        .unwrap_or_else(|_| resp.url().to_string());
                    let body = match resp.bytes().await {
                        Ok(body) => body.to_vec(),
                        Err(e) => {
                            return Err(FetchError::new(
                                FetchErrorKind::DecodeError,
                                url,
                                e.to_string(),
                            )
                            .with_status(status));
                        }
                    };
                    let page = FetchedPage {
                        body,
                        final_url,
                        status,
                    };
                    if let (Some(cache), Some(key)) = (&self.cache, &key) {
                        cache.put(
                            key.clone(),
                            CachedResponse {
                                body: page.body.clone(),
                                status: page.status,
                                final_url: page.final_url.clone(),
                            },
                        );
                    }
                    return Ok(page);
                }
                Err(e) => {
                    if let Some(throttle) = &self.throttle {
                        throttle.observe(&host, false, started.elapsed());
                    }
                    let kind = if e.is_timeout() {
                        FetchErrorKind::Timeout
                    } else if e.is_redirect() {
                        FetchErrorKind::RedirectLoop
                    } else {
                        FetchErrorKind::Network
                    };
                    let retryable =
                        matches!(kind, FetchErrorKind::Timeout | FetchErrorKind::Network);
                    if retryable && attempt < self.config.retry.max_retries {
                        attempt += 1;
                        sleep(backoff(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::new(kind, url, e.to_string()));
                }
            }
        }
    }
}

/// Exponential backoff with jitter: 250ms, 500ms, 1s, ... plus up to 100ms.
fn backoff(attempt: u32) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..BACKOFF_JITTER_MS);
    BACKOFF_BASE * 2u32.saturating_pow(attempt.saturating_sub(1)) + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        assert!(backoff(1) >= Duration::from_millis(250));
        assert!(backoff(1) < Duration::from_millis(400));
        assert!(backoff(3) >= Duration::from_secs(1));
    }

    #[test]
    fn invalid_headers_are_config_errors() {
        let mut config = CrawlerConfig::default();
        config
            .headers
            .insert("bad header".into(), "value".into());
        assert!(matches!(
            Fetcher::new(Arc::new(config), None),
            Err(Error::Config(_))
        ));
    }
}
