use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::config::AutoThrottleConfig;

/// Response latency above which a host is considered slow even without a
/// 429/503 signal.
const SLOW_LATENCY: Duration = Duration::from_secs(5);

/// Multiplicative decay applied to a host's delay after a fast success.
const DECAY: f64 = 0.85;

/// Adaptive per-host delays. Every host starts at `start_delay`; server-side
/// slowdown signals double the delay up to `max_delay`, successes decay it
/// toward the floor implied by `target_concurrency`.
#[derive(Debug)]
pub struct HostThrottle {
    conf: AutoThrottleConfig,
    hosts: Mutex<HashMap<String, Duration>>,
}

impl HostThrottle {
    pub fn new(conf: AutoThrottleConfig) -> Self {
        Self {
            conf,
            hosts: Mutex::new(HashMap::new()),
        }
    }

    /// Delay to wait before the next request to `host`.
    pub fn delay(&self, host: &str) -> Duration {
        let start = Duration::from_secs_f64(self.conf.start_delay);
        *self.hosts.lock().unwrap().entry(host.to_string()).or_insert(start)
    }

    /// Feeds back one response observation for `host`.
    pub fn observe(&self, host: &str, slowdown: bool, latency: Duration) {
        let mut hosts = self.hosts.lock().unwrap();
        let delay = hosts
            .entry(host.to_string())
            .or_insert(Duration::from_secs_f64(self.conf.start_delay));
        if slowdown || latency > SLOW_LATENCY {
            *delay = (*delay * 2).min(Duration::from_secs_f64(self.conf.max_delay));
            if delay.is_zero() {
                *delay = Duration::from_millis(250);
            }
        } else {
            let floor = self.floor(latency);
            let decayed = delay.as_secs_f64() * DECAY;
            *delay = Duration::from_secs_f64(decayed.max(floor));
        }
    }

    /// With a target of N concurrent requests per host, a delay of
    /// latency / N sustains roughly that concurrency.
    fn floor(&self, latency: Duration) -> f64 {
        match self.conf.target_concurrency {
            Some(n) if n > 0 => latency.as_secs_f64() / n as f64,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn throttle() -> HostThrottle {
        HostThrottle::new(AutoThrottleConfig {
            target_concurrency: Some(2),
            start_delay: 0.25,
            max_delay: 10.0,
        })
    }

    #[test]
    fn slowdown_doubles_up_to_ceiling() {
        let t = throttle();
        for _ in 0..10 {
            t.observe("h", true, Duration::from_millis(10));
        }
        assert_eq!(t.delay("h"), Duration::from_secs(10));
    }

    #[test]
    fn success_decays_toward_target_floor() {
        let t = throttle();
        t.observe("h", true, Duration::from_millis(10));
        let raised = t.delay("h");
        for _ in 0..50 {
            t.observe("h", false, Duration::from_millis(100));
        }
        let settled = t.delay("h");
        assert!(settled < raised);
        // latency 100ms, target 2 -> floor 50ms
        assert!(settled >= Duration::from_millis(50));
    }

    #[test]
    fn hosts_are_independent() {
        let t = throttle();
        t.observe("a", true, Duration::from_millis(10));
        assert_eq!(t.delay("b"), Duration::from_millis(250));
        assert!(t.delay("a") > t.delay("b"));
    }
}
