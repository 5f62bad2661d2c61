use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use texting_robots::Robot;

use crate::urls;

/// Lazily filled per-host robots.txt cache. A missing or unparseable
/// robots.txt allows everything; a host is only ever fetched once (a benign
/// duplicate fetch is possible when two workers race on a fresh host).
pub struct RobotsCache {
    agent: String,
    robots: Mutex<HashMap<String, Option<Arc<Robot>>>>,
}

impl RobotsCache {
    pub fn new(agent: &str) -> Self {
        Self {
            agent: agent.to_string(),
            robots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn allowed(&self, client: &reqwest::Client, url: &str) -> bool {
        let Some(origin) = urls::origin(url) else {
            return true;
        };
        let cached = self.robots.lock().unwrap().get(&origin).cloned();
        let robot = match cached {
            Some(robot) => robot,
            None => {
                let robot = self.fetch(client, &origin).await;
                self.robots
                    .lock()
                    .unwrap()
                    .entry(origin)
                    .or_insert(robot)
                    .clone()
            }
        };
        robot.map_or(true, |r| r.allowed(url))
    }

    async fn fetch(&self, client: &reqwest::Client, origin: &str) -> Option<Arc<Robot>> {
        let url = format!("{origin}/robots.txt");
        let resp = match client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => resp,
            Ok(_) => return None,
            Err(e) => {
                log::debug!("No robots.txt for {origin}: {e}");
                return None;
            }
        };
        let body = resp.bytes().await.ok()?;
        match Robot::new(&self.agent, &body) {
            Ok(robot) => Some(Arc::new(robot)),
            Err(e) => {
                log::warn!("Unparseable robots.txt at {url}: {e}");
                None
            }
        }
    }
}
