//! Discovery feed seam and the pump that turns search results into
//! enqueued channels.
//!
//! The real feed drives a headless browser and blocks; it runs on the
//! blocking pool with a timeout and is strictly best-effort — errors
//! are logged and treated as "no results".

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use tokio::task::spawn_blocking;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::consts::{DISCOVERY_SEARCH_TIMEOUT, DISCOVERY_SETUP_TIMEOUT};
use crate::orchestrator::{EnqueueOutcome, Orchestrator};
use crate::settings::AccountSettings;

/// Pause between individual searches within a round.
const SEARCH_PAUSE: Duration = Duration::from_secs(5);

/// Pause between full keyword/topic rounds.
const ROUND_PAUSE: Duration = Duration::from_secs(60);

/// A source of candidate channel handles. Blocking by design.
pub trait DiscoveryFeed: Send + Sync + 'static {
    /// One-time session setup (e.g. browser spin-up).
    fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Search for channels matching a keyword within a topic.
    /// `first_search` is true only for the very first call of a run.
    fn search(&self, keyword: &str, topic: &str, first_search: bool) -> Result<Vec<String>>;
}

/// Cycles keyword/topic pairs against the feed and funnels every
/// discovered handle into the orchestrator's queue for one account.
pub struct DiscoveryPump {
    feed: Arc<dyn DiscoveryFeed>,
    orchestrator: Arc<Orchestrator>,
    account: String,
    settings: AccountSettings,
    cancel: CancelToken,
}

impl DiscoveryPump {
    pub fn new(
        feed: Arc<dyn DiscoveryFeed>,
        orchestrator: Arc<Orchestrator>,
        account: impl Into<String>,
        settings: AccountSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            feed,
            orchestrator,
            account: account.into(),
            settings,
            cancel,
        }
    }

    pub async fn run(self) {
        let feed = Arc::clone(&self.feed);
        let setup = timeout(DISCOVERY_SETUP_TIMEOUT, spawn_blocking(move || feed.setup())).await;
        match setup {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => {
                warn!(account = %self.account, error = %err, "discovery setup failed");
                return;
            }
            Ok(Err(join_err)) => {
                warn!(account = %self.account, error = %join_err, "discovery setup panicked");
                return;
            }
            Err(_) => {
                warn!(account = %self.account, "discovery setup timed out");
                return;
            }
        }

        let mut first_search = true;
        'rounds: while !self.cancel.is_cancelled() {
            for keyword in &self.settings.keywords {
                for topic in &self.settings.topics {
                    if self.cancel.is_cancelled() {
                        break 'rounds;
                    }
                    let handles = self.search_once(keyword, topic, first_search).await;
                    first_search = false;

                    for handle in handles {
                        if self.cancel.is_cancelled() {
                            break 'rounds;
                        }
                        let outcome = self
                            .orchestrator
                            .enqueue(&self.account, &handle, Some(topic))
                            .await;
                        if outcome == EnqueueOutcome::LimitReached {
                            info!(account = %self.account, "channel limit reached, discovery going idle");
                            break 'rounds;
                        }
                    }

                    if !self.cancel.sleep(SEARCH_PAUSE).await {
                        break 'rounds;
                    }
                }
            }
            if !self.cancel.sleep(ROUND_PAUSE).await {
                break;
            }
        }
        info!(account = %self.account, "discovery pump stopped");
    }

    /// One blocking search on the pool, bounded by a timeout. Any
    /// failure is logged and yields no results.
    async fn search_once(&self, keyword: &str, topic: &str, first_search: bool) -> Vec<String> {
        let feed = Arc::clone(&self.feed);
        let keyword = keyword.to_string();
        let topic = topic.to_string();
        let search = spawn_blocking(move || feed.search(&keyword, &topic, first_search));
        match timeout(DISCOVERY_SEARCH_TIMEOUT, search).await {
            Ok(Ok(Ok(handles))) => {
                info!(count = handles.len(), "discovery search returned");
                handles
            }
            Ok(Ok(Err(err))) => {
                warn!(error = %err, "discovery search failed");
                Vec::new()
            }
            Ok(Err(join_err)) => {
                warn!(error = %join_err, "discovery search panicked");
                Vec::new()
            }
            Err(_) => {
                warn!("discovery search timed out");
                Vec::new()
            }
        }
    }
}

/// A feed that serves a fixed list once, then nothing. Used by the
/// simulation harness and tests.
pub struct StaticFeed {
    handles: Mutex<Vec<String>>,
}

impl StaticFeed {
    pub fn new(handles: Vec<String>) -> Self {
        Self {
            handles: Mutex::new(handles),
        }
    }
}

impl DiscoveryFeed for StaticFeed {
    fn search(&self, _keyword: &str, _topic: &str, _first_search: bool) -> Result<Vec<String>> {
        Ok(std::mem::take(&mut *self.handles.lock().unwrap()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_feed_drains_once() {
        let feed = StaticFeed::new(vec!["alpha".to_string(), "beta".to_string()]);
        let first = feed.search("k", "t", true).unwrap();
        assert_eq!(first, vec!["alpha", "beta"]);
        assert!(feed.search("k", "t", false).unwrap().is_empty());
    }
}
