//! Process-wide registry of account workers.
//!
//! The only way into an account's state: start it, stop it, feed it
//! discovered channels, read its counters. Each account's worker owns
//! its state outright; nothing here writes it from outside.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, bail};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Semaphore};
use tracing::info;

use crate::cancel::{CancelHandle, cancel_pair};
use crate::consts::PREPARE_POOL_SIZE;
use crate::generator::CommentGenerator;
use crate::platform::PlatformClient;
use crate::settings::AccountSettings;
use crate::stats::StatsSnapshot;
use crate::store::Store;
use crate::worker::AccountWorker;

pub use crate::worker::EnqueueOutcome;

/// What the control surface sees for one account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountStatus {
    pub running: bool,
    pub stats: StatsSnapshot,
    pub queue_size: usize,
    pub tracked_channels: usize,
    pub processed_channels: usize,
}

struct AccountHandle {
    worker: Arc<AccountWorker>,
    cancel: CancelHandle,
}

pub struct Orchestrator {
    generator: Arc<dyn CommentGenerator>,
    store: Arc<dyn Store>,
    accounts: Mutex<HashMap<String, AccountHandle>>,
    /// Bounds concurrent channel preparations so a burst of discovery
    /// results cannot starve the runtime.
    prepare_pool: Semaphore,
    pacing: Option<std::time::Duration>,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn CommentGenerator>, store: Arc<dyn Store>) -> Self {
        Self {
            generator,
            store,
            accounts: Mutex::new(HashMap::new()),
            prepare_pool: Semaphore::new(PREPARE_POOL_SIZE),
            pacing: None,
        }
    }

    /// Override the backoff pacing interval for every account started
    /// afterwards. Tests use zero.
    pub fn with_pacing(mut self, min_interval: std::time::Duration) -> Self {
        self.pacing = Some(min_interval);
        self
    }

    /// Start an account's engagement loop (and watch loop when
    /// configured). Rejects an account that is already running.
    pub async fn start_account(
        &self,
        account: &str,
        platform: Arc<dyn PlatformClient>,
        settings: AccountSettings,
    ) -> Result<()> {
        settings.validate()?;

        let mut accounts = self.accounts.lock().await;
        if accounts.contains_key(account) {
            bail!("account {account} is already running");
        }

        let (cancel_handle, cancel_token) = cancel_pair();
        let track_new_posts = settings.track_new_posts;
        let mut worker = AccountWorker::new(
            account,
            settings,
            platform,
            Arc::clone(&self.generator),
            Arc::clone(&self.store),
            cancel_token,
        );
        if let Some(min_interval) = self.pacing {
            worker = worker.with_pacing(min_interval);
        }
        let worker = Arc::new(worker);
        worker.load_progress().await;

        tokio::spawn(Arc::clone(&worker).run_engagement());
        if track_new_posts {
            tokio::spawn(Arc::clone(&worker).run_watch());
        }

        accounts.insert(
            account.to_string(),
            AccountHandle {
                worker,
                cancel: cancel_handle,
            },
        );
        info!(account, "account started");
        Ok(())
    }

    /// Stop an account. Its loops observe the cancellation at the
    /// next sleep boundary or tick, finish or abort their current
    /// unit of work, and release the platform client when they exit.
    pub async fn stop_account(&self, account: &str) -> Result<()> {
        let mut accounts = self.accounts.lock().await;
        let Some(handle) = accounts.remove(account) else {
            bail!("account {account} is not running");
        };
        handle.cancel.cancel();
        handle.worker.save_progress().await;
        info!(account, "account stopped");
        Ok(())
    }

    pub async fn is_running(&self, account: &str) -> bool {
        self.accounts.lock().await.contains_key(account)
    }

    /// Prepare a discovered channel for an account. Runs on a bounded
    /// pool; a slow preparation never blocks other accounts' workers.
    pub async fn enqueue(&self, account: &str, handle: &str, topic: Option<&str>) -> EnqueueOutcome {
        let worker = {
            let accounts = self.accounts.lock().await;
            match accounts.get(account) {
                Some(entry) => Arc::clone(&entry.worker),
                None => return EnqueueOutcome::Failed(format!("account {account} is not running")),
            }
        };
        if worker.cancel_token().is_cancelled() {
            return EnqueueOutcome::Cancelled;
        }
        let _permit = self
            .prepare_pool
            .acquire()
            .await
            .expect("prepare pool is never closed");
        worker.prepare_channel(handle, topic).await
    }

    /// The cancellation token shared by an account's loops. External
    /// feeders (the discovery pump) tie their lifetime to it.
    pub async fn cancel_token(&self, account: &str) -> Option<crate::cancel::CancelToken> {
        let accounts = self.accounts.lock().await;
        accounts.get(account).map(|entry| entry.worker.cancel_token())
    }

    /// Counters and queue sizes for one account.
    pub async fn status(&self, account: &str) -> Option<AccountStatus> {
        let worker = {
            let accounts = self.accounts.lock().await;
            accounts.get(account).map(|entry| Arc::clone(&entry.worker))
        }?;
        Some(Self::snapshot(&worker).await)
    }

    /// Counters for every running account.
    pub async fn statistics(&self) -> HashMap<String, AccountStatus> {
        let workers: Vec<(String, Arc<AccountWorker>)> = {
            let accounts = self.accounts.lock().await;
            accounts
                .iter()
                .map(|(account, entry)| (account.clone(), Arc::clone(&entry.worker)))
                .collect()
        };
        join_all(workers.into_iter().map(|(account, worker)| async move {
            let status = Self::snapshot(&worker).await;
            (account, status)
        }))
        .await
        .into_iter()
        .collect()
    }

    /// Zero an account's counters.
    pub async fn reset_statistics(&self, account: &str) -> Result<()> {
        let accounts = self.accounts.lock().await;
        let Some(entry) = accounts.get(account) else {
            bail!("account {account} is not running");
        };
        entry.worker.stats.reset();
        Ok(())
    }

    async fn snapshot(worker: &AccountWorker) -> AccountStatus {
        AccountStatus {
            running: !worker.cancel_token().is_cancelled(),
            stats: worker.stats.snapshot(),
            queue_size: worker.queue_len().await,
            tracked_channels: worker.tracked_len().await,
            processed_channels: worker.processed_len().await,
        }
    }
}
