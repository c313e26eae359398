//! Durable key-value and history storage.
//!
//! Survives process restarts; read-your-writes within one process.
//! Losing a statistics update is tolerable — callers log and proceed —
//! so the trait reports errors instead of retrying internally.

pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Comment,
    Reaction,
}

/// Accumulated engagement history for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelHistory {
    pub comments: u64,
    pub reactions: u64,
    pub last_link: Option<String>,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn save_state(&self, key: &str, value: &Value) -> Result<()>;

    async fn load_state(&self, key: &str) -> Result<Option<Value>>;

    async fn save_session(&self, account: &str, data: &Value) -> Result<()>;

    async fn load_session(&self, account: &str) -> Result<Option<Value>>;

    /// Bump the per-channel action counters, remembering the permalink
    /// when one is available.
    async fn record_channel_action(
        &self,
        handle: &str,
        kind: ActionKind,
        link: Option<&str>,
    ) -> Result<()>;

    async fn channel_history(&self, handle: &str) -> Result<Option<ChannelHistory>>;
}
