//! Immutable per-run account settings, validated once at start.

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Everything an account run is configured with. Snapshotted at
/// `start_account`; workers never re-read it from storage mid-run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Stop preparing new channels once this many are fully processed.
    /// `None` means unbounded.
    pub max_channels: Option<usize>,
    /// How many posts to engage per channel (inclusive min/max).
    pub posts_range: (usize, usize),
    /// Subscribe delay range in seconds.
    pub delay_range: (u64, u64),
    /// Keep successfully engaged channels subscribed and watch them
    /// for new posts instead of leaving.
    pub track_new_posts: bool,
    /// Topic hints passed to discovery and the comment generator.
    pub topics: Vec<String>,
    /// Search keywords fed to discovery.
    pub keywords: Vec<String>,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            max_channels: Some(150),
            posts_range: (1, 5),
            delay_range: (20, 1000),
            track_new_posts: false,
            topics: Vec::new(),
            keywords: Vec::new(),
        }
    }
}

impl AccountSettings {
    /// Validate invariants that the rest of the system assumes.
    pub fn validate(&self) -> Result<()> {
        let (pmin, pmax) = self.posts_range;
        if pmin > pmax {
            bail!("posts_range min {pmin} exceeds max {pmax}");
        }
        if pmax == 0 {
            bail!("posts_range max must be at least 1");
        }
        let (dmin, dmax) = self.delay_range;
        if dmin > dmax {
            bail!("delay_range min {dmin} exceeds max {dmax}");
        }
        if self.max_channels == Some(0) {
            bail!("max_channels must be positive (use None for unbounded)");
        }
        Ok(())
    }

    /// Max posts to select per channel.
    pub fn posts_max(&self) -> usize {
        self.posts_range.1
    }
}
