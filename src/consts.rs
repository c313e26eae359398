//! Project-wide constants and tuning knobs.

use std::path::PathBuf;
use std::time::Duration;

/// Maximum total attempts for a call that keeps hitting rate limits
/// or transient failures.
pub const MAX_RETRIES: u32 = 5;

/// A platform-mandated wait longer than this is clamped down to it.
pub const MAX_WAIT: Duration = Duration::from_secs(7200);

/// How often an interruptible sleep re-checks for cancellation.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Growth factor applied to a call class's pacing interval after a
/// rate-limit signal.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Pacing interval cap per call class.
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Idle wait when an account's queue is empty.
pub const IDLE_WAIT: Duration = Duration::from_secs(30);

/// How often the watch loop sweeps tracked channels for new posts.
pub const WATCH_PERIOD: Duration = Duration::from_secs(300);

/// Upper bound on how many recent messages preparation may fetch,
/// regardless of the posts range.
pub const FETCH_CAP: usize = 200;

/// How long to wait for the comment generator before falling back to
/// the canned pool.
pub const GENERATOR_TIMEOUT: Duration = Duration::from_secs(45);

/// Timeout for discovery session setup (headless browser spin-up).
pub const DISCOVERY_SETUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for a single discovery search.
pub const DISCOVERY_SEARCH_TIMEOUT: Duration = Duration::from_secs(120);

/// How many channel preparations may run at once across all accounts.
pub const PREPARE_POOL_SIZE: usize = 4;

/// Reactions considered safe to set on any post. A channel's own
/// allowed set is intersected with this palette.
pub const POSITIVE_REACTIONS: &[&str] = &[
    "👍", "❤️", "🔥", "🥰", "👏", "😍", "🤩", "💯", "⭐", "🎉", "🙏", "💪", "👌", "✨", "🌟", "🚀",
];

/// Default database path: `~/.mingle/mingle.db`.
pub fn default_db_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mingle")
        .join("mingle.db")
}

/// Permalink to a post, in the platform's public link format.
pub fn post_link(handle: &str, post_id: i64) -> String {
    format!("https://t.me/{}/{}", handle.trim_start_matches('@'), post_id)
}
