//! Comment generation seam.
//!
//! The real generator is an external text-generation service with its
//! own latency and availability; the worker never lets it block an
//! account, falling back to a small canned pool on failure or timeout.

pub mod http;

use anyhow::Result;
use async_trait::async_trait;
use rand::seq::IndexedRandom;
use tokio::time::timeout;
use tracing::warn;

use crate::consts::GENERATOR_TIMEOUT;

/// Short, neutral comments used when generation is unavailable.
const FALLBACK_COMMENTS: &[&str] = &[
    "Interesting, thanks for sharing!",
    "Useful information",
    "Timely topic",
    "Good material",
    "Agree with the author",
];

#[async_trait]
pub trait CommentGenerator: Send + Sync {
    /// Produce a comment for a post. `discussion_context` carries
    /// existing replies when available.
    async fn generate(
        &self,
        post_text: &str,
        topics: &[String],
        discussion_context: Option<&str>,
    ) -> Result<String>;
}

/// Pick a canned comment.
pub fn canned_comment() -> String {
    FALLBACK_COMMENTS
        .choose(&mut rand::rng())
        .expect("fallback pool is non-empty")
        .to_string()
}

/// Generate with a bounded timeout; any failure yields a canned
/// comment so the caller never blocks and never errors.
pub async fn generate_or_fallback(
    generator: &dyn CommentGenerator,
    post_text: &str,
    topics: &[String],
    discussion_context: Option<&str>,
) -> String {
    match timeout(
        GENERATOR_TIMEOUT,
        generator.generate(post_text, topics, discussion_context),
    )
    .await
    {
        Ok(Ok(comment)) if !comment.trim().is_empty() => comment,
        Ok(Ok(_)) => {
            warn!("generator returned an empty comment, using fallback");
            canned_comment()
        }
        Ok(Err(err)) => {
            warn!(error = %err, "comment generation failed, using fallback");
            canned_comment()
        }
        Err(_) => {
            warn!(
                timeout = GENERATOR_TIMEOUT.as_secs(),
                "comment generation timed out, using fallback"
            );
            canned_comment()
        }
    }
}

/// A generator that always answers from the canned pool. Used by the
/// simulation harness and as a no-network default.
pub struct CannedGenerator;

#[async_trait]
impl CommentGenerator for CannedGenerator {
    async fn generate(
        &self,
        _post_text: &str,
        _topics: &[String],
        _discussion_context: Option<&str>,
    ) -> Result<String> {
        Ok(canned_comment())
    }
}
