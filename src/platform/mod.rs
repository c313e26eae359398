//! Typed capability surface of the messaging platform.
//!
//! One trait, implemented once. Every call may come back with a
//! rate-limit signal; callers never talk to the network directly but
//! go through the backoff controller.

pub mod mock;

use async_trait::async_trait;

use crate::error::{PlatformError, PlatformResult};

/// Opaque platform-side identifier for a channel or discussion group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EntityId(pub i64);

pub type PostId = i64;

/// A resolved channel: identity plus the bits preparation needs.
#[derive(Debug, Clone)]
pub struct Channel {
    pub id: EntityId,
    pub handle: String,
    /// Linked discussion group, where comments actually land.
    /// Channels without one cannot be engaged.
    pub discussion: Option<EntityId>,
    /// Reactions the channel allows. Empty means the channel exposes
    /// no restriction and the default palette applies.
    pub allowed_reactions: Vec<String>,
}

/// A post as fetched from a channel.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: PostId,
    pub text: String,
    pub has_media: bool,
    /// Whether the post's discussion thread accepts comments.
    pub comments_open: bool,
}

impl Post {
    /// A post qualifies for engagement when it has a valid id and
    /// carries either text or media.
    pub fn commentable(&self) -> bool {
        self.id > 0 && (!self.text.trim().is_empty() || self.has_media)
    }
}

/// Where a comment reply should be delivered for a given post.
#[derive(Debug, Clone, Copy)]
pub struct ThreadRoot {
    pub group: EntityId,
    pub root_post: PostId,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Resolve a handle to a channel, including its linked discussion
    /// group and allowed reactions.
    async fn resolve(&self, handle: &str) -> PlatformResult<Channel>;

    /// Whether this account is currently a member of the entity.
    async fn is_member(&self, entity: EntityId) -> PlatformResult<bool>;

    async fn join(&self, entity: EntityId) -> PlatformResult<()>;

    async fn leave(&self, entity: EntityId) -> PlatformResult<()>;

    /// Most-recent messages first, up to `limit`.
    async fn recent_posts(&self, entity: EntityId, limit: usize) -> PlatformResult<Vec<Post>>;

    /// Fetch one post by id. `Ok(None)` when it no longer exists.
    async fn post(&self, entity: EntityId, id: PostId) -> PlatformResult<Option<Post>>;

    /// Resolve the discussion-thread root for a post.
    async fn discussion_root(&self, entity: EntityId, post: PostId) -> PlatformResult<ThreadRoot>;

    /// Existing replies in a post's thread, oldest first, up to `limit`.
    async fn thread_replies(
        &self,
        entity: EntityId,
        post: PostId,
        limit: usize,
    ) -> PlatformResult<Vec<Post>>;

    /// Send a comment as a reply in a discussion group.
    async fn send_comment(
        &self,
        group: EntityId,
        reply_to: PostId,
        text: &str,
    ) -> PlatformResult<PostId>;

    async fn send_reaction(
        &self,
        entity: EntityId,
        post: PostId,
        reaction: &str,
    ) -> PlatformResult<()>;
}

/// The platform refuses comments until the account joins the linked
/// discussion group. Worth exactly one join-and-retry.
pub fn needs_discussion_join(err: &PlatformError) -> bool {
    match err {
        PlatformError::Permanent(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("join the discussion group") || msg.contains("must join")
        }
        _ => false,
    }
}

/// The post already carries the maximum number of distinct reactions.
/// A soft skip, not an error.
pub fn reaction_exhausted(err: &PlatformError) -> bool {
    match err {
        PlatformError::Permanent(msg) => {
            let msg = msg.to_lowercase();
            msg.contains("reactions_uniq_max") || msg.contains("reaction emojis")
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(id: PostId, text: &str, has_media: bool) -> Post {
        Post {
            id,
            text: text.to_string(),
            has_media,
            comments_open: true,
        }
    }

    #[test]
    fn text_post_is_commentable() {
        assert!(post(1, "hello", false).commentable());
    }

    #[test]
    fn media_only_post_is_commentable() {
        assert!(post(2, "", true).commentable());
    }

    #[test]
    fn empty_post_is_not_commentable() {
        assert!(!post(3, "   ", false).commentable());
    }

    #[test]
    fn invalid_id_is_not_commentable() {
        assert!(!post(0, "text", true).commentable());
    }

    #[test]
    fn discussion_join_detection() {
        let err = PlatformError::permanent("you must JOIN the discussion group before commenting");
        assert!(needs_discussion_join(&err));
        assert!(!needs_discussion_join(&PlatformError::permanent("banned")));
        assert!(!needs_discussion_join(&PlatformError::transient(
            "must join"
        )));
    }

    #[test]
    fn reaction_exhausted_detection() {
        let err = PlatformError::permanent("REACTIONS_UNIQ_MAX");
        assert!(reaction_exhausted(&err));
        assert!(!reaction_exhausted(&PlatformError::permanent("private")));
    }
}
