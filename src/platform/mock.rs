//! Scripted in-memory platform for tests and dry runs.
//!
//! Channels, posts, and memberships live in a mutex-guarded table;
//! faults can be queued per operation to script rate limits and
//! permission failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{PlatformError, PlatformResult};

use super::{Channel, EntityId, PlatformClient, Post, PostId, ThreadRoot};

#[derive(Debug, Clone)]
pub struct MockChannel {
    pub id: EntityId,
    pub discussion: Option<EntityId>,
    pub allowed_reactions: Vec<String>,
    /// Oldest first; `recent_posts` returns them newest first.
    pub posts: Vec<Post>,
    /// Refuse comments until the account joins the discussion group.
    pub gated_discussion: bool,
}

impl MockChannel {
    /// A channel with an open discussion group and the given posts.
    pub fn open(id: i64, posts: Vec<Post>) -> Self {
        Self {
            id: EntityId(id),
            discussion: Some(EntityId(id + 1_000_000)),
            allowed_reactions: Vec::new(),
            posts,
            gated_discussion: false,
        }
    }

    /// A channel with no linked discussion group (incompatible).
    pub fn without_discussion(id: i64, posts: Vec<Post>) -> Self {
        Self {
            discussion: None,
            ..Self::open(id, posts)
        }
    }
}

/// Convenience for building test posts.
pub fn text_post(id: PostId, text: &str) -> Post {
    Post {
        id,
        text: text.to_string(),
        has_media: false,
        comments_open: true,
    }
}

pub fn media_post(id: PostId) -> Post {
    Post {
        id,
        text: String::new(),
        has_media: true,
        comments_open: true,
    }
}

#[derive(Default)]
struct Inner {
    channels: HashMap<String, MockChannel>,
    by_id: HashMap<EntityId, String>,
    memberships: HashSet<EntityId>,
    faults: HashMap<&'static str, VecDeque<PlatformError>>,
    calls: Vec<String>,
    comments: Vec<(EntityId, PostId, String)>,
    reactions: Vec<(EntityId, PostId, String)>,
    next_comment_id: PostId,
}

#[derive(Default)]
pub struct MockPlatform {
    inner: Mutex<Inner>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_channel(&self, handle: &str, channel: MockChannel) {
        let mut inner = self.inner.lock().unwrap();
        inner.by_id.insert(channel.id, handle.to_string());
        if let Some(group) = channel.discussion {
            inner.by_id.insert(group, handle.to_string());
        }
        inner.channels.insert(handle.to_string(), channel);
    }

    /// Append a new post to a channel (for watch-loop scenarios).
    pub fn push_post(&self, handle: &str, post: Post) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(channel) = inner.channels.get_mut(handle) {
            channel.posts.push(post);
        }
    }

    /// Queue an error for the next invocation of `op` (`"join"`,
    /// `"send_comment"`, ...). Errors drain in FIFO order.
    pub fn fail_next(&self, op: &'static str, err: PlatformError) {
        self.inner
            .lock()
            .unwrap()
            .faults
            .entry(op)
            .or_default()
            .push_back(err);
    }

    pub fn is_joined(&self, id: EntityId) -> bool {
        self.inner.lock().unwrap().memberships.contains(&id)
    }

    /// Every operation performed, in order, as `"op:target"` strings.
    pub fn calls(&self) -> Vec<String> {
        self.inner.lock().unwrap().calls.clone()
    }

    pub fn comments(&self) -> Vec<(EntityId, PostId, String)> {
        self.inner.lock().unwrap().comments.clone()
    }

    pub fn reactions(&self) -> Vec<(EntityId, PostId, String)> {
        self.inner.lock().unwrap().reactions.clone()
    }

    fn record(inner: &mut Inner, op: &str, target: impl std::fmt::Display) {
        inner.calls.push(format!("{op}:{target}"));
    }

    fn take_fault(inner: &mut Inner, op: &'static str) -> Option<PlatformError> {
        inner.faults.get_mut(op).and_then(|queue| queue.pop_front())
    }

    fn channel_by_id<'a>(inner: &'a Inner, id: EntityId) -> PlatformResult<&'a MockChannel> {
        inner
            .by_id
            .get(&id)
            .and_then(|handle| inner.channels.get(handle))
            .ok_or_else(|| PlatformError::permanent(format!("unknown entity {}", id.0)))
    }
}

#[async_trait]
impl PlatformClient for MockPlatform {
    async fn resolve(&self, handle: &str) -> PlatformResult<Channel> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "resolve", handle);
        if let Some(err) = Self::take_fault(&mut inner, "resolve") {
            return Err(err);
        }
        let channel = inner
            .channels
            .get(handle)
            .ok_or_else(|| PlatformError::permanent(format!("no such channel: {handle}")))?;
        Ok(Channel {
            id: channel.id,
            handle: handle.to_string(),
            discussion: channel.discussion,
            allowed_reactions: channel.allowed_reactions.clone(),
        })
    }

    async fn is_member(&self, entity: EntityId) -> PlatformResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "is_member", entity.0);
        if let Some(err) = Self::take_fault(&mut inner, "is_member") {
            return Err(err);
        }
        Ok(inner.memberships.contains(&entity))
    }

    async fn join(&self, entity: EntityId) -> PlatformResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "join", entity.0);
        if let Some(err) = Self::take_fault(&mut inner, "join") {
            return Err(err);
        }
        Self::channel_by_id(&inner, entity)?;
        inner.memberships.insert(entity);
        Ok(())
    }

    async fn leave(&self, entity: EntityId) -> PlatformResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "leave", entity.0);
        if let Some(err) = Self::take_fault(&mut inner, "leave") {
            return Err(err);
        }
        inner.memberships.remove(&entity);
        Ok(())
    }

    async fn recent_posts(&self, entity: EntityId, limit: usize) -> PlatformResult<Vec<Post>> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "recent_posts", entity.0);
        if let Some(err) = Self::take_fault(&mut inner, "recent_posts") {
            return Err(err);
        }
        let channel = Self::channel_by_id(&inner, entity)?;
        Ok(channel.posts.iter().rev().take(limit).cloned().collect())
    }

    async fn post(&self, entity: EntityId, id: PostId) -> PlatformResult<Option<Post>> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "post", format!("{}/{id}", entity.0));
        if let Some(err) = Self::take_fault(&mut inner, "post") {
            return Err(err);
        }
        let channel = Self::channel_by_id(&inner, entity)?;
        Ok(channel.posts.iter().find(|p| p.id == id).cloned())
    }

    async fn discussion_root(&self, entity: EntityId, post: PostId) -> PlatformResult<ThreadRoot> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "discussion_root", format!("{}/{post}", entity.0));
        if let Some(err) = Self::take_fault(&mut inner, "discussion_root") {
            return Err(err);
        }
        let channel = Self::channel_by_id(&inner, entity)?;
        let group = channel
            .discussion
            .ok_or_else(|| PlatformError::permanent("channel has no discussion group"))?;
        Ok(ThreadRoot {
            group,
            root_post: post,
        })
    }

    async fn thread_replies(
        &self,
        entity: EntityId,
        post: PostId,
        limit: usize,
    ) -> PlatformResult<Vec<Post>> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "thread_replies", format!("{}/{post}", entity.0));
        if let Some(err) = Self::take_fault(&mut inner, "thread_replies") {
            return Err(err);
        }
        let replies = inner
            .comments
            .iter()
            .filter(|(_, reply_to, _)| *reply_to == post)
            .take(limit)
            .map(|(_, _, text)| Post {
                id: post,
                text: text.clone(),
                has_media: false,
                comments_open: true,
            })
            .collect();
        Ok(replies)
    }

    async fn send_comment(
        &self,
        group: EntityId,
        reply_to: PostId,
        text: &str,
    ) -> PlatformResult<PostId> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "send_comment", format!("{}/{reply_to}", group.0));
        if let Some(err) = Self::take_fault(&mut inner, "send_comment") {
            return Err(err);
        }
        let gated = Self::channel_by_id(&inner, group)?.gated_discussion;
        if gated && !inner.memberships.contains(&group) {
            return Err(PlatformError::permanent(
                "you must join the discussion group before commenting",
            ));
        }
        inner.next_comment_id += 1;
        let id = inner.next_comment_id;
        inner.comments.push((group, reply_to, text.to_string()));
        Ok(id)
    }

    async fn send_reaction(
        &self,
        entity: EntityId,
        post: PostId,
        reaction: &str,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().unwrap();
        Self::record(&mut inner, "send_reaction", format!("{}/{post}", entity.0));
        if let Some(err) = Self::take_fault(&mut inner, "send_reaction") {
            return Err(err);
        }
        Self::channel_by_id(&inner, entity)?;
        inner.reactions.push((entity, post, reaction.to_string()));
        Ok(())
    }
}
