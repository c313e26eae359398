//! Account worker: owns one account's channel queue and drives the
//! engagement and watch loops.
//!
//! All mutation of [`AccountState`] happens here; the orchestrator
//! only reaches it through this worker. The state mutex is never held
//! across a platform call.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rand::RngExt;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::backoff::{Backoff, CallClass};
use crate::cancel::CancelToken;
use crate::consts::{FETCH_CAP, IDLE_WAIT, POSITIVE_REACTIONS, WATCH_PERIOD, post_link};
use crate::error::PlatformError;
use crate::generator::{CommentGenerator, generate_or_fallback};
use crate::platform::{
    EntityId, PlatformClient, Post, PostId, needs_discussion_join, reaction_exhausted,
};
use crate::settings::AccountSettings;
use crate::stats::{AccountStats, StatsSnapshot};
use crate::store::{ActionKind, Store};
use crate::task::{ChannelTask, TaskState};

/// Longest discussion context passed to the generator, in characters.
const MAX_CONTEXT_CHARS: usize = 10_000;

/// How many existing replies to sample for generator context.
const CONTEXT_REPLIES: usize = 50;

/// How many recent messages the watch loop examines per sweep.
const WATCH_FETCH: usize = 20;

/// What happened to an enqueue request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Prepared and queued for engagement.
    Queued,
    /// Already queued, processed, or tracked. No effect.
    Duplicate,
    /// Admission control closed: `max_channels` reached.
    LimitReached,
    /// Channel has no linked discussion thread; discarded unjoined.
    Incompatible,
    /// Joined but found nothing worth engaging; left again.
    NoPosts,
    /// The account stopped mid-preparation.
    Cancelled,
    /// Preparation failed (resolution, join, or fetch).
    Failed(String),
}

/// A finalized channel kept subscribed to watch for new posts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedChannel {
    pub entity: EntityId,
    pub discussion: EntityId,
    pub allowed_reactions: Vec<String>,
    pub topic: String,
    pub last_seen_post: PostId,
}

/// Everything one account owns. A handle lives in at most one of
/// `queue`, `processed`, `tracked` at any time.
#[derive(Debug, Default)]
pub struct AccountState {
    pub queue: VecDeque<ChannelTask>,
    pub processed: HashSet<String>,
    pub tracked: HashMap<String, TrackedChannel>,
}

impl AccountState {
    pub fn contains(&self, handle: &str) -> bool {
        self.processed.contains(handle)
            || self.tracked.contains_key(handle)
            || self.queue.iter().any(|t| t.handle == handle)
    }
}

/// Durable snapshot of an account's progress.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ProgressSnapshot {
    queue: Vec<ChannelTask>,
    processed: Vec<String>,
    tracked: HashMap<String, TrackedChannel>,
}

pub struct AccountWorker {
    pub account: String,
    pub settings: AccountSettings,
    pub stats: Arc<AccountStats>,
    platform: Arc<dyn PlatformClient>,
    generator: Arc<dyn CommentGenerator>,
    store: Arc<dyn Store>,
    backoff: Backoff,
    cancel: CancelToken,
    state: Mutex<AccountState>,
    first_join_done: AtomicBool,
}

impl AccountWorker {
    pub fn new(
        account: impl Into<String>,
        settings: AccountSettings,
        platform: Arc<dyn PlatformClient>,
        generator: Arc<dyn CommentGenerator>,
        store: Arc<dyn Store>,
        cancel: CancelToken,
    ) -> Self {
        let stats = Arc::new(AccountStats::default());
        let backoff = Backoff::new(cancel.clone(), Arc::clone(&stats));
        Self {
            account: account.into(),
            settings,
            stats,
            platform,
            generator,
            store,
            backoff,
            cancel,
            state: Mutex::new(AccountState::default()),
            first_join_done: AtomicBool::new(false),
        }
    }

    /// Override the backoff pacing interval. Tests use zero to avoid
    /// real spacing waits.
    pub fn with_pacing(mut self, min_interval: Duration) -> Self {
        self.backoff =
            Backoff::with_min_interval(self.cancel.clone(), Arc::clone(&self.stats), min_interval);
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn tracked_len(&self) -> usize {
        self.state.lock().await.tracked.len()
    }

    pub async fn processed_len(&self) -> usize {
        self.state.lock().await.processed.len()
    }

    // ── Preparation ──────────────────────────────────────────────

    /// Prepare a discovered channel and queue it for engagement.
    /// Idempotent per handle; honors admission control.
    pub async fn prepare_channel(&self, handle: &str, topic: Option<&str>) -> EnqueueOutcome {
        {
            let state = self.state.lock().await;
            if state.contains(handle) {
                return EnqueueOutcome::Duplicate;
            }
            if self.admission_closed(&state) {
                return EnqueueOutcome::LimitReached;
            }
        }

        let channel = match self
            .backoff
            .execute(CallClass::Resolve, || self.platform.resolve(handle))
            .await
        {
            Ok(channel) => channel,
            Err(PlatformError::Cancelled) => return EnqueueOutcome::Cancelled,
            Err(err) => return EnqueueOutcome::Failed(err.to_string()),
        };

        // No discussion thread means no place to comment. Discard
        // without ever joining.
        let Some(discussion) = channel.discussion else {
            debug!(account = %self.account, handle, "channel has no discussion thread");
            return EnqueueOutcome::Incompatible;
        };

        if !self.subscribe_delay(handle).await {
            return EnqueueOutcome::Cancelled;
        }

        if let Err(err) = self
            .backoff
            .execute(CallClass::Membership, || self.platform.join(channel.id))
            .await
        {
            return match err {
                PlatformError::Cancelled => EnqueueOutcome::Cancelled,
                err => EnqueueOutcome::Failed(err.to_string()),
            };
        }

        let fetch_limit = (self.settings.posts_max() * 10).min(FETCH_CAP);
        let posts = match self
            .backoff
            .execute(CallClass::Fetch, || {
                self.platform.recent_posts(channel.id, fetch_limit)
            })
            .await
        {
            Ok(posts) => posts,
            Err(err) => {
                self.leave_quietly(channel.id, handle).await;
                return match err {
                    PlatformError::Cancelled => EnqueueOutcome::Cancelled,
                    err => EnqueueOutcome::Failed(err.to_string()),
                };
            }
        };

        let target_posts: Vec<PostId> = posts
            .iter()
            .filter(|p| p.commentable())
            .take(self.settings.posts_max())
            .map(|p| p.id)
            .collect();

        if target_posts.is_empty() {
            info!(account = %self.account, handle, "no engageable posts, leaving");
            self.leave_quietly(channel.id, handle).await;
            return EnqueueOutcome::NoPosts;
        }

        let mut task = ChannelTask::new(
            handle.to_string(),
            channel.id,
            discussion,
            channel.allowed_reactions,
            target_posts,
            topic.unwrap_or("general").to_string(),
        );

        {
            let mut state = self.state.lock().await;
            // Another preparation may have queued the handle while we
            // were joining; keep the invariant and undo the join.
            if state.contains(handle) {
                drop(state);
                self.leave_quietly(channel.id, handle).await;
                return EnqueueOutcome::Duplicate;
            }
            if self.admission_closed(&state) {
                drop(state);
                self.leave_quietly(channel.id, handle).await;
                return EnqueueOutcome::LimitReached;
            }
            info!(
                account = %self.account,
                handle,
                posts = task.target_posts.len(),
                "channel queued"
            );
            task.state = TaskState::Queued;
            state.queue.push_back(task);
        }
        self.save_progress().await;
        EnqueueOutcome::Queued
    }

    fn admission_closed(&self, state: &AccountState) -> bool {
        match self.settings.max_channels {
            Some(max) => state.processed.len() >= max,
            None => false,
        }
    }

    /// Uniform delay before a join, skipped for the account's very
    /// first subscribe action. Returns false when cancelled.
    async fn subscribe_delay(&self, handle: &str) -> bool {
        if !self.first_join_done.swap(true, Ordering::SeqCst) {
            debug!(account = %self.account, handle, "first subscribe, skipping delay");
            return true;
        }
        let (min, max) = self.settings.delay_range;
        if max == 0 {
            return true;
        }
        let secs = rand::rng().random_range(min as f64..=max as f64);
        info!(account = %self.account, handle, delay = %format!("{secs:.1}s"), "subscribe delay");
        self.cancel.sleep(Duration::from_secs_f64(secs)).await
    }

    async fn leave_quietly(&self, entity: EntityId, handle: &str) {
        if let Err(err) = self
            .backoff
            .execute(CallClass::Membership, || self.platform.leave(entity))
            .await
        {
            warn!(account = %self.account, handle, error = %err, "failed to leave channel");
        }
    }

    // ── Engagement loop ──────────────────────────────────────────

    /// Drive the queue until the account is stopped. One post per
    /// visited channel per tick, channels rotated round-robin.
    pub async fn run_engagement(self: Arc<Self>) {
        info!(account = %self.account, "engagement loop started");
        while !self.cancel.is_cancelled() {
            self.tick().await;
        }
        info!(account = %self.account, "engagement loop stopped");
    }

    /// Advance the front task by exactly one post, or idle if the
    /// queue is empty. Public for tests that step the loop manually.
    pub async fn tick(&self) {
        let front = {
            let mut state = self.state.lock().await;
            state.queue.front_mut().map(|task| {
                task.state = TaskState::Processing;
                FrontTask {
                    handle: task.handle.clone(),
                    entity: task.entity,
                    discussion: task.discussion,
                    allowed_reactions: task.allowed_reactions.clone(),
                    topic: task.topic.clone(),
                    post: task.current_post(),
                }
            })
        };

        let Some(front) = front else {
            self.cancel.sleep(IDLE_WAIT).await;
            return;
        };

        match front.post {
            None => self.finalize(&front.handle).await,
            Some(post_id) => {
                let Some(acted) = self
                    .engage_post(
                        &front.handle,
                        front.entity,
                        front.discussion,
                        &front.allowed_reactions,
                        &front.topic,
                        post_id,
                    )
                    .await
                else {
                    // Cancelled mid-post: leave the cursor untouched.
                    return;
                };

                let exhausted = {
                    let mut state = self.state.lock().await;
                    match state.queue.iter().position(|t| t.handle == front.handle) {
                        Some(idx) => {
                            let task = &mut state.queue[idx];
                            task.advance();
                            if acted {
                                task.actions_performed = true;
                            }
                            let exhausted = task.is_exhausted();
                            if !exhausted {
                                // Rotate so other queued channels get
                                // their share of the next ticks.
                                let mut task = state.queue.remove(idx).unwrap();
                                task.state = TaskState::Queued;
                                state.queue.push_back(task);
                            }
                            exhausted
                        }
                        None => false,
                    }
                };
                if exhausted {
                    self.finalize(&front.handle).await;
                }
            }
        }
    }

    /// One post's worth of engagement: re-verify membership, fetch,
    /// comment, react. Returns `Some(acted)` or `None` if cancelled.
    /// Failures never abort the worker; the caller advances past them.
    async fn engage_post(
        &self,
        handle: &str,
        entity: EntityId,
        discussion: EntityId,
        allowed_reactions: &[String],
        topic: &str,
        post_id: PostId,
    ) -> Option<bool> {
        if !self.ensure_membership(handle, entity).await? {
            return Some(false);
        }

        let post = match self
            .backoff
            .execute(CallClass::Fetch, || self.platform.post(entity, post_id))
            .await
        {
            Ok(Some(post)) if post.commentable() => post,
            Ok(_) => {
                debug!(account = %self.account, handle, post_id, "post gone or not engageable");
                return Some(false);
            }
            Err(PlatformError::Cancelled) => return None,
            Err(err) => {
                warn!(account = %self.account, handle, post_id, error = %err, "post fetch failed");
                return Some(false);
            }
        };

        let mut acted = false;

        if post.comments_open {
            match self.send_comment(handle, entity, discussion, topic, &post).await {
                None => return None,
                Some(true) => acted = true,
                Some(false) => {}
            }
        } else {
            debug!(account = %self.account, handle, post_id, "comments closed on post");
        }

        match self
            .send_reaction(handle, entity, allowed_reactions, post_id)
            .await
        {
            None => return None,
            Some(true) => acted = true,
            Some(false) => {}
        }

        Some(acted)
    }

    /// The platform may have dropped our membership out-of-band;
    /// rejoin (with the subscribe delay) when that happens.
    async fn ensure_membership(&self, handle: &str, entity: EntityId) -> Option<bool> {
        let member = match self
            .backoff
            .execute(CallClass::Membership, || self.platform.is_member(entity))
            .await
        {
            Ok(member) => member,
            Err(PlatformError::Cancelled) => return None,
            Err(err) => {
                warn!(account = %self.account, handle, error = %err, "membership check failed");
                return Some(false);
            }
        };
        if member {
            return Some(true);
        }

        info!(account = %self.account, handle, "membership lost, re-subscribing");
        if !self.subscribe_delay(handle).await {
            return None;
        }
        match self
            .backoff
            .execute(CallClass::Membership, || self.platform.join(entity))
            .await
        {
            Ok(()) => Some(true),
            Err(PlatformError::Cancelled) => None,
            Err(err) => {
                warn!(account = %self.account, handle, error = %err, "re-join failed");
                Some(false)
            }
        }
    }

    /// Generate and deliver a comment into the post's thread. A
    /// "must join discussion group" refusal gets one join-and-retry.
    async fn send_comment(
        &self,
        handle: &str,
        entity: EntityId,
        discussion: EntityId,
        topic: &str,
        post: &Post,
    ) -> Option<bool> {
        let context = self.discussion_context(entity, post.id).await;
        let topics = [topic.to_string()];
        let comment =
            generate_or_fallback(&*self.generator, &post.text, &topics, context.as_deref()).await;

        let root = match self
            .backoff
            .execute(CallClass::Resolve, || {
                self.platform.discussion_root(entity, post.id)
            })
            .await
        {
            Ok(root) => root,
            Err(PlatformError::Cancelled) => return None,
            Err(err) => {
                debug!(account = %self.account, handle, post_id = post.id, error = %err,
                    "no discussion root for post");
                return Some(false);
            }
        };

        let mut result = self
            .backoff
            .execute(CallClass::Send, || {
                self.platform.send_comment(root.group, root.root_post, &comment)
            })
            .await;

        if let Err(err) = &result {
            if needs_discussion_join(err) {
                info!(account = %self.account, handle, "joining discussion group to comment");
                match self
                    .backoff
                    .execute(CallClass::Membership, || self.platform.join(discussion))
                    .await
                {
                    Ok(()) => {
                        result = self
                            .backoff
                            .execute(CallClass::Send, || {
                                self.platform.send_comment(root.group, root.root_post, &comment)
                            })
                            .await;
                    }
                    Err(PlatformError::Cancelled) => return None,
                    Err(join_err) => {
                        warn!(account = %self.account, handle, error = %join_err,
                            "could not join discussion group");
                    }
                }
            }
        }

        match result {
            Ok(_) => {
                self.stats.record_comment();
                let link = post_link(handle, post.id);
                if let Err(err) = self
                    .store
                    .record_channel_action(handle, ActionKind::Comment, Some(&link))
                    .await
                {
                    warn!(account = %self.account, handle, error = %err, "history write failed");
                }
                info!(account = %self.account, handle, post_id = post.id, "comment sent");
                Some(true)
            }
            Err(PlatformError::Cancelled) => None,
            Err(err) => {
                warn!(account = %self.account, handle, post_id = post.id, error = %err,
                    "comment failed");
                Some(false)
            }
        }
    }

    /// Set one reaction from the channel's allowed set (or the
    /// default palette). Exhausted reaction slots are a soft skip.
    async fn send_reaction(
        &self,
        handle: &str,
        entity: EntityId,
        allowed: &[String],
        post_id: PostId,
    ) -> Option<bool> {
        let palette: Vec<&str> = if allowed.is_empty() {
            POSITIVE_REACTIONS.to_vec()
        } else {
            let filtered: Vec<&str> = allowed
                .iter()
                .map(String::as_str)
                .filter(|r| POSITIVE_REACTIONS.contains(r))
                .collect();
            if filtered.is_empty() {
                POSITIVE_REACTIONS.to_vec()
            } else {
                filtered
            }
        };
        let reaction = palette
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or("👍")
            .to_string();

        match self
            .backoff
            .execute(CallClass::React, || {
                self.platform.send_reaction(entity, post_id, &reaction)
            })
            .await
        {
            Ok(()) => {
                self.stats.record_reaction();
                if let Err(err) = self
                    .store
                    .record_channel_action(handle, ActionKind::Reaction, None)
                    .await
                {
                    warn!(account = %self.account, handle, error = %err, "history write failed");
                }
                debug!(account = %self.account, handle, post_id, reaction, "reaction set");
                Some(true)
            }
            Err(PlatformError::Cancelled) => None,
            Err(err) if reaction_exhausted(&err) => {
                debug!(account = %self.account, handle, post_id, "reaction slots exhausted");
                Some(false)
            }
            Err(err) => {
                warn!(account = %self.account, handle, post_id, error = %err, "reaction failed");
                Some(false)
            }
        }
    }

    /// Existing replies in the post's thread, for generator context.
    /// Strictly best-effort.
    async fn discussion_context(&self, entity: EntityId, post_id: PostId) -> Option<String> {
        let replies = self
            .backoff
            .execute(CallClass::Fetch, || {
                self.platform.thread_replies(entity, post_id, CONTEXT_REPLIES)
            })
            .await
            .ok()?;
        if replies.is_empty() {
            return None;
        }
        let mut context = String::new();
        for reply in &replies {
            let text = reply.text.trim();
            if text.is_empty() {
                continue;
            }
            if context.len() + text.len() + 2 > MAX_CONTEXT_CHARS {
                break;
            }
            if !context.is_empty() {
                context.push_str("\n\n");
            }
            context.push_str(text);
        }
        (!context.is_empty()).then_some(context)
    }

    // ── Finalization ─────────────────────────────────────────────

    /// All target posts visited: leave, track, or mark processed.
    async fn finalize(&self, handle: &str) {
        let task = {
            let mut state = self.state.lock().await;
            match state.queue.iter().position(|t| t.handle == handle) {
                Some(idx) => {
                    let mut task = state.queue.remove(idx).unwrap();
                    task.state = TaskState::Finalized;
                    task
                }
                None => return,
            }
        };

        if !task.actions_performed {
            info!(account = %self.account, handle, "no actions landed, discarding channel");
            self.leave_quietly(task.entity, handle).await;
        } else if self.settings.track_new_posts {
            let last_seen = self
                .backoff
                .execute(CallClass::Fetch, || self.platform.recent_posts(task.entity, 1))
                .await
                .ok()
                .and_then(|posts| posts.first().map(|p| p.id))
                .unwrap_or_else(|| task.target_posts.last().copied().unwrap_or(0));
            let mut state = self.state.lock().await;
            state.tracked.insert(
                handle.to_string(),
                TrackedChannel {
                    entity: task.entity,
                    discussion: task.discussion,
                    allowed_reactions: task.allowed_reactions.clone(),
                    topic: task.topic.clone(),
                    last_seen_post: last_seen,
                },
            );
            info!(account = %self.account, handle, last_seen, "channel moved to tracking");
        } else {
            self.leave_quietly(task.entity, handle).await;
            let mut state = self.state.lock().await;
            state.processed.insert(handle.to_string());
            self.stats.record_channel_processed();
            info!(account = %self.account, handle, "channel fully processed");
        }
        self.save_progress().await;
    }

    // ── Watch loop ───────────────────────────────────────────────

    /// Periodically sweep tracked channels for posts newer than the
    /// last seen one and engage them through the same action path.
    pub async fn run_watch(self: Arc<Self>) {
        info!(account = %self.account, "watch loop started");
        while self.cancel.sleep(WATCH_PERIOD).await {
            self.watch_sweep().await;
        }
        info!(account = %self.account, "watch loop stopped");
    }

    /// One sweep over all tracked channels. Public for tests.
    pub async fn watch_sweep(&self) {
        let snapshot: Vec<(String, TrackedChannel)> = {
            let state = self.state.lock().await;
            state
                .tracked
                .iter()
                .map(|(handle, tracked)| (handle.clone(), tracked.clone()))
                .collect()
        };

        for (handle, tracked) in snapshot {
            if self.cancel.is_cancelled() {
                return;
            }
            let posts = match self
                .backoff
                .execute(CallClass::Fetch, || {
                    self.platform.recent_posts(tracked.entity, WATCH_FETCH)
                })
                .await
            {
                Ok(posts) => posts,
                Err(PlatformError::Cancelled) => return,
                Err(err) => {
                    warn!(account = %self.account, handle, error = %err, "tracked fetch failed");
                    continue;
                }
            };

            let mut fresh: Vec<Post> = posts
                .into_iter()
                .filter(|p| p.id > tracked.last_seen_post && p.commentable())
                .collect();
            fresh.sort_by_key(|p| p.id);

            for post in fresh {
                if self
                    .engage_post(
                        &handle,
                        tracked.entity,
                        tracked.discussion,
                        &tracked.allowed_reactions,
                        &tracked.topic,
                        post.id,
                    )
                    .await
                    .is_none()
                {
                    return;
                }
                let mut state = self.state.lock().await;
                // The entry may have been dropped while we engaged.
                if let Some(entry) = state.tracked.get_mut(&handle) {
                    entry.last_seen_post = entry.last_seen_post.max(post.id);
                }
            }
        }
        self.save_progress().await;
    }

    // ── Progress durability ──────────────────────────────────────

    fn progress_key(&self) -> String {
        format!("account:{}:progress", self.account)
    }

    /// Snapshot queue/processed/tracked to the store. A lost write is
    /// tolerable, so errors are only logged.
    pub async fn save_progress(&self) {
        let snapshot = {
            let state = self.state.lock().await;
            ProgressSnapshot {
                queue: state.queue.iter().cloned().collect(),
                processed: state.processed.iter().cloned().collect(),
                tracked: state.tracked.clone(),
            }
        };
        let value = match serde_json::to_value(&snapshot) {
            Ok(value) => value,
            Err(err) => {
                warn!(account = %self.account, error = %err, "progress serialization failed");
                return;
            }
        };
        if let Err(err) = self.store.save_state(&self.progress_key(), &value).await {
            warn!(account = %self.account, error = %err, "progress save failed");
        }
        let stats = self.stats.snapshot();
        if let Err(err) = self
            .store
            .save_session(&self.account, &json!({ "stats": stats }))
            .await
        {
            warn!(account = %self.account, error = %err, "session save failed");
        }
    }

    /// Restore a previous run's progress and counters, if any.
    pub async fn load_progress(&self) {
        match self.store.load_session(&self.account).await {
            Ok(Some(session)) => {
                match serde_json::from_value::<StatsSnapshot>(session["stats"].clone()) {
                    Ok(snap) => self.stats.restore(&snap),
                    Err(err) => {
                        warn!(account = %self.account, error = %err, "session stats unreadable");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => {
                warn!(account = %self.account, error = %err, "session load failed");
            }
        }

        let value = match self.store.load_state(&self.progress_key()).await {
            Ok(Some(value)) => value,
            Ok(None) => return,
            Err(err) => {
                warn!(account = %self.account, error = %err, "progress load failed");
                return;
            }
        };
        match serde_json::from_value::<ProgressSnapshot>(value) {
            Ok(snapshot) => {
                let mut state = self.state.lock().await;
                state.queue = snapshot.queue.into();
                state.processed = snapshot.processed.into_iter().collect();
                state.tracked = snapshot.tracked;
                info!(
                    account = %self.account,
                    queued = state.queue.len(),
                    processed = state.processed.len(),
                    tracked = state.tracked.len(),
                    "progress restored"
                );
            }
            Err(err) => {
                warn!(account = %self.account, error = %err, "progress snapshot unreadable");
            }
        }
    }
}

struct FrontTask {
    handle: String,
    entity: EntityId,
    discussion: EntityId,
    allowed_reactions: Vec<String>,
    topic: String,
    post: Option<PostId>,
}
