//! One channel under engagement by one account.

use serde::{Deserialize, Serialize};

use crate::platform::{EntityId, PostId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Preparing,
    Queued,
    Processing,
    Finalized,
}

/// State machine for a single channel. Created in `Preparing` by the
/// preparation step, `Queued` while waiting its turn, `Processing`
/// only while the worker is on it, removed from the queue once the
/// cursor reaches the end and finalization completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelTask {
    pub handle: String,
    pub entity: EntityId,
    pub discussion: EntityId,
    pub allowed_reactions: Vec<String>,
    /// Post ids fixed at preparation time, processed in this order.
    pub target_posts: Vec<PostId>,
    /// Index of the next post to process. `0 ≤ cursor ≤ target_posts.len()`.
    pub cursor: usize,
    /// Set the first time any comment or reaction lands.
    pub actions_performed: bool,
    /// Topic hint for the comment generator.
    pub topic: String,
    pub state: TaskState,
}

impl ChannelTask {
    pub fn new(
        handle: String,
        entity: EntityId,
        discussion: EntityId,
        allowed_reactions: Vec<String>,
        target_posts: Vec<PostId>,
        topic: String,
    ) -> Self {
        Self {
            handle,
            entity,
            discussion,
            allowed_reactions,
            target_posts,
            cursor: 0,
            actions_performed: false,
            topic,
            state: TaskState::Preparing,
        }
    }

    /// The post the worker should act on next, if any remain.
    pub fn current_post(&self) -> Option<PostId> {
        self.target_posts.get(self.cursor).copied()
    }

    /// Advance past the current post, upholding the cursor invariant.
    pub fn advance(&mut self) {
        debug_assert!(self.cursor < self.target_posts.len());
        self.cursor += 1;
    }

    /// All target posts have been visited; time to finalize.
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.target_posts.len()
    }
}
