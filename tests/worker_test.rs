use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use mingle::cancel::{CancelHandle, cancel_pair};
use mingle::error::PlatformError;
use mingle::generator::{CannedGenerator, CommentGenerator};
use mingle::platform::mock::{MockChannel, MockPlatform, text_post};
use mingle::platform::{EntityId, Post};
use mingle::settings::AccountSettings;
use mingle::store::Store;
use mingle::store::sqlite::SqliteStore;
use mingle::worker::{AccountWorker, EnqueueOutcome};

fn settings(posts: (usize, usize)) -> AccountSettings {
    AccountSettings {
        max_channels: None,
        posts_range: posts,
        delay_range: (0, 0),
        track_new_posts: false,
        topics: vec!["general".to_string()],
        keywords: Vec::new(),
    }
}

fn build_worker(
    platform: Arc<MockPlatform>,
    settings: AccountSettings,
) -> (AccountWorker, CancelHandle) {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    build_worker_with(platform, settings, Arc::new(CannedGenerator), store)
}

fn build_worker_with(
    platform: Arc<MockPlatform>,
    settings: AccountSettings,
    generator: Arc<dyn CommentGenerator>,
    store: Arc<dyn Store>,
) -> (AccountWorker, CancelHandle) {
    let (handle, token) = cancel_pair();
    let worker = AccountWorker::new("tester", settings, platform, generator, store, token)
        .with_pacing(Duration::ZERO);
    (worker, handle)
}

struct FailingGenerator;

#[async_trait]
impl CommentGenerator for FailingGenerator {
    async fn generate(&self, _: &str, _: &[String], _: Option<&str>) -> Result<String> {
        anyhow::bail!("model unavailable")
    }
}

// ── Preparation ───────────────────────────────────────────────────

#[tokio::test]
async fn prepare_is_idempotent_per_handle() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    assert_eq!(worker.prepare_channel("alpha", None).await, EnqueueOutcome::Queued);
    assert_eq!(worker.prepare_channel("alpha", None).await, EnqueueOutcome::Duplicate);
    assert_eq!(worker.queue_len().await, 1);

    let resolves = platform
        .calls()
        .iter()
        .filter(|c| c.as_str() == "resolve:alpha")
        .count();
    assert_eq!(resolves, 1);
}

#[tokio::test]
async fn channel_without_discussion_is_discarded_unjoined() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel(
        "nochat",
        MockChannel::without_discussion(1, vec![text_post(10, "hello")]),
    );
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    assert_eq!(
        worker.prepare_channel("nochat", None).await,
        EnqueueOutcome::Incompatible
    );
    assert_eq!(worker.queue_len().await, 0);
    assert!(!platform.calls().iter().any(|c| c.starts_with("join:")));
}

#[tokio::test]
async fn channel_with_no_engageable_posts_is_left_again() {
    let platform = Arc::new(MockPlatform::new());
    // Blank text and no media: nothing worth engaging.
    platform.add_channel("empty", MockChannel::open(1, vec![text_post(10, "  ")]));
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    assert_eq!(
        worker.prepare_channel("empty", None).await,
        EnqueueOutcome::NoPosts
    );
    assert!(!platform.is_joined(EntityId(1)));
    assert!(platform.calls().contains(&"leave:1".to_string()));
}

#[tokio::test(start_paused = true)]
async fn subscribe_delay_skipped_only_for_first_join() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "a")]));
    platform.add_channel("beta", MockChannel::open(2, vec![text_post(20, "b")]));
    let mut cfg = settings((1, 1));
    cfg.delay_range = (5, 5);
    let (worker, _cancel) = build_worker(Arc::clone(&platform), cfg);

    let start = tokio::time::Instant::now();
    assert_eq!(worker.prepare_channel("alpha", None).await, EnqueueOutcome::Queued);
    assert!(start.elapsed() < Duration::from_secs(1));

    assert_eq!(worker.prepare_channel("beta", None).await, EnqueueOutcome::Queued);
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test]
async fn unresolvable_handle_fails() {
    let platform = Arc::new(MockPlatform::new());
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    let outcome = worker.prepare_channel("ghost", None).await;
    assert!(matches!(outcome, EnqueueOutcome::Failed(_)));
    assert_eq!(worker.queue_len().await, 0);
}

// ── Engagement ────────────────────────────────────────────────────

#[tokio::test]
async fn engages_newest_qualifying_posts_then_finalizes() {
    let platform = Arc::new(MockPlatform::new());
    // Five messages, only two carry text; exactly those become the
    // targets, newest first.
    platform.add_channel(
        "alpha",
        MockChannel::open(
            1,
            vec![
                text_post(101, "first"),
                text_post(102, ""),
                text_post(103, "   "),
                text_post(104, ""),
                text_post(105, "latest"),
            ],
        ),
    );
    let mut cfg = settings((2, 2));
    cfg.max_channels = Some(1);
    let (worker, _cancel) = build_worker(Arc::clone(&platform), cfg);

    assert_eq!(worker.prepare_channel("alpha", None).await, EnqueueOutcome::Queued);
    assert!(platform.is_joined(EntityId(1)));

    worker.tick().await;
    worker.tick().await;

    let commented: Vec<i64> = platform.comments().iter().map(|(_, id, _)| *id).collect();
    assert_eq!(commented, vec![105, 101]);
    let reacted: Vec<i64> = platform.reactions().iter().map(|(_, id, _)| *id).collect();
    assert_eq!(reacted, vec![105, 101]);

    assert_eq!(worker.queue_len().await, 0);
    assert_eq!(worker.processed_len().await, 1);
    assert!(!platform.is_joined(EntityId(1)));

    let snap = worker.stats.snapshot();
    assert_eq!(snap.comments_sent, 2);
    assert_eq!(snap.reactions_set, 2);
    assert_eq!(snap.channels_processed, 1);

    // Admission control is now closed; the next channel is rejected
    // before any platform traffic.
    assert_eq!(
        worker.prepare_channel("beta", None).await,
        EnqueueOutcome::LimitReached
    );
    assert!(!platform.calls().iter().any(|c| c.as_str() == "resolve:beta"));
}

#[tokio::test]
async fn generator_failure_falls_back_to_canned_comment() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (worker, _cancel) = build_worker_with(
        Arc::clone(&platform),
        settings((1, 1)),
        Arc::new(FailingGenerator),
        store,
    );

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;

    let comments = platform.comments();
    assert_eq!(comments.len(), 1);
    assert!(!comments[0].2.trim().is_empty());
    assert_eq!(platform.reactions().len(), 1);
    assert_eq!(worker.processed_len().await, 1);
}

#[tokio::test]
async fn gated_discussion_gets_one_join_and_retry() {
    let platform = Arc::new(MockPlatform::new());
    let mut channel = MockChannel::open(1, vec![text_post(5, "post")]);
    channel.gated_discussion = true;
    let group = channel.discussion.unwrap();
    platform.add_channel("gated", channel);
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("gated", None).await;
    worker.tick().await;

    assert_eq!(platform.comments().len(), 1);
    assert!(platform.is_joined(group));
    let sends = platform
        .calls()
        .iter()
        .filter(|c| c.starts_with("send_comment:"))
        .count();
    assert_eq!(sends, 2);
    assert_eq!(worker.stats.snapshot().comments_sent, 1);
}

#[tokio::test]
async fn comment_failure_still_reacts_and_advances() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    platform.fail_next("send_comment", PlatformError::permanent("comments disabled"));
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;

    assert!(platform.comments().is_empty());
    assert_eq!(platform.reactions().len(), 1);
    assert_eq!(worker.queue_len().await, 0);
    assert_eq!(worker.processed_len().await, 1);
}

#[tokio::test]
async fn closed_comments_skip_straight_to_reaction() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel(
        "quiet",
        MockChannel::open(
            1,
            vec![Post {
                id: 9,
                text: "announcement".to_string(),
                has_media: false,
                comments_open: false,
            }],
        ),
    );
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("quiet", None).await;
    worker.tick().await;

    assert!(platform.comments().is_empty());
    assert!(!platform.calls().iter().any(|c| c.starts_with("send_comment:")));
    assert_eq!(platform.reactions().len(), 1);
}

#[tokio::test]
async fn exhausted_reaction_slots_are_a_soft_skip() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    platform.fail_next(
        "send_reaction",
        PlatformError::permanent("reactions_uniq_max reached"),
    );
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;

    assert!(platform.reactions().is_empty());
    assert_eq!(worker.stats.snapshot().reactions_set, 0);
    // The comment landed, so the channel still counts as engaged.
    assert_eq!(worker.processed_len().await, 1);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_reaction_waits_and_retries() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    platform.fail_next(
        "send_reaction",
        PlatformError::RateLimited {
            wait: Duration::from_secs(30),
        },
    );
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;

    assert_eq!(platform.reactions().len(), 1);
    let snap = worker.stats.snapshot();
    assert_eq!(snap.flood_waits, 1);
    assert_eq!(snap.total_flood_wait_secs, 30);
    assert_eq!(snap.reactions_set, 1);
}

#[tokio::test]
async fn round_robin_interleaves_queued_channels() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel(
        "alpha",
        MockChannel::open(1, vec![text_post(11, "a1"), text_post(12, "a2")]),
    );
    platform.add_channel(
        "beta",
        MockChannel::open(2, vec![text_post(21, "b1"), text_post(22, "b2")]),
    );
    let (worker, _cancel) = build_worker(Arc::clone(&platform), settings((2, 2)));

    worker.prepare_channel("alpha", None).await;
    worker.prepare_channel("beta", None).await;

    for _ in 0..4 {
        worker.tick().await;
    }

    // One post per visit, channels alternating.
    let commented: Vec<(i64, i64)> = platform
        .comments()
        .iter()
        .map(|(group, id, _)| (group.0, *id))
        .collect();
    assert_eq!(
        commented,
        vec![
            (1_000_001, 12),
            (1_000_002, 22),
            (1_000_001, 11),
            (1_000_002, 21),
        ]
    );
    assert_eq!(worker.processed_len().await, 2);
}

// ── Cancellation ──────────────────────────────────────────────────

#[tokio::test]
async fn cancelled_tick_issues_no_calls_and_keeps_the_cursor() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    let (worker, cancel) = build_worker(Arc::clone(&platform), settings((1, 1)));

    worker.prepare_channel("alpha", None).await;
    cancel.cancel();

    let before = platform.calls().len();
    worker.tick().await;

    assert_eq!(platform.calls().len(), before);
    assert_eq!(worker.queue_len().await, 1);
}

// ── Tracking and the watch loop ───────────────────────────────────

#[tokio::test]
async fn tracked_channel_stays_joined_and_watches_for_new_posts() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel("alpha", MockChannel::open(1, vec![text_post(10, "hello")]));
    let mut cfg = settings((1, 1));
    cfg.track_new_posts = true;
    let (worker, _cancel) = build_worker(Arc::clone(&platform), cfg);

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;

    assert_eq!(worker.tracked_len().await, 1);
    assert_eq!(worker.processed_len().await, 0);
    assert!(platform.is_joined(EntityId(1)));
    assert_eq!(worker.stats.snapshot().channels_processed, 0);

    // A fresh post and a blank one; only the fresh one is engaged.
    platform.push_post("alpha", text_post(11, "breaking"));
    platform.push_post("alpha", text_post(12, "  "));
    worker.watch_sweep().await;

    let commented: Vec<i64> = platform.comments().iter().map(|(_, id, _)| *id).collect();
    assert_eq!(commented, vec![10, 11]);

    // The sweep advanced the high-water mark; nothing new the second
    // time around.
    worker.watch_sweep().await;
    assert_eq!(platform.comments().len(), 2);
}

// ── Progress durability ───────────────────────────────────────────

#[tokio::test]
async fn snapshot_of_a_rotated_task_is_resumable() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel(
        "alpha",
        MockChannel::open(1, vec![text_post(10, "a"), text_post(11, "b")]),
    );
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
    let (worker, _cancel) = build_worker_with(
        Arc::clone(&platform),
        settings((2, 2)),
        Arc::new(CannedGenerator),
        Arc::clone(&store),
    );

    worker.prepare_channel("alpha", None).await;
    worker.tick().await;
    worker.save_progress().await;

    // Half-done: the task waits its turn again, one post behind it.
    let snapshot = store
        .load_state("account:tester:progress")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(snapshot["queue"][0]["cursor"], 1);
    assert_eq!(snapshot["queue"][0]["state"], "Queued");
}

#[tokio::test]
async fn progress_survives_a_worker_restart() {
    let platform = Arc::new(MockPlatform::new());
    platform.add_channel(
        "alpha",
        MockChannel::open(1, vec![text_post(10, "a"), text_post(11, "b")]),
    );
    let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());

    let (worker, _cancel) = build_worker_with(
        Arc::clone(&platform),
        settings((2, 2)),
        Arc::new(CannedGenerator),
        Arc::clone(&store),
    );
    worker.prepare_channel("alpha", None).await;
    drop(worker);

    let (restarted, _cancel2) = build_worker_with(
        Arc::clone(&platform),
        settings((2, 2)),
        Arc::new(CannedGenerator),
        store,
    );
    restarted.load_progress().await;

    assert_eq!(restarted.queue_len().await, 1);
    assert_eq!(
        restarted.prepare_channel("alpha", None).await,
        EnqueueOutcome::Duplicate
    );
}
