use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use mingle::backoff::{Backoff, CallClass};
use mingle::cancel::{CancelToken, cancel_pair};
use mingle::error::{PlatformError, PlatformResult};
use mingle::stats::AccountStats;

fn controller(stats: &Arc<AccountStats>) -> Backoff {
    Backoff::with_min_interval(CancelToken::never(), Arc::clone(stats), Duration::ZERO)
}

// ── Rate-limit handling ───────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn rate_limit_retries_and_succeeds_on_second_attempt() {
    let stats = Arc::new(AccountStats::default());
    let backoff = controller(&stats);
    let attempts = AtomicU32::new(0);

    let result = backoff
        .execute(CallClass::React, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(PlatformError::RateLimited {
                        wait: Duration::from_secs(30),
                    })
                } else {
                    Ok("reacted")
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, "reacted");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    let snap = stats.snapshot();
    assert_eq!(snap.flood_waits, 1);
    assert_eq!(snap.total_flood_wait_secs, 30);
    assert_eq!(snap.errors, 0);
}

#[tokio::test(start_paused = true)]
async fn oversized_wait_is_clamped() {
    let stats = Arc::new(AccountStats::default());
    let backoff = controller(&stats);
    let attempts = AtomicU32::new(0);

    backoff
        .execute(CallClass::Send, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(PlatformError::RateLimited {
                        wait: Duration::from_secs(100_000),
                    })
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    // The recorded wait is the clamped one, never the requested one.
    assert_eq!(stats.snapshot().total_flood_wait_secs, 7200);
}

#[tokio::test(start_paused = true)]
async fn rate_limit_exhaustion_surfaces_error() {
    let stats = Arc::new(AccountStats::default());
    let backoff = controller(&stats);

    let result: PlatformResult<()> = backoff
        .execute(CallClass::Send, || async {
            Err(PlatformError::RateLimited {
                wait: Duration::from_secs(1),
            })
        })
        .await;

    assert!(matches!(result, Err(PlatformError::RateLimited { .. })));
    assert_eq!(stats.snapshot().errors, 1);
    // Four waits happened (the fifth attempt fails without sleeping).
    assert_eq!(stats.snapshot().flood_waits, 4);
}

// ── Transient and permanent classes ───────────────────────────────

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_with_jitter() {
    let stats = Arc::new(AccountStats::default());
    let backoff = controller(&stats);
    let attempts = AtomicU32::new(0);

    let result = backoff
        .execute(CallClass::Fetch, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PlatformError::transient("connection reset"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(result, 2);
    assert_eq!(stats.snapshot().errors, 0);
}

#[tokio::test]
async fn permanent_failure_never_retries() {
    let stats = Arc::new(AccountStats::default());
    let backoff = controller(&stats);
    let attempts = AtomicU32::new(0);

    let result: PlatformResult<()> = backoff
        .execute(CallClass::Resolve, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(PlatformError::permanent("channel is private")) }
        })
        .await;

    assert!(matches!(result, Err(PlatformError::Permanent(_))));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

// ── Cancellation ──────────────────────────────────────────────────

#[tokio::test]
async fn stop_during_flood_wait_aborts_quickly() {
    let (handle, token) = cancel_pair();
    let stats = Arc::new(AccountStats::default());
    let backoff = Backoff::with_min_interval(token, Arc::clone(&stats), Duration::ZERO);
    let attempts = Arc::new(AtomicU32::new(0));

    let task_attempts = Arc::clone(&attempts);
    let task = tokio::spawn(async move {
        backoff
            .execute(CallClass::Send, || {
                task_attempts.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(PlatformError::RateLimited {
                        wait: Duration::from_secs(3600),
                    })
                }
            })
            .await
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    let result = task.await.unwrap();

    assert!(matches!(result, Err(PlatformError::Cancelled)));
    // No further attempt was issued after the stop.
    assert_eq!(attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_before_start_issues_no_call() {
    let (handle, token) = cancel_pair();
    handle.cancel();
    let stats = Arc::new(AccountStats::default());
    let backoff = Backoff::with_min_interval(token, Arc::clone(&stats), Duration::ZERO);
    let attempts = AtomicU32::new(0);

    let result: PlatformResult<()> = backoff
        .execute(CallClass::Fetch, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    assert!(matches!(result, Err(PlatformError::Cancelled)));
    assert_eq!(attempts.load(Ordering::SeqCst), 0);
}

// ── Pacing ────────────────────────────────────────────────────────

#[tokio::test]
async fn calls_in_one_class_are_spaced() {
    let stats = Arc::new(AccountStats::default());
    let backoff = Backoff::with_min_interval(
        CancelToken::never(),
        Arc::clone(&stats),
        Duration::from_millis(80),
    );

    let start = std::time::Instant::now();
    for _ in 0..3 {
        backoff
            .execute(CallClass::Fetch, || async { Ok::<_, PlatformError>(()) })
            .await
            .unwrap();
    }
    // Two inter-call gaps of at least the minimum interval.
    assert!(start.elapsed() >= Duration::from_millis(160));
}

#[tokio::test]
async fn classes_do_not_share_a_timer() {
    let stats = Arc::new(AccountStats::default());
    let backoff = Backoff::with_min_interval(
        CancelToken::never(),
        Arc::clone(&stats),
        Duration::from_millis(200),
    );

    backoff
        .execute(CallClass::Fetch, || async { Ok::<_, PlatformError>(()) })
        .await
        .unwrap();

    // A different class starts fresh: no inherited wait.
    let start = std::time::Instant::now();
    backoff
        .execute(CallClass::Send, || async { Ok::<_, PlatformError>(()) })
        .await
        .unwrap();
    assert!(start.elapsed() < Duration::from_millis(100));
}
