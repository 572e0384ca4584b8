//! Concurrency limiter: admission bound, release discipline and cancellation

use conveyor::{CancellationToken, ErrorKind, Limiter, WaitGroup};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_pending, assert_ready, task};

#[test]
fn test_invalid_max_is_rejected() {
    assert_eq!(Limiter::new(0).unwrap_err().kind(), ErrorKind::Configuration);
    assert_eq!(
        Limiter::new(usize::MAX).unwrap_err().kind(),
        ErrorKind::Configuration
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_never_exceeds_max() {
    let limiter = Limiter::new(3).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..40)
        .map(|_| {
            let limiter = limiter.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let _permit = limiter.acquire().await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let peak = peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "peak was {peak}");
    assert!(peak >= 1);
    assert_eq!(limiter.available(), 3);
}

#[tokio::test]
async fn test_permit_released_on_drop() {
    let limiter = Limiter::new(1).unwrap();
    let permit = limiter.acquire().await.unwrap();
    assert_eq!(limiter.in_flight(), 1);
    assert!(limiter.try_acquire().is_none());

    let mut waiting = task::spawn(limiter.acquire());
    assert_pending!(waiting.poll());

    drop(permit);
    assert!(waiting.is_woken());
    let second = assert_ready!(waiting.poll()).unwrap();
    assert_eq!(limiter.in_flight(), 1);
    drop(second);
    assert_eq!(limiter.available(), 1);
}

#[tokio::test]
async fn test_release_without_acquire_is_violation() {
    let limiter = Limiter::new(2).unwrap();
    let error = limiter.release().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::InvariantViolation);
    assert_eq!(limiter.available(), 2);
}

#[tokio::test]
async fn test_detached_acquire_and_release() {
    let limiter = Limiter::new(2).unwrap();
    limiter.acquire_detached().await.unwrap();
    limiter.acquire_detached().await.unwrap();
    assert_eq!(limiter.available(), 0);

    limiter.release().unwrap();
    assert_eq!(limiter.available(), 1);
    limiter.release().unwrap();
    assert_eq!(limiter.available(), 2);
    assert!(limiter.release().is_err());
    assert_eq!(limiter.max(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_acquire_with_deadline_gives_up() {
    let limiter = Limiter::new(1).unwrap();
    let _held = limiter.acquire().await.unwrap();

    let token = CancellationToken::timeout(Duration::from_millis(20));
    let error = limiter.acquire_with(&token).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeadlineExceeded);
    assert_eq!(limiter.in_flight(), 1);
}

#[tokio::test]
async fn test_acquire_with_cancellation_frees_nothing() {
    let limiter = Limiter::new(1).unwrap();
    let held = limiter.acquire().await.unwrap();
    let token = CancellationToken::new();

    let mut waiting = task::spawn(limiter.acquire_with(&token));
    assert_pending!(waiting.poll());
    token.cancel();
    let error = assert_ready!(waiting.poll()).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);

    drop(held);
    assert_eq!(limiter.available(), 1);
}

#[tokio::test]
async fn test_run_releases_after_error() {
    let limiter = Limiter::new(1).unwrap();
    let inner: Result<(), &str> = limiter.run(async { Err("boom") }).await.unwrap();
    assert!(inner.is_err());
    assert_eq!(limiter.available(), 1);

    let token = CancellationToken::new();
    assert_eq!(limiter.run_with(async { 5 }, &token).await.unwrap(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_waiters_all_eventually_admitted() {
    let limiter = Limiter::new(2).unwrap();
    let admitted = Arc::new(AtomicUsize::new(0));
    let group = WaitGroup::new();

    for _ in 0..10 {
        let guard = group.guard().unwrap();
        let limiter = limiter.clone();
        let admitted = Arc::clone(&admitted);
        tokio::spawn(async move {
            let _guard = guard;
            let _permit = limiter.acquire().await.unwrap();
            admitted.fetch_add(1, Ordering::SeqCst);
        });
    }

    group.wait().await;
    assert_eq!(admitted.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn test_waiters_admitted_in_arrival_order() {
    let limiter = Limiter::new(1).unwrap();
    let held = limiter.acquire().await.unwrap();

    let mut first = task::spawn(limiter.acquire());
    let mut second = task::spawn(limiter.acquire());
    let mut third = task::spawn(limiter.acquire());
    assert_pending!(first.poll());
    assert_pending!(second.poll());
    assert_pending!(third.poll());

    // Later waiters polled first must not jump the queue.
    drop(held);
    assert_pending!(third.poll());
    assert_pending!(second.poll());
    let permit = assert_ready!(first.poll()).unwrap();

    drop(permit);
    assert_pending!(third.poll());
    let permit = assert_ready!(second.poll()).unwrap();

    drop(permit);
    assert_ready!(third.poll()).unwrap();
    assert_eq!(limiter.available(), 1);
}
