//! Bounded channel behavior: ordering, capacity, close and token-aware waits

use conveyor::{BoundedChannel, CancellationToken, ErrorKind, TryGetError, TryPutError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok, assert_pending, assert_ready, task};

#[tokio::test]
async fn test_fifo_order_single_producer() {
    let channel = BoundedChannel::new(4).unwrap();
    let producer = channel.clone();

    let handle = tokio::spawn(async move {
        for i in 0..100u32 {
            producer.put(i).await.unwrap();
        }
        producer.close();
    });

    let mut received = Vec::new();
    while let Some(item) = channel.get().await {
        received.push(item);
    }
    handle.await.unwrap();

    assert_eq!(received, (0..100).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_buffered_items_survive_close() {
    let channel = BoundedChannel::new(3).unwrap();
    channel.put("a").await.unwrap();
    channel.put("b").await.unwrap();
    assert!(channel.close());

    assert_eq!(channel.get().await, Some("a"));
    assert_eq!(channel.get().await, Some("b"));
    assert_eq!(channel.get().await, None);
    assert_eq!(channel.get().await, None);
}

#[tokio::test]
async fn test_put_after_close_fails() {
    let channel = BoundedChannel::new(1).unwrap();
    channel.close();

    let error = channel.put(1).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::ChannelClosed);
    assert_eq!(channel.try_put(2), Err(TryPutError::Closed(2)));
}

#[test]
fn test_close_is_idempotent() {
    let channel = BoundedChannel::<u8>::new(1).unwrap();
    assert!(channel.close());
    assert!(!channel.close());
    assert!(channel.is_closed());
}

#[test]
fn test_zero_capacity_is_rejected() {
    let error = BoundedChannel::<u8>::new(0).unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Configuration);
}

#[test]
fn test_try_put_and_try_get() {
    let channel = BoundedChannel::new(2).unwrap();
    assert_eq!(channel.try_get(), Err(TryGetError::Empty));

    assert_ok!(channel.try_put(1));
    assert_ok!(channel.try_put(2));
    let rejected = assert_err!(channel.try_put(3));
    assert_eq!(rejected, TryPutError::Full(3));
    assert_eq!(rejected.into_inner(), 3);
    assert_eq!(channel.len(), 2);

    assert_eq!(channel.try_get(), Ok(1));
    channel.close();
    assert_eq!(channel.try_get(), Ok(2));
    assert_eq!(channel.try_get(), Err(TryGetError::Closed));
    assert!(channel.is_empty());
}

#[test]
fn test_drain_empties_buffer() {
    let channel = BoundedChannel::new(4).unwrap();
    for i in 0..3 {
        channel.try_put(i).unwrap();
    }
    assert_eq!(channel.drain(), vec![0, 1, 2]);
    assert!(channel.is_empty());
    assert_eq!(channel.capacity(), 4);
}

#[tokio::test]
async fn test_put_blocks_while_full() {
    let channel = BoundedChannel::new(1).unwrap();
    channel.put(1).await.unwrap();

    let mut blocked = task::spawn(channel.put(2));
    assert_pending!(blocked.poll());

    assert_eq!(channel.try_get(), Ok(1));
    assert!(blocked.is_woken());
    assert_ok!(assert_ready!(blocked.poll()));
    assert_eq!(channel.try_get(), Ok(2));
}

#[tokio::test]
async fn test_close_wakes_blocked_getter() {
    let channel = BoundedChannel::<u8>::new(1).unwrap();

    let mut waiting = task::spawn(channel.get());
    assert_pending!(waiting.poll());

    channel.close();
    assert!(waiting.is_woken());
    assert_eq!(assert_ready!(waiting.poll()), None);
}

#[tokio::test]
async fn test_close_fails_blocked_putter() {
    let channel = BoundedChannel::new(1).unwrap();
    channel.put(1).await.unwrap();

    let mut blocked = task::spawn(channel.put(2));
    assert_pending!(blocked.poll());

    channel.close();
    let error = assert_err!(assert_ready!(blocked.poll()));
    assert_eq!(error.kind(), ErrorKind::ChannelClosed);
    assert_eq!(channel.get().await, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_get_with_deadline_returns_after_deadline() {
    let channel = BoundedChannel::<u8>::new(1).unwrap();
    let token = CancellationToken::timeout(Duration::from_millis(50));
    let producer = channel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = producer.put(7).await;
    });

    let started = Instant::now();
    let error = channel.get_with(&token).await.unwrap_err();
    let elapsed = started.elapsed();

    assert_eq!(error.kind(), ErrorKind::DeadlineExceeded);
    assert!(elapsed >= Duration::from_millis(50), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(100), "returned late: {elapsed:?}");
}

#[tokio::test]
async fn test_cancelled_token_wins_over_buffered_items() {
    let channel = BoundedChannel::new(2).unwrap();
    channel.put(1).await.unwrap();

    let token = CancellationToken::new();
    token.cancel();

    let error = channel.get_with(&token).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(channel.len(), 1);
}

#[tokio::test]
async fn test_put_with_cancellation_unblocks() {
    let channel = BoundedChannel::new(1).unwrap();
    channel.put(1).await.unwrap();
    let token = CancellationToken::new();

    let mut blocked = task::spawn(channel.put_with(2, &token));
    assert_pending!(blocked.poll());

    token.cancel();
    assert!(blocked.is_woken());
    let error = assert_err!(assert_ready!(blocked.poll()));
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(channel.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_producers_many_consumers_deliver_each_item_once() {
    let channel = BoundedChannel::new(8).unwrap();

    let producers: Vec<_> = (0..4u32)
        .map(|p| {
            let channel = channel.clone();
            tokio::spawn(async move {
                for i in 0..250u32 {
                    channel.put(p * 1000 + i).await.unwrap();
                }
            })
        })
        .collect();

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let channel = channel.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Some(item) = channel.get().await {
                    seen.push(item);
                }
                seen
            })
        })
        .collect();

    for producer in producers {
        producer.await.unwrap();
    }
    channel.close();

    let mut all = Vec::new();
    for consumer in consumers {
        all.extend(consumer.await.unwrap());
    }
    all.sort_unstable();

    let mut expected: Vec<u32> = (0..4u32)
        .flat_map(|p| (0..250u32).map(move |i| p * 1000 + i))
        .collect();
    expected.sort_unstable();
    assert_eq!(all, expected);
}
