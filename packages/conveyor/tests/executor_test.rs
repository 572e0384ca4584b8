//! Bounded executor and standalone async tasks

use conveyor::{AsyncTask, BoundedExecutor, CancellationToken, Error, ErrorKind, ExecutorConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn config(max_concurrent_tasks: usize, task_timeout: Option<Duration>) -> ExecutorConfig {
    ExecutorConfig {
        max_concurrent_tasks,
        task_timeout,
        enable_metrics: true,
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_respects_concurrency_limit() {
    let executor = BoundedExecutor::new(config(2, None)).unwrap();
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let tasks: Vec<AsyncTask<usize>> = (0..10)
        .map(|i| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            AsyncTask::new(move || {
                let current = Arc::clone(&current);
                let peak = Arc::clone(&peak);
                async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(i)
                }
            })
        })
        .collect();

    let results = executor.execute_batch(tasks).await;
    let values: Vec<usize> = results.into_iter().map(Result::unwrap).collect();

    assert_eq!(values, (0..10).collect::<Vec<_>>());
    assert_eq!(peak.load(Ordering::SeqCst), 2);
    assert_eq!(executor.limiter().available(), 2);

    let metrics = executor.metrics().await;
    assert_eq!(metrics.tasks_executed, 10);
    assert_eq!(metrics.tasks_failed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_task_timeout_reports_deadline() {
    let executor = BoundedExecutor::new(config(4, Some(Duration::from_millis(20)))).unwrap();
    let slow = AsyncTask::new(|| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    });

    let error = executor.execute_task(slow).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeadlineExceeded);

    let metrics = executor.metrics().await;
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(executor.limiter().in_flight(), 0);
}

#[tokio::test]
async fn test_failure_and_panic_counted() {
    let executor = BoundedExecutor::new(config(1, None)).unwrap();

    let failing = AsyncTask::<u8>::new(|| async { Err(Error::task_msg("nope")) });
    let explode = true;
    let panicking = AsyncTask::<u8>::new(move || async move {
        if explode {
            panic!("boom");
        }
        Ok(0)
    });

    assert_eq!(
        executor.execute_task(failing).await.unwrap_err().kind(),
        ErrorKind::TaskFailure
    );
    let error = executor.execute_task(panicking).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TaskFailure);
    assert!(error.to_string().contains("boom"));

    assert_eq!(executor.metrics().await.tasks_failed, 2);
}

#[tokio::test]
async fn test_cancelled_executor_refuses_work() {
    let token = CancellationToken::new();
    let executor = BoundedExecutor::with_token(config(1, None), token.clone()).unwrap();
    token.cancel();

    let task = AsyncTask::new(|| async { Ok(1) });
    let error = executor.execute_task(task).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Cancelled);
    assert_eq!(executor.metrics().await.tasks_cancelled, 1);
}

#[test]
fn test_zero_concurrency_rejected() {
    let error = BoundedExecutor::new(config(0, None)).err().map(|e| e.kind());
    assert_eq!(error, Some(ErrorKind::Configuration));
}

#[tokio::test]
async fn test_metrics_disabled_by_default() {
    let executor = BoundedExecutor::new(ExecutorConfig::default()).unwrap();
    executor
        .execute_task(AsyncTask::new(|| async { Ok(()) }))
        .await
        .unwrap();
    assert_eq!(executor.metrics().await.tasks_executed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_async_task_is_rerunnable() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counted = Arc::clone(&runs);
    let task = AsyncTask::new(move || {
        let counted = Arc::clone(&counted);
        async move { Ok(counted.fetch_add(1, Ordering::SeqCst)) }
    });

    assert_eq!(task.execute().await.unwrap(), 0);
    assert_eq!(task.clone().execute().await.unwrap(), 1);
    assert_eq!(
        task.execute_with_timeout(Duration::from_secs(1)).await.unwrap(),
        2
    );

    let token = CancellationToken::new();
    assert_eq!(task.execute_with_cancellation(&token).await.unwrap(), 3);
    token.cancel();
    assert_eq!(
        task.execute_with_cancellation(&token).await.unwrap_err().kind(),
        ErrorKind::Cancelled
    );
    assert_eq!(runs.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_task_returning_cancelled_counts_as_failed() {
    let executor = BoundedExecutor::new(config(1, None)).unwrap();
    let task = AsyncTask::<u8>::new(|| async { Err(Error::cancelled()) });

    let error = executor.execute_task(task).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::TaskFailure);

    let metrics = executor.metrics().await;
    assert_eq!(metrics.tasks_failed, 1);
    assert_eq!(metrics.tasks_cancelled, 0);
}

#[tokio::test(start_paused = true)]
async fn test_executor_deadline_counts_as_cancelled() {
    let token = CancellationToken::timeout(Duration::from_millis(10));
    let executor = BoundedExecutor::with_token(config(1, None), token).unwrap();
    let slow = AsyncTask::new(|| async {
        tokio::time::sleep(Duration::from_secs(1)).await;
        Ok(())
    });

    let error = executor.execute_task(slow).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::DeadlineExceeded);

    let metrics = executor.metrics().await;
    assert_eq!(metrics.tasks_cancelled, 1);
    assert_eq!(metrics.tasks_failed, 0);
}
