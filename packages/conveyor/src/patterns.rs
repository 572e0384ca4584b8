//! Channel patterns: generator, fan-in merge, consumer

use crate::barrier::WaitGroup;
use crate::cancel::CancellationToken;
use crate::channel::BoundedChannel;
use conveyor_common::{err, Result};
use std::future::Future;
use tracing::debug;

/// Turn `items` into a channel fed by a background producer
///
/// The channel is closed after the last item, or early if `token` fires.
///
/// # Errors
///
/// Returns `Configuration` if `capacity` is zero or no Tokio runtime is
/// running.
pub fn generate<T, It>(items: It, capacity: usize, token: &CancellationToken) -> Result<BoundedChannel<T>>
where
    T: Send + 'static,
    It: IntoIterator<Item = T>,
    It::IntoIter: Send + 'static,
{
    require_runtime("generate")?;
    let channel = BoundedChannel::new(capacity)?;
    let producer = channel.clone();
    let token = token.clone();
    let items = items.into_iter();

    tokio::spawn(async move {
        let mut produced = 0usize;
        for item in items {
            if let Err(error) = producer.put_with(item, &token).await {
                debug!(produced, %error, "generator stopped early");
                break;
            }
            produced += 1;
        }
        producer.close();
    });

    Ok(channel)
}

/// Merge several channels into one (fan-in)
///
/// One forwarder per source; the merged channel closes once every source is
/// exhausted. The interleaving across sources is unspecified: only the
/// relative order of items from the same source is kept.
///
/// # Errors
///
/// Returns `Configuration` if `capacity` is zero or no Tokio runtime is
/// running.
pub fn merge<T>(sources: Vec<BoundedChannel<T>>, capacity: usize) -> Result<BoundedChannel<T>>
where
    T: Send + 'static,
{
    require_runtime("merge")?;
    let merged = BoundedChannel::new(capacity)?;
    let forwarders = WaitGroup::new();

    for source in sources {
        let guard = forwarders.guard()?;
        let sink = merged.clone();
        tokio::spawn(async move {
            let _guard = guard;
            while let Some(item) = source.get().await {
                if sink.put(item).await.is_err() {
                    break;
                }
            }
        });
    }

    let closer = merged.clone();
    tokio::spawn(async move {
        forwarders.wait().await;
        closer.close();
    });

    Ok(merged)
}

fn require_runtime(pattern: &str) -> Result<()> {
    tokio::runtime::Handle::try_current()
        .map(drop)
        .map_err(|e| err!(configuration, "{} needs a Tokio runtime: {}", pattern, e))
}

/// Drain `channel` until end-of-stream, applying `f` to each item
///
/// Returns the number of items consumed.
pub async fn consume<T, F, Fut>(channel: &BoundedChannel<T>, mut f: F) -> usize
where
    F: FnMut(T) -> Fut,
    Fut: Future<Output = ()>,
{
    let mut consumed = 0;
    while let Some(item) = channel.get().await {
        f(item).await;
        consumed += 1;
    }
    consumed
}
