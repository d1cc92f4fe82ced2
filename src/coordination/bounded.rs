//! Bounded fan-out over a tokio JoinSet.

use std::future::Future;
use tokio::task::JoinSet;

/// Run `f` over every item with at most `limit` tasks in flight.
///
/// Results come back in input order. A task that panicked (or was otherwise
/// lost) yields `None` in its slot; the remaining tasks still run to completion.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, f: F) -> Vec<Option<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
{
    let limit = limit.max(1);
    let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    let mut join_set = JoinSet::new();

    for (idx, item) in items.into_iter().enumerate() {
        while join_set.len() >= limit {
            collect_one(&mut join_set, &mut results).await;
        }

        let task = f(item);
        join_set.spawn(async move { (idx, task.await) });
    }

    while !join_set.is_empty() {
        collect_one(&mut join_set, &mut results).await;
    }

    results
}

async fn collect_one<R: Send + 'static>(
    join_set: &mut JoinSet<(usize, R)>,
    results: &mut [Option<R>],
) {
    match join_set.join_next().await {
        Some(Ok((idx, result))) => results[idx] = Some(result),
        Some(Err(e)) => tracing::error!("Worker task panicked: {}", e),
        None => {}
    }
}
