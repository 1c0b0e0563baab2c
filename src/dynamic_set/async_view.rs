//! Asynchronous filtered and mapped views
//!
//! The transform runs as a tokio task per source event, serialized per
//! source id by a [`TaskQueue`]. A transform that fails is logged and
//! produces no output for that event.

use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;

use crate::cleanup::Cleanup;

use super::bind_view;
use super::event::{SetEvent, SetExtra, SetKey, SetValue};
use super::filter::{accept, Predicate};
use super::map::Mapping;
use super::set::DynamicSet;
use super::task_queue::TaskQueue;

/// Which source event an async map transform is being run for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOp {
    Add,
    Update,
    Delete,
}

impl fmt::Display for MapOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapOp::Add => write!(f, "add"),
            MapOp::Update => write!(f, "update"),
            MapOp::Delete => write!(f, "delete"),
        }
    }
}

/// A view whose contents are computed by async transforms
///
/// Dereferences to the resulting [`DynamicSet`]. `Q` is the id type of the
/// source, which keys the task queue.
pub struct AsyncSet<K, V, E = (), Q = K> {
    set: DynamicSet<K, V, E>,
    queue: TaskQueue<Q>,
}

impl<K: SetKey, V: SetValue, E: SetExtra, Q: SetKey> AsyncSet<K, V, E, Q> {
    fn new() -> Self {
        let set = DynamicSet::new();
        let queue = TaskQueue::new();

        let stop = Cleanup::new();
        let q = queue.clone();
        stop.add(move || q.close());
        set.on_close(stop);

        Self { set, queue }
    }

    /// The resulting set
    pub fn set(&self) -> &DynamicSet<K, V, E> {
        &self.set
    }

    /// Wait until every pending transform has been applied
    pub async fn wait(&self) {
        self.queue.wait().await;
    }

    /// Number of transforms not yet applied
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }
}

impl<K, V, E, Q> Deref for AsyncSet<K, V, E, Q> {
    type Target = DynamicSet<K, V, E>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> DynamicSet<K, V, E> {
    /// View of the entries for which the async `predicate` holds
    ///
    /// Follows the same transition table as [`filter`](Self::filter). A
    /// delete waits for in-flight predicates on the same id. Must be
    /// called from within a tokio runtime.
    pub fn async_filter<F, Fut, R>(&self, predicate: F) -> AsyncSet<K, V, E>
    where
        F: Fn(K, V) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: Predicate + 'static,
    {
        let view = AsyncSet::new();
        let weak = view.set.downgrade();
        let queue = view.queue.clone();
        let predicate = Arc::new(predicate);

        bind_view(self, &view.set, move |event: &SetEvent<K, V, E>| match event {
            SetEvent::Add { id, value, extra } | SetEvent::Update { id, value, extra, .. } => {
                let predicate = Arc::clone(&predicate);
                let weak = weak.clone();
                let (id, value, extra) = (id.clone(), value.clone(), extra.clone());
                queue.schedule(id.clone(), async move {
                    let keep = accept(&id, predicate(id.clone(), value.clone()).await, "async filter");
                    let Some(target) = weak.upgrade() else {
                        return;
                    };
                    let result = match (target.has(&id), keep) {
                        (false, true) => target.add_with(id, value, extra),
                        (true, true) => target.update_with(id, value, extra).map(|_| ()),
                        (true, false) => target.delete_with(&id, extra).map(|_| ()),
                        (false, false) => Ok(()),
                    };
                    if let Err(e) = result {
                        tracing::debug!(error = %e, "Async filter result dropped");
                    }
                });
            }
            SetEvent::Delete { id, extra, .. } => {
                let weak = weak.clone();
                let (id, extra) = (id.clone(), extra.clone());
                queue.schedule(id.clone(), async move {
                    let Some(target) = weak.upgrade() else {
                        return;
                    };
                    if target.has(&id) {
                        if let Err(e) = target.delete_with(&id, extra) {
                            tracing::debug!(error = %e, "Async filter delete dropped");
                        }
                    }
                });
            }
            SetEvent::Close => {
                if let Some(target) = weak.upgrade() {
                    target.close();
                }
            }
        });

        view
    }

    /// View with every entry passed through the async `transform`
    ///
    /// The transform is told which source event it runs for. On delete its
    /// output id names the entry to remove. Must be called from within a
    /// tokio runtime.
    pub fn async_map<K2, V2, F, Fut, M>(&self, transform: F) -> AsyncSet<K2, V2, E, K>
    where
        K2: SetKey,
        V2: SetValue,
        F: Fn(K, V, MapOp) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = M> + Send + 'static,
        M: Mapping<K2, V2> + 'static,
    {
        let view = AsyncSet::new();
        let weak = view.set.downgrade();
        let queue = view.queue.clone();
        let transform = Arc::new(transform);

        bind_view(self, &view.set, move |event: &SetEvent<K, V, E>| {
            let (id, value, extra, op) = match event {
                SetEvent::Add { id, value, extra } => (id, value, extra, MapOp::Add),
                SetEvent::Update { id, value, extra, .. } => (id, value, extra, MapOp::Update),
                SetEvent::Delete { id, prev, extra } => (id, prev, extra, MapOp::Delete),
                SetEvent::Close => {
                    if let Some(target) = weak.upgrade() {
                        target.close();
                    }
                    return;
                }
            };

            let transform = Arc::clone(&transform);
            let weak = weak.clone();
            let (id, value, extra) = (id.clone(), value.clone(), extra.clone());
            queue.schedule(id.clone(), async move {
                let (mapped_id, mapped) = match transform(id.clone(), value, op).await.into_result() {
                    Ok(output) => output,
                    Err(e) => {
                        tracing::error!(id = ?id, op = %op, error = %e, "Async map transform failed");
                        return;
                    }
                };
                let Some(target) = weak.upgrade() else {
                    return;
                };
                let result = match op {
                    MapOp::Add | MapOp::Update => target.add_or_update_with(mapped_id, mapped, extra),
                    MapOp::Delete if target.has(&mapped_id) => {
                        target.delete_with(&mapped_id, extra).map(|_| ())
                    }
                    MapOp::Delete => Ok(()),
                };
                if let Err(e) = result {
                    tracing::debug!(error = %e, "Async map result dropped");
                }
            });
        });

        view
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn sorted<K: Ord + SetKey, V: SetValue, E: SetExtra>(set: &DynamicSet<K, V, E>) -> Vec<(K, V)> {
        let mut entries = set.entries();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Latency per (id, value) pair, fixed by the seed
    fn latency(seed: u64, id: usize, value: u64) -> Duration {
        let mut rng = StdRng::seed_from_u64(seed ^ ((id as u64) << 32) ^ value);
        Duration::from_millis(rng.gen_range(0..100))
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_filter_converges_to_sync_filter() {
        for seed in 0..8u64 {
            let source: DynamicSet<usize, u64> = DynamicSet::new();
            let sync = source.filter(|_, v| v % 3 != 0);
            let async_view = source.async_filter(move |id, v| async move {
                tokio::time::sleep(latency(seed, id, v)).await;
                v % 3 != 0
            });

            // racing adds and updates on the same ids
            for id in 0..10 {
                source.add(id, id as u64).unwrap();
            }
            for id in 0..10 {
                source.update(id, id as u64 + 1).unwrap();
            }
            source.delete(&4).unwrap();
            source.update(5, 9).unwrap();

            async_view.wait().await;
            assert_eq!(sorted(async_view.set()), sorted(&sync), "seed {}", seed);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_async_map_converges_to_sync_map() {
        for seed in 0..8u64 {
            let source: DynamicSet<usize, u64> = DynamicSet::new();
            let sync = source.map(|id, v| (id + 100, v * 2));
            let async_view = source.async_map(move |id, v, _op| async move {
                tokio::time::sleep(latency(seed, id, v)).await;
                (id + 100, v * 2)
            });

            for id in 0..10 {
                source.add(id, id as u64).unwrap();
            }
            for id in (0..10).step_by(2) {
                source.update(id, 50).unwrap();
            }
            source.delete(&3).unwrap();
            source.delete(&4).unwrap();

            async_view.wait().await;
            assert_eq!(sorted(async_view.set()), sorted(&sync), "seed {}", seed);
        }
    }

    #[tokio::test]
    async fn test_async_filter_error_counts_as_false() {
        let source = DynamicSet::from_vec((0..10).collect::<Vec<u32>>());
        let even = source.async_filter(|_, v| async move {
            if v % 2 == 1 {
                Err(format!("odd value {}", v))
            } else {
                Ok(true)
            }
        });

        even.wait().await;
        let mut keys = even.keys();
        keys.sort();
        assert_eq!(keys, vec![0, 2, 4, 6, 8]);
    }

    #[tokio::test]
    async fn test_async_map_error_produces_nothing() {
        let source: DynamicSet<u32, u32> = DynamicSet::new();
        let mapped = source.async_map(|id, v, _| async move {
            if v == 0 {
                Err("zero")
            } else {
                Ok((id, 100 / v))
            }
        });

        source.add(1, 0).unwrap();
        source.add(2, 5).unwrap();
        mapped.wait().await;

        assert!(!mapped.has(&1));
        assert_eq!(mapped.get(&2), Some(20));
    }

    #[tokio::test]
    async fn test_async_map_sees_operation() {
        let source: DynamicSet<u32, u32> = DynamicSet::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        let mapped = source.async_map(move |id, v, op| {
            crate::cleanup::lock(&s).push(op);
            async move { (id, v) }
        });

        source.add(1, 1).unwrap();
        source.update(1, 2).unwrap();
        source.delete(&1).unwrap();
        mapped.wait().await;

        assert_eq!(
            *crate::cleanup::lock(&seen),
            vec![MapOp::Add, MapOp::Update, MapOp::Delete]
        );
        assert!(mapped.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_closing_view_cancels_pending_transforms() {
        let source: DynamicSet<u32, u32> = DynamicSet::new();
        let view = source.async_filter(|_, _| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            true
        });

        source.add(1, 1).unwrap();
        assert_eq!(view.pending(), 1);

        view.close();
        view.wait().await;
        assert!(view.is_empty());
        assert!(!source.is_closed());
    }
}
