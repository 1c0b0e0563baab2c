//! Per-id task serialization
//!
//! Each scheduled task waits for the previous task with the same id to
//! finish before it starts. Tasks for different ids run concurrently.
//!
//! ```text
//!   schedule(a, t1) ──► t1 ─┐
//!   schedule(a, t2) ────────┴─► t2
//!   schedule(b, t3) ──► t3            (independent of a)
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::cleanup::lock;

use super::event::SetKey;

struct QueueInner<K> {
    /// Completion signal of the most recently scheduled task per id
    tails: Mutex<HashMap<K, (u64, oneshot::Receiver<()>)>>,
    pending: watch::Sender<usize>,
    next_seq: AtomicU64,
    token: CancellationToken,
}

impl<K> Drop for QueueInner<K> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Marks a task finished even if it panics or is cancelled
struct Finish<K: SetKey> {
    queue: Weak<QueueInner<K>>,
    id: K,
    seq: u64,
    _done: oneshot::Sender<()>,
}

impl<K: SetKey> Drop for Finish<K> {
    fn drop(&mut self) {
        let Some(queue) = self.queue.upgrade() else {
            return;
        };
        {
            let mut tails = lock(&queue.tails);
            if matches!(tails.get(&self.id), Some((seq, _)) if *seq == self.seq) {
                tails.remove(&self.id);
            }
        }
        queue.pending.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Key-striped task queue
pub struct TaskQueue<K> {
    inner: Arc<QueueInner<K>>,
}

impl<K: SetKey> TaskQueue<K> {
    pub fn new() -> Self {
        let (pending, _) = watch::channel(0);
        Self {
            inner: Arc::new(QueueInner {
                tails: Mutex::new(HashMap::new()),
                pending,
                next_seq: AtomicU64::new(0),
                token: CancellationToken::new(),
            }),
        }
    }

    /// Run `task` once every earlier task for `id` has finished
    ///
    /// Must be called from within a tokio runtime. Tasks scheduled after
    /// [`close`](Self::close) are dropped without running.
    pub fn schedule<F>(&self, id: K, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.token.is_cancelled() {
            return;
        }
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(id = ?id, error = %e, "Task scheduled outside of a runtime");
                return;
            }
        };

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let (done, finished) = oneshot::channel();
        let previous = lock(&self.inner.tails).insert(id.clone(), (seq, finished));
        self.inner.pending.send_modify(|n| *n += 1);

        let finish = Finish {
            queue: Arc::downgrade(&self.inner),
            id,
            seq,
            _done: done,
        };
        let token = self.inner.token.clone();

        handle.spawn(async move {
            let _finish = finish;
            if let Some((_, previous)) = previous {
                tokio::select! {
                    _ = token.cancelled() => return,
                    // Err means the predecessor is gone, which is all we need
                    _ = previous => {}
                }
            }
            tokio::select! {
                _ = token.cancelled() => {}
                _ = task => {}
            }
        });
    }

    /// Number of tasks scheduled but not yet finished
    pub fn pending(&self) -> usize {
        *self.inner.pending.borrow()
    }

    /// Wait until every pending task has finished
    ///
    /// Tasks scheduled while waiting are waited for too.
    pub async fn wait(&self) {
        let mut rx = self.inner.pending.subscribe();
        // The sender lives in `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Cancel every pending task and refuse new ones
    pub fn close(&self) {
        self.inner.token.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.token.is_cancelled()
    }
}

impl<K: SetKey> Default for TaskQueue<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SetKey> Clone for TaskQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_same_id_runs_in_order() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        // The first task is slower, but must still finish first
        for (n, delay) in [(1, 50), (2, 10), (3, 0)] {
            let log = Arc::clone(&log);
            queue.schedule(7, async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                lock(&log).push(n);
            });
        }

        queue.wait().await;
        assert_eq!(*lock(&log), vec![1, 2, 3]);
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_ids_run_concurrently() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        for (id, delay) in [(1, 50), (2, 10)] {
            let log = Arc::clone(&log);
            queue.schedule(id, async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                lock(&log).push(id);
            });
        }

        queue.wait().await;
        assert_eq!(*lock(&log), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_block_successor() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let ran = Arc::new(Mutex::new(false));

        queue.schedule(1, async { panic!("boom") });
        let r = Arc::clone(&ran);
        queue.schedule(1, async move {
            *lock(&r) = true;
        });

        queue.wait().await;
        assert!(*lock(&ran));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_pending() {
        let queue: TaskQueue<u32> = TaskQueue::new();
        let ran = Arc::new(Mutex::new(false));

        let r = Arc::clone(&ran);
        queue.schedule(1, async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            *lock(&r) = true;
        });
        assert_eq!(queue.pending(), 1);

        queue.close();
        queue.wait().await;
        assert!(!*lock(&ran));

        queue.schedule(1, async {});
        assert_eq!(queue.pending(), 0);
    }
}
