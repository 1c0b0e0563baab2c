//! Set mirrored from a periodically fetched list
//!
//! ```text
//!   ┌────────────┐  fetch_list  ┌───────────┐  add/update/delete  ┌────────────┐
//!   │ ListSource │ ◄─────────── │ poll task │ ──────────────────► │ DynamicSet │
//!   └────────────┘  every tick  └───────────┘                     └────────────┘
//! ```
//!
//! A failed fetch leaves the entries alone and stretches the next interval
//! by `min(max_backoff_factor, 1 + sqrt(failures))`.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::cleanup::Cleanup;

use super::event::{SetKey, SetValue};
use super::set::{DynamicSet, WeakSet};

/// Item carrying its own id and a version string
pub trait Versioned {
    type Id: SetKey;

    fn id(&self) -> Self::Id;

    /// Changes whenever the item's content changes
    fn version(&self) -> &str;
}

/// Something that can list its current items in full
pub trait ListSource: Send + Sync + 'static {
    type Item: Versioned + SetValue;
    type Error: fmt::Display + Send;

    fn fetch_list(&self) -> impl Future<Output = Result<Vec<Self::Item>, Self::Error>> + Send;
}

/// Polling configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Interval between fetches while healthy
    pub interval: Duration,

    /// Upper bound on the back-off multiplier
    pub max_backoff_factor: f64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_backoff_factor: 5.0,
        }
    }
}

impl PollConfig {
    /// Set the poll interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the back-off cap
    pub fn max_backoff_factor(mut self, factor: f64) -> Self {
        self.max_backoff_factor = factor.max(1.0);
        self
    }
}

/// Delay before the next fetch after `failures` consecutive failures
pub fn backoff_interval(base: Duration, failures: u32, max_factor: f64) -> Duration {
    if failures == 0 {
        return base;
    }
    let factor = (1.0 + f64::from(failures).sqrt()).min(max_factor);
    base.mul_f64(factor)
}

type ItemId<S> = <<S as ListSource>::Item as Versioned>::Id;

/// A [`DynamicSet`] kept in sync with a [`ListSource`]
///
/// Dereferences to the mirrored set. Polling stops when the set closes or
/// is dropped.
pub struct PollingSet<S: ListSource> {
    set: DynamicSet<ItemId<S>, S::Item>,
    failures: Arc<AtomicU32>,
}

impl<S: ListSource> PollingSet<S> {
    /// Start polling `source`; the first fetch happens right away
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(source: S, config: PollConfig) -> Self {
        let set = DynamicSet::new();
        let failures = Arc::new(AtomicU32::new(0));
        let token = CancellationToken::new();

        let stop = Cleanup::new();
        let t = token.clone();
        stop.add(move || t.cancel());
        set.on_close(stop);

        tokio::spawn(poll_loop(
            source,
            config,
            set.downgrade(),
            Arc::clone(&failures),
            token,
        ));

        Self { set, failures }
    }

    /// The mirrored set
    pub fn set(&self) -> &DynamicSet<ItemId<S>, S::Item> {
        &self.set
    }

    /// Consecutive failed fetches so far
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl<S: ListSource> Deref for PollingSet<S> {
    type Target = DynamicSet<ItemId<S>, S::Item>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

async fn poll_loop<S: ListSource>(
    source: S,
    config: PollConfig,
    set: WeakSet<ItemId<S>, S::Item>,
    failures: Arc<AtomicU32>,
    token: CancellationToken,
) {
    loop {
        let result = tokio::select! {
            _ = token.cancelled() => return,
            result = source.fetch_list() => result,
        };

        let Some(target) = set.upgrade() else {
            return;
        };
        if target.is_closed() {
            return;
        }

        let count = match result {
            Ok(items) => {
                reconcile(&target, items);
                0
            }
            Err(e) => {
                let count = failures.load(Ordering::Relaxed) + 1;
                tracing::warn!(
                    error = %e,
                    failures = count,
                    "Fetching list failed"
                );
                count
            }
        };
        failures.store(count, Ordering::Relaxed);
        drop(target);

        let delay = backoff_interval(config.interval, count, config.max_backoff_factor);
        if count > 0 {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "Backing off");
        }

        tokio::select! {
            _ = token.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// Apply a full listing: add unseen, update changed versions, delete missing
fn reconcile<T>(set: &DynamicSet<T::Id, T>, items: Vec<T>)
where
    T: Versioned + SetValue,
{
    let mut found = HashSet::with_capacity(items.len());

    for item in items {
        let id = item.id();
        found.insert(id.clone());

        let result = match set.get(&id) {
            Some(prev) if prev.version() != item.version() => set.update(id, item).map(|_| ()),
            Some(_) => Ok(()),
            None => set.add(id, item),
        };
        if let Err(e) = result {
            tracing::debug!(error = %e, "Polled item not applied");
            return;
        }
    }

    for id in set.keys() {
        if !found.contains(&id) {
            let _ = set.delete(&id);
        }
    }
}
