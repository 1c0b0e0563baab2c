//! Reactive keyed collections
//!
//! A [`DynamicSet`] is a keyed container that notifies listeners of every
//! add, update and delete. Derived views are themselves dynamic sets, fed by
//! an adapter subscribed to their source(s):
//!
//! ```text
//!   PollingSet ──┐
//!                ├──► UnionSet ──► filter ──► async_map ──► consumer
//!   DynamicSet ──┘                                         (for_each_async)
//! ```
//!
//! Closing a view detaches its adapter but never closes its sources.
//! Closing a source closes the views built on it.
//!
//! Every mutation completes, and its notification is delivered, before the
//! mutating call returns. Async views ([`AsyncSet`]) are the exception: their
//! transforms run as tokio tasks, serialized per id by a [`TaskQueue`].

pub mod async_view;
pub mod event;
pub mod filter;
pub mod map;
pub mod polling;
pub mod set;
pub mod task_queue;
pub mod union;

use std::sync::Arc;

use crate::cleanup::Cleanup;

pub use async_view::{AsyncSet, MapOp};
pub use event::{EventKind, SetEvent, SetExtra, SetKey, SetValue};
pub use filter::Predicate;
pub use map::Mapping;
pub use polling::{backoff_interval, ListSource, PollConfig, PollingSet, Versioned};
pub use set::{DynamicSet, ListenerId, WaitFuture, WeakSet};
pub use task_queue::TaskQueue;
pub use union::UnionSet;

/// Connect a view adapter to its source
///
/// `handler` sees a synthetic add for every entry already in `source`,
/// then every live event. The subscription is released when `target`
/// closes or is dropped. A closed source closes `target` right away.
pub(crate) fn bind_view<K, V, E, K2, V2, E2, F>(
    source: &DynamicSet<K, V, E>,
    target: &DynamicSet<K2, V2, E2>,
    handler: F,
) where
    K: SetKey,
    V: SetValue,
    E: SetExtra,
    K2: SetKey,
    V2: SetValue,
    E2: SetExtra,
    F: Fn(&SetEvent<K, V, E>) + Send + Sync + 'static,
{
    let handler = Arc::new(handler);

    let live = Arc::clone(&handler);
    let Some((listener_id, snapshot)) = source.attach(move |event| live(event)) else {
        target.close();
        return;
    };

    let adapter = Cleanup::new();
    let source = source.clone();
    adapter.add(move || source.unsubscribe(listener_id));
    target.on_close(adapter);

    for (id, value) in snapshot {
        handler(&SetEvent::Add {
            id,
            value,
            extra: None,
        });
    }
}
