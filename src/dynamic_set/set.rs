//! Base reactive keyed container

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::oneshot;

use crate::cleanup::{lock, Cleanup, Release};
use crate::error::SetError;

use super::event::{EventKind, SetEvent, SetExtra, SetKey, SetValue};

/// Handle for a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A boxed wait future, for holding across loop iterations
pub type WaitFuture<T> = Pin<Box<dyn Future<Output = Result<T, SetError>> + Send>>;

type ListenerFn<K, V, E> = dyn Fn(&SetEvent<K, V, E>) + Send + Sync;

struct Listener<K, V, E> {
    id: ListenerId,
    active: AtomicBool,
    callback: Box<ListenerFn<K, V, E>>,
}

struct Listeners<K, V, E> {
    next_id: u64,
    list: Vec<Arc<Listener<K, V, E>>>,
}

struct SetState<K, V> {
    entries: HashMap<K, V>,
    closed: bool,
}

struct SetInner<K, V, E> {
    state: Mutex<SetState<K, V>>,
    listeners: Mutex<Listeners<K, V, E>>,
    on_close: Cleanup,
}

impl<K, V, E> Drop for SetInner<K, V, E> {
    fn drop(&mut self) {
        self.on_close.close();
    }
}

/// Reactive keyed collection
///
/// Holds a mapping from id to value and notifies listeners synchronously,
/// in registration order, after every mutation. The handle is cheap to
/// clone; every clone refers to the same set.
///
/// A set has one owner that mutates it. Everyone else only reads and
/// subscribes. Listeners run after the entry lock is released, so they may
/// read the set that notified them and mutate other sets.
pub struct DynamicSet<K, V, E = ()> {
    inner: Arc<SetInner<K, V, E>>,
}

impl<K, V, E> Clone for DynamicSet<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Non-owning reference to a [`DynamicSet`]
pub struct WeakSet<K, V, E = ()> {
    inner: Weak<SetInner<K, V, E>>,
}

impl<K, V, E> Clone for WeakSet<K, V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<K, V, E> WeakSet<K, V, E> {
    /// Get a strong handle if the set is still alive
    pub fn upgrade(&self) -> Option<DynamicSet<K, V, E>> {
        self.inner.upgrade().map(|inner| DynamicSet { inner })
    }
}

/// Unsubscribes a listener when dropped
struct ListenerGuard<K: SetKey, V: SetValue, E: SetExtra> {
    set: WeakSet<K, V, E>,
    id: ListenerId,
}

impl<K: SetKey, V: SetValue, E: SetExtra> Drop for ListenerGuard<K, V, E> {
    fn drop(&mut self) {
        if let Some(set) = self.set.upgrade() {
            set.unsubscribe(self.id);
        }
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> DynamicSet<K, V, E> {
    /// Create an empty set
    pub fn new() -> Self {
        Self {
            inner: Arc::new(SetInner {
                state: Mutex::new(SetState {
                    entries: HashMap::new(),
                    closed: false,
                }),
                listeners: Mutex::new(Listeners {
                    next_id: 0,
                    list: Vec::new(),
                }),
                on_close: Cleanup::new(),
            }),
        }
    }

    /// Get a weak handle
    pub fn downgrade(&self) -> WeakSet<K, V, E> {
        WeakSet {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Whether two handles refer to the same set
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether an entry with `id` exists
    pub fn has(&self, id: &K) -> bool {
        lock(&self.inner.state).entries.contains_key(id)
    }

    /// Get a copy of the value stored under `id`
    pub fn get(&self, id: &K) -> Option<V> {
        lock(&self.inner.state).entries.get(id).cloned()
    }

    /// Snapshot of all ids
    pub fn keys(&self) -> Vec<K> {
        lock(&self.inner.state).entries.keys().cloned().collect()
    }

    /// Snapshot of all values
    pub fn values(&self) -> Vec<V> {
        lock(&self.inner.state).entries.values().cloned().collect()
    }

    /// Snapshot of all entries
    pub fn entries(&self) -> Vec<(K, V)> {
        lock(&self.inner.state)
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        lock(&self.inner.state).entries.len()
    }

    /// Whether the set has no entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the set has been closed
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.state).closed
    }

    /// Insert a new entry
    pub fn add(&self, id: K, value: V) -> Result<(), SetError> {
        self.add_with(id, value, None)
    }

    /// Insert a new entry, passing `extra` to listeners
    pub fn add_with(&self, id: K, value: V, extra: Option<E>) -> Result<(), SetError> {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(SetError::Closed);
            }
            if state.entries.contains_key(&id) {
                return Err(SetError::DuplicateId(format!("{:?}", id)));
            }
            state.entries.insert(id.clone(), value.clone());
        }

        self.emit(&SetEvent::Add { id, value, extra });
        Ok(())
    }

    /// Replace an existing entry, returning the previous value
    pub fn update(&self, id: K, value: V) -> Result<V, SetError> {
        self.update_with(id, value, None)
    }

    /// Replace an existing entry, passing `extra` to listeners
    pub fn update_with(&self, id: K, value: V, extra: Option<E>) -> Result<V, SetError> {
        let prev = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(SetError::Closed);
            }
            match state.entries.get_mut(&id) {
                Some(slot) => std::mem::replace(slot, value.clone()),
                None => return Err(SetError::UnknownId(format!("{:?}", id))),
            }
        };

        self.emit(&SetEvent::Update {
            id,
            value,
            prev: prev.clone(),
            extra,
        });
        Ok(prev)
    }

    /// Add the entry or replace it if it exists
    pub fn add_or_update(&self, id: K, value: V) -> Result<(), SetError> {
        self.add_or_update_with(id, value, None)
    }

    /// Add the entry or replace it if it exists, passing `extra` to listeners
    pub fn add_or_update_with(&self, id: K, value: V, extra: Option<E>) -> Result<(), SetError> {
        let prev = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(SetError::Closed);
            }
            state.entries.insert(id.clone(), value.clone())
        };

        let event = match prev {
            Some(prev) => SetEvent::Update {
                id,
                value,
                prev,
                extra,
            },
            None => SetEvent::Add { id, value, extra },
        };
        self.emit(&event);
        Ok(())
    }

    /// Remove an entry, returning its value
    pub fn delete(&self, id: &K) -> Result<V, SetError> {
        self.delete_with(id, None)
    }

    /// Remove an entry, passing `extra` to listeners
    pub fn delete_with(&self, id: &K, extra: Option<E>) -> Result<V, SetError> {
        let prev = {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return Err(SetError::Closed);
            }
            state
                .entries
                .remove(id)
                .ok_or_else(|| SetError::UnknownId(format!("{:?}", id)))?
        };

        self.emit(&SetEvent::Delete {
            id: id.clone(),
            prev: prev.clone(),
            extra,
        });
        Ok(prev)
    }

    /// Close the set
    ///
    /// Idempotent. Clears all entries, delivers [`SetEvent::Close`], drops
    /// every listener and closes everything attached with
    /// [`on_close`](Self::on_close).
    pub fn close(&self) {
        {
            let mut state = lock(&self.inner.state);
            if state.closed {
                return;
            }
            state.closed = true;
            state.entries.clear();
        }

        self.emit(&SetEvent::Close);

        let removed = std::mem::take(&mut lock(&self.inner.listeners).list);
        for listener in &removed {
            listener.active.store(false, Ordering::Release);
        }
        drop(removed);

        self.inner.on_close.close();
    }

    /// Close `cleanup` when this set closes (or is dropped)
    pub fn on_close(&self, cleanup: Cleanup) {
        self.inner.on_close.add_cleanup(cleanup);
    }

    /// Register a listener for all events
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SetEvent<K, V, E>) + Send + Sync + 'static,
    {
        let mut listeners = lock(&self.inner.listeners);
        let id = ListenerId(listeners.next_id);
        listeners.next_id += 1;
        listeners.list.push(Arc::new(Listener {
            id,
            active: AtomicBool::new(true),
            callback: Box::new(listener),
        }));
        id
    }

    /// Remove a listener
    ///
    /// A listener removed while an event is being delivered does not see
    /// that event if it had not been called yet.
    pub fn unsubscribe(&self, id: ListenerId) {
        let mut listeners = lock(&self.inner.listeners);
        if let Some(pos) = listeners.list.iter().position(|l| l.id == id) {
            let listener = listeners.list.remove(pos);
            listener.active.store(false, Ordering::Release);
        }
    }

    /// Subscribe and snapshot the entries in one step
    ///
    /// The snapshot is taken under the entry lock, so no mutation can slip
    /// between it and the subscription. Returns `None` if the set is closed.
    pub(crate) fn attach<F>(&self, listener: F) -> Option<(ListenerId, Vec<(K, V)>)>
    where
        F: Fn(&SetEvent<K, V, E>) + Send + Sync + 'static,
    {
        let state = lock(&self.inner.state);
        if state.closed {
            return None;
        }
        let snapshot = state
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let id = self.subscribe(listener);
        Some((id, snapshot))
    }

    fn emit(&self, event: &SetEvent<K, V, E>) {
        let snapshot: Vec<_> = lock(&self.inner.listeners).list.clone();

        for listener in snapshot {
            if listener.active.load(Ordering::Acquire) {
                (listener.callback)(event);
            }
        }
    }

    /// Resolve on the first event accepted by `matcher`
    ///
    /// The listener is registered before this returns, not on first poll.
    fn wait_with<T, F>(
        &self,
        id: &K,
        matcher: F,
    ) -> impl Future<Output = Result<T, SetError>> + Send + 'static
    where
        T: Send + 'static,
        F: Fn(&SetEvent<K, V, E>) -> Option<Result<T, SetError>> + Send + Sync + 'static,
    {
        let setup = {
            let state = lock(&self.inner.state);
            if state.closed {
                Err(SetError::Closed)
            } else if !state.entries.contains_key(id) {
                Err(SetError::UnknownId(format!("{:?}", id)))
            } else {
                let (tx, rx) = oneshot::channel();
                let tx = Mutex::new(Some(tx));
                let listener_id = self.subscribe(move |event| {
                    if let Some(result) = matcher(event) {
                        if let Some(tx) = lock(&tx).take() {
                            let _ = tx.send(result);
                        }
                    }
                });
                Ok((
                    rx,
                    ListenerGuard {
                        set: self.downgrade(),
                        id: listener_id,
                    },
                ))
            }
        };

        async move {
            let (rx, _guard) = setup?;
            rx.await.unwrap_or(Err(SetError::Closed))
        }
    }

    /// Wait for the next event of `kind` on `id`
    ///
    /// Fails immediately if `id` is unknown, and fails with
    /// [`SetError::Closed`] if the set closes first.
    pub fn wait_for_event(
        &self,
        kind: EventKind,
        id: &K,
    ) -> impl Future<Output = Result<SetEvent<K, V, E>, SetError>> + Send + 'static {
        let target = id.clone();
        self.wait_with(id, move |event| match event {
            SetEvent::Close if kind == EventKind::Close => Some(Ok(SetEvent::Close)),
            SetEvent::Close => Some(Err(SetError::Closed)),
            event if event.kind() == kind && event.id() == Some(&target) => {
                Some(Ok(event.clone()))
            }
            _ => None,
        })
    }

    /// Wait until `id` is deleted, yielding the deleted value
    pub fn wait_for_delete(&self, id: &K) -> impl Future<Output = Result<V, SetError>> + Send + 'static {
        let target = id.clone();
        self.wait_with(id, move |event| match event {
            SetEvent::Delete { id, prev, .. } if *id == target => Some(Ok(prev.clone())),
            SetEvent::Close => Some(Err(SetError::Closed)),
            _ => None,
        })
    }

    /// Wait for the next update of `id`, yielding the new value
    pub fn wait_for_update(&self, id: &K) -> impl Future<Output = Result<V, SetError>> + Send + 'static {
        let target = id.clone();
        self.wait_with(id, move |event| match event {
            SetEvent::Update { id, value, .. } if *id == target => Some(Ok(value.clone())),
            SetEvent::Close => Some(Err(SetError::Closed)),
            _ => None,
        })
    }

    /// Wait for the next update of `id`; fails if it is deleted first
    ///
    /// Drives "re-derive until something changes" loops:
    ///
    /// ```ignore
    /// while let Ok(value) = set.wait_for_change(&id).await {
    ///     publish(&value).await;
    /// }
    /// ```
    pub fn wait_for_change(&self, id: &K) -> impl Future<Output = Result<V, SetError>> + Send + 'static {
        let target = id.clone();
        self.wait_with(id, move |event| match event {
            SetEvent::Update { id, value, .. } if *id == target => Some(Ok(value.clone())),
            SetEvent::Delete { id, .. } if *id == target => {
                Some(Err(SetError::Deleted(format!("{:?}", id))))
            }
            SetEvent::Close => Some(Err(SetError::Closed)),
            _ => None,
        })
    }

    /// Call `f` for every entry in a snapshot of the set
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        for (id, value) in self.entries() {
            f(&id, &value);
        }
    }

    /// Call `f` for every current and future member
    ///
    /// Entries already present are reported before any later event. When
    /// `f` returns a [`Release`], it runs exactly once: when that id is
    /// deleted, when the set closes, or when the returned handle is closed,
    /// whichever comes first.
    pub fn for_each_async<F>(&self, f: F) -> Cleanup
    where
        F: Fn(&K, &V) -> Option<Release> + Send + Sync + 'static,
    {
        let cleanup = Cleanup::new();
        let members: Arc<Mutex<HashMap<K, Option<Release>>>> = Arc::new(Mutex::new(HashMap::new()));

        let start = {
            let members = Arc::clone(&members);
            let cleanup = cleanup.clone();
            move |id: &K, value: &V| {
                {
                    let mut members = lock(&members);
                    if cleanup.is_closed() || members.contains_key(id) {
                        return;
                    }
                    members.insert(id.clone(), None);
                }

                if let Some(release) = f(id, value) {
                    let mut guard = lock(&members);
                    match guard.get_mut(id) {
                        Some(slot) => *slot = Some(release),
                        None => {
                            // Deleted or released while `f` ran
                            drop(guard);
                            release.run();
                        }
                    }
                }
            }
        };
        let start = Arc::new(start);

        let listener = {
            let start = Arc::clone(&start);
            let members = Arc::clone(&members);
            let cleanup = cleanup.clone();
            move |event: &SetEvent<K, V, E>| match event {
                SetEvent::Add { id, value, .. } => start(id, value),
                SetEvent::Delete { id, .. } => {
                    let release = lock(&members).remove(id).flatten();
                    if let Some(release) = release {
                        release.run();
                    }
                }
                SetEvent::Update { .. } => {}
                SetEvent::Close => cleanup.close(),
            }
        };

        let Some((listener_id, snapshot)) = self.attach(listener) else {
            cleanup.close();
            return cleanup;
        };

        let weak = self.downgrade();
        cleanup.add(move || {
            if let Some(set) = weak.upgrade() {
                set.unsubscribe(listener_id);
            }
        });
        cleanup.add(move || {
            let released: Vec<Release> = lock(&members).drain().filter_map(|(_, r)| r).collect();
            for release in released {
                release.run();
            }
        });

        for (id, value) in snapshot {
            start(&id, &value);
        }

        cleanup
    }
}

impl<V: SetValue> DynamicSet<usize, V, ()> {
    /// Seed a set from a vector, keyed by index
    pub fn from_vec(values: Vec<V>) -> Self {
        let set = Self::new();
        {
            let mut state = lock(&set.inner.state);
            state.entries.extend(values.into_iter().enumerate());
        }
        set
    }
}

impl<V: SetValue> DynamicSet<String, V, ()> {
    /// Seed a set from string-keyed pairs
    pub fn from_map<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
    {
        let set = Self::new();
        {
            let mut state = lock(&set.inner.state);
            state
                .entries
                .extend(entries.into_iter().map(|(k, v)| (k.into(), v)));
        }
        set
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> Default for DynamicSet<K, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> fmt::Debug for DynamicSet<K, V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.inner.state);
        f.debug_struct("DynamicSet")
            .field("len", &state.entries.len())
            .field("closed", &state.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use tokio_test::{assert_pending, assert_ready, task};

    use super::*;

    fn record<K: SetKey, V: SetValue, E: SetExtra>(
        set: &DynamicSet<K, V, E>,
    ) -> Arc<Mutex<Vec<SetEvent<K, V, E>>>> {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        set.subscribe(move |event| lock(&sink).push(event.clone()));
        events
    }

    #[test]
    fn test_add_update_delete() {
        let set: DynamicSet<u32, &str> = DynamicSet::new();
        let events = record(&set);

        set.add(1, "a").unwrap();
        assert_eq!(set.update(1, "b").unwrap(), "a");
        assert_eq!(set.get(&1), Some("b"));
        assert_eq!(set.delete(&1).unwrap(), "b");
        assert!(!set.has(&1));

        let events = lock(&events);
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[1],
            SetEvent::Update {
                id: 1,
                value: "b",
                prev: "a",
                extra: None
            }
        );
        assert_eq!(
            events[2],
            SetEvent::Delete {
                id: 1,
                prev: "b",
                extra: None
            }
        );
    }

    #[test]
    fn test_contract_violations() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();

        assert!(matches!(set.add(1, 2), Err(SetError::DuplicateId(_))));
        assert!(matches!(set.update(2, 2), Err(SetError::UnknownId(_))));
        assert!(matches!(set.delete(&2), Err(SetError::UnknownId(_))));
        assert_eq!(set.get(&1), Some(1));
    }

    #[test]
    fn test_add_or_update() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let events = record(&set);

        set.add_or_update(1, 10).unwrap();
        set.add_or_update(1, 11).unwrap();

        let events = lock(&events);
        assert_eq!(events[0].kind(), EventKind::Add);
        assert_eq!(events[1].kind(), EventKind::Update);
    }

    #[test]
    fn test_extra_is_forwarded() {
        let set: DynamicSet<u32, u32, &'static str> = DynamicSet::new();
        let events = record(&set);

        set.add_with(1, 1, Some("because")).unwrap();
        set.delete(&1).unwrap();

        let events = lock(&events);
        assert_eq!(events[0].extra(), Some(&"because"));
        assert_eq!(events[1].extra(), None);
    }

    #[test]
    fn test_close_is_idempotent() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let events = record(&set);
        set.add(1, 1).unwrap();

        set.close();
        set.close();

        assert!(set.is_closed());
        assert!(set.is_empty());
        assert_eq!(set.add(2, 2), Err(SetError::Closed));
        assert_eq!(set.delete(&1), Err(SetError::Closed));

        let events = lock(&events);
        assert_eq!(events.iter().filter(|e| **e == SetEvent::Close).count(), 1);
    }

    #[test]
    fn test_listener_can_read_own_set() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let reader = set.clone();
        let s = Arc::clone(&seen);
        set.subscribe(move |event| {
            if let SetEvent::Add { id, .. } = event {
                assert!(reader.has(id));
                s.fetch_add(1, Ordering::SeqCst);
            }
        });

        set.add(7, 7).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let id = set.subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        set.add(1, 1).unwrap();
        set.unsubscribe(id);
        set.add(2, 2).unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_from_vec_and_map() {
        let set = DynamicSet::from_vec((0..10).collect::<Vec<u32>>());
        let mut keys = set.keys();
        keys.sort();
        assert_eq!(keys, (0..10).collect::<Vec<usize>>());

        let set = DynamicSet::from_map([("a", 1), ("b", 2)]);
        assert_eq!(set.get(&"b".to_string()), Some(2));
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_wait_for_unknown_id_fails_immediately() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let mut wait = task::spawn(set.wait_for_delete(&1));

        let result = assert_ready!(wait.poll());
        assert!(matches!(result, Err(SetError::UnknownId(_))));
    }

    #[test]
    fn test_wait_for_update() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();
        set.add(2, 2).unwrap();

        let mut wait = task::spawn(set.wait_for_update(&1));
        assert_pending!(wait.poll());

        set.update(2, 20).unwrap();
        assert_pending!(wait.poll());

        set.update(1, 10).unwrap();
        assert_eq!(assert_ready!(wait.poll()), Ok(10));
    }

    #[test]
    fn test_wait_for_event_rejects_on_close() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();

        let mut wait = task::spawn(set.wait_for_event(EventKind::Delete, &1));
        assert_pending!(wait.poll());

        set.close();
        assert_eq!(assert_ready!(wait.poll()), Err(SetError::Closed));
    }

    #[test]
    fn test_wait_for_change() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();

        let mut change = task::spawn(set.wait_for_change(&1));
        set.update(1, 2).unwrap();
        assert_eq!(assert_ready!(change.poll()), Ok(2));

        let mut change = task::spawn(set.wait_for_change(&1));
        set.delete(&1).unwrap();
        assert!(matches!(
            assert_ready!(change.poll()),
            Err(SetError::Deleted(_))
        ));
    }

    #[test]
    fn test_dropped_wait_unsubscribes() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();

        let wait = set.wait_for_delete(&1);
        assert_eq!(lock(&set.inner.listeners).list.len(), 1);
        drop(wait);
        assert!(lock(&set.inner.listeners).list.is_empty());
    }

    #[test]
    fn test_for_each_async_releases_on_delete() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        set.add(1, 1).unwrap();

        let started = Arc::new(Mutex::new(Vec::new()));
        let released = Arc::new(Mutex::new(Vec::new()));

        let s = Arc::clone(&started);
        let r = Arc::clone(&released);
        let _cleanup = set.for_each_async(move |id, _| {
            lock(&s).push(*id);
            let r = Arc::clone(&r);
            let id = *id;
            Some(Release::action(move || lock(&r).push(id)))
        });

        set.add(2, 2).unwrap();
        assert_eq!(*lock(&started), vec![1, 2]);

        set.delete(&1).unwrap();
        assert_eq!(*lock(&released), vec![1]);

        set.close();
        assert_eq!(*lock(&released), vec![1, 2]);
    }

    #[test]
    fn test_for_each_async_cleanup_releases_all_once() {
        let set = DynamicSet::from_vec(vec![0u32, 1, 2]);
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let cleanup = set.for_each_async(move |_, _| {
            let c = Arc::clone(&c);
            Some(Release::action(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
        });

        cleanup.close();
        assert_eq!(count.load(Ordering::SeqCst), 3);

        // no further callbacks or releases after close
        set.add(3, 3).unwrap();
        set.delete(&0).unwrap();
        set.close();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_for_each_async_nested_cleanup() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let nested = Cleanup::new();

        let n = nested.clone();
        let _cleanup = set.for_each_async(move |_, _| Some(Release::from(n.clone())));

        set.add(1, 1).unwrap();
        assert!(!nested.is_closed());
        set.delete(&1).unwrap();
        assert!(nested.is_closed());
    }

    #[test]
    fn test_on_close_runs_on_close() {
        let set: DynamicSet<u32, u32> = DynamicSet::new();
        let attached = Cleanup::new();
        set.on_close(attached.clone());

        set.close();
        assert!(attached.is_closed());
    }
}
