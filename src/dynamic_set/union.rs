//! Union of several sets
//!
//! The union tracks which source currently supplies each id. When two
//! sources hold the same id, the first one added keeps it; when it lets go,
//! the remaining sources are scanned in the order they were attached and the
//! first one still holding the id takes over (an update, not a delete).

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};

use crate::cleanup::{lock, Cleanup};

use super::event::{SetEvent, SetExtra, SetKey, SetValue};
use super::set::{DynamicSet, ListenerId, WeakSet};

type SourceKey = u64;

struct Source<K, V, E> {
    key: SourceKey,
    set: DynamicSet<K, V, E>,
    listener: ListenerId,
}

struct UnionState<K, V, E> {
    /// Attached sources, in attachment order
    sources: Vec<Source<K, V, E>>,
    /// Which source supplies each id
    owners: HashMap<K, SourceKey>,
    next_key: SourceKey,
}

struct UnionShared<K, V, E> {
    target: WeakSet<K, V, E>,
    state: Mutex<UnionState<K, V, E>>,
}

/// What the union does in response to a source event
enum Action<K, V, E> {
    Add(K, V, Option<E>),
    Update(K, V, Option<E>),
    Delete(K, Option<E>),
    Nothing,
}

/// Dynamic union of sets
///
/// Dereferences to the merged [`DynamicSet`].
pub struct UnionSet<K, V, E = ()> {
    set: DynamicSet<K, V, E>,
    shared: Arc<UnionShared<K, V, E>>,
}

impl<K: SetKey, V: SetValue, E: SetExtra> UnionSet<K, V, E> {
    /// Create a union over `sets`
    pub fn new(sets: &[DynamicSet<K, V, E>]) -> Self {
        let set = DynamicSet::new();
        let shared = Arc::new(UnionShared {
            target: set.downgrade(),
            state: Mutex::new(UnionState {
                sources: Vec::new(),
                owners: HashMap::new(),
                next_key: 0,
            }),
        });

        // Detach every source when the union closes
        let detach = Cleanup::new();
        {
            let shared = Arc::clone(&shared);
            detach.add(move || {
                let sources = std::mem::take(&mut lock(&shared.state).sources);
                for source in sources {
                    source.set.unsubscribe(source.listener);
                }
            });
        }
        set.on_close(detach);

        let union = Self { set, shared };
        for source in sets {
            union.add_set(source);
        }
        union
    }

    /// The merged set
    pub fn set(&self) -> &DynamicSet<K, V, E> {
        &self.set
    }

    /// Number of attached sources
    pub fn source_count(&self) -> usize {
        lock(&self.shared.state).sources.len()
    }

    /// Attach another source
    ///
    /// Returns `false` if `source` is already part of the union.
    pub fn add_set(&self, source: &DynamicSet<K, V, E>) -> bool {
        if self.set.is_closed() {
            return false;
        }

        let key = {
            let mut state = lock(&self.shared.state);
            if state.sources.iter().any(|s| s.set.ptr_eq(source)) {
                return false;
            }
            let key = state.next_key;
            state.next_key += 1;
            key
        };

        let weak = Arc::downgrade(&self.shared);
        let listener = move |event: &SetEvent<K, V, E>| {
            if let Some(shared) = weak.upgrade() {
                shared.on_source_event(key, event);
            }
        };

        let Some((listener, snapshot)) = source.attach(listener) else {
            return false;
        };

        lock(&self.shared.state).sources.push(Source {
            key,
            set: source.clone(),
            listener,
        });

        for (id, value) in snapshot {
            self.shared.on_source_event(
                key,
                &SetEvent::Add {
                    id,
                    value,
                    extra: None,
                },
            );
        }

        true
    }

    /// Detach a source
    ///
    /// Every id the source was supplying fails over to another source or
    /// is deleted. Returns `false` if `source` is not part of the union.
    pub fn remove_set(&self, source: &DynamicSet<K, V, E>) -> bool {
        let key = {
            let state = lock(&self.shared.state);
            match state.sources.iter().find(|s| s.set.ptr_eq(source)) {
                Some(s) => s.key,
                None => return false,
            }
        };
        self.shared.remove_source(key);
        true
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> UnionShared<K, V, E> {
    fn on_source_event(&self, key: SourceKey, event: &SetEvent<K, V, E>) {
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let action = match event {
            SetEvent::Add { id, value, extra } => {
                let mut state = lock(&self.state);
                if state.owners.contains_key(id) {
                    Action::Nothing
                } else {
                    state.owners.insert(id.clone(), key);
                    Action::Add(id.clone(), value.clone(), extra.clone())
                }
            }
            SetEvent::Update {
                id, value, extra, ..
            } => {
                let state = lock(&self.state);
                if state.owners.get(id) == Some(&key) {
                    Action::Update(id.clone(), value.clone(), extra.clone())
                } else {
                    Action::Nothing
                }
            }
            SetEvent::Delete { id, extra, .. } => {
                let mut state = lock(&self.state);
                state.release(key, id, extra.clone())
            }
            SetEvent::Close => {
                self.remove_source(key);
                let empty = lock(&self.state).sources.is_empty();
                if empty {
                    target.close();
                }
                return;
            }
        };

        apply(&target, action);
    }

    fn remove_source(&self, key: SourceKey) {
        let Some(target) = self.target.upgrade() else {
            return;
        };

        let actions = {
            let mut state = lock(&self.state);
            let Some(pos) = state.sources.iter().position(|s| s.key == key) else {
                return;
            };
            let source = state.sources.remove(pos);
            source.set.unsubscribe(source.listener);

            let supplied: Vec<K> = state
                .owners
                .iter()
                .filter(|(_, owner)| **owner == key)
                .map(|(id, _)| id.clone())
                .collect();
            supplied
                .into_iter()
                .map(|id| state.release(key, &id, None))
                .collect::<Vec<_>>()
        };

        for action in actions {
            apply(&target, action);
        }
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> UnionState<K, V, E> {
    /// Source `key` no longer supplies `id`: fail over or delete
    fn release(&mut self, key: SourceKey, id: &K, extra: Option<E>) -> Action<K, V, E> {
        if self.owners.get(id) != Some(&key) {
            return Action::Nothing;
        }

        let successor = self
            .sources
            .iter()
            .filter(|s| s.key != key)
            .find_map(|s| s.set.get(id).map(|value| (s.key, value)));

        match successor {
            Some((owner, value)) => {
                self.owners.insert(id.clone(), owner);
                Action::Update(id.clone(), value, extra)
            }
            None => {
                self.owners.remove(id);
                Action::Delete(id.clone(), extra)
            }
        }
    }
}

fn apply<K: SetKey, V: SetValue, E: SetExtra>(target: &DynamicSet<K, V, E>, action: Action<K, V, E>) {
    let result = match action {
        Action::Add(id, value, extra) => target.add_with(id, value, extra),
        Action::Update(id, value, extra) => target.update_with(id, value, extra).map(|_| ()),
        Action::Delete(id, extra) => target.delete_with(&id, extra).map(|_| ()),
        Action::Nothing => Ok(()),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, "Union out of sync with its sources");
    }
}

impl<K, V, E> Deref for UnionSet<K, V, E> {
    type Target = DynamicSet<K, V, E>;

    fn deref(&self) -> &Self::Target {
        &self.set
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> DynamicSet<K, V, E> {
    /// Union of this set and `others`
    pub fn union(&self, others: &[DynamicSet<K, V, E>]) -> UnionSet<K, V, E> {
        let mut sets = Vec::with_capacity(others.len() + 1);
        sets.push(self.clone());
        sets.extend(others.iter().cloned());
        UnionSet::new(&sets)
    }
}
