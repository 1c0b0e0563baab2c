//! Set notifications and the bounds on keys and values

use std::fmt;
use std::hash::Hash;

/// Bounds for set ids
pub trait SetKey: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

impl<T> SetKey for T where T: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static {}

/// Bounds for set values
pub trait SetValue: Clone + Send + Sync + 'static {}

impl<T> SetValue for T where T: Clone + Send + Sync + 'static {}

/// Bounds for the owner-defined context carried with each event
pub trait SetExtra: Clone + Send + Sync + 'static {}

impl<T> SetExtra for T where T: Clone + Send + Sync + 'static {}

/// Kind of set notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Add,
    Update,
    Delete,
    Close,
}

/// Notification delivered to set listeners
///
/// `extra` is whatever the mutating owner passed along (for example the
/// packet that caused a session change). Derived views forward it.
#[derive(Debug, Clone, PartialEq)]
pub enum SetEvent<K, V, E = ()> {
    /// A new entry
    Add { id: K, value: V, extra: Option<E> },
    /// An existing entry was replaced
    Update {
        id: K,
        value: V,
        prev: V,
        extra: Option<E>,
    },
    /// An entry was removed
    Delete { id: K, prev: V, extra: Option<E> },
    /// The set was closed; terminal
    Close,
}

impl<K, V, E> SetEvent<K, V, E> {
    /// The kind of this event
    pub fn kind(&self) -> EventKind {
        match self {
            SetEvent::Add { .. } => EventKind::Add,
            SetEvent::Update { .. } => EventKind::Update,
            SetEvent::Delete { .. } => EventKind::Delete,
            SetEvent::Close => EventKind::Close,
        }
    }

    /// Id the event refers to (`None` for close)
    pub fn id(&self) -> Option<&K> {
        match self {
            SetEvent::Add { id, .. } | SetEvent::Update { id, .. } | SetEvent::Delete { id, .. } => {
                Some(id)
            }
            SetEvent::Close => None,
        }
    }

    /// Owner context attached to the event
    pub fn extra(&self) -> Option<&E> {
        match self {
            SetEvent::Add { extra, .. }
            | SetEvent::Update { extra, .. }
            | SetEvent::Delete { extra, .. } => extra.as_ref(),
            SetEvent::Close => None,
        }
    }
}
