//! Synchronous filtered view

use std::fmt;

use super::event::{SetEvent, SetExtra, SetKey, SetValue};
use super::set::DynamicSet;
use super::bind_view;

/// Outcome of a filter predicate
///
/// Implemented for `bool` and for `Result<bool, E>`; an error counts as
/// "excluded" and is logged.
pub trait Predicate {
    fn into_result(self) -> Result<bool, String>;
}

impl Predicate for bool {
    fn into_result(self) -> Result<bool, String> {
        Ok(self)
    }
}

impl<Er: fmt::Display> Predicate for Result<bool, Er> {
    fn into_result(self) -> Result<bool, String> {
        self.map_err(|e| e.to_string())
    }
}

/// Evaluate a predicate outcome, logging failures as exclusions
pub(crate) fn accept<K: fmt::Debug, R: Predicate>(id: &K, outcome: R, view: &str) -> bool {
    match outcome.into_result() {
        Ok(accepted) => accepted,
        Err(e) => {
            tracing::error!(id = ?id, error = %e, view, "Predicate failed");
            false
        }
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> DynamicSet<K, V, E> {
    /// View of the entries for which `predicate` holds
    ///
    /// | source event | was | will | filtered action |
    /// |--------------|-----|------|-----------------|
    /// | add          |  -  | true | add             |
    /// | update       | no  | true | add             |
    /// | update       | yes | true | update          |
    /// | update       | yes | false| delete          |
    /// | delete       |  -  |  -   | delete if present |
    pub fn filter<F, R>(&self, predicate: F) -> DynamicSet<K, V, E>
    where
        F: Fn(&K, &V) -> R + Send + Sync + 'static,
        R: Predicate,
    {
        let target = DynamicSet::new();
        let weak = target.downgrade();
        let check = move |id: &K, value: &V| accept(id, predicate(id, value), "filter");

        bind_view(self, &target, move |event: &SetEvent<K, V, E>| {
            let Some(target) = weak.upgrade() else {
                return;
            };
            let result = match event {
                SetEvent::Add { id, value, extra } => {
                    if check(id, value) {
                        target.add_with(id.clone(), value.clone(), extra.clone())
                    } else {
                        Ok(())
                    }
                }
                SetEvent::Update {
                    id, value, extra, ..
                } => {
                    let was = target.has(id);
                    let will = check(id, value);
                    match (was, will) {
                        (false, true) => target.add_with(id.clone(), value.clone(), extra.clone()),
                        (true, true) => target
                            .update_with(id.clone(), value.clone(), extra.clone())
                            .map(|_| ()),
                        (true, false) => target.delete_with(id, extra.clone()).map(|_| ()),
                        (false, false) => Ok(()),
                    }
                }
                SetEvent::Delete { id, extra, .. } => {
                    if target.has(id) {
                        target.delete_with(id, extra.clone()).map(|_| ())
                    } else {
                        Ok(())
                    }
                }
                SetEvent::Close => {
                    target.close();
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Filtered view out of sync with its source");
            }
        });

        target
    }
}
