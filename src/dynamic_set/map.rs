//! Synchronous mapped view

use std::fmt;

use super::bind_view;
use super::event::{SetEvent, SetExtra, SetKey, SetValue};
use super::set::DynamicSet;

/// Outcome of a map transform
///
/// Implemented for `(K, V)` and for `Result<(K, V), E>`; an error produces
/// no output for that event and is logged.
pub trait Mapping<K, V> {
    fn into_result(self) -> Result<(K, V), String>;
}

impl<K, V> Mapping<K, V> for (K, V) {
    fn into_result(self) -> Result<(K, V), String> {
        Ok(self)
    }
}

impl<K, V, Er: fmt::Display> Mapping<K, V> for Result<(K, V), Er> {
    fn into_result(self) -> Result<(K, V), String> {
        self.map_err(|e| e.to_string())
    }
}

impl<K: SetKey, V: SetValue, E: SetExtra> DynamicSet<K, V, E> {
    /// View with every entry passed through `transform`
    ///
    /// When two source ids map onto the same target id, the later add
    /// becomes an update of the existing target entry.
    pub fn map<K2, V2, F, M>(&self, transform: F) -> DynamicSet<K2, V2, E>
    where
        K2: SetKey,
        V2: SetValue,
        F: Fn(&K, &V) -> M + Send + Sync + 'static,
        M: Mapping<K2, V2>,
    {
        let target = DynamicSet::new();
        let weak = target.downgrade();
        let transform = move |id: &K, value: &V| match transform(id, value).into_result() {
            Ok(output) => Some(output),
            Err(e) => {
                tracing::error!(id = ?id, error = %e, "Map transform failed");
                None
            }
        };

        bind_view(self, &target, move |event: &SetEvent<K, V, E>| {
            let Some(target) = weak.upgrade() else {
                return;
            };
            let result = match event {
                SetEvent::Add { id, value, extra } | SetEvent::Update { id, value, extra, .. } => {
                    match transform(id, value) {
                        Some((id, value)) => target.add_or_update_with(id, value, extra.clone()),
                        None => Ok(()),
                    }
                }
                SetEvent::Delete { id, prev, extra } => match transform(id, prev) {
                    Some((id, _)) if target.has(&id) => {
                        target.delete_with(&id, extra.clone()).map(|_| ())
                    }
                    _ => Ok(()),
                },
                SetEvent::Close => {
                    target.close();
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "Mapped view out of sync with its source");
            }
        });

        target
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_pointwise() {
        let set = DynamicSet::from_vec((0..10).collect::<Vec<usize>>()).map(|id, v| (id * 2, v * 2));

        let mut entries = set.entries();
        entries.sort();
        let expected: Vec<(usize, usize)> = (0..10).map(|i| (i * 2, i * 2)).collect();
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_colliding_ids_degrade_to_update() {
        let source: DynamicSet<u32, u32> = DynamicSet::new();
        let parity = source.map(|id, v| (id % 2, *v));

        source.add(1, 10).unwrap();
        source.add(3, 30).unwrap();

        assert_eq!(parity.len(), 1);
        assert_eq!(parity.get(&1), Some(30));
    }

    #[test]
    fn test_delete_through_transform() {
        let source: DynamicSet<u32, u32> = DynamicSet::new();
        let shifted = source.map(|id, v| (id + 100, *v));

        source.add(1, 1).unwrap();
        assert!(shifted.has(&101));

        source.delete(&1).unwrap();
        assert!(shifted.is_empty());
    }

    #[test]
    fn test_failing_transform_produces_nothing() {
        let source = DynamicSet::from_vec((0..6).collect::<Vec<u32>>());
        let halves = source.map(|id, v| {
            if v % 2 == 0 {
                Ok((*id, v / 2))
            } else {
                Err(format!("{} is odd", v))
            }
        });

        let mut values = halves.values();
        values.sort();
        assert_eq!(values, vec![0, 1, 2]);

        source.delete(&1).unwrap();
        source.delete(&2).unwrap();
        assert_eq!(halves.len(), 2);
        assert!(!halves.has(&2));
    }
}
