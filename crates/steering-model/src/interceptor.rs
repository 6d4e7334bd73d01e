//! The active-interceptor table: `layer_index -> (vector, gain)`, at
//! most one entry per layer. There is no forward-hook registry to bind
//! a callback to in this ecosystem, so the table is consulted directly
//! by `SteeringModel`'s own forward loop, which is itself the
//! "callback" the spec describes.

use std::collections::BTreeMap;

use steering_core::SteeringVector;

#[derive(Debug, Clone)]
pub struct ActiveInterceptorEntry {
    pub vector: SteeringVector,
    pub gain: f32,
}

/// A read-only snapshot row returned by `list_active_steering`.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSteeringEntry {
    pub layer_index: usize,
    pub gain: f32,
    pub magnitude: f32,
    pub model_fingerprint: String,
}

#[derive(Debug, Default)]
pub struct InterceptorTable {
    entries: BTreeMap<usize, ActiveInterceptorEntry>,
}

impl InterceptorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, layer_index: usize) -> bool {
        self.entries.contains_key(&layer_index)
    }

    pub fn insert(&mut self, layer_index: usize, entry: ActiveInterceptorEntry) {
        self.entries.insert(layer_index, entry);
    }

    pub fn get(&self, layer_index: usize) -> Option<&ActiveInterceptorEntry> {
        self.entries.get(&layer_index)
    }

    /// Removes one layer's entry. Idempotent: absent entries are a no-op.
    pub fn remove_one(&mut self, layer_index: usize) {
        self.entries.remove(&layer_index);
    }

    /// Removes every entry.
    pub fn remove_all(&mut self) {
        self.entries.clear();
    }

    pub fn snapshot(&self) -> Vec<ActiveSteeringEntry> {
        self.entries
            .iter()
            .map(|(&layer_index, entry)| ActiveSteeringEntry {
                layer_index,
                gain: entry.gain,
                magnitude: entry.vector.magnitude(),
                model_fingerprint: entry.vector.model_fingerprint().to_string(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use steering_core::Metadata;

    fn entry(magnitude_seed: f32, gain: f32) -> ActiveInterceptorEntry {
        ActiveInterceptorEntry {
            vector: SteeringVector::construct(vec![magnitude_seed, 0.0], 0, "x", "m", Metadata::new())
                .unwrap(),
            gain,
        }
    }

    #[test]
    fn remove_one_is_idempotent_on_absent_layer() {
        let mut table = InterceptorTable::new();
        table.remove_one(7);
        assert!(!table.contains(7));
    }

    #[test]
    fn snapshot_reflects_inserted_entries() {
        let mut table = InterceptorTable::new();
        table.insert(2, entry(3.0, 0.5));
        let snapshot = table.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].layer_index, 2);
        assert_eq!(snapshot[0].gain, 0.5);
    }

    #[test]
    fn remove_all_empties_table() {
        let mut table = InterceptorTable::new();
        table.insert(0, entry(1.0, 1.0));
        table.insert(1, entry(1.0, 1.0));
        table.remove_all();
        assert!(table.snapshot().is_empty());
    }
}
