//! layered merge index
//!
//! writes collect in a sorted buffer. when the buffer grows past its limit it
//! becomes an immutable sorted layer on top of the stack, and adjacent layers
//! are merged while a newer one is larger than the one below it. lookups
//! consult the buffer, then layers newest to oldest.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt::Display;

use tracing::debug;

use crate::error::{Error, Result};

/// immutable sorted run of entries; `None` marks a deletion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer<K, V> {
    id: u64,
    entries: Vec<(K, Option<V>)>,
}

impl<K: Ord, V> Layer<K, V> {
    /// entries must be strictly ascending by key
    pub fn from_sorted(id: u64, entries: Vec<(K, Option<V>)>) -> Result<Self> {
        if entries.windows(2).any(|w| w[0].0 >= w[1].0) {
            return Err(Error::CorruptRecord(format!("layer-{}: keys out of order", id)));
        }
        Ok(Self { id, entries })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(K, Option<V>)] {
        &self.entries
    }

    /// `Some(None)` when the layer holds a tombstone for `key`
    pub fn get(&self, key: &K) -> Option<Option<&V>> {
        self.entries
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|i| self.entries[i].1.as_ref())
    }

    /// two-pointer merge; on equal keys the entry from `newer` wins
    fn merge(newer: Self, older: Self, id: u64, drop_tombstones: bool) -> Self {
        let mut out = Vec::with_capacity(newer.len() + older.len());
        let mut a = newer.entries.into_iter().peekable();
        let mut b = older.entries.into_iter().peekable();

        loop {
            let ord = match (a.peek(), b.peek()) {
                (Some((ka, _)), Some((kb, _))) => ka.cmp(kb),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => break,
            };
            match ord {
                Ordering::Less => out.extend(a.next()),
                Ordering::Greater => out.extend(b.next()),
                Ordering::Equal => {
                    out.extend(a.next());
                    b.next();
                }
            }
        }

        if drop_tombstones {
            out.retain(|(_, v)| v.is_some());
        }
        Self { id, entries: out }
    }
}

/// write buffer over a stack of layers, newest first
#[derive(Debug, Clone)]
pub struct Pyramid<K, V> {
    buffer: BTreeMap<K, Option<V>>,
    layers: Vec<Layer<K, V>>,
    buffer_limit: usize,
    next_id: u64,
}

impl<K: Ord + Clone + Display, V: Clone> Pyramid<K, V> {
    pub fn new(buffer_limit: usize) -> Self {
        Self {
            buffer: BTreeMap::new(),
            layers: Vec::new(),
            buffer_limit,
            next_id: 0,
        }
    }

    /// rebuild from persisted layers, newest first
    pub fn with_layers(buffer_limit: usize, layers: Vec<Layer<K, V>>) -> Self {
        let next_id = layers.iter().map(|l| l.id + 1).max().unwrap_or(0);
        Self {
            buffer: BTreeMap::new(),
            layers,
            buffer_limit,
            next_id,
        }
    }

    pub fn layers(&self) -> &[Layer<K, V>] {
        &self.layers
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn buffer_limit(&self) -> usize {
        self.buffer_limit
    }

    /// insert or replace; returns `true` if the write triggered a flush
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.put(key, Some(value))
    }

    /// record a deletion; returns `true` if the write triggered a flush
    pub fn remove(&mut self, key: K) -> bool {
        self.put(key, None)
    }

    fn put(&mut self, key: K, value: Option<V>) -> bool {
        self.buffer.insert(key, value);
        if self.buffer.len() > self.buffer_limit {
            self.flush();
            return true;
        }
        false
    }

    pub fn get(&self, key: &K) -> Result<&V> {
        let not_found = || Error::KeyNotFound(key.to_string());
        if let Some(entry) = self.buffer.get(key) {
            return entry.as_ref().ok_or_else(not_found);
        }
        for layer in &self.layers {
            if let Some(entry) = layer.get(key) {
                return entry.ok_or_else(not_found);
            }
        }
        Err(not_found())
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_ok()
    }

    /// turn the buffer into the newest layer and compact
    pub fn flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        let entries: Vec<_> = std::mem::take(&mut self.buffer).into_iter().collect();
        let id = self.allocate_id();
        debug!(layer = id, entries = entries.len(), "pyramid flush");
        self.layers.insert(0, Layer { id, entries });
        self.compact();
    }

    /// merge adjacent layers while a newer one outgrows the one below
    pub fn compact(&mut self) {
        while let Some(i) = (0..self.layers.len().saturating_sub(1))
            .find(|&i| self.layers[i].len() > self.layers[i + 1].len())
        {
            let older = self.layers.remove(i + 1);
            let newer = self.layers.remove(i);
            // nothing below the oldest layer can be shadowed
            let bottom = i == self.layers.len();
            let id = self.allocate_id();
            debug!(
                layer = id,
                newer = newer.id,
                older = older.id,
                drop_tombstones = bottom,
                "pyramid merge"
            );
            let merged = Layer::merge(newer, older, id, bottom);
            if !merged.is_empty() {
                self.layers.insert(i, merged);
            }
        }
    }

    /// live entries in key order, newest value per key
    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> + '_ {
        let mut view: BTreeMap<&K, Option<&V>> = BTreeMap::new();
        for (k, v) in &self.buffer {
            view.entry(k).or_insert(v.as_ref());
        }
        for layer in &self.layers {
            for (k, v) in &layer.entries {
                view.entry(k).or_insert(v.as_ref());
            }
        }
        view.into_iter().filter_map(|(k, v)| v.map(|v| (k, v)))
    }

    pub fn keys(&self) -> Vec<K> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sizes(p: &Pyramid<String, u32>) -> Vec<usize> {
        p.layers().iter().map(Layer::len).collect()
    }

    #[test]
    fn test_buffer_then_layers() {
        let mut p: Pyramid<String, u32> = Pyramid::new(2);
        assert!(!p.add("a".into(), 1));
        assert!(!p.add("b".into(), 2));
        assert_eq!(p.layers().len(), 0);
        assert_eq!(*p.get(&"a".into()).unwrap(), 1);

        assert!(p.add("c".into(), 3));
        assert_eq!(p.buffer_len(), 0);
        assert_eq!(sizes(&p), vec![3]);
        assert_eq!(*p.get(&"c".into()).unwrap(), 3);
        assert!(matches!(p.get(&"zz".into()), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_newer_value_shadows_older() {
        let mut p: Pyramid<String, u32> = Pyramid::new(0);
        p.add("k".into(), 1);
        p.add("other".into(), 0);
        p.add("k".into(), 2);
        assert_eq!(*p.get(&"k".into()).unwrap(), 2);

        p.remove("k".into());
        assert!(p.get(&"k".into()).is_err());
        assert_eq!(p.keys(), vec!["other".to_string()]);
    }

    #[test]
    fn test_compaction_merges_larger_top() {
        let mut p: Pyramid<String, u32> = Pyramid::new(1);
        // each flush writes a 2-entry layer
        p.add("a".into(), 1);
        p.add("b".into(), 1);
        assert_eq!(sizes(&p), vec![2]);
        p.add("c".into(), 1);
        p.add("d".into(), 1);
        // equal sizes stay apart
        assert_eq!(sizes(&p), vec![2, 2]);
        p.add("e".into(), 1);
        p.add("f".into(), 1);
        assert_eq!(sizes(&p), vec![2, 2, 2]);

        // a larger flush outgrows the layer below and cascades down
        let mut q: Pyramid<String, u32> = Pyramid::new(10);
        q.add("a".into(), 1);
        q.flush();
        q.add("b".into(), 1);
        q.flush();
        assert_eq!(sizes(&q), vec![1, 1]);
        q.add("c".into(), 1);
        q.add("d".into(), 1);
        q.flush();
        assert_eq!(sizes(&q), vec![4]);
    }

    #[test]
    fn test_tombstones_dropped_at_bottom() {
        let mut p: Pyramid<String, u32> = Pyramid::new(10);
        p.add("a".into(), 1);
        p.add("b".into(), 1);
        p.flush();
        p.remove("a".into());
        p.flush();
        assert_eq!(sizes(&p), vec![1, 2]);

        // [b-, c, d] absorbs [a-], then the result absorbs the bottom [a, b]
        p.remove("b".into());
        p.add("c".into(), 1);
        p.add("d".into(), 1);
        p.flush();
        assert_eq!(sizes(&p), vec![2]);
        assert_eq!(p.keys(), vec!["c", "d"]);
        let bottom = p.layers().last().unwrap();
        assert!(bottom.entries().iter().all(|(_, v)| v.is_some()));
    }

    #[test]
    fn test_all_tombstone_bottom_disappears() {
        let mut p: Pyramid<String, u32> = Pyramid::new(10);
        p.add("a".into(), 1);
        p.flush();
        p.remove("a".into());
        p.remove("b".into());
        p.flush();
        assert!(p.layers().is_empty());
        assert!(p.keys().is_empty());
    }

    #[test]
    fn test_with_layers_continues_ids() {
        let layer = Layer::from_sorted(7, vec![("a".to_string(), Some(1u32))]).unwrap();
        let mut p = Pyramid::with_layers(0, vec![layer]);
        assert_eq!(*p.get(&"a".into()).unwrap(), 1);
        p.add("b".into(), 2);
        assert!(p.layers().iter().all(|l| l.id() >= 7));
        assert!(p.layers()[0].id() > 7);
    }

    #[test]
    fn test_unsorted_layer_rejected() {
        let bad = Layer::from_sorted(0, vec![("b".to_string(), Some(1u32)), ("a".into(), None)]);
        assert!(matches!(bad, Err(Error::CorruptRecord(_))));
        let dup = Layer::from_sorted(0, vec![("a".to_string(), Some(1u32)), ("a".into(), None)]);
        assert!(dup.is_err());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(u8, u32),
        Remove(u8),
        Flush,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (0u8..32, any::<u32>()).prop_map(|(k, v)| Op::Add(k, v)),
            2 => (0u8..32).prop_map(Op::Remove),
            1 => Just(Op::Flush),
        ]
    }

    proptest! {
        #[test]
        fn prop_matches_btreemap(limit in 0usize..6, ops in prop::collection::vec(op(), 0..200)) {
            let mut p: Pyramid<String, u32> = Pyramid::new(limit);
            let mut model: BTreeMap<String, u32> = BTreeMap::new();

            for op in ops {
                match op {
                    Op::Add(k, v) => {
                        p.add(format!("k{:02}", k), v);
                        model.insert(format!("k{:02}", k), v);
                    }
                    Op::Remove(k) => {
                        p.remove(format!("k{:02}", k));
                        model.remove(&format!("k{:02}", k));
                    }
                    Op::Flush => p.flush(),
                }

                // compaction leaves every layer no larger than the one below
                for pair in p.layers().windows(2) {
                    prop_assert!(pair[0].len() <= pair[1].len());
                }
            }

            for k in 0u8..32 {
                let key = format!("k{:02}", k);
                prop_assert_eq!(p.get(&key).ok(), model.get(&key));
            }
            let live: Vec<(String, u32)> = p.iter().map(|(k, v)| (k.clone(), *v)).collect();
            let expected: Vec<(String, u32)> = model.into_iter().collect();
            prop_assert_eq!(live, expected);
        }
    }
}
