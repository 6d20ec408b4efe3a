// Row containers that journal writes made by the open transaction
//
// `Table` remembers the committed value of every key a transaction touches,
// so a rollback restores only those rows and a commit reports only those keys
// to a persisting backend. `Journal` is the append-only counterpart used for
// archived records.

use std::collections::BTreeMap;
use std::ops::{Deref, Range};

#[derive(Debug, Clone, PartialEq)]
pub struct Table<K: Ord, V> {
    rows: BTreeMap<K, V>,
    undo: BTreeMap<K, Option<V>>,
}

impl<K: Ord, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            undo: BTreeMap::new(),
        }
    }
}

impl<K: Ord, V> Deref for Table<K, V> {
    type Target = BTreeMap<K, V>;

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

impl<K: Ord + Clone, V: Clone> Table<K, V> {
    fn remember(&mut self, key: &K) {
        if !self.undo.contains_key(key) {
            self.undo.insert(key.clone(), self.rows.get(key).cloned());
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        self.remember(&key);
        self.rows.insert(key, value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        if !self.rows.contains_key(key) {
            return None;
        }
        self.remember(key);
        self.rows.remove(key)
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        if !self.rows.contains_key(key) {
            return None;
        }
        self.remember(key);
        self.rows.get_mut(key)
    }

    /// Apply `update` to every row matching `filter`, returning the updated rows
    pub fn update_where<P, F>(&mut self, filter: P, mut update: F) -> Vec<V>
    where
        P: Fn(&V) -> bool,
        F: FnMut(&mut V),
    {
        let keys: Vec<K> = self
            .rows
            .iter()
            .filter(|(_, value)| filter(*value))
            .map(|(key, _)| key.clone())
            .collect();
        let mut updated = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(value) = self.get_mut(&key) {
                update(value);
                updated.push(value.clone());
            }
        }
        updated
    }

    /// Keys written since the last commit or rollback
    pub fn touched(&self) -> impl Iterator<Item = &K> {
        self.undo.keys()
    }

    pub(crate) fn commit(&mut self) {
        self.undo.clear();
    }

    pub(crate) fn rollback(&mut self) {
        for (key, previous) in std::mem::take(&mut self.undo) {
            match previous {
                Some(value) => {
                    self.rows.insert(key, value);
                }
                None => {
                    self.rows.remove(&key);
                }
            }
        }
    }
}

impl<K: Ord, V> FromIterator<(K, V)> for Table<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().collect(),
            undo: BTreeMap::new(),
        }
    }
}

/// Append-only rows; a rollback truncates to the last commit
#[derive(Debug, Clone, PartialEq)]
pub struct Journal<T> {
    rows: Vec<T>,
    committed: usize,
}

impl<T> Default for Journal<T> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            committed: 0,
        }
    }
}

impl<T> Deref for Journal<T> {
    type Target = [T];

    fn deref(&self) -> &Self::Target {
        &self.rows
    }
}

impl<T> Journal<T> {
    pub fn push(&mut self, row: T) {
        self.rows.push(row);
    }

    /// Indices appended since the last commit
    pub fn appended(&self) -> Range<usize> {
        self.committed..self.rows.len()
    }

    pub(crate) fn commit(&mut self) {
        self.committed = self.rows.len();
    }

    pub(crate) fn rollback(&mut self) {
        self.rows.truncate(self.committed);
    }
}

impl<T> FromIterator<T> for Journal<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let rows: Vec<T> = iter.into_iter().collect();
        let committed = rows.len();
        Self { rows, committed }
    }
}
