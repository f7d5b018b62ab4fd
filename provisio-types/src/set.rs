//! Hash-identity Set.
//!
//! Elements are keyed by an integer hash code computed by the field's hash
//! function. Membership and equality only look at hash codes, so two sets
//! built from the same values in any order are equal. Iteration is always in
//! ascending hash-code order, never insertion order.
//!
//! The hash code is also the element's index in the flat attribute map
//! (`ports.80`), which makes the hash function part of the persisted format:
//! it must be injective over the values it is declared for.

use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Maps an element to its hash code.
pub type SetHashFn = Arc<dyn Fn(&Value) -> i64 + Send + Sync>;

/// An unordered collection of values identified by hash code.
#[derive(Clone)]
pub struct Set {
    hash: SetHashFn,
    items: BTreeMap<i64, Value>,
}

impl Set {
    /// Creates an empty set using the given hash function.
    #[must_use]
    pub fn new(hash: SetHashFn) -> Self {
        Self {
            hash,
            items: BTreeMap::new(),
        }
    }

    /// Creates a set from values; duplicates collapse.
    pub fn from_values<I>(hash: SetHashFn, values: I) -> Self
    where
        I: IntoIterator<Item = Value>,
    {
        let mut set = Self::new(hash);
        for value in values {
            set.add(value);
        }
        set
    }

    /// Returns the hash code this set would assign to `value`.
    #[must_use]
    pub fn hash_code(&self, value: &Value) -> i64 {
        (self.hash)(value)
    }

    /// Returns the hash function of this set.
    #[must_use]
    pub fn hash_fn(&self) -> SetHashFn {
        Arc::clone(&self.hash)
    }

    /// Adds a value and returns its hash code.
    ///
    /// Adding a value whose code is already present keeps the first value.
    pub fn add(&mut self, value: Value) -> i64 {
        let code = self.hash_code(&value);
        self.items.entry(code).or_insert(value);
        code
    }

    /// Removes a value. Returns true if it was present.
    pub fn remove(&mut self, value: &Value) -> bool {
        let code = self.hash_code(value);
        self.items.remove(&code).is_some()
    }

    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.items.contains_key(&self.hash_code(value))
    }

    #[must_use]
    pub fn contains_code(&self, code: i64) -> bool {
        self.items.contains_key(&code)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the element stored under a hash code.
    #[must_use]
    pub fn get(&self, code: i64) -> Option<&Value> {
        self.items.get(&code)
    }

    /// Returns the element at a position in hash-code order.
    #[must_use]
    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.items.values().nth(index)
    }

    /// Returns the hash code at a position in hash-code order.
    #[must_use]
    pub fn code_at(&self, index: usize) -> Option<i64> {
        self.items.keys().nth(index).copied()
    }

    /// Elements in ascending hash-code order.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        self.items.values().cloned().collect()
    }

    /// Hash codes in ascending order.
    #[must_use]
    pub fn codes(&self) -> Vec<i64> {
        self.items.keys().copied().collect()
    }

    /// Iterates elements in ascending hash-code order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.values()
    }

    /// Iterates `(code, element)` pairs in ascending hash-code order.
    pub fn entries(&self) -> impl Iterator<Item = (i64, &Value)> {
        self.items.iter().map(|(code, value)| (*code, value))
    }

    /// Elements of `self` whose code is not in `other`.
    #[must_use]
    pub fn difference(&self, other: &Self) -> Self {
        self.filtered(|code| !other.contains_code(code))
    }

    /// Elements of `self` whose code is also in `other`.
    #[must_use]
    pub fn intersection(&self, other: &Self) -> Self {
        self.filtered(|code| other.contains_code(code))
    }

    /// Elements of either set; `self` wins on shared codes.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let mut result = self.clone();
        for (code, value) in &other.items {
            result.items.entry(*code).or_insert_with(|| value.clone());
        }
        result
    }

    fn filtered(&self, keep: impl Fn(i64) -> bool) -> Self {
        Self {
            hash: Arc::clone(&self.hash),
            items: self
                .items
                .iter()
                .filter(|(code, _)| keep(**code))
                .map(|(code, value)| (*code, value.clone()))
                .collect(),
        }
    }
}

impl PartialEq for Set {
    fn eq(&self, other: &Self) -> bool {
        self.items.keys().eq(other.items.keys())
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.items.iter()).finish()
    }
}
