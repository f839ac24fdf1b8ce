//! Nested dictionaries, mergeable counters, and species-keyed quantity maps.
//!
//! The engine moves data around as nested string-keyed dictionaries with
//! quantity leaves. [`Nested`] is that structure; flattening uses `/` as the
//! path separator and is deterministic (sorted keys). [`MCounter`] is the
//! sparse counter used for element bookkeeping, and [`QuantityDict`] carries
//! species-keyed quantities with element-wise arithmetic where absent keys
//! act as zero.

use std::collections::BTreeMap;
use std::ops::{Add, Mul, Sub};

use serde_json::Value;

use crate::error::QuantityError;
use crate::quantity::{qsum, qvertcat, QResult, Quantity};

/// Path separator used by all flattening operations.
pub const SEPARATOR: char = '/';

/// A nested string-keyed dictionary with leaves of type `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Nested<T> {
    Leaf(T),
    Map(BTreeMap<String, Nested<T>>),
}

impl<T> Default for Nested<T> {
    fn default() -> Self {
        Nested::Map(BTreeMap::new())
    }
}

impl<T> Nested<T> {
    pub fn empty() -> Self {
        Nested::default()
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Nested<T>>> {
        match self {
            Nested::Map(map) => Some(map),
            Nested::Leaf(_) => None,
        }
    }

    pub fn as_leaf(&self) -> Option<&T> {
        match self {
            Nested::Leaf(leaf) => Some(leaf),
            Nested::Map(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Nested::Leaf(_) => false,
            Nested::Map(map) => map.values().all(Nested::is_empty),
        }
    }

    /// Navigate along a key path.
    pub fn get(&self, path: &[&str]) -> Option<&Nested<T>> {
        let mut node = self;
        for key in path {
            node = node.as_map()?.get(*key)?;
        }
        Some(node)
    }

    /// Insert a leaf, creating intermediate maps along the path.
    pub fn insert(&mut self, path: &[&str], leaf: T) {
        assert!(!path.is_empty(), "empty insertion path");
        match self {
            Nested::Leaf(_) => panic!("cannot descend into a leaf"),
            Nested::Map(map) => {
                if path.len() == 1 {
                    map.insert(path[0].to_string(), Nested::Leaf(leaf));
                } else {
                    map.entry(path[0].to_string())
                        .or_default()
                        .insert(&path[1..], leaf);
                }
            }
        }
    }

    /// Map all leaves, keeping the structure.
    pub fn map_leaves<U>(&self, f: &mut impl FnMut(&[&str], &T) -> U) -> Nested<U> {
        fn walk<'t, T, U>(
            node: &'t Nested<T>,
            path: &mut Vec<&'t str>,
            f: &mut impl FnMut(&[&str], &T) -> U,
        ) -> Nested<U> {
            match node {
                Nested::Leaf(leaf) => Nested::Leaf(f(path, leaf)),
                Nested::Map(map) => Nested::Map(
                    map.iter()
                        .map(|(key, value)| {
                            path.push(key);
                            let mapped = walk(value, path, f);
                            path.pop();
                            (key.clone(), mapped)
                        })
                        .collect(),
                ),
            }
        }
        walk(self, &mut Vec::new(), f)
    }

    /// Map all leaves fallibly, keeping the structure.
    pub fn try_map_leaves<U, E>(
        &self,
        f: &mut impl FnMut(&[&str], &T) -> Result<U, E>,
    ) -> Result<Nested<U>, E> {
        fn walk<'t, T, U, E>(
            node: &'t Nested<T>,
            path: &mut Vec<&'t str>,
            f: &mut impl FnMut(&[&str], &T) -> Result<U, E>,
        ) -> Result<Nested<U>, E> {
            match node {
                Nested::Leaf(leaf) => Ok(Nested::Leaf(f(path, leaf)?)),
                Nested::Map(map) => {
                    let mut result = BTreeMap::new();
                    for (key, value) in map {
                        path.push(key);
                        let mapped = walk(value, path, f);
                        path.pop();
                        result.insert(key.clone(), mapped?);
                    }
                    Ok(Nested::Map(result))
                }
            }
        }
        walk(self, &mut Vec::new(), f)
    }
}

impl<T: Clone> Nested<T> {
    /// Flatten into `(path, leaf)` pairs with `/`-joined keys, in
    /// deterministic (sorted) order.
    pub fn flatten(&self) -> Vec<(String, T)> {
        let mut result = Vec::new();
        fn walk<T: Clone>(node: &Nested<T>, prefix: &str, out: &mut Vec<(String, T)>) {
            match node {
                Nested::Leaf(leaf) => out.push((prefix.to_string(), leaf.clone())),
                Nested::Map(map) => {
                    for (key, value) in map {
                        let path = if prefix.is_empty() {
                            key.clone()
                        } else {
                            format!("{prefix}{SEPARATOR}{key}")
                        };
                        walk(value, &path, out);
                    }
                }
            }
        }
        walk(self, "", &mut result);
        result
    }

    /// Rebuild a nested dictionary from `/`-joined flat keys.
    pub fn unflatten(flat: impl IntoIterator<Item = (String, T)>) -> Nested<T> {
        let mut root = Nested::empty();
        for (path, leaf) in flat {
            let keys: Vec<&str> = path.split(SEPARATOR).collect();
            root.insert(&keys, leaf);
        }
        root
    }
}

/// Nested dictionary of quantities, the lingua franca of the engine.
pub type NestedQuantity = Nested<Quantity>;

/// Parse string leaves such as `"25 degC"` in a JSON-like structure into
/// quantities. Numeric leaves become dimensionless quantities.
pub fn parse_quantities_in_struct(value: &Value) -> Result<NestedQuantity, QuantityError> {
    match value {
        Value::String(text) => Ok(Nested::Leaf(Quantity::parse(text)?)),
        Value::Number(number) => {
            let v = number
                .as_f64()
                .ok_or_else(|| QuantityError::QuantityParse(number.to_string()))?;
            Ok(Nested::Leaf(Quantity::dimensionless(v)))
        }
        Value::Object(map) => {
            let mut result = BTreeMap::new();
            for (key, item) in map {
                result.insert(key.clone(), parse_quantities_in_struct(item)?);
            }
            Ok(Nested::Map(result))
        }
        other => Err(QuantityError::QuantityParse(other.to_string())),
    }
}

/// A mergeable sparse counter over string keys.
///
/// Supports addition, integer scaling, and a dot product against a
/// [`QuantityDict`]; absent keys act as structural zeros, which keeps
/// symbolic balance assembly free of dense intermediates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MCounter {
    counts: BTreeMap<String, i64>,
}

impl MCounter {
    pub fn new() -> MCounter {
        MCounter::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, i64)>) -> MCounter {
        let mut counter = MCounter::new();
        for (key, count) in pairs {
            counter.insert(key, count);
        }
        counter
    }

    pub fn insert(&mut self, key: impl Into<String>, count: i64) {
        let key = key.into();
        let total = self.counts.get(&key).copied().unwrap_or(0) + count;
        if total == 0 {
            self.counts.remove(&key);
        } else {
            self.counts.insert(key, total);
        }
    }

    pub fn get(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.counts.iter().map(|(k, &v)| (k.as_str(), v))
    }

    /// Dot product against species-keyed quantities; keys missing on either
    /// side contribute nothing.
    pub fn dot(&self, quantities: &QuantityDict) -> Option<QResult> {
        let mut total: Option<QResult> = None;
        for (key, count) in &self.counts {
            if let Some(q) = quantities.get(key) {
                let term = q * *count as f64;
                total = Some(match total {
                    None => term,
                    Some(sum) => match (sum, term) {
                        (Ok(a), Ok(b)) => &a + &b,
                        (Err(e), _) => Err(e),
                        (_, Err(e)) => Err(e),
                    },
                });
            }
        }
        total
    }
}

impl Add for &MCounter {
    type Output = MCounter;
    fn add(self, rhs: &MCounter) -> MCounter {
        let mut result = self.clone();
        for (key, count) in &rhs.counts {
            result.insert(key.clone(), *count);
        }
        result
    }
}

impl Add for MCounter {
    type Output = MCounter;
    fn add(self, rhs: MCounter) -> MCounter {
        &self + &rhs
    }
}

impl Mul<i64> for &MCounter {
    type Output = MCounter;
    fn mul(self, factor: i64) -> MCounter {
        MCounter {
            counts: if factor == 0 {
                BTreeMap::new()
            } else {
                self.counts
                    .iter()
                    .map(|(k, &v)| (k.clone(), v * factor))
                    .collect()
            },
        }
    }
}

impl Mul<&MCounter> for i64 {
    type Output = MCounter;
    fn mul(self, counter: &MCounter) -> MCounter {
        counter * self
    }
}

/// Species-keyed quantities sharing one dimension.
///
/// Element-wise `+`/`-` treat absent keys as zero; the result key set is
/// the union of the operands.
#[derive(Debug, Clone, Default)]
pub struct QuantityDict {
    entries: BTreeMap<String, Quantity>,
}

impl QuantityDict {
    pub fn new() -> QuantityDict {
        QuantityDict::default()
    }

    /// Split a vector quantity into per-key scalar entries.
    pub fn from_vector_quantity(quantity: &Quantity, keys: &[String]) -> QuantityDict {
        assert_eq!(quantity.len(), keys.len(), "key count mismatch");
        QuantityDict {
            entries: keys
                .iter()
                .enumerate()
                .map(|(i, key)| (key.clone(), quantity.element(i)))
                .collect(),
        }
    }

    /// Concatenate the entries for the given keys back into one vector.
    pub fn to_vector(&self, keys: &[String]) -> QResult {
        let mut parts = Vec::with_capacity(keys.len());
        for key in keys {
            let q = self.entries.get(key).ok_or_else(|| {
                QuantityError::QuantityParse(format!("missing species '{key}'"))
            })?;
            parts.push(q.clone());
        }
        qvertcat(&parts)
    }

    pub fn insert(&mut self, key: impl Into<String>, quantity: Quantity) {
        self.entries.insert(key.into(), quantity);
    }

    pub fn get(&self, key: &str) -> Option<&Quantity> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Quantity)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Sum over all entries; `None` for an empty dictionary.
    pub fn total(&self) -> Option<Quantity> {
        let parts: Vec<Quantity> = self.entries.values().cloned().collect();
        qvertcat(&parts).ok().map(|v| qsum(&v))
    }

    fn merge(&self, other: &QuantityDict, negate: bool) -> Result<QuantityDict, QuantityError> {
        let mut entries = self.entries.clone();
        for (key, value) in &other.entries {
            let value = if negate { -value } else { value.clone() };
            match entries.remove(key) {
                Some(existing) => {
                    entries.insert(key.clone(), (existing + value)?);
                }
                None => {
                    entries.insert(key.clone(), value);
                }
            }
        }
        Ok(QuantityDict { entries })
    }
}

impl Add for &QuantityDict {
    type Output = Result<QuantityDict, QuantityError>;
    fn add(self, rhs: &QuantityDict) -> Self::Output {
        self.merge(rhs, false)
    }
}

impl Sub for &QuantityDict {
    type Output = Result<QuantityDict, QuantityError>;
    fn sub(self, rhs: &QuantityDict) -> Self::Output {
        self.merge(rhs, true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flatten_round_trip() {
        let mut nested: Nested<i32> = Nested::empty();
        nested.insert(&["a", "b"], 1);
        nested.insert(&["a", "c"], 2);
        nested.insert(&["d"], 3);
        let flat = nested.flatten();
        assert_eq!(
            flat,
            vec![
                ("a/b".to_string(), 1),
                ("a/c".to_string(), 2),
                ("d".to_string(), 3)
            ]
        );
        assert_eq!(Nested::unflatten(flat), nested);
    }

    #[test]
    fn flatten_order_is_deterministic() {
        let mut a: Nested<i32> = Nested::empty();
        a.insert(&["z"], 1);
        a.insert(&["a"], 2);
        let keys: Vec<String> = a.flatten().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "z"]);
    }

    #[test]
    fn mcounter_algebra() {
        let a = MCounter::from_pairs([("a".to_string(), 1)]);
        let b = MCounter::from_pairs([("b".to_string(), 1)]);
        let combined = &a + &(2 * &b);
        assert_eq!(combined.get("a"), 1);
        assert_eq!(combined.get("b"), 2);
        assert_eq!(combined.get("c"), 0);
        // cancelling entries vanish structurally
        let cancelled = &a + &(-1 * &a);
        assert!(cancelled.is_empty());
    }

    #[test]
    fn mcounter_dot_product() {
        let counter = MCounter::from_pairs([("H".to_string(), 2), ("O".to_string(), 1)]);
        let mut dict = QuantityDict::new();
        dict.insert("H", Quantity::new(1.0, "mol/s").unwrap());
        dict.insert("O", Quantity::new(3.0, "mol/s").unwrap());
        dict.insert("N", Quantity::new(9.0, "mol/s").unwrap());
        let dot = counter.dot(&dict).unwrap().unwrap();
        assert!((dot.value_si().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn quantity_dict_union_arithmetic() {
        let mut a = QuantityDict::new();
        a.insert("A", Quantity::new(1.0, "m").unwrap());
        a.insert("B", Quantity::new(50.0, "cm").unwrap());
        let mut b = QuantityDict::new();
        b.insert("B", Quantity::new(1.0, "m").unwrap());
        b.insert("C", Quantity::new(50.0, "cm").unwrap());
        let sum = (&a + &b).unwrap();
        assert_eq!(sum.len(), 3);
        assert!((sum.get("B").unwrap().value_si().unwrap() - 1.5).abs() < 1e-12);
        assert!((sum.get("A").unwrap().value_si().unwrap() - 1.0).abs() < 1e-12);
        let diff = (&a - &b).unwrap();
        assert!((diff.get("C").unwrap().value_si().unwrap() + 0.5).abs() < 1e-12);
    }

    #[test]
    fn parse_struct_with_quantity_leaves() {
        let value = json!({
            "H0S0ReferenceState": {
                "dh_form": {"H2O": "-241.826 kJ/mol"},
                "T_ref": "25 degC"
            }
        });
        let parsed = parse_quantities_in_struct(&value).unwrap();
        let leaf = parsed
            .get(&["H0S0ReferenceState", "dh_form", "H2O"])
            .unwrap()
            .as_leaf()
            .unwrap();
        assert!((leaf.value_si().unwrap() + 241_826.0).abs() < 1e-9);
    }

    #[test]
    fn vector_quantity_round_trip() {
        let keys = vec!["CH4".to_string(), "H2O".to_string()];
        let n = Quantity::vector(&[1.0, 2.0], "mol").unwrap();
        let dict = QuantityDict::from_vector_quantity(&n, &keys);
        let back = dict.to_vector(&keys).unwrap();
        assert_eq!(back.values_si().unwrap(), vec![1.0, 2.0]);
    }
}
