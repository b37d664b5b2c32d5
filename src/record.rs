//! Order-preserving string-keyed record.

use std::ops::Index;

use crate::value::Value;

/// An associative map of string keys to [`Value`]s.
///
/// Key order is preserved exactly as inserted (and as received from the
/// wire); the engine renders records in that order, so re-encoding must
/// not shuffle them.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Record {
    items: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Record::default()
    }

    pub fn with_capacity(cap: usize) -> Self {
        Record {
            items: Vec::with_capacity(cap),
        }
    }

    /// Insert a value, replacing (in place) the value of an existing key.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.items.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.items.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.items.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.items.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.items.iter().map(|(_, v)| v)
    }
}

impl Index<&str> for Record {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.get(key)
            .unwrap_or_else(|| panic!("no record field {key:?}"))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut rec = Record::new();
        for (k, v) in iter {
            rec.insert(k, v);
        }
        rec
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

#[macro_export]
/// Build a [`Record`] from `key => value` pairs.
///
/// ```
/// use nuplug::{record, Value};
/// let r = record! {
///     "name" => Value::string("inc"),
///     "count" => Value::int(3),
/// };
/// assert_eq!(r.len(), 2);
/// ```
macro_rules! record {
    () => { $crate::Record::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut rec = $crate::Record::new();
        $(rec.insert($key, $value);)+
        rec
    }};
}
