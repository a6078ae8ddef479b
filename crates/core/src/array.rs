//! The language's "array" type: an insertion-ordered hashmap keyed by either
//! an integer or a byte string (spec §4.6 "Hashmap (ordered map / 'array')").
//!
//! Backed by [`indexmap::IndexMap`], which already gives us insertion-order
//! iteration and O(1) lookup — exactly the two properties spec §4.6 and §8
//! property 5 require — so the node/bucket bookkeeping the reference
//! implementation hand-rolls collapses into a thin wrapper that adds
//! PHP-family semantics on top: canonical-integer key normalization,
//! auto-indexing, and a stateful iteration cursor.

use crate::value::Value;
use indexmap::IndexMap;

/// A hashmap key: either an integer or a string. String keys that parse as
/// canonical integers (no leading zeros, no leading `+`, fits in i64) are
/// normalized to `Int` at insertion time (spec §4.6 "string keys that parse
/// as canonical integers are normalized to int64 keys").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(String),
}

impl ArrayKey {
    pub fn from_value(v: &Value) -> ArrayKey {
        match v {
            Value::Int(n) => ArrayKey::Int(*n),
            Value::Str(s) => ArrayKey::normalize_str(s),
            Value::Bool(b) => ArrayKey::Int(*b as i64),
            Value::Real(f) => ArrayKey::Int(*f as i64),
            Value::Null => ArrayKey::Str(String::new()),
            _ => ArrayKey::Str(v.to_display_string()),
        }
    }

    pub fn normalize_str(s: &str) -> ArrayKey {
        if is_canonical_int(s) {
            if let Ok(n) = s.parse::<i64>() {
                return ArrayKey::Int(n);
            }
        }
        ArrayKey::Str(s.to_string())
    }

    pub fn to_value(&self) -> Value {
        match self {
            ArrayKey::Int(n) => Value::Int(*n),
            ArrayKey::Str(s) => Value::str(s.clone()),
        }
    }
}

/// "0", "-1", "42" are canonical; "01", "+1", "" , "1.0" are not (they stay
/// string keys, matching the reference implementation's key-canonicalization
/// rule).
fn is_canonical_int(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    let bytes = s.as_bytes();
    let (sign, digits) = if bytes[0] == b'-' { (true, &bytes[1..]) } else { (false, bytes) };
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return false;
    }
    if digits.len() > 1 && digits[0] == b'0' {
        return false;
    }
    if sign && digits == b"0" {
        return false; // "-0" is not canonical
    }
    true
}

/// The insertion-ordered "array" value.
#[derive(Debug, Default)]
pub struct OrderedArray {
    entries: IndexMap<ArrayKey, Value>,
    next_auto_index: i64,
    /// Current iteration position; `None` once the cursor is exhausted.
    cursor: Option<usize>,
}

impl OrderedArray {
    pub fn new() -> Self {
        OrderedArray { entries: IndexMap::new(), next_auto_index: 0, cursor: None }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert (or overwrite) at an explicit key.
    pub fn set(&mut self, key: ArrayKey, value: Value) {
        if let ArrayKey::Int(n) = &key {
            if *n >= self.next_auto_index {
                self.next_auto_index = n + 1;
            }
        }
        let was_absent = !self.entries.contains_key(&key);
        self.entries.insert(key, value);
        if was_absent && self.cursor.is_none() && self.entries.len() == 1 {
            self.cursor = Some(0);
        }
    }

    /// Append without a key, using the auto-index counter (spec §4.6
    /// "Auto-index: appending without a key uses a monotonically increasing
    /// counter seeded from `max(existing_int_keys) + 1`").
    pub fn push(&mut self, value: Value) -> i64 {
        let key = self.next_auto_index;
        self.set(ArrayKey::Int(key), value);
        key
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &ArrayKey) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Remove an entry, preserving insertion order of the remainder. If the
    /// removed entry was at the cursor, the cursor now points at the entry
    /// that shifted into its place — i.e. the next entry (spec §8 property
    /// 5b: "after deleting the current entry the cursor advances to the next
    /// entry or becomes exhausted").
    pub fn remove(&mut self, key: &ArrayKey) -> Option<Value> {
        let idx = self.entries.get_index_of(key)?;
        let (_, value) = self.entries.shift_remove_full(key).map(|(_, k, v)| (k, v))?;
        if let Some(cursor) = self.cursor {
            if cursor > idx {
                self.cursor = Some(cursor - 1);
            } else if cursor == idx && cursor >= self.entries.len() {
                self.cursor = None;
            }
            // cursor < idx, or cursor == idx with a valid shifted-in entry:
            // cursor stays put, now pointing at the next logical entry.
        }
        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArrayKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    // --- cursor-driven iteration (spec §4.6 "Cursor") ---

    pub fn reset(&mut self) -> Option<(&ArrayKey, &Value)> {
        self.cursor = if self.entries.is_empty() { None } else { Some(0) };
        self.current()
    }

    pub fn current(&self) -> Option<(&ArrayKey, &Value)> {
        self.cursor.and_then(|i| self.entries.get_index(i))
    }

    pub fn next_cursor(&mut self) -> Option<(&ArrayKey, &Value)> {
        let cursor = self.cursor?;
        let next = cursor + 1;
        self.cursor = if next < self.entries.len() { Some(next) } else { None };
        self.cursor.and_then(|i| self.entries.get_index(i))
    }

    pub fn cursor_valid(&self) -> bool {
        self.cursor.is_some()
    }

    pub fn deep_clone(&self) -> OrderedArray {
        let entries = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_copy()))
            .collect();
        OrderedArray { entries, next_auto_index: self.next_auto_index, cursor: self.cursor }
    }

    pub fn loose_eq(&self, other: &OrderedArray) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries.iter().all(|(k, v)| other.entries.get(k).is_some_and(|ov| v.loose_eq(ov)))
    }

    pub fn strict_eq(&self, other: &OrderedArray) -> bool {
        if self.entries.len() != other.entries.len() {
            return false;
        }
        self.entries
            .iter()
            .zip(other.entries.iter())
            .all(|((k1, v1), (k2, v2))| k1 == k2 && v1.strict_eq(v2))
    }

    /// `+` over two arrays: union, right entries filled only for keys
    /// missing from the left (spec §4.4 "Arithmetic... `+` over two ordered
    /// maps returns their union").
    pub fn union(&self, other: &OrderedArray) -> OrderedArray {
        let mut result = self.deep_clone();
        for (k, v) in other.entries.iter() {
            if !result.entries.contains_key(k) {
                result.set(k.clone(), v.deep_copy());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_preserved() {
        let mut a = OrderedArray::new();
        a.set(ArrayKey::Str("x".into()), Value::Int(1));
        a.set(ArrayKey::Str("y".into()), Value::Int(2));
        a.set(ArrayKey::Int(10), Value::Int(3));
        let collected: Vec<_> = a.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(
            collected,
            vec![ArrayKey::Str("x".into()), ArrayKey::Str("y".into()), ArrayKey::Int(10)]
        );
    }

    #[test]
    fn auto_index_seeds_from_max_existing_int_key() {
        let mut a = OrderedArray::new();
        a.set(ArrayKey::Int(5), Value::Int(0));
        assert_eq!(a.push(Value::Int(1)), 6);
        let mut b = OrderedArray::new();
        assert_eq!(b.push(Value::Int(1)), 0);
    }

    #[test]
    fn cursor_advances_past_deleted_current_entry() {
        let mut a = OrderedArray::new();
        a.push(Value::Int(1));
        a.push(Value::Int(2));
        a.push(Value::Int(3));
        a.reset();
        assert_eq!(a.current().unwrap().1.to_int(), 1);
        a.remove(&ArrayKey::Int(0));
        assert_eq!(a.current().unwrap().1.to_int(), 2);
    }

    #[test]
    fn cursor_exhausts_after_deleting_last_current_entry() {
        let mut a = OrderedArray::new();
        a.push(Value::Int(1));
        a.reset();
        a.remove(&ArrayKey::Int(0));
        assert!(!a.cursor_valid());
    }

    #[test]
    fn string_keys_normalize_canonical_integers() {
        assert_eq!(ArrayKey::normalize_str("42"), ArrayKey::Int(42));
        assert_eq!(ArrayKey::normalize_str("-3"), ArrayKey::Int(-3));
        assert_eq!(ArrayKey::normalize_str("01"), ArrayKey::Str("01".into()));
        assert_eq!(ArrayKey::normalize_str("+1"), ArrayKey::Str("+1".into()));
    }

    #[test]
    fn union_fills_only_missing_keys_from_right() {
        let mut left = OrderedArray::new();
        left.set(ArrayKey::Str("a".into()), Value::Int(1));
        let mut right = OrderedArray::new();
        right.set(ArrayKey::Str("a".into()), Value::Int(99));
        right.set(ArrayKey::Str("b".into()), Value::Int(2));
        let merged = left.union(&right);
        assert_eq!(merged.get(&ArrayKey::Str("a".into())).unwrap().to_int(), 1);
        assert_eq!(merged.get(&ArrayKey::Str("b".into())).unwrap().to_int(), 2);
    }
}
