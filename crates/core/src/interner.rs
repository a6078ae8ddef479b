//! String interning table (spec §4.3 "Constants": "identical string constants
//! share one slot").
//!
//! Used by the compiler to dedupe string literals against the constant pool,
//! and reused by the runtime to intern class names, method names, and
//! host-function names so identity comparisons (`IS_A`, method dispatch) can
//! compare small integers instead of doing a string compare on every call.

use indexmap::IndexSet;

/// Opaque handle into a [`StringInterner`]. Cheap to copy, comparable in O(1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InternedStr(u32);

/// Insertion-ordered string interner.
///
/// Backed by an [`IndexSet`] so that, in addition to O(1) dedupe-on-insert,
/// ids are stable and dense (0..len), which is what the compiler wants for
/// constant-pool slot indices.
#[derive(Debug, Default, Clone)]
pub struct StringInterner {
    set: IndexSet<String>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner { set: IndexSet::new() }
    }

    /// Intern `s`, returning the existing handle if already present.
    pub fn intern(&mut self, s: &str) -> InternedStr {
        if let Some(idx) = self.set.get_index_of(s) {
            return InternedStr(idx as u32);
        }
        let (idx, _) = self.set.insert_full(s.to_string());
        InternedStr(idx as u32)
    }

    pub fn resolve(&self, id: InternedStr) -> Option<&str> {
        self.set.get_index(id.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_dedupes() {
        let mut interner = StringInterner::new();
        let a = interner.intern("hello");
        let b = interner.intern("world");
        let c = interner.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(a), Some("hello"));
        assert_eq!(interner.len(), 2);
    }
}
