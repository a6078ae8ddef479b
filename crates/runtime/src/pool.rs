//! The VM's value-slot pool (spec §3 "Value: ...pooled; live while
//! referenced by stack, frame, or a container", §9 "Free-list of value
//! slots").
//!
//! Every named variable (local, global, or static) occupies a slot here,
//! identified by a [`RefSlot`]. This is what makes reference assignment
//! (`$b =& $a`) cheap and correct: aliasing two variables means binding both
//! names to the same `RefSlot` in their symbol tables, not copying data
//! (spec §4.4 "Reference assignment makes the target's slot-index equal to
//! the source's"). Array entries that are themselves references use
//! `Value::Reference(slot)` to point back into this same pool.

use quill_core::{RefSlot, Value};

#[derive(Debug, Default)]
pub struct ValuePool {
    slots: Vec<Value>,
    free: Vec<u32>,
}

impl ValuePool {
    pub fn new() -> Self {
        ValuePool { slots: Vec::new(), free: Vec::new() }
    }

    /// Allocate a new slot holding `value`, reusing a freed slot if one is
    /// available (spec invariant: "values on the free list are not
    /// referenced elsewhere").
    pub fn alloc(&mut self, value: Value) -> RefSlot {
        if let Some(idx) = self.free.pop() {
            self.slots[idx as usize] = value;
            RefSlot(idx)
        } else {
            self.slots.push(value);
            RefSlot((self.slots.len() - 1) as u32)
        }
    }

    /// Release a slot back to the free list. Callers must guarantee nothing
    /// else still names this slot.
    pub fn free(&mut self, slot: RefSlot) {
        self.slots[slot.0 as usize] = Value::Null;
        self.free.push(slot.0);
    }

    pub fn get(&self, slot: RefSlot) -> &Value {
        &self.slots[slot.0 as usize]
    }

    pub fn set(&mut self, slot: RefSlot, value: Value) {
        self.slots[slot.0 as usize] = value;
    }

    /// Follow a chain of `Value::Reference` indirections (used when an
    /// array entry, rather than a variable binding, is itself a reference)
    /// down to the concrete value.
    pub fn resolve(&self, slot: RefSlot) -> &Value {
        let mut current = slot;
        loop {
            match &self.slots[current.0 as usize] {
                Value::Reference(target) => current = *target,
                other => return other,
            }
        }
    }

    pub fn resolve_slot(&self, slot: RefSlot) -> RefSlot {
        let mut current = slot;
        while let Value::Reference(target) = &self.slots[current.0 as usize] {
            current = *target;
        }
        current
    }

    pub fn live_slots(&self) -> usize {
        self.slots.len() - self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_slots_are_reused() {
        let mut pool = ValuePool::new();
        let a = pool.alloc(Value::Int(1));
        pool.free(a);
        let b = pool.alloc(Value::Int(2));
        assert_eq!(a, b);
    }

    #[test]
    fn reference_chains_resolve_to_concrete_value() {
        let mut pool = ValuePool::new();
        let target = pool.alloc(Value::Int(42));
        let alias = pool.alloc(Value::Reference(target));
        match pool.resolve(alias) {
            Value::Int(42) => {}
            other => panic!("expected Int(42), got {other:?}"),
        }
    }
}
