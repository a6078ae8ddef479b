//! Runtime iteration state for `FOREACH_INIT`/`FOREACH_STEP` (spec §4.3
//! "foreach").
//!
//! Deliberately not the array's own cursor (`OrderedArray::reset`/`current`):
//! a script can `foreach` the same array twice (nested loops, or a function
//! called from within a loop over a shared array) and each loop needs its own
//! independent position.

use quill_core::{ArrayKey, ArrayHandle, RefSlot};

pub struct ForeachState {
    pub array: ArrayHandle,
    pub position: usize,
    pub by_ref: bool,
    /// The slot bound to `value_var` on the previous step, when `by_ref` is
    /// set, together with the key it came from — written back into the
    /// array right before the next step reads, so mutations the loop body
    /// makes through `value_var` are visible in the source array.
    pub last_bound: Option<(ArrayKey, RefSlot)>,
}

impl ForeachState {
    pub fn new(array: ArrayHandle, by_ref: bool) -> Self {
        ForeachState { array, position: 0, by_ref, last_bound: None }
    }

    pub fn len(&self) -> usize {
        self.array.borrow().len()
    }

    pub fn exhausted(&self) -> bool {
        self.position >= self.len()
    }

    pub fn advance(&mut self) {
        self.position += 1;
    }
}
