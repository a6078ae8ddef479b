//! Call frames (spec §3 "CallFrame").

use quill_core::{InstructionContainer, ObjectHandle, RefSlot};
use std::collections::HashMap;
use std::rc::Rc;

/// An active invocation. Holds the parameter/local binding table, the
/// instruction pointer into its own body, and (for methods) the implicit
/// `$this` binding.
pub struct Frame {
    pub function_name: Rc<str>,
    pub container: Rc<InstructionContainer>,
    pub ip: usize,
    /// Variable name -> pool slot. Binding two names to the same slot is
    /// how `=&` reference assignment works (spec §4.4).
    pub locals: HashMap<Rc<str>, RefSlot>,
    /// Slots this frame allocated, freed when the frame is popped (spec §5
    /// "Per-call frames... all frame-local values go back to the free
    /// list"). Slots shared via a `static` declaration are excluded so they
    /// survive the frame.
    pub owned_slots: Vec<RefSlot>,
    /// `self` / `$this` binding, present iff this is a class-method
    /// invocation with a supplied instance (spec §3 invariant).
    pub instance: Option<ObjectHandle>,
    /// The class a method body lexically belongs to, for `self::`/
    /// `parent::` resolution.
    pub self_class: Option<Rc<str>>,
    /// Operand-stack depth at frame entry; used to verify/restore stack
    /// depth on exception unwinding (spec §8 property 9).
    pub operand_base: usize,
}

impl Frame {
    pub fn new(function_name: Rc<str>, container: Rc<InstructionContainer>, operand_base: usize) -> Self {
        Frame {
            function_name,
            container,
            ip: 0,
            locals: HashMap::new(),
            owned_slots: Vec::new(),
            instance: None,
            self_class: None,
            operand_base,
        }
    }
}
