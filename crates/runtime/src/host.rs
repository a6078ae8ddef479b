//! The host-function / host-constant registry (spec §6 "External
//! Interfaces": "register a host function... register a host constant").
//!
//! A host function is an arbitrary Rust closure; the VM calls it exactly like
//! a script-defined `CALL` target once argument evaluation and by-value/
//! by-ref binding has already happened, handing it plain [`Value`]s and a
//! [`HostContext`] through which it can write output or signal a failure.

use crate::output::OutputStack;
use quill_core::Value;
use std::collections::HashMap;
use std::rc::Rc;

/// What a host function hands back besides an ordinary return value.
pub enum HostOutcome {
    Return(Value),
    /// Equivalent to a script-level `throw`, catchable by an installed
    /// `catch` whose class matches. Carries the already-constructed
    /// exception object.
    Throw(Value),
    /// Unrecoverable: propagates out of `execute` as `VmError::HostAbort`
    /// (spec §5 "Cancellation").
    Abort(String),
}

pub trait HostFunction {
    fn call(&self, ctx: &mut HostContext<'_>, args: &[Value]) -> HostOutcome;
}

impl<F> HostFunction for F
where
    F: Fn(&mut HostContext<'_>, &[Value]) -> HostOutcome,
{
    fn call(&self, ctx: &mut HostContext<'_>, args: &[Value]) -> HostOutcome {
        self(ctx, args)
    }
}

/// Borrowed handle a host function uses to touch VM-owned state without
/// being handed the whole `Vm` (which would let it re-enter dispatch).
pub struct HostContext<'a> {
    pub output: &'a mut OutputStack,
}

/// Functions and constants an embedder registered before/around execution
/// (spec §6 "register a host function callable from scripts", "register a
/// host constant").
#[derive(Default)]
pub struct HostRegistry {
    functions: HashMap<Rc<str>, Rc<dyn HostFunction>>,
    constants: HashMap<Rc<str>, Value>,
}

impl HostRegistry {
    pub fn new() -> Self {
        HostRegistry::default()
    }

    pub fn register_function(&mut self, name: impl Into<Rc<str>>, f: impl HostFunction + 'static) {
        self.functions.insert(name.into(), Rc::new(f));
    }

    pub fn register_constant(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.constants.insert(name.into(), value);
    }

    pub fn get_function(&self, name: &str) -> Option<Rc<dyn HostFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn get_constant(&self, name: &str) -> Option<&Value> {
        self.constants.get(name)
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}
