//! The minimal set of classes and host functions every [`Vm`] carries
//! without an embedder registering anything (spec §6 "a default output
//! consumer... a default error-log sink", §4.5 throwable base class).
//!
//! Everything beyond this handful is explicitly out of scope (spec §1
//! Non-goals: the full standard-library foreign-function surface), left to
//! the embedding host via [`crate::host::HostRegistry`].

use crate::host::HostOutcome;
use crate::vm::Vm;
use quill_core::{Class, ClassFlags, Value};
use std::rc::Rc;

/// Install the base `Exception` class (its accessors are implemented
/// natively in `Vm::try_native_exception_method`, not as compiled bytecode)
/// and a handful of pure host functions useful enough to ship by default.
pub fn install(vm: &mut Vm) {
    let mut exception = Class::new("Exception", 0);
    exception.flags = ClassFlags::THROWABLE;
    vm.register_class(Rc::new(exception));

    vm.hosts_mut().register_function("strlen", |_ctx, args| {
        let len = args.first().map(|v| v.to_display_string().len()).unwrap_or(0);
        HostOutcome::Return(Value::Int(len as i64))
    });

    vm.hosts_mut().register_function("intval", |_ctx, args| {
        HostOutcome::Return(Value::Int(args.first().map(|v| v.to_int()).unwrap_or(0)))
    });

    vm.hosts_mut().register_function("strtoupper", |_ctx, args| {
        let s = args.first().map(|v| v.to_display_string()).unwrap_or_default();
        HostOutcome::Return(Value::str(s.to_uppercase()))
    });

    vm.hosts_mut().register_function("count", |_ctx, args| {
        let n = match args.first() {
            Some(Value::Array(a)) => a.borrow().len() as i64,
            _ => 0,
        };
        HostOutcome::Return(Value::Int(n))
    });
}
