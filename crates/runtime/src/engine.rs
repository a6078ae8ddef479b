//! The embedding surface (spec §6 "External Interfaces": "create/configure/
//! destroy a VM instance", "compile source into a VM and execute it",
//! "register a host function/constant... before or between runs").
//!
//! `Engine` is the thin, embedder-facing wrapper around [`Vm`]; the actual
//! compile step lives in `quill-compiler` (which depends on this crate, so
//! it cannot be depended on from here) — an embedder pairs
//! `quillc::compile(source)` with `Engine::execute(program)`.

use crate::host::HostFunction;
use crate::output::{OutputConsumer, StdoutConsumer};
use crate::vm::Vm;
use crate::{builtins, error::VmError};
use quill_core::{Class, Diagnostic, ErrorMask, FunctionDef, InstructionContainer, Value};
use std::rc::Rc;

/// Run-time configuration (spec §A.3 in SPEC_FULL): recursion guard, the
/// default output destination, and which diagnostic classes reach the
/// error-log sink (spec §7).
pub struct EngineConfig {
    pub max_recursion_depth: usize,
    pub error_mask: ErrorMask,
    /// `true` captures output into an in-memory buffer retrievable via
    /// [`Engine::take_output`] instead of writing straight to stdout — what
    /// an embedder wants when running scripts headlessly (e.g. the `quillc
    /// test` runner).
    pub capture_output: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig { max_recursion_depth: 512, error_mask: ErrorMask::default(), capture_output: false }
    }
}

/// A single compiled program ready to load into an [`Engine`]: the
/// top-level instruction stream plus the constant pool, function table, and
/// class table the compiler produced alongside it.
pub struct Program {
    pub entry: Rc<InstructionContainer>,
    pub constants: Vec<Value>,
    pub functions: Vec<Rc<FunctionDef>>,
    pub classes: Vec<Rc<Class>>,
}

/// The embeddable engine (spec §6). Owns one [`Vm`] for its lifetime;
/// dropping the `Engine` tears the VM down (Rust's ordinary drop glue
/// reclaims every pooled value and output buffer — no explicit "destroy"
/// call is needed, unlike the reference implementation's manual
/// `ph7_vm_release`).
pub struct Engine {
    vm: Vm,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let mut vm = Vm::new(config.max_recursion_depth, config.error_mask, Box::new(StdoutConsumer));
        if config.capture_output {
            vm.push_output_buffer();
        }
        builtins::install(&mut vm);
        Engine { vm }
    }

    pub fn register_host_function(&mut self, name: impl Into<Rc<str>>, f: impl HostFunction + 'static) {
        self.vm.hosts_mut().register_function(name, f);
    }

    pub fn register_host_constant(&mut self, name: impl Into<Rc<str>>, value: Value) {
        self.vm.hosts_mut().register_constant(name, value);
    }

    /// Load a compiled program's functions and classes into the VM and run
    /// its entry container to completion (spec §6 "compile source into a VM
    /// and execute it"). Re-callable with a new `Program` to run another
    /// script in the same VM, sharing host registrations (spec §6 "register
    /// ... between runs").
    pub fn execute(&mut self, program: Program) -> Result<(), VmError> {
        tracing::debug!(
            functions = program.functions.len(),
            classes = program.classes.len(),
            "loading program into VM"
        );
        self.vm.set_constants(program.constants);
        for def in program.functions {
            self.vm.register_function(def);
        }
        for class in program.classes {
            self.vm.register_class(class);
        }
        let result = self.vm.execute(program.entry);
        if let Err(e) = &result {
            tracing::error!(error = %e, "script execution aborted");
        }
        result
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.vm.diagnostics()
    }

    /// Drain whatever output the run captured so far, if the engine was
    /// configured with `capture_output: true`. Leaves the capture buffer in
    /// place so a subsequent `execute` keeps accumulating into it.
    pub fn take_output(&mut self) -> Option<Vec<u8>> {
        self.vm.drain_output_buffer()
    }
}
