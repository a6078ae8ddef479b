//! Installed exception handlers (spec §3 "ExceptionFrame", §4.3 "throw / try /
//! catch").
//!
//! `LOAD_EXCEPTION` pushes one of these; `THROW` searches the stack of them
//! top-down for a catch clause whose class the thrown object is an instance
//! of. `POP_EXCEPTION`, reached by falling off the end of the protected
//! region without throwing, removes it again.

use quill_core::CatchClause;

pub struct ExceptionFrame {
    /// Index into the VM's call-frame stack identifying which frame installed
    /// this handler; unwinding on a caught throw drops every frame above it.
    pub frame_depth: usize,
    /// Operand-stack length at install time, restored before a catch body
    /// runs (spec §8 property 9: the operand stack only ever returns to a
    /// prior depth through an explicit pop, throw unwinding included).
    pub operand_depth: usize,
    pub catches: Vec<CatchClause>,
    /// Instruction index, in the installing frame's own container, to resume
    /// at once the matched catch body finishes running.
    pub resume_ip: u32,
}
