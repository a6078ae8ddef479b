//! Runtime error type.
//!
//! Mirrors the teacher's `CodeGenError` split (`codegen/error.rs`): a
//! `Logic` variant for ordinary failures plus dedicated variants for the
//! two conditions spec §7 singles out as genuinely unrecoverable (`Fatal`)
//! versus everything else, which the executor is expected to turn into a
//! language-level exception or a halted statement rather than a Rust
//! `Result` error. `VmError` is therefore only returned for conditions that
//! abort the whole run: malformed bytecode, host abort, or out-of-memory.

use std::fmt;

#[derive(Debug)]
pub enum VmError {
    /// The instruction stream referenced a jump target, constant slot, or
    /// variable slot that does not exist. Indicates a code generation bug,
    /// not a script bug.
    MalformedBytecode(String),
    /// An uncaught exception reached the top of the call stack with no
    /// installed uncaught-exception handler (spec §4.4 "Exceptions").
    Uncaught(String),
    /// A host callback returned the abort sentinel (spec §5 "Cancellation").
    HostAbort(String),
    /// Maximum recursion depth exceeded (spec §4.4 "Dispatch loop
    /// properties").
    StackOverflow,
    Fatal(String),
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VmError::MalformedBytecode(s) => write!(f, "malformed bytecode: {s}"),
            VmError::Uncaught(s) => write!(f, "uncaught exception: {s}"),
            VmError::HostAbort(s) => write!(f, "host callback aborted: {s}"),
            VmError::StackOverflow => write!(f, "maximum recursion depth exceeded"),
            VmError::Fatal(s) => write!(f, "fatal error: {s}"),
        }
    }
}

impl std::error::Error for VmError {}
