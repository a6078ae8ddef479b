//! Compiler error type (SPEC_FULL §A.2), mirroring the runtime's
//! `VmError`/the teacher's `CodeGenError` split: a `Logic(String)` catch-all
//! for malformed input plus dedicated variants for conditions with their own
//! shape.

use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum CompileError {
    /// The compile-error budget (spec §7) was exceeded; the caller should
    /// not treat the partially-built program as runnable.
    BudgetExceeded { error_count: usize },
    /// `io::Error` reading a script file, with the path that failed for
    /// context a bare `io::Error` lacks.
    Io { path: PathBuf, source: std::io::Error },
    Logic(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::BudgetExceeded { error_count } => {
                write!(f, "compilation aborted: {error_count} errors exceeded the budget")
            }
            CompileError::Io { path, source } => write!(f, "could not read {}: {source}", path.display()),
            CompileError::Logic(s) => write!(f, "{s}"),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CompileError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
