//! Diagnostic collection and the 15-error compile budget (spec §7: "the
//! compiler records up to a fixed budget (15) before switching to abort
//! mode").
//!
//! Every diagnostic is mirrored to a `tracing` event at the matching level
//! (spec SPEC_FULL §A.1), in addition to being appended to the sink the
//! caller eventually gets back.

use quill_core::{Diagnostic, ErrorKind};

pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
    file: Option<String>,
    budget: usize,
    error_count: usize,
    aborted: bool,
}

impl DiagnosticSink {
    pub fn new(budget: usize) -> Self {
        DiagnosticSink { diagnostics: Vec::new(), file: None, budget, error_count: 0, aborted: false }
    }

    pub fn with_file(mut self, file: impl Into<String>) -> Self {
        self.file = Some(file.into());
        self
    }

    pub fn emit(&mut self, kind: ErrorKind, line: u32, message: impl Into<String>) {
        let message = message.into();
        match kind {
            ErrorKind::Fatal | ErrorKind::Error | ErrorKind::Recoverable | ErrorKind::Parse => {
                tracing::error!(line, %message, "{}", kind.as_str());
            }
            ErrorKind::Warning | ErrorKind::Strict => tracing::warn!(line, %message, "{}", kind.as_str()),
            ErrorKind::Notice | ErrorKind::Deprecated => tracing::info!(line, %message, "{}", kind.as_str()),
        }
        let mut diag = Diagnostic::new(kind, line, message);
        if let Some(f) = &self.file {
            diag = diag.with_file(f.clone());
        }
        self.diagnostics.push(diag);
        if matches!(kind, ErrorKind::Error | ErrorKind::Fatal | ErrorKind::Parse | ErrorKind::Recoverable) {
            self.error_count += 1;
            if self.error_count > self.budget {
                self.aborted = true;
            }
        }
    }

    /// `true` once the error budget has been exceeded; statement-level
    /// resynchronization gives up and the whole compile unwinds (spec §7
    /// "a second-order error signal... unwinds the whole compile").
    pub fn should_abort(&self) -> bool {
        self.aborted
    }

    pub fn has_errors(&self) -> bool {
        self.error_count > 0
    }

    pub fn error_count(&self) -> usize {
        self.error_count
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn into_diagnostics(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aborts_once_budget_is_exceeded() {
        let mut sink = DiagnosticSink::new(2);
        sink.emit(ErrorKind::Error, 1, "a");
        assert!(!sink.should_abort());
        sink.emit(ErrorKind::Error, 2, "b");
        assert!(!sink.should_abort());
        sink.emit(ErrorKind::Error, 3, "c");
        assert!(sink.should_abort());
    }

    #[test]
    fn warnings_and_notices_never_trip_the_budget() {
        let mut sink = DiagnosticSink::new(1);
        for _ in 0..10 {
            sink.emit(ErrorKind::Warning, 1, "w");
            sink.emit(ErrorKind::Notice, 1, "n");
        }
        assert!(!sink.should_abort());
        assert!(!sink.has_errors());
    }
}
