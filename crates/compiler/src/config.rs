//! Compiler configuration for extensibility (SPEC_FULL §A.3), grounded on
//! the teacher's `compiler/src/config.rs` `CompilerConfig`/`ExternalBuiltin`
//! builder pattern. Where the teacher's builtins are LLVM symbol names for a
//! linked-in foreign function, Quill's are host-function names resolved at
//! run time by `quill_runtime::HostRegistry` — there is no link step here,
//! so the registration only needs to teach the *resolver* that the name
//! exists and takes a function call shape, not a declared stack effect.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A host function the embedder has registered with the runtime and wants
/// the compiler's resolver to accept as a known callee, so calling it
/// doesn't get flagged as "undefined function" (spec §4.2 resolver pass
/// implied by spec §7's "undefined class" error example).
#[derive(Debug, Clone)]
pub struct ExternalBuiltin {
    pub name: String,
}

impl ExternalBuiltin {
    pub fn new(name: impl Into<String>) -> Self {
        ExternalBuiltin { name: name.into() }
    }
}

/// Configuration for the Quill compiler (SPEC_FULL §A.3). Supports a
/// `quill.toml` on-disk form loaded via `serde`/`toml`, mirroring how the
/// teacher's CLI loads TOML lint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Additional directories searched for `include`/`require` targets.
    pub include_paths: Vec<PathBuf>,
    /// Compile-time error budget before the compiler switches to abort mode
    /// (spec §7: "up to a fixed budget (15)").
    pub max_errors: usize,
    /// Emit a `Notice` diagnostic for each disabled-feature use (namespaces,
    /// backtick strings, `declare`) rather than silently accepting them
    /// (spec §6 "Documented disabled features").
    pub notice_on_disabled_features: bool,
    #[serde(skip)]
    pub external_builtins: Vec<ExternalBuiltin>,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        CompilerConfig {
            include_paths: Vec::new(),
            max_errors: 15,
            notice_on_disabled_features: true,
            external_builtins: Vec::new(),
        }
    }
}

impl CompilerConfig {
    pub fn new() -> Self {
        CompilerConfig::default()
    }

    pub fn with_builtin(mut self, builtin: ExternalBuiltin) -> Self {
        self.external_builtins.push(builtin);
        self
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_max_errors(mut self, max: usize) -> Self {
        self.max_errors = max;
        self
    }

    /// Load from a `quill.toml`-style document.
    pub fn from_toml_str(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn is_known_builtin(&self, name: &str) -> bool {
        self.external_builtins.iter().any(|b| b.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_spec_error_budget() {
        let config = CompilerConfig::new();
        assert_eq!(config.max_errors, 15);
    }

    #[test]
    fn toml_round_trip_overrides_the_budget() {
        let config = CompilerConfig::from_toml_str("max_errors = 5\n").unwrap();
        assert_eq!(config.max_errors, 5);
        assert!(config.notice_on_disabled_features);
    }

    #[test]
    fn builder_registers_external_builtins() {
        let config = CompilerConfig::new().with_builtin(ExternalBuiltin::new("journal_append"));
        assert!(config.is_known_builtin("journal_append"));
        assert!(!config.is_known_builtin("unregistered"));
    }
}
