//! Discovers and runs Quill-level test functions (SPEC_FULL §A.4),
//! independent of `cargo test`. Grounded on the teacher's
//! `compiler/src/test_runner.rs`: find candidate files, parse out the test
//! names, compile once, then execute each test as its own tiny driver
//! program sharing the file's compiled functions/classes/constants.
//!
//! A test is any top-level function named `test_*`. It passes if running it
//! completes without an uncaught exception (spec §4.4 "Exceptions": an
//! uncaught exception aborts the run) and fails otherwise.

use crate::config::CompilerConfig;
use crate::script::compile_str;
use quill_core::{Instruction, InstructionContainer, Opcode, Operand};
use quill_runtime::engine::{Engine, EngineConfig, Program};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub struct TestResult {
    pub name: String,
    pub passed: bool,
    pub duration_ms: u128,
    pub error: Option<String>,
}

pub struct FileTestResults {
    pub path: PathBuf,
    pub tests: Vec<TestResult>,
    pub compile_error: Option<String>,
}

#[derive(Default)]
pub struct TestSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub files: Vec<FileTestResults>,
}

pub struct TestRunner {
    pub verbose: bool,
    pub filter: Option<String>,
}

impl TestRunner {
    pub fn new(verbose: bool, filter: Option<String>) -> Self {
        TestRunner { verbose, filter }
    }

    pub fn run(&self, paths: &[PathBuf]) -> TestSummary {
        let mut summary = TestSummary::default();
        for file in self.discover_files(paths) {
            let result = self.run_file(&file);
            summary.total += result.tests.len();
            summary.passed += result.tests.iter().filter(|t| t.passed).count();
            summary.failed += result.tests.iter().filter(|t| !t.passed).count();
            summary.files.push(result);
        }
        summary
    }

    fn discover_files(&self, paths: &[PathBuf]) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for path in paths {
            if path.is_file() {
                if path.extension().is_some_and(|e| e == "ql") {
                    out.push(path.clone());
                }
            } else if path.is_dir() {
                self.walk(path, &mut out);
            }
        }
        out.sort();
        out
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) {
        let Ok(entries) = std::fs::read_dir(dir) else { return };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                self.walk(&path, out);
            } else if path.extension().is_some_and(|e| e == "ql") {
                out.push(path);
            }
        }
    }

    fn matches_filter(&self, name: &str) -> bool {
        match self.filter.as_deref() {
            Some(f) => name.contains(f),
            None => true,
        }
    }

    fn run_file(&self, path: &Path) -> FileTestResults {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                return FileTestResults { path: path.to_path_buf(), tests: Vec::new(), compile_error: Some(e.to_string()) }
            }
        };
        let config = CompilerConfig::new();
        let outcome = compile_str(&source, &config);
        let Some(program) = outcome.program else {
            let message = outcome.diagnostics.iter().map(|d| d.to_string()).collect::<Vec<_>>().join("\n");
            return FileTestResults { path: path.to_path_buf(), tests: Vec::new(), compile_error: Some(message) };
        };

        let test_names: Vec<String> =
            program.functions.iter().map(|f| f.name.to_string()).filter(|n| n.starts_with("test_")).filter(|n| self.matches_filter(n)).collect();

        let mut tests = Vec::with_capacity(test_names.len());
        for name in test_names {
            tests.push(self.run_one(&program, &name));
        }
        FileTestResults { path: path.to_path_buf(), tests, compile_error: None }
    }

    fn run_one(&self, program: &Program, name: &str) -> TestResult {
        let mut driver = InstructionContainer::new();
        driver.emit(Instruction::new(Opcode::Call, 0).with_p1(0).with_p3(Operand::Name(name.into())));
        driver.emit(Instruction::new(Opcode::Pop, 0));
        driver.emit(Instruction::new(Opcode::Done, 0).with_p1(0));

        let drive_program = Program {
            entry: std::rc::Rc::new(driver),
            constants: program.constants.clone(),
            functions: program.functions.clone(),
            classes: program.classes.clone(),
        };

        let mut engine = Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() });
        let start = Instant::now();
        let result = engine.execute(drive_program);
        let duration_ms = start.elapsed().as_millis();
        match result {
            Ok(()) => TestResult { name: name.to_string(), passed: true, duration_ms, error: None },
            Err(e) => TestResult { name: name.to_string(), passed: false, duration_ms, error: Some(e.to_string()) },
        }
    }

    pub fn print_results(&self, summary: &TestSummary) {
        for file in &summary.files {
            if let Some(err) = &file.compile_error {
                println!("{}: compile error: {err}", file.path.display());
                continue;
            }
            for test in &file.tests {
                let status = if test.passed { "ok" } else { "FAILED" };
                println!("{} ... {status} ({} ms)", test.name, test.duration_ms);
                if self.verbose {
                    if let Some(err) = &test.error {
                        println!("    {err}");
                    }
                }
            }
        }
        println!("\n{} passed, {} failed, {} total", summary.passed, summary.failed, summary.total);
    }
}
