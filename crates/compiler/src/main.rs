//! `quillc`: the Quill compiler/runner command-line interface (SPEC_FULL
//! §A.5, grounded on the teacher's `compiler/src/main.rs` `clap` subcommand
//! layout).

use clap::{CommandFactory, Parser as ClapParser, Subcommand};
use clap_complete::{generate, Shell};
use quill_core::{ErrorKind, InstructionContainer, Opcode};
use quillc::test_runner::TestRunner;
use quillc::{compile_file, CompilerConfig};
use quill_runtime::engine::{Engine, EngineConfig};
use std::io;
use std::path::PathBuf;
use std::process;

#[derive(ClapParser)]
#[command(name = "quillc")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Quill compiler and runtime CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile and execute a Quill script
    Run {
        input: PathBuf,
    },
    /// Compile a script without running it, optionally dumping disassembly
    Build {
        input: PathBuf,
        #[arg(long = "emit-bytecode", value_name = "PATH")]
        emit_bytecode: Option<PathBuf>,
    },
    /// Run the resolver/diagnostic passes without executing
    Lint {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
    /// Run the embedded test-block runner
    Test {
        #[arg(default_value = ".")]
        paths: Vec<PathBuf>,
        #[arg(short, long)]
        filter: Option<String>,
        #[arg(short, long)]
        verbose: bool,
    },
    /// Generate shell completion scripts
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

fn install_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

fn main() {
    install_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Run { input } => run_script(&input),
        Commands::Build { input, emit_bytecode } => run_build(&input, emit_bytecode.as_deref()),
        Commands::Lint { paths } => run_lint(&paths),
        Commands::Test { paths, filter, verbose } => run_test(&paths, filter, verbose),
        Commands::Completions { shell } => run_completions(shell),
    }
}

fn run_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "quillc", &mut io::stdout());
}

fn run_script(input: &std::path::Path) {
    let config = CompilerConfig::new();
    let outcome = match compile_file(input, &config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    for diag in &outcome.diagnostics {
        eprintln!("{diag}");
    }
    let Some(program) = outcome.program else {
        eprintln!("error: compilation aborted");
        process::exit(1);
    };
    let mut engine = Engine::new(EngineConfig::default());
    if let Err(e) = engine.execute(program) {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

fn run_build(input: &std::path::Path, emit_bytecode: Option<&std::path::Path>) {
    let config = CompilerConfig::new();
    let outcome = match compile_file(input, &config) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("error: {e}");
            process::exit(1);
        }
    };
    for diag in &outcome.diagnostics {
        eprintln!("{diag}");
    }
    let Some(program) = outcome.program else {
        eprintln!("error: compilation aborted");
        process::exit(1);
    };
    println!(
        "Compiled {} ({} functions, {} classes, {} constants)",
        input.display(),
        program.functions.len(),
        program.classes.len(),
        program.constants.len()
    );
    if let Some(out_path) = emit_bytecode {
        let text = disassemble(&program.entry);
        if let Err(e) = std::fs::write(out_path, text) {
            eprintln!("error writing {}: {e}", out_path.display());
            process::exit(1);
        }
        println!("Bytecode written to {}", out_path.display());
    }
}

/// A human-readable disassembly of one container's instructions, one per
/// line: index, opcode, P1/P2 when non-default. Debugging aid, not a
/// stable on-disk format.
fn disassemble(container: &InstructionContainer) -> String {
    let mut out = String::new();
    for (i, instr) in container.iter().enumerate() {
        out.push_str(&format!("{i:>4}: {:<14} p1={:<6} p2={}\n", format!("{:?}", instr.op), instr.p1, instr.p2));
    }
    out
}

fn run_lint(paths: &[PathBuf]) {
    let config = CompilerConfig::new();
    let mut files_checked = 0usize;
    let mut had_errors = false;
    for path in paths {
        let files = if path.is_dir() { walk_ql_files(path) } else { vec![path.clone()] };
        for file in files {
            files_checked += 1;
            let outcome = match compile_file(&file, &config) {
                Ok(o) => o,
                Err(e) => {
                    eprintln!("{}: {e}", file.display());
                    had_errors = true;
                    continue;
                }
            };
            for diag in &outcome.diagnostics {
                eprintln!("{diag}");
                if matches!(diag.kind, ErrorKind::Fatal | ErrorKind::Error | ErrorKind::Parse) {
                    had_errors = true;
                }
            }
        }
    }
    println!("Checked {files_checked} file(s)");
    if had_errors {
        process::exit(1);
    }
}

fn walk_ql_files(dir: &std::path::Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Ok(entries) = std::fs::read_dir(dir) {
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                out.extend(walk_ql_files(&path));
            } else if path.extension().is_some_and(|e| e == "ql") {
                out.push(path);
            }
        }
    }
    out
}

fn run_test(paths: &[PathBuf], filter: Option<String>, verbose: bool) {
    let runner = TestRunner::new(verbose, filter);
    let summary = runner.run(paths);
    runner.print_results(&summary);
    if summary.failed > 0 {
        process::exit(1);
    } else if summary.total == 0 {
        eprintln!("No tests found");
        process::exit(2);
    }
}
