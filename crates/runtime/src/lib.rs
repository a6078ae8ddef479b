//! Quill Runtime: the stack-based executor and embedding surface (spec §4.4
//! "Executor", §6 "External Interfaces").
//!
//! # Modules
//!
//! - `pool`: the value-slot free-list backing every variable binding.
//! - `frame`: call frames.
//! - `exception`: installed `try`/`catch` handlers.
//! - `foreach_state`: `foreach` iterator state.
//! - `arithmetic`: arithmetic/compare opcode implementations.
//! - `overload`: function/method overload resolution.
//! - `host`: the host-function/host-constant registry.
//! - `output`: the output sink and buffering stack.
//! - `vm`: the dispatch loop itself.
//! - `engine`: the embedder-facing `Engine`/`EngineConfig` wrapper.
//! - `builtins`: the base `Exception` class and a handful of host functions
//!   every engine carries without an embedder registering anything.

pub mod arithmetic;
pub mod builtins;
pub mod engine;
pub mod error;
pub mod exception;
pub mod foreach_state;
pub mod frame;
pub mod host;
pub mod output;
pub mod overload;
pub mod pool;
pub mod vm;

pub use engine::{Engine, EngineConfig, Program};
pub use error::VmError;
pub use host::{HostContext, HostFunction, HostOutcome, HostRegistry};
pub use output::{BufferConsumer, OutputConsumer, OutputStack, StdoutConsumer};
pub use pool::ValuePool;
pub use vm::Vm;
