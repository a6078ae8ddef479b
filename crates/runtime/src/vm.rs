//! The stack-based executor (spec §4.4 "Executor").
//!
//! `Vm` owns every piece of mutable state a running script touches: the
//! value pool, the operand stack, the call-frame stack, installed exception
//! handlers, active `foreach` iterators, and the output sink. Dispatch is a
//! straightforward fetch/match/advance loop (`run_frame`); a script-level
//! function call recurses into the same loop rather than flattening the VM's
//! own call stack onto an explicit data structure, so Rust's call stack
//! mirrors the script's (bounded by `max_recursion_depth`, spec §4.4
//! "Dispatch loop properties").

use crate::arithmetic;
use crate::error::VmError;
use crate::exception::ExceptionFrame;
use crate::foreach_state::ForeachState;
use crate::frame::Frame;
use crate::host::{HostContext, HostOutcome, HostRegistry};
use crate::output::{OutputConsumer, OutputStack};
use crate::pool::ValuePool;
use quill_core::{
    ArrayKey, Class, Diagnostic, ErrorKind, ErrorMask, FunctionDef, Instruction,
    InstructionContainer, ObjectHandle, ObjectInstance, Opcode, Operand, OrderedArray, RefSlot,
    ResourceHandle, Value, Visibility,
};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;

/// What a closure literal's resource payload carries (spec §4.2 "anonymous-
/// function expressions"). Represented as a `Resource` rather than a new
/// `Value` variant so the closed value model in `quill-core` doesn't need to
/// know about callables at all — see DESIGN.md.
struct ClosureCapture {
    def: Rc<FunctionDef>,
    captured: HashMap<Rc<str>, RefSlot>,
}

/// One overload-group entry for a free (non-method) function.
struct FunctionEntry {
    def: Rc<FunctionDef>,
    body: Rc<InstructionContainer>,
}

/// What `run_frame` returns when the current frame's instruction stream runs
/// out of instructions to execute.
enum Signal {
    Return(Value),
    Thrown(Value),
}

pub struct Vm {
    pool: ValuePool,
    /// Persistent storage for `static` locals and class-constant/static
    /// attributes, indexed directly by the compile-time-assigned slot
    /// (spec §3 "static-variable initializer", "static_slot"). `None` means
    /// "initializer not yet run".
    statics: Vec<Option<Value>>,
    constants: Vec<Value>,
    output: OutputStack,
    hosts: HostRegistry,
    functions: HashMap<Rc<str>, Vec<FunctionEntry>>,
    classes: HashMap<Rc<str>, Rc<Class>>,
    /// Registered global-constant callbacks, keyed by name (spec §4.3:
    /// "`const` (outside a class)"). Not run until first read.
    global_consts: HashMap<Rc<str>, Rc<InstructionContainer>>,
    /// Memoized results of `global_consts`, so a constant's initializer runs
    /// exactly once even if referenced many times.
    global_const_cache: HashMap<Rc<str>, Value>,
    frames: Vec<Frame>,
    operand_stack: Vec<Value>,
    exception_stack: Vec<ExceptionFrame>,
    foreach_stack: Vec<ForeachState>,
    max_recursion_depth: usize,
    error_mask: ErrorMask,
    diagnostics: Vec<Diagnostic>,
    suppress_depth: i32,
}

impl Vm {
    pub fn new(max_recursion_depth: usize, error_mask: ErrorMask, output: Box<dyn OutputConsumer>) -> Self {
        Vm {
            pool: ValuePool::new(),
            statics: Vec::new(),
            constants: vec![Value::Null, Value::Bool(true), Value::Bool(false)],
            output: OutputStack::new(output),
            hosts: HostRegistry::new(),
            functions: HashMap::new(),
            classes: HashMap::new(),
            global_consts: HashMap::new(),
            global_const_cache: HashMap::new(),
            frames: Vec::new(),
            operand_stack: Vec::new(),
            exception_stack: Vec::new(),
            foreach_stack: Vec::new(),
            max_recursion_depth,
            error_mask,
            diagnostics: Vec::new(),
            suppress_depth: 0,
        }
    }

    pub fn set_constants(&mut self, constants: Vec<Value>) {
        self.constants = constants;
    }

    pub fn hosts_mut(&mut self) -> &mut HostRegistry {
        &mut self.hosts
    }

    pub fn register_function(&mut self, def: Rc<FunctionDef>) {
        let body = Rc::new(def.body.clone());
        self.functions.entry(def.name.clone()).or_default().push(FunctionEntry { def, body });
    }

    pub fn register_class(&mut self, class: Rc<Class>) {
        self.ensure_statics_len(&class);
        for attr in class.attrs.values() {
            if let Some(slot) = attr.static_slot {
                if self.statics[slot as usize].is_none() {
                    let value = self.run_initializer(&attr.initializer);
                    self.statics[slot as usize] = Some(value);
                }
            }
        }
        self.classes.insert(class.name.clone(), class);
    }

    fn ensure_statics_len(&mut self, class: &Class) {
        let max_slot = class.attrs.values().filter_map(|a| a.static_slot).max();
        if let Some(m) = max_slot {
            if self.statics.len() <= m as usize {
                self.statics.resize_with(m as usize + 1, || None);
            }
        }
    }

    /// Splits `"ClassName::member"` (the composed name `LOAD_STATIC`/
    /// `STORE_STATIC`/`CALL_STATIC` carry in P3), resolving a leading
    /// `self`/`static` against the current frame's lexically enclosing class
    /// (spec §4.5 "`self::m()` on the lexically enclosing class").
    fn resolve_composed_class<'a>(&self, composed: &'a str) -> Result<(Rc<str>, &'a str), VmError> {
        let (class_part, member) = composed
            .split_once("::")
            .ok_or_else(|| VmError::MalformedBytecode(format!("malformed static reference {composed}")))?;
        let resolved = match class_part {
            "self" | "static" => self
                .current()
                .self_class
                .clone()
                .ok_or_else(|| VmError::Fatal("self:: / static:: reference outside a method body".into()))?,
            "parent" => {
                let this_class = self
                    .current()
                    .self_class
                    .clone()
                    .ok_or_else(|| VmError::Fatal("parent:: reference outside a method body".into()))?;
                self.classes
                    .get(this_class.as_ref())
                    .and_then(|c| c.base.clone())
                    .ok_or_else(|| VmError::Fatal(format!("class {this_class} has no parent")))?
            }
            other => Rc::from(other),
        };
        Ok((resolved, member))
    }

    /// Resolves a class name + member to a static slot, walking the
    /// inheritance chain the same way [`Vm::resolve_method`] does.
    fn resolve_static_slot(&self, class_name: &str, member: &str) -> Result<u32, VmError> {
        let mut current = self.classes.get(class_name);
        while let Some(class) = current {
            if let Some(attr) = class.find_attr(member) {
                if let Some(slot) = attr.static_slot {
                    return Ok(slot);
                }
            }
            current = class.base.as_deref().and_then(|b| self.classes.get(b));
        }
        Err(VmError::Fatal(format!("undefined static property or constant {class_name}::{member}")))
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn push_output_buffer(&mut self) {
        self.output.push_buffer();
    }

    pub fn drain_output_buffer(&mut self) -> Option<Vec<u8>> {
        self.output.drain_current_buffer()
    }

    fn emit_diagnostic(&mut self, kind: ErrorKind, line: u32, message: impl Into<String>) {
        if self.suppress_depth == 0 && self.error_mask.permits(kind) {
            let diag = Diagnostic::new(kind, line, message);
            match kind {
                ErrorKind::Fatal | ErrorKind::Error | ErrorKind::Recoverable => {
                    tracing::error!(%diag, "runtime diagnostic")
                }
                ErrorKind::Warning | ErrorKind::Strict => tracing::warn!(%diag, "runtime diagnostic"),
                ErrorKind::Notice | ErrorKind::Deprecated => tracing::info!(%diag, "runtime diagnostic"),
                ErrorKind::Parse => tracing::error!(%diag, "runtime diagnostic"),
            }
            self.diagnostics.push(diag);
        }
    }

    /// Run a function/attribute initializer container once, sharing no state
    /// with any live call frame. Used for static-attribute and static-local
    /// initializers (spec §3).
    fn run_initializer(&mut self, container: &InstructionContainer) -> Value {
        let operand_base = self.operand_stack.len();
        self.frames.push(Frame::new("<init>".into(), Rc::new(container.clone()), operand_base));
        let result = match self.run_frame() {
            Ok(Signal::Return(v)) => v,
            _ => Value::Null,
        };
        self.frames.pop();
        self.operand_stack.truncate(operand_base);
        result
    }

    /// Execute a top-level script container to completion.
    pub fn execute(&mut self, container: Rc<InstructionContainer>) -> Result<(), VmError> {
        self.frames.push(Frame::new("<script>".into(), container, 0));
        let outcome = self.run_frame();
        self.frames.clear();
        match outcome? {
            Signal::Return(_) => Ok(()),
            Signal::Thrown(exc) => Err(VmError::Uncaught(describe_exception(&exc))),
        }
    }

    fn current(&self) -> &Frame {
        self.frames.last().expect("run_frame always has a frame")
    }

    fn current_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("run_frame always has a frame")
    }

    fn fetch(&self) -> Option<Instruction> {
        let frame = self.current();
        frame.container.get(frame.ip).cloned()
    }

    fn push(&mut self, v: Value) {
        self.operand_stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.operand_stack.pop().expect("bytecode keeps the operand stack balanced")
    }

    fn resolve_local(&mut self, name: &Rc<str>) -> RefSlot {
        if let Some(slot) = self.current().locals.get(name) {
            return *slot;
        }
        let slot = self.pool.alloc(Value::Null);
        let frame = self.current_mut();
        frame.locals.insert(name.clone(), slot);
        frame.owned_slots.push(slot);
        slot
    }

    /// Resolves `name` against the global (outermost) frame's locals,
    /// allocating a slot there if this is the first sighting, for the
    /// `global` statement (spec §4.3 "`global`"). Frame 0 is always the
    /// top-level script frame: frames are only ever pushed on top of it by
    /// `invoke`/`invoke_inner`, never ahead of it.
    fn resolve_global(&mut self, name: &Rc<str>) -> RefSlot {
        if let Some(slot) = self.frames[0].locals.get(name) {
            return *slot;
        }
        let slot = self.pool.alloc(Value::Null);
        self.frames[0].locals.insert(name.clone(), slot);
        self.frames[0].owned_slots.push(slot);
        slot
    }

    fn load_name(&mut self, name: &Rc<str>) -> Value {
        let slot = self.resolve_local(name);
        let resolved = self.pool.resolve_slot(slot);
        self.pool.get(resolved).clone()
    }

    /// The main fetch/dispatch loop for the frame on top of the stack. Runs
    /// until that frame's own container is exhausted (implicit `return
    /// null`), an explicit return/throw happens, or an error aborts the run.
    fn run_frame(&mut self) -> Result<Signal, VmError> {
        loop {
            let Some(instr) = self.fetch() else {
                return Ok(Signal::Return(Value::Null));
            };
            self.current_mut().ip += 1;
            match instr.op {
                Opcode::Done | Opcode::Halt => {
                    let v = if instr.p1 == 1 { self.pop() } else { Value::Null };
                    return Ok(Signal::Return(v));
                }
                Opcode::Noop | Opcode::Yield => {
                    if instr.op == Opcode::Yield {
                        self.emit_diagnostic(ErrorKind::Notice, instr.line, "generators are not supported in this release; `yield` is a no-op");
                    }
                }
                Opcode::Jmp => self.current_mut().ip = instr.p2 as usize,
                Opcode::Jz => {
                    let v = self.pop();
                    if !v.to_bool() {
                        self.current_mut().ip = instr.p2 as usize;
                    }
                }
                Opcode::Jnz => {
                    let v = self.pop();
                    if v.to_bool() {
                        self.current_mut().ip = instr.p2 as usize;
                    }
                }
                Opcode::Global => {
                    let Operand::NameList(names) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("GLOBAL without a name list".into()));
                    };
                    for name in names.clone() {
                        let slot = self.resolve_global(&name);
                        self.current_mut().locals.insert(name, slot);
                    }
                }

                Opcode::Load => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD without a name operand".into()));
                    };
                    let v = self.load_name(name);
                    self.push(v);
                }
                Opcode::LoadC => {
                    let v = self
                        .constants
                        .get(instr.p1 as usize)
                        .cloned()
                        .ok_or_else(|| VmError::MalformedBytecode("LOADC index out of range".into()))?;
                    self.push(v);
                }
                Opcode::LoadRef => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD_REF without a name operand".into()));
                    };
                    let slot = self.resolve_local(name);
                    self.push(Value::Reference(self.pool.resolve_slot(slot)));
                }
                Opcode::LoadIdx => {
                    let index = self.pop();
                    let container = self.pop();
                    match self.index_get(&container, &index, instr.line)? {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }
                Opcode::LoadMap => {
                    let count = instr.p1 as usize;
                    let mut pairs = Vec::with_capacity(count);
                    for _ in 0..count {
                        let value = self.pop();
                        let key = self.pop();
                        pairs.push((key, value));
                    }
                    pairs.reverse();
                    let mut arr = OrderedArray::new();
                    for (k, v) in pairs {
                        arr.set(ArrayKey::from_value(&k), v);
                    }
                    self.push(Value::Array(Rc::new(RefCell::new(arr))));
                }
                Opcode::LoadList => {
                    let count = instr.p1 as usize;
                    let mut values = Vec::with_capacity(count);
                    for _ in 0..count {
                        values.push(self.pop());
                    }
                    values.reverse();
                    let mut arr = OrderedArray::new();
                    for v in values {
                        arr.push(v);
                    }
                    self.push(Value::Array(Rc::new(RefCell::new(arr))));
                }
                Opcode::LoadClosure => {
                    let Operand::Closure(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD_CLOSURE without a closure operand".into()));
                    };
                    let mut captured = HashMap::new();
                    for (name, by_ref) in &descriptor.captures {
                        let slot = self.resolve_local(name);
                        let resolved = self.pool.resolve_slot(slot);
                        if *by_ref {
                            captured.insert(name.clone(), resolved);
                        } else {
                            let value = self.pool.get(resolved).deep_copy();
                            captured.insert(name.clone(), self.pool.alloc(value));
                        }
                    }
                    let capture = ClosureCapture { def: descriptor.function.clone(), captured };
                    let mut instance = ObjectInstance::new("Closure");
                    instance.set("__closure", Value::Resource(ResourceHandle::new("Closure", capture)));
                    self.push(Value::Object(Rc::new(RefCell::new(instance))));
                }
                Opcode::LoadException => {
                    let Operand::Exception(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD_EXCEPTION without a descriptor".into()));
                    };
                    self.exception_stack.push(ExceptionFrame {
                        frame_depth: self.frames.len() - 1,
                        operand_depth: self.operand_stack.len(),
                        catches: descriptor.catches.clone(),
                        resume_ip: instr.p2,
                    });
                }
                Opcode::PopException => {
                    self.exception_stack.pop();
                }
                Opcode::LoadStatic => {
                    let Operand::Name(composed) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD_STATIC without a name operand".into()));
                    };
                    let (class_name, member) = self.resolve_composed_class(composed)?;
                    let slot = self.resolve_static_slot(&class_name, member)?;
                    let v = self.statics[slot as usize].clone().unwrap_or(Value::Null);
                    self.push(v);
                }
                Opcode::StoreStatic => {
                    let Operand::Name(composed) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("STORE_STATIC without a name operand".into()));
                    };
                    let (class_name, member) = self.resolve_composed_class(composed)?;
                    let slot = self.resolve_static_slot(&class_name, member)?;
                    let value = self.pop().deep_copy();
                    self.statics[slot as usize] = Some(value.clone());
                    self.push(value);
                }
                Opcode::DefineConst => {
                    let Operand::Const(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("DEFINE_CONST without a descriptor".into()));
                    };
                    if self.global_consts.contains_key(&descriptor.name) {
                        self.emit_diagnostic(
                            ErrorKind::Notice,
                            instr.line,
                            format!("constant {} already defined", descriptor.name),
                        );
                    } else {
                        self.global_consts.insert(descriptor.name.clone(), Rc::new(descriptor.body.clone()));
                    }
                }
                Opcode::LoadConst => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("LOAD_CONST without a name operand".into()));
                    };
                    if let Some(v) = self.global_const_cache.get(name) {
                        self.push(v.clone());
                    } else if let Some(body) = self.global_consts.get(name).cloned() {
                        let value = self.run_initializer(&body);
                        self.global_const_cache.insert(name.clone(), value.clone());
                        self.push(value);
                    } else {
                        return Err(VmError::Fatal(format!("undefined constant {name}")));
                    }
                }

                Opcode::Store => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("STORE without a name operand".into()));
                    };
                    let value = self.pop().deep_copy();
                    let slot = self.resolve_local(name);
                    let resolved = self.pool.resolve_slot(slot);
                    self.pool.set(resolved, value.clone());
                    self.push(value);
                }
                Opcode::StoreRef => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("STORE_REF without a name operand".into()));
                    };
                    let source = self.pop();
                    let Value::Reference(slot) = source else {
                        return Err(VmError::MalformedBytecode("STORE_REF expects a Reference on the stack".into()));
                    };
                    self.current_mut().locals.insert(name.clone(), slot);
                }
                Opcode::StoreIdx => {
                    let value = self.pop().deep_copy();
                    let key = if instr.p1 == 1 { None } else { Some(self.pop()) };
                    let container = self.pop();
                    if let Some(signal) = self.index_set(&container, key, value.clone(), instr.line)? {
                        if let Signal::Thrown(exc) = signal {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                    self.push(value);
                }
                Opcode::StoreIdxRef => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("STORE_IDX_REF without a name operand".into()));
                    };
                    let slot = self.resolve_local(name);
                    let resolved = self.pool.resolve_slot(slot);
                    let key = if instr.p1 == 1 { None } else { Some(self.pop()) };
                    let container = self.pop();
                    if let Some(signal) = self.index_set(&container, key, Value::Reference(resolved), instr.line)? {
                        if let Signal::Thrown(exc) = signal {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }

                Opcode::Pop => {
                    self.pop();
                }
                Opcode::Pull => {
                    let n = instr.p1 as usize;
                    let idx = self.operand_stack.len().checked_sub(n + 1).ok_or_else(|| {
                        VmError::MalformedBytecode("PULL index beyond operand stack".into())
                    })?;
                    let v = self.operand_stack.remove(idx);
                    self.push(v);
                }
                Opcode::Swap => {
                    let len = self.operand_stack.len();
                    self.operand_stack.swap(len - 1, len - 2);
                }

                Opcode::CvtInt => {
                    let v = self.pop();
                    self.push(Value::Int(v.to_int()));
                }
                Opcode::CvtReal => {
                    let v = self.pop();
                    self.push(Value::Real(v.to_real()));
                }
                Opcode::CvtStr => {
                    let v = self.pop();
                    self.push(Value::str(v.to_display_string()));
                }
                Opcode::CvtBool => {
                    let v = self.pop();
                    self.push(Value::Bool(v.to_bool()));
                }
                Opcode::CvtNull => {
                    self.pop();
                    self.push(Value::Null);
                }
                Opcode::CvtNumc => {
                    let v = self.pop();
                    self.push(v.to_number());
                }
                Opcode::CvtArray => {
                    let v = self.pop();
                    self.push(self.coerce_to_array(v));
                }
                Opcode::CvtObj => {
                    let v = self.pop();
                    self.push(self.coerce_to_object(v));
                }

                Opcode::Uminus => {
                    let v = self.pop();
                    self.push(arithmetic::uminus(&v));
                }
                Opcode::Uplus => {
                    let v = self.pop();
                    self.push(arithmetic::uplus(&v));
                }
                Opcode::Bitnot => {
                    let v = self.pop();
                    self.push(arithmetic::bitnot(&v));
                }
                Opcode::Lnot => {
                    let v = self.pop();
                    self.push(arithmetic::lnot(&v));
                }
                Opcode::Incr | Opcode::Decr => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("INCR/DECR without a name operand".into()));
                    };
                    let slot = self.resolve_local(name);
                    let resolved = self.pool.resolve_slot(slot);
                    let delta = if instr.op == Opcode::Incr { 1 } else { -1 };
                    let current = self.pool.get(resolved).clone();
                    let updated = arithmetic::add(&current, &Value::Int(delta));
                    self.pool.set(resolved, updated.clone());
                    self.push(updated);
                }

                Opcode::Add => self.binop(arithmetic::add),
                Opcode::Sub => self.binop(arithmetic::sub),
                Opcode::Mul => self.binop(arithmetic::mul),
                Opcode::Div => {
                    let b = self.pop();
                    let a = self.pop();
                    match arithmetic::div(&a, &b) {
                        Ok(v) => self.push(v),
                        Err(msg) => {
                            self.emit_diagnostic(ErrorKind::Warning, instr.line, msg);
                            self.push(Value::Bool(false));
                        }
                    }
                }
                Opcode::Mod => {
                    let b = self.pop();
                    let a = self.pop();
                    match arithmetic::modulo(&a, &b) {
                        Ok(v) => self.push(v),
                        Err(msg) => {
                            self.emit_diagnostic(ErrorKind::Warning, instr.line, msg);
                            self.push(Value::Bool(false));
                        }
                    }
                }
                Opcode::Cat => self.binop(arithmetic::concat),
                Opcode::Shl => self.binop(arithmetic::shl),
                Opcode::Shr => self.binop(arithmetic::shr),
                Opcode::Band => self.binop(arithmetic::band),
                Opcode::Bor => self.binop(arithmetic::bor),
                Opcode::Bxor => self.binop(arithmetic::bxor),
                Opcode::Land => self.binop(arithmetic::land),
                Opcode::Lor => self.binop(arithmetic::lor),
                Opcode::Lxor => self.binop(arithmetic::lxor),

                Opcode::AddStore => self.compound_store(&instr, arithmetic::add)?,
                Opcode::SubStore => self.compound_store(&instr, arithmetic::sub)?,
                Opcode::MulStore => self.compound_store(&instr, arithmetic::mul)?,
                Opcode::CatStore => self.compound_store(&instr, arithmetic::concat)?,
                Opcode::ShlStore => self.compound_store(&instr, arithmetic::shl)?,
                Opcode::ShrStore => self.compound_store(&instr, arithmetic::shr)?,
                Opcode::BandStore => self.compound_store(&instr, arithmetic::band)?,
                Opcode::BorStore => self.compound_store(&instr, arithmetic::bor)?,
                Opcode::BxorStore => self.compound_store(&instr, arithmetic::bxor)?,
                Opcode::DivStore => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("DIV_STORE without a name operand".into()));
                    };
                    let rhs = self.pop();
                    let slot = self.resolve_local(name);
                    let resolved = self.pool.resolve_slot(slot);
                    let current = self.pool.get(resolved).clone();
                    let updated = match arithmetic::div(&current, &rhs) {
                        Ok(v) => v,
                        Err(msg) => {
                            self.emit_diagnostic(ErrorKind::Warning, instr.line, msg);
                            Value::Bool(false)
                        }
                    };
                    self.pool.set(resolved, updated.clone());
                    self.push(updated);
                }
                Opcode::ModStore => {
                    let Operand::Name(name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("MOD_STORE without a name operand".into()));
                    };
                    let rhs = self.pop();
                    let slot = self.resolve_local(name);
                    let resolved = self.pool.resolve_slot(slot);
                    let current = self.pool.get(resolved).clone();
                    let updated = match arithmetic::modulo(&current, &rhs) {
                        Ok(v) => v,
                        Err(msg) => {
                            self.emit_diagnostic(ErrorKind::Warning, instr.line, msg);
                            Value::Bool(false)
                        }
                    };
                    self.pool.set(resolved, updated.clone());
                    self.push(updated);
                }

                Opcode::Lt => self.compare(|o| o == Ordering::Less),
                Opcode::Le => self.compare(|o| o != Ordering::Greater),
                Opcode::Gt => self.compare(|o| o == Ordering::Greater),
                Opcode::Ge => self.compare(|o| o != Ordering::Less),
                Opcode::Eq => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.loose_eq(&b)));
                }
                Opcode::Neq => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(!a.loose_eq(&b)));
                }
                Opcode::Teq | Opcode::Seq => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(a.strict_eq(&b)));
                }
                Opcode::Tne | Opcode::Sne => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::Bool(!a.strict_eq(&b)));
                }

                Opcode::Call => {
                    let argc = instr.p1 as usize;
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop());
                    }
                    args.reverse();
                    let has_receiver = instr.p2 == 1;
                    let signal = if has_receiver {
                        let receiver = self.pop();
                        let Value::Object(obj) = receiver else {
                            return Err(VmError::MalformedBytecode("CALL with receiver expects an object".into()));
                        };
                        let Operand::Name(method) = &instr.p3 else {
                            return Err(VmError::MalformedBytecode("CALL with receiver needs a method name".into()));
                        };
                        self.call_method(&obj, method, args)?
                    } else {
                        match &instr.p3 {
                            Operand::Name(name) => self.call_named(name, args)?,
                            Operand::None => {
                                let callee = self.pop();
                                self.call_value(&callee, args)?
                            }
                            _ => return Err(VmError::MalformedBytecode("CALL with unexpected operand".into())),
                        }
                    };
                    match signal {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }

                Opcode::New => {
                    let argc = instr.p1 as usize;
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop());
                    }
                    args.reverse();
                    let Operand::Name(class_name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("NEW without a class name".into()));
                    };
                    let handle = self.instantiate(class_name, args)?;
                    match handle {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }
                Opcode::Clone => {
                    let v = self.pop();
                    let Value::Object(obj) = v else {
                        return Err(VmError::MalformedBytecode("CLONE expects an object".into()));
                    };
                    let cloned = quill_core::class::clone_instance(&obj);
                    let class_name = cloned.borrow().class_name.clone();
                    if let Some((def, body)) = self.resolve_method(&class_name, "__clone", &[]) {
                        match self.invoke(def, body, Vec::new(), Some(cloned.clone()), Some(class_name))? {
                            Signal::Return(_) => {}
                            Signal::Thrown(exc) => {
                                if let Some(s) = self.handle_throw(exc)? {
                                    return Ok(s);
                                }
                            }
                        }
                    }
                    self.push(Value::Object(cloned));
                }
                Opcode::Member => {
                    let receiver = self.pop();
                    let Operand::Name(field) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("MEMBER without a field name".into()));
                    };
                    let Value::Object(_) = &receiver else {
                        return Err(VmError::MalformedBytecode("MEMBER expects an object".into()));
                    };
                    let field_value = Value::str(field.as_ref());
                    match self.index_get(&receiver, &field_value, instr.line)? {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }
                Opcode::Uplink => {
                    let argc = instr.p1 as usize;
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop());
                    }
                    args.reverse();
                    let Operand::Name(method) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("UPLINK without a method name".into()));
                    };
                    let signal = self.call_parent(method, args)?;
                    match signal {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }
                Opcode::CallStatic => {
                    let argc = instr.p1 as usize;
                    let mut args = Vec::with_capacity(argc);
                    for _ in 0..argc {
                        args.push(self.pop());
                    }
                    args.reverse();
                    let Operand::Name(composed) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("CALL_STATIC without a name operand".into()));
                    };
                    let (resolved_class, method) = self.resolve_composed_class(composed)?;
                    let method = method.to_string();
                    let instance = self.current().instance.clone();
                    let Some((def, body)) = self.resolve_method(&resolved_class, &method, &args) else {
                        return Err(VmError::Fatal(format!("call to undefined method {resolved_class}::{method}")));
                    };
                    let signal = self.invoke(def, body, args, instance, Some(resolved_class))?;
                    match signal {
                        Signal::Return(v) => self.push(v),
                        Signal::Thrown(exc) => {
                            if let Some(s) = self.handle_throw(exc)? {
                                return Ok(s);
                            }
                        }
                    }
                }
                Opcode::IsA => {
                    let v = self.pop();
                    let Operand::Name(class_name) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("IS_A without a class name".into()));
                    };
                    let is_a = match &v {
                        Value::Object(obj) => self.is_instance_of(&obj.borrow().class_name, class_name),
                        _ => false,
                    };
                    self.push(Value::Bool(is_a));
                }

                Opcode::ForeachInit => {
                    let Operand::Foreach(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("FOREACH_INIT without a descriptor".into()));
                    };
                    let v = self.pop();
                    let Value::Array(array) = v else {
                        return Err(VmError::MalformedBytecode("FOREACH_INIT expects an array".into()));
                    };
                    self.foreach_stack.push(ForeachState::new(array, descriptor.by_ref));
                }
                Opcode::ForeachStep => {
                    let Operand::Foreach(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("FOREACH_STEP without a descriptor".into()));
                    };
                    self.foreach_step(descriptor, instr.p2)?;
                }

                Opcode::Throw => {
                    let v = self.pop();
                    if let Some(s) = self.handle_throw(v)? {
                        return Ok(s);
                    }
                }

                Opcode::Consume => {
                    let text = if instr.p1 == 1 {
                        let Operand::Name(s) = &instr.p3 else {
                            return Err(VmError::MalformedBytecode("CONSUME literal without text operand".into()));
                        };
                        s.to_string()
                    } else {
                        self.pop().to_display_string()
                    };
                    self.output.write(text.as_bytes());
                }
                Opcode::Switch => {
                    let Operand::Switch(descriptor) = &instr.p3 else {
                        return Err(VmError::MalformedBytecode("SWITCH without a descriptor".into()));
                    };
                    let subject = self.pop();
                    let mut target = descriptor.out_index;
                    let mut default_target = None;
                    let mut matched = false;
                    for case in &descriptor.cases {
                        if case.is_default {
                            default_target = Some(case.body_start);
                            continue;
                        }
                        let test_value = self.run_initializer(&case.test);
                        if subject.loose_eq(&test_value) {
                            target = case.body_start;
                            matched = true;
                            break;
                        }
                    }
                    if !matched {
                        if let Some(d) = default_target {
                            target = d;
                        }
                    }
                    self.current_mut().ip = target as usize;
                }
                Opcode::ErrCtrl => {
                    self.suppress_depth += instr.p1 as i32;
                }
            }
        }
    }

    fn binop(&mut self, f: fn(&Value, &Value) -> Value) {
        let b = self.pop();
        let a = self.pop();
        self.push(f(&a, &b));
    }

    fn compare(&mut self, pred: fn(Ordering) -> bool) {
        let b = self.pop();
        let a = self.pop();
        let ord = arithmetic::compare_loose(&a, &b);
        self.push(Value::Bool(pred(ord)));
    }

    fn compound_store(&mut self, instr: &Instruction, f: fn(&Value, &Value) -> Value) -> Result<(), VmError> {
        let Operand::Name(name) = &instr.p3 else {
            return Err(VmError::MalformedBytecode("compound-assign without a name operand".into()));
        };
        let rhs = self.pop();
        let slot = self.resolve_local(name);
        let resolved = self.pool.resolve_slot(slot);
        let current = self.pool.get(resolved).clone();
        let updated = f(&current, &rhs);
        self.pool.set(resolved, updated.clone());
        self.push(updated);
        Ok(())
    }

    fn coerce_to_array(&self, v: Value) -> Value {
        match v {
            Value::Array(a) => Value::Array(a),
            other => {
                let mut a = OrderedArray::new();
                a.push(other);
                Value::Array(Rc::new(RefCell::new(a)))
            }
        }
    }

    fn coerce_to_object(&self, v: Value) -> Value {
        match v {
            Value::Object(o) => Value::Object(o),
            other => {
                let mut inst = ObjectInstance::new("stdClass");
                inst.set("scalar", other);
                Value::Object(Rc::new(RefCell::new(inst)))
            }
        }
    }

    /// Spec §4.4 "Calls" step 2: "for typed parameters, casts or validates
    /// per the parameter's declared type". Scalar hints coerce the value the
    /// same way the matching `CVT_*` opcode would; a class-name hint can't
    /// coerce, so it validates via `instanceof` and reports a diagnostic on
    /// mismatch instead (the language has no argument-binding throw point to
    /// raise a catchable type error from here).
    fn coerce_param(&mut self, value: Value, declared: &str, param_name: &str, line: u32) -> Value {
        match declared {
            "mixed" => value,
            "int" | "integer" => Value::Int(value.to_int()),
            "float" | "real" | "double" => Value::Real(value.to_real()),
            "bool" | "boolean" => Value::Bool(value.to_bool()),
            "string" => Value::str(value.to_display_string()),
            "array" => self.coerce_to_array(value),
            "object" => self.coerce_to_object(value),
            "null" => {
                if !matches!(value, Value::Null) {
                    self.emit_diagnostic(ErrorKind::Warning, line, format!("argument ${param_name} expected null"));
                }
                value
            }
            class_name => {
                let ok = matches!(&value, Value::Object(obj) if self.is_instance_of(&obj.borrow().class_name, class_name));
                if !ok {
                    self.emit_diagnostic(
                        ErrorKind::Error,
                        line,
                        format!("argument ${param_name} must be an instance of {class_name}"),
                    );
                }
                value
            }
        }
    }

    /// Reads through an index/member access. Returns a `Signal` rather than
    /// a bare `Value` because an object field miss falls back to `__get`
    /// (spec §4.5 "magic methods"), which is a script method call and can
    /// itself `return`/`throw` like any other invocation.
    fn index_get(&mut self, container: &Value, index: &Value, line: u32) -> Result<Signal, VmError> {
        match container {
            Value::Array(a) => {
                let key = ArrayKey::from_value(index);
                let v = match a.borrow().get(&key) {
                    Some(v) => v.clone(),
                    None => {
                        self.emit_diagnostic(ErrorKind::Warning, line, "undefined array key");
                        Value::Null
                    }
                };
                Ok(Signal::Return(v))
            }
            Value::Str(s) => {
                let i = index.to_int();
                let v = s
                    .as_bytes()
                    .get(i.max(0) as usize)
                    .map(|b| Value::str((*b as char).to_string()))
                    .unwrap_or(Value::Null);
                Ok(Signal::Return(v))
            }
            // `$obj->field` reads compile through MEMBER in the common case,
            // but a dynamic `$obj->{$name}` goes through LOAD_IDX instead;
            // both end up here.
            Value::Object(obj) => {
                let field = index.to_display_string();
                let existing = obj.borrow().get(&field).cloned();
                match existing {
                    Some(v) => Ok(Signal::Return(v)),
                    None => {
                        let class_name = obj.borrow().class_name.clone();
                        match self.resolve_method(&class_name, "__get", &[Value::str(field.as_str())]) {
                            Some((def, body)) => {
                                let obj = obj.clone();
                                self.invoke(def, body, vec![Value::str(field.as_str())], Some(obj), Some(class_name))
                            }
                            None => Ok(Signal::Return(Value::Null)),
                        }
                    }
                }
            }
            _ => Ok(Signal::Return(Value::Null)),
        }
    }

    /// Writes through an index/member access. Returns `Ok(Some(signal))`
    /// only when an object field miss fell back to `__set` (spec §4.5), so
    /// the opcode handler can propagate a throw the same way every other
    /// call site does; `Ok(None)` means the store was a plain field/array
    /// write with nothing further to propagate.
    fn index_set(&mut self, container: &Value, key: Option<Value>, value: Value, line: u32) -> Result<Option<Signal>, VmError> {
        match container {
            Value::Array(a) => {
                let mut arr = a.borrow_mut();
                match key {
                    Some(k) => arr.set(ArrayKey::from_value(&k), value),
                    None => {
                        arr.push(value);
                    }
                }
                Ok(None)
            }
            Value::Object(obj) => {
                let Some(k) = key else {
                    self.emit_diagnostic(ErrorKind::Warning, line, "cannot append to an object");
                    return Ok(None);
                };
                let field = k.to_display_string();
                let has_field = obj.borrow().get(&field).is_some();
                if has_field {
                    obj.borrow_mut().set(field, value);
                    return Ok(None);
                }
                let class_name = obj.borrow().class_name.clone();
                match self.resolve_method(&class_name, "__set", &[Value::str(field.as_str()), value.clone()]) {
                    Some((def, body)) => {
                        let obj = obj.clone();
                        let signal =
                            self.invoke(def, body, vec![Value::str(field.as_str()), value], Some(obj), Some(class_name))?;
                        Ok(Some(signal))
                    }
                    None => {
                        obj.borrow_mut().set(field, value);
                        Ok(None)
                    }
                }
            }
            _ => {
                self.emit_diagnostic(ErrorKind::Warning, line, "cannot use a non-array as an array");
                Ok(None)
            }
        }
    }

    fn is_instance_of(&self, class_name: &str, target: &str) -> bool {
        if class_name == target {
            return true;
        }
        let mut current = self.classes.get(class_name);
        while let Some(class) = current {
            if class.interfaces.iter().any(|i| i.as_ref() == target) {
                return true;
            }
            match &class.base {
                Some(base) if base.as_ref() == target => return true,
                Some(base) => current = self.classes.get(base.as_ref()),
                None => break,
            }
        }
        false
    }

    fn call_named(&mut self, name: &Rc<str>, args: Vec<Value>) -> Result<Signal, VmError> {
        if let Some(entries) = self.functions.get(name.as_ref()) {
            let defs: Vec<Rc<FunctionDef>> = entries.iter().map(|e| e.def.clone()).collect();
            let idx = crate::overload::resolve_overload(&defs, &args);
            let body = self.functions[name.as_ref()][idx].body.clone();
            let def = defs[idx].clone();
            return self.invoke(def, body, args, None, None);
        }
        if let Some(host) = self.hosts.get_function(name.as_ref()) {
            let mut ctx = HostContext { output: &mut self.output };
            return Ok(match host.call(&mut ctx, &args) {
                HostOutcome::Return(v) => Signal::Return(v),
                HostOutcome::Throw(v) => Signal::Thrown(v),
                HostOutcome::Abort(msg) => return Err(VmError::HostAbort(msg)),
            });
        }
        Err(VmError::Fatal(format!("call to undefined function {name}")))
    }

    fn call_value(&mut self, callee: &Value, args: Vec<Value>) -> Result<Signal, VmError> {
        match callee {
            Value::Str(name) => self.call_named(name, args),
            Value::Object(obj) => {
                let closure = obj.borrow().get("__closure").cloned();
                match closure {
                    Some(Value::Resource(resource)) => {
                        let capture = resource
                            .downcast_ref::<ClosureCapture>()
                            .ok_or_else(|| VmError::Fatal("value is not callable".into()))?;
                        let def = capture.def.clone();
                        let captured = capture.captured.clone();
                        drop(capture);
                        let body = Rc::new(def.body.clone());
                        self.invoke_with_captures(def, body, args, captured)
                    }
                    _ => {
                        let class_name = obj.borrow().class_name.clone();
                        let Some((def, body)) = self.resolve_method(&class_name, "__invoke", &args) else {
                            return Err(VmError::Fatal(format!(
                                "object of class {class_name} is not callable (no __invoke method)"
                            )));
                        };
                        self.invoke(def, body, args, Some(obj.clone()), Some(class_name))
                    }
                }
            }
            _ => Err(VmError::Fatal("value is not callable".into())),
        }
    }

    fn call_method(&mut self, obj: &ObjectHandle, method: &Rc<str>, args: Vec<Value>) -> Result<Signal, VmError> {
        let class_name = obj.borrow().class_name.clone();
        if let Some(v) = self.try_native_exception_method(obj, &class_name, method) {
            return Ok(Signal::Return(v));
        }
        if let Some((def, body)) = self.resolve_method(&class_name, method, &args) {
            return self.invoke(def, body, args, Some(obj.clone()), Some(class_name));
        }
        // No matching method; spec §4.5 "magic methods" falls back to
        // `__call($name, $args)` before giving up.
        if let Some((def, body)) = self.resolve_method(&class_name, "__call", &[]) {
            let mut call_args = OrderedArray::new();
            for a in args {
                call_args.push(a);
            }
            let forwarded = vec![Value::str(method.as_ref()), Value::Array(Rc::new(RefCell::new(call_args)))];
            return self.invoke(def, body, forwarded, Some(obj.clone()), Some(class_name));
        }
        Err(VmError::Fatal(format!("call to undefined method {class_name}::{method}")))
    }

    /// The base `Exception` class has no script-level body (spec §4.5
    /// treats it like any other builtin surface exposed through the thin
    /// host-registration layer rather than compiled bytecode) — its handful
    /// of accessors are implemented natively here, the way the reference
    /// implementation's base classes are C, not compiled script.
    fn try_native_exception_method(&self, obj: &ObjectHandle, class_name: &str, method: &str) -> Option<Value> {
        if self.resolve_method(class_name, method, &[]).is_some() {
            return None; // a script-defined override takes precedence
        }
        if !self.is_instance_of(class_name, "Exception") {
            return None;
        }
        let b = obj.borrow();
        match method {
            "getMessage" => Some(b.get("message").cloned().unwrap_or_else(|| Value::str(""))),
            "getCode" => Some(b.get("code").cloned().unwrap_or(Value::Int(0))),
            _ => None,
        }
    }

    fn call_parent(&mut self, method: &Rc<str>, args: Vec<Value>) -> Result<Signal, VmError> {
        let self_class = self.current().self_class.clone();
        let instance = self.current().instance.clone();
        let Some(self_class) = self_class else {
            return Err(VmError::Fatal("parent:: call outside a method body".into()));
        };
        let Some(base) = self.classes.get(self_class.as_ref()).and_then(|c| c.base.clone()) else {
            return Err(VmError::Fatal(format!("class {self_class} has no parent")));
        };
        let Some((def, body)) = self.resolve_method(&base, method, &args) else {
            return Err(VmError::Fatal(format!("call to undefined method {base}::{method}")));
        };
        self.invoke(def, body, args, instance, Some(base))
    }

    /// Walks `class_name`'s base chain for the first method named `method`,
    /// skipping groups the calling context (the frame currently on top of
    /// the stack, if any) can't see (spec §4.5 "private/protected/public
    /// visibility"): `private` is only reachable from inside the declaring
    /// class's own methods, `protected` from that class or any subclass.
    fn resolve_method(&self, class_name: &str, method: &str, args: &[Value]) -> Option<(Rc<FunctionDef>, Rc<InstructionContainer>)> {
        let caller_class = self.frames.last().and_then(|f| f.self_class.clone());
        let mut current = self.classes.get(class_name);
        while let Some(class) = current {
            if let Some(group) = class.find_method(method) {
                let visibility = group.first().map(|m| m.visibility).unwrap_or(Visibility::Public);
                let visible = match visibility {
                    Visibility::Public => true,
                    Visibility::Private => caller_class.as_deref() == Some(class.name.as_ref()),
                    Visibility::Protected => caller_class.as_deref().is_some_and(|c| {
                        self.is_instance_of(c, class.name.as_ref()) || self.is_instance_of(class.name.as_ref(), c)
                    }),
                };
                if visible {
                    let defs: Vec<Rc<FunctionDef>> = group.iter().map(|m| m.def.clone()).collect();
                    let idx = crate::overload::resolve_overload(&defs, args);
                    let def = defs[idx].clone();
                    let body = Rc::new(def.body.clone());
                    return Some((def, body));
                }
            }
            current = class.base.as_deref().and_then(|b| self.classes.get(b));
        }
        None
    }

    fn instantiate(&mut self, class_name: &Rc<str>, args: Vec<Value>) -> Result<Signal, VmError> {
        let Some(class) = self.classes.get(class_name.as_ref()).cloned() else {
            return Err(VmError::Fatal(format!("instantiating undefined class {class_name}")));
        };
        if class.is_abstract() {
            return Err(VmError::Fatal(format!("cannot instantiate abstract class {class_name}")));
        }
        let mut instance = ObjectInstance::new(class_name.clone());
        let mut chain = vec![class.clone()];
        {
            let mut base = class.base.clone();
            while let Some(b) = base {
                if let Some(parent) = self.classes.get(b.as_ref()).cloned() {
                    base = parent.base.clone();
                    chain.push(parent);
                } else {
                    break;
                }
            }
        }
        for c in chain.iter().rev() {
            for attr in c.attrs.values() {
                if attr.static_slot.is_none() {
                    let value = self.run_initializer(&attr.initializer);
                    instance.set(attr.name.clone(), value);
                }
            }
        }
        let handle = Rc::new(RefCell::new(instance));
        if let Some((def, body)) = self.resolve_method(class_name.as_ref(), "__construct", &args) {
            match self.invoke(def, body, args, Some(handle.clone()), Some(class_name.clone()))? {
                Signal::Return(_) => {}
                Signal::Thrown(exc) => return Ok(Signal::Thrown(exc)),
            }
        } else if self.is_instance_of(class_name.as_ref(), "Exception") {
            let mut b = handle.borrow_mut();
            b.set("message", args.first().cloned().unwrap_or_else(|| Value::str("")));
            b.set("code", args.get(1).cloned().unwrap_or(Value::Int(0)));
        }
        Ok(Signal::Return(Value::Object(handle)))
    }

    fn invoke(
        &mut self,
        def: Rc<FunctionDef>,
        body: Rc<InstructionContainer>,
        args: Vec<Value>,
        instance: Option<ObjectHandle>,
        self_class: Option<Rc<str>>,
    ) -> Result<Signal, VmError> {
        self.invoke_inner(def, body, args, HashMap::new(), instance, self_class)
    }

    fn invoke_with_captures(
        &mut self,
        def: Rc<FunctionDef>,
        body: Rc<InstructionContainer>,
        args: Vec<Value>,
        captures: HashMap<Rc<str>, RefSlot>,
    ) -> Result<Signal, VmError> {
        self.invoke_inner(def, body, args, captures, None, None)
    }

    fn invoke_inner(
        &mut self,
        def: Rc<FunctionDef>,
        body: Rc<InstructionContainer>,
        args: Vec<Value>,
        captures: HashMap<Rc<str>, RefSlot>,
        instance: Option<ObjectHandle>,
        self_class: Option<Rc<str>>,
    ) -> Result<Signal, VmError> {
        if self.frames.len() >= self.max_recursion_depth {
            return Err(VmError::StackOverflow);
        }
        let operand_base = self.operand_stack.len();
        let mut frame = Frame::new(def.name.clone(), body, operand_base);
        if let Some(inst) = &instance {
            let slot = self.pool.alloc(Value::Object(inst.clone()));
            frame.locals.insert(Rc::from("this"), slot);
            frame.owned_slots.push(slot);
        }
        frame.instance = instance;
        frame.self_class = self_class;
        for (name, slot) in captures {
            frame.locals.insert(name, slot);
        }

        let mut args = args.into_iter();
        for param in &def.params {
            if param.variadic {
                let mut rest = OrderedArray::new();
                for v in args.by_ref() {
                    rest.push(v);
                }
                let slot = self.pool.alloc(Value::Array(Rc::new(RefCell::new(rest))));
                frame.locals.insert(param.name.clone(), slot);
                frame.owned_slots.push(slot);
                continue;
            }
            match args.next() {
                Some(Value::Reference(r)) if param.by_ref => {
                    // Aliases the caller's own slot; this frame does not own
                    // it and must not free it on teardown.
                    frame.locals.insert(param.name.clone(), r);
                }
                Some(v) => {
                    let v = match &param.declared_type {
                        Some(declared) => self.coerce_param(v, declared, &param.name, 0),
                        None => v,
                    };
                    let slot = self.pool.alloc(v.deep_copy());
                    frame.locals.insert(param.name.clone(), slot);
                    frame.owned_slots.push(slot);
                }
                None => {
                    let default_value = match &param.default {
                        Some(init) => self.run_initializer(init),
                        None => Value::Null,
                    };
                    let default_value = match &param.declared_type {
                        Some(declared) => self.coerce_param(default_value, declared, &param.name, 0),
                        None => default_value,
                    };
                    let slot = self.pool.alloc(default_value);
                    frame.locals.insert(param.name.clone(), slot);
                    frame.owned_slots.push(slot);
                }
            }
        }

        for decl in &def.statics {
            if self.statics.len() <= decl.slot as usize {
                self.statics.resize_with(decl.slot as usize + 1, || None);
            }
            if self.statics[decl.slot as usize].is_none() {
                let value = self.run_initializer(&decl.initializer);
                self.statics[decl.slot as usize] = Some(value);
            }
            let current_value = self.statics[decl.slot as usize].clone().unwrap_or(Value::Null);
            let slot = self.pool.alloc(current_value);
            frame.locals.insert(decl.name.clone(), slot);
        }

        self.frames.push(frame);
        let result = self.run_frame();

        // Write static locals back before tearing down the frame.
        for decl in &def.statics {
            if let Some(slot) = self.current().locals.get(&decl.name).copied() {
                let value = self.pool.get(slot).clone();
                self.statics[decl.slot as usize] = Some(value);
            }
        }

        let frame = self.frames.pop().expect("frame pushed above");
        for slot in frame.owned_slots {
            self.pool.free(slot);
        }
        self.operand_stack.truncate(operand_base);
        result
    }

    /// Search for a matching `catch` at the current frame's own installed
    /// handlers and, if found, run its body and resume. Returns `Ok(None)`
    /// to keep dispatching this frame normally, `Ok(Some(signal))` to return
    /// immediately from `run_frame` (either handled-and-returned, or
    /// propagating the throw to the caller).
    fn handle_throw(&mut self, exc: Value) -> Result<Option<Signal>, VmError> {
        let Value::Object(obj) = &exc else {
            return Err(VmError::Fatal("thrown value is not an object".into()));
        };
        let current_frame_depth = self.frames.len() - 1;
        let exc_class = obj.borrow().class_name.clone();
        while let Some(pos) = self
            .exception_stack
            .iter()
            .rposition(|ef| ef.frame_depth == current_frame_depth)
        {
            let frame = &self.exception_stack[pos];
            let matched = frame
                .catches
                .iter()
                .find(|c| self.is_instance_of(&exc_class, &c.exception_class))
                .cloned();
            if let Some(catch) = matched {
                let ef = self.exception_stack.split_off(pos).into_iter().next().unwrap();
                self.operand_stack.truncate(ef.operand_depth);
                let var_slot = self.pool.alloc(exc);
                self.current_mut().locals.insert(catch.var_name.clone(), var_slot);
                self.current_mut().owned_slots.push(var_slot);
                self.run_catch_body(&catch.body, ef.resume_ip)?;
                return Ok(None);
            } else {
                // no catch in this installed frame matched; drop it and keep
                // searching handlers installed earlier in the same frame.
                self.exception_stack.truncate(pos);
            }
        }
        Ok(Some(Signal::Thrown(exc)))
    }

    /// Temporarily swap the current frame's instruction stream to run a
    /// catch body, then restore it at `resume_ip`.
    fn run_catch_body(&mut self, body: &InstructionContainer, resume_ip: u32) -> Result<(), VmError> {
        let outer_container = self.current().container.clone();
        self.current_mut().container = Rc::new(body.clone());
        self.current_mut().ip = 0;
        let signal = self.run_frame()?;
        self.current_mut().container = outer_container;
        self.current_mut().ip = resume_ip as usize;
        match signal {
            Signal::Return(_) => Ok(()),
            Signal::Thrown(exc) => {
                // A throw inside the catch body re-enters the same search
                // at this frame (any later-installed handlers were already
                // dropped) by recursing through handle_throw.
                if let Some(Signal::Thrown(exc)) = self.handle_throw(exc)? {
                    return Err(VmError::Uncaught(describe_exception(&exc)));
                }
                Ok(())
            }
        }
    }

    fn foreach_step(&mut self, descriptor: &quill_core::ForeachDescriptor, out: u32) -> Result<(), VmError> {
        let Some(state) = self.foreach_stack.last_mut() else {
            return Err(VmError::MalformedBytecode("FOREACH_STEP without an active iterator".into()));
        };
        if let Some((key, slot)) = state.last_bound.take() {
            let value = self.pool.get(slot).clone();
            state.array.borrow_mut().set(key, value);
        }
        let state = self.foreach_stack.last_mut().unwrap();
        if state.exhausted() {
            self.foreach_stack.pop();
            self.current_mut().ip = out as usize;
            return Ok(());
        }
        let (key, value) = {
            let arr = state.array.borrow();
            let (k, v) = arr.iter().nth(state.position).expect("position checked above");
            (k.clone(), v.clone())
        };
        if let Some(key_var) = &descriptor_key_var(descriptor) {
            let slot = self.pool.alloc(key.to_value());
            self.current_mut().locals.insert(key_var.clone(), slot);
        }
        let value_slot = self.pool.alloc(value.deep_copy());
        self.current_mut().locals.insert(descriptor.value_var.clone(), value_slot);
        let state = self.foreach_stack.last_mut().unwrap();
        if state.by_ref {
            state.last_bound = Some((key, value_slot));
        }
        state.advance();
        Ok(())
    }
}

fn descriptor_key_var(descriptor: &quill_core::ForeachDescriptor) -> Option<Rc<str>> {
    descriptor.key_var.clone()
}

fn describe_exception(exc: &Value) -> String {
    if let Value::Object(obj) = exc {
        let b = obj.borrow();
        let message = b.get("message").map(|v| v.to_display_string()).unwrap_or_default();
        format!("{}: {}", b.class_name, message)
    } else {
        exc.to_display_string()
    }
}

