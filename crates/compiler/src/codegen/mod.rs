//! Single-pass code generator (spec §4.3 "Code generator"): walks the parsed
//! [`ast::Program`] once and emits `quill_core` bytecode directly into the
//! active [`InstructionContainer`], with no separate IR or optimization pass.
//!
//! Where the AST carries a dedicated node for something the reference
//! implementation composed out of generic postfix operators (`Call`,
//! `MethodCall`, `New`, `Member`, `StaticCall`), this generator emits the
//! matching opcode directly instead of reconstructing the reference
//! implementation's "fold the preceding CALL/MEMBER instruction" tricks —
//! there is no preceding instruction to inspect because there is no generic
//! postfix-application node to begin with. Every such simplification is
//! recorded in `DESIGN.md`.
//!
//! Diagnostics (undefined label, `break` outside a loop, redeclared
//! constant...) go through the caller's [`DiagnosticSink`] rather than a
//! `Result`: the generator always produces *some* bytecode for a malformed
//! program, matching spec §7's "record up to a budget, then abort" compiler
//! behavior rather than failing the whole compile on the first problem.

mod lvalue;
mod switch;

use crate::ast::{
    Arg, ArrayEntry, AttrDecl, CatchArm, ClassDecl, Expr, FunctionDecl, InterpPart, MethodDecl,
    Param as AstParam, Program, Stmt, Visibility as AstVisibility,
};
use crate::config::CompilerConfig;
use crate::diagnostics::DiagnosticSink;
use crate::operators::BinOp;
use lvalue::{Cached, Lvalue};
use quill_core::{
    Class, ClassAttr, ClassFlags, ClassMethod, ClosureDescriptor, ConstDescriptor, ErrorKind,
    FunctionDef, Instruction, InstructionContainer, MethodFlags, Opcode, Operand, Param,
    StaticVarDecl, Value, Visibility,
};
use quill_runtime::engine::Program as RuntimeProgram;
use std::collections::HashMap;
use std::rc::Rc;

/// Compiles a parsed program into an executable [`RuntimeProgram`]. The
/// returned program's `entry` holds every non-declaration top-level
/// statement in source order; `functions` and `classes` are hoisted
/// out-of-band so that forward references resolve without a second pass
/// (spec §4.3; mirrors how `Engine::execute` registers both before running
/// `entry`).
pub fn compile(program: &Program, diagnostics: &mut DiagnosticSink, config: &CompilerConfig) -> RuntimeProgram {
    let mut cg = Codegen::new(diagnostics, config);
    let mut entry = InstructionContainer::new();
    cg.compile_stmts(&program.statements, &mut entry);
    cg.finish_label_scope();
    RuntimeProgram { entry: Rc::new(entry), constants: cg.constants, functions: cg.functions, classes: cg.classes }
}

/// Key for constant-pool deduplication (spec §4.3 "Constants": "identical
/// string constants share one slot"). `f64` isn't `Hash`/`Eq`, so reals are
/// keyed by bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum ConstKey {
    Null,
    Bool(bool),
    Int(i64),
    Real(u64),
    Str(Rc<str>),
}

/// Per-loop (or per-switch) fix-up bookkeeping (spec §4.3 "Jump fix-up").
/// Indices are relative to whatever container was active when the jump was
/// emitted; a switch's case bodies are compiled into a scratch container
/// and spliced afterward, which is why `switch::compile` walks every frame
/// still on the stack and corrects any indices recorded during that
/// compile.
struct LoopFrame {
    break_fixups: Vec<usize>,
    continue_fixups: Vec<usize>,
    /// `continue` inside a `switch` behaves like `break` of that switch
    /// (spec §4.3: "across a switch-inside-loop, plain `continue` behaves
    /// like `break`"), so a switch frame routes both lists to the same
    /// target.
    is_switch: bool,
}

impl LoopFrame {
    fn new(is_switch: bool) -> Self {
        LoopFrame { break_fixups: Vec::new(), continue_fixups: Vec::new(), is_switch }
    }
}

/// `goto`/label bookkeeping for one function (or the top-level) body (spec
/// §4.3 "Jump fix-up", §3 `JumpFixup`/`Label`). Unlike `LoopFrame`, this
/// isn't a stack: labels aren't nested, and a `goto` may jump forward to a
/// label declared later in the same body, so unresolved jumps wait in
/// `pending` until the matching `Stmt::Label` is compiled (or the body ends,
/// at which point any survivor names an undefined label).
#[derive(Default)]
struct LabelScope {
    labels: HashMap<Rc<str>, u32>,
    pending: Vec<(Rc<str>, usize, u32)>,
}

struct Codegen<'a> {
    diagnostics: &'a mut DiagnosticSink,
    config: &'a CompilerConfig,
    constants: Vec<Value>,
    const_index: HashMap<ConstKey, u32>,
    functions: Vec<Rc<FunctionDef>>,
    classes: Vec<Rc<Class>>,
    /// Shared across the whole program: every `static`/class-constant/
    /// function-static-variable gets the next free slot in the VM's global
    /// static-value table (spec §3 "static_slot").
    static_slot_counter: u32,
    temp_counter: u32,
    loop_stack: Vec<LoopFrame>,
    label_scope: LabelScope,
    /// Depth of `switch` case bodies currently being compiled into a scratch
    /// container (see `switch::compile`). A `goto`/label inside one would
    /// need the same scratch-relative-to-absolute rebasing `switch::compile`
    /// already does for `break`/`continue`, which it doesn't do for labels —
    /// so these are rejected with a diagnostic instead of silently emitting
    /// a jump to the wrong instruction.
    switch_depth: u32,
}

impl<'a> Codegen<'a> {
    fn new(diagnostics: &'a mut DiagnosticSink, config: &'a CompilerConfig) -> Self {
        let mut constants = Vec::new();
        let mut const_index = HashMap::new();
        for (key, value) in [
            (ConstKey::Null, Value::Null),
            (ConstKey::Bool(true), Value::Bool(true)),
            (ConstKey::Bool(false), Value::Bool(false)),
        ] {
            let slot = constants.len() as u32;
            constants.push(value);
            const_index.insert(key, slot);
        }
        Codegen {
            diagnostics,
            config,
            constants,
            const_index,
            functions: Vec::new(),
            classes: Vec::new(),
            static_slot_counter: 0,
            temp_counter: 0,
            loop_stack: Vec::new(),
            label_scope: LabelScope::default(),
            switch_depth: 0,
        }
    }

    fn next_static_slot(&mut self) -> u32 {
        let slot = self.static_slot_counter;
        self.static_slot_counter += 1;
        slot
    }

    /// Synthesizes a fresh local variable name for destructuring and
    /// read-modify-write lvalue caching. `$` isn't a legal source-level
    /// identifier character in this position, so these never collide with a
    /// user-written name.
    fn temp_name(&mut self) -> Rc<str> {
        let n = self.temp_counter;
        self.temp_counter += 1;
        Rc::from(format!("@t{n}"))
    }

    fn emit_invalid_lvalue_diagnostic(&mut self, line: u32) {
        self.diagnostics.emit(ErrorKind::Error, line, "invalid assignment target");
    }

    fn const_slot(&mut self, key: ConstKey, value: Value) -> u32 {
        if let Some(slot) = self.const_index.get(&key) {
            return *slot;
        }
        let slot = self.constants.len() as u32;
        self.constants.push(value);
        self.const_index.insert(key, slot);
        slot
    }

    fn load_int(&mut self, out: &mut InstructionContainer, n: i64, line: u32) {
        let slot = self.const_slot(ConstKey::Int(n), Value::Int(n));
        out.emit(Instruction::new(Opcode::LoadC, line).with_p1(slot as i64));
    }

    fn load_str(&mut self, out: &mut InstructionContainer, s: &str, line: u32) {
        let rc: Rc<str> = Rc::from(s);
        let slot = self.const_slot(ConstKey::Str(rc.clone()), Value::Str(rc));
        out.emit(Instruction::new(Opcode::LoadC, line).with_p1(slot as i64));
    }

    fn emit(&mut self, out: &mut InstructionContainer, op: Opcode, line: u32) -> usize {
        out.emit(Instruction::new(op, line))
    }

    // ---------------------------------------------------------------
    // Expression lowering
    // ---------------------------------------------------------------

    fn compile_expr(&mut self, expr: &Expr, out: &mut InstructionContainer) {
        match expr {
            Expr::Int(n) => self.load_int(out, *n, 0),
            Expr::Real(f) => {
                let slot = self.const_slot(ConstKey::Real(f.to_bits()), Value::Real(*f));
                out.emit(Instruction::new(Opcode::LoadC, 0).with_p1(slot as i64));
            }
            Expr::Str(s) => self.load_str(out, s, 0),
            Expr::Interpolated(parts) => self.compile_interpolated(parts, out),
            Expr::Bool(b) => {
                let slot = self.const_slot(ConstKey::Bool(*b), Value::Bool(*b));
                out.emit(Instruction::new(Opcode::LoadC, 0).with_p1(slot as i64));
            }
            Expr::Null => {
                out.emit(Instruction::new(Opcode::LoadC, 0).with_p1(0));
            }
            Expr::Variable(name) => {
                out.emit(Instruction::new(Opcode::Load, 0).with_p3(Operand::Name(name.clone())));
            }
            Expr::Name(name) => {
                // A bare identifier in expression position is a global
                // constant reference (spec §4.3 "`const` (outside a
                // class)"); a direct-call callee never reaches this arm,
                // since `Call`'s own lowering inspects `callee` before
                // recursing into it.
                out.emit(Instruction::new(Opcode::LoadConst, 0).with_p3(Operand::Name(name.clone())));
            }
            Expr::ArrayLit(entries) => self.compile_array_lit(entries, out),
            Expr::Reference(inner, line) => self.compile_reference(inner, out, *line),
            Expr::Unary { op, expr, line } => self.compile_unary(*op, expr, out, *line),
            Expr::IncDec { target, op, prefix, line } => self.compile_incdec(target, *op, *prefix, out, *line),
            Expr::Binary { op, lhs, rhs, line } => {
                self.compile_expr(lhs, out);
                self.compile_expr(rhs, out);
                self.emit(out, op.opcode(), *line);
            }
            Expr::Logical { op, lhs, rhs, line } => self.compile_logical(*op, lhs, rhs, out, *line),
            Expr::Assign { target, value, line } => self.compile_assign(target, value, out, *line),
            Expr::CompoundAssign { op, target, value, line } => {
                self.compile_compound_assign(*op, target, value, out, *line);
            }
            Expr::Ternary { cond, then, otherwise, line } => {
                self.compile_ternary(cond, then.as_deref(), otherwise, out, *line);
            }
            Expr::Call { callee, args, line } => self.compile_call(callee, args, out, *line),
            Expr::MethodCall { receiver, method, args, line } => {
                self.compile_expr(receiver, out);
                self.compile_args(args, out);
                out.emit(
                    Instruction::new(Opcode::Call, *line)
                        .with_p1(args.len() as i64)
                        .with_p2(1)
                        .with_p3(Operand::Name(method.clone())),
                );
            }
            Expr::StaticCall { class_name, method, args, line } => {
                self.compile_args(args, out);
                if class_name.as_ref() == "parent" {
                    out.emit(
                        Instruction::new(Opcode::Uplink, *line)
                            .with_p1(args.len() as i64)
                            .with_p3(Operand::Name(method.clone())),
                    );
                } else {
                    let composed: Rc<str> = Rc::from(format!("{class_name}::{method}"));
                    out.emit(
                        Instruction::new(Opcode::CallStatic, *line)
                            .with_p1(args.len() as i64)
                            .with_p3(Operand::Name(composed)),
                    );
                }
            }
            Expr::New { class_name, args, line } => {
                self.compile_args(args, out);
                out.emit(
                    Instruction::new(Opcode::New, *line)
                        .with_p1(args.len() as i64)
                        .with_p3(Operand::Name(class_name.clone())),
                );
            }
            Expr::Clone(inner, line) => {
                self.compile_expr(inner, out);
                self.emit(out, Opcode::Clone, *line);
            }
            Expr::Index { base, index, line } => {
                self.compile_expr(base, out);
                match index {
                    Some(idx) => {
                        self.compile_expr(idx, out);
                        self.emit(out, Opcode::LoadIdx, *line);
                    }
                    None => {
                        self.diagnostics.emit(ErrorKind::Error, *line, "cannot read `[]` in an append-only position");
                    }
                }
            }
            Expr::Member { base, name, line } => {
                self.compile_expr(base, out);
                out.emit(Instruction::new(Opcode::Member, *line).with_p3(Operand::Name(name.clone())));
            }
            Expr::StaticProp { class_name, name, line } | Expr::ClassConst { class_name, name, line } => {
                let composed: Rc<str> = Rc::from(format!("{class_name}::{name}"));
                out.emit(Instruction::new(Opcode::LoadStatic, *line).with_p3(Operand::Name(composed)));
            }
            Expr::InstanceOf { expr, class_name, line } => {
                self.compile_expr(expr, out);
                out.emit(Instruction::new(Opcode::IsA, *line).with_p3(Operand::Name(class_name.clone())));
            }
            Expr::Closure { params, uses, body, line } => self.compile_closure(params, uses, body, out, *line),
            Expr::DisabledFeature => {
                if self.config.notice_on_disabled_features {
                    self.diagnostics.emit(ErrorKind::Notice, 0, "disabled feature used; evaluates to null");
                }
                out.emit(Instruction::new(Opcode::LoadC, 0).with_p1(0));
            }
            Expr::Suppress(inner, line) => {
                out.emit(Instruction::new(Opcode::ErrCtrl, *line).with_p1(1));
                self.compile_expr(inner, out);
                out.emit(Instruction::new(Opcode::ErrCtrl, *line).with_p1(-1));
            }
        }
    }

    fn compile_interpolated(&mut self, parts: &[InterpPart], out: &mut InstructionContainer) {
        if parts.is_empty() {
            self.load_str(out, "", 0);
            return;
        }
        let mut first = true;
        for part in parts {
            match part {
                InterpPart::Literal(s) => self.load_str(out, s, 0),
                InterpPart::Variable(name) => {
                    out.emit(Instruction::new(Opcode::Load, 0).with_p3(Operand::Name(name.clone())));
                }
            }
            if !first {
                self.emit(out, Opcode::Cat, 0);
            }
            first = false;
        }
    }

    fn compile_array_lit(&mut self, entries: &[ArrayEntry], out: &mut InstructionContainer) {
        let is_map = entries.iter().any(|e| e.key.is_some());
        if is_map {
            let mut next_index = 0i64;
            for entry in entries {
                match &entry.key {
                    Some(k) => self.compile_expr(k, out),
                    None => {
                        self.load_int(out, next_index, 0);
                        next_index += 1;
                    }
                }
                self.compile_array_value(entry, out);
            }
            out.emit(Instruction::new(Opcode::LoadMap, 0).with_p1(entries.len() as i64));
        } else {
            for entry in entries {
                self.compile_array_value(entry, out);
            }
            out.emit(Instruction::new(Opcode::LoadList, 0).with_p1(entries.len() as i64));
        }
    }

    fn compile_array_value(&mut self, entry: &ArrayEntry, out: &mut InstructionContainer) {
        if entry.by_ref {
            self.compile_reference(&entry.value, out, 0);
        } else {
            self.compile_expr(&entry.value, out);
        }
    }

    fn compile_reference(&mut self, inner: &Expr, out: &mut InstructionContainer, line: u32) {
        match inner {
            Expr::Variable(name) => {
                out.emit(Instruction::new(Opcode::LoadRef, line).with_p3(Operand::Name(name.clone())));
            }
            _ => {
                self.diagnostics.emit(ErrorKind::Error, line, "`&` may only reference a variable here");
                self.compile_expr(inner, out);
            }
        }
    }

    fn compile_unary(&mut self, op: crate::ast::UnaryOp, expr: &Expr, out: &mut InstructionContainer, line: u32) {
        use crate::ast::UnaryOp::*;
        self.compile_expr(expr, out);
        let op = match op {
            Neg => Opcode::Uminus,
            Plus => Opcode::Uplus,
            Not => Opcode::Lnot,
            BitNot => Opcode::Bitnot,
        };
        self.emit(out, op, line);
    }

    /// `&&`/`||` (spec §4.3 "Short-circuit"): `JZ`/`JNZ` pop and test the
    /// left operand the same way a plain `if` condition does; on the
    /// short-circuiting side the pushed result is the fixed `false`/`true`
    /// the operator guarantees, never the left operand's own (possibly
    /// non-bool) value.
    fn compile_logical(
        &mut self,
        op: crate::ast::LogicalOp,
        lhs: &Expr,
        rhs: &Expr,
        out: &mut InstructionContainer,
        line: u32,
    ) {
        use crate::ast::LogicalOp::*;
        self.compile_expr(lhs, out);
        let jump_op = match op {
            And => Opcode::Jz,
            Or => Opcode::Jnz,
        };
        let jump = out.emit(Instruction::new(jump_op, line));
        self.compile_expr(rhs, out);
        self.emit(out, Opcode::CvtBool, line);
        let past = out.emit(Instruction::new(Opcode::Jmp, line));
        let short_circuit_target = out.len() as u32;
        out.patch_p2(jump, short_circuit_target);
        let result = matches!(op, Or);
        let slot = self.const_slot(ConstKey::Bool(result), Value::Bool(result));
        out.emit(Instruction::new(Opcode::LoadC, line).with_p1(slot as i64));
        let end = out.len() as u32;
        out.patch_p2(past, end);
    }

    fn compile_assign(&mut self, target: &Expr, value: &Expr, out: &mut InstructionContainer, line: u32) {
        if let Expr::ArrayLit(entries) = target {
            self.compile_destructure(entries, value, out, line);
            return;
        }
        if let Expr::Reference(inner, _) = value {
            self.compile_store_ref(target, inner, out, line);
            return;
        }
        self.compile_expr(value, out);
        self.compile_store(target, out, line);
    }

    /// Stores the value already on top of the stack into `target`, leaving
    /// it there afterward (every `STORE*` opcode re-pushes its value).
    fn compile_store(&mut self, target: &Expr, out: &mut InstructionContainer, line: u32) {
        match lvalue::classify(target) {
            Lvalue::Var(name) => {
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(name)));
            }
            Lvalue::StaticProp(composed) => {
                out.emit(Instruction::new(Opcode::StoreStatic, line).with_p3(Operand::Name(composed)));
            }
            Lvalue::Indexed { base, key, append } => {
                // STORE_IDX pops value, then key (unless P1 == 1), then the
                // container; the value is already on the stack, so cache
                // it, push container/key underneath, then restore it on top.
                let tmp = self.temp_name();
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(tmp.clone())));
                self.emit(out, Opcode::Pop, line);
                self.compile_expr(&base, out);
                if let Some(key) = &key {
                    self.compile_expr(key, out);
                }
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp)));
                out.emit(Instruction::new(Opcode::StoreIdx, line).with_p1(append as i64));
            }
            Lvalue::Invalid => self.emit_invalid_lvalue_diagnostic(line),
        }
    }

    fn compile_store_ref(&mut self, target: &Expr, source: &Expr, out: &mut InstructionContainer, line: u32) {
        self.compile_reference(source, out, line);
        match lvalue::classify(target) {
            Lvalue::Var(name) => {
                out.emit(Instruction::new(Opcode::StoreRef, line).with_p3(Operand::Name(name)));
            }
            Lvalue::Indexed { base, key, append } => {
                let tmp = self.temp_name();
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(tmp.clone())));
                self.emit(out, Opcode::Pop, line);
                self.compile_expr(&base, out);
                if let Some(key) = &key {
                    self.compile_expr(key, out);
                }
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp)));
                out.emit(Instruction::new(Opcode::StoreIdxRef, line).with_p1(append as i64));
            }
            Lvalue::StaticProp(_) | Lvalue::Invalid => {
                self.diagnostics.emit(ErrorKind::Error, line, "invalid reference-assignment target");
            }
        }
    }

    fn compile_compound_assign(
        &mut self,
        op: BinOp,
        target: &Expr,
        value: &Expr,
        out: &mut InstructionContainer,
        line: u32,
    ) {
        if let Lvalue::Var(name) = lvalue::classify(target) {
            self.compile_expr(value, out);
            let opcode = op.compound_opcode().expect("comparisons have no compound form and never parse here");
            out.emit(Instruction::new(opcode, line).with_p3(Operand::Name(name)));
            return;
        }
        // No compound-assignment opcode targets a static prop or an indexed
        // slot directly; desugar into an explicit read/combine/write against
        // cached base+key temps so `base`/`key` each evaluate exactly once.
        let cached = lvalue::cache(self, target, out, line);
        cached.emit_load(out, line);
        self.compile_expr(value, out);
        self.emit(out, op.opcode(), line);
        cached.emit_store(out, line);
    }

    fn compile_incdec(
        &mut self,
        target: &Expr,
        op: crate::ast::IncDecOp,
        prefix: bool,
        out: &mut InstructionContainer,
        line: u32,
    ) {
        use crate::ast::IncDecOp::*;
        let opcode = if op == Incr { Opcode::Incr } else { Opcode::Decr };
        if let Lvalue::Var(name) = lvalue::classify(target) {
            // INCR/DECR resolve their operand purely by name and always
            // push the post-operation value, ignoring P1 — for postfix, load
            // the old value first and discard the new one after.
            if !prefix {
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(name.clone())));
            }
            out.emit(Instruction::new(opcode, line).with_p1(prefix as i64).with_p3(Operand::Name(name)));
            if !prefix {
                self.emit(out, Opcode::Pop, line);
            }
            return;
        }
        let cached = lvalue::cache(self, target, out, line);
        cached.emit_load(out, line);
        let old_tmp = self.temp_name();
        if !prefix {
            out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(old_tmp.clone())));
        }
        self.load_int(out, 1, line);
        self.emit(out, if op == Incr { Opcode::Add } else { Opcode::Sub }, line);
        cached.emit_store(out, line);
        if !prefix {
            self.emit(out, Opcode::Pop, line);
            out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(old_tmp)));
        }
    }

    fn compile_ternary(
        &mut self,
        cond: &Expr,
        then: Option<&Expr>,
        otherwise: &Expr,
        out: &mut InstructionContainer,
        line: u32,
    ) {
        match then {
            Some(then) => {
                self.compile_expr(cond, out);
                let jz = out.emit(Instruction::new(Opcode::Jz, line));
                self.compile_expr(then, out);
                let jmp = out.emit(Instruction::new(Opcode::Jmp, line));
                out.patch_p2(jz, out.len() as u32);
                self.compile_expr(otherwise, out);
                out.patch_p2(jmp, out.len() as u32);
            }
            None => {
                // `$a ?: $b`: evaluate `$a` once, cache it in a temp so both
                // the test and the true-branch result can read it without a
                // dup opcode (none exists).
                self.compile_expr(cond, out);
                let tmp = self.temp_name();
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(tmp.clone())));
                self.emit(out, Opcode::Pop, line);
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp.clone())));
                let jz = out.emit(Instruction::new(Opcode::Jz, line));
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp)));
                let jmp = out.emit(Instruction::new(Opcode::Jmp, line));
                out.patch_p2(jz, out.len() as u32);
                self.compile_expr(otherwise, out);
                out.patch_p2(jmp, out.len() as u32);
            }
        }
    }

    /// Compiles `args` left-to-right (spec §4.3 "Call": "compile arguments
    /// in left-to-right order"); a by-ref argument pushes a `Reference`
    /// instead of a value.
    fn compile_args(&mut self, args: &[Arg], out: &mut InstructionContainer) {
        for arg in args {
            if arg.by_ref {
                self.compile_reference(&arg.value, out, 0);
            } else {
                self.compile_expr(&arg.value, out);
            }
        }
    }

    fn compile_call(&mut self, callee: &Expr, args: &[Arg], out: &mut InstructionContainer, line: u32) {
        match callee {
            Expr::Name(name) => {
                self.compile_args(args, out);
                out.emit(
                    Instruction::new(Opcode::Call, line)
                        .with_p1(args.len() as i64)
                        .with_p3(Operand::Name(name.clone())),
                );
            }
            _ => {
                // A dynamic callee (`$fn(...)`) is compiled first so
                // whatever it evaluates to sits beneath the arguments; CALL
                // with `Operand::None` pops the callee after popping `argc`
                // arguments.
                self.compile_expr(callee, out);
                self.compile_args(args, out);
                out.emit(Instruction::new(Opcode::Call, line).with_p1(args.len() as i64));
            }
        }
    }

    fn compile_closure(
        &mut self,
        params: &[AstParam],
        uses: &[(Rc<str>, bool)],
        body: &[Stmt],
        out: &mut InstructionContainer,
        line: u32,
    ) {
        let def = self.compile_function_def(Rc::from("{closure}"), params, None, body, false);
        let descriptor = ClosureDescriptor { function: Rc::new(def), captures: uses.to_vec() };
        out.emit(Instruction::new(Opcode::LoadClosure, line).with_p3(Operand::Closure(Box::new(descriptor))));
    }

    // ---------------------------------------------------------------
    // Statement lowering
    // ---------------------------------------------------------------

    fn compile_stmts(&mut self, stmts: &[Stmt], out: &mut InstructionContainer) {
        for stmt in stmts {
            self.compile_stmt(stmt, out);
        }
    }

    fn compile_stmt(&mut self, stmt: &Stmt, out: &mut InstructionContainer) {
        match stmt {
            Stmt::Expr(e) => {
                self.compile_expr(e, out);
                self.emit(out, Opcode::Pop, 0);
            }
            Stmt::Echo(exprs) => {
                for e in exprs {
                    self.compile_expr(e, out);
                    out.emit(Instruction::new(Opcode::Consume, 0).with_p1(0));
                }
            }
            Stmt::InlineHtml(text) => {
                out.emit(Instruction::new(Opcode::Consume, 0).with_p1(1).with_p3(Operand::Name(text.clone())));
            }
            Stmt::If { arms, otherwise, .. } => self.compile_if(arms, otherwise.as_deref(), out),
            Stmt::While { cond, body, line } => self.compile_while(cond, body, out, *line),
            Stmt::DoWhile { body, cond, line } => self.compile_do_while(body, cond, out, *line),
            Stmt::For { init, cond, step, body, line } => {
                self.compile_for(init, cond.as_ref(), step, body, out, *line)
            }
            Stmt::Foreach { array, key_var, value_var, by_ref, body, line } => {
                self.compile_foreach(array, key_var.as_ref(), value_var, *by_ref, body, out, *line)
            }
            Stmt::Switch { subject, cases, line } => switch::compile(self, subject, cases, out, *line),
            Stmt::Break { level, line } => self.compile_break_continue(*level, true, out, *line),
            Stmt::Continue { level, line } => self.compile_break_continue(*level, false, out, *line),
            Stmt::Goto { label, line } => self.compile_goto(label, out, *line),
            Stmt::Label { name, line } => self.compile_label(name, out, *line),
            Stmt::Return { value, line } => match value {
                Some(v) => {
                    self.compile_expr(v, out);
                    out.emit(Instruction::new(Opcode::Done, *line).with_p1(1));
                }
                None => {
                    out.emit(Instruction::new(Opcode::Done, *line).with_p1(0));
                }
            },
            Stmt::Throw(expr, line) => {
                self.compile_expr(expr, out);
                self.emit(out, Opcode::Throw, *line);
            }
            Stmt::Try { body, catches, line } => self.compile_try(body, catches, out, *line),
            Stmt::Global(names, line) => {
                out.emit(Instruction::new(Opcode::Global, *line).with_p3(Operand::NameList(names.clone())));
            }
            Stmt::StaticVar(decls, _line) => {
                for (name, _) in decls {
                    self.diagnostics.emit(
                        ErrorKind::Notice,
                        0,
                        format!("static variable {name} declared outside a function has no effect"),
                    );
                }
            }
            Stmt::Const(name, expr, line) => self.compile_const(name, expr, out, *line),
            Stmt::FunctionDecl(decl) => self.compile_function_decl(decl),
            Stmt::ClassDecl(decl) => self.compile_class_decl(decl),
            Stmt::Block(stmts) => self.compile_stmts(stmts, out),
        }
    }

    fn compile_if(&mut self, arms: &[(Expr, Vec<Stmt>)], otherwise: Option<&[Stmt]>, out: &mut InstructionContainer) {
        let mut end_jumps = Vec::new();
        for (cond, body) in arms {
            self.compile_expr(cond, out);
            let jz = out.emit(Instruction::new(Opcode::Jz, 0));
            self.compile_stmts(body, out);
            end_jumps.push(out.emit(Instruction::new(Opcode::Jmp, 0)));
            out.patch_p2(jz, out.len() as u32);
        }
        if let Some(body) = otherwise {
            self.compile_stmts(body, out);
        }
        let end = out.len() as u32;
        for j in end_jumps {
            out.patch_p2(j, end);
        }
    }

    fn compile_while(&mut self, cond: &Expr, body: &[Stmt], out: &mut InstructionContainer, line: u32) {
        let start = out.len() as u32;
        self.compile_expr(cond, out);
        let jz = out.emit(Instruction::new(Opcode::Jz, line));
        self.loop_stack.push(LoopFrame::new(false));
        self.compile_stmts(body, out);
        let frame = self.loop_stack.pop().unwrap();
        out.emit(Instruction::new(Opcode::Jmp, line).with_p2(start));
        let end = out.len() as u32;
        out.patch_p2(jz, end);
        for idx in frame.break_fixups {
            out.patch_p2(idx, end);
        }
        for idx in frame.continue_fixups {
            out.patch_p2(idx, start);
        }
    }

    fn compile_do_while(&mut self, body: &[Stmt], cond: &Expr, out: &mut InstructionContainer, line: u32) {
        let start = out.len() as u32;
        self.loop_stack.push(LoopFrame::new(false));
        self.compile_stmts(body, out);
        let frame = self.loop_stack.pop().unwrap();
        // `do…while` defers continue targets to the post-test (spec §4.3).
        let test_start = out.len() as u32;
        for idx in &frame.continue_fixups {
            out.patch_p2(*idx, test_start);
        }
        self.compile_expr(cond, out);
        out.emit(Instruction::new(Opcode::Jnz, line).with_p2(start));
        let end = out.len() as u32;
        for idx in frame.break_fixups {
            out.patch_p2(idx, end);
        }
    }

    fn compile_for(
        &mut self,
        init: &[Expr],
        cond: Option<&Expr>,
        step: &[Expr],
        body: &[Stmt],
        out: &mut InstructionContainer,
        line: u32,
    ) {
        for e in init {
            self.compile_expr(e, out);
            self.emit(out, Opcode::Pop, line);
        }
        let test_start = out.len() as u32;
        let jz = cond.map(|c| {
            self.compile_expr(c, out);
            out.emit(Instruction::new(Opcode::Jz, line))
        });
        self.loop_stack.push(LoopFrame::new(false));
        self.compile_stmts(body, out);
        let frame = self.loop_stack.pop().unwrap();
        // The step is textually before the body but compiled after it; a
        // bare `continue` resumes here.
        let step_start = out.len() as u32;
        for e in step {
            self.compile_expr(e, out);
            self.emit(out, Opcode::Pop, line);
        }
        out.emit(Instruction::new(Opcode::Jmp, line).with_p2(test_start));
        let end = out.len() as u32;
        if let Some(jz) = jz {
            out.patch_p2(jz, end);
        }
        for idx in frame.break_fixups {
            out.patch_p2(idx, end);
        }
        for idx in frame.continue_fixups {
            out.patch_p2(idx, step_start);
        }
    }

    fn compile_foreach(
        &mut self,
        array: &Expr,
        key_var: Option<&Rc<str>>,
        value_var: &Rc<str>,
        by_ref: bool,
        body: &[Stmt],
        out: &mut InstructionContainer,
        line: u32,
    ) {
        self.compile_expr(array, out);
        let descriptor =
            quill_core::ForeachDescriptor { key_var: key_var.cloned(), value_var: value_var.clone(), by_ref };
        out.emit(
            Instruction::new(Opcode::ForeachInit, line).with_p3(Operand::Foreach(Box::new(descriptor.clone()))),
        );
        let start = out.len() as u32;
        let step =
            out.emit(Instruction::new(Opcode::ForeachStep, line).with_p3(Operand::Foreach(Box::new(descriptor))));
        self.loop_stack.push(LoopFrame::new(false));
        self.compile_stmts(body, out);
        let frame = self.loop_stack.pop().unwrap();
        out.emit(Instruction::new(Opcode::Jmp, line).with_p2(start));
        let end = out.len() as u32;
        out.patch_p2(step, end);
        for idx in frame.break_fixups {
            out.patch_p2(idx, end);
        }
        for idx in frame.continue_fixups {
            out.patch_p2(idx, start);
        }
    }

    /// `break`/`continue` with an optional numeric level (spec §4.3): looks
    /// up the nth enclosing loop/switch frame and records a fix-up there.
    fn compile_break_continue(&mut self, level: u32, is_break: bool, out: &mut InstructionContainer, line: u32) {
        let level = level.max(1) as usize;
        if level > self.loop_stack.len() {
            self.diagnostics.emit(ErrorKind::Error, line, "break/continue level exceeds enclosing loop nesting");
            return;
        }
        let idx = self.loop_stack.len() - level;
        let jmp = out.emit(Instruction::new(Opcode::Jmp, line));
        let frame = &mut self.loop_stack[idx];
        if is_break || frame.is_switch {
            frame.break_fixups.push(jmp);
        } else {
            frame.continue_fixups.push(jmp);
        }
    }

    /// `goto label;` (spec §4.3 "Jump fix-up"). Resolves immediately if the
    /// label has already been seen (a backward jump); otherwise the `JMP`'s
    /// target is left to `compile_label` once it's compiled, or reported as
    /// undefined once the enclosing body finishes (`finish_label_scope`).
    fn compile_goto(&mut self, label: &Rc<str>, out: &mut InstructionContainer, line: u32) {
        if self.switch_depth > 0 {
            self.diagnostics.emit(ErrorKind::Error, line, "goto out of a switch statement is not supported");
            return;
        }
        let jmp = out.emit(Instruction::new(Opcode::Jmp, line));
        match self.label_scope.labels.get(label) {
            Some(&target) => out.patch_p2(jmp, target),
            None => self.label_scope.pending.push((label.clone(), jmp, line)),
        }
    }

    /// `label:` (spec §4.3 "Jump fix-up"). Records this position and patches
    /// any `goto`s already waiting on it (forward jumps compiled earlier in
    /// the same body).
    fn compile_label(&mut self, name: &Rc<str>, out: &mut InstructionContainer, line: u32) {
        if self.switch_depth > 0 {
            self.diagnostics.emit(ErrorKind::Error, line, "label inside a switch statement is not supported");
            return;
        }
        let pos = out.len() as u32;
        if self.label_scope.labels.insert(name.clone(), pos).is_some() {
            self.diagnostics.emit(ErrorKind::Error, line, format!("label '{name}' already defined"));
        }
        let pending = std::mem::take(&mut self.label_scope.pending);
        let (resolved, still_pending): (Vec<_>, Vec<_>) =
            pending.into_iter().partition(|(pending_name, ..)| pending_name.as_ref() == name.as_ref());
        self.label_scope.pending = still_pending;
        for (_, jmp, _) in resolved {
            out.patch_p2(jmp, pos);
        }
    }

    /// Reports any `goto` left unresolved once a function (or the top-level
    /// program) body finishes compiling, and resets the scope for the next
    /// body (labels and gotos don't cross function boundaries).
    fn finish_label_scope(&mut self) {
        for (name, _, line) in std::mem::take(&mut self.label_scope.pending) {
            self.diagnostics.emit(ErrorKind::Error, line, format!("goto to undefined label '{name}'"));
        }
        self.label_scope.labels.clear();
    }

    fn compile_try(&mut self, body: &[Stmt], catches: &[CatchArm], out: &mut InstructionContainer, line: u32) {
        let catch_clauses = catches
            .iter()
            .map(|c| {
                let mut catch_body = InstructionContainer::new();
                self.compile_stmts(&c.body, &mut catch_body);
                quill_core::CatchClause {
                    exception_class: c.exception_class.clone(),
                    var_name: c.var_name.clone(),
                    body: catch_body,
                }
            })
            .collect();
        let descriptor = quill_core::ExceptionDescriptor { catches: catch_clauses };
        let load_exc =
            out.emit(Instruction::new(Opcode::LoadException, line).with_p3(Operand::Exception(Box::new(descriptor))));
        self.compile_stmts(body, out);
        self.emit(out, Opcode::PopException, line);
        out.patch_p2(load_exc, out.len() as u32);
    }

    fn compile_const(&mut self, name: &Rc<str>, expr: &Expr, out: &mut InstructionContainer, line: u32) {
        let mut body = InstructionContainer::new();
        self.compile_expr(expr, &mut body);
        body.emit(Instruction::new(Opcode::Done, line).with_p1(1));
        let descriptor = ConstDescriptor { name: name.clone(), body };
        out.emit(Instruction::new(Opcode::DefineConst, line).with_p3(Operand::Const(Box::new(descriptor))));
    }

    /// Destructuring assignment (`[$a, $b] = $expr;`): evaluate the source
    /// once into a temp, then assign each element through the ordinary
    /// `LOAD_IDX`/`STORE` path — destructuring owns each store itself, so
    /// the value `compile_store` re-pushes is popped right back off.
    fn compile_destructure(&mut self, entries: &[ArrayEntry], value: &Expr, out: &mut InstructionContainer, line: u32) {
        self.compile_expr(value, out);
        let tmp = self.temp_name();
        out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(tmp.clone())));
        self.emit(out, Opcode::Pop, line);
        for (i, entry) in entries.iter().enumerate() {
            out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp.clone())));
            match &entry.key {
                Some(k) => self.compile_expr(k, out),
                None => self.load_int(out, i as i64, line),
            }
            self.emit(out, Opcode::LoadIdx, line);
            self.compile_store(&entry.value, out, line);
            self.emit(out, Opcode::Pop, line);
        }
        out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(tmp)));
    }

    // ---------------------------------------------------------------
    // Declarations
    // ---------------------------------------------------------------

    fn compile_function_decl(&mut self, decl: &FunctionDecl) {
        let def =
            self.compile_function_def(decl.name.clone(), &decl.params, decl.return_type.clone(), &decl.body, false);
        self.functions.push(Rc::new(def));
    }

    fn compile_function_def(
        &mut self,
        name: Rc<str>,
        params: &[AstParam],
        return_type: Option<Rc<str>>,
        body: &[Stmt],
        is_class_method: bool,
    ) -> FunctionDef {
        let compiled_params = params
            .iter()
            .map(|p| Param {
                name: p.name.clone(),
                declared_type: p.declared_type.clone(),
                by_ref: p.by_ref,
                variadic: p.variadic,
                default: p.default.as_ref().map(|d| {
                    let mut c = InstructionContainer::new();
                    self.compile_expr(d, &mut c);
                    c.emit(Instruction::new(Opcode::Done, 0).with_p1(1));
                    c
                }),
            })
            .collect();

        let saved_loop_stack = std::mem::take(&mut self.loop_stack);
        let saved_label_scope = std::mem::take(&mut self.label_scope);
        let statics = collect_static_decls(self, body);
        let mut container = InstructionContainer::new();
        self.compile_stmts(body, &mut container);
        self.finish_label_scope();
        self.loop_stack = saved_loop_stack;
        self.label_scope = saved_label_scope;

        FunctionDef { name, params: compiled_params, body: container, return_type, statics, is_class_method }
    }

    fn compile_class_decl(&mut self, decl: &ClassDecl) {
        let mut class = Class::new(decl.name.clone(), decl.line);
        class.base = decl.base.clone();
        class.interfaces = decl.interfaces.clone();
        let mut flags = ClassFlags::empty();
        if decl.is_final {
            flags |= ClassFlags::FINAL;
        }
        if decl.is_abstract {
            flags |= ClassFlags::ABSTRACT;
        }
        if decl.is_interface {
            flags |= ClassFlags::INTERFACE;
        }
        if is_throwable(decl) {
            flags |= ClassFlags::THROWABLE;
        }
        class.flags = flags;

        for attr in &decl.attrs {
            let (name, compiled) = self.compile_attr(attr);
            class.attrs.insert(name, compiled);
        }
        for method in &decl.methods {
            let (name, compiled) = self.compile_method(method);
            class.methods.entry(name).or_default().push(compiled);
        }

        self.validate_overrides(&mut class, decl.line);

        self.classes.push(Rc::new(class));
    }

    fn find_class(&self, name: &str) -> Option<&Rc<Class>> {
        self.classes.iter().find(|c| c.name.as_ref() == name)
    }

    /// Cross-checks this class's own methods against its already-compiled
    /// base class (spec §4.5 "final"/"abstract"/visibility rules): rejects
    /// overriding a `final` method, rejects narrowing an inherited method's
    /// visibility, and promotes a class that leaves an inherited `abstract`
    /// method unimplemented to `ClassFlags::ABSTRACT` instead of silently
    /// producing an instantiable class with a missing body.
    fn validate_overrides(&mut self, class: &mut Class, line: u32) {
        let Some(base_name) = class.base.clone() else { return };
        let Some(base) = self.find_class(&base_name).cloned() else { return };

        for (name, group) in &class.methods {
            let Some(base_group) = base.find_method(name) else { continue };
            for base_method in base_group {
                if base_method.flags.contains(MethodFlags::FINAL) {
                    self.diagnostics.emit(
                        ErrorKind::Error,
                        line,
                        format!("cannot override final method {base_name}::{name}()"),
                    );
                }
                for derived_method in group {
                    if derived_method.visibility > base_method.visibility {
                        self.diagnostics.emit(
                            ErrorKind::Error,
                            line,
                            format!(
                                "access level of {}::{name}() must not be more restrictive than {base_name}::{name}()",
                                class.name
                            ),
                        );
                    }
                }
            }
        }

        if !class.is_abstract() {
            let mut implemented: std::collections::HashSet<Rc<str>> = class.methods.keys().cloned().collect();
            let mut missing = false;
            let mut current = Some(base);
            while let Some(c) = current {
                for (name, group) in &c.methods {
                    if group.iter().any(|m| m.flags.contains(MethodFlags::ABSTRACT)) {
                        if !implemented.contains(name) {
                            missing = true;
                        }
                    } else {
                        implemented.insert(name.clone());
                    }
                }
                current = c.base.as_deref().and_then(|b| self.find_class(b)).cloned();
            }
            if missing {
                class.flags |= ClassFlags::ABSTRACT;
            }
        }
    }

    fn compile_attr(&mut self, attr: &AttrDecl) -> (Rc<str>, ClassAttr) {
        let mut initializer = InstructionContainer::new();
        match &attr.default {
            Some(expr) => self.compile_expr(expr, &mut initializer),
            None => {
                initializer.emit(Instruction::new(Opcode::LoadC, attr.line).with_p1(0));
            }
        }
        initializer.emit(Instruction::new(Opcode::Done, attr.line).with_p1(1));
        let mut flags = MethodFlags::empty();
        if attr.is_static {
            flags |= MethodFlags::STATIC;
        }
        if attr.is_const {
            flags |= MethodFlags::CONSTANT | MethodFlags::STATIC;
        }
        let static_slot = if attr.is_static || attr.is_const { Some(self.next_static_slot()) } else { None };
        (
            attr.name.clone(),
            ClassAttr {
                name: attr.name.clone(),
                visibility: convert_visibility(attr.visibility),
                flags,
                initializer,
                static_slot,
            },
        )
    }

    fn compile_method(&mut self, method: &MethodDecl) -> (Rc<str>, ClassMethod) {
        let def = self.compile_function_def(
            method.def.name.clone(),
            &method.def.params,
            method.def.return_type.clone(),
            &method.def.body,
            true,
        );
        let mut flags = MethodFlags::empty();
        if method.is_static {
            flags |= MethodFlags::STATIC;
        }
        if method.is_final {
            flags |= MethodFlags::FINAL;
        }
        if method.is_abstract {
            flags |= MethodFlags::ABSTRACT;
        }
        (
            method.def.name.clone(),
            ClassMethod {
                def: Rc::new(def),
                visibility: convert_visibility(method.visibility),
                flags,
                line: method.def.line,
            },
        )
    }
}

fn convert_visibility(v: AstVisibility) -> Visibility {
    match v {
        AstVisibility::Public => Visibility::Public,
        AstVisibility::Protected => Visibility::Protected,
        AstVisibility::Private => Visibility::Private,
    }
}

fn is_throwable(decl: &ClassDecl) -> bool {
    decl.name.as_ref() == "Exception"
        || decl.base.as_deref() == Some("Exception")
        || decl.interfaces.iter().any(|i| i.as_ref() == "Throwable")
}

/// Scans a function body for top-level `Stmt::StaticVar` declarations
/// (spec §4.3 "`static`"), compiling each initializer into its own
/// container and allocating it a slot in the shared static-value table.
/// Does not recurse into nested function/closure declarations, whose own
/// statics belong to their own `FunctionDef`.
fn collect_static_decls(cg: &mut Codegen<'_>, body: &[Stmt]) -> Vec<StaticVarDecl> {
    fn walk(cg: &mut Codegen<'_>, stmts: &[Stmt], out: &mut Vec<StaticVarDecl>) {
        for stmt in stmts {
            match stmt {
                Stmt::StaticVar(decls, line) => {
                    for (name, init) in decls {
                        let mut initializer = InstructionContainer::new();
                        match init {
                            Some(expr) => cg.compile_expr(expr, &mut initializer),
                            None => {
                                initializer.emit(Instruction::new(Opcode::LoadC, *line).with_p1(0));
                            }
                        }
                        initializer.emit(Instruction::new(Opcode::Done, *line).with_p1(1));
                        let slot = cg.next_static_slot();
                        out.push(StaticVarDecl { name: name.clone(), initializer, slot });
                    }
                }
                Stmt::If { arms, otherwise, .. } => {
                    for (_, arm_body) in arms {
                        walk(cg, arm_body, out);
                    }
                    if let Some(o) = otherwise {
                        walk(cg, o, out);
                    }
                }
                Stmt::While { body, .. }
                | Stmt::DoWhile { body, .. }
                | Stmt::For { body, .. }
                | Stmt::Foreach { body, .. } => walk(cg, body, out),
                Stmt::Switch { cases, .. } => {
                    for case in cases {
                        walk(cg, &case.body, out);
                    }
                }
                Stmt::Try { body, catches, .. } => {
                    walk(cg, body, out);
                    for c in catches {
                        walk(cg, &c.body, out);
                    }
                }
                Stmt::Block(inner) => walk(cg, inner, out),
                _ => {}
            }
        }
    }
    let mut out = Vec::new();
    walk(cg, body, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn compile_source(src: &str) -> RuntimeProgram {
        let mut sink = DiagnosticSink::new(15);
        let tokens = Lexer::new(src).tokenize(&mut sink);
        let mut parser = Parser::new(&tokens, &mut sink);
        let program = parser.parse_program();
        let config = CompilerConfig::new();
        compile(&program, &mut sink, &config)
    }

    #[test]
    fn reserved_constant_slots_match_the_vm_default() {
        let program = compile_source("<?ql echo 1; ?>");
        assert!(matches!(program.constants[0], Value::Null));
        assert!(matches!(program.constants[1], Value::Bool(true)));
        assert!(matches!(program.constants[2], Value::Bool(false)));
    }

    #[test]
    fn identical_string_literals_share_one_constant_slot() {
        let program = compile_source(r#"<?ql echo "same"; echo "same"; ?>"#);
        let slots: Vec<i64> =
            program.entry.iter().filter(|i| i.op == Opcode::LoadC && i.p1 > 2).map(|i| i.p1).collect();
        assert_eq!(slots.len(), 2);
        assert_eq!(slots[0], slots[1]);
    }

    #[test]
    fn function_declarations_hoist_out_of_the_entry_container() {
        let program = compile_source("<?ql function greet() { return 1; } echo greet(); ?>");
        assert_eq!(program.functions.len(), 1);
        assert_eq!(program.functions[0].name.as_ref(), "greet");
    }

    #[test]
    fn while_loop_break_jumps_past_the_loop_body() {
        let program = compile_source("<?ql while (true) { break; } ?>");
        let jmp_count = program.entry.iter().filter(|i| i.op == Opcode::Jmp).count();
        assert!(jmp_count >= 1);
    }

    #[test]
    fn postfix_increment_on_a_variable_loads_the_old_value_first() {
        let program = compile_source("<?ql $x = 1; $y = $x++; ?>");
        let ops: Vec<Opcode> = program.entry.iter().map(|i| i.op).collect();
        let incr_pos = ops.iter().position(|o| *o == Opcode::Incr).unwrap();
        assert_eq!(ops[incr_pos - 1], Opcode::Load);
    }

    /// A call inside a `switch` case body is spliced from the scratch
    /// container into the entry container; only jump-target opcodes (not
    /// `CALL`'s `has_receiver` flag) may have `base` added to their P2.
    #[test]
    fn call_inside_a_switch_case_keeps_its_has_receiver_flag_intact() {
        let program = compile_source(
            "<?ql function greet() { return 1; } switch ($x) { case 1: greet(); break; default: break; } ?>",
        );
        for instr in program.entry.iter().filter(|i| i.op == Opcode::Call) {
            assert!(instr.p2 == 0 || instr.p2 == 1, "CALL.p2 must stay a 0/1 flag, got {}", instr.p2);
        }
    }
}
