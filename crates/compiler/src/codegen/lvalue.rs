//! Lvalue classification, and the temp-variable caching used to desugar
//! compound-assignment / increment-decrement on targets that have no
//! dedicated compound opcode (anything but a plain `$variable`).
//!
//! `Expr::Member` folds into the same shape as `Expr::Index` here (base +
//! string key), since the VM's `index_set`/`index_get` already treat an
//! object generically by field-name string — there is no separate
//! `STORE_MEMBER` opcode to target (see the module-level notes in
//! `codegen/mod.rs`).

use super::Codegen;
use crate::ast::Expr;
use quill_core::{Instruction, InstructionContainer, Opcode, Operand};
use std::rc::Rc;

pub enum Lvalue {
    Var(Rc<str>),
    /// Already composed `"ClassName::member"` (spec §4.3 `self::`/`static::`/
    /// `parent::` resolution happens at run time against this string).
    StaticProp(Rc<str>),
    Indexed { base: Expr, key: Option<Expr>, append: bool },
    Invalid,
}

pub fn classify(target: &Expr) -> Lvalue {
    match target {
        Expr::Variable(name) => Lvalue::Var(name.clone()),
        Expr::Index { base, index, .. } => {
            Lvalue::Indexed { base: (**base).clone(), key: index.as_deref().cloned(), append: index.is_none() }
        }
        Expr::Member { base, name, .. } => {
            Lvalue::Indexed { base: (**base).clone(), key: Some(Expr::Str(name.clone())), append: false }
        }
        Expr::StaticProp { class_name, name, .. } => {
            Lvalue::StaticProp(Rc::from(format!("{class_name}::{name}")))
        }
        _ => Lvalue::Invalid,
    }
}

/// A base (and optional key) expression evaluated exactly once and cached
/// into synthesized temp locals, so a read-modify-write sequence can load
/// the current value and store the new one back without re-evaluating
/// either and risking duplicated side effects.
pub enum Cached {
    Var(Rc<str>),
    StaticProp(Rc<str>),
    Indexed { base_tmp: Rc<str>, key_tmp: Option<Rc<str>>, value_tmp: Rc<str>, append: bool },
    Invalid,
}

/// Evaluates and caches `target`'s base/key (a no-op for a plain variable or
/// static property, which need no caching), returning a handle that can
/// `emit_load`/`emit_store` any number of times against the same
/// already-evaluated base.
pub fn cache(cg: &mut Codegen, target: &Expr, out: &mut InstructionContainer, line: u32) -> Cached {
    match classify(target) {
        Lvalue::Var(name) => Cached::Var(name),
        Lvalue::StaticProp(name) => Cached::StaticProp(name),
        Lvalue::Indexed { base, key, append } => {
            let base_tmp = cg.temp_name();
            cg.compile_expr(&base, out);
            out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(base_tmp.clone())));
            out.emit(Instruction::new(Opcode::Pop, line));
            let key_tmp = key.map(|k| {
                let t = cg.temp_name();
                cg.compile_expr(&k, out);
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(t.clone())));
                out.emit(Instruction::new(Opcode::Pop, line));
                t
            });
            let value_tmp = cg.temp_name();
            Cached::Indexed { base_tmp, key_tmp, value_tmp, append }
        }
        Lvalue::Invalid => {
            cg.emit_invalid_lvalue_diagnostic(line);
            Cached::Invalid
        }
    }
}

impl Cached {
    /// Pushes the lvalue's current value.
    pub fn emit_load(&self, out: &mut InstructionContainer, line: u32) {
        match self {
            Cached::Var(name) => {
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(name.clone())));
            }
            Cached::StaticProp(name) => {
                out.emit(Instruction::new(Opcode::LoadStatic, line).with_p3(Operand::Name(name.clone())));
            }
            Cached::Indexed { base_tmp, key_tmp, .. } => {
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(base_tmp.clone())));
                if let Some(k) = key_tmp {
                    out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(k.clone())));
                }
                out.emit(Instruction::new(Opcode::LoadIdx, line));
            }
            Cached::Invalid => {}
        }
    }

    /// Stores the value currently on top of the stack back into the lvalue,
    /// leaving it there afterward (every `STORE*` opcode re-pushes its
    /// value).
    pub fn emit_store(&self, out: &mut InstructionContainer, line: u32) {
        match self {
            Cached::Var(name) => {
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(name.clone())));
            }
            Cached::StaticProp(name) => {
                out.emit(Instruction::new(Opcode::StoreStatic, line).with_p3(Operand::Name(name.clone())));
            }
            Cached::Indexed { base_tmp, key_tmp, value_tmp, append } => {
                // STORE_IDX pops value, then key (unless P1 == 1), then the
                // container — cache the about-to-be-lost value, push
                // container/key underneath it, then restore it on top.
                out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(value_tmp.clone())));
                out.emit(Instruction::new(Opcode::Pop, line));
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(base_tmp.clone())));
                if let Some(k) = key_tmp {
                    out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(k.clone())));
                }
                out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(value_tmp.clone())));
                out.emit(Instruction::new(Opcode::StoreIdx, line).with_p1(*append as i64));
            }
            Cached::Invalid => {}
        }
    }
}
