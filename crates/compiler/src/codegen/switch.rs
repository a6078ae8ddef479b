//! `switch` codegen (spec §4.3 "switch").
//!
//! Case *bodies* are not separate containers — the `SWITCH` handler jumps
//! the instruction pointer directly into the middle of the enclosing
//! container, relying on straight-line fallthrough between cases exactly
//! like the reference VM's own switch table. So bodies are compiled once
//! into a scratch container (to learn each case's relative offset), then
//! spliced into the real container right after the `SWITCH` instruction
//! itself, with every spliced instruction's jump target shifted by the
//! splice point (`base`). Per-case *test* expressions stay in their own
//! small standalone containers instead (run through `run_initializer`, the
//! same way a `const` body or a default-parameter value is), since the VM
//! never needs to jump into the middle of one.

use super::{Codegen, LoopFrame};
use crate::ast::{Expr, SwitchArm};
use quill_core::{Instruction, InstructionContainer, Opcode, Operand, SwitchCase, SwitchDescriptor};

pub fn compile(cg: &mut Codegen, subject: &Expr, cases: &[SwitchArm], out: &mut InstructionContainer, line: u32) {
    cg.compile_expr(subject, out);
    let subject_tmp = cg.temp_name();
    out.emit(Instruction::new(Opcode::Store, line).with_p3(Operand::Name(subject_tmp.clone())));
    out.emit(Instruction::new(Opcode::Pop, line));

    // Snapshot every still-open loop/switch frame's fix-up lengths so that,
    // after compiling the body, we can tell which entries were pushed
    // *during* this switch's body (by a `break 2;`/`continue 2;` reaching
    // past it) and so need the same scratch-relative-to-absolute correction
    // as this switch's own fix-ups.
    let snapshot: Vec<(usize, usize)> =
        cg.loop_stack.iter().map(|f| (f.break_fixups.len(), f.continue_fixups.len())).collect();

    cg.loop_stack.push(LoopFrame::new(true));
    // `goto`/label targets can't survive the scratch-container splice below
    // (see `Codegen::switch_depth`), so reject any compiled inside this
    // range rather than silently rebasing them wrong.
    cg.switch_depth += 1;
    let mut body_scratch = InstructionContainer::new();
    let mut case_body_starts = Vec::with_capacity(cases.len());
    for arm in cases {
        case_body_starts.push(body_scratch.len() as u32);
        cg.compile_stmts(&arm.body, &mut body_scratch);
    }
    cg.switch_depth -= 1;
    let out_index_relative = body_scratch.len() as u32;
    let switch_frame = cg.loop_stack.pop().expect("pushed immediately above");

    // Reserve the SWITCH instruction's own slot: body offsets are relative
    // to the position right after it.
    out.emit(Instruction::new(Opcode::Load, line).with_p3(Operand::Name(subject_tmp)));
    let base = out.len() as u32 + 1;

    let descriptor_cases = cases
        .iter()
        .zip(case_body_starts.iter())
        .map(|(arm, &rel_start)| {
            let mut test = InstructionContainer::new();
            let is_default = match &arm.test {
                Some(expr) => {
                    cg.compile_expr(expr, &mut test);
                    test.emit(Instruction::new(Opcode::Done, line).with_p1(1));
                    false
                }
                None => true,
            };
            SwitchCase { test, body_start: base + rel_start, is_default }
        })
        .collect();
    let out_index = base + out_index_relative;
    let descriptor = SwitchDescriptor { cases: descriptor_cases, out_index };
    out.emit(Instruction::new(Opcode::Switch, line).with_p3(Operand::Switch(Box::new(descriptor))));

    for mut instr in body_scratch.into_instructions() {
        // P2 is almost always a same-container jump target, but `CALL` packs
        // a `has_receiver` 0/1 flag into it instead (vm.rs); blindly rebasing
        // every instruction would turn that flag into garbage. Only the
        // opcodes that actually read P2 as a jump target get corrected.
        if matches!(instr.op, Opcode::Jmp | Opcode::Jz | Opcode::Jnz | Opcode::LoadException | Opcode::ForeachStep) {
            instr.p2 += base;
        }
        out.emit(instr);
    }

    // `break`/`continue` recorded directly against this switch: both lists
    // collapse into `break_fixups` (a switch frame routes continue the same
    // way, spec §4.3), every index scratch-relative, all needing +base.
    for idx in switch_frame.break_fixups {
        out.patch_p2(base as usize + idx, out_index);
    }

    // `break N;`/`continue N;` reaching past this switch into an outer
    // loop: those entries are still scratch-relative in the outer frame,
    // left there for the outer loop's own compile step to patch once its
    // target is known — correct them to be absolute in `out` now, while
    // `base` is in scope.
    for (frame, &(break_before, continue_before)) in cg.loop_stack.iter_mut().zip(snapshot.iter()) {
        for idx in frame.break_fixups.iter_mut().skip(break_before) {
            *idx += base as usize;
        }
        for idx in frame.continue_fixups.iter_mut().skip(continue_before) {
            *idx += base as usize;
        }
    }
}
