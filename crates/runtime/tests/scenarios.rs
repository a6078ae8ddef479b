//! End-to-end executor scenarios (spec §8 scenarios S1, S2, S3, S5), built
//! directly against the bytecode API rather than through the compiler (which
//! lives in a separate crate layered on top of this one) so the executor's
//! own correctness is pinned down independent of code-generation details.

use quill_core::{
    CatchClause, ExceptionDescriptor, ForeachDescriptor, FunctionDef, Instruction,
    InstructionContainer, Opcode, Operand, Value,
};
use quill_runtime::{Engine, EngineConfig, Program};
use std::rc::Rc;

fn engine() -> Engine {
    Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() })
}

fn run(entry: InstructionContainer, constants: Vec<Value>, functions: Vec<Rc<FunctionDef>>) -> (Engine, Result<(), quill_runtime::VmError>) {
    let mut eng = engine();
    let program = Program { entry: Rc::new(entry), constants, functions, classes: Vec::new() };
    let result = eng.execute(program);
    (eng, result)
}

/// S1: a literal template chunk is written straight to output.
#[test]
fn s1_hello_output() {
    let mut body = InstructionContainer::new();
    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(1).with_p3(Operand::Name("hello from quill\n".into())));
    body.emit(Instruction::new(Opcode::Done, 1));

    let (mut eng, result) = run(body, vec![Value::Null, Value::Bool(true), Value::Bool(false)], Vec::new());
    result.expect("script runs to completion");
    assert_eq!(eng.take_output().unwrap(), b"hello from quill\n");
}

/// S2: arithmetic respects precedence (`2 + 3 * 4 == 14`) and the result
/// converts to its canonical string form for output.
#[test]
fn s2_arithmetic_precedence() {
    let constants = vec![Value::Null, Value::Bool(true), Value::Bool(false), Value::Int(2), Value::Int(3), Value::Int(4)];
    let mut body = InstructionContainer::new();
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(4));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(5));
    body.emit(Instruction::new(Opcode::Mul, 1));
    body.emit(Instruction::new(Opcode::Add, 1));
    body.emit(Instruction::new(Opcode::Store, 1).with_p3(Operand::Name("x".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("x".into())));
    body.emit(Instruction::new(Opcode::CvtStr, 1));
    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(0));
    body.emit(Instruction::new(Opcode::Done, 1));

    let (mut eng, result) = run(body, constants, Vec::new());
    result.expect("script runs to completion");
    assert_eq!(eng.take_output().unwrap(), b"14");
}

/// S3: iterating an ordered map visits entries in insertion order.
#[test]
fn s3_foreach_visits_insertion_order() {
    let constants = vec![
        Value::Null,
        Value::Bool(true),
        Value::Bool(false),
        Value::str(""),
        Value::str("a"),
        Value::Int(1),
        Value::str("b"),
        Value::Int(2),
        Value::str("c"),
        Value::Int(3),
    ];
    let mut body = InstructionContainer::new();
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    body.emit(Instruction::new(Opcode::Store, 1).with_p3(Operand::Name("acc".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(4));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(5));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(6));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(7));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(8));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(9));
    body.emit(Instruction::new(Opcode::LoadMap, 1).with_p1(3));
    let foreach_descriptor = ForeachDescriptor { key_var: None, value_var: "v".into(), by_ref: false };
    body.emit(
        Instruction::new(Opcode::ForeachInit, 1).with_p3(Operand::Foreach(Box::new(foreach_descriptor.clone()))),
    );
    let step_idx = body.emit(
        Instruction::new(Opcode::ForeachStep, 1).with_p3(Operand::Foreach(Box::new(foreach_descriptor))),
    );
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("acc".into())));
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("v".into())));
    body.emit(Instruction::new(Opcode::Cat, 1));
    body.emit(Instruction::new(Opcode::Store, 1).with_p3(Operand::Name("acc".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));
    body.emit(Instruction::new(Opcode::Jmp, 1).with_p2(step_idx as u32));
    let out_idx = body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("acc".into())));
    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(0));
    body.emit(Instruction::new(Opcode::Done, 1));
    body.patch_p2(step_idx, out_idx as u32);

    let (mut eng, result) = run(body, constants, Vec::new());
    result.expect("script runs to completion");
    assert_eq!(eng.take_output().unwrap(), b"123");
}

/// S5: an exception thrown inside a called function is caught by the
/// caller's `try`/`catch`, and `getMessage()` returns what the constructor
/// was given.
#[test]
fn s5_exception_propagates_across_a_call_and_is_caught() {
    let constants = vec![Value::Null, Value::Bool(true), Value::Bool(false), Value::str("boom message")];

    let mut boom_body = InstructionContainer::new();
    boom_body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    boom_body.emit(Instruction::new(Opcode::New, 1).with_p1(1).with_p3(Operand::Name("Exception".into())));
    boom_body.emit(Instruction::new(Opcode::Throw, 1));
    let boom = Rc::new(FunctionDef {
        name: "boom".into(),
        params: Vec::new(),
        body: boom_body,
        return_type: None,
        statics: Vec::new(),
        is_class_method: false,
    });

    let mut catch_body = InstructionContainer::new();
    catch_body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("e".into())));
    catch_body.emit(
        Instruction::new(Opcode::Call, 1).with_p1(0).with_p2(1).with_p3(Operand::Name("getMessage".into())),
    );
    catch_body.emit(Instruction::new(Opcode::CvtStr, 1));
    catch_body.emit(Instruction::new(Opcode::Consume, 1).with_p1(0));

    let descriptor = ExceptionDescriptor {
        catches: vec![CatchClause { exception_class: "Exception".into(), var_name: "e".into(), body: catch_body }],
    };

    let mut main_body = InstructionContainer::new();
    main_body.emit(Instruction::new(Opcode::LoadException, 1).with_p2(4).with_p3(Operand::Exception(Box::new(descriptor))));
    main_body.emit(Instruction::new(Opcode::Call, 1).with_p1(0).with_p2(0).with_p3(Operand::Name("boom".into())));
    main_body.emit(Instruction::new(Opcode::Pop, 1));
    main_body.emit(Instruction::new(Opcode::PopException, 1));
    main_body.emit(Instruction::new(Opcode::Done, 1));

    let (mut eng, result) = run(main_body, constants, vec![boom]);
    result.expect("the catch handles the exception; execute() sees a clean run");
    assert_eq!(eng.take_output().unwrap(), b"boom message");
}

/// S4: two overloads of `f` sharing a name are distinguished by declared
/// parameter type; `f(5)` picks the `int` overload, `f("a")` picks the
/// `string` one.
#[test]
fn s4_overload_selection_by_type() {
    use quill_core::Param;

    let constants = vec![Value::Null, Value::Bool(true), Value::Bool(false), Value::Int(5), Value::str("a")];

    let mut int_body = InstructionContainer::new();
    int_body.emit(Instruction::new(Opcode::Consume, 1).with_p1(1).with_p3(Operand::Name("i".into())));
    int_body.emit(Instruction::new(Opcode::Done, 1));
    let f_int = Rc::new(FunctionDef {
        name: "f".into(),
        params: vec![Param { name: "x".into(), declared_type: Some("int".into()), by_ref: false, variadic: false, default: None }],
        body: int_body,
        return_type: None,
        statics: Vec::new(),
        is_class_method: false,
    });

    let mut str_body = InstructionContainer::new();
    str_body.emit(Instruction::new(Opcode::Consume, 1).with_p1(1).with_p3(Operand::Name("s".into())));
    str_body.emit(Instruction::new(Opcode::Done, 1));
    let f_str = Rc::new(FunctionDef {
        name: "f".into(),
        params: vec![Param { name: "x".into(), declared_type: Some("string".into()), by_ref: false, variadic: false, default: None }],
        body: str_body,
        return_type: None,
        statics: Vec::new(),
        is_class_method: false,
    });

    let mut main_body = InstructionContainer::new();
    main_body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    main_body.emit(Instruction::new(Opcode::Call, 1).with_p1(1).with_p2(0).with_p3(Operand::Name("f".into())));
    main_body.emit(Instruction::new(Opcode::Pop, 1));
    main_body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(4));
    main_body.emit(Instruction::new(Opcode::Call, 1).with_p1(1).with_p2(0).with_p3(Operand::Name("f".into())));
    main_body.emit(Instruction::new(Opcode::Pop, 1));
    main_body.emit(Instruction::new(Opcode::Done, 1));

    let (mut eng, result) = run(main_body, constants, vec![f_int, f_str]);
    result.expect("script runs to completion");
    assert_eq!(eng.take_output().unwrap(), b"is");
}

/// S6: `break 2;` inside a loop nested two deep exits both loops, and
/// execution resumes at the statement right after the outer loop.
#[test]
fn s6_break_with_level_exits_nested_loops() {
    // for ($i=0;$i<2;$i++) { for ($j=0;$j<2;$j++) { if ($j==1) break 2; echo "$i$j;"; } } echo "done";
    let constants = vec![Value::Null, Value::Bool(true), Value::Bool(false), Value::Int(0), Value::Int(2), Value::Int(1)];
    let mut body = InstructionContainer::new();

    // $i = 0
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    body.emit(Instruction::new(Opcode::Store, 1).with_p3(Operand::Name("i".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));

    let outer_test = body.len() as u32;
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("i".into())));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(4));
    body.emit(Instruction::new(Opcode::Lt, 1));
    let outer_jz = body.emit(Instruction::new(Opcode::Jz, 1));

    // $j = 0
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(3));
    body.emit(Instruction::new(Opcode::Store, 1).with_p3(Operand::Name("j".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));

    let inner_test = body.len() as u32;
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("j".into())));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(4));
    body.emit(Instruction::new(Opcode::Lt, 1));
    let inner_jz = body.emit(Instruction::new(Opcode::Jz, 1));

    // if ($j == 1) break 2;
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("j".into())));
    body.emit(Instruction::new(Opcode::LoadC, 1).with_p1(5));
    body.emit(Instruction::new(Opcode::Eq, 1));
    let if_jz = body.emit(Instruction::new(Opcode::Jz, 1));
    let break_jmp = body.emit(Instruction::new(Opcode::Jmp, 1));
    body.patch_p2(if_jz, body.len() as u32);

    // echo "$i$j;"
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("i".into())));
    body.emit(Instruction::new(Opcode::CvtStr, 1));
    body.emit(Instruction::new(Opcode::Load, 1).with_p3(Operand::Name("j".into())));
    body.emit(Instruction::new(Opcode::CvtStr, 1));
    body.emit(Instruction::new(Opcode::Cat, 1));
    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(1).with_p3(Operand::Name(";".into())));
    body.emit(Instruction::new(Opcode::Cat, 1));
    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(0));

    // $j++
    body.emit(Instruction::new(Opcode::Incr, 1).with_p1(1).with_p3(Operand::Name("j".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));
    body.emit(Instruction::new(Opcode::Jmp, 1).with_p2(inner_test));
    body.patch_p2(inner_jz, body.len() as u32);

    // $i++
    body.emit(Instruction::new(Opcode::Incr, 1).with_p1(1).with_p3(Operand::Name("i".into())));
    body.emit(Instruction::new(Opcode::Pop, 1));
    body.emit(Instruction::new(Opcode::Jmp, 1).with_p2(outer_test));
    let after_outer = body.len() as u32;
    body.patch_p2(outer_jz, after_outer);
    body.patch_p2(break_jmp, after_outer);

    body.emit(Instruction::new(Opcode::Consume, 1).with_p1(1).with_p3(Operand::Name("done".into())));
    body.emit(Instruction::new(Opcode::Done, 1));

    let (mut eng, result) = run(body, constants, Vec::new());
    result.expect("script runs to completion");
    assert_eq!(eng.take_output().unwrap(), b"00;done");
}
