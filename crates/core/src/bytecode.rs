//! The instruction set and instruction containers (spec §3 "Instruction",
//! "InstructionContainer", §4.4 "Executor").
//!
//! Lives in `quill-core`, not `quill-runtime`, because both the compiler (to
//! build it) and the runtime (to walk it) need the same type without one
//! depending on the other; `quill-core` is the shared foundation both sit on.
//!
//! Per spec §9's redesign note on the reference implementation's opaque
//! `void*` operand P3, [`Operand`] is a closed sum type: every opcode admits
//! only specific variants and the executor does a tagged match instead of an
//! unchecked pointer cast.

use crate::class::FunctionDef;
use std::rc::Rc;

/// One VM operation. Mirrors the reference implementation's opcode table
/// (spec §4.4), preserved name-for-name since spec.md enumerates these
/// verbatim as the executor's contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    // --- control ---
    Done,
    Halt,
    Noop,
    Jmp,
    Jz,
    Jnz,
    /// `global $a, $b;` (spec §4.3 "`global`"): aliases each named local to
    /// the matching slot in the global scope's frame. P1 = count (also the
    /// length of the P3 name list); kept distinct from `UPLINK`
    /// (`parent::method()`) since `Operand` is a closed sum type and the two
    /// statements share no operand shape (spec §9 redesign note on P3).
    Global,

    // --- load ---
    Load,
    LoadC,
    LoadIdx,
    LoadMap,
    LoadList,
    LoadClosure,
    LoadRef,
    LoadException,
    /// Reads a class static property or class constant, addressed by a
    /// compile-time-composed `"ClassName::member"` name (p3 = `Operand::Name`).
    LoadStatic,
    /// Looks up a global constant by name (p3 = `Operand::Name`) and runs its
    /// registered callback on first read, caching the result (spec §4.3:
    /// "`const` (outside a class)").
    LoadConst,

    // --- store ---
    Store,
    StoreIdx,
    StoreIdxRef,
    StoreRef,
    /// Writes a class static property, addressed the same way as
    /// `LOAD_STATIC`. Not used for class constants, which are write-once at
    /// class-registration time.
    StoreStatic,

    // --- constants ---
    /// Registers a value-producing constant callback pointing at an isolated
    /// bytecode container (spec §4.3: "`const` (outside a class)"); the
    /// container is not run until the first matching `LOAD_CONST`.
    DefineConst,

    // --- stack shuffle ---
    Pop,
    Pull,
    Swap,
    Yield,

    // --- conversion ---
    CvtInt,
    CvtStr,
    CvtReal,
    CvtBool,
    CvtNumc,
    CvtNull,
    CvtArray,
    CvtObj,

    // --- arithmetic / logic ---
    Uminus,
    Uplus,
    Bitnot,
    Lnot,
    Mul,
    Div,
    Mod,
    Add,
    Sub,
    Shl,
    Shr,
    Band,
    Bxor,
    Bor,
    Land,
    Lor,
    Lxor,
    Incr,
    Decr,
    Cat,

    // --- compound-assignment variants ---
    AddStore,
    SubStore,
    MulStore,
    DivStore,
    ModStore,
    CatStore,
    ShlStore,
    ShrStore,
    BandStore,
    BorStore,
    BxorStore,

    // --- compare ---
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Neq,
    Teq,
    Tne,
    Seq,
    Sne,

    // --- call / OO ---
    Call,
    New,
    Clone,
    Member,
    Uplink,
    /// `ClassName::method(...)`/`self::method(...)`/`static::method(...)`
    /// (anything other than `parent::`, which uses `UPLINK`). p1 = argc, p3 =
    /// `Operand::Name("ClassName::method")`.
    CallStatic,
    IsA,

    // --- iteration ---
    ForeachInit,
    ForeachStep,

    // --- exceptions ---
    Throw,
    PopException,

    // --- io / misc ---
    Consume,
    Switch,
    ErrCtrl,
}

/// The sum type standing in for the reference implementation's opaque `void*`
/// P3 operand (spec §9). Each opcode only ever produces one of these shapes;
/// see the codegen module for which.
#[derive(Debug, Clone)]
pub enum Operand {
    None,
    /// A name interned at compile time: a variable, function, class, or
    /// member name.
    Name(Rc<str>),
    /// The imported-name list for `GLOBAL`.
    NameList(Vec<Rc<str>>),
    Foreach(Box<ForeachDescriptor>),
    Switch(Box<SwitchDescriptor>),
    Exception(Box<ExceptionDescriptor>),
    Closure(Box<ClosureDescriptor>),
    Const(Box<ConstDescriptor>),
}

/// One VM instruction: opcode plus the three PH7-style operands (spec §3
/// "Instruction"). `p1` is a signed immediate (argument count, increment
/// direction, "is static access" flag...); `p2` is almost always a jump
/// target, patched during fix-up and otherwise left at 0.
#[derive(Debug, Clone)]
pub struct Instruction {
    pub op: Opcode,
    pub p1: i64,
    pub p2: u32,
    pub p3: Operand,
    pub line: u32,
}

impl Instruction {
    pub fn new(op: Opcode, line: u32) -> Self {
        Instruction { op, p1: 0, p2: 0, p3: Operand::None, line }
    }

    pub fn with_p1(mut self, p1: i64) -> Self {
        self.p1 = p1;
        self
    }

    pub fn with_p2(mut self, p2: u32) -> Self {
        self.p2 = p2;
        self
    }

    pub fn with_p3(mut self, p3: Operand) -> Self {
        self.p3 = p3;
        self
    }
}

/// An ordered sequence of instructions owned by a function, method,
/// attribute initializer, or the global scope (spec §3
/// "InstructionContainer"). Append-only during compilation except for P2
/// jump-target fix-ups (spec invariant: "operand P2... may be patched,
/// nothing else").
#[derive(Debug, Clone, Default)]
pub struct InstructionContainer {
    instructions: Vec<Instruction>,
}

impl InstructionContainer {
    pub fn new() -> Self {
        InstructionContainer { instructions: Vec::new() }
    }

    /// Appends `instr`, returning its index for later fix-up.
    pub fn emit(&mut self, instr: Instruction) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Patch the jump-target operand (P2) of a previously emitted
    /// instruction. The only mutation this container's invariant allows
    /// after the instruction was appended.
    pub fn patch_p2(&mut self, index: usize, target: u32) {
        self.instructions[index].p2 = target;
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instruction> {
        self.instructions.iter()
    }

    pub fn as_slice(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Consumes the container, handing back its instructions for splicing
    /// into another container (code generator use only; the append-only
    /// invariant governs *compiled* containers, not this kind of compile-time
    /// reassembly of one that was only ever a scratch buffer).
    pub fn into_instructions(self) -> Vec<Instruction> {
        self.instructions
    }
}

/// P3 payload for `FOREACH_INIT`/`FOREACH_STEP` (spec §3 "ForeachInfo").
#[derive(Debug, Clone)]
pub struct ForeachDescriptor {
    pub key_var: Option<Rc<str>>,
    pub value_var: Rc<str>,
    pub by_ref: bool,
}

/// One `case`/`default` arm of a `SWITCH` (spec §4.3 "switch").
#[derive(Debug, Clone)]
pub struct SwitchCase {
    /// Bytecode that evaluates the case's test expression; empty for
    /// `default`.
    pub test: InstructionContainer,
    /// Index, in the enclosing function's body, of this case's first
    /// statement instruction.
    pub body_start: u32,
    pub is_default: bool,
}

/// P3 payload for `SWITCH` (spec §4.3 "switch": "descriptor P3 holding
/// per-case expression bytecode, case start indices, default index, and out
/// index").
#[derive(Debug, Clone)]
pub struct SwitchDescriptor {
    pub cases: Vec<SwitchCase>,
    pub out_index: u32,
}

/// One `catch` clause (spec §3 "ExceptionFrame": "set of catch blocks").
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub exception_class: Rc<str>,
    pub var_name: Rc<str>,
    pub body: InstructionContainer,
}

/// P3 payload for `LOAD_EXCEPTION` (spec §4.3 "throw / try / catch").
#[derive(Debug, Clone)]
pub struct ExceptionDescriptor {
    pub catches: Vec<CatchClause>,
}

/// P3 payload for `LOAD_CLOSURE` (spec §4.2 "anonymous-function
/// expressions").
#[derive(Debug, Clone)]
pub struct ClosureDescriptor {
    pub function: Rc<FunctionDef>,
    /// Names captured from the enclosing scope, and whether each is
    /// captured by reference (`use (&$x)`).
    pub captures: Vec<(Rc<str>, bool)>,
}

/// P3 payload for `DEFINE_CONST` (spec §4.3: "`const` (outside a class)").
#[derive(Debug, Clone)]
pub struct ConstDescriptor {
    pub name: Rc<str>,
    pub body: InstructionContainer,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patching_p2_only_touches_the_target_instruction() {
        let mut c = InstructionContainer::new();
        let jmp = c.emit(Instruction::new(Opcode::Jz, 1));
        c.emit(Instruction::new(Opcode::Noop, 2));
        c.patch_p2(jmp, 5);
        assert_eq!(c.get(jmp).unwrap().p2, 5);
        assert_eq!(c.get(jmp + 1).unwrap().p2, 0);
    }
}
