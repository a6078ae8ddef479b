//! Class/object model (spec §3 "ClassAttr/ClassMethod/Class/ObjectInstance",
//! §4.5 "Class/object model details").
//!
//! Classes are created once at compile time and live for the VM's lifetime;
//! instances are reference-counted heap allocations created at run time by
//! `NEW`. Both are defined here (rather than in `quill-runtime`) because the
//! compiler needs `Class` too: class-constant and default-value initializers
//! are bytecode the code generator builds while compiling the class
//! declaration (spec §4.3 "Class / interface declaration").

use crate::bytecode::InstructionContainer;
use crate::value::{ObjectHandle, Value};
use bitflags::bitflags;
use indexmap::IndexMap;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

bitflags! {
    /// Per-class flags (spec §3 Class "flags (final/interface/abstract/
    /// throwable/array-accessible)").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u8 {
        const FINAL = 1 << 0;
        const INTERFACE = 1 << 1;
        const ABSTRACT = 1 << 2;
        const THROWABLE = 1 << 3;
        const ARRAY_ACCESSIBLE = 1 << 4;
    }
}

bitflags! {
    /// Per-method/attribute flags (spec §3 "flags (static/final/abstract/
    /// constant)").
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u8 {
        const STATIC = 1 << 0;
        const FINAL = 1 << 1;
        const ABSTRACT = 1 << 2;
        const CONSTANT = 1 << 3;
    }
}

/// A field or class-constant (spec §3 "ClassAttr").
#[derive(Debug, Clone)]
pub struct ClassAttr {
    pub name: Rc<str>,
    pub visibility: Visibility,
    pub flags: MethodFlags,
    /// Bytecode that produces the default value; run once at class load
    /// time for a `static`/constant attribute, or once per `NEW` for an
    /// instance field.
    pub initializer: InstructionContainer,
    /// Slot index into the VM's static-value table, populated only for
    /// `static`/constant attributes.
    pub static_slot: Option<u32>,
}

/// A declared parameter (spec §6 "Typed parameters with automatic
/// coercion").
#[derive(Debug, Clone)]
pub struct Param {
    pub name: Rc<str>,
    pub declared_type: Option<Rc<str>>,
    pub by_ref: bool,
    pub variadic: bool,
    /// Bytecode producing the default value, run into the call frame when
    /// the argument is missing (spec §4.4 "Calls": "fills defaults by
    /// running each missing argument's initializer bytecode").
    pub default: Option<InstructionContainer>,
}

/// A function or method body, shared between free functions and methods
/// (spec §3 "ClassMethod": "embedded function state").
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub name: Rc<str>,
    pub params: Vec<Param>,
    pub body: InstructionContainer,
    pub return_type: Option<Rc<str>>,
    /// Static-variable descriptors declared with `static $x = ...;` inside
    /// this function body (spec §3 "static-variable initializer").
    pub statics: Vec<StaticVarDecl>,
    pub is_class_method: bool,
}

#[derive(Debug, Clone)]
pub struct StaticVarDecl {
    pub name: Rc<str>,
    pub initializer: InstructionContainer,
    /// Slot this static variable's persistent value lives in, shared across
    /// all invocations of the owning function.
    pub slot: u32,
}

/// A method inside a class (spec §3 "ClassMethod").
#[derive(Debug, Clone)]
pub struct ClassMethod {
    pub def: Rc<FunctionDef>,
    pub visibility: Visibility,
    pub flags: MethodFlags,
    pub line: u32,
}

/// A type descriptor, created at compile time and living for the VM's
/// lifetime (spec §3 "Class").
#[derive(Debug, Clone)]
pub struct Class {
    pub name: Rc<str>,
    pub flags: ClassFlags,
    pub base: Option<Rc<str>>,
    pub interfaces: Vec<Rc<str>>,
    pub attrs: IndexMap<Rc<str>, ClassAttr>,
    /// Keyed by method name; overload groups (spec §6 "Function overloading
    /// by parameter signature") share a name and are distinguished by a
    /// parameter-signature vector.
    pub methods: IndexMap<Rc<str>, Vec<ClassMethod>>,
    pub line: u32,
}

impl Class {
    pub fn new(name: impl Into<Rc<str>>, line: u32) -> Self {
        Class {
            name: name.into(),
            flags: ClassFlags::empty(),
            base: None,
            interfaces: Vec::new(),
            attrs: IndexMap::new(),
            methods: IndexMap::new(),
            line,
        }
    }

    pub fn is_abstract(&self) -> bool {
        self.flags.contains(ClassFlags::ABSTRACT) || self.flags.contains(ClassFlags::INTERFACE)
    }

    /// `self` method resolution ignoring overload count (returns the whole
    /// overload group for the caller to pick from, spec §4.4 step 4).
    pub fn find_method(&self, name: &str) -> Option<&[ClassMethod]> {
        self.methods.get(name).map(Vec::as_slice)
    }

    pub fn find_attr(&self, name: &str) -> Option<&ClassAttr> {
        self.attrs.get(name)
    }
}

/// A live instance (spec §3 "ObjectInstance").
#[derive(Debug)]
pub struct ObjectInstance {
    pub class_name: Rc<str>,
    /// Per-instance field table, keyed by field name.
    pub fields: IndexMap<Rc<str>, Value>,
}

impl ObjectInstance {
    pub fn new(class_name: impl Into<Rc<str>>) -> Self {
        ObjectInstance { class_name: class_name.into(), fields: IndexMap::new() }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn set(&mut self, field: impl Into<Rc<str>>, value: Value) {
        self.fields.insert(field.into(), value);
    }
}

/// Duplicate an instance for `clone` (spec §4.4 "Object lifetime": "`clone`
/// duplicates the instance"). Only the field-level copy happens here; the
/// magic `__clone` method, if the class declares one, is invoked afterward
/// by `Vm`'s `CLONE` opcode handler, which has the class table this
/// function doesn't.
pub fn clone_instance(handle: &ObjectHandle) -> ObjectHandle {
    let src = handle.borrow();
    let mut fields = IndexMap::new();
    for (k, v) in src.fields.iter() {
        fields.insert(k.clone(), v.deep_copy());
    }
    Rc::new(std::cell::RefCell::new(ObjectInstance { class_name: src.class_name.clone(), fields }))
}
