//! Function/method overload resolution (spec §4.4 step 4 "Call": "resolve to
//! the overload whose declared parameter types best match the supplied
//! arguments; ties broken by declaration order", §6 "Function overloading by
//! parameter signature").

use quill_core::{FunctionDef, Value, ValueType};
use std::rc::Rc;

fn declared_type_matches(declared: &str, actual: ValueType) -> bool {
    match declared {
        "mixed" => true,
        "int" | "integer" => actual == ValueType::Int,
        "float" | "real" | "double" => actual == ValueType::Real,
        "bool" | "boolean" => actual == ValueType::Bool,
        "string" => actual == ValueType::String,
        "array" => actual == ValueType::Array,
        "object" => actual == ValueType::Object,
        "null" => actual == ValueType::Null,
        // A class-name type hint never scores as an exact scalar-type match
        // here; overload ranking only cares about `ValueType`, not
        // inheritance. `Vm::coerce_param` (vm.rs) does the real `instanceof`
        // check once a candidate has been picked and its arguments bound.
        _ => false,
    }
}

/// Score one candidate against the supplied arguments: `None` if the
/// argument count is incompatible (too few without defaults, too many
/// without a variadic tail); otherwise the count of parameters whose
/// declared type matches the argument's actual type without coercion
/// (higher is a better match).
fn score(def: &FunctionDef, args: &[Value]) -> Option<usize> {
    let required = def.params.iter().take_while(|p| p.default.is_none() && !p.variadic).count();
    let has_variadic = def.params.last().is_some_and(|p| p.variadic);
    if args.len() < required {
        return None;
    }
    if !has_variadic && args.len() > def.params.len() {
        return None;
    }
    let mut matches = 0;
    for (param, arg) in def.params.iter().zip(args.iter()) {
        if let Some(declared) = &param.declared_type {
            if declared_type_matches(declared, arg.value_type()) {
                matches += 1;
            }
        } else {
            matches += 1; // untyped always "matches", so fully-typed overloads rank higher on ties
        }
    }
    Some(matches)
}

/// Pick the best-matching overload, falling back to the first candidate
/// (declaration order) if none score cleanly so the caller still gets a
/// definite arity error from the normal binding path rather than silently
/// doing nothing.
pub fn resolve_overload(candidates: &[Rc<FunctionDef>], args: &[Value]) -> usize {
    let mut best: Option<(usize, usize)> = None;
    for (i, def) in candidates.iter().enumerate() {
        if let Some(s) = score(def, args) {
            if best.is_none_or(|(_, best_score)| s > best_score) {
                best = Some((i, s));
            }
        }
    }
    best.map(|(i, _)| i).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{InstructionContainer, Param};

    fn def(name: &str, params: Vec<Param>) -> Rc<FunctionDef> {
        Rc::new(FunctionDef {
            name: name.into(),
            params,
            body: InstructionContainer::new(),
            return_type: None,
            statics: Vec::new(),
            is_class_method: false,
        })
    }

    fn param(name: &str, ty: Option<&str>) -> Param {
        Param { name: name.into(), declared_type: ty.map(Into::into), by_ref: false, variadic: false, default: None }
    }

    #[test]
    fn picks_the_overload_whose_types_match() {
        let candidates = vec![
            def("f", vec![param("x", Some("string"))]),
            def("f", vec![param("x", Some("int"))]),
        ];
        let idx = resolve_overload(&candidates, &[Value::Int(5)]);
        assert_eq!(idx, 1);
    }

    #[test]
    fn ties_break_on_declaration_order() {
        let candidates = vec![
            def("f", vec![param("x", None)]),
            def("f", vec![param("x", None)]),
        ];
        let idx = resolve_overload(&candidates, &[Value::Int(5)]);
        assert_eq!(idx, 0);
    }
}
