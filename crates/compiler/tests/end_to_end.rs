//! Full source-text -> lexer -> parser -> codegen -> VM pipeline tests,
//! unlike `quill-runtime`'s `tests/scenarios.rs` (which pins the executor
//! down against hand-built bytecode). These exercise `compile_str_or_err`
//! end to end against real Quill source, covering features that only the
//! compiler's own lowering can produce (`goto`, magic methods, visibility,
//! typed-parameter coercion).

use quill_runtime::engine::{Engine, EngineConfig};
use quillc::config::CompilerConfig;
use quillc::script::{compile_str, compile_str_or_err};

fn run(source: &str) -> String {
    let config = CompilerConfig::new();
    let program = compile_str_or_err(source, &config).expect("script compiles");
    let mut engine = Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() });
    engine.execute(program).expect("script runs to completion");
    String::from_utf8(engine.take_output().unwrap()).unwrap()
}

#[test]
fn goto_skips_over_the_statement_between_it_and_its_label() {
    let source = r#"<?ql
        echo "a";
        goto skip;
        echo "b";
        skip:
        echo "c";
    ?>"#;
    assert_eq!(run(source), "ac");
}

#[test]
fn goto_can_jump_backward_to_build_a_loop() {
    let source = r#"<?ql
        $i = 0;
        start:
        echo $i;
        $i = $i + 1;
        if ($i < 3) {
            goto start;
        }
    ?>"#;
    assert_eq!(run(source), "012");
}

#[test]
fn goto_to_an_undefined_label_is_reported_as_a_diagnostic() {
    let config = CompilerConfig::new();
    let source = r#"<?ql
        goto nowhere;
        echo "unreachable";
    ?>"#;
    let outcome = compile_str(source, &config);
    assert!(
        outcome.diagnostics.iter().any(|d| d.message.contains("undefined label")),
        "expected an undefined-label diagnostic, got {:?}",
        outcome.diagnostics
    );
}

#[test]
fn magic_get_and_set_intercept_missing_properties() {
    let source = r#"<?ql
        class Bag {
            private $data = array();
            function __get($name) {
                return $this->data[$name] . "!";
            }
            function __set($name, $value) {
                $this->data[$name] = $value;
            }
        }
        $b = new Bag();
        $b->color = "red";
        echo $b->color;
    ?>"#;
    assert_eq!(run(source), "red!");
}

#[test]
fn magic_call_catches_invocations_of_undefined_methods() {
    let source = r#"<?ql
        class Proxy {
            function __call($name, $args) {
                return $name . ":" . $args[0];
            }
        }
        $p = new Proxy();
        echo $p->anything("x");
    ?>"#;
    assert_eq!(run(source), "anything:x");
}

#[test]
fn magic_invoke_lets_an_object_be_called_like_a_function() {
    let source = r#"<?ql
        class Adder {
            function __invoke($a, $b) {
                return $a + $b;
            }
        }
        $add = new Adder();
        echo $add(2, 3);
    ?>"#;
    assert_eq!(run(source), "5");
}

#[test]
fn clone_runs_the_magic_clone_hook_and_keeps_instances_independent() {
    let source = r#"<?ql
        class Counter {
            public $n = 0;
            public $clones = 0;
            function __clone() {
                $this->clones = $this->clones + 1;
            }
        }
        $a = new Counter();
        $a->n = 1;
        $b = clone $a;
        $b->n = 2;
        echo $a->n . "," . $b->n . "," . $b->clones;
    ?>"#;
    assert_eq!(run(source), "1,2,1");
}

#[test]
fn private_method_is_not_reachable_from_outside_its_class() {
    let source = r#"<?ql
        class Secret {
            private function hidden() {
                return "leaked";
            }
            function reveal() {
                return $this->hidden();
            }
        }
        $s = new Secret();
        echo $s->reveal();
    ?>"#;
    assert_eq!(run(source), "leaked");

    let config = CompilerConfig::new();
    let bad = r#"<?ql
        class Secret {
            private function hidden() {
                return "leaked";
            }
        }
        $s = new Secret();
        echo $s->hidden();
    ?>"#;
    let program = compile_str_or_err(bad, &config).expect("script still compiles");
    let mut engine = Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() });
    let result = engine.execute(program);
    assert!(result.is_err(), "calling a private method from outside its class must fail at run time");
}

#[test]
fn overriding_a_final_method_is_rejected_at_compile_time() {
    let config = CompilerConfig::new();
    let source = r#"<?ql
        class Base {
            final function lock() {
                return 1;
            }
        }
        class Derived extends Base {
            function lock() {
                return 2;
            }
        }
    ?>"#;
    let outcome = compile_str(source, &config);
    assert!(
        outcome.diagnostics.iter().any(|d| d.message.contains("final")),
        "expected a final-override diagnostic, got {:?}",
        outcome.diagnostics
    );
}

#[test]
fn a_class_left_with_an_unimplemented_abstract_method_cannot_be_instantiated() {
    let config = CompilerConfig::new();
    let source = r#"<?ql
        abstract class Shape {
            abstract function area();
        }
        class Incomplete extends Shape {
        }
        $s = new Incomplete();
    ?>"#;
    let program = compile_str_or_err(source, &config).expect("script compiles");
    let mut engine = Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() });
    let result = engine.execute(program);
    assert!(result.is_err(), "instantiating a class with a missing abstract method must fail");
}

#[test]
fn typed_int_parameter_coerces_a_numeric_string_argument() {
    let source = r#"<?ql
        function double(int $x) {
            return $x * 2;
        }
        echo double("21");
    ?>"#;
    assert_eq!(run(source), "42");
}

#[test]
fn typed_class_parameter_rejects_an_incompatible_argument() {
    let config = CompilerConfig::new();
    let source = r#"<?ql
        class Widget {
        }
        function paint(Widget $w) {
            echo "painted";
        }
        paint("not a widget");
    ?>"#;
    let program = compile_str_or_err(source, &config).expect("script compiles");
    let mut engine = Engine::new(EngineConfig { capture_output: true, ..EngineConfig::default() });
    engine.execute(program).expect("script still runs to completion");
    assert!(!engine.diagnostics().is_empty(), "a type-mismatched argument should raise a diagnostic");
}
