use similar_asserts::assert_eq;

use torii::{context, Environment, Value};

fn eval_test(expr: &str, ctx: Value) -> bool {
    let env = Environment::new();
    env.compile_expression(expr).unwrap().eval(ctx).unwrap().is_true()
}

#[test]
fn test_number_tests() {
    assert!(eval_test("3 is odd", context!()));
    assert!(eval_test("4 is even", context!()));
    assert!(eval_test("9 is divisibleby 3", context!()));
    assert!(!eval_test("9 is divisibleby 4", context!()));
    assert!(eval_test("42 is number", context!()));
    assert!(eval_test("42 is integer", context!()));
    assert!(eval_test("42.5 is float", context!()));
    assert!(!eval_test("42 is float", context!()));
}

#[test]
fn test_defined_tests() {
    assert!(eval_test("x is defined", context!(x => 1)));
    assert!(eval_test("x is undefined", context!()));
    assert!(!eval_test("x is defined", context!()));
    assert!(eval_test("none is none", context!()));
}

#[test]
fn test_type_tests() {
    assert!(eval_test("true is boolean", context!()));
    assert!(eval_test("true is true", context!()));
    assert!(eval_test("false is false", context!()));
    assert!(eval_test("'x' is string", context!()));
    assert!(eval_test("[1] is sequence", context!()));
    assert!(eval_test("{'a': 1} is mapping", context!()));
    assert!(eval_test("[1] is iterable", context!()));
    assert!(eval_test("'ab' is iterable", context!()));
    assert!(!eval_test("42 is iterable", context!()));
    assert!(eval_test("range is callable", context!()));
    assert!(!eval_test("'x' is callable", context!()));
}

#[test]
fn test_case_tests() {
    assert!(eval_test("'abc' is lower", context!()));
    assert!(eval_test("'ABC' is upper", context!()));
    assert!(!eval_test("'Abc' is lower", context!()));
}

#[test]
fn test_comparison_tests() {
    assert!(eval_test("1 is eq 1", context!()));
    assert!(eval_test("1 is equalto 1", context!()));
    assert!(eval_test("1 is ne 2", context!()));
    assert!(eval_test("1 is lt 2", context!()));
    assert!(eval_test("2 is le 2", context!()));
    assert!(eval_test("3 is gt 2", context!()));
    assert!(eval_test("3 is ge 3", context!()));
    assert!(eval_test("2 is in [1, 2]", context!()));
}

#[test]
fn test_sameas() {
    let env = Environment::new();
    let rv = env
        .render_str("{{ a is sameas a }}|{{ a is sameas b }}", context!(a => 1, b => 1))
        .unwrap();
    // primitives degrade into equality
    assert_eq!(rv, "true|true");
}

#[test]
fn test_negated_tests() {
    assert!(eval_test("3 is not even", context!()));
    assert!(!eval_test("3 is not odd", context!()));
}

#[test]
fn test_test_without_parens() {
    let env = Environment::new();
    assert_eq!(
        env.render_str(
            "{% if x is divisibleby 3 %}yes{% else %}no{% endif %}",
            context!(x => 9)
        )
        .unwrap(),
        "yes"
    );
}

#[test]
fn test_unknown_test() {
    let env = Environment::new();
    let err = env
        .render_str("{{ 1 is frobnicated }}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), torii::ErrorKind::UnknownTest);
}

#[test]
fn test_custom_test() {
    let mut env = Environment::new();
    env.add_test("version_prefix", |_state: &torii::State, value: String, prefix: String| {
        value.starts_with(&prefix)
    });
    assert!(env
        .compile_expression("v is version_prefix('1.')")
        .unwrap()
        .eval(context!(v => "1.70"))
        .unwrap()
        .is_true());
}
