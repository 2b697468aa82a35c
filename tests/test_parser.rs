use similar_asserts::assert_eq;

use torii::machinery::{parse, parse_expr, WhitespaceConfig};
use torii::{context, Environment, ErrorKind};

fn parse_err(source: &str) -> torii::Error {
    parse(
        source,
        "test.html",
        Default::default(),
        WhitespaceConfig::default(),
    )
    .unwrap_err()
}

fn ast_dump(source: &str) -> String {
    format!(
        "{:?}",
        parse(
            source,
            "test.html",
            Default::default(),
            WhitespaceConfig::default(),
        )
        .unwrap()
    )
}

#[test]
fn test_simple_template_parses() {
    let dump = ast_dump("Hello {{ name }}!");
    assert!(dump.contains("EmitRaw"), "{dump}");
    assert!(dump.contains("Var"), "{dump}");
}

#[test]
fn test_operator_precedence() {
    // multiplication binds tighter than addition
    let dump = format!("{:?}", parse_expr("a + b * c").unwrap());
    let add = dump.find("Add").unwrap();
    let mul = dump.find("Mul").unwrap();
    assert!(add < mul, "{dump}");

    // pow binds tighter than unary minus
    let dump = format!("{:?}", parse_expr("-a ** b").unwrap());
    assert!(dump.find("Neg").unwrap() < dump.find("Pow").unwrap(), "{dump}");
}

#[test]
fn test_comparison_chain_parses() {
    let dump = format!("{:?}", parse_expr("a < b <= c").unwrap());
    assert!(dump.contains("Compare"), "{dump}");
    assert!(dump.contains("Lt"), "{dump}");
    assert!(dump.contains("Lte"), "{dump}");
}

#[test]
fn test_filters_and_tests_parse() {
    let dump = format!("{:?}", parse_expr("x|default(42)|upper is defined").unwrap());
    assert!(dump.contains("Filter"), "{dump}");
    assert!(dump.contains("Test"), "{dump}");
}

#[test]
fn test_error_has_location() {
    let err = parse_err("line1\nline2\n{% if %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
    assert_eq!(err.name(), Some("test.html"));
    assert_eq!(err.line(), Some(3));
}

#[test]
fn test_unclosed_tag() {
    let err = parse_err("{% if x %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn test_unknown_statement() {
    let err = parse_err("{% frobnicate %}");
    assert!(err.to_string().contains("unknown statement"));
}

#[test]
fn test_mismatched_endblock_name() {
    let err = parse_err("{% block a %}{% endblock b %}");
    assert!(err.to_string().contains("mismatching name"));
}

#[test]
fn test_duplicate_block() {
    let err = parse_err("{% block a %}{% endblock %}{% block a %}{% endblock %}");
    assert!(err.to_string().contains("defined twice"));
}

#[test]
fn test_double_extends_rejected() {
    let err = parse_err("{% extends 'a' %}{% extends 'b' %}");
    assert!(err.to_string().contains("second time"));
}

#[test]
fn test_block_in_macro_rejected() {
    let err = parse_err("{% macro m() %}{% block x %}{% endblock %}{% endmacro %}");
    assert!(err.to_string().contains("not allowed"));
}

#[test]
fn test_loop_controls_outside_loop() {
    let err = parse_err("{% break %}");
    assert!(err.to_string().contains("inside of a loop"));
    let err = parse_err("{% continue %}");
    assert!(err.to_string().contains("inside of a loop"));
    // statements in a macro body do not see the outer loop
    let err = parse_err("{% for x in y %}{% macro m() %}{% break %}{% endmacro %}{% endfor %}");
    assert!(err.to_string().contains("inside of a loop"));
}

#[test]
fn test_assign_to_reserved_name() {
    let err = parse_err("{% set true = 1 %}");
    assert!(err.to_string().contains("reserved"));
    let err = parse_err("{% for loop in x %}{% endfor %}");
    assert!(err.to_string().contains("reserved"));
}

#[test]
fn test_default_after_non_default_macro_arg() {
    let err = parse_err("{% macro m(a=1, b) %}{% endmacro %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn test_non_keyword_after_keyword_arg() {
    let err = parse_err("{{ foo(a=1, 2) }}");
    assert!(err.to_string().contains("non-keyword"));
}

#[test]
fn test_keyword_args_and_splats_parse() {
    let dump = ast_dump("{{ foo(1, a=2, *rest, **more) }}");
    assert!(dump.contains("Kwarg"), "{dump}");
    assert!(dump.contains("PosSplat"), "{dump}");
    assert!(dump.contains("KwargSplat"), "{dump}");
}

#[test]
fn test_trans_body_restrictions() {
    let err = parse_err("{% trans %}{% if x %}{% endif %}{% endtrans %}");
    assert!(err.to_string().contains("trans"), "{err}");
    let err = parse_err("{% trans %}{{ x + 1 }}{% endtrans %}");
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn test_conditional_expr_is_right_associative() {
    // a if b else (c if d else e)
    let env = Environment::new();
    let rv = env
        .render_str(
            "{{ 'a' if b else 'c' if d else 'e' }}",
            context!(b => false, d => false),
        )
        .unwrap();
    assert_eq!(rv, "e");
}

#[test]
fn test_tuple_literals() {
    let dump = format!("{:?}", parse_expr("(1, 2)").unwrap());
    // tuples are represented as lists
    assert!(dump.contains("Const"), "{dump}");
    let dump = format!("{:?}", parse_expr("()").unwrap());
    assert!(dump.contains("List"), "{dump}");
}
