use similar_asserts::assert_eq;

use torii::value::{Value, ValueKind};
use torii::{context, Environment};

fn render_native(source: &str, ctx: Value) -> Value {
    let mut env = Environment::new();
    env.add_template("t", source).unwrap();
    env.get_template("t").unwrap().render_native(ctx).unwrap()
}

#[test]
fn test_native_number() {
    let rv = render_native("{{ x + y }}", context!(x => 4, y => 2));
    assert_eq!(rv, Value::from(6));
    assert_eq!(rv.kind(), ValueKind::Number);
}

#[test]
fn test_native_list_from_loop() {
    let rv = render_native(
        "[{% for i in r %}{{ i + 1 }},{% endfor %}]",
        context!(r => vec![0, 1, 2, 3, 4]),
    );
    assert_eq!(rv, Value::from(vec![1, 2, 3, 4, 5]));
    assert_eq!(rv.kind(), ValueKind::Seq);
}

#[test]
fn test_native_passthrough_values() {
    assert_eq!(render_native("{{ x }}", context!(x => true)), Value::from(true));
    assert_eq!(
        render_native("{{ x }}", context!(x => vec![1, 2])),
        Value::from(vec![1, 2])
    );
    assert!(render_native("{{ x }}", context!(x => ())).is_none());
}

#[test]
fn test_native_plain_text_stays_text() {
    assert_eq!(
        render_native("hello world", context!()),
        Value::from("hello world")
    );
}

#[test]
fn test_native_literal_text() {
    // text shaped like a literal converts into the literal value
    assert_eq!(render_native("42", context!()), Value::from(42));
    assert_eq!(render_native("[1, 2]", context!()), Value::from(vec![1, 2]));
}

#[test]
fn test_native_mixed_concat() {
    let rv = render_native("{{ a }}-{{ b }}", context!(a => 1, b => 2));
    assert_eq!(rv, Value::from("1-2"));
}

#[test]
fn test_regular_render_still_strings() {
    let env = Environment::new();
    assert_eq!(
        env.render_str("{{ x + y }}", context!(x => 4, y => 2)).unwrap(),
        "6"
    );
}
