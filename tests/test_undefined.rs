use similar_asserts::assert_eq;

use torii::{context, Environment, ErrorKind, UndefinedBehavior};

fn env_with(behavior: UndefinedBehavior) -> Environment {
    let mut env = Environment::new();
    env.set_undefined_behavior(behavior);
    env
}

#[test]
fn test_lenient_undefined() {
    let env = env_with(UndefinedBehavior::Lenient);
    // prints empty, iterates empty, is false
    assert_eq!(env.render_str("[{{ missing }}]", context!()).unwrap(), "[]");
    assert_eq!(
        env.render_str("{% for x in missing %}x{% endfor %}!", context!())
            .unwrap(),
        "!"
    );
    assert_eq!(
        env.render_str("{% if missing %}a{% else %}b{% endif %}", context!())
            .unwrap(),
        "b"
    );
    // attribute access on an undefined value fails
    let err = env.render_str("{{ missing.attr }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UndefinedError);
}

#[test]
fn test_lenient_arithmetic_propagation() {
    let env = env_with(UndefinedBehavior::Lenient);
    // add and sub return the other operand unchanged
    assert_eq!(env.render_str("{{ missing + 2 }}", context!()).unwrap(), "2");
    assert_eq!(env.render_str("{{ 2 - missing }}", context!()).unwrap(), "2");
    // multiplication and division swallow the result
    assert_eq!(env.render_str("[{{ missing * 2 }}]", context!()).unwrap(), "[]");
    assert_eq!(env.render_str("[{{ missing / 2 }}]", context!()).unwrap(), "[]");
}

#[test]
fn test_lenient_comparisons_are_false() {
    let env = env_with(UndefinedBehavior::Lenient);
    assert_eq!(
        env.render_str("{{ missing == 1 }}|{{ missing < 1 }}", context!())
            .unwrap(),
        "false|false"
    );
}

#[test]
fn test_chainable_undefined() {
    let env = env_with(UndefinedBehavior::Chainable);
    assert_eq!(
        env.render_str("[{{ a.b.c.d }}]", context!()).unwrap(),
        "[]"
    );
    assert_eq!(
        env.render_str("[{{ a['b'].c }}]", context!()).unwrap(),
        "[]"
    );
    // a chainable undefined never aborts a render by itself
    assert_eq!(
        env.render_str("{% if a.b %}x{% endif %}ok", context!()).unwrap(),
        "ok"
    );
}

#[test]
fn test_debug_undefined() {
    let env = env_with(UndefinedBehavior::Debug);
    assert_eq!(
        env.render_str("{{ missing }}", context!()).unwrap(),
        "{{ missing }}"
    );
}

#[test]
fn test_strict_undefined() {
    let env = env_with(UndefinedBehavior::Strict);
    for template in [
        "{{ missing }}",
        "{% if missing %}{% endif %}",
        "{% for x in missing %}{% endfor %}",
        "{{ missing + 1 }}",
        "{{ missing == 1 }}",
        "{{ missing ~ 'x' }}",
    ] {
        let err = env.render_str(template, context!()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UndefinedError, "{template}");
    }
    // presence tests still work
    assert_eq!(
        env.render_str("{{ missing is defined }}", context!()).unwrap(),
        "false"
    );
}

#[test]
fn test_undefined_error_names_variable() {
    let env = env_with(UndefinedBehavior::Strict);
    let err = env.render_str("{{ missing }}", context!()).unwrap_err();
    assert!(err.to_string().contains("missing"), "{err}");
}

#[test]
fn test_default_filter_on_undefined() {
    let env = env_with(UndefinedBehavior::Lenient);
    assert_eq!(
        env.render_str("{{ missing|default('x') }}", context!()).unwrap(),
        "x"
    );
}
