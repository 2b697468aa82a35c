use std::sync::Arc;

use similar_asserts::assert_eq;

use torii::sandbox::{DefaultSandboxPolicy, SandboxPolicy};
use torii::value::Value;
use torii::{context, Environment, Error, ErrorKind};

#[test]
fn test_unsafe_attribute_access() {
    let env = Environment::sandboxed();
    let err = env
        .render_str("{{ func.__code__ }}", context!(func => "something"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
    assert!(err.to_string().contains("__code__"), "{err}");
}

#[test]
fn test_denied_attribute_list() {
    let mut env = Environment::new();
    env.set_sandbox(Arc::new(
        DefaultSandboxPolicy::new().deny_attribute("secret"),
    ));
    let ctx = context!(o => context!(secret => 1, public => 2));
    let err = env.render_str("{{ o.secret }}", &ctx).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
    assert_eq!(env.render_str("{{ o.public }}", &ctx).unwrap(), "2");
}

#[test]
fn test_item_access_goes_through_policy() {
    let env = Environment::sandboxed();
    let err = env
        .render_str("{{ o['__class__'] }}", context!(o => context!()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}

#[test]
fn test_attr_filter_goes_through_policy() {
    let env = Environment::sandboxed();
    let err = env
        .render_str("{{ o|attr('_private') }}", context!(o => context!()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}

#[test]
fn test_normal_rendering_unaffected() {
    let env = Environment::sandboxed();
    assert_eq!(
        env.render_str(
            "{% for x in items %}{{ x.name }};{% endfor %}",
            context!(items => vec![context!(name => "a"), context!(name => "b")])
        )
        .unwrap(),
        "a;b;"
    );
}

#[test]
fn test_operator_interception_dispatches() {
    let mut env = Environment::new();
    env.set_sandbox(Arc::new(
        DefaultSandboxPolicy::new().intercept_operators(),
    ));
    // the default policy dispatches to the regular operators
    assert_eq!(
        env.render_str("{{ a ** b }}", context!(a => 2, b => 10)).unwrap(),
        "1024"
    );
}

#[test]
fn test_operator_interception_can_reject() {
    struct NoPow;

    impl SandboxPolicy for NoPow {
        fn is_safe_attribute(&self, _value: &Value, attr: &str) -> bool {
            !attr.starts_with('_')
        }

        fn intercepts_binop(&self, op: &str) -> bool {
            op == "**"
        }

        fn call_binop(&self, op: &str, _lhs: &Value, _rhs: &Value) -> Result<Value, Error> {
            Err(Error::new(
                ErrorKind::SecurityError,
                format!("the power operator ({op}) is not allowed"),
            ))
        }
    }

    let mut env = Environment::new();
    env.set_sandbox(Arc::new(NoPow));
    let err = env
        .render_str("{{ a ** b }}", context!(a => 2, b => 10))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
    // other operators keep working
    assert_eq!(
        env.render_str("{{ a + b }}", context!(a => 2, b => 10)).unwrap(),
        "12"
    );
}

#[test]
fn test_unsafe_callable_markers() {
    let env = Environment::sandboxed();
    let err = env
        .render_str(
            "{{ f() }}",
            context!(f => context!(alters_data => true)),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SecurityError);
}

#[test]
fn test_sandbox_removal() {
    let mut env = Environment::sandboxed();
    env.remove_sandbox();
    // without the sandbox the lookup simply misses and renders empty
    assert_eq!(
        env.render_str("[{{ o['__class__'] }}]", context!(o => context!()))
            .unwrap(),
        "[]"
    );
}
