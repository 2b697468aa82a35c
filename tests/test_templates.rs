use similar_asserts::assert_eq;

use torii::{context, render, Environment, ErrorKind, Value};

fn render_one(source: &str, ctx: Value) -> String {
    let env = Environment::new();
    env.render_str(source, ctx).unwrap()
}

#[test]
fn test_basic_rendering() {
    assert_eq!(
        render_one("Hello {{ name }}!", context!(name => "John Doe")),
        "Hello John Doe!"
    );
}

#[test]
fn test_expression_output() {
    assert_eq!(render_one("{{ 2 + 3 * 4 }}", context!()), "14");
    assert_eq!(render_one("{{ 'a' ~ 1 ~ 'b' }}", context!()), "a1b");
    assert_eq!(render_one("{{ 7 // 2 }}|{{ 7 % 2 }}|{{ 7 / 2 }}", context!()), "3|1|3.5");
    assert_eq!(render_one("{{ 2 ** 8 }}", context!()), "256");
    assert_eq!(render_one("{{ -(1 + 2) }}", context!()), "-3");
    assert_eq!(render_one("{{ [1, 2, 3] }}", context!()), "[1, 2, 3]");
    assert_eq!(render_one("{{ not false }}", context!()), "true");
}

#[test]
fn test_chained_comparisons() {
    assert_eq!(render_one("{{ 1 < 2 < 3 }}", context!()), "true");
    assert_eq!(render_one("{{ 1 < 2 < 1 }}", context!()), "false");
    assert_eq!(
        render_one("{{ a < b < c }}", context!(a => 1, b => 2, c => 3)),
        "true"
    );
    assert_eq!(
        render_one("{{ a < b < c }}", context!(a => 1, b => 2, c => 1)),
        "false"
    );
    assert_eq!(
        render_one("{{ 2 in [1, 2] in [[1, 2]] }}", context!()),
        "true"
    );
    assert_eq!(render_one("{{ 1 not in [2, 3] }}", context!()), "true");
}

#[test]
fn test_chained_comparison_folds_at_compile_time() {
    use torii::machinery::{optimize, parse, WhitespaceConfig};
    let mut ast = parse(
        "{{ 1 < 2 < 3 }}",
        "test",
        Default::default(),
        WhitespaceConfig::default(),
    )
    .unwrap();
    optimize(&mut ast);
    let dump = format!("{ast:?}");
    assert!(dump.contains("Const"), "{dump}");
    assert!(!dump.contains("Compare"), "{dump}");
}

#[test]
fn test_if_elif_else() {
    let t = "{% if x > 2 %}big{% elif x > 0 %}small{% else %}neg{% endif %}";
    assert_eq!(render_one(t, context!(x => 3)), "big");
    assert_eq!(render_one(t, context!(x => 1)), "small");
    assert_eq!(render_one(t, context!(x => -1)), "neg");
}

#[test]
fn test_for_loop_variables() {
    assert_eq!(
        render_one(
            "{% for i in seq %}{{ loop.index }}/{{ loop.length }};{% endfor %}",
            context!(seq => vec!["a", "b", "c"])
        ),
        "1/3;2/3;3/3;"
    );
    assert_eq!(
        render_one(
            "{% for c in 'ab' %}{{ loop.first }}-{{ loop.last }};{% endfor %}",
            context!()
        ),
        "true-false;false-true;"
    );
    assert_eq!(
        render_one(
            "{% for i in [1, 2, 3] %}{{ loop.revindex }}{% endfor %}",
            context!()
        ),
        "321"
    );
}

#[test]
fn test_loop_adjacent_items() {
    assert_eq!(
        render_one(
            "{% for c in 'abc' %}[{{ loop.previtem|default('-') }}{{ loop.nextitem|default('-') }}]{% endfor %}",
            context!()
        ),
        "[-b][ac][b-]"
    );
}

#[test]
fn test_loop_cycle() {
    assert_eq!(
        render_one(
            "{% for i in [1, 2, 3] %}{{ loop.cycle('odd', 'even') }} {% endfor %}",
            context!()
        ),
        "odd even odd "
    );
}

#[test]
fn test_for_else() {
    let t = "{% for x in seq %}{{ x }}{% else %}empty{% endfor %}";
    assert_eq!(render_one(t, context!(seq => vec![1, 2])), "12");
    assert_eq!(render_one(t, context!(seq => Vec::<i32>::new())), "empty");
}

#[test]
fn test_for_filter_expression() {
    assert_eq!(
        render_one(
            "{% for x in [1, 2, 3, 4] if x is even %}{{ x }}:{{ loop.index }} {% endfor %}",
            context!()
        ),
        "2:1 4:2 "
    );
}

#[test]
fn test_for_tuple_unpacking() {
    assert_eq!(
        render_one(
            "{% for a, b in [[1, 2], [3, 4]] %}{{ a }}-{{ b }};{% endfor %}",
            context!()
        ),
        "1-2;3-4;"
    );
}

#[test]
fn test_loop_controls() {
    assert_eq!(
        render_one(
            "{% for i in [1, 2, 3, 4] %}{% if i == 3 %}{% break %}{% endif %}{{ i }}{% endfor %}",
            context!()
        ),
        "12"
    );
    assert_eq!(
        render_one(
            "{% for i in [1, 2, 3] %}{% if i == 2 %}{% continue %}{% endif %}{{ i }}{% endfor %}",
            context!()
        ),
        "13"
    );
}

#[test]
fn test_recursive_loop() {
    let tree = context!(items => vec![
        context!(name => "a", children => vec![
            context!(name => "b", children => Vec::<Value>::new()),
        ]),
        context!(name => "c", children => Vec::<Value>::new()),
    ]);
    assert_eq!(
        render_one(
            "{% for item in items recursive %}{{ item.name }}{% if item.children %}({{ loop(item.children) }}){% endif %}{% endfor %}",
            tree
        ),
        "a(b)c"
    );
}

#[test]
fn test_loop_depth() {
    assert_eq!(
        render_one(
            "{% for item in items recursive %}{{ loop.depth }}{% if item.children %}{{ loop(item.children) }}{% endif %}{% endfor %}",
            context!(items => vec![context!(children => vec![context!(children => Vec::<Value>::new())])])
        ),
        "12"
    );
}

#[test]
fn test_set_and_scoping() {
    assert_eq!(
        render_one("{% set x = 23 %}{{ x }}", context!()),
        "23"
    );
    // assignments inside a loop body do not outlive the loop
    assert_eq!(
        render_one(
            "{% set x = 'outer' %}{% for i in [1] %}{% set x = 'inner' %}{{ x }}{% endfor %}|{{ x }}",
            context!()
        ),
        "inner|outer"
    );
}

#[test]
fn test_set_block() {
    assert_eq!(
        render_one("{% set x %}hello{% endset %}{{ x }}", context!()),
        "hello"
    );
    assert_eq!(
        render_one("{% set x | upper %}abc{% endset %}{{ x }}", context!()),
        "ABC"
    );
}

#[test]
fn test_namespace() {
    assert_eq!(
        render_one(
            "{% set ns = namespace(found=false) %}{% for i in [1, 2] %}{% if i == 2 %}{% set ns.found = true %}{% endif %}{% endfor %}{{ ns.found }}",
            context!()
        ),
        "true"
    );
}

#[test]
fn test_with_block() {
    assert_eq!(
        render_one(
            "{% with a = 1, b = 2 %}{{ a }}{{ b }}{% endwith %}{{ a is defined }}",
            context!()
        ),
        "12false"
    );
}

#[test]
fn test_do() {
    assert_eq!(render_one("{% do [1, 2] %}done", context!()), "done");
}

#[test]
fn test_raw_block() {
    assert_eq!(
        render_one("{% raw %}{{ not evaluated }}{% endraw %}", context!()),
        "{{ not evaluated }}"
    );
}

#[test]
fn test_filter_block() {
    assert_eq!(
        render_one("{% filter upper %}hello {{ name }}{% endfilter %}", context!(name => "peter")),
        "HELLO PETER"
    );
}

#[test]
fn test_autoescape_block() {
    assert_eq!(
        render_one(
            "{{ v }}|{% autoescape true %}{{ v }}{% endautoescape %}",
            context!(v => "<x>")
        ),
        "<x>|&lt;x&gt;"
    );
    let mut env = Environment::new();
    env.add_template("t.html", "{% autoescape false %}{{ v }}{% endautoescape %}")
        .unwrap();
    assert_eq!(
        env.get_template("t.html")
            .unwrap()
            .render(context!(v => "<x>"))
            .unwrap(),
        "<x>"
    );
}

#[test]
fn test_autoescape_boundary() {
    let mut env = Environment::new();
    env.add_template("t.html", "{{ s }}|{{ t }}").unwrap();
    let rv = env
        .get_template("t.html")
        .unwrap()
        .render(context!(
            s => "<b>hi</b>",
            t => Value::from_safe_string("<b>hi</b>".into())
        ))
        .unwrap();
    assert_eq!(rv, "&lt;b&gt;hi&lt;/b&gt;|<b>hi</b>");
}

#[test]
fn test_inheritance_and_super() {
    let mut env = Environment::new();
    env.add_template("base.html", "[{% block x %}B{% endblock %}]")
        .unwrap();
    env.add_template(
        "child.html",
        "{% extends \"base.html\" %}{% block x %}{{ super() }}C{% endblock %}",
    )
    .unwrap();
    let rv = env.get_template("child.html").unwrap().render(()).unwrap();
    assert_eq!(rv, "[BC]");
}

#[test]
fn test_grandchild_inheritance() {
    let mut env = Environment::new();
    env.add_template("parent", "[{% block b %}P{% endblock %}]")
        .unwrap();
    env.add_template(
        "child",
        "{% extends 'parent' %}{% block b %}{{ super() }}C{% endblock %}",
    )
    .unwrap();
    env.add_template(
        "grandchild",
        "{% extends 'child' %}{% block b %}{{ super() }}G{% endblock %}",
    )
    .unwrap();
    let rv = env.get_template("grandchild").unwrap().render(()).unwrap();
    assert_eq!(rv, "[PCG]");
}

#[test]
fn test_dynamic_extends() {
    let mut env = Environment::new();
    env.add_template("a", "A{% block x %}{% endblock %}").unwrap();
    env.add_template("t", "{% extends layout %}{% block x %}!{% endblock %}")
        .unwrap();
    let rv = env
        .get_template("t")
        .unwrap()
        .render(context!(layout => "a"))
        .unwrap();
    assert_eq!(rv, "A!");
}

#[test]
fn test_content_outside_blocks_is_dropped() {
    let mut env = Environment::new();
    env.add_template("base", "{% block x %}{% endblock %}").unwrap();
    env.add_template(
        "child",
        "dropped{% extends 'base' %}also dropped{% block x %}kept{% endblock %}",
    )
    .unwrap();
    assert_eq!(env.get_template("child").unwrap().render(()).unwrap(), "kept");
}

#[test]
fn test_self_extending_template_fails() {
    let mut env = Environment::new();
    env.add_template("selfish", "{% extends 'selfish' %}").unwrap();
    let err = env.get_template("selfish").unwrap().render(()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    assert!(err.to_string().contains("cycle in template inheritance"));
}

#[test]
fn test_required_block() {
    let mut env = Environment::new();
    env.add_template("base", "{% block x required %}{% endblock %}")
        .unwrap();
    env.add_template(
        "good",
        "{% extends 'base' %}{% block x %}ok{% endblock %}",
    )
    .unwrap();
    assert_eq!(env.get_template("good").unwrap().render(()).unwrap(), "ok");
    let err = env.get_template("base").unwrap().render(()).unwrap_err();
    assert!(err.to_string().contains("was not overridden"));
}

#[test]
fn test_scoped_block_sees_loop_variable() {
    assert_eq!(
        render_one(
            "{% for i in [1, 2] %}{% block x scoped %}{{ i }}{% endblock %}{% endfor %}",
            context!()
        ),
        "12"
    );
}

#[test]
fn test_self_block_reference() {
    assert_eq!(
        render_one(
            "{% block title %}T{% endblock %}|{{ self.title() }}",
            context!()
        ),
        "T|T"
    );
}

#[test]
fn test_include() {
    let mut env = Environment::new();
    env.add_template("header", "Hi {{ name }}").unwrap();
    env.add_template("main", "{% include 'header' %}!").unwrap();
    assert_eq!(
        env.get_template("main")
            .unwrap()
            .render(context!(name => "Yo"))
            .unwrap(),
        "Hi Yo!"
    );
}

#[test]
fn test_include_context_modifiers() {
    let mut env = Environment::new();
    env.add_template("probe", "{{ name is defined }}").unwrap();
    env.add_template("with", "{% include 'probe' with context %}")
        .unwrap();
    env.add_template("without", "{% include 'probe' without context %}")
        .unwrap();
    let ctx = context!(name => "x");
    assert_eq!(
        env.get_template("with").unwrap().render(&ctx).unwrap(),
        "true"
    );
    assert_eq!(
        env.get_template("without").unwrap().render(&ctx).unwrap(),
        "false"
    );
}

#[test]
fn test_include_choices_and_ignore_missing() {
    let mut env = Environment::new();
    env.add_template("fallback", "F").unwrap();
    env.add_template("a", "{% include ['missing', 'fallback'] %}")
        .unwrap();
    env.add_template("b", "{% include 'missing' ignore missing %}!")
        .unwrap();
    env.add_template("c", "{% include 'missing' %}").unwrap();
    assert_eq!(env.get_template("a").unwrap().render(()).unwrap(), "F");
    assert_eq!(env.get_template("b").unwrap().render(()).unwrap(), "!");
    let err = env.get_template("c").unwrap().render(()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TemplateNotFound);
}

#[test]
fn test_import() {
    let mut env = Environment::new();
    env.add_template(
        "helpers",
        "{% macro double(x) %}{{ x * 2 }}{% endmacro %}",
    )
    .unwrap();
    env.add_template("t1", "{% import 'helpers' as h %}{{ h.double(21) }}")
        .unwrap();
    env.add_template("t2", "{% from 'helpers' import double %}{{ double(4) }}")
        .unwrap();
    env.add_template(
        "t3",
        "{% from 'helpers' import double as twice %}{{ twice(5) }}",
    )
    .unwrap();
    assert_eq!(env.get_template("t1").unwrap().render(()).unwrap(), "42");
    assert_eq!(env.get_template("t2").unwrap().render(()).unwrap(), "8");
    assert_eq!(env.get_template("t3").unwrap().render(()).unwrap(), "10");
}

#[test]
fn test_import_context_behavior() {
    let mut env = Environment::new();
    env.add_template("mod", "{% set probe = name is defined %}{% macro check() %}{{ probe }}{% endmacro %}")
        .unwrap();
    env.add_template("plain", "{% import 'mod' as m %}{{ m.check() }}")
        .unwrap();
    env.add_template("ctx", "{% import 'mod' as m with context %}{{ m.check() }}")
        .unwrap();
    let ctx = context!(name => "x");
    assert_eq!(
        env.get_template("plain").unwrap().render(&ctx).unwrap(),
        "false"
    );
    assert_eq!(
        env.get_template("ctx").unwrap().render(&ctx).unwrap(),
        "true"
    );
}

#[test]
fn test_macro_basics() {
    assert_eq!(
        render_one(
            "{% macro m(a, b=3) %}{{ a }}{{ b }}{% endmacro %}{{ m(1) }}|{{ m(1, 2) }}|{{ m(b=9, a=8) }}",
            context!()
        ),
        "13|12|89"
    );
}

#[test]
fn test_macro_missing_argument() {
    let env = Environment::new();
    let err = env
        .render_str("{% macro m(a) %}{{ a }}{% endmacro %}{{ m() }}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingArgument);
}

#[test]
fn test_macro_varargs_kwargs() {
    assert_eq!(
        render_one(
            "{% macro m() %}{{ varargs }}{{ kwargs['x'] }}{% endmacro %}{{ m(1, 2, x=3) }}",
            context!()
        ),
        "[1, 2]3"
    );
}

#[test]
fn test_macro_attributes() {
    assert_eq!(
        render_one(
            "{% macro m(a, b) %}{% endmacro %}{{ m.name }}{{ m.arguments }}",
            context!()
        ),
        "m[\"a\", \"b\"]"
    );
}

#[test]
fn test_macro_closure() {
    assert_eq!(
        render_one(
            "{% set greeting = 'Hi' %}{% macro m(name) %}{{ greeting }} {{ name }}{% endmacro %}{{ m('Tom') }}",
            context!()
        ),
        "Hi Tom"
    );
}

#[test]
fn test_call_block() {
    assert_eq!(
        render_one(
            "{% macro dialog() %}<{{ caller() }}>{% endmacro %}{% call dialog() %}hi{% endcall %}",
            context!()
        ),
        "<hi>"
    );
    assert_eq!(
        render_one(
            "{% macro each(items) %}{% for item in items %}{{ caller(item) }}{% endfor %}{% endmacro %}{% call(x) each([1, 2]) %}[{{ x }}]{% endcall %}",
            context!()
        ),
        "[1][2]"
    );
}

#[test]
fn test_caller_rejected_without_declaration() {
    let env = Environment::new();
    let err = env
        .render_str(
            "{% macro m() %}x{% endmacro %}{% call m() %}y{% endcall %}",
            context!(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TooManyArguments);
    assert!(err.to_string().contains("caller"));
}

#[test]
fn test_trans_blocks() {
    assert_eq!(
        render_one(
            "{% trans name=user %}Hello {{ name }}!{% endtrans %}",
            context!(user => "Peter")
        ),
        "Hello Peter!"
    );
    let t = "{% trans count=n %}{{ count }} apple{% pluralize %}{{ count }} apples{% endtrans %}";
    assert_eq!(render_one(t, context!(n => 1)), "1 apple");
    assert_eq!(render_one(t, context!(n => 2)), "2 apples");
}

#[test]
fn test_trans_gettext_hooks() {
    let mut env = Environment::new();
    env.set_gettext_callback(|msg| {
        if msg == "Hello %(name)s!" {
            "Servus %(name)s!".to_string()
        } else {
            msg.to_string()
        }
    });
    assert_eq!(
        env.render_str(
            "{% trans name=user %}Hello {{ name }}!{% endtrans %}",
            context!(user => "Peter")
        )
        .unwrap(),
        "Servus Peter!"
    );
}

#[test]
fn test_trans_escapes_interpolations() {
    let mut env = Environment::new();
    env.add_template("t.html", "{% trans name=user %}Hi {{ name }}{% endtrans %}")
        .unwrap();
    assert_eq!(
        env.get_template("t.html")
            .unwrap()
            .render(context!(user => "<u>"))
            .unwrap(),
        "Hi &lt;u&gt;"
    );
}

#[test]
fn test_trans_trimmed_policy() {
    let mut env = Environment::new();
    env.policies_mut().i18n_trimmed = true;
    assert_eq!(
        env.render_str(
            "{% trans %}  Hello\n   World  {% endtrans %}",
            context!()
        )
        .unwrap(),
        "Hello World"
    );
}

#[test]
fn test_conditional_expression() {
    assert_eq!(
        render_one("{{ 'yes' if x else 'no' }}", context!(x => true)),
        "yes"
    );
    assert_eq!(
        render_one("{{ 'yes' if x else 'no' }}", context!(x => false)),
        "no"
    );
    // missing else yields an undefined which renders as empty
    assert_eq!(render_one("[{{ 'yes' if x }}]", context!(x => false)), "[]");
}

#[test]
fn test_slicing_and_indexing() {
    assert_eq!(render_one("{{ [1, 2, 3][1] }}", context!()), "2");
    assert_eq!(render_one("{{ [1, 2, 3][-1] }}", context!()), "3");
    assert_eq!(render_one("{{ 'hello'[1:3] }}", context!()), "el");
    assert_eq!(render_one("{{ [1, 2, 3, 4][::2] }}", context!()), "[1, 3]");
    assert_eq!(render_one("{{ d['k'] }}", context!(d => context!(k => "v"))), "v");
}

#[test]
fn test_string_methods() {
    assert_eq!(render_one("{{ 'abc'.upper() }}", context!()), "ABC");
    assert_eq!(
        render_one("{{ 'a b'.split()|join('+') }}", context!()),
        "a+b"
    );
    assert_eq!(
        render_one("{{ d.get('x', 42) }}", context!(d => context!(a => 1))),
        "42"
    );
}

#[test]
fn test_whitespace_control() {
    assert_eq!(
        render_one("  {{- 'x' -}}  .", context!()),
        "x."
    );
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    assert_eq!(
        env.render_str(
            "<ul>\n  {% for i in [1, 2] %}\n  <li>{{ i }}\n  {% endfor %}\n</ul>",
            context!()
        )
        .unwrap(),
        "<ul>\n  <li>1\n  <li>2\n</ul>"
    );
}

#[test]
fn test_keep_trailing_newline() {
    let env = Environment::new();
    assert_eq!(env.render_str("x\n", context!()).unwrap(), "x");
    let mut env = Environment::new();
    env.set_keep_trailing_newline(true);
    assert_eq!(env.render_str("x\n", context!()).unwrap(), "x\n");
}

#[test]
fn test_line_statements() {
    let mut env = Environment::new();
    env.set_syntax(torii::Syntax {
        line_statement_prefix: Some("#".into()),
        line_comment_prefix: Some("##".into()),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        env.render_str("# for i in [1, 2]\n{{ i }};\n# endfor\n", context!())
            .unwrap(),
        "1;\n2;\n"
    );
    assert_eq!(
        env.render_str("## just a comment\nx", context!()).unwrap(),
        "x"
    );
}

#[test]
fn test_custom_delimiters() {
    let mut env = Environment::new();
    env.set_syntax(torii::Syntax {
        block_start: "<%".into(),
        block_end: "%>".into(),
        variable_start: "${".into(),
        variable_end: "}".into(),
        comment_start: "<#".into(),
        comment_end: "#>".into(),
        ..Default::default()
    })
    .unwrap();
    assert_eq!(
        env.render_str("<% for i in [1, 2] %>${ i }<% endfor %><# note #>", context!())
            .unwrap(),
        "12"
    );
}

#[test]
fn test_render_macro() {
    assert_eq!(render!("Hello {{ name }}!", name => "World"), "Hello World!");
}

#[test]
fn test_expression_api() {
    let env = Environment::new();
    let expr = env.compile_expression("number > 10 and number < 20").unwrap();
    assert!(expr.eval(context!(number => 15)).unwrap().is_true());
    assert!(!expr.eval(context!(number => 21)).unwrap().is_true());
}

#[test]
fn test_deterministic_rendering() {
    let env = Environment::new();
    let t = "{% for k, v in d|items %}{{ k }}={{ v }};{% endfor %}";
    let ctx = context!(d => context!(b => 2, a => 1));
    let first = env.render_str(t, &ctx).unwrap();
    for _ in 0..3 {
        assert_eq!(env.render_str(t, &ctx).unwrap(), first);
    }
    assert_eq!(first, "a=1;b=2;");
}

#[test]
fn test_error_location() {
    let mut env = Environment::new();
    env.add_template("bad", "line one\n{{ 1 / 0 }}").unwrap();
    let err = env.get_template("bad").unwrap().render(()).unwrap_err();
    assert_eq!(err.name(), Some("bad"));
    assert_eq!(err.line(), Some(2));
}
