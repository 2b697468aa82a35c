use similar_asserts::assert_eq;

use torii::{context, Environment, ErrorKind, Value};

fn render_one(source: &str, ctx: Value) -> String {
    let env = Environment::new();
    env.render_str(source, ctx).unwrap()
}

#[test]
fn test_string_filters() {
    assert_eq!(render_one("{{ 'hello'|upper }}", context!()), "HELLO");
    assert_eq!(render_one("{{ 'HELLO'|lower }}", context!()), "hello");
    assert_eq!(render_one("{{ 'hello world'|title }}", context!()), "Hello World");
    assert_eq!(render_one("{{ 'hELLO'|capitalize }}", context!()), "Hello");
    assert_eq!(render_one("{{ '  x  '|trim }}", context!()), "x");
    assert_eq!(render_one("{{ '--x--'|trim('-') }}", context!()), "x");
    assert_eq!(
        render_one("{{ 'Hello World'|replace('World', 'You') }}", context!()),
        "Hello You"
    );
    assert_eq!(
        render_one("{{ '<p>hi   there</p>'|striptags }}", context!()),
        "hi there"
    );
    assert_eq!(render_one("{{ 'a b  c'|wordcount }}", context!()), "3");
    assert_eq!(render_one("{{ 'ab'|center(6) }}.", context!()), "  ab  .");
    assert_eq!(
        render_one("{{ 'a\nb'|indent(2) }}", context!()),
        "a\n  b"
    );
}

#[test]
fn test_truncate() {
    assert_eq!(
        render_one(
            "{{ 'foo bar baz qux'|truncate(9, true, '...', 0) }}",
            context!()
        ),
        "foo ba..."
    );
    assert_eq!(
        render_one("{{ 'foo bar baz qux'|truncate(9, leeway=0) }}", context!()),
        "foo..."
    );
    // within leeway nothing happens
    assert_eq!(
        render_one("{{ 'foo bar'|truncate(5) }}", context!()),
        "foo bar"
    );
}

#[test]
fn test_escape_filters() {
    assert_eq!(
        render_one("{{ '<x>'|escape }}", context!()),
        "<x>".replace('<', "&lt;").replace('>', "&gt;")
    );
    // escaping twice does not double escape
    assert_eq!(render_one("{{ '<'|escape|escape }}", context!()), "&lt;");
    assert_eq!(render_one("{{ '<'|e|upper }}", context!()), "&LT;");
}

#[test]
fn test_safe_filter() {
    let mut env = Environment::new();
    env.add_template("t.html", "{{ v }}|{{ v|safe }}").unwrap();
    assert_eq!(
        env.get_template("t.html")
            .unwrap()
            .render(context!(v => "<b>"))
            .unwrap(),
        "&lt;b&gt;|<b>"
    );
}

#[test]
fn test_collection_filters() {
    assert_eq!(render_one("{{ [1, 2, 3]|length }}", context!()), "3");
    assert_eq!(render_one("{{ 'abc'|count }}", context!()), "3");
    assert_eq!(render_one("{{ [1, 2, 3]|first }}", context!()), "1");
    assert_eq!(render_one("{{ [1, 2, 3]|last }}", context!()), "3");
    assert_eq!(render_one("{{ [4, 2, 9]|min }}", context!()), "2");
    assert_eq!(render_one("{{ [4, 2, 9]|max }}", context!()), "9");
    assert_eq!(render_one("{{ [1, 2, 3]|sum }}", context!()), "6");
    assert_eq!(render_one("{{ [1, 2, 3]|reverse }}", context!()), "[3, 2, 1]");
    assert_eq!(render_one("{{ 'abc'|reverse }}", context!()), "cba");
    assert_eq!(render_one("{{ [3, 1, 2]|sort }}", context!()), "[1, 2, 3]");
    assert_eq!(
        render_one("{{ ['B', 'a', 'c']|sort }}", context!()),
        "[\"a\", \"B\", \"c\"]"
    );
    assert_eq!(
        render_one("{{ [3, 1, 2]|sort(reverse=true) }}", context!()),
        "[3, 2, 1]"
    );
    assert_eq!(
        render_one("{{ [1, 2, 1, 3, 2]|unique }}", context!()),
        "[1, 2, 3]"
    );
    assert_eq!(
        render_one("{{ [1, 2, 3]|join('-') }}", context!()),
        "1-2-3"
    );
    assert_eq!(render_one("{{ 'ab'|list }}", context!()), "[\"a\", \"b\"]");
}

#[test]
fn test_sum_with_attribute() {
    assert_eq!(
        render_one(
            "{{ items|sum(attribute='price') }}",
            context!(items => vec![context!(price => 2), context!(price => 3)])
        ),
        "5"
    );
}

#[test]
fn test_sort_by_attribute() {
    assert_eq!(
        render_one(
            "{{ users|sort(attribute='name')|map(attribute='name')|join(',') }}",
            context!(users => vec![
                context!(name => "bob"),
                context!(name => "Alice"),
            ])
        ),
        "Alice,bob"
    );
}

#[test]
fn test_batch_and_slice() {
    assert_eq!(
        render_one("{{ [1, 2, 3, 4, 5]|batch(2) }}", context!()),
        "[[1, 2], [3, 4], [5]]"
    );
    assert_eq!(
        render_one("{{ [1, 2, 3, 4, 5]|batch(2, 0) }}", context!()),
        "[[1, 2], [3, 4], [5, 0]]"
    );
    assert_eq!(
        render_one("{{ [1, 2, 3, 4, 5]|slice(2) }}", context!()),
        "[[1, 2, 3], [4, 5]]"
    );
}

#[test]
fn test_groupby() {
    assert_eq!(
        render_one(
            "{% for city, items in users|groupby('city') %}{{ city }}:{{ items|length }};{% endfor %}",
            context!(users => vec![
                context!(name => "a", city => "X"),
                context!(name => "b", city => "Y"),
                context!(name => "c", city => "X"),
            ])
        ),
        "X:2;Y:1;"
    );
}

#[test]
fn test_map_select_reject() {
    assert_eq!(
        render_one("{{ ['a', 'b']|map('upper')|join(',') }}", context!()),
        "A,B"
    );
    assert_eq!(
        render_one("{{ [1, 2, 3, 4]|select('even')|join(',') }}", context!()),
        "2,4"
    );
    assert_eq!(
        render_one("{{ [1, 2, 3, 4]|reject('even')|join(',') }}", context!()),
        "1,3"
    );
    assert_eq!(
        render_one(
            "{{ users|selectattr('active')|map(attribute='name')|join(',') }}",
            context!(users => vec![
                context!(name => "a", active => true),
                context!(name => "b", active => false),
            ])
        ),
        "a"
    );
    assert_eq!(
        render_one(
            "{{ users|rejectattr('id', 'even')|map(attribute='id')|join(',') }}",
            context!(users => vec![context!(id => 1), context!(id => 2)])
        ),
        "1"
    );
}

#[test]
fn test_dictsort_and_items() {
    assert_eq!(
        render_one("{{ d|dictsort }}", context!(d => context!(b => 2, a => 1))),
        "[[\"a\", 1], [\"b\", 2]]"
    );
    assert_eq!(
        render_one(
            "{{ d|dictsort(by='value', reverse=true) }}",
            context!(d => context!(a => 1, b => 2))
        ),
        "[[\"b\", 2], [\"a\", 1]]"
    );
    assert_eq!(
        render_one(
            "{% for k, v in d|items %}{{ k }}={{ v }};{% endfor %}",
            context!(d => context!(x => 1))
        ),
        "x=1;"
    );
}

#[test]
fn test_numeric_filters() {
    assert_eq!(render_one("{{ -3|abs }}", context!()), "3");
    assert_eq!(render_one("{{ 42.55|round }}", context!()), "43.0");
    assert_eq!(render_one("{{ 42.25|round(1) }}", context!()), "42.3");
    assert_eq!(
        render_one("{{ 42.55|round(0, 'floor') }}", context!()),
        "42.0"
    );
    assert_eq!(render_one("{{ '42'|int }}", context!()), "42");
    assert_eq!(render_one("{{ '0x10'|int }}", context!()), "16");
    assert_eq!(render_one("{{ 'nope'|int(1) }}", context!()), "1");
    assert_eq!(render_one("{{ '4.5'|float }}", context!()), "4.5");
    assert_eq!(render_one("{{ 1000|filesizeformat }}", context!()), "1.0 kB");
}

#[test]
fn test_format_filter() {
    assert_eq!(
        render_one("{{ '%s=%d'|format('x', 42) }}", context!()),
        "x=42"
    );
    assert_eq!(render_one("{{ '100%%'|format }}", context!()), "100%");
    let env = Environment::new();
    let err = env
        .render_str("{{ '%s %s'|format('x') }}", context!())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::MissingArgument);
}

#[test]
fn test_default_filter() {
    assert_eq!(
        render_one("{{ missing|default('fallback') }}", context!()),
        "fallback"
    );
    assert_eq!(render_one("{{ 0|d(42) }}", context!()), "0");
    assert_eq!(render_one("{{ 0|d(42, true) }}", context!()), "42");
    assert_eq!(render_one("{{ given|default('x') }}", context!(given => "y")), "y");
}

#[test]
fn test_attr_filter() {
    assert_eq!(
        render_one("{{ d|attr('key') }}", context!(d => context!(key => "v"))),
        "v"
    );
}

#[test]
fn test_string_and_pprint() {
    assert_eq!(render_one("{{ 42|string }}", context!()), "42");
    assert_eq!(render_one("{{ [1, 2]|pprint }}", context!()), "[1, 2]");
}

#[test]
fn test_xmlattr() {
    assert_eq!(
        render_one(
            "<div{{ {'class': 'box', 'id': none}|xmlattr }}>",
            context!()
        ),
        "<div class=\"box\">"
    );
}

#[test]
fn test_urlize() {
    assert_eq!(
        render_one("{{ 'see https://example.com/a.'|urlize }}", context!()),
        "see <a href=\"https://example.com/a\" rel=\"noopener\">https://example.com/a</a>."
    );
    assert_eq!(
        render_one("{{ 'mail me@example.com now'|urlize }}", context!()),
        "mail <a href=\"mailto:me@example.com\">me@example.com</a> now"
    );
    let mut env = Environment::new();
    env.policies_mut().urlize_target = Some("_blank".into());
    assert_eq!(
        env.render_str("{{ 'https://x.org/'|urlize }}", context!())
            .unwrap(),
        "<a href=\"https://x.org/\" rel=\"noopener\" target=\"_blank\">https://x.org/</a>"
    );
}

#[cfg(feature = "urlencode")]
#[test]
fn test_urlencode() {
    assert_eq!(
        render_one("{{ 'a b/c'|urlencode }}", context!()),
        "a%20b/c"
    );
    assert_eq!(
        render_one("{{ d|urlencode }}", context!(d => context!(a => "x y"))),
        "a=x%20y"
    );
}

#[cfg(feature = "json")]
#[test]
fn test_tojson() {
    assert_eq!(
        render_one("{{ d|tojson }}", context!(d => context!(a => vec![1, 2]))),
        "{\"a\":[1,2]}"
    );
    assert_eq!(
        render_one("{{ '<script>'|tojson }}", context!()),
        "\"\\u003cscript\\u003e\""
    );
    // the output is marked safe and does not get escaped again
    let mut env = Environment::new();
    env.add_template("t.html", "{{ v|tojson }}").unwrap();
    assert_eq!(
        env.get_template("t.html")
            .unwrap()
            .render(context!(v => "a"))
            .unwrap(),
        "\"a\""
    );
}

#[test]
fn test_unknown_filter() {
    let env = Environment::new();
    let err = env.render_str("{{ 1|nope }}", context!()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnknownFilter);
}

#[test]
fn test_custom_filter() {
    let mut env = Environment::new();
    env.add_filter("slugify", |_state: &torii::State, value: String| {
        value
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
    });
    assert_eq!(
        env.render_str("{{ 'Hello World'|slugify }}", context!())
            .unwrap(),
        "hello-world"
    );
}
