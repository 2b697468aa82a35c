use similar_asserts::assert_eq;

use torii::machinery::{tokenize, Token, WhitespaceConfig};

fn lex(source: &str) -> Vec<String> {
    tokenize(source, false, Default::default(), WhitespaceConfig::default())
        .map(|rv| {
            let (token, _span) = rv.unwrap();
            match token {
                Token::TemplateData(data) => format!("data:{data}"),
                Token::Ident(ident) => format!("ident:{ident}"),
                Token::Str(s) => format!("str:{s}"),
                Token::String(s) => format!("str:{s}"),
                Token::Int(i) => format!("int:{i}"),
                Token::Float(f) => format!("float:{f}"),
                other => format!("{other}"),
            }
        })
        .collect()
}

#[test]
fn test_basic_tokenization() {
    assert_eq!(
        lex("Hello {{ name }}!"),
        vec![
            "data:Hello ",
            "start of variable block",
            "ident:name",
            "end of variable block",
            "data:!",
        ]
    );
}

#[test]
fn test_block_tokens() {
    assert_eq!(
        lex("{% if a %}x{% endif %}"),
        vec![
            "start of block",
            "ident:if",
            "ident:a",
            "end of block",
            "data:x",
            "start of block",
            "ident:endif",
            "end of block",
        ]
    );
}

#[test]
fn test_comments_are_skipped() {
    assert_eq!(lex("a{# comment #}b"), vec!["data:a", "data:b"]);
}

#[test]
fn test_number_literals() {
    assert_eq!(
        lex("{{ 42 1_000 0x10 0b11 1.5 1e3 }}"),
        vec![
            "start of variable block",
            "int:42",
            "int:1000",
            "int:16",
            "int:3",
            "float:1.5",
            "float:1000",
            "end of variable block",
        ]
    );
}

#[test]
fn test_string_literals() {
    assert_eq!(
        lex(r#"{{ 'a' "b" 'c\nd' }}"#),
        vec![
            "start of variable block",
            "str:a",
            "str:b",
            "str:c\nd",
            "end of variable block",
        ]
    );
}

#[test]
fn test_operators() {
    assert_eq!(
        lex("{{ 1 <= 2 ** 3 // 4 }}"),
        vec![
            "start of variable block",
            "int:1",
            "`<=`",
            "int:2",
            "`**`",
            "int:3",
            "`//`",
            "int:4",
            "end of variable block",
        ]
    );
}

#[test]
fn test_whitespace_markers() {
    assert_eq!(
        lex("a  {{- 'x' -}}  b"),
        vec![
            "data:a",
            "start of variable block",
            "str:x",
            "end of variable block",
            "data:b",
        ]
    );
}

#[test]
fn test_raw_block() {
    assert_eq!(
        lex("{% raw %}{{ x }}{% endraw %}"),
        vec!["data:{{ x }}"]
    );
}

#[test]
fn test_trailing_newline_removal() {
    assert_eq!(lex("x\n"), vec!["data:x"]);
    let tokens: Vec<_> = tokenize(
        "x\n",
        false,
        Default::default(),
        WhitespaceConfig {
            keep_trailing_newline: true,
            ..Default::default()
        },
    )
    .collect::<Result<Vec<_>, _>>()
    .unwrap();
    assert!(matches!(tokens[0].0, Token::TemplateData("x\n")));
}

#[test]
fn test_unterminated_variable_block() {
    let rv: Result<Vec<_>, _> = tokenize(
        "{{ name",
        false,
        Default::default(),
        WhitespaceConfig::default(),
    )
    .collect();
    // the lexer just runs out of tokens; the parser reports the error
    assert!(rv.is_ok());
}

#[test]
fn test_unterminated_string() {
    let rv: Result<Vec<_>, _> = tokenize(
        "{{ 'abc }}",
        false,
        Default::default(),
        WhitespaceConfig::default(),
    )
    .collect();
    assert!(rv.is_err());
}

#[test]
fn test_unterminated_comment() {
    let rv: Result<Vec<_>, _> = tokenize(
        "{# abc",
        false,
        Default::default(),
        WhitespaceConfig::default(),
    )
    .collect();
    assert!(rv.is_err());
}

#[test]
fn test_line_tracking() {
    let spans: Vec<_> = tokenize(
        "a\nb{{ x }}",
        false,
        Default::default(),
        WhitespaceConfig::default(),
    )
    .map(|rv| rv.unwrap().1)
    .collect();
    assert_eq!(spans[0].start_line, 1);
    // the variable block starts on the second line
    assert_eq!(spans[1].start_line, 2);
}
