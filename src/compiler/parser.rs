use std::fmt;

use crate::compiler::ast::{self, Spanned};
use crate::compiler::lexer::{tokenize, WhitespaceConfig};
use crate::compiler::tokens::{Span, Token};
use crate::error::{Error, ErrorKind};
use crate::syntax::SyntaxConfig;
use crate::value::Value;

const RESERVED_NAMES: [&str; 8] = [
    "true", "True", "false", "False", "none", "None", "loop", "self",
];

macro_rules! syntax_error {
    ($msg:expr) => {{
        return Err(Error::new(ErrorKind::SyntaxError, $msg));
    }};
    ($msg:expr, $($tt:tt)*) => {{
        return Err(Error::new(ErrorKind::SyntaxError, format!($msg, $($tt)*)));
    }};
}

fn unexpected<D: fmt::Display>(unexpected: D, expected: &str) -> Error {
    Error::new(
        ErrorKind::SyntaxError,
        format!("unexpected {}, expected {}", unexpected, expected),
    )
}

fn unexpected_eof(expected: &str) -> Error {
    unexpected("end of input", expected)
}

fn make_const(value: Value, span: Span) -> ast::Expr<'static> {
    ast::Expr::Const(Spanned::new(ast::Const { value }, span))
}

macro_rules! expect_token {
    ($parser:expr, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some(rv) => Ok(rv),
            None => Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some((token, span)) if matches!(token, $match) => Ok((token, span)),
            Some((token, _)) => Err(unexpected(token, $expectation)),
            None => Err(unexpected_eof($expectation)),
        }
    }};
    ($parser:expr, $match:pat => $target:expr, $expectation:expr) => {{
        match ok!($parser.stream.next()) {
            Some(($match, span)) => Ok(($target, span)),
            Some((token, _)) => Err(unexpected(token, $expectation)),
            None => Err(unexpected_eof($expectation)),
        }
    }};
}

macro_rules! matches_token {
    ($p:expr, $match:pat) => {
        match ok!($p.stream.current()) {
            Some(($match, _)) => true,
            _ => false,
        }
    };
}

macro_rules! skip_token {
    ($p:expr, $match:pat) => {
        if matches_token!($p, $match) {
            ok!($p.stream.next());
            true
        } else {
            false
        }
    };
}

enum SetParseResult<'a> {
    Set(ast::Set<'a>),
    SetBlock(ast::SetBlock<'a>),
}

struct TokenStream<'a> {
    iter: Box<dyn Iterator<Item = Result<(Token<'a>, Span), Error>> + 'a>,
    current: Option<Result<(Token<'a>, Span), Error>>,
    last_span: Span,
}

impl<'a> TokenStream<'a> {
    /// Tokenize a template.
    pub fn new(
        source: &'a str,
        in_expr: bool,
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
    ) -> TokenStream<'a> {
        TokenStream {
            iter: Box::new(tokenize(source, in_expr, syntax_config, whitespace_config)),
            current: None,
            last_span: Span::default(),
        }
    }

    /// Advance the stream.
    #[inline(always)]
    pub fn next(&mut self) -> Result<Option<(Token<'a>, Span)>, Error> {
        let rv = self.current.take();
        self.current = self.iter.next();
        if let Some(Ok((_, span))) = rv {
            self.last_span = span;
        }
        rv.transpose()
    }

    /// Look at the current token.
    #[inline(always)]
    pub fn current(&mut self) -> Result<Option<(&Token<'a>, Span)>, Error> {
        if self.current.is_none() {
            ok!(self.next());
        }
        match self.current {
            Some(Ok(ref tok)) => Ok(Some((&tok.0, tok.1))),
            Some(Err(_)) => Err(self.current.take().unwrap().unwrap_err()),
            None => Ok(None),
        }
    }

    /// Expands the span to the last seen location.
    #[inline(always)]
    pub fn expand_span(&self, mut span: Span) -> Span {
        span.end_line = self.last_span.end_line;
        span.end_col = self.last_span.end_col;
        span
    }

    /// Returns the current span.
    #[inline(always)]
    pub fn current_span(&self) -> Span {
        if let Some(Ok((_, span))) = self.current {
            span
        } else {
            self.last_span
        }
    }

    /// Returns the last seen span.
    #[inline(always)]
    pub fn last_span(&self) -> Span {
        self.last_span
    }
}

struct Parser<'a> {
    stream: TokenStream<'a>,
    in_macro: bool,
    in_loop: bool,
    blocks: std::collections::BTreeSet<&'a str>,
    num_extends: usize,
}

macro_rules! binop {
    ($func:ident, $next:ident, { $($tok:tt)* }) => {
        fn $func(&mut self) -> Result<ast::Expr<'a>, Error> {
            let span = self.stream.current_span();
            let mut left = ok!(self.$next());
            loop {
                let op = match ok!(self.stream.current()) {
                    $($tok)*
                    _ => break,
                };
                ok!(self.stream.next());
                let right = ok!(self.$next());
                left = ast::Expr::BinOp(Spanned::new(
                    ast::BinOp { op, left, right },
                    self.stream.expand_span(span),
                ));
            }
            Ok(left)
        }
    };
}

macro_rules! unaryop {
    ($func:ident, $next:ident, { $($tok:tt)* }) => {
        fn $func(&mut self) -> Result<ast::Expr<'a>, Error> {
            let span = self.stream.current_span();
            let op = match ok!(self.stream.current()) {
                $($tok)*
                _ => return self.$next()
            };
            ok!(self.stream.next());
            Ok(ast::Expr::UnaryOp(Spanned::new(
                ast::UnaryOp {
                    op,
                    expr: ok!(self.$func()),
                },
                self.stream.expand_span(span),
            )))
        }
    };
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &'a str,
        in_expr: bool,
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
    ) -> Parser<'a> {
        Parser {
            stream: TokenStream::new(source, in_expr, syntax_config, whitespace_config),
            in_macro: false,
            in_loop: false,
            blocks: Default::default(),
            num_extends: 0,
        }
    }

    fn parse_ifexpr(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut span = self.stream.last_span();
        let mut expr = ok!(self.parse_or());
        loop {
            if matches_token!(self, Token::Ident("if")) {
                ok!(self.stream.next());
                let expr2 = ok!(self.parse_or());
                let expr3 = if matches_token!(self, Token::Ident("else")) {
                    ok!(self.stream.next());
                    Some(ok!(self.parse_ifexpr()))
                } else {
                    None
                };
                expr = ast::Expr::IfExpr(Spanned::new(
                    ast::IfExpr {
                        test_expr: expr2,
                        true_expr: expr,
                        false_expr: expr3,
                    },
                    self.stream.expand_span(span),
                ));
                span = self.stream.last_span();
            } else {
                break;
            }
        }
        Ok(expr)
    }

    binop!(parse_or, parse_and, {
        Some((Token::Ident("or"), _)) => ast::BinOpKind::ScOr,
    });
    binop!(parse_and, parse_not, {
        Some((Token::Ident("and"), _)) => ast::BinOpKind::ScAnd,
    });
    unaryop!(parse_not, parse_compare, {
        Some((Token::Ident("not"), _)) => ast::UnaryOpKind::Not,
    });

    /// Parses a comparison which can be chained (`a < b < c`).
    fn parse_compare(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.last_span();
        let expr = ok!(self.parse_math1());
        let mut ops = Vec::new();
        loop {
            let op = match ok!(self.stream.current()) {
                Some((Token::Eq, _)) => ast::CompareOp::Eq,
                Some((Token::Ne, _)) => ast::CompareOp::Ne,
                Some((Token::Lt, _)) => ast::CompareOp::Lt,
                Some((Token::Lte, _)) => ast::CompareOp::Lte,
                Some((Token::Gt, _)) => ast::CompareOp::Gt,
                Some((Token::Gte, _)) => ast::CompareOp::Gte,
                Some((Token::Ident("in"), _)) => ast::CompareOp::In,
                Some((Token::Ident("not"), _)) => {
                    ok!(self.stream.next());
                    ok!(expect_token!(self, Token::Ident("in"), "in"));
                    ops.push((ast::CompareOp::NotIn, ok!(self.parse_math1())));
                    continue;
                }
                _ => break,
            };
            ok!(self.stream.next());
            ops.push((op, ok!(self.parse_math1())));
        }
        if ops.is_empty() {
            Ok(expr)
        } else {
            Ok(ast::Expr::Compare(Spanned::new(
                ast::Compare { expr, ops },
                self.stream.expand_span(span),
            )))
        }
    }

    binop!(parse_math1, parse_concat, {
        Some((Token::Plus, _)) => ast::BinOpKind::Add,
        Some((Token::Minus, _)) => ast::BinOpKind::Sub,
    });
    binop!(parse_concat, parse_math2, {
        Some((Token::Tilde, _)) => ast::BinOpKind::Concat,
    });
    binop!(parse_math2, parse_pow, {
        Some((Token::Mul, _)) => ast::BinOpKind::Mul,
        Some((Token::Div, _)) => ast::BinOpKind::Div,
        Some((Token::FloorDiv, _)) => ast::BinOpKind::FloorDiv,
        Some((Token::Mod, _)) => ast::BinOpKind::Rem,
    });
    binop!(parse_pow, parse_unary, {
        Some((Token::Pow, _)) => ast::BinOpKind::Pow,
    });

    fn parse_unary_only(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.current_span();
        match ok!(self.stream.current()) {
            Some((Token::Minus, _)) => {
                ok!(self.stream.next());
                Ok(ast::Expr::UnaryOp(Spanned::new(
                    ast::UnaryOp {
                        op: ast::UnaryOpKind::Neg,
                        expr: ok!(self.parse_unary_only()),
                    },
                    self.stream.expand_span(span),
                )))
            }
            Some((Token::Plus, _)) => {
                ok!(self.stream.next());
                self.parse_unary_only()
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_unary(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.current_span();
        let mut expr = ok!(self.parse_unary_only());
        expr = ok!(self.parse_postfix(expr, span));
        self.parse_filter_expr(expr)
    }

    fn parse_postfix(
        &mut self,
        expr: ast::Expr<'a>,
        mut span: Span,
    ) -> Result<ast::Expr<'a>, Error> {
        let mut expr = expr;
        loop {
            let next_span = self.stream.current_span();
            match ok!(self.stream.current()) {
                Some((Token::Dot, _)) => {
                    ok!(self.stream.next());
                    let (name, _) =
                        ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                    expr = ast::Expr::GetAttr(Spanned::new(
                        ast::GetAttr { name, expr },
                        self.stream.expand_span(span),
                    ));
                }
                Some((Token::BracketOpen, _)) => {
                    ok!(self.stream.next());

                    let mut start = None;
                    let mut stop = None;
                    let mut step = None;
                    let mut is_slice = false;

                    if !matches_token!(self, Token::Colon) {
                        start = Some(ok!(self.parse_expr()));
                    }
                    if matches_token!(self, Token::Colon) {
                        is_slice = true;
                        ok!(self.stream.next());
                        if !matches_token!(self, Token::BracketClose | Token::Colon) {
                            stop = Some(ok!(self.parse_expr()));
                        }
                        if skip_token!(self, Token::Colon)
                            && !matches_token!(self, Token::BracketClose)
                        {
                            step = Some(ok!(self.parse_expr()));
                        }
                    }
                    ok!(expect_token!(self, Token::BracketClose, "`]`"));

                    if !is_slice {
                        expr = ast::Expr::GetItem(Spanned::new(
                            ast::GetItem {
                                expr,
                                subscript_expr: ok!(start.ok_or_else(|| Error::new(
                                    ErrorKind::SyntaxError,
                                    "empty subscript"
                                ))),
                            },
                            self.stream.expand_span(span),
                        ));
                    } else {
                        expr = ast::Expr::Slice(Spanned::new(
                            ast::Slice {
                                expr,
                                start,
                                stop,
                                step,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                Some((Token::ParenOpen, _)) => {
                    let args = ok!(self.parse_args());
                    expr = ast::Expr::Call(Spanned::new(
                        ast::Call { expr, args },
                        self.stream.expand_span(span),
                    ));
                }
                _ => break,
            }
            span = next_span;
        }
        Ok(expr)
    }

    fn parse_filter_expr(&mut self, expr: ast::Expr<'a>) -> Result<ast::Expr<'a>, Error> {
        let mut expr = expr;
        loop {
            match ok!(self.stream.current()) {
                Some((Token::Pipe, _)) => {
                    ok!(self.stream.next());
                    let (name, span) =
                        ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                    let args = if matches_token!(self, Token::ParenOpen) {
                        ok!(self.parse_args())
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Filter(Spanned::new(
                        ast::Filter {
                            name,
                            expr: Some(expr),
                            args,
                        },
                        self.stream.expand_span(span),
                    ));
                }
                Some((Token::Ident("is"), _)) => {
                    ok!(self.stream.next());
                    let negated = if matches_token!(self, Token::Ident("not")) {
                        ok!(self.stream.next());
                        true
                    } else {
                        false
                    };
                    let (name, span) =
                        ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                    let args = if matches_token!(self, Token::ParenOpen) {
                        ok!(self.parse_args())
                    } else if let Some(arg) = ok!(self.parse_optional_test_arg()) {
                        vec![ast::CallArg::Pos(arg)]
                    } else {
                        Vec::new()
                    };
                    expr = ast::Expr::Test(Spanned::new(
                        ast::Test { name, expr, args },
                        self.stream.expand_span(span),
                    ));
                    if negated {
                        expr = ast::Expr::UnaryOp(Spanned::new(
                            ast::UnaryOp {
                                op: ast::UnaryOpKind::Not,
                                expr,
                            },
                            self.stream.expand_span(span),
                        ));
                    }
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    /// Tests accept a single argument without parentheses
    /// (`x is divisibleby 3`).
    fn parse_optional_test_arg(&mut self) -> Result<Option<ast::Expr<'a>>, Error> {
        let can_start_expr = match ok!(self.stream.current()) {
            Some((
                Token::Int(_)
                | Token::Float(_)
                | Token::Str(_)
                | Token::String(_)
                | Token::BracketOpen
                | Token::BraceOpen,
                _,
            )) => true,
            Some((Token::Ident(name), _)) => !matches!(
                *name,
                "and" | "or" | "not" | "else" | "if" | "in" | "is" | "recursive" | "ignore"
            ),
            _ => false,
        };
        if can_start_expr {
            Ok(Some(ok!(self.parse_primary())))
        } else {
            Ok(None)
        }
    }

    fn parse_args(&mut self) -> Result<Vec<ast::CallArg<'a>>, Error> {
        let mut args = Vec::new();
        let mut has_kwargs = false;

        ok!(expect_token!(self, Token::ParenOpen, "`(`"));
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }

            if skip_token!(self, Token::Pow) {
                args.push(ast::CallArg::KwargSplat(ok!(self.parse_expr_noif())));
                has_kwargs = true;
                continue;
            }
            if skip_token!(self, Token::Mul) {
                args.push(ast::CallArg::PosSplat(ok!(self.parse_expr_noif())));
                continue;
            }

            let expr = ok!(self.parse_expr());

            // keyword argument
            match expr {
                ast::Expr::Var(ref var) if matches_token!(self, Token::Assign) => {
                    ok!(self.stream.next());
                    args.push(ast::CallArg::Kwarg(var.id, ok!(self.parse_expr_noif())));
                    has_kwargs = true;
                }
                _ if has_kwargs => {
                    return Err(Error::new(
                        ErrorKind::SyntaxError,
                        "non-keyword arg after keyword arg",
                    ));
                }
                _ => {
                    args.push(ast::CallArg::Pos(expr));
                }
            }
        }

        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<ast::Expr<'a>, Error> {
        let (token, span) = ok!(expect_token!(self, "expression"));
        macro_rules! const_val {
            ($expr:expr) => {
                make_const(Value::from($expr), span)
            };
        }

        match token {
            Token::Ident("true" | "True") => Ok(const_val!(true)),
            Token::Ident("false" | "False") => Ok(const_val!(false)),
            Token::Ident("none" | "None") => Ok(const_val!(())),
            Token::Ident(name) => Ok(ast::Expr::Var(Spanned::new(ast::Var { id: name }, span))),
            Token::Str(val) => Ok(const_val!(val)),
            Token::String(val) => Ok(const_val!(val)),
            Token::Int(val) => Ok(const_val!(val)),
            Token::Float(val) => Ok(const_val!(val)),
            Token::ParenOpen => self.parse_tuple_or_expression(span),
            Token::BracketOpen => self.parse_list_expr(span),
            Token::BraceOpen => self.parse_map_expr(span),
            token => syntax_error!("unexpected {}", token),
        }
    }

    fn parse_list_expr(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        let mut items = Vec::new();
        loop {
            if matches_token!(self, Token::BracketClose) {
                break;
            }
            if !items.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
                if matches_token!(self, Token::BracketClose) {
                    break;
                }
            }
            items.push(ok!(self.parse_expr()));
        }
        ok!(expect_token!(self, Token::BracketClose, "`]`"));
        Ok(ast::Expr::List(Spanned::new(
            ast::List { items },
            self.stream.expand_span(span),
        )))
    }

    fn parse_map_expr(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        let mut keys = Vec::new();
        let mut values = Vec::new();
        loop {
            if matches_token!(self, Token::BraceClose) {
                break;
            }
            if !keys.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
                if matches_token!(self, Token::BraceClose) {
                    break;
                }
            }
            keys.push(ok!(self.parse_expr()));
            ok!(expect_token!(self, Token::Colon, "`:`"));
            values.push(ok!(self.parse_expr()));
        }
        ok!(expect_token!(self, Token::BraceClose, "`}`"));
        Ok(ast::Expr::Map(Spanned::new(
            ast::Map { keys, values },
            self.stream.expand_span(span),
        )))
    }

    fn parse_tuple_or_expression(&mut self, span: Span) -> Result<ast::Expr<'a>, Error> {
        // the engine does not really have tuples, but it treats the tuple
        // syntax the same as lists.
        if skip_token!(self, Token::ParenClose) {
            return Ok(ast::Expr::List(Spanned::new(
                ast::List { items: vec![] },
                self.stream.expand_span(span),
            )));
        }
        let mut expr = ok!(self.parse_expr());
        if matches_token!(self, Token::Comma) {
            let mut items = vec![expr];
            loop {
                if matches_token!(self, Token::ParenClose) {
                    break;
                }
                ok!(expect_token!(self, Token::Comma, "`,`"));
                if matches_token!(self, Token::ParenClose) {
                    break;
                }
                items.push(ok!(self.parse_expr()));
            }
            expr = ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            ));
        }
        ok!(expect_token!(self, Token::ParenClose, "`)`"));
        Ok(expr)
    }

    pub fn parse_expr(&mut self) -> Result<ast::Expr<'a>, Error> {
        self.parse_ifexpr()
    }

    pub fn parse_expr_noif(&mut self) -> Result<ast::Expr<'a>, Error> {
        self.parse_or()
    }

    fn parse_stmt(&mut self) -> Result<ast::Stmt<'a>, Error> {
        let (token, span) = ok!(expect_token!(self, "block keyword"));
        macro_rules! stmt {
            ($variant:ident, $parse:expr) => {
                Ok(ast::Stmt::$variant(Spanned::new(
                    ok!($parse),
                    self.stream.expand_span(span),
                )))
            };
        }

        match token {
            Token::Ident("for") => stmt!(ForLoop, self.parse_for_stmt()),
            Token::Ident("if") => stmt!(IfCond, self.parse_if_cond()),
            Token::Ident("with") => stmt!(WithBlock, self.parse_with_block()),
            Token::Ident("set") => Ok(match ok!(self.parse_set()) {
                SetParseResult::Set(rv) => {
                    ast::Stmt::Set(Spanned::new(rv, self.stream.expand_span(span)))
                }
                SetParseResult::SetBlock(rv) => {
                    ast::Stmt::SetBlock(Spanned::new(rv, self.stream.expand_span(span)))
                }
            }),
            Token::Ident("block") => stmt!(Block, self.parse_block()),
            Token::Ident("extends") => {
                self.num_extends += 1;
                if self.num_extends > 1 {
                    syntax_error!("tried to extend a second time in a template");
                }
                stmt!(Extends, self.parse_extends())
            }
            Token::Ident("include") => stmt!(Include, self.parse_include()),
            Token::Ident("import") => stmt!(Import, self.parse_import()),
            Token::Ident("from") => stmt!(FromImport, self.parse_from_import()),
            Token::Ident("autoescape") => stmt!(AutoEscape, self.parse_auto_escape()),
            Token::Ident("filter") => stmt!(FilterBlock, self.parse_filter_block()),
            Token::Ident("macro") => stmt!(Macro, self.parse_macro()),
            Token::Ident("call") => stmt!(CallBlock, self.parse_call_block()),
            Token::Ident("do") => stmt!(Do, self.parse_do()),
            Token::Ident("trans") => stmt!(Trans, self.parse_trans()),
            Token::Ident("break") => {
                if !self.in_loop {
                    syntax_error!("break must be placed inside of a loop");
                }
                Ok(ast::Stmt::Break(Spanned::new(ast::Break, span)))
            }
            Token::Ident("continue") => {
                if !self.in_loop {
                    syntax_error!("continue must be placed inside of a loop");
                }
                Ok(ast::Stmt::Continue(Spanned::new(ast::Continue, span)))
            }
            Token::Ident(name) => syntax_error!("unknown statement {}", name),
            token => syntax_error!("unknown {}, expected statement", token),
        }
    }

    fn parse_assign_name(&mut self, allow_attr: bool) -> Result<ast::Expr<'a>, Error> {
        let (id, span) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
        if RESERVED_NAMES.contains(&id) {
            syntax_error!("cannot assign to reserved variable name {}", id);
        }
        let mut rv = ast::Expr::Var(ast::Spanned::new(ast::Var { id }, span));
        if allow_attr {
            // assignments to namespace attributes propagate writes across
            // scopes (`{% set ns.foo = 42 %}`).
            while skip_token!(self, Token::Dot) {
                let (name, span) =
                    ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                rv = ast::Expr::GetAttr(Spanned::new(
                    ast::GetAttr { name, expr: rv },
                    self.stream.expand_span(span),
                ));
            }
        }
        Ok(rv)
    }

    fn parse_assignment(&mut self) -> Result<ast::Expr<'a>, Error> {
        let span = self.stream.current_span();
        let mut items = Vec::new();
        let mut is_tuple = false;

        loop {
            if !items.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
            }
            if matches_token!(
                self,
                Token::ParenClose
                    | Token::VariableEnd
                    | Token::BlockEnd
                    | Token::Assign
                    | Token::Ident("in")
            ) {
                break;
            }
            items.push(if skip_token!(self, Token::ParenOpen) {
                let rv = ok!(self.parse_assignment());
                ok!(expect_token!(self, Token::ParenClose, "`)`"));
                rv
            } else {
                ok!(self.parse_assign_name(false))
            });
            if matches_token!(self, Token::Comma) {
                is_tuple = true;
            } else {
                break;
            }
        }

        if !is_tuple && items.len() == 1 {
            Ok(items.into_iter().next().unwrap())
        } else {
            Ok(ast::Expr::List(Spanned::new(
                ast::List { items },
                self.stream.expand_span(span),
            )))
        }
    }

    fn parse_for_stmt(&mut self) -> Result<ast::ForLoop<'a>, Error> {
        let target = ok!(self.parse_assignment());
        ok!(expect_token!(self, Token::Ident("in"), "in"));
        let iter = ok!(self.parse_expr_noif());
        let filter_expr = if skip_token!(self, Token::Ident("if")) {
            Some(ok!(self.parse_expr()))
        } else {
            None
        };
        let recursive = skip_token!(self, Token::Ident("recursive"));
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let old_in_loop = std::mem::replace(&mut self.in_loop, true);
        let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endfor" | "else"))));
        self.in_loop = old_in_loop;
        let else_body = if matches_token!(self, Token::Ident("else")) {
            ok!(self.stream.next());
            ok!(expect_token!(self, Token::BlockEnd, "end of block"));
            ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endfor"))))
        } else {
            Vec::new()
        };
        ok!(self.stream.next());
        Ok(ast::ForLoop {
            target,
            iter,
            filter_expr,
            recursive,
            body,
            else_body,
        })
    }

    fn parse_if_cond(&mut self) -> Result<ast::IfCond<'a>, Error> {
        let expr = ok!(self.parse_expr_noif());
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let true_body =
            ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endif" | "else" | "elif"))));
        let false_body = match ok!(self.stream.next()) {
            Some((Token::Ident("else"), _)) => {
                ok!(expect_token!(self, Token::BlockEnd, "end of block"));
                let rv = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endif"))));
                ok!(self.stream.next());
                rv
            }
            Some((Token::Ident("elif"), span)) => vec![ast::Stmt::IfCond(Spanned::new(
                ok!(self.parse_if_cond()),
                self.stream.expand_span(span),
            ))],
            _ => Vec::new(),
        };

        Ok(ast::IfCond {
            expr,
            true_body,
            false_body,
        })
    }

    fn parse_with_block(&mut self) -> Result<ast::WithBlock<'a>, Error> {
        let mut assignments = Vec::new();

        while !matches_token!(self, Token::BlockEnd) {
            if !assignments.is_empty() {
                ok!(expect_token!(self, Token::Comma, "comma"));
            }
            let target = if skip_token!(self, Token::ParenOpen) {
                let assign = ok!(self.parse_assignment());
                ok!(expect_token!(self, Token::ParenClose, "`)`"));
                assign
            } else {
                ok!(self.parse_assign_name(false))
            };
            ok!(expect_token!(self, Token::Assign, "assignment operator"));
            let expr = ok!(self.parse_expr());
            assignments.push((target, expr));
        }

        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endwith"))));
        ok!(self.stream.next());
        Ok(ast::WithBlock { assignments, body })
    }

    fn parse_set(&mut self) -> Result<SetParseResult<'a>, Error> {
        let (target, in_paren) = if skip_token!(self, Token::ParenOpen) {
            let assign = ok!(self.parse_assignment());
            ok!(expect_token!(self, Token::ParenClose, "`)`"));
            (assign, true)
        } else {
            (ok!(self.parse_assign_name(true)), false)
        };

        if !in_paren && matches_token!(self, Token::BlockEnd | Token::Pipe) {
            let filter = if skip_token!(self, Token::Pipe) {
                Some(ok!(self.parse_filter_chain()))
            } else {
                None
            };
            ok!(expect_token!(self, Token::BlockEnd, "end of block"));
            let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endset"))));
            ok!(self.stream.next());
            Ok(SetParseResult::SetBlock(ast::SetBlock {
                target,
                filter,
                body,
            }))
        } else {
            ok!(expect_token!(self, Token::Assign, "assignment operator"));
            let expr = ok!(self.parse_expr());
            Ok(SetParseResult::Set(ast::Set { target, expr }))
        }
    }

    fn parse_block(&mut self) -> Result<ast::Block<'a>, Error> {
        if self.in_macro {
            syntax_error!("block tags in macros are not allowed");
        }
        let (name, _) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
        if !self.blocks.insert(name) {
            syntax_error!("block '{}' defined twice", name);
        }

        let mut scoped = false;
        let mut required = false;
        loop {
            match ok!(self.stream.current()) {
                Some((Token::Ident("scoped"), _)) => {
                    ok!(self.stream.next());
                    scoped = true;
                }
                Some((Token::Ident("required"), _)) => {
                    ok!(self.stream.next());
                    required = true;
                }
                _ => break,
            }
        }

        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endblock"))));
        self.in_loop = old_in_loop;
        ok!(self.stream.next());

        if let Some((Token::Ident(trailing_name), _)) = ok!(self.stream.current()) {
            if *trailing_name != name {
                syntax_error!(
                    "mismatching name on block. Got `{}`, expected `{}`",
                    *trailing_name,
                    name
                );
            }
            ok!(self.stream.next());
        }

        Ok(ast::Block {
            name,
            scoped,
            required,
            body,
        })
    }

    fn parse_extends(&mut self) -> Result<ast::Extends<'a>, Error> {
        let name = ok!(self.parse_expr());
        Ok(ast::Extends { name })
    }

    /// Parses the `with context` / `without context` modifiers shared by
    /// the include and import statements.
    fn parse_context_modifier(&mut self, default: bool) -> Result<bool, Error> {
        match ok!(self.stream.current()) {
            Some((Token::Ident("with"), _)) => {
                ok!(self.stream.next());
                ok!(expect_token!(self, Token::Ident("context"), "context"));
                Ok(true)
            }
            Some((Token::Ident("without"), _)) => {
                ok!(self.stream.next());
                ok!(expect_token!(self, Token::Ident("context"), "context"));
                Ok(false)
            }
            _ => Ok(default),
        }
    }

    fn parse_include(&mut self) -> Result<ast::Include<'a>, Error> {
        let name = ok!(self.parse_expr());
        let ignore_missing = if skip_token!(self, Token::Ident("ignore")) {
            ok!(expect_token!(self, Token::Ident("missing"), "missing keyword"));
            true
        } else {
            false
        };
        // includes inherit the context by default
        let with_context = ok!(self.parse_context_modifier(true));
        Ok(ast::Include {
            name,
            ignore_missing,
            with_context,
        })
    }

    fn parse_import(&mut self) -> Result<ast::Import<'a>, Error> {
        let expr = ok!(self.parse_expr());
        ok!(expect_token!(self, Token::Ident("as"), "as"));
        let (name, _) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
        if RESERVED_NAMES.contains(&name) {
            syntax_error!("cannot assign to reserved variable name {}", name);
        }
        // imports do not inherit the context by default
        let with_context = ok!(self.parse_context_modifier(false));
        Ok(ast::Import {
            expr,
            name,
            with_context,
        })
    }

    fn parse_from_import(&mut self) -> Result<ast::FromImport<'a>, Error> {
        let expr = ok!(self.parse_expr());
        ok!(expect_token!(self, Token::Ident("import"), "import"));
        let mut names = Vec::new();
        loop {
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            if !names.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
            }
            if matches_token!(self, Token::BlockEnd) {
                break;
            }
            if matches_token!(self, Token::Ident("with" | "without")) {
                break;
            }
            let (name, _) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
            let alias = if skip_token!(self, Token::Ident("as")) {
                let (alias, _) =
                    ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                Some(alias)
            } else {
                None
            };
            if RESERVED_NAMES.contains(&alias.unwrap_or(name)) {
                syntax_error!(
                    "cannot assign to reserved variable name {}",
                    alias.unwrap_or(name)
                );
            }
            names.push((name, alias));
        }
        let with_context = ok!(self.parse_context_modifier(false));
        Ok(ast::FromImport {
            expr,
            names,
            with_context,
        })
    }

    fn parse_auto_escape(&mut self) -> Result<ast::AutoEscape<'a>, Error> {
        let enabled = ok!(self.parse_expr());
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endautoescape"))));
        ok!(self.stream.next());
        Ok(ast::AutoEscape { enabled, body })
    }

    fn parse_filter_chain(&mut self) -> Result<ast::Expr<'a>, Error> {
        let mut filter = None;

        while !matches_token!(self, Token::BlockEnd) {
            if filter.is_some() {
                ok!(expect_token!(self, Token::Pipe, "`|`"));
            }
            let (name, span) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
            let args = if matches_token!(self, Token::ParenOpen) {
                ok!(self.parse_args())
            } else {
                Vec::new()
            };
            filter = Some(ast::Expr::Filter(Spanned::new(
                ast::Filter {
                    name,
                    expr: filter,
                    args,
                },
                self.stream.expand_span(span),
            )));
        }

        filter.ok_or_else(|| Error::new(ErrorKind::SyntaxError, "expected a filter"))
    }

    fn parse_filter_block(&mut self) -> Result<ast::FilterBlock<'a>, Error> {
        let filter = ok!(self.parse_filter_chain());
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let body = ok!(self.subparse(&|tok| matches!(tok, Token::Ident("endfilter"))));
        ok!(self.stream.next());
        Ok(ast::FilterBlock { filter, body })
    }

    fn parse_macro_args_and_defaults(
        &mut self,
        args: &mut Vec<ast::Expr<'a>>,
        defaults: &mut Vec<ast::Expr<'a>>,
    ) -> Result<(), Error> {
        loop {
            if skip_token!(self, Token::ParenClose) {
                break;
            }
            if !args.is_empty() {
                ok!(expect_token!(self, Token::Comma, "`,`"));
                if skip_token!(self, Token::ParenClose) {
                    break;
                }
            }
            args.push(ok!(self.parse_assign_name(false)));
            if skip_token!(self, Token::Assign) {
                defaults.push(ok!(self.parse_expr()));
            } else if !defaults.is_empty() {
                ok!(expect_token!(self, Token::Assign, "`=`"));
            }
        }
        Ok(())
    }

    fn parse_macro_or_call_block_body(
        &mut self,
        args: Vec<ast::Expr<'a>>,
        defaults: Vec<ast::Expr<'a>>,
        name: Option<&'a str>,
    ) -> Result<ast::Macro<'a>, Error> {
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));
        let old_in_loop = std::mem::replace(&mut self.in_loop, false);
        let old_in_macro = std::mem::replace(&mut self.in_macro, true);
        let body = ok!(self.subparse(&|tok| match name {
            Some(_) => matches!(tok, Token::Ident("endmacro")),
            None => matches!(tok, Token::Ident("endcall")),
        }));
        self.in_loop = old_in_loop;
        self.in_macro = old_in_macro;
        ok!(self.stream.next());
        Ok(ast::Macro {
            name: name.unwrap_or("caller"),
            args,
            defaults,
            body,
        })
    }

    fn parse_macro(&mut self) -> Result<ast::Macro<'a>, Error> {
        let (name, _) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
        ok!(expect_token!(self, Token::ParenOpen, "`(`"));
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        ok!(self.parse_macro_args_and_defaults(&mut args, &mut defaults));
        self.parse_macro_or_call_block_body(args, defaults, Some(name))
    }

    fn parse_call_block(&mut self) -> Result<ast::CallBlock<'a>, Error> {
        let span = self.stream.last_span();
        let mut args = Vec::new();
        let mut defaults = Vec::new();
        if skip_token!(self, Token::ParenOpen) {
            ok!(self.parse_macro_args_and_defaults(&mut args, &mut defaults));
        }
        let call = match ok!(self.parse_expr()) {
            ast::Expr::Call(call) => call,
            _ => syntax_error!("expected call expression in call block"),
        };
        let macro_decl = Spanned::new(
            ok!(self.parse_macro_or_call_block_body(args, defaults, None)),
            self.stream.expand_span(span),
        );
        Ok(ast::CallBlock { call, macro_decl })
    }

    fn parse_do(&mut self) -> Result<ast::Do<'a>, Error> {
        let expr = ok!(self.parse_expr());
        Ok(ast::Do { expr })
    }

    fn parse_trans(&mut self) -> Result<ast::Trans<'a>, Error> {
        let mut assignments = Vec::new();
        skip_token!(self, Token::Ident("trimmed"));
        while !matches_token!(self, Token::BlockEnd) {
            if !assignments.is_empty() {
                skip_token!(self, Token::Comma);
                if matches_token!(self, Token::BlockEnd) {
                    break;
                }
            }
            let (name, _) = ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
            let expr = if skip_token!(self, Token::Assign) {
                ok!(self.parse_expr())
            } else {
                ast::Expr::Var(Spanned::new(ast::Var { id: name }, self.stream.last_span()))
            };
            assignments.push((name, expr));
        }
        ok!(expect_token!(self, Token::BlockEnd, "end of block"));

        let (singular, mut referenced) = ok!(self.parse_trans_body());
        let mut plural = None;
        let mut count_var = None;
        if matches_token!(self, Token::Ident("pluralize")) {
            ok!(self.stream.next());
            if let Some((Token::Ident(name), _)) = ok!(self.stream.current()) {
                count_var = Some(*name);
                ok!(self.stream.next());
            }
            ok!(expect_token!(self, Token::BlockEnd, "end of block"));
            let (plural_msg, plural_refs) = ok!(self.parse_trans_body());
            referenced.extend(plural_refs);
            plural = Some(plural_msg);
        }
        ok!(self.stream.next());

        // variables referenced in the body that were not explicitly bound in
        // the opening tag resolve against the context under the same name.
        for name in referenced {
            if !assignments.iter().any(|(n, _)| *n == name) {
                assignments.push((
                    name,
                    ast::Expr::Var(Spanned::new(ast::Var { id: name }, self.stream.last_span())),
                ));
            }
        }

        if plural.is_some() && count_var.is_none() {
            // an explicit `count` or `num` binding wins as the plural
            // count, otherwise the first binding is used.
            count_var = assignments
                .iter()
                .find(|(n, _)| *n == "count" || *n == "num")
                .or_else(|| assignments.first())
                .map(|(n, _)| *n);
            if count_var.is_none() {
                syntax_error!("pluralize without variables");
            }
        }

        Ok(ast::Trans {
            assignments,
            singular,
            plural,
            count_var,
        })
    }

    /// Parses the interior of a trans block into a message string.
    ///
    /// Only literal data and simple variable outputs are allowed; the
    /// variables become `%(name)s` placeholders.
    fn parse_trans_body(&mut self) -> Result<(String, Vec<&'a str>), Error> {
        let mut message = String::new();
        let mut referenced = Vec::new();
        loop {
            match ok!(self.stream.next()) {
                Some((Token::TemplateData(raw), _)) => message.push_str(raw),
                Some((Token::VariableStart, _)) => {
                    let (name, _) =
                        ok!(expect_token!(self, Token::Ident(name) => name, "identifier"));
                    ok!(expect_token!(
                        self,
                        Token::VariableEnd,
                        "end of variable block"
                    ));
                    message.push_str("%(");
                    message.push_str(name);
                    message.push_str(")s");
                    referenced.push(name);
                }
                Some((Token::BlockStart, _)) => match ok!(self.stream.current()) {
                    Some((Token::Ident("endtrans" | "pluralize"), _)) => {
                        return Ok((message, referenced))
                    }
                    _ => syntax_error!("control structures are not allowed in trans blocks"),
                },
                Some(_) => {
                    syntax_error!("only simple variables can be used in translation blocks")
                }
                None => syntax_error!("unexpected end of input, expected endtrans"),
            }
        }
    }

    fn subparse(
        &mut self,
        end_check: &dyn Fn(&Token) -> bool,
    ) -> Result<Vec<ast::Stmt<'a>>, Error> {
        let mut rv = Vec::new();
        while let Some((token, span)) = ok!(self.stream.next()) {
            match token {
                Token::TemplateData(raw) => {
                    rv.push(ast::Stmt::EmitRaw(Spanned::new(ast::EmitRaw { raw }, span)))
                }
                Token::VariableStart => {
                    let expr = ok!(self.parse_expr());
                    rv.push(ast::Stmt::EmitExpr(Spanned::new(
                        ast::EmitExpr { expr },
                        self.stream.expand_span(span),
                    )));
                    ok!(expect_token!(
                        self,
                        Token::VariableEnd,
                        "end of variable block"
                    ));
                }
                Token::BlockStart => {
                    let (tok, _span) = match ok!(self.stream.current()) {
                        Some(rv) => rv,
                        None => syntax_error!("unexpected end of input, expected keyword"),
                    };
                    if end_check(tok) {
                        return Ok(rv);
                    }
                    rv.push(ok!(self.parse_stmt()));
                    ok!(expect_token!(self, Token::BlockEnd, "end of block"));
                }
                _ => unreachable!("lexer produced garbage"),
            }
        }
        Ok(rv)
    }

    pub fn parse(&mut self) -> Result<ast::Stmt<'a>, Error> {
        let span = self.stream.last_span();
        Ok(ast::Stmt::Template(Spanned::new(
            ast::Template {
                children: ok!(self.subparse(&|_| false)),
            },
            self.stream.expand_span(span),
        )))
    }
}

/// Parses a template.
pub fn parse<'source>(
    source: &'source str,
    filename: &str,
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
) -> Result<ast::Stmt<'source>, Error> {
    let mut parser = Parser::new(source, false, syntax_config, whitespace_config);
    parser.parse().map_err(|mut err| {
        if err.name().is_none() {
            let line = err
                .line()
                .unwrap_or(parser.stream.last_span().start_line.max(1));
            err.set_filename_and_line(filename, line);
        }
        err
    })
}

/// Parses a standalone expression.
pub fn parse_expr(source: &str) -> Result<ast::Expr<'_>, Error> {
    let mut parser = Parser::new(
        source,
        true,
        Default::default(),
        WhitespaceConfig::default(),
    );
    parser
        .parse_expr()
        .and_then(|result| match ok!(parser.stream.next()) {
            Some((token, _)) => Err(unexpected(token, "end of expression")),
            None => Ok(result),
        })
        .map_err(|mut err| {
            if err.name().is_none() {
                let line = err
                    .line()
                    .unwrap_or(parser.stream.last_span().start_line.max(1));
                err.set_filename_and_line("<expression>", line);
            }
            err
        })
}
