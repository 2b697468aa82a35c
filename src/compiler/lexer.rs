use std::borrow::Cow;
use std::ops::ControlFlow;

use crate::compiler::tokens::{Span, Token};
use crate::error::{Error, ErrorKind};
use crate::syntax::{StartMarker, SyntaxConfig};
use crate::utils::{memstr, unescape};

/// Internal config struct to control whitespace in the engine.
#[derive(Copy, Clone, Debug, Default)]
pub struct WhitespaceConfig {
    pub keep_trailing_newline: bool,
    pub lstrip_blocks: bool,
    pub trim_blocks: bool,
}

enum LexerState {
    Template,
    InVariable,
    InBlock,
    InLineStatement,
}

/// Information about a located start marker.
#[derive(Debug, Copy, Clone)]
struct Marker {
    kind: StartMarker,
    len: usize,
    /// the marker carries a `-` whitespace modifier
    strip: bool,
    /// the marker carries a `+` whitespace modifier
    keep: bool,
}

/// Tokenizes template sources.
pub struct Tokenizer<'s> {
    stack: Vec<LexerState>,
    rest: &'s str,
    failed: bool,
    current_line: usize,
    current_col: usize,
    trim_leading_whitespace: bool,
    paren_balance: isize,
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
}

#[cfg(feature = "unicode")]
fn lex_identifier(s: &str) -> usize {
    s.chars()
        .enumerate()
        .map_while(|(idx, c)| {
            let cont = if c == '_' {
                true
            } else if idx == 0 {
                unicode_ident::is_xid_start(c)
            } else {
                unicode_ident::is_xid_continue(c)
            };
            cont.then(|| c.len_utf8())
        })
        .sum::<usize>()
}

#[cfg(not(feature = "unicode"))]
fn lex_identifier(s: &str) -> usize {
    s.as_bytes()
        .iter()
        .enumerate()
        .take_while(|&(idx, &c)| {
            if c == b'_' {
                true
            } else if idx == 0 {
                c.is_ascii_alphabetic()
            } else {
                c.is_ascii_alphanumeric()
            }
        })
        .count()
}

/// Skips over a basic tag such as `{% raw %}` returning the length of the
/// entire tag including delimiters, and whether the closing delimiter
/// carried a whitespace strip marker.
fn skip_basic_tag(block_str: &str, name: &str, block_end: &str) -> Option<(usize, bool)> {
    let mut ptr = block_str;
    let mut trim = false;

    if let Some(rest) = ptr.strip_prefix(|c: char| c == '-' || c == '+') {
        ptr = rest;
    }
    ptr = ptr.trim_start_matches(|x: char| x.is_ascii_whitespace());

    ptr = match ptr.strip_prefix(name) {
        Some(ptr) => ptr,
        None => return None,
    };

    ptr = ptr.trim_start_matches(|x: char| x.is_ascii_whitespace());
    if let Some(rest) = ptr.strip_prefix('-') {
        ptr = rest;
        trim = true;
    }
    ptr = match ptr.strip_prefix(block_end) {
        Some(ptr) => ptr,
        None => return None,
    };

    Some((block_str.len() - ptr.len(), trim))
}

impl<'s> Tokenizer<'s> {
    /// Creates a new tokenizer.
    pub fn new(
        input: &'s str,
        in_expr: bool,
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
    ) -> Tokenizer<'s> {
        let mut source = input;
        if !in_expr && !whitespace_config.keep_trailing_newline {
            // a template by default does not end in a newline which is a
            // useful property to allow inline templates to work.
            if source.ends_with('\n') {
                source = &source[..source.len() - 1];
            }
            if source.ends_with('\r') {
                source = &source[..source.len() - 1];
            }
        }
        Tokenizer {
            rest: source,
            stack: vec![if in_expr {
                LexerState::InVariable
            } else {
                LexerState::Template
            }],
            failed: false,
            current_line: 1,
            current_col: 0,
            trim_leading_whitespace: false,
            paren_balance: 0,
            syntax_config,
            whitespace_config,
        }
    }

    /// Produces the next token from the tokenizer.
    pub fn next_token(&mut self) -> Result<Option<(Token<'s>, Span)>, Error> {
        loop {
            if self.rest.is_empty() || self.failed {
                // a line statement that runs into the end of the input is
                // closed implicitly.
                if !self.failed {
                    if let Some(LexerState::InLineStatement) = self.stack.last() {
                        self.stack.pop();
                        return Ok(Some((Token::BlockEnd, self.span(self.loc()))));
                    }
                }
                return Ok(None);
            }
            let outcome = match self.stack.last() {
                Some(LexerState::Template) => self.tokenize_root(),
                Some(LexerState::InBlock) => self.tokenize_block_or_var(true, false),
                Some(LexerState::InVariable) => self.tokenize_block_or_var(false, false),
                Some(LexerState::InLineStatement) => self.tokenize_block_or_var(true, true),
                None => panic!("empty lexer stack"),
            };
            match ok!(outcome) {
                ControlFlow::Break(rv) => return Ok(Some(rv)),
                ControlFlow::Continue(()) => continue,
            }
        }
    }

    fn advance(&mut self, bytes: usize) -> &'s str {
        let (skipped, new_rest) = self.rest.split_at(bytes);
        for c in skipped.chars() {
            match c {
                '\n' => {
                    self.current_line += 1;
                    self.current_col = 0;
                }
                _ => self.current_col += 1,
            }
        }
        self.rest = new_rest;
        skipped
    }

    #[inline(always)]
    fn loc(&self) -> (usize, usize) {
        (self.current_line, self.current_col)
    }

    fn span(&self, (start_line, start_col): (usize, usize)) -> Span {
        Span {
            start_line,
            start_col,
            end_line: self.current_line,
            end_col: self.current_col,
        }
    }

    fn syntax_error(&mut self, msg: &'static str) -> Error {
        self.failed = true;
        let mut err = Error::new(ErrorKind::SyntaxError, msg);
        err.set_line(self.current_line);
        err
    }

    #[inline]
    fn block_start(&self) -> &str {
        &self.syntax_config.syntax.block_start
    }

    #[inline]
    fn block_end(&self) -> &str {
        &self.syntax_config.syntax.block_end
    }

    #[inline]
    fn variable_start(&self) -> &str {
        &self.syntax_config.syntax.variable_start
    }

    #[inline]
    fn variable_end(&self) -> &str {
        &self.syntax_config.syntax.variable_end
    }

    #[inline]
    fn comment_start(&self) -> &str {
        &self.syntax_config.syntax.comment_start
    }

    #[inline]
    fn comment_end(&self) -> &str {
        &self.syntax_config.syntax.comment_end
    }

    /// Scans `haystack` for the earliest start marker.
    fn find_start_marker(&self, haystack: &str) -> Option<(usize, Marker)> {
        match self.syntax_config.aho_corasick {
            Some(ref ac) => {
                let m = some!(ac.find(haystack));
                let kind = match m.pattern().as_usize() {
                    0 => StartMarker::Variable,
                    1 => StartMarker::Block,
                    _ => StartMarker::Comment,
                };
                Some((m.start(), self.examine_marker(haystack, m.start(), kind, m.len())))
            }
            None => {
                let bytes = haystack.as_bytes();
                let mut offset = 0;
                loop {
                    let idx = some!(memstr(&bytes[offset..], b"{"));
                    let kind = match bytes.get(offset + idx + 1).copied() {
                        Some(b'{') => StartMarker::Variable,
                        Some(b'%') => StartMarker::Block,
                        Some(b'#') => StartMarker::Comment,
                        _ => {
                            offset += idx + 1;
                            continue;
                        }
                    };
                    return Some((
                        offset + idx,
                        self.examine_marker(haystack, offset + idx, kind, 2),
                    ));
                }
            }
        }
    }

    fn examine_marker(&self, haystack: &str, start: usize, kind: StartMarker, len: usize) -> Marker {
        let next = haystack.as_bytes().get(start + len).copied();
        Marker {
            kind,
            len,
            strip: next == Some(b'-'),
            keep: next == Some(b'+'),
        }
    }

    /// Finds the earliest line start (after optional indentation) at which
    /// the given prefix matches.  `haystack` must begin at a line start if
    /// `at_line_start` is true.
    fn find_line_prefix(&self, haystack: &str, prefix: &str, at_line_start: bool) -> Option<usize> {
        let mut pos = 0;
        loop {
            if pos != 0 || at_line_start {
                let indent = haystack[pos..]
                    .bytes()
                    .take_while(|&c| c == b' ' || c == b'\t')
                    .count();
                if haystack[pos + indent..].starts_with(prefix) {
                    return Some(pos);
                }
            }
            match memstr(&haystack.as_bytes()[pos..], b"\n") {
                Some(idx) => pos += idx + 1,
                None => return None,
            }
        }
    }

    fn skip_whitespace(&mut self) {
        let skipped = self
            .rest
            .chars()
            .map_while(|c| c.is_whitespace().then(|| c.len_utf8()))
            .sum::<usize>();
        if skipped > 0 {
            self.advance(skipped);
        }
    }

    fn skip_newline_if_trim_blocks(&mut self) {
        if self.whitespace_config.trim_blocks {
            if self.rest.as_bytes().first() == Some(&b'\r') {
                self.advance(1);
            }
            if self.rest.as_bytes().first() == Some(&b'\n') {
                self.advance(1);
            }
        }
    }

    /// Handles the line statement and line comment prefixes if they apply
    /// at the current position.
    ///
    /// When both prefixes match (a comment prefix commonly extends the
    /// statement prefix, like `#` and `##`), the longer one wins.
    fn handle_line_prefixes(&mut self) -> Option<ControlFlow<(Token<'s>, Span)>> {
        if self.current_col != 0 {
            return None;
        }
        let indent = self
            .rest
            .bytes()
            .take_while(|&c| c == b' ' || c == b'\t')
            .count();
        let stmt_prefix = self
            .syntax_config
            .syntax
            .line_statement_prefix
            .as_deref()
            .filter(|prefix| self.rest[indent..].starts_with(prefix));
        let comment_prefix = self
            .syntax_config
            .syntax
            .line_comment_prefix
            .as_deref()
            .filter(|prefix| self.rest[indent..].starts_with(prefix));
        match (stmt_prefix, comment_prefix) {
            (Some(stmt), comment) if comment.map_or(true, |c| c.len() <= stmt.len()) => {
                let prefix_len = stmt.len();
                let old_loc = self.loc();
                self.advance(indent + prefix_len);
                self.stack.push(LexerState::InLineStatement);
                self.paren_balance = 0;
                Some(ControlFlow::Break((Token::BlockStart, self.span(old_loc))))
            }
            (_, Some(_)) => {
                let skip = match memstr(self.rest.as_bytes(), b"\n") {
                    Some(idx) => idx + 1,
                    None => self.rest.len(),
                };
                self.advance(skip);
                Some(ControlFlow::Continue(()))
            }
            _ => None,
        }
    }

    fn tokenize_root(&mut self) -> Result<ControlFlow<(Token<'s>, Span)>, Error> {
        if let Some(rv) = self.handle_line_prefixes() {
            return Ok(rv);
        }

        let mut old_loc = self.loc();
        match self.find_start_marker(self.rest) {
            Some((0, marker)) => {
                let skip = marker.len + (marker.strip || marker.keep) as usize;
                match marker.kind {
                    StartMarker::Comment => {
                        if let Some(end) =
                            memstr(&self.rest.as_bytes()[skip..], self.comment_end().as_bytes())
                        {
                            if self.rest.as_bytes().get(end.saturating_sub(1) + skip) == Some(&b'-')
                            {
                                self.trim_leading_whitespace = true;
                            }
                            self.advance(end + skip + self.comment_end().len());
                            self.skip_newline_if_trim_blocks();
                            return Ok(ControlFlow::Continue(()));
                        } else {
                            return Err(self.syntax_error("unexpected end of comment"));
                        }
                    }
                    StartMarker::Variable => {
                        self.advance(skip);
                        self.stack.push(LexerState::InVariable);
                        return Ok(ControlFlow::Break((
                            Token::VariableStart,
                            self.span(old_loc),
                        )));
                    }
                    StartMarker::Block => {
                        // raw blocks require some special handling.  If we are at the beginning of a raw
                        // block we want to skip everything until {% endraw %} completely ignoring interior
                        // syntax and emit the entire raw block as TemplateData.
                        if let Some((raw, trim_start)) =
                            skip_basic_tag(&self.rest[marker.len..], "raw", self.block_end())
                        {
                            self.advance(raw + marker.len);
                            self.skip_newline_if_trim_blocks();
                            let mut ptr = 0;
                            while let Some(block) = memstr(
                                &self.rest.as_bytes()[ptr..],
                                self.block_start().as_bytes(),
                            ) {
                                ptr += block + self.block_start().len();
                                let trim_end = self.rest.as_bytes().get(ptr) == Some(&b'-');
                                if let Some((endraw, trim_next)) =
                                    skip_basic_tag(&self.rest[ptr..], "endraw", self.block_end())
                                {
                                    let mut result =
                                        &self.rest[..ptr - self.block_start().len()];
                                    if trim_start {
                                        result = result.trim_start();
                                    }
                                    if trim_end {
                                        result = result.trim_end();
                                    }
                                    self.advance(ptr + endraw);
                                    self.skip_newline_if_trim_blocks();
                                    self.trim_leading_whitespace = trim_next;
                                    return Ok(ControlFlow::Break((
                                        Token::TemplateData(result),
                                        self.span(old_loc),
                                    )));
                                }
                            }
                            return Err(self.syntax_error("unexpected end of raw block"));
                        }

                        self.advance(skip);
                        self.stack.push(LexerState::InBlock);
                        return Ok(ControlFlow::Break((Token::BlockStart, self.span(old_loc))));
                    }
                }
            }
            _ => {}
        }

        if self.trim_leading_whitespace {
            self.trim_leading_whitespace = false;
            self.skip_whitespace();
            if let Some(rv) = self.handle_line_prefixes() {
                return Ok(rv);
            }
        }
        old_loc = self.loc();

        // the data run ends at the next start marker or, when line statements
        // are enabled, at the next line that begins with one of the prefixes.
        let marker = self.find_start_marker(self.rest);
        let mut cutoff = marker.map(|(start, _)| start).unwrap_or(self.rest.len());
        let mut line_prefix_cut = false;
        for prefix in [
            self.syntax_config.syntax.line_statement_prefix.as_deref(),
            self.syntax_config.syntax.line_comment_prefix.as_deref(),
        ]
        .into_iter()
        .flatten()
        {
            if let Some(pos) = self.find_line_prefix(&self.rest[..cutoff], prefix, false) {
                if pos < cutoff {
                    cutoff = pos;
                    line_prefix_cut = true;
                }
            }
        }

        let (lead, span) = if line_prefix_cut {
            (self.advance(cutoff), self.span(old_loc))
        } else {
            match marker {
                Some((start, marker)) if start <= cutoff => {
                    let peeked = &self.rest[..start];
                    let trimmed = if marker.strip {
                        peeked.trim_end()
                    } else if self.should_lstrip_block(marker) {
                        lstrip_block(peeked)
                    } else {
                        peeked
                    };
                    let lead = self.advance(trimmed.len());
                    let span = self.span(old_loc);
                    self.advance(peeked.len() - trimmed.len());
                    (lead, span)
                }
                _ => (self.advance(cutoff), self.span(old_loc)),
            }
        };
        if lead.is_empty() {
            Ok(ControlFlow::Continue(()))
        } else {
            Ok(ControlFlow::Break((Token::TemplateData(lead), span)))
        }
    }

    /// `lstrip_blocks` applies to statement and comment markers that do not
    /// veto it with a `+` or request full stripping with `-`.
    fn should_lstrip_block(&self, marker: Marker) -> bool {
        self.whitespace_config.lstrip_blocks
            && !marker.keep
            && matches!(marker.kind, StartMarker::Block | StartMarker::Comment)
    }

    fn tokenize_block_or_var(
        &mut self,
        is_block: bool,
        is_line_stmt: bool,
    ) -> Result<ControlFlow<(Token<'s>, Span)>, Error> {
        let old_loc = self.loc();

        // in blocks whitespace is generally ignored, skip it.  Within line
        // statements a newline terminates the statement unless we are inside
        // of open brackets.
        match self.rest.as_bytes().iter().position(|&x| {
            !x.is_ascii_whitespace() || (is_line_stmt && x == b'\n' && self.paren_balance <= 0)
        }) {
            Some(0) => {}
            None => {
                self.advance(self.rest.len());
                if is_line_stmt {
                    self.stack.pop();
                    return Ok(ControlFlow::Break((Token::BlockEnd, self.span(old_loc))));
                }
                return Ok(ControlFlow::Continue(()));
            }
            Some(offset) => {
                self.advance(offset);
                return Ok(ControlFlow::Continue(()));
            }
        }

        // look out for the end of blocks
        if is_line_stmt {
            if self.rest.as_bytes().first() == Some(&b'\n') {
                self.stack.pop();
                self.advance(1);
                return Ok(ControlFlow::Break((Token::BlockEnd, self.span(old_loc))));
            }
        } else if is_block {
            if self.rest.get(..1) == Some("-") && self.rest[1..].starts_with(self.block_end()) {
                self.stack.pop();
                self.trim_leading_whitespace = true;
                self.advance(self.block_end().len() + 1);
                let span = self.span(old_loc);
                self.skip_newline_if_trim_blocks();
                return Ok(ControlFlow::Break((Token::BlockEnd, span)));
            }
            if self.rest.get(..1) == Some("+") && self.rest[1..].starts_with(self.block_end()) {
                self.stack.pop();
                self.advance(self.block_end().len() + 1);
                return Ok(ControlFlow::Break((Token::BlockEnd, self.span(old_loc))));
            }
            if self.rest.starts_with(self.block_end()) {
                self.stack.pop();
                self.advance(self.block_end().len());
                let span = self.span(old_loc);
                self.skip_newline_if_trim_blocks();
                return Ok(ControlFlow::Break((Token::BlockEnd, span)));
            }
        } else {
            if self.rest.get(..1) == Some("-") && self.rest[1..].starts_with(self.variable_end()) {
                self.stack.pop();
                self.advance(self.variable_end().len() + 1);
                self.trim_leading_whitespace = true;
                return Ok(ControlFlow::Break((Token::VariableEnd, self.span(old_loc))));
            }
            if self.rest.starts_with(self.variable_end()) {
                self.stack.pop();
                self.advance(self.variable_end().len());
                return Ok(ControlFlow::Break((Token::VariableEnd, self.span(old_loc))));
            }
        }

        // two character operators
        let op = match self.rest.as_bytes().get(..2) {
            Some(b"//") => Some(Token::FloorDiv),
            Some(b"**") => Some(Token::Pow),
            Some(b"==") => Some(Token::Eq),
            Some(b"!=") => Some(Token::Ne),
            Some(b">=") => Some(Token::Gte),
            Some(b"<=") => Some(Token::Lte),
            _ => None,
        };
        if let Some(op) = op {
            self.advance(2);
            return Ok(ControlFlow::Break((op, self.span(old_loc))));
        }

        // single character operators (and strings)
        let op = match self.rest.as_bytes().first() {
            Some(b'+') => Some(Token::Plus),
            Some(b'-') => Some(Token::Minus),
            Some(b'*') => Some(Token::Mul),
            Some(b'/') => Some(Token::Div),
            Some(b'%') => Some(Token::Mod),
            Some(b'!') => Some(Token::Bang),
            Some(b'.') => Some(Token::Dot),
            Some(b',') => Some(Token::Comma),
            Some(b':') => Some(Token::Colon),
            Some(b'~') => Some(Token::Tilde),
            Some(b'|') => Some(Token::Pipe),
            Some(b'=') => Some(Token::Assign),
            Some(b'>') => Some(Token::Gt),
            Some(b'<') => Some(Token::Lt),
            Some(b'(') => {
                self.paren_balance += 1;
                Some(Token::ParenOpen)
            }
            Some(b')') => {
                self.paren_balance -= 1;
                Some(Token::ParenClose)
            }
            Some(b'[') => {
                self.paren_balance += 1;
                Some(Token::BracketOpen)
            }
            Some(b']') => {
                self.paren_balance -= 1;
                Some(Token::BracketClose)
            }
            Some(b'{') => {
                self.paren_balance += 1;
                Some(Token::BraceOpen)
            }
            Some(b'}') => {
                self.paren_balance -= 1;
                Some(Token::BraceClose)
            }
            Some(b'\'') => {
                return Ok(ControlFlow::Break(ok!(self.eat_string(b'\''))));
            }
            Some(b'"') => {
                return Ok(ControlFlow::Break(ok!(self.eat_string(b'"'))));
            }
            Some(c) if c.is_ascii_digit() => return Ok(ControlFlow::Break(ok!(self.eat_number()))),
            _ => None,
        };
        if let Some(op) = op {
            self.advance(1);
            Ok(ControlFlow::Break((op, self.span(old_loc))))
        } else {
            Ok(ControlFlow::Break(ok!(self.eat_identifier())))
        }
    }

    fn eat_number(&mut self) -> Result<(Token<'s>, Span), Error> {
        #[derive(Copy, Clone)]
        enum State {
            RadixInteger, // 0x10, 0o17, 0b11
            Integer,      // 123
            Fraction,     // .123
            Exponent,     // E | e
            ExponentSign, // +|-
        }

        let old_loc = self.loc();

        let radix = match self.rest.as_bytes().get(..2) {
            Some(b"0b" | b"0B") => 2,
            Some(b"0o" | b"0O") => 8,
            Some(b"0x" | b"0X") => 16,
            _ => 10,
        };

        let mut state = if radix == 10 {
            State::Integer
        } else {
            self.advance(2);
            State::RadixInteger
        };

        let mut num_len = self
            .rest
            .as_bytes()
            .iter()
            .take_while(|&c| c.is_ascii_digit())
            .count();
        let mut has_underscore = false;
        for c in self.rest.as_bytes()[num_len..].iter().copied() {
            state = match (c, state) {
                (b'.', State::Integer) => State::Fraction,
                (b'E' | b'e', State::Integer | State::Fraction) => State::Exponent,
                (b'+' | b'-', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9', State::Exponent) => State::ExponentSign,
                (b'0'..=b'9', state) => state,
                (b'a'..=b'f' | b'A'..=b'F', State::RadixInteger) if radix == 16 => state,
                (b'_', _) => {
                    has_underscore = true;
                    state
                }
                _ => break,
            };
            num_len += 1;
        }
        let is_float = !matches!(state, State::Integer | State::RadixInteger);

        let mut num = Cow::Borrowed(self.advance(num_len));
        if has_underscore {
            if num.ends_with('_') {
                return Err(self.syntax_error("'_' may not occur at end of number"));
            }
            num = Cow::Owned(num.replace('_', ""));
        }

        Ok((
            ok!(if is_float {
                num.parse()
                    .map(Token::Float)
                    .map_err(|_| self.syntax_error("invalid float"))
            } else {
                i64::from_str_radix(&num, radix)
                    .map(Token::Int)
                    .map_err(|_| self.syntax_error("invalid integer"))
            }),
            self.span(old_loc),
        ))
    }

    fn eat_identifier(&mut self) -> Result<(Token<'s>, Span), Error> {
        let ident_len = lex_identifier(self.rest);
        if ident_len > 0 {
            let old_loc = self.loc();
            let ident = self.advance(ident_len);
            Ok((Token::Ident(ident), self.span(old_loc)))
        } else {
            Err(self.syntax_error("unexpected character"))
        }
    }

    fn eat_string(&mut self, delim: u8) -> Result<(Token<'s>, Span), Error> {
        let old_loc = self.loc();
        let mut escaped = false;
        let mut has_escapes = false;
        let str_len = self
            .rest
            .as_bytes()
            .iter()
            .skip(1)
            .take_while(|&&c| match (escaped, c) {
                (true, _) => {
                    escaped = false;
                    true
                }
                (_, b'\\') => {
                    escaped = true;
                    has_escapes = true;
                    true
                }
                (_, c) if c == delim => false,
                _ => true,
            })
            .count();
        if escaped || self.rest.as_bytes().get(str_len + 1) != Some(&delim) {
            return Err(self.syntax_error("unexpected end of string"));
        }
        let s = self.advance(str_len + 2);
        Ok(if has_escapes {
            (
                Token::String(match unescape(&s[1..s.len() - 1]) {
                    Ok(unescaped) => unescaped,
                    Err(err) => return Err(err),
                }),
                self.span(old_loc),
            )
        } else {
            (Token::Str(&s[1..s.len() - 1]), self.span(old_loc))
        })
    }
}

/// Strips spaces and tabs from the tail of a data chunk if they make up the
/// entire line so far (the `lstrip_blocks` behavior).
fn lstrip_block(s: &str) -> &str {
    let trimmed = s.trim_end_matches(|c| c == ' ' || c == '\t');
    if trimmed.is_empty() || trimmed.ends_with(|c| c == '\n' || c == '\r') {
        trimmed
    } else {
        s
    }
}

/// Tokenizes the source.
pub fn tokenize(
    input: &str,
    in_expr: bool,
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
) -> impl Iterator<Item = Result<(Token<'_>, Span), Error>> {
    let mut tokenizer = Tokenizer::new(input, in_expr, syntax_config, whitespace_config);
    std::iter::from_fn(move || tokenizer.next_token().transpose())
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn defaults() -> (SyntaxConfig, WhitespaceConfig) {
        (SyntaxConfig::default(), WhitespaceConfig::default())
    }

    #[test]
    fn test_find_marker() {
        let tokenizer = Tokenizer::new("", false, Default::default(), Default::default());
        assert!(tokenizer.find_start_marker("{").is_none());
        assert!(tokenizer.find_start_marker("foo").is_none());
        assert!(tokenizer.find_start_marker("foo {").is_none());
        let (offset, marker) = tokenizer.find_start_marker("foo {{").unwrap();
        assert_eq!(offset, 4);
        assert!(!marker.strip);
        let (offset, marker) = tokenizer.find_start_marker("foo {{-").unwrap();
        assert_eq!(offset, 4);
        assert!(marker.strip);
    }

    #[test]
    fn test_find_marker_custom_syntax() {
        let syntax = crate::Syntax {
            block_start: "%{".into(),
            block_end: "}%".into(),
            variable_start: "[[".into(),
            variable_end: "]]".into(),
            comment_start: "/*".into(),
            comment_end: "*/".into(),
            ..Default::default()
        };
        let syntax_config = syntax.compile().expect("failed to create syntax config");
        let tokenizer = Tokenizer::new("", false, syntax_config, Default::default());
        assert!(tokenizer.find_start_marker("/").is_none());
        assert!(tokenizer.find_start_marker("foo [").is_none());
        let (offset, marker) = tokenizer.find_start_marker("foo [[-").unwrap();
        assert_eq!(offset, 4);
        assert!(marker.strip);
        assert!(matches!(marker.kind, StartMarker::Variable));
        let (offset, marker) = tokenizer.find_start_marker("%{ x }%").unwrap();
        assert_eq!(offset, 0);
        assert!(matches!(marker.kind, StartMarker::Block));
    }

    #[test]
    fn test_is_basic_tag() {
        assert_eq!(skip_basic_tag(" raw %}", "raw", "%}"), Some((7, false)));
        assert_eq!(skip_basic_tag(" raw %}", "endraw", "%}"), None);
        assert_eq!(skip_basic_tag("  raw  %}", "raw", "%}"), Some((9, false)));
        assert_eq!(skip_basic_tag("-  raw  -%}", "raw", "%}"), Some((11, true)));
    }

    #[test]
    fn test_lstrip_block_helper() {
        assert_eq!(lstrip_block("foo\n  "), "foo\n");
        assert_eq!(lstrip_block("  "), "");
        assert_eq!(lstrip_block("foo  "), "foo  ");
    }

    #[test]
    fn test_basic_identifiers() {
        fn assert_ident(s: &str) {
            let (syntax, ws) = defaults();
            match tokenize(s, true, syntax, ws).next() {
                Some(Ok((Token::Ident(ident), _))) if ident == s => {}
                _ => panic!("did not get a matching token result: {s:?}"),
            }
        }

        fn assert_not_ident(s: &str) {
            let (syntax, ws) = defaults();
            let res = tokenize(s, true, syntax, ws).collect::<Result<Vec<_>, _>>();
            if let Ok(tokens) = res {
                if let &[(Token::Ident(_), _)] = &tokens[..] {
                    panic!("got a single ident for {s:?}")
                }
            }
        }

        assert_ident("foo_bar_baz");
        assert_ident("_foo_bar_baz");
        assert_ident("_42world");
        assert_ident("_world42");
        assert_ident("world42");
        assert_not_ident("42world");
    }
}
