//! <div align=center>
//!   <p><strong>Torii: a Jinja-compatible template engine for Rust</strong></p>
//! </div>
//!
//! Torii is a powerful but minimal dependency template engine for Rust which
//! is based on the syntax and behavior of the
//! [Jinja2](https://jinja.palletsprojects.com/) template engine for Python.
//! It's implemented on top of [`serde`].  The goal is to be able to render a
//! large chunk of the Jinja2 template ecosystem from Rust with a compact
//! engine and to leverage an already existing ecosystem of editor
//! integrations.
//!
//! ```jinja
//! {% for user in users %}
//!   <li>{{ user.name }}</li>
//! {% endfor %}
//! ```
//!
//! # Template Usage
//!
//! To use Torii one needs to create an [`Environment`] and populate it with
//! templates.  Afterwards templates can be loaded and rendered.  To pass
//! data one can pass any serde serializable value.  The [`context!`] macro
//! can be used to quickly construct a template context:
//!
//! ```
//! use torii::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_template("hello", "Hello {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! println!("{}", tmpl.render(context!(name => "John")).unwrap());
//! ```
//!
//! ```plain
//! Hello John!
//! ```
//!
//! For super trivial cases where you need to render a string once, you can
//! also use the [`render!`] macro which acts a bit like a replacement for
//! the [`format!`] macro.
//!
//! # Expression Usage
//!
//! Torii — like Jinja2 — allows to be used as expression language.  This can
//! be useful to express logic in configuration files or similar things.  For
//! this purpose the [`Environment::compile_expression`] method can be used.
//! It returns an expression object that can then be evaluated, returning the
//! result:
//!
//! ```
//! use torii::{Environment, context};
//!
//! let env = Environment::new();
//! let expr = env.compile_expression("number < 42").unwrap();
//! let result = expr.eval(context!(number => 23)).unwrap();
//! assert_eq!(result.is_true(), true);
//! ```
//!
//! # Custom Filters
//!
//! ```
//! use torii::{Environment, context};
//!
//! let mut env = Environment::new();
//! env.add_filter("repeat", |_state: &torii::State, s: String, n: usize| {
//!     s.repeat(n)
//! });
//! env.add_template("hello", "{{ 'Na '|repeat(3) }} {{ name }}!").unwrap();
//! let tmpl = env.get_template("hello").unwrap();
//! println!("{}", tmpl.render(context!(name => "Batman")).unwrap());
//! ```
//!
//! ```plain
//! Na Na Na Batman!
//! ```
//!
//! # Learn more
//!
//! - [`Environment`]: the main API entry point.  Teaches you how to
//!   configure the environment.
//! - [`Template`]: the template object API.  Shows you how templates can be
//!   rendered.
//! - [`filters`]: teaches you how to write custom filters and to see the
//!   list of built-in filters.
//! - [`tests`]: teaches you how to write custom test functions and to see
//!   the list of built-in tests.
//! - [`functions`]: teaches how to write custom functions and to see the
//!   list of built-in functions.
//! - [`sandbox`]: explains how untrusted templates can be restricted.
//!
//! # Optional Features
//!
//! There are some additional features that can be enabled:
//!
//! - `builtins`: if this feature is removed the default filters, tests and
//!   functions are not implemented.
//! - `debug`: if this feature is removed some debug functionality of the
//!   engine is removed as well.  This mainly affects the quality of error
//!   reporting.
//! - `unicode`: enables unicode identifiers via `unicode-ident`.
//! - `urlencode`: enables the `urlencode` filter (via `percent-encoding`).
//! - `json`: enables the `tojson` filter and JSON auto escaping (via
//!   `serde_json`).
//! - `speedups`: enables a faster HTML escaping implementation (via
//!   `v_htmlescape`).
#![allow(clippy::cognitive_complexity)]
#![allow(clippy::get_first)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]

#[macro_use]
mod macros;

mod compiler;
mod defaults;
mod environment;
mod error;
mod expression;
mod loader;
mod output;
mod syntax;
mod template;
mod utils;
mod vm;

pub mod filters;
pub mod functions;
pub mod sandbox;
pub mod tests;
pub mod value;

pub use self::defaults::{default_auto_escape_callback, escape_formatter};
pub use self::environment::{Environment, Policies};
pub use self::error::{Error, ErrorKind};
pub use self::expression::Expression;
pub use self::loader::{path_loader, Loader, TemplateSource};
pub use self::output::Output;
pub use self::syntax::Syntax;
pub use self::template::Template;
pub use self::utils::{AutoEscape, HtmlEscape, UndefinedBehavior};
pub use self::value::Value;
pub use self::vm::State;

pub use self::macros::__context;

/// This module gives access to the low level machinery.
///
/// This module does not have a stable interface.  It mostly exists for
/// internal testing purposes and for debugging.
#[doc(hidden)]
pub mod machinery {
    #![allow(missing_docs)]
    pub use crate::compiler::ast;
    pub use crate::compiler::codegen::CodeGenerator;
    pub use crate::compiler::instructions::{Instruction, Instructions};
    pub use crate::compiler::lexer::{tokenize, WhitespaceConfig};
    pub use crate::compiler::optimizer::optimize;
    pub use crate::compiler::parser::{parse, parse_expr};
    pub use crate::compiler::tokens::{Span, Token};
    pub use crate::vm::Vm;
}
