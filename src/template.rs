use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::compiler::codegen::CodeGenerator;
use crate::compiler::instructions::{Instructions, Str};
use crate::compiler::lexer::WhitespaceConfig;
use crate::compiler::optimizer;
use crate::compiler::parser::parse;
use crate::environment::Environment;
use crate::error::{attach_basic_debug_info, Error};
use crate::output::{native_concat, NullWriter, Output};
use crate::syntax::SyntaxConfig;
use crate::utils::AutoEscape;
use crate::value::Value;
use crate::vm::Vm;

/// Represents a compiled template in memory.
///
/// The compiled form is fully owned which allows templates to be cached,
/// shared between renders and evicted independently of the source they
/// were compiled from.
pub(crate) struct CompiledTemplate {
    pub instructions: Arc<Instructions>,
    pub blocks: BTreeMap<Str, Arc<Instructions>>,
}

impl fmt::Debug for CompiledTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledTemplate")
            .field("instructions", &self.instructions)
            .field("blocks", &self.blocks)
            .finish()
    }
}

impl CompiledTemplate {
    /// Compiles a template from name and source.
    pub fn new(
        name: &str,
        source: &str,
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
    ) -> Result<Arc<CompiledTemplate>, Error> {
        attach_basic_debug_info(
            Self::new_impl(name, source, syntax_config, whitespace_config),
            source,
        )
    }

    fn new_impl(
        name: &str,
        source: &str,
        syntax_config: SyntaxConfig,
        whitespace_config: WhitespaceConfig,
    ) -> Result<Arc<CompiledTemplate>, Error> {
        let mut ast = ok!(parse(source, name, syntax_config, whitespace_config));
        eprintln!("DEBUG ast = {:#?}", ast);
        optimizer::optimize(&mut ast);
        eprintln!("DEBUG ast after optimize = {:#?}", ast);
        let mut gen = CodeGenerator::new(name.into(), source.into());
        ok!(gen.compile_stmt(&ast));
        let (instructions, blocks) = gen.finish();
        eprintln!("DEBUG instructions = {:#?}", instructions);
        Ok(Arc::new(CompiledTemplate {
            instructions: Arc::new(instructions),
            blocks: blocks
                .into_iter()
                .map(|(name, instr)| (name, Arc::new(instr)))
                .collect(),
        }))
    }
}

/// Represents a handle to a template.
///
/// Templates are compiled into an internal instruction format and stored in
/// the [`Environment`].  The [`Environment::get_template`] method looks one
/// up and returns it in form of this handle, which can be cheaply cloned.
/// To render, the [`render`](Template::render) method can be used.
#[derive(Clone)]
pub struct Template<'env> {
    env: &'env Environment,
    compiled: Arc<CompiledTemplate>,
    initial_auto_escape: AutoEscape,
}

impl fmt::Debug for Template<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name())
            .field("instructions", &self.compiled.instructions)
            .field("blocks", &self.compiled.blocks)
            .field("initial_auto_escape", &self.initial_auto_escape)
            .finish()
    }
}

impl<'env> Template<'env> {
    pub(crate) fn new(
        env: &'env Environment,
        compiled: Arc<CompiledTemplate>,
        initial_auto_escape: AutoEscape,
    ) -> Template<'env> {
        Template {
            env,
            compiled,
            initial_auto_escape,
        }
    }

    /// Returns the name of the template.
    pub fn name(&self) -> &str {
        self.compiled.instructions.name()
    }

    /// Returns the source code of the template.
    pub fn source(&self) -> &str {
        self.compiled.instructions.source()
    }

    /// Renders the template into a string.
    ///
    /// The provided value is used as the initial context for the template.
    /// It can be any object that implements [`Serialize`](serde::Serialize).
    /// Typically custom structs annotated with `#[derive(Serialize)]` or the
    /// [`context!`](crate::context!) macro would be used for this purpose.
    ///
    /// ```
    /// # use torii::{Environment, context};
    /// # let mut env = Environment::new();
    /// # env.add_template("hello", "Hello {{ name }}!").unwrap();
    /// let tmpl = env.get_template("hello").unwrap();
    /// println!("{}", tmpl.render(context!(name => "John")).unwrap());
    /// ```
    pub fn render<S: Serialize>(&self, ctx: S) -> Result<String, Error> {
        // reduce total amount of code falling under monomorphization into
        // this function, and share the rest in _render.
        self._render(Value::from_serialize(&ctx))
    }

    fn _render(&self, root: Value) -> Result<String, Error> {
        let mut rv = String::new();
        let mut out = Output::with_string(&mut rv);
        let vm = Vm::new(self.env);
        ok!(vm.eval(
            self.compiled.instructions.clone(),
            root,
            &self.compiled.blocks,
            &mut out,
            self.initial_auto_escape,
        ));
        Ok(rv)
    }

    /// Renders the template into a native value.
    ///
    /// Where [`render`](Self::render) always produces a string, this
    /// evaluation mode returns a value of the type the template evaluated
    /// to: `{{ x + y }}` with integers in the context produces an integer.
    /// Templates that mix literal text and expressions concatenate into a
    /// string which, if it is shaped like a literal, is converted back into
    /// the corresponding value.
    ///
    /// ```
    /// # use torii::{Environment, context};
    /// # let mut env = Environment::new();
    /// # env.add_template("t", "{{ x + y }}").unwrap();
    /// let tmpl = env.get_template("t").unwrap();
    /// let rv = tmpl.render_native(context!(x => 4, y => 2)).unwrap();
    /// assert_eq!(rv, torii::value::Value::from(6));
    /// ```
    pub fn render_native<S: Serialize>(&self, ctx: S) -> Result<Value, Error> {
        self._render_native(Value::from_serialize(&ctx))
    }

    fn _render_native(&self, root: Value) -> Result<Value, Error> {
        let mut null = NullWriter;
        let mut out = Output::with_native_capture(&mut null);
        let vm = Vm::new(self.env);
        ok!(vm.eval(
            self.compiled.instructions.clone(),
            root,
            &self.compiled.blocks,
            &mut out,
            self.initial_auto_escape,
        ));
        Ok(native_concat(out.take_native_chunks()))
    }

    /// Returns the instructions and blocks.
    pub(crate) fn compiled(&self) -> &Arc<CompiledTemplate> {
        &self.compiled
    }

    /// Returns the initial auto escape setting.
    pub(crate) fn initial_auto_escape(&self) -> AutoEscape {
        self.initial_auto_escape
    }

    /// Returns the defined blocks of the template.
    pub fn blocks(&self) -> impl Iterator<Item = &str> {
        self.compiled.blocks.keys().map(|x| &**x)
    }
}
