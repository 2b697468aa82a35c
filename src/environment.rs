use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::compiler::lexer::WhitespaceConfig;
use crate::defaults;
use crate::error::{attach_basic_debug_info, Error};
use crate::expression::Expression;
use crate::filters::{BoxedFilter, Filter};
use crate::functions::{self, Function};
use crate::loader::{Loader, TemplateStore};
use crate::output::Output;
use crate::sandbox::{DefaultSandboxPolicy, SandboxPolicy};
use crate::syntax::{Syntax, SyntaxConfig};
use crate::template::{CompiledTemplate, Template};
use crate::tests::{BoxedTest, Test};
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::{ArgType, FunctionArgs, FunctionResult, Value};
use crate::vm::State;

type AutoEscapeFunc = dyn Fn(&str) -> AutoEscape + Sync + Send;
type FormatterFunc = dyn Fn(&mut Output, &State, &Value) -> Result<(), Error> + Sync + Send;
type GettextFunc = dyn Fn(&str) -> String + Sync + Send;
type NgettextFunc = dyn Fn(&str, &str, i64) -> String + Sync + Send;

/// The type of a custom JSON serialization function.
pub type JsonDumpsFunc = dyn Fn(&Value) -> Result<String, Error> + Sync + Send;

/// Configuration knobs with enumerated options.
///
/// Policies influence the behavior of some built-in filters and the
/// translation machinery without changing the template language itself.
#[derive(Clone)]
pub struct Policies {
    /// How many extra characters `|truncate` tolerates before actually
    /// truncating.  Defaults to 5.
    pub truncate_leeway: usize,
    /// The `rel` attribute `|urlize` puts on generated links.  Always
    /// applied; defaults to `"noopener"`.
    pub urlize_rel: String,
    /// An optional `target` attribute for `|urlize` links.
    pub urlize_target: Option<String>,
    /// Extra URL schemes `|urlize` recognizes in addition to `http://`,
    /// `https://` and `mailto:`.
    pub urlize_extra_schemes: Vec<String>,
    /// Whether `|tojson` sorts object keys.  Defaults to true.
    pub json_sort_keys: bool,
    /// An optional replacement serializer for `|tojson`.
    pub json_dumps_function: Option<Arc<JsonDumpsFunc>>,
    /// When enabled, whitespace in `{% trans %}` blocks is unified before
    /// the messages are looked up.
    pub i18n_trimmed: bool,
}

impl fmt::Debug for Policies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Policies")
            .field("truncate_leeway", &self.truncate_leeway)
            .field("urlize_rel", &self.urlize_rel)
            .field("urlize_target", &self.urlize_target)
            .field("urlize_extra_schemes", &self.urlize_extra_schemes)
            .field("json_sort_keys", &self.json_sort_keys)
            .field(
                "json_dumps_function",
                &self.json_dumps_function.as_ref().map(|_| "..."),
            )
            .field("i18n_trimmed", &self.i18n_trimmed)
            .finish()
    }
}

impl Default for Policies {
    fn default() -> Policies {
        Policies {
            truncate_leeway: 5,
            urlize_rel: "noopener".into(),
            urlize_target: None,
            urlize_extra_schemes: Vec::new(),
            json_sort_keys: true,
            json_dumps_function: None,
            i18n_trimmed: false,
        }
    }
}

/// An abstraction that holds the engine configuration.
///
/// This object holds the central configuration state for templates.  It is
/// also the container for all loaded templates.
///
/// The environment, once configured, is conceptually immutable: concurrent
/// renders may share it freely, but mutating it after the first template
/// has been compiled leads to surprising results and should be avoided.
///
/// There are generally two ways to construct an environment:
///
/// * [`Environment::new`] creates an environment preconfigured with
///   sensible defaults.  It will contain all built-in filters, tests and
///   globals as well as a callback for auto escaping based on file
///   extension.
/// * [`Environment::empty`] creates a completely blank environment.
#[derive(Clone)]
pub struct Environment {
    templates: TemplateStore,
    filters: BTreeMap<Cow<'static, str>, BoxedFilter>,
    tests: BTreeMap<Cow<'static, str>, BoxedTest>,
    globals: BTreeMap<Cow<'static, str>, Value>,
    default_auto_escape: Arc<AutoEscapeFunc>,
    undefined_behavior: UndefinedBehavior,
    formatter: Arc<FormatterFunc>,
    syntax_config: SyntaxConfig,
    whitespace_config: WhitespaceConfig,
    sandbox: Option<Arc<dyn SandboxPolicy>>,
    policies: Policies,
    gettext: Option<Arc<GettextFunc>>,
    ngettext: Option<Arc<NgettextFunc>>,
    #[cfg(feature = "debug")]
    debug: bool,
}

impl Default for Environment {
    fn default() -> Self {
        Environment::empty()
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("globals", &self.globals.keys())
            .field("tests", &self.tests.keys())
            .field("filters", &self.filters.keys())
            .field("templates", &self.templates)
            .finish()
    }
}

impl Environment {
    /// Creates a new environment with sensible defaults.
    ///
    /// This environment does not yet contain any templates but it will have
    /// all the default filters, tests and globals loaded.  If you do not
    /// want any default configuration you can use the alternative
    /// [`empty`](Environment::empty) method.
    pub fn new() -> Environment {
        Environment {
            templates: TemplateStore::default(),
            filters: defaults::get_builtin_filters(),
            tests: defaults::get_builtin_tests(),
            globals: defaults::get_globals(),
            default_auto_escape: Arc::new(defaults::default_auto_escape_callback),
            undefined_behavior: UndefinedBehavior::default(),
            formatter: Arc::new(defaults::escape_formatter),
            syntax_config: SyntaxConfig::default(),
            whitespace_config: WhitespaceConfig::default(),
            sandbox: None,
            policies: Policies::default(),
            gettext: None,
            ngettext: None,
            #[cfg(feature = "debug")]
            debug: false,
        }
    }

    /// Creates a completely empty environment.
    ///
    /// This environment has no filters, no templates, no globals and no
    /// default logic for auto escaping configured.
    pub fn empty() -> Environment {
        Environment {
            templates: TemplateStore::default(),
            filters: Default::default(),
            tests: Default::default(),
            globals: Default::default(),
            default_auto_escape: Arc::new(defaults::no_auto_escape),
            undefined_behavior: UndefinedBehavior::default(),
            formatter: Arc::new(defaults::escape_formatter),
            syntax_config: SyntaxConfig::default(),
            whitespace_config: WhitespaceConfig::default(),
            sandbox: None,
            policies: Policies::default(),
            gettext: None,
            ngettext: None,
            #[cfg(feature = "debug")]
            debug: false,
        }
    }

    /// Creates an environment with the default sandbox installed.
    ///
    /// This is a convenience for `Environment::new()` followed by
    /// [`set_sandbox`](Self::set_sandbox) with the
    /// [`DefaultSandboxPolicy`].
    pub fn sandboxed() -> Environment {
        let mut env = Environment::new();
        env.set_sandbox(Arc::new(DefaultSandboxPolicy::new()));
        env
    }

    /// Loads a template from a string.
    ///
    /// The `name` parameter defines the name of the template which
    /// identifies it.  To look up a loaded template use the
    /// [`get_template`](Self::get_template) method.
    pub fn add_template(&mut self, name: &str, source: &str) -> Result<(), Error> {
        let compiled = ok!(CompiledTemplate::new(
            name,
            source,
            self.syntax_config.clone(),
            self.whitespace_config,
        ));
        self.templates.explicit.insert(name.into(), compiled);
        Ok(())
    }

    /// Removes a template by name.
    pub fn remove_template(&mut self, name: &str) {
        self.templates.explicit.remove(name);
        self.templates.cache.clear();
    }

    /// Removes all stored templates and cached compilation results.
    ///
    /// This is the one cache management API of the engine; there is no
    /// process wide state anywhere else.
    pub fn clear_caches(&mut self) {
        self.templates.explicit.clear();
        self.templates.cache.clear();
    }

    /// Sets a loader that is invoked for unknown templates.
    ///
    /// Loader backed templates are compiled on first use and retained in a
    /// bounded least-recently-used cache.  On every cache hit the loader's
    /// uptodate probe (if one was provided) is consulted and stale entries
    /// are recompiled transparently.
    pub fn set_loader<L: Loader + 'static>(&mut self, loader: L) {
        self.templates.loader = Some(Arc::new(loader));
    }

    /// Fetches a template by name.
    ///
    /// This requires that the template has been loaded with
    /// [`add_template`](Environment::add_template) beforehand or that a
    /// loader knows it.  If the template was not found an error of kind
    /// `TemplateNotFound` is returned.
    pub fn get_template(&self, name: &str) -> Result<Template<'_>, Error> {
        if let Some(compiled) = self.templates.explicit.get(name) {
            return Ok(Template::new(
                self,
                compiled.clone(),
                (self.default_auto_escape)(name),
            ));
        }
        if let Some(ref loader) = self.templates.loader {
            if let Some(compiled) = self.templates.cache.get(name) {
                return Ok(Template::new(
                    self,
                    compiled,
                    (self.default_auto_escape)(name),
                ));
            }
            if let Some(source) = ok!(loader.get_source(name)) {
                let compiled = ok!(CompiledTemplate::new(
                    name,
                    &source.source,
                    self.syntax_config.clone(),
                    self.whitespace_config,
                ));
                let compiled =
                    self.templates
                        .cache
                        .setdefault(name.into(), compiled, source.uptodate);
                return Ok(Template::new(
                    self,
                    compiled,
                    (self.default_auto_escape)(name),
                ));
            }
        }
        Err(Error::new_not_found(name))
    }

    /// Returns the names of all known templates.
    ///
    /// This includes explicitly added templates and whatever the loader
    /// enumerates.
    pub fn list_templates(&self) -> Vec<String> {
        let mut rv: Vec<String> = self
            .templates
            .explicit
            .keys()
            .map(|x| x.to_string())
            .collect();
        if let Some(ref loader) = self.templates.loader {
            rv.extend(loader.list_templates());
        }
        rv.sort();
        rv.dedup();
        rv
    }

    /// Parses and renders a template from a string in one go.
    ///
    /// In some cases you really only need to render a template once and
    /// statically loading it into the environment first is an unnecessary
    /// step.  Note that templates rendered this way cannot use `extends`
    /// or `include` unless the referenced templates are known to the
    /// environment.
    pub fn render_str<S: Serialize>(&self, source: &str, ctx: S) -> Result<String, Error> {
        self.render_named_str("<string>", source, ctx)
    }

    /// Like [`render_str`](Self::render_str) but with a provided name.
    pub fn render_named_str<S: Serialize>(
        &self,
        name: &str,
        source: &str,
        ctx: S,
    ) -> Result<String, Error> {
        let compiled = ok!(CompiledTemplate::new(
            name,
            source,
            self.syntax_config.clone(),
            self.whitespace_config,
        ));
        Template::new(self, compiled, (self.default_auto_escape)(name)).render(ctx)
    }

    /// Compiles an expression.
    ///
    /// This lets one compile an expression in the template language and
    /// evaluate it later.  This allows the expressions of the language
    /// to be used as a minimal scripting language.  For more information
    /// and an example see [`Expression`].
    pub fn compile_expression(&self, expr: &str) -> Result<Expression<'_>, Error> {
        attach_basic_debug_info(Expression::compile(self, expr), expr)
    }

    /// Adds a new filter function.
    ///
    /// For details about filters have a look at [`filters`](crate::filters).
    pub fn add_filter<N, F, V, Rv, Args>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        V: for<'a> ArgType<'a>,
        Rv: FunctionResult,
        F: Filter<V, Rv, Args>,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.filters.insert(name.into(), BoxedFilter::new(f));
    }

    /// Removes a filter by name.
    pub fn remove_filter(&mut self, name: &str) {
        self.filters.remove(name);
    }

    /// Adds a new test function.
    ///
    /// For details about tests have a look at [`tests`](crate::tests).
    pub fn add_test<N, F, V, Args>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        V: for<'a> ArgType<'a>,
        F: Test<V, Args>,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.tests.insert(name.into(), BoxedTest::new(f));
    }

    /// Removes a test by name.
    pub fn remove_test(&mut self, name: &str) {
        self.tests.remove(name);
    }

    /// Adds a new global function.
    ///
    /// For details about functions have a look at
    /// [`functions`](crate::functions).  Note that functions and other
    /// global variables share the same namespace.
    pub fn add_function<N, F, Rv, Args>(&mut self, name: N, f: F)
    where
        N: Into<Cow<'static, str>>,
        Rv: FunctionResult,
        F: Function<Rv, Args>,
        Args: for<'a> FunctionArgs<'a>,
    {
        self.add_global(name, functions::BoxedFunction::new(f).to_value());
    }

    /// Adds a global variable.
    pub fn add_global<N: Into<Cow<'static, str>>>(&mut self, name: N, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Removes a global function or variable by name.
    pub fn remove_global(&mut self, name: &str) {
        self.globals.remove(name);
    }

    /// Sets a new function to select the default auto escaping.
    ///
    /// This function is invoked when templates are loaded from the
    /// environment to determine the default auto escaping behavior.  The
    /// function is invoked with the name of the template and can make an
    /// initial auto escaping decision based on that.  The default
    /// implementation is to turn on escaping depending on the file
    /// extension (see
    /// [`default_auto_escape_callback`](crate::default_auto_escape_callback)).
    pub fn set_auto_escape_callback<F: Fn(&str) -> AutoEscape + 'static + Sync + Send>(
        &mut self,
        f: F,
    ) {
        self.default_auto_escape = Arc::new(f);
    }

    /// Changes the undefined behavior.
    ///
    /// This changes the runtime behavior of undefined values in the
    /// template engine.  For more information see [`UndefinedBehavior`].
    /// The default is [`UndefinedBehavior::Lenient`].
    pub fn set_undefined_behavior(&mut self, behavior: UndefinedBehavior) {
        self.undefined_behavior = behavior;
    }

    /// Returns the current undefined behavior.
    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.undefined_behavior
    }

    /// Sets a different formatter function.
    ///
    /// The formatter is invoked to format the given value into the provided
    /// [`Output`].  The default implementation is
    /// [`escape_formatter`](crate::escape_formatter), which escapes the
    /// value according to the active auto escaping mode.
    pub fn set_formatter<F>(&mut self, f: F)
    where
        F: Fn(&mut Output, &State, &Value) -> Result<(), Error> + 'static + Sync + Send,
    {
        self.formatter = Arc::new(f);
    }

    /// Reconfigures the syntax of the environment.
    ///
    /// Note that templates are compiled when they are added, so this only
    /// affects templates added afterwards.
    pub fn set_syntax(&mut self, syntax: Syntax) -> Result<(), Error> {
        self.syntax_config = ok!(syntax.compile());
        Ok(())
    }

    /// Returns the current syntax.
    pub fn syntax(&self) -> &Syntax {
        &self.syntax_config.syntax
    }

    /// Preserve the trailing newline when rendering templates.
    ///
    /// The default is `false`, which causes a single newline, if present,
    /// to be stripped from the end of the template.
    pub fn set_keep_trailing_newline(&mut self, yes: bool) {
        self.whitespace_config.keep_trailing_newline = yes;
    }

    /// Returns the value of the trailing newline preservation flag.
    pub fn keep_trailing_newline(&self) -> bool {
        self.whitespace_config.keep_trailing_newline
    }

    /// Remove the first newline after a block.
    ///
    /// If this is set to `true` then the first newline after a block is
    /// removed (block, not variable tag!).  Defaults to `false`.
    pub fn set_trim_blocks(&mut self, yes: bool) {
        self.whitespace_config.trim_blocks = yes;
    }

    /// Returns the value of the trim blocks flag.
    pub fn trim_blocks(&self) -> bool {
        self.whitespace_config.trim_blocks
    }

    /// Remove leading spaces and tabs from the start of a line to a block.
    ///
    /// If this is set to `true` then leading whitespace is removed from the
    /// start of a line to a block tag.  Defaults to `false`.
    pub fn set_lstrip_blocks(&mut self, yes: bool) {
        self.whitespace_config.lstrip_blocks = yes;
    }

    /// Returns the value of the lstrip blocks flag.
    pub fn lstrip_blocks(&self) -> bool {
        self.whitespace_config.lstrip_blocks
    }

    /// Installs a sandbox policy.
    ///
    /// Once a policy is installed, attribute access, calls and (depending
    /// on the policy) operators are routed through it.  Violations raise
    /// errors of kind [`SecurityError`](crate::ErrorKind::SecurityError).
    pub fn set_sandbox(&mut self, policy: Arc<dyn SandboxPolicy>) {
        self.sandbox = Some(policy);
    }

    /// Removes the sandbox policy again.
    pub fn remove_sandbox(&mut self) {
        self.sandbox = None;
    }

    pub(crate) fn sandbox(&self) -> Option<&dyn SandboxPolicy> {
        self.sandbox.as_deref()
    }

    /// Gives access to the policies of the environment.
    pub fn policies(&self) -> &Policies {
        &self.policies
    }

    /// Gives mutable access to the policies of the environment.
    pub fn policies_mut(&mut self) -> &mut Policies {
        &mut self.policies
    }

    /// Registers the translation callback used by `{% trans %}` blocks.
    pub fn set_gettext_callback<F: Fn(&str) -> String + 'static + Sync + Send>(&mut self, f: F) {
        self.gettext = Some(Arc::new(f));
    }

    /// Registers the plural aware translation callback used by
    /// `{% trans %}` blocks with a `{% pluralize %}` clause.
    pub fn set_ngettext_callback<F: Fn(&str, &str, i64) -> String + 'static + Sync + Send>(
        &mut self,
        f: F,
    ) {
        self.ngettext = Some(Arc::new(f));
    }

    pub(crate) fn gettext(&self, msg: &str) -> String {
        match self.gettext {
            Some(ref f) => f(msg),
            None => msg.to_string(),
        }
    }

    pub(crate) fn ngettext(&self, singular: &str, plural: &str, n: i64) -> String {
        match self.ngettext {
            Some(ref f) => f(singular, plural, n),
            None => {
                if n == 1 {
                    singular.to_string()
                } else {
                    plural.to_string()
                }
            }
        }
    }

    /// Enable or disable the debug mode.
    ///
    /// When the debug mode is enabled the engine will dump out some of the
    /// execution state together with the source information of the
    /// executing template when an error is created.  The cost of this is
    /// relatively high as the data including the template source is cloned.
    #[cfg(feature = "debug")]
    #[cfg_attr(docsrs, doc(cfg(feature = "debug")))]
    pub fn set_debug(&mut self, enabled: bool) {
        self.debug = enabled;
    }

    #[cfg(feature = "debug")]
    pub(crate) fn debug(&self) -> bool {
        self.debug
    }

    /// Looks up a filter.
    pub(crate) fn get_filter(&self, name: &str) -> Option<&BoxedFilter> {
        self.filters.get(name)
    }

    /// Looks up a test function.
    pub(crate) fn get_test(&self, name: &str) -> Option<&BoxedTest> {
        self.tests.get(name)
    }

    /// Looks up a global.
    pub(crate) fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Formats a value into the output with the configured formatter.
    pub(crate) fn format(
        &self,
        value: &Value,
        state: &State,
        out: &mut Output,
    ) -> Result<(), Error> {
        (self.formatter)(out, state, value)
    }

    /// Returns an empty [`State`] for testing purposes and similar.
    pub fn empty_state(&self) -> State<'_> {
        State::new_for_env(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context;

    use similar_asserts::assert_eq;

    #[test]
    fn test_basic() {
        let mut env = Environment::new();
        env.add_template("test", "{% for x in seq %}[{{ x }}]{% endfor %}")
            .unwrap();
        let t = env.get_template("test").unwrap();
        let rv = t.render(context!(seq => vec![0, 1, 2])).unwrap();
        assert_eq!(rv, "[0][1][2]");
    }

    #[test]
    fn test_clone() {
        let mut env = Environment::new();
        env.add_template("test", "a").unwrap();
        let mut env2 = env.clone();
        assert_eq!(env2.get_template("test").unwrap().render(()).unwrap(), "a");
        env2.add_template("test", "b").unwrap();
        assert_eq!(env2.get_template("test").unwrap().render(()).unwrap(), "b");
        assert_eq!(env.get_template("test").unwrap().render(()).unwrap(), "a");
    }

    #[test]
    fn test_globals() {
        let mut env = Environment::new();
        env.add_global("a", Value::from(42));
        env.add_template("test", "{{ a }}").unwrap();
        let tmpl = env.get_template("test").unwrap();
        assert_eq!(tmpl.render(()).unwrap(), "42");
    }

    #[test]
    fn test_loader_and_cache() {
        let mut env = Environment::new();
        env.set_loader(|name: &str| {
            if name == "dynamic" {
                Ok(Some("dynamic template".to_string()))
            } else {
                Ok(None)
            }
        });
        let rv = env.get_template("dynamic").unwrap().render(()).unwrap();
        assert_eq!(rv, "dynamic template");
        let err = env.get_template("missing").unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::TemplateNotFound);
    }
}
