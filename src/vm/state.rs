use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::compiler::instructions::{empty_instructions, Instructions, Str};
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::utils::{AutoEscape, UndefinedBehavior};
use crate::value::Value;
use crate::vm::context::Context;

/// Provides access to the current execution state of the engine.
///
/// A read only reference is passed to filter functions and similar objects
/// to allow limited interfacing with the engine.  The state is useful to
/// look up information about the engine in filter, test or global functions.
/// It not only provides access to the template environment but also the
/// context variables of the engine, the current auto escaping behavior as
/// well as the auto escape flag.
///
/// In some testing scenarios or more advanced use cases you might need to
/// get a [`State`].  The state is managed as part of the template execution
/// but an initial state can be retrieved via
/// [`Environment::empty_state`](crate::Environment::empty_state).  The most
/// common way to get hold of the state however is via functions or filters.
pub struct State<'env> {
    pub(crate) env: &'env Environment,
    pub(crate) ctx: Context,
    pub(crate) current_block: Option<Str>,
    pub(crate) auto_escape: AutoEscape,
    pub(crate) instructions: Arc<Instructions>,
    pub(crate) blocks: BTreeMap<Str, BlockStack>,
    pub(crate) loaded_templates: BTreeSet<Str>,
}

impl fmt::Debug for State<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ds = f.debug_struct("State");
        ds.field("name", &self.instructions.name());
        ds.field("current_block", &self.current_block);
        ds.field("auto_escape", &self.auto_escape);
        ds.field("ctx", &self.ctx);
        ds.finish()
    }
}

impl<'env> State<'env> {
    /// Creates a new state.
    pub(crate) fn new(
        env: &'env Environment,
        ctx: Context,
        auto_escape: AutoEscape,
        instructions: Arc<Instructions>,
        blocks: BTreeMap<Str, BlockStack>,
    ) -> State<'env> {
        State {
            env,
            ctx,
            current_block: None,
            auto_escape,
            instructions,
            blocks,
            loaded_templates: BTreeSet::new(),
        }
    }

    /// Creates an empty state for an environment.
    pub(crate) fn new_for_env(env: &'env Environment) -> State<'env> {
        State::new(
            env,
            Context::default(),
            AutoEscape::None,
            empty_instructions(),
            BTreeMap::new(),
        )
    }

    /// Returns a reference to the current environment.
    #[inline(always)]
    pub fn env(&self) -> &Environment {
        self.env
    }

    /// Returns the name of the current template.
    pub fn name(&self) -> &str {
        self.instructions.name()
    }

    /// Returns the current value of the auto escape flag.
    #[inline(always)]
    pub fn auto_escape(&self) -> AutoEscape {
        self.auto_escape
    }

    /// Returns the current undefined behavior.
    #[inline(always)]
    pub fn undefined_behavior(&self) -> UndefinedBehavior {
        self.env.undefined_behavior()
    }

    /// Returns the name of the innermost block.
    #[inline(always)]
    pub fn current_block(&self) -> Option<&str> {
        self.current_block.as_deref()
    }

    /// Looks up a variable by name in the context.
    #[inline(always)]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        self.ctx.load(self.env, name)
    }

    /// Applies a filter by name to the given arguments.
    ///
    /// The first argument is the value the filter is applied to.
    pub fn apply_filter(&self, name: &str, args: &[Value]) -> Result<Value, Error> {
        match self.env.get_filter(name) {
            Some(filter) => filter.apply_to(self, args),
            None => Err(Error::new(
                ErrorKind::UnknownFilter,
                format!("filter {name} is unknown"),
            )),
        }
    }

    /// Performs a test by name on the given arguments.
    ///
    /// The first argument is the value the test is performed on.
    pub fn perform_test(&self, name: &str, args: &[Value]) -> Result<bool, Error> {
        match self.env.get_test(name) {
            Some(test) => test.perform(self, args),
            None => Err(Error::new(
                ErrorKind::UnknownTest,
                format!("test {name} is unknown"),
            )),
        }
    }
}

/// Tracks a block and its parents for super invocations.
#[derive(Default)]
pub(crate) struct BlockStack {
    instructions: Vec<Arc<Instructions>>,
    depth: usize,
}

impl BlockStack {
    pub fn new(instructions: Arc<Instructions>) -> BlockStack {
        BlockStack {
            instructions: vec![instructions],
            depth: 0,
        }
    }

    pub fn instructions(&self) -> Arc<Instructions> {
        self.instructions
            .get(self.depth)
            .cloned()
            .expect("block stack is empty")
    }

    pub fn push(&mut self) -> bool {
        if self.depth + 1 < self.instructions.len() {
            self.depth += 1;
            true
        } else {
            false
        }
    }

    #[track_caller]
    pub fn pop(&mut self) {
        self.depth = self.depth.checked_sub(1).expect("block stack unbalanced")
    }

    pub fn append_instructions(&mut self, instructions: Arc<Instructions>) {
        self.instructions.push(instructions);
    }

    /// True if the effective block is only a required declaration that was
    /// never overridden.
    pub fn is_unresolved_required(&self) -> bool {
        self.instructions.len() == 1 && self.instructions[0].required_block
    }
}
