use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::compiler::instructions::Str;
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::value::{Value, ValueIterator};
use crate::vm::loop_object::Loop;

type Locals = BTreeMap<Str, Value>;

/// The maximum number of stacked frames before a render fails.
///
/// Recursive includes and macro calls count extra so that pathological
/// templates fail early rather than blowing the real stack.
const MAX_RECURSION: usize = 500;

pub(crate) struct LoopState {
    pub(crate) with_loop_var: bool,
    pub(crate) recurse_jump_target: Option<usize>,
    // if we're popping the frame, do we want to jump somewhere?  The
    // first item is the target jump instruction, the second argument
    // tells us if we need to end capturing.
    pub(crate) current_recursion_jump: Option<(usize, bool)>,
    pub(crate) iterator: ValueIterator,
    pub(crate) object: Arc<Loop>,
}

pub(crate) struct Frame {
    pub(crate) locals: Locals,
    pub(crate) ctx: Value,
    pub(crate) current_loop: Option<LoopState>,
}

impl Default for Frame {
    fn default() -> Frame {
        Frame::new(Value::UNDEFINED)
    }
}

impl Frame {
    pub fn new(ctx: Value) -> Frame {
        Frame {
            locals: Locals::new(),
            ctx,
            current_loop: None,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut m = f.debug_map();
        m.entries(self.locals.iter());
        if let Some(LoopState {
            object: ref controller,
            ..
        }) = self.current_loop
        {
            m.entry(&"loop", controller);
        }
        if let Ok(pairs) = self.ctx.try_iter_pairs() {
            for (key, value) in pairs {
                m.entry(&key, &value);
            }
        }
        m.finish()
    }
}

#[derive(Default, Debug)]
pub(crate) struct Stack {
    values: Vec<Value>,
}

impl Stack {
    pub fn push(&mut self, arg: Value) {
        self.values.push(arg);
    }

    #[track_caller]
    pub fn pop(&mut self) -> Value {
        self.values.pop().expect("stack was empty")
    }

    pub fn slice_top(&mut self, n: usize) -> &[Value] {
        &self.values[self.values.len() - n..]
    }

    pub fn drop_top(&mut self, n: usize) {
        self.values.truncate(self.values.len() - n);
    }

    pub fn try_pop(&mut self) -> Option<Value> {
        self.values.pop()
    }

    #[track_caller]
    pub fn peek(&self) -> &Value {
        self.values.last().expect("stack was empty")
    }
}

impl From<Vec<Value>> for Stack {
    fn from(values: Vec<Value>) -> Stack {
        Stack { values }
    }
}

pub(crate) struct Context {
    stack: Vec<Frame>,
    outer_stack_depth: usize,
}

impl Default for Context {
    fn default() -> Context {
        Context::new(Frame::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn dump<'a>(
            m: &mut std::fmt::DebugMap,
            seen: &mut HashSet<String>,
            ctx: &'a Context,
        ) -> fmt::Result {
            for frame in ctx.stack.iter().rev() {
                for (key, value) in frame.locals.iter() {
                    if seen.insert(key.to_string()) {
                        m.entry(&&**key, value);
                    }
                }

                if let Some(ref l) = frame.current_loop {
                    if l.with_loop_var && seen.insert("loop".into()) {
                        m.entry(&"loop", &l.object);
                    }
                }

                if let Ok(pairs) = frame.ctx.try_iter_pairs() {
                    for (key, value) in pairs {
                        if seen.insert(key.to_string()) {
                            m.entry(&key, &value);
                        }
                    }
                }
            }
            Ok(())
        }

        let mut m = f.debug_map();
        let mut seen = HashSet::new();
        ok!(dump(&mut m, &mut seen, self));
        m.finish()
    }
}

impl Context {
    /// Creates a context
    pub fn new(frame: Frame) -> Context {
        Context {
            stack: vec![frame],
            outer_stack_depth: 0,
        }
    }

    /// Stores a variable in the context.
    pub fn store(&mut self, key: Str, value: Value) {
        self.stack.last_mut().unwrap().locals.insert(key, value);
    }

    /// Looks up a variable in the context.
    pub fn load(&self, env: &Environment, key: &str) -> Option<Value> {
        for frame in self.stack.iter().rev() {
            // look at locals first
            if let Some(value) = frame.locals.get(key) {
                return Some(value.clone());
            }

            // if we are a loop, check if we are looking up the special loop var.
            if let Some(ref l) = frame.current_loop {
                if l.with_loop_var && key == "loop" {
                    return Some(Value::from_dyn_object(l.object.clone()));
                }
            }

            // if the frame context is undefined, we skip the lookup
            if !frame.ctx.is_undefined() {
                if let Ok(rv) = frame.ctx.get_attr(key) {
                    if !rv.is_undefined() {
                        return Some(rv);
                    }
                }
            }
        }

        env.get_global(key)
    }

    /// Pushes a new layer.
    pub fn push_frame(&mut self, layer: Frame) -> Result<(), Error> {
        ok!(self.check_depth());
        self.stack.push(layer);
        Ok(())
    }

    /// Pops the topmost layer.
    #[track_caller]
    pub fn pop_frame(&mut self) -> Frame {
        self.stack.pop().expect("pop from empty context stack")
    }

    /// Returns the current locals.
    pub fn current_locals(&mut self) -> &mut BTreeMap<Str, Value> {
        &mut self.stack.last_mut().unwrap().locals
    }

    /// Returns the current innermost loop.
    pub fn current_loop(&mut self) -> Option<&mut LoopState> {
        self.stack
            .iter_mut()
            .rev()
            .filter_map(|x| x.current_loop.as_mut())
            .next()
    }

    /// Captures all currently visible variables into a map.
    ///
    /// This is used for imports and includes that carry the context along:
    /// the receiving template gets a frozen snapshot rather than a live
    /// view, which keeps each render the single owner of its own stack.
    pub fn freeze(&self, env: &Environment) -> Value {
        let _ = env;
        let mut rv = BTreeMap::new();
        for frame in self.stack.iter() {
            if let Ok(pairs) = frame.ctx.try_iter_pairs() {
                for (key, value) in pairs {
                    rv.insert(key, value);
                }
            }
            if let Some(ref l) = frame.current_loop {
                if l.with_loop_var {
                    rv.insert(
                        Value::from("loop"),
                        Value::from_dyn_object(l.object.clone()),
                    );
                }
            }
            for (key, value) in frame.locals.iter() {
                rv.insert(Value::from(&**key), value.clone());
            }
        }
        Value::from_map(Arc::new(rv))
    }

    /// The real depth of the context.
    pub fn depth(&self) -> usize {
        self.outer_stack_depth + self.stack.len()
    }

    /// Increase the stack depth.
    pub fn incr_depth(&mut self, delta: usize) -> Result<(), Error> {
        self.outer_stack_depth += delta;
        self.check_depth()
    }

    /// Decrease the stack depth.
    pub fn decr_depth(&mut self, delta: usize) {
        self.outer_stack_depth -= delta;
    }

    fn check_depth(&self) -> Result<(), Error> {
        if self.depth() > MAX_RECURSION {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "recursion limit exceeded",
            ));
        }
        Ok(())
    }
}
