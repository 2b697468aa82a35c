use std::collections::BTreeMap;
use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::compiler::ast::CompareOp;
use crate::compiler::instructions::{
    CaptureMode, Instruction, Instructions, Str, TransData, LOOP_FLAG_RECURSIVE,
    LOOP_FLAG_WITH_LOOP_VAR,
};
use crate::environment::Environment;
use crate::error::{Error, ErrorKind};
use crate::output::Output;
use crate::utils::{AutoEscape, HtmlEscape, UndefinedBehavior};
use crate::value::{ops, Value, ValueMap, ValueRepr};
use crate::vm::context::{Context, Frame, LoopState, Stack};
use crate::vm::loop_object::Loop;
use crate::vm::macro_object::{Macro, MacroData};
use crate::vm::state::BlockStack;

pub use crate::vm::state::State;

mod context;
mod loop_object;
mod macro_object;
mod state;

// the cost of a single include against the recursion limit.
const INCLUDE_RECURSION_COST: usize = 10;

/// Helps to evaluate something.
pub struct Vm<'env> {
    env: &'env Environment,
}

pub(crate) fn prepare_blocks(
    blocks: &BTreeMap<Str, Arc<Instructions>>,
) -> BTreeMap<Str, BlockStack> {
    blocks
        .iter()
        .map(|(name, instr)| (name.clone(), BlockStack::new(instr.clone())))
        .collect()
}

impl<'env> Vm<'env> {
    /// Creates a new VM.
    pub fn new(env: &'env Environment) -> Vm<'env> {
        Vm { env }
    }

    /// Evaluates the given inputs.
    pub fn eval(
        &self,
        instructions: Arc<Instructions>,
        root: Value,
        blocks: &BTreeMap<Str, Arc<Instructions>>,
        out: &mut Output,
        auto_escape: AutoEscape,
    ) -> Result<Option<Value>, Error> {
        let mut state = State::new(
            self.env,
            Context::new(Frame::new(root)),
            auto_escape,
            instructions,
            prepare_blocks(blocks),
        );
        self.eval_state(&mut state, out)
    }

    /// Evaluate a macro in a state.
    pub(crate) fn eval_macro(
        &self,
        instructions: Arc<Instructions>,
        pc: usize,
        root: Value,
        out: &mut Output,
        state: &State,
        args: Vec<Value>,
    ) -> Result<Option<Value>, Error> {
        let mut ctx = Context::new(Frame::new(root));
        ok!(ctx.incr_depth(state.ctx.depth()));
        let mut new_state = State::new(
            self.env,
            ctx,
            state.auto_escape(),
            instructions,
            BTreeMap::new(),
        );
        self.eval_impl(&mut new_state, out, Stack::from(args), pc)
    }

    /// This is the actual evaluation loop that works with a specific context.
    #[inline(always)]
    fn eval_state(
        &self,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<Option<Value>, Error> {
        self.eval_impl(state, out, Stack::default(), 0)
    }

    fn eval_impl(
        &self,
        state: &mut State<'env>,
        out: &mut Output,
        mut stack: Stack,
        mut pc: usize,
    ) -> Result<Option<Value>, Error> {
        let initial_auto_escape = state.auto_escape;
        let undefined_behavior = state.undefined_behavior();
        let mut auto_escape_stack = vec![];
        let mut next_loop_recursion_jump = None;

        // If we are extending we are holding the instructions of the target
        // parent template here.  This is used to detect multiple extends and
        // the evaluation uses these instructions when RenderParent is
        // reached.
        let mut parent_instructions: Option<Arc<Instructions>> = None;

        macro_rules! recurse_loop {
            ($capture:expr) => {{
                let jump_target = ctx_ok!(self.prepare_loop_recursion(state));
                // the way this works is that we remember the next instruction
                // as loop exit jump target.  Whenever a loop is pushed, it
                // memorizes the value in `next_loop_recursion_jump` to jump
                // to.
                next_loop_recursion_jump = Some((pc + 1, $capture));
                if $capture {
                    out.begin_capture(CaptureMode::Capture);
                }
                pc = jump_target;
                continue;
            }};
        }

        loop {
            // the instructions of the state may be swapped out while an
            // include or an extended template is being evaluated; holding
            // on to the reference counted set keeps the borrow valid.
            let instructions = state.instructions.clone();
            let instr = match instructions.get(pc) {
                Some(instr) => instr,
                None => break,
            };

            let a;
            let b;
            let mut err;

            macro_rules! bail {
                ($err:expr) => {{
                    err = $err;
                    process_err(&mut err, pc, state);
                    return Err(err);
                }};
            }

            macro_rules! ctx_ok {
                ($expr:expr) => {
                    match $expr {
                        Ok(rv) => rv,
                        Err(err) => bail!(err),
                    }
                };
            }

            macro_rules! func_binop {
                ($op:literal, $method:ident) => {{
                    b = stack.pop();
                    a = stack.pop();
                    stack.push(ctx_ok!(self.apply_binop(
                        $op,
                        ops::$method,
                        &a,
                        &b,
                        undefined_behavior
                    )));
                }};
            }

            match instr {
                Instruction::EmitRaw(val) => {
                    // this only produces a format error, no need to attach
                    // location information.
                    ok!(out.write_str(val).map_err(Error::from));
                }
                Instruction::Emit => {
                    a = stack.pop();
                    ctx_ok!(self.emit_value(state, out, &a, undefined_behavior));
                }
                Instruction::StoreLocal(name) => {
                    state.ctx.store(name.clone(), stack.pop());
                }
                Instruction::SetAttr(name) => {
                    b = stack.pop();
                    a = stack.pop();
                    ctx_ok!(b.set_attr(name, a));
                }
                Instruction::Lookup(name) => {
                    stack.push(
                        state
                            .ctx
                            .load(self.env, name)
                            .unwrap_or_else(|| Value::undefined_from_name(name)),
                    );
                }
                Instruction::GetAttr(name) => {
                    a = stack.pop();
                    if a.is_undefined() && undefined_behavior.is_chainable() {
                        stack.push(Value::undefined_from_lookup(
                            Some(&a),
                            &Value::from(&**name),
                        ));
                    } else {
                        ctx_ok!(self.check_attr_access(&a, name));
                        stack.push(ctx_ok!(a.get_attr(name)));
                    }
                }
                Instruction::GetItem => {
                    a = stack.pop();
                    b = stack.pop();
                    if b.is_undefined() && undefined_behavior.is_chainable() {
                        stack.push(Value::undefined_from_lookup(Some(&b), &a));
                    } else {
                        if let Some(name) = a.as_str() {
                            ctx_ok!(self.check_attr_access(&b, name));
                        }
                        stack.push(ctx_ok!(b.get_item(&a)));
                    }
                }
                Instruction::Slice => {
                    let step = stack.pop();
                    let stop = stack.pop();
                    b = stack.pop();
                    a = stack.pop();
                    if a.is_undefined() && undefined_behavior.is_strict() {
                        bail!(a.undefined_error());
                    }
                    stack.push(ctx_ok!(ops::slice(a, b, stop, step)));
                }
                Instruction::LoadConst(value) => {
                    stack.push(value.clone());
                }
                Instruction::BuildMap(pair_count) => {
                    let mut map = ValueMap::new();
                    for _ in 0..*pair_count {
                        let value = stack.pop();
                        let key = stack.pop();
                        map.insert(key, value);
                    }
                    stack.push(Value::from_map(Arc::new(map)))
                }
                Instruction::BuildKwargs(pair_count) => {
                    let mut map = ValueMap::new();
                    for _ in 0..*pair_count {
                        let value = stack.pop();
                        let key = stack.pop();
                        map.insert(key, value);
                    }
                    stack.push(Value::from_kwargs(map))
                }
                Instruction::BuildList(count) => {
                    let mut v = Vec::with_capacity(*count);
                    for _ in 0..*count {
                        v.push(stack.pop());
                    }
                    v.reverse();
                    stack.push(ops::wrapping_seq(v));
                }
                Instruction::UnpackList(count) => {
                    ctx_ok!(self.unpack_list(&mut stack, *count));
                }
                Instruction::ListAppend => {
                    a = stack.pop();
                    if let ValueRepr::Seq(mut v) = stack.pop().0 {
                        Arc::make_mut(&mut v).push(a);
                        stack.push(Value(ValueRepr::Seq(v)))
                    } else {
                        bail!(Error::new(
                            ErrorKind::InvalidOperation,
                            "cannot append to non-list"
                        ));
                    }
                }
                Instruction::ListExtend => {
                    a = stack.pop();
                    if let ValueRepr::Seq(mut v) = stack.pop().0 {
                        let iter = ctx_ok!(a.try_iter());
                        Arc::make_mut(&mut v).extend(iter);
                        stack.push(Value(ValueRepr::Seq(v)))
                    } else {
                        bail!(Error::new(
                            ErrorKind::InvalidOperation,
                            "cannot extend non-list"
                        ));
                    }
                }
                Instruction::MapExtend => {
                    a = stack.pop();
                    b = stack.pop();
                    match (b.0, a.as_map()) {
                        (ValueRepr::Map(mut target, map_type), Some(extra)) => {
                            let target_mut = Arc::make_mut(&mut target);
                            for (key, value) in extra.iter() {
                                target_mut.insert(key.clone(), value.clone());
                            }
                            stack.push(Value(ValueRepr::Map(target, map_type)));
                        }
                        _ => bail!(Error::new(
                            ErrorKind::InvalidOperation,
                            "cannot merge non-map values"
                        )),
                    }
                }
                Instruction::Add => func_binop!("+", add),
                Instruction::Sub => func_binop!("-", sub),
                Instruction::Mul => func_binop!("*", mul),
                Instruction::Div => func_binop!("/", div),
                Instruction::IntDiv => func_binop!("//", int_div),
                Instruction::Rem => func_binop!("%", rem),
                Instruction::Pow => func_binop!("**", pow),
                Instruction::Neg => {
                    a = stack.pop();
                    if a.is_undefined() {
                        if undefined_behavior.is_strict() {
                            bail!(a.undefined_error());
                        }
                        stack.push(Value::UNDEFINED);
                    } else if let Some(sandbox) =
                        self.env.sandbox().filter(|x| x.intercepts_unop("-"))
                    {
                        stack.push(ctx_ok!(sandbox.call_unop("-", &a)));
                    } else {
                        stack.push(ctx_ok!(ops::neg(&a)));
                    }
                }
                Instruction::Not => {
                    a = stack.pop();
                    stack.push(Value::from(!ctx_ok!(self.value_is_true(
                        &a,
                        undefined_behavior
                    ))));
                }
                Instruction::StringConcat => {
                    a = stack.pop();
                    b = stack.pop();
                    if undefined_behavior.is_strict() && (a.is_undefined() || b.is_undefined()) {
                        let undef = if a.is_undefined() { &a } else { &b };
                        bail!(undef.undefined_error());
                    }
                    stack.push(ops::string_concat(b, &a));
                }
                Instruction::Compare(compare_ops) => {
                    let count = compare_ops.len() + 1;
                    let args = stack.slice_top(count).to_vec();
                    stack.drop_top(count);
                    let mut result = true;
                    if args.iter().any(|x| x.is_undefined()) {
                        if undefined_behavior.is_strict() {
                            let undef = args.iter().find(|x| x.is_undefined()).unwrap();
                            bail!(undef.undefined_error());
                        }
                        result = false;
                    } else {
                        for (idx, op) in compare_ops.iter().enumerate() {
                            let lhs = &args[idx];
                            let rhs = &args[idx + 1];
                            let holds = match op {
                                CompareOp::Eq => lhs == rhs,
                                CompareOp::Ne => lhs != rhs,
                                CompareOp::Lt => lhs < rhs,
                                CompareOp::Lte => lhs <= rhs,
                                CompareOp::Gt => lhs > rhs,
                                CompareOp::Gte => lhs >= rhs,
                                CompareOp::In => ctx_ok!(ops::contains(rhs, lhs)).is_true(),
                                CompareOp::NotIn => {
                                    !ctx_ok!(ops::contains(rhs, lhs)).is_true()
                                }
                            };
                            if !holds {
                                result = false;
                                break;
                            }
                        }
                    }
                    stack.push(Value::from(result));
                }
                Instruction::PushWith => {
                    ctx_ok!(state.ctx.push_frame(Frame::default()));
                }
                Instruction::PopFrame => {
                    if let Some(mut loop_ctx) = state.ctx.pop_frame().current_loop {
                        if let Some((target, end_capture)) = loop_ctx.current_recursion_jump.take()
                        {
                            pc = target;
                            if end_capture {
                                stack.push(out.end_capture(state.auto_escape));
                            }
                            continue;
                        }
                    }
                }
                Instruction::PushLoop(flags) => {
                    a = stack.pop();
                    if a.is_undefined() && undefined_behavior.is_strict() {
                        bail!(a.undefined_error());
                    }
                    ctx_ok!(self.push_loop(state, a, *flags, pc, next_loop_recursion_jump.take()));
                }
                Instruction::Iterate(jump_target) => {
                    let l = state.ctx.current_loop().expect("not inside a loop");
                    // the index advances even when the iterator is already
                    // exhausted; the for/else lowering depends on `index0`
                    // being 0 after a loop that never iterated.
                    l.object.idx.fetch_add(1, Ordering::Relaxed);
                    let next = {
                        let mut triple = l.object.value_triple.lock().unwrap();
                        triple.0 = triple.1.take();
                        triple.1 = triple.2.take();
                        triple.2 = l.iterator.next();
                        triple.1.clone()
                    };
                    match next {
                        Some(item) => stack.push(item),
                        None => {
                            pc = *jump_target;
                            continue;
                        }
                    };
                }
                Instruction::Jump(jump_target) => {
                    pc = *jump_target;
                    continue;
                }
                Instruction::JumpIfFalse(jump_target) => {
                    a = stack.pop();
                    if !ctx_ok!(self.value_is_true(&a, undefined_behavior)) {
                        pc = *jump_target;
                        continue;
                    }
                }
                Instruction::JumpIfFalseOrPop(jump_target) => {
                    if !ctx_ok!(self.value_is_true(stack.peek(), undefined_behavior)) {
                        pc = *jump_target;
                        continue;
                    } else {
                        stack.pop();
                    }
                }
                Instruction::JumpIfTrueOrPop(jump_target) => {
                    if ctx_ok!(self.value_is_true(stack.peek(), undefined_behavior)) {
                        pc = *jump_target;
                        continue;
                    } else {
                        stack.pop();
                    }
                }
                Instruction::CallBlock(name) => {
                    if parent_instructions.is_none() && !out.is_discarding() {
                        ctx_ok!(self.call_block(name, state, out));
                    }
                }
                Instruction::PushAutoEscape => {
                    a = stack.pop();
                    auto_escape_stack.push(state.auto_escape);
                    state.auto_escape = ctx_ok!(self.derive_auto_escape(a, initial_auto_escape));
                }
                Instruction::PopAutoEscape => {
                    state.auto_escape = auto_escape_stack.pop().unwrap();
                }
                Instruction::BeginCapture(mode) => {
                    out.begin_capture(*mode);
                }
                Instruction::EndCapture => {
                    stack.push(out.end_capture(state.auto_escape));
                }
                Instruction::ApplyFilter(name, arg_count) => {
                    let filter = ctx_ok!(state.env.get_filter(name).ok_or_else(|| {
                        Error::new(ErrorKind::UnknownFilter, format!("filter {name} is unknown"))
                    }));
                    let args = stack.slice_top(*arg_count);
                    a = ctx_ok!(filter.apply_to(state, args));
                    stack.drop_top(*arg_count);
                    stack.push(a);
                }
                Instruction::PerformTest(name, arg_count) => {
                    let test = ctx_ok!(state.env.get_test(name).ok_or_else(|| {
                        Error::new(ErrorKind::UnknownTest, format!("test {name} is unknown"))
                    }));
                    let args = stack.slice_top(*arg_count);
                    let rv = ctx_ok!(test.perform(state, args));
                    stack.drop_top(*arg_count);
                    stack.push(Value::from(rv));
                }
                Instruction::CallFunction(name, arg_count) => {
                    // super is a special function reserved for super-ing into
                    // blocks.
                    if &**name == "super" {
                        if !matches!(arg_count, Some(0)) {
                            bail!(Error::new(
                                ErrorKind::InvalidOperation,
                                "super() takes no arguments",
                            ));
                        }
                        stack.push(ctx_ok!(self.perform_super(state, out, true)));
                    // loop is a special name which when called recurses the
                    // current loop.
                    } else if &**name == "loop" {
                        if !matches!(arg_count, Some(1)) {
                            bail!(Error::new(
                                ErrorKind::InvalidOperation,
                                "loop() takes one argument",
                            ));
                        }
                        // leave the one argument on the stack for the recursion
                        recurse_loop!(true);
                    } else if let Some(func) = state.ctx.load(self.env, name) {
                        let args = ctx_ok!(self.collect_call_args(&mut stack, *arg_count));
                        ctx_ok!(self.check_call(&func));
                        stack.push(ctx_ok!(func.call(state, &args)));
                    } else {
                        bail!(Error::new(
                            ErrorKind::UnknownFunction,
                            format!("{name} is unknown"),
                        ));
                    }
                }
                Instruction::CallMethod(name, arg_count) => {
                    let args = ctx_ok!(self.collect_method_args(&mut stack, *arg_count));
                    ctx_ok!(self.check_attr_access(&args[0], name));
                    a = ctx_ok!(args[0].call_method(state, name, &args[1..]));
                    stack.push(a);
                }
                Instruction::CallObject(arg_count) => {
                    let args = ctx_ok!(self.collect_method_args(&mut stack, *arg_count));
                    ctx_ok!(self.check_call(&args[0]));
                    a = ctx_ok!(args[0].call(state, &args[1..]));
                    stack.push(a);
                }
                Instruction::DupTop => {
                    stack.push(stack.peek().clone());
                }
                Instruction::DiscardTop => {
                    stack.pop();
                }
                Instruction::FastSuper => {
                    ctx_ok!(self.perform_super(state, out, false));
                }
                Instruction::FastRecurse => {
                    recurse_loop!(false);
                }
                Instruction::LoadBlocks => {
                    a = stack.pop();
                    if parent_instructions.is_some() {
                        bail!(Error::new(
                            ErrorKind::InvalidOperation,
                            "tried to extend a second time in a template"
                        ));
                    }
                    parent_instructions = Some(ctx_ok!(self.load_blocks(a, state)));
                }
                Instruction::RenderParent => {
                    // Explanation on the behavior of `LoadBlocks` and
                    // `RenderParent`: a template that extends another one
                    // keeps evaluating the rest of its body (so that sets,
                    // macros and imports become visible to the blocks) but
                    // output is suppressed; at the end the parent template
                    // is rendered in its place.
                    if let Some(parent) = parent_instructions.take() {
                        out.end_capture(AutoEscape::None);
                        state.instructions = parent;
                        pc = 0;
                        continue;
                    } else {
                        // no extends was executed after all; the capture
                        // opened at template start must still be unwound.
                        out.end_capture(AutoEscape::None);
                    }
                }
                Instruction::Include(ignore_missing, with_context) => {
                    a = stack.pop();
                    ctx_ok!(self.perform_include(a, state, out, *ignore_missing, *with_context));
                }
                Instruction::LoadModule(with_context) => {
                    a = stack.pop();
                    stack.push(ctx_ok!(self.load_module(a, state, *with_context)));
                }
                Instruction::BuildMacro(data) => {
                    let closure = stack.pop();
                    let defaults = match stack.pop().0 {
                        ValueRepr::Seq(seq) => seq.to_vec(),
                        _ => unreachable!("compiler did not produce defaults list"),
                    };
                    stack.push(Value::from_object(Macro {
                        data: Arc::new(MacroData {
                            name: data.name.clone(),
                            arg_spec: data.args.clone(),
                            defaults,
                            instructions: state.instructions.clone(),
                            offset: data.offset,
                            closure,
                            flags: data.flags,
                        }),
                    }));
                }
                Instruction::Trans(data) => {
                    a = stack.pop();
                    ctx_ok!(self.perform_trans(data, &a, state, out));
                }
                Instruction::Return => break,
            }
            pc += 1;
        }

        Ok(stack.try_pop())
    }

    fn value_is_true(
        &self,
        value: &Value,
        undefined_behavior: UndefinedBehavior,
    ) -> Result<bool, Error> {
        if value.is_undefined() && undefined_behavior.is_strict() {
            Err(value.undefined_error())
        } else {
            Ok(value.is_true())
        }
    }

    fn emit_value(
        &self,
        state: &State,
        out: &mut Output,
        value: &Value,
        undefined_behavior: UndefinedBehavior,
    ) -> Result<(), Error> {
        if value.is_undefined() {
            match undefined_behavior {
                UndefinedBehavior::Strict => return Err(value.undefined_error()),
                UndefinedBehavior::Debug => {
                    let name = value
                        .undefined_origin()
                        .and_then(|x| x.name.clone())
                        .unwrap_or_else(|| "undefined".into());
                    return out
                        .write_str(&format!("{{{{ {name} }}}}"))
                        .map_err(Error::from);
                }
                _ => return Ok(()),
            }
        }
        if out.emit_native_chunk(value) {
            return Ok(());
        }
        self.env.format(value, state, out)
    }

    fn apply_binop(
        &self,
        op: &'static str,
        f: fn(&Value, &Value) -> Result<Value, Error>,
        lhs: &Value,
        rhs: &Value,
        undefined_behavior: UndefinedBehavior,
    ) -> Result<Value, Error> {
        if lhs.is_undefined() || rhs.is_undefined() {
            if undefined_behavior.is_strict() {
                return Err(if lhs.is_undefined() { lhs } else { rhs }.undefined_error());
            }
            // lenient undefined values absorb addition and subtraction and
            // swallow the result of everything else.
            return Ok(match op {
                "+" | "-" => {
                    if lhs.is_undefined() && rhs.is_undefined() {
                        Value::UNDEFINED
                    } else if lhs.is_undefined() {
                        rhs.clone()
                    } else {
                        lhs.clone()
                    }
                }
                _ => Value::UNDEFINED,
            });
        }
        if let Some(sandbox) = self.env.sandbox().filter(|x| x.intercepts_binop(op)) {
            return sandbox.call_binop(op, lhs, rhs);
        }
        f(lhs, rhs)
    }

    fn check_attr_access(&self, value: &Value, attr: &str) -> Result<(), Error> {
        if let Some(sandbox) = self.env.sandbox() {
            if !sandbox.is_safe_attribute(value, attr) {
                return Err(Error::new(
                    ErrorKind::SecurityError,
                    format!(
                        "access to attribute {attr:?} of {} object is unsafe",
                        value.kind()
                    ),
                ));
            }
        }
        Ok(())
    }

    fn check_call(&self, value: &Value) -> Result<(), Error> {
        if let Some(sandbox) = self.env.sandbox() {
            if !sandbox.is_safe_callable(value) {
                return Err(Error::new(
                    ErrorKind::SecurityError,
                    format!("{value} is not safely callable"),
                ));
            }
        }
        Ok(())
    }

    /// Collects call arguments from the stack.
    ///
    /// `Some(count)` pops that many values, `None` indicates the spread
    /// form with a kwargs map on top of a positional list.
    fn collect_call_args(
        &self,
        stack: &mut Stack,
        arg_count: Option<usize>,
    ) -> Result<Vec<Value>, Error> {
        match arg_count {
            Some(count) => {
                let args = stack.slice_top(count).to_vec();
                stack.drop_top(count);
                Ok(args)
            }
            None => {
                let kwargs = stack.pop();
                let list = stack.pop();
                let mut args = ok!(list.as_slice()).to_vec();
                if kwargs.as_map().map_or(false, |x| !x.is_empty()) {
                    args.push(kwargs);
                }
                Ok(args)
            }
        }
    }

    /// Like [`collect_call_args`](Self::collect_call_args) but with the
    /// receiver below the arguments.
    fn collect_method_args(
        &self,
        stack: &mut Stack,
        arg_count: Option<usize>,
    ) -> Result<Vec<Value>, Error> {
        match arg_count {
            Some(count) => {
                let args = stack.slice_top(count).to_vec();
                stack.drop_top(count);
                Ok(args)
            }
            None => {
                let kwargs = stack.pop();
                let list = stack.pop();
                let receiver = stack.pop();
                let mut args = vec![receiver];
                args.extend(ok!(list.as_slice()).iter().cloned());
                if kwargs.as_map().map_or(false, |x| !x.is_empty()) {
                    args.push(kwargs);
                }
                Ok(args)
            }
        }
    }

    fn call_block(
        &self,
        name: &Str,
        state: &mut State<'env>,
        out: &mut Output,
    ) -> Result<(), Error> {
        let block_stack = match state.blocks.get(name) {
            Some(stack) => stack,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "tried to invoke unknown block",
                ))
            }
        };
        if block_stack.is_unresolved_required() {
            return Err(Error::new(
                ErrorKind::EvalBlock,
                format!("required block {name:?} was not overridden"),
            ));
        }
        let old_block = mem::replace(&mut state.current_block, Some(name.clone()));
        let old_instructions =
            mem::replace(&mut state.instructions, block_stack.instructions());
        ok!(state.ctx.push_frame(Frame::default()));
        let rv = self.eval_state(state, out);
        state.ctx.pop_frame();
        state.instructions = old_instructions;
        state.current_block = old_block;
        ok!(rv.map_err(|err| {
            Error::new(
                ErrorKind::EvalBlock,
                format!("error in block {name:?}"),
            )
            .with_source(err)
        }));
        Ok(())
    }

    fn perform_include(
        &self,
        name: Value,
        state: &mut State<'env>,
        out: &mut Output,
        ignore_missing: bool,
        with_context: bool,
    ) -> Result<(), Error> {
        let choices = if let ValueRepr::Seq(ref choices) = name.0 {
            &choices[..]
        } else {
            std::slice::from_ref(&name)
        };
        let mut templates_tried = vec![];
        for name in choices {
            let name = ok!(name.as_str().ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    "template name was not a string",
                )
            }));
            let tmpl = match self.env.get_template(name) {
                Ok(tmpl) => tmpl,
                Err(err) => {
                    if err.kind() == ErrorKind::TemplateNotFound {
                        templates_tried.push(name.to_string());
                    } else {
                        return Err(err);
                    }
                    continue;
                }
            };
            let compiled = tmpl.compiled();
            let old_escape = mem::replace(&mut state.auto_escape, tmpl.initial_auto_escape());
            let old_instructions =
                mem::replace(&mut state.instructions, compiled.instructions.clone());
            let old_blocks = mem::replace(&mut state.blocks, prepare_blocks(&compiled.blocks));
            ok!(state.ctx.incr_depth(INCLUDE_RECURSION_COST));
            let rv = if with_context {
                ok!(state.ctx.push_frame(Frame::default()));
                let rv = self.eval_state(state, out);
                state.ctx.pop_frame();
                rv
            } else {
                let mut include_state = State::new(
                    self.env,
                    Context::default(),
                    state.auto_escape,
                    compiled.instructions.clone(),
                    prepare_blocks(&compiled.blocks),
                );
                self.eval_state(&mut include_state, out)
            };
            state.ctx.decr_depth(INCLUDE_RECURSION_COST);
            state.auto_escape = old_escape;
            state.instructions = old_instructions;
            state.blocks = old_blocks;
            ok!(rv.map_err(|err| {
                Error::new(
                    ErrorKind::BadInclude,
                    format!("error in \"{}\"", tmpl.name()),
                )
                .with_source(err)
            }));
            return Ok(());
        }
        if !templates_tried.is_empty() && !ignore_missing {
            Err(Error::new(
                ErrorKind::TemplateNotFound,
                if templates_tried.len() == 1 {
                    format!(
                        "tried to include non-existing template {:?}",
                        templates_tried[0]
                    )
                } else {
                    format!(
                        "tried to include one of multiple templates, none of which existed {:?}",
                        templates_tried
                    )
                },
            ))
        } else {
            Ok(())
        }
    }

    fn load_module(
        &self,
        name: Value,
        state: &mut State<'env>,
        with_context: bool,
    ) -> Result<Value, Error> {
        let name = ok!(name.as_str().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                "template name was not a string",
            )
        }));
        let tmpl = ok!(self.env.get_template(name));
        let compiled = tmpl.compiled();
        let root = if with_context {
            state.ctx.freeze(self.env)
        } else {
            Value::UNDEFINED
        };
        let mut module_state = State::new(
            self.env,
            Context::new(Frame::new(root)),
            tmpl.initial_auto_escape(),
            compiled.instructions.clone(),
            prepare_blocks(&compiled.blocks),
        );
        ok!(module_state.ctx.incr_depth(state.ctx.depth() + INCLUDE_RECURSION_COST));
        let mut null = crate::output::NullWriter;
        let mut out = Output::null(&mut null);
        ok!(self.eval_state(&mut module_state, &mut out).map_err(|err| {
            Error::new(
                ErrorKind::BadInclude,
                format!("error in module {name:?}"),
            )
            .with_source(err)
        }));
        let mut module = ValueMap::new();
        for (key, value) in module_state.ctx.current_locals().iter() {
            module.insert(Value::from(&**key), value.clone());
        }
        Ok(Value::from_map(Arc::new(module)))
    }

    fn perform_super(
        &self,
        state: &mut State<'env>,
        out: &mut Output,
        capture: bool,
    ) -> Result<Value, Error> {
        let name = ok!(state.current_block.clone().ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "cannot super outside of block")
        }));

        let block_stack = state.blocks.get_mut(&name).unwrap();
        if !block_stack.push() {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                "no parent block exists",
            ));
        }

        if capture {
            out.begin_capture(CaptureMode::Capture);
        }

        let old_instructions =
            mem::replace(&mut state.instructions, block_stack.instructions());
        ok!(state.ctx.push_frame(Frame::default()));
        let rv = self.eval_state(state, out);
        state.ctx.pop_frame();
        state.instructions = old_instructions;
        state.blocks.get_mut(&name).unwrap().pop();

        ok!(rv.map_err(|err| {
            Error::new(ErrorKind::EvalBlock, "error in super block").with_source(err)
        }));
        if capture {
            Ok(out.end_capture(state.auto_escape))
        } else {
            Ok(Value::UNDEFINED)
        }
    }

    fn prepare_loop_recursion(&self, state: &mut State) -> Result<usize, Error> {
        if let Some(loop_ctx) = state.ctx.current_loop() {
            if let Some(recurse_jump_target) = loop_ctx.recurse_jump_target {
                Ok(recurse_jump_target)
            } else {
                Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "cannot recurse outside of recursive loop",
                ))
            }
        } else {
            Err(Error::new(
                ErrorKind::InvalidOperation,
                "cannot recurse outside of loop",
            ))
        }
    }

    fn load_blocks(
        &self,
        name: Value,
        state: &mut State<'env>,
    ) -> Result<Arc<Instructions>, Error> {
        let name = match name.as_str() {
            Some(name) => name,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "template name was not a string",
                ))
            }
        };
        if state.loaded_templates.contains(name) {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cycle in template inheritance. {name:?} was referenced more than once"),
            ));
        }
        let tmpl = ok!(self.env.get_template(name));
        let compiled = tmpl.compiled();
        state
            .loaded_templates
            .insert(compiled.instructions.name_shared());
        for (name, instr) in compiled.blocks.iter() {
            state
                .blocks
                .entry(name.clone())
                .or_default()
                .append_instructions(instr.clone());
        }
        Ok(compiled.instructions.clone())
    }

    fn derive_auto_escape(
        &self,
        value: Value,
        initial_auto_escape: AutoEscape,
    ) -> Result<AutoEscape, Error> {
        match (value.as_str(), value == Value::from(true)) {
            (Some("html"), _) => Ok(AutoEscape::Html),
            #[cfg(feature = "json")]
            (Some("json"), _) => Ok(AutoEscape::Json),
            (Some("none"), _) | (None, false) => Ok(AutoEscape::None),
            (None, true) => Ok(if matches!(initial_auto_escape, AutoEscape::None) {
                AutoEscape::Html
            } else {
                initial_auto_escape
            }),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                "invalid value to autoescape tag",
            )),
        }
    }

    fn push_loop(
        &self,
        state: &mut State<'env>,
        iterable: Value,
        flags: u8,
        pc: usize,
        current_recursion_jump: Option<(usize, bool)>,
    ) -> Result<(), Error> {
        let mut iterator = ok!(iterable.try_iter());
        let len = iterator.len();
        let first = iterator.next();
        let depth = state
            .ctx
            .current_loop()
            .filter(|x| x.recurse_jump_target.is_some())
            .map_or(0, |x| x.object.depth + 1);
        let recursive = flags & LOOP_FLAG_RECURSIVE != 0;
        let with_loop_var = flags & LOOP_FLAG_WITH_LOOP_VAR != 0;
        state.ctx.push_frame(Frame {
            current_loop: Some(LoopState {
                iterator,
                with_loop_var,
                recurse_jump_target: if recursive { Some(pc) } else { None },
                current_recursion_jump,
                object: Arc::new(Loop {
                    idx: AtomicUsize::new(!0usize),
                    len: Some(len),
                    depth,
                    value_triple: Mutex::new((None, None, first)),
                    last_changed_value: Mutex::default(),
                }),
            }),
            ..Frame::default()
        })
    }

    fn unpack_list(&self, stack: &mut Stack, count: usize) -> Result<(), Error> {
        let top = stack.pop();
        let v = ok!(top
            .as_slice()
            .map_err(|e| Error::new(ErrorKind::CannotUnpack, "not a sequence").with_source(e)));
        if v.len() != count {
            return Err(Error::new(
                ErrorKind::CannotUnpack,
                format!("sequence of wrong length (expected {}, got {})", count, v.len()),
            ));
        }
        for value in v.iter().rev() {
            stack.push(value.clone());
        }
        Ok(())
    }

    fn perform_trans(
        &self,
        data: &TransData,
        vars: &Value,
        state: &State,
        out: &mut Output,
    ) -> Result<(), Error> {
        let count = match data.count_name {
            Some(ref name) => {
                let value = ok!(vars.get_attr(name));
                Some(ok!(i64::try_from(value)))
            }
            None => None,
        };

        let mut singular = data.singular.to_string();
        let mut plural = data.plural.as_ref().map(|x| x.to_string());
        if self.env.policies().i18n_trimmed {
            singular = trim_message(&singular);
            plural = plural.as_deref().map(trim_message);
        }

        let message = match (plural, count) {
            (Some(plural), Some(count)) => self.env.ngettext(&singular, &plural, count),
            _ => self.env.gettext(&singular),
        };

        // interpolate `%(name)s` placeholders, re-escaping substituted
        // values when auto escaping is active.
        let mut rv = String::new();
        let mut rest = &message[..];
        while let Some(pos) = rest.find("%(") {
            rv.push_str(&rest[..pos]);
            rest = &rest[pos + 2..];
            let end = ok!(rest.find(")s").ok_or_else(|| {
                Error::new(
                    ErrorKind::InvalidOperation,
                    "malformed format string in translation",
                )
            }));
            let name = &rest[..end];
            let value = ok!(vars.get_attr(name));
            if matches!(state.auto_escape, AutoEscape::None) || value.is_safe() {
                rv.push_str(&value.to_string());
            } else {
                rv.push_str(&HtmlEscape(&value.to_string()).to_string());
            }
            rest = &rest[end + 2..];
        }
        rv.push_str(rest);
        out.write_str(&rv).map_err(Error::from)
    }
}

fn trim_message(msg: &str) -> String {
    msg.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[inline(never)]
#[cold]
fn process_err(err: &mut Error, pc: usize, state: &State) {
    // only attach line information if the error does not have line info yet.
    if err.line().is_none() {
        if let Some(lineno) = state.instructions.get_line(pc) {
            err.set_filename_and_line(state.instructions.name(), lineno);
        }
    }
    // only attach debug info if we don't have it yet and we are in debug mode.
    #[cfg(feature = "debug")]
    {
        if state.env.debug() && !err.has_template_source() {
            err.attach_template_source(state.instructions.source().to_string());
        }
    }
}
