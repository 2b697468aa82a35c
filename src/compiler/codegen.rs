use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::compiler::ast;
use crate::compiler::instructions::{
    CaptureMode, Instruction, Instructions, MacroData, Str, TransData, LOOP_FLAG_RECURSIVE,
    LOOP_FLAG_WITH_LOOP_VAR, MACRO_CALLER, MACRO_KWARGS, MACRO_VARARGS,
};
use crate::compiler::tokens::Span;
use crate::error::{Error, ErrorKind};
use crate::value::Value;

/// Represents an open block of code that does not yet have updated
/// jump targets.
#[derive(Debug)]
enum PendingBlock {
    Branch(usize),
    Loop(PendingLoop),
    ScBool(Vec<usize>),
}

#[derive(Debug)]
struct PendingLoop {
    iter_instr: usize,
    break_jumps: Vec<usize>,
    /// number of extra frames that were open when the loop started.
    frame_base: usize,
    /// loops compiled for inline filter expressions are invisible to
    /// break and continue.
    visible: bool,
}

/// Provides a convenient interface for creating instructions for the VM.
pub struct CodeGenerator {
    instructions: Instructions,
    blocks: BTreeMap<Str, Instructions>,
    pending_block: Vec<PendingBlock>,
    current_line: usize,
    open_frames: usize,
}

impl CodeGenerator {
    /// Creates a new code generator.
    pub fn new(name: Str, source: Arc<str>) -> CodeGenerator {
        CodeGenerator {
            instructions: Instructions::new(name, source),
            blocks: BTreeMap::new(),
            pending_block: Vec::new(),
            current_line: 0,
            open_frames: 0,
        }
    }

    /// Sets the current location's line.
    pub fn set_line(&mut self, lineno: usize) {
        self.current_line = lineno;
    }

    /// Sets line from span.
    pub fn set_line_from_span(&mut self, span: Span) {
        self.set_line(span.start_line);
    }

    /// Add a simple instruction with the current location.
    pub fn add(&mut self, instr: Instruction) -> usize {
        self.instructions.add_with_line(instr, self.current_line)
    }

    /// Returns the next instruction index.
    pub fn next_instruction(&self) -> usize {
        self.instructions.len()
    }

    /// Creates a sub generator.
    fn new_subgenerator(&self) -> CodeGenerator {
        let mut sub = CodeGenerator::new(
            self.instructions.name_shared(),
            self.instructions.source_shared(),
        );
        sub.current_line = self.current_line;
        sub
    }

    /// Finishes a sub generator and syncs it back.
    fn finish_subgenerator(&mut self, sub: CodeGenerator) -> Instructions {
        self.current_line = sub.current_line;
        let (instructions, blocks) = sub.finish();
        self.blocks.extend(blocks);
        instructions
    }

    /// Starts a for loop.
    fn start_for_loop(&mut self, with_loop_var: bool, recursive: bool) {
        let mut flags = 0;
        if with_loop_var {
            flags |= LOOP_FLAG_WITH_LOOP_VAR;
        }
        if recursive {
            flags |= LOOP_FLAG_RECURSIVE;
        }
        self.add(Instruction::PushLoop(flags));
        let iter_instr = self.add(Instruction::Iterate(!0));
        self.pending_block.push(PendingBlock::Loop(PendingLoop {
            iter_instr,
            break_jumps: Vec::new(),
            frame_base: self.open_frames,
            visible: with_loop_var,
        }));
        self.open_frames += 1;
    }

    /// Ends the open for loop.
    fn end_for_loop(&mut self, push_did_iterate: bool) {
        match self.pending_block.pop() {
            Some(PendingBlock::Loop(pending)) => {
                self.open_frames -= 1;
                self.add(Instruction::Jump(pending.iter_instr));
                let loop_end = self.next_instruction();
                if push_did_iterate {
                    self.add(Instruction::Lookup("loop".into()));
                    self.add(Instruction::GetAttr("index0".into()));
                    self.add(Instruction::LoadConst(Value::from(0)));
                    self.add(Instruction::Compare(
                        vec![ast::CompareOp::Eq].into_boxed_slice(),
                    ));
                }
                self.add(Instruction::PopFrame);
                if let Some(Instruction::Iterate(ref mut jump_target)) =
                    self.instructions.get_mut(pending.iter_instr)
                {
                    *jump_target = loop_end;
                } else {
                    panic!("did not find iteration instruction");
                }
                for break_jump in pending.break_jumps {
                    if let Some(Instruction::Jump(ref mut target)) =
                        self.instructions.get_mut(break_jump)
                    {
                        *target = loop_end;
                    }
                }
            }
            _ => panic!("not inside a loop"),
        }
    }

    /// Begins an if conditional.
    fn start_if(&mut self) {
        let jump_instr = self.add(Instruction::JumpIfFalse(!0));
        self.pending_block.push(PendingBlock::Branch(jump_instr));
    }

    /// Begins an else conditional.
    fn start_else(&mut self) {
        let jump_instr = self.add(Instruction::Jump(!0));
        self.end_condition(jump_instr + 1);
        self.pending_block.push(PendingBlock::Branch(jump_instr));
    }

    /// Closes the current if block.
    fn end_if(&mut self) {
        self.end_condition(self.next_instruction());
    }

    /// Starts a short circuited bool block.
    fn start_sc_bool(&mut self) {
        self.pending_block.push(PendingBlock::ScBool(vec![]));
    }

    /// Emits a short circuited bool operator.
    fn sc_bool(&mut self, and: bool) {
        let instr = self.instructions.add(if and {
            Instruction::JumpIfFalseOrPop(!0)
        } else {
            Instruction::JumpIfTrueOrPop(!0)
        });
        if let Some(PendingBlock::ScBool(ref mut instructions)) = self.pending_block.last_mut() {
            instructions.push(instr);
        } else {
            panic!("tried to emit sc_bool from outside of sc_bool block");
        }
    }

    /// Ends a short circuited bool block.
    fn end_sc_bool(&mut self) {
        let end = self.next_instruction();
        if let Some(PendingBlock::ScBool(instructions)) = self.pending_block.pop() {
            for instr in instructions {
                match self.instructions.get_mut(instr) {
                    Some(Instruction::JumpIfFalseOrPop(ref mut target))
                    | Some(Instruction::JumpIfTrueOrPop(ref mut target)) => {
                        *target = end;
                    }
                    _ => panic!("tried to patch invalid instruction"),
                }
            }
        }
    }

    fn end_condition(&mut self, jump_instr: usize) {
        match self.pending_block.pop() {
            Some(PendingBlock::Branch(instr)) => match self.instructions.get_mut(instr) {
                Some(Instruction::JumpIfFalse(ref mut target))
                | Some(Instruction::Jump(ref mut target)) => {
                    *target = jump_instr;
                }
                _ => {}
            },
            _ => panic!("not inside a branch"),
        }
    }

    /// Finds the closest visible loop and emits the frame pops that are
    /// needed to unwind to it.
    fn unwind_to_loop(&mut self) -> Result<usize, Error> {
        let mut found = None;
        for (idx, block) in self.pending_block.iter().enumerate().rev() {
            if let PendingBlock::Loop(ref pending) = block {
                if pending.visible {
                    found = Some((idx, self.open_frames - pending.frame_base - 1));
                    break;
                }
            }
        }
        match found {
            Some((idx, pops)) => {
                for _ in 0..pops {
                    self.add(Instruction::PopFrame);
                }
                Ok(idx)
            }
            None => Err(Error::new(
                ErrorKind::SyntaxError,
                "loop control outside of loop",
            )),
        }
    }

    /// Compiles a statement.
    pub fn compile_stmt(&mut self, stmt: &ast::Stmt<'_>) -> Result<(), Error> {
        match stmt {
            ast::Stmt::Template(t) => {
                self.set_line_from_span(t.span());
                let has_extends = template_has_extends(&t.children);
                // a template with inheritance evaluates the child body only
                // for its side effects; direct output of the child outside
                // of blocks is discarded and the parent root renders last.
                if has_extends {
                    self.add(Instruction::BeginCapture(CaptureMode::Discard));
                }
                for node in &t.children {
                    ok!(self.compile_stmt(node));
                }
                if has_extends {
                    self.add(Instruction::RenderParent);
                }
            }
            ast::Stmt::EmitExpr(expr) => {
                ok!(self.compile_emit_expr(expr));
            }
            ast::Stmt::EmitRaw(raw) => {
                self.set_line_from_span(raw.span());
                self.add(Instruction::EmitRaw(raw.raw.into()));
            }
            ast::Stmt::ForLoop(for_loop) => {
                ok!(self.compile_for_loop(for_loop));
            }
            ast::Stmt::IfCond(if_cond) => {
                ok!(self.compile_if_stmt(if_cond));
            }
            ast::Stmt::WithBlock(with_block) => {
                self.set_line_from_span(with_block.span());
                self.add(Instruction::PushWith);
                self.open_frames += 1;
                for (target, expr) in &with_block.assignments {
                    ok!(self.compile_expr(expr));
                    ok!(self.compile_assignment(target));
                }
                for node in &with_block.body {
                    ok!(self.compile_stmt(node));
                }
                self.open_frames -= 1;
                self.add(Instruction::PopFrame);
            }
            ast::Stmt::Set(set) => {
                self.set_line_from_span(set.span());
                ok!(self.compile_expr(&set.expr));
                ok!(self.compile_assignment(&set.target));
            }
            ast::Stmt::SetBlock(set_block) => {
                self.set_line_from_span(set_block.span());
                self.add(Instruction::BeginCapture(CaptureMode::Capture));
                for node in &set_block.body {
                    ok!(self.compile_stmt(node));
                }
                self.add(Instruction::EndCapture);
                if let Some(ref filter) = set_block.filter {
                    ok!(self.compile_expr(filter));
                }
                ok!(self.compile_assignment(&set_block.target));
            }
            ast::Stmt::Block(block) => {
                ok!(self.compile_block(block));
            }
            ast::Stmt::Extends(extends) => {
                self.set_line_from_span(extends.span());
                ok!(self.compile_expr(&extends.name));
                self.add(Instruction::LoadBlocks);
            }
            ast::Stmt::Include(include) => {
                self.set_line_from_span(include.span());
                ok!(self.compile_expr(&include.name));
                self.add(Instruction::Include(
                    include.ignore_missing,
                    include.with_context,
                ));
            }
            ast::Stmt::Import(import) => {
                self.set_line_from_span(import.span());
                ok!(self.compile_expr(&import.expr));
                self.add(Instruction::LoadModule(import.with_context));
                self.add(Instruction::StoreLocal(import.name.into()));
            }
            ast::Stmt::FromImport(from_import) => {
                self.set_line_from_span(from_import.span());
                ok!(self.compile_expr(&from_import.expr));
                self.add(Instruction::LoadModule(from_import.with_context));
                for (name, alias) in &from_import.names {
                    self.add(Instruction::DupTop);
                    self.add(Instruction::GetAttr((*name).into()));
                    self.add(Instruction::StoreLocal(alias.unwrap_or(name).into()));
                }
                self.add(Instruction::DiscardTop);
            }
            ast::Stmt::AutoEscape(auto_escape) => {
                self.set_line_from_span(auto_escape.span());
                ok!(self.compile_expr(&auto_escape.enabled));
                self.add(Instruction::PushAutoEscape);
                for node in &auto_escape.body {
                    ok!(self.compile_stmt(node));
                }
                self.add(Instruction::PopAutoEscape);
            }
            ast::Stmt::FilterBlock(filter_block) => {
                self.set_line_from_span(filter_block.span());
                self.add(Instruction::BeginCapture(CaptureMode::Capture));
                for node in &filter_block.body {
                    ok!(self.compile_stmt(node));
                }
                self.add(Instruction::EndCapture);
                ok!(self.compile_expr(&filter_block.filter));
                self.add(Instruction::Emit);
            }
            ast::Stmt::Macro(macro_decl) => {
                ok!(self.compile_macro(macro_decl));
                self.add(Instruction::StoreLocal(macro_decl.name.into()));
            }
            ast::Stmt::CallBlock(call_block) => {
                ok!(self.compile_call_block(call_block));
            }
            ast::Stmt::Do(do_stmt) => {
                self.set_line_from_span(do_stmt.span());
                ok!(self.compile_expr(&do_stmt.expr));
                self.add(Instruction::DiscardTop);
            }
            ast::Stmt::Trans(trans) => {
                ok!(self.compile_trans(trans));
            }
            ast::Stmt::Break(b) => {
                self.set_line_from_span(b.span());
                ok!(self.unwind_to_loop());
                let jump_instr = self.add(Instruction::Jump(!0));
                for block in self.pending_block.iter_mut().rev() {
                    if let PendingBlock::Loop(ref mut pending) = block {
                        if pending.visible {
                            pending.break_jumps.push(jump_instr);
                            break;
                        }
                    }
                }
            }
            ast::Stmt::Continue(c) => {
                self.set_line_from_span(c.span());
                let idx = ok!(self.unwind_to_loop());
                let iter_instr = match self.pending_block[idx] {
                    PendingBlock::Loop(ref pending) => pending.iter_instr,
                    _ => unreachable!(),
                };
                self.add(Instruction::Jump(iter_instr));
            }
        }
        Ok(())
    }

    fn compile_block(&mut self, block: &ast::Spanned<ast::Block<'_>>) -> Result<(), Error> {
        self.set_line_from_span(block.span());
        let mut sub = self.new_subgenerator();
        for node in &block.body {
            ok!(sub.compile_stmt(node));
        }
        let mut instructions = self.finish_subgenerator(sub);
        instructions.required_block = block.required;
        self.blocks.insert(block.name.into(), instructions);
        self.add(Instruction::CallBlock(block.name.into()));
        Ok(())
    }

    fn compile_if_stmt(&mut self, if_cond: &ast::Spanned<ast::IfCond<'_>>) -> Result<(), Error> {
        self.set_line_from_span(if_cond.span());
        ok!(self.compile_expr(&if_cond.expr));
        self.start_if();
        for node in &if_cond.true_body {
            ok!(self.compile_stmt(node));
        }
        if !if_cond.false_body.is_empty() {
            self.start_else();
            for node in &if_cond.false_body {
                ok!(self.compile_stmt(node));
            }
        }
        self.end_if();
        Ok(())
    }

    fn compile_emit_expr(
        &mut self,
        expr: &ast::Spanned<ast::EmitExpr<'_>>,
    ) -> Result<(), Error> {
        self.set_line_from_span(expr.span());
        if let ast::Expr::Call(call) = &expr.expr {
            if let ast::Expr::Var(var) = &call.expr {
                if var.id == "super" && call.args.is_empty() {
                    self.add(Instruction::FastSuper);
                    return Ok(());
                }
                if var.id == "loop" && call.args.len() == 1 {
                    if let ast::CallArg::Pos(ref arg) = call.args[0] {
                        ok!(self.compile_expr(arg));
                        self.add(Instruction::FastRecurse);
                        return Ok(());
                    }
                }
            }
        }
        ok!(self.compile_expr(&expr.expr));
        self.add(Instruction::Emit);
        Ok(())
    }

    fn compile_for_loop(
        &mut self,
        for_loop: &ast::Spanned<ast::ForLoop<'_>>,
    ) -> Result<(), Error> {
        self.set_line_from_span(for_loop.span());
        if let Some(ref filter_expr) = for_loop.filter_expr {
            // filter expressions work like a nested for loop without
            // the special loop variable that append into a new list
            // just outside of the loop.
            self.add(Instruction::BuildList(0));
            ok!(self.compile_expr(&for_loop.iter));
            self.start_for_loop(false, false);
            self.add(Instruction::DupTop);
            ok!(self.compile_assignment(&for_loop.target));
            ok!(self.compile_expr(filter_expr));
            self.start_if();
            self.add(Instruction::ListAppend);
            self.start_else();
            self.add(Instruction::DiscardTop);
            self.end_if();
            self.end_for_loop(false);
        } else {
            ok!(self.compile_expr(&for_loop.iter));
        }
        self.start_for_loop(true, for_loop.recursive);
        ok!(self.compile_assignment(&for_loop.target));
        for node in &for_loop.body {
            ok!(self.compile_stmt(node));
        }
        self.end_for_loop(!for_loop.else_body.is_empty());
        if !for_loop.else_body.is_empty() {
            self.start_if();
            for node in &for_loop.else_body {
                ok!(self.compile_stmt(node));
            }
            self.end_if();
        }
        Ok(())
    }

    fn compile_macro(&mut self, macro_decl: &ast::Spanned<ast::Macro<'_>>) -> Result<(), Error> {
        self.set_line_from_span(macro_decl.span());

        let arg_names = macro_decl
            .args
            .iter()
            .map(|arg| match arg {
                ast::Expr::Var(var) => Ok(Str::from(var.id)),
                _ => Err(Error::new(
                    ErrorKind::SyntaxError,
                    "macro arguments must be plain names",
                )),
            })
            .collect::<Result<Vec<Str>, Error>>();
        let arg_names = ok!(arg_names);

        // defaults are evaluated at definition time
        for default in &macro_decl.defaults {
            ok!(self.compile_expr(default));
        }
        self.add(Instruction::BuildList(macro_decl.defaults.len()));

        // the macro closure captures the values of all names referenced
        // in the body that the macro does not bind itself.
        let mut undeclared = BTreeSet::new();
        find_undeclared_in_body(&macro_decl.body, &mut undeclared);
        let mut flags = 0;
        if undeclared.remove("caller") {
            flags |= MACRO_CALLER;
        }
        if undeclared.remove("varargs") {
            flags |= MACRO_VARARGS;
        }
        if undeclared.remove("kwargs") {
            flags |= MACRO_KWARGS;
        }
        for arg in &arg_names {
            undeclared.remove(&**arg);
        }
        undeclared.remove(macro_decl.name);
        let mut closure_size = 0;
        for name in undeclared {
            self.add(Instruction::LoadConst(Value::from(name)));
            self.add(Instruction::Lookup(name.into()));
            closure_size += 1;
        }
        self.add(Instruction::BuildMap(closure_size));

        let jump_instr = self.add(Instruction::Jump(!0));
        let offset = self.next_instruction();
        // the caller pushes the argument values in declaration order with
        // the special variables on top; bind them in reverse.
        if flags & MACRO_CALLER != 0 {
            self.add(Instruction::StoreLocal("caller".into()));
        }
        if flags & MACRO_KWARGS != 0 {
            self.add(Instruction::StoreLocal("kwargs".into()));
        }
        if flags & MACRO_VARARGS != 0 {
            self.add(Instruction::StoreLocal("varargs".into()));
        }
        for arg in arg_names.iter().rev() {
            self.add(Instruction::StoreLocal(arg.clone()));
        }
        for node in &macro_decl.body {
            ok!(self.compile_stmt(node));
        }
        self.add(Instruction::Return);
        let after_body = self.next_instruction();
        if let Some(Instruction::Jump(ref mut target)) = self.instructions.get_mut(jump_instr) {
            *target = after_body;
        }
        self.add(Instruction::BuildMacro(Box::new(MacroData {
            name: macro_decl.name.into(),
            args: arg_names.into_boxed_slice(),
            offset,
            flags,
        })));
        Ok(())
    }

    fn compile_call_block(
        &mut self,
        call_block: &ast::Spanned<ast::CallBlock<'_>>,
    ) -> Result<(), Error> {
        self.set_line_from_span(call_block.span());
        // the caller is compiled as a macro and stored into a dedicated
        // frame so that the invoked macro receives it as keyword argument.
        self.add(Instruction::PushWith);
        self.open_frames += 1;
        ok!(self.compile_macro(&call_block.macro_decl));
        self.add(Instruction::StoreLocal("caller".into()));
        ok!(self.compile_call(&call_block.call, true));
        self.add(Instruction::Emit);
        self.open_frames -= 1;
        self.add(Instruction::PopFrame);
        Ok(())
    }

    fn compile_trans(&mut self, trans: &ast::Spanned<ast::Trans<'_>>) -> Result<(), Error> {
        self.set_line_from_span(trans.span());
        for (name, expr) in &trans.assignments {
            self.add(Instruction::LoadConst(Value::from(*name)));
            ok!(self.compile_expr(expr));
        }
        self.add(Instruction::BuildMap(trans.assignments.len()));
        self.add(Instruction::Trans(Box::new(TransData {
            singular: trans.singular.as_str().into(),
            plural: trans.plural.as_deref().map(Str::from),
            count_name: trans.count_var.map(Str::from),
        })));
        Ok(())
    }

    /// Compiles an assignment expression.
    pub fn compile_assignment(&mut self, expr: &ast::Expr<'_>) -> Result<(), Error> {
        match expr {
            ast::Expr::Var(var) => {
                self.add(Instruction::StoreLocal(var.id.into()));
            }
            ast::Expr::GetAttr(attr) => {
                ok!(self.compile_expr(&attr.expr));
                self.add(Instruction::SetAttr(attr.name.into()));
            }
            ast::Expr::List(list) => {
                self.set_line_from_span(list.span());
                self.add(Instruction::UnpackList(list.items.len()));
                for expr in &list.items {
                    ok!(self.compile_assignment(expr));
                }
            }
            _ => panic!("bad assignment target"),
        }
        Ok(())
    }

    /// Compiles an expression.
    pub fn compile_expr(&mut self, expr: &ast::Expr<'_>) -> Result<(), Error> {
        match expr {
            ast::Expr::Var(v) => {
                self.set_line_from_span(v.span());
                self.add(Instruction::Lookup(v.id.into()));
            }
            ast::Expr::Const(v) => {
                self.set_line_from_span(v.span());
                self.add(Instruction::LoadConst(v.value.clone()));
            }
            ast::Expr::Slice(s) => {
                self.set_line_from_span(s.span());
                ok!(self.compile_expr(&s.expr));
                if let Some(ref start) = s.start {
                    ok!(self.compile_expr(start));
                } else {
                    self.add(Instruction::LoadConst(Value::from(0)));
                }
                if let Some(ref stop) = s.stop {
                    ok!(self.compile_expr(stop));
                } else {
                    self.add(Instruction::LoadConst(Value::from(())));
                }
                if let Some(ref step) = s.step {
                    ok!(self.compile_expr(step));
                } else {
                    self.add(Instruction::LoadConst(Value::from(1)));
                }
                self.add(Instruction::Slice);
            }
            ast::Expr::UnaryOp(c) => {
                self.set_line_from_span(c.span());
                ok!(self.compile_expr(&c.expr));
                match c.op {
                    ast::UnaryOpKind::Not => self.add(Instruction::Not),
                    ast::UnaryOpKind::Neg => self.add(Instruction::Neg),
                };
            }
            ast::Expr::BinOp(c) => {
                ok!(self.compile_bin_op(c));
            }
            ast::Expr::Compare(c) => {
                self.set_line_from_span(c.span());
                ok!(self.compile_expr(&c.expr));
                for (_, operand) in &c.ops {
                    ok!(self.compile_expr(operand));
                }
                self.add(Instruction::Compare(
                    c.ops
                        .iter()
                        .map(|(op, _)| *op)
                        .collect::<Vec<_>>()
                        .into_boxed_slice(),
                ));
            }
            ast::Expr::IfExpr(i) => {
                self.set_line_from_span(i.span());
                ok!(self.compile_expr(&i.test_expr));
                self.start_if();
                ok!(self.compile_expr(&i.true_expr));
                self.start_else();
                if let Some(ref false_expr) = i.false_expr {
                    ok!(self.compile_expr(false_expr));
                } else {
                    self.add(Instruction::LoadConst(Value::UNDEFINED));
                }
                self.end_if();
            }
            ast::Expr::Filter(f) => {
                self.set_line_from_span(f.span());
                if let Some(ref expr) = f.expr {
                    ok!(self.compile_expr(expr));
                }
                let arg_count = ok!(self.compile_call_args_positional(&f.args));
                self.add(Instruction::ApplyFilter(f.name.into(), arg_count + 1));
            }
            ast::Expr::Test(f) => {
                self.set_line_from_span(f.span());
                ok!(self.compile_expr(&f.expr));
                let arg_count = ok!(self.compile_call_args_positional(&f.args));
                self.add(Instruction::PerformTest(f.name.into(), arg_count + 1));
            }
            ast::Expr::GetAttr(g) => {
                self.set_line_from_span(g.span());
                ok!(self.compile_expr(&g.expr));
                self.add(Instruction::GetAttr(g.name.into()));
            }
            ast::Expr::GetItem(g) => {
                self.set_line_from_span(g.span());
                ok!(self.compile_expr(&g.expr));
                ok!(self.compile_expr(&g.subscript_expr));
                self.add(Instruction::GetItem);
            }
            ast::Expr::Call(c) => {
                ok!(self.compile_call(c, false));
            }
            ast::Expr::List(l) => {
                if let Some(val) = l.as_const() {
                    self.add(Instruction::LoadConst(val));
                } else {
                    self.set_line_from_span(l.span());
                    for item in &l.items {
                        ok!(self.compile_expr(item));
                    }
                    self.add(Instruction::BuildList(l.items.len()));
                }
            }
            ast::Expr::Map(m) => {
                if let Some(val) = m.as_const() {
                    self.add(Instruction::LoadConst(val));
                } else {
                    self.set_line_from_span(m.span());
                    assert_eq!(m.keys.len(), m.values.len());
                    for (key, value) in m.keys.iter().zip(m.values.iter()) {
                        ok!(self.compile_expr(key));
                        ok!(self.compile_expr(value));
                    }
                    self.add(Instruction::BuildMap(m.keys.len()));
                }
            }
        }
        Ok(())
    }

    /// Compiles filter/test arguments where splats are not available.
    ///
    /// Returns the number of values that were pushed (keyword arguments
    /// collapse into a single trailing map).
    fn compile_call_args_positional(&mut self, args: &[ast::CallArg<'_>]) -> Result<usize, Error> {
        let mut pushed = 0;
        let mut kwargs = Vec::new();
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr) => {
                    ok!(self.compile_expr(expr));
                    pushed += 1;
                }
                ast::CallArg::Kwarg(name, expr) => kwargs.push((*name, expr)),
                ast::CallArg::PosSplat(_) | ast::CallArg::KwargSplat(_) => {
                    return Err(Error::new(
                        ErrorKind::SyntaxError,
                        "splats are not supported in this position",
                    ));
                }
            }
        }
        if !kwargs.is_empty() {
            for (name, expr) in &kwargs {
                self.add(Instruction::LoadConst(Value::from(*name)));
                ok!(self.compile_expr(expr));
            }
            self.add(Instruction::BuildKwargs(kwargs.len()));
            pushed += 1;
        }
        Ok(pushed)
    }

    fn compile_call(
        &mut self,
        c: &ast::Spanned<ast::Call<'_>>,
        with_caller: bool,
    ) -> Result<(), Error> {
        self.set_line_from_span(c.span());
        let has_splats = c
            .args
            .iter()
            .any(|x| matches!(x, ast::CallArg::PosSplat(_) | ast::CallArg::KwargSplat(_)));
        match c.identify_call() {
            ast::CallType::Function(name) => {
                let arg_count = ok!(self.compile_call_args(&c.args, has_splats, with_caller));
                self.add(Instruction::CallFunction(name.into(), arg_count));
            }
            ast::CallType::Block(name) => {
                self.add(Instruction::BeginCapture(CaptureMode::Capture));
                self.add(Instruction::CallBlock(name.into()));
                self.add(Instruction::EndCapture);
            }
            ast::CallType::Method(expr, name) => {
                ok!(self.compile_expr(expr));
                let arg_count = ok!(self.compile_call_args(&c.args, has_splats, with_caller));
                self.add(Instruction::CallMethod(
                    name.into(),
                    arg_count.map(|x| x + 1),
                ));
            }
            ast::CallType::Object(expr) => {
                ok!(self.compile_expr(expr));
                let arg_count = ok!(self.compile_call_args(&c.args, has_splats, with_caller));
                self.add(Instruction::CallObject(arg_count.map(|x| x + 1)));
            }
        };
        Ok(())
    }

    /// Compiles arguments for a call.
    ///
    /// For plain calls the arguments are pushed onto the stack in order
    /// and the count is returned.  When splats are involved the arguments
    /// collapse into a list and a map on the stack and `None` is returned.
    fn compile_call_args(
        &mut self,
        args: &[ast::CallArg<'_>],
        has_splats: bool,
        with_caller: bool,
    ) -> Result<Option<usize>, Error> {
        if !has_splats {
            let mut pushed = ok!(self.compile_call_args_with_kwargs(args, with_caller));
            if with_caller && !args_have_kwargs(args) {
                // caller still needs to travel as keyword argument
                self.add(Instruction::LoadConst(Value::from("caller")));
                self.add(Instruction::Lookup("caller".into()));
                self.add(Instruction::BuildKwargs(1));
                pushed += 1;
            }
            return Ok(Some(pushed));
        }

        // spread form: build one list of positional arguments and one map
        // of keyword arguments
        self.add(Instruction::BuildList(0));
        let mut kwargs: Vec<&ast::CallArg<'_>> = Vec::new();
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr) => {
                    ok!(self.compile_expr(expr));
                    self.add(Instruction::ListAppend);
                }
                ast::CallArg::PosSplat(expr) => {
                    ok!(self.compile_expr(expr));
                    self.add(Instruction::ListExtend);
                }
                other => kwargs.push(other),
            }
        }
        let mut pairs = 0;
        for arg in &kwargs {
            if let ast::CallArg::Kwarg(name, expr) = arg {
                self.add(Instruction::LoadConst(Value::from(*name)));
                ok!(self.compile_expr(expr));
                pairs += 1;
            }
        }
        if with_caller {
            self.add(Instruction::LoadConst(Value::from("caller")));
            self.add(Instruction::Lookup("caller".into()));
            pairs += 1;
        }
        self.add(Instruction::BuildKwargs(pairs));
        for arg in &kwargs {
            if let ast::CallArg::KwargSplat(expr) = arg {
                ok!(self.compile_expr(expr));
                self.add(Instruction::MapExtend);
            }
        }
        Ok(None)
    }

    /// Pushes plain positional args and a trailing kwargs map (optionally
    /// including the implicit caller).
    fn compile_call_args_with_kwargs(
        &mut self,
        args: &[ast::CallArg<'_>],
        with_caller: bool,
    ) -> Result<usize, Error> {
        let mut pushed = 0;
        let mut kwargs = Vec::new();
        for arg in args {
            match arg {
                ast::CallArg::Pos(expr) => {
                    ok!(self.compile_expr(expr));
                    pushed += 1;
                }
                ast::CallArg::Kwarg(name, expr) => kwargs.push((*name, expr)),
                _ => unreachable!("splats handled by caller"),
            }
        }
        if !kwargs.is_empty() {
            for (name, expr) in &kwargs {
                self.add(Instruction::LoadConst(Value::from(*name)));
                ok!(self.compile_expr(expr));
            }
            if with_caller {
                self.add(Instruction::LoadConst(Value::from("caller")));
                self.add(Instruction::Lookup("caller".into()));
            }
            self.add(Instruction::BuildKwargs(kwargs.len() + with_caller as usize));
            pushed += 1;
        }
        Ok(pushed)
    }

    fn compile_bin_op(&mut self, c: &ast::Spanned<ast::BinOp<'_>>) -> Result<(), Error> {
        self.set_line_from_span(c.span());
        let instr = match c.op {
            ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => {
                self.start_sc_bool();
                ok!(self.compile_expr(&c.left));
                self.sc_bool(matches!(c.op, ast::BinOpKind::ScAnd));
                ok!(self.compile_expr(&c.right));
                self.end_sc_bool();
                return Ok(());
            }
            ast::BinOpKind::Add => Instruction::Add,
            ast::BinOpKind::Sub => Instruction::Sub,
            ast::BinOpKind::Mul => Instruction::Mul,
            ast::BinOpKind::Div => Instruction::Div,
            ast::BinOpKind::FloorDiv => Instruction::IntDiv,
            ast::BinOpKind::Rem => Instruction::Rem,
            ast::BinOpKind::Pow => Instruction::Pow,
            ast::BinOpKind::Concat => Instruction::StringConcat,
        };
        ok!(self.compile_expr(&c.left));
        ok!(self.compile_expr(&c.right));
        self.add(instr);
        Ok(())
    }

    /// Converts the compiler into the instructions.
    pub fn finish(self) -> (Instructions, BTreeMap<Str, Instructions>) {
        assert!(self.pending_block.is_empty());
        (self.instructions, self.blocks)
    }
}

fn args_have_kwargs(args: &[ast::CallArg<'_>]) -> bool {
    args.iter()
        .any(|x| matches!(x, ast::CallArg::Kwarg(..) | ast::CallArg::KwargSplat(_)))
}

fn template_has_extends(children: &[ast::Stmt<'_>]) -> bool {
    fn walk(stmts: &[ast::Stmt<'_>]) -> bool {
        stmts.iter().any(|stmt| match stmt {
            ast::Stmt::Extends(_) => true,
            ast::Stmt::IfCond(cond) => walk(&cond.true_body) || walk(&cond.false_body),
            _ => false,
        })
    }
    walk(children)
}

/// Collects the names a body references without declaring them itself.
///
/// This over-approximates on purpose: names assigned within the body are
/// still collected since capturing an outer value of the same name is
/// harmless for the closure semantics.
fn find_undeclared_in_body<'a>(body: &[ast::Stmt<'a>], out: &mut BTreeSet<&'a str>) {
    for stmt in body {
        find_undeclared_in_stmt(stmt, out);
    }
}

fn find_undeclared_in_stmt<'a>(stmt: &ast::Stmt<'a>, out: &mut BTreeSet<&'a str>) {
    match stmt {
        ast::Stmt::Template(t) => find_undeclared_in_body(&t.children, out),
        ast::Stmt::EmitExpr(e) => find_undeclared_in_expr(&e.expr, out),
        ast::Stmt::EmitRaw(_) => {}
        ast::Stmt::ForLoop(f) => {
            find_undeclared_in_expr(&f.iter, out);
            if let Some(ref filter) = f.filter_expr {
                find_undeclared_in_expr(filter, out);
            }
            find_undeclared_in_body(&f.body, out);
            find_undeclared_in_body(&f.else_body, out);
        }
        ast::Stmt::IfCond(c) => {
            find_undeclared_in_expr(&c.expr, out);
            find_undeclared_in_body(&c.true_body, out);
            find_undeclared_in_body(&c.false_body, out);
        }
        ast::Stmt::WithBlock(w) => {
            for (_, expr) in &w.assignments {
                find_undeclared_in_expr(expr, out);
            }
            find_undeclared_in_body(&w.body, out);
        }
        ast::Stmt::Set(s) => find_undeclared_in_expr(&s.expr, out),
        ast::Stmt::SetBlock(s) => {
            if let Some(ref filter) = s.filter {
                find_undeclared_in_expr(filter, out);
            }
            find_undeclared_in_body(&s.body, out);
        }
        ast::Stmt::AutoEscape(a) => {
            find_undeclared_in_expr(&a.enabled, out);
            find_undeclared_in_body(&a.body, out);
        }
        ast::Stmt::FilterBlock(f) => {
            find_undeclared_in_expr(&f.filter, out);
            find_undeclared_in_body(&f.body, out);
        }
        ast::Stmt::Block(b) => find_undeclared_in_body(&b.body, out),
        ast::Stmt::Extends(e) => find_undeclared_in_expr(&e.name, out),
        ast::Stmt::Include(i) => find_undeclared_in_expr(&i.name, out),
        ast::Stmt::Import(i) => find_undeclared_in_expr(&i.expr, out),
        ast::Stmt::FromImport(f) => find_undeclared_in_expr(&f.expr, out),
        ast::Stmt::Macro(m) => {
            for default in &m.defaults {
                find_undeclared_in_expr(default, out);
            }
            find_undeclared_in_body(&m.body, out);
        }
        ast::Stmt::CallBlock(c) => {
            find_undeclared_in_expr(&c.call.expr, out);
            for arg in &c.call.args {
                find_undeclared_in_call_arg(arg, out);
            }
            find_undeclared_in_body(&c.macro_decl.body, out);
        }
        ast::Stmt::Do(d) => find_undeclared_in_expr(&d.expr, out),
        ast::Stmt::Trans(t) => {
            for (_, expr) in &t.assignments {
                find_undeclared_in_expr(expr, out);
            }
        }
        ast::Stmt::Break(_) | ast::Stmt::Continue(_) => {}
    }
}

fn find_undeclared_in_call_arg<'a>(arg: &ast::CallArg<'a>, out: &mut BTreeSet<&'a str>) {
    match arg {
        ast::CallArg::Pos(expr)
        | ast::CallArg::Kwarg(_, expr)
        | ast::CallArg::PosSplat(expr)
        | ast::CallArg::KwargSplat(expr) => find_undeclared_in_expr(expr, out),
    }
}

fn find_undeclared_in_expr<'a>(expr: &ast::Expr<'a>, out: &mut BTreeSet<&'a str>) {
    match expr {
        ast::Expr::Var(var) => {
            out.insert(var.id);
        }
        ast::Expr::Const(_) => {}
        ast::Expr::Slice(s) => {
            find_undeclared_in_expr(&s.expr, out);
            for part in [&s.start, &s.stop, &s.step].into_iter().flatten() {
                find_undeclared_in_expr(part, out);
            }
        }
        ast::Expr::UnaryOp(u) => find_undeclared_in_expr(&u.expr, out),
        ast::Expr::BinOp(b) => {
            find_undeclared_in_expr(&b.left, out);
            find_undeclared_in_expr(&b.right, out);
        }
        ast::Expr::Compare(c) => {
            find_undeclared_in_expr(&c.expr, out);
            for (_, operand) in &c.ops {
                find_undeclared_in_expr(operand, out);
            }
        }
        ast::Expr::IfExpr(i) => {
            find_undeclared_in_expr(&i.test_expr, out);
            find_undeclared_in_expr(&i.true_expr, out);
            if let Some(ref false_expr) = i.false_expr {
                find_undeclared_in_expr(false_expr, out);
            }
        }
        ast::Expr::Filter(f) => {
            if let Some(ref expr) = f.expr {
                find_undeclared_in_expr(expr, out);
            }
            for arg in &f.args {
                find_undeclared_in_call_arg(arg, out);
            }
        }
        ast::Expr::Test(t) => {
            find_undeclared_in_expr(&t.expr, out);
            for arg in &t.args {
                find_undeclared_in_call_arg(arg, out);
            }
        }
        ast::Expr::GetAttr(g) => find_undeclared_in_expr(&g.expr, out),
        ast::Expr::GetItem(g) => {
            find_undeclared_in_expr(&g.expr, out);
            find_undeclared_in_expr(&g.subscript_expr, out);
        }
        ast::Expr::Call(c) => {
            find_undeclared_in_expr(&c.expr, out);
            for arg in &c.args {
                find_undeclared_in_call_arg(arg, out);
            }
        }
        ast::Expr::List(l) => {
            for item in &l.items {
                find_undeclared_in_expr(item, out);
            }
        }
        ast::Expr::Map(m) => {
            for (key, value) in m.keys.iter().zip(m.values.iter()) {
                find_undeclared_in_expr(key, out);
                find_undeclared_in_expr(value, out);
            }
        }
    }
}
