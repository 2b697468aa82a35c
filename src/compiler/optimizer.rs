//! A simple constant folding pass over the AST.
//!
//! The optimizer replaces expression sub-trees that consist entirely of
//! constants with a single constant node.  It is deliberately conservative:
//! a node is only folded when its constant evaluation is known to succeed,
//! so that anything that would raise keeps raising at render time with the
//! correct location information.  Calls, filters, tests and lookups are
//! never folded since registries and context are not available at compile
//! time.

use std::mem;

use crate::compiler::ast::{self, Spanned};
use crate::compiler::tokens::Span;
use crate::value::{ops, Value};

/// Optimizes a template AST in place.
pub fn optimize(stmt: &mut ast::Stmt<'_>) {
    walk_stmt(stmt);
}

/// Optimizes a standalone expression in place.
pub fn optimize_expr(expr: &mut ast::Expr<'_>) {
    fold_expr(expr);
}

fn make_const(value: Value, span: Span) -> ast::Expr<'static> {
    ast::Expr::Const(Spanned::new(ast::Const { value }, span))
}

fn take_expr<'a>(slot: &mut ast::Expr<'a>) -> ast::Expr<'a> {
    mem::replace(slot, make_const(Value::UNDEFINED, Span::default()))
}

fn walk_body(body: &mut Vec<ast::Stmt<'_>>) {
    for stmt in body {
        walk_stmt(stmt);
    }
}

fn walk_stmt(stmt: &mut ast::Stmt<'_>) {
    match stmt {
        ast::Stmt::Template(t) => walk_body(&mut t.children),
        ast::Stmt::EmitExpr(e) => fold_expr(&mut e.expr),
        ast::Stmt::EmitRaw(_) => {}
        ast::Stmt::ForLoop(f) => {
            fold_expr(&mut f.iter);
            if let Some(ref mut filter) = f.filter_expr {
                fold_expr(filter);
            }
            walk_body(&mut f.body);
            walk_body(&mut f.else_body);
        }
        ast::Stmt::IfCond(c) => {
            fold_expr(&mut c.expr);
            walk_body(&mut c.true_body);
            walk_body(&mut c.false_body);
        }
        ast::Stmt::WithBlock(w) => {
            for (_, expr) in &mut w.assignments {
                fold_expr(expr);
            }
            walk_body(&mut w.body);
        }
        ast::Stmt::Set(s) => fold_expr(&mut s.expr),
        ast::Stmt::SetBlock(s) => {
            if let Some(ref mut filter) = s.filter {
                fold_expr(filter);
            }
            walk_body(&mut s.body);
        }
        ast::Stmt::AutoEscape(a) => {
            fold_expr(&mut a.enabled);
            walk_body(&mut a.body);
        }
        ast::Stmt::FilterBlock(f) => {
            fold_expr(&mut f.filter);
            walk_body(&mut f.body);
        }
        ast::Stmt::Block(b) => walk_body(&mut b.body),
        ast::Stmt::Extends(e) => fold_expr(&mut e.name),
        ast::Stmt::Include(i) => fold_expr(&mut i.name),
        ast::Stmt::Import(i) => fold_expr(&mut i.expr),
        ast::Stmt::FromImport(f) => fold_expr(&mut f.expr),
        ast::Stmt::Macro(m) => {
            for default in &mut m.defaults {
                fold_expr(default);
            }
            walk_body(&mut m.body);
        }
        ast::Stmt::CallBlock(c) => {
            fold_expr(&mut c.call.expr);
            for arg in &mut c.call.args {
                fold_call_arg(arg);
            }
            walk_body(&mut c.macro_decl.body);
        }
        ast::Stmt::Do(d) => fold_expr(&mut d.expr),
        ast::Stmt::Trans(t) => {
            for (_, expr) in &mut t.assignments {
                fold_expr(expr);
            }
        }
        ast::Stmt::Break(_) | ast::Stmt::Continue(_) => {}
    }
}

fn fold_call_arg(arg: &mut ast::CallArg<'_>) {
    match arg {
        ast::CallArg::Pos(expr)
        | ast::CallArg::Kwarg(_, expr)
        | ast::CallArg::PosSplat(expr)
        | ast::CallArg::KwargSplat(expr) => fold_expr(expr),
    }
}

/// Folds a single expression sub-tree bottom up.
fn fold_expr(expr: &mut ast::Expr<'_>) {
    // fold children first
    match expr {
        ast::Expr::Var(_) | ast::Expr::Const(_) => {}
        ast::Expr::Slice(s) => {
            fold_expr(&mut s.expr);
            if let Some(part) = &mut s.start {
                fold_expr(part);
            }
            if let Some(part) = &mut s.stop {
                fold_expr(part);
            }
            if let Some(part) = &mut s.step {
                fold_expr(part);
            }
        }
        ast::Expr::UnaryOp(u) => fold_expr(&mut u.expr),
        ast::Expr::BinOp(b) => {
            fold_expr(&mut b.left);
            fold_expr(&mut b.right);
        }
        ast::Expr::Compare(c) => {
            fold_expr(&mut c.expr);
            for (_, operand) in &mut c.ops {
                fold_expr(operand);
            }
        }
        ast::Expr::IfExpr(i) => {
            fold_expr(&mut i.test_expr);
            fold_expr(&mut i.true_expr);
            if let Some(ref mut false_expr) = i.false_expr {
                fold_expr(false_expr);
            }
        }
        ast::Expr::Filter(f) => {
            if let Some(ref mut inner) = f.expr {
                fold_expr(inner);
            }
            for arg in &mut f.args {
                fold_call_arg(arg);
            }
        }
        ast::Expr::Test(t) => {
            fold_expr(&mut t.expr);
            for arg in &mut t.args {
                fold_call_arg(arg);
            }
        }
        ast::Expr::GetAttr(g) => fold_expr(&mut g.expr),
        ast::Expr::GetItem(g) => {
            fold_expr(&mut g.expr);
            fold_expr(&mut g.subscript_expr);
        }
        ast::Expr::Call(c) => {
            fold_expr(&mut c.expr);
            for arg in &mut c.args {
                fold_call_arg(arg);
            }
        }
        ast::Expr::List(l) => {
            for item in &mut l.items {
                fold_expr(item);
            }
        }
        ast::Expr::Map(m) => {
            for key in &mut m.keys {
                fold_expr(key);
            }
            for value in &mut m.values {
                fold_expr(value);
            }
        }
    }

    // then try to collapse the node itself
    if let Some(folded) = fold_node(expr) {
        *expr = folded;
    }
}

fn const_of(expr: &ast::Expr<'_>) -> Option<Value> {
    match expr {
        ast::Expr::Const(c) => Some(c.value.clone()),
        _ => None,
    }
}

fn fold_node<'a>(expr: &mut ast::Expr<'a>) -> Option<ast::Expr<'a>> {
    let span = expr.span();
    match expr {
        ast::Expr::UnaryOp(u) => {
            let value = some!(const_of(&u.expr));
            match u.op {
                ast::UnaryOpKind::Not => Some(make_const(Value::from(!value.is_true()), span)),
                ast::UnaryOpKind::Neg => {
                    ops::neg(&value).ok().map(|value| make_const(value, span))
                }
            }
        }
        ast::Expr::BinOp(b) => {
            let left = some!(const_of(&b.left));
            match b.op {
                // short circuited logic collapses to one of the operand
                // expressions.  `and`/`or` return operands, not booleans.
                ast::BinOpKind::ScAnd => {
                    if left.is_true() {
                        return Some(take_expr(&mut b.right));
                    }
                    return Some(make_const(left, span));
                }
                ast::BinOpKind::ScOr => {
                    if left.is_true() {
                        return Some(make_const(left, span));
                    }
                    return Some(take_expr(&mut b.right));
                }
                _ => {}
            }
            let right = some!(const_of(&b.right));
            let folded = match b.op {
                ast::BinOpKind::Add => ops::add(&left, &right),
                ast::BinOpKind::Sub => ops::sub(&left, &right),
                ast::BinOpKind::Mul => ops::mul(&left, &right),
                ast::BinOpKind::Div => ops::div(&left, &right),
                ast::BinOpKind::FloorDiv => ops::int_div(&left, &right),
                ast::BinOpKind::Rem => ops::rem(&left, &right),
                ast::BinOpKind::Pow => ops::pow(&left, &right),
                ast::BinOpKind::Concat => Ok(ops::string_concat(left, &right)),
                ast::BinOpKind::ScAnd | ast::BinOpKind::ScOr => unreachable!(),
            };
            folded.ok().map(|value| make_const(value, span))
        }
        ast::Expr::Compare(c) => {
            // chained comparisons fold with short-circuit semantics when
            // every operand is a constant.
            let mut lhs = some!(const_of(&c.expr));
            for (op, operand) in &c.ops {
                let rhs = some!(const_of(operand));
                let holds = match op {
                    ast::CompareOp::Eq => lhs == rhs,
                    ast::CompareOp::Ne => lhs != rhs,
                    ast::CompareOp::Lt => lhs < rhs,
                    ast::CompareOp::Lte => lhs <= rhs,
                    ast::CompareOp::Gt => lhs > rhs,
                    ast::CompareOp::Gte => lhs >= rhs,
                    ast::CompareOp::In => some!(ops::contains(&rhs, &lhs).ok()).is_true(),
                    ast::CompareOp::NotIn => !some!(ops::contains(&rhs, &lhs).ok()).is_true(),
                };
                if !holds {
                    return Some(make_const(Value::from(false), span));
                }
                lhs = rhs;
            }
            Some(make_const(Value::from(true), span))
        }
        ast::Expr::IfExpr(i) => {
            let test = some!(const_of(&i.test_expr));
            if test.is_true() {
                Some(take_expr(&mut i.true_expr))
            } else {
                match i.false_expr {
                    Some(ref mut false_expr) => Some(take_expr(false_expr)),
                    // a conditional without else yields a lenient
                    // undefined regardless of the undefined policy
                    None => Some(make_const(Value::UNDEFINED, span)),
                }
            }
        }
        ast::Expr::List(l) => l.as_const().map(|value| make_const(value, span)),
        ast::Expr::Map(m) => m.as_const().map(|value| make_const(value, span)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::parser::parse_expr;

    fn folded(source: &str) -> Option<Value> {
        let mut expr = parse_expr(source).unwrap();
        optimize_expr(&mut expr);
        expr.as_const()
    }

    #[test]
    fn test_arithmetic_folds() {
        assert_eq!(folded("1 + 2 * 3"), Some(Value::from(7)));
        assert_eq!(folded("'a' ~ 'b'"), Some(Value::from("ab")));
        assert_eq!(folded("not 0"), Some(Value::from(true)));
    }

    #[test]
    fn test_comparison_chain_folds() {
        assert_eq!(folded("1 < 2 < 3"), Some(Value::from(true)));
        assert_eq!(folded("1 < 2 < 1"), Some(Value::from(false)));
    }

    #[test]
    fn test_short_circuit_folds_to_operand() {
        // `or` returns the operand, not a boolean
        assert_eq!(folded("0 or 42"), Some(Value::from(42)));
        assert_eq!(folded("23 and 42"), Some(Value::from(42)));
    }

    #[test]
    fn test_failing_operations_are_not_folded() {
        assert_eq!(folded("1 / 0"), None);
        assert_eq!(folded("'a' - 1"), None);
    }

    #[test]
    fn test_lookups_are_not_folded() {
        assert_eq!(folded("a + 1"), None);
    }
}
