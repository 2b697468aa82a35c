use std::fmt;
use std::ops::Deref;

use crate::compiler::tokens::Span;
use crate::value::{Value, ValueMap};

/// Container for nodes with location info.
///
/// This container fulfills two purposes: it adds location information to
/// nodes, but it also ensures the nodes are heap allocated.  The latter is
/// useful to ensure that enum variants do not cause the enum to become too
/// large.
pub struct Spanned<T> {
    inner: Box<(T, Span)>,
}

impl<T> Spanned<T> {
    /// Creates a new spanned node.
    pub fn new(node: T, span: Span) -> Spanned<T> {
        Spanned {
            inner: Box::new((node, span)),
        }
    }

    /// Accesses the span.
    pub fn span(&self) -> Span {
        self.inner.1
    }
}

impl<T> Deref for Spanned<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner.0
    }
}

impl<T> std::ops::DerefMut for Spanned<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner.0
    }
}

impl<T: fmt::Debug> fmt::Debug for Spanned<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ok!(fmt::Debug::fmt(&self.inner.0, f));
        write!(f, "{:?}", self.inner.1)
    }
}

/// A statement node.
#[derive(Debug)]
pub enum Stmt<'a> {
    Template(Spanned<Template<'a>>),
    EmitExpr(Spanned<EmitExpr<'a>>),
    EmitRaw(Spanned<EmitRaw<'a>>),
    ForLoop(Spanned<ForLoop<'a>>),
    IfCond(Spanned<IfCond<'a>>),
    WithBlock(Spanned<WithBlock<'a>>),
    Set(Spanned<Set<'a>>),
    SetBlock(Spanned<SetBlock<'a>>),
    AutoEscape(Spanned<AutoEscape<'a>>),
    FilterBlock(Spanned<FilterBlock<'a>>),
    Block(Spanned<Block<'a>>),
    Import(Spanned<Import<'a>>),
    FromImport(Spanned<FromImport<'a>>),
    Extends(Spanned<Extends<'a>>),
    Include(Spanned<Include<'a>>),
    Macro(Spanned<Macro<'a>>),
    CallBlock(Spanned<CallBlock<'a>>),
    Do(Spanned<Do<'a>>),
    Trans(Spanned<Trans<'a>>),
    Continue(Spanned<Continue>),
    Break(Spanned<Break>),
}

impl Stmt<'_> {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Template(s) => s.span(),
            Stmt::EmitExpr(s) => s.span(),
            Stmt::EmitRaw(s) => s.span(),
            Stmt::ForLoop(s) => s.span(),
            Stmt::IfCond(s) => s.span(),
            Stmt::WithBlock(s) => s.span(),
            Stmt::Set(s) => s.span(),
            Stmt::SetBlock(s) => s.span(),
            Stmt::AutoEscape(s) => s.span(),
            Stmt::FilterBlock(s) => s.span(),
            Stmt::Block(s) => s.span(),
            Stmt::Import(s) => s.span(),
            Stmt::FromImport(s) => s.span(),
            Stmt::Extends(s) => s.span(),
            Stmt::Include(s) => s.span(),
            Stmt::Macro(s) => s.span(),
            Stmt::CallBlock(s) => s.span(),
            Stmt::Do(s) => s.span(),
            Stmt::Trans(s) => s.span(),
            Stmt::Continue(s) => s.span(),
            Stmt::Break(s) => s.span(),
        }
    }
}

/// An expression node.
#[allow(clippy::enum_variant_names)]
#[derive(Debug)]
pub enum Expr<'a> {
    Var(Spanned<Var<'a>>),
    Const(Spanned<Const>),
    Slice(Spanned<Slice<'a>>),
    UnaryOp(Spanned<UnaryOp<'a>>),
    BinOp(Spanned<BinOp<'a>>),
    Compare(Spanned<Compare<'a>>),
    IfExpr(Spanned<IfExpr<'a>>),
    Filter(Spanned<Filter<'a>>),
    Test(Spanned<Test<'a>>),
    GetAttr(Spanned<GetAttr<'a>>),
    GetItem(Spanned<GetItem<'a>>),
    Call(Spanned<Call<'a>>),
    List(Spanned<List<'a>>),
    Map(Spanned<Map<'a>>),
}

impl Expr<'_> {
    pub fn description(&self) -> &'static str {
        match self {
            Expr::Var(_) => "variable",
            Expr::Const(_) => "constant",
            Expr::Slice(_)
            | Expr::UnaryOp(_)
            | Expr::BinOp(_)
            | Expr::Compare(_)
            | Expr::IfExpr(_)
            | Expr::GetAttr(_)
            | Expr::GetItem(_) => "expression",
            Expr::Call(_) => "call",
            Expr::List(_) => "list literal",
            Expr::Map(_) => "map literal",
            Expr::Test(_) => "test expression",
            Expr::Filter(_) => "filter expression",
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Var(s) => s.span(),
            Expr::Const(s) => s.span(),
            Expr::Slice(s) => s.span(),
            Expr::UnaryOp(s) => s.span(),
            Expr::BinOp(s) => s.span(),
            Expr::Compare(s) => s.span(),
            Expr::IfExpr(s) => s.span(),
            Expr::Filter(s) => s.span(),
            Expr::Test(s) => s.span(),
            Expr::GetAttr(s) => s.span(),
            Expr::GetItem(s) => s.span(),
            Expr::Call(s) => s.span(),
            Expr::List(s) => s.span(),
            Expr::Map(s) => s.span(),
        }
    }

    /// If this expression is a literal, return its value.
    ///
    /// Negated numbers and nested containers of literals count as
    /// literals; anything involving lookups or operators does not.
    pub fn as_const(&self) -> Option<Value> {
        match self {
            Expr::Const(c) => Some(c.value.clone()),
            Expr::List(l) => l.as_const(),
            Expr::Map(m) => m.as_const(),
            Expr::UnaryOp(u) if matches!(u.op, UnaryOpKind::Neg) => {
                u.expr.as_const().and_then(|v| crate::value::ops::neg(&v).ok())
            }
            _ => None,
        }
    }
}

/// Root template node.
#[derive(Debug)]
pub struct Template<'a> {
    pub children: Vec<Stmt<'a>>,
}

/// A for loop.
#[derive(Debug)]
pub struct ForLoop<'a> {
    pub target: Expr<'a>,
    pub iter: Expr<'a>,
    pub filter_expr: Option<Expr<'a>>,
    pub recursive: bool,
    pub body: Vec<Stmt<'a>>,
    pub else_body: Vec<Stmt<'a>>,
}

/// An if/else condition.
#[derive(Debug)]
pub struct IfCond<'a> {
    pub expr: Expr<'a>,
    pub true_body: Vec<Stmt<'a>>,
    pub false_body: Vec<Stmt<'a>>,
}

/// A with block.
#[derive(Debug)]
pub struct WithBlock<'a> {
    pub assignments: Vec<(Expr<'a>, Expr<'a>)>,
    pub body: Vec<Stmt<'a>>,
}

/// A set statement.
#[derive(Debug)]
pub struct Set<'a> {
    pub target: Expr<'a>,
    pub expr: Expr<'a>,
}

/// A set capture statement.
#[derive(Debug)]
pub struct SetBlock<'a> {
    pub target: Expr<'a>,
    pub filter: Option<Expr<'a>>,
    pub body: Vec<Stmt<'a>>,
}

/// A block for inheritance elements.
#[derive(Debug)]
pub struct Block<'a> {
    pub name: &'a str,
    pub scoped: bool,
    pub required: bool,
    pub body: Vec<Stmt<'a>>,
}

/// An extends statement.
#[derive(Debug)]
pub struct Extends<'a> {
    pub name: Expr<'a>,
}

/// An include statement.
#[derive(Debug)]
pub struct Include<'a> {
    pub name: Expr<'a>,
    pub ignore_missing: bool,
    pub with_context: bool,
}

/// A full module import.
#[derive(Debug)]
pub struct Import<'a> {
    pub expr: Expr<'a>,
    pub name: &'a str,
    pub with_context: bool,
}

/// A "from" import.
#[derive(Debug)]
pub struct FromImport<'a> {
    pub expr: Expr<'a>,
    pub names: Vec<(&'a str, Option<&'a str>)>,
    pub with_context: bool,
}

/// An auto escape control block.
#[derive(Debug)]
pub struct AutoEscape<'a> {
    pub enabled: Expr<'a>,
    pub body: Vec<Stmt<'a>>,
}

/// Applies filters to a block.
#[derive(Debug)]
pub struct FilterBlock<'a> {
    pub filter: Expr<'a>,
    pub body: Vec<Stmt<'a>>,
}

/// Declares a macro.
#[derive(Debug)]
pub struct Macro<'a> {
    pub name: &'a str,
    pub args: Vec<Expr<'a>>,
    pub defaults: Vec<Expr<'a>>,
    pub body: Vec<Stmt<'a>>,
}

/// A call block.
#[derive(Debug)]
pub struct CallBlock<'a> {
    pub call: Spanned<Call<'a>>,
    pub macro_decl: Spanned<Macro<'a>>,
}

/// Evaluates an expression and discards the result.
#[derive(Debug)]
pub struct Do<'a> {
    pub expr: Expr<'a>,
}

/// A translation block.
///
/// The message bodies are captured at parse time into `%(name)s` style
/// strings; variable bindings for interpolation come from the opening
/// tag and from simple variables referenced in the body.
#[derive(Debug)]
pub struct Trans<'a> {
    pub assignments: Vec<(&'a str, Expr<'a>)>,
    pub singular: String,
    pub plural: Option<String>,
    pub count_var: Option<&'a str>,
}

/// Continue the innermost loop.
#[derive(Debug)]
pub struct Continue;

/// Break out of the innermost loop.
#[derive(Debug)]
pub struct Break;

/// Outputs the expression.
#[derive(Debug)]
pub struct EmitExpr<'a> {
    pub expr: Expr<'a>,
}

/// Outputs raw template code.
#[derive(Debug)]
pub struct EmitRaw<'a> {
    pub raw: &'a str,
}

/// Looks up a variable.
#[derive(Debug)]
pub struct Var<'a> {
    pub id: &'a str,
}

/// Loads a constant.
#[derive(Debug)]
pub struct Const {
    pub value: Value,
}

/// Represents a slice.
#[derive(Debug)]
pub struct Slice<'a> {
    pub expr: Expr<'a>,
    pub start: Option<Expr<'a>>,
    pub stop: Option<Expr<'a>>,
    pub step: Option<Expr<'a>>,
}

/// A kind of unary operator.
#[derive(Debug, Copy, Clone)]
pub enum UnaryOpKind {
    Not,
    Neg,
}

/// An unary operator expression.
#[derive(Debug)]
pub struct UnaryOp<'a> {
    pub op: UnaryOpKind,
    pub expr: Expr<'a>,
}

/// A kind of binary operator.
#[derive(Debug, Copy, Clone)]
pub enum BinOpKind {
    ScAnd,
    ScOr,
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Rem,
    Pow,
    Concat,
}

/// A binary operator expression.
#[derive(Debug)]
pub struct BinOp<'a> {
    pub op: BinOpKind,
    pub left: Expr<'a>,
    pub right: Expr<'a>,
}

/// A kind of comparison operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    In,
    NotIn,
}

/// A chained comparison expression.
///
/// `a < b < c` compares pairwise like `(a < b) and (b < c)` with every
/// operand evaluated exactly once.
#[derive(Debug)]
pub struct Compare<'a> {
    pub expr: Expr<'a>,
    pub ops: Vec<(CompareOp, Expr<'a>)>,
}

/// An if expression.
#[derive(Debug)]
pub struct IfExpr<'a> {
    pub test_expr: Expr<'a>,
    pub true_expr: Expr<'a>,
    pub false_expr: Option<Expr<'a>>,
}

/// A filter expression.
#[derive(Debug)]
pub struct Filter<'a> {
    pub name: &'a str,
    pub expr: Option<Expr<'a>>,
    pub args: Vec<CallArg<'a>>,
}

/// A test expression.
#[derive(Debug)]
pub struct Test<'a> {
    pub name: &'a str,
    pub expr: Expr<'a>,
    pub args: Vec<CallArg<'a>>,
}

/// An attribute lookup expression.
#[derive(Debug)]
pub struct GetAttr<'a> {
    pub expr: Expr<'a>,
    pub name: &'a str,
}

/// An item lookup expression.
#[derive(Debug)]
pub struct GetItem<'a> {
    pub expr: Expr<'a>,
    pub subscript_expr: Expr<'a>,
}

/// Calls something.
#[derive(Debug)]
pub struct Call<'a> {
    pub expr: Expr<'a>,
    pub args: Vec<CallArg<'a>>,
}

/// A call argument helper.
#[derive(Debug)]
pub enum CallArg<'a> {
    /// A positional argument.
    Pos(Expr<'a>),
    /// A keyword argument.
    Kwarg(&'a str, Expr<'a>),
    /// A `*args` style splat.
    PosSplat(Expr<'a>),
    /// A `**kwargs` style splat.
    KwargSplat(Expr<'a>),
}

/// Creates a list of values.
#[derive(Debug)]
pub struct List<'a> {
    pub items: Vec<Expr<'a>>,
}

impl List<'_> {
    pub fn as_const(&self) -> Option<Value> {
        self.items
            .iter()
            .map(|expr| expr.as_const())
            .collect::<Option<Vec<_>>>()
            .map(Value::from)
    }
}

/// Creates a map of values.
#[derive(Debug)]
pub struct Map<'a> {
    pub keys: Vec<Expr<'a>>,
    pub values: Vec<Expr<'a>>,
}

impl Map<'_> {
    pub fn as_const(&self) -> Option<Value> {
        let mut rv = ValueMap::new();
        for (key, value) in self.keys.iter().zip(self.values.iter()) {
            rv.insert(some!(key.as_const()), some!(value.as_const()));
        }
        Some(Value::from_map(std::sync::Arc::new(rv)))
    }
}

/// Defines the specific type of call.
#[derive(Debug)]
pub enum CallType<'ast, 'source> {
    Function(&'source str),
    Method(&'ast Expr<'source>, &'source str),
    Block(&'source str),
    Object(&'ast Expr<'source>),
}

impl<'a> Call<'a> {
    /// Try to isolate a method call.
    ///
    /// name + call and attribute lookup + call are really method
    /// calls which are easier to handle for the compiler as a separate
    /// thing.
    pub fn identify_call(&self) -> CallType<'_, 'a> {
        match self.expr {
            Expr::Var(ref var) => CallType::Function(var.id),
            Expr::GetAttr(ref attr) => {
                if let Expr::Var(ref var) = attr.expr {
                    if var.id == "self" {
                        return CallType::Block(attr.name);
                    }
                }
                CallType::Method(&attr.expr, attr.name)
            }
            _ => CallType::Object(&self.expr),
        }
    }
}
