use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::compiler::codegen::CodeGenerator;
use crate::compiler::instructions::Instructions;
use crate::compiler::optimizer;
use crate::compiler::parser::parse_expr;
use crate::environment::Environment;
use crate::error::Error;
use crate::output::{NullWriter, Output};
use crate::utils::AutoEscape;
use crate::value::Value;
use crate::vm::Vm;

/// A handle to a compiled expression.
///
/// An expression is created via the
/// [`compile_expression`](Environment::compile_expression) method.  It
/// provides a method to evaluate the expression and return the result as
/// a value object.  This for instance can be used to evaluate simple
/// expressions from user provided input to implement features such as
/// dynamic filtering.
///
/// This is usually best paired with [`context!`](crate::context!) to pass
/// a single value to it.
///
/// # Example
///
/// ```rust
/// # use torii::{Environment, context};
/// let env = Environment::new();
/// let expr = env.compile_expression("number > 10 and number < 20").unwrap();
/// let rv = expr.eval(context!(number => 15)).unwrap();
/// assert!(rv.is_true());
/// ```
pub struct Expression<'env> {
    env: &'env Environment,
    instructions: Arc<Instructions>,
}

impl fmt::Debug for Expression<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("instructions", &self.instructions)
            .finish()
    }
}

impl<'env> Expression<'env> {
    pub(crate) fn compile(env: &'env Environment, expr: &str) -> Result<Expression<'env>, Error> {
        let mut ast = ok!(parse_expr(expr));
        optimizer::optimize_expr(&mut ast);
        let mut gen = CodeGenerator::new("<expression>".into(), expr.into());
        ok!(gen.compile_expr(&ast));
        let (instructions, _) = gen.finish();
        Ok(Expression {
            env,
            instructions: Arc::new(instructions),
        })
    }

    /// Evaluates the expression with some context.
    ///
    /// The result of the expression is returned as [`Value`].
    pub fn eval<S: Serialize>(&self, ctx: S) -> Result<Value, Error> {
        // reduce total amount of code falling under monomorphization into
        // this function, and share the rest in _eval.
        self._eval(Value::from_serialize(&ctx))
    }

    fn _eval(&self, root: Value) -> Result<Value, Error> {
        let mut null = NullWriter;
        let mut out = Output::null(&mut null);
        let vm = Vm::new(self.env);
        Ok(ok!(vm.eval(
            self.instructions.clone(),
            root,
            &Default::default(),
            &mut out,
            AutoEscape::None,
        ))
        .expect("expression evaluation did not leave a value"))
    }
}
