//! Global functions and abstractions.
//!
//! This module provides the abstractions for functions that can be
//! registered as global functions to the environment via
//! [`add_function`](crate::Environment::add_function).
//!
//! # Custom Functions
//!
//! A custom global function is just a simple rust function which accepts
//! the state as first argument, optionally some additional arguments and
//! then returns a result.  Global functions are typically used to perform
//! a data loading operation.  For instance these functions can be used to
//! expose data to the template that hasn't been provided by the individual
//! render invocation.
//!
//! ```rust
//! # use torii::{Environment, State, Error, ErrorKind};
//! # let mut env = Environment::new();
//! fn include_file(_state: &State, name: String) -> Result<String, Error> {
//!     std::fs::read_to_string(&name)
//!         .map_err(|e| Error::new(
//!             ErrorKind::InvalidOperation,
//!             "cannot load file"
//!         ).with_source(e))
//! }
//!
//! env.add_function("include_file", include_file);
//! ```
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::value::{FunctionArgs, FunctionResult, Kwargs, Namespace, Object, Value, ValueMap};
use crate::vm::State;

type FuncFunc = dyn Fn(&State, &[Value]) -> Result<Value, Error> + Sync + Send;

/// A boxed function.
#[derive(Clone)]
pub(crate) struct BoxedFunction(Arc<FuncFunc>, &'static str);

/// A utility trait that represents global functions.
pub trait Function<Rv, Args>: Send + Sync + 'static {
    /// Calls a function with the given arguments.
    fn invoke(&self, state: &State, args: Args) -> Rv;
}

macro_rules! tuple_impls {
    ( $( $name:ident )* ) => {
        impl<F, Rv, $($name),*> Function<Rv, ($($name,)*)> for F
        where
            F: Fn(&State, $($name),*) -> Rv + Send + Sync + 'static,
            Rv: FunctionResult,
        {
            fn invoke(&self, state: &State, args: ($($name,)*)) -> Rv {
                #[allow(non_snake_case)]
                let ($($name,)*) = args;
                (self)(state, $($name,)*)
            }
        }
    };
}

tuple_impls! {}
tuple_impls! { A }
tuple_impls! { A B }
tuple_impls! { A B C }
tuple_impls! { A B C D }

impl BoxedFunction {
    /// Creates a new boxed function.
    pub fn new<F, Rv, Args>(f: F) -> BoxedFunction
    where
        F: Function<Rv, Args>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        BoxedFunction(
            Arc::new(move |state, args| -> Result<Value, Error> {
                f.invoke(state, ok!(FunctionArgs::from_values(args)))
                    .into_result()
            }),
            std::any::type_name::<F>(),
        )
    }

    /// Invokes the function.
    pub fn invoke(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.0)(state, args)
    }

    /// Creates a value from a boxed function.
    pub fn to_value(&self) -> Value {
        Value::from_object(self.clone())
    }
}

impl fmt::Debug for BoxedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            if self.1.is_empty() {
                "BoxedFunction"
            } else {
                self.1
            }
        )
    }
}

impl fmt::Display for BoxedFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Object for BoxedFunction {
    fn is_callable(&self) -> bool {
        true
    }

    fn call(&self, state: &State<'_>, args: &[Value]) -> Result<Value, Error> {
        self.invoke(state, args)
    }
}

/// Returns a range.
///
/// Return a list containing an arithmetic progression of integers.
/// `range(i, j)` returns `[i, i+1, i+2, ..., j-1]`.  `lower` defaults to 0.
/// When `step` is given, it specifies the increment (or decrement).  For
/// example, `range(4)` and `range(0, 4, 1)` return `[0, 1, 2, 3]`.  The end
/// point is omitted.
///
/// ```jinja
/// {% for i in range(10) %}{{ i }}{% endfor %}
/// ```
pub fn range(
    _state: &State,
    lower: i64,
    upper: Option<i64>,
    step: Option<i64>,
) -> Result<Vec<i64>, Error> {
    let (lower, upper) = match upper {
        Some(upper) => (lower, upper),
        None => (0, lower),
    };
    let step = step.unwrap_or(1);
    if step == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot create range with step of 0",
        ));
    }
    let mut rv = Vec::new();
    let mut i = lower;
    if step > 0 {
        while i < upper {
            rv.push(i);
            i += step;
        }
    } else {
        while i > upper {
            rv.push(i);
            i += step;
        }
    }
    if rv.len() > 100_000 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "range has too many elements",
        ));
    }
    Ok(rv)
}

/// Creates a dictionary.
///
/// This is a convenient alternative for a dictionary literal.
/// `{"foo": "bar"}` is the same as `dict(foo="bar")`.
///
/// ```jinja
/// {{ dict(foo="bar")["foo"] }} -> bar
/// ```
pub fn dict(_state: &State, value: Value) -> Result<Value, Error> {
    match value.as_map() {
        Some(map) => Ok(Value::from_map(std::sync::Arc::new(map.clone()))),
        None if value.is_undefined() => Ok(Value::from_map(Default::default())),
        None => Err(Error::new(
            ErrorKind::InvalidOperation,
            "dict source must be a map",
        )),
    }
}

/// Creates a new container that allows attribute assignment.
///
/// This function returns a value that supports assignments via the
/// `{% set %}` tag (`{% set ns.attr = 42 %}`).  Because assignments on a
/// namespace mutate the object itself, they are visible across scopes
/// which makes this the only way to propagate values out of loops or
/// blocks.
///
/// ```jinja
/// {% set ns = namespace(found=false) %}
/// {% for item in items %}
///   {% if item.check_something() %}{% set ns.found = true %}{% endif %}
/// {% endfor %}
/// Found item having something: {{ ns.found }}
/// ```
pub fn namespace(_state: &State, kwargs: Kwargs) -> Result<Value, Error> {
    let mut data = ValueMap::new();
    for (key, value) in kwargs.pairs() {
        data.insert(key, value);
    }
    Ok(Value::from_object(Namespace::new(data)))
}

/// Outputs the current context stringified.
///
/// This is a useful function to quickly figure out the state of affairs
/// in a template.  It emits a stringified debug dump of the current
/// engine state including the layers of the context, the current block
/// and auto escaping setting.
///
/// ```jinja
/// <pre>{{ debug() }}</pre>
/// ```
pub fn debug(state: &State) -> String {
    format!("{state:#?}")
}
