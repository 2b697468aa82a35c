//! Test functions and abstractions.
//!
//! Test functions in this engine are like [filters](crate::filters) but a
//! different syntax is used to invoke them and they have to return boolean
//! values.  For instance the expression `{% if foo is odd %}` invokes the
//! [`is_odd`] test to check if the value is indeed an odd number.
//!
//! To create a custom test write a function that takes at least a
//! [`&State`](crate::State) and value argument and returns a boolean
//! result, then register it with
//! [`add_test`](crate::Environment::add_test).
//!
//! # Custom Tests
//!
//! A custom test function is just a simple function which accepts its
//! inputs as parameters and then returns a bool.  For instance the
//! following shows a test function which takes an input value and checks
//! if it's lowercase:
//!
//! ```
//! # use torii::{Environment, State};
//! # let mut env = Environment::new();
//! fn is_lowercase(_state: &State, value: String) -> bool {
//!    value.chars().all(|x| x.is_lowercase())
//! }
//!
//! env.add_test("lowercase", is_lowercase);
//! ```
//!
//! The engine will perform the necessary conversions automatically via the
//! [`FunctionArgs`](crate::value::FunctionArgs) trait.
use std::sync::Arc;

use crate::error::Error;
use crate::value::{ArgType, FunctionArgs, Value};
use crate::vm::State;

type TestFunc = dyn Fn(&State, &[Value]) -> Result<bool, Error> + Sync + Send;

#[derive(Clone)]
pub(crate) struct BoxedTest(Arc<TestFunc>);

/// A utility trait that represents the return value of tests.
///
/// It's implemented for [`bool`] and `Result<bool, Error>`.
pub trait TestResult {
    #[doc(hidden)]
    fn into_result(self) -> Result<bool, Error>;
}

impl TestResult for Result<bool, Error> {
    fn into_result(self) -> Result<bool, Error> {
        self
    }
}

impl TestResult for bool {
    fn into_result(self) -> Result<bool, Error> {
        Ok(self)
    }
}

/// A utility trait that represents test functions.
pub trait Test<V, Args>: Send + Sync + 'static {
    /// The result the test produces.
    type Result: TestResult;

    /// Performs a test on a value with the given arguments.
    fn perform(&self, state: &State, value: V, args: Args) -> Self::Result;
}

macro_rules! tuple_impls {
    ( $( $name:ident )* ) => {
        impl<Func, V, Rv, $($name),*> Test<V, ($($name,)*)> for Func
        where
            Func: Fn(&State, V, $($name),*) -> Rv + Send + Sync + 'static,
            Rv: TestResult,
        {
            type Result = Rv;

            fn perform(&self, state: &State, value: V, args: ($($name,)*)) -> Rv {
                #[allow(non_snake_case)]
                let ($($name,)*) = args;
                (self)(state, value, $($name,)*)
            }
        }
    };
}

tuple_impls! {}
tuple_impls! { A }
tuple_impls! { A B }
tuple_impls! { A B C }
tuple_impls! { A B C D }

impl BoxedTest {
    /// Creates a new boxed test.
    pub fn new<F, V, Args>(f: F) -> BoxedTest
    where
        F: Test<V, Args>,
        V: for<'a> ArgType<'a>,
        Args: for<'a> FunctionArgs<'a>,
    {
        BoxedTest(Arc::new(move |state, args| -> Result<bool, Error> {
            let (value, rest) = match args.split_first() {
                Some(rv) => rv,
                None => (&Value::UNDEFINED, &[][..]),
            };
            f.perform(
                state,
                ok!(ArgType::from_value(Some(value))),
                ok!(FunctionArgs::from_values(rest)),
            )
            .into_result()
        }))
    }

    /// Performs the test against a value and arguments.
    pub fn perform(&self, state: &State, args: &[Value]) -> Result<bool, Error> {
        (self.0)(state, args)
    }
}

/// Checks if a value is odd.
///
/// ```jinja
/// {{ 41 is odd }} -> true
/// ```
pub fn is_odd(_state: &State, v: Value) -> bool {
    i64::try_from(v).map_or(false, |x| x % 2 != 0)
}

/// Checks if a value is even.
///
/// ```jinja
/// {{ 42 is even }} -> true
/// ```
pub fn is_even(_state: &State, v: Value) -> bool {
    i64::try_from(v).map_or(false, |x| x % 2 == 0)
}

/// Checks if a value is divisible by another.
pub fn is_divisibleby(_state: &State, v: Value, other: Value) -> bool {
    match (i64::try_from(v), i64::try_from(other)) {
        (Ok(a), Ok(b)) if b != 0 => a % b == 0,
        _ => false,
    }
}

/// Checks if a value is undefined.
pub fn is_undefined(_state: &State, v: Value) -> bool {
    v.is_undefined()
}

/// Checks if a value is defined.
pub fn is_defined(_state: &State, v: Value) -> bool {
    !v.is_undefined()
}

/// Checks if a value is none.
pub fn is_none(_state: &State, v: Value) -> bool {
    v.is_none()
}

/// Checks if a value is a boolean.
pub fn is_boolean(_state: &State, v: Value) -> bool {
    matches!(v.kind(), crate::value::ValueKind::Bool)
}

/// Checks if a value is true.
pub fn is_true(_state: &State, v: Value) -> bool {
    matches!(v.0, crate::value::ValueRepr::Bool(true))
}

/// Checks if a value is false.
pub fn is_false(_state: &State, v: Value) -> bool {
    matches!(v.0, crate::value::ValueRepr::Bool(false))
}

/// Checks if this value is a number.
pub fn is_number(_state: &State, v: Value) -> bool {
    matches!(v.kind(), crate::value::ValueKind::Number)
}

/// Checks if this value is an integer.
pub fn is_integer(_state: &State, v: Value) -> bool {
    matches!(v.0, crate::value::ValueRepr::I64(_))
}

/// Checks if this value is a float.
pub fn is_float(_state: &State, v: Value) -> bool {
    matches!(v.0, crate::value::ValueRepr::F64(_))
}

/// Checks if this value is a string.
pub fn is_string(_state: &State, v: Value) -> bool {
    matches!(v.kind(), crate::value::ValueKind::String)
}

/// Checks if this value is a sequence.
pub fn is_sequence(_state: &State, v: Value) -> bool {
    matches!(v.kind(), crate::value::ValueKind::Seq)
}

/// Checks if this value is a mapping.
pub fn is_mapping(_state: &State, v: Value) -> bool {
    matches!(v.kind(), crate::value::ValueKind::Map)
}

/// Checks if this value can be iterated over.
pub fn is_iterable(_state: &State, v: Value) -> bool {
    v.try_iter().is_ok()
}

/// Checks if this value is callable.
pub fn is_callable(_state: &State, v: Value) -> bool {
    v.is_callable()
}

/// Checks if this value points to the same value as another.
///
/// For primitives this degrades into an equality comparison; for objects
/// the identity of the object is compared.
pub fn is_sameas(_state: &State, v: Value, other: Value) -> bool {
    match (v.as_object(), other.as_object()) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => v == other,
        _ => false,
    }
}

/// Checks if the value is all lowercase.
pub fn is_lower(_state: &State, v: String) -> bool {
    v.chars().all(|c| !c.is_uppercase())
}

/// Checks if the value is all uppercase.
pub fn is_upper(_state: &State, v: String) -> bool {
    v.chars().all(|c| !c.is_lowercase())
}

/// Checks if a value is equal to another (`eq`, `equalto`, `==`).
pub fn is_eq(_state: &State, v: Value, other: Value) -> bool {
    v == other
}

/// Checks if a value is not equal to another (`ne`, `!=`).
pub fn is_ne(_state: &State, v: Value, other: Value) -> bool {
    v != other
}

/// Checks if a value is less than another (`lt`, `<`).
pub fn is_lt(_state: &State, v: Value, other: Value) -> bool {
    v < other
}

/// Checks if a value is less than or equal to another (`le`, `<=`).
pub fn is_le(_state: &State, v: Value, other: Value) -> bool {
    v <= other
}

/// Checks if a value is greater than another (`gt`, `>`).
pub fn is_gt(_state: &State, v: Value, other: Value) -> bool {
    v > other
}

/// Checks if a value is greater than or equal to another (`ge`, `>=`).
pub fn is_ge(_state: &State, v: Value, other: Value) -> bool {
    v >= other
}

/// Checks if a value is contained in another (`in`).
pub fn is_in(_state: &State, v: Value, other: Value) -> bool {
    crate::value::ops::contains(&other, &v).map_or(false, |x| x.is_true())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basics() {
        fn test(_: &State, a: u32, b: u32) -> bool {
            a == b
        }

        let env = crate::Environment::new();
        let state = env.empty_state();
        let bx = BoxedTest::new(test);
        assert!(bx
            .perform(&state, &[Value::from(23), Value::from(23)])
            .unwrap());
    }
}
