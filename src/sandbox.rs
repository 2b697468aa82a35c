//! Sandboxing support for untrusted templates.
//!
//! A sandboxed environment intercepts attribute access, calls and a
//! configurable set of operators.  The policy decides what is permitted;
//! violations surface as errors of kind
//! [`SecurityError`](crate::ErrorKind::SecurityError).
//!
//! ```
//! # use torii::{Environment, ErrorKind, context};
//! let mut env = Environment::sandboxed();
//! env.add_template("t", "{{ secret.__class__ }}").unwrap();
//! let err = env.get_template("t").unwrap()
//!     .render(context!(secret => "x"))
//!     .unwrap_err();
//! assert_eq!(err.kind(), ErrorKind::SecurityError);
//! ```

use std::collections::BTreeSet;

use crate::error::{Error, ErrorKind};
use crate::value::{ops, Value};

/// Attributes that are never safe to access in a sandbox.
///
/// The list mirrors Python's introspection channels: method
/// resolution order, class objects, frame and code access
/// as well as anything dunder shaped.
const UNSAFE_ATTRIBUTES: &[&str] = &[
    "mro",
    "class",
    "globals",
    "code",
    "func_code",
    "func_globals",
    "func_closure",
    "gi_frame",
    "gi_code",
    "cr_frame",
    "cr_code",
];

/// The operators a sandbox policy can intercept.
pub const BINOP_SYMBOLS: &[&str] = &["+", "-", "*", "/", "//", "%", "**"];

/// The unary operators a sandbox policy can intercept.
pub const UNOP_SYMBOLS: &[&str] = &["-"];

/// Defines the decisions a sandboxed environment makes.
///
/// A policy is installed with
/// [`Environment::set_sandbox`](crate::Environment::set_sandbox).  Every
/// attribute access, call and (if interception is requested) operator
/// evaluation is routed through it.
pub trait SandboxPolicy: Send + Sync {
    /// Decides if an attribute of a value may be accessed.
    fn is_safe_attribute(&self, value: &Value, attr: &str) -> bool;

    /// Decides if a value may be called.
    ///
    /// The default implementation rejects values that declare themselves
    /// unsafe by exposing a truthy `unsafe_callable` or `alters_data`
    /// attribute.
    fn is_safe_callable(&self, value: &Value) -> bool {
        for marker in ["unsafe_callable", "alters_data"] {
            if value
                .get_attr(marker)
                .map_or(false, |x| !x.is_undefined() && x.is_true())
            {
                return false;
            }
        }
        true
    }

    /// Whether the given binary operator should be routed through
    /// [`call_binop`](Self::call_binop).
    fn intercepts_binop(&self, op: &str) -> bool {
        let _op = op;
        false
    }

    /// Whether the given unary operator should be routed through
    /// [`call_unop`](Self::call_unop).
    fn intercepts_unop(&self, op: &str) -> bool {
        let _op = op;
        false
    }

    /// Evaluates an intercepted binary operator.
    ///
    /// The default implementation dispatches to the regular operator
    /// implementations; overriding it allows rejecting or restricting
    /// individual operations.
    fn call_binop(&self, op: &str, lhs: &Value, rhs: &Value) -> Result<Value, Error> {
        match op {
            "+" => ops::add(lhs, rhs),
            "-" => ops::sub(lhs, rhs),
            "*" => ops::mul(lhs, rhs),
            "/" => ops::div(lhs, rhs),
            "//" => ops::int_div(lhs, rhs),
            "%" => ops::rem(lhs, rhs),
            "**" => ops::pow(lhs, rhs),
            _ => Err(Error::new(
                ErrorKind::SecurityError,
                format!("binary operator {op:?} is not allowed"),
            )),
        }
    }

    /// Evaluates an intercepted unary operator.
    fn call_unop(&self, op: &str, value: &Value) -> Result<Value, Error> {
        match op {
            "-" => ops::neg(value),
            _ => Err(Error::new(
                ErrorKind::SecurityError,
                format!("unary operator {op:?} is not allowed"),
            )),
        }
    }
}

/// The default sandbox policy.
///
/// Denies access to attributes with a leading underscore, the well known
/// host introspection attributes, and any additional names placed on the
/// deny list.
#[derive(Default, Debug, Clone)]
pub struct DefaultSandboxPolicy {
    denied_attributes: BTreeSet<String>,
    intercept_operators: bool,
}

impl DefaultSandboxPolicy {
    /// Creates the default policy.
    pub fn new() -> DefaultSandboxPolicy {
        DefaultSandboxPolicy::default()
    }

    /// Adds an extra attribute name to the deny list.
    pub fn deny_attribute<S: Into<String>>(mut self, attr: S) -> DefaultSandboxPolicy {
        self.denied_attributes.insert(attr.into());
        self
    }

    /// Requests that all arithmetic operators are routed through the
    /// policy rather than evaluated directly.
    pub fn intercept_operators(mut self) -> DefaultSandboxPolicy {
        self.intercept_operators = true;
        self
    }
}

impl SandboxPolicy for DefaultSandboxPolicy {
    fn is_safe_attribute(&self, _value: &Value, attr: &str) -> bool {
        let plain = attr.trim_matches('_');
        if attr.starts_with('_') {
            return false;
        }
        if UNSAFE_ATTRIBUTES.contains(&plain) || attr.starts_with("func_") {
            return false;
        }
        !self.denied_attributes.contains(attr)
    }

    fn intercepts_binop(&self, op: &str) -> bool {
        self.intercept_operators && BINOP_SYMBOLS.contains(&op)
    }

    fn intercepts_unop(&self, op: &str) -> bool {
        self.intercept_operators && UNOP_SYMBOLS.contains(&op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_attributes() {
        let policy = DefaultSandboxPolicy::new();
        let v = Value::from("x");
        assert!(!policy.is_safe_attribute(&v, "__class__"));
        assert!(!policy.is_safe_attribute(&v, "_private"));
        assert!(!policy.is_safe_attribute(&v, "mro"));
        assert!(!policy.is_safe_attribute(&v, "func_code"));
        assert!(policy.is_safe_attribute(&v, "name"));

        let policy = policy.deny_attribute("items");
        assert!(!policy.is_safe_attribute(&v, "items"));
    }

    #[test]
    fn test_operator_interception() {
        let policy = DefaultSandboxPolicy::new().intercept_operators();
        assert!(policy.intercepts_binop("**"));
        assert!(!policy.intercepts_binop("=="));
        assert_eq!(
            policy
                .call_binop("+", &Value::from(1), &Value::from(2))
                .unwrap(),
            Value::from(3)
        );
        assert_eq!(
            policy
                .call_binop("@", &Value::from(1), &Value::from(2))
                .unwrap_err()
                .kind(),
            ErrorKind::SecurityError
        );
    }
}
