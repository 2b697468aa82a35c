use std::fmt;

use crate::error::{Error, ErrorKind};
use crate::value::Value;
use crate::vm::State;

/// A trait that represents a dynamic object.
///
/// The engine uses the [`Value`] type to represent values that the engine
/// knows about.  Most of these values are primitives such as integers,
/// strings or maps.  However it is also possible to expose custom types
/// without undergoing a serialization step to the engine.  For this to work
/// a type needs to implement the [`Object`] trait and be wrapped in a value
/// with [`Value::from_object`](crate::value::Value::from_object).
///
/// The engine uses reference counted objects with interior mutability in
/// the value type.  This means that all trait methods take `&self` and types
/// like [`Mutex`](std::sync::Mutex) need to be used to enable mutability.
///
/// Objects need to implement [`Display`](std::fmt::Display) which is used
/// when the engine converts the object into a string.
pub trait Object: fmt::Display + fmt::Debug + Send + Sync {
    /// Invoked by the engine to get the attribute of an object.
    ///
    /// Where possible it's a good idea for this to align with the return
    /// value of [`attributes`](Self::attributes) but it's not necessary.
    ///
    /// If an attribute does not exist, `None` shall be returned.
    fn get_attr(&self, name: &str) -> Option<Value> {
        let _name = name;
        None
    }

    /// Invoked by the engine to set an attribute of an object.
    ///
    /// The default implementation refuses the assignment; only namespace
    /// style objects permit it.
    fn set_attr(&self, name: &str, value: Value) -> Result<(), Error> {
        let (_name, _value) = (name, value);
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "object does not support attribute assignment",
        ))
    }

    /// An enumeration of attributes that are known to exist on this object.
    ///
    /// The default implementation returns an empty slice.  If it is not
    /// possible to implement this, it's fine for the implementation to be
    /// omitted.  The enumeration here is used by the `for` loop to iterate
    /// over the attributes on the value.
    fn attributes(&self) -> &[&str] {
        &[]
    }

    /// Reports if the object is callable.
    ///
    /// Objects overriding [`call`](Self::call) should also override this;
    /// it feeds the `callable` test.
    fn is_callable(&self) -> bool {
        false
    }

    /// Called when the engine tries to call the object directly.
    ///
    /// The default implementation returns an error.
    fn call(&self, state: &State<'_>, args: &[Value]) -> Result<Value, Error> {
        let (_state, _args) = (state, args);
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "object is not callable",
        ))
    }

    /// Called when the engine tries to call a method on the object.
    ///
    /// The default implementation looks up the attribute and calls the
    /// resulting value.
    fn call_method(&self, state: &State<'_>, name: &str, args: &[Value]) -> Result<Value, Error> {
        if let Some(value) = self.get_attr(name) {
            return value.call(state, args);
        }
        Err(Error::new(
            ErrorKind::UnknownMethod,
            format!("object has no method named {name}"),
        ))
    }
}
