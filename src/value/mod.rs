//! Provides a dynamic value type abstraction.
//!
//! This module gives access to a dynamically typed value which is used by
//! the template engine during execution.
//!
//! For the most part the existence of the value type can be ignored as
//! the engine will perform the necessary conversions for you.  For instance
//! if you write a filter that converts a string you can directly declare the
//! filter to take a [`String`](std::string::String).  However for some more
//! advanced use cases it's useful to know that this type exists.
//!
//! # Converting Values
//!
//! Values are typically created via the [`From`] trait:
//!
//! ```
//! # use torii::value::Value;
//! let int_value = Value::from(42);
//! let none_value = Value::from(());
//! let true_value = Value::from(true);
//! ```
//!
//! The special [`Undefined`](Value::UNDEFINED) value also exists but does not
//! have a rust equivalent.  It can be created via the [`UNDEFINED`](Value::UNDEFINED)
//! constant.
//!
//! The engine will create values via an indirection via [`serde`] when
//! a template is rendered or an expression is evaluated.  This can also be
//! triggered manually by using the [`Value::from_serialize`] method.
//!
//! # Value Function Arguments
//!
//! [Filters](crate::filters) and [tests](crate::tests) can take values as
//! arguments but optionally also rust types directly.  This conversion for
//! function arguments is performed by the [`FunctionArgs`] and related traits
//! ([`ArgType`], [`FunctionResult`]).
//!
//! # Memory Management
//!
//! Values are immutable objects which are internally reference counted which
//! means they can be copied relatively cheaply.  Special care must be taken
//! so that cycles are not created to avoid causing memory leaks.
//!
//! # HTML Escaping
//!
//! The engine inherits the general desire to be clever about escaping.  For
//! this purpose a value will (when auto escaping is enabled) always be
//! escaped.  To prevent this behavior the [`safe`](crate::filters::safe)
//! filter can be used in the template.  Outside of templates the
//! [`Value::from_safe_string`] method can be used to achieve the same result.
//!
//! # Dynamic Objects
//!
//! Values can also hold "dynamic" objects.  These are objects which implement
//! the [`Object`] trait.  These can be used to implement dynamic functionality
//! such as stateful values and more.  Dynamic objects are internally also used
//! to implement the special `loop` variable, macros and namespaces.

use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};

pub use crate::value::argtypes::{from_args, ArgType, FunctionArgs, FunctionResult, Kwargs, Rest};
pub use crate::value::object::Object;

pub(crate) use crate::value::namespace::Namespace;

mod argtypes;
mod namespace;
mod object;
pub(crate) mod ops;
mod serialize;

/// The type of map used by values.
pub type ValueMap = BTreeMap<Value, Value>;

/// Describes the kind of value.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ValueKind {
    /// The value is undefined
    Undefined,
    /// The value is the none singleton ([`()`])
    None,
    /// The value is a [`bool`]
    Bool,
    /// The value is a number of a supported type.
    Number,
    /// The value is a string.
    String,
    /// The value is a sequence of other values.
    Seq,
    /// The value is a key/value mapping.
    Map,
    /// The value is a dynamic object.
    Dynamic,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            ValueKind::Undefined => "undefined",
            ValueKind::None => "none",
            ValueKind::Bool => "bool",
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Seq => "sequence",
            ValueKind::Map => "map",
            ValueKind::Dynamic => "object",
        })
    }
}

/// The type of string stored in a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum StringType {
    Normal,
    Safe,
}

/// The type of map stored in a value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MapType {
    Normal,
    Kwargs,
}

/// Remembers where an undefined value came from.
///
/// This information makes it into error messages when an invalid operation
/// is later performed on the undefined.
#[derive(Debug)]
pub(crate) struct UndefinedOrigin {
    pub name: Option<Arc<str>>,
    pub parent: Option<Arc<str>>,
}

impl UndefinedOrigin {
    pub fn describe(&self) -> String {
        match (&self.name, &self.parent) {
            (Some(name), Some(parent)) => {
                format!("{parent} has no attribute or item {name:?}")
            }
            (Some(name), None) => format!("{name} is undefined"),
            _ => "value is undefined".into(),
        }
    }
}

#[derive(Clone)]
pub(crate) enum ValueRepr {
    None,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(Arc<str>, StringType),
    Seq(Arc<Vec<Value>>),
    Map(Arc<ValueMap>, MapType),
    Dynamic(Arc<dyn Object>),
    Undefined(Option<Arc<UndefinedOrigin>>),
}

/// Represents a dynamically typed value in the template engine.
#[derive(Clone)]
pub struct Value(pub(crate) ValueRepr);

impl Default for Value {
    fn default() -> Value {
        Value::UNDEFINED
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ValueRepr::String(s, _) => fmt::Debug::fmt(&**s, f),
            _ => fmt::Display::fmt(self, f),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            ValueRepr::None => f.write_str("none"),
            ValueRepr::Undefined(_) => Ok(()),
            ValueRepr::Bool(val) => write!(f, "{val}"),
            ValueRepr::I64(val) => write!(f, "{val}"),
            ValueRepr::F64(val) => {
                if val.is_nan() {
                    f.write_str("NaN")
                } else if val.is_infinite() {
                    write!(f, "{}inf", if *val < 0.0 { "-" } else { "" })
                } else {
                    let mut num = val.to_string();
                    if !num.contains('.') && !num.contains('e') {
                        num.push_str(".0");
                    }
                    f.write_str(&num)
                }
            }
            ValueRepr::String(val, _) => f.write_str(val),
            ValueRepr::Seq(values) => {
                ok!(f.write_str("["));
                for (idx, val) in values.iter().enumerate() {
                    if idx > 0 {
                        ok!(f.write_str(", "));
                    }
                    ok!(fmt::Debug::fmt(val, f));
                }
                f.write_str("]")
            }
            ValueRepr::Map(m, _) => {
                ok!(f.write_str("{"));
                for (idx, (key, val)) in m.iter().enumerate() {
                    if idx > 0 {
                        ok!(f.write_str(", "));
                    }
                    ok!(fmt::Debug::fmt(key, f));
                    ok!(f.write_str(": "));
                    ok!(fmt::Debug::fmt(val, f));
                }
                f.write_str("}")
            }
            ValueRepr::Dynamic(obj) => fmt::Display::fmt(obj, f),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        fn type_rank(value: &Value) -> usize {
            match value.0 {
                ValueRepr::Undefined(_) => 0,
                ValueRepr::None => 1,
                ValueRepr::Bool(_) | ValueRepr::I64(_) | ValueRepr::F64(_) => 2,
                ValueRepr::String(..) => 3,
                ValueRepr::Seq(_) => 4,
                ValueRepr::Map(..) => 5,
                ValueRepr::Dynamic(_) => 6,
            }
        }

        match (&self.0, &other.0) {
            (ValueRepr::I64(a), ValueRepr::I64(b)) => a.cmp(b),
            (ValueRepr::String(a, _), ValueRepr::String(b, _)) => a.cmp(b),
            (ValueRepr::Seq(a), ValueRepr::Seq(b)) => a.cmp(b),
            (ValueRepr::Map(a, _), ValueRepr::Map(b, _)) => a.iter().cmp(b.iter()),
            (ValueRepr::Dynamic(a), ValueRepr::Dynamic(b)) => {
                (Arc::as_ptr(a) as *const () as usize).cmp(&(Arc::as_ptr(b) as *const () as usize))
            }
            _ => match (self.as_f64_lossy(), other.as_f64_lossy()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => type_rank(self).cmp(&type_rank(other)),
            },
        }
    }
}

impl Value {
    /// The undefined value.
    pub const UNDEFINED: Value = Value(ValueRepr::Undefined(None));

    /// Creates a value from something that can be serialized.
    ///
    /// This is the method that the engine uses to convert all render context
    /// data.  The conversion is lossless for all basic types, sequences and
    /// maps; other serde constructs are approximated by the closest value
    /// representation.
    pub fn from_serialize<T: serde::Serialize>(value: T) -> Value {
        serialize::to_value(value)
    }

    /// Creates a value from a safe string.
    ///
    /// A safe string is one that will bypass auto escaping.  For instance if
    /// you want to have the template engine render some HTML without the
    /// need for the `|safe` filter, you can use a value of this type instead.
    pub fn from_safe_string(value: String) -> Value {
        Value(ValueRepr::String(value.into(), StringType::Safe))
    }

    /// Creates a value from a dynamic object.
    pub fn from_object<T: Object + 'static>(value: T) -> Value {
        Value(ValueRepr::Dynamic(Arc::new(value)))
    }

    /// Creates a value from a reference counted dynamic object.
    pub fn from_dyn_object(value: Arc<dyn Object>) -> Value {
        Value(ValueRepr::Dynamic(value))
    }

    /// Creates a value from an owned map.
    pub fn from_map(value: Arc<ValueMap>) -> Value {
        Value(ValueRepr::Map(value, MapType::Normal))
    }

    pub(crate) fn from_kwargs(value: ValueMap) -> Value {
        Value(ValueRepr::Map(Arc::new(value), MapType::Kwargs))
    }

    /// Creates an undefined value that remembers where it came from.
    pub(crate) fn undefined_from_lookup(parent: Option<&Value>, name: &Value) -> Value {
        Value(ValueRepr::Undefined(Some(Arc::new(UndefinedOrigin {
            name: Some(name.to_string().into()),
            parent: parent.map(|p| Arc::from(p.kind().to_string())),
        }))))
    }

    pub(crate) fn undefined_from_name(name: &str) -> Value {
        Value(ValueRepr::Undefined(Some(Arc::new(UndefinedOrigin {
            name: Some(name.into()),
            parent: None,
        }))))
    }

    pub(crate) fn undefined_origin(&self) -> Option<&UndefinedOrigin> {
        match self.0 {
            ValueRepr::Undefined(Some(ref origin)) => Some(origin),
            _ => None,
        }
    }

    /// The error raised when an operation is not allowed on this undefined.
    pub(crate) fn undefined_error(&self) -> Error {
        Error::new(
            ErrorKind::UndefinedError,
            match self.undefined_origin() {
                Some(origin) => Cow::Owned(origin.describe()),
                None => Cow::Borrowed("value is undefined"),
            },
        )
    }

    /// Returns the kind of the value.
    ///
    /// This can be used to determine what's in the value before trying to
    /// perform operations on it.
    pub fn kind(&self) -> ValueKind {
        match self.0 {
            ValueRepr::None => ValueKind::None,
            ValueRepr::Bool(_) => ValueKind::Bool,
            ValueRepr::I64(_) | ValueRepr::F64(_) => ValueKind::Number,
            ValueRepr::String(..) => ValueKind::String,
            ValueRepr::Seq(_) => ValueKind::Seq,
            ValueRepr::Map(..) => ValueKind::Map,
            ValueRepr::Dynamic(_) => ValueKind::Dynamic,
            ValueRepr::Undefined(_) => ValueKind::Undefined,
        }
    }

    /// Returns `true` if the value is a number.
    pub fn is_number(&self) -> bool {
        matches!(self.0, ValueRepr::I64(_) | ValueRepr::F64(_))
    }

    /// Returns `true` if the map represents keyword arguments.
    pub(crate) fn is_kwargs(&self) -> bool {
        matches!(self.0, ValueRepr::Map(_, MapType::Kwargs))
    }

    /// Is this value true?
    pub fn is_true(&self) -> bool {
        match self.0 {
            ValueRepr::Bool(val) => val,
            ValueRepr::I64(val) => val != 0,
            ValueRepr::F64(val) => val != 0.0,
            ValueRepr::String(ref x, _) => !x.is_empty(),
            ValueRepr::None | ValueRepr::Undefined(_) => false,
            ValueRepr::Seq(ref x) => !x.is_empty(),
            ValueRepr::Map(ref x, _) => !x.is_empty(),
            ValueRepr::Dynamic(_) => true,
        }
    }

    /// Returns `true` if this value is safe.
    pub fn is_safe(&self) -> bool {
        matches!(self.0, ValueRepr::String(_, StringType::Safe))
    }

    /// Returns `true` if this value is undefined.
    pub fn is_undefined(&self) -> bool {
        matches!(self.0, ValueRepr::Undefined(_))
    }

    /// Returns `true` if this value can be called.
    pub fn is_callable(&self) -> bool {
        match self.0 {
            ValueRepr::Dynamic(ref obj) => obj.is_callable(),
            _ => false,
        }
    }

    /// Returns `true` if this value is none.
    pub fn is_none(&self) -> bool {
        matches!(self.0, ValueRepr::None)
    }

    /// If the value is a string, return it.
    pub fn as_str(&self) -> Option<&str> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s),
            _ => None,
        }
    }

    /// If the value is a sequence, borrow the items.
    pub fn as_slice(&self) -> Result<&[Value], Error> {
        match self.0 {
            ValueRepr::Seq(ref seq) => Ok(seq),
            ValueRepr::Undefined(_) | ValueRepr::None => Ok(&[]),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not a sequence", self.kind()),
            )),
        }
    }

    /// If the value is a dynamic object, borrow it.
    pub fn as_object(&self) -> Option<&Arc<dyn Object>> {
        match self.0 {
            ValueRepr::Dynamic(ref obj) => Some(obj),
            _ => None,
        }
    }

    /// If the value is a map, borrow it.
    pub(crate) fn as_map(&self) -> Option<&ValueMap> {
        match self.0 {
            ValueRepr::Map(ref m, _) => Some(m),
            _ => None,
        }
    }

    pub(crate) fn as_f64_lossy(&self) -> Option<f64> {
        Some(match self.0 {
            ValueRepr::Bool(x) => x as i64 as f64,
            ValueRepr::I64(x) => x as f64,
            ValueRepr::F64(x) => x,
            _ => return None,
        })
    }

    /// Returns the length of the contained value.
    ///
    /// Values without a length return `None`.
    pub fn len(&self) -> Option<usize> {
        match self.0 {
            ValueRepr::String(ref s, _) => Some(s.chars().count()),
            ValueRepr::Seq(ref items) => Some(items.len()),
            ValueRepr::Map(ref items, _) => Some(items.len()),
            ValueRepr::Dynamic(ref obj) => Some(obj.attributes().len()),
            _ => None,
        }
    }

    /// Returns `true` if the value is empty.
    pub fn is_empty(&self) -> Option<bool> {
        self.len().map(|x| x == 0)
    }

    /// Looks up an attribute by attribute name.
    ///
    /// The lookup order mirrors Jinja2: attributes are tried
    /// first, then items.  If the attribute does not exist an undefined
    /// value carrying the lookup information is returned.
    pub fn get_attr(&self, key: &str) -> Result<Value, Error> {
        let rv = match self.0 {
            ValueRepr::Map(ref items, _) => {
                let lookup_key = Value::from(key);
                items.get(&lookup_key).cloned()
            }
            ValueRepr::Dynamic(ref obj) => obj.get_attr(key),
            ValueRepr::Undefined(_) => return Err(self.undefined_error()),
            _ => None,
        };
        Ok(rv.unwrap_or_else(|| {
            Value::undefined_from_lookup(Some(self), &Value::from(key))
        }))
    }

    /// Looks up an item (or attribute) by value.
    ///
    /// This is the reverse lookup order of [`get_attr`](Self::get_attr):
    /// items are tried first, then attributes.
    pub fn get_item(&self, key: &Value) -> Result<Value, Error> {
        if let ValueRepr::Undefined(_) = self.0 {
            return Err(self.undefined_error());
        }
        Ok(self
            .get_item_opt(key)
            .unwrap_or_else(|| Value::undefined_from_lookup(Some(self), key)))
    }

    fn get_item_opt(&self, key: &Value) -> Option<Value> {
        match self.0 {
            ValueRepr::Map(ref items, _) => {
                if let Some(value) = items.get(key) {
                    return Some(value.clone());
                }
                None
            }
            ValueRepr::Seq(ref items) => {
                if let ValueRepr::I64(idx) = key.0 {
                    let idx = some!(index_for_offset(idx, items.len()));
                    items.get(idx).cloned()
                } else {
                    None
                }
            }
            ValueRepr::String(ref s, _) => {
                if let ValueRepr::I64(idx) = key.0 {
                    let idx = some!(index_for_offset(idx, s.chars().count()));
                    s.chars().nth(idx).map(|c| Value::from(c.to_string()))
                } else {
                    None
                }
            }
            ValueRepr::Dynamic(ref obj) => match key.as_str() {
                Some(name) => obj.get_attr(name),
                None => None,
            },
            _ => None,
        }
    }

    /// Sets an attribute on this value if it supports attribute assignment.
    ///
    /// Only namespace objects support this; it is the single cross-scope
    /// write path of the engine.
    pub(crate) fn set_attr(&self, key: &str, value: Value) -> Result<(), Error> {
        match self.0 {
            ValueRepr::Dynamic(ref obj) => obj.set_attr(key, value),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot assign attributes to value of type {}", self.kind()),
            )),
        }
    }

    /// Calls the value as function.
    pub fn call(
        &self,
        state: &crate::vm::State<'_>,
        args: &[Value],
    ) -> Result<Value, Error> {
        if let ValueRepr::Dynamic(ref obj) = self.0 {
            obj.call(state, args)
        } else {
            Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} is not callable", self.kind()),
            ))
        }
    }

    /// Calls a method on the value.
    ///
    /// Some basic methods are provided for strings and maps so that
    /// templates ported from Jinja2 keep working.
    pub fn call_method(
        &self,
        state: &crate::vm::State<'_>,
        name: &str,
        args: &[Value],
    ) -> Result<Value, Error> {
        match self.0 {
            ValueRepr::Dynamic(ref obj) => return obj.call_method(state, name, args),
            ValueRepr::Map(ref map, _) => {
                if let Some(value) = map.get(&Value::from(name)) {
                    return value.call(state, args);
                }
                if let Some(rv) = ok!(map_methods(map, name, args)) {
                    return Ok(rv);
                }
            }
            ValueRepr::String(ref s, _) => {
                if let Some(rv) = ok!(string_methods(s, name, args)) {
                    return Ok(rv);
                }
            }
            ValueRepr::Undefined(_) => return Err(self.undefined_error()),
            _ => {}
        }
        Err(Error::new(
            ErrorKind::UnknownMethod,
            format!("object has no method named {name}"),
        ))
    }

    /// Iterates over the value.
    ///
    /// Sequences iterate over the items, maps over the keys and strings
    /// over the characters.  The undefined and none values iterate as an
    /// empty sequence.
    pub fn try_iter(&self) -> Result<ValueIterator, Error> {
        let state = match self.0 {
            ValueRepr::None | ValueRepr::Undefined(_) => ValueIteratorState::Empty,
            ValueRepr::Seq(ref seq) => ValueIteratorState::Seq(0, seq.clone()),
            ValueRepr::Map(ref map, _) => {
                ValueIteratorState::Owned(map.keys().cloned().collect::<Vec<_>>().into_iter())
            }
            ValueRepr::String(ref s, _) => ValueIteratorState::Owned(
                s.chars()
                    .map(|c| Value::from(c.to_string()))
                    .collect::<Vec<_>>()
                    .into_iter(),
            ),
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("value of type {} is not iterable", self.kind()),
                ))
            }
        };
        Ok(ValueIterator { state })
    }

    /// Iterates over pairs of key and value.
    pub(crate) fn try_iter_pairs(&self) -> Result<Vec<(Value, Value)>, Error> {
        match self.0 {
            ValueRepr::Map(ref map, _) => {
                Ok(map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            }
            ValueRepr::Seq(ref seq) => Ok(seq
                .iter()
                .enumerate()
                .map(|(idx, v)| (Value::from(idx as i64), v.clone()))
                .collect()),
            ValueRepr::None | ValueRepr::Undefined(_) => Ok(Vec::new()),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("value of type {} cannot be iterated in pairs", self.kind()),
            )),
        }
    }
}

/// The built-in methods of strings.
fn string_methods(s: &str, name: &str, args: &[Value]) -> Result<Option<Value>, Error> {
    let rv = match name {
        "upper" => {
            ok!(no_args(name, args));
            Value::from(s.to_uppercase())
        }
        "lower" => {
            ok!(no_args(name, args));
            Value::from(s.to_lowercase())
        }
        "strip" => {
            ok!(no_args(name, args));
            Value::from(s.trim())
        }
        "title" => {
            ok!(no_args(name, args));
            let mut rv = String::new();
            let mut capitalize = true;
            for c in s.chars() {
                if c.is_alphanumeric() {
                    if capitalize {
                        rv.extend(c.to_uppercase());
                    } else {
                        rv.extend(c.to_lowercase());
                    }
                    capitalize = false;
                } else {
                    rv.push(c);
                    capitalize = true;
                }
            }
            Value::from(rv)
        }
        "split" => {
            let sep = match args.first() {
                Some(sep) if !sep.is_none() && !sep.is_undefined() => Some(sep.to_string()),
                _ => None,
            };
            let parts: Vec<Value> = match sep {
                Some(sep) => s.split(&sep as &str).map(Value::from).collect(),
                None => s.split_whitespace().map(Value::from).collect(),
            };
            Value::from(parts)
        }
        "replace" => {
            let from = ok!(arg_as_str(name, args, 0));
            let to = ok!(arg_as_str(name, args, 1));
            Value::from(s.replace(&from, &to))
        }
        "startswith" => Value::from(s.starts_with(&ok!(arg_as_str(name, args, 0)) as &str)),
        "endswith" => Value::from(s.ends_with(&ok!(arg_as_str(name, args, 0)) as &str)),
        _ => return Ok(None),
    };
    Ok(Some(rv))
}

/// The built-in methods of maps.
fn map_methods(map: &ValueMap, name: &str, args: &[Value]) -> Result<Option<Value>, Error> {
    let rv = match name {
        "keys" => {
            ok!(no_args(name, args));
            Value::from(map.keys().cloned().collect::<Vec<_>>())
        }
        "values" => {
            ok!(no_args(name, args));
            Value::from(map.values().cloned().collect::<Vec<_>>())
        }
        "items" => {
            ok!(no_args(name, args));
            Value::from(
                map.iter()
                    .map(|(k, v)| Value::from(vec![k.clone(), v.clone()]))
                    .collect::<Vec<_>>(),
            )
        }
        "get" => {
            let key = ok!(args.first().ok_or_else(|| Error::new(
                ErrorKind::MissingArgument,
                "get requires a key"
            )));
            map.get(key)
                .cloned()
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::UNDEFINED)
        }
        _ => return Ok(None),
    };
    Ok(Some(rv))
}

fn no_args(name: &str, args: &[Value]) -> Result<(), Error> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(Error::new(
            ErrorKind::TooManyArguments,
            format!("{name} takes no arguments"),
        ))
    }
}

fn arg_as_str(name: &str, args: &[Value], idx: usize) -> Result<String, Error> {
    match args.get(idx) {
        Some(value) => Ok(value.to_string()),
        None => Err(Error::new(
            ErrorKind::MissingArgument,
            format!("missing argument to {name}"),
        )),
    }
}

fn index_for_offset(idx: i64, len: usize) -> Option<usize> {
    if idx < 0 {
        len.checked_sub(-idx as usize)
    } else {
        Some(idx as usize)
    }
}

/// Iterates over a value.
pub struct ValueIterator {
    state: ValueIteratorState,
}

enum ValueIteratorState {
    Empty,
    Seq(usize, Arc<Vec<Value>>),
    Owned(std::vec::IntoIter<Value>),
}

impl Iterator for ValueIterator {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match self.state {
            ValueIteratorState::Empty => None,
            ValueIteratorState::Seq(ref mut idx, ref seq) => {
                let rv = seq.get(*idx).cloned();
                *idx += 1;
                rv
            }
            ValueIteratorState::Owned(ref mut iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rv = self.len();
        (rv, Some(rv))
    }
}

impl ExactSizeIterator for ValueIterator {
    fn len(&self) -> usize {
        match self.state {
            ValueIteratorState::Empty => 0,
            ValueIteratorState::Seq(idx, ref seq) => seq.len().saturating_sub(idx),
            ValueIteratorState::Owned(ref iter) => iter.len(),
        }
    }
}

impl fmt::Debug for ValueIterator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueIterator").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_sort_and_eq() {
        let mut v = vec![
            Value::from(100u64),
            Value::from(80u64),
            Value::from(30i32),
            Value::from(true),
            Value::from(false),
            Value::from(99i64),
            Value::from(1000f64),
        ];
        v.sort();
        assert_eq!(
            v,
            vec![
                Value::from(false),
                Value::from(true),
                Value::from(30),
                Value::from(80),
                Value::from(99),
                Value::from(100),
                Value::from(1000.0),
            ]
        );
        assert_eq!(Value::from(1), Value::from(1.0));
        assert_eq!(Value::from("a"), Value::from_safe_string("a".into()));
    }

    #[test]
    fn test_string_indexing() {
        let s = Value::from("Hällo");
        assert_eq!(s.get_item(&Value::from(1)).unwrap(), Value::from("ä"));
        assert_eq!(s.get_item(&Value::from(-1)).unwrap(), Value::from("o"));
        assert_eq!(s.len(), Some(5));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from(()).to_string(), "none");
        assert_eq!(Value::UNDEFINED.to_string(), "");
        assert_eq!(Value::from(1.0).to_string(), "1.0");
        assert_eq!(Value::from(vec![1, 2]).to_string(), "[1, 2]");
        assert_eq!(
            Value::from(vec!["a", "b"]).to_string(),
            "[\"a\", \"b\"]"
        );
    }

    #[test]
    fn test_undefined_origin() {
        let m = Value::from_serialize(std::collections::BTreeMap::from([("a", 1)]));
        let missing = m.get_attr("b").unwrap();
        assert!(missing.is_undefined());
        let err = missing.undefined_error();
        assert_eq!(err.kind(), crate::ErrorKind::UndefinedError);
        assert!(err.detail().unwrap().contains("\"b\""));
    }
}
