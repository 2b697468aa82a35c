use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use crate::error::{Error, ErrorKind};
use crate::value::{MapType, Value, ValueMap, ValueRepr};

/// A utility trait that represents the return value of functions and filters.
///
/// It's implemented for the following types:
///
/// * `Rv` where `Rv` implements `Into<Value>`
/// * `Result<Rv, Error>` where `Rv` implements `Into<Value>`
pub trait FunctionResult {
    #[doc(hidden)]
    fn into_result(self) -> Result<Value, Error>;
}

impl<I: Into<Value>> FunctionResult for Result<I, Error> {
    fn into_result(self) -> Result<Value, Error> {
        self.map(Into::into)
    }
}

impl<I: Into<Value>> FunctionResult for I {
    fn into_result(self) -> Result<Value, Error> {
        Ok(self.into())
    }
}

/// Helper trait representing valid filter, test and function arguments.
///
/// Since it's more convenient to write filters and tests with concrete
/// types instead of values, this helper trait exists to automatically
/// perform this conversion.  It is implemented for functions up to an
/// arity of 5 parameters.
pub trait FunctionArgs<'a>: Sized {
    /// Converts to function arguments from a slice of values.
    fn from_values(values: &'a [Value]) -> Result<Self, Error>;
}

/// Utility function to convert a slice of values into arguments.
///
/// This performs the same conversion that [filters](crate::filters) use to
/// marshal their arguments.
pub fn from_args<'a, Args: FunctionArgs<'a>>(values: &'a [Value]) -> Result<Args, Error> {
    Args::from_values(values)
}

/// A trait implemented by all filter/test argument types.
///
/// This trait is used by [`FunctionArgs`].  It's implemented for many common
/// types that are typically passed to filters, tests or functions.  It's
/// implemented for the following types:
///
/// * unsigned integers: [`u8`], [`u16`], [`u32`], [`u64`], [`usize`]
/// * signed integers: [`i8`], [`i16`], [`i32`], [`i64`]
/// * floats: [`f64`]
/// * bool: [`bool`]
/// * string: [`String`], [`&str`]
/// * values: [`Value`]
/// * vectors: [`Vec<T>`]
///
/// The type is also implemented for optional values (`Option<T>`) which is
/// used to encode optional parameters to filters, functions or tests.
/// Additionally it's implemented for [`Rest<T>`] which is used to encode the
/// remaining arguments of a function call, and [`Kwargs`] which collects the
/// keyword arguments of the caller.
pub trait ArgType<'a>: Sized {
    #[doc(hidden)]
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error>;

    #[doc(hidden)]
    #[inline(always)]
    fn from_rest_values(_values: &'a [Value]) -> Result<Option<Self>, Error> {
        Ok(None)
    }

    /// A kwargs sink consumes the trailing keyword arguments map of the
    /// caller no matter how many positional arguments were provided.
    #[doc(hidden)]
    #[inline(always)]
    fn is_kwargs_sink() -> bool {
        false
    }
}

macro_rules! tuple_impls {
    ( $( $name:ident )* $(; ( $($alt_name:ident)* ) $rest_name:ident)? ) => {
        impl<'a, $($name),*> FunctionArgs<'a> for ($($name,)*)
            where $($name: ArgType<'a>,)*
        {
            fn from_values(values: &'a [Value]) -> Result<Self, Error> {
                #![allow(non_snake_case, unused)]
                let arg_count = 0 $(
                    + { let $name = (); 1 }
                )*;

                $(
                    // a trailing kwargs sink picks the kwargs map off the
                    // end so that positional and keyword arguments mix.
                    if $rest_name::is_kwargs_sink() {
                        let (pos_values, kwargs_value) = match values.split_last() {
                            Some((last, rest)) if last.is_kwargs() => (rest, Some(last)),
                            _ => (values, None),
                        };
                        if pos_values.len() + 1 > arg_count {
                            return Err(Error::new(
                                ErrorKind::TooManyArguments,
                                "received unexpected extra arguments",
                            ));
                        }
                        let mut idx = 0;
                        $(
                            let $alt_name = ok!(ArgType::from_value(pos_values.get(idx)));
                            idx += 1;
                        )*
                        let rest = ok!($rest_name::from_value(kwargs_value));
                        return Ok(( $($alt_name,)* rest ,));
                    }

                    let rest_values = values.get(arg_count - 1..).unwrap_or_default();
                    if let Some(rest) = ok!($rest_name::from_rest_values(rest_values)) {
                        let mut idx = 0;
                        $(
                            let $alt_name = ok!(ArgType::from_value(values.get(idx)));
                            idx += 1;
                        )*
                        return Ok(( $($alt_name,)* rest ,));
                    }
                )?

                if values.len() > arg_count {
                    return Err(Error::new(
                        ErrorKind::TooManyArguments,
                        "received unexpected extra arguments",
                    ));
                }
                {
                    let mut idx = 0;
                    $(
                        let $name = ok!(ArgType::from_value(values.get(idx)));
                        idx += 1;
                    )*
                    Ok(( $($name,)* ))
                }
            }
        }
    };
}

tuple_impls! {}
tuple_impls! { A; () A }
tuple_impls! { A B; (A) B }
tuple_impls! { A B C; (A B) C }
tuple_impls! { A B C D; (A B C) D }
tuple_impls! { A B C D E; (A B C D) E }

impl From<ValueRepr> for Value {
    #[inline(always)]
    fn from(val: ValueRepr) -> Value {
        Value(val)
    }
}

impl<'a> From<&'a str> for Value {
    #[inline(always)]
    fn from(val: &'a str) -> Self {
        ValueRepr::String(val.into(), crate::value::StringType::Normal).into()
    }
}

impl From<String> for Value {
    #[inline(always)]
    fn from(val: String) -> Self {
        ValueRepr::String(val.into(), crate::value::StringType::Normal).into()
    }
}

impl<'a> From<std::borrow::Cow<'a, str>> for Value {
    #[inline(always)]
    fn from(val: std::borrow::Cow<'a, str>) -> Self {
        match val {
            std::borrow::Cow::Borrowed(x) => x.into(),
            std::borrow::Cow::Owned(x) => x.into(),
        }
    }
}

impl From<()> for Value {
    #[inline(always)]
    fn from(_: ()) -> Self {
        ValueRepr::None.into()
    }
}

impl<K: Into<Value>, V: Into<Value>> From<BTreeMap<K, V>> for Value {
    fn from(val: BTreeMap<K, V>) -> Self {
        ValueRepr::Map(
            std::sync::Arc::new(val.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
            MapType::Normal,
        )
        .into()
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(val: Vec<T>) -> Self {
        ValueRepr::Seq(std::sync::Arc::new(
            val.into_iter().map(|x| x.into()).collect(),
        ))
        .into()
    }
}

macro_rules! value_from {
    ($src:ty, $dst:ident) => {
        impl From<$src> for Value {
            #[inline(always)]
            fn from(val: $src) -> Self {
                ValueRepr::$dst(val as _).into()
            }
        }
    };
}

value_from!(bool, Bool);
value_from!(u8, I64);
value_from!(u16, I64);
value_from!(u32, I64);
value_from!(u64, I64);
value_from!(i8, I64);
value_from!(i16, I64);
value_from!(i32, I64);
value_from!(i64, I64);
value_from!(f32, F64);
value_from!(f64, F64);

impl From<usize> for Value {
    fn from(val: usize) -> Self {
        Value::from(val as i64)
    }
}

impl From<char> for Value {
    fn from(val: char) -> Self {
        Value::from(val.to_string())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => Value::from(()),
        }
    }
}

macro_rules! primitive_try_from {
    ($ty:ident, {
        $($pat:pat $(if $if_expr:expr)? => $expr:expr,)*
    }) => {
        impl TryFrom<Value> for $ty {
            type Error = Error;

            fn try_from(value: Value) -> Result<Self, Self::Error> {
                let opt = match value.0 {
                    $($pat $(if $if_expr)? => TryFrom::try_from($expr).ok(),)*
                    _ => None
                };
                opt.ok_or_else(|| {
                    Error::new(
                        ErrorKind::InvalidOperation,
                        format!("cannot convert {} to {}", value.kind(), stringify!($ty))
                    )
                })
            }
        }

        impl<'a> ArgType<'a> for $ty {
            fn from_value(value: Option<&Value>) -> Result<Self, Error> {
                match value {
                    Some(value) => TryFrom::try_from(value.clone()),
                    None => Err(Error::new(ErrorKind::MissingArgument, "missing argument"))
                }
            }
        }

        impl<'a> ArgType<'a> for Option<$ty> {
            fn from_value(value: Option<&Value>) -> Result<Self, Error> {
                match value {
                    Some(value) => {
                        if value.is_undefined() || value.is_none() {
                            Ok(None)
                        } else {
                            TryFrom::try_from(value.clone()).map(Some)
                        }
                    }
                    None => Ok(None),
                }
            }
        }
    }
}

macro_rules! primitive_int_try_from {
    ($ty:ident) => {
        primitive_try_from!($ty, {
            ValueRepr::Bool(val) => val as i64,
            ValueRepr::I64(val) => val,
            ValueRepr::F64(val) if (val as i64 as f64 == val) => val as i64,
        });
    };
}

primitive_int_try_from!(u8);
primitive_int_try_from!(u16);
primitive_int_try_from!(u32);
primitive_int_try_from!(u64);
primitive_int_try_from!(i8);
primitive_int_try_from!(i16);
primitive_int_try_from!(i32);
primitive_int_try_from!(i64);
primitive_int_try_from!(usize);

primitive_try_from!(bool, {
    ValueRepr::Bool(val) => val,
});

impl TryFrom<Value> for f64 {
    type Error = Error;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        value.as_f64_lossy().ok_or_else(|| {
            Error::new(
                ErrorKind::InvalidOperation,
                format!("cannot convert {} to f64", value.kind()),
            )
        })
    }
}

impl<'a> ArgType<'a> for f64 {
    fn from_value(value: Option<&Value>) -> Result<Self, Error> {
        match value {
            Some(value) => TryFrom::try_from(value.clone()),
            None => Err(Error::new(ErrorKind::MissingArgument, "missing argument")),
        }
    }
}

impl<'a> ArgType<'a> for Option<f64> {
    fn from_value(value: Option<&Value>) -> Result<Self, Error> {
        match value {
            Some(value) => {
                if value.is_undefined() || value.is_none() {
                    Ok(None)
                } else {
                    TryFrom::try_from(value.clone()).map(Some)
                }
            }
            None => Ok(None),
        }
    }
}

/// Utility type to capture remaining arguments.
///
/// In some cases you might want to have a variadic function.  In that case
/// you can define the last argument to a [`Filter`](crate::filters::Filter),
/// [`Test`](crate::tests::Test) or [`Function`](crate::functions::Function)
/// this way.  The `Rest<T>` type will collect all the remaining arguments
/// here.  It's implemented for all [`ArgType`]s.  The type itself derefs
/// into the inner vector.
#[derive(Debug)]
pub struct Rest<T>(pub Vec<T>);

impl<T> Deref for Rest<T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T> DerefMut for Rest<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl<'a, T: ArgType<'a>> ArgType<'a> for Rest<T> {
    fn from_value(_value: Option<&'a Value>) -> Result<Self, Error> {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot collect remaining arguments in this argument position",
        ))
    }

    #[inline(always)]
    fn from_rest_values(values: &'a [Value]) -> Result<Option<Self>, Error> {
        Ok(Some(Rest(ok!(values
            .iter()
            .map(|v| ArgType::from_value(Some(v)))
            .collect::<Result<_, _>>()))))
    }
}

/// Utility to accept keyword arguments.
///
/// Keyword arguments are represented as an extra trailing map value that
/// the caller passes.  A filter or function that wants to accept them
/// declares `Kwargs` as its last argument.
///
/// ```
/// # use torii::value::{Kwargs, Value};
/// # use torii::Error;
/// fn slugify(value: String, kwargs: Kwargs) -> Result<String, Error> {
///     let sep = kwargs.get::<Option<String>>("separator")?.unwrap_or_else(|| "-".into());
///     kwargs.assert_all_used()?;
///     Ok(value.to_lowercase().split_whitespace().collect::<Vec<_>>().join(&sep))
/// }
/// ```
#[derive(Debug, Default)]
pub struct Kwargs {
    values: ValueMap,
    used: std::cell::RefCell<std::collections::BTreeSet<String>>,
}

impl Kwargs {
    pub(crate) fn from_map(map: ValueMap) -> Kwargs {
        Kwargs {
            values: map,
            used: Default::default(),
        }
    }

    /// Fetches a key and converts it, recording it as used.
    ///
    /// Missing keys convert like missing optional arguments which means
    /// that `Option<T>` returns `None` for absent keys.
    pub fn get<'a, T: ArgType<'a>>(&'a self, key: &str) -> Result<T, Error> {
        self.used.borrow_mut().insert(key.to_string());
        T::from_value(self.values.get(&Value::from(key)))
    }

    /// Checks if a keyword argument was provided.
    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(&Value::from(key))
    }

    /// Returns all keyword arguments as key/value pairs.
    pub fn pairs(&self) -> Vec<(Value, Value)> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Asserts that all keyword arguments were used.
    pub fn assert_all_used(&self) -> Result<(), Error> {
        let used = self.used.borrow();
        for key in self.values.keys() {
            if let Some(name) = key.as_str() {
                if !used.contains(name) {
                    return Err(Error::new(
                        ErrorKind::TooManyArguments,
                        format!("unknown keyword argument {name:?}"),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl<'a> ArgType<'a> for Kwargs {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) if value.is_kwargs() => {
                Ok(Kwargs::from_map(value.as_map().unwrap().clone()))
            }
            None => Ok(Kwargs::default()),
            _ => Err(Error::new(
                ErrorKind::InvalidOperation,
                "expected keyword arguments in this position",
            )),
        }
    }

    fn is_kwargs_sink() -> bool {
        true
    }
}

impl<'a> ArgType<'a> for Value {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) => Ok(value.clone()),
            None => Err(Error::new(ErrorKind::MissingArgument, "missing argument")),
        }
    }
}

impl<'a> ArgType<'a> for Option<Value> {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) => {
                if value.is_undefined() || value.is_none() {
                    Ok(None)
                } else {
                    Ok(Some(value.clone()))
                }
            }
            None => Ok(None),
        }
    }
}

impl<'a> ArgType<'a> for String {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) if !value.is_undefined() => Ok(value.to_string()),
            _ => Err(Error::new(ErrorKind::MissingArgument, "missing argument")),
        }
    }
}

impl<'a> ArgType<'a> for Option<String> {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) => {
                if value.is_undefined() || value.is_none() {
                    Ok(None)
                } else {
                    Ok(Some(value.to_string()))
                }
            }
            None => Ok(None),
        }
    }
}

impl<'a> ArgType<'a> for &'a str {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value.and_then(|x| x.as_str()) {
            Some(s) => Ok(s),
            None => Err(Error::new(ErrorKind::MissingArgument, "missing argument")),
        }
    }
}

impl<'a> ArgType<'a> for &'a Value {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            Some(value) => Ok(value),
            None => Err(Error::new(ErrorKind::MissingArgument, "missing argument")),
        }
    }
}

impl From<Value> for String {
    fn from(val: Value) -> Self {
        val.to_string()
    }
}

impl<'a, T: ArgType<'a>> ArgType<'a> for Vec<T> {
    fn from_value(value: Option<&'a Value>) -> Result<Self, Error> {
        match value {
            None => Ok(Vec::new()),
            Some(values) => {
                let values = ok!(values.as_slice());
                let mut rv = Vec::new();
                for value in values {
                    rv.push(ok!(ArgType::from_value(Some(value))));
                }
                Ok(rv)
            }
        }
    }
}
