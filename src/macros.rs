// `ok!` and `some!` are less bloaty alternatives to the standard library's try
// operator (`?`).  Since this crate does not need type conversions on error
// propagation we can fall back to much simpler match patterns that compile
// faster and produce less bloaty code.

macro_rules! ok {
    ($expr:expr) => {
        match $expr {
            Ok(val) => val,
            Err(err) => return Err(err),
        }
    };
}

macro_rules! some {
    ($expr:expr) => {
        match $expr {
            Some(val) => val,
            None => return None,
        }
    };
}

/// Hidden utility module for the [`context!`](crate::context!) macro.
#[doc(hidden)]
pub mod __context {
    use crate::value::{Value, ValueMap};
    use std::sync::Arc;

    #[inline(always)]
    pub fn make() -> ValueMap {
        ValueMap::new()
    }

    #[inline(always)]
    pub fn add(ctx: &mut ValueMap, key: &'static str, value: Value) {
        ctx.insert(Value::from(key), value);
    }

    #[inline(always)]
    pub fn build(ctx: ValueMap) -> Value {
        Value::from_map(Arc::new(ctx))
    }
}

/// Creates a template context from keys and values.
///
/// ```rust
/// # use torii::context;
/// let ctx = context! {
///     name => "Peter",
///     location => "World",
/// };
/// ```
///
/// Alternatively if the variable name matches the key name it can
/// be omitted:
///
/// ```rust
/// # use torii::context;
/// let name = "Peter";
/// let ctx = context! { name };
/// ```
///
/// The return value is a [`Value`](crate::value::Value).  Note that
/// [`context!`](crate::context!) can also be used recursively if you need to
/// create nested objects:
///
/// ```rust
/// # use torii::context;
/// let ctx = context! {
///     nav => vec![
///         context!(path => "/", title => "Index"),
///         context!(path => "/downloads", title => "Downloads"),
///     ]
/// };
/// ```
///
/// All values are converted with
/// [`Value::from_serialize`](crate::value::Value::from_serialize).
#[macro_export]
macro_rules! context {
    () => {
        $crate::__context::build($crate::__context::make())
    };
    (
        $($key:ident $(=> $value:expr)?),* $(,)?
    ) => {{
        let mut ctx = $crate::__context::make();
        $(
            $crate::__context_pair!(ctx, $key $(=> $value)?);
        )*
        $crate::__context::build(ctx)
    }};
}

#[macro_export]
#[doc(hidden)]
macro_rules! __context_pair {
    ($ctx:ident, $key:ident) => {{
        $crate::__context_pair!($ctx, $key => $key);
    }};
    ($ctx:ident, $key:ident => $value:expr) => {
        $crate::__context::add(
            &mut $ctx,
            stringify!($key),
            $crate::value::Value::from_serialize(&$value),
        );
    };
}

/// An utility macro to create arguments for function and filter calls.
///
/// This creates a slice of values which can be passed to
/// [`call`](crate::value::Value::call),
/// [`apply_filter`](crate::State::apply_filter),
/// [`perform_test`](crate::State::perform_test) or similar APIs that take
/// slices of values.  All arguments are converted with
/// [`Value::from_serialize`](crate::value::Value::from_serialize).
///
/// ```
/// # use torii::{args, Environment};
/// # let env = Environment::new();
/// # let state = env.empty_state();
/// let rv = state.apply_filter("join", args!(vec![1, 2, 3], "-")).unwrap();
/// assert_eq!(rv.to_string(), "1-2-3");
/// ```
#[macro_export]
macro_rules! args {
    () => { &[][..] as &[$crate::value::Value] };
    ($($expr:expr),* $(,)?) => {
        &[$($crate::value::Value::from_serialize(&$expr),)*][..]
    };
}

/// A macro similar to [`format!`] but that renders a template inline.
///
/// This can be used to quickly render a template into a string without
/// having to create an environment first, which can be useful in some
/// situations.  Note however that the template is re-parsed every time
/// the [`render!`](crate::render!) macro is called which is potentially
/// slow.
///
/// There are two forms for this macro.  The default form takes template
/// source and context variables, the extended form also lets you provide
/// a custom environment that should be used rather than a default one.
/// The context variables are passed the same way as with the
/// [`context!`](crate::context!) macro.
///
/// ```
/// # use torii::render;
/// println!("{}", render!("Hello {{ name }}!", name => "World"));
/// ```
///
/// # Panics
///
/// This macro panics if the format string is an invalid template or the
/// template evaluation failed.
#[macro_export]
macro_rules! render {
    (
        in $env:expr,
        $tmpl:expr
        $(, $key:ident $(=> $value:expr)?)* $(,)?
    ) => {
        ($env).render_str($tmpl, $crate::context! { $($key $(=> $value)? ,)* })
            .expect("failed to render expression")
    };
    (
        $tmpl:expr
        $(, $key:ident $(=> $value:expr)?)* $(,)?
    ) => {
        $crate::render!(in $crate::Environment::new(), $tmpl, $($key $(=> $value)? ,)*)
    }
}
