//! Filter functions and abstractions.
//!
//! This engine inherits from Jinja2 the concept of filter functions.
//! These are functions which are applied to values to modify them.  For
//! example the expression `{{ 42|filter(23) }}` invokes the filter `filter`
//! with the arguments `42` and `23`.
//!
//! The engine comes with some built-in filters that are listed below.  To
//! create a custom filter write a function that takes at least a
//! [`&State`](crate::State) and value argument, then register it with
//! [`add_filter`](crate::Environment::add_filter).
//!
//! # Custom Filters
//!
//! A custom filter is just a simple function which accepts its inputs as
//! parameters and then returns a new value.  For instance the following
//! shows a filter which takes an input value and replaces whitespace with
//! dashes and converts it to lowercase:
//!
//! ```
//! # use torii::{Environment, State, Error};
//! # let mut env = Environment::new();
//! fn slugify(_state: &State, value: String) -> String {
//!     value.to_lowercase().split_whitespace().collect::<Vec<_>>().join("-")
//! }
//!
//! env.add_filter("slugify", slugify);
//! ```
//!
//! The engine will perform the necessary conversions automatically via the
//! [`FunctionArgs`](crate::value::FunctionArgs) and
//! [`FunctionResult`](crate::value::FunctionResult) traits.
use std::cmp::Ordering;
use std::fmt::Write;
use std::sync::Arc;

use crate::error::{Error, ErrorKind};
use crate::utils::{AutoEscape, HtmlEscape};
use crate::value::{ops, ArgType, FunctionArgs, FunctionResult, Kwargs, Rest, Value, ValueKind};
use crate::vm::State;

type FilterFunc = dyn Fn(&State, &[Value]) -> Result<Value, Error> + Sync + Send;

#[derive(Clone)]
pub(crate) struct BoxedFilter(Arc<FilterFunc>);

/// A utility trait that represents filters.
pub trait Filter<V, Rv, Args>: Send + Sync + 'static {
    /// Applies a filter to a value with the given arguments.
    fn apply_to(&self, state: &State, value: V, args: Args) -> Rv;
}

macro_rules! tuple_impls {
    ( $( $name:ident )* ) => {
        impl<Func, V, Rv, $($name),*> Filter<V, Rv, ($($name,)*)> for Func
        where
            Func: Fn(&State, V, $($name),*) -> Rv + Send + Sync + 'static,
            Rv: FunctionResult,
        {
            fn apply_to(&self, state: &State, value: V, args: ($($name,)*)) -> Rv {
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
tuple_impls! { A B C D E }

impl BoxedFilter {
    /// Creates a new boxed filter.
    pub fn new<F, V, Rv, Args>(f: F) -> BoxedFilter
    where
        F: Filter<V, Rv, Args>,
        V: for<'a> ArgType<'a>,
        Rv: FunctionResult,
        Args: for<'a> FunctionArgs<'a>,
    {
        BoxedFilter(Arc::new(move |state, args| -> Result<Value, Error> {
            let (value, rest) = match args.split_first() {
                Some(rv) => rv,
                None => (&Value::UNDEFINED, &[][..]),
            };
            f.apply_to(
                state,
                ok!(ArgType::from_value(Some(value))),
                ok!(FunctionArgs::from_values(rest)),
            )
            .into_result()
        }))
    }

    /// Applies the filter to a value and arguments.
    pub fn apply_to(&self, state: &State, args: &[Value]) -> Result<Value, Error> {
        (self.0)(state, args)
    }
}

/// Marks a value as safe.  This converts it into a string.
///
/// When a value is marked as safe, no further auto escaping will take
/// place.
pub fn safe(_state: &State, v: String) -> Value {
    Value::from_safe_string(v)
}

/// HTML escapes a string.
///
/// By default this filter is also registered under the alias `e`.  Values
/// that are already marked as safe pass through unchanged.
pub fn escape(_state: &State, v: Value) -> Value {
    if v.is_safe() {
        v
    } else {
        Value::from_safe_string(HtmlEscape(&v.to_string()).to_string())
    }
}

/// HTML escapes a string disregarding the safe flag.
pub fn forceescape(_state: &State, v: Value) -> Value {
    Value::from_safe_string(HtmlEscape(&v.to_string()).to_string())
}

/// Converts a value to uppercase.
///
/// ```jinja
/// <h1>{{ chapter.title|upper }}</h1>
/// ```
pub fn upper(_state: &State, v: String) -> String {
    v.to_uppercase()
}

/// Converts a value to lowercase.
///
/// ```jinja
/// <h1>{{ chapter.title|lower }}</h1>
/// ```
pub fn lower(_state: &State, v: String) -> String {
    v.to_lowercase()
}

/// Converts a value to title case.
///
/// Every word starts with a capital letter, the rest is lowercased.
pub fn title(_state: &State, v: String) -> String {
    let mut rv = String::with_capacity(v.len());
    let mut capitalize = true;
    for c in v.chars() {
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
    rv
}

/// Capitalizes a string.
///
/// The first character will be uppercase, all others lowercase.
pub fn capitalize(_state: &State, v: String) -> String {
    let mut chars = v.chars();
    match chars.next() {
        None => String::new(),
        Some(c) => c.to_uppercase().chain(chars.flat_map(|c| c.to_lowercase())).collect(),
    }
}

/// Does a string replace.
///
/// It replaces all occurrences of the first parameter with the second.
/// An optional third parameter limits the number of replacements.
///
/// ```jinja
/// {{ "Hello World"|replace("Hello", "Goodbye") }} -> Goodbye World
/// ```
pub fn replace(
    _state: &State,
    v: String,
    from: String,
    to: String,
    count: Option<usize>,
) -> String {
    match count {
        Some(count) => v.replacen(&from, &to, count),
        None => v.replace(&from, &to),
    }
}

/// Returns the "length" of the value.
///
/// By default this filter is also registered under the alias `count`.
///
/// ```jinja
/// <p>Search: {{ results|length }} results</p>
/// ```
pub fn length(_state: &State, v: Value) -> Result<Value, Error> {
    v.len().map(Value::from).ok_or_else(|| {
        Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot calculate length of value of type {}", v.kind()),
        )
    })
}

/// Trims a value.
///
/// Strips leading and trailing whitespace or other specified characters.
pub fn trim(_state: &State, v: String, chars: Option<String>) -> String {
    match chars {
        Some(chars) => {
            let chars = chars.chars().collect::<Vec<_>>();
            v.trim_matches(&chars[..]).to_string()
        }
        None => v.trim().to_string(),
    }
}

/// Strips SGML/XML tags and replaces adjacent whitespace by one space.
pub fn striptags(_state: &State, v: String) -> String {
    let mut stripped = String::with_capacity(v.len());
    let mut in_tag = false;
    for c in v.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => stripped.push(c),
            _ => {}
        }
    }
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counts the words in a string.
pub fn wordcount(_state: &State, v: String) -> usize {
    v.split_whitespace().count()
}

/// Wraps text to the given width.
///
/// Existing newlines are treated as paragraph separators.  Accepts the
/// keyword arguments `break_long_words` (default true) and `wrapstring`
/// (default `"\n"`).
pub fn wordwrap(
    _state: &State,
    v: String,
    width: Option<usize>,
    kwargs: Kwargs,
) -> Result<String, Error> {
    let width = width.unwrap_or(79);
    let break_long_words = ok!(kwargs.get::<Option<bool>>("break_long_words")).unwrap_or(true);
    let wrapstring = ok!(kwargs.get::<Option<String>>("wrapstring"))
        .unwrap_or_else(|| "\n".to_string());
    ok!(kwargs.assert_all_used());

    let mut lines = Vec::new();
    for paragraph in v.lines() {
        let mut line = String::new();
        for word in paragraph.split_whitespace() {
            let word_len = word.chars().count();
            let line_len = line.chars().count();
            if line_len + word_len + usize::from(!line.is_empty()) > width && !line.is_empty() {
                lines.push(std::mem::take(&mut line));
            }
            if word_len > width && break_long_words {
                let mut rest = word;
                while rest.chars().count() > width {
                    let split_at = rest
                        .char_indices()
                        .nth(width)
                        .map(|(idx, _)| idx)
                        .unwrap_or(rest.len());
                    lines.push(rest[..split_at].to_string());
                    rest = &rest[split_at..];
                }
                line = rest.to_string();
            } else {
                if !line.is_empty() {
                    line.push(' ');
                }
                line.push_str(word);
            }
        }
        if !line.is_empty() {
            lines.push(line);
        }
    }
    Ok(lines.join(&wrapstring))
}

/// Centers the value in a field of the given width.
pub fn center(_state: &State, v: String, width: Option<usize>) -> String {
    let width = width.unwrap_or(80);
    let len = v.chars().count();
    if len >= width {
        return v;
    }
    let pad = width - len;
    let left = pad / 2;
    let mut rv = " ".repeat(left);
    rv.push_str(&v);
    rv.push_str(&" ".repeat(pad - left));
    rv
}

/// Indents the lines of a string.
///
/// The first line and blank lines are not indented by default; this can
/// be changed with the optional `indent_first` and `blank` flags.
pub fn indent(
    _state: &State,
    v: String,
    width: Option<usize>,
    indent_first: Option<bool>,
    blank: Option<bool>,
) -> String {
    let indentation = " ".repeat(width.unwrap_or(4));
    let indent_first = indent_first.unwrap_or(false);
    let indent_blank = blank.unwrap_or(false);
    let mut rv = String::new();
    for (idx, line) in v.lines().enumerate() {
        if idx > 0 {
            rv.push('\n');
        }
        let blank_line = line.trim().is_empty();
        let indent_this = if idx == 0 {
            indent_first && (!blank_line || indent_blank)
        } else if blank_line {
            indent_blank
        } else {
            true
        };
        if indent_this {
            rv.push_str(&indentation);
        }
        rv.push_str(line);
    }
    rv
}

/// Truncates a string to the given length.
///
/// The filter is lenient by up to `leeway` extra characters (policy
/// default 5) before it actually truncates.  If `killwords` is not set
/// the string is cut at the last word boundary before the limit and the
/// `end` string (default `"..."`) is appended.
///
/// ```jinja
/// {{ "Hello World"|truncate(9) }} -> Hello...
/// ```
pub fn truncate(
    state: &State,
    v: String,
    length: Option<usize>,
    killwords: Option<bool>,
    end: Option<String>,
    leeway: Option<usize>,
    kwargs: Kwargs,
) -> Result<String, Error> {
    let length = match length {
        Some(length) => length,
        None => ok!(kwargs.get::<Option<usize>>("length")).unwrap_or(255),
    };
    let killwords = match killwords {
        Some(killwords) => killwords,
        None => ok!(kwargs.get::<Option<bool>>("killwords")).unwrap_or(false),
    };
    let end = match end {
        Some(end) => end,
        None => ok!(kwargs.get::<Option<String>>("end")).unwrap_or_else(|| "...".to_string()),
    };
    let leeway = match leeway {
        Some(leeway) => leeway,
        None => ok!(kwargs.get::<Option<usize>>("leeway"))
            .unwrap_or(state.env().policies().truncate_leeway),
    };
    ok!(kwargs.assert_all_used());
    let end_len = end.chars().count();
    if length < end_len {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("expected length >= {end_len}, got {length}"),
        ));
    }
    if v.chars().count() <= length + leeway {
        return Ok(v);
    }
    let trunc_to = length - end_len;
    let cut: String = v.chars().take(trunc_to).collect();
    let mut rv = if killwords {
        cut
    } else {
        match cut.rfind(' ') {
            Some(idx) => cut[..idx].to_string(),
            None => cut,
        }
    };
    rv.push_str(&end);
    Ok(rv)
}

/// Looks up an attribute.
///
/// In a template `foo.bar` just as well does attribute lookups; this
/// filter is useful when the attribute name comes from a variable.
///
/// ```jinja
/// {{ value|attr(field_name) }}
/// ```
pub fn attr(state: &State, v: Value, name: String) -> Result<Value, Error> {
    if let Some(sandbox) = state.env().sandbox() {
        if !sandbox.is_safe_attribute(&v, &name) {
            return Err(Error::new(
                ErrorKind::SecurityError,
                format!("access to attribute {name:?} of {} object is unsafe", v.kind()),
            ));
        }
    }
    v.get_attr(&name)
}

/// Dict sorting functionality.
///
/// This filter works like `|items` but sorts the pairs by key.  The
/// keyword arguments `case_sensitive` (default false), `by` (`"key"` or
/// `"value"`) and `reverse` are accepted.
pub fn dictsort(_state: &State, v: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let by_value = match ok!(kwargs.get::<Option<String>>("by")).as_deref() {
        None | Some("key") => false,
        Some("value") => true,
        Some(other) => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid dictsort by parameter {other:?}"),
            ))
        }
    };
    let case_sensitive = ok!(kwargs.get::<Option<bool>>("case_sensitive")).unwrap_or(false);
    let reverse = ok!(kwargs.get::<Option<bool>>("reverse")).unwrap_or(false);
    ok!(kwargs.assert_all_used());

    let mut pairs = ok!(v.try_iter_pairs());
    pairs.sort_by(|a, b| {
        let (ka, kb) = if by_value { (&a.1, &b.1) } else { (&a.0, &b.0) };
        let rv = sort_cmp(ka, kb, case_sensitive);
        if reverse {
            rv.reverse()
        } else {
            rv
        }
    });
    Ok(Value::from(
        pairs
            .into_iter()
            .map(|(k, v)| Value::from(vec![k, v]))
            .collect::<Vec<_>>(),
    ))
}

/// Returns a list of pairs (items) from a mapping.
///
/// This can be used to iterate over keys and values of a mapping at once.
///
/// ```jinja
/// {% for key, value in my_dict|items %}...{% endfor %}
/// ```
pub fn items(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(Value::from(
        ok!(v.try_iter_pairs())
            .into_iter()
            .map(|(k, v)| Value::from(vec![k, v]))
            .collect::<Vec<_>>(),
    ))
}

/// Reverses a list or string.
///
/// ```jinja
/// {% for user in users|reverse %}...{% endfor %}
/// ```
pub fn reverse(_state: &State, v: Value) -> Result<Value, Error> {
    if let Some(s) = v.as_str() {
        Ok(ops::soft_string(&v, s.chars().rev().collect()))
    } else if matches!(v.kind(), ValueKind::Seq) {
        let mut rv = ok!(v.as_slice()).to_vec();
        rv.reverse();
        Ok(Value::from(rv))
    } else {
        Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot reverse value of type {}", v.kind()),
        ))
    }
}

/// Joins a sequence by a separator.
///
/// ```jinja
/// {{ "foo"|join("-") }} -> f-o-o
/// ```
pub fn join(_state: &State, val: Value, joiner: Option<String>) -> Result<String, Error> {
    if val.is_undefined() || val.is_none() {
        return Ok(String::new());
    }
    let joiner = joiner.as_deref().unwrap_or("");
    let mut rv = String::new();
    for item in ok!(val.try_iter()) {
        if !rv.is_empty() {
            rv.push_str(joiner);
        }
        if let Some(s) = item.as_str() {
            rv.push_str(s);
        } else {
            write!(rv, "{item}").ok();
        }
    }
    Ok(rv)
}

/// Returns the first item from a sequence, map or string.
///
/// If the value is empty an undefined value is returned.
pub fn first(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(ok!(v.try_iter()).next().unwrap_or(Value::UNDEFINED))
}

/// Returns the last item from a sequence, map or string.
pub fn last(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(ok!(v.try_iter()).last().unwrap_or(Value::UNDEFINED))
}

/// Returns the smallest item from a sequence.
pub fn min(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(ok!(v.try_iter()).min().unwrap_or(Value::UNDEFINED))
}

/// Returns the largest item from a sequence.
pub fn max(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(ok!(v.try_iter()).max().unwrap_or(Value::UNDEFINED))
}

/// Sums up all the values in a sequence.
///
/// The `attribute` keyword argument sums an attribute of the items, the
/// `start` keyword argument provides the initial value.
///
/// ```jinja
/// Total: {{ items|sum(attribute='price') }}
/// ```
pub fn sum(_state: &State, v: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let attribute = ok!(kwargs.get::<Option<String>>("attribute"));
    let start = ok!(kwargs.get::<Option<Value>>("start"));
    ok!(kwargs.assert_all_used());
    let mut rv = start.unwrap_or_else(|| Value::from(0));
    for item in ok!(v.try_iter()) {
        let item = match attribute {
            Some(ref attr) => ok!(lookup_attr_path(&item, attr)),
            None => item,
        };
        rv = ok!(ops::add(&rv, &item));
    }
    Ok(rv)
}

/// Sorts a sequence.
///
/// The sort is stable and by default case insensitive for strings.  The
/// keyword arguments `reverse`, `case_sensitive` and `attribute` are
/// supported; `attribute` can be a dotted path.
///
/// ```jinja
/// {% for user in users|sort(attribute="name") %}...{% endfor %}
/// ```
pub fn sort(_state: &State, v: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let reverse = ok!(kwargs.get::<Option<bool>>("reverse")).unwrap_or(false);
    let case_sensitive = ok!(kwargs.get::<Option<bool>>("case_sensitive")).unwrap_or(false);
    let attribute = ok!(kwargs.get::<Option<String>>("attribute"));
    ok!(kwargs.assert_all_used());

    let mut items = ok!(v.try_iter()).collect::<Vec<_>>();
    let mut sort_failed = None;
    items.sort_by(|a, b| {
        let (ka, kb) = match attribute {
            Some(ref attr) => {
                let ka = lookup_attr_path(a, attr);
                let kb = lookup_attr_path(b, attr);
                match (ka, kb) {
                    (Ok(ka), Ok(kb)) => {
                        let rv = sort_cmp(&ka, &kb, case_sensitive);
                        return if reverse { rv.reverse() } else { rv };
                    }
                    (Err(err), _) | (_, Err(err)) => {
                        sort_failed.get_or_insert(err);
                        return Ordering::Equal;
                    }
                }
            }
            None => (a, b),
        };
        let rv = sort_cmp(ka, kb, case_sensitive);
        if reverse {
            rv.reverse()
        } else {
            rv
        }
    });
    match sort_failed {
        Some(err) => Err(err),
        None => Ok(Value::from(items)),
    }
}

/// Returns a list of unique items, preserving order.
///
/// The keyword arguments `case_sensitive` and `attribute` are supported.
pub fn unique(_state: &State, v: Value, kwargs: Kwargs) -> Result<Value, Error> {
    let case_sensitive = ok!(kwargs.get::<Option<bool>>("case_sensitive")).unwrap_or(false);
    let attribute = ok!(kwargs.get::<Option<String>>("attribute"));
    ok!(kwargs.assert_all_used());

    let mut rv = Vec::new();
    let mut seen: Vec<Value> = Vec::new();
    for item in ok!(v.try_iter()) {
        let key = match attribute {
            Some(ref attr) => ok!(lookup_attr_path(&item, attr)),
            None => item.clone(),
        };
        let key = if case_sensitive {
            key
        } else {
            fold_case(&key)
        };
        if !seen.contains(&key) {
            seen.push(key);
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Batches items into chunks of the given size.
///
/// A `fill_with` value can be provided to pad the last chunk.
///
/// ```jinja
/// {% for row in items|batch(3, '&nbsp;') %}...{% endfor %}
/// ```
pub fn batch(
    _state: &State,
    v: Value,
    count: usize,
    fill_with: Option<Value>,
) -> Result<Value, Error> {
    if count == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot batch by chunks of size 0",
        ));
    }
    let mut rv = Vec::new();
    let mut chunk = Vec::with_capacity(count);
    for item in ok!(v.try_iter()) {
        chunk.push(item);
        if chunk.len() == count {
            rv.push(Value::from(std::mem::take(&mut chunk)));
        }
    }
    if !chunk.is_empty() {
        if let Some(ref fill) = fill_with {
            while chunk.len() < count {
                chunk.push(fill.clone());
            }
        }
        rv.push(Value::from(chunk));
    }
    Ok(Value::from(rv))
}

/// Slices an iterable into the given number of columns.
///
/// This is the transposed operation of [`batch`]: where batch fixes the
/// chunk size, slice fixes the number of chunks.
pub fn slice(
    _state: &State,
    v: Value,
    count: usize,
    fill_with: Option<Value>,
) -> Result<Value, Error> {
    if count == 0 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            "cannot slice into 0 columns",
        ));
    }
    let items = ok!(v.try_iter()).collect::<Vec<_>>();
    let len = items.len();
    let items_per_slice = len / count;
    let slices_with_extra = len % count;
    let mut offset = 0;
    let mut rv = Vec::with_capacity(count);
    for slice in 0..count {
        let mut size = items_per_slice;
        if slice < slices_with_extra {
            size += 1;
        }
        let mut tmp = items[offset..offset + size].to_vec();
        if let Some(ref fill) = fill_with {
            if slice >= slices_with_extra && slices_with_extra > 0 {
                tmp.push(fill.clone());
            }
        }
        rv.push(Value::from(tmp));
        offset += size;
    }
    Ok(Value::from(rv))
}

/// Groups a sequence of objects by an attribute.
///
/// The result is a sorted list of `[grouper, list]` pairs so that the
/// filter composes with tuple unpacking:
///
/// ```jinja
/// {% for city, users in users|groupby("city") %}...{% endfor %}
/// ```
pub fn groupby(_state: &State, v: Value, attribute: String) -> Result<Value, Error> {
    let mut items = ok!(ok!(v.try_iter())
        .map(|item| lookup_attr_path(&item, &attribute).map(|key| (key, item)))
        .collect::<Result<Vec<_>, Error>>());
    items.sort_by(|a, b| a.0.cmp(&b.0));

    let mut rv: Vec<Value> = Vec::new();
    let mut current: Option<(Value, Vec<Value>)> = None;
    for (key, item) in items {
        match current {
            Some((ref grouper, ref mut group)) if *grouper == key => group.push(item),
            _ => {
                if let Some((grouper, group)) = current.take() {
                    rv.push(Value::from(vec![grouper, Value::from(group)]));
                }
                current = Some((key, vec![item]));
            }
        }
    }
    if let Some((grouper, group)) = current {
        rv.push(Value::from(vec![grouper, Value::from(group)]));
    }
    Ok(Value::from(rv))
}

/// Converts the input value into a list.
///
/// Strings become lists of characters, maps become lists of keys.
pub fn list(_state: &State, v: Value) -> Result<Value, Error> {
    Ok(Value::from(ok!(v.try_iter()).collect::<Vec<_>>()))
}

/// Applies a filter to a sequence of objects or looks up an attribute.
///
/// The basic usage is mapping on an attribute (`attribute` keyword
/// argument, with an optional `default`); alternatively a filter name and
/// extra arguments can be passed and the named filter is applied to every
/// item.
///
/// ```jinja
/// {{ users|map(attribute="username")|join(", ") }}
/// {{ titles|map("lower")|join(", ") }}
/// ```
pub fn map(state: &State, v: Value, args: Rest<Value>) -> Result<Value, Error> {
    let (args, kwargs) = split_kwargs(&args.0);
    let mut rv = Vec::new();
    if let Some(kwargs) = kwargs {
        if !args.is_empty() {
            return Err(Error::new(
                ErrorKind::TooManyArguments,
                "cannot mix attribute mapping with filter arguments",
            ));
        }
        let attribute: String = ok!(kwargs.get("attribute"));
        let default = ok!(kwargs.get::<Option<Value>>("default"));
        ok!(kwargs.assert_all_used());
        for item in ok!(v.try_iter()) {
            let mapped = ok!(lookup_attr_path(&item, &attribute));
            rv.push(match (&default, mapped.is_undefined()) {
                (Some(default), true) => default.clone(),
                (_, _) => mapped,
            });
        }
    } else {
        let (filter_name, extra) = ok!(args.split_first().ok_or_else(|| Error::new(
            ErrorKind::MissingArgument,
            "map requires a filter name or attribute"
        )));
        let filter_name = ok!(filter_name.as_str().ok_or_else(|| Error::new(
            ErrorKind::InvalidOperation,
            "filter name must be a string"
        )));
        for item in ok!(v.try_iter()) {
            let mut filter_args = vec![item];
            filter_args.extend(extra.iter().cloned());
            rv.push(ok!(state.apply_filter(filter_name, &filter_args)));
        }
    }
    Ok(Value::from(rv))
}

/// Selects the items of a sequence a test passes for.
///
/// Without a test name the truthiness of the items decides.
///
/// ```jinja
/// {{ numbers|select("odd") }}
/// ```
pub fn select(state: &State, v: Value, args: Rest<Value>) -> Result<Value, Error> {
    select_or_reject(state, v, &args.0, false)
}

/// Rejects the items of a sequence a test passes for.
pub fn reject(state: &State, v: Value, args: Rest<Value>) -> Result<Value, Error> {
    select_or_reject(state, v, &args.0, true)
}

fn select_or_reject(
    state: &State,
    v: Value,
    args: &[Value],
    invert: bool,
) -> Result<Value, Error> {
    let mut rv = Vec::new();
    let (test_name, extra) = match args.split_first() {
        Some((name, extra)) => (
            Some(ok!(name.as_str().ok_or_else(|| Error::new(
                ErrorKind::InvalidOperation,
                "test name must be a string"
            )))),
            extra,
        ),
        None => (None, &[][..]),
    };
    for item in ok!(v.try_iter()) {
        let passed = match test_name {
            Some(name) => {
                let mut test_args = vec![item.clone()];
                test_args.extend(extra.iter().cloned());
                ok!(state.perform_test(name, &test_args))
            }
            None => item.is_true(),
        };
        if passed != invert {
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Selects the items where an attribute passes a test.
///
/// ```jinja
/// {{ users|selectattr("is_active") }}
/// {{ users|selectattr("id", "even") }}
/// ```
pub fn selectattr(state: &State, v: Value, attr: String, args: Rest<Value>) -> Result<Value, Error> {
    select_or_reject_attr(state, v, &attr, &args.0, false)
}

/// Rejects the items where an attribute passes a test.
pub fn rejectattr(state: &State, v: Value, attr: String, args: Rest<Value>) -> Result<Value, Error> {
    select_or_reject_attr(state, v, &attr, &args.0, true)
}

fn select_or_reject_attr(
    state: &State,
    v: Value,
    attr: &str,
    args: &[Value],
    invert: bool,
) -> Result<Value, Error> {
    let mut rv = Vec::new();
    let (test_name, extra) = match args.split_first() {
        Some((name, extra)) => (
            Some(ok!(name.as_str().ok_or_else(|| Error::new(
                ErrorKind::InvalidOperation,
                "test name must be a string"
            )))),
            extra,
        ),
        None => (None, &[][..]),
    };
    for item in ok!(v.try_iter()) {
        let attr_value = ok!(lookup_attr_path(&item, attr));
        let passed = match test_name {
            Some(name) => {
                let mut test_args = vec![attr_value];
                test_args.extend(extra.iter().cloned());
                ok!(state.perform_test(name, &test_args))
            }
            None => attr_value.is_true(),
        };
        if passed != invert {
            rv.push(item);
        }
    }
    Ok(Value::from(rv))
}

/// Checks if a value is undefined and returns a default if so.
///
/// By default this filter is also registered under the alias `d`.  If the
/// optional `boolean` flag is true, any falsy value triggers the default.
///
/// ```jinja
/// {{ my_variable|default("my_variable was not defined") }}
/// ```
pub fn default(
    _state: &State,
    value: Value,
    other: Option<Value>,
    boolean: Option<bool>,
) -> Value {
    let use_default = if boolean.unwrap_or(false) {
        !value.is_true()
    } else {
        value.is_undefined()
    };
    if use_default {
        other.unwrap_or_else(|| Value::from(""))
    } else {
        value
    }
}

/// Returns the absolute value of a number.
pub fn abs(_state: &State, v: Value) -> Result<Value, Error> {
    match v.0 {
        crate::value::ValueRepr::I64(x) => Ok(Value::from(x.abs())),
        crate::value::ValueRepr::F64(x) => Ok(Value::from(x.abs())),
        _ => Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("cannot get absolute value of {}", v.kind()),
        )),
    }
}

/// Rounds a number to the given precision.
///
/// The optional method is `"common"` (default, rounds half away from
/// zero), `"ceil"` or `"floor"`.
///
/// ```jinja
/// {{ 42.55|round }} -> 43.0
/// ```
pub fn round(
    _state: &State,
    v: Value,
    precision: Option<i32>,
    method: Option<String>,
) -> Result<Value, Error> {
    let x = ok!(f64::try_from(v));
    let factor = 10f64.powi(precision.unwrap_or(0));
    let scaled = x * factor;
    let rounded = match method.as_deref() {
        None | Some("common") => scaled.round(),
        Some("ceil") => scaled.ceil(),
        Some("floor") => scaled.floor(),
        Some(other) => {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("unknown rounding method {other:?}"),
            ))
        }
    };
    Ok(Value::from(rounded / factor))
}

/// Converts a value into an integer.
///
/// Strings are parsed (including `0x`/`0o`/`0b` prefixes), floats are
/// truncated.  When the conversion fails the provided default (or 0) is
/// returned.
pub fn int(_state: &State, v: Value, default: Option<i64>) -> Value {
    let fallback = default.unwrap_or(0);
    match v.0 {
        crate::value::ValueRepr::I64(x) => Value::from(x),
        crate::value::ValueRepr::Bool(x) => Value::from(x as i64),
        crate::value::ValueRepr::F64(x) => Value::from(x as i64),
        crate::value::ValueRepr::String(ref s, _) => {
            let s = s.trim();
            let (radix, digits) = match s.get(..2) {
                Some("0x" | "0X") => (16, &s[2..]),
                Some("0o" | "0O") => (8, &s[2..]),
                Some("0b" | "0B") => (2, &s[2..]),
                _ => (10, s),
            };
            match i64::from_str_radix(digits, radix) {
                Ok(x) => Value::from(x),
                Err(_) => s
                    .parse::<f64>()
                    .map(|x| Value::from(x as i64))
                    .unwrap_or(Value::from(fallback)),
            }
        }
        _ => Value::from(fallback),
    }
}

/// Converts a value into a float.
pub fn float(_state: &State, v: Value, default: Option<f64>) -> Value {
    let fallback = default.unwrap_or(0.0);
    match v.0 {
        crate::value::ValueRepr::String(ref s, _) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .unwrap_or(Value::from(fallback)),
        _ => v
            .as_f64_lossy()
            .map(Value::from)
            .unwrap_or(Value::from(fallback)),
    }
}

/// Formats a number of bytes like a human readable file size.
///
/// Per default decimal prefixes are used (mega, giga, etc.); when the
/// second parameter is true, binary prefixes are used (mebi, gibi).
///
/// ```jinja
/// {{ 13000|filesizeformat }} -> 13.0 kB
/// ```
pub fn filesizeformat(_state: &State, v: f64, binary: Option<bool>) -> String {
    let binary = binary.unwrap_or(false);
    let base: f64 = if binary { 1024.0 } else { 1000.0 };
    let prefixes = if binary {
        ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB", "ZiB", "YiB"]
    } else {
        ["kB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"]
    };
    let bytes = v.abs();
    let sign = if v < 0.0 { "-" } else { "" };
    if bytes == 1.0 {
        return format!("{sign}1 Byte");
    }
    if bytes < base {
        return format!("{sign}{} Bytes", bytes as i64);
    }
    let mut unit = base;
    for (idx, prefix) in prefixes.iter().enumerate() {
        unit = base.powi(idx as i32 + 2);
        if bytes < unit || idx == prefixes.len() - 1 {
            return format!("{sign}{:.1} {prefix}", base * bytes / unit);
        }
    }
    unreachable!()
}

/// Applies C style string formatting to a value.
///
/// Supports the `%s`, `%d`, `%i`, `%f`, `%x`, `%o` and `%%` placeholders.
/// Field access syntax is deliberately not supported which keeps the
/// filter safe in sandboxed environments.
///
/// ```jinja
/// {{ "%s, %s!"|format(greeting, name) }}
/// ```
pub fn format(_state: &State, v: String, args: Rest<Value>) -> Result<String, Error> {
    let mut arg_iter = args.0.iter();
    let mut rv = String::with_capacity(v.len());
    let mut chars = v.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            rv.push(c);
            continue;
        }
        let spec = match chars.next() {
            Some(spec) => spec,
            None => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    "incomplete format spec",
                ))
            }
        };
        if spec == '%' {
            rv.push('%');
            continue;
        }
        let arg = ok!(arg_iter.next().ok_or_else(|| Error::new(
            ErrorKind::MissingArgument,
            "not enough arguments for format string"
        )));
        match spec {
            's' => write!(rv, "{arg}").ok(),
            'd' | 'i' => write!(rv, "{}", ok!(i64::try_from(arg.clone()))).ok(),
            'f' => write!(rv, "{:.6}", ok!(f64::try_from(arg.clone()))).ok(),
            'x' => write!(rv, "{:x}", ok!(i64::try_from(arg.clone()))).ok(),
            'o' => write!(rv, "{:o}", ok!(i64::try_from(arg.clone()))).ok(),
            other => {
                return Err(Error::new(
                    ErrorKind::InvalidOperation,
                    format!("unsupported format character {other:?}"),
                ))
            }
        };
    }
    Ok(rv)
}

/// Converts a value into a string.
///
/// The safe flag of the input is retained.
pub fn string(_state: &State, v: Value) -> Value {
    ops::soft_str(&v)
}

/// Pretty prints a value for debugging.
pub fn pprint(_state: &State, v: Value) -> String {
    format!("{v:?}")
}

/// Creates an HTML/XML attribute string from a mapping.
///
/// Entries whose value is none or undefined are skipped.
///
/// ```jinja
/// <ul{{ {'class': 'my_list', 'id': 'list-%d'|format(variable)}|xmlattr }}>
/// ```
pub fn xmlattr(_state: &State, v: Value, autospace: Option<bool>) -> Result<Value, Error> {
    let autospace = autospace.unwrap_or(true);
    let mut rv = String::new();
    for (key, value) in ok!(v.try_iter_pairs()) {
        if value.is_none() || value.is_undefined() {
            continue;
        }
        let key = key.to_string();
        if key.chars().any(|c| c.is_whitespace() || "\"'><=/".contains(c)) {
            return Err(Error::new(
                ErrorKind::InvalidOperation,
                format!("invalid character in attribute name {key:?}"),
            ));
        }
        if !rv.is_empty() {
            rv.push(' ');
        }
        write!(rv, "{key}=\"{}\"", HtmlEscape(&value.to_string())).ok();
    }
    if autospace && !rv.is_empty() {
        rv.insert(0, ' ');
    }
    Ok(Value::from_safe_string(rv))
}

/// Returns a random item from the sequence.
pub fn random(_state: &State, v: Value) -> Result<Value, Error> {
    let items = ok!(v.try_iter()).collect::<Vec<_>>();
    if items.is_empty() {
        return Ok(Value::UNDEFINED);
    }
    // not a great source of randomness, but avoids a dependency for a
    // filter that is rarely used for anything security sensitive.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|x| x.subsec_nanos() as usize)
        .unwrap_or(0);
    Ok(items[nanos % items.len()].clone())
}

/// URL encodes a value.
///
/// If given a map it encodes the parameters into a query set, otherwise it
/// encodes the stringified value.
#[cfg(feature = "urlencode")]
#[cfg_attr(docsrs, doc(cfg(feature = "urlencode")))]
pub fn urlencode(_state: &State, v: Value) -> Result<String, Error> {
    use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

    // it's a bit tricky finding the exact rules of what needs to be
    // encoded; this is based on what urllib does in Python.
    const SET: &AsciiSet = &NON_ALPHANUMERIC
        .remove(b'/')
        .remove(b'.')
        .remove(b'-')
        .remove(b'_');

    if matches!(v.kind(), ValueKind::Map) {
        let mut rv = String::new();
        for (key, value) in ok!(v.try_iter_pairs()) {
            if !rv.is_empty() {
                rv.push('&');
            }
            write!(
                rv,
                "{}={}",
                utf8_percent_encode(&key.to_string(), SET),
                utf8_percent_encode(&value.to_string(), SET)
            )
            .ok();
        }
        Ok(rv)
    } else {
        Ok(utf8_percent_encode(&v.to_string(), SET).to_string())
    }
}

/// Converts URLs in text into clickable links.
///
/// The `rel`, `target` and extra scheme configuration comes from the
/// environment [`policies`](crate::Environment::policies).  An optional
/// length limit shortens the displayed part of the link.
pub fn urlize(state: &State, v: String, trim_url_limit: Option<usize>) -> Result<Value, Error> {
    let policies = state.env().policies();
    let auto_escape = !matches!(state.auto_escape(), AutoEscape::None);
    let escape_text = |text: &str| -> String {
        if auto_escape {
            HtmlEscape(text).to_string()
        } else {
            text.to_string()
        }
    };
    let trim_url = |url: &str| -> String {
        match trim_url_limit {
            Some(limit) if url.chars().count() > limit => {
                format!("{}...", url.chars().take(limit).collect::<String>())
            }
            _ => url.to_string(),
        }
    };

    let mut extra_attrs = format!(" rel=\"{}\"", HtmlEscape(&policies.urlize_rel));
    if let Some(ref target) = policies.urlize_target {
        write!(extra_attrs, " target=\"{}\"", HtmlEscape(target)).ok();
    }

    let mut rv = String::new();
    let mut rest = &v[..];
    while !rest.is_empty() {
        let word_start = match rest.find(|c: char| !c.is_whitespace()) {
            Some(idx) => idx,
            None => {
                rv.push_str(&escape_text(rest));
                break;
            }
        };
        rv.push_str(&escape_text(&rest[..word_start]));
        rest = &rest[word_start..];
        let word_end = rest
            .find(char::is_whitespace)
            .unwrap_or(rest.len());
        let word = &rest[..word_end];
        rest = &rest[word_end..];

        // split surrounding punctuation off the word
        let head_len = word
            .chars()
            .take_while(|c| matches!(c, '(' | '<' | '['))
            .map(|c| c.len_utf8())
            .sum::<usize>();
        let tail_start = word
            .char_indices()
            .rev()
            .take_while(|(_, c)| matches!(c, '.' | ',' | ')' | '>' | ']' | ':' | ';' | '!' | '?'))
            .map(|(idx, _)| idx)
            .last()
            .unwrap_or(word.len());
        let tail_start = tail_start.max(head_len);
        let (head, middle, tail) = (&word[..head_len], &word[head_len..tail_start], &word[tail_start..]);

        rv.push_str(&escape_text(head));
        if let Some(url) = match_scheme_url(middle, policies) {
            write!(
                rv,
                "<a href=\"{}\"{}>{}</a>",
                HtmlEscape(url),
                extra_attrs,
                escape_text(&trim_url(url))
            )
            .ok();
        } else if middle.starts_with("www.") {
            write!(
                rv,
                "<a href=\"https://{}\"{}>{}</a>",
                HtmlEscape(middle),
                extra_attrs,
                escape_text(&trim_url(middle))
            )
            .ok();
        } else if is_email(middle) {
            write!(
                rv,
                "<a href=\"mailto:{}\">{}</a>",
                HtmlEscape(middle),
                escape_text(middle)
            )
            .ok();
        } else {
            rv.push_str(&escape_text(middle));
        }
        rv.push_str(&escape_text(tail));
    }
    Ok(Value::from_safe_string(rv))
}

fn match_scheme_url<'a>(word: &'a str, policies: &crate::environment::Policies) -> Option<&'a str> {
    for scheme in ["http://", "https://"]
        .iter()
        .copied()
        .chain(policies.urlize_extra_schemes.iter().map(|x| x.as_str()))
    {
        if word.len() > scheme.len() && word.starts_with(scheme) {
            return Some(word);
        }
    }
    None
}

/// Email detection with the hardening rules applied: the domain must start
/// with a word character and the top level domain may only contain word
/// characters.  This prevents pathological backtracking style inputs from
/// being linked.
fn is_email(word: &str) -> bool {
    let (local, domain) = match word.split_once('@') {
        Some(rv) => rv,
        None => return false,
    };
    if local.is_empty() || domain.is_empty() || word.contains(':') || word.contains('/') {
        return false;
    }
    if !domain
        .chars()
        .next()
        .map_or(false, |c| c.is_alphanumeric() || c == '_')
    {
        return false;
    }
    let tld = match domain.rsplit_once('.') {
        Some((_, tld)) => tld,
        None => return false,
    };
    !tld.is_empty() && tld.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Converts a value to JSON.
///
/// The resulting string is safe to embed in HTML because the relevant
/// characters are emitted as unicode escapes.  An optional indentation can
/// be provided.
///
/// ```jinja
/// <script>const CONFIG = {{ config|tojson }};</script>
/// ```
#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub fn tojson(state: &State, v: Value, indent: Option<usize>) -> Result<Value, Error> {
    if let Some(ref dumps) = state.env().policies().json_dumps_function {
        return dumps(&v).map(Value::from_safe_string);
    }
    let dumped = match indent {
        Some(indent) => {
            let indentation = " ".repeat(indent);
            let mut out = Vec::new();
            let fmt = serde_json::ser::PrettyFormatter::with_indent(indentation.as_bytes());
            let mut ser = serde_json::Serializer::with_formatter(&mut out, fmt);
            ok!(serde::Serialize::serialize(&v, &mut ser).map_err(json_err));
            ok!(String::from_utf8(out).map_err(|_| Error::new(
                ErrorKind::BadSerialization,
                "invalid utf-8 in JSON output"
            )))
        }
        None => ok!(serde_json::to_string(&v).map_err(json_err)),
    };
    // make the output HTML safe by replacing the critical characters with
    // unicode escapes the way Jinja2 does it.
    let mut rv = String::with_capacity(dumped.len());
    for c in dumped.chars() {
        match c {
            '<' => rv.push_str("\\u003c"),
            '>' => rv.push_str("\\u003e"),
            '&' => rv.push_str("\\u0026"),
            '\'' => rv.push_str("\\u0027"),
            c => rv.push(c),
        }
    }
    Ok(Value::from_safe_string(rv))
}

#[cfg(feature = "json")]
fn json_err(err: serde_json::Error) -> Error {
    Error::new(ErrorKind::BadSerialization, "unable to serialize to JSON").with_source(err)
}

/// Looks up a (potentially dotted) attribute path on a value.
fn lookup_attr_path(value: &Value, path: &str) -> Result<Value, Error> {
    let mut rv = value.clone();
    for part in path.split('.') {
        rv = if let Ok(idx) = part.parse::<i64>() {
            ok!(rv.get_item(&Value::from(idx)))
        } else {
            ok!(rv.get_attr(part))
        };
    }
    Ok(rv)
}

/// Compares two values for sorting, optionally folding string case.
fn sort_cmp(a: &Value, b: &Value, case_sensitive: bool) -> Ordering {
    if case_sensitive {
        a.cmp(b)
    } else {
        fold_case(a).cmp(&fold_case(b))
    }
}

fn fold_case(v: &Value) -> Value {
    match v.as_str() {
        Some(s) => Value::from(s.to_lowercase()),
        None => v.clone(),
    }
}

/// Splits a trailing kwargs value off an argument slice.
fn split_kwargs(args: &[Value]) -> (&[Value], Option<Kwargs>) {
    match args.split_last() {
        Some((last, rest)) if last.is_kwargs() => (
            rest,
            Some(Kwargs::from_map(last.as_map().unwrap().clone())),
        ),
        _ => (args, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    fn state_for_test(env: &crate::Environment) -> State<'_> {
        env.empty_state()
    }

    #[test]
    fn test_basics() {
        fn test(_: &State, a: u32, b: u32) -> u32 {
            a + b
        }

        let env = crate::Environment::new();
        let state = state_for_test(&env);
        let bx = BoxedFilter::new(test);
        assert_eq!(
            bx.apply_to(&state, &[Value::from(23), Value::from(42)]).unwrap(),
            Value::from(65)
        );
    }

    #[test]
    fn test_optional_args() {
        fn add(_: &State, val: u32, a: u32, b: Option<u32>) -> u32 {
            let mut sum = val + a;
            if let Some(b) = b {
                sum += b;
            }
            sum
        }

        let env = crate::Environment::new();
        let state = state_for_test(&env);
        let bx = BoxedFilter::new(add);
        assert_eq!(
            bx.apply_to(&state, &[Value::from(23), Value::from(42)]).unwrap(),
            Value::from(65)
        );
        assert_eq!(
            bx.apply_to(
                &state,
                &[Value::from(23), Value::from(42), Value::UNDEFINED]
            )
            .unwrap(),
            Value::from(65)
        );
        assert_eq!(
            bx.apply_to(&state, &[Value::from(23), Value::from(42), Value::from(1)])
                .unwrap(),
            Value::from(66)
        );
    }

    #[test]
    fn test_truncate() {
        let env = crate::Environment::new();
        let state = state_for_test(&env);
        assert_eq!(
            truncate(
                &state,
                "Hello World".into(),
                Some(5),
                None,
                None,
                Some(0),
                Kwargs::default()
            )
            .unwrap(),
            "He..."
        );
        assert_eq!(
            truncate(
                &state,
                "Hello World".into(),
                Some(9),
                Some(false),
                None,
                Some(0),
                Kwargs::default()
            )
            .unwrap(),
            "Hello..."
        );
        // leeway tolerates slightly longer values
        assert_eq!(
            truncate(&state, "Hello".into(), Some(4), None, None, None, Kwargs::default())
                .unwrap(),
            "Hello"
        );
    }

    #[test]
    fn test_title_and_capitalize() {
        let env = crate::Environment::new();
        let state = state_for_test(&env);
        assert_eq!(title(&state, "hello world".into()), "Hello World");
        assert_eq!(title(&state, "foo-bar".into()), "Foo-Bar");
        assert_eq!(capitalize(&state, "hELLO".into()), "Hello");
    }

    #[test]
    fn test_indent() {
        let env = crate::Environment::new();
        let state = state_for_test(&env);
        assert_eq!(
            indent(&state, "a\nb\n\nc".into(), Some(2), None, None),
            "a\n  b\n\n  c"
        );
        assert_eq!(
            indent(&state, "a\nb".into(), Some(2), Some(true), None),
            "  a\n  b"
        );
    }

    #[test]
    fn test_is_email() {
        assert!(is_email("foo@example.com"));
        assert!(!is_email("foo@"));
        assert!(!is_email("@example.com"));
        assert!(!is_email("foo@-example.com"));
        assert!(!is_email("http://foo@example.com"));
        assert!(!is_email("foo@example.c-m"));
    }

    #[test]
    fn test_filesizeformat() {
        let env = crate::Environment::new();
        let state = state_for_test(&env);
        assert_eq!(filesizeformat(&state, 1.0, None), "1 Byte");
        assert_eq!(filesizeformat(&state, 300.0, None), "300 Bytes");
        assert_eq!(filesizeformat(&state, 13000.0, None), "13.0 kB");
        assert_eq!(filesizeformat(&state, 1024.0, Some(true)), "1.0 KiB");
    }
}
