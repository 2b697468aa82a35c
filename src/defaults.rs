use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::Write;

use crate::error::Error;
use crate::filters::{self, BoxedFilter};
use crate::functions::{self, BoxedFunction};
use crate::output::Output;
use crate::tests::{self, BoxedTest};
use crate::utils::{AutoEscape, HtmlEscape};
use crate::value::Value;
use crate::vm::State;

/// The default auto escape function used if none is set.
///
/// * [`Html`](AutoEscape::Html) is used for `.html`, `.htm` and `.xml`
///   extensions.
/// * [`Json`](AutoEscape::Json) is used for `.json`, `.json5` and `.yaml`
///   extensions when the `json` feature is enabled.
/// * In all other cases no auto escaping is used.
pub fn default_auto_escape_callback(name: &str) -> AutoEscape {
    match name.rsplit('.').next() {
        Some("html" | "htm" | "xml") => AutoEscape::Html,
        #[cfg(feature = "json")]
        Some("json" | "json5" | "js" | "yaml" | "yml") => AutoEscape::Json,
        _ => AutoEscape::None,
    }
}

pub(crate) fn no_auto_escape(_: &str) -> AutoEscape {
    AutoEscape::None
}

/// The default formatter.
///
/// This formatter takes a value and directly writes it into the output,
/// escaping it according to the current auto escaping mode.  Values that
/// carry the safe flag bypass the escaping.
pub fn escape_formatter(out: &mut Output, state: &State, value: &Value) -> Result<(), Error> {
    if value.is_undefined() {
        return Ok(());
    }
    match state.auto_escape() {
        AutoEscape::None => ok!(write!(out, "{value}").map_err(Error::from)),
        AutoEscape::Html => {
            if value.is_safe() {
                ok!(write!(out, "{value}").map_err(Error::from))
            } else if let Some(s) = value.as_str() {
                ok!(write!(out, "{}", HtmlEscape(s)).map_err(Error::from))
            } else {
                ok!(write!(out, "{}", HtmlEscape(&value.to_string())).map_err(Error::from))
            }
        }
        #[cfg(feature = "json")]
        AutoEscape::Json => {
            if value.is_safe() {
                ok!(write!(out, "{value}").map_err(Error::from))
            } else {
                let value = ok!(serde_json::to_string(value).map_err(|err| {
                    Error::new(
                        crate::ErrorKind::BadSerialization,
                        "unable to format to JSON",
                    )
                    .with_source(err)
                }));
                ok!(write!(out, "{value}").map_err(Error::from))
            }
        }
        AutoEscape::Custom(name) => {
            return Err(Error::new(
                crate::ErrorKind::InvalidOperation,
                format!("cannot format value for custom auto escaping ({name})"),
            ))
        }
    }
    Ok(())
}

pub(crate) fn get_builtin_filters() -> BTreeMap<Cow<'static, str>, BoxedFilter> {
    let mut rv = BTreeMap::new();
    rv.insert("safe".into(), BoxedFilter::new(filters::safe));
    rv.insert("escape".into(), BoxedFilter::new(filters::escape));
    rv.insert("e".into(), BoxedFilter::new(filters::escape));
    #[cfg(feature = "builtins")]
    {
        rv.insert("forceescape".into(), BoxedFilter::new(filters::forceescape));
        rv.insert("lower".into(), BoxedFilter::new(filters::lower));
        rv.insert("upper".into(), BoxedFilter::new(filters::upper));
        rv.insert("title".into(), BoxedFilter::new(filters::title));
        rv.insert("capitalize".into(), BoxedFilter::new(filters::capitalize));
        rv.insert("replace".into(), BoxedFilter::new(filters::replace));
        rv.insert("length".into(), BoxedFilter::new(filters::length));
        rv.insert("count".into(), BoxedFilter::new(filters::length));
        rv.insert("dictsort".into(), BoxedFilter::new(filters::dictsort));
        rv.insert("items".into(), BoxedFilter::new(filters::items));
        rv.insert("reverse".into(), BoxedFilter::new(filters::reverse));
        rv.insert("trim".into(), BoxedFilter::new(filters::trim));
        rv.insert("striptags".into(), BoxedFilter::new(filters::striptags));
        rv.insert("join".into(), BoxedFilter::new(filters::join));
        rv.insert("default".into(), BoxedFilter::new(filters::default));
        rv.insert("d".into(), BoxedFilter::new(filters::default));
        rv.insert("round".into(), BoxedFilter::new(filters::round));
        rv.insert("abs".into(), BoxedFilter::new(filters::abs));
        rv.insert("int".into(), BoxedFilter::new(filters::int));
        rv.insert("float".into(), BoxedFilter::new(filters::float));
        rv.insert(
            "filesizeformat".into(),
            BoxedFilter::new(filters::filesizeformat),
        );
        rv.insert("attr".into(), BoxedFilter::new(filters::attr));
        rv.insert("first".into(), BoxedFilter::new(filters::first));
        rv.insert("last".into(), BoxedFilter::new(filters::last));
        rv.insert("min".into(), BoxedFilter::new(filters::min));
        rv.insert("max".into(), BoxedFilter::new(filters::max));
        rv.insert("sum".into(), BoxedFilter::new(filters::sum));
        rv.insert("sort".into(), BoxedFilter::new(filters::sort));
        rv.insert("unique".into(), BoxedFilter::new(filters::unique));
        rv.insert("batch".into(), BoxedFilter::new(filters::batch));
        rv.insert("slice".into(), BoxedFilter::new(filters::slice));
        rv.insert("groupby".into(), BoxedFilter::new(filters::groupby));
        rv.insert("list".into(), BoxedFilter::new(filters::list));
        rv.insert("map".into(), BoxedFilter::new(filters::map));
        rv.insert("select".into(), BoxedFilter::new(filters::select));
        rv.insert("reject".into(), BoxedFilter::new(filters::reject));
        rv.insert("selectattr".into(), BoxedFilter::new(filters::selectattr));
        rv.insert("rejectattr".into(), BoxedFilter::new(filters::rejectattr));
        rv.insert("truncate".into(), BoxedFilter::new(filters::truncate));
        rv.insert("wordcount".into(), BoxedFilter::new(filters::wordcount));
        rv.insert("wordwrap".into(), BoxedFilter::new(filters::wordwrap));
        rv.insert("center".into(), BoxedFilter::new(filters::center));
        rv.insert("indent".into(), BoxedFilter::new(filters::indent));
        rv.insert("format".into(), BoxedFilter::new(filters::format));
        rv.insert("string".into(), BoxedFilter::new(filters::string));
        rv.insert("pprint".into(), BoxedFilter::new(filters::pprint));
        rv.insert("xmlattr".into(), BoxedFilter::new(filters::xmlattr));
        rv.insert("urlize".into(), BoxedFilter::new(filters::urlize));
        rv.insert("random".into(), BoxedFilter::new(filters::random));
        #[cfg(feature = "urlencode")]
        rv.insert("urlencode".into(), BoxedFilter::new(filters::urlencode));
        #[cfg(feature = "json")]
        rv.insert("tojson".into(), BoxedFilter::new(filters::tojson));
    }
    rv
}

pub(crate) fn get_builtin_tests() -> BTreeMap<Cow<'static, str>, BoxedTest> {
    #[allow(unused_mut)]
    let mut rv = BTreeMap::new();
    #[cfg(feature = "builtins")]
    {
        rv.insert("odd".into(), BoxedTest::new(tests::is_odd));
        rv.insert("even".into(), BoxedTest::new(tests::is_even));
        rv.insert(
            "divisibleby".into(),
            BoxedTest::new(tests::is_divisibleby),
        );
        rv.insert("undefined".into(), BoxedTest::new(tests::is_undefined));
        rv.insert("defined".into(), BoxedTest::new(tests::is_defined));
        rv.insert("none".into(), BoxedTest::new(tests::is_none));
        rv.insert("boolean".into(), BoxedTest::new(tests::is_boolean));
        rv.insert("true".into(), BoxedTest::new(tests::is_true));
        rv.insert("false".into(), BoxedTest::new(tests::is_false));
        rv.insert("number".into(), BoxedTest::new(tests::is_number));
        rv.insert("integer".into(), BoxedTest::new(tests::is_integer));
        rv.insert("float".into(), BoxedTest::new(tests::is_float));
        rv.insert("string".into(), BoxedTest::new(tests::is_string));
        rv.insert("sequence".into(), BoxedTest::new(tests::is_sequence));
        rv.insert("mapping".into(), BoxedTest::new(tests::is_mapping));
        rv.insert("iterable".into(), BoxedTest::new(tests::is_iterable));
        rv.insert("callable".into(), BoxedTest::new(tests::is_callable));
        rv.insert("sameas".into(), BoxedTest::new(tests::is_sameas));
        rv.insert("lower".into(), BoxedTest::new(tests::is_lower));
        rv.insert("upper".into(), BoxedTest::new(tests::is_upper));
        rv.insert("eq".into(), BoxedTest::new(tests::is_eq));
        rv.insert("equalto".into(), BoxedTest::new(tests::is_eq));
        rv.insert("==".into(), BoxedTest::new(tests::is_eq));
        rv.insert("ne".into(), BoxedTest::new(tests::is_ne));
        rv.insert("!=".into(), BoxedTest::new(tests::is_ne));
        rv.insert("lt".into(), BoxedTest::new(tests::is_lt));
        rv.insert("lessthan".into(), BoxedTest::new(tests::is_lt));
        rv.insert("<".into(), BoxedTest::new(tests::is_lt));
        rv.insert("le".into(), BoxedTest::new(tests::is_le));
        rv.insert("<=".into(), BoxedTest::new(tests::is_le));
        rv.insert("gt".into(), BoxedTest::new(tests::is_gt));
        rv.insert("greaterthan".into(), BoxedTest::new(tests::is_gt));
        rv.insert(">".into(), BoxedTest::new(tests::is_gt));
        rv.insert("ge".into(), BoxedTest::new(tests::is_ge));
        rv.insert(">=".into(), BoxedTest::new(tests::is_ge));
        rv.insert("in".into(), BoxedTest::new(tests::is_in));
    }
    rv
}

pub(crate) fn get_globals() -> BTreeMap<Cow<'static, str>, Value> {
    #[allow(unused_mut)]
    let mut rv = BTreeMap::new();
    #[cfg(feature = "builtins")]
    {
        rv.insert(
            Cow::Borrowed("range"),
            BoxedFunction::new(functions::range).to_value(),
        );
        rv.insert(
            Cow::Borrowed("dict"),
            BoxedFunction::new(functions::dict).to_value(),
        );
        rv.insert(
            Cow::Borrowed("debug"),
            BoxedFunction::new(functions::debug).to_value(),
        );
        rv.insert(
            Cow::Borrowed("namespace"),
            BoxedFunction::new(functions::namespace).to_value(),
        );
    }
    rv
}
