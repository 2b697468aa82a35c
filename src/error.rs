use std::borrow::Cow;
use std::fmt;

/// Represents template errors.
///
/// If debug mode is enabled a template error contains additional debug
/// information that can be displayed by formatting an error with the
/// alternative formatting (``format!("{:#}", err)``).
///
/// Since the engine takes advantage of chained errors it's recommended
/// to render the entire chain to better understand the causes.
///
/// # Example
///
/// Here is an example of how you might want to render errors:
///
/// ```rust
/// # let mut env = torii::Environment::new();
/// # env.add_template("", "").unwrap();
/// # let template = env.get_template("").unwrap(); let ctx = ();
/// match template.render(ctx) {
///     Ok(result) => println!("{}", result),
///     Err(err) => {
///         eprintln!("Could not render template: {:#}", err);
///         // render causes as well
///         let mut err = &err as &dyn std::error::Error;
///         while let Some(next_err) = err.source() {
///             eprintln!();
///             eprintln!("caused by: {:#}", next_err);
///             err = next_err;
///         }
///     }
/// }
/// ```
pub struct Error {
    repr: Box<ErrorRepr>,
}

/// The internal error data.
struct ErrorRepr {
    kind: ErrorKind,
    detail: Option<Cow<'static, str>>,
    name: Option<String>,
    lineno: usize,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
    #[cfg(feature = "debug")]
    template_source: Option<String>,
}

/// An enum describing the error kind.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// An invalid operation was attempted at runtime.
    InvalidOperation,
    /// The template has a syntax error.
    SyntaxError,
    /// A template was not found.
    TemplateNotFound,
    /// Too many arguments were passed to a function.
    TooManyArguments,
    /// An expected argument was missing.
    MissingArgument,
    /// A filter is unknown.
    UnknownFilter,
    /// A test is unknown.
    UnknownTest,
    /// A function is unknown.
    UnknownFunction,
    /// An unknown method was called.
    UnknownMethod,
    /// A bad escape sequence in a string was encountered.
    BadEscape,
    /// An operation on an undefined value was attempted.
    UndefinedError,
    /// Not able to serialize this value.
    BadSerialization,
    /// An error happened in an include.
    BadInclude,
    /// An error happened in a super block.
    EvalBlock,
    /// Unable to unpack a value.
    CannotUnpack,
    /// Failed writing output.
    WriteFailure,
    /// A sandbox policy rejected an operation.
    SecurityError,
    /// Error creating custom delimiters.
    InvalidDelimiter,
}

impl ErrorKind {
    fn description(self) -> &'static str {
        match self {
            ErrorKind::InvalidOperation => "invalid operation",
            ErrorKind::SyntaxError => "syntax error",
            ErrorKind::TemplateNotFound => "template not found",
            ErrorKind::TooManyArguments => "too many arguments",
            ErrorKind::MissingArgument => "missing argument",
            ErrorKind::UnknownFilter => "unknown filter",
            ErrorKind::UnknownFunction => "unknown function",
            ErrorKind::UnknownTest => "unknown test",
            ErrorKind::UnknownMethod => "unknown method",
            ErrorKind::BadEscape => "bad string escape",
            ErrorKind::UndefinedError => "undefined value",
            ErrorKind::BadSerialization => "could not serialize to value",
            ErrorKind::BadInclude => "could not render include",
            ErrorKind::EvalBlock => "could not render block",
            ErrorKind::CannotUnpack => "cannot unpack",
            ErrorKind::WriteFailure => "failed to write output",
            ErrorKind::SecurityError => "operation rejected by sandbox",
            ErrorKind::InvalidDelimiter => "invalid custom delimiters",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut err = f.debug_struct("Error");
        err.field("kind", &self.kind());
        if let Some(ref detail) = self.repr.detail {
            err.field("detail", detail);
        }
        if let Some(name) = self.name() {
            err.field("name", &name);
        }
        if let Some(line) = self.line() {
            err.field("line", &line);
        }
        if let Some(source) = std::error::Error::source(self) {
            err.field("source", &source);
        }
        ok!(err.finish());

        // so this is a bit questionable, but because of how commonly errors
        // are just unwrapped it's sensible to spit out the offending template
        // line following the error struct dump.
        #[cfg(feature = "debug")]
        {
            if !f.alternate() {
                ok!(self.render_template_source(f));
            }
        }

        Ok(())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref detail) = self.repr.detail {
            ok!(write!(f, "{}: {}", self.kind(), detail));
        } else {
            ok!(write!(f, "{}", self.kind()));
        }
        if let Some(filename) = self.name() {
            ok!(write!(f, " (in {}:{})", filename, self.line().unwrap_or(0)));
        }
        #[cfg(feature = "debug")]
        {
            if f.alternate() {
                ok!(self.render_template_source(f));
            }
        }
        Ok(())
    }
}

impl Error {
    /// Creates a new error with kind and detail.
    pub fn new<D: Into<Cow<'static, str>>>(kind: ErrorKind, detail: D) -> Error {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: Some(detail.into()),
                name: None,
                lineno: 0,
                source: None,
                #[cfg(feature = "debug")]
                template_source: None,
            }),
        }
    }

    pub(crate) fn set_filename_and_line(&mut self, filename: &str, lineno: usize) {
        self.repr.name = Some(filename.into());
        self.repr.lineno = lineno;
    }

    pub(crate) fn set_line(&mut self, lineno: usize) {
        self.repr.lineno = lineno;
    }

    pub(crate) fn new_not_found(name: &str) -> Error {
        Error::new(
            ErrorKind::TemplateNotFound,
            format!("template {name:?} does not exist"),
        )
    }

    /// Attaches another error as source to this error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.repr.source = Some(Box::new(source));
        self
    }

    /// Returns the error kind.
    pub fn kind(&self) -> ErrorKind {
        self.repr.kind
    }

    /// Returns the detail message of the error if available.
    pub fn detail(&self) -> Option<&str> {
        self.repr.detail.as_deref()
    }

    /// Returns the name of the template that caused the error.
    pub fn name(&self) -> Option<&str> {
        self.repr.name.as_deref()
    }

    /// Returns the line number where the error occurred.
    pub fn line(&self) -> Option<usize> {
        if self.repr.lineno > 0 {
            Some(self.repr.lineno)
        } else {
            None
        }
    }

    /// Attaches the template source for debug rendering.
    ///
    /// The source snapshot is only embedded into the error if the debug mode
    /// is enabled on the environment
    /// ([`Environment::set_debug`](crate::Environment::set_debug)).
    #[cfg(feature = "debug")]
    pub(crate) fn attach_template_source(&mut self, source: String) {
        self.repr.template_source = Some(source);
    }

    #[cfg(feature = "debug")]
    pub(crate) fn has_template_source(&self) -> bool {
        self.repr.template_source.is_some()
    }

    #[cfg(feature = "debug")]
    fn render_template_source(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (source, lineno) = match (&self.repr.template_source, self.line()) {
            (Some(source), Some(lineno)) => (source, lineno),
            _ => return Ok(()),
        };
        ok!(writeln!(f));
        ok!(writeln!(
            f,
            "---------------------------- {} ----------------------------",
            self.name().unwrap_or("<unnamed>")
        ));
        let window = 3usize;
        for (idx, line) in source.lines().enumerate() {
            let cur = idx + 1;
            if cur + window < lineno || cur > lineno + window {
                continue;
            }
            if cur == lineno {
                ok!(writeln!(f, "{cur:>4} > {line}"));
                ok!(writeln!(f, "     i {}", self.kind()));
            } else {
                ok!(writeln!(f, "{cur:>4} | {line}"));
            }
        }
        writeln!(
            f,
            "-------------------------------------------------------------"
        )
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.repr.source.as_ref().map(|err| err.as_ref() as _)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error {
            repr: Box::new(ErrorRepr {
                kind,
                detail: None,
                name: None,
                lineno: 0,
                source: None,
                #[cfg(feature = "debug")]
                template_source: None,
            }),
        }
    }
}

impl From<fmt::Error> for Error {
    fn from(_: fmt::Error) -> Self {
        Error::new(ErrorKind::WriteFailure, "formatting failed")
    }
}

/// Attaches the template source to compile errors in debug builds.
pub(crate) fn attach_basic_debug_info<T>(rv: Result<T, Error>, source: &str) -> Result<T, Error> {
    #[cfg(feature = "debug")]
    {
        match rv {
            Ok(rv) => Ok(rv),
            Err(mut err) => {
                err.attach_template_source(source.to_string());
                Err(err)
            }
        }
    }
    #[cfg(not(feature = "debug"))]
    {
        let _source = source;
        rv
    }
}
