use std::fmt;

use crate::compiler::instructions::CaptureMode;
use crate::utils::AutoEscape;
use crate::value::{ops, Value};

/// An abstraction over [`Write`](std::fmt::Write) for the rendering.
///
/// This is a utility type used in the engine which can be written into like
/// one can write into an [`std::fmt::Write`] value.  It's primarily used
/// internally in the engine but it's also passed to the custom formatter
/// function.
pub struct Output<'a> {
    w: &'a mut (dyn fmt::Write + 'a),
    capture_stack: Vec<Option<String>>,
    /// in native mode the evaluator collects values rather than text so
    /// that a render can produce a value of the original type.
    native_chunks: Option<Vec<Value>>,
    null_sink: NullWriter,
}

/// A helper that writes into nothing.
pub struct NullWriter;

impl<'a> Output<'a> {
    /// Creates an output writing to a string.
    pub(crate) fn with_string(buf: &'a mut String) -> Self {
        Self {
            w: buf,
            capture_stack: Vec::new(),
            native_chunks: None,
            null_sink: NullWriter,
        }
    }

    /// Creates an output that collects native value chunks.
    pub(crate) fn with_native_capture(w: &'a mut NullWriter) -> Self {
        Self {
            w,
            capture_stack: Vec::new(),
            native_chunks: Some(Vec::new()),
            null_sink: NullWriter,
        }
    }

    /// Creates a null output that writes nowhere.
    pub(crate) fn null(w: &'a mut NullWriter) -> Self {
        Self {
            w,
            capture_stack: Vec::new(),
            native_chunks: None,
            null_sink: NullWriter,
        }
    }

    /// Begins capturing into a string or discards the output.
    pub(crate) fn begin_capture(&mut self, mode: CaptureMode) {
        self.capture_stack.push(match mode {
            CaptureMode::Capture => Some(String::new()),
            CaptureMode::Discard => None,
        });
    }

    /// Ends capturing and returns the captured string as value.
    pub(crate) fn end_capture(&mut self, auto_escape: AutoEscape) -> Value {
        let captured = self.capture_stack.pop().unwrap();
        match captured {
            Some(captured) => {
                if !matches!(auto_escape, AutoEscape::None) {
                    Value::from_safe_string(captured)
                } else {
                    Value::from(captured)
                }
            }
            None => Value::UNDEFINED,
        }
    }

    /// Whether output is currently discarded entirely.
    pub(crate) fn is_discarding(&self) -> bool {
        matches!(self.capture_stack.last(), Some(None))
    }

    /// Records a native value chunk if native capture is active and not
    /// interrupted by a string capture.
    ///
    /// Returns `true` when the value was consumed.
    pub(crate) fn emit_native_chunk(&mut self, value: &Value) -> bool {
        if self.capture_stack.is_empty() {
            if let Some(ref mut chunks) = self.native_chunks {
                chunks.push(value.clone());
                return true;
            }
        }
        false
    }

    /// Takes the collected native chunks out of the output.
    pub(crate) fn take_native_chunks(&mut self) -> Vec<Value> {
        self.native_chunks.take().unwrap_or_default()
    }

    fn target(&mut self) -> &mut dyn fmt::Write {
        match self.capture_stack.last_mut() {
            Some(Some(stream)) => stream as _,
            Some(None) => &mut self.null_sink,
            None => self.w,
        }
    }

    /// Writes some data to the underlying buffer contained within this
    /// output.
    #[inline]
    pub fn write_str(&mut self, s: &str) -> fmt::Result {
        if self.capture_stack.is_empty() {
            if let Some(ref mut chunks) = self.native_chunks {
                chunks.push(Value::from(s));
                return Ok(());
            }
        }
        self.target().write_str(s)
    }

    /// Writes some formatted information into this instance.
    #[inline]
    pub fn write_fmt(&mut self, a: fmt::Arguments<'_>) -> fmt::Result {
        if self.capture_stack.is_empty() && self.native_chunks.is_some() {
            let mut rv = String::new();
            ok!(fmt::Write::write_fmt(&mut rv, a));
            self.native_chunks.as_mut().unwrap().push(Value::from(rv));
            return Ok(());
        }
        self.target().write_fmt(a)
    }
}

impl fmt::Write for Output<'_> {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        Output::write_str(self, s)
    }

    #[inline]
    fn write_fmt(&mut self, args: fmt::Arguments<'_>) -> fmt::Result {
        Output::write_fmt(self, args)
    }
}

impl fmt::Write for NullWriter {
    #[inline]
    fn write_str(&mut self, _s: &str) -> fmt::Result {
        Ok(())
    }

    #[inline]
    fn write_char(&mut self, _c: char) -> fmt::Result {
        Ok(())
    }
}

/// Combines native chunks into the final value of a native render.
///
/// A render that produced exactly one chunk returns it unchanged, which is
/// what allows `{{ x + y }}` to return an integer.  Multiple chunks are
/// concatenated into a string which is then re-parsed as a literal so that
/// list or map shaped output becomes a real value again.
pub(crate) fn native_concat(chunks: Vec<Value>) -> Value {
    // only literal shapes convert back; anything that would need actual
    // evaluation (operators, lookups) stays a string.
    fn literal_value(s: &str) -> Option<Value> {
        crate::compiler::parser::parse_expr(s).ok().and_then(|expr| expr.as_const())
    }

    match <[Value; 1]>::try_from(chunks) {
        Ok([single]) => match single.as_str() {
            Some(s) => literal_value(s.trim()).unwrap_or(single),
            None => single,
        },
        Err(chunks) => {
            if chunks.is_empty() {
                return Value::from("");
            }
            let mut rv = String::new();
            for chunk in &chunks {
                rv.push_str(&ops::soft_str(chunk).to_string());
            }
            match literal_value(rv.trim()) {
                Some(value) => value,
                None => Value::from(rv),
            }
        }
    }
}
