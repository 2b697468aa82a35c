use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::compiler::instructions::{
    Instructions, Str, MACRO_CALLER, MACRO_KWARGS, MACRO_VARARGS,
};
use crate::error::{Error, ErrorKind};
use crate::output::Output;
use crate::utils::AutoEscape;
use crate::value::{Object, Value, ValueMap};
use crate::vm::state::State;
use crate::vm::Vm;

pub(crate) struct MacroData {
    pub name: Str,
    pub arg_spec: Box<[Str]>,
    /// aligned with the tail of `arg_spec`.
    pub defaults: Vec<Value>,
    /// the instruction set that declared the macro and the offset of the
    /// body within it.  Instructions are reference counted so the macro
    /// value can outlive the state that created it.
    pub instructions: Arc<Instructions>,
    pub offset: usize,
    pub closure: Value,
    pub flags: u8,
}

pub(crate) struct Macro {
    pub data: Arc<MacroData>,
}

impl fmt::Debug for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl fmt::Display for Macro {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<macro {}>", self.data.name)
    }
}

impl Object for Macro {
    fn attributes(&self) -> &[&str] {
        &[
            "name",
            "arguments",
            "defaults",
            "catch_kwargs",
            "catch_varargs",
            "caller",
        ]
    }

    fn get_attr(&self, name: &str) -> Option<Value> {
        match name {
            "name" => Some(Value::from(&*self.data.name)),
            "arguments" => Some(Value::from(
                self.data
                    .arg_spec
                    .iter()
                    .map(|x| Value::from(&**x))
                    .collect::<Vec<_>>(),
            )),
            "defaults" => Some(Value::from(self.data.defaults.clone())),
            "catch_kwargs" => Some(Value::from(self.data.flags & MACRO_KWARGS != 0)),
            "catch_varargs" => Some(Value::from(self.data.flags & MACRO_VARARGS != 0)),
            "caller" => Some(Value::from(self.data.flags & MACRO_CALLER != 0)),
            _ => None,
        }
    }

    fn call(&self, state: &State<'_>, args: &[Value]) -> Result<Value, Error> {
        let (args, kwargs) = match args.last() {
            Some(last) if last.is_kwargs() => {
                (&args[..args.len() - 1], last.as_map().cloned())
            }
            _ => (args, None),
        };

        let catch_varargs = self.data.flags & MACRO_VARARGS != 0;
        let catch_kwargs = self.data.flags & MACRO_KWARGS != 0;
        let catch_caller = self.data.flags & MACRO_CALLER != 0;

        if args.len() > self.data.arg_spec.len() && !catch_varargs {
            return Err(Error::new(
                ErrorKind::TooManyArguments,
                format!("macro {} received too many arguments", self.data.name),
            ));
        }

        let defaults_offset = self.data.arg_spec.len() - self.data.defaults.len();
        let mut kwargs_used = BTreeSet::new();
        let mut arg_values = Vec::with_capacity(self.data.arg_spec.len());
        for (idx, name) in self.data.arg_spec.iter().enumerate() {
            let kwarg = kwargs
                .as_ref()
                .and_then(|kwargs| kwargs.get(&Value::from(&**name)));
            arg_values.push(match (args.get(idx), kwarg) {
                (Some(_), Some(_)) => {
                    return Err(Error::new(
                        ErrorKind::TooManyArguments,
                        format!("duplicate argument `{name}`"),
                    ))
                }
                (Some(arg), None) => arg.clone(),
                (None, Some(kwarg)) => {
                    kwargs_used.insert(name.to_string());
                    kwarg.clone()
                }
                (None, None) => match idx.checked_sub(defaults_offset) {
                    Some(default_idx) => self.data.defaults[default_idx].clone(),
                    None => {
                        return Err(Error::new(
                            ErrorKind::MissingArgument,
                            format!(
                                "macro {} is missing the argument `{name}`",
                                self.data.name
                            ),
                        ))
                    }
                },
            });
        }

        if catch_varargs {
            arg_values.push(Value::from(
                args.get(self.data.arg_spec.len()..)
                    .unwrap_or_default()
                    .to_vec(),
            ));
        }

        let mut caller = None;
        let mut rest_kwargs = ValueMap::new();
        if let Some(ref kwargs) = kwargs {
            for (key, value) in kwargs.iter() {
                let name = match key.as_str() {
                    Some(name) => name,
                    None => continue,
                };
                if kwargs_used.contains(name) {
                    continue;
                }
                if name == "caller" && !self.data.arg_spec.iter().any(|x| &**x == "caller") {
                    if catch_caller {
                        caller = Some(value.clone());
                        continue;
                    } else if !catch_kwargs {
                        return Err(Error::new(
                            ErrorKind::TooManyArguments,
                            format!(
                                "macro {} takes no keyword argument `caller`",
                                self.data.name
                            ),
                        ));
                    }
                }
                if catch_kwargs {
                    rest_kwargs.insert(key.clone(), value.clone());
                } else {
                    return Err(Error::new(
                        ErrorKind::TooManyArguments,
                        format!("unknown keyword argument `{name}`"),
                    ));
                }
            }
        }

        if catch_kwargs {
            arg_values.push(Value::from_kwargs(rest_kwargs));
        }
        if catch_caller {
            arg_values.push(caller.unwrap_or(Value::UNDEFINED));
        }

        let vm = Vm::new(state.env());
        let mut rv = String::new();
        let mut out = Output::with_string(&mut rv);

        // This requires some explanation here.  Because we get the state as
        // &State and not &mut State we are required to create a new state
        // here.  This is unfortunate but makes the calling interface more
        // convenient for the rest of the system.  Because macros cannot
        // return anything other than strings (most importantly they can't
        // return other macros) this is however not an issue, as
        // modifications in the macro cannot leak out.
        ok!(vm.eval_macro(
            self.data.instructions.clone(),
            self.data.offset,
            self.data.closure.clone(),
            &mut out,
            state,
            arg_values,
        ));

        Ok(if !matches!(state.auto_escape(), AutoEscape::None) {
            Value::from_safe_string(rv)
        } else {
            Value::from(rv)
        })
    }
}
