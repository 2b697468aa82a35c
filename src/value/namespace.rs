use std::fmt;
use std::sync::Mutex;

use crate::error::Error;
use crate::value::{Object, Value, ValueMap};

/// A value that holds mutable attributes across scopes.
///
/// Namespaces are created with the `namespace()` function and are the only
/// values that permit attribute assignment (`{% set ns.value = 42 %}`).
/// Because assignments on a namespace mutate the object itself rather than
/// the enclosing scope, they are visible outside of loops and blocks.
pub struct Namespace {
    data: Mutex<ValueMap>,
}

impl Namespace {
    pub fn new(data: ValueMap) -> Namespace {
        Namespace {
            data: Mutex::new(data),
        }
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock().unwrap();
        let mut m = f.debug_map();
        for (key, value) in data.iter() {
            m.entry(key, value);
        }
        m.finish()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<namespace>")
    }
}

impl Object for Namespace {
    fn get_attr(&self, name: &str) -> Option<Value> {
        self.data.lock().unwrap().get(&Value::from(name)).cloned()
    }

    fn set_attr(&self, name: &str, value: Value) -> Result<(), Error> {
        self.data.lock().unwrap().insert(Value::from(name), value);
        Ok(())
    }
}
