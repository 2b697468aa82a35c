use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::ser::{self, Serialize, Serializer};

use crate::value::{MapType, StringType, Value, ValueMap, ValueRepr};

// Values pass through serde when the engine converts render contexts.  A
// plain serialization round trip would lose information that has no serde
// equivalent (the safe flag of strings, undefined values, dynamic object
// identity).  To avoid that, values transfer themselves through an in-band
// handle when the target serializer is our own: the value parks itself in
// a thread local slot and only a marker newtype with the slot id travels
// through serde.
const VALUE_HANDLE_MARKER: &str = "\x01__torii_ValueHandle";

thread_local! {
    static INTERNAL_SERIALIZATION: Cell<bool> = const { Cell::new(false) };
    static VALUE_HANDLES: RefCell<BTreeMap<u32, Value>> = const { RefCell::new(BTreeMap::new()) };
    static VALUE_HANDLE_COUNTER: Cell<u32> = const { Cell::new(0) };
}

fn in_internal_serialization() -> bool {
    INTERNAL_SERIALIZATION.with(|flag| flag.get())
}

/// Converts anything serializable into a value.
pub fn to_value<T: Serialize>(value: T) -> Value {
    let was_internal = INTERNAL_SERIALIZATION.with(|flag| flag.replace(true));
    let rv = value.serialize(ValueSerializer);
    if !was_internal {
        INTERNAL_SERIALIZATION.with(|flag| flag.set(false));
        VALUE_HANDLES.with(|handles| handles.borrow_mut().clear());
    }
    match rv {
        Ok(rv) => rv,
        Err(invalid) => invalid.0,
    }
}

impl Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        // transfer the value unchanged if we are serializing into our own
        // value serializer
        if in_internal_serialization() {
            let handle_id = VALUE_HANDLE_COUNTER.with(|counter| {
                let rv = counter.get().wrapping_add(1);
                counter.set(rv);
                rv
            });
            VALUE_HANDLES.with(|handles| {
                handles.borrow_mut().insert(handle_id, self.clone());
            });
            return serializer.serialize_newtype_struct(VALUE_HANDLE_MARKER, &handle_id);
        }

        match self.0 {
            ValueRepr::None | ValueRepr::Undefined(_) => serializer.serialize_unit(),
            ValueRepr::Bool(b) => serializer.serialize_bool(b),
            ValueRepr::I64(i) => serializer.serialize_i64(i),
            ValueRepr::F64(f) => serializer.serialize_f64(f),
            ValueRepr::String(ref s, _) => serializer.serialize_str(s),
            ValueRepr::Seq(ref elements) => elements.serialize(serializer),
            ValueRepr::Map(ref entries, _) => {
                use serde::ser::SerializeMap;
                let mut map = ok!(serializer.serialize_map(Some(entries.len())));
                for (ref k, ref v) in entries.iter() {
                    ok!(map.serialize_entry(k, v));
                }
                map.end()
            }
            ValueRepr::Dynamic(ref obj) => {
                use serde::ser::SerializeMap;
                let attrs = obj.attributes();
                if attrs.is_empty() {
                    serializer.serialize_str(&obj.to_string())
                } else {
                    let mut map = ok!(serializer.serialize_map(Some(attrs.len())));
                    for attr in attrs {
                        if let Some(value) = obj.get_attr(attr) {
                            ok!(map.serialize_entry(attr, &value));
                        }
                    }
                    map.end()
                }
            }
        }
    }
}

/// The serializer cannot fail; unsupported constructs degrade into a value
/// carried inside the error type so that `to_value` stays infallible.
#[derive(Debug)]
pub struct InvalidValue(Value);

impl std::error::Error for InvalidValue {}

impl std::fmt::Display for InvalidValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("invalid value")
    }
}

impl ser::Error for InvalidValue {
    fn custom<T>(msg: T) -> Self
    where
        T: std::fmt::Display,
    {
        InvalidValue(Value::from(msg.to_string()))
    }
}

struct ValueSerializer;

impl Serializer for ValueSerializer {
    type Ok = Value;
    type Error = InvalidValue;

    type SerializeSeq = SerializeSeq;
    type SerializeTuple = SerializeSeq;
    type SerializeTupleStruct = SerializeSeq;
    type SerializeTupleVariant = SerializeSeq;
    type SerializeMap = SerializeMap;
    type SerializeStruct = SerializeMap;
    type SerializeStructVariant = SerializeMap;

    fn serialize_bool(self, v: bool) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::Bool(v)))
    }

    fn serialize_i8(self, v: i8) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_i16(self, v: i16) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_i32(self, v: i32) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_i64(self, v: i64) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v)))
    }

    fn serialize_i128(self, v: i128) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_u8(self, v: u8) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_u16(self, v: u16) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_u32(self, v: u32) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_u64(self, v: u64) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_u128(self, v: u128) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::I64(v as i64)))
    }

    fn serialize_f32(self, v: f32) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::F64(v as f64)))
    }

    fn serialize_f64(self, v: f64) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::F64(v)))
    }

    fn serialize_char(self, v: char) -> Result<Value, InvalidValue> {
        Ok(Value::from(v))
    }

    fn serialize_str(self, value: &str) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::String(
            value.into(),
            StringType::Normal,
        )))
    }

    fn serialize_bytes(self, value: &[u8]) -> Result<Value, InvalidValue> {
        Ok(Value::from(
            value.iter().map(|&b| Value::from(b)).collect::<Vec<_>>(),
        ))
    }

    fn serialize_none(self) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::None))
    }

    fn serialize_some<T: Serialize + ?Sized>(self, value: &T) -> Result<Value, InvalidValue> {
        value.serialize(self)
    }

    fn serialize_unit(self) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::None))
    }

    fn serialize_unit_struct(self, _name: &'static str) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::None))
    }

    fn serialize_unit_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
    ) -> Result<Value, InvalidValue> {
        Ok(Value::from(variant))
    }

    fn serialize_newtype_struct<T: Serialize + ?Sized>(
        self,
        name: &'static str,
        value: &T,
    ) -> Result<Value, InvalidValue> {
        if name == VALUE_HANDLE_MARKER {
            let handle_id = match value.serialize(ValueSerializer) {
                Ok(Value(ValueRepr::I64(handle_id))) => handle_id as u32,
                _ => panic!("value handle not in correct format"),
            };
            return Ok(VALUE_HANDLES.with(|handles| {
                handles
                    .borrow_mut()
                    .remove(&handle_id)
                    .expect("value handle went away")
            }));
        }
        value.serialize(self)
    }

    fn serialize_newtype_variant<T: Serialize + ?Sized>(
        self,
        _name: &'static str,
        _variant_index: u32,
        variant: &'static str,
        value: &T,
    ) -> Result<Value, InvalidValue> {
        let mut map = ValueMap::new();
        map.insert(Value::from(variant), ok!(value.serialize(self)));
        Ok(Value(ValueRepr::Map(Arc::new(map), MapType::Normal)))
    }

    fn serialize_seq(self, len: Option<usize>) -> Result<Self::SerializeSeq, InvalidValue> {
        Ok(SerializeSeq {
            elements: Vec::with_capacity(len.unwrap_or(0)),
        })
    }

    fn serialize_tuple(self, len: usize) -> Result<Self::SerializeTuple, InvalidValue> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_struct(
        self,
        _name: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleStruct, InvalidValue> {
        self.serialize_seq(Some(len))
    }

    fn serialize_tuple_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        len: usize,
    ) -> Result<Self::SerializeTupleVariant, InvalidValue> {
        self.serialize_seq(Some(len))
    }

    fn serialize_map(self, _len: Option<usize>) -> Result<Self::SerializeMap, InvalidValue> {
        Ok(SerializeMap {
            entries: ValueMap::new(),
            key: None,
        })
    }

    fn serialize_struct(
        self,
        _name: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStruct, InvalidValue> {
        self.serialize_map(None)
    }

    fn serialize_struct_variant(
        self,
        _name: &'static str,
        _variant_index: u32,
        _variant: &'static str,
        _len: usize,
    ) -> Result<Self::SerializeStructVariant, InvalidValue> {
        self.serialize_map(None)
    }
}

struct SerializeSeq {
    elements: Vec<Value>,
}

impl ser::SerializeSeq for SerializeSeq {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InvalidValue> {
        self.elements.push(ok!(value.serialize(ValueSerializer)));
        Ok(())
    }

    fn end(self) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::Seq(Arc::new(self.elements))))
    }
}

impl ser::SerializeTuple for SerializeSeq {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_element<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InvalidValue> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, InvalidValue> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleStruct for SerializeSeq {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InvalidValue> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, InvalidValue> {
        ser::SerializeSeq::end(self)
    }
}

impl ser::SerializeTupleVariant for SerializeSeq {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_field<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InvalidValue> {
        ser::SerializeSeq::serialize_element(self, value)
    }

    fn end(self) -> Result<Value, InvalidValue> {
        ser::SerializeSeq::end(self)
    }
}

struct SerializeMap {
    entries: ValueMap,
    key: Option<Value>,
}

impl ser::SerializeMap for SerializeMap {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_key<T: Serialize + ?Sized>(&mut self, key: &T) -> Result<(), InvalidValue> {
        self.key = Some(ok!(key.serialize(ValueSerializer)));
        Ok(())
    }

    fn serialize_value<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), InvalidValue> {
        let key = self.key.take().expect("serialize_key not called");
        self.entries.insert(key, ok!(value.serialize(ValueSerializer)));
        Ok(())
    }

    fn end(self) -> Result<Value, InvalidValue> {
        Ok(Value(ValueRepr::Map(Arc::new(self.entries), MapType::Normal)))
    }
}

impl ser::SerializeStruct for SerializeMap {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), InvalidValue> {
        self.entries
            .insert(Value::from(key), ok!(value.serialize(ValueSerializer)));
        Ok(())
    }

    fn end(self) -> Result<Value, InvalidValue> {
        ser::SerializeMap::end(self)
    }
}

impl ser::SerializeStructVariant for SerializeMap {
    type Ok = Value;
    type Error = InvalidValue;

    fn serialize_field<T: Serialize + ?Sized>(
        &mut self,
        key: &'static str,
        value: &T,
    ) -> Result<(), InvalidValue> {
        ser::SerializeStruct::serialize_field(self, key, value)
    }

    fn end(self) -> Result<Value, InvalidValue> {
        ser::SerializeMap::end(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use similar_asserts::assert_eq;

    #[test]
    fn test_roundtrip_basic() {
        assert_eq!(to_value(42), Value::from(42));
        assert_eq!(to_value("x"), Value::from("x"));
        assert_eq!(to_value(Some(1)), Value::from(1));
        assert_eq!(to_value(None::<i32>), Value::from(()));
        assert_eq!(to_value(vec![1, 2]), Value::from(vec![1, 2]));
    }

    #[test]
    fn test_serialize_json() {
        let v = to_value(std::collections::BTreeMap::from([("a", vec![1, 2])]));
        assert_eq!(serde_json::to_string(&v).unwrap(), r#"{"a":[1,2]}"#);
    }
}
