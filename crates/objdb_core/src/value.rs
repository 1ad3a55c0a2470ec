//! Field values exchanged between persisted types and the codec.

use crate::error::{CoreError, CoreResult};
use crate::object::{AnyObject, Obj};
use crate::schema::FieldKind;
use crate::types::DictId;
use std::fmt;
use uuid::Uuid;

/// One field value.
///
/// Persisted types produce these from `save` and receive them in a
/// [`Record`] on `load`. The variant must match the field's declared
/// [`FieldKind`].
#[derive(Clone)]
pub enum Value {
    /// Boolean.
    Bool(bool),
    /// Unsigned 8-bit integer.
    U8(u8),
    /// Unsigned 32-bit integer.
    U32(u32),
    /// Unsigned 64-bit integer.
    U64(u64),
    /// Signed 32-bit integer.
    I32(i32),
    /// Signed 64-bit integer.
    I64(i64),
    /// Double precision float.
    F64(f64),
    /// UTF-8 text.
    String(String),
    /// Byte string.
    Bytes(Vec<u8>),
    /// 128-bit identifier.
    Guid(Uuid),
    /// Homogeneous list.
    List(Vec<Value>),
    /// Optional value.
    Optional(Option<Box<Value>>),
    /// Reference to another object, stored by id or inline.
    Object(Option<AnyObject>),
    /// Handle of a nested dictionary.
    Dictionary(DictId),
}

impl Value {
    /// Zero value of a field kind, used when a field has no initializer.
    #[must_use]
    pub fn default_for(kind: &FieldKind) -> Self {
        match kind {
            FieldKind::Bool => Self::Bool(false),
            FieldKind::U8 => Self::U8(0),
            FieldKind::U32 => Self::U32(0),
            FieldKind::U64 => Self::U64(0),
            FieldKind::I32 => Self::I32(0),
            FieldKind::I64 => Self::I64(0),
            FieldKind::F64 => Self::F64(0.0),
            FieldKind::String => Self::String(String::new()),
            FieldKind::Bytes => Self::Bytes(Vec::new()),
            FieldKind::Guid => Self::Guid(Uuid::nil()),
            FieldKind::List(_) => Self::List(Vec::new()),
            FieldKind::Optional(_) => Self::Optional(None),
            FieldKind::Object => Self::Object(None),
            FieldKind::Dictionary => Self::Dictionary(DictId::new(0)),
        }
    }

    /// Wraps a typed object reference.
    pub fn object<T: 'static>(obj: Option<&Obj<T>>) -> Self {
        Self::Object(obj.map(Obj::to_any))
    }

    /// Wraps an optional value.
    pub fn optional(value: Option<Self>) -> Self {
        Self::Optional(value.map(Box::new))
    }

    /// Returns true if this value can be written as `kind`.
    #[must_use]
    pub fn matches(&self, kind: &FieldKind) -> bool {
        match (self, kind) {
            (Self::Bool(_), FieldKind::Bool)
            | (Self::U8(_), FieldKind::U8)
            | (Self::U32(_), FieldKind::U32)
            | (Self::U64(_), FieldKind::U64)
            | (Self::I32(_), FieldKind::I32)
            | (Self::I64(_), FieldKind::I64)
            | (Self::F64(_), FieldKind::F64)
            | (Self::String(_), FieldKind::String)
            | (Self::Bytes(_), FieldKind::Bytes)
            | (Self::Guid(_), FieldKind::Guid)
            | (Self::Object(_), FieldKind::Object)
            | (Self::Dictionary(_), FieldKind::Dictionary) => true,
            (Self::List(items), FieldKind::List(item)) => items.iter().all(|v| v.matches(item)),
            (Self::Optional(inner), FieldKind::Optional(item)) => {
                inner.as_ref().map_or(true, |v| v.matches(item))
            }
            _ => false,
        }
    }

    /// Converts a value read with a stored kind into the current kind.
    ///
    /// Integer widths convert when the value fits, a bare value becomes a
    /// present optional, and lists convert item by item. Returns `None`
    /// when no lossless conversion exists.
    #[must_use]
    pub fn convert(self, to: &FieldKind) -> Option<Self> {
        if self.matches(to) {
            return Some(self);
        }
        match to {
            FieldKind::Optional(item) => {
                if let Self::Optional(inner) = self {
                    return match inner {
                        None => Some(Self::Optional(None)),
                        Some(v) => v.convert(item).map(|v| Self::optional(Some(v))),
                    };
                }
                return self.convert(item).map(|v| Self::optional(Some(v)));
            }
            FieldKind::List(item) => {
                if let Self::List(items) = self {
                    return items
                        .into_iter()
                        .map(|v| v.convert(item))
                        .collect::<Option<Vec<_>>>()
                        .map(Self::List);
                }
                return None;
            }
            _ => {}
        }
        if let Some(n) = self.as_u64() {
            return match to {
                FieldKind::U8 => u8::try_from(n).ok().map(Self::U8),
                FieldKind::U32 => u32::try_from(n).ok().map(Self::U32),
                FieldKind::U64 => Some(Self::U64(n)),
                FieldKind::I32 => i32::try_from(n).ok().map(Self::I32),
                FieldKind::I64 => i64::try_from(n).ok().map(Self::I64),
                FieldKind::F64 => {
                    let f = n as f64;
                    (f as u128 == u128::from(n)).then_some(Self::F64(f))
                }
                _ => None,
            };
        }
        if let Some(n) = self.as_i64() {
            return match to {
                FieldKind::U8 => u8::try_from(n).ok().map(Self::U8),
                FieldKind::U32 => u32::try_from(n).ok().map(Self::U32),
                FieldKind::U64 => u64::try_from(n).ok().map(Self::U64),
                FieldKind::I32 => i32::try_from(n).ok().map(Self::I32),
                FieldKind::I64 => Some(Self::I64(n)),
                FieldKind::F64 => {
                    let f = n as f64;
                    (f as i128 == i128::from(n)).then_some(Self::F64(f))
                }
                _ => None,
            };
        }
        None
    }

    /// Unsigned integer value, widening narrower unsigned variants.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U8(v) => Some(u64::from(*v)),
            Self::U32(v) => Some(u64::from(*v)),
            Self::U64(v) => Some(*v),
            _ => None,
        }
    }

    /// Signed integer value, widening narrower signed variants.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::I32(v) => Some(i64::from(*v)),
            Self::I64(v) => Some(*v),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::U8(a), Self::U8(b)) => a == b,
            (Self::U32(a), Self::U32(b)) => a == b,
            (Self::U64(a), Self::U64(b)) => a == b,
            (Self::I32(a), Self::I32(b)) => a == b,
            (Self::I64(a), Self::I64(b)) => a == b,
            (Self::F64(a), Self::F64(b)) => a.to_bits() == b.to_bits(),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Guid(a), Self::Guid(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Optional(a), Self::Optional(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => AnyObject::ptr_eq(a, b),
                _ => false,
            },
            (Self::Dictionary(a), Self::Dictionary(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::U8(v) => write!(f, "{v}u8"),
            Self::U32(v) => write!(f, "{v}u32"),
            Self::U64(v) => write!(f, "{v}u64"),
            Self::I32(v) => write!(f, "{v}i32"),
            Self::I64(v) => write!(f, "{v}i64"),
            Self::F64(v) => write!(f, "{v}f64"),
            Self::String(v) => write!(f, "{v:?}"),
            Self::Bytes(v) => write!(f, "bytes({})", v.len()),
            Self::Guid(v) => write!(f, "{v}"),
            Self::List(v) => f.debug_list().entries(v).finish(),
            Self::Optional(v) => write!(f, "{v:?}"),
            Self::Object(v) => write!(f, "{v:?}"),
            Self::Dictionary(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Value {
            fn from(value: $ty) -> Self {
                Self::$variant(value)
            }
        })*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u32 => U32,
    u64 => U64,
    i32 => I32,
    i64 => I64,
    f64 => F64,
    String => String,
    Vec<u8> => Bytes,
    Uuid => Guid,
    DictId => Dictionary,
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Field values addressed by name, handed to `load` and `from_record`.
///
/// Records are built from the stored version's fields and completed with
/// initializers (or zero values) for fields the stored version lacked, so
/// every field of the current schema is present.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a field.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Returns the field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Removes and returns the field.
    pub fn take(&mut self, name: &str) -> Option<Value> {
        let index = self.fields.iter().position(|(n, _)| n == name)?;
        Some(self.fields.remove(index).1)
    }

    /// Returns true if the field is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns true if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field names in record order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    fn require(&mut self, name: &str) -> CoreResult<Value> {
        self.take(name)
            .ok_or_else(|| CoreError::invalid_format(format!("missing field {name}")))
    }

    fn wrong_kind(name: &str, expected: &str, value: &Value) -> CoreError {
        CoreError::invalid_format(format!(
            "field {name}: expected {expected}, found {value:?}"
        ))
    }

    /// Takes a boolean field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_bool(&mut self, name: &str) -> CoreResult<bool> {
        match self.require(name)? {
            Value::Bool(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "bool", &other)),
        }
    }

    /// Takes an unsigned integer field of any width.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or not unsigned.
    pub fn take_u64(&mut self, name: &str) -> CoreResult<u64> {
        let value = self.require(name)?;
        value
            .as_u64()
            .ok_or_else(|| Self::wrong_kind(name, "unsigned integer", &value))
    }

    /// Takes an unsigned integer field that must fit in 32 bits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing, not
    /// unsigned, or too large.
    pub fn take_u32(&mut self, name: &str) -> CoreResult<u32> {
        let value = self.take_u64(name)?;
        u32::try_from(value)
            .map_err(|_| CoreError::invalid_format(format!("field {name}: {value} exceeds u32")))
    }

    /// Takes a signed integer field of any width.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or not signed.
    pub fn take_i64(&mut self, name: &str) -> CoreResult<i64> {
        let value = self.require(name)?;
        value
            .as_i64()
            .ok_or_else(|| Self::wrong_kind(name, "signed integer", &value))
    }

    /// Takes a float field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_f64(&mut self, name: &str) -> CoreResult<f64> {
        match self.require(name)? {
            Value::F64(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "f64", &other)),
        }
    }

    /// Takes a string field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_string(&mut self, name: &str) -> CoreResult<String> {
        match self.require(name)? {
            Value::String(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "string", &other)),
        }
    }

    /// Takes a byte string field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_bytes(&mut self, name: &str) -> CoreResult<Vec<u8>> {
        match self.require(name)? {
            Value::Bytes(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "bytes", &other)),
        }
    }

    /// Takes a GUID field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_guid(&mut self, name: &str) -> CoreResult<Uuid> {
        match self.require(name)? {
            Value::Guid(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "guid", &other)),
        }
    }

    /// Takes a list field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_list(&mut self, name: &str) -> CoreResult<Vec<Value>> {
        match self.require(name)? {
            Value::List(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "list", &other)),
        }
    }

    /// Takes an optional field.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_optional(&mut self, name: &str) -> CoreResult<Option<Value>> {
        match self.require(name)? {
            Value::Optional(v) => Ok(v.map(|b| *b)),
            other => Err(Self::wrong_kind(name, "optional", &other)),
        }
    }

    /// Takes a nested dictionary handle.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or of another kind.
    pub fn take_dictionary(&mut self, name: &str) -> CoreResult<DictId> {
        match self.require(name)? {
            Value::Dictionary(v) => Ok(v),
            other => Err(Self::wrong_kind(name, "dictionary", &other)),
        }
    }

    /// Takes an object reference of type `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidFormat`] if the field is missing or not
    /// an object, and [`CoreError::TypeMismatch`] if it references another type.
    pub fn take_object<T: 'static>(&mut self, name: &str) -> CoreResult<Option<Obj<T>>> {
        match self.require(name)? {
            Value::Object(None) => Ok(None),
            Value::Object(Some(any)) => Obj::from_any(&any).map(Some).ok_or_else(|| {
                CoreError::type_mismatch(std::any::type_name::<T>(), format!("{any:?}"))
            }),
            other => Err(Self::wrong_kind(name, "object", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_widths_convert_when_lossless() {
        assert_eq!(Value::U8(7).convert(&FieldKind::U64), Some(Value::U64(7)));
        assert_eq!(Value::U64(300).convert(&FieldKind::U8), None);
        assert_eq!(Value::I32(-5).convert(&FieldKind::I64), Some(Value::I64(-5)));
        assert_eq!(Value::I64(-5).convert(&FieldKind::U32), None);
        assert_eq!(Value::U32(5).convert(&FieldKind::I32), Some(Value::I32(5)));
    }

    #[test]
    fn bare_value_becomes_present_optional() {
        let kind = FieldKind::Optional(Box::new(FieldKind::String));
        assert_eq!(
            Value::from("x").convert(&kind),
            Some(Value::optional(Some(Value::from("x"))))
        );
        assert_eq!(Value::Bool(true).convert(&FieldKind::String), None);
    }

    #[test]
    fn integers_become_floats_only_when_exact() {
        assert_eq!(Value::U32(3).convert(&FieldKind::F64), Some(Value::F64(3.0)));
        assert_eq!(Value::I64(-5).convert(&FieldKind::F64), Some(Value::F64(-5.0)));
        assert_eq!(
            Value::U64(1 << 53).convert(&FieldKind::F64),
            Some(Value::F64(9_007_199_254_740_992.0))
        );
        assert_eq!(Value::U64((1 << 53) + 1).convert(&FieldKind::F64), None);
        assert_eq!(Value::U64(u64::MAX).convert(&FieldKind::F64), None);
        assert_eq!(Value::I64(i64::MAX).convert(&FieldKind::F64), None);
        assert_eq!(
            Value::I64(i64::MIN).convert(&FieldKind::F64),
            Some(Value::F64(i64::MIN as f64))
        );
    }

    #[test]
    fn lists_convert_item_by_item() {
        let kind = FieldKind::List(Box::new(FieldKind::U64));
        let list = Value::List(vec![Value::U8(1), Value::U8(2)]);
        assert_eq!(
            list.convert(&kind),
            Some(Value::List(vec![Value::U64(1), Value::U64(2)]))
        );
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Obj::new(1u32);
        let b = Obj::new(1u32);
        assert_eq!(Value::object(Some(&a)), Value::object(Some(&a.clone())));
        assert_ne!(Value::object(Some(&a)), Value::object(Some(&b)));
        assert_eq!(Value::object::<u32>(None), Value::Object(None));
    }

    #[test]
    fn record_typed_accessors() {
        let mut record = Record::new();
        record.set("name", Value::from("Ada"));
        record.set("age", Value::U32(36));
        record.set("delta", Value::I32(-2));
        assert_eq!(record.len(), 3);

        assert_eq!(record.take_u64("age").unwrap(), 36);
        assert_eq!(record.take_i64("delta").unwrap(), -2);
        assert!(record.take_bool("name").is_err());
        assert!(matches!(
            record.take_string("missing"),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn record_set_replaces() {
        let mut record = Record::new();
        record.set("a", Value::U8(1));
        record.set("a", Value::U8(2));
        assert_eq!(record.len(), 1);
        assert_eq!(record.get("a"), Some(&Value::U8(2)));
    }
}
