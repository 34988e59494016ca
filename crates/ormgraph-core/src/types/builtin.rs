//! Built-in scalar types and the enum type factory.

use std::collections::HashMap;
use std::sync::Arc;

use ormgraph_proto::Value;

use super::registry::{ConversionFailure, ExtendedType, ExtendedTypeFactory};

/// Representation of a built-in scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    Timestamp,
    Uuid,
}

/// A built-in scalar type.
#[derive(Debug, Clone)]
pub struct ScalarType {
    name: &'static str,
    kind: ScalarKind,
}

impl ScalarType {
    /// Create a scalar type registered as `name`.
    pub const fn new(name: &'static str, kind: ScalarKind) -> Self {
        Self { name, kind }
    }

    /// Representation kind.
    pub fn kind(&self) -> ScalarKind {
        self.kind
    }
}

fn parse_uuid(text: &str) -> Option<[u8; 16]> {
    let digits: String = text.chars().filter(|c| *c != '-').collect();
    let bytes = hex::decode(digits).ok()?;
    bytes.try_into().ok()
}

impl ExtendedType for ScalarType {
    fn type_name(&self) -> &str {
        self.name
    }

    fn materialize(&self, raw: Value) -> Result<Value, ConversionFailure> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        let converted = match (self.kind, &raw) {
            (ScalarKind::Bool, v) => v.as_bool().map(Value::Bool),
            (ScalarKind::Int32, v) => v.as_i32().map(Value::Int32),
            (ScalarKind::Int64, v) => v.as_i64().map(Value::Int64),
            (ScalarKind::Float32, v) => v.as_f64().map(|f| Value::Float32(f as f32)),
            (ScalarKind::Float64, v) => v.as_f64().map(Value::Float64),
            (ScalarKind::String, Value::String(_)) => Some(raw.clone()),
            (ScalarKind::Bytes, Value::Bytes(_)) => Some(raw.clone()),
            (ScalarKind::Timestamp, Value::Timestamp(t) | Value::Int64(t)) => Some(Value::Timestamp(*t)),
            (ScalarKind::Uuid, Value::Uuid(_)) => Some(raw.clone()),
            (ScalarKind::Uuid, Value::Bytes(b)) => {
                <[u8; 16]>::try_from(b.as_slice()).ok().map(Value::Uuid)
            }
            (ScalarKind::Uuid, Value::String(s)) => parse_uuid(s).map(Value::Uuid),
            _ => None,
        };
        converted.ok_or_else(|| ConversionFailure::new(self.name, &raw))
    }

    fn to_bind_value(&self, value: &Value) -> Result<Value, ConversionFailure> {
        // Same conversions apply in both directions for scalars.
        self.materialize(value.clone())
    }
}

/// The scalar types registered by [`super::ExtendedTypeMap::new`].
pub fn builtin_types() -> Vec<Arc<dyn ExtendedType>> {
    const TYPES: [ScalarType; 10] = [
        ScalarType::new("bool", ScalarKind::Bool),
        ScalarType::new("i32", ScalarKind::Int32),
        ScalarType::new("i64", ScalarKind::Int64),
        ScalarType::new("f32", ScalarKind::Float32),
        ScalarType::new("f64", ScalarKind::Float64),
        ScalarType::new("String", ScalarKind::String),
        ScalarType::new("Vec<u8>", ScalarKind::Bytes),
        ScalarType::new("Timestamp", ScalarKind::Timestamp),
        ScalarType::new("Uuid", ScalarKind::Uuid),
        ScalarType::new("char", ScalarKind::String),
    ];
    TYPES
        .into_iter()
        .map(|t| Arc::new(t) as Arc<dyn ExtendedType>)
        .collect()
}

/// How an enum is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumStorage {
    /// Variant name in a character column.
    Name,
    /// Zero-based variant position in an integer column.
    Ordinal,
}

/// Enum type. Attribute values are variant names.
#[derive(Debug, Clone)]
pub struct EnumType {
    name: String,
    storage: EnumStorage,
    variants: Vec<String>,
}

impl EnumType {
    fn variant_value(&self, raw: &Value) -> Option<Value> {
        match (self.storage, raw) {
            (EnumStorage::Name, Value::String(s)) if self.variants.contains(s) => Some(raw.clone()),
            (EnumStorage::Ordinal, v) => {
                let idx = usize::try_from(v.as_i64()?).ok()?;
                self.variants.get(idx).map(|s| Value::String(s.clone()))
            }
            _ => None,
        }
    }
}

impl ExtendedType for EnumType {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn materialize(&self, raw: Value) -> Result<Value, ConversionFailure> {
        if raw.is_null() {
            return Ok(Value::Null);
        }
        self.variant_value(&raw)
            .ok_or_else(|| ConversionFailure::new(&self.name, &raw))
    }

    fn to_bind_value(&self, value: &Value) -> Result<Value, ConversionFailure> {
        let Value::String(variant) = value else {
            return if value.is_null() {
                Ok(Value::Null)
            } else {
                Err(ConversionFailure::new(&self.name, value))
            };
        };
        let position = self
            .variants
            .iter()
            .position(|v| v == variant)
            .ok_or_else(|| ConversionFailure::new(&self.name, value))?;
        Ok(match self.storage {
            EnumStorage::Name => value.clone(),
            EnumStorage::Ordinal => Value::Int32(position as i32),
        })
    }
}

/// Factory creating [`EnumType`]s for declared enum names.
#[derive(Debug, Default, Clone)]
pub struct EnumTypeFactory {
    enums: HashMap<String, (EnumStorage, Vec<String>)>,
}

impl EnumTypeFactory {
    /// Create a factory without enums.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an enum and its variants in ordinal order.
    pub fn with_enum<I, S>(mut self, name: impl Into<String>, storage: EnumStorage, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enums.insert(
            name.into(),
            (storage, variants.into_iter().map(Into::into).collect()),
        );
        self
    }
}

impl ExtendedTypeFactory for EnumTypeFactory {
    fn get_type(&self, type_name: &str) -> Option<Arc<dyn ExtendedType>> {
        let (storage, variants) = self.enums.get(type_name)?;
        Some(Arc::new(EnumType {
            name: type_name.to_string(),
            storage: *storage,
            variants: variants.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtendedTypeMap;

    #[test]
    fn test_scalar_widening_and_narrowing() {
        let map = ExtendedTypeMap::new();
        let i32_type = map.get_registered_type("i32");
        assert_eq!(i32_type.materialize(Value::Int64(7)).unwrap(), Value::Int32(7));
        assert!(i32_type.materialize(Value::Int64(i64::MAX)).is_err());

        let bool_type = map.get_registered_type("bool");
        assert_eq!(bool_type.materialize(Value::Int64(1)).unwrap(), Value::Bool(true));
        assert_eq!(bool_type.materialize(Value::Null).unwrap(), Value::Null);

        let err = map
            .get_registered_type("String")
            .materialize(Value::Int32(1))
            .unwrap_err();
        assert_eq!(err.expected, "String");
        assert_eq!(err.actual, "int32");
    }

    #[test]
    fn test_uuid_from_text() {
        let uuid_type = ScalarType::new("Uuid", ScalarKind::Uuid);
        let v = uuid_type
            .materialize(Value::from("00112233-4455-6677-8899-aabbccddeeff"))
            .unwrap();
        assert_eq!(v.as_uuid().map(|u| u[15]), Some(0xff));
    }

    #[test]
    fn test_enum_factory() {
        let map = ExtendedTypeMap::new();
        map.register_factory(Arc::new(
            EnumTypeFactory::new()
                .with_enum("PaintingStatus", EnumStorage::Ordinal, ["DRAFT", "HUNG", "SOLD"])
                .with_enum("Color", EnumStorage::Name, ["RED", "BLUE"]),
        ));

        let status = map.get_registered_type("PaintingStatus");
        assert_eq!(status.materialize(Value::Int64(2)).unwrap(), Value::from("SOLD"));
        assert_eq!(status.to_bind_value(&Value::from("HUNG")).unwrap(), Value::Int32(1));
        assert!(status.materialize(Value::Int64(9)).is_err());

        let color = map.get_registered_type("Color");
        assert_eq!(color.to_bind_value(&Value::from("RED")).unwrap(), Value::from("RED"));
        assert!(color.materialize(Value::from("GREEN")).is_err());
    }
}
