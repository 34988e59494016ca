//! Value type registry used to convert row values and bindings.

mod builtin;
mod registry;

pub use builtin::{builtin_types, EnumStorage, EnumType, EnumTypeFactory, ScalarKind, ScalarType};
pub use registry::{ConversionFailure, DefaultType, ExtendedType, ExtendedTypeFactory, ExtendedTypeMap};
