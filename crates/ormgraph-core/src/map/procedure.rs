//! Stored procedure mappings.

use serde::{Deserialize, Serialize};

/// Parameter direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterDirection {
    In,
    Out,
    InOut,
}

impl ParameterDirection {
    /// Whether a value is bound for the call.
    pub fn is_in(&self) -> bool {
        matches!(self, ParameterDirection::In | ParameterDirection::InOut)
    }

    /// Whether a value is read back after the call.
    pub fn is_out(&self) -> bool {
        matches!(self, ParameterDirection::Out | ParameterDirection::InOut)
    }
}

/// A procedure parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcedureParameter {
    /// Parameter name.
    pub name: String,
    /// Direction.
    pub direction: ParameterDirection,
    /// Value type name.
    pub type_name: String,
}

/// A mapped stored procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Procedure {
    /// Procedure name.
    pub name: String,
    /// Parameters in call order.
    #[serde(default)]
    pub parameters: Vec<ProcedureParameter>,
}

impl Procedure {
    /// Create a procedure without parameters.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
        }
    }

    /// Append a parameter.
    pub fn with_parameter(
        mut self,
        name: impl Into<String>,
        direction: ParameterDirection,
        type_name: impl Into<String>,
    ) -> Self {
        self.parameters.push(ProcedureParameter {
            name: name.into(),
            direction,
            type_name: type_name.into(),
        });
        self
    }
}
