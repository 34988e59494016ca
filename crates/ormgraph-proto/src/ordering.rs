//! Result orderings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::expr::Expression;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SortOrder {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// One ORDER BY term over an object or db path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ordering {
    /// Path to sort by; a `db:` prefix names a column path.
    pub path: String,
    /// Sort direction.
    pub direction: SortOrder,
    /// Compare case-insensitively.
    pub ignore_case: bool,
}

impl Ordering {
    /// Create an ascending ordering.
    pub fn asc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortOrder::Asc,
            ignore_case: false,
        }
    }

    /// Create a descending ordering.
    pub fn desc(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            direction: SortOrder::Desc,
            ignore_case: false,
        }
    }

    /// Compare case-insensitively.
    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    /// The sort path as an expression node.
    pub fn path_expression(&self) -> Expression {
        Expression::path(&self.path)
    }
}

impl fmt::Display for Ordering {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.direction {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        };
        if self.ignore_case {
            write!(f, "{} {dir} ignore case", self.path)
        } else {
            write!(f, "{} {dir}", self.path)
        }
    }
}
