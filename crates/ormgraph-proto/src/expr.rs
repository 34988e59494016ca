//! Expression model for qualifiers over entity properties.
//!
//! Expressions are immutable trees. Object paths (`artistName`,
//! `paintings.title`) are resolved against object entities; db paths
//! (`db:ARTIST_NAME`, `db:toArtist.ARTIST_ID`) name columns directly.
//! A path segment ending in `+` requests an outer join for that hop.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::value::Value;

/// Prefix marking a db path in its textual form.
pub const DB_PATH_PREFIX: &str = "db:";

/// Suffix marking an outer-join path segment.
pub const OUTER_JOIN_SUFFIX: char = '+';

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CompareOp {
    /// SQL operator text.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Ne => "<>",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }
}

/// Arithmetic operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ArithmeticOp {
    /// SQL operator text.
    pub fn as_sql(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "+",
            ArithmeticOp::Subtract => "-",
            ArithmeticOp::Multiply => "*",
            ArithmeticOp::Divide => "/",
        }
    }
}

/// A node of a qualifier expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    /// Object property path.
    ObjPath(String),
    /// Database column path.
    DbPath(String),
    /// Scalar literal.
    Literal(Value),
    /// List literal, the right side of `IN`.
    List(Vec<Value>),
    /// Named parameter, substituted by [`Expression::with_parameters`].
    Parameter(String),
    /// Boolean constant.
    Boolean(bool),
    /// Binary comparison.
    Compare {
        op: CompareOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// `operand [NOT] BETWEEN lower AND upper`.
    Between {
        operand: Box<Expression>,
        lower: Box<Expression>,
        upper: Box<Expression>,
        negated: bool,
    },
    /// `operand [NOT] IN list`.
    In {
        operand: Box<Expression>,
        list: Box<Expression>,
        negated: bool,
    },
    /// `operand [NOT] LIKE pattern`.
    Like {
        operand: Box<Expression>,
        pattern: Box<Expression>,
        ignore_case: bool,
        negated: bool,
    },
    /// Conjunction.
    And(Vec<Expression>),
    /// Disjunction.
    Or(Vec<Expression>),
    /// Negation.
    Not(Box<Expression>),
    /// Arithmetic over two or more operands.
    Arithmetic {
        op: ArithmeticOp,
        operands: Vec<Expression>,
    },
    /// Unary minus.
    Negate(Box<Expression>),
    /// Function call, name mapped through the adapter's function table.
    Function { name: String, args: Vec<Expression> },
}

/// One segment of a dotted path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment<'a> {
    /// Segment name without the outer-join marker.
    pub name: &'a str,
    /// Whether the segment requests an outer join.
    pub outer: bool,
}

/// Split a dotted path into segments, stripping outer-join markers.
pub fn path_segments(path: &str) -> impl Iterator<Item = PathSegment<'_>> {
    path.split('.').map(|segment| match segment.strip_suffix(OUTER_JOIN_SUFFIX) {
        Some(name) => PathSegment { name, outer: true },
        None => PathSegment {
            name: segment,
            outer: false,
        },
    })
}

impl Expression {
    /// Create a path expression. A `db:` prefix yields a db path.
    pub fn path(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        match path.strip_prefix(DB_PATH_PREFIX) {
            Some(db) => Expression::DbPath(db.to_string()),
            None => Expression::ObjPath(path.to_string()),
        }
    }

    /// Create an object path expression.
    pub fn obj_path(path: impl Into<String>) -> Self {
        Expression::ObjPath(path.into())
    }

    /// Create a db path expression.
    pub fn db_path(path: impl Into<String>) -> Self {
        Expression::DbPath(path.into())
    }

    /// Create a literal expression.
    pub fn literal(value: impl Into<Value>) -> Self {
        Expression::Literal(value.into())
    }

    /// Create a named parameter.
    pub fn param(name: impl Into<String>) -> Self {
        Expression::Parameter(name.into())
    }

    /// Create a function call.
    pub fn function(name: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Function {
            name: name.into(),
            args,
        }
    }

    fn compare(self, op: CompareOp, right: Expression) -> Self {
        Expression::Compare {
            op,
            left: Box::new(self),
            right: Box::new(right),
        }
    }

    /// `self = value`; a null value translates to `IS NULL`.
    pub fn eq(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Eq, Expression::Literal(value.into()))
    }

    /// `self <> value`; a null value translates to `IS NOT NULL`.
    pub fn ne(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Ne, Expression::Literal(value.into()))
    }

    /// `self < value`.
    pub fn lt(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Lt, Expression::Literal(value.into()))
    }

    /// `self <= value`.
    pub fn le(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Le, Expression::Literal(value.into()))
    }

    /// `self > value`.
    pub fn gt(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Gt, Expression::Literal(value.into()))
    }

    /// `self >= value`.
    pub fn ge(self, value: impl Into<Value>) -> Self {
        self.compare(CompareOp::Ge, Expression::Literal(value.into()))
    }

    /// Compare against an arbitrary expression.
    pub fn compare_with(self, op: CompareOp, right: Expression) -> Self {
        self.compare(op, right)
    }

    /// `self IS NULL`.
    pub fn is_null(self) -> Self {
        self.eq(Value::Null)
    }

    /// `self IS NOT NULL`.
    pub fn is_not_null(self) -> Self {
        self.ne(Value::Null)
    }

    /// `self IN (values)`.
    pub fn in_values(self, values: Vec<Value>) -> Self {
        Expression::In {
            operand: Box::new(self),
            list: Box::new(Expression::List(values)),
            negated: false,
        }
    }

    /// `self NOT IN (values)`.
    pub fn not_in_values(self, values: Vec<Value>) -> Self {
        Expression::In {
            operand: Box::new(self),
            list: Box::new(Expression::List(values)),
            negated: true,
        }
    }

    /// `self BETWEEN lower AND upper`.
    pub fn between(self, lower: impl Into<Value>, upper: impl Into<Value>) -> Self {
        Expression::Between {
            operand: Box::new(self),
            lower: Box::new(Expression::Literal(lower.into())),
            upper: Box::new(Expression::Literal(upper.into())),
            negated: false,
        }
    }

    /// `self LIKE pattern`.
    pub fn like(self, pattern: impl Into<String>) -> Self {
        Expression::Like {
            operand: Box::new(self),
            pattern: Box::new(Expression::Literal(Value::String(pattern.into()))),
            ignore_case: false,
            negated: false,
        }
    }

    /// Case-insensitive `LIKE`.
    pub fn like_ignore_case(self, pattern: impl Into<String>) -> Self {
        Expression::Like {
            operand: Box::new(self),
            pattern: Box::new(Expression::Literal(Value::String(pattern.into()))),
            ignore_case: true,
            negated: false,
        }
    }

    /// `self NOT LIKE pattern`.
    pub fn not_like(self, pattern: impl Into<String>) -> Self {
        Expression::Like {
            operand: Box::new(self),
            pattern: Box::new(Expression::Literal(Value::String(pattern.into()))),
            ignore_case: false,
            negated: true,
        }
    }

    /// Arithmetic combination of `self` and `other`.
    pub fn arithmetic(self, op: ArithmeticOp, other: Expression) -> Self {
        Expression::Arithmetic {
            op,
            operands: vec![self, other],
        }
    }

    /// Conjunction with another expression, flattening nested `And` nodes.
    pub fn and(self, other: Expression) -> Self {
        let mut parts = match self {
            Expression::And(parts) => parts,
            other => vec![other],
        };
        match other {
            Expression::And(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expression::And(parts)
    }

    /// Disjunction with another expression, flattening nested `Or` nodes.
    pub fn or(self, other: Expression) -> Self {
        let mut parts = match self {
            Expression::Or(parts) => parts,
            other => vec![other],
        };
        match other {
            Expression::Or(more) => parts.extend(more),
            other => parts.push(other),
        }
        Expression::Or(parts)
    }

    /// Logical negation.
    pub fn not(self) -> Self {
        Expression::Not(Box::new(self))
    }

    /// Combine optional qualifiers with `AND`.
    pub fn join_and(left: Option<Expression>, right: Option<Expression>) -> Option<Expression> {
        match (left, right) {
            (Some(l), Some(r)) => Some(l.and(r)),
            (l, None) => l,
            (None, r) => r,
        }
    }

    /// Whether this node is a path.
    pub fn is_path(&self) -> bool {
        matches!(self, Expression::ObjPath(_) | Expression::DbPath(_))
    }

    /// Direct children of this node.
    pub fn children(&self) -> Vec<&Expression> {
        match self {
            Expression::ObjPath(_)
            | Expression::DbPath(_)
            | Expression::Literal(_)
            | Expression::List(_)
            | Expression::Parameter(_)
            | Expression::Boolean(_) => Vec::new(),
            Expression::Compare { left, right, .. } => vec![left, right],
            Expression::Between {
                operand,
                lower,
                upper,
                ..
            } => vec![operand, lower, upper],
            Expression::In { operand, list, .. } => vec![operand, list],
            Expression::Like {
                operand, pattern, ..
            } => vec![operand, pattern],
            Expression::And(parts) | Expression::Or(parts) => parts.iter().collect(),
            Expression::Not(inner) | Expression::Negate(inner) => vec![inner],
            Expression::Arithmetic { operands, .. } => operands.iter().collect(),
            Expression::Function { args, .. } => args.iter().collect(),
        }
    }

    /// Depth-first pre-order visit of every node.
    pub fn visit<'a>(&'a self, visitor: &mut impl FnMut(&'a Expression)) {
        visitor(self);
        for child in self.children() {
            child.visit(visitor);
        }
    }

    /// Collect every path node in visit order.
    pub fn paths(&self) -> Vec<&Expression> {
        let mut paths = Vec::new();
        self.visit(&mut |node| {
            if node.is_path() {
                paths.push(node);
            }
        });
        paths
    }

    /// Rebuild the tree bottom-up, replacing leaves for which `f` returns
    /// `Some`. Used to re-root qualifiers onto related entities.
    pub fn transform<F>(&self, f: &mut F) -> Result<Expression, Error>
    where
        F: FnMut(&Expression) -> Result<Option<Expression>, Error>,
    {
        if let Some(replacement) = f(self)? {
            return Ok(replacement);
        }

        let boxed = |e: &Expression, f: &mut F| -> Result<Box<Expression>, Error> {
            Ok(Box::new(e.transform(f)?))
        };

        Ok(match self {
            Expression::Compare { op, left, right } => Expression::Compare {
                op: *op,
                left: boxed(left, f)?,
                right: boxed(right, f)?,
            },
            Expression::Between {
                operand,
                lower,
                upper,
                negated,
            } => Expression::Between {
                operand: boxed(operand, f)?,
                lower: boxed(lower, f)?,
                upper: boxed(upper, f)?,
                negated: *negated,
            },
            Expression::In {
                operand,
                list,
                negated,
            } => Expression::In {
                operand: boxed(operand, f)?,
                list: boxed(list, f)?,
                negated: *negated,
            },
            Expression::Like {
                operand,
                pattern,
                ignore_case,
                negated,
            } => Expression::Like {
                operand: boxed(operand, f)?,
                pattern: boxed(pattern, f)?,
                ignore_case: *ignore_case,
                negated: *negated,
            },
            Expression::And(parts) => Expression::And(
                parts
                    .iter()
                    .map(|p| p.transform(f))
                    .collect::<Result<_, _>>()?,
            ),
            Expression::Or(parts) => Expression::Or(
                parts
                    .iter()
                    .map(|p| p.transform(f))
                    .collect::<Result<_, _>>()?,
            ),
            Expression::Not(inner) => Expression::Not(boxed(inner, f)?),
            Expression::Negate(inner) => Expression::Negate(boxed(inner, f)?),
            Expression::Arithmetic { op, operands } => Expression::Arithmetic {
                op: *op,
                operands: operands
                    .iter()
                    .map(|p| p.transform(f))
                    .collect::<Result<_, _>>()?,
            },
            Expression::Function { name, args } => Expression::Function {
                name: name.clone(),
                args: args
                    .iter()
                    .map(|p| p.transform(f))
                    .collect::<Result<_, _>>()?,
            },
            leaf => leaf.clone(),
        })
    }

    /// Substitute named parameters.
    ///
    /// With `prune_missing`, any condition referencing a missing parameter is
    /// removed (and empty `And`/`Or` nodes with it); `None` means the whole
    /// qualifier was pruned. Without it, a missing parameter is an error.
    pub fn with_parameters(
        &self,
        params: &HashMap<String, Value>,
        prune_missing: bool,
    ) -> Result<Option<Expression>, Error> {
        match self {
            Expression::Parameter(name) => match params.get(name) {
                Some(value) => Ok(Some(Expression::Literal(value.clone()))),
                None if prune_missing => Ok(None),
                None => Err(Error::MissingParameter(name.clone())),
            },
            Expression::And(parts) | Expression::Or(parts) => {
                let mut kept = Vec::with_capacity(parts.len());
                for part in parts {
                    if let Some(p) = part.with_parameters(params, prune_missing)? {
                        kept.push(p);
                    }
                }
                Ok(match kept.len() {
                    0 => None,
                    1 => kept.pop(),
                    _ if matches!(self, Expression::And(_)) => Some(Expression::And(kept)),
                    _ => Some(Expression::Or(kept)),
                })
            }
            Expression::Not(inner) => Ok(inner
                .with_parameters(params, prune_missing)?
                .map(|e| Expression::Not(Box::new(e)))),
            other => {
                // Any other node is pruned as a unit when one of its leaves is.
                let mut missing = false;
                let replaced = other.transform(&mut |node| match node {
                    Expression::Parameter(name) => match params.get(name) {
                        Some(v) => Ok(Some(Expression::Literal(v.clone()))),
                        None if prune_missing => {
                            missing = true;
                            Ok(Some(node.clone()))
                        }
                        None => Err(Error::MissingParameter(name.clone())),
                    },
                    _ => Ok(None),
                })?;
                Ok(if missing { None } else { Some(replaced) })
            }
        }
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join(f: &mut fmt::Formatter<'_>, parts: &[Expression], sep: &str) -> fmt::Result {
            for (i, part) in parts.iter().enumerate() {
                if i > 0 {
                    f.write_str(sep)?;
                }
                if part.children().len() > 1 {
                    write!(f, "({part})")?;
                } else {
                    write!(f, "{part}")?;
                }
            }
            Ok(())
        }

        match self {
            Expression::ObjPath(p) => f.write_str(p),
            Expression::DbPath(p) => write!(f, "{DB_PATH_PREFIX}{p}"),
            Expression::Literal(v) => write!(f, "{v}"),
            Expression::List(values) => {
                f.write_str("(")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Expression::Parameter(name) => write!(f, "${name}"),
            Expression::Boolean(b) => write!(f, "{b}"),
            Expression::Compare { op, left, right } => {
                write!(f, "{left} {} {right}", op.as_sql())
            }
            Expression::Between {
                operand,
                lower,
                upper,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "{operand} {not}between {lower} and {upper}")
            }
            Expression::In {
                operand,
                list,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                write!(f, "{operand} {not}in {list}")
            }
            Expression::Like {
                operand,
                pattern,
                ignore_case,
                negated,
            } => {
                let not = if *negated { "not " } else { "" };
                let op = if *ignore_case { "likeIgnoreCase" } else { "like" };
                write!(f, "{operand} {not}{op} {pattern}")
            }
            Expression::And(parts) => join(f, parts, " and "),
            Expression::Or(parts) => join(f, parts, " or "),
            Expression::Not(inner) => write!(f, "not ({inner})"),
            Expression::Arithmetic { op, operands } => {
                join(f, operands, &format!(" {} ", op.as_sql()))
            }
            Expression::Negate(inner) => write!(f, "-{inner}"),
            Expression::Function { name, args } => {
                write!(f, "{name}(")?;
                join(f, args, ", ")?;
                f.write_str(")")
            }
        }
    }
}
