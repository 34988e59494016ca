//! Qualifier translation: object paths to db paths, expressions to SQL.

use ormgraph_proto::{path_segments, CompareOp, Expression, Value, OUTER_JOIN_SUFFIX};

use super::action::Binding;
use super::adapter::SqlAdapter;
use super::joins::{quote_aliased, JoinScope, JoinStack};
use crate::config::LikeStyle;
use crate::error::{Error, Result};
use crate::map::descriptor::join_path;
use crate::map::{ClassDescriptor, MappingSnapshot};

/// An object path resolved against an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Path from the entity's root table.
    pub db_path: String,
    /// Value type of the attribute the path ends in.
    pub type_name: Option<String>,
}

/// Resolve `artistName`, `toArtist.artistName` or `paintingArray+` to a db
/// path from the entity's root table.
///
/// A path ending in a to-one relationship resolves to its foreign key, any
/// other relationship to the target's primary key.
pub fn resolve_obj_path(snapshot: &MappingSnapshot, descriptor: &ClassDescriptor, path: &str) -> Result<ResolvedPath> {
    let segments: Vec<_> = path_segments(path).collect();
    let unknown = |entity: &str| Error::UnknownAttribute {
        entity: entity.to_string(),
        path: path.to_string(),
    };

    let mut current = snapshot.class_descriptor(descriptor.entity_name())?;
    let mut prefix = String::new();
    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();

        if last {
            if let Some(attribute) = current.attribute(segment.name) {
                return Ok(ResolvedPath {
                    db_path: join_path(&prefix, &attribute.db_path),
                    type_name: Some(attribute.type_name.clone()),
                });
            }
        }

        let relationship = current
            .relationship(segment.name)
            .ok_or_else(|| unknown(current.entity_name()))?;
        let mut relationship_path = relationship.db_path();
        if segment.outer {
            relationship_path.push(OUTER_JOIN_SUFFIX);
        }

        if last {
            if !relationship.to_many && relationship.db_relationship.joins.len() == 1 && !segment.outer {
                let fk = relationship.source_column_paths().remove(0);
                return Ok(ResolvedPath {
                    db_path: join_path(&prefix, &fk),
                    type_name: None,
                });
            }
            let target = snapshot.class_descriptor(&relationship.target)?;
            let [pk] = target.primary_key() else {
                return Err(Error::Unsupported(format!(
                    "comparing relationship {path} of {} with a compound key",
                    descriptor.entity_name()
                )));
            };
            return Ok(ResolvedPath {
                db_path: join_path(&join_path(&prefix, &relationship_path), &pk.name),
                type_name: None,
            });
        }

        prefix = join_path(&prefix, &relationship_path);
        let target = relationship.target.clone();
        current = snapshot.class_descriptor(&target)?;
    }
    Err(unknown(descriptor.entity_name()))
}

/// Rewrite every object path of `expression` as a db path.
pub fn to_db_expression(
    snapshot: &MappingSnapshot,
    descriptor: &ClassDescriptor,
    expression: &Expression,
) -> Result<Expression> {
    let mut failure = None;
    let rewritten = expression.transform(&mut |node| match node {
        Expression::ObjPath(path) => match resolve_obj_path(snapshot, descriptor, path) {
            Ok(resolved) => Ok(Some(Expression::DbPath(resolved.db_path))),
            Err(e) => {
                failure = Some(e);
                Ok(Some(node.clone()))
            }
        },
        _ => Ok(None),
    })?;
    match failure {
        Some(e) => Err(e),
        None => Ok(rewritten),
    }
}

/// Prefix every db path of `expression`, re-rooting it on another table.
pub fn prefix_db_paths(expression: &Expression, prefix: &str) -> Result<Expression> {
    Ok(expression.transform(&mut |node| match node {
        Expression::DbPath(path) => Ok(Some(Expression::DbPath(join_path(prefix, path)))),
        _ => Ok(None),
    })?)
}

/// Renders expressions as SQL, collecting joins and bindings.
pub struct QualifierTranslator<'t, 'a> {
    adapter: &'t SqlAdapter,
    snapshot: &'a MappingSnapshot,
    descriptor: Option<&'t ClassDescriptor>,
    joins: &'t mut JoinStack<'a>,
    bindings: &'t mut Vec<Binding>,
}

impl<'t, 'a> QualifierTranslator<'t, 'a> {
    pub fn new(
        adapter: &'t SqlAdapter,
        snapshot: &'a MappingSnapshot,
        descriptor: Option<&'t ClassDescriptor>,
        joins: &'t mut JoinStack<'a>,
        bindings: &'t mut Vec<Binding>,
    ) -> Self {
        Self {
            adapter,
            snapshot,
            descriptor,
            joins,
            bindings,
        }
    }

    /// Translate a boolean expression.
    pub fn translate(&mut self, expression: &Expression) -> Result<String> {
        match expression {
            Expression::Boolean(true) => Ok("1 = 1".to_string()),
            Expression::Boolean(false) => Ok("1 = 0".to_string()),
            Expression::And(parts) => self.junction(parts, " AND ", "1 = 1"),
            Expression::Or(parts) => self.junction(parts, " OR ", "1 = 0"),
            Expression::Not(inner) => Ok(format!("NOT ({})", self.translate(inner)?)),
            Expression::Compare { op, left, right } => self.compare(*op, left, right),
            Expression::Between {
                operand,
                lower,
                upper,
                negated,
            } => {
                let hint = self.type_hint(operand)?;
                let operand = self.operand(operand, None)?;
                let lower = self.operand(lower, hint.as_deref())?;
                let upper = self.operand(upper, hint.as_deref())?;
                let not = if *negated { "NOT " } else { "" };
                Ok(format!("{operand} {not}BETWEEN {lower} AND {upper}"))
            }
            Expression::In { operand, list, negated } => self.in_list(expression, operand, list, *negated),
            Expression::Like {
                operand,
                pattern,
                ignore_case,
                negated,
            } => self.like(operand, pattern, *ignore_case, *negated),
            Expression::Parameter(name) => Err(Error::UnboundParameter { name: name.clone() }),
            other => Err(Error::invalid_expression(other, "not a condition")),
        }
    }

    fn junction(&mut self, parts: &[Expression], separator: &str, empty: &str) -> Result<String> {
        if parts.is_empty() {
            return Ok(empty.to_string());
        }
        let mut rendered = Vec::with_capacity(parts.len());
        for part in parts {
            let sql = self.translate(part)?;
            if matches!(part, Expression::And(_) | Expression::Or(_)) {
                rendered.push(format!("({sql})"));
            } else {
                rendered.push(sql);
            }
        }
        Ok(rendered.join(separator))
    }

    fn compare(&mut self, op: CompareOp, left: &Expression, right: &Expression) -> Result<String> {
        // put the null literal on the right
        let (left, right) = match (left, right) {
            (Expression::Literal(Value::Null), r) if !matches!(r, Expression::Literal(_)) => (right, left),
            _ => (left, right),
        };

        if matches!(right, Expression::Literal(Value::Null)) {
            let operand = self.operand(left, None)?;
            return match op {
                CompareOp::Eq => Ok(format!("{operand} IS NULL")),
                CompareOp::Ne => Ok(format!("{operand} IS NOT NULL")),
                _ => Err(Error::invalid_expression(
                    Expression::Compare {
                        op,
                        left: Box::new(left.clone()),
                        right: Box::new(right.clone()),
                    },
                    "only = and <> may compare with null",
                )),
            };
        }

        let hint = match self.type_hint(left)? {
            Some(hint) => Some(hint),
            None => self.type_hint(right)?,
        };
        let l = self.operand(left, hint.as_deref())?;
        let r = self.operand(right, hint.as_deref())?;
        Ok(format!("{l} {} {r}", op.as_sql()))
    }

    fn in_list(&mut self, whole: &Expression, operand: &Expression, list: &Expression, negated: bool) -> Result<String> {
        let values = match list {
            Expression::List(values) => values,
            Expression::Parameter(name) => return Err(Error::UnboundParameter { name: name.clone() }),
            _ => return Err(Error::invalid_expression(whole, "IN requires a list")),
        };
        if values.is_empty() {
            return Ok(if negated { "1 = 1" } else { "1 = 0" }.to_string());
        }

        let hint = self.type_hint(operand)?;
        let operand_sql = self.operand(operand, None)?;
        let mut placeholders = Vec::with_capacity(values.len());
        for value in values {
            placeholders.push(self.bind(value, hint.as_deref(), whole)?);
        }
        let not = if negated { "NOT " } else { "" };
        Ok(format!("{operand_sql} {not}IN ({})", placeholders.join(", ")))
    }

    fn like(&mut self, operand: &Expression, pattern: &Expression, ignore_case: bool, negated: bool) -> Result<String> {
        let operand_sql = self.operand(operand, None)?;
        let pattern_sql = self.operand(pattern, None)?;
        let not = if negated { "NOT " } else { "" };
        if !ignore_case {
            return Ok(format!("{operand_sql} {not}LIKE {pattern_sql}"));
        }
        Ok(match self.adapter.capabilities().like_ignore_case {
            LikeStyle::Upper => format!("UPPER({operand_sql}) {not}LIKE UPPER({pattern_sql})"),
            LikeStyle::ILike => format!("{operand_sql} {not}ILIKE {pattern_sql}"),
        })
    }

    /// Type of the attribute an operand path ends in.
    fn type_hint(&self, expression: &Expression) -> Result<Option<String>> {
        match (expression, self.descriptor) {
            (Expression::ObjPath(path), Some(descriptor)) => {
                Ok(resolve_obj_path(self.snapshot, descriptor, path)?.type_name)
            }
            _ => Ok(None),
        }
    }

    fn bind(&mut self, value: &Value, type_name: Option<&str>, context: &Expression) -> Result<String> {
        let bound = self
            .adapter
            .bind_value(type_name, value)
            .map_err(|f| Error::invalid_expression(context, format!("expected {}, got {}", f.expected, f.actual)))?;
        self.bindings.push(Binding::new(None, bound));
        Ok("?".to_string())
    }

    /// Translate a scalar operand.
    pub fn operand(&mut self, expression: &Expression, type_hint: Option<&str>) -> Result<String> {
        match expression {
            Expression::ObjPath(path) => {
                let descriptor = self
                    .descriptor
                    .ok_or_else(|| Error::invalid_expression(expression, "object path on a table query"))?;
                let resolved = resolve_obj_path(self.snapshot, descriptor, path)?;
                let column = self.joins.column(&resolved.db_path, JoinScope::Qualifier, false)?;
                Ok(quote_aliased(self.adapter, &column))
            }
            Expression::DbPath(path) => {
                let column = self.joins.column(path, JoinScope::Qualifier, false)?;
                Ok(quote_aliased(self.adapter, &column))
            }
            Expression::Literal(value) => self.bind(value, type_hint, expression),
            Expression::Parameter(name) => Err(Error::UnboundParameter { name: name.clone() }),
            Expression::Arithmetic { op, operands } => {
                let mut rendered = Vec::with_capacity(operands.len());
                for operand in operands {
                    if let Expression::Literal(value) = operand {
                        if !value.is_null() && !value.is_numeric() {
                            return Err(Error::invalid_expression(operand, "arithmetic on a non-numeric literal"));
                        }
                    }
                    rendered.push(self.operand(operand, type_hint)?);
                }
                Ok(format!("({})", rendered.join(&format!(" {} ", op.as_sql()))))
            }
            Expression::Negate(inner) => Ok(format!("-({})", self.operand(inner, type_hint)?)),
            Expression::Function { name, args } => {
                let sql_name = self.adapter.function_name(name)?.to_string();
                if args.is_empty() {
                    return Ok(sql_name);
                }
                let mut rendered = Vec::with_capacity(args.len());
                for arg in args {
                    rendered.push(self.operand(arg, None)?);
                }
                Ok(format!("{sql_name}({})", rendered.join(", ")))
            }
            other => Err(Error::invalid_expression(other, "not a scalar operand")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterCapabilities;
    use crate::fixtures::{gallery_resolver, people_resolver};
    use ormgraph_proto::ArithmeticOp;
    use pretty_assertions::assert_eq;

    fn translate(entity: &str, expression: Expression, adapter: &SqlAdapter) -> Result<(String, Vec<Value>, String)> {
        let resolver = if entity == "Car" { people_resolver() } else { gallery_resolver() };
        let snapshot = resolver.snapshot()?;
        let descriptor = snapshot.class_descriptor(entity)?;
        let mut joins = JoinStack::new(&snapshot, descriptor.db_entity_name());
        let mut bindings = Vec::new();
        let sql = QualifierTranslator::new(adapter, &snapshot, Some(&descriptor), &mut joins, &mut bindings)
            .translate(&expression)?;
        let from = joins.render_from(adapter);
        Ok((sql, bindings.into_iter().map(|b| b.value).collect(), from))
    }

    fn generic() -> SqlAdapter {
        SqlAdapter::new(AdapterCapabilities::generic())
    }

    #[test]
    fn test_resolve_paths() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let painting = snapshot.class_descriptor("Painting").unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();

        assert_eq!(resolve_obj_path(&snapshot, &painting, "toArtist").unwrap().db_path, "ARTIST_ID");
        assert_eq!(
            resolve_obj_path(&snapshot, &painting, "toArtist.artistName").unwrap(),
            ResolvedPath {
                db_path: "toArtist.ARTIST_NAME".into(),
                type_name: Some("String".into())
            }
        );
        assert_eq!(
            resolve_obj_path(&snapshot, &artist, "paintingArray+").unwrap().db_path,
            "paintingArray+.PAINTING_ID"
        );
        assert!(matches!(
            resolve_obj_path(&snapshot, &artist, "paintingArray.nope"),
            Err(Error::UnknownAttribute { .. })
        ));
    }

    #[test]
    fn test_equality_binds_literal() {
        let (sql, bindings, from) =
            translate("Artist", Expression::path("artistName").eq("abc"), &generic()).unwrap();
        assert_eq!(sql, "t0.ARTIST_NAME = ?");
        assert_eq!(bindings, vec![Value::from("abc")]);
        assert_eq!(from, "FROM ARTIST t0");
    }

    #[test]
    fn test_null_comparisons() {
        let (sql, bindings, _) = translate(
            "Artist",
            Expression::path("dateOfBirth").is_null().or(Expression::path("artistName").ne(Value::Null)),
            &generic(),
        )
        .unwrap();
        assert_eq!(sql, "t0.DATE_OF_BIRTH IS NULL OR t0.ARTIST_NAME IS NOT NULL");
        assert!(bindings.is_empty());
    }

    #[test]
    fn test_nested_junctions_and_relationship_paths() {
        let expression = Expression::path("artistName")
            .like("A%")
            .and(
                Expression::path("paintingArray.estimatedPrice")
                    .gt(100.0)
                    .or(Expression::path("paintingArray.paintingTitle").in_values(vec!["x".into(), "y".into()])),
            );
        let (sql, bindings, from) = translate("Artist", expression, &generic()).unwrap();
        assert_eq!(
            sql,
            "t0.ARTIST_NAME LIKE ? AND (t1.ESTIMATED_PRICE > ? OR t1.PAINTING_TITLE IN (?, ?))"
        );
        assert_eq!(bindings.len(), 4);
        assert_eq!(from, "FROM ARTIST t0 JOIN PAINTING t1 ON t0.ARTIST_ID = t1.ARTIST_ID");
    }

    #[test]
    fn test_empty_in_list() {
        let (sql, _, _) = translate("Artist", Expression::path("artistName").in_values(vec![]), &generic()).unwrap();
        assert_eq!(sql, "1 = 0");
        let (sql, _, _) =
            translate("Artist", Expression::path("artistName").not_in_values(vec![]), &generic()).unwrap();
        assert_eq!(sql, "1 = 1");
    }

    #[test]
    fn test_like_ignore_case_styles() {
        let expression = Expression::path("artistName").like_ignore_case("m%");
        let (sql, _, _) = translate("Artist", expression.clone(), &generic()).unwrap();
        assert_eq!(sql, "UPPER(t0.ARTIST_NAME) LIKE UPPER(?)");

        let postgres = SqlAdapter::new(AdapterCapabilities::postgres());
        let (sql, _, _) = translate("Artist", expression, &postgres).unwrap();
        assert_eq!(sql, "t0.\"ARTIST_NAME\" ILIKE ?");
    }

    #[test]
    fn test_functions_go_through_the_adapter_table() {
        let expression = Expression::function("upper", vec![Expression::path("artistName")]).compare_with(
            CompareOp::Eq,
            Expression::literal("MONET"),
        );
        let (sql, _, _) = translate("Artist", expression, &generic()).unwrap();
        assert_eq!(sql, "UPPER(t0.ARTIST_NAME) = ?");

        let unknown = Expression::function("soundex", vec![Expression::path("artistName")])
            .compare_with(CompareOp::Eq, Expression::literal("M"));
        let err = translate("Artist", unknown, &generic()).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_unbound_parameter_fails() {
        let expression = Expression::path("artistName").compare_with(CompareOp::Eq, Expression::param("name"));
        let err = translate("Artist", expression, &generic()).unwrap_err();
        assert!(matches!(err, Error::UnboundParameter { name } if name == "name"));
    }

    #[test]
    fn test_incompatible_literal_fails_fast() {
        let err = translate("Car", Expression::path("doors").eq("four"), &generic()).unwrap_err();
        assert!(matches!(err, Error::InvalidExpression { .. }));
    }

    #[test]
    fn test_arithmetic_on_text_fails_fast() {
        let price = Expression::path("estimatedPrice");
        let (sql, params, _) = translate(
            "Painting",
            price.clone().arithmetic(ArithmeticOp::Multiply, Expression::literal(2)).gt(100),
            &generic(),
        )
        .unwrap();
        assert_eq!(sql, "(t0.ESTIMATED_PRICE * ?) > ?");
        assert_eq!(params.len(), 2);

        let err = translate(
            "Painting",
            price.arithmetic(ArithmeticOp::Add, Expression::literal("ten")).gt(100),
            &generic(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidExpression { .. }));
    }

    #[test]
    fn test_vertical_attribute_joins_subclass_table() {
        let (sql, _, from) = translate("Car", Expression::path("doors").ge(4), &generic()).unwrap();
        assert_eq!(sql, "t1.DOORS >= ?");
        assert_eq!(from, "FROM VEHICLE t0 JOIN CAR t1 ON t0.VEHICLE_ID = t1.VEHICLE_ID");
    }

    #[test]
    fn test_re_rooting() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();
        let db = to_db_expression(&snapshot, &artist, &Expression::path("artistName").eq("a")).unwrap();
        let rerooted = prefix_db_paths(&db, "toArtist").unwrap();
        assert_eq!(rerooted.to_string(), "db:toArtist.ARTIST_NAME = 'a'");
    }
}
