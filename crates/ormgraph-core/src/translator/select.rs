//! Select translation.

use std::collections::HashMap;

use ormgraph_proto::{Expression, SortOrder};

use super::action::{
    Binding, ColumnDescriptor, EntitySegment, InMemoryPaging, JointNode, ResultDescriptor, SelectAction,
};
use super::adapter::SqlAdapter;
use super::joins::{quote_aliased, JoinScope, JoinStack};
use super::qualifier::QualifierTranslator;
use crate::config::PagingStyle;
use crate::error::{Error, Result};
use crate::map::descriptor::join_path;
use crate::map::{ClassDescriptor, MappingSnapshot};
use crate::query::{QueryMetadata, SelectQuery};

/// A column of an entity, addressed from the entity's root table.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EntityColumn {
    pub db_path: String,
    pub type_name: Option<String>,
}

/// Columns needed to materialize one entity: primary key, attributes,
/// to-one foreign keys and discriminator columns.
pub(crate) fn entity_columns(snapshot: &MappingSnapshot, descriptor: &ClassDescriptor) -> Vec<EntityColumn> {
    let mut columns: Vec<EntityColumn> = Vec::new();
    let mut add = |db_path: String, type_name: Option<String>| {
        if !columns.iter().any(|c| c.db_path == db_path) {
            columns.push(EntityColumn { db_path, type_name });
        }
    };

    for pk in descriptor.primary_key() {
        add(pk.name.clone(), None);
    }
    for attribute in descriptor.attributes() {
        add(attribute.db_path.clone(), Some(attribute.type_name.clone()));
    }
    for relationship in descriptor.relationships().iter().filter(|r| !r.to_many) {
        for path in relationship.source_column_paths() {
            add(path, None);
        }
    }
    if let Some(tree) = snapshot.inheritance_tree(descriptor.root_entity()) {
        for column in tree.discriminator_columns() {
            add(column, None);
        }
    }
    columns
}

/// Columns of an entity and every entity below it.
pub(crate) fn hierarchy_columns(
    snapshot: &MappingSnapshot,
    descriptor: &ClassDescriptor,
) -> Result<Vec<(String, Vec<EntityColumn>)>> {
    let mut out = vec![(descriptor.entity_name().to_string(), entity_columns(snapshot, descriptor))];
    for sub in descriptor.sub_entities() {
        let sub_descriptor = snapshot.class_descriptor(sub)?;
        out.push((sub.clone(), entity_columns(snapshot, &sub_descriptor)));
    }
    Ok(out)
}

#[derive(Default)]
struct SelectColumns {
    columns: Vec<ColumnDescriptor>,
    rendered: Vec<String>,
    by_label: HashMap<String, usize>,
}

impl SelectColumns {
    fn add(&mut self, column: ColumnDescriptor, rendered: String) -> usize {
        if let Some(&i) = self.by_label.get(&column.label) {
            return i;
        }
        let i = self.columns.len();
        self.by_label.insert(column.label.clone(), i);
        self.columns.push(column);
        self.rendered.push(rendered);
        i
    }
}

fn add_root_column(
    select: &mut SelectColumns,
    joins: &mut JoinStack<'_>,
    adapter: &SqlAdapter,
    column: &EntityColumn,
) -> Result<usize> {
    // subclass tables may have no row, hence outer
    let aliased = joins.column(&column.db_path, JoinScope::Qualifier, true)?;
    Ok(select.add(
        ColumnDescriptor {
            label: column.db_path.clone(),
            key: column.db_path.clone(),
            node: None,
            type_name: column.type_name.clone(),
        },
        quote_aliased(adapter, &aliased),
    ))
}

/// Translate a select against its resolved metadata.
pub fn translate_select(
    query: &SelectQuery,
    md: &QueryMetadata,
    snapshot: &MappingSnapshot,
    adapter: &SqlAdapter,
) -> Result<SelectAction> {
    let root_table = md
        .db_entity_name()
        .ok_or_else(|| Error::Unsupported(format!("select without a root table: {}", query.description())))?;
    let descriptor = md.class_descriptor().cloned();

    let mut joins = JoinStack::new(snapshot, root_table);
    let mut select = SelectColumns::default();
    let mut segments = Vec::new();
    let mut discriminator = Vec::new();

    match &descriptor {
        None => {
            for attribute in &snapshot.db_entity(root_table)?.attributes {
                let column = EntityColumn {
                    db_path: attribute.name.clone(),
                    type_name: None,
                };
                add_root_column(&mut select, &mut joins, adapter, &column)?;
            }
        }
        Some(d) if md.is_fetching_ids_only() => {
            for pk in d.primary_key() {
                let column = EntityColumn {
                    db_path: pk.name.clone(),
                    type_name: None,
                };
                add_root_column(&mut select, &mut joins, adapter, &column)?;
            }
        }
        Some(d) => {
            let hierarchy = hierarchy_columns(snapshot, d)?;
            for (entity, columns) in &hierarchy {
                let mut positions = Vec::with_capacity(columns.len());
                for column in columns {
                    positions.push(add_root_column(&mut select, &mut joins, adapter, column)?);
                }
                if hierarchy.len() > 1 {
                    segments.push(EntitySegment {
                        entity: entity.clone(),
                        columns: positions,
                    });
                }
            }
            if let Some(tree) = snapshot.inheritance_tree(d.root_entity()) {
                for column in tree.discriminator_columns() {
                    if let Some(&i) = select.by_label.get(&column) {
                        discriminator.push(i);
                    }
                }
            }
        }
    }

    for extra in query.extra_columns() {
        let column = EntityColumn {
            db_path: extra.clone(),
            type_name: None,
        };
        add_root_column(&mut select, &mut joins, adapter, &column)?;
    }

    // qualifier
    let mut bindings: Vec<Binding> = Vec::new();
    let hierarchy_qualifier = descriptor.as_ref().and_then(|d| {
        snapshot
            .inheritance_tree(d.entity_name())
            .filter(|tree| tree.is_inheritance())
            .and_then(|tree| tree.qualifier_for_hierarchy())
    });
    let qualifier = Expression::join_and(query.qualifier().cloned(), hierarchy_qualifier);
    let where_sql = match &qualifier {
        Some(q) => Some(
            QualifierTranslator::new(adapter, snapshot, descriptor.as_deref(), &mut joins, &mut bindings).translate(q)?,
        ),
        None => None,
    };

    // (expression, direction suffix)
    let mut order_keys = Vec::with_capacity(query.orderings().len());
    for ordering in query.orderings() {
        let mut translator =
            QualifierTranslator::new(adapter, snapshot, descriptor.as_deref(), &mut joins, &mut bindings);
        let mut term = translator.operand(&ordering.path_expression(), None)?;
        if ordering.ignore_case {
            term = format!("UPPER({term})");
        }
        let direction = if ordering.direction == SortOrder::Desc { " DESC" } else { "" };
        order_keys.push((term, direction));
    }
    let order_terms: Vec<String> = order_keys.iter().map(|(term, dir)| format!("{term}{dir}")).collect();

    // joint prefetches read from the same rows
    let mut joint_nodes = Vec::new();
    let mut joint_to_many = false;
    if let (Some(d), Some(tree)) = (&descriptor, md.prefetch_tree()) {
        for (path, _) in tree.adjacent_joint_nodes() {
            let (db_prefix, target, to_many) = walk_relationships(snapshot, d, &path)?;
            joint_to_many |= to_many;
            for column in entity_columns(snapshot, &target) {
                let db_path = join_path(&db_prefix, &column.db_path);
                let aliased = joins.column(&db_path, JoinScope::Prefetch, true)?;
                select.add(
                    ColumnDescriptor {
                        label: format!("{path}.{}", column.db_path),
                        key: column.db_path.clone(),
                        node: Some(path.clone()),
                        type_name: column.type_name.clone(),
                    },
                    quote_aliased(adapter, &aliased),
                );
            }
            joint_nodes.push(JointNode {
                path,
                entity: target.entity_name().to_string(),
            });
        }
    }

    let distinct = query.is_distinct() || (joins.has_to_many_join() && !md.is_fetching_data_rows());
    let columns_sql = select.rendered.join(", ");
    let from_sql = joins.render_from(adapter);
    let mut body = from_sql;
    if let Some(w) = &where_sql {
        body.push_str(" WHERE ");
        body.push_str(w);
    }

    let limit = md.fetch_limit();
    let offset = md.fetch_offset();
    let mut paging = InMemoryPaging::default();
    let order_sql = (!order_terms.is_empty()).then(|| format!(" ORDER BY {}", order_terms.join(", ")));
    let select_prefix = if distinct { "SELECT DISTINCT " } else { "SELECT " };

    let sql = if (limit == 0 && offset == 0) || joint_to_many {
        paging = InMemoryPaging {
            offset,
            limit,
            by_root: joint_to_many,
        };
        format!("{select_prefix}{columns_sql} {body}{}", order_sql.unwrap_or_default())
    } else {
        match adapter.capabilities().paging {
            PagingStyle::LimitOffset => {
                let mut sql = format!("{select_prefix}{columns_sql} {body}{}", order_sql.unwrap_or_default());
                if limit > 0 {
                    sql.push_str(&format!(" LIMIT {limit}"));
                } else if adapter.capabilities().offset_requires_limit {
                    sql.push_str(" LIMIT -1");
                }
                if offset > 0 {
                    sql.push_str(&format!(" OFFSET {offset}"));
                }
                sql
            }
            PagingStyle::OffsetFetch => {
                let order = order_sql.unwrap_or_else(|| " ORDER BY (SELECT NULL)".to_string());
                let mut sql = format!("{select_prefix}{columns_sql} {body}{order} OFFSET {offset} ROWS");
                if limit > 0 {
                    sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
                }
                sql
            }
            PagingStyle::RowNumber => {
                let numbered = if distinct {
                    // number rows only after DISTINCT has removed duplicates
                    let mut inner: Vec<String> = select
                        .rendered
                        .iter()
                        .enumerate()
                        .map(|(i, column)| format!("{column} AS c{i}"))
                        .collect();
                    let mut over_terms = Vec::with_capacity(order_keys.len());
                    for (i, (term, direction)) in order_keys.iter().enumerate() {
                        inner.push(format!("{term} AS o{i}"));
                        over_terms.push(format!("o{i}{direction}"));
                    }
                    let over = if over_terms.is_empty() {
                        "ORDER BY (SELECT NULL)".to_string()
                    } else {
                        format!("ORDER BY {}", over_terms.join(", "))
                    };
                    format!(
                        "SELECT d.*, ROW_NUMBER() OVER ({over}) AS rnum FROM (SELECT DISTINCT {} {body}) d",
                        inner.join(", ")
                    )
                } else {
                    let over = order_sql
                        .map(|o| o.trim_start().to_string())
                        .unwrap_or_else(|| "ORDER BY (SELECT NULL)".to_string());
                    format!("SELECT {columns_sql}, ROW_NUMBER() OVER ({over}) AS rnum {body}")
                };
                let mut sql = format!("SELECT * FROM ({numbered}) paged WHERE rnum > {offset}");
                if limit > 0 {
                    sql.push_str(&format!(" AND rnum <= {}", offset + limit));
                }
                sql.push_str(" ORDER BY rnum");
                sql
            }
            PagingStyle::None => {
                paging = InMemoryPaging {
                    offset,
                    limit,
                    by_root: false,
                };
                format!("{select_prefix}{columns_sql} {body}{}", order_sql.unwrap_or_default())
            }
        }
    };

    Ok(SelectAction {
        sql,
        bindings,
        result: ResultDescriptor {
            columns: select.columns,
            root_entity: descriptor.as_ref().map(|d| d.entity_name().to_string()),
            segments,
            discriminator,
            joint_nodes,
        },
        paging,
    })
}

/// Follow an object relationship path from `descriptor`, returning the db
/// path from the root table, the target descriptor, and whether any hop is
/// to-many.
pub(crate) fn walk_relationships(
    snapshot: &MappingSnapshot,
    descriptor: &ClassDescriptor,
    path: &str,
) -> Result<(String, std::sync::Arc<ClassDescriptor>, bool)> {
    let mut current = snapshot.class_descriptor(descriptor.entity_name())?;
    let mut db_prefix = String::new();
    let mut to_many = false;
    for name in path.split('.') {
        let relationship = current.relationship(name).ok_or_else(|| Error::UnknownRelationship {
            entity: current.entity_name().to_string(),
            name: name.to_string(),
        })?;
        db_prefix = join_path(&db_prefix, &relationship.db_path());
        to_many |= relationship.to_many;
        let target = relationship.target.clone();
        current = snapshot.class_descriptor(&target)?;
    }
    Ok((db_prefix, current, to_many))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterCapabilities;
    use crate::fixtures::{gallery_resolver, people_resolver};
    use crate::map::EntityResolver;
    use ormgraph_proto::{Ordering, PrefetchSemantics, Value};
    use pretty_assertions::assert_eq;

    fn translate(resolver: &EntityResolver, query: &SelectQuery, adapter: &SqlAdapter) -> SelectAction {
        let md = query.metadata(resolver).unwrap();
        let snapshot = resolver.snapshot().unwrap();
        translate_select(query, &md, &snapshot, adapter).unwrap()
    }

    fn generic() -> SqlAdapter {
        SqlAdapter::new(AdapterCapabilities::generic())
    }

    #[test]
    fn test_simple_select() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Artist").where_(Expression::path("artistName").eq("abc"));
        let action = translate(&resolver, &query, &generic());
        assert_eq!(
            action.sql,
            "SELECT t0.ARTIST_ID, t0.ARTIST_NAME, t0.DATE_OF_BIRTH FROM ARTIST t0 WHERE t0.ARTIST_NAME = ?"
        );
        assert_eq!(action.bindings.len(), 1);
        assert_eq!(action.bindings[0].value, Value::from("abc"));
        assert_eq!(action.result.root_entity.as_deref(), Some("Artist"));
        assert!(action.result.segments.is_empty());
        assert!(!action.paging.is_active());
    }

    #[test]
    fn test_to_one_foreign_keys_are_selected() {
        let resolver = gallery_resolver();
        let action = translate(&resolver, &SelectQuery::new("Painting"), &generic());
        let labels: Vec<_> = action.result.columns.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["PAINTING_ID", "PAINTING_TITLE", "ESTIMATED_PRICE", "ARTIST_ID", "GALLERY_ID"]
        );
    }

    #[test]
    fn test_to_many_qualifier_forces_distinct() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Artist")
            .where_(Expression::path("paintingArray.paintingTitle").like("S%"))
            .order_by(Ordering::asc("artistName").ignoring_case());
        let action = translate(&resolver, &query, &generic());
        assert!(action.sql.starts_with("SELECT DISTINCT t0.ARTIST_ID"));
        assert!(action
            .sql
            .ends_with("FROM ARTIST t0 JOIN PAINTING t1 ON t0.ARTIST_ID = t1.ARTIST_ID WHERE t1.PAINTING_TITLE LIKE ? ORDER BY UPPER(t0.ARTIST_NAME)"));
    }

    #[test]
    fn test_row_number_paging_counts_distinct_rows() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Artist")
            .where_(Expression::path("paintingArray.paintingTitle").like("S%"))
            .order_by(Ordering::desc("artistName"))
            .offset(2)
            .limit(2);
        let adapter = SqlAdapter::new(AdapterCapabilities::generic().with_paging(PagingStyle::RowNumber));
        let action = translate(&resolver, &query, &adapter);
        assert!(action.sql.starts_with(
            "SELECT * FROM (SELECT d.*, ROW_NUMBER() OVER (ORDER BY o0 DESC) AS rnum \
             FROM (SELECT DISTINCT t0.ARTIST_ID AS c0, t0.ARTIST_NAME AS c1"
        ));
        assert!(action.sql.contains(
            ", t0.ARTIST_NAME AS o0 FROM ARTIST t0 JOIN PAINTING t1 ON t0.ARTIST_ID = t1.ARTIST_ID \
             WHERE t1.PAINTING_TITLE LIKE ?) d) paged"
        ));
        assert!(action.sql.ends_with("WHERE rnum > 2 AND rnum <= 4 ORDER BY rnum"));
        assert!(!action.paging.is_active());
    }

    #[test]
    fn test_inheritance_segments_and_discriminator_qualifier() {
        let resolver = people_resolver();
        let action = translate(&resolver, &SelectQuery::new("AbstractPerson"), &generic());
        let segments: Vec<_> = action.result.segments.iter().map(|s| s.entity.as_str()).collect();
        assert_eq!(segments, vec!["AbstractPerson", "Employee", "Manager", "Customer"]);
        assert_eq!(action.result.discriminator.len(), 1);
        assert!(action.sql.contains("t0.SALARY"));
        assert!(action.sql.contains("t0.CLIENT_CONTACT"));
        assert!(action.sql.ends_with(
            "WHERE t0.PERSON_TYPE = ? OR t0.PERSON_TYPE = ? OR t0.PERSON_TYPE = ?"
        ));
        assert_eq!(action.bindings.len(), 3);

        let manager = translate(&resolver, &SelectQuery::new("Manager"), &generic());
        assert!(manager.result.segments.is_empty());
        assert!(manager.sql.ends_with("WHERE t0.PERSON_TYPE = ?"));
        assert_eq!(manager.bindings[0].value, Value::from("EM"));
    }

    #[test]
    fn test_vertical_inheritance_uses_left_join() {
        let resolver = people_resolver();
        let action = translate(&resolver, &SelectQuery::new("Vehicle"), &generic());
        assert!(action
            .sql
            .contains("FROM VEHICLE t0 LEFT JOIN CAR t1 ON t0.VEHICLE_ID = t1.VEHICLE_ID"));
        assert!(action.result.columns.iter().any(|c| c.key == "car.DOORS"));
    }

    #[test]
    fn test_joint_prefetch_columns() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Painting")
            .prefetch("toArtist", PrefetchSemantics::Joint)
            .unwrap()
            .limit(5);
        let action = translate(&resolver, &query, &SqlAdapter::new(AdapterCapabilities::sqlite()));
        assert_eq!(action.result.joint_nodes, vec![JointNode {
            path: "toArtist".into(),
            entity: "Artist".into()
        }]);
        let joint: Vec<_> = action
            .result
            .columns
            .iter()
            .filter(|c| c.node.is_some())
            .map(|c| c.key.as_str())
            .collect();
        assert_eq!(joint, vec!["ARTIST_ID", "ARTIST_NAME", "DATE_OF_BIRTH"]);
        assert!(action.sql.contains("LEFT JOIN ARTIST t1 ON t0.ARTIST_ID = t1.ARTIST_ID"));
        // to-one joint prefetch keeps SQL paging
        assert!(action.sql.ends_with(" LIMIT 5"));
        assert!(!action.paging.is_active());
    }

    #[test]
    fn test_joint_to_many_pages_in_memory() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Artist")
            .prefetch("paintingArray", PrefetchSemantics::Joint)
            .unwrap()
            .limit(2);
        let action = translate(&resolver, &query, &SqlAdapter::new(AdapterCapabilities::sqlite()));
        assert!(!action.sql.contains("LIMIT"));
        assert!(!action.sql.contains("DISTINCT"));
        assert_eq!(action.paging, InMemoryPaging {
            offset: 0,
            limit: 2,
            by_root: true
        });
    }

    #[test]
    fn test_paging_styles() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Gallery").offset(10);

        let sqlite = translate(&resolver, &query, &SqlAdapter::new(AdapterCapabilities::sqlite()));
        assert!(sqlite.sql.ends_with("FROM GALLERY t0 LIMIT -1 OFFSET 10"));

        let query = query.limit(5);
        let mssql = translate(&resolver, &query, &SqlAdapter::new(AdapterCapabilities::sqlserver()));
        assert!(mssql
            .sql
            .ends_with("ORDER BY (SELECT NULL) OFFSET 10 ROWS FETCH NEXT 5 ROWS ONLY"));

        let row_number = translate(
            &resolver,
            &query,
            &SqlAdapter::new(AdapterCapabilities::generic().with_paging(PagingStyle::RowNumber)),
        );
        assert!(row_number.sql.starts_with("SELECT * FROM (SELECT t0.GALLERY_ID"));
        assert!(row_number.sql.ends_with("WHERE rnum > 10 AND rnum <= 15 ORDER BY rnum"));

        let none = translate(&resolver, &query, &generic());
        assert!(!none.sql.contains("OFFSET"));
        assert_eq!(none.paging, InMemoryPaging {
            offset: 10,
            limit: 5,
            by_root: false
        });
    }

    #[test]
    fn test_ids_only_and_table_roots() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let query = SelectQuery::new("Artist");
        let mut md = QueryMetadata::clone(&query.metadata(&resolver).unwrap());
        md.fetching_ids_only = true;
        let action = translate_select(&query, &md, &snapshot, &generic()).unwrap();
        assert_eq!(action.sql, "SELECT t0.ARTIST_ID FROM ARTIST t0");

        let table = translate(&resolver, &SelectQuery::for_db_entity("GALLERY"), &generic());
        assert_eq!(table.sql, "SELECT t0.GALLERY_ID, t0.GALLERY_NAME FROM GALLERY t0");
        assert!(table.result.root_entity.is_none());
    }

    #[test]
    fn test_quoted_identifiers() {
        let resolver = gallery_resolver();
        let query = SelectQuery::new("Gallery").where_(Expression::path("galleryName").eq("x"));
        let action = translate(&resolver, &query, &SqlAdapter::new(AdapterCapabilities::postgres()));
        assert_eq!(
            action.sql,
            "SELECT t0.\"GALLERY_ID\", t0.\"GALLERY_NAME\" FROM \"GALLERY\" t0 WHERE t0.\"GALLERY_NAME\" = ?"
        );
    }
}
