//! Table aliases and joins collected while translating paths.

use ormgraph_proto::{path_segments, OUTER_JOIN_SUFFIX};

use super::adapter::SqlAdapter;
use crate::error::{Error, Result};
use crate::map::{DbRelationship, MappingSnapshot};

/// Alias of the root table.
pub const ROOT_ALIAS: &str = "t0";

/// Which part of the statement a join serves. Qualifier and column joins
/// are shared; joint prefetch joins are kept apart so that they never
/// filter root rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinScope {
    Qualifier,
    Prefetch,
}

#[derive(Debug)]
struct TableJoin {
    key: String,
    alias: String,
    table: String,
    parent_alias: String,
    relationship: DbRelationship,
    outer: bool,
}

/// Joins of one select, rendered into its FROM clause.
pub struct JoinStack<'a> {
    snapshot: &'a MappingSnapshot,
    root_table: String,
    joins: Vec<TableJoin>,
    to_many: bool,
}

impl<'a> JoinStack<'a> {
    pub fn new(snapshot: &'a MappingSnapshot, root_table: impl Into<String>) -> Self {
        Self {
            snapshot,
            root_table: root_table.into(),
            joins: Vec::new(),
            to_many: false,
        }
    }

    pub fn root_table(&self) -> &str {
        &self.root_table
    }

    /// Whether a qualifier join may multiply root rows.
    pub fn has_to_many_join(&self) -> bool {
        self.to_many
    }

    /// Resolve a db path such as `toArtist.ARTIST_NAME` to an aliased
    /// column, adding the joins it walks. `outer` forces left joins.
    pub fn column(&mut self, db_path: &str, scope: JoinScope, outer: bool) -> Result<String> {
        let segments: Vec<_> = path_segments(db_path).collect();
        let Some((column, relationships)) = segments.split_last() else {
            return Err(Error::invalid_expression(db_path, "empty path"));
        };

        let mut alias = ROOT_ALIAS.to_string();
        let mut table = self.root_table.clone();
        let mut key = match scope {
            JoinScope::Qualifier => String::new(),
            JoinScope::Prefetch => "#".to_string(),
        };

        for segment in relationships {
            let relationship = self
                .snapshot
                .db_entity(&table)?
                .relationship(segment.name)
                .ok_or_else(|| Error::UnknownRelationship {
                    entity: table.clone(),
                    name: segment.name.to_string(),
                })?
                .clone();

            key.push('.');
            key.push_str(segment.name);
            if segment.outer {
                key.push(OUTER_JOIN_SUFFIX);
            }

            let join_outer = outer || segment.outer || scope == JoinScope::Prefetch;
            alias = match self.joins.iter().position(|j| j.key == key) {
                Some(existing) => self.joins[existing].alias.clone(),
                None => {
                    if scope == JoinScope::Qualifier && relationship.to_many {
                        self.to_many = true;
                    }
                    let new_alias = format!("t{}", self.joins.len() + 1);
                    self.joins.push(TableJoin {
                        key: key.clone(),
                        alias: new_alias.clone(),
                        table: relationship.target.clone(),
                        parent_alias: alias,
                        relationship: relationship.clone(),
                        outer: join_outer,
                    });
                    new_alias
                }
            };
            table = relationship.target.clone();
        }

        let entity = self.snapshot.db_entity(&table)?;
        if entity.attribute(column.name).is_none() {
            return Err(Error::UnknownAttribute {
                entity: table,
                path: db_path.to_string(),
            });
        }
        Ok(format!("{alias}.{}", column.name))
    }

    /// `FROM` clause with all joins in creation order.
    pub fn render_from(&self, adapter: &SqlAdapter) -> String {
        let mut sql = format!("FROM {} {ROOT_ALIAS}", adapter.quote(&self.root_table));
        for join in &self.joins {
            let conditions: Vec<String> = join
                .relationship
                .joins
                .iter()
                .map(|j| {
                    format!(
                        "{}.{} = {}.{}",
                        join.parent_alias,
                        adapter.quote(&j.source),
                        join.alias,
                        adapter.quote(&j.target)
                    )
                })
                .collect();
            sql.push_str(if join.outer { " LEFT JOIN " } else { " JOIN " });
            sql.push_str(&format!(
                "{} {} ON {}",
                adapter.quote(&join.table),
                join.alias,
                conditions.join(" AND ")
            ));
        }
        sql
    }
}

/// Quote the column part of an aliased column.
pub fn quote_aliased(adapter: &SqlAdapter, aliased: &str) -> String {
    match aliased.split_once('.') {
        Some((alias, column)) => format!("{alias}.{}", adapter.quote(column)),
        None => adapter.quote(aliased),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdapterCapabilities;
    use crate::fixtures::gallery_resolver;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_joins_are_reused_per_path() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let adapter = SqlAdapter::new(AdapterCapabilities::generic());
        let mut joins = JoinStack::new(&snapshot, "ARTIST");

        assert_eq!(joins.column("ARTIST_NAME", JoinScope::Qualifier, false).unwrap(), "t0.ARTIST_NAME");
        assert_eq!(
            joins.column("paintingArray.PAINTING_TITLE", JoinScope::Qualifier, false).unwrap(),
            "t1.PAINTING_TITLE"
        );
        assert_eq!(
            joins.column("paintingArray.toGallery.GALLERY_NAME", JoinScope::Qualifier, false).unwrap(),
            "t2.GALLERY_NAME"
        );
        assert_eq!(
            joins.column("paintingArray.ESTIMATED_PRICE", JoinScope::Qualifier, false).unwrap(),
            "t1.ESTIMATED_PRICE"
        );
        assert_eq!(
            joins.column("paintingArray.PAINTING_ID", JoinScope::Prefetch, false).unwrap(),
            "t3.PAINTING_ID"
        );
        assert!(joins.has_to_many_join());

        assert_eq!(
            joins.render_from(&adapter),
            "FROM ARTIST t0 JOIN PAINTING t1 ON t0.ARTIST_ID = t1.ARTIST_ID \
             JOIN GALLERY t2 ON t1.GALLERY_ID = t2.GALLERY_ID \
             LEFT JOIN PAINTING t3 ON t0.ARTIST_ID = t3.ARTIST_ID"
        );
    }

    #[test]
    fn test_outer_join_marker() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let adapter = SqlAdapter::new(AdapterCapabilities::generic());
        let mut joins = JoinStack::new(&snapshot, "PAINTING");
        joins.column("toGallery+.GALLERY_NAME", JoinScope::Qualifier, false).unwrap();
        assert!(!joins.has_to_many_join());
        assert_eq!(
            joins.render_from(&adapter),
            "FROM PAINTING t0 LEFT JOIN GALLERY t1 ON t0.GALLERY_ID = t1.GALLERY_ID"
        );
    }

    #[test]
    fn test_unknown_column() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let mut joins = JoinStack::new(&snapshot, "ARTIST");
        let err = joins.column("paintingArray.NOPE", JoinScope::Qualifier, false).unwrap_err();
        assert!(matches!(err, Error::UnknownAttribute { entity, .. } if entity == "PAINTING"));
        let err = joins.column("nope.NAME", JoinScope::Qualifier, false).unwrap_err();
        assert!(matches!(err, Error::UnknownRelationship { .. }));
    }
}
