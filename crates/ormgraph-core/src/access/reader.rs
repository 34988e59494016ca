//! Turning raw result rows into typed data rows.
//!
//! A [`RowReader`] knows the column layout of one translated select. For
//! inheritance hierarchies it reads the discriminator first and keeps only
//! the columns of the matching entity's segment. Joint prefetch columns go
//! into separate rows per prefetch path.

use std::collections::{HashMap, HashSet};

use ormgraph_proto::Value;

use super::connection::RowSource;
use crate::error::{Error, Result};
use crate::map::{EntityInheritanceTree, MappingSnapshot};
use crate::object::DataRow;
use crate::translator::select::hierarchy_columns;
use crate::translator::{
    ColumnDescriptor, EntitySegment, InMemoryPaging, ResultDescriptor, SqlAdapter,
};

/// One result row split into the root row and joint prefetch rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadRow {
    pub root: DataRow,
    /// Joint rows by prefetch path; `None` where an outer join matched
    /// nothing.
    pub joint: Vec<(String, Option<DataRow>)>,
}

impl ReadRow {
    /// Joint row of a prefetch path.
    pub fn joint_row(&self, path: &str) -> Option<&DataRow> {
        self.joint
            .iter()
            .find(|(p, _)| p == path)
            .and_then(|(_, row)| row.as_ref())
    }
}

/// Reads rows laid out by one [`ResultDescriptor`].
pub struct RowReader<'a> {
    result: &'a ResultDescriptor,
    snapshot: &'a MappingSnapshot,
    adapter: &'a SqlAdapter,
    sql: &'a str,
    tree: Option<&'a EntityInheritanceTree>,
    unsegmented: Vec<usize>,
    root_key: Vec<usize>,
}

impl<'a> RowReader<'a> {
    pub fn new(
        result: &'a ResultDescriptor,
        snapshot: &'a MappingSnapshot,
        adapter: &'a SqlAdapter,
        sql: &'a str,
    ) -> Result<Self> {
        let tree = result
            .root_entity
            .as_deref()
            .and_then(|e| snapshot.inheritance_tree(e))
            .filter(|t| t.is_inheritance());

        let segmented: HashSet<usize> = result.segments.iter().flat_map(|s| s.columns.iter().copied()).collect();
        let unsegmented = result
            .columns
            .iter()
            .enumerate()
            .filter(|(i, c)| c.node.is_none() && !segmented.contains(i))
            .map(|(i, _)| i)
            .collect();

        let root_key = match &result.root_entity {
            Some(entity) => {
                let descriptor = snapshot.class_descriptor(entity)?;
                descriptor
                    .primary_key_names()
                    .iter()
                    .filter_map(|pk| result.columns.iter().position(|c| c.node.is_none() && &c.key == pk))
                    .collect()
            }
            None => Vec::new(),
        };

        Ok(Self {
            result,
            snapshot,
            adapter,
            sql,
            tree,
            unsegmented,
            root_key,
        })
    }

    fn convert(&self, entity: &str, column: &ColumnDescriptor, raw: Value) -> Result<Value> {
        self.adapter
            .materialize(column.type_name.as_deref(), raw)
            .map_err(|f| Error::TypeConversion {
                entity: entity.to_string(),
                column: column.key.clone(),
                expected: f.expected,
                actual: f.actual,
            })
    }

    /// Concrete entity of the row, read from the discriminator.
    fn row_entity(&self, values: &[Value]) -> Result<Option<String>> {
        let Some(root) = &self.result.root_entity else {
            return Ok(None);
        };
        // id-only selects carry no discriminator
        let Some(tree) = self.tree.filter(|_| !self.result.discriminator.is_empty()) else {
            return Ok(Some(root.clone()));
        };
        let lookup = |column: &str| {
            self.result
                .discriminator
                .iter()
                .find(|&&i| self.result.columns[i].key == column)
                .map(|&i| values[i].clone())
        };
        tree.entity_matching_row(&lookup)
            .map(|e| Some(e.name.clone()))
            .ok_or_else(|| Error::NoMatchingEntity { entity: root.clone() })
    }

    fn segment(&self, entity: &str) -> Option<&EntitySegment> {
        self.result.segments.iter().find(|s| s.entity == entity)
    }

    /// Split and convert one result row.
    pub fn read(&self, mut values: Vec<Value>) -> Result<ReadRow> {
        let expected = self.result.columns.len();
        if values.len() < expected {
            return Err(Error::ColumnCount {
                sql: self.sql.to_string(),
                expected,
                actual: values.len(),
            });
        }
        // row-number paging appends a counter column
        values.truncate(expected);

        let entity = self.row_entity(&values)?;
        let label = entity.as_deref().unwrap_or("");

        let positions: Vec<usize> = match entity.as_deref().and_then(|e| self.segment(e)) {
            Some(segment) => segment.columns.iter().chain(&self.unsegmented).copied().collect(),
            None => (0..expected).filter(|&i| self.result.columns[i].node.is_none()).collect(),
        };

        let mut root = DataRow::new();
        if let Some(entity) = &entity {
            root.set_entity_name(entity.clone());
        }
        for i in positions {
            let column = &self.result.columns[i];
            let value = std::mem::replace(&mut values[i], Value::Null);
            root.insert(column.key.clone(), self.convert(label, column, value)?);
        }

        let mut joint = Vec::with_capacity(self.result.joint_nodes.len());
        for node in &self.result.joint_nodes {
            let mut row = DataRow::new();
            for (i, column) in self.result.columns.iter().enumerate() {
                if column.node.as_deref() == Some(node.path.as_str()) {
                    let value = std::mem::replace(&mut values[i], Value::Null);
                    row.insert(column.key.clone(), self.convert(&node.entity, column, value)?);
                }
            }
            if row.is_all_null() {
                joint.push((node.path.clone(), None));
                continue;
            }
            let entity = match self.snapshot.inheritance_tree(&node.entity).filter(|t| t.is_inheritance()) {
                Some(tree) => tree
                    .entity_matching_row(&|c: &str| row.get(c).cloned())
                    .map(|e| e.name.clone())
                    .ok_or_else(|| Error::NoMatchingEntity {
                        entity: node.entity.clone(),
                    })?,
                None => node.entity.clone(),
            };
            row.set_entity_name(entity);
            joint.push((node.path.clone(), Some(row)));
        }

        Ok(ReadRow { root, joint })
    }

    /// Values identifying the root object of a row.
    fn root_identity(&self, row: &ReadRow) -> Vec<Value> {
        if self.root_key.is_empty() {
            return row.root.values().values().cloned().collect();
        }
        self.root_key
            .iter()
            .map(|&i| {
                row.root
                    .get(&self.result.columns[i].key)
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect()
    }
}

/// Iterates a row source through a reader, applying in-memory paging.
pub struct ResultIterator<'r, 's> {
    reader: &'r RowReader<'r>,
    source: Box<dyn RowSource + 's>,
    paging: InMemoryPaging,
    seen_rows: usize,
    roots: HashMap<Vec<Value>, usize>,
    done: bool,
}

impl<'r, 's> ResultIterator<'r, 's> {
    pub fn new(reader: &'r RowReader<'r>, source: Box<dyn RowSource + 's>, paging: InMemoryPaging) -> Self {
        Self {
            reader,
            source,
            paging,
            seen_rows: 0,
            roots: HashMap::new(),
            done: false,
        }
    }

    /// Whether the page selects an entry with this ordinal.
    fn in_page(&self, ordinal: usize) -> bool {
        ordinal >= self.paging.offset && (self.paging.limit == 0 || ordinal < self.paging.offset + self.paging.limit)
    }

    fn past_page(&self, ordinal: usize) -> bool {
        self.paging.limit > 0 && ordinal >= self.paging.offset + self.paging.limit
    }
}

impl Iterator for ResultIterator<'_, '_> {
    type Item = Result<ReadRow>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let values = match self.source.next_row() {
                Ok(Some(values)) => values,
                Ok(None) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(Error::execution("read result", self.reader.sql, e)));
                }
            };

            if !self.paging.is_active() {
                return Some(self.reader.read(values));
            }

            if !self.paging.by_root {
                let ordinal = self.seen_rows;
                self.seen_rows += 1;
                if self.past_page(ordinal) {
                    self.done = true;
                    return None;
                }
                if self.in_page(ordinal) {
                    return Some(self.reader.read(values));
                }
                continue;
            }

            // rows of one root may be spread out, so keep reading past the page
            let row = match self.reader.read(values) {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let identity = self.reader.root_identity(&row);
            let next = self.roots.len();
            let ordinal = *self.roots.entry(identity).or_insert(next);
            if self.in_page(ordinal) {
                return Some(Ok(row));
            }
        }
        None
    }
}

/// Result layout for rows whose columns are named by the driver, as
/// returned by templates and procedures. Labels that match a column of
/// the entity hierarchy are typed and segmented like a select.
pub fn descriptor_for_labels(
    snapshot: &MappingSnapshot,
    entity: Option<&str>,
    labels: &[String],
) -> Result<ResultDescriptor> {
    let plain = |type_name: Option<String>, label: &String| ColumnDescriptor {
        label: label.clone(),
        key: label.clone(),
        node: None,
        type_name,
    };

    let Some(entity) = entity else {
        return Ok(ResultDescriptor {
            columns: labels.iter().map(|l| plain(None, l)).collect(),
            ..Default::default()
        });
    };

    let descriptor = snapshot.class_descriptor(entity)?;
    let hierarchy = hierarchy_columns(snapshot, &descriptor)?;
    let type_of = |label: &str| {
        hierarchy
            .iter()
            .flat_map(|(_, columns)| columns)
            .find(|c| c.db_path.eq_ignore_ascii_case(label))
            .map(|c| (c.db_path.clone(), c.type_name.clone()))
    };

    let columns: Vec<ColumnDescriptor> = labels
        .iter()
        .map(|label| match type_of(label) {
            Some((key, type_name)) => ColumnDescriptor {
                label: label.clone(),
                key,
                node: None,
                type_name,
            },
            None => plain(None, label),
        })
        .collect();

    let position = |db_path: &str| columns.iter().position(|c| c.key == db_path);
    let segments = if hierarchy.len() > 1 {
        hierarchy
            .iter()
            .map(|(name, entity_columns)| EntitySegment {
                entity: name.clone(),
                columns: entity_columns.iter().filter_map(|c| position(&c.db_path)).collect(),
            })
            .collect()
    } else {
        Vec::new()
    };
    let discriminator = snapshot
        .inheritance_tree(descriptor.root_entity())
        .map(|tree| tree.discriminator_columns())
        .unwrap_or_default()
        .iter()
        .filter_map(|c| position(c))
        .collect();

    Ok(ResultDescriptor {
        columns,
        root_entity: Some(entity.to_string()),
        segments,
        discriminator,
        joint_nodes: Vec::new(),
    })
}
