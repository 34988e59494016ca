//! INSERT, UPDATE and DELETE statements for batch queries.

use std::collections::BTreeSet;

use ormgraph_proto::Value;

use super::action::{BatchAction, BatchActionRow};
use super::adapter::SqlAdapter;
use crate::error::Result;
use crate::query::{BatchQuery, BatchQueryRow};

fn where_clause(adapter: &SqlAdapter, columns: &[String], nulls: &BTreeSet<String>) -> String {
    columns
        .iter()
        .map(|c| {
            if nulls.contains(c) {
                format!("{} IS NULL", adapter.quote(c))
            } else {
                format!("{} = ?", adapter.quote(c))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

/// Qualifier with the row's values filled in, for error messages.
fn rendered_qualifier(columns: &[String], nulls: &BTreeSet<String>, row: &BatchQueryRow) -> String {
    columns
        .iter()
        .map(|c| {
            if nulls.contains(c) {
                format!("{c} IS NULL")
            } else {
                format!("{c} = {}", row.qualifier_values_for([c]).remove(0))
            }
        })
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn bind_qualifier(columns: &[String], nulls: &BTreeSet<String>, row: &BatchQueryRow, bindings: &mut Vec<Value>) {
    let non_null: Vec<&String> = columns.iter().filter(|c| !nulls.contains(*c)).collect();
    bindings.extend(row.qualifier_values_for(non_null));
}

/// Translate a batch into one statement with a binding row per batch row.
pub fn translate_batch(query: &BatchQuery, adapter: &SqlAdapter) -> Result<BatchAction> {
    let table = adapter.quote(query.db_entity());
    let (sql, rows, generated_keys) = match query {
        BatchQuery::Insert(insert) => {
            let sql = if insert.columns().is_empty() {
                format!("INSERT INTO {table} DEFAULT VALUES")
            } else {
                let columns: Vec<String> = insert.columns().iter().map(|c| adapter.quote(c)).collect();
                let placeholders = vec!["?"; columns.len()].join(", ");
                format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", "))
            };
            let rows = insert
                .rows()
                .iter()
                .map(|row| BatchActionRow {
                    bindings: row.values_for(insert.columns()),
                    object_id: row.object_id.clone(),
                    qualifier: String::new(),
                })
                .collect();
            (sql, rows, insert.generated_keys().to_vec())
        }
        BatchQuery::Update(update) => {
            let assignments: Vec<String> = update
                .updated_columns()
                .iter()
                .map(|c| format!("{} = ?", adapter.quote(c)))
                .collect();
            let sql = format!(
                "UPDATE {table} SET {} WHERE {}",
                assignments.join(", "),
                where_clause(adapter, update.qualifier_columns(), update.null_qualifier_names())
            );
            let rows = update
                .rows()
                .iter()
                .map(|row| {
                    let mut bindings = row.values_for(update.updated_columns());
                    bind_qualifier(update.qualifier_columns(), update.null_qualifier_names(), row, &mut bindings);
                    BatchActionRow {
                        bindings,
                        object_id: row.object_id.clone(),
                        qualifier: rendered_qualifier(update.qualifier_columns(), update.null_qualifier_names(), row),
                    }
                })
                .collect();
            (sql, rows, Vec::new())
        }
        BatchQuery::Delete(delete) => {
            let sql = format!(
                "DELETE FROM {table} WHERE {}",
                where_clause(adapter, delete.qualifier_columns(), delete.null_qualifier_names())
            );
            let rows = delete
                .rows()
                .iter()
                .map(|row| {
                    let mut bindings = Vec::new();
                    bind_qualifier(delete.qualifier_columns(), delete.null_qualifier_names(), row, &mut bindings);
                    BatchActionRow {
                        bindings,
                        object_id: row.object_id.clone(),
                        qualifier: rendered_qualifier(delete.qualifier_columns(), delete.null_qualifier_names(), row),
                    }
                })
                .collect();
            (sql, rows, Vec::new())
        }
    };

    Ok(BatchAction {
        kind: query.kind(),
        db_entity: query.db_entity().to_string(),
        sql,
        rows,
        generated_keys,
        optimistic_locking: query.is_optimistic_locking(),
    })
}
