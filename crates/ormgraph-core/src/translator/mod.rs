//! SQL translation.
//!
//! Every query kind has its own assembly strategy; [`translate`] dispatches
//! on the kind and returns an [`SqlAction`] holding the statement text, its
//! positional bindings and whatever the reader needs to split result rows.
//! Translation never touches a connection, so every mapping or expression
//! problem surfaces here, before anything is executed.

pub mod action;
pub mod adapter;
pub mod batch;
pub mod joins;
pub mod procedure;
pub mod qualifier;
pub mod select;
pub mod template;

use tracing::debug;

pub use action::{
    binding_values, BatchAction, BatchActionRow, Binding, ColumnDescriptor, EntitySegment, InMemoryPaging,
    JointNode, ProcedureAction, ProcedureParam, ResultDescriptor, SelectAction, SqlAction, TemplateAction,
};
pub use adapter::SqlAdapter;
pub use batch::translate_batch;
pub use procedure::translate_procedure;
pub use qualifier::{prefix_db_paths, resolve_obj_path, to_db_expression, QualifierTranslator, ResolvedPath};
pub use select::translate_select;
pub use template::translate_template;

use crate::error::{Error, Result};
use crate::map::EntityResolver;
use crate::query::{IncrementalQuery, Query};

/// Translate any query for the given adapter.
pub fn translate(query: &Query, resolver: &EntityResolver, adapter: &SqlAdapter) -> Result<SqlAction> {
    let action = match query {
        Query::Select(select) => {
            let md = select.metadata(resolver)?;
            let snapshot = resolver.snapshot()?;
            SqlAction::Select(translate_select(select, &md, &snapshot, adapter)?)
        }
        Query::Incremental(incremental) => SqlAction::Select(translate_incremental(incremental, resolver, adapter)?),
        Query::Template(template) => {
            template.metadata(resolver)?;
            SqlAction::Template(translate_template(template, adapter)?)
        }
        Query::Procedure(procedure) => {
            procedure.metadata(resolver)?;
            let snapshot = resolver.snapshot()?;
            SqlAction::Procedure(translate_procedure(procedure, &snapshot, adapter)?)
        }
        Query::Batch(batch) => {
            batch.metadata(resolver)?;
            SqlAction::Batch(translate_batch(batch, adapter)?)
        }
        Query::Refresh(refresh) => {
            return Err(Error::Unsupported(format!("{} runs no SQL", refresh.description())));
        }
    };
    debug!(query = %query.description(), adapter = adapter.name(), sql = %action, "translated query");
    Ok(action)
}

/// The primary-key select behind an incremental list.
pub fn translate_incremental(
    query: &IncrementalQuery,
    resolver: &EntityResolver,
    adapter: &SqlAdapter,
) -> Result<SelectAction> {
    let md = query.metadata(resolver)?;
    let snapshot = resolver.snapshot()?;
    translate_select(query.base(), &md, &snapshot, adapter)
}
