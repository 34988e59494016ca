//! Stored procedure calls.

use ormgraph_proto::Value;

use super::action::{ProcedureAction, ProcedureParam};
use super::adapter::SqlAdapter;
use crate::error::{Error, Result};
use crate::map::MappingSnapshot;
use crate::query::ProcedureQuery;

/// Build a `{call name(?, ...)}` statement with one parameter per declared
/// procedure parameter, in declaration order.
pub fn translate_procedure(
    query: &ProcedureQuery,
    snapshot: &MappingSnapshot,
    adapter: &SqlAdapter,
) -> Result<ProcedureAction> {
    let procedure = snapshot.procedure(query.procedure())?;

    for name in query.parameters().keys() {
        if !procedure.parameters.iter().any(|p| &p.name == name) {
            return Err(Error::InvalidExpression {
                expression: query.description(),
                message: format!("procedure has no parameter '{name}'"),
            });
        }
    }

    let mut parameters = Vec::with_capacity(procedure.parameters.len());
    for declared in &procedure.parameters {
        let value = if declared.direction.is_in() {
            let raw = query
                .parameters()
                .get(&declared.name)
                .ok_or_else(|| Error::UnboundParameter {
                    name: declared.name.clone(),
                })?;
            adapter
                .bind_value(Some(&declared.type_name), raw)
                .map_err(|f| Error::TypeConversion {
                    entity: procedure.name.clone(),
                    column: declared.name.clone(),
                    expected: f.expected,
                    actual: f.actual,
                })?
        } else {
            Value::Null
        };
        parameters.push(ProcedureParam {
            name: declared.name.clone(),
            direction: declared.direction,
            value,
            type_name: declared.type_name.clone(),
        });
    }

    let placeholders = vec!["?"; parameters.len()].join(", ");
    Ok(ProcedureAction {
        procedure: procedure.name.clone(),
        sql: format!("{{call {}({placeholders})}}", adapter.quote(&procedure.name)),
        parameters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::gallery_resolver;
    use crate::map::ParameterDirection;

    #[test]
    fn test_in_and_out_parameters() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let query = ProcedureQuery::new("update_prices").with_parameter("factor", 1.1);
        let action = translate_procedure(&query, &snapshot, &SqlAdapter::default()).unwrap();
        assert_eq!(action.sql, "{call update_prices(?, ?)}");
        assert_eq!(action.parameters[0].value, Value::Float64(1.1));
        assert_eq!(action.parameters[1].direction, ParameterDirection::Out);
        assert!(action.parameters[1].value.is_null());
    }

    #[test]
    fn test_missing_in_parameter() {
        let snapshot = gallery_resolver().snapshot().unwrap();
        let err = translate_procedure(&ProcedureQuery::new("update_prices"), &snapshot, &SqlAdapter::default())
            .unwrap_err();
        assert!(matches!(err, Error::UnboundParameter { name } if name == "factor"));
    }
}
