//! Integration tests running a JSON mapping through translation and a
//! scripted connection.

use std::collections::VecDeque;
use std::sync::Arc;

use ormgraph_core::access::{MemoryRows, ProcedureResults, RowSource, UpdateResult};
use ormgraph_core::error::ErrorKind;
use ormgraph_core::object::set_property;
use ormgraph_core::proto::{Expression, PrefetchSemantics, Value};
use ormgraph_core::translator::ProcedureParam;
use ormgraph_core::{
    translate, AdapterCapabilities, Connection, DataMap, DriverError, EntityResolver, PersistenceState, Property,
    Query, Runtime, RuntimeConfig, SelectQuery, SqlAction, SqlAdapter,
};

const SHOP: &str = include_str!("fixtures/shop.json");

fn resolver() -> EntityResolver {
    EntityResolver::with_map(DataMap::from_json(SHOP).unwrap()).unwrap()
}

/// Answers queries from a queue and counts every update as one row.
#[derive(Default)]
struct ScriptedConnection {
    rows: VecDeque<MemoryRows>,
    statements: Vec<String>,
}

impl ScriptedConnection {
    fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.rows.push_back(MemoryRows::new(columns, rows));
        self
    }
}

impl Connection for ScriptedConnection {
    fn query(&mut self, sql: &str, _params: &[Value]) -> Result<Box<dyn RowSource + '_>, DriverError> {
        self.statements.push(sql.to_string());
        Ok(Box::new(self.rows.pop_front().unwrap_or_default()))
    }

    fn execute(&mut self, sql: &str, _params: &[Value]) -> Result<UpdateResult, DriverError> {
        self.statements.push(sql.to_string());
        Ok(UpdateResult::new(1))
    }

    fn call_procedure(
        &mut self,
        sql: &str,
        _params: &[ProcedureParam],
    ) -> Result<Box<dyn ProcedureResults + '_>, DriverError> {
        Err(DriverError::new(format!("procedures are not scripted: {sql}")))
    }
}

#[test]
fn test_json_mapping_resolves() {
    let resolver = resolver();
    let customer = resolver.class_descriptor("Customer").unwrap();
    assert_eq!(customer.class_name(), "shop::Customer");
    assert_eq!(customer.primary_key_names(), vec!["CUSTOMER_ID".to_string()]);
    assert!(customer.relationship("orders").unwrap().to_many);

    let order = resolver.class_descriptor("Order").unwrap();
    assert!(order.optimistic_locking());
    let locking: Vec<_> = order.locking_attributes().map(|a| a.name.as_str()).collect();
    assert_eq!(locking, vec!["status"]);

    let err = resolver.class_descriptor("Invoice").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
}

#[test]
fn test_mapping_survives_json_round_trip() {
    let map = DataMap::from_json(SHOP).unwrap();
    let again = DataMap::from_json(&map.to_json().unwrap()).unwrap();
    assert_eq!(map, again);
}

#[test]
fn test_translate_select_through_to_many() {
    let resolver = resolver();
    let query: Query = SelectQuery::new("Customer")
        .where_(Expression::path("orders.status").eq("open"))
        .into();
    let action = translate(&query, &resolver, &SqlAdapter::default()).unwrap();
    let SqlAction::Select(select) = action else {
        panic!("expected a select");
    };
    assert_eq!(
        select.sql,
        "SELECT DISTINCT t0.CUSTOMER_ID, t0.NAME, t0.EMAIL FROM CUSTOMER t0 \
         JOIN PURCHASE_ORDER t1 ON t0.CUSTOMER_ID = t1.CUSTOMER_ID WHERE t1.STATUS = ?"
    );
}

#[test]
fn test_fetch_prefetch_and_commit() {
    let resolver = Arc::new(resolver());
    let runtime = Arc::new(Runtime::new(resolver, RuntimeConfig::new(AdapterCapabilities::sqlite())));
    let connection = ScriptedConnection::default()
        .with_rows(
            &["CUSTOMER_ID", "NAME", "EMAIL"],
            vec![vec![Value::Int64(1), "Ada".into(), Value::Null]],
        )
        .with_rows(
            &["ORDER_ID", "STATUS", "TOTAL", "CUSTOMER_ID"],
            vec![
                vec![Value::Int64(7), "open".into(), Value::Float64(12.5), Value::Int64(1)],
                vec![Value::Int64(8), "shipped".into(), Value::Float64(3.0), Value::Int64(1)],
            ],
        );
    let mut context = runtime.new_context(connection);

    let query = SelectQuery::new("Customer")
        .prefetch("orders", PrefetchSemantics::Disjoint)
        .unwrap();
    let customers = context.select(&query).unwrap();
    assert_eq!(customers.len(), 1);

    let orders = match customers[0].read().read_property("orders") {
        Some(Property::ToMany(list)) => list,
        other => panic!("orders not prefetched: {other:?}"),
    };
    assert_eq!(orders.len(), 2);

    set_property(&mut *orders[0].write(), "status", Value::from("closed"));
    let report = context.commit_changes().unwrap();
    assert_eq!(report.updated.len(), 1);
    assert_eq!(orders[0].read().persistence_state(), PersistenceState::Committed);

    let statements = &context.connection().statements;
    assert_eq!(statements.len(), 3);
    assert_eq!(
        statements[2],
        "UPDATE PURCHASE_ORDER SET STATUS = ? WHERE ORDER_ID = ? AND STATUS = ?"
    );
}
