//! Mappings and a scripted connection shared by unit tests.

use std::collections::{BTreeMap, VecDeque};

use ormgraph_proto::Value;

use crate::access::{Connection, MemoryRows, ProcedureResults, RowSource, StatementResult, UpdateResult};
use crate::error::DriverError;
use crate::map::{DataMap, DbAttribute, DbEntity, DbRelationship, ObjAttribute, ObjEntity, ObjRelationship};
use crate::map::{EntityResolver, ParameterDirection, Procedure};
use crate::translator::ProcedureParam;

/// Artists, their paintings and the galleries showing them.
pub fn gallery_map() -> DataMap {
    DataMap::new("gallery")
        .with_db_entity(
            DbEntity::new("ARTIST")
                .with_attribute(DbAttribute::primary_key("ARTIST_ID").generated())
                .with_attribute(DbAttribute::new("ARTIST_NAME").mandatory())
                .with_attribute(DbAttribute::new("DATE_OF_BIRTH"))
                .with_relationship(
                    DbRelationship::to_many("paintingArray", "ARTIST", "PAINTING")
                        .with_join("ARTIST_ID", "ARTIST_ID"),
                ),
        )
        .with_db_entity(
            DbEntity::new("PAINTING")
                .with_attribute(DbAttribute::primary_key("PAINTING_ID"))
                .with_attribute(DbAttribute::new("ARTIST_ID"))
                .with_attribute(DbAttribute::new("GALLERY_ID"))
                .with_attribute(DbAttribute::new("PAINTING_TITLE").mandatory())
                .with_attribute(DbAttribute::new("ESTIMATED_PRICE"))
                .with_relationship(
                    DbRelationship::to_one("toArtist", "PAINTING", "ARTIST").with_join("ARTIST_ID", "ARTIST_ID"),
                )
                .with_relationship(
                    DbRelationship::to_one("toGallery", "PAINTING", "GALLERY")
                        .with_join("GALLERY_ID", "GALLERY_ID"),
                ),
        )
        .with_db_entity(
            DbEntity::new("GALLERY")
                .with_attribute(DbAttribute::primary_key("GALLERY_ID"))
                .with_attribute(DbAttribute::new("GALLERY_NAME").mandatory()),
        )
        .with_obj_entity(
            ObjEntity::new("Artist", "ARTIST")
                .with_class_name("gallery::Artist")
                .with_attribute(ObjAttribute::new("artistName", "ARTIST_NAME", "String"))
                .with_attribute(ObjAttribute::new("dateOfBirth", "DATE_OF_BIRTH", "Timestamp"))
                .with_relationship(
                    ObjRelationship::new("paintingArray", "Painting", "paintingArray").with_reverse("toArtist"),
                ),
        )
        .with_obj_entity(
            ObjEntity::new("Painting", "PAINTING")
                .with_attribute(ObjAttribute::new("paintingTitle", "PAINTING_TITLE", "String").used_for_locking())
                .with_attribute(ObjAttribute::new("estimatedPrice", "ESTIMATED_PRICE", "f64").used_for_locking())
                .with_relationship(ObjRelationship::new("toArtist", "Artist", "toArtist").with_reverse("paintingArray"))
                .with_relationship(ObjRelationship::new("toGallery", "Gallery", "toGallery"))
                .with_optimistic_locking(),
        )
        .with_obj_entity(
            ObjEntity::new("Gallery", "GALLERY").with_attribute(ObjAttribute::new(
                "galleryName",
                "GALLERY_NAME",
                "String",
            )),
        )
        .with_procedure(
            Procedure::new("update_prices")
                .with_parameter("factor", ParameterDirection::In, "f64")
                .with_parameter("updated", ParameterDirection::Out, "i64"),
        )
}

/// Single-table hierarchy with three leaves, plus a vertical hierarchy
/// whose subclass columns live in a separate table.
pub fn people_map() -> DataMap {
    DataMap::new("people")
        .with_db_entity(
            DbEntity::new("PERSON")
                .with_attribute(DbAttribute::primary_key("PERSON_ID"))
                .with_attribute(DbAttribute::new("NAME").mandatory())
                .with_attribute(DbAttribute::new("PERSON_TYPE").mandatory())
                .with_attribute(DbAttribute::new("SALARY"))
                .with_attribute(DbAttribute::new("DEPARTMENT"))
                .with_attribute(DbAttribute::new("CLIENT_CONTACT")),
        )
        .with_db_entity(
            DbEntity::new("VEHICLE")
                .with_attribute(DbAttribute::primary_key("VEHICLE_ID"))
                .with_attribute(DbAttribute::new("VEHICLE_TYPE").mandatory())
                .with_attribute(DbAttribute::new("MAKE"))
                .with_relationship(
                    DbRelationship::to_one("car", "VEHICLE", "CAR")
                        .with_join("VEHICLE_ID", "VEHICLE_ID")
                        .to_dependent_pk(),
                ),
        )
        .with_db_entity(
            DbEntity::new("CAR")
                .with_attribute(DbAttribute::primary_key("VEHICLE_ID"))
                .with_attribute(DbAttribute::new("DOORS")),
        )
        .with_obj_entity(
            ObjEntity::new("AbstractPerson", "PERSON")
                .abstract_entity()
                .with_attribute(ObjAttribute::new("name", "NAME", "String")),
        )
        .with_obj_entity(
            ObjEntity::subentity("Employee", "AbstractPerson")
                .with_discriminator("PERSON_TYPE", "EE")
                .with_attribute(ObjAttribute::new("salary", "SALARY", "f64")),
        )
        .with_obj_entity(
            ObjEntity::subentity("Manager", "AbstractPerson")
                .with_discriminator("PERSON_TYPE", "EM")
                .with_attribute(ObjAttribute::new("department", "DEPARTMENT", "String")),
        )
        .with_obj_entity(
            ObjEntity::subentity("Customer", "AbstractPerson")
                .with_discriminator("PERSON_TYPE", "C")
                .with_attribute(ObjAttribute::new("clientContact", "CLIENT_CONTACT", "String")),
        )
        .with_obj_entity(
            ObjEntity::new("Vehicle", "VEHICLE")
                .with_discriminator("VEHICLE_TYPE", "vehicle")
                .with_attribute(ObjAttribute::new("make", "MAKE", "String")),
        )
        .with_obj_entity(
            ObjEntity::subentity("Car", "Vehicle")
                .with_db_entity("CAR")
                .with_discriminator("VEHICLE_TYPE", "car")
                .with_attribute(ObjAttribute::new("doors", "DOORS", "i32")),
        )
}

pub fn gallery_resolver() -> EntityResolver {
    EntityResolver::with_map(gallery_map()).expect("gallery map is valid")
}

pub fn people_resolver() -> EntityResolver {
    EntityResolver::with_map(people_map()).expect("people map is valid")
}

/// Scripted connection recording every statement it receives.
#[derive(Default)]
pub struct MockConnection {
    results: VecDeque<Result<MemoryRows, DriverError>>,
    updates: VecDeque<Result<UpdateResult, DriverError>>,
    procedures: VecDeque<MockProcedure>,
    executed: Vec<(String, Vec<Value>)>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next query.
    pub fn push_rows(&mut self, columns: &[&str], rows: Vec<Vec<Value>>) {
        let columns = columns.iter().map(|c| c.to_string()).collect();
        self.results.push_back(Ok(MemoryRows::new(columns, rows)));
    }

    pub fn push_query_error(&mut self, error: DriverError) {
        self.results.push_back(Err(error));
    }

    /// Queue the result of the next update; updates default to one row.
    pub fn push_update(&mut self, result: UpdateResult) {
        self.updates.push_back(Ok(result));
    }

    pub fn push_update_error(&mut self, error: DriverError) {
        self.updates.push_back(Err(error));
    }

    pub fn push_procedure(&mut self, procedure: MockProcedure) {
        self.procedures.push_back(procedure);
    }

    /// Statements received so far, with their parameters.
    pub fn executed(&self) -> &[(String, Vec<Value>)] {
        &self.executed
    }

    pub fn executed_sql(&self) -> Vec<&str> {
        self.executed.iter().map(|(sql, _)| sql.as_str()).collect()
    }
}

impl Connection for MockConnection {
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Box<dyn RowSource + '_>, DriverError> {
        self.executed.push((sql.to_string(), params.to_vec()));
        let rows = self.results.pop_front().unwrap_or_else(|| Ok(MemoryRows::default()))?;
        Ok(Box::new(rows))
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<UpdateResult, DriverError> {
        self.executed.push((sql.to_string(), params.to_vec()));
        self.updates.pop_front().unwrap_or_else(|| Ok(UpdateResult::new(1)))
    }

    fn call_procedure(
        &mut self,
        sql: &str,
        params: &[ProcedureParam],
    ) -> Result<Box<dyn ProcedureResults + '_>, DriverError> {
        self.executed
            .push((sql.to_string(), params.iter().map(|p| p.value.clone()).collect()));
        let procedure = self
            .procedures
            .pop_front()
            .ok_or_else(|| DriverError::new(format!("no procedure scripted for {sql}")))?;
        Ok(Box::new(procedure))
    }
}

/// Scripted procedure results. OUT parameters are only readable once all
/// results are consumed, unless `out_first` is set.
#[derive(Default)]
pub struct MockProcedure {
    pub results: VecDeque<StatementResult>,
    pub out: BTreeMap<String, Value>,
    pub out_first: bool,
}

impl ProcedureResults for MockProcedure {
    fn next_result(&mut self) -> Result<Option<StatementResult>, DriverError> {
        Ok(self.results.pop_front())
    }

    fn out_parameters(&mut self) -> Result<BTreeMap<String, Value>, DriverError> {
        if !self.out_first && !self.results.is_empty() {
            return Err(DriverError::new("OUT parameters read before results were consumed"));
        }
        Ok(self.out.clone())
    }
}
