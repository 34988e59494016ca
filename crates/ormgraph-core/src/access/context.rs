//! The data context: an object graph bound to one connection.
//!
//! Queries run through the context merge their rows into its graph, so one
//! identity maps to one object for the context's lifetime. Changes made to
//! those objects are written back by [`DataContext::commit_changes`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use ormgraph_proto::Value;
use tracing::{debug, info, trace};

use super::batch::{BatchEngine, BatchReport, GeneratedKey, RowChange};
use super::commit::{object_row, table_mappings, table_order, ChangeBuilder, PendingKey, TableMapping};
use super::connection::{read_all, Connection, StatementResult};
use super::incremental::IncrementalFaultList;
use super::listener::{CommitReport, FetchEvent};
use super::materializer::{descriptor_of, Materializer};
use super::prefetch::{
    by_id_queries, connect, key_qualifier, relationship_step, JointLists, PrefetchRouter, PrefetchStep,
    PrefetchStrategy,
};
use super::reader::{descriptor_for_labels, ReadRow, ResultIterator, RowReader};
use super::runtime::Runtime;
use crate::error::{Error, Result};
use crate::map::{ClassDescriptor, MappingSnapshot};
use crate::object::{DataRow, ObjectGraph, ObjectId, ObjectRef, PersistenceState, Property};
use crate::query::{
    BatchQuery, IncrementalQuery, ProcedureQuery, Query, QueryCache, QueryMetadata, RefreshQuery, RefreshTarget,
    SelectQuery, SqlTemplate,
};
use crate::translator::{
    binding_values, translate_incremental, translate_procedure, translate_select, translate_template, SelectAction,
};

/// One result of a procedure call.
#[derive(Debug, Clone)]
pub enum ProcedureResult {
    /// Rows of the result set mapped to the query's result entity.
    Objects(Vec<ObjectRef>),
    Rows(Vec<DataRow>),
    UpdateCount(u64),
}

/// Everything a procedure call returned.
#[derive(Debug, Clone, Default)]
pub struct ProcedureOutcome {
    pub results: Vec<ProcedureResult>,
    /// OUT and INOUT parameter values, converted to their declared types.
    pub out_parameters: BTreeMap<String, Value>,
}

/// Result of [`DataContext::perform_query`].
#[derive(Debug, Clone)]
pub enum QueryResponse {
    Objects(Vec<ObjectRef>),
    DataRows(Vec<DataRow>),
    UpdateCounts(Vec<u64>),
    Procedure(ProcedureOutcome),
}

impl QueryResponse {
    /// Objects of an object result, empty otherwise.
    pub fn objects(&self) -> &[ObjectRef] {
        match self {
            QueryResponse::Objects(objects) => objects,
            _ => &[],
        }
    }

    /// Rows of a data row result, empty otherwise.
    pub fn data_rows(&self) -> &[DataRow] {
        match self {
            QueryResponse::DataRows(rows) => rows,
            _ => &[],
        }
    }

    pub fn update_counts(&self) -> &[u64] {
        match self {
            QueryResponse::UpdateCounts(counts) => counts,
            _ => &[],
        }
    }
}

#[derive(Clone)]
enum LocalEntry {
    Objects(Vec<ObjectId>),
    Rows(Arc<Vec<ReadRow>>),
}

fn ptr(object: &ObjectRef) -> usize {
    Arc::as_ptr(object) as *const () as usize
}

/// Cache groups of a result: the declared ones, plus the root entity and
/// table so that commits touching them drop the result.
fn cache_groups(md: &QueryMetadata) -> Vec<String> {
    let mut groups = md.cache_groups().to_vec();
    let implicit = md
        .class_descriptor()
        .map(|d| d.root_entity().to_string())
        .into_iter()
        .chain(md.db_entity_name().map(str::to_string));
    for group in implicit {
        if !groups.contains(&group) {
            groups.push(group);
        }
    }
    groups
}

fn is_select(sql: &str) -> bool {
    let head: String = sql
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_ascii_uppercase();
    matches!(head.as_str(), "SELECT" | "WITH" | "VALUES")
}

/// Objects fetched and changed through one connection.
pub struct DataContext<C: Connection> {
    runtime: Arc<Runtime>,
    connection: C,
    graph: ObjectGraph,
    local_cache: QueryCache<LocalEntry>,
    /// New objects in registration order.
    inserted: Vec<ObjectRef>,
    /// Deleted objects in deletion order.
    deleted: Vec<ObjectRef>,
}

impl<C: Connection> DataContext<C> {
    pub fn new(runtime: Arc<Runtime>, connection: C) -> Self {
        let capacity = runtime.config().query_cache_capacity;
        Self {
            runtime,
            connection,
            graph: ObjectGraph::new(),
            local_cache: QueryCache::new(capacity),
            inserted: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn graph(&self) -> &ObjectGraph {
        &self.graph
    }

    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub fn connection_mut(&mut self) -> &mut C {
        &mut self.connection
    }

    pub fn into_connection(self) -> C {
        self.connection
    }

    /// Registered object with this identity.
    pub fn local_object(&self, id: &ObjectId) -> Option<ObjectRef> {
        self.graph.get(id)
    }

    fn log_statement(&self, sql: &str, bindings: usize) {
        if self.runtime.config().log_sql {
            debug!(sql = %sql, bindings, "executing statement");
        }
    }

    fn notify_fetch(&self, query: String, entity: Option<&str>, results: usize, from_cache: bool) {
        self.runtime.listener().did_fetch(&FetchEvent {
            query,
            entity: entity.map(str::to_string),
            results,
            from_cache,
        });
    }

    // ---- queries ----

    /// Run any query.
    pub fn perform_query(&mut self, query: impl Into<Query>) -> Result<QueryResponse> {
        let runtime = self.runtime.clone();
        match query.into() {
            Query::Select(select) => {
                if select.metadata(runtime.resolver())?.is_fetching_data_rows() {
                    Ok(QueryResponse::DataRows(self.select_data_rows(&select)?))
                } else {
                    Ok(QueryResponse::Objects(self.select(&select)?))
                }
            }
            Query::Incremental(incremental) => {
                let rows = self.incremental_rows(&incremental)?;
                Ok(QueryResponse::DataRows(rows.iter().map(|r| r.root.clone()).collect()))
            }
            Query::Template(template) => self.perform_template(&template),
            Query::Procedure(procedure) => Ok(QueryResponse::Procedure(self.perform_procedure(&procedure)?)),
            Query::Batch(batch) => {
                let reports = self.run_batches(vec![batch])?;
                Ok(QueryResponse::UpdateCounts(reports.iter().map(|r| r.rows_affected).collect()))
            }
            Query::Refresh(refresh) => Ok(QueryResponse::Objects(self.refresh(&refresh)?)),
        }
    }

    /// Fetch objects.
    pub fn select(&mut self, query: &SelectQuery) -> Result<Vec<ObjectRef>> {
        let runtime = self.runtime.clone();
        let md = query.metadata(runtime.resolver())?;
        if md.is_fetching_data_rows() {
            return Err(Error::Unsupported(format!(
                "{} fetches data rows, use select_data_rows",
                query.description()
            )));
        }
        self.select_objects(query, &md)
    }

    /// Fetch data rows without registering objects.
    pub fn select_data_rows(&mut self, query: &SelectQuery) -> Result<Vec<DataRow>> {
        let runtime = self.runtime.clone();
        let md = query.metadata(runtime.resolver())?;
        if !md.is_fetching_data_rows() {
            return Err(Error::Unsupported(format!(
                "{} fetches objects, use select",
                query.description()
            )));
        }
        let description = query.description();
        let (rows, from_cache) = self.cached_rows(&md, |ctx, snapshot| {
            let action = translate_select(query, &md, snapshot, runtime.adapter())?;
            ctx.read_select(&description, &action, snapshot)
        })?;
        let entity = md.class_descriptor().map(|d| d.entity_name().to_string());
        self.notify_fetch(description, entity.as_deref(), rows.len(), from_cache);
        Ok(rows.iter().map(|r| r.root.clone()).collect())
    }

    /// Fetch the query's primary keys and resolve the first page.
    pub fn perform_incremental(&mut self, query: SelectQuery) -> Result<IncrementalFaultList> {
        let runtime = self.runtime.clone();
        let base = Arc::new(query);
        let md = base.metadata(runtime.resolver())?;
        let descriptor = match md.class_descriptor() {
            Some(d) if !md.is_fetching_data_rows() => d.clone(),
            _ => {
                return Err(Error::Unsupported(format!(
                    "incremental fetch of data rows: {}",
                    base.description()
                )))
            }
        };

        let id_query = IncrementalQuery::new(base.clone()).with_originating_query(base.description());
        let rows = self.incremental_rows(&id_query)?;
        let ids = rows
            .iter()
            .map(|row| {
                descriptor.object_id_for(&row.root).ok_or_else(|| Error::MissingIdentity {
                    entity: descriptor.entity_name().to_string(),
                    column: descriptor.missing_key_column(&row.root).unwrap_or_default().to_string(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let page_size = match md.page_size() {
            0 => runtime.config().default_page_size,
            size => size,
        };
        let mut list = IncrementalFaultList::new(base, ids, page_size);
        list.resolve_page(0, self)?;
        Ok(list)
    }

    /// Resolve relationship `name` of `object`, fetching the related
    /// objects unless they are registered already. A resolved relationship
    /// is returned as it is.
    pub fn resolve_relationship(&mut self, object: &ObjectRef, name: &str) -> Result<Property> {
        let runtime = self.runtime.clone();
        let (entity, current) = {
            let guard = object.read();
            (guard.entity_name().to_string(), guard.read_property(name))
        };
        let fault = match current {
            Some(resolved @ (Property::ToOne(_) | Property::ToMany(_))) => return Ok(resolved),
            other => other,
        };
        if let Some(Property::ToOneFault(id)) = &fault {
            if let Some(target) = self.graph.get(id) {
                let property = Property::ToOne(Some(target));
                object.write().write_property(name, property.clone());
                return Ok(property);
            }
        }

        let snapshot = runtime.resolver().snapshot()?;
        let step = relationship_step(&snapshot, &entity, name)?;
        let max_keys = runtime.adapter().capabilities().max_id_qualifier_size;
        let parents = [object.clone()];
        let mut targets = Vec::new();
        for query in by_id_queries(&step, &parents, &self.graph, max_keys) {
            targets.extend(self.fetch_plain(&query)?);
        }
        connect(&step, Some(&parents), &targets, &self.graph);

        let resolved = object.read().read_property(name).filter(|p| !p.is_fault());
        let property = match resolved {
            Some(property) => property,
            None => {
                let empty = if step.relationship.to_many {
                    Property::ToMany(Vec::new())
                } else {
                    Property::ToOne(None)
                };
                object.write().write_property(name, empty.clone());
                empty
            }
        };
        debug!(entity = %entity, relationship = name, objects = targets.len(), "resolved relationship");
        Ok(property)
    }

    /// Drop cached results and re-read registered objects, returning the
    /// objects read again.
    pub fn refresh(&mut self, refresh: &RefreshQuery) -> Result<Vec<ObjectRef>> {
        let runtime = self.runtime.clone();
        let ids: Vec<ObjectId> = match refresh.target() {
            RefreshTarget::All => {
                self.local_cache.clear();
                runtime.shared_cache().clear();
                self.graph.objects().map(|(id, _)| id.clone()).collect()
            }
            RefreshTarget::Objects(ids) => ids.clone(),
            RefreshTarget::Query(query) => {
                let md = query.metadata(runtime.resolver())?;
                if let Some(key) = md.cache_key() {
                    self.local_cache.remove(key);
                    runtime.shared_cache().remove(key);
                }
                Vec::new()
            }
            RefreshTarget::Groups(groups) => {
                for group in groups {
                    self.local_cache.invalidate_group(group);
                    runtime.shared_cache().invalidate_group(group);
                }
                Vec::new()
            }
        };
        let objects = self.refetch_objects(&ids)?;
        info!(query = %refresh.description(), objects = objects.len(), "refreshed");
        Ok(objects)
    }

    /// Re-read committed objects by primary key. To-many lists revert to
    /// faults; objects whose row is gone are unregistered.
    fn refetch_objects(&mut self, ids: &[ObjectId]) -> Result<Vec<ObjectRef>> {
        let mut by_entity: BTreeMap<(String, Vec<String>), Vec<ObjectId>> = BTreeMap::new();
        for id in ids {
            let Some(object) = self.graph.get(id) else {
                continue;
            };
            let mut guard = object.write();
            if guard.persistence_state() != PersistenceState::Committed {
                continue;
            }
            for name in guard.property_names() {
                if matches!(guard.read_property(&name), Some(Property::ToMany(_))) {
                    guard.write_property(&name, Property::ToManyFault);
                }
            }
            let columns = id.key().keys().cloned().collect();
            by_entity.entry((id.entity_name().to_string(), columns)).or_default().push(id.clone());
        }

        let max_keys = self.runtime.adapter().capabilities().max_id_qualifier_size;
        let mut refreshed = Vec::new();
        for ((entity, columns), ids) in by_entity {
            let keys: Vec<Vec<Value>> = ids.iter().map(|id| id.key().values().cloned().collect()).collect();
            let chunk = if max_keys == 0 { keys.len() } else { max_keys };
            let mut found = HashSet::new();
            for (n, chunk) in keys.chunks(chunk).enumerate() {
                let query = SelectQuery::new(entity.as_str())
                    .named(format!("refresh {entity}.{n}"))
                    .where_(key_qualifier(&columns, chunk));
                for object in self.fetch_plain(&query)? {
                    if let Some(id) = object.read().object_id().cloned() {
                        found.insert(id);
                    }
                    refreshed.push(object);
                }
            }
            for id in ids.iter().filter(|id| !found.contains(*id)) {
                if let Some(object) = self.graph.remove(id) {
                    object.write().set_persistence_state(PersistenceState::Transient);
                    debug!(object_id = %id, "refreshed object no longer exists");
                }
            }
        }
        Ok(refreshed)
    }

    fn incremental_rows(&mut self, query: &IncrementalQuery) -> Result<Arc<Vec<ReadRow>>> {
        let runtime = self.runtime.clone();
        let md = query.metadata(runtime.resolver())?;
        let description = query.description();
        let (rows, _) = self.cached_rows(&md, |ctx, snapshot| {
            let action = translate_incremental(query, runtime.resolver(), runtime.adapter())?;
            ctx.read_select(&description, &action, snapshot)
        })?;
        Ok(rows)
    }

    /// Rows from the cache the query asks for, loading them on a miss.
    fn cached_rows(
        &mut self,
        md: &QueryMetadata,
        load: impl FnOnce(&mut Self, &MappingSnapshot) -> Result<Vec<ReadRow>>,
    ) -> Result<(Arc<Vec<ReadRow>>, bool)> {
        let runtime = self.runtime.clone();
        let strategy = md.cache_strategy();
        let key = md.cache_key().filter(|_| strategy.is_cached()).map(str::to_string);

        if let Some(key) = key.as_deref().filter(|_| strategy.reads_cache()) {
            let hit = if strategy.is_local() {
                match self.local_cache.get(key) {
                    Some(LocalEntry::Rows(rows)) => Some(rows),
                    _ => None,
                }
            } else {
                runtime.shared_cache().get(key)
            };
            if let Some(rows) = hit {
                trace!(key, local = strategy.is_local(), "query cache hit");
                return Ok((rows, true));
            }
            trace!(key, local = strategy.is_local(), "query cache miss");
        }

        let snapshot = runtime.resolver().snapshot()?;
        let rows = Arc::new(load(self, &snapshot)?);
        if let Some(key) = key {
            let groups = cache_groups(md);
            if strategy.is_local() {
                self.local_cache.put(key, LocalEntry::Rows(rows.clone()), &groups);
            } else {
                runtime.shared_cache().put(key, rows.clone(), &groups);
            }
        }
        Ok((rows, false))
    }

    fn read_select(&mut self, description: &str, action: &SelectAction, snapshot: &MappingSnapshot) -> Result<Vec<ReadRow>> {
        self.log_statement(&action.sql, action.bindings.len());
        let reader = RowReader::new(&action.result, snapshot, self.runtime.adapter(), &action.sql)?;
        let source = self
            .connection
            .query(&action.sql, &binding_values(&action.bindings))
            .map_err(|e| Error::execution(description, &action.sql, e))?;
        ResultIterator::new(&reader, source, action.paging).collect()
    }

    fn select_objects(&mut self, query: &SelectQuery, md: &QueryMetadata) -> Result<Vec<ObjectRef>> {
        let runtime = self.runtime.clone();
        let descriptor = md
            .class_descriptor()
            .cloned()
            .ok_or_else(|| Error::Unsupported(format!("object select without an entity: {}", query.description())))?;
        let strategy = md.cache_strategy();
        let cache_key = md.cache_key().filter(|_| strategy.is_cached()).map(str::to_string);
        let groups = cache_groups(md);

        if let Some(key) = cache_key.as_deref().filter(|_| strategy.is_local() && strategy.reads_cache()) {
            if let Some(LocalEntry::Objects(ids)) = self.local_cache.get(key) {
                let cached: Option<Vec<ObjectRef>> = ids.iter().map(|id| self.graph.get(id)).collect();
                if let Some(objects) = cached {
                    trace!(key, "local cache hit");
                    self.notify_fetch(query.description(), Some(descriptor.entity_name()), objects.len(), true);
                    return Ok(objects);
                }
            }
        }

        let snapshot = runtime.resolver().snapshot()?;
        let steps = match md.prefetch_tree() {
            Some(tree) => PrefetchRouter::route(&snapshot, &descriptor, query.qualifier(), tree)?,
            None => Vec::new(),
        };

        let shared = strategy.is_cached() && !strategy.is_local();
        let shared_hit = cache_key
            .as_deref()
            .filter(|_| shared && strategy.reads_cache())
            .and_then(|key| runtime.shared_cache().get(key));
        let from_cache = shared_hit.is_some();

        let rows = match shared_hit {
            Some(rows) => {
                trace!(query = %query.description(), "shared cache hit");
                rows
            }
            None => {
                let action = translate_select(query, md, &snapshot, runtime.adapter())?;
                let rows = Arc::new(self.read_select(&query.description(), &action, &snapshot)?);
                if let Some(key) = cache_key.clone().filter(|_| shared) {
                    runtime.shared_cache().put(key, rows.clone(), &groups);
                }
                rows
            }
        };
        let (roots, mut fetched) = self.merge_rows(&snapshot, &steps, &rows)?;

        fetched.insert(String::new(), roots.clone());
        self.run_disjoint_steps(&steps, &mut fetched)?;

        if let Some(key) = cache_key.filter(|_| strategy.is_local()) {
            let ids = roots.iter().filter_map(|o| o.read().object_id().cloned()).collect();
            self.local_cache.put(key, LocalEntry::Objects(ids), &groups);
        }
        self.notify_fetch(query.description(), Some(descriptor.entity_name()), roots.len(), from_cache);
        Ok(roots)
    }

    /// Materialize rows as distinct objects, in first-seen order.
    fn materialize_rows(&mut self, snapshot: &MappingSnapshot, rows: &[DataRow]) -> Result<Vec<ObjectRef>> {
        let runtime = self.runtime.clone();
        let materializer = Materializer::new(runtime.resolver(), snapshot);
        let mut seen = HashSet::new();
        let mut objects = Vec::new();
        for row in rows {
            let object = materializer.materialize(row, &mut self.graph)?;
            if seen.insert(ptr(&object)) {
                objects.push(object);
            }
        }
        Ok(objects)
    }

    /// Merge root and joint rows, linking joint objects to their parents.
    fn merge_rows(
        &mut self,
        snapshot: &MappingSnapshot,
        steps: &[PrefetchStep],
        rows: &[ReadRow],
    ) -> Result<(Vec<ObjectRef>, HashMap<String, Vec<ObjectRef>>)> {
        let runtime = self.runtime.clone();
        let materializer = Materializer::new(runtime.resolver(), snapshot);
        let joint: Vec<&PrefetchStep> = steps.iter().filter(|s| s.strategy == PrefetchStrategy::Joint).collect();

        let mut roots = Vec::new();
        let mut seen: HashSet<(String, usize)> = HashSet::new();
        let mut fetched: HashMap<String, Vec<ObjectRef>> = HashMap::new();
        let mut lists = JointLists::default();

        for row in rows {
            let root = materializer.materialize(&row.root, &mut self.graph)?;
            if seen.insert((String::new(), ptr(&root))) {
                roots.push(root.clone());
            }
            let mut row_objects: HashMap<&str, Option<ObjectRef>> = HashMap::new();
            row_objects.insert("", Some(root));

            for step in &joint {
                let child = match row.joint_row(&step.path) {
                    Some(joint_row) => Some(materializer.materialize(joint_row, &mut self.graph)?),
                    None => None,
                };
                if let Some(child) = &child {
                    if seen.insert((step.path.clone(), ptr(child))) {
                        fetched.entry(step.path.clone()).or_default().push(child.clone());
                    }
                }
                if !step.parent_phantom {
                    if let Some(Some(parent)) = row_objects.get(step.parent_path.as_str()) {
                        if step.relationship.to_many {
                            lists.add(parent, &step.relationship.name, child.clone());
                        } else {
                            parent
                                .write()
                                .write_property(&step.relationship.name, Property::ToOne(child.clone()));
                        }
                    }
                }
                row_objects.insert(step.path.as_str(), child);
            }
        }
        lists.apply();

        for step in joint.iter().filter(|s| s.parent_phantom) {
            let targets = fetched.get(&step.path).cloned().unwrap_or_default();
            connect(step, None, &targets, &self.graph);
        }
        Ok((roots, fetched))
    }

    /// Fetch disjoint prefetches in tree order.
    fn run_disjoint_steps(&mut self, steps: &[PrefetchStep], fetched: &mut HashMap<String, Vec<ObjectRef>>) -> Result<()> {
        let max_keys = self.runtime.adapter().capabilities().max_id_qualifier_size;
        for step in steps {
            let (targets, parents) = match step.strategy {
                PrefetchStrategy::Joint => continue,
                PrefetchStrategy::Disjoint => {
                    let Some(query) = &step.query else {
                        continue;
                    };
                    let targets = self.fetch_plain(query)?;
                    let parents = if step.parent_phantom {
                        None
                    } else {
                        fetched.get(&step.parent_path).cloned()
                    };
                    (targets, parents)
                }
                PrefetchStrategy::DisjointById => {
                    let parents = fetched.get(&step.parent_path).cloned().unwrap_or_default();
                    let mut targets = Vec::new();
                    for query in by_id_queries(step, &parents, &self.graph, max_keys) {
                        targets.extend(self.fetch_plain(&query)?);
                    }
                    (targets, Some(parents))
                }
            };
            connect(step, parents.as_deref(), &targets, &self.graph);
            debug!(path = %step.path, strategy = ?step.strategy, objects = targets.len(), "prefetched");
            fetched.insert(step.path.clone(), targets);
        }
        Ok(())
    }

    /// Fetch the roots of a query without prefetching or caching.
    fn fetch_plain(&mut self, query: &SelectQuery) -> Result<Vec<ObjectRef>> {
        let runtime = self.runtime.clone();
        let md = query.metadata(runtime.resolver())?;
        let snapshot = runtime.resolver().snapshot()?;
        let action = translate_select(query, &md, &snapshot, runtime.adapter())?;
        let rows: Vec<DataRow> = self
            .read_select(&query.description(), &action, &snapshot)?
            .into_iter()
            .map(|r| r.root)
            .collect();
        self.materialize_rows(&snapshot, &rows)
    }

    /// Labeled driver rows as objects of `entity`, or as data rows.
    fn labeled_rows(
        &mut self,
        sql: &str,
        entity: Option<&str>,
        columns: &[String],
        raw: Vec<Vec<Value>>,
    ) -> Result<(Vec<DataRow>, Option<Vec<ObjectRef>>)> {
        let runtime = self.runtime.clone();
        let snapshot = runtime.resolver().snapshot()?;
        let result = descriptor_for_labels(&snapshot, entity, columns)?;
        let reader = RowReader::new(&result, &snapshot, runtime.adapter(), sql)?;
        let rows = raw
            .into_iter()
            .map(|values| reader.read(values).map(|r| r.root))
            .collect::<Result<Vec<_>>>()?;
        if entity.is_none() {
            return Ok((rows, None));
        }
        let objects = self.materialize_rows(&snapshot, &rows)?;
        Ok((rows, Some(objects)))
    }

    /// Run a raw SQL template.
    pub fn perform_template(&mut self, template: &SqlTemplate) -> Result<QueryResponse> {
        let runtime = self.runtime.clone();
        let md = template.metadata(runtime.resolver())?;
        let action = translate_template(template, runtime.adapter())?;
        let params = binding_values(&action.bindings);
        let description = template.description();
        self.log_statement(&action.sql, params.len());

        if !is_select(&action.sql) {
            let result = self
                .connection
                .execute(&action.sql, &params)
                .map_err(|e| Error::execution(&description, &action.sql, e))?;
            return Ok(QueryResponse::UpdateCounts(vec![result.rows_affected]));
        }

        let (columns, raw) = {
            let mut source = self
                .connection
                .query(&action.sql, &params)
                .map_err(|e| Error::execution(&description, &action.sql, e))?;
            let columns = source.columns().to_vec();
            let raw = read_all(source.as_mut())
                .map_err(|e| Error::execution(&description, &action.sql, e))?;
            (columns, raw)
        };

        let entity = md
            .class_descriptor()
            .filter(|_| !md.is_fetching_data_rows())
            .map(|d| d.entity_name().to_string());
        let (rows, objects) = self.labeled_rows(&action.sql, entity.as_deref(), &columns, raw)?;
        Ok(match objects {
            Some(objects) => {
                self.notify_fetch(description, entity.as_deref(), objects.len(), false);
                QueryResponse::Objects(objects)
            }
            None => {
                self.notify_fetch(description, None, rows.len(), false);
                QueryResponse::DataRows(rows)
            }
        })
    }

    /// Call a stored procedure. The first result set is mapped to the
    /// query's result entity, if it has one.
    pub fn perform_procedure(&mut self, query: &ProcedureQuery) -> Result<ProcedureOutcome> {
        let runtime = self.runtime.clone();
        let md = query.metadata(runtime.resolver())?;
        let snapshot = runtime.resolver().snapshot()?;
        let action = translate_procedure(query, &snapshot, runtime.adapter())?;
        let description = query.description();
        self.log_statement(&action.sql, action.parameters.len());
        let out_first = runtime.adapter().capabilities().out_params_before_results;

        let (raw_results, raw_out) = {
            let failed = |e| Error::execution(&description, &action.sql, e);
            let mut results = self
                .connection
                .call_procedure(&action.sql, &action.parameters)
                .map_err(failed)?;
            let mut out = if out_first {
                Some(results.out_parameters().map_err(failed)?)
            } else {
                None
            };
            let mut raw = Vec::new();
            while let Some(result) = results.next_result().map_err(failed)? {
                raw.push(result);
            }
            if out.is_none() {
                out = Some(results.out_parameters().map_err(failed)?);
            }
            (raw, out.unwrap_or_default())
        };

        let mut outcome = ProcedureOutcome::default();
        let mut entity = md
            .class_descriptor()
            .filter(|_| !md.is_fetching_data_rows())
            .map(|d| d.entity_name().to_string());
        for result in raw_results {
            match result {
                StatementResult::UpdateCount(count) => outcome.results.push(ProcedureResult::UpdateCount(count)),
                StatementResult::Rows { columns, rows } => {
                    let (rows, objects) = self.labeled_rows(&action.sql, entity.take().as_deref(), &columns, rows)?;
                    outcome.results.push(match objects {
                        Some(objects) => ProcedureResult::Objects(objects),
                        None => ProcedureResult::Rows(rows),
                    });
                }
            }
        }

        for param in action.parameters.iter().filter(|p| p.direction.is_out()) {
            let raw = raw_out.get(&param.name).cloned().unwrap_or(Value::Null);
            let value = runtime
                .adapter()
                .materialize(Some(param.type_name.as_str()), raw)
                .map_err(|f| Error::TypeConversion {
                    entity: action.procedure.clone(),
                    column: param.name.clone(),
                    expected: f.expected,
                    actual: f.actual,
                })?;
            outcome.out_parameters.insert(param.name.clone(), value);
        }
        self.notify_fetch(description, None, outcome.results.len(), false);
        Ok(outcome)
    }

    // ---- changes ----

    /// Create and register a new object of `entity`.
    pub fn new_object(&mut self, entity: &str) -> Result<ObjectRef> {
        let runtime = self.runtime.clone();
        let object = runtime.resolver().object_factory(entity).create(entity);
        self.register_new_object(object.clone())?;
        Ok(object)
    }

    /// Register an object created outside the context as new.
    pub fn register_new_object(&mut self, object: ObjectRef) -> Result<()> {
        let runtime = self.runtime.clone();
        let entity = object.read().entity_name().to_string();
        let descriptor = runtime.resolver().class_descriptor(&entity)?;
        if descriptor.is_abstract() {
            return Err(Error::Mapping(format!("cannot create an object of abstract entity {entity}")));
        }
        {
            let mut guard = object.write();
            if guard.object_id().is_none() {
                guard.set_object_id(ObjectId::temporary(descriptor.root_entity()));
            }
        }
        self.graph.register_new(object.clone())?;
        self.inserted.push(object);
        Ok(())
    }

    /// Mark an object for deletion. A new object is simply forgotten.
    pub fn delete_object(&mut self, object: &ObjectRef) -> Result<()> {
        let (state, id) = {
            let guard = object.read();
            (guard.persistence_state(), guard.object_id().cloned())
        };
        match state {
            PersistenceState::Transient | PersistenceState::Deleted => {}
            PersistenceState::New => {
                if let Some(id) = id {
                    self.graph.remove(&id);
                }
                self.inserted.retain(|o| !Arc::ptr_eq(o, object));
                object.write().set_persistence_state(PersistenceState::Transient);
            }
            PersistenceState::Committed | PersistenceState::Modified => {
                object.write().set_persistence_state(PersistenceState::Deleted);
                self.deleted.push(object.clone());
            }
        }
        Ok(())
    }

    /// Whether any object was created, changed or deleted.
    pub fn has_changes(&self) -> bool {
        !self.inserted.is_empty() || !self.deleted.is_empty() || !self.modified_objects().is_empty()
    }

    fn modified_objects(&self) -> Vec<ObjectRef> {
        let mut modified: Vec<(String, ObjectRef)> = self
            .graph
            .objects_in_state(PersistenceState::Modified)
            .into_iter()
            .map(|o| {
                let key = o.read().object_id().map(|id| id.to_string()).unwrap_or_default();
                (key, o)
            })
            .collect();
        modified.sort_by(|a, b| a.0.cmp(&b.0));
        modified.into_iter().map(|(_, o)| o).collect()
    }

    fn run_batches(&mut self, batches: Vec<BatchQuery>) -> Result<Vec<BatchReport>> {
        let runtime = self.runtime.clone();
        let mut engine = BatchEngine::from_batches(runtime.adapter(), batches).log_sql(runtime.config().log_sql);
        engine.execute(&mut self.connection)?;
        Ok(engine.into_reports())
    }

    fn run_changes(&mut self, changes: Vec<RowChange>, report: &mut CommitReport) -> Result<Vec<GeneratedKey>> {
        if changes.is_empty() {
            return Ok(Vec::new());
        }
        let runtime = self.runtime.clone();
        let mut engine = BatchEngine::new(runtime.adapter(), changes)?.log_sql(runtime.config().log_sql);
        let result = engine.execute(&mut self.connection);
        report.batches.extend(engine.into_reports());
        result
    }

    /// Write all changes: inserts in table dependency order, then updates,
    /// then deletes in reverse order. On failure the objects keep their
    /// states; the caller decides whether to roll back or retry.
    pub fn commit_changes(&mut self) -> Result<CommitReport> {
        let runtime = self.runtime.clone();
        let snapshot = runtime.resolver().snapshot()?;
        let mut report = CommitReport::default();

        let inserted = self.inserted.clone();
        let modified = self.modified_objects();
        let deleted = self.deleted.clone();
        if inserted.is_empty() && modified.is_empty() && deleted.is_empty() {
            return Ok(report);
        }

        // descriptor and tables of every changed object
        let mut plans: Vec<(ObjectRef, Arc<ClassDescriptor>, Vec<TableMapping>)> = Vec::new();
        let mut tables: Vec<String> = Vec::new();
        for object in inserted.iter().chain(&modified).chain(&deleted) {
            let descriptor = descriptor_of(&snapshot, object)?;
            let mappings = table_mappings(&snapshot, &descriptor)?;
            for mapping in &mappings {
                if !tables.contains(&mapping.table) {
                    tables.push(mapping.table.clone());
                }
            }
            plans.push((object.clone(), descriptor, mappings));
        }
        let order = table_order(&snapshot, &tables)?;
        let (insert_plans, rest) = plans.split_at(inserted.len());
        let (update_plans, delete_plans) = rest.split_at(modified.len());

        // inserts, one table at a time so that generated keys reach dependents
        for table in &order {
            let mut changes = Vec::new();
            let mut roots = Vec::new();
            {
                let builder = ChangeBuilder::new(&snapshot, runtime.adapter(), &self.graph);
                for (object, descriptor, mappings) in insert_plans {
                    for mapping in mappings.iter().filter(|m| &m.table == table) {
                        let (change, key) = builder.insert(descriptor, mapping, object)?;
                        if let Some(key) = key {
                            roots.push((object.clone(), descriptor.clone(), key));
                        }
                        changes.push(change);
                    }
                }
            }
            let keys = self.run_changes(changes, &mut report)?;
            self.assign_permanent_ids(roots, &keys)?;
            report.generated_keys.extend(keys);
        }

        // updates
        let mut changes = Vec::new();
        {
            let builder = ChangeBuilder::new(&snapshot, runtime.adapter(), &self.graph);
            for table in &order {
                for (object, descriptor, mappings) in update_plans {
                    for mapping in mappings.iter().filter(|m| &m.table == table) {
                        if let Some(change) = builder.update(descriptor, mapping, object)? {
                            changes.push(change);
                        }
                    }
                }
            }
        }
        self.run_changes(changes, &mut report)?;

        // deletes, dependent tables first
        let mut changes = Vec::new();
        {
            let builder = ChangeBuilder::new(&snapshot, runtime.adapter(), &self.graph);
            for table in order.iter().rev() {
                for (object, descriptor, mappings) in delete_plans {
                    for mapping in mappings.iter().filter(|m| &m.table == table) {
                        changes.push(builder.delete(descriptor, mapping, object)?);
                    }
                }
            }
        }
        self.run_changes(changes, &mut report)?;

        // post-commit bookkeeping
        let mut touched: Vec<String> = tables.clone();
        for (index, (object, descriptor, _)) in insert_plans.iter().chain(update_plans).enumerate() {
            let id = {
                let mut guard = object.write();
                guard.set_persistence_state(PersistenceState::Committed);
                guard.clear_dirty();
                guard.object_id().cloned()
            };
            if let Some(id) = id {
                let row = object_row(descriptor, &*object.read());
                self.graph.set_snapshot(id.clone(), row);
                if index < insert_plans.len() {
                    report.inserted.push(id);
                } else {
                    report.updated.push(id);
                }
            }
            if !touched.iter().any(|t| t == descriptor.root_entity()) {
                touched.push(descriptor.root_entity().to_string());
            }
        }
        for (object, descriptor, _) in delete_plans {
            let id = object.read().object_id().cloned();
            if let Some(id) = id {
                self.graph.remove(&id);
                report.deleted.push(id);
            }
            object.write().set_persistence_state(PersistenceState::Transient);
            if !touched.iter().any(|t| t == descriptor.root_entity()) {
                touched.push(descriptor.root_entity().to_string());
            }
        }
        self.inserted.clear();
        self.deleted.clear();

        self.local_cache.clear();
        for group in &touched {
            runtime.shared_cache().invalidate_group(group);
        }

        info!(
            inserted = report.inserted.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            batches = report.batches.len(),
            "committed changes"
        );
        runtime.listener().did_commit(&report);
        Ok(report)
    }

    /// Replace temporary ids of objects whose root row was inserted.
    fn assign_permanent_ids(
        &mut self,
        inserted: Vec<(ObjectRef, Arc<ClassDescriptor>, PendingKey)>,
        keys: &[GeneratedKey],
    ) -> Result<()> {
        for (object, descriptor, key) in inserted {
            let Some(temporary) = object.read().object_id().cloned() else {
                continue;
            };
            let mut values = key.supplied;
            if let Some(column) = &key.generated {
                let generated = keys
                    .iter()
                    .find(|k| k.object_id == temporary && &k.column == column)
                    .ok_or_else(|| Error::MissingIdentity {
                        entity: descriptor.entity_name().to_string(),
                        column: column.clone(),
                    })?;
                values.insert(column.clone(), generated.value.clone());
                let mapped = descriptor
                    .attributes()
                    .iter()
                    .find(|a| a.primary_key && &a.column == column && !a.db_path.contains('.'));
                if let Some(attribute) = mapped {
                    object
                        .write()
                        .write_property(&attribute.name, Property::Value(generated.value.clone()));
                }
            }
            let permanent = ObjectId::new(descriptor.root_entity(), values);
            trace!(from = %temporary, to = %permanent, "assigned permanent id");
            self.graph.replace_id(&temporary, permanent);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::listener::MemoryListener;
    use crate::config::{AdapterCapabilities, RuntimeConfig};
    use crate::error::{DriverError, ErrorKind};
    use crate::fixtures::{gallery_resolver, MockConnection, MockProcedure};
    use crate::access::connection::UpdateResult;
    use crate::object::set_property;
    use ormgraph_proto::{Expression, PrefetchSemantics};
    use pretty_assertions::assert_eq;

    const ARTIST_COLUMNS: &[&str] = &["ARTIST_ID", "ARTIST_NAME", "DATE_OF_BIRTH"];
    const PAINTING_COLUMNS: &[&str] = &["PAINTING_ID", "PAINTING_TITLE", "ESTIMATED_PRICE", "ARTIST_ID", "GALLERY_ID"];

    fn runtime(adapter: AdapterCapabilities) -> Arc<Runtime> {
        Arc::new(Runtime::new(Arc::new(gallery_resolver()), RuntimeConfig::new(adapter)))
    }

    fn artist(id: i64, name: &str) -> Vec<Value> {
        vec![Value::Int64(id), Value::from(name), Value::Null]
    }

    fn painting(id: i64, title: &str, artist: i64) -> Vec<Value> {
        vec![Value::Int64(id), Value::from(title), Value::Int64(10), Value::Int64(artist), Value::Null]
    }

    fn value(object: &ObjectRef, name: &str) -> Option<Value> {
        object.read().read_property(name).and_then(|p| p.as_value().cloned())
    }

    #[test]
    fn test_select_keeps_one_instance_per_identity() {
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet"), artist(2, "Manet")]);
        conn.push_rows(ARTIST_COLUMNS, vec![artist(2, "Manet")]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let all = context.select(&SelectQuery::new("Artist")).unwrap();
        let one = context
            .select(&SelectQuery::new("Artist").where_(Expression::path("artistName").eq("Manet")))
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(Arc::ptr_eq(&all[1], &one[0]));
        assert_eq!(context.graph().len(), 2);
        assert_eq!(value(&all[0], "artistName"), Some(Value::from("Monet")));
        assert_eq!(all[0].read().persistence_state(), PersistenceState::Committed);
    }

    #[test]
    fn test_driver_failure_names_the_query() {
        let mut conn = MockConnection::new();
        conn.push_query_error(DriverError::new("database is locked").retryable());
        conn.push_query_error(DriverError::new("no such table: ARTIST"));
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let err = context.select(&SelectQuery::new("Artist").named("all artists")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert!(err.is_retryable());
        match &err {
            Error::Execution { query, sql, .. } => {
                assert_eq!(query, "all artists");
                assert!(sql.ends_with("FROM ARTIST t0"), "{sql}");
            }
            other => panic!("expected an execution error, got {other:?}"),
        }

        let err = context.select_data_rows(&SelectQuery::new("Artist").data_rows()).unwrap_err();
        assert!(!err.is_retryable());
        assert!(context.graph().is_empty());
    }

    #[test]
    fn test_data_rows_and_objects_are_not_mixed() {
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let query = SelectQuery::new("Artist").data_rows();
        assert!(matches!(context.select(&query), Err(Error::Unsupported(_))));
        let rows = context.select_data_rows(&query).unwrap();
        assert_eq!(rows[0].get("ARTIST_NAME"), Some(&Value::from("Monet")));
        assert!(context.graph().is_empty());
        assert!(matches!(
            context.select_data_rows(&SelectQuery::new("Artist")),
            Err(Error::Unsupported(_))
        ));
    }

    #[test]
    fn test_disjoint_prefetch_resolves_lists() {
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet"), artist(2, "Manet")]);
        conn.push_rows(PAINTING_COLUMNS, vec![painting(10, "Irises", 1), painting(11, "Poppies", 1)]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let query = SelectQuery::new("Artist")
            .prefetch("paintingArray", PrefetchSemantics::Disjoint)
            .unwrap();
        let artists = context.select(&query).unwrap();
        assert_eq!(context.connection().executed().len(), 2);

        let monet = artists[0].read().read_property("paintingArray");
        let manet = artists[1].read().read_property("paintingArray");
        assert_eq!(monet.as_ref().and_then(Property::as_list).map(<[_]>::len), Some(2));
        assert_eq!(manet.as_ref().and_then(Property::as_list).map(<[_]>::len), Some(0));
        let irises = context.graph().get(&ObjectId::single("Painting", "PAINTING_ID", 10)).unwrap();
        assert_eq!(irises.read().read_property("toArtist"), Some(Property::ToOne(Some(artists[0].clone()))));
    }

    /// Queue one painting joined with its artist, laid out the way the
    /// translated query reads it.
    fn push_painting_with_artist(context: &mut DataContext<MockConnection>, query: &SelectQuery) {
        let runtime = context.runtime().clone();
        let md = query.metadata(runtime.resolver()).unwrap();
        let snapshot = runtime.resolver().snapshot().unwrap();
        let action = translate_select(query, &md, &snapshot, runtime.adapter()).unwrap();

        let labels: Vec<&str> = action.result.columns.iter().map(|c| c.label.as_str()).collect();
        let mut values = vec![Value::Null; labels.len()];
        let index = |label: &str| labels.iter().position(|l| *l == label).unwrap();
        values[index("PAINTING_ID")] = Value::Int64(10);
        values[index("PAINTING_TITLE")] = Value::from("Irises");
        values[index("ARTIST_ID")] = Value::Int64(1);
        values[index("toArtist.ARTIST_ID")] = Value::Int64(1);
        values[index("toArtist.ARTIST_NAME")] = Value::from("Monet");
        context.connection_mut().push_rows(&labels, vec![values]);
    }

    #[test]
    fn test_joint_prefetch_links_to_one() {
        let query = SelectQuery::new("Painting")
            .prefetch("toArtist", PrefetchSemantics::Joint)
            .unwrap();
        let mut context = runtime(AdapterCapabilities::generic()).new_context(MockConnection::new());
        push_painting_with_artist(&mut context, &query);

        let paintings = context.select(&query).unwrap();
        let monet = context.graph().get(&ObjectId::single("Artist", "ARTIST_ID", 1)).unwrap();
        assert_eq!(paintings[0].read().read_property("toArtist"), Some(Property::ToOne(Some(monet.clone()))));
        assert_eq!(value(&monet, "artistName"), Some(Value::from("Monet")));
        assert_eq!(context.connection().executed().len(), 1);
    }

    #[test]
    fn test_local_and_shared_cache() {
        let listener = Arc::new(MemoryListener::default());
        let runtime = Arc::new(
            Runtime::new(Arc::new(gallery_resolver()), RuntimeConfig::default()).with_listener(listener.clone()),
        );

        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        let mut first = runtime.new_context(conn);
        let local = SelectQuery::new("Artist").local_cache();
        let a = first.select(&local).unwrap();
        let b = first.select(&local).unwrap();
        assert!(Arc::ptr_eq(&a[0], &b[0]));
        assert_eq!(first.connection().executed().len(), 1);

        let shared = SelectQuery::new("Artist").shared_cache();
        first.select(&shared).unwrap();
        let mut second = runtime.new_context(MockConnection::new());
        let objects = second.select(&shared).unwrap();
        assert_eq!(value(&objects[0], "artistName"), Some(Value::from("Monet")));
        assert!(second.connection().executed().is_empty());
        assert!(!Arc::ptr_eq(&objects[0], &a[0]));

        let from_cache: Vec<bool> = listener.fetches().iter().map(|e| e.from_cache).collect();
        assert_eq!(from_cache, vec![false, true, false, true]);
    }

    #[test]
    fn test_shared_cache_hit_keeps_joint_prefetch() {
        let runtime = runtime(AdapterCapabilities::generic());
        let query = SelectQuery::new("Painting")
            .prefetch("toArtist", PrefetchSemantics::Joint)
            .unwrap()
            .shared_cache();
        let mut first = runtime.new_context(MockConnection::new());
        push_painting_with_artist(&mut first, &query);
        first.select(&query).unwrap();

        let mut second = runtime.new_context(MockConnection::new());
        let paintings = second.select(&query).unwrap();
        assert!(second.connection().executed().is_empty());
        let monet = second.graph().get(&ObjectId::single("Artist", "ARTIST_ID", 1)).unwrap();
        assert_eq!(paintings[0].read().read_property("toArtist"), Some(Property::ToOne(Some(monet.clone()))));
        assert_eq!(value(&monet, "artistName"), Some(Value::from("Monet")));
    }

    #[test]
    fn test_id_rows_and_full_rows_share_one_cache() {
        let runtime = runtime(AdapterCapabilities::generic());
        let base = SelectQuery::new("Artist").shared_cache();

        let mut conn = MockConnection::new();
        conn.push_rows(&["ARTIST_ID"], vec![vec![Value::Int64(1)]]);
        let mut first = runtime.new_context(conn);
        let response = first.perform_query(IncrementalQuery::new(Arc::new(base.clone()))).unwrap();
        assert_eq!(response.data_rows().len(), 1);
        assert!(!response.data_rows()[0].contains("ARTIST_NAME"));

        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        let mut second = runtime.new_context(conn);
        let artists = second.select(&base).unwrap();
        assert_eq!(value(&artists[0], "artistName"), Some(Value::from("Monet")));
        assert_eq!(second.connection().executed().len(), 1);

        // Both entries now served from the cache; only the page is fetched.
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        let mut third = runtime.new_context(conn);
        let mut list = third.perform_incremental(base.clone()).unwrap();
        assert_eq!(list.len(), 1);
        assert!(third.select(&base).is_ok());
        assert_eq!(third.connection().executed().len(), 1);
        assert!(list.get(0, &mut third).unwrap().is_some());
    }

    #[test]
    fn test_resolve_to_many_fault() {
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        conn.push_rows(PAINTING_COLUMNS, vec![painting(10, "Irises", 1), painting(11, "Poppies", 1)]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let monet = context.select(&SelectQuery::new("Artist")).unwrap().remove(0);
        assert_eq!(monet.read().read_property("paintingArray"), Some(Property::ToManyFault));

        let resolved = context.resolve_relationship(&monet, "paintingArray").unwrap();
        let paintings = resolved.as_list().unwrap().to_vec();
        assert_eq!(paintings.len(), 2);
        assert_eq!(monet.read().read_property("paintingArray"), Some(resolved.clone()));
        assert_eq!(paintings[0].read().read_property("toArtist"), Some(Property::ToOne(Some(monet.clone()))));
        let sql = context.connection().executed_sql();
        assert!(sql[1].ends_with("WHERE t0.ARTIST_ID IN (?)"), "{}", sql[1]);

        assert_eq!(context.resolve_relationship(&monet, "paintingArray").unwrap(), resolved);
        assert_eq!(context.connection().executed().len(), 2);
        assert!(matches!(
            context.resolve_relationship(&monet, "galleries"),
            Err(Error::UnknownRelationship { .. })
        ));
    }

    #[test]
    fn test_resolve_to_one_fault() {
        let mut conn = MockConnection::new();
        conn.push_rows(PAINTING_COLUMNS, vec![painting(10, "Irises", 1), painting(11, "Poppies", 1)]);
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let paintings = context.select(&SelectQuery::new("Painting")).unwrap();
        let monet_id = ObjectId::single("Artist", "ARTIST_ID", 1);
        assert_eq!(paintings[0].read().read_property("toArtist"), Some(Property::ToOneFault(monet_id.clone())));

        let resolved = context.resolve_relationship(&paintings[0], "toArtist").unwrap();
        let monet = context.graph().get(&monet_id).unwrap();
        assert_eq!(resolved, Property::ToOne(Some(monet.clone())));
        assert_eq!(value(&monet, "artistName"), Some(Value::from("Monet")));
        let sql = context.connection().executed_sql();
        assert!(sql[1].ends_with("WHERE t0.ARTIST_ID IN (?)"), "{}", sql[1]);

        // The target is registered now, so no further fetch.
        let resolved = context.resolve_relationship(&paintings[1], "toArtist").unwrap();
        assert_eq!(resolved, Property::ToOne(Some(monet)));
        assert_eq!(context.connection().executed().len(), 2);
    }

    #[test]
    fn test_refresh_rereads_objects_in_place() {
        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet"), artist(2, "Manet")]);
        conn.push_rows(PAINTING_COLUMNS, vec![painting(10, "Irises", 1)]);
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Claude Monet")]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let artists = context.select(&SelectQuery::new("Artist")).unwrap();
        context.resolve_relationship(&artists[0], "paintingArray").unwrap();

        let response = context.perform_query(RefreshQuery::objects(&artists)).unwrap();
        assert_eq!(response.objects().len(), 1);
        assert!(Arc::ptr_eq(&response.objects()[0], &artists[0]));
        assert_eq!(value(&artists[0], "artistName"), Some(Value::from("Claude Monet")));
        assert_eq!(artists[0].read().read_property("paintingArray"), Some(Property::ToManyFault));
        assert_eq!(artists[0].read().persistence_state(), PersistenceState::Committed);

        // Gone from the database.
        assert_eq!(artists[1].read().persistence_state(), PersistenceState::Transient);
        assert!(!context.graph().contains(&ObjectId::single("Artist", "ARTIST_ID", 2)));
        let sql = context.connection().executed_sql();
        assert!(sql[2].ends_with("WHERE t0.ARTIST_ID IN (?, ?)"), "{}", sql[2]);
    }

    #[test]
    fn test_refresh_drops_cached_results() {
        let runtime = runtime(AdapterCapabilities::generic());
        let mut conn = MockConnection::new();
        for _ in 0..3 {
            conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        }
        let mut context = runtime.new_context(conn);

        let local = SelectQuery::new("Artist").local_cache().cache_group("X");
        context.select(&local).unwrap();
        context.select(&local).unwrap();
        assert_eq!(context.connection().executed().len(), 1);

        assert!(context.refresh(&RefreshQuery::query(local.clone())).unwrap().is_empty());
        context.select(&local).unwrap();
        assert_eq!(context.connection().executed().len(), 2);

        context.refresh(&RefreshQuery::groups(["X"])).unwrap();
        context.select(&local).unwrap();
        assert_eq!(context.connection().executed().len(), 3);

        let shared = SelectQuery::new("Gallery").shared_cache();
        context
            .connection_mut()
            .push_rows(&["GALLERY_ID", "GALLERY_NAME"], vec![vec![Value::Int64(1), "Louvre".into()]]);
        context.select(&shared).unwrap();
        assert_eq!(runtime.shared_cache().len(), 1);

        let mut conn = MockConnection::new();
        conn.push_rows(ARTIST_COLUMNS, vec![artist(1, "Monet")]);
        conn.push_rows(&["GALLERY_ID", "GALLERY_NAME"], vec![vec![Value::Int64(1), "Louvre".into()]]);
        *context.connection_mut() = conn;
        let refreshed = context.refresh(&RefreshQuery::all()).unwrap();
        assert_eq!(refreshed.len(), 2);
        assert!(runtime.shared_cache().is_empty());
    }

    #[test]
    fn test_incremental_list_resolves_pages() {
        let mut conn = MockConnection::new();
        conn.push_rows(&["GALLERY_ID"], vec![vec![Value::Int64(1)], vec![Value::Int64(2)], vec![Value::Int64(3)]]);
        conn.push_rows(
            &["GALLERY_ID", "GALLERY_NAME"],
            vec![vec![Value::Int64(1), "Louvre".into()], vec![Value::Int64(2), "Orsay".into()]],
        );
        conn.push_rows(&["GALLERY_ID", "GALLERY_NAME"], vec![vec![Value::Int64(3), "Prado".into()]]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let mut list = context.perform_incremental(SelectQuery::new("Gallery").page_size(2)).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.page_count(), 2);
        assert_eq!(list.resolved_count(), 2);
        assert!(!list.is_resolved(2));

        let prado = list.get(2, &mut context).unwrap().unwrap();
        assert_eq!(value(&prado, "galleryName"), Some(Value::from("Prado")));
        assert_eq!(list.resolve_all(&mut context).unwrap().len(), 3);

        let sql = context.connection().executed_sql();
        assert_eq!(sql.len(), 3);
        assert_eq!(sql[0], "SELECT t0.GALLERY_ID FROM GALLERY t0");
        assert!(sql[1].ends_with("WHERE t0.GALLERY_ID IN (?, ?)"), "{}", sql[1]);
    }

    #[test]
    fn test_template_objects_and_update_counts() {
        let mut conn = MockConnection::new();
        conn.push_rows(&["ARTIST_ID", "ARTIST_NAME"], vec![vec![Value::Int64(4), "Degas".into()]]);
        conn.push_update(UpdateResult::new(3));
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let response = context
            .perform_query(SqlTemplate::for_entity("Artist", "SELECT ARTIST_ID, ARTIST_NAME FROM ARTIST"))
            .unwrap();
        assert_eq!(value(&response.objects()[0], "artistName"), Some(Value::from("Degas")));

        let response = context
            .perform_query(SqlTemplate::new("DELETE FROM PAINTING WHERE ESTIMATED_PRICE < #bind($p)").with_parameter("p", 5))
            .unwrap();
        assert_eq!(response.update_counts(), &[3]);
    }

    #[test]
    fn test_procedure_out_parameters() {
        let mut conn = MockConnection::new();
        let mut procedure = MockProcedure::default();
        procedure.results.push_back(StatementResult::UpdateCount(7));
        procedure.out.insert("updated".into(), Value::Int64(7));
        conn.push_procedure(procedure);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let outcome = context
            .perform_procedure(&ProcedureQuery::new("update_prices").with_parameter("factor", 1.5))
            .unwrap();
        assert!(matches!(outcome.results[..], [ProcedureResult::UpdateCount(7)]));
        assert_eq!(outcome.out_parameters.get("updated"), Some(&Value::Int64(7)));
    }

    #[test]
    fn test_commit_insert_assigns_generated_key() {
        let listener = Arc::new(MemoryListener::default());
        let runtime = Arc::new(
            Runtime::new(Arc::new(gallery_resolver()), RuntimeConfig::new(AdapterCapabilities::sqlite()))
                .with_listener(listener.clone()),
        );
        let mut conn = MockConnection::new();
        conn.push_update(UpdateResult::new(1).with_generated_key(42i64));
        let mut context = runtime.new_context(conn);

        let monet = context.new_object("Artist").unwrap();
        set_property(&mut *monet.write(), "artistName", Value::from("Monet"));
        assert!(context.has_changes());
        assert!(monet.read().object_id().unwrap().is_temporary());

        let report = context.commit_changes().unwrap();
        let id = ObjectId::single("Artist", "ARTIST_ID", 42i64);
        assert_eq!(report.inserted, vec![id.clone()]);
        assert_eq!(monet.read().object_id(), Some(&id));
        assert_eq!(monet.read().persistence_state(), PersistenceState::Committed);
        assert!(Arc::ptr_eq(&context.graph().get(&id).unwrap(), &monet));
        assert_eq!(
            context.connection().executed_sql(),
            vec!["INSERT INTO ARTIST (ARTIST_NAME, DATE_OF_BIRTH) VALUES (?, ?)"]
        );
        assert!(!context.has_changes());
        assert_eq!(listener.commits().len(), 1);
    }

    #[test]
    fn test_commit_update_lock_failure_keeps_state() {
        let mut conn = MockConnection::new();
        conn.push_rows(PAINTING_COLUMNS, vec![painting(10, "Irises", 1)]);
        conn.push_update(UpdateResult::new(0));
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let irises = context.select(&SelectQuery::new("Painting")).unwrap().remove(0);
        set_property(&mut *irises.write(), "paintingTitle", Value::from("Iris"));
        assert_eq!(irises.read().persistence_state(), PersistenceState::Modified);

        let err = context.commit_changes().unwrap_err();
        match err {
            Error::BatchFailed { source, .. } => {
                assert!(matches!(*source, Error::OptimisticLockFailure { .. }))
            }
            other => panic!("expected a batch failure, got {other:?}"),
        }
        assert_eq!(irises.read().persistence_state(), PersistenceState::Modified);
        assert!(context.connection().executed_sql()[1].starts_with("UPDATE PAINTING SET PAINTING_TITLE = ?"));
    }

    #[test]
    fn test_delete_and_forget_new() {
        let mut conn = MockConnection::new();
        conn.push_rows(&["GALLERY_ID", "GALLERY_NAME"], vec![vec![Value::Int64(1), "Louvre".into()]]);
        let mut context = runtime(AdapterCapabilities::generic()).new_context(conn);

        let louvre = context.select(&SelectQuery::new("Gallery")).unwrap().remove(0);
        let fresh = context.new_object("Gallery").unwrap();
        context.delete_object(&fresh).unwrap();
        assert_eq!(fresh.read().persistence_state(), PersistenceState::Transient);

        context.delete_object(&louvre).unwrap();
        let report = context.commit_changes().unwrap();
        assert_eq!(report.deleted, vec![ObjectId::single("Gallery", "GALLERY_ID", 1i64)]);
        assert!(report.inserted.is_empty());
        assert!(context.graph().is_empty());
        assert_eq!(louvre.read().persistence_state(), PersistenceState::Transient);
        assert_eq!(context.connection().executed_sql()[1], "DELETE FROM GALLERY WHERE GALLERY_ID = ?");
    }

    #[test]
    fn test_abstract_entity_cannot_be_created() {
        let runtime = Arc::new(Runtime::new(
            Arc::new(crate::fixtures::people_resolver()),
            RuntimeConfig::default(),
        ));
        let mut context = runtime.new_context(MockConnection::new());
        assert!(matches!(context.new_object("AbstractPerson"), Err(Error::Mapping(_))));
    }
}
