//! Prefetch routing.
//!
//! A [`PrefetchRouter`] walks a query's prefetch tree and produces one
//! [`PrefetchStep`] per non-phantom node, in tree order:
//!
//! - joint nodes reachable from the root through joint or phantom nodes are
//!   read from the root query's rows
//! - disjoint nodes get a query of their own, rooted at the target entity
//!   and qualified by the root qualifier carried back along the reverse
//!   relationship path
//! - disjoint-by-id nodes are fetched by the join keys of their already
//!   fetched parents; under a phantom parent there is nothing to take keys
//!   from, so they fall back to disjoint
//!
//! Fetched objects are attached to parents present in the object graph.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use ormgraph_proto::{Expression, PrefetchProcessor, PrefetchTreeNode, Value, OUTER_JOIN_SUFFIX};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::map::{ClassDescriptor, MappingSnapshot, RelationshipDescriptor};
use crate::object::{ObjectGraph, ObjectId, ObjectRef, Property};
use crate::query::SelectQuery;
use crate::translator::select::walk_relationships;
use crate::translator::{prefix_db_paths, to_db_expression};

/// How a prefetch node is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrefetchStrategy {
    Joint,
    Disjoint,
    DisjointById,
}

/// One prefetch node ready to execute.
#[derive(Debug, Clone)]
pub struct PrefetchStep {
    pub path: String,
    /// Path of the parent node, empty for the root.
    pub parent_path: String,
    /// Whether the parent node is phantom, i.e. its objects were not fetched.
    pub parent_phantom: bool,
    pub parent: Arc<ClassDescriptor>,
    pub relationship: RelationshipDescriptor,
    pub target: Arc<ClassDescriptor>,
    pub strategy: PrefetchStrategy,
    /// Query of a disjoint step.
    pub query: Option<SelectQuery>,
}

/// Routes a prefetch tree into [`PrefetchStep`]s.
pub struct PrefetchRouter<'a> {
    snapshot: &'a MappingSnapshot,
    root: &'a ClassDescriptor,
    root_qualifier: Option<&'a Expression>,
    joint_paths: HashSet<String>,
    phantom_paths: HashSet<String>,
    steps: Vec<PrefetchStep>,
    error: Option<Error>,
}

impl<'a> PrefetchRouter<'a> {
    /// Route every node of `tree` for a query rooted at `root`.
    pub fn route(
        snapshot: &'a MappingSnapshot,
        root: &'a ClassDescriptor,
        root_qualifier: Option<&'a Expression>,
        tree: &PrefetchTreeNode,
    ) -> Result<Vec<PrefetchStep>> {
        let mut router = Self {
            snapshot,
            root,
            root_qualifier,
            joint_paths: tree.adjacent_joint_nodes().into_iter().map(|(p, _)| p).collect(),
            phantom_paths: HashSet::new(),
            steps: Vec::new(),
            error: None,
        };
        tree.traverse(&mut router);
        match router.error {
            Some(e) => Err(e),
            None => Ok(router.steps),
        }
    }

    fn parent_path(path: &str) -> &str {
        path.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("")
    }

    fn add_step(&mut self, path: &str, strategy: PrefetchStrategy) -> bool {
        if self.error.is_some() {
            return false;
        }
        match self.build_step(path, strategy) {
            Ok(step) => {
                trace!(path, strategy = ?step.strategy, "routed prefetch");
                self.steps.push(step);
                true
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    fn build_step(&self, path: &str, strategy: PrefetchStrategy) -> Result<PrefetchStep> {
        let parent_path = Self::parent_path(path);
        let parent_phantom = self.phantom_paths.contains(parent_path);
        let name = path.rsplit('.').next().unwrap_or(path);

        let parent = if parent_path.is_empty() {
            self.snapshot.class_descriptor(self.root.entity_name())?
        } else {
            walk_relationships(self.snapshot, self.root, parent_path)?.1
        };
        let relationship = parent
            .relationship(name)
            .ok_or_else(|| Error::UnknownRelationship {
                entity: parent.entity_name().to_string(),
                name: name.to_string(),
            })?
            .clone();
        let target = self.snapshot.class_descriptor(&relationship.target)?;

        let strategy = match strategy {
            PrefetchStrategy::DisjointById if parent_phantom => PrefetchStrategy::Disjoint,
            other => other,
        };
        let query = match strategy {
            PrefetchStrategy::Disjoint => Some(self.disjoint_query(path, &relationship, &target)?),
            _ => None,
        };

        Ok(PrefetchStep {
            path: path.to_string(),
            parent_path: parent_path.to_string(),
            parent_phantom,
            parent,
            relationship,
            target,
            strategy,
            query,
        })
    }

    /// Select of the targets related to any root object the root query
    /// matches.
    fn disjoint_query(
        &self,
        path: &str,
        relationship: &RelationshipDescriptor,
        target: &ClassDescriptor,
    ) -> Result<SelectQuery> {
        let (forward, _, _) = walk_relationships(self.snapshot, self.root, path)?;
        let reverse = reverse_db_path(self.snapshot, self.root.db_entity_name(), &forward)?;

        let root_condition = match self.root_qualifier {
            Some(q) => Some(to_db_expression(self.snapshot, self.root, q)?),
            None => None,
        };
        let hierarchy = self
            .snapshot
            .inheritance_tree(self.root.entity_name())
            .filter(|t| t.is_inheritance())
            .and_then(|t| t.qualifier_for_hierarchy());

        let mut query = SelectQuery::new(target.entity_name()).named(format!("prefetch {path}"));
        if let Some(condition) = Expression::join_and(root_condition, hierarchy) {
            query = query.where_(prefix_db_paths(&condition, &reverse)?);
        }
        if relationship.to_many && relationship.db_relationship.target == target.db_entity_name() {
            for column in relationship.db_relationship.target_columns() {
                query = query.with_extra_column(column);
            }
        }
        debug!(path, reverse = %reverse, "disjoint prefetch query");
        Ok(query)
    }
}

impl PrefetchProcessor for PrefetchRouter<'_> {
    fn start_phantom(&mut self, _node: &PrefetchTreeNode, path: &str) -> bool {
        if !path.is_empty() {
            self.phantom_paths.insert(path.to_string());
        }
        self.error.is_none()
    }

    fn start_disjoint(&mut self, _node: &PrefetchTreeNode, path: &str) -> bool {
        self.add_step(path, PrefetchStrategy::Disjoint)
    }

    fn start_disjoint_by_id(&mut self, _node: &PrefetchTreeNode, path: &str) -> bool {
        self.add_step(path, PrefetchStrategy::DisjointById)
    }

    fn start_joint(&mut self, _node: &PrefetchTreeNode, path: &str) -> bool {
        let strategy = if self.joint_paths.contains(path) {
            PrefetchStrategy::Joint
        } else {
            PrefetchStrategy::Disjoint
        };
        self.add_step(path, strategy)
    }

    fn start_unknown(&mut self, _node: &PrefetchTreeNode, path: &str) -> bool {
        self.add_step(path, PrefetchStrategy::Disjoint)
    }
}

/// Db path leading back from the end of `forward` to `root_table`.
pub(crate) fn reverse_db_path(snapshot: &MappingSnapshot, root_table: &str, forward: &str) -> Result<String> {
    let mut hops = Vec::new();
    let mut table = root_table.to_string();
    for segment in forward.split('.') {
        let name = segment.trim_end_matches(OUTER_JOIN_SUFFIX);
        let relationship = snapshot
            .db_entity(&table)?
            .relationship(name)
            .ok_or_else(|| Error::UnknownRelationship {
                entity: table.clone(),
                name: name.to_string(),
            })?;
        table = relationship.target.clone();
        hops.push(relationship);
    }

    let mut reversed = Vec::with_capacity(hops.len());
    for relationship in hops.iter().rev() {
        let reverse = snapshot
            .db_entity(&relationship.target)?
            .reverse_of(relationship)
            .ok_or_else(|| {
                Error::Mapping(format!(
                    "no reverse of {}.{} on {}",
                    relationship.source, relationship.name, relationship.target
                ))
            })?;
        reversed.push(reverse.name.clone());
    }
    Ok(reversed.join("."))
}

/// Path prefix of `table` within the hierarchy rooted at `descriptor`.
fn table_prefix(descriptor: &ClassDescriptor, table: &str) -> String {
    if table == descriptor.db_entity_name() {
        return String::new();
    }
    descriptor
        .attributes()
        .iter()
        .find(|a| a.table == table)
        .and_then(|a| a.db_path.rsplit_once('.').map(|(prefix, _)| prefix.to_string()))
        .unwrap_or_default()
}

/// Values of db `paths` for an object, from its snapshot or its identity.
/// `None` if any is missing or null.
fn join_values(graph: &ObjectGraph, object: &ObjectRef, paths: &[String]) -> Option<Vec<Value>> {
    let id: ObjectId = object.read().object_id().cloned()?;
    let row = graph.snapshot(&id);
    paths
        .iter()
        .map(|path| {
            row.and_then(|r| r.get(path))
                .or_else(|| id.value(path))
                .filter(|v| !v.is_null())
                .cloned()
        })
        .collect()
}

/// Join key paths of a relationship: (source side, target side).
fn key_paths(step: &PrefetchStep) -> (Vec<String>, Vec<String>) {
    let prefix = table_prefix(&step.target, &step.relationship.db_relationship.target);
    let target = step
        .relationship
        .db_relationship
        .target_columns()
        .map(|c| if prefix.is_empty() { c.to_string() } else { format!("{prefix}.{c}") })
        .collect();
    (step.relationship.source_column_paths(), target)
}

/// Parents of a step when they were not fetched by path: every graph
/// object of the parent entity or one of its subentities.
fn graph_parents(step: &PrefetchStep, graph: &ObjectGraph) -> Vec<ObjectRef> {
    let mut entities: HashSet<&str> = step.parent.sub_entities().iter().map(String::as_str).collect();
    entities.insert(step.parent.entity_name());
    graph
        .objects_of_entity(step.parent.root_entity())
        .into_iter()
        .filter(|o| entities.contains(o.read().entity_name()))
        .collect()
}

/// Qualifier matching rows whose `columns` equal one of `keys`: an `IN`
/// list for a single column, a disjunction of conjunctions otherwise.
pub(crate) fn key_qualifier(columns: &[String], keys: &[Vec<Value>]) -> Expression {
    if columns.len() == 1 {
        return Expression::db_path(&columns[0]).in_values(keys.iter().map(|k| k[0].clone()).collect());
    }
    let mut alternatives = keys.iter().map(|key| {
        let mut terms = columns
            .iter()
            .zip(key)
            .map(|(column, value)| Expression::db_path(column).eq(value.clone()));
        let first = terms.next().unwrap_or_else(|| Expression::literal(true));
        terms.fold(first, Expression::and)
    });
    let first = alternatives.next().unwrap_or_else(|| Expression::literal(false));
    alternatives.fold(first, Expression::or)
}

/// Identity queries for a disjoint-by-id step, one per chunk of at most
/// `max_keys` parent keys (0 for no limit).
pub fn by_id_queries(
    step: &PrefetchStep,
    parents: &[ObjectRef],
    graph: &ObjectGraph,
    max_keys: usize,
) -> Vec<SelectQuery> {
    let (source, target) = key_paths(step);
    let mut seen = HashSet::new();
    let keys: Vec<Vec<Value>> = parents
        .iter()
        .filter_map(|p| join_values(graph, p, &source))
        .filter(|k| seen.insert(k.clone()))
        .collect();
    if keys.is_empty() {
        return Vec::new();
    }

    let chunk = if max_keys == 0 { keys.len() } else { max_keys };
    keys.chunks(chunk)
        .map(|chunk| {
            let mut query = SelectQuery::new(step.target.entity_name())
                .named(format!("prefetch {} by id", step.path))
                .where_(key_qualifier(&target, chunk));
            if step.relationship.to_many {
                for column in &target {
                    query = query.with_extra_column(column.clone());
                }
            }
            query
        })
        .collect()
}

/// Step resolving relationship `name` of already fetched objects of
/// `entity`, by their join keys.
pub(crate) fn relationship_step(snapshot: &MappingSnapshot, entity: &str, name: &str) -> Result<PrefetchStep> {
    let parent = snapshot.class_descriptor(entity)?;
    let relationship = parent
        .relationship(name)
        .ok_or_else(|| Error::UnknownRelationship {
            entity: entity.to_string(),
            name: name.to_string(),
        })?
        .clone();
    let target = snapshot.class_descriptor(&relationship.target)?;
    Ok(PrefetchStep {
        path: name.to_string(),
        parent_path: String::new(),
        parent_phantom: false,
        parent,
        relationship,
        target,
        strategy: PrefetchStrategy::DisjointById,
        query: None,
    })
}

/// Attach fetched `targets` to their parents. With `parents` given, every
/// listed to-many parent gets a resolved list, possibly empty; otherwise
/// only graph objects with at least one match are touched.
pub fn connect(step: &PrefetchStep, parents: Option<&[ObjectRef]>, targets: &[ObjectRef], graph: &ObjectGraph) {
    let (source, target) = key_paths(step);
    let scanned;
    let (parents, known) = match parents {
        Some(p) => (p, true),
        None => {
            scanned = graph_parents(step, graph);
            (scanned.as_slice(), false)
        }
    };
    let name = &step.relationship.name;

    if step.relationship.to_many {
        let mut by_key: HashMap<Vec<Value>, Vec<ObjectRef>> = HashMap::new();
        for t in targets {
            if let Some(key) = join_values(graph, t, &target) {
                let list = by_key.entry(key).or_default();
                if !list.iter().any(|o| Arc::ptr_eq(o, t)) {
                    list.push(t.clone());
                }
            }
        }
        let reverse = step
            .relationship
            .reverse
            .as_deref()
            .filter(|r| step.target.relationship(r).map(|rel| !rel.to_many).unwrap_or(false));

        for parent in parents {
            let list = join_values(graph, parent, &source)
                .and_then(|k| by_key.get(&k).cloned())
                .unwrap_or_default();
            if !known && list.is_empty() {
                continue;
            }
            if let Some(reverse) = reverse {
                for child in &list {
                    child.write().write_property(reverse, Property::ToOne(Some(parent.clone())));
                }
            }
            parent.write().write_property(name, Property::ToMany(list));
        }
    } else {
        let by_key: HashMap<Vec<Value>, ObjectRef> = targets
            .iter()
            .filter_map(|t| join_values(graph, t, &target).map(|k| (k, t.clone())))
            .collect();
        for parent in parents {
            let found = join_values(graph, parent, &source).and_then(|k| by_key.get(&k).cloned());
            if let Some(child) = found {
                parent.write().write_property(name, Property::ToOne(Some(child)));
            }
        }
    }
}

/// To-many lists assembled from joint rows, written once all rows are read.
#[derive(Default)]
pub(crate) struct JointLists {
    entries: Vec<(ObjectRef, String, Vec<ObjectRef>)>,
    index: HashMap<(usize, String), usize>,
}

impl JointLists {
    /// Record one row's child of `parent`, `None` for an unmatched row.
    pub(crate) fn add(&mut self, parent: &ObjectRef, relationship: &str, child: Option<ObjectRef>) {
        let key = (Arc::as_ptr(parent) as *const () as usize, relationship.to_string());
        let slot = *self.index.entry(key).or_insert_with(|| {
            self.entries.push((parent.clone(), relationship.to_string(), Vec::new()));
            self.entries.len() - 1
        });
        if let Some(child) = child {
            let list = &mut self.entries[slot].2;
            if !list.iter().any(|o| Arc::ptr_eq(o, &child)) {
                list.push(child);
            }
        }
    }

    pub(crate) fn apply(self) {
        for (parent, relationship, list) in self.entries {
            parent.write().write_property(&relationship, Property::ToMany(list));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::materializer::Materializer;
    use crate::fixtures::gallery_resolver;
    use crate::object::DataRow;
    use ormgraph_proto::PrefetchSemantics;
    use pretty_assertions::assert_eq;

    fn tree(paths: &[(&str, PrefetchSemantics)]) -> PrefetchTreeNode {
        let mut root = PrefetchTreeNode::root();
        for (path, semantics) in paths {
            root.add_prefetch(path, *semantics).unwrap();
        }
        root
    }

    #[test]
    fn test_phantom_nodes_produce_no_queries() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let painting = snapshot.class_descriptor("Painting").unwrap();
        let qualifier = Expression::path("paintingTitle").eq("Irises");
        let steps = PrefetchRouter::route(
            &snapshot,
            &painting,
            Some(&qualifier),
            &tree(&[("toArtist.paintingArray.toGallery", PrefetchSemantics::Disjoint)]),
        )
        .unwrap();

        assert_eq!(steps.len(), 1);
        let step = &steps[0];
        assert_eq!(step.path, "toArtist.paintingArray.toGallery");
        assert!(step.parent_phantom);
        let query = step.query.as_ref().unwrap();
        assert_eq!(query.root().to_string(), "Gallery");
        let rendered = query.qualifier().unwrap().to_string();
        assert!(rendered.contains("toArtist.paintingArray.PAINTING_TITLE"), "{rendered}");
    }

    #[test]
    fn test_siblings_under_one_phantom_parent() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();
        let qualifier = Expression::path("artistName").eq("Monet");
        let steps = PrefetchRouter::route(
            &snapshot,
            &artist,
            Some(&qualifier),
            &tree(&[
                ("paintingArray.toGallery", PrefetchSemantics::Joint),
                ("paintingArray.toArtist", PrefetchSemantics::Disjoint),
            ]),
        )
        .unwrap();

        let routed: Vec<_> = steps.iter().map(|s| (s.path.as_str(), s.strategy)).collect();
        assert_eq!(
            routed,
            vec![
                ("paintingArray.toGallery", PrefetchStrategy::Joint),
                ("paintingArray.toArtist", PrefetchStrategy::Disjoint),
            ]
        );
        for step in &steps {
            assert_eq!(step.parent_path, "paintingArray");
            assert!(step.parent_phantom);
            assert_eq!(step.parent.entity_name(), "Painting");
        }
        assert!(steps[0].query.is_none());
        let query = steps[1].query.as_ref().unwrap();
        assert_eq!(query.root().to_string(), "Artist");
        let rendered = query.qualifier().unwrap().to_string();
        assert!(rendered.contains("paintingArray.toArtist.ARTIST_NAME"), "{rendered}");
    }

    #[test]
    fn test_strategies_follow_tree_position() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();
        let steps = PrefetchRouter::route(
            &snapshot,
            &artist,
            None,
            &tree(&[
                ("paintingArray", PrefetchSemantics::DisjointById),
                ("paintingArray.toGallery", PrefetchSemantics::Joint),
            ]),
        )
        .unwrap();
        let strategies: Vec<_> = steps.iter().map(|s| (s.path.as_str(), s.strategy)).collect();
        assert_eq!(
            strategies,
            vec![
                ("paintingArray", PrefetchStrategy::DisjointById),
                // not reachable from the root rows
                ("paintingArray.toGallery", PrefetchStrategy::Disjoint),
            ]
        );
        assert!(steps[0].query.is_none());
    }

    #[test]
    fn test_by_id_queries_chunk_parent_keys() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();
        let steps = PrefetchRouter::route(
            &snapshot,
            &artist,
            None,
            &tree(&[("paintingArray", PrefetchSemantics::DisjointById)]),
        )
        .unwrap();

        let mut graph = ObjectGraph::new();
        let materializer = Materializer::new(&resolver, &snapshot);
        let parents: Vec<ObjectRef> = (1..=5i64)
            .map(|id| {
                let row = DataRow::for_entity("Artist").with("ARTIST_ID", id).with("ARTIST_NAME", "a");
                materializer.materialize(&row, &mut graph).unwrap()
            })
            .collect();

        let queries = by_id_queries(&steps[0], &parents, &graph, 2);
        assert_eq!(queries.len(), 3);
        let first = queries[0].qualifier().unwrap().to_string();
        assert!(first.contains("ARTIST_ID"), "{first}");
        assert!(by_id_queries(&steps[0], &[], &graph, 2).is_empty());
    }

    #[test]
    fn test_connect_to_many_sets_lists_and_reverse() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        let artist = snapshot.class_descriptor("Artist").unwrap();
        let steps = PrefetchRouter::route(
            &snapshot,
            &artist,
            None,
            &tree(&[("paintingArray", PrefetchSemantics::Disjoint)]),
        )
        .unwrap();

        let mut graph = ObjectGraph::new();
        let materializer = Materializer::new(&resolver, &snapshot);
        let artists: Vec<ObjectRef> = [1i64, 2]
            .iter()
            .map(|&id| {
                let row = DataRow::for_entity("Artist").with("ARTIST_ID", id).with("ARTIST_NAME", "a");
                materializer.materialize(&row, &mut graph).unwrap()
            })
            .collect();
        let paintings: Vec<ObjectRef> = [(10i64, 1i64), (11, 1)]
            .iter()
            .map(|&(id, artist)| {
                let row = DataRow::for_entity("Painting")
                    .with("PAINTING_ID", id)
                    .with("PAINTING_TITLE", "p")
                    .with("ARTIST_ID", artist);
                materializer.materialize(&row, &mut graph).unwrap()
            })
            .collect();

        connect(&steps[0], Some(&artists), &paintings, &graph);

        let first = artists[0].read().read_property("paintingArray").unwrap();
        assert_eq!(first.as_list().map(|l| l.len()), Some(2));
        let second = artists[1].read().read_property("paintingArray").unwrap();
        assert_eq!(second, Property::ToMany(Vec::new()));
        let back = paintings[0].read().read_property("toArtist").unwrap();
        assert_eq!(back, Property::ToOne(Some(artists[0].clone())));
    }

    #[test]
    fn test_reverse_db_path() {
        let resolver = gallery_resolver();
        let snapshot = resolver.snapshot().unwrap();
        assert_eq!(
            reverse_db_path(&snapshot, "PAINTING", "toArtist.paintingArray").unwrap(),
            "toArtist.paintingArray"
        );
        assert_eq!(reverse_db_path(&snapshot, "ARTIST", "paintingArray").unwrap(), "toArtist");
    }
}
