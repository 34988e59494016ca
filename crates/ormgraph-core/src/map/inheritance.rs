//! Inheritance hierarchies and discriminator matching.

use std::sync::Arc;

use ormgraph_proto::{Expression, Value};

use super::obj::ObjEntity;

/// An entity and its subentities.
#[derive(Debug, Clone)]
pub struct EntityInheritanceTree {
    entity: Arc<ObjEntity>,
    children: Vec<EntityInheritanceTree>,
}

/// Loose equality between a stored discriminator and a column value read
/// back from the driver, which may widen integers.
fn discriminator_matches(declared: &Value, actual: &Value) -> bool {
    if declared == actual {
        return true;
    }
    match (declared.as_i64(), actual.as_i64()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

impl EntityInheritanceTree {
    /// Create a leaf tree.
    pub fn new(entity: Arc<ObjEntity>) -> Self {
        Self {
            entity,
            children: Vec::new(),
        }
    }

    /// Add a subtree.
    pub fn add_child(&mut self, child: EntityInheritanceTree) {
        self.children.push(child);
    }

    /// The entity at this node.
    pub fn entity(&self) -> &ObjEntity {
        &self.entity
    }

    /// Direct subentity trees.
    pub fn children(&self) -> &[EntityInheritanceTree] {
        &self.children
    }

    /// Find the subtree rooted at `name`.
    pub fn find(&self, name: &str) -> Option<&EntityInheritanceTree> {
        if self.entity.name == name {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(name))
    }

    /// Entities of this subtree, parents before children.
    pub fn entities(&self) -> Vec<&ObjEntity> {
        let mut out = vec![self.entity.as_ref()];
        for child in &self.children {
            out.extend(child.entities());
        }
        out
    }

    /// Whether any entity in the subtree has subentities or a discriminator.
    pub fn is_inheritance(&self) -> bool {
        !self.children.is_empty() || !self.entity.discriminator.is_empty()
    }

    /// All discriminator columns used in the subtree, first use first.
    pub fn discriminator_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        for entity in self.entities() {
            for d in &entity.discriminator {
                if !columns.contains(&d.column) {
                    columns.push(d.column.clone());
                }
            }
        }
        columns
    }

    /// The deepest entity whose discriminator matches the row.
    ///
    /// Children are tried first. An entity without a discriminator matches
    /// any row unless it is abstract.
    pub fn entity_matching_row(&self, column: &dyn Fn(&str) -> Option<Value>) -> Option<&ObjEntity> {
        for child in &self.children {
            if let Some(found) = child.entity_matching_row(column) {
                return Some(found);
            }
        }

        if self.entity.discriminator.is_empty() {
            return (!self.entity.is_abstract).then_some(self.entity.as_ref());
        }

        let matched = self.entity.discriminator.iter().all(|d| {
            column(&d.column)
                .map(|v| discriminator_matches(&d.value, &v))
                .unwrap_or(false)
        });
        matched.then_some(self.entity.as_ref())
    }

    /// Db-path qualifier selecting rows of this subtree, or `None` when any
    /// concrete entity in it matches every row.
    pub fn qualifier_for_hierarchy(&self) -> Option<Expression> {
        fn collect(tree: &EntityInheritanceTree, out: &mut Vec<Expression>) -> bool {
            let entity = &tree.entity;
            if !entity.is_abstract {
                if entity.discriminator.is_empty() {
                    return false;
                }
                let mut conditions = entity
                    .discriminator
                    .iter()
                    .map(|d| Expression::db_path(&d.column).eq(d.value.clone()));
                let first = conditions.next();
                if let Some(first) = first {
                    out.push(conditions.fold(first, Expression::and));
                }
            }
            tree.children.iter().all(|c| collect(c, out))
        }

        let mut parts = Vec::new();
        if !collect(self, &mut parts) {
            return None;
        }
        let mut parts = parts.into_iter();
        let first = parts.next()?;
        Some(parts.fold(first, Expression::or))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hierarchy() -> EntityInheritanceTree {
        let mut root = EntityInheritanceTree::new(Arc::new(
            ObjEntity::new("Employee", "PERSON").abstract_entity(),
        ));
        let mut manager = EntityInheritanceTree::new(Arc::new(
            ObjEntity::subentity("Manager", "Employee").with_discriminator("PERSON_TYPE", "M"),
        ));
        manager.add_child(EntityInheritanceTree::new(Arc::new(
            ObjEntity::subentity("Director", "Manager").with_discriminator("PERSON_TYPE", "D"),
        )));
        root.add_child(manager);
        root.add_child(EntityInheritanceTree::new(Arc::new(
            ObjEntity::subentity("Engineer", "Employee").with_discriminator("PERSON_TYPE", "E"),
        )));
        root
    }

    #[test]
    fn test_entity_matching_row() {
        let tree = hierarchy();
        let row = |value: &'static str| move |col: &str| (col == "PERSON_TYPE").then(|| Value::from(value));

        assert_eq!(tree.entity_matching_row(&row("D")).map(|e| e.name.as_str()), Some("Director"));
        assert_eq!(tree.entity_matching_row(&row("M")).map(|e| e.name.as_str()), Some("Manager"));
        assert_eq!(tree.entity_matching_row(&row("E")).map(|e| e.name.as_str()), Some("Engineer"));
        // abstract root never matches
        assert!(tree.entity_matching_row(&row("X")).is_none());
    }

    #[test]
    fn test_qualifier_for_hierarchy() {
        let tree = hierarchy();
        let qualifier = tree.qualifier_for_hierarchy().unwrap();
        assert_eq!(
            qualifier.to_string(),
            "(db:PERSON_TYPE = 'M') or (db:PERSON_TYPE = 'D') or (db:PERSON_TYPE = 'E')"
        );

        let manager = tree.find("Manager").unwrap();
        assert_eq!(
            manager.qualifier_for_hierarchy().unwrap().to_string(),
            "(db:PERSON_TYPE = 'M') or (db:PERSON_TYPE = 'D')"
        );
        assert_eq!(tree.discriminator_columns(), vec!["PERSON_TYPE"]);
    }

    #[test]
    fn test_integer_discriminator_widening() {
        let tree = EntityInheritanceTree::new(Arc::new(
            ObjEntity::new("Shape", "SHAPE").with_discriminator("KIND", 1i32),
        ));
        let row = |col: &str| (col == "KIND").then_some(Value::Int64(1));
        assert!(tree.entity_matching_row(&row).is_some());
    }
}
