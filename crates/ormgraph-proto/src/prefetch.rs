//! Prefetch tree: relationship paths to load eagerly with a query.
//!
//! A path `a.b.c` decomposes into nested nodes `a -> b -> c`. Nodes that were
//! only created as intermediates of a longer path are *phantom*; explicitly
//! requested nodes are not, and carry the strategy used to fetch them.

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How a prefetched relationship is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PrefetchSemantics {
    /// Not decided yet; treated like [`PrefetchSemantics::Disjoint`] by the router.
    #[default]
    Undefined,
    /// Fetched in the parent's SQL through a `LEFT JOIN`.
    Joint,
    /// Separate query qualified through the reverse relationship.
    Disjoint,
    /// Separate query qualified by the parents' primary keys.
    DisjointById,
}

/// A node of the prefetch tree. The root node has no name.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrefetchTreeNode {
    name: Option<String>,
    phantom: bool,
    semantics: PrefetchSemantics,
    alias: Option<String>,
    children: Vec<PrefetchTreeNode>,
}

/// Callback interface for [`PrefetchTreeNode::traverse`].
///
/// Each `start_*` method receives the node and its dotted path from the root
/// and returns whether to descend into the node's children. `finish` runs for
/// every node regardless.
pub trait PrefetchProcessor {
    fn start_phantom(&mut self, node: &PrefetchTreeNode, path: &str) -> bool;
    fn start_disjoint(&mut self, node: &PrefetchTreeNode, path: &str) -> bool;
    fn start_disjoint_by_id(&mut self, node: &PrefetchTreeNode, path: &str) -> bool;
    fn start_joint(&mut self, node: &PrefetchTreeNode, path: &str) -> bool;
    fn start_unknown(&mut self, node: &PrefetchTreeNode, path: &str) -> bool;
    fn finish(&mut self, _node: &PrefetchTreeNode, _path: &str) {}
}

impl PrefetchTreeNode {
    /// Create an empty root node.
    pub fn root() -> Self {
        Self {
            name: None,
            phantom: true,
            semantics: PrefetchSemantics::Undefined,
            alias: None,
            children: Vec::new(),
        }
    }

    fn phantom_child(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            phantom: true,
            semantics: PrefetchSemantics::Undefined,
            alias: None,
            children: Vec::new(),
        }
    }

    /// Create a root holding one path whose leaf is non-phantom with the
    /// given semantics.
    pub fn with_path(path: &str, semantics: PrefetchSemantics) -> Result<Self, Error> {
        let mut root = Self::root();
        root.add_prefetch(path, semantics)?;
        Ok(root)
    }

    /// Node name, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Whether the node was only created as an intermediate.
    pub fn is_phantom(&self) -> bool {
        self.phantom
    }

    /// Fetch strategy.
    pub fn semantics(&self) -> PrefetchSemantics {
        self.semantics
    }

    /// Join alias used in generated SQL, if any.
    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Set the join alias.
    pub fn set_alias(&mut self, alias: impl Into<String>) {
        self.alias = Some(alias.into());
    }

    /// Set the fetch strategy.
    pub fn set_semantics(&mut self, semantics: PrefetchSemantics) {
        self.semantics = semantics;
    }

    /// Mark the node phantom or requested.
    pub fn set_phantom(&mut self, phantom: bool) {
        self.phantom = phantom;
    }

    /// Child nodes in insertion order.
    pub fn children(&self) -> &[PrefetchTreeNode] {
        &self.children
    }

    /// Whether this node has children.
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Whether the semantics is joint.
    pub fn is_joint(&self) -> bool {
        self.semantics == PrefetchSemantics::Joint
    }

    /// Whether the semantics is disjoint.
    pub fn is_disjoint(&self) -> bool {
        self.semantics == PrefetchSemantics::Disjoint
    }

    /// Whether the semantics is disjoint-by-id.
    pub fn is_disjoint_by_id(&self) -> bool {
        self.semantics == PrefetchSemantics::DisjointById
    }

    fn child(&self, name: &str) -> Option<&PrefetchTreeNode> {
        self.children.iter().find(|c| c.name.as_deref() == Some(name))
    }

    fn child_mut(&mut self, name: &str) -> Option<&mut PrefetchTreeNode> {
        self.children
            .iter_mut()
            .find(|c| c.name.as_deref() == Some(name))
    }

    fn segments(path: &str) -> Result<Vec<&str>, Error> {
        let segments: Vec<&str> = path.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::InvalidPath(path.to_string()));
        }
        Ok(segments)
    }

    /// Add a path, creating missing nodes as phantoms. Returns the last node.
    pub fn add_path(&mut self, path: &str) -> Result<&mut PrefetchTreeNode, Error> {
        let segments = Self::segments(path)?;
        let mut node = self;
        for segment in segments {
            if node.child(segment).is_none() {
                node.children.push(Self::phantom_child(segment));
            }
            node = node
                .child_mut(segment)
                .ok_or_else(|| Error::InvalidPath(path.to_string()))?;
        }
        Ok(node)
    }

    /// Add an explicitly requested path with the given semantics.
    pub fn add_prefetch(
        &mut self,
        path: &str,
        semantics: PrefetchSemantics,
    ) -> Result<&mut PrefetchTreeNode, Error> {
        let node = self.add_path(path)?;
        node.phantom = false;
        node.semantics = semantics;
        Ok(node)
    }

    /// Look up an existing node by dotted path.
    pub fn get_node(&self, path: &str) -> Option<&PrefetchTreeNode> {
        let mut node = self;
        for segment in path.split('.') {
            node = node.child(segment)?;
        }
        Some(node)
    }

    /// Remove a path. A node that still has children is made phantom instead,
    /// and phantom ancestors left without children are removed with it.
    pub fn remove_path(&mut self, path: &str) {
        let Ok(segments) = Self::segments(path) else {
            return;
        };
        Self::remove_segments(self, &segments);
    }

    // Returns true when the parent should drop this node.
    fn remove_segments(node: &mut PrefetchTreeNode, segments: &[&str]) -> bool {
        let Some((first, rest)) = segments.split_first() else {
            if node.children.is_empty() {
                return true;
            }
            node.phantom = true;
            return false;
        };

        let Some(child) = node.child_mut(first) else {
            return false;
        };
        if Self::remove_segments(child, rest) {
            node.children.retain(|c| c.name.as_deref() != Some(*first));
        }
        node.name.is_some() && node.phantom && node.children.is_empty()
    }

    /// Merge another tree into this one. Defined semantics and non-phantom
    /// status of merged nodes win.
    pub fn merge(&mut self, other: &PrefetchTreeNode) -> Result<(), Error> {
        let start = match other.name.as_deref() {
            Some(name) => self.add_path(name)?,
            None => self,
        };
        Self::merge_into(start, other)
    }

    fn merge_into(original: &mut PrefetchTreeNode, to_merge: &PrefetchTreeNode) -> Result<(), Error> {
        if to_merge.semantics != PrefetchSemantics::Undefined {
            original.semantics = to_merge.semantics;
        }
        if !to_merge.phantom {
            original.phantom = false;
        }
        if to_merge.alias.is_some() {
            original.alias.clone_from(&to_merge.alias);
        }
        for child in &to_merge.children {
            let name = child.name.as_deref().unwrap_or_default();
            let target = original.add_path(name)?;
            Self::merge_into(target, child)?;
        }
        Ok(())
    }

    /// Depth-first traversal invoking `processor` per node.
    pub fn traverse(&self, processor: &mut dyn PrefetchProcessor) {
        self.traverse_at(processor, "");
    }

    fn traverse_at(&self, processor: &mut dyn PrefetchProcessor, parent_path: &str) {
        let path = match (&self.name, parent_path.is_empty()) {
            (Some(name), true) => name.clone(),
            (Some(name), false) => format!("{parent_path}.{name}"),
            (None, _) => String::new(),
        };

        let descend = if self.phantom {
            processor.start_phantom(self, &path)
        } else {
            match self.semantics {
                PrefetchSemantics::Disjoint => processor.start_disjoint(self, &path),
                PrefetchSemantics::DisjointById => processor.start_disjoint_by_id(self, &path),
                PrefetchSemantics::Joint => processor.start_joint(self, &path),
                PrefetchSemantics::Undefined => processor.start_unknown(self, &path),
            }
        };

        if descend {
            for child in &self.children {
                child.traverse_at(processor, &path);
            }
        }

        processor.finish(self, &path);
    }

    fn collect(&self, filter: impl Fn(&PrefetchTreeNode) -> bool) -> Vec<(String, &PrefetchTreeNode)> {
        fn walk<'a>(
            node: &'a PrefetchTreeNode,
            parent: &str,
            filter: &dyn Fn(&PrefetchTreeNode) -> bool,
            out: &mut Vec<(String, &'a PrefetchTreeNode)>,
        ) {
            for child in &node.children {
                let name = child.name.as_deref().unwrap_or_default();
                let path = if parent.is_empty() {
                    name.to_string()
                } else {
                    format!("{parent}.{name}")
                };
                if filter(child) {
                    out.push((path.clone(), child));
                }
                walk(child, &path, filter, out);
            }
        }

        let mut out = Vec::new();
        if self.name.is_some() && filter(self) {
            out.push((self.name.clone().unwrap_or_default(), self));
        }
        walk(self, self.name.as_deref().unwrap_or_default(), &filter, &mut out);
        out
    }

    /// All explicitly requested nodes with their paths, depth-first.
    pub fn non_phantom_nodes(&self) -> Vec<(String, &PrefetchTreeNode)> {
        self.collect(|n| !n.phantom)
    }

    /// Non-phantom nodes with joint semantics.
    pub fn joint_nodes(&self) -> Vec<(String, &PrefetchTreeNode)> {
        self.collect(|n| !n.phantom && n.is_joint())
    }

    /// Non-phantom nodes with disjoint semantics.
    pub fn disjoint_nodes(&self) -> Vec<(String, &PrefetchTreeNode)> {
        self.collect(|n| !n.phantom && n.is_disjoint())
    }

    /// Non-phantom nodes with disjoint-by-id semantics.
    pub fn disjoint_by_id_nodes(&self) -> Vec<(String, &PrefetchTreeNode)> {
        self.collect(|n| !n.phantom && n.is_disjoint_by_id())
    }

    /// Joint descendants reachable from this node without crossing a
    /// non-joint node, with paths relative to this node.
    pub fn adjacent_joint_nodes(&self) -> Vec<(String, &PrefetchTreeNode)> {
        fn walk<'a>(node: &'a PrefetchTreeNode, parent: &str, out: &mut Vec<(String, &'a PrefetchTreeNode)>) {
            for child in &node.children {
                let name = child.name.as_deref().unwrap_or_default();
                let path = if parent.is_empty() {
                    name.to_string()
                } else {
                    format!("{parent}.{name}")
                };
                if child.phantom {
                    walk(child, &path, out);
                } else if child.is_joint() {
                    out.push((path.clone(), child));
                    walk(child, &path, out);
                }
            }
        }

        let mut out = Vec::new();
        walk(self, "", &mut out);
        out
    }

    /// Clone of this node keeping only joint children, recursively, stopping
    /// at the first non-joint node. The clone acts as a root.
    pub fn clone_joint_subtree(&self) -> PrefetchTreeNode {
        fn clone_children(node: &PrefetchTreeNode) -> Vec<PrefetchTreeNode> {
            node.children
                .iter()
                .filter(|c| c.is_joint())
                .map(|c| PrefetchTreeNode {
                    name: c.name.clone(),
                    phantom: c.phantom,
                    semantics: c.semantics,
                    alias: c.alias.clone(),
                    children: clone_children(c),
                })
                .collect()
        }

        PrefetchTreeNode {
            children: clone_children(self),
            ..PrefetchTreeNode::root()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_path_creates_phantoms() {
        let tree = PrefetchTreeNode::with_path("a.b.c", PrefetchSemantics::Disjoint).unwrap();

        let a = tree.get_node("a").unwrap();
        assert!(a.is_phantom());
        assert!(tree.get_node("a.b").unwrap().is_phantom());

        let c = tree.get_node("a.b.c").unwrap();
        assert!(!c.is_phantom());
        assert!(c.is_disjoint());
        assert!(tree.get_node("a.x").is_none());
    }

    #[test]
    fn test_empty_segment_rejected() {
        assert!(PrefetchTreeNode::with_path("a..b", PrefetchSemantics::Joint).is_err());
    }

    #[test]
    fn test_non_phantom_nodes() {
        let mut tree = PrefetchTreeNode::root();
        tree.add_prefetch("a.b", PrefetchSemantics::Disjoint).unwrap();
        tree.add_prefetch("a.b.c", PrefetchSemantics::Joint).unwrap();
        tree.add_prefetch("x", PrefetchSemantics::DisjointById).unwrap();

        let paths: Vec<String> = tree.non_phantom_nodes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(paths, vec!["a.b", "a.b.c", "x"]);
        assert_eq!(tree.joint_nodes().len(), 1);
        assert_eq!(tree.disjoint_nodes()[0].0, "a.b");
        assert_eq!(tree.disjoint_by_id_nodes()[0].0, "x");
    }

    #[test]
    fn test_merge_applies_semantics() {
        let mut tree = PrefetchTreeNode::root();
        tree.add_path("a.b").unwrap();

        let other = PrefetchTreeNode::with_path("a.b", PrefetchSemantics::Joint).unwrap();
        tree.merge(&other).unwrap();

        let b = tree.get_node("a.b").unwrap();
        assert!(!b.is_phantom());
        assert!(b.is_joint());
        assert!(tree.get_node("a").unwrap().is_phantom());
    }

    #[test]
    fn test_remove_path() {
        let mut tree = PrefetchTreeNode::root();
        tree.add_prefetch("a", PrefetchSemantics::Disjoint).unwrap();
        tree.add_prefetch("a.b", PrefetchSemantics::Disjoint).unwrap();

        tree.remove_path("a");
        assert!(tree.get_node("a").unwrap().is_phantom());

        tree.remove_path("a.b");
        assert!(tree.get_node("a").is_none());
    }

    #[test]
    fn test_traverse_respects_descend_flag() {
        struct StopAtJoint(Vec<String>);
        impl PrefetchProcessor for StopAtJoint {
            fn start_phantom(&mut self, _: &PrefetchTreeNode, _: &str) -> bool {
                true
            }
            fn start_disjoint(&mut self, _: &PrefetchTreeNode, path: &str) -> bool {
                self.0.push(path.to_string());
                true
            }
            fn start_disjoint_by_id(&mut self, _: &PrefetchTreeNode, _: &str) -> bool {
                true
            }
            fn start_joint(&mut self, _: &PrefetchTreeNode, path: &str) -> bool {
                self.0.push(path.to_string());
                false
            }
            fn start_unknown(&mut self, _: &PrefetchTreeNode, _: &str) -> bool {
                true
            }
        }

        let mut tree = PrefetchTreeNode::root();
        tree.add_prefetch("a", PrefetchSemantics::Joint).unwrap();
        tree.add_prefetch("a.b", PrefetchSemantics::Disjoint).unwrap();
        tree.add_prefetch("c.d", PrefetchSemantics::Disjoint).unwrap();

        let mut processor = StopAtJoint(Vec::new());
        tree.traverse(&mut processor);
        assert_eq!(processor.0, vec!["a", "c.d"]);
    }

    #[test]
    fn test_clone_joint_subtree() {
        let mut tree = PrefetchTreeNode::root();
        tree.add_prefetch("a", PrefetchSemantics::Joint).unwrap();
        tree.add_prefetch("a.b", PrefetchSemantics::Joint).unwrap();
        tree.add_prefetch("a.c", PrefetchSemantics::Disjoint).unwrap();
        tree.add_prefetch("d", PrefetchSemantics::Disjoint).unwrap();

        let joint = tree.clone_joint_subtree();
        assert!(joint.get_node("a.b").is_some());
        assert!(joint.get_node("a.c").is_none());
        assert!(joint.get_node("d").is_none());

        let adjacent: Vec<String> = tree.adjacent_joint_nodes().into_iter().map(|(p, _)| p).collect();
        assert_eq!(adjacent, vec!["a", "a.b"]);
    }
}
