//! Tree builder turning a hierarchy definition into an arena tree.

use std::collections::HashSet;

use generational_arena::Index;
use tracing::{debug, instrument, warn};

use crate::domain::arena::{NodeData, TreeArena};
use crate::domain::error::{DomainResult, StructureError};
use crate::domain::hierarchy::{Hierarchy, ROOT};

/// Constructs the hierarchy tree from a parent -> children definition.
///
/// Expansion proceeds in rounds: every leaf whose name has a child list gets
/// its children attached, until no leaf can be expanded.
pub struct HierarchyBuilder<'a> {
    hierarchy: &'a Hierarchy,
    expanded: HashSet<Index>,
}

impl<'a> HierarchyBuilder<'a> {
    pub fn new(hierarchy: &'a Hierarchy) -> Self {
        Self {
            hierarchy,
            expanded: HashSet::new(),
        }
    }

    /// Build the tree rooted at `"root"`.
    #[instrument(level = "debug", skip(self))]
    pub fn build(mut self) -> DomainResult<TreeArena> {
        if !self.hierarchy.has_root() {
            return Err(StructureError::MissingRoot.into());
        }

        let mut tree = TreeArena::new();
        tree.insert_node(
            NodeData {
                name: ROOT.to_string(),
            },
            None,
        );

        // Each productive round adds one level; more rounds than keys means a loop.
        let max_rounds = self.hierarchy.len() + 1;
        let mut rounds = 0;
        loop {
            let expandable = self.expandable_leaves(&tree);
            if expandable.is_empty() {
                break;
            }
            rounds += 1;
            if rounds > max_rounds {
                return Err(StructureError::ExpansionLimit(max_rounds).into());
            }
            for leaf in expandable {
                self.expand(&mut tree, leaf)?;
            }
        }
        debug!(
            "built hierarchy with {} nodes in {} rounds",
            tree.len(),
            rounds
        );

        for parent in self.hierarchy.parents() {
            if !tree.contains(parent) {
                warn!("hierarchy entry '{}' is not reachable from root, ignored", parent);
            }
        }

        Ok(tree)
    }

    fn expandable_leaves(&self, tree: &TreeArena) -> Vec<Index> {
        tree.iter_level_order()
            .filter(|(idx, node)| {
                node.is_leaf()
                    && !self.expanded.contains(idx)
                    && self.hierarchy.contains(node.name())
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn expand(&mut self, tree: &mut TreeArena, leaf: Index) -> DomainResult<()> {
        self.expanded.insert(leaf);
        let leaf_name = match tree.name_of(leaf) {
            Some(name) => name.to_string(),
            None => return Ok(()),
        };
        let children = self.hierarchy.children(&leaf_name).unwrap_or(&[]);

        for child in children {
            // Cycle detection
            if *child == leaf_name
                || tree
                    .ancestors(leaf)
                    .any(|a| tree.name_of(a) == Some(child.as_str()))
            {
                return Err(StructureError::CycleDetected(child.clone()).into());
            }
            // Names are unique across the whole tree
            if let Some(existing) = tree.find(child) {
                let first_parent = tree
                    .parent_of(existing)
                    .and_then(|p| tree.name_of(p))
                    .unwrap_or_default()
                    .to_string();
                return Err(StructureError::DuplicateNode {
                    name: child.clone(),
                    first_parent,
                    second_parent: leaf_name,
                }
                .into());
            }
            tree.insert_node(NodeData { name: child.clone() }, Some(leaf));
        }
        Ok(())
    }
}

/// Build the hierarchy tree from its definition.
pub fn build_tree(hierarchy: &Hierarchy) -> DomainResult<TreeArena> {
    HierarchyBuilder::new(hierarchy).build()
}
