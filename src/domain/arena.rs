use std::collections::{HashMap, VecDeque};
use std::fmt;

use generational_arena::{Arena, Index};
use tracing::instrument;

/// Data payload for tree nodes representing one series of the hierarchy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeData {
    /// Unique series name
    pub name: String,
}

impl fmt::Display for NodeData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Tree node in the arena-based hierarchy structure.
#[derive(Debug)]
pub struct TreeNode {
    /// Series data for this node
    pub data: NodeData,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Indices of child nodes in the arena, in definition order
    pub children: Vec<Index>,
}

impl TreeNode {
    pub fn name(&self) -> &str {
        &self.data.name
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Arena-based tree structure for the series hierarchy.
///
/// Uses generational arena for memory-safe node references and O(1) lookups.
/// Node names are unique, so a name index gives O(1) lookup by name as well.
/// Read-only once built; see [`HierarchyBuilder`](crate::domain::HierarchyBuilder).
#[derive(Debug)]
pub struct TreeArena {
    /// Arena storage for all tree nodes
    arena: Arena<TreeNode>,
    /// Index of the root node, None for empty trees
    root: Option<Index>,
    /// Name to arena index
    names: HashMap<String, Index>,
}

impl Default for TreeArena {
    fn default() -> Self {
        Self::new()
    }
}

impl TreeArena {
    pub fn new() -> Self {
        Self {
            arena: Arena::new(),
            root: None,
            names: HashMap::new(),
        }
    }

    #[instrument(level = "trace", skip(self))]
    pub fn insert_node(&mut self, data: NodeData, parent: Option<Index>) -> Index {
        let name = data.name.clone();
        let node = TreeNode {
            data,
            parent,
            children: Vec::new(),
        };
        let node_idx = self.arena.insert(node);

        if let Some(parent_idx) = parent {
            if let Some(parent) = self.arena.get_mut(parent_idx) {
                parent.children.push(node_idx);
            }
        } else {
            self.root = Some(node_idx);
        }
        self.names.insert(name, node_idx);

        node_idx
    }

    pub fn get_node(&self, idx: Index) -> Option<&TreeNode> {
        self.arena.get(idx)
    }

    pub fn root(&self) -> Option<Index> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    /// Look up a node by its series name.
    pub fn find(&self, name: &str) -> Option<Index> {
        self.names.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    pub fn name_of(&self, idx: Index) -> Option<&str> {
        self.get_node(idx).map(TreeNode::name)
    }

    pub fn parent_of(&self, idx: Index) -> Option<Index> {
        self.get_node(idx).and_then(|node| node.parent)
    }

    pub fn children_of(&self, idx: Index) -> &[Index] {
        self.get_node(idx)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Iterates from `idx` (exclusive) up to the root (inclusive).
    pub fn ancestors(&self, idx: Index) -> impl Iterator<Item = Index> + '_ {
        std::iter::successors(self.parent_of(idx), move |&current| self.parent_of(current))
    }

    /// Distance from the root; the root has depth 0.
    pub fn depth_of(&self, idx: Index) -> usize {
        self.ancestors(idx).count()
    }

    /// Pre-order (depth-first) traversal.
    pub fn iter(&self) -> TreeIterator {
        TreeIterator::new(self)
    }

    /// Breadth-first traversal, root first.
    pub fn iter_level_order(&self) -> LevelOrderIterator {
        LevelOrderIterator::new(self)
    }

    /// One group of node indices per depth, root level first.
    pub fn levels(&self) -> LevelIterator {
        LevelIterator::new(self)
    }

    /// Number of levels (a lone root has depth 1).
    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.levels().count()
    }

    /// All node names in breadth-first order, root first.
    pub fn tree_nodes(&self) -> Vec<String> {
        self.iter_level_order()
            .map(|(_, node)| node.data.name.clone())
            .collect()
    }

    /// Collects all leaf nodes in the order they are first met breadth-first.
    ///
    /// Empty trees return an empty vector.
    #[instrument(level = "debug", skip(self))]
    pub fn leaf_nodes(&self) -> Vec<String> {
        self.iter_level_order()
            .filter(|(_, node)| node.is_leaf())
            .map(|(_, node)| node.data.name.clone())
            .collect()
    }

    /// Leaves under `idx` (a leaf is its own descendant), in pre-order.
    pub fn descendant_leaves(&self, idx: Index) -> Vec<Index> {
        let mut leaves = Vec::new();
        let mut stack = vec![idx];
        while let Some(current) = stack.pop() {
            let children = self.children_of(current);
            if children.is_empty() {
                leaves.push(current);
            } else {
                stack.extend(children.iter().rev());
            }
        }
        leaves
    }

    /// Node names grouped per depth, root level first.
    ///
    /// With `skip_leaves`, leaves are dropped from every level and levels left
    /// empty are skipped, so only aggregated series remain.
    pub fn nodes_per_level(&self, skip_leaves: bool) -> impl Iterator<Item = Vec<String>> + '_ {
        self.levels()
            .map(move |level| {
                level
                    .into_iter()
                    .filter_map(|idx| self.get_node(idx))
                    .filter(|node| !(skip_leaves && node.is_leaf()))
                    .map(|node| node.data.name.clone())
                    .collect::<Vec<_>>()
            })
            .filter(|names| !names.is_empty())
    }
}

pub struct TreeIterator<'a> {
    arena: &'a TreeArena,
    stack: Vec<Index>,
}

impl<'a> TreeIterator<'a> {
    fn new(arena: &'a TreeArena) -> Self {
        let mut stack = Vec::new();
        if let Some(root) = arena.root() {
            stack.push(root);
        }
        Self { arena, stack }
    }
}

impl<'a> Iterator for TreeIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(current_idx) = self.stack.pop() {
            if let Some(node) = self.arena.get_node(current_idx) {
                // Push children in reverse order for left-to-right traversal
                for &child in node.children.iter().rev() {
                    self.stack.push(child);
                }
                return Some((current_idx, node));
            }
        }
        None
    }
}

pub struct LevelOrderIterator<'a> {
    arena: &'a TreeArena,
    queue: VecDeque<Index>,
}

impl<'a> LevelOrderIterator<'a> {
    fn new(arena: &'a TreeArena) -> Self {
        let mut queue = VecDeque::new();
        if let Some(root) = arena.root() {
            queue.push_back(root);
        }
        Self { arena, queue }
    }
}

impl<'a> Iterator for LevelOrderIterator<'a> {
    type Item = (Index, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current_idx) = self.queue.pop_front() {
            if let Some(node) = self.arena.get_node(current_idx) {
                self.queue.extend(node.children.iter().copied());
                return Some((current_idx, node));
            }
        }
        None
    }
}

/// Yields the nodes of one depth at a time.
pub struct LevelIterator<'a> {
    arena: &'a TreeArena,
    current: Vec<Index>,
}

impl<'a> LevelIterator<'a> {
    fn new(arena: &'a TreeArena) -> Self {
        Self {
            arena,
            current: arena.root().into_iter().collect(),
        }
    }
}

impl<'a> Iterator for LevelIterator<'a> {
    type Item = Vec<Index>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current.is_empty() {
            return None;
        }
        let next: Vec<Index> = self
            .current
            .iter()
            .flat_map(|&idx| self.arena.children_of(idx).iter().copied())
            .collect();
        Some(std::mem::replace(&mut self.current, next))
    }
}
