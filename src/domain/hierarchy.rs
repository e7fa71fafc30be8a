//! Hierarchy definition: parent name to ordered child names.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Name of the mandatory top-level node.
pub const ROOT: &str = "root";

/// Mapping from a node name to the ordered list of its immediate children.
///
/// Must contain a [`ROOT`] entry. Child order is significant: it fixes the
/// breadth-first ordering of `tree_nodes` and `bottom_nodes`.
///
/// Deserializes from a plain map, e.g. TOML:
/// ```toml
/// root = ["A", "B"]
/// A = ["A1", "A2"]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hierarchy {
    children: BTreeMap<String, Vec<String>>,
}

impl Hierarchy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the child list of `parent`.
    pub fn with_children<I, S>(mut self, parent: &str, children: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.insert(parent, children);
        self
    }

    pub fn insert<I, S>(&mut self, parent: &str, children: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.children
            .insert(parent.to_string(), children.into_iter().map(Into::into).collect());
    }

    pub fn children(&self, parent: &str) -> Option<&[String]> {
        self.children.get(parent).map(Vec::as_slice)
    }

    pub fn contains(&self, parent: &str) -> bool {
        self.children.contains_key(parent)
    }

    pub fn has_root(&self) -> bool {
        self.contains(ROOT)
    }

    /// Names that carry a child list.
    pub fn parents(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }
}

impl<K, V, S> FromIterator<(K, V)> for Hierarchy
where
    K: Into<String>,
    V: IntoIterator<Item = S>,
    S: Into<String>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut hierarchy = Hierarchy::new();
        for (parent, children) in iter {
            let parent: String = parent.into();
            hierarchy.insert(&parent, children);
        }
        hierarchy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_toml_map_when_deserializing_then_keeps_child_order() {
        let hierarchy: Hierarchy = toml::from_str(
            r#"
root = ["B", "A"]
B = ["B2", "B1"]
"#,
        )
        .unwrap();

        assert!(hierarchy.has_root());
        assert_eq!(hierarchy.children("root").unwrap(), ["B", "A"]);
        assert_eq!(hierarchy.children("B").unwrap(), ["B2", "B1"]);
        assert_eq!(hierarchy.len(), 2);
    }

    #[test]
    fn given_pairs_when_collecting_then_builds_definition() {
        let hierarchy: Hierarchy = [("root", vec!["A", "B"]), ("A", vec!["A1"])]
            .into_iter()
            .collect();

        assert_eq!(hierarchy.children("A").unwrap(), ["A1"]);
        assert!(hierarchy.children("B").is_none());
    }
}
