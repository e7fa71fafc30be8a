//! Domain layer: hierarchy tree, summing matrix and time-indexed tables
//!
//! This layer is independent of external concerns (no I/O, no CLI, no config loading).

pub mod arena;
pub mod builder;
pub mod error;
pub mod frame;
pub mod hierarchy;
pub mod render;
pub mod summing;

pub use arena::{NodeData, TreeArena, TreeNode};
pub use builder::{build_tree, HierarchyBuilder};
pub use error::{DomainError, DomainResult, StructureError};
pub use frame::Frame;
pub use hierarchy::{Hierarchy, ROOT};
pub use render::TreeConvert;
pub use summing::SummingMatrix;
