//! Pure functions over flat, parent-referencing record sets.
//!
//! - [`tree`] links records into an arena [`Forest`], rejecting self-parenting and cycles.
//! - [`ancestry`] answers "who is below this node" and "where may this node move".
//! - [`filter`] prunes a forest while keeping the path to every match.
//!
//! Nothing here touches the store; callers pass the committed item set.

pub mod ancestry;
pub mod filter;
pub mod tree;

pub use filter::{Filter, MatchMode, filter_forest};
pub use tree::{Forest, RejectReason, RejectedLink, TreeNode};

use crate::store::WorkItem;

/// A record that can take part in a parent/child hierarchy.
pub trait Hierarchical {
    fn node_id(&self) -> &str;

    fn parent_ref(&self) -> Option<&str>;

    /// Records failing this check are dropped before linking.
    fn is_well_formed(&self) -> bool {
        !self.node_id().trim().is_empty()
    }
}

impl Hierarchical for WorkItem {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn parent_ref(&self) -> Option<&str> {
        self.parent_id.as_deref().filter(|p| !p.is_empty())
    }

    fn is_well_formed(&self) -> bool {
        !self.id.trim().is_empty() && !self.title.trim().is_empty()
    }
}
