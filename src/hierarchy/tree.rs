use std::collections::HashMap;

use super::Hierarchical;

#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode<T> {
    pub item: T,
    pub children: Vec<usize>,
    pub parent: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SelfParent,
    Cycle,
}

/// A parent link that was refused while building; the child was made a root instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLink {
    pub child_id: String,
    pub parent_id: String,
    pub reason: RejectReason,
}

/// Arena of nodes linked through index lists.
///
/// Every node is either listed in `roots` or in exactly one parent's `children`,
/// and following `parent` from any node always ends at a root.
#[derive(Debug, Clone, PartialEq)]
pub struct Forest<T> {
    nodes: Vec<TreeNode<T>>,
    roots: Vec<usize>,
    rejected: Vec<RejectedLink>,
}

impl<T: Hierarchical + Clone> Forest<T> {
    /// Link a flat record list into a forest.
    ///
    /// Malformed records and repeated ids (after the first) are dropped. A record whose
    /// parent is missing from the set becomes a root. Links that point a record at itself,
    /// or that would close a loop through already-linked ancestors, are rejected and
    /// recorded in [`Forest::rejected`]. Sibling order follows input order.
    pub fn build(items: &[T]) -> Self {
        let mut nodes: Vec<TreeNode<T>> = Vec::with_capacity(items.len());
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(items.len());

        for item in items {
            if !item.is_well_formed() {
                tracing::debug!("dropping malformed record '{}'", item.node_id());
                continue;
            }
            if index.contains_key(item.node_id()) {
                tracing::debug!("dropping duplicate record '{}'", item.node_id());
                continue;
            }
            index.insert(item.node_id(), nodes.len());
            nodes.push(TreeNode {
                item: item.clone(),
                children: Vec::new(),
                parent: None,
            });
        }

        let mut roots = Vec::new();
        let mut rejected = Vec::new();
        // Root of each node's accepted subtree. A node that is still unlinked is its own
        // root, so a new link closes a loop exactly when the parent's root is the child.
        let mut tops: Vec<usize> = (0..nodes.len()).collect();
        for idx in 0..nodes.len() {
            let Some(parent_id) = nodes[idx].item.parent_ref() else {
                roots.push(idx);
                continue;
            };
            let Some(&parent_idx) = index.get(parent_id) else {
                roots.push(idx);
                continue;
            };

            let reason = if parent_idx == idx {
                Some(RejectReason::SelfParent)
            } else if root_of(&mut tops, parent_idx) == idx {
                Some(RejectReason::Cycle)
            } else {
                None
            };

            if let Some(reason) = reason {
                tracing::warn!(
                    "rejecting parent link {} -> {parent_id}: {reason:?}",
                    nodes[idx].item.node_id()
                );
                rejected.push(RejectedLink {
                    child_id: nodes[idx].item.node_id().to_string(),
                    parent_id: parent_id.to_string(),
                    reason,
                });
                roots.push(idx);
                continue;
            }

            nodes[idx].parent = Some(parent_idx);
            nodes[parent_idx].children.push(idx);
            tops[idx] = parent_idx;
        }

        Forest {
            nodes,
            roots,
            rejected,
        }
    }
}

/// Follow accepted links to the top of `idx`'s tree, halving the path on the way.
fn root_of(tops: &mut [usize], mut idx: usize) -> usize {
    while tops[idx] != idx {
        tops[idx] = tops[tops[idx]];
        idx = tops[idx];
    }
    idx
}

impl<T> Forest<T> {
    pub(crate) fn from_parts(nodes: Vec<TreeNode<T>>, roots: Vec<usize>) -> Self {
        Forest {
            nodes,
            roots,
            rejected: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn roots(&self) -> &[usize] {
        &self.roots
    }

    pub fn node(&self, idx: usize) -> &TreeNode<T> {
        &self.nodes[idx]
    }

    pub fn children(&self, idx: usize) -> &[usize] {
        &self.nodes[idx].children
    }

    pub fn rejected(&self) -> &[RejectedLink] {
        &self.rejected
    }

    pub fn root_items(&self) -> impl Iterator<Item = &T> {
        self.roots.iter().map(|&idx| &self.nodes[idx].item)
    }

    pub fn child_items(&self, idx: usize) -> impl Iterator<Item = &T> {
        self.nodes[idx]
            .children
            .iter()
            .map(|&child| &self.nodes[child].item)
    }

    /// Pre-order walk yielding `(depth, item)`, roots at depth 0.
    pub fn depth_first(&self) -> Vec<(usize, &T)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack: Vec<(usize, usize)> = self.roots.iter().rev().map(|&r| (0, r)).collect();
        while let Some((depth, idx)) = stack.pop() {
            out.push((depth, &self.nodes[idx].item));
            for &child in self.nodes[idx].children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }
        out
    }
}

impl<T: Hierarchical> Forest<T> {
    pub fn find(&self, id: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.item.node_id() == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{WorkItem, WorkItemType};

    fn item(id: &str, parent: Option<&str>) -> WorkItem {
        let mut w = WorkItem::new(format!("item {id}"), WorkItemType::Task);
        w.id = id.to_string();
        w.parent_id = parent.map(String::from);
        w
    }

    fn ids<'a>(items: impl Iterator<Item = &'a WorkItem>) -> Vec<&'a str> {
        items.map(|w| w.id.as_str()).collect()
    }

    #[test]
    fn test_epic_story_task_chain() {
        let items = vec![item("E", None), item("S", Some("E")), item("T", Some("S"))];
        let forest = Forest::build(&items);

        assert_eq!(ids(forest.root_items()), vec!["E"]);
        let e = forest.find("E").unwrap();
        let s = forest.find("S").unwrap();
        let t = forest.find("T").unwrap();
        assert_eq!(forest.children(e), &[s]);
        assert_eq!(forest.children(s), &[t]);
        assert!(forest.children(t).is_empty());
        assert!(forest.rejected().is_empty());
    }

    #[test]
    fn test_child_listed_before_parent() {
        let items = vec![item("T", Some("S")), item("S", Some("E")), item("E", None)];
        let forest = Forest::build(&items);
        assert_eq!(ids(forest.root_items()), vec!["E"]);
        assert_eq!(forest.len(), 3);
    }

    #[test]
    fn test_output_is_a_partition() {
        let items = vec![
            item("a", None),
            item("b", Some("a")),
            item("c", Some("a")),
            item("d", Some("missing")),
            item("e", Some("c")),
            item("f", None),
        ];
        let forest = Forest::build(&items);

        let mut seen: Vec<usize> = forest.roots().to_vec();
        for idx in 0..forest.len() {
            seen.extend_from_slice(forest.children(idx));
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..items.len()).collect::<Vec<_>>());
        assert_eq!(ids(forest.root_items()), vec!["a", "d", "f"]);
    }

    #[test]
    fn test_malformed_and_duplicate_records_are_dropped() {
        let mut untitled = item("x", None);
        untitled.title = "  ".to_string();
        let items = vec![
            item("a", None),
            item("", None),
            untitled,
            item("a", None),
            item("b", Some("a")),
        ];
        let forest = Forest::build(&items);
        assert_eq!(forest.len(), 2);
        assert_eq!(ids(forest.root_items()), vec!["a"]);
    }

    #[test]
    fn test_self_parent_is_rejected() {
        let items = vec![item("loop", Some("loop")), item("child", Some("loop"))];
        let forest = Forest::build(&items);

        assert_eq!(ids(forest.root_items()), vec!["loop"]);
        let root = forest.roots()[0];
        assert_eq!(ids(forest.child_items(root)), vec!["child"]);
        assert_eq!(
            forest.rejected(),
            &[RejectedLink {
                child_id: "loop".to_string(),
                parent_id: "loop".to_string(),
                reason: RejectReason::SelfParent,
            }]
        );
    }

    #[test]
    fn test_cycle_is_broken_and_reported() {
        let items = vec![
            item("a", Some("c")),
            item("b", Some("a")),
            item("c", Some("b")),
        ];
        let forest = Forest::build(&items);

        // a -> c and b -> a are accepted first; c -> b would close the loop.
        assert_eq!(forest.rejected().len(), 1);
        assert_eq!(forest.rejected()[0].child_id, "c");
        assert_eq!(forest.rejected()[0].reason, RejectReason::Cycle);
        assert_eq!(ids(forest.root_items()), vec!["c"]);
        assert_eq!(forest.depth_first().len(), 3);
    }

    #[test]
    fn test_build_is_idempotent() {
        let items = vec![
            item("r", None),
            item("x", Some("r")),
            item("y", Some("x")),
            item("z", Some("r")),
        ];
        assert_eq!(Forest::build(&items), Forest::build(&items));
    }

    #[test]
    fn test_depth_first_order() {
        let items = vec![
            item("r", None),
            item("x", Some("r")),
            item("y", Some("x")),
            item("z", Some("r")),
            item("q", None),
        ];
        let forest = Forest::build(&items);
        let walk: Vec<_> = forest
            .depth_first()
            .into_iter()
            .map(|(depth, w)| (depth, w.id.as_str()))
            .collect();
        assert_eq!(
            walk,
            vec![(0, "r"), (1, "x"), (2, "y"), (1, "z"), (0, "q")]
        );
    }

    fn chain(n: usize) -> Vec<WorkItem> {
        (0..n)
            .map(|i| {
                let parent = i.checked_sub(1).map(|p| format!("n{p}"));
                item(&format!("n{i}"), parent.as_deref())
            })
            .collect()
    }

    #[test]
    fn test_deep_chain_builds_in_either_order() {
        let n = 50_000;
        let mut items = chain(n);
        let forest = Forest::build(&items);
        assert_eq!(ids(forest.root_items()), vec!["n0"]);
        assert!(forest.rejected().is_empty());
        let walk = forest.depth_first();
        assert_eq!(walk.len(), n);
        assert_eq!(walk[n - 1].0, n - 1);

        items.reverse();
        let forest = Forest::build(&items);
        assert_eq!(ids(forest.root_items()), vec!["n0"]);
        assert_eq!(forest.depth_first()[n - 1].0, n - 1);
    }

    #[test]
    fn test_cycle_closed_across_deep_chain() {
        let n = 50_000;
        let mut items = chain(n);
        items[0].parent_id = Some(format!("n{}", n - 1));
        let forest = Forest::build(&items);

        assert_eq!(forest.len(), n);
        assert_eq!(ids(forest.root_items()), vec![format!("n{}", n - 1).as_str()]);
        assert_eq!(
            forest.rejected(),
            &[RejectedLink {
                child_id: format!("n{}", n - 1),
                parent_id: format!("n{}", n - 2),
                reason: RejectReason::Cycle,
            }]
        );
    }
}
