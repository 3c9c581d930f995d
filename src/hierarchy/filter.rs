use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use super::tree::{Forest, TreeNode};
use crate::store::{Priority, WorkItem, WorkItemStatus, WorkItemType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    Status(WorkItemStatus),
    Type(WorkItemType),
    Priority(Priority),
    Tag(String),
    Assignee(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    Status,
    Type,
    Priority,
    Tag,
    Assignee,
}

/// How several active filters combine on a single node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Every filter must hold, so two filters of the same kind can never both match.
    #[default]
    All,
    /// Filters of the same kind are alternatives; different kinds must all hold.
    AnyWithinKind,
}

impl Filter {
    pub fn kind(&self) -> FilterKind {
        match self {
            Filter::Status(_) => FilterKind::Status,
            Filter::Type(_) => FilterKind::Type,
            Filter::Priority(_) => FilterKind::Priority,
            Filter::Tag(_) => FilterKind::Tag,
            Filter::Assignee(_) => FilterKind::Assignee,
        }
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        match self {
            Filter::Status(status) => item.status == *status,
            Filter::Type(kind) => item.kind == *kind,
            Filter::Priority(priority) => item.priority == *priority,
            Filter::Tag(tag) => item.tags.iter().any(|t| t == tag),
            Filter::Assignee(who) => item
                .assignee
                .as_deref()
                .is_some_and(|a| a.eq_ignore_ascii_case(who)),
        }
    }
}

impl FromStr for Filter {
    type Err = String;

    /// Parses `kind=value`, e.g. `status=in_progress` or `tag=backend`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, value) = s
            .split_once('=')
            .ok_or_else(|| format!("filter '{s}' is not of the form kind=value"))?;
        let value = value.trim();
        if value.is_empty() {
            return Err(format!("filter '{s}' has an empty value"));
        }
        match kind.trim() {
            "status" => value.parse().map(Filter::Status),
            "type" => value.parse().map(Filter::Type),
            "priority" => value.parse().map(Filter::Priority),
            "tag" | "tags" => Ok(Filter::Tag(value.to_string())),
            "assignee" => Ok(Filter::Assignee(value.to_string())),
            other => Err(format!("unknown filter kind '{other}'")),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Status(s) => write!(f, "status={}", s.as_str()),
            Filter::Type(t) => write!(f, "type={}", t.as_str()),
            Filter::Priority(p) => write!(f, "priority={}", p.as_str()),
            Filter::Tag(t) => write!(f, "tag={t}"),
            Filter::Assignee(a) => write!(f, "assignee={a}"),
        }
    }
}

/// Whether a single node satisfies the active filters. An empty filter list matches.
pub fn matches(item: &WorkItem, filters: &[Filter], mode: MatchMode) -> bool {
    match mode {
        MatchMode::All => filters.iter().all(|f| f.matches(item)),
        MatchMode::AnyWithinKind => filters.iter().all(|f| {
            filters
                .iter()
                .filter(|other| other.kind() == f.kind())
                .any(|other| other.matches(item))
        }),
    }
}

/// Prune a forest to the nodes that match plus every ancestor of a match.
///
/// A node survives if it matches or any of its children survives; surviving nodes keep
/// only their surviving children, in original order. No filters returns the forest as is.
pub fn filter_forest(
    forest: &Forest<WorkItem>,
    filters: &[Filter],
    mode: MatchMode,
) -> Forest<WorkItem> {
    if filters.is_empty() {
        return forest.clone();
    }

    // Children come after their parent in pre-order, so walking it backwards settles
    // every child before the parent it would keep alive.
    let mut keep = vec![false; forest.len()];
    for idx in pre_order(forest).into_iter().rev() {
        if keep[idx] || matches(&forest.node(idx).item, filters, mode) {
            keep[idx] = true;
            if let Some(parent) = forest.node(idx).parent {
                keep[parent] = true;
            }
        }
    }

    let mut nodes: Vec<TreeNode<WorkItem>> = Vec::new();
    let mut roots = Vec::new();
    // (old index, new parent index)
    let mut stack: Vec<(usize, Option<usize>)> = forest
        .roots()
        .iter()
        .rev()
        .filter(|&&r| keep[r])
        .map(|&r| (r, None))
        .collect();

    while let Some((old, parent)) = stack.pop() {
        let new = nodes.len();
        nodes.push(TreeNode {
            item: forest.node(old).item.clone(),
            children: Vec::new(),
            parent,
        });
        match parent {
            Some(p) => nodes[p].children.push(new),
            None => roots.push(new),
        }
        for &child in forest.children(old).iter().rev() {
            if keep[child] {
                stack.push((child, Some(new)));
            }
        }
    }

    Forest::from_parts(nodes, roots)
}

fn pre_order<T>(forest: &Forest<T>) -> Vec<usize> {
    let mut order = Vec::with_capacity(forest.len());
    let mut stack: Vec<usize> = forest.roots().iter().rev().copied().collect();
    while let Some(idx) = stack.pop() {
        order.push(idx);
        stack.extend(forest.children(idx).iter().rev());
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, kind: WorkItemType, parent: Option<&str>) -> WorkItem {
        let mut w = WorkItem::new(format!("item {id}"), kind);
        w.id = id.to_string();
        w.parent_id = parent.map(String::from);
        w
    }

    fn scenario() -> Vec<WorkItem> {
        vec![
            item("E", WorkItemType::Epic, None),
            item("S", WorkItemType::Story, Some("E")),
            item("T", WorkItemType::Task, Some("S")),
        ]
    }

    fn walk(forest: &Forest<WorkItem>) -> Vec<(usize, String)> {
        forest
            .depth_first()
            .into_iter()
            .map(|(d, w)| (d, w.id.clone()))
            .collect()
    }

    #[test]
    fn test_no_filters_is_identity() {
        let forest = Forest::build(&scenario());
        assert_eq!(filter_forest(&forest, &[], MatchMode::All), forest);
        assert_eq!(filter_forest(&forest, &[], MatchMode::AnyWithinKind), forest);
    }

    #[test]
    fn test_nothing_matching_yields_empty_forest() {
        let forest = Forest::build(&scenario());
        let filtered = filter_forest(
            &forest,
            &[Filter::Status(WorkItemStatus::Done)],
            MatchMode::All,
        );
        assert!(filtered.is_empty());
        assert!(filtered.roots().is_empty());
    }

    #[test]
    fn test_matching_leaf_keeps_ancestor_chain() {
        let mut items = scenario();
        items[2].status = WorkItemStatus::Done;
        let forest = Forest::build(&items);

        let filtered = filter_forest(
            &forest,
            &[Filter::Status(WorkItemStatus::Done)],
            MatchMode::All,
        );
        assert_eq!(
            walk(&filtered),
            vec![(0, "E".into()), (1, "S".into()), (2, "T".into())]
        );
    }

    #[test]
    fn test_non_matching_branches_are_pruned() {
        let mut items = scenario();
        items.push(item("S2", WorkItemType::Story, Some("E")));
        items.push(item("B", WorkItemType::Bug, Some("S2")));
        items.push(item("Lone", WorkItemType::Task, None));
        items[4].tags = vec!["backend".to_string()];
        let forest = Forest::build(&items);

        let filtered = filter_forest(
            &forest,
            &[Filter::Tag("backend".to_string())],
            MatchMode::All,
        );
        assert_eq!(
            walk(&filtered),
            vec![(0, "E".into()), (1, "S2".into()), (2, "B".into())]
        );
        let e = filtered.roots()[0];
        assert_eq!(filtered.node(e).parent, None);
        let s2 = filtered.children(e)[0];
        assert_eq!(filtered.node(s2).parent, Some(e));
    }

    #[test]
    fn test_matching_parent_keeps_only_surviving_children() {
        let items = scenario();
        let forest = Forest::build(&items);
        let filtered = filter_forest(
            &forest,
            &[Filter::Type(WorkItemType::Epic)],
            MatchMode::All,
        );
        assert_eq!(walk(&filtered), vec![(0, "E".into())]);
    }

    #[test]
    fn test_same_kind_filters() {
        let mut items = scenario();
        items[1].status = WorkItemStatus::Todo;
        items[2].status = WorkItemStatus::Done;
        let forest = Forest::build(&items);
        let filters = [
            Filter::Status(WorkItemStatus::Todo),
            Filter::Status(WorkItemStatus::Done),
        ];

        assert!(filter_forest(&forest, &filters, MatchMode::All).is_empty());
        assert_eq!(
            walk(&filter_forest(&forest, &filters, MatchMode::AnyWithinKind)),
            vec![(0, "E".into()), (1, "S".into()), (2, "T".into())]
        );
    }

    #[test]
    fn test_mixed_kinds_still_conjunctive() {
        let mut items = scenario();
        items[2].status = WorkItemStatus::Done;
        items[2].assignee = Some("Robin".to_string());
        items[1].status = WorkItemStatus::Done;
        let forest = Forest::build(&items);
        let filters = [
            Filter::Status(WorkItemStatus::Done),
            Filter::Assignee("robin".to_string()),
        ];

        for mode in [MatchMode::All, MatchMode::AnyWithinKind] {
            let filtered = filter_forest(&forest, &filters, mode);
            assert_eq!(filtered.len(), 3);
            assert!(matches(&items[2], &filters, mode));
            assert!(!matches(&items[1], &filters, mode));
        }
    }

    #[test]
    fn test_parse_filters() {
        assert_eq!(
            "status=in_progress".parse::<Filter>(),
            Ok(Filter::Status(WorkItemStatus::InProgress))
        );
        assert_eq!(
            "priority=high".parse::<Filter>(),
            Ok(Filter::Priority(Priority::High))
        );
        assert_eq!(
            "tag=ui".parse::<Filter>(),
            Ok(Filter::Tag("ui".to_string()))
        );
        assert!("status".parse::<Filter>().is_err());
        assert!("status=".parse::<Filter>().is_err());
        assert!("colour=red".parse::<Filter>().is_err());
        assert!("type=saga".parse::<Filter>().is_err());
        assert_eq!(
            Filter::Assignee("sam".to_string()).to_string(),
            "assignee=sam"
        );
    }

    #[test]
    fn test_deep_chain_filters_without_recursion() {
        let n = 100_000;
        let mut items: Vec<WorkItem> = (0..n)
            .map(|i: usize| {
                let parent = i.checked_sub(1).map(|p| format!("n{p}"));
                item(&format!("n{i}"), WorkItemType::Task, parent.as_deref())
            })
            .collect();
        items[n - 1].status = WorkItemStatus::Done;
        let forest = Forest::build(&items);

        let done = [Filter::Status(WorkItemStatus::Done)];
        let filtered = filter_forest(&forest, &done, MatchMode::All);
        assert_eq!(filtered.len(), n);
        assert_eq!(filtered.depth_first()[n - 1].0, n - 1);

        let none = [Filter::Tag("missing".to_string())];
        assert!(filter_forest(&forest, &none, MatchMode::All).is_empty());
    }
}
