use std::collections::{HashMap, HashSet};

use super::Hierarchical;

fn children_index<T: Hierarchical>(items: &[T]) -> HashMap<&str, Vec<&str>> {
    let mut index: HashMap<&str, Vec<&str>> = HashMap::new();
    for item in items {
        if let Some(parent) = item.parent_ref() {
            index.entry(parent).or_default().push(item.node_id());
        }
    }
    index
}

/// Every item whose parent chain passes through `id`.
///
/// Terminates on corrupt, cyclic input; `id` itself is never part of the result.
pub fn descendants_of<T: Hierarchical>(id: &str, items: &[T]) -> HashSet<String> {
    let index = children_index(items);
    let mut visited: HashSet<&str> = HashSet::from([id]);
    let mut stack = vec![id];
    let mut found = HashSet::new();

    while let Some(current) = stack.pop() {
        for &child in index.get(current).into_iter().flatten() {
            if visited.insert(child) {
                found.insert(child.to_string());
                stack.push(child);
            }
        }
    }
    found
}

/// Items that `id` may be moved under without creating a cycle.
///
/// Pass the committed item set, not an unsaved edit of it.
pub fn valid_parents_for<'a, T: Hierarchical>(id: &str, items: &'a [T]) -> Vec<&'a T> {
    let excluded = descendants_of(id, items);
    items
        .iter()
        .filter(|item| item.node_id() != id && !excluded.contains(item.node_id()))
        .collect()
}

/// Parent chain of `id`, nearest first. Stops at a missing parent or a repeated id.
pub fn ancestors_of<T: Hierarchical>(id: &str, items: &[T]) -> Vec<String> {
    let by_id: HashMap<&str, &T> = items.iter().map(|i| (i.node_id(), i)).collect();
    let mut visited: HashSet<&str> = HashSet::from([id]);
    let mut chain = Vec::new();
    let mut current = by_id.get(id).and_then(|i| i.parent_ref());

    while let Some(parent) = current {
        if !visited.insert(parent) {
            break;
        }
        let Some(item) = by_id.get(parent) else {
            break;
        };
        chain.push(parent.to_string());
        current = item.parent_ref();
    }
    chain
}

/// Id of some item whose parent chain loops back on itself, if any.
pub fn find_cycle<T: Hierarchical>(items: &[T]) -> Option<String> {
    let by_id: HashMap<&str, &T> = items.iter().map(|i| (i.node_id(), i)).collect();
    // Ids already proven to reach a root.
    let mut settled: HashSet<&str> = HashSet::new();

    for item in items {
        let mut path: HashSet<&str> = HashSet::new();
        let mut current = Some(item.node_id());
        while let Some(id) = current {
            if settled.contains(id) {
                break;
            }
            if !path.insert(id) {
                return Some(id.to_string());
            }
            current = by_id.get(id).and_then(|i| i.parent_ref());
        }
        settled.extend(path);
    }
    None
}

/// Whether moving `id` under `new_parent` keeps the hierarchy acyclic.
pub fn can_reparent<T: Hierarchical>(id: &str, new_parent: Option<&str>, items: &[T]) -> bool {
    match new_parent {
        None => true,
        Some(parent) => parent != id && !descendants_of(id, items).contains(parent),
    }
}
