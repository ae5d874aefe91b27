//! Topological ordering and cycle detection over adjacency maps
//!
//! Maps go from a node to the set of nodes it depends on. Entries that refer
//! to nodes missing from the map are ignored.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Topological sort using Kahn's algorithm.
///
/// Returns dependencies before dependants. Ties are broken by key order so
/// the result is deterministic. On failure returns the nodes that could not
/// be ordered.
pub fn topological_sort<K: Ord + Clone>(
    dependencies: &BTreeMap<K, BTreeSet<K>>,
) -> Result<Vec<K>, Vec<K>> {
    let mut in_degree: BTreeMap<&K, usize> = BTreeMap::new();
    let mut dependants: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
    let mut queue: VecDeque<&K> = VecDeque::new();
    let mut sorted: Vec<K> = Vec::new();

    for (node, deps) in dependencies {
        let known: Vec<&K> = deps.iter().filter(|d| dependencies.contains_key(*d)).collect();
        in_degree.insert(node, known.len());
        for dep in known {
            dependants.entry(dep).or_default().push(node);
        }
    }

    for (node, degree) in &in_degree {
        if *degree == 0 {
            queue.push_back(*node);
        }
    }

    while let Some(node) = queue.pop_front() {
        sorted.push(node.clone());

        if let Some(waiting) = dependants.get(node) {
            for dependant in waiting {
                if let Some(degree) = in_degree.get_mut(dependant) {
                    *degree = degree.saturating_sub(1);
                    if *degree == 0 {
                        queue.push_back(*dependant);
                    }
                }
            }
        }
    }

    if sorted.len() != dependencies.len() {
        let leftover = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(node, _)| node.clone())
            .collect();
        return Err(leftover);
    }

    Ok(sorted)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Find one cycle, returned as an ordered path whose first and last
/// elements are the same node (e.g. `a -> b -> a`).
pub fn find_cycle<K: Ord + Clone + std::hash::Hash>(
    dependencies: &BTreeMap<K, BTreeSet<K>>,
) -> Option<Vec<K>> {
    fn visit<K: Ord + Clone + std::hash::Hash>(
        dependencies: &BTreeMap<K, BTreeSet<K>>,
        node: &K,
        marks: &mut HashMap<K, Mark>,
        stack: &mut Vec<K>,
    ) -> Option<Vec<K>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|n| n == node)?;
                let mut cycle: Vec<K> = stack[start..].to_vec();
                cycle.push(node.clone());
                return Some(cycle);
            }
            None => {}
        }

        marks.insert(node.clone(), Mark::Visiting);
        stack.push(node.clone());

        if let Some(deps) = dependencies.get(node) {
            for dep in deps {
                if !dependencies.contains_key(dep) {
                    continue;
                }
                if let Some(cycle) = visit(dependencies, dep, marks, stack) {
                    return Some(cycle);
                }
            }
        }

        stack.pop();
        marks.insert(node.clone(), Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    let mut stack = Vec::new();

    for node in dependencies.keys() {
        if let Some(cycle) = visit(dependencies, node, &mut marks, &mut stack) {
            return Some(cycle);
        }
    }

    None
}
