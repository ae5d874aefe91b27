//! Per-batch scheduling state
//!
//! Pure bookkeeping: which nodes are ready, which complete, and which get
//! cancelled. The processor acts on these decisions and emits events.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Lifecycle of a node within a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// Waiting on dependencies
    Pending,
    /// Handed to the driver
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed | Self::Cancelled)
    }
}

/// Scheduling state of one batch
#[derive(Debug, Clone, Default)]
pub struct BatchState {
    status: BTreeMap<String, NodeStatus>,
    /// Unresolved dependencies of each pending node
    waiting_on: BTreeMap<String, BTreeSet<String>>,
    dependants: BTreeMap<String, BTreeSet<String>>,
}

impl BatchState {
    /// Create state for nodes given as `(key, dependencies)` pairs.
    ///
    /// Dependencies outside the node set are treated as already satisfied.
    pub fn new<I>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (String, BTreeSet<String>)>,
    {
        let nodes: Vec<(String, BTreeSet<String>)> = nodes.into_iter().collect();
        let known: BTreeSet<&String> = nodes.iter().map(|(k, _)| k).collect();

        let mut state = Self::default();
        for (key, deps) in &nodes {
            let deps: BTreeSet<String> = deps.iter().filter(|d| known.contains(d)).cloned().collect();
            for dep in &deps {
                state
                    .dependants
                    .entry(dep.clone())
                    .or_default()
                    .insert(key.clone());
            }
            state.waiting_on.insert(key.clone(), deps);
            state.status.insert(key.clone(), NodeStatus::Pending);
        }
        state
    }

    pub fn status(&self, key: &str) -> Option<NodeStatus> {
        self.status.get(key).copied()
    }

    /// Pending nodes whose dependencies are all complete, marked running
    pub fn take_ready(&mut self) -> Vec<String> {
        let ready: Vec<String> = self
            .waiting_on
            .iter()
            .filter(|(key, deps)| deps.is_empty() && self.status.get(*key) == Some(&NodeStatus::Pending))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &ready {
            self.status.insert(key.clone(), NodeStatus::Running);
        }
        ready
    }

    /// Mark a node complete, releasing its dependants
    pub fn complete(&mut self, key: &str) {
        if self.transition(key, NodeStatus::Complete) {
            if let Some(dependants) = self.dependants.get(key) {
                for dependant in dependants {
                    if let Some(waiting) = self.waiting_on.get_mut(dependant) {
                        waiting.remove(key);
                    }
                }
            }
        }
    }

    /// Mark a node failed. Returns its transitive dependants, now cancelled,
    /// in breadth-first order.
    pub fn fail(&mut self, key: &str) -> Vec<String> {
        if self.transition(key, NodeStatus::Failed) {
            self.cancel_dependants(key)
        } else {
            Vec::new()
        }
    }

    /// Cancel a node that has not started, and everything depending on it.
    ///
    /// Returns the node's transitive dependants that were cancelled, in
    /// breadth-first order.
    pub fn cancel(&mut self, key: &str) -> Vec<String> {
        if self.transition(key, NodeStatus::Cancelled) {
            self.cancel_dependants(key)
        } else {
            Vec::new()
        }
    }

    fn cancel_dependants(&mut self, key: &str) -> Vec<String> {
        let mut cancelled = Vec::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        queue.push_back(key.to_string());

        while let Some(current) = queue.pop_front() {
            let Some(dependants) = self.dependants.get(&current).cloned() else {
                continue;
            };
            for dependant in dependants {
                if self.status.get(&dependant) == Some(&NodeStatus::Pending) {
                    self.status.insert(dependant.clone(), NodeStatus::Cancelled);
                    cancelled.push(dependant.clone());
                    queue.push_back(dependant);
                }
            }
        }
        cancelled
    }

    fn transition(&mut self, key: &str, to: NodeStatus) -> bool {
        match self.status.get_mut(key) {
            Some(status) if !status.is_terminal() => {
                *status = to;
                true
            }
            _ => false,
        }
    }

    /// Whether every node reached a terminal state
    pub fn is_finished(&self) -> bool {
        self.status.values().all(|s| s.is_terminal())
    }

    /// Count of nodes in a given state
    pub fn count(&self, status: NodeStatus) -> usize {
        self.status.values().filter(|s| **s == status).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(edges: &[(&str, &[&str])]) -> BatchState {
        BatchState::new(edges.iter().map(|(k, deps)| {
            (
                k.to_string(),
                deps.iter().map(|d| d.to_string()).collect(),
            )
        }))
    }

    #[test]
    fn test_ready_in_dependency_order() {
        let mut s = state(&[("a", &[]), ("b", &["a"]), ("c", &["b"])]);

        assert_eq!(s.take_ready(), vec!["a"]);
        assert!(s.take_ready().is_empty());

        s.complete("a");
        assert_eq!(s.take_ready(), vec!["b"]);
        s.complete("b");
        assert_eq!(s.take_ready(), vec!["c"]);
        s.complete("c");
        assert!(s.is_finished());
    }

    #[test]
    fn test_failure_cancels_dependants_breadth_first() {
        let mut s = state(&[
            ("a", &[]),
            ("b", &["a"]),
            ("c", &["b"]),
            ("d", &["a"]),
            ("e", &[]),
        ]);
        let ready = s.take_ready();
        assert_eq!(ready, vec!["a", "e"]);

        let cancelled = s.fail("a");
        assert_eq!(cancelled, vec!["b", "d", "c"]);
        assert_eq!(s.status("c"), Some(NodeStatus::Cancelled));

        // unrelated sibling unaffected
        assert_eq!(s.status("e"), Some(NodeStatus::Running));
        assert!(!s.is_finished());
        s.complete("e");
        assert!(s.is_finished());
        assert_eq!(s.count(NodeStatus::Cancelled), 3);
    }

    #[test]
    fn test_cancel_pending_node() {
        let mut s = state(&[("a", &[]), ("b", &["a"])]);
        let cancelled = s.cancel("a");
        assert_eq!(cancelled, vec!["b"]);
        assert!(s.take_ready().is_empty());
        assert!(s.is_finished());
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut s = state(&[("a", &[])]);
        s.take_ready();
        s.complete("a");
        assert!(s.fail("a").is_empty());
        assert_eq!(s.status("a"), Some(NodeStatus::Complete));
    }

    #[test]
    fn test_external_dependencies_ignored() {
        let mut s = state(&[("b", &["outside"])]);
        assert_eq!(s.take_ready(), vec!["b"]);
    }

    #[test]
    fn test_diamond_waits_for_all() {
        let mut s = state(&[("a", &[]), ("b", &[]), ("c", &["a", "b"])]);
        assert_eq!(s.take_ready(), vec!["a", "b"]);
        s.complete("a");
        assert!(s.take_ready().is_empty());
        s.complete("b");
        assert_eq!(s.take_ready(), vec!["c"]);
    }
}
