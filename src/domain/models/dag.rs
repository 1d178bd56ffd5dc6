//! Directed Acyclic Graph (DAG) domain models
//!
//! A feature's tasks form a DAG: a [`Connection`] `{from, to}` means `from`
//! must complete before `to` may start. The graph never contains a cycle; any
//! insertion that would create one is rejected before it is applied.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::task::{Task, TaskStatus};
use crate::domain::errors::{DomainError, DomainResult};

/// An edge in the task DAG representing a dependency relationship
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// The dependency (must complete first)
    pub from: String,
    /// The dependent task
    pub to: String,
}

impl Connection {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// Task nodes plus dependency edges.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DagGraph {
    tasks: BTreeMap<String, Task>,
    connections: Vec<Connection>,
}

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util(
    node: &str,
    graph: &HashMap<&str, Vec<&str>>,
    visited: &mut HashSet<String>,
    rec_stack: &mut HashSet<String>,
    path: &mut Vec<String>,
) -> bool {
    visited.insert(node.to_string());
    rec_stack.insert(node.to_string());
    path.push(node.to_string());

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor.to_string());
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl DagGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get_task(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn get_task_mut(&mut self, id: &str) -> Option<&mut Task> {
        self.tasks.get_mut(id)
    }

    pub fn contains_task(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Insert a new task. Task ids must be unique within the graph.
    pub fn add_task(&mut self, task: Task) -> DomainResult<()> {
        if task.id.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "Task id cannot be empty".to_string(),
            ));
        }
        if self.tasks.contains_key(&task.id) {
            return Err(DomainError::ValidationFailed(format!(
                "Task '{}' already exists",
                task.id
            )));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Remove a task together with every edge touching it.
    ///
    /// Dependents of the removed task are not reconnected to its dependencies.
    pub fn remove_task(&mut self, id: &str) -> DomainResult<Task> {
        let task = self
            .tasks
            .remove(id)
            .ok_or_else(|| DomainError::TaskNotFound(id.to_string()))?;
        self.connections.retain(|c| c.from != id && c.to != id);
        Ok(task)
    }

    /// Whether adding `from -> to` would close a cycle.
    ///
    /// A cycle appears iff `from` is already reachable from `to`.
    pub fn would_create_cycle(&self, from: &str, to: &str) -> bool {
        if from == to {
            return true;
        }
        let mut stack = vec![to];
        let mut seen: HashSet<&str> = HashSet::new();
        while let Some(current) = stack.pop() {
            if current == from {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            for conn in &self.connections {
                if conn.from == current {
                    stack.push(conn.to.as_str());
                }
            }
        }
        false
    }

    /// Add a dependency edge, rejecting it (graph unchanged) if it would
    /// create a cycle.
    ///
    /// Returns `Ok(false)` when the edge already exists.
    pub fn add_connection(&mut self, from: &str, to: &str) -> DomainResult<bool> {
        if !self.tasks.contains_key(from) {
            return Err(DomainError::TaskNotFound(from.to_string()));
        }
        if !self.tasks.contains_key(to) {
            return Err(DomainError::TaskNotFound(to.to_string()));
        }
        if self.connections.iter().any(|c| c.from == from && c.to == to) {
            return Ok(false);
        }
        if self.would_create_cycle(from, to) {
            let mut path = self.path_between(to, from).unwrap_or_default();
            path.push(to.to_string());
            return Err(DomainError::DependencyCycle(path));
        }
        self.connections.push(Connection::new(from, to));
        Ok(true)
    }

    /// Remove a dependency edge. Returns whether it existed.
    pub fn remove_connection(&mut self, from: &str, to: &str) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| !(c.from == from && c.to == to));
        self.connections.len() != before
    }

    /// Breadth-first path of task ids from `start` to `goal` along edges.
    fn path_between(&self, start: &str, goal: &str) -> Option<Vec<String>> {
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut seen: HashSet<&str> = HashSet::from([start]);
        while let Some(current) = queue.pop_front() {
            if current == goal {
                let mut path = vec![goal.to_string()];
                let mut cursor = goal;
                while let Some(&parent) = parents.get(cursor) {
                    path.push(parent.to_string());
                    cursor = parent;
                }
                path.reverse();
                return Some(path);
            }
            for conn in self.connections.iter().filter(|c| c.from == current) {
                if seen.insert(conn.to.as_str()) {
                    parents.insert(conn.to.as_str(), current);
                    queue.push_back(conn.to.as_str());
                }
            }
        }
        None
    }

    /// Tasks that must complete before `id` may start.
    pub fn dependencies_of(&self, id: &str) -> Vec<&Task> {
        self.connections
            .iter()
            .filter(|c| c.to == id)
            .filter_map(|c| self.tasks.get(&c.from))
            .collect()
    }

    /// Tasks waiting on `id`.
    pub fn dependents_of(&self, id: &str) -> Vec<&Task> {
        self.connections
            .iter()
            .filter(|c| c.from == id)
            .filter_map(|c| self.tasks.get(&c.to))
            .collect()
    }

    /// Completed parents of `id`, used as dependency context for its agent.
    pub fn completed_dependencies(&self, id: &str) -> Vec<&Task> {
        self.dependencies_of(id)
            .into_iter()
            .filter(|t| t.status.is_completed())
            .collect()
    }

    /// Effective readiness: every incoming-edge source is completed.
    pub fn is_ready(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
            && self
                .dependencies_of(id)
                .iter()
                .all(|t| t.status.is_completed())
    }

    /// Ids of tasks whose dependencies are all complete and which have not
    /// been started yet.
    pub fn ready_tasks(&self) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Blocked | TaskStatus::Ready))
            .filter(|t| self.is_ready(&t.id))
            .collect()
    }

    /// Detect a cycle anywhere in the graph, returning its path.
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        let mut graph: HashMap<&str, Vec<&str>> = HashMap::new();
        for id in self.tasks.keys() {
            graph.entry(id.as_str()).or_default();
        }
        for conn in &self.connections {
            graph.entry(conn.from.as_str()).or_default().push(conn.to.as_str());
        }

        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();
        let mut path = Vec::new();

        for id in self.tasks.keys() {
            if !visited.contains(id.as_str())
                && detect_cycle_util(id, &graph, &mut visited, &mut rec_stack, &mut path)
            {
                return Some(path);
            }
        }
        None
    }

    /// Dependencies before dependents (Kahn's algorithm, ties by id).
    pub fn topological_order(&self) -> DomainResult<Vec<String>> {
        let mut in_degree: BTreeMap<&str, usize> =
            self.tasks.keys().map(|id| (id.as_str(), 0)).collect();
        for conn in &self.connections {
            if let Some(degree) = in_degree.get_mut(conn.to.as_str()) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut sorted = Vec::with_capacity(self.tasks.len());

        while let Some(node) = queue.pop_front() {
            sorted.push(node.to_string());
            for conn in self.connections.iter().filter(|c| c.from == node) {
                if let Some(degree) = in_degree.get_mut(conn.to.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(conn.to.as_str());
                    }
                }
            }
        }

        if sorted.len() != self.tasks.len() {
            return Err(DomainError::DependencyCycle(
                self.detect_cycle().unwrap_or_default(),
            ));
        }
        Ok(sorted)
    }

    /// Whether every task in the graph is completed (false for an empty graph).
    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty() && self.tasks.values().all(|t| t.status.is_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(ids: &[&str]) -> DagGraph {
        let mut graph = DagGraph::new();
        for id in ids {
            graph.add_task(Task::new(*id, format!("Task {id}"), "desc")).unwrap();
        }
        graph
    }

    #[test]
    fn test_add_connection_and_dependencies() {
        let mut graph = graph_with(&["a", "b", "c"]);
        assert!(graph.add_connection("a", "b").unwrap());
        assert!(graph.add_connection("b", "c").unwrap());

        let deps: Vec<_> = graph.dependencies_of("c").iter().map(|t| t.id.clone()).collect();
        assert_eq!(deps, vec!["b"]);
        let dependents: Vec<_> = graph.dependents_of("a").iter().map(|t| t.id.clone()).collect();
        assert_eq!(dependents, vec!["b"]);
    }

    #[test]
    fn test_duplicate_connection_is_noop() {
        let mut graph = graph_with(&["a", "b"]);
        assert!(graph.add_connection("a", "b").unwrap());
        assert!(!graph.add_connection("a", "b").unwrap());
        assert_eq!(graph.connections().len(), 1);
    }

    #[test]
    fn test_cycle_rejected_and_graph_unchanged() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_connection("a", "b").unwrap();
        graph.add_connection("b", "c").unwrap();
        let before = graph.clone();

        let err = graph.add_connection("c", "a").unwrap_err();
        match err {
            DomainError::DependencyCycle(path) => {
                assert_eq!(path.first().map(String::as_str), Some("a"));
                assert_eq!(path.last().map(String::as_str), Some("a"));
                assert!(path.contains(&"c".to_string()));
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
        assert_eq!(graph, before);
    }

    #[test]
    fn test_self_loop_rejected() {
        let mut graph = graph_with(&["a"]);
        assert!(matches!(
            graph.add_connection("a", "a"),
            Err(DomainError::DependencyCycle(_))
        ));
        assert!(graph.connections().is_empty());
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let mut graph = graph_with(&["a"]);
        assert!(matches!(
            graph.add_connection("a", "zzz"),
            Err(DomainError::TaskNotFound(id)) if id == "zzz"
        ));
    }

    #[test]
    fn test_readiness() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_connection("a", "c").unwrap();
        graph.add_connection("b", "c").unwrap();

        assert!(graph.is_ready("a"));
        assert!(!graph.is_ready("c"));

        graph.get_task_mut("a").unwrap().status = TaskStatus::Completed;
        assert!(!graph.is_ready("c"));

        graph.get_task_mut("b").unwrap().status = TaskStatus::Completed;
        assert!(graph.is_ready("c"));

        let ready: Vec<_> = graph.ready_tasks().iter().map(|t| t.id.clone()).collect();
        assert_eq!(ready, vec!["c"]);
    }

    #[test]
    fn test_completed_dependencies_filters_incomplete() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_connection("a", "c").unwrap();
        graph.add_connection("b", "c").unwrap();
        graph.get_task_mut("a").unwrap().status = TaskStatus::Completed;

        let done: Vec<_> = graph.completed_dependencies("c").iter().map(|t| t.id.clone()).collect();
        assert_eq!(done, vec!["a"]);
    }

    #[test]
    fn test_remove_task_drops_edges() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.add_connection("a", "b").unwrap();
        graph.add_connection("b", "c").unwrap();
        graph.remove_task("b").unwrap();
        assert!(graph.connections().is_empty());
        assert!(graph.is_ready("c"));
    }

    #[test]
    fn test_topological_order() {
        let mut graph = graph_with(&["d", "c", "b", "a"]);
        graph.add_connection("a", "b").unwrap();
        graph.add_connection("b", "c").unwrap();
        graph.add_connection("a", "d").unwrap();
        let order = graph.topological_order().unwrap();
        let pos = |id: &str| order.iter().position(|x| x == id).unwrap();
        assert!(pos("a") < pos("b"));
        assert!(pos("b") < pos("c"));
        assert!(pos("a") < pos("d"));
        assert!(graph.detect_cycle().is_none());
    }

    #[test]
    fn test_all_completed() {
        let mut graph = graph_with(&["a", "b"]);
        assert!(!graph.all_completed());
        graph.get_task_mut("a").unwrap().status = TaskStatus::Completed;
        graph.get_task_mut("b").unwrap().status = TaskStatus::Completed;
        assert!(graph.all_completed());
        assert!(!DagGraph::new().all_completed());
    }
}
