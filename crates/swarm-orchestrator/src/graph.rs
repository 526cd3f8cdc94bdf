use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use swarm_core::store::{StateStore, StoreError, TaskFilter};
use swarm_core::types::{Task, TaskStatus};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    /// Adding the edge would close a directed cycle. Carries the cycle
    /// path for the caller's error response.
    #[error("cycle detected: {0:?}")]
    CycleDetected(Vec<Uuid>),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// DependencyGraph
// ---------------------------------------------------------------------------

/// The task DAG. Storage is delegated to the state store; this type owns
/// the algorithms. All traversals are iterative (explicit stacks) so
/// pathological graphs cannot blow the call stack.
pub struct DependencyGraph {
    store: Arc<dyn StateStore>,
}

impl DependencyGraph {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Add `task -> depends_on`, rejecting self-edges and any edge that
    /// would introduce a cycle.
    pub async fn add_dependency(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        if task == depends_on {
            return Err(GraphError::CycleDetected(vec![task]));
        }

        // Starting from the dependency, walk forward edges; if the new
        // edge's source is reachable the edge would close a loop.
        if let Some(mut path) = self.find_path(depends_on, task).await? {
            path.insert(0, task);
            return Err(GraphError::CycleDetected(path));
        }

        self.store.add_edge(task, depends_on).await?;
        debug!(task = %task, depends_on = %depends_on, "dependency added");
        Ok(())
    }

    pub async fn remove_dependency(&self, task: Uuid, depends_on: Uuid) -> Result<()> {
        self.store.remove_edge(task, depends_on).await?;
        Ok(())
    }

    pub async fn get_dependencies(&self, task: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.store.get_dependencies(task).await?)
    }

    pub async fn get_dependents(&self, task: Uuid) -> Result<Vec<Uuid>> {
        Ok(self.store.get_dependents(task).await?)
    }

    /// Iterative DFS from `from` through forward edges looking for `to`.
    /// Returns the path `from .. to` when reachable.
    async fn find_path(&self, from: Uuid, to: Uuid) -> Result<Option<Vec<Uuid>>> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut stack: Vec<Vec<Uuid>> = vec![vec![from]];

        while let Some(path) = stack.pop() {
            let node = *path.last().expect("paths are never empty");
            if node == to {
                return Ok(Some(path));
            }
            if !visited.insert(node) {
                continue;
            }
            for next in self.store.get_dependencies(node).await? {
                if !visited.contains(&next) {
                    let mut extended = path.clone();
                    extended.push(next);
                    stack.push(extended);
                }
            }
        }
        Ok(None)
    }

    /// Whether every direct dependency of `task` is in `completed`
    /// status. A missing dependency task counts as unmet.
    pub async fn deps_completed(&self, task: Uuid) -> Result<bool> {
        for dep in self.store.get_dependencies(task).await? {
            match self.store.get_task(dep).await? {
                Some(t) if t.status == TaskStatus::Completed => {}
                _ => return Ok(false),
            }
        }
        Ok(true)
    }

    /// The direct dependencies of `task` that are not yet completed.
    pub async fn unmet_dependencies(&self, task: Uuid) -> Result<Vec<Uuid>> {
        let mut unmet = Vec::new();
        for dep in self.store.get_dependencies(task).await? {
            match self.store.get_task(dep).await? {
                Some(t) if t.status == TaskStatus::Completed => {}
                _ => unmet.push(dep),
            }
        }
        Ok(unmet)
    }

    /// All `pending` tasks whose direct dependencies are all completed.
    pub async fn get_ready_tasks(&self) -> Result<Vec<Task>> {
        let pending = self
            .store
            .list_tasks(&TaskFilter::by_status(TaskStatus::Pending))
            .await?;

        let mut ready = Vec::new();
        for task in pending {
            if self.deps_completed(task.id).await? {
                ready.push(task);
            }
        }
        Ok(ready)
    }

    /// Kahn's algorithm over every task in the store. Fails with a
    /// cycle-detected error when the emitted order is shorter than the
    /// task count.
    pub async fn topological_order(&self) -> Result<Vec<Uuid>> {
        let tasks = self.store.list_tasks(&TaskFilter::default()).await?;
        let nodes: HashSet<Uuid> = tasks.iter().map(|t| t.id).collect();

        // In-degree = number of dependencies that are themselves known
        // tasks; edges to expired/unknown tasks don't gate ordering.
        let mut in_degree: HashMap<Uuid, usize> = HashMap::new();
        let mut forward: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
        for &node in &nodes {
            let deps: Vec<Uuid> = self
                .store
                .get_dependencies(node)
                .await?
                .into_iter()
                .filter(|d| nodes.contains(d))
                .collect();
            in_degree.insert(node, deps.len());
            for dep in deps {
                forward.entry(dep).or_default().push(node);
            }
        }

        let mut queue: VecDeque<Uuid> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(nodes.len());
        while let Some(node) = queue.pop_front() {
            order.push(node);
            if let Some(dependents) = forward.get(&node) {
                for &dependent in dependents {
                    let deg = in_degree
                        .get_mut(&dependent)
                        .expect("dependent seeded above");
                    *deg -= 1;
                    if *deg == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if order.len() != nodes.len() {
            let missing: Vec<Uuid> = nodes
                .iter()
                .filter(|n| !order.contains(n))
                .copied()
                .collect();
            return Err(GraphError::CycleDetected(missing));
        }
        Ok(order)
    }

    /// Coloured DFS over the whole graph. Returns the first cycle's path,
    /// or `None` when the graph is acyclic.
    pub async fn detect_cycles(&self) -> Result<Option<Vec<Uuid>>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            Gray,
            Black,
        }

        let tasks = self.store.list_tasks(&TaskFilter::default()).await?;
        let mut color: HashMap<Uuid, Color> = HashMap::new();

        for task in &tasks {
            if color.contains_key(&task.id) {
                continue;
            }

            // Frame: (node, its deps, next child index).
            let mut stack: Vec<(Uuid, Vec<Uuid>, usize)> = Vec::new();
            let deps = self.store.get_dependencies(task.id).await?;
            color.insert(task.id, Color::Gray);
            stack.push((task.id, deps, 0));

            while !stack.is_empty() {
                let (node, child) = {
                    let frame = stack.last_mut().expect("stack checked non-empty");
                    if frame.2 >= frame.1.len() {
                        (frame.0, None)
                    } else {
                        let child = frame.1[frame.2];
                        frame.2 += 1;
                        (frame.0, Some(child))
                    }
                };

                let Some(child) = child else {
                    color.insert(node, Color::Black);
                    stack.pop();
                    continue;
                };

                match color.get(&child).copied() {
                    Some(Color::Gray) => {
                        // Back-edge: the cycle is the stack suffix from
                        // the child's frame plus the child itself.
                        let start = stack
                            .iter()
                            .position(|(n, _, _)| *n == child)
                            .unwrap_or(0);
                        let mut cycle: Vec<Uuid> =
                            stack[start..].iter().map(|(n, _, _)| *n).collect();
                        cycle.push(child);
                        return Ok(Some(cycle));
                    }
                    Some(Color::Black) => {}
                    None => {
                        let child_deps = self.store.get_dependencies(child).await?;
                        color.insert(child, Color::Gray);
                        stack.push((child, child_deps, 0));
                    }
                }
            }
        }
        Ok(None)
    }

    /// Transitive closure of dependencies of `task`, excluding `task`.
    pub async fn dependency_chain(&self, task: Uuid) -> Result<Vec<Uuid>> {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut stack = vec![task];

        while let Some(node) = stack.pop() {
            for dep in self.store.get_dependencies(node).await? {
                if dep != task && seen.insert(dep) {
                    stack.push(dep);
                }
            }
        }
        Ok(seen.into_iter().collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
