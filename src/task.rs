/// Tasks and the arena that owns every task and kernel of a run.
///
/// A task is one arrival of a workload query: a small DAG of kernels that
/// share a tag prefix. Kernels are stored in dependency order (a DFS
/// post-order over the declared specs), so walking a task's kernel list from
/// the cursor onwards always meets producers before consumers.
///
/// Records are never removed from the arena. Once a task finishes it simply
/// leaves the queue; its timestamps stay here for the run report.
use crate::engine::{EventId, SimTime};
use crate::error::{Result, SimError};
use crate::kernel::{Kernel, KernelId, KernelSpec, KernelStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Index of a task in the task arena.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub query: String,
    /// Arrival index within the query
    pub index: usize,
    /// `<query>#<index>`
    pub tag: String,
    /// Kernels in dependency order
    pub kernels: Vec<KernelId>,
    /// First position in `kernels` that may still be pending
    pub cursor: usize,
    pub generated_at: Option<SimTime>,
    pub queued_at: Option<SimTime>,
    /// Earliest schedule time over the task's kernels
    pub scheduled_at: Option<SimTime>,
    pub done_at: Option<SimTime>,
    /// Fires once every kernel is DONE
    pub done_event: EventId,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)
    }
}

// ---------------------------------------------------------------------------
// Dependency ordering
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unvisited,
    Visiting,
    Done,
}

/// Orders specs so every kernel follows its dependencies. Roots and their
/// dependencies are visited in declaration order.
pub fn dependency_order(task_tag: &str, specs: &[KernelSpec]) -> Result<Vec<usize>> {
    let mut by_name: HashMap<&str, usize> = HashMap::new();
    for (i, spec) in specs.iter().enumerate() {
        by_name.entry(spec.name.as_str()).or_insert(i);
    }

    let mut marks = vec![Mark::Unvisited; specs.len()];
    let mut order = Vec::with_capacity(specs.len());
    for root in 0..specs.len() {
        visit(task_tag, specs, &by_name, root, &mut marks, &mut order)?;
    }
    Ok(order)
}

fn visit(
    task_tag: &str,
    specs: &[KernelSpec],
    by_name: &HashMap<&str, usize>,
    node: usize,
    marks: &mut [Mark],
    order: &mut Vec<usize>,
) -> Result<()> {
    match marks[node] {
        Mark::Done => return Ok(()),
        Mark::Visiting => {
            return Err(SimError::DependencyCycle {
                task: task_tag.to_string(),
                kernel: specs[node].name.clone(),
            });
        }
        Mark::Unvisited => {}
    }
    marks[node] = Mark::Visiting;
    for dependency in &specs[node].dependencies {
        let &next = by_name
            .get(dependency.as_str())
            .ok_or_else(|| SimError::UnknownDependency {
                task: task_tag.to_string(),
                kernel: specs[node].name.clone(),
                dependency: dependency.clone(),
            })?;
        visit(task_tag, specs, by_name, next, marks, order)?;
    }
    marks[node] = Mark::Done;
    order.push(node);
    Ok(())
}

// ---------------------------------------------------------------------------
// TaskArena
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct TaskArena {
    tasks: Vec<Task>,
    kernels: Vec<Kernel>,
}

impl TaskArena {
    pub fn new() -> Self {
        TaskArena::default()
    }

    /// Builds a task and its kernels. Fails on unknown dependencies or cycles
    /// without touching the arena.
    pub fn create(
        &mut self,
        query: &str,
        index: usize,
        specs: &[KernelSpec],
        done_event: EventId,
    ) -> Result<TaskId> {
        let tag = format!("{}#{}", query, index);
        let order = dependency_order(&tag, specs)?;

        let id = TaskId(self.tasks.len());
        let mut kernels = Vec::with_capacity(order.len());
        for i in order {
            let kernel_id = KernelId(self.kernels.len());
            self.kernels.push(Kernel::new(kernel_id, id, &tag, &specs[i]));
            kernels.push(kernel_id);
        }

        self.tasks.push(Task {
            id,
            query: query.to_string(),
            index,
            tag,
            kernels,
            cursor: 0,
            generated_at: None,
            queued_at: None,
            scheduled_at: None,
            done_at: None,
            done_event,
        });
        Ok(id)
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.tasks[id.0]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id.0]
    }

    pub fn kernel(&self, id: KernelId) -> &Kernel {
        &self.kernels[id.0]
    }

    pub fn kernel_mut(&mut self, id: KernelId) -> &mut Kernel {
        &mut self.kernels[id.0]
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn kernels(&self) -> &[Kernel] {
        &self.kernels
    }

    /// Kernels from the cursor onwards that are still PENDING.
    pub fn pending_kernels(&self, task: TaskId) -> Vec<KernelId> {
        let task = self.task(task);
        task.kernels[task.cursor..]
            .iter()
            .copied()
            .filter(|&k| self.kernel(k).is_pending())
            .collect()
    }

    /// Pending kernels whose dependencies have all completed.
    pub fn ready_kernels(&self, task: TaskId) -> Vec<KernelId> {
        self.pending_kernels(task)
            .into_iter()
            .filter(|&k| self.kernel(k).is_ready())
            .collect()
    }

    pub fn is_complete(&self, task: TaskId) -> bool {
        self.task(task)
            .kernels
            .iter()
            .all(|&k| self.kernel(k).status == KernelStatus::Done)
    }

    /// RUNNING bookkeeping for a committed kernel. The task's schedule time
    /// is the earliest of its kernels'.
    pub fn schedule_kernel(&mut self, kernel: KernelId, now: SimTime) -> Result<()> {
        let k = self.kernel_mut(kernel);
        k.mark_running(now)?;
        let task = k.task;
        let t = self.task_mut(task);
        t.scheduled_at = Some(t.scheduled_at.map_or(now, |at| at.min(now)));
        self.advance_cursor(task);
        Ok(())
    }

    /// DONE bookkeeping: clears the kernel from its siblings' dependency
    /// sets. Returns true if this completed the task.
    pub fn complete_kernel(&mut self, kernel: KernelId) -> Result<bool> {
        let k = self.kernel_mut(kernel);
        k.mark_done()?;
        let task = k.task;
        let name = k.name.clone();

        for sibling in self.pending_kernels(task) {
            self.kernel_mut(sibling).clear_dependency(&name);
        }
        self.advance_cursor(task);
        Ok(self.is_complete(task))
    }

    fn advance_cursor(&mut self, task: TaskId) {
        let mut cursor = self.task(task).cursor;
        let kernels = &self.tasks[task.0].kernels;
        while cursor < kernels.len() && !self.kernels[kernels[cursor].0].is_pending() {
            cursor += 1;
        }
        self.tasks[task.0].cursor = cursor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Sim;

    fn done_event() -> EventId {
        let mut sim: Sim<(), ()> = Sim::new();
        sim.event()
    }

    fn names(arena: &TaskArena, ids: &[KernelId]) -> Vec<String> {
        ids.iter().map(|&k| arena.kernel(k).name.clone()).collect()
    }

    /// Diamond declared consumers-first.
    fn diamond() -> Vec<KernelSpec> {
        vec![
            KernelSpec::new("merge", "conv", &["left", "right"]),
            KernelSpec::new("left", "conv", &["load"]),
            KernelSpec::new("right", "conv", &["load"]),
            KernelSpec::new("load", "pool", &[]),
        ]
    }

    #[test]
    fn kernels_follow_their_dependencies() -> anyhow::Result<()> {
        let mut arena = TaskArena::new();
        let task = arena.create("diamond", 0, &diamond(), done_event())?;
        let t = arena.task(task);
        assert_eq!(t.tag, "diamond#0");
        assert_eq!(names(&arena, &t.kernels), vec!["load", "left", "right", "merge"]);
        assert_eq!(arena.kernel(t.kernels[0]).tag, "diamond#0_load");
        Ok(())
    }

    #[test]
    fn independent_kernels_keep_declaration_order() -> anyhow::Result<()> {
        let specs = vec![
            KernelSpec::new("b", "relu", &[]),
            KernelSpec::new("a", "relu", &[]),
            KernelSpec::new("c", "relu", &["a"]),
        ];
        let mut arena = TaskArena::new();
        let task = arena.create("q", 2, &specs, done_event())?;
        assert_eq!(names(&arena, &arena.task(task).kernels), vec!["b", "a", "c"]);
        Ok(())
    }

    #[test]
    fn unknown_dependency_is_rejected() {
        let specs = vec![KernelSpec::new("a", "relu", &["ghost"])];
        let mut arena = TaskArena::new();
        let err = arena.create("q", 0, &specs, done_event());
        assert!(matches!(err, Err(SimError::UnknownDependency { ref dependency, .. }) if dependency == "ghost"));
        assert!(arena.tasks().is_empty());
        assert!(arena.kernels().is_empty());
    }

    #[test]
    fn cycle_is_rejected() {
        let specs = vec![
            KernelSpec::new("a", "relu", &["c"]),
            KernelSpec::new("b", "relu", &["a"]),
            KernelSpec::new("c", "relu", &["b"]),
        ];
        let mut arena = TaskArena::new();
        assert!(matches!(
            arena.create("q", 0, &specs, done_event()),
            Err(SimError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn completion_unlocks_dependents() -> anyhow::Result<()> {
        let mut arena = TaskArena::new();
        let task = arena.create("diamond", 0, &diamond(), done_event())?;
        let ready = arena.ready_kernels(task);
        assert_eq!(names(&arena, &ready), vec!["load"]);

        arena.schedule_kernel(ready[0], 10)?;
        assert!(arena.ready_kernels(task).is_empty());
        assert_eq!(arena.task(task).cursor, 1);
        assert_eq!(arena.task(task).scheduled_at, Some(10));

        assert!(!arena.complete_kernel(ready[0])?);
        let ready = arena.ready_kernels(task);
        assert_eq!(names(&arena, &ready), vec!["left", "right"]);

        arena.schedule_kernel(ready[1], 20)?;
        arena.schedule_kernel(ready[0], 25)?;
        assert_eq!(arena.task(task).scheduled_at, Some(10));
        assert!(!arena.complete_kernel(ready[1])?);
        assert!(arena.ready_kernels(task).is_empty());
        assert!(!arena.complete_kernel(ready[0])?);

        let merge = arena.ready_kernels(task);
        assert_eq!(names(&arena, &merge), vec!["merge"]);
        arena.schedule_kernel(merge[0], 40)?;
        assert!(arena.complete_kernel(merge[0])?);
        assert!(arena.is_complete(task));
        assert_eq!(arena.task(task).cursor, 4);
        assert!(arena.pending_kernels(task).is_empty());
        Ok(())
    }

    #[test]
    fn completing_twice_fails() -> anyhow::Result<()> {
        let mut arena = TaskArena::new();
        let task = arena.create("single", 0, &[KernelSpec::new("a", "relu", &[])], done_event())?;
        let kernel = arena.task(task).kernels[0];
        arena.schedule_kernel(kernel, 0)?;
        assert!(arena.complete_kernel(kernel)?);
        assert!(arena.complete_kernel(kernel).is_err());
        Ok(())
    }
}
