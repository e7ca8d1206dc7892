/// Bounded task queue between the generators and the scheduler.
///
/// Capacity is an engine container: every queued task holds one unit, a put
/// on a full queue suspends the generator until `remove` frees a slot, and
/// blocked puts are admitted in the order they blocked.
///
/// Admissions are announced through the arrival event. The event latches:
/// tasks admitted before the scheduler consumes it with `take_arrival` join
/// the same batch instead of being lost.
use crate::engine::{ContainerId, EventId, Process, ProcessHandle, Sim, SimTime, Step, Wake};
use crate::error::{Result, SimError};
use crate::kernel::KernelId;
use crate::logging::ComponentLog;
use crate::simulator::{Signal, SimCtx, System};
use crate::task::{TaskArena, TaskId};

pub struct TaskQueue {
    capacity: usize,
    /// Live tasks in admission order
    tasks: Vec<TaskId>,
    slots: ContainerId,
    arrival: EventId,
    /// Admitted since the last `take_arrival`
    batch: Vec<TaskId>,
    log: ComponentLog,
}

impl TaskQueue {
    pub fn new<W, M: Clone>(capacity: usize, sim: &mut Sim<W, M>) -> Result<Self> {
        if capacity == 0 {
            return Err(SimError::InvalidWorkload(
                "task queue capacity must be at least 1".to_string(),
            ));
        }
        Ok(TaskQueue {
            capacity,
            tasks: Vec::with_capacity(capacity),
            slots: sim.container(capacity as u64, 0),
            arrival: sim.event(),
            batch: Vec::new(),
            log: ComponentLog::new("task_queue"),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn contains(&self, task: TaskId) -> bool {
        self.tasks.contains(&task)
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    /// Event fired with `Signal::Arrived` when a task is admitted.
    pub fn arrival_event(&self) -> EventId {
        self.arrival
    }

    /// Queues `task`, suspending while the queue is full. Join the returned
    /// handle's exit event to learn when it was admitted.
    pub fn put(&self, sim: &mut SimCtx, task: TaskId) -> ProcessHandle {
        sim.spawn(QueuePut { task })
    }

    fn admit(&mut self, sim: &mut SimCtx, tasks: &mut TaskArena, task: TaskId) -> Result<()> {
        let now = sim.now();
        let record = tasks.task_mut(task);
        record.queued_at = Some(now);
        self.tasks.push(task);
        self.batch.push(task);
        self.log.debug(
            now,
            format_args!("{} queued ({}/{})", record.tag, self.tasks.len(), self.capacity),
        );
        if !sim.is_triggered(self.arrival) {
            sim.succeed(self.arrival, Signal::Arrived(task))?;
        }
        Ok(())
    }

    /// Consumes the pending arrival batch and arms a fresh arrival event.
    /// Returns nothing if no arrival has fired since the last call.
    pub fn take_arrival<W, M: Clone>(&mut self, sim: &mut Sim<W, M>) -> Vec<TaskId> {
        if !sim.is_triggered(self.arrival) {
            return Vec::new();
        }
        self.arrival = sim.event();
        std::mem::take(&mut self.batch)
    }

    /// Removes `task` and frees its slot for the longest-blocked put.
    pub fn remove<W, M: Clone>(&mut self, sim: &mut Sim<W, M>, tasks: &TaskArena, task: TaskId) -> Result<()> {
        let position = self
            .tasks
            .iter()
            .position(|&t| t == task)
            .ok_or_else(|| SimError::TaskNotQueued(tasks.task(task).tag.clone()))?;
        self.tasks.remove(position);
        sim.take(self.slots, 1)?;
        self.log.debug(
            sim.now(),
            format_args!("{} removed ({}/{})", tasks.task(task).tag, self.tasks.len(), self.capacity),
        );
        Ok(())
    }

    /// Removes `task`, or the head of the queue when `None`.
    pub fn get<W, M: Clone>(&mut self, sim: &mut Sim<W, M>, tasks: &TaskArena, task: Option<TaskId>) -> Result<TaskId> {
        let task = match task {
            Some(task) => task,
            None => *self.tasks.first().ok_or(SimError::QueueEmpty)?,
        };
        self.remove(sim, tasks, task)?;
        Ok(task)
    }

    /// Ready kernels of every queued task, in queue order.
    pub fn ready_kernels(&self, tasks: &TaskArena) -> Vec<KernelId> {
        self.tasks
            .iter()
            .flat_map(|&task| tasks.ready_kernels(task))
            .collect()
    }

    /// Completion bookkeeping. When this finishes the kernel's task, the
    /// task leaves the queue and its done event fires. Returns the finished
    /// task, if any.
    pub fn on_kernel_done<W, M: Clone>(
        &mut self,
        sim: &mut Sim<W, M>,
        tasks: &mut TaskArena,
        kernel: KernelId,
    ) -> Result<Option<TaskId>> {
        if !tasks.complete_kernel(kernel)? {
            return Ok(None);
        }
        let task = tasks.kernel(kernel).task;
        self.remove(sim, tasks, task)?;
        let now = sim.now();
        let record = tasks.task_mut(task);
        record.done_at = Some(now);
        let done_event = record.done_event;
        sim.trigger(done_event)?;
        Ok(Some(task))
    }

    pub fn on_kernel_scheduled(&self, tasks: &mut TaskArena, kernel: KernelId, now: SimTime) -> Result<()> {
        tasks.schedule_kernel(kernel, now)
    }
}

/// Suspends on queue capacity, then admits one task.
struct QueuePut {
    task: TaskId,
}

impl Process<System, Signal> for QueuePut {
    fn resume(&mut self, world: &mut System, sim: &mut SimCtx, wake: Wake<Signal>) -> Result<Step> {
        match wake {
            Wake::Start if world.queue.contains(self.task) => Ok(Step::Exit),
            Wake::Start => Ok(Step::Put(world.queue.slots, 1)),
            Wake::Put(_) => {
                if world.queue.contains(self.task) {
                    // admitted by a concurrent put while this one was blocked
                    sim.take(world.queue.slots, 1)?;
                } else {
                    world.queue.admit(sim, &mut world.tasks, self.task)?;
                }
                Ok(Step::Exit)
            }
            other => Err(SimError::UnexpectedWake {
                process: self.name().to_string(),
                wake: other.kind(),
            }),
        }
    }

    fn name(&self) -> &str {
        "queue_put"
    }
}
