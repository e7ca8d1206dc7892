/// Discrete-event simulation engine.
///
/// Virtual time is an integer tick counter. Simulation processes are explicit
/// state machines: the engine calls `Process::resume` with the reason the
/// process woke up, and the process answers with the `Step` it suspends on
/// next. All scheduled wake-ups live in one priority queue ordered by
/// (time, insertion sequence), so two wake-ups at the same tick always run in
/// the order they were scheduled and every run replays identically.
///
/// Primitives:
///   - `Timeout(d)`     resume at now + d
///   - `Wait(e)`        resume when event `e` fires (immediately if it already has)
///   - `WaitAny(es)`    resume when the first of `es` fires
///   - `Acquire(m)`     FIFO mutex, released explicitly with `Sim::release`
///   - `Put` / `Get`    bounded counting semaphore (container)
///
/// A suspended process can be interrupted; it then wakes with
/// `Wake::Interrupted` and whatever it was waiting on is forgotten.
use crate::error::{Result, SimError};
use crate::logging::ComponentLog;
use slab::Slab;
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, VecDeque};

/// Virtual time in ticks.
pub type SimTime = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MutexId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContainerId(usize);

/// A spawned process together with the event that fires when it exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: ProcessId,
    pub exit: EventId,
}

/// What a process suspends on after a resume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Timeout(SimTime),
    Wait(EventId),
    WaitAny(Vec<EventId>),
    Acquire(MutexId),
    Put(ContainerId, u64),
    Get(ContainerId, u64),
    Exit,
}

/// Why a process was resumed.
#[derive(Debug, Clone, PartialEq)]
pub enum Wake<M> {
    /// First resume after `spawn`
    Start,
    /// The requested timeout elapsed
    Timeout,
    /// The awaited event fired, with its value
    Fired(EventId, Option<M>),
    /// Every event of a `WaitAny` set that has fired, in the order they were listed
    FiredAny(Vec<(EventId, Option<M>)>),
    Acquired(MutexId),
    Put(ContainerId),
    Got(ContainerId),
    Interrupted,
}

impl<M> Wake<M> {
    /// True if this wake-up reports that `event` fired.
    pub fn fired(&self, event: EventId) -> bool {
        match self {
            Wake::Fired(ev, _) => *ev == event,
            Wake::FiredAny(fired) => fired.iter().any(|(ev, _)| *ev == event),
            _ => false,
        }
    }

    /// Value carried by `event`, if this wake-up reports it.
    pub fn value_of(&self, event: EventId) -> Option<&M> {
        match self {
            Wake::Fired(ev, value) if *ev == event => value.as_ref(),
            Wake::FiredAny(fired) => fired
                .iter()
                .find(|(ev, _)| *ev == event)
                .and_then(|(_, value)| value.as_ref()),
            _ => None,
        }
    }

    /// Short name of the wake-up, for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Wake::Start => "start",
            Wake::Timeout => "timeout",
            Wake::Fired(..) => "fired",
            Wake::FiredAny(_) => "fired_any",
            Wake::Acquired(_) => "acquired",
            Wake::Put(_) => "put",
            Wake::Got(_) => "got",
            Wake::Interrupted => "interrupted",
        }
    }
}

/// A cooperative simulation process over world state `W` and event payload `M`.
pub trait Process<W, M> {
    fn resume(&mut self, world: &mut W, sim: &mut Sim<W, M>, wake: Wake<M>) -> Result<Step>;

    fn name(&self) -> &str {
        "process"
    }
}

impl<W, M, F> Process<W, M> for F
where
    F: FnMut(&mut W, &mut Sim<W, M>, Wake<M>) -> Result<Step>,
{
    fn resume(&mut self, world: &mut W, sim: &mut Sim<W, M>, wake: Wake<M>) -> Result<Step> {
        self(world, sim, wake)
    }
}

// ---------------------------------------------------------------------------
// Internal bookkeeping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Start,
    Timeout,
    Event,
    Acquired(MutexId),
    Put(ContainerId),
    Got(ContainerId),
    Interrupted,
}

/// One pending wake-up. `token` identifies the suspension it belongs to;
/// once the process has been resumed for any other reason the entry is stale.
#[derive(Debug)]
struct Scheduled {
    at: SimTime,
    seq: u64,
    pid: ProcessId,
    token: u64,
    cause: Cause,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq))
    }
}

enum Waiting {
    Nothing,
    Event(EventId),
    Any(Vec<EventId>),
}

struct ProcessSlot<W, M> {
    name: String,
    body: Option<Box<dyn Process<W, M>>>,
    token: u64,
    waiting: Waiting,
    exit: EventId,
}

enum EventState<M> {
    Pending,
    Triggered(Option<M>),
}

struct EventSlot<M> {
    state: EventState<M>,
    waiters: Vec<(ProcessId, u64)>,
}

struct MutexSlot {
    capacity: usize,
    held: usize,
    queue: VecDeque<(ProcessId, u64)>,
}

#[derive(Debug, Clone, Copy)]
struct Request {
    pid: ProcessId,
    token: u64,
    amount: u64,
}

struct ContainerSlot {
    capacity: u64,
    level: u64,
    puts: VecDeque<Request>,
    gets: VecDeque<Request>,
}

// ---------------------------------------------------------------------------
// Sim
// ---------------------------------------------------------------------------

/// Clock, agenda and synchronization primitives. Processes receive a
/// `&mut Sim` on every resume and use it to spawn, fire events and release
/// resources.
pub struct Sim<W, M> {
    now: SimTime,
    seq: u64,
    next_token: u64,
    agenda: BinaryHeap<Reverse<Scheduled>>,
    processes: Slab<ProcessSlot<W, M>>,
    events: Vec<EventSlot<M>>,
    mutexes: Vec<MutexSlot>,
    containers: Vec<ContainerSlot>,
    log: ComponentLog,
}

impl<W, M: Clone> Sim<W, M> {
    pub fn new() -> Self {
        Sim {
            now: 0,
            seq: 0,
            next_token: 0,
            agenda: BinaryHeap::new(),
            processes: Slab::new(),
            events: Vec::new(),
            mutexes: Vec::new(),
            containers: Vec::new(),
            log: ComponentLog::new("engine"),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// Number of wake-ups still on the agenda (stale ones included).
    pub fn pending(&self) -> usize {
        self.agenda.len()
    }

    /// Time of the earliest wake-up on the agenda.
    pub fn peek(&self) -> Option<SimTime> {
        self.agenda.peek().map(|Reverse(entry)| entry.at)
    }

    // ------------------------------------------------------------------
    // Processes
    // ------------------------------------------------------------------

    /// Starts a process. Its first resume (`Wake::Start`) happens at the
    /// current time, after everything already scheduled for this tick.
    pub fn spawn<P>(&mut self, process: P) -> ProcessHandle
    where
        P: Process<W, M> + 'static,
    {
        let exit = self.event();
        let token = self.fresh_token();
        let name = process.name().to_string();
        let key = self.processes.insert(ProcessSlot {
            name,
            body: Some(Box::new(process)),
            token,
            waiting: Waiting::Nothing,
            exit,
        });
        let pid = ProcessId(key);
        let now = self.now;
        self.schedule(now, pid, token, Cause::Start);
        ProcessHandle { pid, exit }
    }

    pub fn is_alive(&self, pid: ProcessId) -> bool {
        self.processes.contains(pid.0)
    }

    /// Interrupts a process at its current (or, if it is running right now,
    /// its next) suspension point.
    pub fn interrupt(&mut self, pid: ProcessId) -> Result<()> {
        let slot = self
            .processes
            .get(pid.0)
            .ok_or(SimError::UnknownProcess(pid))?;
        let token = slot.token;
        self.log
            .debug(self.now, format_args!("interrupting '{}'", slot.name));
        let now = self.now;
        self.schedule(now, pid, token, Cause::Interrupted);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    /// Creates a one-shot event.
    pub fn event(&mut self) -> EventId {
        self.events.push(EventSlot {
            state: EventState::Pending,
            waiters: Vec::new(),
        });
        EventId(self.events.len() - 1)
    }

    /// Fires `event` with a value, resuming every waiter at the current time.
    pub fn succeed(&mut self, event: EventId, value: M) -> Result<()> {
        self.fire(event, Some(value))
    }

    /// Fires `event` without a value.
    pub fn trigger(&mut self, event: EventId) -> Result<()> {
        self.fire(event, None)
    }

    pub fn is_triggered(&self, event: EventId) -> bool {
        matches!(
            self.events.get(event.0).map(|slot| &slot.state),
            Some(EventState::Triggered(_))
        )
    }

    /// Value of a fired event.
    pub fn value(&self, event: EventId) -> Option<&M> {
        match self.events.get(event.0).map(|slot| &slot.state) {
            Some(EventState::Triggered(value)) => value.as_ref(),
            _ => None,
        }
    }

    fn fire(&mut self, event: EventId, value: Option<M>) -> Result<()> {
        let slot = self
            .events
            .get_mut(event.0)
            .ok_or(SimError::UnknownEvent(event))?;
        if let EventState::Triggered(_) = slot.state {
            return Err(SimError::EventAlreadyTriggered(event));
        }
        slot.state = EventState::Triggered(value);
        let waiters = std::mem::take(&mut slot.waiters);
        let now = self.now;
        for (pid, token) in waiters {
            if self.is_current(pid, token) {
                self.schedule(now, pid, token, Cause::Event);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutex
    // ------------------------------------------------------------------

    /// Creates a mutex admitting `capacity` holders at once.
    pub fn mutex(&mut self, capacity: usize) -> MutexId {
        self.mutexes.push(MutexSlot {
            capacity: capacity.max(1),
            held: 0,
            queue: VecDeque::new(),
        });
        MutexId(self.mutexes.len() - 1)
    }

    /// Releases one hold on `mutex`; the longest waiter is granted next.
    /// Any process may release, not only the one that acquired.
    pub fn release(&mut self, mutex: MutexId) -> Result<()> {
        let slot = self
            .mutexes
            .get_mut(mutex.0)
            .ok_or(SimError::UnknownMutex(mutex))?;
        if slot.held == 0 {
            return Err(SimError::MutexNotHeld(mutex));
        }
        slot.held -= 1;
        self.grant_mutex(mutex);
        Ok(())
    }

    pub fn holders(&self, mutex: MutexId) -> usize {
        self.mutexes.get(mutex.0).map_or(0, |slot| slot.held)
    }

    fn grant_mutex(&mut self, mutex: MutexId) {
        let now = self.now;
        loop {
            let slot = &mut self.mutexes[mutex.0];
            if slot.held >= slot.capacity {
                break;
            }
            let Some((pid, token)) = slot.queue.pop_front() else {
                break;
            };
            if self.is_current(pid, token) {
                self.mutexes[mutex.0].held += 1;
                self.schedule(now, pid, token, Cause::Acquired(mutex));
            }
        }
    }

    // ------------------------------------------------------------------
    // Container (counting semaphore)
    // ------------------------------------------------------------------

    /// Creates a container holding `level` units out of `capacity`.
    pub fn container(&mut self, capacity: u64, level: u64) -> ContainerId {
        self.containers.push(ContainerSlot {
            capacity,
            level: level.min(capacity),
            puts: VecDeque::new(),
            gets: VecDeque::new(),
        });
        ContainerId(self.containers.len() - 1)
    }

    pub fn level(&self, container: ContainerId) -> u64 {
        self.containers.get(container.0).map_or(0, |slot| slot.level)
    }

    /// Removes `amount` units without suspending and wakes blocked putters.
    pub fn take(&mut self, container: ContainerId, amount: u64) -> Result<()> {
        let slot = self
            .containers
            .get_mut(container.0)
            .ok_or(SimError::UnknownContainer(container))?;
        if slot.level < amount {
            return Err(SimError::ContainerUnderflow {
                id: container,
                level: slot.level,
                amount,
            });
        }
        slot.level -= amount;
        self.trigger_container(container);
        Ok(())
    }

    /// Grants queued puts and gets in FIFO order. A request that does not
    /// fit blocks every request behind it on the same side.
    fn trigger_container(&mut self, container: ContainerId) {
        let now = self.now;
        loop {
            let mut progressed = false;

            while let Some(req) = self.containers[container.0].puts.front().copied() {
                if !self.is_current(req.pid, req.token) {
                    self.containers[container.0].puts.pop_front();
                    continue;
                }
                let slot = &mut self.containers[container.0];
                if slot.level + req.amount > slot.capacity {
                    break;
                }
                slot.level += req.amount;
                slot.puts.pop_front();
                self.schedule(now, req.pid, req.token, Cause::Put(container));
                progressed = true;
            }

            while let Some(req) = self.containers[container.0].gets.front().copied() {
                if !self.is_current(req.pid, req.token) {
                    self.containers[container.0].gets.pop_front();
                    continue;
                }
                let slot = &mut self.containers[container.0];
                if slot.level < req.amount {
                    break;
                }
                slot.level -= req.amount;
                slot.gets.pop_front();
                self.schedule(now, req.pid, req.token, Cause::Got(container));
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Run loop
    // ------------------------------------------------------------------

    /// Drains the agenda. With `until`, stops before the first wake-up at or
    /// after `until` and leaves the clock at `until`.
    pub fn run(&mut self, world: &mut W, until: Option<SimTime>) -> Result<()> {
        loop {
            let Some(at) = self.peek() else {
                break;
            };
            if until.is_some_and(|limit| at >= limit) {
                break;
            }
            let Some(Reverse(entry)) = self.agenda.pop() else {
                break;
            };
            // stale wake-ups must not move the clock
            if !self.is_current(entry.pid, entry.token) {
                continue;
            }
            self.now = entry.at;
            self.deliver(world, entry)?;
        }
        if let Some(limit) = until {
            self.now = self.now.max(limit);
        }
        Ok(())
    }

    fn deliver(&mut self, world: &mut W, entry: Scheduled) -> Result<()> {
        let token = self.fresh_token();
        let Some(slot) = self.processes.get_mut(entry.pid.0) else {
            return Ok(());
        };
        if slot.token != entry.token {
            return Ok(());
        }
        let Some(mut body) = slot.body.take() else {
            return Ok(());
        };
        slot.token = token;
        let waiting = std::mem::replace(&mut slot.waiting, Waiting::Nothing);

        let wake = match entry.cause {
            Cause::Start => Wake::Start,
            Cause::Timeout => Wake::Timeout,
            Cause::Event => match waiting {
                Waiting::Event(event) => Wake::Fired(event, self.value(event).cloned()),
                Waiting::Any(events) => Wake::FiredAny(
                    events
                        .into_iter()
                        .filter(|event| self.is_triggered(*event))
                        .map(|event| (event, self.value(event).cloned()))
                        .collect(),
                ),
                Waiting::Nothing => Wake::Start,
            },
            Cause::Acquired(mutex) => Wake::Acquired(mutex),
            Cause::Put(container) => Wake::Put(container),
            Cause::Got(container) => Wake::Got(container),
            Cause::Interrupted => Wake::Interrupted,
        };

        let step = match body.resume(world, self, wake) {
            Ok(step) => step,
            Err(err) => {
                self.log.error(
                    self.now,
                    format_args!("process '{}' failed: {}", body.name(), err),
                );
                return Err(err);
            }
        };
        if let Some(slot) = self.processes.get_mut(entry.pid.0) {
            slot.body = Some(body);
        }
        self.suspend(entry.pid, step)
    }

    fn suspend(&mut self, pid: ProcessId, step: Step) -> Result<()> {
        let Some(slot) = self.processes.get(pid.0) else {
            return Ok(());
        };
        let token = slot.token;
        let now = self.now;
        match step {
            Step::Timeout(delay) => {
                self.schedule(now + delay, pid, token, Cause::Timeout);
            }
            Step::Wait(event) => {
                self.register_waiter(event, pid, token)?;
                self.processes[pid.0].waiting = Waiting::Event(event);
                if self.is_triggered(event) {
                    self.schedule(now, pid, token, Cause::Event);
                }
            }
            Step::WaitAny(events) => {
                for event in &events {
                    self.register_waiter(*event, pid, token)?;
                }
                let ready = events.is_empty() || events.iter().any(|ev| self.is_triggered(*ev));
                self.processes[pid.0].waiting = Waiting::Any(events);
                if ready {
                    self.schedule(now, pid, token, Cause::Event);
                }
            }
            Step::Acquire(mutex) => {
                let slot = self
                    .mutexes
                    .get_mut(mutex.0)
                    .ok_or(SimError::UnknownMutex(mutex))?;
                slot.queue.push_back((pid, token));
                self.grant_mutex(mutex);
            }
            Step::Put(container, amount) => {
                let slot = self.container_slot(container)?;
                if amount > slot.capacity {
                    return Err(SimError::ContainerOverflow {
                        id: container,
                        amount,
                        capacity: slot.capacity,
                    });
                }
                slot.puts.push_back(Request { pid, token, amount });
                self.trigger_container(container);
            }
            Step::Get(container, amount) => {
                let slot = self.container_slot(container)?;
                if amount > slot.capacity {
                    return Err(SimError::ContainerOverflow {
                        id: container,
                        amount,
                        capacity: slot.capacity,
                    });
                }
                slot.gets.push_back(Request { pid, token, amount });
                self.trigger_container(container);
            }
            Step::Exit => {
                let slot = self.processes.remove(pid.0);
                self.log
                    .debug(now, format_args!("process '{}' exited", slot.name));
                self.fire(slot.exit, None)?;
            }
        }
        Ok(())
    }

    fn register_waiter(&mut self, event: EventId, pid: ProcessId, token: u64) -> Result<()> {
        let slot = self
            .events
            .get_mut(event.0)
            .ok_or(SimError::UnknownEvent(event))?;
        if let EventState::Pending = slot.state {
            slot.waiters.push((pid, token));
        }
        Ok(())
    }

    fn container_slot(&mut self, container: ContainerId) -> Result<&mut ContainerSlot> {
        self.containers
            .get_mut(container.0)
            .ok_or(SimError::UnknownContainer(container))
    }

    fn is_current(&self, pid: ProcessId, token: u64) -> bool {
        self.processes
            .get(pid.0)
            .is_some_and(|slot| slot.token == token)
    }

    fn fresh_token(&mut self) -> u64 {
        self.next_token += 1;
        self.next_token
    }

    fn schedule(&mut self, at: SimTime, pid: ProcessId, token: u64, cause: Cause) {
        self.seq += 1;
        self.agenda.push(Reverse(Scheduled {
            at,
            seq: self.seq,
            pid,
            token,
            cause,
        }));
    }
}

impl<W, M: Clone> Default for Sim<W, M> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// A simulation clock bundled with the world state its processes act on.
pub struct Engine<W, M> {
    pub sim: Sim<W, M>,
    pub world: W,
}

impl<W, M: Clone> Engine<W, M> {
    pub fn new(world: W) -> Self {
        Engine {
            sim: Sim::new(),
            world,
        }
    }

    pub fn now(&self) -> SimTime {
        self.sim.now()
    }

    pub fn spawn<P>(&mut self, process: P) -> ProcessHandle
    where
        P: Process<W, M> + 'static,
    {
        self.sim.spawn(process)
    }

    pub fn run(&mut self, until: Option<SimTime>) -> Result<()> {
        self.sim.run(&mut self.world, until)
    }
}
