/// Error types for the simulator.
///
/// Every variant here is fatal: it aborts the run and is surfaced to the
/// caller. Conditions the scheduler is expected to recover from (a kernel
/// that does not fit right now, an interrupted scheduling pass) are never
/// represented as errors.
use crate::engine::{ContainerId, EventId, MutexId, ProcessId};

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    // ------------------------------------------------------------------
    // Configuration errors
    // ------------------------------------------------------------------
    /// Partition policy name is not one of fixed/variable/flexible/full_flexible
    #[error("unknown partition policy '{0}' (expected fixed, variable, flexible or full_flexible)")]
    UnknownPartition(String),

    /// Arrival distribution name is not supported
    #[error("unknown arrival distribution '{0}' (expected stream, poisson, fixed or manual)")]
    UnknownDistribution(String),

    /// Scheduling policy name is not supported
    #[error("unknown scheduling policy '{0}' (expected greedy, fcfs or round_robin)")]
    UnknownPolicy(String),

    /// A required field of an arrival distribution is missing
    #[error("arrival distribution '{dist}' of query '{query}' is missing '{field}'")]
    MissingArrivalField {
        query: String,
        dist: String,
        field: &'static str,
    },

    /// The configuration pool holds no candidate for an app name
    #[error("there is no app config for '{0}' in the app pool")]
    NoAppConfig(String),

    /// A candidate forces a column width other than 1 under the fixed partition policy
    #[error("app '{app}' needs {width} columns but the fixed partition policy only maps width 1")]
    FixedWidthExceeded { app: String, width: usize },

    /// The architecture cannot support its partition policy
    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    /// A workload parameter outside its valid range
    #[error("invalid workload: {0}")]
    InvalidWorkload(String),

    /// A candidate with a degenerate footprint
    #[error("invalid app config for '{app}': {reason}")]
    InvalidCandidate { app: String, reason: String },

    /// A kernel depends on a name that is not a kernel of the same task
    #[error("kernel '{kernel}' of {task} depends on unknown kernel '{dependency}'")]
    UnknownDependency {
        task: String,
        kernel: String,
        dependency: String,
    },

    /// The kernel dependency graph of a task contains a cycle
    #[error("kernel dependencies of {task} contain a cycle through '{kernel}'")]
    DependencyCycle { task: String, kernel: String },

    // ------------------------------------------------------------------
    // Resource state violations (scheduler defects)
    // ------------------------------------------------------------------
    /// Allocation target core is not idle
    #[error("cannot allocate core {core} to {kernel}: it is not idle")]
    CoreNotIdle { core: usize, kernel: String },

    /// Allocation target bank is not idle
    #[error("cannot allocate bank {bank} to {kernel}: it is not idle")]
    BankNotIdle { bank: usize, kernel: String },

    /// Deallocation target core is already idle
    #[error("cannot deallocate core {0}: it is already idle")]
    CoreAlreadyIdle(usize),

    /// Deallocation target bank is already idle
    #[error("cannot deallocate bank {0}: it is already idle")]
    BankAlreadyIdle(usize),

    /// Resource id outside the grid
    #[error("resource id {0} is out of range")]
    ResourceOutOfRange(usize),

    // ------------------------------------------------------------------
    // Task model
    // ------------------------------------------------------------------
    /// Task is not present in the queue
    #[error("{0} is not in the task queue")]
    TaskNotQueued(String),

    /// Task queue is empty
    #[error("task queue is empty")]
    QueueEmpty,

    /// Kernel lifecycle violated (e.g. DONE reported twice)
    #[error("invalid transition for {kernel}: {from} -> {to}")]
    InvalidTransition {
        kernel: String,
        from: String,
        to: String,
    },

    /// A kernel was dispatched without a configuration
    #[error("{0} has no app config")]
    MissingAppConfig(String),

    // ------------------------------------------------------------------
    // Engine misuse
    // ------------------------------------------------------------------
    #[error("unknown event {0:?}")]
    UnknownEvent(EventId),

    #[error("event {0:?} has already been triggered")]
    EventAlreadyTriggered(EventId),

    #[error("unknown process {0:?}")]
    UnknownProcess(ProcessId),

    /// A process was resumed with a wake-up it never suspended on
    #[error("process '{process}' cannot handle a {wake} wake-up")]
    UnexpectedWake { process: String, wake: &'static str },

    #[error("unknown mutex {0:?}")]
    UnknownMutex(MutexId),

    #[error("mutex {0:?} released while not held")]
    MutexNotHeld(MutexId),

    #[error("unknown container {0:?}")]
    UnknownContainer(ContainerId),

    #[error("container {id:?} holds {level}, cannot take {amount}")]
    ContainerUnderflow {
        id: ContainerId,
        level: u64,
        amount: u64,
    },

    #[error("container {id:?} request of {amount} exceeds capacity {capacity}")]
    ContainerOverflow {
        id: ContainerId,
        amount: u64,
        capacity: u64,
    },

    // ------------------------------------------------------------------
    // I/O
    // ------------------------------------------------------------------
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed config: {0}")]
    Json(#[from] serde_json::Error),
}
