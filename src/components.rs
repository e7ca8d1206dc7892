/// Grid slots: partial-reconfiguration regions ("cores") and memory banks.
/// Both are plain records owned by the accelerator; their status only
/// changes through `Accelerator::allocate` / `Accelerator::deallocate`.
use crate::kernel::KernelId;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    #[default]
    Idle,
    /// Held for a kernel that has not started yet (unused by the built-in policies)
    Reserved,
    Used,
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentStatus::Idle     => write!(f, "idle"),
            ComponentStatus::Reserved => write!(f, "reserved"),
            ComponentStatus::Used     => write!(f, "used"),
        }
    }
}

/// Static shape shared by every core of an architecture.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoreShape {
    pub height: usize,
    pub width: usize,
    pub num_input: usize,
    pub num_output: usize,
}

impl Default for CoreShape {
    fn default() -> Self {
        CoreShape {
            height: 1,
            width: 1,
            num_input: 1,
            num_output: 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Core {
    /// Row-major index: y * grid_width + x
    pub id: usize,
    /// (x, y)
    pub coord: (usize, usize),
    pub status: ComponentStatus,
    pub kernel: Option<KernelId>,
    pub shape: CoreShape,
}

impl Core {
    pub fn new(id: usize, coord: (usize, usize), shape: CoreShape) -> Self {
        Core {
            id,
            coord,
            status: ComponentStatus::Idle,
            kernel: None,
            shape,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == ComponentStatus::Idle
    }
}

#[derive(Debug, Clone)]
pub struct Bank {
    pub id: usize,
    pub status: ComponentStatus,
    pub kernel: Option<KernelId>,
    /// Bytes; always 0, contents are not modelled
    pub capacity: u64,
}

impl Bank {
    pub fn new(id: usize) -> Self {
        Bank {
            id,
            status: ComponentStatus::Idle,
            kernel: None,
            capacity: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == ComponentStatus::Idle
    }
}
