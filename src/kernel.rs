/// Kernel definitions and lifecycle.
/// A kernel is one node of a task's dependency graph: an invocation of an
/// app that must be placed on the grid, run for its configured runtime and
/// release its resources before its dependents may start.
use crate::app::AppConfig;
use crate::engine::SimTime;
use crate::error::{Result, SimError};
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Index of a kernel in the task arena.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KernelId(pub usize);

impl fmt::Display for KernelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "k{}", self.0)
    }
}

/// PENDING -> RUNNING -> DONE. DONE is terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelStatus {
    Pending,
    Running,
    Done,
}

impl fmt::Display for KernelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelStatus::Pending => write!(f, "PENDING"),
            KernelStatus::Running => write!(f, "RUNNING"),
            KernelStatus::Done    => write!(f, "DONE"),
        }
    }
}

/// Declarative description of a kernel inside a workload query.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KernelSpec {
    pub name: String,
    pub app: String,
    /// Names of kernels of the same task that must finish first
    #[serde(default)]
    pub dependencies: Vec<String>,
}

impl KernelSpec {
    pub fn new(name: &str, app: &str, dependencies: &[&str]) -> Self {
        KernelSpec {
            name: name.to_string(),
            app: app.to_string(),
            dependencies: dependencies.iter().map(|d| d.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Kernel {
    pub id: KernelId,
    /// Owning task
    pub task: TaskId,
    pub name: String,
    /// `<query>#<index>_<name>`
    pub tag: String,
    pub app: String,
    /// Unfinished dependencies; shrinks as they complete
    pub dependencies: BTreeSet<String>,
    pub status: KernelStatus,
    /// Candidate fixed at commit time
    pub config: Option<AppConfig>,
    pub cores: Vec<usize>,
    pub banks: Vec<usize>,
    pub scheduled_at: Option<SimTime>,
    pub done_at: Option<SimTime>,
}

impl Kernel {
    pub fn new(id: KernelId, task: TaskId, task_tag: &str, spec: &KernelSpec) -> Self {
        Kernel {
            id,
            task,
            name: spec.name.clone(),
            tag: format!("{}_{}", task_tag, spec.name),
            app: spec.app.clone(),
            dependencies: spec.dependencies.iter().cloned().collect(),
            status: KernelStatus::Pending,
            config: None,
            cores: Vec::new(),
            banks: Vec::new(),
            scheduled_at: None,
            done_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == KernelStatus::Pending
    }

    /// Pending with every dependency satisfied.
    pub fn is_ready(&self) -> bool {
        self.is_pending() && self.dependencies.is_empty()
    }

    /// Drops `name` from the dependency set. Returns true if it was present.
    pub fn clear_dependency(&mut self, name: &str) -> bool {
        self.dependencies.remove(name)
    }

    pub fn mark_running(&mut self, now: SimTime) -> Result<()> {
        self.transition(KernelStatus::Pending, KernelStatus::Running)?;
        self.scheduled_at = Some(now);
        Ok(())
    }

    pub fn mark_done(&mut self) -> Result<()> {
        self.transition(KernelStatus::Running, KernelStatus::Done)
    }

    fn transition(&mut self, from: KernelStatus, to: KernelStatus) -> Result<()> {
        if self.status != from {
            return Err(SimError::InvalidTransition {
                kernel: self.tag.clone(),
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        self.status = to;
        Ok(())
    }

    /// Runtime of the committed candidate.
    pub fn runtime(&self) -> Result<SimTime> {
        self.config
            .as_ref()
            .map(|config| config.runtime)
            .ok_or_else(|| SimError::MissingAppConfig(self.tag.clone()))
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kernel() -> Kernel {
        let spec = KernelSpec::new("blur", "gaussian", &["load", "scale"]);
        Kernel::new(KernelId(3), TaskId(1), "camera#4", &spec)
    }

    #[test]
    fn tag_combines_task_and_name() {
        let k = kernel();
        assert_eq!(k.tag, "camera#4_blur");
        assert_eq!(k.to_string(), "camera#4_blur");
        assert_eq!(k.status, KernelStatus::Pending);
    }

    #[test]
    fn ready_once_dependencies_clear() {
        let mut k = kernel();
        assert!(!k.is_ready());
        assert!(k.clear_dependency("load"));
        assert!(!k.clear_dependency("load"));
        assert!(!k.is_ready());
        k.clear_dependency("scale");
        assert!(k.is_ready());
    }

    #[test]
    fn lifecycle_is_one_way() -> anyhow::Result<()> {
        let mut k = kernel();
        assert!(matches!(k.mark_done(), Err(SimError::InvalidTransition { .. })));
        k.mark_running(12)?;
        assert_eq!(k.scheduled_at, Some(12));
        assert!(k.mark_running(13).is_err());
        k.mark_done()?;
        assert_eq!(k.status, KernelStatus::Done);
        assert!(k.mark_done().is_err());
        Ok(())
    }

    #[test]
    fn runtime_requires_committed_config() {
        let mut k = kernel();
        assert!(matches!(k.runtime(), Err(SimError::MissingAppConfig(_))));
        k.config = Some(AppConfig::new(1, 1, 1, 1, 42));
        assert_eq!(k.runtime().ok(), Some(42));
    }
}
