/// The reconfigurable accelerator: a 2-D grid of cores plus a flat pool of
/// memory banks.
///
/// Placement happens in two steps. `map` searches for a footprint that fits a
/// candidate under the partition policy without changing anything; the
/// scheduler may call it freely. `allocate` then commits the result. Kernel
/// execution is an engine process spawned by `execute` that holds the
/// resources for the configured runtime and reports back through the
/// `kernel_done` event, guarded by a one-slot handshake mutex so completions
/// are reconciled one at a time.
use crate::app::AppConfig;
use crate::components::{Bank, ComponentStatus, Core};
use crate::config::ArchitectureConfig;
use crate::engine::{EventId, MutexId, Process, ProcessHandle, Sim, SimTime, Step, Wake};
use crate::error::{Result, SimError};
use crate::kernel::{Kernel, KernelId};
use crate::logging::ComponentLog;
use crate::simulator::{Signal, SimCtx, System};
use std::cell::OnceCell;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// How the grid may be carved up for a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionPolicy {
    /// One column per kernel, banks tied to the column
    Fixed,
    /// Whole columns per kernel, banks tied to the columns
    Variable,
    /// Any contiguous block, banks from anywhere
    Flexible,
    /// Any set of idle cores, banks from anywhere
    FullFlexible,
}

impl PartitionPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            PartitionPolicy::Fixed        => "fixed",
            PartitionPolicy::Variable     => "variable",
            PartitionPolicy::Flexible     => "flexible",
            PartitionPolicy::FullFlexible => "full_flexible",
        }
    }

    /// Column-aligned policies derive their banks from the matched columns.
    pub fn is_column_aligned(&self) -> bool {
        matches!(self, PartitionPolicy::Fixed | PartitionPolicy::Variable)
    }
}

impl FromStr for PartitionPolicy {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fixed" => Ok(PartitionPolicy::Fixed),
            "variable" => Ok(PartitionPolicy::Variable),
            "flexible" => Ok(PartitionPolicy::Flexible),
            "full_flexible" => Ok(PartitionPolicy::FullFlexible),
            _ => Err(SimError::UnknownPartition(s.to_string())),
        }
    }
}

impl fmt::Display for PartitionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A footprint found by `Accelerator::map`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Mapping {
    /// Core ids, row-major
    pub cores: Vec<usize>,
    pub banks: Vec<usize>,
}

pub struct Accelerator {
    pub name: String,
    pub partition: PartitionPolicy,
    pub grid_height: usize,
    pub grid_width: usize,
    /// Row-major, id = y * grid_width + x
    cores: Vec<Core>,
    banks: Vec<Bank>,
    /// [y][x], true = idle
    core_mask: OnceCell<Vec<Vec<bool>>>,
    bank_mask: OnceCell<Vec<bool>>,
    /// Completion handshake
    controller: MutexId,
    kernel_done: EventId,
    log: ComponentLog,
}

impl Accelerator {
    pub fn new<W, M: Clone>(arch: &ArchitectureConfig, sim: &mut Sim<W, M>) -> Result<Self> {
        let partition: PartitionPolicy = arch.partition.parse()?;
        if arch.grid_height == 0 || arch.grid_width == 0 {
            return Err(SimError::InvalidArchitecture(format!(
                "'{}' has an empty {}x{} grid",
                arch.name, arch.grid_height, arch.grid_width
            )));
        }
        if partition.is_column_aligned() && arch.num_banks < arch.grid_width {
            return Err(SimError::InvalidArchitecture(format!(
                "'{}' has {} banks for {} columns; the {} partition needs at least one bank per column",
                arch.name, arch.num_banks, arch.grid_width, partition
            )));
        }

        let cores = (0..arch.grid_height)
            .flat_map(|y| (0..arch.grid_width).map(move |x| (x, y)))
            .map(|(x, y)| Core::new(y * arch.grid_width + x, (x, y), arch.core))
            .collect();
        let banks = (0..arch.num_banks).map(Bank::new).collect();

        Ok(Accelerator {
            name: arch.name.clone(),
            partition,
            grid_height: arch.grid_height,
            grid_width: arch.grid_width,
            cores,
            banks,
            core_mask: OnceCell::new(),
            bank_mask: OnceCell::new(),
            controller: sim.mutex(1),
            kernel_done: sim.event(),
            log: ComponentLog::new("accelerator"),
        })
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn banks(&self) -> &[Bank] {
        &self.banks
    }

    pub fn core_at(&self, x: usize, y: usize) -> &Core {
        &self.cores[y * self.grid_width + x]
    }

    /// Banks owned by each column under the column-aligned policies.
    pub fn banks_per_column(&self) -> usize {
        self.banks.len() / self.grid_width
    }

    /// Event fired with `Signal::KernelDone` when a kernel finishes.
    /// Replaced after every acknowledgement.
    pub fn kernel_done_event(&self) -> EventId {
        self.kernel_done
    }

    // ------------------------------------------------------------------
    // Availability
    // ------------------------------------------------------------------

    /// Idle cores as [y][x]. Recomputed lazily after allocate/deallocate.
    pub fn available_core_mask(&self) -> &Vec<Vec<bool>> {
        self.core_mask.get_or_init(|| {
            self.cores
                .chunks(self.grid_width)
                .map(|row| row.iter().map(Core::is_idle).collect())
                .collect()
        })
    }

    pub fn available_bank_mask(&self) -> &Vec<bool> {
        self.bank_mask
            .get_or_init(|| self.banks.iter().map(Bank::is_idle).collect())
    }

    fn invalidate_masks(&mut self) {
        self.core_mask.take();
        self.bank_mask.take();
    }

    pub fn core_owner(&self, core: usize) -> Option<KernelId> {
        self.cores.get(core).and_then(|c| c.kernel)
    }

    /// Distinct kernels currently holding cores.
    pub fn running_kernels(&self) -> Vec<KernelId> {
        let running: BTreeSet<KernelId> = self.cores.iter().filter_map(|c| c.kernel).collect();
        running.into_iter().collect()
    }

    /// Fraction of cores not idle.
    pub fn utilization(&self) -> f64 {
        let busy = self.cores.iter().filter(|c| !c.is_idle()).count();
        busy as f64 / self.cores.len() as f64
    }

    // ------------------------------------------------------------------
    // Mapping
    // ------------------------------------------------------------------

    /// Finds a footprint for `config` without committing it.
    /// `Ok(None)` means it does not fit right now.
    pub fn map(&self, app: &str, config: &AppConfig) -> Result<Option<Mapping>> {
        if config.area() == 0 {
            return Err(SimError::InvalidCandidate {
                app: app.to_string(),
                reason: format!("zero-area footprint {}x{}", config.height, config.width),
            });
        }
        match self.partition {
            PartitionPolicy::FullFlexible => Ok(self.map_scattered(config)),
            PartitionPolicy::Flexible => Ok(self.map_block(config)),
            PartitionPolicy::Variable => Ok(self.map_columns(config, self.column_width(config))),
            PartitionPolicy::Fixed => {
                let width = self.column_width(config);
                if width != 1 {
                    return Err(SimError::FixedWidthExceeded {
                        app: app.to_string(),
                        width,
                    });
                }
                Ok(self.map_columns(config, width))
            }
        }
    }

    /// Footprint width after growing it to cover the candidate's banks.
    fn column_width(&self, config: &AppConfig) -> usize {
        let per_column = self.banks_per_column();
        let ports = config.num_ports();
        if ports > config.width * per_column {
            ports.div_ceil(per_column)
        } else {
            config.width
        }
    }

    fn map_scattered(&self, config: &AppConfig) -> Option<Mapping> {
        let cores: Vec<usize> = self
            .available_core_mask()
            .iter()
            .flatten()
            .enumerate()
            .filter(|(_, idle)| **idle)
            .map(|(id, _)| id)
            .take(config.area())
            .collect();
        if cores.len() < config.area() {
            return None;
        }
        let banks = self.first_idle_banks(config.num_ports())?;
        Some(Mapping { cores, banks })
    }

    fn map_block(&self, config: &AppConfig) -> Option<Mapping> {
        let (x, y) = self.first_fit(config.height, config.width)?;
        let banks = self.first_idle_banks(config.num_ports())?;
        Some(Mapping {
            cores: self.block(x, y, config.height, config.width),
            banks,
        })
    }

    /// Banks share the indices of the matched columns, one per column.
    fn map_columns(&self, config: &AppConfig, width: usize) -> Option<Mapping> {
        let (x, y) = self.first_fit(config.height, width)?;
        let banks: Vec<usize> = (x..x + width).collect();
        // held by a kernel stacked in the same columns
        let bank_mask = self.available_bank_mask();
        if !banks.iter().all(|&bank| bank_mask[bank]) {
            return None;
        }
        Some(Mapping {
            cores: self.block(x, y, config.height, width),
            banks,
        })
    }

    /// Row-major scan of top-left offsets for a fully idle h x w block.
    fn first_fit(&self, height: usize, width: usize) -> Option<(usize, usize)> {
        if height > self.grid_height || width > self.grid_width {
            return None;
        }
        let mask = self.available_core_mask();
        for y in 0..=self.grid_height - height {
            for x in 0..=self.grid_width - width {
                if is_block_idle(mask, x, y, height, width) {
                    return Some((x, y));
                }
            }
        }
        None
    }

    fn block(&self, x: usize, y: usize, height: usize, width: usize) -> Vec<usize> {
        (y..y + height)
            .flat_map(|row| (x..x + width).map(move |col| row * self.grid_width + col))
            .collect()
    }

    fn first_idle_banks(&self, count: usize) -> Option<Vec<usize>> {
        let banks: Vec<usize> = self
            .available_bank_mask()
            .iter()
            .enumerate()
            .filter(|(_, idle)| **idle)
            .map(|(id, _)| id)
            .take(count)
            .collect();
        (banks.len() == count).then_some(banks)
    }

    // ------------------------------------------------------------------
    // Allocation
    // ------------------------------------------------------------------

    /// Commits `mapping` to `kernel`. Every target is checked before any
    /// state changes.
    pub fn allocate(&mut self, kernel: &mut Kernel, mapping: Mapping) -> Result<()> {
        for &core in &mapping.cores {
            let slot = self.cores.get(core).ok_or(SimError::ResourceOutOfRange(core))?;
            if !slot.is_idle() {
                return Err(SimError::CoreNotIdle {
                    core,
                    kernel: kernel.tag.clone(),
                });
            }
        }
        for &bank in &mapping.banks {
            let slot = self.banks.get(bank).ok_or(SimError::ResourceOutOfRange(bank))?;
            if !slot.is_idle() {
                return Err(SimError::BankNotIdle {
                    bank,
                    kernel: kernel.tag.clone(),
                });
            }
        }

        for &core in &mapping.cores {
            self.cores[core].status = ComponentStatus::Used;
            self.cores[core].kernel = Some(kernel.id);
        }
        for &bank in &mapping.banks {
            self.banks[bank].status = ComponentStatus::Used;
            self.banks[bank].kernel = Some(kernel.id);
        }
        kernel.cores = mapping.cores;
        kernel.banks = mapping.banks;
        self.invalidate_masks();
        Ok(())
    }

    /// Returns cores and banks to idle. Every target is checked before any
    /// state changes.
    pub fn deallocate(&mut self, cores: &[usize], banks: &[usize]) -> Result<()> {
        for &core in cores {
            let slot = self.cores.get(core).ok_or(SimError::ResourceOutOfRange(core))?;
            if slot.is_idle() {
                return Err(SimError::CoreAlreadyIdle(core));
            }
        }
        for &bank in banks {
            let slot = self.banks.get(bank).ok_or(SimError::ResourceOutOfRange(bank))?;
            if slot.is_idle() {
                return Err(SimError::BankAlreadyIdle(bank));
            }
        }

        for &core in cores {
            self.cores[core].status = ComponentStatus::Idle;
            self.cores[core].kernel = None;
        }
        for &bank in banks {
            self.banks[bank].status = ComponentStatus::Idle;
            self.banks[bank].kernel = None;
        }
        self.invalidate_masks();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Starts the execution process of a committed kernel.
    pub fn execute(&self, sim: &mut SimCtx, kernel: &Kernel) -> Result<ProcessHandle> {
        let runtime = kernel.runtime()?;
        self.log.debug(
            sim.now(),
            format_args!("{} execution starts on cores {:?}", kernel.tag, kernel.cores),
        );
        Ok(sim.spawn(KernelExecution {
            kernel: kernel.id,
            tag: kernel.tag.clone(),
            runtime,
        }))
    }

    /// Ends a completion handshake: frees the controller and arms a fresh
    /// `kernel_done` event for the next completion.
    pub fn acknowledge_kernel_done<W, M: Clone>(&mut self, sim: &mut Sim<W, M>) -> Result<()> {
        sim.release(self.controller)?;
        self.kernel_done = sim.event();
        Ok(())
    }

    fn finish(&mut self, sim: &mut SimCtx, kernel: &Kernel) -> Result<()> {
        self.deallocate(&kernel.cores, &kernel.banks)?;
        self.log
            .debug(sim.now(), format_args!("{} released its resources", kernel.tag));
        sim.succeed(self.kernel_done, Signal::KernelDone(kernel.id))
    }
}

fn is_block_idle(mask: &[Vec<bool>], x: usize, y: usize, height: usize, width: usize) -> bool {
    for row in &mask[y..y + height] {
        for idle in &row[x..x + width] {
            if !idle {
                return false;
            }
        }
    }
    true
}

/// Holds a kernel's resources for its runtime, then hands the completion to
/// the scheduler.
struct KernelExecution {
    kernel: KernelId,
    tag: String,
    runtime: SimTime,
}

impl Process<System, Signal> for KernelExecution {
    fn resume(&mut self, world: &mut System, sim: &mut SimCtx, wake: Wake<Signal>) -> Result<Step> {
        match wake {
            Wake::Start => Ok(Step::Timeout(self.runtime)),
            Wake::Timeout => {
                world.tasks.kernel_mut(self.kernel).done_at = Some(sim.now());
                Ok(Step::Acquire(world.accelerator.controller))
            }
            Wake::Acquired(_) => {
                let kernel = world.tasks.kernel(self.kernel);
                world.accelerator.finish(sim, kernel)?;
                Ok(Step::Exit)
            }
            other => Err(SimError::UnexpectedWake {
                process: self.name().to_string(),
                wake: other.kind(),
            }),
        }
    }

    fn name(&self) -> &str {
        &self.tag
    }
}
