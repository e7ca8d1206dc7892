/// Task generators, one engine process per workload query.
///
/// An arrival plan is either a list of inter-arrival offsets (fixed, poisson
/// and manual distributions) or a closed-loop stream where the next task is
/// only generated once the previous one has completed.
///
/// Offsets are measured from the previous arrival. If the previous put was
/// held back by a full queue, that blocking time is deducted from the next
/// offset so the arrival schedule does not drift.
use crate::config::ArrivalConfig;
use crate::engine::{Process, SimTime, Step, Wake};
use crate::error::{Result, SimError};
use crate::kernel::KernelSpec;
use crate::logging::ComponentLog;
use crate::simulator::{Signal, SimCtx, System};
use crate::task::TaskId;
use rand::rngs::SmallRng;
use rand_distr::{Distribution, Poisson};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalPlan {
    /// Offsets between consecutive arrivals, the first from time zero
    Offsets(Vec<SimTime>),
    /// First arrival at `start`, each next one `delay` after the previous
    /// task completes
    Stream {
        start: SimTime,
        size: usize,
        delay: SimTime,
    },
}

impl ArrivalPlan {
    pub fn from_config(query: &str, arrival: &ArrivalConfig, rng: &mut SmallRng) -> Result<Self> {
        let dist = arrival.dist.to_ascii_lowercase();
        let missing = |field: &'static str| SimError::MissingArrivalField {
            query: query.to_string(),
            dist: dist.clone(),
            field,
        };
        match dist.as_str() {
            "stream" => Ok(ArrivalPlan::Stream {
                start: arrival.start.ok_or_else(|| missing("start"))?,
                size: arrival.size.ok_or_else(|| missing("size"))?,
                delay: arrival.delay.ok_or_else(|| missing("delay"))?,
            }),
            "fixed" => Ok(ArrivalPlan::Offsets(fixed_offsets(
                arrival.start.ok_or_else(|| missing("start"))?,
                arrival.interval.ok_or_else(|| missing("interval"))?,
                arrival.size.ok_or_else(|| missing("size"))?,
            ))),
            "poisson" => {
                let lambda = arrival.lambda.ok_or_else(|| missing("lambda"))?;
                if !lambda.is_finite() || lambda < 0.0 {
                    return Err(SimError::InvalidWorkload(format!(
                        "query '{}' has poisson lambda {}",
                        query, lambda
                    )));
                }
                Ok(ArrivalPlan::Offsets(poisson_offsets(
                    arrival.start.ok_or_else(|| missing("start"))?,
                    lambda,
                    arrival.size.ok_or_else(|| missing("size"))?,
                    rng,
                )?))
            }
            "manual" => Ok(ArrivalPlan::Offsets(
                arrival.intervals.clone().ok_or_else(|| missing("intervals"))?,
            )),
            _ => Err(SimError::UnknownDistribution(arrival.dist.clone())),
        }
    }

    /// Number of tasks the plan generates.
    pub fn size(&self) -> usize {
        match self {
            ArrivalPlan::Offsets(offsets) => offsets.len(),
            ArrivalPlan::Stream { size, .. } => *size,
        }
    }
}

/// `[start, interval, interval, ...]`, `size` entries.
pub fn fixed_offsets(start: SimTime, interval: SimTime, size: usize) -> Vec<SimTime> {
    if size == 0 {
        return Vec::new();
    }
    std::iter::once(start)
        .chain(std::iter::repeat_n(interval, size - 1))
        .collect()
}

/// `[start, X1, X2, ...]` with `Xi ~ Poisson(lambda)`, `size` entries.
/// A zero mean never waits.
pub fn poisson_offsets(start: SimTime, lambda: f64, size: usize, rng: &mut SmallRng) -> Result<Vec<SimTime>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    if lambda == 0.0 {
        return Ok(fixed_offsets(start, 0, size));
    }
    let poisson = Poisson::new(lambda)
        .map_err(|err| SimError::InvalidWorkload(format!("poisson lambda {}: {}", lambda, err)))?;
    Ok(std::iter::once(start)
        .chain(poisson.sample_iter(rng).take(size - 1).map(|x: f64| x as SimTime))
        .collect())
}

// ---------------------------------------------------------------------------
// Generator process
// ---------------------------------------------------------------------------

enum Phase {
    /// Sleeping until the next arrival
    Sleeping,
    /// Waiting for the queue to admit `task`
    Putting { task: TaskId, generated: SimTime },
    /// Stream only: waiting for the last task to complete
    AwaitingDone,
}

/// Generates the tasks of one query and feeds them to the queue.
pub struct QueryGenerator {
    query: String,
    kernels: Vec<KernelSpec>,
    plan: ArrivalPlan,
    /// Index of the next task to generate
    index: usize,
    phase: Phase,
    log: ComponentLog,
}

impl QueryGenerator {
    pub fn new(query: &str, kernels: Vec<KernelSpec>, plan: ArrivalPlan) -> Self {
        QueryGenerator {
            query: query.to_string(),
            kernels,
            plan,
            index: 0,
            phase: Phase::Sleeping,
            log: ComponentLog::new("generator"),
        }
    }

    fn generate(&mut self, world: &mut System, sim: &mut SimCtx) -> Result<Step> {
        let done = sim.event();
        let task = world.tasks.create(&self.query, self.index, &self.kernels, done)?;
        let now = sim.now();
        world.tasks.task_mut(task).generated_at = Some(now);
        self.log
            .info(now, format_args!("{} generated", world.tasks.task(task).tag));

        let put = world.queue.put(sim, task);
        self.phase = Phase::Putting {
            task,
            generated: now,
        };
        Ok(Step::Wait(put.exit))
    }

    fn admitted(&mut self, world: &System, sim: &SimCtx, task: TaskId, generated: SimTime) -> Step {
        let blocking = sim.now() - generated;
        if blocking > 0 {
            self.log.debug(
                sim.now(),
                format_args!("{} blocked {} tick(s) on a full queue", world.tasks.task(task).tag, blocking),
            );
        }
        self.index += 1;
        if self.index >= self.plan.size() {
            return Step::Exit;
        }
        match &self.plan {
            ArrivalPlan::Offsets(offsets) => {
                self.phase = Phase::Sleeping;
                Step::Timeout(offsets[self.index].saturating_sub(blocking))
            }
            ArrivalPlan::Stream { .. } => {
                let done = world.tasks.task(task).done_event;
                self.phase = Phase::AwaitingDone;
                Step::Wait(done)
            }
        }
    }
}

impl Process<System, Signal> for QueryGenerator {
    fn resume(&mut self, world: &mut System, sim: &mut SimCtx, wake: Wake<Signal>) -> Result<Step> {
        match wake {
            Wake::Start if self.plan.size() == 0 => Ok(Step::Exit),
            Wake::Start => Ok(Step::Timeout(match &self.plan {
                ArrivalPlan::Offsets(offsets) => offsets[0],
                ArrivalPlan::Stream { start, .. } => *start,
            })),
            Wake::Timeout => self.generate(world, sim),
            Wake::Fired(..) => match self.phase {
                Phase::Putting { task, generated } => Ok(self.admitted(world, sim, task, generated)),
                Phase::AwaitingDone => {
                    let ArrivalPlan::Stream { delay, .. } = self.plan else {
                        return Ok(Step::Exit);
                    };
                    self.phase = Phase::Sleeping;
                    Ok(Step::Timeout(delay))
                }
                Phase::Sleeping => Ok(Step::Exit),
            },
            _ => Ok(Step::Exit),
        }
    }

    fn name(&self) -> &str {
        &self.query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn fixed_offsets_start_then_repeat() {
        assert_eq!(fixed_offsets(5, 20, 4), vec![5, 20, 20, 20]);
        assert_eq!(fixed_offsets(5, 20, 1), vec![5]);
        assert!(fixed_offsets(5, 20, 0).is_empty());
    }

    #[test]
    fn poisson_offsets_are_seeded() -> anyhow::Result<()> {
        let mut a = SmallRng::seed_from_u64(11);
        let mut b = SmallRng::seed_from_u64(11);
        let first = poisson_offsets(3, 120.0, 50, &mut a)?;
        let second = poisson_offsets(3, 120.0, 50, &mut b)?;
        assert_eq!(first, second);
        assert_eq!(first.len(), 50);
        assert_eq!(first[0], 3);

        let mean = first[1..].iter().sum::<u64>() as f64 / 49.0;
        assert!((80.0..160.0).contains(&mean), "mean {}", mean);
        Ok(())
    }

    #[test]
    fn zero_lambda_never_waits() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(1);
        assert_eq!(poisson_offsets(0, 0.0, 3, &mut rng)?, vec![0, 0, 0]);
        Ok(())
    }

    #[test]
    fn plans_from_config() -> anyhow::Result<()> {
        let mut rng = SmallRng::seed_from_u64(0);
        assert_eq!(
            ArrivalPlan::from_config("q", &ArrivalConfig::manual(vec![1, 2]), &mut rng)?,
            ArrivalPlan::Offsets(vec![1, 2])
        );
        assert_eq!(
            ArrivalPlan::from_config("q", &ArrivalConfig::stream(4, 2, 9), &mut rng)?,
            ArrivalPlan::Stream {
                start: 4,
                size: 2,
                delay: 9
            }
        );
        let fixed = ArrivalPlan::from_config("q", &ArrivalConfig::fixed(0, 10, 3), &mut rng)?;
        assert_eq!(fixed.size(), 3);
        Ok(())
    }

    #[test]
    fn bad_arrival_configs_are_rejected() {
        let mut rng = SmallRng::seed_from_u64(0);
        let unknown = ArrivalConfig {
            dist: "bursty".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            ArrivalPlan::from_config("q", &unknown, &mut rng),
            Err(SimError::UnknownDistribution(_))
        ));

        let mut no_interval = ArrivalConfig::fixed(0, 10, 3);
        no_interval.interval = None;
        assert!(matches!(
            ArrivalPlan::from_config("q", &no_interval, &mut rng),
            Err(SimError::MissingArrivalField { field: "interval", .. })
        ));
    }
}
