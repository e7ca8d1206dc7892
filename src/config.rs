/// Run configuration: the architecture, the workload and (through
/// `AppPool`) the placement candidates. Everything deserializes from JSON;
/// named presets cover the common setups.
use crate::components::CoreShape;
use crate::engine::SimTime;
use crate::error::Result;
use crate::kernel::KernelSpec;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Reads any config type from a JSON file.
pub fn load<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}

// ---------------------------------------------------------------------------
// Architecture
// ---------------------------------------------------------------------------

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchitectureConfig {
    pub name: String,
    /// Core rows
    pub grid_height: usize,
    /// Core columns
    pub grid_width: usize,
    pub num_banks: usize,
    /// fixed | variable | flexible | full_flexible
    pub partition: String,
    /// Shape of a single core
    #[serde(default)]
    pub core: CoreShape,
}

impl ArchitectureConfig {
    /// An Amber-like CGRA: 8x8 reconfigurable regions, four global buffer
    /// banks per column, column-granular partial reconfiguration.
    pub fn amber() -> Self {
        ArchitectureConfig {
            name: "amber".to_string(),
            grid_height: 8,
            grid_width: 8,
            num_banks: 32,
            partition: "variable".to_string(),
            core: CoreShape {
                height: 16,
                width: 4,
                num_input: 2,
                num_output: 2,
            },
        }
    }

    /// Same fabric with arbitrary rectangular regions.
    pub fn amber_flexible() -> Self {
        ArchitectureConfig {
            name: "amber-flexible".to_string(),
            partition: "flexible".to_string(),
            ..Self::amber()
        }
    }

    pub fn num_cores(&self) -> usize {
        self.grid_height * self.grid_width
    }
}

// ---------------------------------------------------------------------------
// Workload
// ---------------------------------------------------------------------------

/// Arrival process of one query. Which fields are required depends on `dist`:
///   stream  {start, size, delay}
///   poisson {start, lambda, size}
///   fixed   {start, interval, size}
///   manual  {intervals}
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct ArrivalConfig {
    pub dist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<SimTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lambda: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intervals: Option<Vec<SimTime>>,
}

impl ArrivalConfig {
    pub fn stream(start: SimTime, size: usize, delay: SimTime) -> Self {
        ArrivalConfig {
            dist: "stream".to_string(),
            start: Some(start),
            size: Some(size),
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn poisson(start: SimTime, lambda: f64, size: usize) -> Self {
        ArrivalConfig {
            dist: "poisson".to_string(),
            start: Some(start),
            lambda: Some(lambda),
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn fixed(start: SimTime, interval: SimTime, size: usize) -> Self {
        ArrivalConfig {
            dist: "fixed".to_string(),
            start: Some(start),
            interval: Some(interval),
            size: Some(size),
            ..Default::default()
        }
    }

    pub fn manual(intervals: Vec<SimTime>) -> Self {
        ArrivalConfig {
            dist: "manual".to_string(),
            intervals: Some(intervals),
            ..Default::default()
        }
    }
}

/// One recurring request: a kernel graph and how often it arrives.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QueryConfig {
    pub name: String,
    pub arrival: ArrivalConfig,
    pub kernels: Vec<KernelSpec>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct WorkloadConfig {
    pub name: String,
    /// Maximum number of live tasks
    pub queue_capacity: usize,
    /// Fixed overhead of one scheduling pass
    #[serde(default)]
    pub schedule_delay: SimTime,
    /// Seed for stochastic arrivals
    #[serde(default)]
    pub seed: u64,
    pub queries: Vec<QueryConfig>,
}

impl WorkloadConfig {
    /// A mixed vision/inference workload over the apps of `AppPool::demo()`.
    pub fn demo() -> Self {
        WorkloadConfig {
            name: "demo".to_string(),
            queue_capacity: 4,
            schedule_delay: 2,
            seed: 7,
            queries: vec![
                QueryConfig {
                    name: "camera".to_string(),
                    arrival: ArrivalConfig::fixed(0, 150, 6),
                    kernels: vec![
                        KernelSpec::new("blur", "gaussian", &[]),
                        KernelSpec::new("corners", "harris", &["blur"]),
                    ],
                },
                QueryConfig {
                    name: "resnet".to_string(),
                    arrival: ArrivalConfig::poisson(20, 200.0, 4),
                    kernels: vec![
                        KernelSpec::new("fc", "gemm", &["pool"]),
                        KernelSpec::new("conv1", "conv", &[]),
                        KernelSpec::new("act", "relu", &["conv1"]),
                        KernelSpec::new("pool", "pool", &["act"]),
                    ],
                },
                QueryConfig {
                    name: "detector".to_string(),
                    arrival: ArrivalConfig::stream(10, 3, 50),
                    kernels: vec![
                        KernelSpec::new("features", "conv", &[]),
                        KernelSpec::new("edges", "harris", &[]),
                        KernelSpec::new("classify", "gemm", &["features", "edges"]),
                    ],
                },
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppPool;

    #[test]
    fn presets_survive_json() -> anyhow::Result<()> {
        let arch = ArchitectureConfig::amber();
        let back: ArchitectureConfig = serde_json::from_str(&serde_json::to_string(&arch)?)?;
        assert_eq!(back, arch);

        let workload = WorkloadConfig::demo();
        let back: WorkloadConfig = serde_json::from_str(&serde_json::to_string_pretty(&workload)?)?;
        assert_eq!(back, workload);

        let pool = AppPool::demo();
        let back: AppPool = serde_json::from_str(&serde_json::to_string(&pool)?)?;
        assert_eq!(back, pool);
        Ok(())
    }

    #[test]
    fn workload_defaults_optional_fields() -> anyhow::Result<()> {
        let json = r#"{
            "name": "tiny",
            "queue_capacity": 2,
            "queries": [{
                "name": "q",
                "arrival": {"dist": "manual", "intervals": [5, 10]},
                "kernels": [{"name": "k", "app": "relu"}]
            }]
        }"#;
        let workload: WorkloadConfig = serde_json::from_str(json)?;
        assert_eq!(workload.schedule_delay, 0);
        assert_eq!(workload.seed, 0);
        let query = &workload.queries[0];
        assert_eq!(query.arrival.intervals, Some(vec![5, 10]));
        assert_eq!(query.arrival.start, None);
        assert!(query.kernels[0].dependencies.is_empty());
        Ok(())
    }

    #[test]
    fn demo_apps_are_all_in_the_demo_pool() {
        let pool = AppPool::demo();
        for query in WorkloadConfig::demo().queries {
            for kernel in query.kernels {
                assert!(pool.contains(&kernel.app), "missing {}", kernel.app);
            }
        }
    }

    #[test]
    fn load_reports_missing_file() {
        let result: Result<ArchitectureConfig> = load("/nonexistent/prsim/arch.json");
        assert!(matches!(result, Err(crate::error::SimError::Io(_))));
    }
}
