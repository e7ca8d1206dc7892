/// Application configurations and the pool that holds them.
///
/// An `AppConfig` is one pre-compiled implementation of an application: the
/// footprint it occupies on the core grid, how many memory banks it streams
/// through, and how long it runs once placed. One app name usually maps to
/// several candidates that trade area for runtime; the scheduler picks among
/// them at placement time.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One placement candidate for an app. Immutable once loaded.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Footprint height in cores
    pub height: usize,
    /// Footprint width in cores
    pub width: usize,
    /// Input streams, one bank each
    pub num_input: usize,
    /// Output streams, one bank each
    pub num_output: usize,
    /// Ticks the kernel holds its resources
    pub runtime: u64,
    /// Processing elements used (informational)
    #[serde(default)]
    pub pe: u64,
    /// Memory tiles used (informational)
    #[serde(default)]
    pub mem: u64,
    /// Global buffer ports used (informational)
    #[serde(default)]
    pub glb: u64,
}

impl AppConfig {
    pub fn new(height: usize, width: usize, num_input: usize, num_output: usize, runtime: u64) -> Self {
        AppConfig {
            height,
            width,
            num_input,
            num_output,
            runtime,
            pe: 0,
            mem: 0,
            glb: 0,
        }
    }

    /// Number of cores in the footprint
    pub fn area(&self) -> usize {
        self.height * self.width
    }

    /// Number of banks the candidate streams through
    pub fn num_ports(&self) -> usize {
        self.num_input + self.num_output
    }
}

/// Candidates by app name. Candidate order is preserved and breaks
/// runtime ties during selection.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(transparent)]
pub struct AppPool {
    apps: BTreeMap<String, Vec<AppConfig>>,
}

impl AppPool {
    pub fn new() -> Self {
        AppPool::default()
    }

    pub fn add(&mut self, app: &str, config: AppConfig) {
        self.apps.entry(app.to_string()).or_default().push(config);
    }

    /// Candidates for `app`; empty when the app is unknown.
    pub fn get(&self, app: &str) -> &[AppConfig] {
        self.apps.get(app).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains(&self, app: &str) -> bool {
        !self.get(app).is_empty()
    }

    pub fn apps(&self) -> impl Iterator<Item = &str> {
        self.apps.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.apps.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Candidates for the apps used by `WorkloadConfig::demo()`.
    /// The wide variants finish faster at the cost of more columns.
    pub fn demo() -> Self {
        let mut pool = AppPool::new();
        pool.add("conv", AppConfig::new(4, 2, 2, 1, 120));
        pool.add("conv", AppConfig::new(4, 4, 2, 2, 70));
        pool.add("gemm", AppConfig::new(8, 2, 2, 1, 200));
        pool.add("gemm", AppConfig::new(8, 4, 4, 2, 110));
        pool.add("pool", AppConfig::new(2, 1, 1, 1, 40));
        pool.add("relu", AppConfig::new(2, 1, 1, 1, 25));
        pool.add("harris", AppConfig::new(4, 1, 1, 1, 90));
        pool.add("harris", AppConfig::new(4, 2, 1, 1, 55));
        pool.add("gaussian", AppConfig::new(2, 2, 1, 1, 60));
        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_app_has_no_candidates() {
        let pool = AppPool::demo();
        assert!(pool.get("missing").is_empty());
        assert!(!pool.contains("missing"));
    }

    #[test]
    fn candidates_keep_insertion_order() {
        let mut pool = AppPool::new();
        pool.add("blur", AppConfig::new(1, 2, 1, 1, 30));
        pool.add("blur", AppConfig::new(1, 1, 1, 1, 50));
        let runtimes: Vec<u64> = pool.get("blur").iter().map(|c| c.runtime).collect();
        assert_eq!(runtimes, vec![30, 50]);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn pool_reads_json_object() -> anyhow::Result<()> {
        let json = r#"{
            "blur": [
                {"height": 1, "width": 2, "num_input": 1, "num_output": 1, "runtime": 30, "pe": 12}
            ]
        }"#;
        let pool: AppPool = serde_json::from_str(json)?;
        let blur = &pool.get("blur")[0];
        assert_eq!(blur.area(), 2);
        assert_eq!(blur.num_ports(), 2);
        assert_eq!(blur.pe, 12);
        assert_eq!(blur.glb, 0);
        Ok(())
    }
}
