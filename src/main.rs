use anyhow::Result;
use clap::{Arg, ArgAction, ArgMatches, Command};
use prsim::app::AppPool;
use prsim::config::{self, ArchitectureConfig, WorkloadConfig};
use prsim::engine::SimTime;
use prsim::logging;
use prsim::metrics::METRICS_PATH;
use prsim::report::RunReport;
use prsim::scheduler::SchedulingPolicy;
use prsim::simulator::Simulator;
use std::path::PathBuf;

fn arguments() -> ArgMatches {
    Command::new("prsim")
        .about("Simulates kernel scheduling on a partially reconfigurable accelerator")
        .arg(
            Arg::new("arch")
                .long("arch")
                .value_parser(clap::value_parser!(PathBuf))
                .value_name("FILE")
                .help("Architecture JSON (default: built-in amber preset)"),
        )
        .arg(
            Arg::new("workload")
                .long("workload")
                .value_parser(clap::value_parser!(PathBuf))
                .value_name("FILE")
                .help("Workload JSON (default: built-in demo workload)"),
        )
        .arg(
            Arg::new("apps")
                .long("apps")
                .value_parser(clap::value_parser!(PathBuf))
                .value_name("FILE")
                .help("App configuration pool JSON (default: built-in demo pool)"),
        )
        .arg(
            Arg::new("policy")
                .long("policy")
                .value_parser(clap::value_parser!(String))
                .value_name("greedy|fcfs|round_robin")
                .default_value("greedy")
                .help("Sets the kernel scheduling policy"),
        )
        .arg(
            Arg::new("until")
                .long("until")
                .value_parser(clap::value_parser!(SimTime))
                .value_name("TICKS")
                .help("Stops the simulation at this virtual time"),
        )
        .arg(
            Arg::new("report")
                .long("report")
                .value_parser(clap::value_parser!(PathBuf))
                .value_name("FILE")
                .help("Writes the per-task and per-kernel report as JSON"),
        )
        .arg(
            Arg::new("live")
                .long("live")
                .action(ArgAction::SetTrue)
                .help("Publishes live snapshots for the viz binary"),
        )
        .get_matches()
}

fn main() -> Result<()> {
    let _logger = logging::initialize("info")?;
    let matches = arguments();

    let arch: ArchitectureConfig = match matches.get_one::<PathBuf>("arch") {
        Some(path) => config::load(path)?,
        None => ArchitectureConfig::amber(),
    };
    let workload: WorkloadConfig = match matches.get_one::<PathBuf>("workload") {
        Some(path) => config::load(path)?,
        None => WorkloadConfig::demo(),
    };
    let pool: AppPool = match matches.get_one::<PathBuf>("apps") {
        Some(path) => config::load(path)?,
        None => AppPool::demo(),
    };
    let policy: SchedulingPolicy = matches
        .get_one::<String>("policy")
        .ok_or(anyhow::anyhow!("missing policy"))?
        .parse()?;
    let until: Option<SimTime> = matches.get_one::<SimTime>("until").copied();

    println!(
        "Simulating '{}' on '{}' ({}x{} cores, {} banks, {} partition) with {} scheduling",
        workload.name,
        arch.name,
        arch.grid_height,
        arch.grid_width,
        arch.num_banks,
        arch.partition,
        policy,
    );

    let mut simulator = Simulator::new(&arch, &workload, pool, policy)?;
    if matches.get_flag("live") {
        simulator = simulator.with_live_metrics(METRICS_PATH);
        println!("Live metrics: {} (run `cargo run --bin viz` to watch)", METRICS_PATH);
    }
    let report = simulator.run(until)?;

    print_summary(&report, simulator.expected_tasks());

    if let Some(path) = matches.get_one::<PathBuf>("report") {
        report.write(path)?;
        println!("Report written to {}", path.display());
    }
    Ok(())
}

fn print_summary(report: &RunReport, expected: usize) {
    println!();
    println!("{:<16} {:>9} {:>9} {:>9} {:>9} {:>9}", "task", "generated", "queued", "scheduled", "done", "latency");
    for task in &report.tasks {
        let cell = |t: Option<SimTime>| t.map_or_else(|| "-".to_string(), |t| t.to_string());
        let latency = match (task.generated_at, task.done_at) {
            (Some(generated), Some(done)) => (done - generated).to_string(),
            _ => "-".to_string(),
        };
        println!(
            "{:<16} {:>9} {:>9} {:>9} {:>9} {:>9}",
            task.tag,
            cell(task.generated_at),
            cell(task.queued_at),
            cell(task.scheduled_at),
            cell(task.done_at),
            latency,
        );
    }
    println!();
    println!(
        "Stats: {}/{} tasks | {} kernels | makespan={} | mean latency={} | policy={} | partition={}",
        report.completed_tasks(),
        expected,
        report.completed_kernels(),
        report.makespan().map_or_else(|| "-".to_string(), |t| t.to_string()),
        report
            .mean_latency()
            .map_or_else(|| "-".to_string(), |l| format!("{:.1}", l)),
        report.policy,
        report.partition,
    );
}
