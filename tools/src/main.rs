//! rwdsim-runner: headless cohort + abstraction simulation runner.
//!
//! Usage:
//!   rwdsim-runner --config data/simparams.ini --seed 12345
//!   rwdsim-runner --config data/simparams.json --db run.db \
//!       --true-csv true.csv --observed-csv observed.csv --report-json report.json
//!   rwdsim-runner --config data/simparams.ini --report-csv reports.csv \
//!       --report-every 90 [--report-count 8]

use anyhow::{Context, Result};
use rwdsim_core::{
    config::SimulationConfig,
    report::{monthly_discovery, standard_reports, SimulationReport},
    simulation::{Simulation, SimulationOutput},
    store::SimStore,
};
use serde::Serialize;
use std::env;
use std::path::Path;

#[derive(Serialize)]
struct ReportFile<'a> {
    run_id: &'a str,
    seed: u64,
    report: &'a SimulationReport,
    discovery: Vec<rwdsim_core::report::DiscoverySnapshot>,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let config_path = string_arg(&args, "--config").unwrap_or("./data/simparams.ini");
    let db = string_arg(&args, "--db");
    let true_csv = string_arg(&args, "--true-csv");
    let observed_csv = string_arg(&args, "--observed-csv");
    let report_json = string_arg(&args, "--report-json");
    let report_csv = string_arg(&args, "--report-csv");
    let report_every = parse_arg(&args, "--report-every", 365u32);
    let report_count = string_arg(&args, "--report-count").and_then(|v| v.parse::<usize>().ok());
    let run_id = string_arg(&args, "--run-id")
        .map(str::to_string)
        .unwrap_or_else(|| format!("run-{seed}-{}", uuid::Uuid::new_v4().simple()));

    println!("rwdsim: cohort simulation runner");
    println!("  run_id:    {run_id}");
    println!("  seed:      {seed}");
    println!("  config:    {config_path}");
    println!("  db:        {}", db.unwrap_or("(none)"));
    println!();

    let config = SimulationConfig::load(config_path)
        .with_context(|| format!("loading parameters from {config_path}"))?;

    let mut sim = Simulation::new(run_id.clone(), seed, config);
    let output = sim.run()?;

    if let Some(db) = db {
        let store = SimStore::open(db)?;
        store.migrate()?;
        let raw = std::fs::read_to_string(config_path).ok();
        store.insert_run(&run_id, seed, env!("CARGO_PKG_VERSION"), raw.as_deref())?;
        store.save_run_output(&sim, &output)?;
    }
    if let Some(path) = true_csv {
        write_csv(path, output.true_dataset())?;
        log::info!("wrote true dataset to {path}");
    }
    if let Some(path) = observed_csv {
        write_csv(path, output.observed_dataset())?;
        log::info!("wrote observed dataset to {path}");
    }
    if let Some(path) = report_json {
        let file = ReportFile {
            run_id: &run_id,
            seed,
            report: &output.report,
            discovery: monthly_discovery(sim.config(), output.observed_dataset())?,
        };
        std::fs::write(path, serde_json::to_string_pretty(&file)?)
            .with_context(|| format!("writing report to {path}"))?;
        log::info!("wrote report to {path}");
    }

    if let Some(path) = report_csv {
        let rows = standard_reports(sim.config(), output.observed_dataset(), report_every, report_count)?;
        write_csv(path, &rows)?;
        log::info!("wrote {} report rows to {path}", rows.len());
    }

    print_summary(&sim, &output);
    Ok(())
}

fn write_csv<T: Serialize>(path: impl AsRef<Path>, rows: &[T]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn print_summary(sim: &Simulation, output: &SimulationOutput) {
    let r = &output.report;
    let cfg = sim.config();

    println!("=== RUN SUMMARY ===");
    println!("  run_id:            {}", sim.run_id);
    println!("  study start:       {}", cfg.study_start());
    println!("  patients:          {}", r.num_patients);
    println!("  retrospective:     {}", r.retrospective);
    println!("  prospective:       {}", r.prospective);
    println!("  drug A fraction:   {:.3}", r.drug_a_fraction);
    println!("  drug B fraction:   {:.3}", r.drug_b_fraction);
    println!("  survival fraction: {:.3}", r.survival_fraction);
    println!("  starts after death: {}", output.cohort.stats.starts_after_death);
    println!("  observed records:  {}", r.observed_records);
    println!("  abstracted:        {}", r.abstracted_records);
    println!("  not abstracted:    {}", r.censored_abstractions);
    println!("  truncated events:  {}", r.truncated_events);
    println!("  fully abstracted:  {}", r.fully_abstracted_patients);

    println!();
    println!("=== EVENT DATE SPANS ===");
    for span in &r.date_spans {
        let fmt = |d: Option<chrono::NaiveDate>| d.map_or_else(|| "-".to_string(), |d| d.to_string());
        println!(
            "  {:<13} {:<15} n={:<6} min={} max={}",
            span.event_type.as_str(),
            format!("{:?}", span.stage),
            span.count,
            fmt(span.min),
            fmt(span.max),
        );
    }
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
