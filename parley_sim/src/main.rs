//! Parley scenario harness CLI
//!
//! Runs built-in or file-based voice-agent scenarios on the virtual clock.

use clap::Parser;
use parley_sim::scenarios::ScenarioId;
use parley_sim::{write_all, RunExport, RunReport, Scenario, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "parley-sim")]
#[command(about = "Deterministic scenario harness for realtime voice agents")]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Built-in scenario to run (hotel_booking_basic, hotel_booking_noisy,
    /// hotel_booking_interrupt, flaky_booking, elevator_dropout,
    /// branching_booking, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Scenario JSON file; replaces --scenario
    #[arg(short = 'f', long)]
    scenario_file: Option<String>,

    /// Number of consecutive seeds to run (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Use the wall clock instead of virtual time
    #[arg(long)]
    realtime: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export full run reports to a JSON file
    #[arg(long)]
    export: Option<String>,
}

/// One finished (or failed-to-start) run.
struct RunOutcome {
    scenario: String,
    seed: u64,
    report: Option<RunReport>,
    failure_reason: Option<String>,
}

impl RunOutcome {
    fn passed(&self) -> bool {
        self.report.as_ref().is_some_and(RunReport::passed)
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    if !args.json {
        info!("Parley scenario harness v0.1.0");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Load scenarios up front so schema errors stop the whole batch
    let scenarios: Vec<Scenario> = match &args.scenario_file {
        Some(path) => match Scenario::from_file(path) {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        },
        None => {
            let ids: Vec<ScenarioId> = if args.scenario == "all" {
                ScenarioId::all()
            } else {
                vec![args.scenario.parse().unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    let names: Vec<&str> = ScenarioId::all().iter().map(|id| id.name()).collect();
                    eprintln!("Available scenarios: {}, all", names.join(", "));
                    std::process::exit(1);
                })]
            };
            ids.iter()
                .map(|id| {
                    id.scenario().unwrap_or_else(|e| {
                        eprintln!("Error: built-in scenario {} is invalid: {}", id, e);
                        std::process::exit(1);
                    })
                })
                .collect()
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut outcomes: Vec<RunOutcome> = Vec::new();

    for seed_offset in 0..args.seeds.max(1) {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed).realtime(args.realtime);

        for scenario in &scenarios {
            let outcome = match runner.run(scenario) {
                Ok(report) => RunOutcome {
                    scenario: scenario.name.clone(),
                    seed,
                    failure_reason: report.failure_reason(),
                    report: Some(report),
                },
                Err(e) => RunOutcome {
                    scenario: scenario.name.clone(),
                    seed,
                    report: None,
                    failure_reason: Some(e.to_string()),
                },
            };

            if !args.json {
                if outcome.passed() {
                    info!("✓ {} (seed={}) PASSED", outcome.scenario, seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        outcome.scenario,
                        seed,
                        outcome.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }
            outcomes.push(outcome);
        }
    }

    if let Some(path) = &args.export {
        let exports: Vec<RunExport> = outcomes
            .iter()
            .filter_map(|o| o.report.as_ref())
            .map(RunExport::from_report)
            .collect();
        match write_all(&exports, path) {
            Ok(()) => info!("Exported {} run(s) to {}", exports.len(), path),
            Err(e) => error!("Failed to write export {}: {}", path, e),
        }
    }

    // Summary
    let total = outcomes.len();
    let failed_count = outcomes.iter().filter(|o| !o.passed()).count();
    let passed = total - failed_count;

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": outcomes.iter().map(|o| {
                serde_json::json!({
                    "scenario": o.scenario,
                    "seed": o.seed,
                    "passed": o.passed(),
                    "run_id": o.report.as_ref().map(|r| r.run_id.as_uuid().to_string()),
                    "outcomes": o.report.as_ref().map_or(0, |r| r.outcomes.len()),
                    "time_secs": o.report.as_ref().map(|r| r.finished_at.as_secs_f64()),
                    "failure_reason": o.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to render summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);

            // List failed seeds
            for outcome in outcomes.iter().filter(|o| !o.passed()) {
                error!(
                    "  - {} seed={}: {}",
                    outcome.scenario,
                    outcome.seed,
                    outcome.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
