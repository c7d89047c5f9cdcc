//! Command-line harness for the dagopt optimizer.
//!
//! Builds a scenario graph, then runs optimize, shape inference and memory
//! allocation in that order.
//!
//! ```bash
//! dagopt transpose-matmul --json
//! RUST_LOG=dagopt=debug dagopt mixed
//! ```

mod scenarios;

use anyhow::{Context, Result};
use clap::Parser;
use dagopt::Allocator;
use serde_json::json;
use tracing::info;

use scenarios::Scenario;

#[derive(Parser, Debug)]
#[command(name = "dagopt")]
#[command(about = "Run the DFS rule optimizer over a built-in operator graph")]
#[command(version)]
struct Args {
    /// Graph to build
    #[arg(value_enum, default_value_t = Scenario::Mixed)]
    scenario: Scenario,

    /// Print the optimize report as JSON instead of the graph dumps
    #[arg(long)]
    json: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut graph = args.scenario.build()?;
    let ops_before = graph.num_ops();
    if !args.json {
        println!("{graph}");
    }

    let report = graph.optimize().context("optimize failed")?;
    info!(
        rounds = report.rounds,
        rewrites = report.rewrites,
        removed_ops = report.removed_ops,
        "optimize finished"
    );
    graph.shape_infer().context("shape inference failed")?;
    graph.data_malloc().context("memory allocation failed")?;

    if args.json {
        let summary = json!({
            "scenario": format!("{:?}", args.scenario),
            "ops_before": ops_before,
            "ops_after": graph.num_ops(),
            "tensors_after": graph.num_tensors(),
            "allocated_bytes": graph.allocator().peak(),
            "report": report,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{graph}");
        println!(
            "rounds {}, rewrites {}, removed {} operators and {} tensors, {} bytes allocated",
            report.rounds,
            report.rewrites,
            report.removed_ops,
            report.removed_tensors,
            graph.allocator().peak()
        );
        for (rule, count) in &report.rewrites_by_rule {
            println!("  {rule}: {count}");
        }
    }
    Ok(())
}
