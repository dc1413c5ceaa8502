//! Run a CLO deal from a JSON input bundle
//!
//! Loads the deal configuration, executes the full period loop, and
//! prints the per-period table plus tranche summaries. Optionally writes
//! the complete output bundle as JSON.

use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use clo_engine::loader::load_deal_config;
use clo_engine::{Calendar, DealEngine};

#[derive(Parser, Debug)]
#[command(name = "run_deal", about = "Run a CLO deal cash-flow projection")]
struct Args {
    /// Deal configuration JSON
    config: PathBuf,

    /// Write the full output bundle to this JSON file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print every waterfall period instead of the first eight
    #[arg(long)]
    full: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = load_deal_config(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let deal_name = args
        .config
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "deal".to_string());

    let mut engine = DealEngine::new(config, Calendar::new())?;
    let output = engine.run()?;

    println!("Deal: {deal_name}");
    println!("Periods calculated: {}", output.last_calculated_period);
    println!();
    println!(
        "{:>4} {:>12} {:>14} {:>14} {:>14} {:>12} {:>12} {:>8}",
        "Per", "Pay Date", "Interest", "Principal", "Notes Paid", "Reinvested", "Residual", "LIBOR"
    );
    println!("{}", "-".repeat(96));

    let rows = if args.full {
        output.periods.len()
    } else {
        output.periods.len().min(8)
    };
    for row in output.periods.iter().take(rows) {
        println!(
            "{:>4} {:>12} {:>14.2} {:>14.2} {:>14.2} {:>12.2} {:>12.2} {:>7.3}%",
            row.period,
            row.payment_date,
            row.interest_proceeds,
            row.principal_proceeds,
            row.notes_paid,
            row.reinvested,
            row.residual_paid,
            row.libor * 100.0,
        );
    }
    if output.periods.len() > rows {
        println!("... ({} more periods)", output.periods.len() - rows);
    }

    println!("\nTranches:");
    for tranche in &output.tranches {
        println!(
            "  {:<12} balance {:>14.2} -> {:>14.2}  interest {:>12.2}  principal {:>14.2}",
            tranche.name,
            tranche.original_balance,
            tranche.ending_balance,
            tranche.total_interest_paid,
            tranche.total_principal_paid,
        );
        if let Some(y) = tranche.risk.tranche_yield {
            println!(
                "  {:<12} yield {:>6.3}%  wal {:>5.2}y  macaulay {:>5.2}  dm {:>8}",
                "",
                y * 100.0,
                tranche.risk.weighted_average_life.unwrap_or(0.0),
                tranche.risk.macaulay_duration.unwrap_or(0.0),
                tranche
                    .risk
                    .discount_margin
                    .map(|dm| format!("{:.0}bp", dm * 10_000.0))
                    .unwrap_or_else(|| "n/a".to_string()),
            );
        }
    }

    let failing: Vec<_> = output.compliance_at_closing.failing().collect();
    if failing.is_empty() {
        println!("\nConcentration tests: all passing");
    } else {
        println!("\nFailing concentration tests:");
        for test in failing {
            println!(
                "  [{:>3}] {:<40} {:>10.4} vs {:>10.4}",
                test.number, test.name, test.result, test.threshold
            );
        }
        println!(
            "  objective: {:.6}",
            output.compliance_at_closing.objective
        );
    }

    if !output.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &output.warnings {
            println!("  period {}: {}", warning.period, warning.message);
        }
    }

    if let Some(path) = args.output {
        let file = File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        serde_json::to_writer_pretty(file, &output)?;
        println!("\nFull output written to: {}", path.display());
    }

    Ok(())
}
