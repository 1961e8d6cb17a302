//! Command-line front end: reduce survey data files and summarize (or dump)
//! the resulting network.

use std::path::PathBuf;
use std::process;

use anyhow::Context;
use clap::Parser;
use colored::*;
use tracing::debug;

use survey_reducer::geomag::NullGeomag;
use survey_reducer::{CollectingNetwork, Processor, Settings, StationTable};

/// CLI arguments for the survey reducer
///
/// Reduces raw cave survey instrument readings into 3-dimensional
/// displacement vectors with full measurement covariance.
#[derive(Debug, Parser)]
#[command(
    name = "survey_reducer",
    version,
    about = "Reduce cave survey instrument readings to displacement vectors with covariance",
    long_about = "Parses native survey data files and Compass .dat/.mak files, combines \
                  foresight and backsight readings by inverse variance, and emits one \
                  displacement vector with a full covariance matrix per surveyed leg. \
                  Diagnostics carry caret-positioned source context across nested file \
                  inclusions."
)]
struct Args {
    /// Survey data files to reduce, in order (.svx, .dat or .mak)
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,

    /// Write the reduced network to stdout as JSON
    #[arg(long)]
    json: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress the summary (diagnostics still go to stderr)
    #[arg(short, long)]
    quiet: bool,
}

struct Summary {
    legs: usize,
    equates: usize,
    cross_sections: usize,
    stations: usize,
    warnings: u32,
    errors: u32,
}

fn main() {
    let args = Args::parse();
    setup_logging(&args);

    match run(&args) {
        Ok(summary) => {
            if !args.quiet && !args.json {
                report(&summary);
            }
            if summary.errors > 0 {
                process::exit(1);
            }
        }
        Err(error) => {
            eprintln!("{} {:#}", "Error:".bright_red().bold(), error);
            process::exit(1);
        }
    }
}

/// Set up structured logging based on CLI arguments
fn setup_logging(args: &Args) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let log_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("survey_reducer={log_level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_level(true)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();

    debug!("Logging initialized at level: {log_level}");
}

fn run(args: &Args) -> anyhow::Result<Summary> {
    let mut stations = StationTable::new();
    let mut net = CollectingNetwork::new();
    let geomag = NullGeomag;

    let (warnings, errors) = {
        let mut processor =
            Processor::new(Settings::native(), &mut stations, &mut net, &geomag);
        for file in &args.files {
            processor
                .reduce_file(file)
                .with_context(|| format!("failed to reduce {}", file.display()))?;
        }
        (processor.warnings(), processor.errors())
    };

    if args.json {
        serde_json::to_writer_pretty(std::io::stdout().lock(), &net)
            .context("failed to write JSON output")?;
        println!();
    }

    Ok(Summary {
        legs: net.legs.len(),
        equates: net.equates.len(),
        cross_sections: net.cross_sections.len(),
        stations: stations.len(),
        warnings,
        errors,
    })
}

fn report(summary: &Summary) {
    println!("\n{}", "Reduction Summary".bright_green().bold());
    println!(
        "  {} {}",
        "Legs reduced:".bright_cyan(),
        summary.legs.to_string().bright_white().bold()
    );
    println!(
        "  {} {}",
        "Stations:".bright_cyan(),
        summary.stations.to_string().bright_white().bold()
    );
    if summary.equates > 0 {
        println!(
            "  {} {}",
            "Equates:".bright_cyan(),
            summary.equates.to_string().bright_white().bold()
        );
    }
    if summary.cross_sections > 0 {
        println!(
            "  {} {}",
            "Cross-sections:".bright_cyan(),
            summary.cross_sections.to_string().bright_white().bold()
        );
    }
    if summary.warnings > 0 {
        println!(
            "  {} {}",
            "Warnings:".bright_yellow(),
            summary.warnings.to_string().bright_yellow().bold()
        );
    }
    if summary.errors > 0 {
        println!(
            "  {} {}",
            "Errors:".bright_red(),
            summary.errors.to_string().bright_red().bold()
        );
    }
}
