// ========================================================================================
//
//                      THE SIMULATION DRIVER: POLYEPI
//
// ========================================================================================
//
// Parses the command line, sets up logging and the global thread pool, hands the
// configuration to the library pipeline and reports what came out. All simulation
// logic lives in the library; this file only conducts.

use clap::Parser;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use polyepi::config::SimulationConfig;
use polyepi::pipeline::{self, RunOptions, SimulationOutcome};
use polyepi::refine::{RoundObserver, RoundReport};
use std::error::Error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process;
use std::time::Instant;

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "polyepi",
    version,
    about = "Simulates a case/control phenotype with higher-order epistasis from genotype data."
)]
struct Args {
    /// Path to the TOML run configuration.
    config: PathBuf,

    /// Log level: error, warn, info, debug or trace.
    #[clap(long, default_value = "info")]
    log_level: String,

    /// Worker threads for the parallel stages. Defaults to the number of CPUs.
    #[clap(short = 't', long)]
    threads: Option<usize>,

    /// Seed for the shuffle, the initial labels and validation. Overrides the configuration.
    #[clap(long)]
    seed: Option<u64>,

    /// Do not train the validation classifier.
    #[clap(long)]
    skip_validation: bool,
}

// ========================================================================================
//                                 PROGRESS REPORTING
// ========================================================================================

/// Drives a progress bar across the refinement rounds.
struct RoundProgress {
    bar: Option<ProgressBar>,
}

impl RoundObserver for RoundProgress {
    fn on_start(&mut self, total_rounds: usize) {
        let draw_target = if std::io::stderr().is_terminal() {
            ProgressDrawTarget::stderr_with_hz(20)
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(total_rounds as u64), draw_target);
        bar.set_style(
            ProgressStyle::with_template(
                "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} rounds {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  "),
        );
        self.bar = Some(bar);
    }

    fn on_round(&mut self, report: &RoundReport) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} cases / {} controls", report.cases, report.controls));
            bar.inc(1);
        }
    }

    fn on_finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

// ========================================================================================
//                                   MAIN EXECUTION
// ========================================================================================

fn main() {
    let overall_start_time = Instant::now();
    let args = Args::parse();

    let log_level = args
        .log_level
        .parse::<log::LevelFilter>()
        .unwrap_or_else(|_| {
            eprintln!(
                "Warning: Invalid log level '{}' provided. Defaulting to info.",
                args.log_level
            );
            log::LevelFilter::Info
        });
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp_micros()
        .init();

    let num_threads = args.threads.unwrap_or_else(num_cpus::get);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        eprintln!("Failed to configure the thread pool: {e}");
        process::exit(1);
    }
    log::info!("Using {num_threads} threads for parallel operations.");

    let config = match SimulationConfig::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            report_error("Failed to load configuration", &e);
            process::exit(1);
        }
    };
    eprintln!(
        "> Simulating {} variables from {} variants over {} rounds.",
        config.num_variables(),
        config.num_snps_needed(),
        config.num_loop
    );

    let options = RunOptions {
        seed: args.seed,
        skip_validation: args.skip_validation,
    };
    let mut progress = RoundProgress { bar: None };
    let outcome = match pipeline::run(&config, &options, &mut progress) {
        Ok(outcome) => outcome,
        Err(e) => {
            report_error("Fatal error", &e);
            process::exit(1);
        }
    };

    print_summary(&config, &outcome);
    eprintln!(
        "\n> Success! Total execution time: {:.2?}",
        overall_start_time.elapsed()
    );
}

fn report_error(context: &str, error: &dyn Error) {
    eprintln!("{context}: {error}");
    let mut source = error.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

fn print_summary(config: &SimulationConfig, outcome: &SimulationOutcome) {
    let simulation = &outcome.simulation;
    eprintln!("> Seed: {}", outcome.seed);
    eprintln!(
        "> Final phenotype: {} cases, {} controls ({} degenerate rounds).",
        simulation.summary.final_cases,
        simulation.labels.len() - simulation.summary.final_cases,
        simulation.summary.degenerate_rounds
    );
    eprintln!(
        "> Truth set: {} variables, {} variants.",
        simulation.truth.variables.len(),
        simulation.truth.variants.len()
    );
    for report in &outcome.validation {
        eprintln!(
            "> AUC on {}: {:.4} ({} variants)",
            report.feature_set, report.auc, report.num_features
        );
    }
    eprintln!(
        "> Outputs written with prefix: {}",
        config.output_prefix
    );
}
