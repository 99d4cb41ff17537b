mod job;
mod logging;

use clap::{Parser, Subcommand};
use integrate_pipeline::classify::{FaultClassification, LogClassifier};
use integrate_pipeline::config::ControllerSettings;
use integrate_pipeline::deck::ParameterDeck;
use integrate_pipeline::launcher::missing_programs;
use integrate_pipeline::rescut::find_cutoff;
use job::{run_job, tool_programs, JobConfig, RunMode};
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(about = "Incremental XDS integration controller", version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Integrate one dataset described by a job file.
    Run(RunArgs),
    /// Print the I/sigma resolution cutoff from a CORRECT.LP.
    Cutoff(CutoffArgs),
    /// Classify an XDS.LOG and show the deck patch it would trigger.
    Classify(ClassifyArgs),
    /// Report which configured programs are missing from PATH.
    CheckDeps(CheckDepsArgs),
}

#[derive(Parser, Debug)]
struct RunArgs {
    #[arg(long)]
    config: PathBuf,
    #[arg(long, value_enum)]
    mode: Option<RunMode>,
}

#[derive(Parser, Debug)]
struct CutoffArgs {
    #[arg(long)]
    correct_lp: PathBuf,
    #[arg(long, default_value_t = 1.0)]
    target: f64,
}

#[derive(Parser, Debug)]
struct ClassifyArgs {
    #[arg(long)]
    log: PathBuf,
    #[arg(long)]
    deck: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct CheckDepsArgs {
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    logging::init_tracing();
    let args = Args::parse();

    match args.command {
        Command::Run(run) => match run_job(&run.config, run.mode) {
            Ok(report) => {
                let result = &report.controller.final_result;
                println!(
                    "Integrated images {}-{} in {} ({} results, {} tool launches)",
                    result.first,
                    result.last,
                    result.dir.display(),
                    report.results_written,
                    report.controller.launches
                );
                if let Some(limit) = result.high_resolution() {
                    println!("High resolution limit: {limit:.2} A");
                }
                for warning in &result.warnings {
                    println!("- {warning}");
                }
                println!("Report: {}", report.report_path.display());
            }
            Err(err) => {
                eprintln!("Integration error: {err}");
                std::process::exit(1);
            }
        },
        Command::Cutoff(cutoff) => {
            let src = match fs::read_to_string(&cutoff.correct_lp) {
                Ok(src) => src,
                Err(err) => {
                    eprintln!("Cutoff error: read {}: {err}", cutoff.correct_lp.display());
                    std::process::exit(1);
                }
            };
            match find_cutoff(&src, cutoff.target) {
                Some(limit) => println!("{limit:.2}"),
                None => println!("no cutoff: I/sigma does not cross {} in the shell table", cutoff.target),
            }
        }
        Command::Classify(classify) => {
            let log = match fs::read_to_string(&classify.log) {
                Ok(log) => log,
                Err(err) => {
                    eprintln!("Classify error: read {}: {err}", classify.log.display());
                    std::process::exit(1);
                }
            };
            let mut deck = match &classify.deck {
                Some(path) => match fs::read_to_string(path) {
                    Ok(src) => ParameterDeck::from_lines(src.lines()),
                    Err(err) => {
                        eprintln!("Classify error: read {}: {err}", path.display());
                        std::process::exit(1);
                    }
                },
                None => ParameterDeck::new(),
            };
            match LogClassifier::new().scan(&log, &mut deck) {
                FaultClassification::Finished => println!("finished"),
                FaultClassification::RecoverableFixed { rule, patch } => {
                    println!("recoverable ({rule}): {}", patch.describe());
                    print!("{}", deck.render());
                }
                FaultClassification::RecoverableWarning { rule, reason } => {
                    println!("warning ({rule}): {reason}");
                }
                FaultClassification::Unknown { line } => {
                    println!("unknown fault: {line}");
                    std::process::exit(1);
                }
            }
        }
        Command::CheckDeps(check) => {
            let settings = match &check.config {
                Some(path) => match JobConfig::load(path) {
                    Ok(config) => config.settings,
                    Err(err) => {
                        eprintln!("Dependency check error: {err}");
                        std::process::exit(1);
                    }
                },
                None => ControllerSettings::default(),
            };
            let programs = tool_programs(&settings);
            let missing = missing_programs(&programs);
            for program in &programs {
                let state = if missing.contains(program) {
                    "missing"
                } else {
                    "found"
                };
                println!("{program}: {state}");
            }
            if !missing.is_empty() {
                std::process::exit(1);
            }
        }
    }
}
