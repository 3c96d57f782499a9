//! relaxcore CLI Entry Point
//!
//! Runs a batch of auto-analyses described in a YAML analysis file.
//!
//! # Usage
//!
//! ```bash
//! # Run every analysis in the file on worker threads
//! relaxcore analyses.yaml
//!
//! # Log the steps without writing any file
//! relaxcore analyses.yaml --dry-run
//!
//! # Continue from a saved state and save the final state
//! relaxcore analyses.yaml --load-state start.json --save-state end.json
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use log::{error, info, warn};

use relaxcore::auto_analyses::{AnalysisJob, AnalysisSpec};
use relaxcore::config::{load_analysis_file, setup_pipes};
use relaxcore::execution::CapturedException;
use relaxcore::monitoring::EventType;
use relaxcore::pipes::{Backends, DataStore, PipeType};
use relaxcore::status::{Settings, Status};
use relaxcore::{AnalysisController, AnalysisTab, RelaxResult, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug, Default)]
struct Config {
    analysis_file: Option<PathBuf>,
    inline: bool,
    dry_run: bool,
    results_dir: Option<PathBuf>,
    load_state: Option<PathBuf>,
    save_state: Option<PathBuf>,
    verbose: bool,
    debug: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("NMR relaxation auto-analysis runner");
    println!();
}

fn print_usage() {
    println!("Usage: relaxcore [OPTIONS] <ANALYSIS_FILE>");
    println!();
    println!("Arguments:");
    println!("  <ANALYSIS_FILE>       Path to the analysis YAML file");
    println!();
    println!("Options:");
    println!("  --inline              Run the analyses in the main thread");
    println!("  --dry-run             Log the analysis steps without writing files");
    println!("  --results-dir DIR     Results directory for analyses without one");
    println!("  --load-state FILE     Restore a saved state before running");
    println!("  --save-state FILE     Save the final state after running");
    println!("  --verbose             Enable debug logging");
    println!("  --debug               Trace lock and observer activity");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
    println!();
    println!("Examples:");
    println!("  relaxcore noe.yaml");
    println!("  relaxcore model_free.yaml --results-dir /data/mf --save-state mf.json");
}

fn path_value(args: &[String], i: usize, option: &str) -> Result<PathBuf, String> {
    args.get(i)
        .map(PathBuf::from)
        .ok_or_else(|| format!("{} requires a path argument", option))
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1;

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--inline" => config.inline = true,
            "--dry-run" => config.dry_run = true,
            "--verbose" | "-v" => config.verbose = true,
            "--debug" => config.debug = true,
            "--results-dir" => {
                i += 1;
                config.results_dir = Some(path_value(args, i, "--results-dir")?);
            }
            "--load-state" => {
                i += 1;
                config.load_state = Some(path_value(args, i, "--load-state")?);
            }
            "--save-state" => {
                i += 1;
                config.save_state = Some(path_value(args, i, "--save-state")?);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.analysis_file.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.analysis_file = Some(PathBuf::from(arg));
            }
        }
        i += 1;
    }

    Ok(config)
}

/// Tab type shown for an analysis.
fn tab_type(spec: &AnalysisSpec) -> &'static str {
    match spec.kind() {
        "relax_fit" => "r1",
        other => other,
    }
}

/// Opens a tab for every analysis, runs them one after another and collects
/// the captured failures.
fn run_analyses(
    config: &Config,
    ds: &Arc<DataStore>,
    analyses: Vec<AnalysisSpec>,
) -> RelaxResult<Vec<CapturedException>> {
    let controller = AnalysisController::new(Arc::clone(ds))?;
    let mut failures = Vec::new();

    for spec in analyses {
        let name = match spec.kind().parse::<PipeType>() {
            Ok(pipe_type) => format!("{} ({})", pipe_type.description(), spec.pipe_bundle()),
            Err(_) => spec.pipe_bundle().to_string(),
        };
        let index = controller.new_analysis(AnalysisTab::new(
            tab_type(&spec),
            name.as_str(),
            spec.pipe_name(),
            spec.pipe_bundle(),
        ))?;

        info!("Running analysis {}: {}", index + 1, name);
        let job = AnalysisJob::headless(spec, config.dry_run);
        controller.execute(index, job, !config.inline)?.join()?;

        failures.extend(ds.status().exception_queue.drain());
    }

    Ok(failures)
}

fn print_summary(status: &Status, failures: &[CapturedException]) {
    println!();
    println!("{}", "Summary".bold());

    let timeline = status.timeline();
    let durations = timeline.durations();
    for name in status.auto_analysis.names() {
        let millis = durations.get(&name).map(|d| d.as_millis()).unwrap_or(0);
        match timeline.outcome(&name) {
            Some(EventType::Completed) => {
                println!("  {} {} ({} ms)", "✓".green(), name, millis)
            }
            _ => println!("  {} {} ({} ms)", "✗".red(), name, millis),
        }
    }

    for failure in failures {
        println!(
            "  {} analysis {}: {}",
            "error".red().bold(),
            failure.data_index + 1,
            failure.message()
        );
    }

    print!("{}", timeline.gantt_chart());
}

/// Main application entry point.
fn run() -> Result<bool, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;
    let Some(analysis_file) = config.analysis_file.clone() else {
        print_usage();
        return Err("No analysis file given".into());
    };

    setup_logging(config.verbose || config.debug);
    print_banner();

    let status = Status::new(Settings {
        debug: config.debug,
        backends: Backends::detect(),
        ..Settings::default()
    });
    let ds = DataStore::new(Arc::clone(&status));

    if config.dry_run {
        info!("Mode: DRY RUN (no files will be written)");
    }

    if let Some(path) = &config.load_state {
        ds.load_state(path)?;
    }

    let mut file = load_analysis_file(&analysis_file, &ds.pipe_names(None)).map_err(|e| {
        error!("Failed to load the analysis file: {}", e);
        e
    })?;

    if let Some(dir) = config.results_dir.clone().or_else(|| file.results_dir.clone()) {
        for spec in &mut file.analyses {
            spec.default_results_dir(dir.clone());
        }
    }

    setup_pipes(&file, &ds)?;
    let failures = run_analyses(&config, &ds, file.analyses)?;

    print_summary(&status, &failures);

    if let Some(path) = &config.save_state {
        if config.dry_run {
            warn!("Dry run: the state has not been saved to {}", path.display());
        } else {
            ds.save_state(path)?;
        }
    }

    Ok(failures.is_empty())
}

fn main() -> ExitCode {
    match run() {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
