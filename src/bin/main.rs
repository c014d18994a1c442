//! Dumpster CLI - handler tool for problem records
//!
//! Runs events against records, lists the events a record qualifies for,
//! rates backtraces and shows or deletes records.

use clap::{Parser, Subcommand};
use colored::Colorize;
use dumpster::{
    delete_dump_dir, items, rate_text, Config, DeleteOutcome, DumpDir, Entry, EventRunner,
    OpenOptions, ProblemData, RunOutcome, DUPHASH,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dumpster")]
#[command(about = "Work with crash problem records")]
struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, global = true, env = "DUMPSTER_CONFIG")]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the handlers of an event on a record
    RunEvent {
        /// Problem record directory
        #[arg(short, long)]
        dir: PathBuf,

        /// Event name, e.g. post-create
        event: String,

        /// Rule file to use instead of the configured one
        #[arg(long)]
        rules: Option<PathBuf>,
    },

    /// List events that have rules, optionally only those a record qualifies for
    ListEvents {
        /// Problem record directory
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Only events starting with this
        #[arg(default_value = "")]
        prefix: String,
    },

    /// Print the 0-4 star rating of a backtrace file
    RateBacktrace {
        /// File containing gdb or Python backtrace text
        file: PathBuf,
    },

    /// Store the backtrace rating and the duplicate hash in a record
    Analyze {
        /// Problem record directory
        #[arg(short, long)]
        dir: PathBuf,
    },

    /// Show the contents of a record
    Show {
        /// Problem record directory
        #[arg(short, long)]
        dir: PathBuf,

        /// Output format: pretty or json
        #[arg(short, long, default_value = "pretty")]
        format: OutputFormat,
    },

    /// Delete a record
    Delete {
        /// Problem record directory
        #[arg(short, long)]
        dir: PathBuf,
    },
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    Pretty,
    Json,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };

    match cli.command {
        Commands::RunEvent { dir, event, rules } => {
            let code = run_event(&config, &dir, &event, rules)?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::ListEvents { dir, prefix } => {
            let runner = EventRunner::new(&config);
            for event in runner.list_possible_events(dir.as_deref(), &prefix)? {
                println!("{}", event);
            }
        }
        Commands::RateBacktrace { file } => {
            let text = std::fs::read(&file)?;
            println!("{}", rate_text(&String::from_utf8_lossy(&text)));
        }
        Commands::Analyze { dir } => {
            analyze(&config, &dir)?;
        }
        Commands::Show { dir, format } => {
            show(&config, &dir, format)?;
        }
        Commands::Delete { dir } => match delete_dump_dir(&dir, &config.dump_dir)? {
            DeleteOutcome::Removed => {
                println!("{} Deleted {}", "✓".green(), dir.display());
            }
            DeleteOutcome::AlreadyAbsent => {
                println!("{} {} was already gone", "info".blue(), dir.display());
            }
        },
    }

    Ok(())
}

/// Logs go to stderr. `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Returns the process exit code for the run.
fn run_event(
    config: &Config,
    dir: &Path,
    event: &str,
    rules: Option<PathBuf>,
) -> Result<i32, Box<dyn std::error::Error>> {
    let mut runner = EventRunner::new(config).on_output(|line| {
        println!("{}", line);
        line.to_string()
    });
    if let Some(rules) = rules {
        runner = runner.rule_file(rules);
    }

    let outcome = runner.run(dir, event)?;
    match outcome {
        RunOutcome::Success => {}
        RunOutcome::NoMatchingAction => {
            eprintln!(
                "{} No actions are found for event '{}'",
                "warning".yellow(),
                event
            );
        }
        RunOutcome::HandlerFailed(code) => {
            eprintln!("{} Event '{}' failed with {}", "error".red(), event, code);
        }
        RunOutcome::PostRunFailed(code) => {
            eprintln!("{} Post-run step failed with {}", "error".red(), code);
        }
    }
    Ok(outcome.exit_code())
}

fn analyze(config: &Config, dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let dd = DumpDir::open(dir, &config.dump_dir)?;

    if let Some(backtrace) = dd.load_text_opt(items::BACKTRACE)? {
        let rating = rate_text(&backtrace);
        dd.save_text(items::RATING, &rating.to_string())?;
        println!("  {} {}", "Rating:".cyan(), rating);
    }

    let data = ProblemData::from_dump_dir(&dd, &config.classify)?;
    let hash = data.duphash(config.hash.algorithm);
    dd.save_text(DUPHASH, &hash)?;
    println!("  {} {}", "Duphash:".cyan(), hash);

    dd.close();
    Ok(())
}

fn show(config: &Config, dir: &Path, format: OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
    let dd = OpenOptions::new().read_only(true).open(dir, &config.dump_dir)?;
    let data = ProblemData::from_dump_dir(&dd, &config.classify)?;
    dd.close();

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        OutputFormat::Pretty => {
            println!("{}", "━".repeat(60).dimmed());
            println!("{} {}", "▸".green().bold(), dir.display().to_string().bold());
            println!("{}", "━".repeat(60).dimmed());

            // Listed fields first, like a summary line.
            let (listed, rest): (Vec<_>, Vec<_>) = data.iter().partition(|(_, e)| e.is_listed());
            for (name, entry) in listed.into_iter().chain(rest) {
                let label = format!("{}:", name);
                let label = if entry.is_listed() {
                    label.cyan().bold()
                } else {
                    label.cyan()
                };
                match entry {
                    Entry::Binary { path } => {
                        println!("  {} {} {}", label, "[binary]".yellow(), path.display());
                    }
                    Entry::Text { content, .. } => {
                        let shown = entry.format().unwrap_or_else(|| content.clone());
                        if shown.contains('\n') {
                            println!("  {}", label);
                            for line in shown.lines() {
                                println!("    {}", line.dimmed());
                            }
                        } else {
                            println!("  {} {}", label, shown);
                        }
                    }
                }
            }
            println!();
        }
    }
    Ok(())
}
