use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use log::info;

use jobledger::config::{config_path, load_config};
use jobledger::{JobId, JobLedger, LedgerError};

#[derive(Parser)]
#[command(name = "jobledger", version, about = "Inspect and maintain the analysis job ledger")]
struct Cli {
    /// Config file (defaults to $JOBLEDGER_CONFIG, then ~/.jobledger/config.json)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List commands applicable to each datatype
    Commands {
        /// Restrict to these datatypes
        datatypes: Vec<String>,
    },
    /// Show a job
    Show { id: i64 },
    /// List a job's result files
    Results { id: i64 },
    /// Delete a job and its exclusively owned result files
    Delete { id: i64 },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), LedgerError> {
    let path = config_path(cli.config.as_deref()).ok_or_else(|| {
        jobledger::ConfigError::Validation {
            message: "no config file given and no home directory found".to_string(),
        }
    })?;
    let config = load_config(&path)?;
    let ledger = JobLedger::from_config(&config)?;

    match cli.command {
        Commands::Commands { datatypes } => {
            let names: Vec<&str> = datatypes.iter().map(String::as_str).collect();
            let filter = (!names.is_empty()).then_some(names.as_slice());
            let by_datatype = ledger.get_commands_by_datatype(filter)?;
            if cli.json {
                print_json(&by_datatype);
            } else {
                for (datatype, commands) in &by_datatype {
                    println!("{}", datatype);
                    for command in commands {
                        println!("  {} ({})", command.name, command.script);
                    }
                }
            }
        }
        Commands::Show { id } => {
            let job = ledger.load(JobId(id))?;
            if cli.json {
                print_json(&job);
            } else {
                println!("job {}", job.id);
                println!("  datatype: {}", job.datatype);
                println!("  command:  {} ({})", job.command_name(), job.script());
                println!("  status:   {}", job.status);
                if let Some(analysis) = job.analysis_id {
                    println!("  analysis: {}", analysis);
                }
                if let Some(error) = &job.error {
                    println!("  error:    [{}] {}", error.time.to_rfc3339(), error.msg);
                }
                println!("  options:");
                for (key, value) in job.options.iter() {
                    println!("    {} = {}", key, value);
                }
            }
        }
        Commands::Results { id } => {
            let job = ledger.load(JobId(id))?;
            if cli.json {
                print_json(&job.results);
            } else {
                for path in &job.results {
                    println!("{}", path.display());
                }
            }
        }
        Commands::Delete { id } => {
            let removed = ledger.delete(JobId(id))?;
            info!("Deleted job {} and {} result file(s)", id, removed.len());
            if cli.json {
                print_json(&removed);
            }
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => log::error!("Failed to serialize output: {}", e),
    }
}
