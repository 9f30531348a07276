//! mobo-trial CLI
//!
//! Generates, runs and harvests optimization trials from the command line.
//!
//! # Usage
//!
//! ```bash
//! mobo-trial script --tag AxTrial7 enable_staves_2=1 enable_staves_3=0
//! mobo-trial run --tag AxTrial7 --record-params enable_staves_2=1
//! mobo-trial extract out/AxTrial7/aid2e_AxTrial7_ana_electron_Res.root
//! mobo-trial ax-config
//! ```

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use eic_mobo_tools::results;
use eic_mobo_tools::scheduler::ax_config;
use eic_mobo_tools::{ConfigStore, ObjectiveRunner, TrialManager};

/// Generate and run detector optimization trials
#[derive(Parser)]
#[command(name = "mobo-trial")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Run and environment configuration
    #[arg(long, global = true, default_value = "configuration/run.config")]
    run_config: PathBuf,

    /// Parameter space configuration
    #[arg(long, global = true, default_value = "configuration/parameters.config")]
    parameters: PathBuf,

    /// Objective space configuration
    #[arg(long, global = true, default_value = "configuration/objectives.config")]
    objectives: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write the geometry copies and driver script of a trial
    Script {
        /// Trial tag, unique per trial
        #[arg(long)]
        tag: String,

        /// Parameter values as name=value
        #[arg(value_parser = parse_assignment)]
        params: Vec<(String, String)>,
    },

    /// Generate a trial, run its script and print the objective values
    Run {
        /// Trial tag, unique per trial
        #[arg(long)]
        tag: String,

        /// Append the parameter values to each result file
        #[arg(long)]
        record_params: bool,

        /// Parameter values as name=value
        #[arg(value_parser = parse_assignment)]
        params: Vec<(String, String)>,
    },

    /// Print the objective value recorded for analysis outputs
    Extract {
        /// Analysis output files
        #[arg(required = true)]
        outputs: Vec<PathBuf>,
    },

    /// Print the scheduler setup derived from the configuration
    AxConfig,
}

fn parse_assignment(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

impl Cli {
    fn store(&self) -> Result<ConfigStore> {
        ConfigStore::load(&self.run_config, &self.parameters, &self.objectives).with_context(|| {
            format!(
                "Failed to load configuration from {}, {} and {}",
                self.run_config.display(),
                self.parameters.display(),
                self.objectives.display()
            )
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match &cli.command {
        Command::Script { tag, params } => {
            let manager = TrialManager::new(cli.store()?);
            let params = manager
                .parse_params(params.iter().map(|(n, v)| (n.as_str(), v.as_str())))
                .context("Invalid parameter values")?;
            let trial = manager
                .make_trial_script(tag, &params)
                .with_context(|| format!("Failed to generate trial {}", tag))?;
            let summary = json!({
                "script": trial.script,
                "config": trial.config,
                "outputs": trial.outputs,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Run {
            tag,
            record_params,
            params,
        } => {
            let manager = TrialManager::new(cli.store()?);
            let params = manager
                .parse_params(params.iter().map(|(n, v)| (n.as_str(), v.as_str())))
                .context("Invalid parameter values")?;
            let runner = ObjectiveRunner::with_shell(manager).record_parameters(*record_params);
            let outcome = runner
                .run_objectives(tag, &params)
                .with_context(|| format!("Failed to run trial {}", tag))?;
            for (name, error) in &outcome.failures {
                log::error!("{}: {}", name, error);
            }
            println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
        }

        Command::Extract { outputs } => {
            let mut failed = 0;
            for output in outputs {
                match results::extract(output) {
                    Ok(value) => println!("{}\t{}", output.display(), value),
                    Err(e) => {
                        log::error!("{}", e);
                        failed += 1;
                    }
                }
            }
            if failed > 0 {
                bail!("{} of {} results could not be read", failed, outputs.len());
            }
        }

        Command::AxConfig => {
            let store = cli.store()?;
            println!("{}", serde_json::to_string_pretty(&ax_config(&store))?);
        }
    }

    Ok(())
}
