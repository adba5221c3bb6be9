//! Vonzy CLI: declarative automation runner.
//!
//! Usage:
//!   vonzy run                          # Run every step of ./vonzy.yml
//!   vonzy -c deploy.yml run -s build   # Run only the `build` subtree
//!   vonzy run -i target=prod --no-input
//!   vonzy steps                        # Print the step tree
//!   vonzy validate                     # Check the workflow without running it

use clap::{Parser, Subcommand};

use vonzy_cli::commands;

#[derive(Parser)]
#[command(
    name = "vonzy",
    version,
    about = "Vonzy: run declarative step trees of shell automation"
)]
struct Cli {
    /// Path to the workflow YAML file
    #[arg(short, long, env = "VONZY_CONFIG", default_value = "vonzy.yml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow (or a subset of its top-level steps)
    Run {
        /// Only run the top-level step with this id (repeatable)
        #[arg(short = 's', long = "step", value_name = "ID")]
        steps: Vec<String>,

        /// Preset an input value (repeatable)
        #[arg(short = 'i', long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Never prompt; use presets and declared defaults only
        #[arg(long)]
        no_input: bool,
    },
    /// Print the step tree without running anything
    Steps,
    /// Validate the workflow file without running it
    Validate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise follow the workflow's `log_level`
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| commands::default_log_filter(&cli.config).into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            steps,
            inputs,
            no_input,
        } => {
            commands::run::run(&cli.config, &steps, &inputs, no_input).await
        }
        Commands::Steps => commands::steps::run(&cli.config),
        Commands::Validate => commands::validate::run(&cli.config),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
