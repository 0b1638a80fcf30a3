//! PTQ CLI - prepare, package and inspect post-training quantization runs.

use clap::{Parser, Subcommand};

mod algorithm;
mod calibration;
mod common;
mod generate;
mod inspect;
mod package;

#[derive(Parser)]
#[command(name = "ptq")]
#[command(about = "CLI tool for preparing and packaging post-training quantization runs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a template run config
    GenerateConfig {
        /// Output path for the config
        #[arg(short, long, default_value = "ptq_config.json")]
        output: String,
    },

    /// Print the algorithm config handed to the quantization toolkit
    ShowAlgorithm {
        /// Algorithm identifier (int8, int8_sq, fp8, int4_awq, w4a8_awq)
        #[arg(short, long, conflicts_with = "config")]
        algorithm: Option<String>,

        /// Path to a run config JSON
        #[arg(short, long)]
        config: Option<String>,
    },

    /// Load calibration data and show the batches it produces
    Calibration {
        /// Path to a run config JSON
        #[arg(short, long)]
        config: Option<String>,

        /// Calibration text file (overrides quantization.calib_dataset)
        #[arg(short, long)]
        data: Option<String>,
    },

    /// Package an exported model directory into a .qnemo archive
    Package {
        /// Directory produced by the exporter
        #[arg(short, long)]
        input: String,

        /// Output archive path
        #[arg(short, long)]
        output: String,

        /// Extra files to include at the archive root (repeatable)
        #[arg(short, long = "artifact")]
        artifacts: Vec<String>,
    },

    /// List the contents of a .qnemo archive
    Inspect {
        /// Path to the archive
        #[arg(short, long)]
        archive: String,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ptq=info,ptq_runtime=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::GenerateConfig { output } => {
            generate::run(&output)?;
        }
        Commands::ShowAlgorithm { algorithm, config } => {
            algorithm::run(algorithm.as_deref(), config.as_deref())?;
        }
        Commands::Calibration { config, data } => {
            calibration::run(config.as_deref(), data.as_deref())?;
        }
        Commands::Package {
            input,
            output,
            artifacts,
        } => {
            package::run(&input, &output, &artifacts)?;
        }
        Commands::Inspect { archive } => {
            inspect::run(&archive)?;
        }
    }

    Ok(())
}
