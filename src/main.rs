//! Command-line driver for the produce classifier.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ferrite_food::inference::{InferenceService, ServiceStatus};
use ferrite_food::train::Evaluation;
use ferrite_food::{evaluate_saved, train_from_config, PipelineConfig};

#[derive(Parser)]
#[command(name = "ferrite-food")]
#[command(about = "Train, evaluate and run the produce image classifier")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file with every default filled in
    InitConfig {
        #[arg(default_value = "pipeline.json")]
        output: PathBuf,
        /// Dataset root to put in the file
        #[arg(long)]
        dataset: Option<PathBuf>,
    },
    /// Train the classifier head and persist the best model
    Train {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,
        /// Override the number of epochs
        #[arg(long)]
        epochs: Option<usize>,
    },
    /// Score the saved model on the test split
    Evaluate {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,
    },
    /// Classify image files with the saved model
    Classify {
        #[arg(long, default_value = "pipeline.json")]
        config: PathBuf,
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },
}

fn load_config(path: &PathBuf) -> anyhow::Result<PipelineConfig> {
    PipelineConfig::load(path).with_context(|| format!("loading configuration {}", path.display()))
}

fn print_evaluation(evaluation: &Evaluation) {
    match evaluation {
        Evaluation::NoData => println!("test split: no data"),
        Evaluation::Scored { loss, accuracy, samples, confusion } => {
            println!("test split: {} samples, loss {:.4}, accuracy {:.2}%", samples, loss, accuracy * 100.0);
            for (i, label) in confusion.labels.iter().enumerate() {
                if let Some(recall) = confusion.recall(i) {
                    println!("  {:<24} recall {:.2}%", label, recall * 100.0);
                }
            }
        }
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { output, dataset } => {
            let mut config = PipelineConfig::default();
            if let Some(root) = dataset {
                config.dataset.root = root;
            }
            config.save(&output)?;
            println!("configuration written to {}", output.display());
        }
        Commands::Train { config, epochs } => {
            let mut config = load_config(&config)?;
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            let outcome = train_from_config(&config)?;
            let run = &outcome.run;
            if !outcome.model.is_pretrained() {
                eprintln!("warning: backbone was not loaded from pretrained weights");
            }
            println!(
                "trained {} epochs, best val loss {:.4} at epoch {}{}",
                run.epochs.len(),
                run.best_val_loss,
                run.best_epoch,
                if run.stopped_early { " (stopped early)" } else { "" }
            );
            println!("best model written to {}", config.artifacts.model.display());

            print_evaluation(&outcome.test);
        }
        Commands::Evaluate { config } => {
            let config = load_config(&config)?;
            let evaluation = evaluate_saved(&config)
                .with_context(|| format!("evaluating {}", config.artifacts.model.display()))?;
            print_evaluation(&evaluation);
        }
        Commands::Classify { config, images } => {
            let config = load_config(&config)?;
            let service = InferenceService::start(config.artifacts.clone(), config.service.fallback_classes.clone());
            if let ServiceStatus::Degraded(reason) = service.status() {
                eprintln!("warning: {}", reason);
            }
            for path in images {
                let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                match service.classify(&bytes) {
                    Ok(prediction) => println!("{}\t{}\t{:.2}", path.display(), prediction.class, prediction.confidence),
                    Err(e) => eprintln!("{}\terror: {}", path.display(), e),
                }
            }
        }
    }

    Ok(())
}
