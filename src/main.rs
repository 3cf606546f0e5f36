//! pixelshift CLI
//!
//! Entry point for training the next-image network and rendering its
//! predictions.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing::info;

use pixelshift::backend::{backend_name, device, DefaultBackend, TrainingBackend};
use pixelshift::config::{Architecture, RunConfig};
use pixelshift::inference::Predictor;
use pixelshift::utils::logging::{init_logging, LogConfig, LogLevel};
use pixelshift::utils::render::{render_tensor, save_png};
use pixelshift::{Pipeline, ShufflePolicy};

/// Next-image prediction with a residual encoder-decoder
#[derive(Parser, Debug)]
#[command(name = "pixelshift")]
#[command(version)]
#[command(about = "Train a residual encoder-decoder to predict the next image, built with Burn", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Only log errors
    #[arg(short, long, default_value = "false", conflicts_with = "verbose")]
    quiet: bool,

    /// Log level (trace, debug, info, warn, error); overrides --verbose and --quiet
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// JSON run configuration; flags override its fields
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Full run: catalog, load or train, summary, preview and external renders
    Run {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Train a fresh network, overwriting the checkpoint on improvement
    Train {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Predict on one image with the checkpointed network
    Predict {
        /// Image to predict on
        #[arg(short, long)]
        image: PathBuf,

        /// PNG to write the rendered prediction to
        #[arg(short, long, default_value = "prediction.png")]
        output: PathBuf,

        /// Round the output to whole pixel values
        #[arg(long, default_value = "false")]
        round: bool,

        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print catalog split sizes
    Catalog {
        #[command(flatten)]
        overrides: Overrides,
    },

    /// Print the layer summary and write it next to the artifacts
    Summary {
        #[command(flatten)]
        overrides: Overrides,

        /// Also save the effective run configuration as JSON
        #[arg(long)]
        save_config: Option<PathBuf>,
    },
}

/// Flags shared by every subcommand
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Run name used as artifact prefix
    #[arg(long)]
    run_name: Option<String>,

    /// Directory of input images
    #[arg(long)]
    images: Option<PathBuf>,

    /// Directory of target images
    #[arg(long)]
    targets: Option<PathBuf>,

    /// Directory for rendered artifacts
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Checkpoint stem (no extension)
    #[arg(long)]
    checkpoint: Option<PathBuf>,

    /// External image rendered and predicted at the end of a run
    #[arg(long)]
    external: Option<PathBuf>,

    /// Skip the external image
    #[arg(long, default_value = "false")]
    no_external: bool,

    #[arg(long)]
    image_size: Option<usize>,

    #[arg(long, value_enum)]
    architecture: Option<Architecture>,

    #[arg(short, long)]
    epochs: Option<usize>,

    #[arg(short, long)]
    batch_size: Option<usize>,

    #[arg(short, long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    val_samples: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Shuffle input and target lists independently
    #[arg(long, default_value = "false")]
    independent_shuffle: bool,

    /// Validation sample used for the preview renders
    #[arg(long)]
    preview_index: Option<usize>,

    /// Worker threads for the local thread pool
    #[arg(long)]
    threads: Option<usize>,

    /// CUDA device ordinal
    #[arg(long)]
    gpu: Option<usize>,
}

impl Overrides {
    fn apply(self, mut config: RunConfig) -> RunConfig {
        if let Some(v) = self.run_name {
            config.run_name = v;
        }
        if let Some(v) = self.images {
            config.input_dir = v;
        }
        if let Some(v) = self.targets {
            config.target_dir = v;
        }
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.checkpoint {
            config.checkpoint = v;
        }
        if let Some(v) = self.external {
            config.external_image = Some(v);
        }
        if self.no_external {
            config.external_image = None;
        }
        if let Some(v) = self.image_size {
            config.image_size = v;
        }
        if let Some(v) = self.architecture {
            config.architecture = v;
        }
        if let Some(v) = self.epochs {
            config.epochs = v;
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.val_samples {
            config.val_samples = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.independent_shuffle {
            config.shuffle_policy = ShufflePolicy::Independent;
        }
        if let Some(v) = self.preview_index {
            config.preview_index = v;
        }
        if let Some(v) = self.threads {
            config.compute.cpu_threads = v;
        }
        if let Some(v) = self.gpu {
            config.compute.gpu_index = v;
        }
        config
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::verbose()
    } else if cli.quiet {
        LogConfig::quiet()
    } else {
        LogConfig::default()
    };
    if let Some(level) = &cli.log_level {
        log_config.level = LogLevel::parse(level);
    }

    let _ = init_logging(&log_config);
    tracing::debug!("Logging at {}", log_config.level);

    print_banner();

    let base = match &cli.config {
        Some(path) => RunConfig::load(path)
            .with_context(|| format!("Failed to load run configuration {:?}", path))?,
        None => RunConfig::default(),
    };

    match cli.command {
        Commands::Run { overrides } => cmd_run(overrides.apply(base)),
        Commands::Train { overrides } => cmd_train(overrides.apply(base)),
        Commands::Predict {
            image,
            output,
            round,
            overrides,
        } => cmd_predict(overrides.apply(base), image, output, round),
        Commands::Catalog { overrides } => cmd_catalog(overrides.apply(base)),
        Commands::Summary {
            overrides,
            save_config,
        } => cmd_summary(overrides.apply(base), save_config),
    }
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════════════╗
 ║   pixelshift                                                  ║
 ║   Next-image prediction with a residual encoder-decoder       ║
 ╚══════════════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn print_config(config: &RunConfig) {
    println!("{}", "Run Configuration:".cyan().bold());
    println!("  Run name:        {}", config.run_name);
    println!("  Inputs:          {:?}", config.input_dir);
    println!("  Checkpoint:      {:?}", config.checkpoint);
    println!("  Architecture:    {:?}", config.architecture);
    println!("  Image size:      {}x{}", config.image_size, config.image_size);
    println!("  Epochs:          {}", config.epochs);
    println!("  Batch size:      {}", config.batch_size);
    println!("  Learning rate:   {}", config.learning_rate);
    println!("  Threads:         {}", config.compute.cpu_threads);
    println!("  Backend:         {}", backend_name());
    println!();
}

fn cmd_run(config: RunConfig) -> Result<()> {
    print_config(&config);

    let device = device(&config.compute);
    let pipeline = Pipeline::new(config.clone())?;
    let report = config
        .compute
        .install(|| pipeline.run::<TrainingBackend>(&device))??;

    println!();
    println!("{}", "Run Complete!".green().bold());
    if report.loaded_checkpoint {
        println!("  Reused checkpoint {:?}", config.checkpoint);
    }
    if let Some(training) = &report.training {
        match training.best_val_loss {
            Some(loss) => println!("  Best val loss:   {:.5} (epoch {})", loss, training.best_epoch.map_or(0, |e| e + 1)),
            None => println!("  {} no checkpoint was written", "Warning:".yellow()),
        }
    }
    println!("  Summary:         {:?}", report.summary_path);
    for path in &report.artifacts {
        println!("  Wrote            {:?}", path);
    }

    Ok(())
}

fn cmd_train(config: RunConfig) -> Result<()> {
    print_config(&config);

    let device = device(&config.compute);
    let pipeline = Pipeline::new(config.clone())?;
    let report = config.compute.install(|| -> pixelshift::Result<_> {
        let splits = pipeline.splits()?;
        info!("{}", splits.stats());
        let (_, report) = pipeline.train::<TrainingBackend>(&splits, &device)?;
        Ok(report)
    })??;

    println!();
    println!("{}", "Training Complete!".green().bold());
    for (epoch, (train, val)) in report
        .state
        .train_losses
        .iter()
        .zip(&report.state.val_losses)
        .enumerate()
    {
        let marker = if report.state.checkpoint_epochs.contains(&epoch) {
            " (saved)".green().to_string()
        } else {
            String::new()
        };
        println!("  Epoch {:>3}: loss {:.4} | val_loss {:.4}{}", epoch + 1, train, val, marker);
    }
    println!("  Checkpoint: {:?}", report.checkpoint);

    Ok(())
}

fn cmd_predict(config: RunConfig, image: PathBuf, output: PathBuf, round: bool) -> Result<()> {
    let device = device(&config.compute);
    let pipeline = Pipeline::new(config.clone())?;

    let prediction = config.compute.install(|| -> Result<_> {
        let model = pipeline
            .load::<DefaultBackend>(&device)
            .context("Run `pixelshift train` first or pass --checkpoint")?;
        let predictor = Predictor::new(model, device.clone());

        let mut prediction = predictor.predict_path(&image)?;
        if round {
            prediction = prediction.rounded();
        }
        save_png(&render_tensor(&prediction.output)?, &output)?;
        Ok(prediction)
    })??;

    println!("{}", "Prediction:".cyan().bold());
    println!("  Input:     {:?}", image);
    println!("  Output:    {:?}", output);
    println!("  Rounded:   {}", round);
    println!("  Time:      {:.2}ms", prediction.inference_time_ms);

    Ok(())
}

fn cmd_catalog(config: RunConfig) -> Result<()> {
    let pipeline = Pipeline::new(config)?;
    let splits = pipeline.splits()?;

    println!("{}", splits.stats());
    if let Some(first) = splits.val_inputs.first() {
        println!("  First validation input: {:?}", first);
    }

    Ok(())
}

fn cmd_summary(config: RunConfig, save_config: Option<PathBuf>) -> Result<()> {
    let device = device(&config.compute);
    let pipeline = Pipeline::new(config.clone())?;

    let model = pipeline.model_config().init::<DefaultBackend>(&device)?;
    println!("{}", model.summary());

    let path = pipeline.write_summary(&model)?;
    println!("  Saved summary to {:?}", path);

    if let Some(path) = save_config {
        config.save(&path)?;
        println!("  Saved configuration to {:?}", path);
    }

    Ok(())
}
