//! lepnu CLI

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lepnu::{
    config::AnalysisConfig,
    data::{read_root, write_parquet, DatasetWriteOptions, FloatPrecision, DEFAULT_TREE},
    plot::render_overlay,
    run_all_with_threads, run_analysis_with_options, DatasetDescriptor, DatasetReadOptions,
    HistogramCollection, DEFAULT_SAMPLE_FRACTION,
};

#[derive(Parser)]
#[command(name = "lepnu")]
#[command(about = "lepnu - single-lepton + missing-momentum event selection")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "info")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every sample of an analysis configuration and draw the overlay
    Run {
        /// Analysis configuration (YAML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Overlay image (.png or .svg). No image is drawn when omitted.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Write the histograms as pretty JSON to this file.
        #[arg(long)]
        json: Option<PathBuf>,

        /// Override the configured fraction of every dataset to process.
        #[arg(long)]
        fraction: Option<f64>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Select a single dataset and print its histogram and cut flow as JSON
    Select {
        /// Local path or http(s) URL of a ROOT or Parquet file
        location: String,

        /// Label of the dataset
        #[arg(long, default_value = "sample")]
        name: String,

        /// Treat the dataset as simulation
        #[arg(long)]
        simulated: bool,

        /// Luminosity weight applied to every entry
        #[arg(long, default_value = "1.0")]
        weight: f64,

        /// Fraction of the dataset to process
        #[arg(long, default_value_t = DEFAULT_SAMPLE_FRACTION)]
        fraction: f64,

        /// Tree name for ROOT input
        #[arg(long, default_value = DEFAULT_TREE)]
        tree: String,

        /// Directory for downloaded datasets
        #[arg(long)]
        cache_dir: Option<PathBuf>,

        /// Output file (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Convert a ROOT tree to Parquet
    Convert {
        /// Local path or http(s) URL of the ROOT file
        input: String,

        /// Output Parquet file
        output: PathBuf,

        /// Keep the simulation weight columns
        #[arg(long)]
        simulated: bool,

        /// Tree name
        #[arg(long, default_value = DEFAULT_TREE)]
        tree: String,

        /// Stop after this many events
        #[arg(long)]
        max_events: Option<usize>,

        /// Store floating-point columns with single precision
        #[arg(long)]
        single_precision: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run {
            config,
            output,
            json,
            fraction,
            threads,
        } => cmd_run(&config, output.as_deref(), json.as_deref(), fraction, threads),
        Commands::Select {
            location,
            name,
            simulated,
            weight,
            fraction,
            tree,
            cache_dir,
            output,
        } => {
            let dataset = DatasetDescriptor::new(name, location, simulated, weight);
            let mut options = DatasetReadOptions::new().tree(tree).sample_fraction(fraction);
            if let Some(dir) = cache_dir {
                options = options.cache_dir(dir);
            }
            cmd_select(&dataset, &options, output.as_deref())
        }
        Commands::Convert {
            input,
            output,
            simulated,
            tree,
            max_events,
            single_precision,
        } => cmd_convert(&input, &output, simulated, &tree, max_events, single_precision),
    }
}

fn cmd_run(
    config_path: &Path,
    output: Option<&Path>,
    json: Option<&Path>,
    fraction: Option<f64>,
    threads: usize,
) -> Result<()> {
    let path = config_path.to_str().context("configuration path is not valid UTF-8")?;
    let mut config = AnalysisConfig::from_path(path)
        .with_context(|| format!("failed to load configuration {}", config_path.display()))?;
    if let Some(fraction) = fraction {
        config.sample_fraction = fraction;
        config.validate()?;
    }

    let histograms = run_all_with_threads(&config, threads)?;
    print_summary(&histograms);

    if let Some(path) = json {
        std::fs::write(path, serde_json::to_string_pretty(&histograms)?)
            .with_context(|| format!("failed to write {}", path.display()))?;
        tracing::info!(path = %path.display(), "wrote histograms");
    }
    if let Some(path) = output {
        render_overlay(&histograms, &config.overlay_options(), path)
            .with_context(|| format!("failed to draw {}", path.display()))?;
    }
    Ok(())
}

fn cmd_select(
    dataset: &DatasetDescriptor,
    options: &DatasetReadOptions,
    output: Option<&Path>,
) -> Result<()> {
    let result = run_analysis_with_options(dataset, options)
        .with_context(|| format!("failed to process {}", dataset.source_location))?;
    let output_json = serde_json::json!({
        "name": dataset.name,
        "is_simulated": dataset.is_simulated,
        "luminosity_weight": dataset.luminosity_weight,
        "pass_count": result.pass_count,
        "cut_flow": result.cut_flow,
        "histogram": result.histogram,
    });
    write_json(output, output_json)
}

fn cmd_convert(
    input: &str,
    output: &Path,
    simulated: bool,
    tree: &str,
    max_events: Option<usize>,
    single_precision: bool,
) -> Result<()> {
    let mut options = DatasetReadOptions::new().tree(tree).simulated(simulated);
    if let Some(max_events) = max_events {
        options = options.max_events(max_events);
    }
    let table = read_root(input, &options).with_context(|| format!("failed to read {input}"))?;
    let precision = if single_precision {
        FloatPrecision::F32
    } else {
        FloatPrecision::F64
    };
    let output_str = output.to_str().context("output path is not valid UTF-8")?;
    write_parquet(&table, output_str, &DatasetWriteOptions::default().precision(precision))
        .with_context(|| format!("failed to write {}", output.display()))?;
    tracing::info!(events = table.len(), output = %output.display(), "converted");
    Ok(())
}

fn print_summary(histograms: &HistogramCollection) {
    println!("{:<20} {:>10} {:>10} {:>14}", "sample", "kind", "passed", "weighted");
    for (name, histogram) in histograms.iter() {
        let kind = if histogram.is_simulated {
            "simulated"
        } else {
            "measured"
        };
        println!(
            "{:<20} {:>10} {:>10} {:>14.3}",
            name,
            kind,
            histogram.pass_count,
            histogram.histogram.total()
        );
    }
}

fn write_json(output: Option<&Path>, value: serde_json::Value) -> Result<()> {
    if let Some(path) = output {
        std::fs::write(path, serde_json::to_string_pretty(&value)?)?;
    } else {
        println!("{}", serde_json::to_string_pretty(&value)?);
    }
    Ok(())
}
