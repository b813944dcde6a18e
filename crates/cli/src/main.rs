//! School dropout-risk command line interface
//!
//! Runs the batch pipeline stages and the scenario simulator. Results are
//! printed as JSON on stdout; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dropout_pipeline::{
    evaluate_records, read_merged_csv, state, DashboardSummary, DataQualityReport, ModelBundle,
    PipelineConfig, RiskState, SchoolRecord, SimulatedSchool, TargetDistribution,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dropout-risk")]
#[command(about = "School dropout-risk data pipeline and simulator", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML configuration file (defaults apply when omitted)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the raw sources, merge them and write the merged table
    Prepare,
    /// Train the classifier on the merged table and save the model bundle
    Train(TableArgs),
    /// Score the bundle against the full merged table and report data quality
    Evaluate(TableArgs),
    /// Show the distribution of the target variable
    Distribution(TableArgs),
    /// Predict the risk of a simulated school
    Predict(PredictArgs),
    /// Aggregations for the dashboard
    Summary(TableArgs),
}

#[derive(Args)]
struct TableArgs {
    /// Merged table (overrides the configured path)
    #[arg(long, value_name = "PATH")]
    merged: Option<PathBuf>,

    /// Model bundle (overrides the configured path)
    #[arg(long, value_name = "PATH")]
    bundle: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    /// IDEB score
    #[arg(long)]
    ideb: f64,

    /// Socioeconomic index (INSE)
    #[arg(long)]
    nse: f64,

    /// State code, e.g. SP
    #[arg(long)]
    state: String,

    /// Network: public/private or estadual/municipal/federal/privada
    #[arg(long)]
    network: String,

    /// Historical dropout rate; the training mean is used when omitted
    #[arg(long)]
    rate: Option<f64>,

    #[command(flatten)]
    artifacts: TableArgs,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Prepare => handle_prepare(&config),
        Commands::Train(args) => handle_train(&config, &args),
        Commands::Evaluate(args) => handle_evaluate(&config, &args),
        Commands::Distribution(args) => handle_distribution(&config, &args),
        Commands::Predict(args) => handle_predict(&config, args),
        Commands::Summary(args) => handle_summary(&config, &args),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn merged_path(config: &PipelineConfig, args: &TableArgs) -> PathBuf {
    args.merged.clone().unwrap_or_else(|| config.merged_table_path())
}

fn bundle_path(config: &PipelineConfig, explicit: Option<&Path>) -> PathBuf {
    explicit.map_or_else(|| config.model_bundle_path(), Path::to_path_buf)
}

fn load_records(path: &Path) -> Result<Vec<SchoolRecord>> {
    read_merged_csv(path).with_context(|| format!("Failed to read merged table {}", path.display()))
}

fn load_bundle(path: &Path) -> Result<ModelBundle> {
    ModelBundle::load(path).with_context(|| format!("Failed to load model bundle {}", path.display()))
}

fn handle_prepare(config: &PipelineConfig) -> Result<()> {
    let merged = dropout_pipeline::prepare(config).context("Data preparation failed")?;
    let (negatives, positives) = merged.class_counts();

    print_json(&serde_json::json!({
        "merged_table": config.merged_table_path(),
        "rows": merged.len(),
        "threshold": merged.threshold,
        "imputations": merged.imputations,
        "regional_groups": merged.regional_rates.len(),
        "target": { "0": negatives, "1": positives },
    }))
}

fn handle_train(config: &PipelineConfig, args: &TableArgs) -> Result<()> {
    let path = merged_path(config, args);
    let records = load_records(&path)?;

    let mut config = config.clone();
    if let Some(bundle) = &args.bundle {
        // Command-line paths are relative to the working directory, not to data_dir.
        config.artifacts.model_bundle = std::path::absolute(bundle)
            .with_context(|| format!("Invalid bundle path {}", bundle.display()))?;
    }

    let bundle = dropout_pipeline::train(&config, &records).context("Training failed")?;
    info!(
        bundle = %config.model_bundle_path().display(),
        "Precision {:.4}, recall {:.4}, F1 {:.4}",
        bundle.evaluation.precision,
        bundle.evaluation.recall,
        bundle.evaluation.f1
    );

    print_json(&serde_json::json!({
        "model_bundle": config.model_bundle_path(),
        "features": bundle.manifest.columns,
        "evaluation": bundle.evaluation,
    }))
}

fn handle_evaluate(config: &PipelineConfig, args: &TableArgs) -> Result<()> {
    let records = load_records(&merged_path(config, args))?;
    let bundle = load_bundle(&bundle_path(config, args.bundle.as_deref()))?;

    let evaluation = evaluate_records(&bundle.model, &bundle.manifest, &records)
        .context("Full-table evaluation failed")?;

    print_json(&serde_json::json!({
        "model": evaluation,
        "data_quality": DataQualityReport::from_records(&records),
    }))
}

fn handle_distribution(config: &PipelineConfig, args: &TableArgs) -> Result<()> {
    let records = load_records(&merged_path(config, args))?;
    print_json(&TargetDistribution::from_records(&records))
}

fn handle_predict(config: &PipelineConfig, args: PredictArgs) -> Result<()> {
    let loaded = RiskState::load(
        bundle_path(config, args.artifacts.bundle.as_deref()),
        merged_path(config, &args.artifacts),
    )
    .context("Failed to load model artifacts")?;
    let risk = state::init_global(loaded)?;

    let school = SimulatedSchool {
        ideb: args.ideb,
        socioeconomic_index: args.nse,
        state: args.state,
        network: args.network,
        historical_dropout_rate: args.rate,
    };

    let prediction = risk
        .predict(&school)
        .map_err(|e| anyhow::anyhow!("prediction failed: {e}"))?;

    print_json(&serde_json::json!({
        "school": school,
        "label": prediction.label,
        "probability": prediction.probability,
        "high_risk": prediction.is_high_risk(),
    }))
}

fn handle_summary(config: &PipelineConfig, args: &TableArgs) -> Result<()> {
    let records = load_records(&merged_path(config, args))?;
    print_json(&DashboardSummary::build(&records))
}
