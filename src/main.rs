//! icedrift - sea-ice buoy drift regression
//!
//! Batch CLI around the selection / tuning / evaluation harness.
//!
//! # Usage
//!
//! ```bash
//! # Write a starting configuration
//! icedrift init-config --path icedrift.toml
//!
//! # Compare the configured models with grouped cross-validation
//! icedrift --config icedrift.toml select
//!
//! # Full pipeline: select, tune the winner, evaluate on held-out buoys
//! icedrift --config icedrift.toml run
//!
//! # Roll a saved model out over another observation table
//! icedrift predict --model output/best_model.json --input data/new_buoys.csv --output rollout.csv
//! ```
//!
//! # Environment Variables
//!
//! - `ICEDRIFT_CONFIG`: config file used when `--config` is not given
//! - `ICEDRIFT_OUTPUT_DIR`: overrides `output.dir`
//! - `RUST_LOG`: logging level (default: info)

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use icedrift::config::{defaults, DataConfig, DriftConfig};
use icedrift::harness::report::{write_predictions, ReportWriter};
use icedrift::harness::{self, DriftContext};
use icedrift::ml_engine::{ModelConfig, ParamSet};
use icedrift::reanalysis::{load_field_set, CovariateSampler, FieldSet};
use icedrift::{IterativePredictor, ObservationTable};

#[derive(Parser, Debug)]
#[command(name = "icedrift")]
#[command(about = "Sea-ice buoy drift regression: model selection, tuning and trajectory rollout")]
#[command(version)]
struct CliArgs {
    /// Configuration file (default: $ICEDRIFT_CONFIG, then ./icedrift.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Output directory, overriding output.dir from the config
    #[arg(long, global = true, env = "ICEDRIFT_OUTPUT_DIR", value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: SubCommand,
}

#[derive(clap::Subcommand, Debug)]
enum SubCommand {
    /// Cross-validate every configured model and pick the best
    Select,
    /// Tune hyperparameters of the selection winner (or of --model)
    Tune {
        /// Menu entry to tune; skips selection
        #[arg(long)]
        model: Option<String>,
    },
    /// Fit on all but the held-out buoys and score their rollouts
    Evaluate {
        /// Menu entry to evaluate (default: first configured model)
        #[arg(long)]
        model: Option<String>,
        /// JSON file with a full model (best_model.json) or a parameter set
        #[arg(long, value_name = "FILE")]
        params: Option<PathBuf>,
    },
    /// Select, tune and evaluate in one go
    Run,
    /// Fit a saved model on the configured table and roll out another table
    Predict {
        /// Model JSON as written to best_model.json
        #[arg(long, value_name = "FILE")]
        model: PathBuf,
        /// Observation CSV to roll out (same columns as the training table)
        #[arg(long, value_name = "FILE")]
        input: PathBuf,
        /// Prediction CSV to write
        #[arg(long, value_name = "FILE")]
        output: PathBuf,
    },
    /// Write the built-in default configuration
    InitConfig {
        #[arg(long, default_value = defaults::LOCAL_CONFIG_FILE)]
        path: PathBuf,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    if let SubCommand::InitConfig { path, force } = &args.command {
        return init_config(path, *force);
    }

    let mut config = DriftConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(dir) = &args.output_dir {
        config.output.dir = dir.clone();
    }

    info!("================================================================");
    info!("  icedrift v{}", env!("CARGO_PKG_VERSION"));
    info!("================================================================");

    let (fields, table) = load_inputs(&config)?;
    let ctx = DriftContext::new(&fields, &table, &config);
    let writer = ReportWriter::create(&config.output.dir).context("Failed to create output directory")?;
    config
        .save_to_file(&writer.path(defaults::EFFECTIVE_CONFIG_FILE))
        .context("Failed to write effective config")?;

    match &args.command {
        SubCommand::Select => {
            let selection = harness::select_model(&ctx)?;
            writer.selection(&selection)?;
            writer.best_model(&selection.best)?;
        }
        SubCommand::Tune { model } => {
            let base = match model {
                Some(name) => menu_entry(&config, name)?.clone(),
                None => {
                    let selection = harness::select_model(&ctx)?;
                    writer.selection(&selection)?;
                    selection.best
                }
            };
            let tuned = harness::tune(&ctx, &base)?;
            writer.tuning(&tuned)?;
            writer.best_model(&tuned.best_model())?;
        }
        SubCommand::Evaluate { model, params } => {
            let chosen = resolve_model(&config, model.as_deref(), params.as_deref())?;
            let report = harness::evaluate_holdout(&ctx, &chosen)?;
            writer.holdout(&report)?;
        }
        SubCommand::Run => {
            let selection = harness::select_model(&ctx)?;
            writer.selection(&selection)?;
            let tuned = harness::tune(&ctx, &selection.best)?;
            writer.tuning(&tuned)?;
            let best = tuned.best_model();
            writer.best_model(&best)?;
            let report = harness::evaluate_holdout(&ctx, &best)?;
            writer.holdout(&report)?;
        }
        SubCommand::Predict { model, input, output } => {
            predict(&ctx, model, input, output)?;
        }
        SubCommand::InitConfig { .. } => {}
    }

    info!(dir = %writer.dir().display(), "Done");
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    DriftConfig::default()
        .save_to_file(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

/// Reanalysis fields, then the observation table sampled against them.
fn load_inputs(config: &DriftConfig) -> Result<(FieldSet, ObservationTable)> {
    let fields = load_field_set(&config.reanalysis).context("Failed to load reanalysis fields")?;
    let sampler = CovariateSampler::new(&fields, config.reanalysis.time_tolerance_secs());
    let table = ObservationTable::load(&config.data, &sampler).with_context(|| {
        format!(
            "Failed to load observations from {}",
            config.data.observations_path.display()
        )
    })?;
    info!(
        variables = fields.len(),
        buoys = table.n_buoys(),
        observations = table.n_observations(),
        "Inputs loaded"
    );
    Ok((fields, table))
}

fn menu_entry<'a>(config: &'a DriftConfig, name: &str) -> Result<&'a ModelConfig> {
    config.model(name).with_context(|| {
        let known: Vec<&str> = config.models.iter().map(|m| m.name.as_str()).collect();
        format!("No model named '{name}' in the config (known: {})", known.join(", "))
    })
}

/// Model for `evaluate`: a full model file wins, then a parameter set
/// applied to the named (or first) menu entry.
fn resolve_model(config: &DriftConfig, name: Option<&str>, params: Option<&Path>) -> Result<ModelConfig> {
    let base = match name {
        Some(n) => menu_entry(config, n)?.clone(),
        None => config.models.first().cloned().context("The model menu is empty")?,
    };
    let Some(path) = params else {
        return Ok(base);
    };

    let text = std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    if let Ok(full) = serde_json::from_str::<ModelConfig>(&text) {
        info!(model = %full.name, kind = full.spec.kind(), "Using model from file");
        return Ok(full);
    }
    let overrides: ParamSet =
        serde_json::from_str(&text).with_context(|| format!("{} is neither a model nor a parameter set", path.display()))?;
    let spec = base
        .spec
        .with_params(&overrides)
        .with_context(|| format!("Parameters in {} do not fit model '{}'", path.display(), base.name))?;
    Ok(ModelConfig { name: base.name, spec })
}

fn predict(ctx: &DriftContext<'_>, model_path: &Path, input: &Path, output: &Path) -> Result<()> {
    let text = std::fs::read_to_string(model_path).with_context(|| format!("Failed to read {}", model_path.display()))?;
    let model: ModelConfig =
        serde_json::from_str(&text).with_context(|| format!("{} is not a model file", model_path.display()))?;

    let fitted = model
        .spec
        .fit(&ctx.table.training_set(), ctx.config.evaluation.seed)
        .with_context(|| format!("Failed to fit '{}'", model.name))?;

    let data = DataConfig {
        observations_path: input.to_path_buf(),
        ..ctx.config.data.clone()
    };
    let target = ObservationTable::load(&data, &ctx.sampler())
        .with_context(|| format!("Failed to load observations from {}", input.display()))?;

    let predictor = IterativePredictor::new(fitted.as_ref(), ctx.sampler(), ctx.table.layout());
    let records = predictor.predict_table(&target);
    write_predictions(output, &records, true)?;

    match harness::evaluate(&records) {
        Ok(m) => info!(
            model = %model.name,
            buoys = target.n_buoys(),
            rmse_deg = m.rmse_deg,
            median_distance_km = m.median_distance_km,
            path = %output.display(),
            "Rollout written"
        ),
        Err(e) => warn!(error = %e, path = %output.display(), "Rollout written but could not be scored"),
    }
    Ok(())
}
