use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indexmap::IndexMap;
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;

use mixedpower_core::data::DataFrame;
use mixedpower_core::fit::{FitOptions, ReferenceFitter, TestMethod};
use mixedpower_core::model::{ExtensionDirective, Family, ModelBuilder};
use mixedpower_core::power::{
    power_sim, Analysis, ModelSweep, PowerConfig, PowerEstimate, Sweep, SweepConfig, SweepOutcome,
    SweepScenario, SweepStatus, TwoGroupSweep,
};
use mixedpower_core::report::CsvCheckpoint;
use mixedpower_core::sim::{simulate_design, DesignSpec, TwoGroupSpec};

#[derive(Parser)]
#[command(name = "mixedpower")]
#[command(version)]
#[command(about = "Power analysis for linear and mixed-effects models by simulation")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate the power of a two-group comparison
    TwoGroup {
        /// Units per group
        #[arg(short, long)]
        n: usize,

        /// Mean of the control group
        #[arg(long)]
        control_mean: f64,

        /// Mean of the treatment group
        #[arg(long)]
        treatment_mean: f64,

        /// Common standard deviation
        #[arg(long)]
        sd: f64,

        /// Test: "f" (default) or "lrt"
        #[arg(long, default_value = "f")]
        method: String,

        #[command(flatten)]
        run: RunArgs,

        /// Output format: "text" (default) or "json"
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run a sample size x effect size sweep described by a JSON file
    Sweep {
        /// Path to the sweep configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Write the power table to this CSV file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rewrite this CSV file with the partial table after every cell
        #[arg(long)]
        checkpoint: Option<PathBuf>,

        /// Output format: "csv" (default), "text" or "json"
        #[arg(long, default_value = "csv")]
        format: String,
    },

    /// Simulate one dataset from a factorial design (JSON) and write it as CSV
    Design {
        /// Path to the design specification (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Match the target means and covariances exactly
        #[arg(long)]
        empirical: bool,

        /// Write one row per unit and within cell
        #[arg(long)]
        long: bool,

        /// Output CSV path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Number of simulated trials
    #[arg(long, default_value = "1000")]
    n_sim: usize,

    /// Significance level
    #[arg(long, default_value = "0.05")]
    alpha: f64,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Worker threads (0 = all cores)
    #[arg(long, default_value = "0")]
    threads: usize,
}

impl RunArgs {
    fn power_config(&self) -> PowerConfig {
        PowerConfig {
            n_sim: self.n_sim,
            alpha: self.alpha,
            seed: self.seed,
            threads: self.threads,
        }
    }
}

/// Sweep file: the grid and run settings plus the scenario to simulate.
#[derive(Deserialize)]
struct SweepFile {
    scenario: ScenarioFile,
    #[serde(flatten)]
    sweep: SweepConfig,
    #[serde(default)]
    fit: FitOptions,
}

#[derive(Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ScenarioFile {
    TwoGroup(TwoGroupSweep),
    Model(ModelFile),
}

/// A model parameterised on pilot data.
#[derive(Deserialize)]
struct ModelFile {
    /// CSV with the predictor columns
    data: PathBuf,
    formula: String,
    #[serde(default = "default_family")]
    family: String,
    fixef: IndexMap<String, f64>,
    #[serde(default)]
    var_corr: IndexMap<String, VarCorrFile>,
    sigma: Option<f64>,
    /// Coefficient set to each effect size
    coefficient: String,
    /// Fixed term tested in each trial
    term: String,
    #[serde(default)]
    method: TestMethod,
    extension: Option<ExtensionDirective>,
}

fn default_family() -> String {
    Family::Gaussian.name().to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VarCorrFile {
    Variance(f64),
    Covariance(Vec<Vec<f64>>),
}

impl VarCorrFile {
    fn to_matrix(&self) -> Result<DMatrix<f64>> {
        match self {
            VarCorrFile::Variance(v) => Ok(DMatrix::from_element(1, 1, *v)),
            VarCorrFile::Covariance(rows) => {
                let k = rows.len();
                if rows.iter().any(|r| r.len() != k) {
                    anyhow::bail!("covariance matrix must be square");
                }
                Ok(DMatrix::from_fn(k, k, |i, j| rows[i][j]))
            }
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::TwoGroup {
            n,
            control_mean,
            treatment_mean,
            sd,
            method,
            run,
            format,
        } => cmd_two_group(n, control_mean, treatment_mean, sd, &method, &run, &format),
        Commands::Sweep {
            config,
            output,
            checkpoint,
            format,
        } => cmd_sweep(&config, output.as_deref(), checkpoint, &format),
        Commands::Design {
            config,
            seed,
            empirical,
            long,
            output,
        } => cmd_design(&config, seed, empirical, long, output.as_deref()),
    }
}

fn cmd_two_group(
    n: usize,
    control_mean: f64,
    treatment_mean: f64,
    sd: f64,
    method: &str,
    run: &RunArgs,
    output_format: &str,
) -> Result<()> {
    let method: TestMethod = method.parse().context("Invalid --method")?;
    let spec = TwoGroupSpec::balanced(n, control_mean, treatment_mean, sd);
    let analysis = Analysis::new("y ~ group", "group")?.method(method);
    let config = run.power_config();

    eprintln!(
        "Simulating {} trials of 2 x {} units ({} test, alpha = {})",
        config.n_sim, n, method, config.alpha
    );
    let estimate = power_sim(&spec, &analysis, &ReferenceFitter::new(), &config)
        .context("Power simulation failed")?;

    match output_format.to_lowercase().as_str() {
        "json" => print_estimate_json(&estimate)?,
        _ => print_estimate_text(&estimate),
    }
    Ok(())
}

fn print_estimate_text(estimate: &PowerEstimate) {
    match (estimate.power, estimate.interval) {
        (Some(power), Some((lo, hi))) => {
            println!("Power: {:.4}  (95% CI {:.4} - {:.4})", power, lo, hi);
        }
        _ => println!("Power: NA"),
    }
    println!(
        "Significant: {} of {} valid trials (alpha = {})",
        estimate.successes, estimate.n_valid, estimate.alpha
    );
    if estimate.n_failed > 0 {
        println!("Failed trials: {}", estimate.n_failed);
    }
}

fn print_estimate_json(estimate: &PowerEstimate) -> Result<()> {
    let value = serde_json::json!({
        "power": estimate.power,
        "ci_lower": estimate.interval.map(|(lo, _)| lo),
        "ci_upper": estimate.interval.map(|(_, hi)| hi),
        "successes": estimate.successes,
        "n_valid": estimate.n_valid,
        "n_failed": estimate.n_failed,
        "n_sim": estimate.n_sim,
        "alpha": estimate.alpha,
    });
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn cmd_sweep(
    config_path: &Path,
    output: Option<&Path>,
    checkpoint: Option<PathBuf>,
    output_format: &str,
) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read sweep config '{}'", config_path.display()))?;
    let file: SweepFile = serde_json::from_str(&text)
        .with_context(|| format!("Invalid sweep config '{}'", config_path.display()))?;

    let fitter = ReferenceFitter::with_options(file.fit);
    let checkpoint = checkpoint.map(CsvCheckpoint::new);
    eprintln!(
        "Sweeping {} sample sizes x {} effect sizes, {} trials each",
        file.sweep.sample_sizes.len(),
        file.sweep.effect_sizes.len(),
        file.sweep.power.n_sim
    );

    let outcome = match &file.scenario {
        ScenarioFile::TwoGroup(scenario) => run(scenario, &fitter, file.sweep.clone(), checkpoint.as_ref())?,
        ScenarioFile::Model(model) => {
            let scenario = model_scenario(model, file.sweep.power.seed)?;
            run(&scenario, &fitter, file.sweep.clone(), checkpoint.as_ref())?
        }
    };

    if let Some(checkpoint) = &checkpoint {
        checkpoint.flush();
    }

    if let SweepStatus::Interrupted { completed } = &outcome.status {
        eprintln!("Sweep interrupted after {} cells", completed.len());
    }

    match output_format.to_lowercase().as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&outcome.table)?),
        "text" => print!("{}", outcome.table.summary()),
        _ => match output {
            Some(path) => {
                outcome
                    .table
                    .to_csv(path)
                    .with_context(|| format!("Failed to write '{}'", path.display()))?;
                eprintln!("Wrote {} rows to '{}'", outcome.table.len(), path.display());
            }
            None => outcome.table.write_csv(std::io::stdout())?,
        },
    }
    Ok(())
}

fn run<S: SweepScenario>(
    scenario: &S,
    fitter: &ReferenceFitter,
    config: SweepConfig,
    checkpoint: Option<&CsvCheckpoint>,
) -> Result<SweepOutcome> {
    let mut sweep = Sweep::new(scenario, fitter, config);
    if let Some(checkpoint) = checkpoint {
        sweep = sweep.checkpoint(checkpoint);
    }
    sweep.run().context("Sweep failed")
}

fn model_scenario(model: &ModelFile, seed: u64) -> Result<ModelSweep> {
    let df = DataFrame::from_csv(&model.data)
        .with_context(|| format!("Failed to load data from '{}'", model.data.display()))?;
    eprintln!(
        "Loaded {} observations, {} columns from '{}'",
        df.nrows(),
        df.ncols(),
        model.data.display()
    );

    let mut builder = ModelBuilder::new()
        .formula(&model.formula)
        .family(&model.family)
        .data(&df);
    for (name, value) in &model.fixef {
        builder = builder.fixef(name, *value);
    }
    for (group, vc) in &model.var_corr {
        let cov = vc
            .to_matrix()
            .with_context(|| format!("Invalid var_corr for '{}'", group))?;
        builder = builder.var_corr(group, cov);
    }
    if let Some(sigma) = model.sigma {
        builder = builder.sigma(sigma);
    }
    let baseline = builder
        .build(&mut StdRng::seed_from_u64(seed))
        .context("Failed to build model")?;

    let family: Family = model.family.parse()?;
    let analysis = Analysis::new(&model.formula, &model.term)?
        .family(family)
        .method(model.method);
    let mut scenario = ModelSweep::new(baseline, &model.coefficient, analysis);
    if let Some(extension) = &model.extension {
        scenario = scenario.extend_along(extension.clone());
    }
    Ok(scenario)
}

fn cmd_design(
    config_path: &Path,
    seed: u64,
    empirical: bool,
    long: bool,
    output: Option<&Path>,
) -> Result<()> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read design '{}'", config_path.display()))?;
    let mut spec: DesignSpec = serde_json::from_str(&text)
        .with_context(|| format!("Invalid design '{}'", config_path.display()))?;
    if empirical {
        spec.empirical = true;
    }

    let design = simulate_design(&spec, &mut StdRng::seed_from_u64(seed))
        .context("Design simulation failed")?;
    let mut df = if long { design.to_long()? } else { design.data };
    spec.apply_labels(&mut df)?;
    eprintln!("Simulated {} units, {} rows", spec.total_units(), df.nrows());

    match output {
        Some(path) => df
            .to_csv(path)
            .with_context(|| format!("Failed to write '{}'", path.display()))?,
        None => df.write_csv(std::io::stdout())?,
    }
    Ok(())
}
