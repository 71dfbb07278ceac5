//! Offline command surface over the forecast ensemble.
//!
//! - [`run_cli`] executes a parsed [`Cli`].
//! - [`load_ruleset`] and [`load_history`] are shared with hosts that embed the engine.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use round_forecast_core::{
    decode_history_json, run_backtest, BacktestReport, EnsembleRuleset, Forecast, ForecastEngine,
    OutcomeInput,
};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

pub const FORECAST_CONTRACT_VERSION: &str = "forecast.v1";

#[derive(Debug, Parser)]
#[command(name = "rf")]
#[command(about = "Round forecast ensemble CLI")]
pub struct Cli {
    /// Ruleset JSON file; the built-in v1 ruleset is used when omitted.
    #[arg(long, global = true)]
    ruleset: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Forecast the round after the latest record of a history file.
    Forecast(ForecastArgs),
    /// Replay a history file and score every forecast against the next outcome.
    Backtest(BacktestArgs),
    Ruleset {
        #[command(subcommand)]
        command: Box<RulesetCommand>,
    },
}

#[derive(Debug, Args)]
pub struct ForecastArgs {
    #[arg(long)]
    pub history: PathBuf,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct BacktestArgs {
    #[arg(long)]
    pub history: PathBuf,

    #[arg(long)]
    pub output: Option<PathBuf>,

    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum RulesetCommand {
    /// Print the effective ruleset as JSON.
    Show,
    /// Decode and validate a ruleset file.
    Validate(ValidateArgs),
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    #[arg(long)]
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastOutput {
    pub contract_version: &'static str,
    pub history_len: usize,
    pub rejected_inputs: usize,
    pub forecast: Forecast,
}

#[derive(Debug, Clone, Serialize)]
pub struct BacktestOutput {
    pub contract_version: &'static str,
    pub ruleset_version: u32,
    pub report: BacktestReport,
}

#[derive(Debug, Clone, Serialize)]
struct RulesetValidation {
    valid: bool,
    ruleset_version: u32,
    path: String,
}

/// Runs a parsed CLI command.
///
/// # Errors
/// Returns an error when a ruleset or history file cannot be read or decoded,
/// when the ruleset fails validation, or when output cannot be written.
pub fn run_cli(cli: Cli) -> Result<()> {
    let ruleset = load_ruleset(cli.ruleset.as_deref())?;

    match cli.command {
        Command::Forecast(args) => run_forecast(&args, ruleset),
        Command::Backtest(args) => run_backtest_command(&args, ruleset),
        Command::Ruleset { command } => run_ruleset(*command, &ruleset),
    }
}

/// Loads a ruleset file, or the v1 defaults when `path` is `None`.
///
/// # Errors
/// Returns an error when the file cannot be read, is not JSON, or fails validation.
pub fn load_ruleset(path: Option<&Path>) -> Result<EnsembleRuleset> {
    let Some(path) = path else {
        return Ok(EnsembleRuleset::v1());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading ruleset file {}", path.display()))?;
    parse_ruleset_json(&raw).with_context(|| format!("invalid ruleset in {}", path.display()))
}

/// Reads a history file in either the canonical or the upstream session shape.
///
/// # Errors
/// Returns an error when the file cannot be read or is not a JSON array of outcomes.
pub fn load_history(path: &Path) -> Result<Vec<OutcomeInput>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed reading history file {}", path.display()))?;
    decode_history_json(&raw)
        .map_err(|err| anyhow!(err.to_string()))
        .with_context(|| format!("invalid history in {}", path.display()))
}

fn parse_ruleset_json(raw: &str) -> Result<EnsembleRuleset> {
    let value: Value = serde_json::from_str(raw).context("ruleset MUST be valid JSON")?;
    EnsembleRuleset::from_json(&value).map_err(|err| anyhow!(err.to_string()))
}

fn run_forecast(args: &ForecastArgs, ruleset: EnsembleRuleset) -> Result<()> {
    let inputs = load_history(&args.history)?;
    let submitted = inputs.len();

    let mut engine = ForecastEngine::new(ruleset).map_err(|err| anyhow!(err.to_string()))?;
    let accepted = engine.seed(inputs);
    debug!(submitted, accepted, "history loaded");

    let output = ForecastOutput {
        contract_version: FORECAST_CONTRACT_VERSION,
        history_len: engine.history().len(),
        rejected_inputs: submitted - accepted,
        forecast: engine.predict_next(),
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_forecast(&output);
    }
    Ok(())
}

fn run_backtest_command(args: &BacktestArgs, ruleset: EnsembleRuleset) -> Result<()> {
    let inputs = load_history(&args.history)?;
    let ruleset_version = ruleset.ruleset_version;
    let report = run_backtest(inputs, ruleset).map_err(|err| anyhow!(err.to_string()))?;
    info!(
        evaluated = report.evaluated,
        hits = report.hits,
        hit_rate = report.hit_rate,
        "backtest finished"
    );

    let output = BacktestOutput {
        contract_version: FORECAST_CONTRACT_VERSION,
        ruleset_version,
        report,
    };

    if let Some(path) = &args.output {
        let serialized = serde_json::to_string_pretty(&output)?;
        std::fs::write(path, serialized)
            .with_context(|| format!("failed writing backtest report to {}", path.display()))?;
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_backtest_report(&output);
    }
    Ok(())
}

fn run_ruleset(command: RulesetCommand, effective: &EnsembleRuleset) -> Result<()> {
    match command {
        RulesetCommand::Show => {
            println!("{}", serde_json::to_string_pretty(effective)?);
            Ok(())
        }
        RulesetCommand::Validate(args) => {
            let ruleset = load_ruleset(Some(&args.path))?;
            let validation = RulesetValidation {
                valid: true,
                ruleset_version: ruleset.ruleset_version,
                path: args.path.display().to_string(),
            };
            println!("{}", serde_json::to_string_pretty(&validation)?);
            Ok(())
        }
    }
}

fn print_forecast(output: &ForecastOutput) {
    let forecast = &output.forecast;
    println!(
        "contract={} history_len={} rejected_inputs={}",
        output.contract_version, output.history_len, output.rejected_inputs
    );
    println!(
        "next_round={} call={} confidence={:.2} pattern={} status={}",
        forecast
            .next_round
            .map_or_else(|| "n/a".to_string(), |round| round.to_string()),
        forecast.call,
        forecast.confidence,
        forecast.pattern.as_str(),
        forecast.status.as_str()
    );
    println!("rationale: {}", forecast.rationale);

    if forecast.contributions.is_empty() {
        return;
    }
    println!("{:<16} {:<6} weight", "model", "call");
    println!("{}", "-".repeat(32));
    for entry in &forecast.contributions {
        println!("{:<16} {:<6} {:.3}", entry.model.as_str(), entry.call.as_str(), entry.weight);
    }
}

fn print_backtest_report(output: &BacktestOutput) {
    let report = &output.report;
    println!(
        "contract={} ruleset={} replayed={} skipped={}",
        output.contract_version, output.ruleset_version, report.records_replayed, report.records_skipped
    );
    println!(
        "evaluated={} forecasts={} abstentions={} hits={} hit_rate={:.4} mean_confidence={:.2}",
        report.evaluated,
        report.forecasts,
        report.abstentions,
        report.hits,
        report.hit_rate,
        report.mean_confidence
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err:#}"),
        }
    }

    #[test]
    fn missing_ruleset_path_yields_v1() {
        let ruleset = must(load_ruleset(None));
        assert_eq!(ruleset, EnsembleRuleset::v1());
    }

    #[test]
    fn parse_ruleset_accepts_serialized_defaults() {
        let raw = must(serde_json::to_string(&EnsembleRuleset::v1()).map_err(anyhow::Error::from));
        let ruleset = must(parse_ruleset_json(&raw));
        assert_eq!(ruleset.min_ensemble_history, 500);
    }

    #[test]
    fn parse_ruleset_rejects_invalid_json() {
        assert!(parse_ruleset_json("{").is_err());
    }

    #[test]
    fn parse_ruleset_rejects_failed_validation() {
        let mut value = json!(EnsembleRuleset::v1());
        value["tracker_lookback"] = json!(0);
        let err = match parse_ruleset_json(&value.to_string()) {
            Ok(_) => panic!("expected zero lookback to be rejected"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("tracker_lookback"));
    }

    #[test]
    fn cli_parses_global_ruleset_after_subcommand() {
        let cli = match Cli::try_parse_from([
            "rf",
            "forecast",
            "--history",
            "history.json",
            "--ruleset",
            "custom.json",
            "--json",
        ]) {
            Ok(cli) => cli,
            Err(err) => panic!("expected arguments to parse: {err}"),
        };
        assert_eq!(cli.ruleset, Some(PathBuf::from("custom.json")));
        assert!(matches!(cli.command, Command::Forecast(ForecastArgs { json: true, .. })));
    }

    #[test]
    fn missing_history_file_reports_its_path() {
        let path = std::env::temp_dir().join("rf-missing-history-does-not-exist.json");
        let err = match load_history(&path) {
            Ok(_) => panic!("expected a read failure"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("rf-missing-history-does-not-exist.json"));
    }
}
