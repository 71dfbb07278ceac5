use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{ratio, to_f64};
use crate::engine::ForecastEngine;
use crate::ruleset::EnsembleRuleset;
use crate::{ForecastError, OutcomeInput};

/// Summary of replaying a history through a fresh engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BacktestReport {
    pub records_replayed: usize,
    pub records_skipped: usize,
    /// Rounds the ensemble was asked about: history at or above its minimum
    /// and the round newer than everything already held.
    pub evaluated: usize,
    pub forecasts: usize,
    pub abstentions: usize,
    pub hits: usize,
    pub hit_rate: f64,
    pub mean_confidence: f64,
}

/// Replays `inputs` in order, forecasting each round before ingesting it.
///
/// Invalid and duplicate inputs are skipped without a forecast. A round that
/// arrives after a newer one is ingested but not scored, since the engine's
/// forecast targets the round after the latest held.
///
/// # Errors
/// Returns [`ForecastError::Configuration`] when `ruleset` fails validation.
pub fn run_backtest<I>(inputs: I, ruleset: EnsembleRuleset) -> Result<BacktestReport, ForecastError>
where
    I: IntoIterator<Item = OutcomeInput>,
{
    let mut engine = ForecastEngine::new(ruleset)?;
    let minimum = engine.ruleset().min_ensemble_history;
    let mut report = BacktestReport::default();
    let mut confidence_sum = 0.0;

    for input in inputs {
        let record = match input.into_record() {
            Ok(record) => record,
            Err(err) => {
                debug!(error = %err, "backtest skipped invalid input");
                report.records_skipped += 1;
                continue;
            }
        };
        let held = engine.history().as_slice();
        if held.binary_search_by_key(&record.round, |entry| entry.round).is_ok() {
            report.records_skipped += 1;
            continue;
        }

        let newest = !matches!(engine.history().latest(), Some(latest) if record.round <= latest.round);
        if !newest {
            debug!(round = record.round, "backtest ingests late round without scoring");
        }

        if newest && engine.history().len() >= minimum {
            let forecast = engine.predict_next();
            report.evaluated += 1;
            match forecast.call.side() {
                Some(side) => {
                    report.forecasts += 1;
                    confidence_sum += forecast.confidence;
                    if side == record.result {
                        report.hits += 1;
                    }
                }
                None => report.abstentions += 1,
            }
        }

        if engine.insert_record(record) {
            report.records_replayed += 1;
        } else {
            report.records_skipped += 1;
        }
    }

    if report.forecasts > 0 {
        report.hit_rate = round4(ratio(report.hits, report.forecasts));
        report.mean_confidence = round4(confidence_sum / to_f64(report.forecasts));
    }
    Ok(report)
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
