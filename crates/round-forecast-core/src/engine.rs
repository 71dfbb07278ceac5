use tracing::{debug, info};

use crate::analysis::{analyze_streak, is_unstable};
use crate::fusion::{fuse, Forecast, ModelVote};
use crate::history::HistoryStore;
use crate::ledger::PredictionLedger;
use crate::predictors::{evaluate_guarded, registry, PredictionContext, Predictor};
use crate::ruleset::EnsembleRuleset;
use crate::training::TrainedSnapshots;
use crate::{ForecastError, OutcomeInput, OutcomeRecord};

/// Owns the history, the per-model ledger and the predictor registry.
///
/// One engine serves one outcome stream. Callers serialize
/// [`Self::ingest_outcome`] and [`Self::predict_next`] per round.
pub struct ForecastEngine {
    ruleset: EnsembleRuleset,
    history: HistoryStore,
    ledger: PredictionLedger,
    predictors: Vec<Box<dyn Predictor>>,
}

impl std::fmt::Debug for ForecastEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForecastEngine")
            .field("ruleset_version", &self.ruleset.ruleset_version)
            .field("history_len", &self.history.len())
            .field("predictors", &self.predictors.len())
            .finish_non_exhaustive()
    }
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl ForecastEngine {
    /// Builds an engine after validating `ruleset`.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when the ruleset fails validation.
    pub fn new(ruleset: EnsembleRuleset) -> Result<Self, ForecastError> {
        ruleset.validate()?;
        Ok(Self::build(ruleset))
    }

    #[must_use]
    pub fn with_defaults() -> Self {
        Self::build(EnsembleRuleset::v1())
    }

    fn build(ruleset: EnsembleRuleset) -> Self {
        Self {
            history: HistoryStore::new(ruleset.history_capacity),
            ledger: PredictionLedger::new(ruleset.ledger_capacity),
            predictors: registry(&ruleset),
            ruleset,
        }
    }

    #[must_use]
    pub fn ruleset(&self) -> &EnsembleRuleset {
        &self.ruleset
    }

    #[must_use]
    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    #[must_use]
    pub fn ledger(&self) -> &PredictionLedger {
        &self.ledger
    }

    /// Adds one settled round; `false` when the input is rejected or already held.
    pub fn ingest_outcome(&mut self, input: OutcomeInput) -> bool {
        self.history.ingest(input)
    }

    pub(crate) fn insert_record(&mut self, record: OutcomeRecord) -> bool {
        self.history.insert(record)
    }

    /// Bulk ingestion used to refresh from cached history. Returns the accepted count.
    pub fn seed<I>(&mut self, inputs: I) -> usize
    where
        I: IntoIterator<Item = OutcomeInput>,
    {
        let accepted = self.history.extend(inputs);
        debug!(accepted, held = self.history.len(), "seeded history");
        accepted
    }

    /// Forecasts the round after the latest held record.
    ///
    /// Never fails: short histories yield the insufficient-data forecast and a
    /// score tie yields the conflicting-signals forecast. Every member's call
    /// is stored in the ledger under the latest round.
    pub fn predict_next(&mut self) -> Forecast {
        let history = self.history.snapshot();
        let Some(latest) = history.last().map(|record| record.round) else {
            return Forecast::insufficient(None, &self.ruleset.fusion);
        };
        let next_round = latest.checked_add(1);

        if history.len() < self.ruleset.min_ensemble_history {
            debug!(held = history.len(), "history below ensemble minimum");
            return Forecast::insufficient(next_round, &self.ruleset.fusion);
        }

        let snapshots = TrainedSnapshots::train(&history, &self.ruleset.training);
        let streak = analyze_streak(&history);
        let ctx = PredictionContext::new(&history, streak, &snapshots);

        let verdicts: Vec<_> = self
            .predictors
            .iter()
            .map(|predictor| (predictor.model(), evaluate_guarded(predictor.as_ref(), &ctx)))
            .collect();
        for (model, verdict) in &verdicts {
            self.ledger.record(*model, latest, verdict.call);
        }

        let fusion = &self.ruleset.fusion;
        let votes: Vec<ModelVote> = verdicts
            .into_iter()
            .map(|(model, verdict)| {
                let multiplier =
                    self.ledger
                        .performance_multiplier(&history, model, self.ruleset.tracker_lookback);
                ModelVote {
                    model,
                    verdict,
                    weight: fusion.base_weight(model) * multiplier,
                }
            })
            .collect();

        let unstable = is_unstable(&history, &streak, &self.ruleset.bad_pattern);
        let forecast = fuse(next_round, &votes, unstable, fusion);

        info!(
            next_round = ?forecast.next_round,
            call = %forecast.call,
            confidence = forecast.confidence,
            status = forecast.status.as_str(),
            unstable,
            contributions = ?forecast.contributions,
            "forecast decided"
        );
        forecast
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::{PatternLabel, StatusLabel};
    use crate::{Call, ModelId, Side};

    fn input(round: u64, result: Side) -> OutcomeInput {
        OutcomeInput {
            round: Some(round),
            result: Some(result),
            total: Some(if result == Side::Tai { 12 } else { 9 }),
            dice: None,
        }
    }

    fn engine_with(sides: &[Side]) -> ForecastEngine {
        let mut engine = ForecastEngine::with_defaults();
        let accepted = engine.seed(
            sides
                .iter()
                .enumerate()
                .map(|(index, side)| input(index as u64 + 1, *side)),
        );
        assert_eq!(accepted, sides.len());
        engine
    }

    fn alternating(len: usize, first: Side) -> Vec<Side> {
        (0..len)
            .map(|index| if index % 2 == 0 { first } else { first.opposite() })
            .collect()
    }

    fn contribution(forecast: &Forecast, model: ModelId) -> Option<Side> {
        forecast
            .contributions
            .iter()
            .find(|entry| entry.model == model)
            .map(|entry| entry.call)
    }

    #[test]
    fn empty_engine_reports_insufficient_data() {
        let mut engine = ForecastEngine::with_defaults();
        let forecast = engine.predict_next();
        assert_eq!(forecast.call, Call::Abstain);
        assert_eq!(forecast.next_round, None);
        assert_eq!(forecast.pattern, PatternLabel::InsufficientData);
    }

    #[test]
    fn ensemble_engages_at_exactly_five_hundred_records() {
        let mut engine = engine_with(&alternating(499, Side::Tai));
        let forecast = engine.predict_next();
        assert_eq!(forecast.call, Call::Abstain);
        assert!((forecast.confidence - 10.0).abs() < f64::EPSILON);
        assert_eq!(forecast.status, StatusLabel::HighRisk);
        assert_eq!(forecast.next_round, Some(500));
        assert!(engine.ledger().is_empty());

        assert!(engine.ingest_outcome(input(500, Side::Xiu)));
        let forecast = engine.predict_next();
        assert_eq!(forecast.pattern, PatternLabel::Composite);
        assert_ne!(forecast.call, Call::Abstain);
        assert_eq!(engine.ledger().len(ModelId::ThanLuc), 1);
    }

    #[test]
    fn strict_alternation_favors_tai_with_damped_confidence() {
        let mut engine = engine_with(&alternating(600, Side::Tai));
        let forecast = engine.predict_next();

        assert_eq!(forecast.call, Call::Tai);
        assert_eq!(forecast.next_round, Some(601));
        assert!((forecast.confidence - 94.12).abs() < 1e-9);
        assert_eq!(forecast.status, StatusLabel::SuperVip);
        assert!(forecast.confidence.is_finite());

        assert_eq!(contribution(&forecast, ModelId::ShortPattern), Some(Side::Tai));
        assert_eq!(contribution(&forecast, ModelId::RecentSwitch), Some(Side::Tai));
        assert_eq!(contribution(&forecast, ModelId::Bridge), Some(Side::Xiu));
        assert_eq!(contribution(&forecast, ModelId::TraderX), None);
        assert!(forecast.rationale.contains("strongest model: supernova with weight 0.10"));
    }

    #[test]
    fn multipliers_follow_settled_calls_across_cycles() {
        let mut engine = engine_with(&alternating(600, Side::Tai));
        let lookback = engine.ruleset().tracker_lookback;

        let first = engine.predict_next();
        assert_eq!(contribution(&first, ModelId::ShortPattern), Some(Side::Tai));
        assert_eq!(contribution(&first, ModelId::Bridge), Some(Side::Xiu));
        let cold = engine
            .ledger()
            .performance_multiplier(engine.history().as_slice(), ModelId::Trend, lookback);
        assert!((cold - 0.5).abs() < 1e-9);

        assert!(engine.ingest_outcome(input(601, Side::Tai)));
        let history = engine.history().as_slice();
        let short = engine
            .ledger()
            .performance_multiplier(history, ModelId::ShortPattern, lookback);
        let bridge = engine
            .ledger()
            .performance_multiplier(history, ModelId::Bridge, lookback);
        assert!((short - 0.6).abs() < 1e-9);
        assert!((bridge - 0.5).abs() < 1e-9);

        let second = engine.predict_next();
        assert_eq!(second.next_round, Some(602));
        assert_eq!(engine.ledger().len(ModelId::ShortPattern), 2);
    }

    #[test]
    fn seven_tai_run_is_broken_by_the_override_members() {
        let mut sides = alternating(593, Side::Xiu);
        sides.extend([Side::Tai; 7]);
        let mut engine = engine_with(&sides);
        let forecast = engine.predict_next();

        assert_eq!(contribution(&forecast, ModelId::ThanLuc), Some(Side::Xiu));
        assert_eq!(contribution(&forecast, ModelId::Vannhat), Some(Side::Xiu));
        assert_eq!(contribution(&forecast, ModelId::Aihtdd), Some(Side::Xiu));
        assert_eq!(contribution(&forecast, ModelId::TraderX), Some(Side::Xiu));
        assert_eq!(forecast.call, Call::Xiu);
        assert!((10.0..=99.99).contains(&forecast.confidence));
    }

    #[test]
    fn repeated_prediction_without_new_outcome_is_identical() {
        let mut sides = alternating(593, Side::Xiu);
        sides.extend([Side::Tai; 7]);
        let mut engine = engine_with(&sides);

        let first = engine.predict_next();
        let second = engine.predict_next();
        assert_eq!(first, second);
    }

    #[test]
    fn rejected_ruleset_is_a_configuration_error() {
        let mut ruleset = EnsembleRuleset::v1();
        ruleset.history_capacity = 0;
        assert!(matches!(ForecastEngine::new(ruleset), Err(ForecastError::Configuration(_))));
    }

    #[test]
    fn duplicate_outcome_is_not_ingested_twice() {
        let mut engine = engine_with(&alternating(10, Side::Tai));
        assert!(!engine.ingest_outcome(input(10, Side::Tai)));
        assert_eq!(engine.history().len(), 10);
    }
}
