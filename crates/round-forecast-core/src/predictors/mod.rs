//! The twelve heuristic ensemble members.
//!
//! Every member implements [`Predictor`] and is a pure function of the
//! [`PredictionContext`]. Minimum-history guards live in [`evaluate_guarded`]
//! so individual rules only see histories they can handle.

mod bridge;
mod cascade;
mod momentum;
mod snapshot;
mod statistical;

use serde::{Deserialize, Serialize};

pub use bridge::BridgeBreak;
pub use cascade::RuleCascade;
pub use momentum::{MeanDeviation, RecentSwitch, ShortPattern, Trend};
pub use snapshot::{PhapSu, ThanLuc, TraderX};
pub use statistical::{DeepCycle, Supernova};

use crate::analysis::StreakState;
use crate::ruleset::EnsembleRuleset;
use crate::training::TrainedSnapshots;
use crate::{Call, ModelId, OutcomeRecord, Side};

/// Shared result shape of every predictor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub call: Call,
    pub rationale: String,
    /// Extra magnitude some members report, e.g. the bridge's adjusted break probability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auxiliary: Option<f64>,
}

impl Verdict {
    #[must_use]
    pub fn new(call: impl Into<Call>, rationale: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            rationale: rationale.into(),
            auxiliary: None,
        }
    }

    #[must_use]
    pub fn abstain(rationale: impl Into<String>) -> Self {
        Self::new(Call::Abstain, rationale)
    }

    #[must_use]
    pub fn with_auxiliary(mut self, value: f64) -> Self {
        self.auxiliary = Some(value);
        self
    }
}

/// Read-only inputs for one prediction cycle.
#[derive(Debug, Clone, Copy)]
pub struct PredictionContext<'a> {
    pub history: &'a [OutcomeRecord],
    pub streak: StreakState,
    pub snapshots: &'a TrainedSnapshots,
}

impl<'a> PredictionContext<'a> {
    #[must_use]
    pub fn new(history: &'a [OutcomeRecord], streak: StreakState, snapshots: &'a TrainedSnapshots) -> Self {
        Self {
            history,
            streak,
            snapshots,
        }
    }

    /// Result of the most recent record. Only meaningful once the history guard passed.
    pub(crate) fn last_result(&self) -> Option<Side> {
        self.history.last().map(|record| record.result)
    }
}

pub trait Predictor: Send + Sync {
    fn model(&self) -> ModelId;

    fn min_history(&self) -> usize;

    /// Produces a call for the round after the last held record.
    ///
    /// Callers go through [`evaluate_guarded`]; implementations may assume
    /// `ctx.history.len() >= self.min_history()`.
    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict;
}

/// Runs a predictor behind its minimum-history guard.
#[must_use]
pub fn evaluate_guarded(predictor: &dyn Predictor, ctx: &PredictionContext<'_>) -> Verdict {
    if ctx.history.len() < predictor.min_history().max(1) {
        return Verdict::abstain(format!("not enough data for {}", predictor.model()));
    }
    predictor.evaluate(ctx)
}

/// Builds all twelve members in [`ModelId::ALL`] order.
#[must_use]
pub fn registry(ruleset: &EnsembleRuleset) -> Vec<Box<dyn Predictor>> {
    vec![
        Box::new(Trend::new(ruleset.trend.clone())),
        Box::new(ShortPattern::new(ruleset.short_pattern.clone())),
        Box::new(MeanDeviation::new(ruleset.mean_deviation.clone())),
        Box::new(RecentSwitch::new(ruleset.recent_switch.clone())),
        Box::new(BridgeBreak::new(ruleset.bridge.clone())),
        Box::new(RuleCascade::new(ModelId::Vannhat, ruleset.vannhat.clone())),
        Box::new(DeepCycle::new(ruleset.deep_cycle.clone())),
        Box::new(RuleCascade::new(ModelId::Aihtdd, ruleset.aihtdd.clone())),
        Box::new(Supernova::new(ruleset.supernova.clone())),
        Box::new(TraderX::new(ruleset.trader_x.clone())),
        Box::new(PhapSu::new(ruleset.phap_su.clone())),
        Box::new(ThanLuc::new(ruleset.than_luc.clone())),
    ]
}

/// Follows the current streak, or reverses it when the break estimate exceeds `threshold`.
pub(crate) fn follow_or_break(streak: &StreakState, threshold: f64) -> Option<Side> {
    let current = streak.current?;
    if streak.break_probability > threshold {
        Some(current.opposite())
    } else {
        Some(current)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::{OutcomeRecord, Side};

    pub fn record(round: u64, result: Side) -> OutcomeRecord {
        OutcomeRecord {
            round,
            result,
            total: Some(if result == Side::Tai { 12 } else { 9 }),
            dice: None,
        }
    }

    pub fn history_of(sides: &[Side]) -> Vec<OutcomeRecord> {
        sides
            .iter()
            .enumerate()
            .map(|(index, side)| record(index as u64 + 1, *side))
            .collect()
    }

    pub fn with_totals(sides: &[Side], totals: &[u32]) -> Vec<OutcomeRecord> {
        let mut history = history_of(sides);
        for (record, total) in history.iter_mut().zip(totals) {
            record.total = Some(*total);
        }
        history
    }

    pub fn alternating(len: usize, first: Side) -> Vec<Side> {
        (0..len)
            .map(|index| if index % 2 == 0 { first } else { first.opposite() })
            .collect()
    }

    pub fn parse(pattern: &str) -> Vec<Side> {
        pattern
            .chars()
            .filter_map(|symbol| match symbol {
                'T' => Some(Side::Tai),
                'X' => Some(Side::Xiu),
                _ => None,
            })
            .collect()
    }
}
