use crate::analysis::{count_side, count_switches, mean, results, scores, tail, to_f64};
use crate::ruleset::{DeepCycleParams, SupernovaParams};
use crate::{ModelId, Side};

use super::{PredictionContext, Predictor, Verdict};

/// Compares the current per-side count with the mean count of sliding sub-windows.
#[derive(Debug, Clone)]
pub struct DeepCycle {
    params: DeepCycleParams,
}

impl DeepCycle {
    #[must_use]
    pub fn new(params: DeepCycleParams) -> Self {
        Self { params }
    }
}

impl Predictor for DeepCycle {
    fn model(&self) -> ModelId {
        ModelId::DeepCycle
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let long = results(tail(ctx.history, p.long_window));
        let current = results(tail(ctx.history, p.current_window));

        let starts = long.len().saturating_sub(p.sub_window);
        if starts == 0 {
            return Verdict::abstain("no cycle windows available");
        }
        let average = |side| {
            let total: usize = (0..starts)
                .map(|start| count_side(&long[start..start + p.sub_window], side))
                .sum();
            to_f64(total) / to_f64(starts)
        };

        for side in [Side::Tai, Side::Xiu] {
            let held = to_f64(count_side(&current, side));
            if held > average(side) + p.excess {
                return Verdict::new(
                    side.opposite(),
                    format!("{side} cycle is peaking, expect a turn to {}", side.opposite()),
                );
            }
        }
        Verdict::abstain("no clear cycle")
    }
}

/// Outlier check on recent scores, then a strict alternation check.
#[derive(Debug, Clone)]
pub struct Supernova {
    params: SupernovaParams,
}

impl Supernova {
    #[must_use]
    pub fn new(params: SupernovaParams) -> Self {
        Self { params }
    }
}

impl Predictor for Supernova {
    fn model(&self) -> ModelId {
        ModelId::Supernova
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let window = scores(tail(ctx.history, p.window));
        let Some(&latest) = window.last() else {
            return Verdict::abstain("no scores to inspect");
        };

        let average = mean(&window);
        let squared: Vec<f64> = window.iter().map(|score| (score - average).powi(2)).collect();
        let deviation = mean(&squared).sqrt();

        if latest > average + deviation * p.sigma {
            return Verdict::new(
                Side::Xiu,
                format!("latest score {latest} is far above the mean {average:.1}, expect a reversal"),
            );
        }
        if latest < average - deviation * p.sigma {
            return Verdict::new(
                Side::Tai,
                format!("latest score {latest} is far below the mean {average:.1}, expect a reversal"),
            );
        }

        let recent = results(tail(ctx.history, p.alternation_len));
        if recent.len() == p.alternation_len && count_switches(&recent) + 1 == recent.len() {
            if let Some(last) = ctx.last_result() {
                return Verdict::new(
                    last.opposite(),
                    format!("{}-long 1-1 alternation, follow the pattern", p.alternation_len),
                );
            }
        }

        Verdict::abstain("no outlier signal")
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{alternating, history_of};
    use super::super::evaluate_guarded;
    use super::*;
    use crate::analysis::analyze_streak;
    use crate::ruleset::EnsembleRuleset;
    use crate::training::TrainedSnapshots;
    use crate::{Call, OutcomeRecord};

    fn verdict_of(predictor: &dyn Predictor, history: &[OutcomeRecord]) -> Verdict {
        let snapshots = TrainedSnapshots::default();
        let ctx = PredictionContext::new(history, analyze_streak(history), &snapshots);
        evaluate_guarded(predictor, &ctx)
    }

    fn supernova() -> Supernova {
        Supernova::new(EnsembleRuleset::v1().supernova)
    }

    #[test]
    fn deep_cycle_reverses_a_peaking_side() {
        let mut sides = alternating(35, Side::Tai);
        sides.extend([Side::Tai; 15]);
        // Sub-window mean for Tài is 6.25; the trailing 15 hold 15.
        let verdict = verdict_of(&DeepCycle::new(EnsembleRuleset::v1().deep_cycle), &history_of(&sides));
        assert_eq!(verdict.call, Call::Xiu);
    }

    #[test]
    fn deep_cycle_abstains_on_alternation() {
        let history = history_of(&alternating(50, Side::Tai));
        let verdict = verdict_of(&DeepCycle::new(EnsembleRuleset::v1().deep_cycle), &history);
        assert!(verdict.call.is_abstain());
        assert_eq!(verdict.rationale, "no clear cycle");
    }

    #[test]
    fn supernova_reverses_score_outliers() {
        let mut history = history_of(&alternating(100, Side::Tai));
        for record in &mut history {
            record.total = Some(10);
        }

        history[99].total = Some(18);
        assert_eq!(verdict_of(&supernova(), &history).call, Call::Xiu);

        history[99].total = Some(3);
        assert_eq!(verdict_of(&supernova(), &history).call, Call::Tai);
    }

    #[test]
    fn supernova_follows_long_alternation() {
        let history = history_of(&alternating(100, Side::Tai));
        assert_eq!(verdict_of(&supernova(), &history).call, Call::Tai);
    }

    #[test]
    fn supernova_abstains_on_flat_scores_without_alternation() {
        let history = history_of(&[Side::Tai; 100]);
        assert!(verdict_of(&supernova(), &history).call.is_abstain());
    }
}
