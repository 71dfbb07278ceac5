use crate::analysis::{count_side, mean, ratio, results, scores, tail, to_f64};
use crate::ruleset::{AnomalyParams, DivineParams, TraderXParams};
use crate::{ModelId, Side};

use super::{PredictionContext, Predictor, Verdict};

/// Over-represented side in the recent window, gated by the current streak.
#[derive(Debug, Clone)]
pub struct TraderX {
    params: TraderXParams,
}

impl TraderX {
    #[must_use]
    pub fn new(params: TraderXParams) -> Self {
        Self { params }
    }
}

impl Predictor for TraderX {
    fn model(&self) -> ModelId {
        ModelId::TraderX
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let Some(model) = ctx.snapshots.frequency else {
            return Verdict::abstain("not enough data to train trader_x");
        };

        let recent = results(tail(ctx.history, p.window));
        let streak = to_f64(ctx.streak.length);
        for side in [Side::Tai, Side::Xiu] {
            let share = ratio(count_side(&recent, side), p.window);
            if share > model.freq(side) * p.frequency_multiplier
                && streak >= model.streak_avg(side) + p.streak_margin
            {
                return Verdict::new(
                    side.opposite(),
                    format!("{side} runs above its learned average, expect {}", side.opposite()),
                );
            }
        }
        Verdict::abstain("no learned pattern found")
    }
}

/// Fires on runs inside a dominance window or on score anomalies in a volatile window.
#[derive(Debug, Clone)]
pub struct PhapSu {
    params: AnomalyParams,
}

impl PhapSu {
    #[must_use]
    pub fn new(params: AnomalyParams) -> Self {
        Self { params }
    }
}

impl Predictor for PhapSu {
    fn model(&self) -> ModelId {
        ModelId::PhapSu
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let Some(model) = ctx.snapshots.anomaly else {
            return Verdict::abstain("not enough data to activate phap_su");
        };

        let run = results(tail(ctx.history, p.run_len));
        for side in [Side::Tai, Side::Xiu] {
            if model.dominance(side) && run.len() == p.run_len && count_side(&run, side) == run.len() {
                return Verdict::new(
                    side.opposite(),
                    format!("{} {side} in a row during {side} dominance, break the bridge", p.run_len),
                );
            }
        }

        if model.high_variance {
            let average = mean(&scores(tail(ctx.history, p.score_window)));
            if average > p.high_score {
                return Verdict::new(
                    Side::Xiu,
                    format!("unusually high scores ({average:.1}) in a volatile cycle"),
                );
            }
            if average < p.low_score {
                return Verdict::new(
                    Side::Tai,
                    format!("unusually low scores ({average:.1}) in a volatile cycle"),
                );
            }
        }
        Verdict::abstain("no system fault found")
    }
}

/// Reverses a recurring result sequence, else an overlong streak.
#[derive(Debug, Clone)]
pub struct ThanLuc {
    params: DivineParams,
}

impl ThanLuc {
    #[must_use]
    pub fn new(params: DivineParams) -> Self {
        Self { params }
    }
}

impl Predictor for ThanLuc {
    fn model(&self) -> ModelId {
        ModelId::ThanLuc
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let Some(recurrence) = &ctx.snapshots.recurrence else {
            return Verdict::abstain("not enough data to activate than_luc");
        };

        if let Some(pattern) = &recurrence.pattern {
            let recent = results(tail(ctx.history, pattern.len()));
            if recent == *pattern {
                if let Some(last) = pattern.last() {
                    let labels: Vec<&str> = recent.iter().map(|side| side.as_str()).collect();
                    return Verdict::new(
                        last.opposite(),
                        format!("recurring sequence {} detected, expect a reversal", labels.join(",")),
                    );
                }
            }
        }

        if let Some(current) = ctx.streak.current {
            if ctx.streak.length >= self.params.force_reverse_streak {
                return Verdict::new(
                    current.opposite(),
                    format!("{current} streak ran {} times past its limit, break it", ctx.streak.length),
                );
            }
        }
        Verdict::abstain("no divine signal")
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{alternating, history_of, parse};
    use super::super::evaluate_guarded;
    use super::*;
    use crate::analysis::analyze_streak;
    use crate::ruleset::EnsembleRuleset;
    use crate::training::TrainedSnapshots;
    use crate::{Call, OutcomeRecord};

    fn verdict_of(predictor: &dyn Predictor, history: &[OutcomeRecord]) -> Verdict {
        let snapshots = TrainedSnapshots::train(history, &EnsembleRuleset::v1().training);
        let ctx = PredictionContext::new(history, analyze_streak(history), &snapshots);
        evaluate_guarded(predictor, &ctx)
    }

    /// Strict alternation with Xỉu on even indices, then seven Tài.
    fn long_tai_run() -> Vec<OutcomeRecord> {
        let mut sides = alternating(593, Side::Xiu);
        sides.extend([Side::Tai; 7]);
        history_of(&sides)
    }

    fn trader_x() -> TraderX {
        TraderX::new(EnsembleRuleset::v1().trader_x)
    }

    fn phap_su() -> PhapSu {
        PhapSu::new(EnsembleRuleset::v1().phap_su)
    }

    fn than_luc() -> ThanLuc {
        ThanLuc::new(EnsembleRuleset::v1().than_luc)
    }

    #[test]
    fn trader_x_reverses_an_overrepresented_side() {
        // 8 Tài in the last 10 against a trained frequency near 0.505.
        assert_eq!(verdict_of(&trader_x(), &long_tai_run()).call, Call::Xiu);
    }

    #[test]
    fn trader_x_abstains_on_balanced_alternation() {
        let history = history_of(&alternating(600, Side::Tai));
        assert!(verdict_of(&trader_x(), &history).call.is_abstain());
    }

    #[test]
    fn phap_su_breaks_a_run_inside_dominance() {
        let mut sides = alternating(500, Side::Tai);
        for _ in 0..25 {
            sides.extend(parse("XTTT"));
        }
        assert_eq!(verdict_of(&phap_su(), &history_of(&sides)).call, Call::Xiu);
    }

    #[test]
    fn phap_su_reacts_to_high_scores_in_a_volatile_window() {
        let mut history = history_of(&alternating(600, Side::Tai));
        for record in history.iter_mut().rev().take(5) {
            record.total = Some(15);
        }
        assert_eq!(verdict_of(&phap_su(), &history).call, Call::Xiu);
    }

    #[test]
    fn phap_su_abstains_on_a_quiet_window() {
        let history = history_of(&alternating(600, Side::Tai));
        let verdict = verdict_of(&phap_su(), &history);
        assert!(verdict.call.is_abstain());
        assert_eq!(verdict.rationale, "no system fault found");
    }

    #[test]
    fn than_luc_reverses_a_recurring_sequence() {
        let sides: Vec<Side> = (0..600)
            .map(|index| if index % 3 == 2 { Side::Xiu } else { Side::Tai })
            .collect();
        // Trailing five TXTTX match the earliest most common 5-gram.
        assert_eq!(verdict_of(&than_luc(), &history_of(&sides)).call, Call::Tai);
    }

    #[test]
    fn than_luc_force_reverses_a_seven_streak() {
        assert_eq!(verdict_of(&than_luc(), &long_tai_run()).call, Call::Xiu);
    }

    #[test]
    fn than_luc_abstains_on_plain_alternation() {
        let history = history_of(&alternating(600, Side::Tai));
        assert!(verdict_of(&than_luc(), &history).call.is_abstain());
    }
}
