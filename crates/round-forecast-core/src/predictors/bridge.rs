use crate::analysis::{all_ngram_starts, mean, most_common_ngram, results, scores, tail};
use crate::ruleset::BridgeParams;
use crate::ModelId;

use super::{PredictionContext, Predictor, Verdict};

const BREAK_FLOOR: f64 = 0.1;

/// Adjusts the streak break estimate with score spread and 2-gram stability.
///
/// The adjusted probability is reported as the verdict's auxiliary value and
/// feeds the fuser's bridge bonus.
#[derive(Debug, Clone)]
pub struct BridgeBreak {
    params: BridgeParams,
}

impl BridgeBreak {
    #[must_use]
    pub fn new(params: BridgeParams) -> Self {
        Self { params }
    }
}

impl Predictor for BridgeBreak {
    fn model(&self) -> ModelId {
        ModelId::Bridge
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let streak = ctx.streak;
        let Some(current) = streak.current else {
            return Verdict::abstain("no current streak");
        };

        let window = tail(ctx.history, p.window);
        let sides = results(window);
        let window_scores = scores(window);
        let average = mean(&window_scores);
        let spread: Vec<f64> = window_scores.iter().map(|score| (score - average).abs()).collect();
        let deviation = mean(&spread);

        let stable = most_common_ngram(&sides, 2, all_ngram_starts(&sides, 2))
            .filter(|(_, count)| *count >= p.stable_pattern_count);
        let recent = &sides[sides.len().saturating_sub(p.tail_len)..];
        let base = streak.break_probability;

        let (probability, rationale) = if streak.length >= p.follow_streak
            && deviation < p.calm_deviation
            && stable.is_none()
        {
            (
                (base - 0.25).max(BREAK_FLOOR),
                format!("steady streak of {} {current}, keep following", streak.length),
            )
        } else if streak.length >= p.long_streak {
            (
                (base + 0.3).min(0.95),
                format!("streak of {} {current} is overextended, break likely", streak.length),
            )
        } else if streak.length >= p.follow_streak && deviation > p.volatile_deviation {
            (
                (base + 0.25).min(0.9),
                format!("score deviation {deviation:.1} is high, break more likely"),
            )
        } else if let Some((gram, _)) = stable
            .as_ref()
            .filter(|_| recent.iter().all(|side| *side == current))
        {
            let gram: Vec<&str> = gram.iter().map(|side| side.as_str()).collect();
            (
                (base + 0.2).min(0.85),
                format!("repeating pattern {} detected, break possible", gram.join(",")),
            )
        } else {
            (
                (base - 0.2).max(BREAK_FLOOR),
                "no strong break signal, keep following".to_string(),
            )
        };

        let call = if probability > p.reverse_threshold {
            current.opposite()
        } else {
            current
        };
        Verdict::new(call, rationale).with_auxiliary(probability)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{alternating, history_of, parse, with_totals};
    use super::super::evaluate_guarded;
    use super::*;
    use crate::analysis::analyze_streak;
    use crate::ruleset::EnsembleRuleset;
    use crate::training::TrainedSnapshots;
    use crate::{Call, OutcomeRecord, Side};

    fn verdict_for(history: &[OutcomeRecord]) -> Verdict {
        let bridge = BridgeBreak::new(EnsembleRuleset::v1().bridge);
        let snapshots = TrainedSnapshots::default();
        let ctx = PredictionContext::new(history, analyze_streak(history), &snapshots);
        evaluate_guarded(&bridge, &ctx)
    }

    fn assert_probability(verdict: &Verdict, expected: f64) {
        match verdict.auxiliary {
            Some(value) => assert!((value - expected).abs() < 1e-9, "got {value}, expected {expected}"),
            None => panic!("bridge verdict has no probability"),
        }
    }

    #[test]
    fn alternation_lowers_the_estimate_and_follows() {
        let verdict = verdict_for(&history_of(&alternating(20, Side::Tai)));
        assert_eq!(verdict.call, Call::Xiu);
        assert_probability(&verdict, 0.1);
    }

    #[test]
    fn calm_streak_without_pattern_keeps_following() {
        let verdict = verdict_for(&history_of(&parse("TTXXX")));
        assert_eq!(verdict.call, Call::Xiu);
        assert_probability(&verdict, 0.1);
    }

    #[test]
    fn overextended_streak_reverses() {
        let mut sides = alternating(9, Side::Tai);
        sides.extend([Side::Xiu; 6]);
        let verdict = verdict_for(&history_of(&sides));
        assert_eq!(verdict.call, Call::Tai);
        assert_probability(&verdict, 0.95);
    }

    #[test]
    fn volatile_scores_raise_the_estimate() {
        let verdict = verdict_for(&with_totals(&parse("TTXXX"), &[18, 18, 3, 3, 3]));
        assert_eq!(verdict.call, Call::Xiu);
        assert_probability(&verdict, 0.25);
    }

    #[test]
    fn stable_pattern_under_a_streak_reverses() {
        let verdict = verdict_for(&history_of(&parse("TXTXTXXXXX")));
        assert_eq!(verdict.call, Call::Tai);
        assert_probability(&verdict, 0.85);
    }
}
