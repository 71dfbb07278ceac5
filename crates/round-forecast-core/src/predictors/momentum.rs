use crate::analysis::{all_ngram_starts, count_side, count_switches, most_common_ngram, ratio, results, tail};
use crate::ruleset::{MeanDeviationParams, RecentSwitchParams, ShortPatternParams, TrendParams};
use crate::{ModelId, Side};

use super::{follow_or_break, PredictionContext, Predictor, Verdict};

/// Streak short-circuit shared by the four momentum members.
fn streak_verdict(ctx: &PredictionContext<'_>, trigger: usize, threshold: f64) -> Option<Verdict> {
    if ctx.streak.length < trigger {
        return None;
    }
    let side = follow_or_break(&ctx.streak, threshold)?;
    let action = if Some(side) == ctx.streak.current { "follow" } else { "break" };
    Some(Verdict::new(
        side,
        format!(
            "streak of {} {}, {action} at break estimate {:.2}",
            ctx.streak.length,
            ctx.streak.current.map_or("-", Side::as_str),
            ctx.streak.break_probability
        ),
    ))
}

/// A repeated n-gram predicts Tài when it ends on the last result, Xỉu otherwise.
fn extrapolate(gram: &[Side], last: Side) -> Side {
    if gram.last() == Some(&last) {
        Side::Tai
    } else {
        Side::Xiu
    }
}

fn flip_last(last: Side, reason: &str) -> Verdict {
    Verdict::new(last.opposite(), format!("{reason}, flip last {last}"))
}

#[derive(Debug, Clone)]
pub struct Trend {
    params: TrendParams,
}

impl Trend {
    #[must_use]
    pub fn new(params: TrendParams) -> Self {
        Self { params }
    }
}

impl Predictor for Trend {
    fn model(&self) -> ModelId {
        ModelId::Trend
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        if let Some(verdict) = streak_verdict(ctx, p.streak_trigger, p.break_threshold) {
            return verdict;
        }

        let window = results(tail(ctx.history, p.vote_window));
        let Some(&last) = window.last() else {
            return Verdict::abstain("empty trend window");
        };

        // Oldest entry weighs 1, each newer one `vote_base` times more.
        let (mut tai, mut xiu, mut weight) = (0.0, 0.0, 1.0);
        for side in &window {
            match side {
                Side::Tai => tai += weight,
                Side::Xiu => xiu += weight,
            }
            weight *= p.vote_base;
        }

        let recent = &window[window.len().saturating_sub(p.pattern_window)..];
        if let Some((gram, count)) =
            most_common_ngram(recent, p.pattern_len, all_ngram_starts(recent, p.pattern_len))
        {
            if count >= p.pattern_min_count {
                return Verdict::new(
                    extrapolate(&gram, last),
                    format!("{}-gram repeated {count} times in the last {}", p.pattern_len, recent.len()),
                );
            }
        }

        let total = tai + xiu;
        if total > 0.0 && (tai - xiu).abs() / total >= p.vote_margin {
            let side = if tai > xiu { Side::Tai } else { Side::Xiu };
            return Verdict::new(side, format!("weighted vote {tai:.1} vs {xiu:.1}"));
        }

        flip_last(last, "no trend")
    }
}

#[derive(Debug, Clone)]
pub struct ShortPattern {
    params: ShortPatternParams,
}

impl ShortPattern {
    #[must_use]
    pub fn new(params: ShortPatternParams) -> Self {
        Self { params }
    }
}

impl Predictor for ShortPattern {
    fn model(&self) -> ModelId {
        ModelId::ShortPattern
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        if let Some(verdict) = streak_verdict(ctx, p.streak_trigger, p.break_threshold) {
            return verdict;
        }

        let window = results(tail(ctx.history, p.window));
        let Some(&last) = window.last() else {
            return Verdict::abstain("empty short window");
        };

        if let Some((gram, count)) =
            most_common_ngram(&window, p.pattern_len, all_ngram_starts(&window, p.pattern_len))
        {
            if count >= p.pattern_min_count {
                return Verdict::new(
                    extrapolate(&gram, last),
                    format!("short {}-gram repeated {count} times", p.pattern_len),
                );
            }
        }

        flip_last(last, "no short pattern")
    }
}

#[derive(Debug, Clone)]
pub struct MeanDeviation {
    params: MeanDeviationParams,
}

impl MeanDeviation {
    #[must_use]
    pub fn new(params: MeanDeviationParams) -> Self {
        Self { params }
    }
}

impl Predictor for MeanDeviation {
    fn model(&self) -> ModelId {
        ModelId::MeanDeviation
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        if let Some(verdict) = streak_verdict(ctx, p.streak_trigger, p.break_threshold) {
            return verdict;
        }

        let window = results(tail(ctx.history, p.window));
        let Some(&last) = window.last() else {
            return Verdict::abstain("empty deviation window");
        };

        let tai = count_side(&window, Side::Tai);
        let xiu = count_side(&window, Side::Xiu);
        let deviation = ratio(tai.abs_diff(xiu), window.len());
        if deviation < p.balance_threshold {
            return flip_last(last, &format!("balanced window ({deviation:.2})"));
        }

        let minority = if xiu > tai { Side::Tai } else { Side::Xiu };
        Verdict::new(minority, format!("{tai} Tài vs {xiu} Xỉu, favor the minority"))
    }
}

/// Both switch-rate branches flip the last result.
#[derive(Debug, Clone)]
pub struct RecentSwitch {
    params: RecentSwitchParams,
}

impl RecentSwitch {
    #[must_use]
    pub fn new(params: RecentSwitchParams) -> Self {
        Self { params }
    }
}

impl Predictor for RecentSwitch {
    fn model(&self) -> ModelId {
        ModelId::RecentSwitch
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        if let Some(verdict) = streak_verdict(ctx, p.streak_trigger, p.break_threshold) {
            return verdict;
        }

        let window = results(tail(ctx.history, p.window));
        let Some(&last) = window.last() else {
            return Verdict::abstain("empty switch window");
        };

        let switches = count_switches(&window);
        if switches >= p.switch_threshold {
            flip_last(last, &format!("choppy window ({switches} switches)"))
        } else {
            flip_last(last, &format!("calm window ({switches} switches)"))
        }
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
    use crate::Call;

    fn call_of(predictor: &dyn Predictor, pattern: &[Side]) -> Call {
        let history = history_of(pattern);
        let snapshots = TrainedSnapshots::default();
        let ctx = PredictionContext::new(&history, analyze_streak(&history), &snapshots);
        evaluate_guarded(predictor, &ctx).call
    }

    fn trend() -> Trend {
        Trend::new(EnsembleRuleset::v1().trend)
    }

    #[test]
    fn trend_follows_a_calm_streak() {
        assert_eq!(call_of(&trend(), &parse("TXTTT")), Call::Tai);
    }

    #[test]
    fn trend_breaks_a_long_streak() {
        let mut sides = alternating(9, Side::Tai);
        sides.extend([Side::Xiu; 6]);
        assert_eq!(call_of(&trend(), &sides), Call::Tai);
    }

    #[test]
    fn trend_extrapolates_a_repeated_four_gram() {
        assert_eq!(call_of(&trend(), &alternating(15, Side::Tai)), Call::Tai);
        assert_eq!(call_of(&trend(), &alternating(16, Side::Tai)), Call::Tai);
    }

    #[test]
    fn trend_uses_the_weighted_vote_margin() {
        // No repeated 4-gram; recency-weighted Tài share is about 68%.
        assert_eq!(call_of(&trend(), &parse("XXXXXTTXXTTTTXT")), Call::Tai);
    }

    #[test]
    fn trend_flips_the_last_result_on_a_narrow_vote() {
        assert_eq!(call_of(&trend(), &parse("XXXXXTTXXTXTTXT")), Call::Xiu);
    }

    #[test]
    fn short_pattern_extrapolates_or_flips() {
        let short = ShortPattern::new(EnsembleRuleset::v1().short_pattern);
        assert_eq!(call_of(&short, &parse("XT")), Call::Xiu);
        assert_eq!(call_of(&short, &parse("XTXT")), Call::Tai);
        assert_eq!(call_of(&short, &parse("TTXTX")), Call::Tai);
    }

    #[test]
    fn mean_deviation_favors_the_minority_unless_balanced() {
        let mean = MeanDeviation::new(EnsembleRuleset::v1().mean_deviation);
        assert_eq!(call_of(&mean, &parse("TTTXTTX")), Call::Xiu);
        assert_eq!(call_of(&mean, &parse("TXTX")), Call::Tai);
    }

    #[test]
    fn recent_switch_always_flips_outside_a_streak() {
        let switch = RecentSwitch::new(EnsembleRuleset::v1().recent_switch);
        assert_eq!(call_of(&switch, &parse("TXTX")), Call::Tai);
        assert_eq!(call_of(&switch, &parse("TTXT")), Call::Xiu);
        assert_eq!(call_of(&switch, &parse("XTT")), Call::Tai);
    }
}
