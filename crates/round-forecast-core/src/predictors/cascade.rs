use crate::analysis::{count_side, mean, results, scores, tail};
use crate::ruleset::CascadeParams;
use crate::Side::{Tai as T, Xiu as X};
use crate::{ModelId, Side};

use super::{PredictionContext, Predictor, Verdict};

/// Fixed tail patterns and the call each one implies.
const TAIL_PATTERNS: [(&[Side], Side, &str); 4] = [
    (&[T, X, T], X, "1T1X"),
    (&[X, T, X], T, "1X1T"),
    (&[T, T, X, X], T, "2T2X"),
    (&[X, X, T, T], X, "2X2T"),
];

/// Ordered rule cascade; the first matching rule decides.
///
/// Serves both the vannhat and the aihtdd members, which differ only in
/// their [`CascadeParams`].
#[derive(Debug, Clone)]
pub struct RuleCascade {
    model: ModelId,
    params: CascadeParams,
}

impl RuleCascade {
    #[must_use]
    pub fn new(model: ModelId, params: CascadeParams) -> Self {
        Self { model, params }
    }
}

impl Predictor for RuleCascade {
    fn model(&self) -> ModelId {
        self.model
    }

    fn min_history(&self) -> usize {
        self.params.min_history
    }

    fn evaluate(&self, ctx: &PredictionContext<'_>) -> Verdict {
        let p = &self.params;
        let history = ctx.history;

        if let (Some((low, high)), Some(current)) = (p.follow_streak, ctx.streak.current) {
            if (low..=high).contains(&ctx.streak.length) {
                return Verdict::new(
                    current,
                    format!("short streak of {} {current}, keep following", ctx.streak.length),
                );
            }
        }

        let sides = results(history);
        for (pattern, call, label) in TAIL_PATTERNS {
            if sides.ends_with(pattern) {
                return Verdict::new(call, format!("pattern {label} detected, next {call}"));
            }
        }

        if history.len() >= p.long_streak_min_history && sides.len() >= p.long_streak_len {
            let run = &sides[sides.len() - p.long_streak_len..];
            if let Some(&side) = run.first() {
                if run.iter().all(|value| *value == side) {
                    return Verdict::new(
                        side.opposite(),
                        format!("{side} ran {} times, expect {}", p.long_streak_len, side.opposite()),
                    );
                }
            }
        }

        let recent = tail(history, p.score_window);
        let average = mean(&scores(recent));
        if average > p.high_score {
            return Verdict::new(T, format!("high average score ({average:.1}), expect Tài"));
        }
        if average < p.low_score {
            return Verdict::new(X, format!("low average score ({average:.1}), expect Xỉu"));
        }

        let recent_sides = results(recent);
        let tai = count_side(&recent_sides, T);
        let xiu = count_side(&recent_sides, X);
        if tai > xiu + p.majority_margin {
            return Verdict::new(X, format!("Tài leads {tai}/{}, expect Xỉu", recent_sides.len()));
        }
        if xiu > tai + p.majority_margin {
            return Verdict::new(T, format!("Xỉu leads {xiu}/{}, expect Tài", recent_sides.len()));
        }

        if count_side(&sides, T) > count_side(&sides, X) {
            Verdict::new(X, "Tài leads overall, expect Xỉu")
        } else {
            Verdict::new(T, "Xỉu leads or ties overall, expect Tài")
        }
    }
}
