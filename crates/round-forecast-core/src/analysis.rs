use serde::{Deserialize, Serialize};

use crate::ruleset::BadPatternParams;
use crate::{OutcomeRecord, Side};

const BREAK_WINDOW: usize = 15;

/// Streak and break estimate derived from the trailing window. Recomputed every cycle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct StreakState {
    pub length: usize,
    pub current: Option<Side>,
    /// Adjacent result changes inside the trailing 15 records.
    pub switches: usize,
    pub break_probability: f64,
}

impl StreakState {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            length: 0,
            current: None,
            switches: 0,
            break_probability: 0.0,
        }
    }
}

#[must_use]
pub fn analyze_streak(history: &[OutcomeRecord]) -> StreakState {
    let Some(last) = history.last() else {
        return StreakState::empty();
    };

    let current = last.result;
    let length = history
        .iter()
        .rev()
        .take_while(|record| record.result == current)
        .count();

    let window = results(tail(history, BREAK_WINDOW));
    let switches = count_switches(&window);
    let imbalance = count_side(&window, Side::Tai).abs_diff(count_side(&window, Side::Xiu));
    let imbalance = ratio(imbalance, window.len());

    let break_probability = if length >= 6 {
        (0.80 + ratio(switches, 15) + imbalance * 0.3).min(0.95)
    } else if length >= 4 {
        (0.50 + ratio(switches, 12) + imbalance * 0.25).min(0.90)
    } else if length >= 2 && switches >= 5 {
        0.45
    } else if length == 1 && switches >= 6 {
        0.30
    } else {
        0.0
    };

    StreakState {
        length,
        current: Some(current),
        switches,
        break_probability,
    }
}

/// Dampening signal: the trailing window flips too often or one side ran too long.
#[must_use]
pub fn is_unstable(history: &[OutcomeRecord], streak: &StreakState, params: &BadPatternParams) -> bool {
    let window = results(tail(history, params.window));
    if window.is_empty() {
        return false;
    }
    count_switches(&window) >= params.switch_threshold || streak.length >= params.streak_threshold
}

pub(crate) fn tail(history: &[OutcomeRecord], len: usize) -> &[OutcomeRecord] {
    &history[history.len().saturating_sub(len)..]
}

pub(crate) fn results(records: &[OutcomeRecord]) -> Vec<Side> {
    records.iter().map(|record| record.result).collect()
}

pub(crate) fn scores(records: &[OutcomeRecord]) -> Vec<f64> {
    records.iter().map(OutcomeRecord::score).collect()
}

pub(crate) fn count_switches(sides: &[Side]) -> usize {
    sides.windows(2).filter(|pair| pair[0] != pair[1]).count()
}

pub(crate) fn count_side(sides: &[Side], side: Side) -> usize {
    sides.iter().filter(|value| **value == side).count()
}

/// Most frequent contiguous `len`-gram among windows starting at `0..starts`.
/// Ties resolve to the earliest first occurrence.
pub(crate) fn most_common_ngram(sides: &[Side], len: usize, starts: usize) -> Option<(Vec<Side>, usize)> {
    if len == 0 || sides.len() < len {
        return None;
    }

    let mut seen: Vec<(&[Side], usize)> = Vec::new();
    for start in 0..starts.min(sides.len() - len + 1) {
        let gram = &sides[start..start + len];
        match seen.iter_mut().find(|(held, _)| *held == gram) {
            Some((_, count)) => *count += 1,
            None => seen.push((gram, 1)),
        }
    }

    let mut best: Option<(&[Side], usize)> = None;
    for (gram, count) in seen {
        if best.map_or(true, |(_, top)| count > top) {
            best = Some((gram, count));
        }
    }
    best.map(|(gram, count)| (gram.to_vec(), count))
}

/// Number of window starts that covers every contiguous `len`-gram.
pub(crate) fn all_ngram_starts(sides: &[Side], len: usize) -> usize {
    (sides.len() + 1).saturating_sub(len)
}

pub(crate) fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / to_f64(values.len())
}

pub(crate) fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    to_f64(numerator) / to_f64(denominator)
}

#[allow(clippy::cast_precision_loss)]
pub(crate) fn to_f64(value: usize) -> f64 {
    value as f64
}
