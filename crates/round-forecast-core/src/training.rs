use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::analysis::{count_side, most_common_ngram, ratio, results, scores, tail, to_f64};
use crate::ruleset::TrainingParams;
use crate::{OutcomeRecord, Side};

/// Overall frequency and streak-continuation averages per side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FrequencyModel {
    pub tai_freq: f64,
    pub xiu_freq: f64,
    pub tai_streak_avg: f64,
    pub xiu_streak_avg: f64,
}

impl FrequencyModel {
    #[must_use]
    pub fn freq(&self, side: Side) -> f64 {
        match side {
            Side::Tai => self.tai_freq,
            Side::Xiu => self.xiu_freq,
        }
    }

    #[must_use]
    pub fn streak_avg(&self, side: Side) -> f64 {
        match side {
            Side::Tai => self.tai_streak_avg,
            Side::Xiu => self.xiu_streak_avg,
        }
    }
}

/// Dominance and variance flags over the trailing dominance window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnomalyModel {
    pub tai_dominance: bool,
    pub xiu_dominance: bool,
    pub high_variance: bool,
}

impl AnomalyModel {
    #[must_use]
    pub fn dominance(&self, side: Side) -> bool {
        match side {
            Side::Tai => self.tai_dominance,
            Side::Xiu => self.xiu_dominance,
        }
    }
}

/// Most frequent repeated result sequence in the trailing recurrence window.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecurrenceModel {
    pub pattern: Option<Vec<Side>>,
    pub occurrences: usize,
}

/// Coarse snapshots re-derived from the full history before every cycle.
///
/// Every field is `None` while the history is shorter than
/// [`TrainingParams::min_history`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrainedSnapshots {
    pub frequency: Option<FrequencyModel>,
    pub anomaly: Option<AnomalyModel>,
    pub recurrence: Option<RecurrenceModel>,
}

impl TrainedSnapshots {
    #[must_use]
    pub fn train(history: &[OutcomeRecord], params: &TrainingParams) -> Self {
        if history.len() < params.min_history {
            return Self::default();
        }

        let snapshots = Self {
            frequency: Some(train_frequency(history)),
            anomaly: Some(train_anomaly(history, params)),
            recurrence: Some(train_recurrence(history, params)),
        };
        debug!(records = history.len(), "trained ensemble snapshots");
        snapshots
    }
}

fn train_frequency(history: &[OutcomeRecord]) -> FrequencyModel {
    let sides = results(history);
    FrequencyModel {
        tai_freq: ratio(count_side(&sides, Side::Tai), sides.len()),
        xiu_freq: ratio(count_side(&sides, Side::Xiu), sides.len()),
        tai_streak_avg: streak_continuation(history, Side::Tai),
        xiu_streak_avg: streak_continuation(history, Side::Xiu),
    }
}

/// Share of `side` records whose round directly follows another `side` round.
fn streak_continuation(history: &[OutcomeRecord], side: Side) -> f64 {
    let rounds: Vec<u64> = history
        .iter()
        .filter(|record| record.result == side)
        .map(|record| record.round)
        .collect();
    let continued = rounds
        .windows(2)
        .filter(|pair| pair[0].checked_add(1) == Some(pair[1]))
        .count();
    ratio(continued, rounds.len())
}

fn train_anomaly(history: &[OutcomeRecord], params: &TrainingParams) -> AnomalyModel {
    let window = tail(history, params.dominance_window);
    let sides = results(window);
    let limit = params.dominance_share * to_f64(window.len());
    let dominates = |side| to_f64(count_side(&sides, side)) > limit;

    AnomalyModel {
        tai_dominance: dominates(Side::Tai),
        xiu_dominance: dominates(Side::Xiu),
        high_variance: scores(window)
            .iter()
            .any(|score| *score > params.variance_high_score || *score < params.variance_low_score),
    }
}

fn train_recurrence(history: &[OutcomeRecord], params: &TrainingParams) -> RecurrenceModel {
    let sides = results(tail(history, params.recurrence_window));
    // The final window start is not scanned.
    let starts = sides.len().saturating_sub(params.recurrence_len);
    match most_common_ngram(&sides, params.recurrence_len, starts) {
        Some((pattern, occurrences)) if occurrences > 1 => RecurrenceModel {
            pattern: Some(pattern),
            occurrences,
        },
        _ => RecurrenceModel {
            pattern: None,
            occurrences: 0,
        },
    }
}
