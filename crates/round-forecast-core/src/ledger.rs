use std::collections::BTreeMap;

use crate::analysis::ratio;
use crate::{Call, ModelId, OutcomeRecord};

/// Per-model calls keyed by the round they were made after.
///
/// Each model keeps at most `capacity` rounds; the lowest rounds are evicted first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredictionLedger {
    calls: BTreeMap<ModelId, BTreeMap<u64, Call>>,
    capacity: usize,
}

impl PredictionLedger {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            calls: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Stores `call` as the model's forecast for the round after `round`.
    /// A repeated round overwrites the earlier call.
    pub fn record(&mut self, model: ModelId, round: u64, call: Call) {
        let rounds = self.calls.entry(model).or_default();
        rounds.insert(round, call);
        while rounds.len() > self.capacity {
            rounds.pop_first();
        }
    }

    #[must_use]
    pub fn call_for(&self, model: ModelId, round: u64) -> Option<Call> {
        self.calls.get(&model)?.get(&round).copied()
    }

    #[must_use]
    pub fn len(&self, model: ModelId) -> usize {
        self.calls.get(&model).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.values().all(BTreeMap::is_empty)
    }

    /// Accuracy multiplier in `[0, 2]` over the last `lookback` settled rounds.
    ///
    /// The call stored after round `i` is scored against round `i + 1`.
    /// Missing calls and abstains count as misses. The multiplier is neutral
    /// (1.0) only with fewer than two records or when the model has no stored
    /// calls at all.
    #[must_use]
    pub fn performance_multiplier(&self, history: &[OutcomeRecord], model: ModelId, lookback: usize) -> f64 {
        if history.len() < 2 || self.len(model) == 0 {
            return 1.0;
        }
        let lookback = lookback.min(history.len() - 1);
        if lookback == 0 {
            return 1.0;
        }

        let correct = history
            .windows(2)
            .rev()
            .take(lookback)
            .filter(|pair| {
                let (made_after, settled) = (&pair[0], &pair[1]);
                self.call_for(model, made_after.round)
                    .and_then(Call::side)
                    == Some(settled.result)
            })
            .count();

        let accuracy = ratio(correct, lookback);
        (1.0 + (accuracy - 0.5)).clamp(0.0, 2.0)
    }
}
