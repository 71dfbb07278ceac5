use tracing::debug;

use crate::{OutcomeInput, OutcomeRecord};

/// Bounded, deduplicated ledger of settled rounds, kept sorted by round.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryStore {
    records: Vec<OutcomeRecord>,
    capacity: usize,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

impl HistoryStore {
    pub const DEFAULT_CAPACITY: usize = 5_000;

    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    /// Validates and inserts one outcome.
    ///
    /// Returns `false` without mutating the store when the input has no usable
    /// round or result, when its round is already held, or when the store is
    /// full and the round is older than everything held. On overflow the
    /// lowest rounds are evicted.
    pub fn ingest(&mut self, input: OutcomeInput) -> bool {
        match input.into_record() {
            Ok(record) => self.insert(record),
            Err(err) => {
                debug!(error = %err, "rejected outcome input");
                false
            }
        }
    }

    /// Inserts an already validated record. Same dedup and eviction rules as [`Self::ingest`].
    pub fn insert(&mut self, record: OutcomeRecord) -> bool {
        let position = match self
            .records
            .binary_search_by_key(&record.round, |held| held.round)
        {
            Ok(_) => {
                debug!(round = record.round, "duplicate round ignored");
                return false;
            }
            Err(position) => position,
        };

        if position == 0 && self.records.len() >= self.capacity {
            debug!(round = record.round, "round older than a full history ignored");
            return false;
        }

        self.records.insert(position, record);
        if self.records.len() > self.capacity {
            let excess = self.records.len() - self.capacity;
            self.records.drain(..excess);
        }
        true
    }

    /// Ingests many outcomes in order and returns how many were accepted.
    pub fn extend<I>(&mut self, inputs: I) -> usize
    where
        I: IntoIterator<Item = OutcomeInput>,
    {
        let mut accepted = 0;
        for input in inputs {
            if self.ingest(input) {
                accepted += 1;
            }
        }
        accepted
    }

    /// Owned copy of the held records, ascending by round.
    #[must_use]
    pub fn snapshot(&self) -> Vec<OutcomeRecord> {
        self.records.clone()
    }

    /// Owned copy of at most `limit` most recent records.
    #[must_use]
    pub fn tail(&self, limit: usize) -> Vec<OutcomeRecord> {
        let start = self.records.len().saturating_sub(limit);
        self.records[start..].to_vec()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[OutcomeRecord] {
        &self.records
    }

    #[must_use]
    pub fn latest(&self) -> Option<&OutcomeRecord> {
        self.records.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Side;
    use proptest::prelude::*;

    fn record(round: u64, result: Side) -> OutcomeRecord {
        OutcomeRecord {
            round,
            result,
            total: Some(if result == Side::Tai { 12 } else { 8 }),
            dice: None,
        }
    }

    #[test]
    fn duplicate_round_is_a_noop() {
        let mut store = HistoryStore::new(10);
        assert!(store.insert(record(5, Side::Tai)));
        let before = store.snapshot();

        assert!(!store.insert(record(5, Side::Xiu)));
        assert_eq!(store.snapshot(), before);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_round_is_rejected_without_mutation() {
        let mut store = HistoryStore::new(10);
        assert!(!store.ingest(OutcomeInput {
            round: None,
            result: Some(Side::Tai),
            ..OutcomeInput::default()
        }));
        assert!(store.is_empty());
    }

    #[test]
    fn overflow_evicts_exactly_the_oldest_round() {
        let mut store = HistoryStore::new(3);
        for round in 1..=3 {
            assert!(store.insert(record(round, Side::Tai)));
        }
        assert!(store.insert(record(4, Side::Xiu)));

        let rounds: Vec<u64> = store.snapshot().iter().map(|held| held.round).collect();
        assert_eq!(rounds, vec![2, 3, 4]);
    }

    #[test]
    fn late_round_older_than_a_full_store_is_refused() {
        let mut store = HistoryStore::new(3);
        for round in 2..=4 {
            assert!(store.insert(record(round, Side::Tai)));
        }
        let before = store.snapshot();

        assert!(!store.insert(record(1, Side::Xiu)));
        assert_eq!(store.snapshot(), before);

        assert!(store.insert(record(5, Side::Xiu)));
        let rounds: Vec<u64> = store.snapshot().iter().map(|held| held.round).collect();
        assert_eq!(rounds, vec![3, 4, 5]);
    }

    #[test]
    fn out_of_order_rounds_are_sorted() {
        let mut store = HistoryStore::new(10);
        for round in [30, 10, 20] {
            assert!(store.insert(record(round, Side::Xiu)));
        }
        let rounds: Vec<u64> = store.snapshot().iter().map(|held| held.round).collect();
        assert_eq!(rounds, vec![10, 20, 30]);
        assert_eq!(store.latest().map(|held| held.round), Some(30));
    }

    #[test]
    fn snapshot_is_detached_from_the_store() {
        let mut store = HistoryStore::new(10);
        assert!(store.insert(record(1, Side::Tai)));
        let mut copy = store.snapshot();
        copy.clear();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn extend_counts_only_accepted_inputs() {
        let mut store = HistoryStore::new(10);
        let inputs = vec![
            OutcomeInput::from(record(1, Side::Tai)),
            OutcomeInput::from(record(1, Side::Tai)),
            OutcomeInput::default(),
            OutcomeInput::from(record(2, Side::Xiu)),
        ];
        assert_eq!(store.extend(inputs), 2);
        assert_eq!(store.tail(1).first().map(|held| held.round), Some(2));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_store_stays_sorted_unique_and_bounded(
            rounds in prop::collection::vec(1u64..400, 0..200),
            capacity in 1usize..50,
        ) {
            let mut store = HistoryStore::new(capacity);
            for round in rounds {
                if store.insert(record(round, if round % 2 == 0 { Side::Tai } else { Side::Xiu })) {
                    prop_assert!(store.as_slice().iter().any(|held| held.round == round));
                }
            }

            let held = store.snapshot();
            prop_assert!(held.len() <= capacity);
            prop_assert!(held.windows(2).all(|pair| pair[0].round < pair[1].round));
        }
    }
}
