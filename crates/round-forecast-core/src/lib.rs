//! Outcome history and multi-model forecast ensemble for two-sided dice rounds.
//!
//! Host processes drive the core through [`ForecastEngine`]:
//! - [`ForecastEngine::ingest_outcome`] appends one settled round to the bounded history.
//! - [`ForecastEngine::predict_next`] runs the twelve predictors, scores them against
//!   their own recent calls, and fuses the votes into one [`Forecast`].
//!
//! Neither operation returns an error. Guards degrade to abstain values so that the
//! surrounding I/O layer only has to deal with transport failures.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod analysis;
mod backtest;
mod engine;
mod fusion;
mod history;
mod ledger;
pub mod predictors;
mod ruleset;
mod training;

pub use analysis::{analyze_streak, is_unstable, StreakState};
pub use backtest::{run_backtest, BacktestReport};
pub use engine::ForecastEngine;
pub use fusion::{fuse, Forecast, ModelContribution, ModelVote, PatternLabel, StatusLabel};
pub use history::HistoryStore;
pub use ledger::PredictionLedger;
pub use predictors::{PredictionContext, Predictor, Verdict};
pub use ruleset::{
    AnomalyParams, BadPatternParams, BridgeParams, CascadeParams, DeepCycleParams,
    DivineParams, EnsembleRuleset, FusionParams, MeanDeviationParams, RecentSwitchParams,
    ShortPatternParams, SupernovaParams, TraderXParams, TrainingParams, TrendParams,
};
pub use training::{AnomalyModel, FrequencyModel, RecurrenceModel, TrainedSnapshots};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum ForecastError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// One side of a round. `Tai` is the big side (totals 11-18), `Xiu` the small side.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Side {
    #[serde(rename = "Tài", alias = "tai", alias = "Tai")]
    Tai,
    #[serde(rename = "Xỉu", alias = "xiu", alias = "Xiu")]
    Xiu,
}

impl Side {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tai => "Tài",
            Self::Xiu => "Xỉu",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Tài" | "tai" | "Tai" => Some(Self::Tai),
            "Xỉu" | "xiu" | "Xiu" => Some(Self::Xiu),
            _ => None,
        }
    }

    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Self::Tai => Self::Xiu,
            Self::Xiu => Self::Tai,
        }
    }
}

impl Display for Side {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predictor's or the ensemble's call for the next round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Call {
    #[serde(rename = "Tài")]
    Tai,
    #[serde(rename = "Xỉu")]
    Xiu,
    #[serde(rename = "abstain")]
    Abstain,
}

impl Call {
    #[must_use]
    pub fn side(self) -> Option<Side> {
        match self {
            Self::Tai => Some(Side::Tai),
            Self::Xiu => Some(Side::Xiu),
            Self::Abstain => None,
        }
    }

    #[must_use]
    pub fn is_abstain(self) -> bool {
        matches!(self, Self::Abstain)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tai => Side::Tai.as_str(),
            Self::Xiu => Side::Xiu.as_str(),
            Self::Abstain => "abstain",
        }
    }
}

impl From<Side> for Call {
    fn from(side: Side) -> Self {
        match side {
            Side::Tai => Self::Tai,
            Side::Xiu => Self::Xiu,
        }
    }
}

impl Display for Call {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one of the twelve ensemble members.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ModelId {
    Trend,
    ShortPattern,
    MeanDeviation,
    RecentSwitch,
    Bridge,
    Vannhat,
    DeepCycle,
    Aihtdd,
    Supernova,
    TraderX,
    PhapSu,
    ThanLuc,
}

impl ModelId {
    pub const ALL: [Self; 12] = [
        Self::Trend,
        Self::ShortPattern,
        Self::MeanDeviation,
        Self::RecentSwitch,
        Self::Bridge,
        Self::Vannhat,
        Self::DeepCycle,
        Self::Aihtdd,
        Self::Supernova,
        Self::TraderX,
        Self::PhapSu,
        Self::ThanLuc,
    ];

    /// The four models whose agreement escalates the winning score.
    pub const DOMINANT: [Self; 4] = [Self::TraderX, Self::Supernova, Self::PhapSu, Self::ThanLuc];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Trend => "trend",
            Self::ShortPattern => "short_pattern",
            Self::MeanDeviation => "mean_deviation",
            Self::RecentSwitch => "recent_switch",
            Self::Bridge => "bridge",
            Self::Vannhat => "vannhat",
            Self::DeepCycle => "deep_cycle",
            Self::Aihtdd => "aihtdd",
            Self::Supernova => "supernova",
            Self::TraderX => "trader_x",
            Self::PhapSu => "phap_su",
            Self::ThanLuc => "than_luc",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|model| model.as_str() == value)
    }
}

impl Display for ModelId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One settled round held by the [`HistoryStore`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutcomeRecord {
    pub round: u64,
    pub result: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dice: Option<[u8; 3]>,
}

impl OutcomeRecord {
    /// Auxiliary score used by score-based predictors; a missing total counts as zero.
    #[must_use]
    pub fn score(&self) -> f64 {
        f64::from(self.total.unwrap_or(0))
    }
}

/// Unvalidated outcome as delivered by a collaborator.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OutcomeInput {
    #[serde(default)]
    pub round: Option<u64>,
    #[serde(default)]
    pub result: Option<Side>,
    #[serde(default)]
    pub total: Option<u32>,
    #[serde(default)]
    pub dice: Option<[u8; 3]>,
}

impl OutcomeInput {
    /// Validates the input and converts it into a storable record.
    ///
    /// # Errors
    /// Returns [`ForecastError::Validation`] when the round or result is missing,
    /// the round is zero, or dice/total values are outside the three-dice range.
    pub fn into_record(self) -> Result<OutcomeRecord, ForecastError> {
        let Some(round) = self.round else {
            return Err(ForecastError::Validation("round MUST be provided".to_string()));
        };
        if round == 0 {
            return Err(ForecastError::Validation("round MUST be >= 1".to_string()));
        }

        let Some(result) = self.result else {
            return Err(ForecastError::Validation(format!(
                "result MUST be provided for round {round}"
            )));
        };

        if let Some(dice) = self.dice {
            if dice.iter().any(|face| !(1..=6).contains(face)) {
                return Err(ForecastError::Validation(format!(
                    "dice faces MUST be in [1, 6] for round {round}"
                )));
            }
        }

        if let Some(total) = self.total {
            if !(3..=18).contains(&total) {
                return Err(ForecastError::Validation(format!(
                    "total MUST be in [3, 18] for round {round}"
                )));
            }
        }

        Ok(OutcomeRecord {
            round,
            result,
            total: self.total,
            dice: self.dice,
        })
    }
}

impl From<OutcomeRecord> for OutcomeInput {
    fn from(record: OutcomeRecord) -> Self {
        Self {
            round: Some(record.round),
            result: Some(record.result),
            total: record.total,
            dice: record.dice,
        }
    }
}

/// Session payload as published by the upstream results feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpstreamSession {
    #[serde(default)]
    pub phien: Option<u64>,
    #[serde(default)]
    pub ket_qua: Option<String>,
    #[serde(default)]
    pub tong: Option<u32>,
    #[serde(default)]
    pub xuc_xac_1: Option<u8>,
    #[serde(default)]
    pub xuc_xac_2: Option<u8>,
    #[serde(default)]
    pub xuc_xac_3: Option<u8>,
}

impl UpstreamSession {
    #[must_use]
    pub fn dice(&self) -> Option<[u8; 3]> {
        match (self.xuc_xac_1, self.xuc_xac_2, self.xuc_xac_3) {
            (Some(first), Some(second), Some(third)) => Some([first, second, third]),
            _ => None,
        }
    }
}

impl From<UpstreamSession> for OutcomeInput {
    fn from(session: UpstreamSession) -> Self {
        Self {
            round: session.phien,
            result: session.ket_qua.as_deref().and_then(Side::parse),
            total: session.tong,
            dice: session.dice(),
        }
    }
}

/// Either history encoding accepted from files and request bodies.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HistoryEntry {
    Input(OutcomeInput),
    Session(UpstreamSession),
}

impl From<HistoryEntry> for OutcomeInput {
    fn from(entry: HistoryEntry) -> Self {
        match entry {
            HistoryEntry::Input(input) => input,
            HistoryEntry::Session(session) => session.into(),
        }
    }
}

/// Decodes a JSON array of history entries in either encoding.
///
/// # Errors
/// Returns [`ForecastError::Validation`] when the payload is not a JSON array
/// of objects.
pub fn decode_history_json(raw: &str) -> Result<Vec<OutcomeInput>, ForecastError> {
    let entries: Vec<HistoryEntry> = serde_json::from_str(raw)
        .map_err(|err| ForecastError::Validation(format!("invalid history JSON payload: {err}")))?;
    Ok(entries.into_iter().map(OutcomeInput::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("expected Ok(..), got error: {err}"),
        }
    }

    #[test]
    fn input_without_round_is_rejected() {
        let input = OutcomeInput {
            round: None,
            result: Some(Side::Tai),
            total: Some(12),
            dice: None,
        };
        assert!(matches!(input.into_record(), Err(ForecastError::Validation(_))));
    }

    #[test]
    fn round_zero_counts_as_missing() {
        let input = OutcomeInput {
            round: Some(0),
            result: Some(Side::Xiu),
            ..OutcomeInput::default()
        };
        assert!(input.into_record().is_err());
    }

    #[test]
    fn dice_faces_outside_range_are_rejected() {
        let input = OutcomeInput {
            round: Some(7),
            result: Some(Side::Xiu),
            total: Some(9),
            dice: Some([0, 4, 5]),
        };
        assert!(input.into_record().is_err());
    }

    #[test]
    fn upstream_session_maps_to_input() {
        let session: UpstreamSession = must_ok(serde_json::from_str(
            r#"{"phien": 2811, "ket_qua": "Tài", "tong": 13, "xuc_xac_1": 6, "xuc_xac_2": 4, "xuc_xac_3": 3, "id": "feed"}"#,
        ));
        let record = must_ok(OutcomeInput::from(session).into_record());
        assert_eq!(record.round, 2811);
        assert_eq!(record.result, Side::Tai);
        assert_eq!(record.total, Some(13));
        assert_eq!(record.dice, Some([6, 4, 3]));
    }

    #[test]
    fn history_json_accepts_both_encodings() {
        let inputs = must_ok(decode_history_json(
            r#"[
                {"round": 1, "result": "Xỉu", "total": 8},
                {"phien": 2, "ket_qua": "Tài", "tong": 15}
            ]"#,
        ));
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].result, Some(Side::Xiu));
        assert_eq!(inputs[1].round, Some(2));
        assert_eq!(inputs[1].result, Some(Side::Tai));
    }

    #[test]
    fn side_and_call_serialize_with_native_labels() {
        assert_eq!(must_ok(serde_json::to_string(&Side::Tai)), "\"Tài\"");
        assert_eq!(must_ok(serde_json::to_string(&Call::Abstain)), "\"abstain\"");
        assert_eq!(Call::from(Side::Xiu).side(), Some(Side::Xiu));
        assert_eq!(Side::parse("xiu"), Some(Side::Xiu));
    }

    #[test]
    fn model_ids_round_trip_through_names() {
        for model in ModelId::ALL {
            assert_eq!(ModelId::parse(model.as_str()), Some(model));
        }
        assert_eq!(ModelId::parse("unknown"), None);
    }
}
