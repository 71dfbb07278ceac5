use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ForecastError, ModelId};

/// Complete tuning surface of the history store, predictors, tracker and fuser.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnsembleRuleset {
    pub ruleset_version: u32,
    pub history_capacity: usize,
    pub min_ensemble_history: usize,
    pub ledger_capacity: usize,
    pub tracker_lookback: usize,
    pub training: TrainingParams,
    pub trend: TrendParams,
    pub short_pattern: ShortPatternParams,
    pub mean_deviation: MeanDeviationParams,
    pub recent_switch: RecentSwitchParams,
    pub bridge: BridgeParams,
    pub vannhat: CascadeParams,
    pub aihtdd: CascadeParams,
    pub deep_cycle: DeepCycleParams,
    pub supernova: SupernovaParams,
    pub trader_x: TraderXParams,
    pub phap_su: AnomalyParams,
    pub than_luc: DivineParams,
    pub bad_pattern: BadPatternParams,
    pub fusion: FusionParams,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingParams {
    pub min_history: usize,
    pub dominance_window: usize,
    pub dominance_share: f64,
    pub variance_high_score: f64,
    pub variance_low_score: f64,
    pub recurrence_window: usize,
    pub recurrence_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendParams {
    pub min_history: usize,
    pub streak_trigger: usize,
    pub break_threshold: f64,
    pub vote_window: usize,
    pub vote_base: f64,
    pub pattern_window: usize,
    pub pattern_len: usize,
    pub pattern_min_count: usize,
    pub vote_margin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShortPatternParams {
    pub min_history: usize,
    pub streak_trigger: usize,
    pub break_threshold: f64,
    pub window: usize,
    pub pattern_len: usize,
    pub pattern_min_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeanDeviationParams {
    pub min_history: usize,
    pub streak_trigger: usize,
    pub break_threshold: f64,
    pub window: usize,
    pub balance_threshold: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecentSwitchParams {
    pub min_history: usize,
    pub streak_trigger: usize,
    pub break_threshold: f64,
    pub window: usize,
    pub switch_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeParams {
    pub min_history: usize,
    pub window: usize,
    pub stable_pattern_count: usize,
    pub follow_streak: usize,
    pub long_streak: usize,
    pub calm_deviation: f64,
    pub volatile_deviation: f64,
    pub tail_len: usize,
    pub reverse_threshold: f64,
}

/// Parameters for the two ordered rule cascades.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CascadeParams {
    pub min_history: usize,
    /// Inclusive streak range that is followed before any other rule, when set.
    pub follow_streak: Option<(usize, usize)>,
    pub long_streak_len: usize,
    pub long_streak_min_history: usize,
    pub score_window: usize,
    pub high_score: f64,
    pub low_score: f64,
    pub majority_margin: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeepCycleParams {
    pub min_history: usize,
    pub long_window: usize,
    pub sub_window: usize,
    pub current_window: usize,
    pub excess: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupernovaParams {
    pub min_history: usize,
    pub window: usize,
    pub sigma: f64,
    pub alternation_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TraderXParams {
    pub min_history: usize,
    pub window: usize,
    pub frequency_multiplier: f64,
    pub streak_margin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyParams {
    pub min_history: usize,
    pub run_len: usize,
    pub score_window: usize,
    pub high_score: f64,
    pub low_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DivineParams {
    pub min_history: usize,
    pub force_reverse_streak: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BadPatternParams {
    pub window: usize,
    pub switch_threshold: usize,
    pub streak_threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusionParams {
    pub base_weights: BTreeMap<ModelId, f64>,
    pub consensus_votes: usize,
    pub consensus_bonus: f64,
    pub unanimous_multiplier: f64,
    pub triple_multiplier: f64,
    pub pair_multiplier: f64,
    pub unstable_damping: f64,
    pub bridge_bonus_threshold: f64,
    pub bridge_bonus: f64,
    pub confidence_floor: f64,
    pub confidence_ceiling: f64,
    pub tie_confidence: f64,
    pub insufficient_confidence: f64,
}

impl BadPatternParams {
    #[must_use]
    pub fn v1() -> Self {
        Self {
            window: 15,
            switch_threshold: 6,
            streak_threshold: 7,
        }
    }
}

impl CascadeParams {
    #[must_use]
    pub fn vannhat_v1() -> Self {
        Self {
            min_history: 1,
            follow_streak: Some((2, 4)),
            long_streak_len: 7,
            long_streak_min_history: 7,
            score_window: 5,
            high_score: 11.0,
            low_score: 7.0,
            majority_margin: 1,
        }
    }

    #[must_use]
    pub fn aihtdd_v1() -> Self {
        Self {
            min_history: 3,
            follow_streak: None,
            long_streak_len: 6,
            long_streak_min_history: 9,
            score_window: 5,
            high_score: 10.0,
            low_score: 8.0,
            majority_margin: 1,
        }
    }
}

impl FusionParams {
    #[must_use]
    pub fn v1() -> Self {
        let base_weights = [
            (ModelId::Trend, 0.05),
            (ModelId::ShortPattern, 0.05),
            (ModelId::MeanDeviation, 0.05),
            (ModelId::RecentSwitch, 0.05),
            (ModelId::Bridge, 0.1),
            (ModelId::Vannhat, 0.1),
            (ModelId::DeepCycle, 0.1),
            (ModelId::Aihtdd, 0.1),
            (ModelId::Supernova, 0.2),
            (ModelId::TraderX, 0.2),
            (ModelId::PhapSu, 0.3),
            (ModelId::ThanLuc, 0.5),
        ]
        .into_iter()
        .collect();

        Self {
            base_weights,
            consensus_votes: 6,
            consensus_bonus: 0.5,
            unanimous_multiplier: 4.0,
            triple_multiplier: 3.0,
            pair_multiplier: 2.0,
            unstable_damping: 0.5,
            bridge_bonus_threshold: 0.6,
            bridge_bonus: 0.3,
            confidence_floor: 10.0,
            confidence_ceiling: 99.99,
            tie_confidence: 35.0,
            insufficient_confidence: 10.0,
        }
    }

    #[must_use]
    pub fn base_weight(&self, model: ModelId) -> f64 {
        self.base_weights.get(&model).copied().unwrap_or(0.0)
    }
}

impl EnsembleRuleset {
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn v1() -> Self {
        Self {
            ruleset_version: 1,
            history_capacity: 5_000,
            min_ensemble_history: 500,
            ledger_capacity: 64,
            tracker_lookback: 10,
            training: TrainingParams {
                min_history: 500,
                dominance_window: 100,
                dominance_share: 0.6,
                variance_high_score: 14.0,
                variance_low_score: 6.0,
                recurrence_window: 200,
                recurrence_len: 5,
            },
            trend: TrendParams {
                min_history: 1,
                streak_trigger: 3,
                break_threshold: 0.6,
                vote_window: 15,
                vote_base: 1.3,
                pattern_window: 10,
                pattern_len: 4,
                pattern_min_count: 3,
                vote_margin: 0.25,
            },
            short_pattern: ShortPatternParams {
                min_history: 1,
                streak_trigger: 2,
                break_threshold: 0.6,
                window: 8,
                pattern_len: 2,
                pattern_min_count: 2,
            },
            mean_deviation: MeanDeviationParams {
                min_history: 1,
                streak_trigger: 2,
                break_threshold: 0.6,
                window: 12,
                balance_threshold: 0.2,
            },
            recent_switch: RecentSwitchParams {
                min_history: 1,
                streak_trigger: 2,
                break_threshold: 0.6,
                window: 10,
                switch_threshold: 4,
            },
            bridge: BridgeParams {
                min_history: 5,
                window: 20,
                stable_pattern_count: 3,
                follow_streak: 3,
                long_streak: 6,
                calm_deviation: 2.0,
                volatile_deviation: 3.5,
                tail_len: 5,
                reverse_threshold: 0.5,
            },
            vannhat: CascadeParams::vannhat_v1(),
            aihtdd: CascadeParams::aihtdd_v1(),
            deep_cycle: DeepCycleParams {
                min_history: 50,
                long_window: 50,
                sub_window: 10,
                current_window: 15,
                excess: 3.0,
            },
            supernova: SupernovaParams {
                min_history: 100,
                window: 30,
                sigma: 2.0,
                alternation_len: 6,
            },
            trader_x: TraderXParams {
                min_history: 500,
                window: 10,
                frequency_multiplier: 1.5,
                streak_margin: 1.0,
            },
            phap_su: AnomalyParams {
                min_history: 500,
                run_len: 3,
                score_window: 5,
                high_score: 13.0,
                low_score: 7.0,
            },
            than_luc: DivineParams {
                min_history: 500,
                force_reverse_streak: 7,
            },
            bad_pattern: BadPatternParams::v1(),
            fusion: FusionParams::v1(),
        }
    }

    /// Validates window sizes, ratios and fusion bounds.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when one or more fields are
    /// outside allowed bounds or a model has no base weight.
    pub fn validate(&self) -> Result<(), ForecastError> {
        if self.ruleset_version == 0 {
            return Err(ForecastError::Configuration(
                "ruleset_version MUST be >= 1".to_string(),
            ));
        }

        for (name, value) in [
            ("history_capacity", self.history_capacity),
            ("ledger_capacity", self.ledger_capacity),
            ("tracker_lookback", self.tracker_lookback),
            ("training.dominance_window", self.training.dominance_window),
            ("training.recurrence_window", self.training.recurrence_window),
            ("training.recurrence_len", self.training.recurrence_len),
            ("trend.vote_window", self.trend.vote_window),
            ("trend.pattern_window", self.trend.pattern_window),
            ("trend.pattern_len", self.trend.pattern_len),
            ("short_pattern.window", self.short_pattern.window),
            ("short_pattern.pattern_len", self.short_pattern.pattern_len),
            ("mean_deviation.window", self.mean_deviation.window),
            ("recent_switch.window", self.recent_switch.window),
            ("bridge.window", self.bridge.window),
            ("bridge.tail_len", self.bridge.tail_len),
            ("vannhat.score_window", self.vannhat.score_window),
            ("aihtdd.score_window", self.aihtdd.score_window),
            ("deep_cycle.sub_window", self.deep_cycle.sub_window),
            ("deep_cycle.current_window", self.deep_cycle.current_window),
            ("supernova.window", self.supernova.window),
            ("supernova.alternation_len", self.supernova.alternation_len),
            ("trader_x.window", self.trader_x.window),
            ("phap_su.run_len", self.phap_su.run_len),
            ("phap_su.score_window", self.phap_su.score_window),
            ("bad_pattern.window", self.bad_pattern.window),
        ] {
            if value == 0 {
                return Err(ForecastError::Configuration(format!("{name} MUST be >= 1")));
            }
        }

        for (name, value) in [
            ("training.dominance_share", self.training.dominance_share),
            ("trend.break_threshold", self.trend.break_threshold),
            ("trend.vote_margin", self.trend.vote_margin),
            ("short_pattern.break_threshold", self.short_pattern.break_threshold),
            ("mean_deviation.break_threshold", self.mean_deviation.break_threshold),
            ("mean_deviation.balance_threshold", self.mean_deviation.balance_threshold),
            ("recent_switch.break_threshold", self.recent_switch.break_threshold),
            ("bridge.reverse_threshold", self.bridge.reverse_threshold),
            ("fusion.unstable_damping", self.fusion.unstable_damping),
            ("fusion.bridge_bonus_threshold", self.fusion.bridge_bonus_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be in [0.0, 1.0]"
                )));
            }
        }

        if self.deep_cycle.sub_window >= self.deep_cycle.long_window {
            return Err(ForecastError::Configuration(
                "deep_cycle.sub_window MUST be < deep_cycle.long_window".to_string(),
            ));
        }

        for (name, cascade) in [("vannhat", &self.vannhat), ("aihtdd", &self.aihtdd)] {
            if let Some((low, high)) = cascade.follow_streak {
                if low > high {
                    return Err(ForecastError::Configuration(format!(
                        "{name}.follow_streak MUST be an ordered range"
                    )));
                }
            }
            if cascade.long_streak_len == 0 {
                return Err(ForecastError::Configuration(format!(
                    "{name}.long_streak_len MUST be >= 1"
                )));
            }
        }

        for model in ModelId::ALL {
            match self.fusion.base_weights.get(&model) {
                Some(weight) if weight.is_finite() && *weight >= 0.0 => {}
                Some(_) => {
                    return Err(ForecastError::Configuration(format!(
                        "fusion.base_weights.{model} MUST be a finite value >= 0"
                    )))
                }
                None => {
                    return Err(ForecastError::Configuration(format!(
                        "fusion.base_weights.{model} MUST be provided"
                    )))
                }
            }
        }

        for (name, value) in [
            ("fusion.consensus_bonus", self.fusion.consensus_bonus),
            ("fusion.unanimous_multiplier", self.fusion.unanimous_multiplier),
            ("fusion.triple_multiplier", self.fusion.triple_multiplier),
            ("fusion.pair_multiplier", self.fusion.pair_multiplier),
            ("fusion.bridge_bonus", self.fusion.bridge_bonus),
            ("trend.vote_base", self.trend.vote_base),
            ("trader_x.frequency_multiplier", self.trader_x.frequency_multiplier),
            ("supernova.sigma", self.supernova.sigma),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be a finite value >= 0"
                )));
            }
        }

        let fusion = &self.fusion;
        if !(0.0 < fusion.confidence_floor
            && fusion.confidence_floor < fusion.confidence_ceiling
            && fusion.confidence_ceiling <= 100.0)
        {
            return Err(ForecastError::Configuration(
                "confidence bounds MUST satisfy 0 < floor < ceiling <= 100".to_string(),
            ));
        }

        for (name, value) in [
            ("fusion.tie_confidence", fusion.tie_confidence),
            ("fusion.insufficient_confidence", fusion.insufficient_confidence),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(ForecastError::Configuration(format!(
                    "{name} MUST be in [0, 100]"
                )));
            }
        }

        Ok(())
    }

    /// Decodes and validates a ruleset from JSON.
    ///
    /// # Errors
    /// Returns [`ForecastError::Configuration`] when JSON decoding fails
    /// or decoded values violate ruleset constraints.
    pub fn from_json(value: &Value) -> Result<Self, ForecastError> {
        let ruleset: Self = serde_json::from_value(value.clone()).map_err(|err| {
            ForecastError::Configuration(format!("invalid ruleset JSON payload: {err}"))
        })?;
        ruleset.validate()?;
        Ok(ruleset)
    }
}

impl Default for EnsembleRuleset {
    fn default() -> Self {
        Self::v1()
    }
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
    fn v1_ruleset_is_valid() {
        must_ok(EnsembleRuleset::v1().validate());
    }

    #[test]
    fn dominant_models_carry_the_largest_weights() {
        let fusion = FusionParams::v1();
        assert!((fusion.base_weight(ModelId::ThanLuc) - 0.5).abs() < f64::EPSILON);
        assert!((fusion.base_weight(ModelId::PhapSu) - 0.3).abs() < f64::EPSILON);
        let total: f64 = ModelId::ALL.iter().map(|model| fusion.base_weight(*model)).sum();
        assert!((total - 1.8).abs() < 1e-9);
    }

    #[test]
    fn ruleset_json_round_trips() {
        let value = must_ok(serde_json::to_value(EnsembleRuleset::v1()));
        assert_eq!(value["fusion"]["base_weights"]["than_luc"], serde_json::json!(0.5));
        let decoded = must_ok(EnsembleRuleset::from_json(&value));
        assert_eq!(decoded, EnsembleRuleset::v1());
    }

    #[test]
    fn missing_base_weight_is_rejected() {
        let mut ruleset = EnsembleRuleset::v1();
        ruleset.fusion.base_weights.remove(&ModelId::Supernova);
        let err = ruleset.validate();
        assert!(matches!(err, Err(ForecastError::Configuration(message)) if message.contains("supernova")));
    }

    #[test]
    fn inverted_confidence_bounds_are_rejected() {
        let mut ruleset = EnsembleRuleset::v1();
        ruleset.fusion.confidence_floor = 99.99;
        ruleset.fusion.confidence_ceiling = 10.0;
        assert!(ruleset.validate().is_err());
    }

    #[test]
    fn zero_window_is_rejected() {
        let mut ruleset = EnsembleRuleset::v1();
        ruleset.supernova.window = 0;
        assert!(ruleset.validate().is_err());
    }

    #[test]
    fn malformed_json_maps_to_configuration_error() {
        let err = EnsembleRuleset::from_json(&serde_json::json!({"ruleset_version": 1}));
        assert!(matches!(err, Err(ForecastError::Configuration(_))));
    }
}
