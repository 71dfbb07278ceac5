use serde::{Deserialize, Serialize};

use crate::predictors::Verdict;
use crate::ruleset::FusionParams;
use crate::{Call, ModelId, Side};

/// Members whose rationale is always quoted, in quoting order.
const QUOTED_MODELS: [ModelId; 6] = [
    ModelId::ThanLuc,
    ModelId::PhapSu,
    ModelId::TraderX,
    ModelId::Supernova,
    ModelId::Vannhat,
    ModelId::Bridge,
];

/// One member's verdict with its accuracy-adjusted weight.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelVote {
    pub model: ModelId,
    pub verdict: Verdict,
    pub weight: f64,
}

impl ModelVote {
    fn side(&self) -> Option<Side> {
        self.verdict.call.side()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum PatternLabel {
    #[serde(rename = "insufficient data")]
    InsufficientData,
    #[serde(rename = "unstable market")]
    UnstableMarket,
    #[serde(rename = "composite")]
    Composite,
}

impl PatternLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient data",
            Self::UnstableMarket => "unstable market",
            Self::Composite => "composite",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq)]
pub enum StatusLabel {
    #[serde(rename = "divine-unbounded")]
    DivineUnbounded,
    #[serde(rename = "divine-absolute")]
    DivineAbsolute,
    #[serde(rename = "auto-win")]
    AutoWin,
    #[serde(rename = "top-secret")]
    TopSecret,
    #[serde(rename = "super-vip")]
    SuperVip,
    #[serde(rename = "absolute")]
    Absolute,
    #[serde(rename = "high")]
    High,
    #[serde(rename = "high risk")]
    HighRisk,
    #[serde(rename = "medium risk")]
    MediumRisk,
    #[serde(rename = "medium risk (cache)")]
    MediumRiskCache,
}

impl StatusLabel {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DivineUnbounded => "divine-unbounded",
            Self::DivineAbsolute => "divine-absolute",
            Self::AutoWin => "auto-win",
            Self::TopSecret => "top-secret",
            Self::SuperVip => "super-vip",
            Self::Absolute => "absolute",
            Self::High => "high",
            Self::HighRisk => "high risk",
            Self::MediumRisk => "medium risk",
            Self::MediumRiskCache => "medium risk (cache)",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelContribution {
    pub model: ModelId,
    pub call: Side,
    pub weight: f64,
}

/// The ensemble's single decision for the next round.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub next_round: Option<u64>,
    pub call: Call,
    pub confidence: f64,
    pub rationale: String,
    pub pattern: PatternLabel,
    pub status: StatusLabel,
    #[serde(default)]
    pub contributions: Vec<ModelContribution>,
}

impl Forecast {
    /// Fixed response while the history is below the ensemble minimum.
    #[must_use]
    pub fn insufficient(next_round: Option<u64>, params: &FusionParams) -> Self {
        Self {
            next_round,
            call: Call::Abstain,
            confidence: params.insufficient_confidence,
            rationale: "not enough history for a full analysis, waiting for more rounds".to_string(),
            pattern: PatternLabel::InsufficientData,
            status: StatusLabel::HighRisk,
            contributions: Vec::new(),
        }
    }

    fn conflicting(next_round: Option<u64>, params: &FusionParams) -> Self {
        Self {
            next_round,
            call: Call::Abstain,
            confidence: params.tie_confidence,
            rationale: "models conflict or show no clear signal".to_string(),
            pattern: PatternLabel::UnstableMarket,
            status: StatusLabel::MediumRisk,
            contributions: Vec::new(),
        }
    }

    /// Marks a forecast computed from cached history after an upstream failure.
    #[must_use]
    pub fn into_stale(mut self) -> Self {
        self.rationale = format!("(stale) {}", self.rationale);
        self.status = StatusLabel::MediumRiskCache;
        self
    }

    #[must_use]
    pub fn is_decided(&self) -> bool {
        !self.call.is_abstain()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Agreement {
    /// Exactly four active dominant members, all on one side.
    Unanimous(Side),
    /// Exactly three active dominant members, all on one side.
    Triple(Side),
    /// Trader-X and Supernova agree.
    Pair(Side),
    None,
}

fn dominant_agreement(votes: &[ModelVote]) -> Agreement {
    let active: Vec<Side> = votes
        .iter()
        .filter(|vote| ModelId::DOMINANT.contains(&vote.model))
        .filter_map(ModelVote::side)
        .collect();

    let unanimous = active.first().filter(|first| active.iter().all(|side| side == *first));
    match (active.len(), unanimous) {
        (4, Some(side)) => return Agreement::Unanimous(*side),
        (3, Some(side)) => return Agreement::Triple(*side),
        _ => {}
    }

    let side_of = |model| votes.iter().find(|vote| vote.model == model).and_then(ModelVote::side);
    match (side_of(ModelId::TraderX), side_of(ModelId::Supernova)) {
        (Some(trader), Some(nova)) if trader == nova => Agreement::Pair(trader),
        _ => Agreement::None,
    }
}

/// Fuses the members' votes into one forecast.
///
/// `votes` should hold every member, abstaining ones included, in registry
/// order; their order breaks ties when naming the strongest contributor.
#[must_use]
pub fn fuse(next_round: Option<u64>, votes: &[ModelVote], unstable: bool, params: &FusionParams) -> Forecast {
    let mut tai = 0.0;
    let mut xiu = 0.0;
    let mut tai_votes = 0;
    let mut xiu_votes = 0;
    for vote in votes {
        match vote.side() {
            Some(Side::Tai) => {
                tai += vote.weight;
                tai_votes += 1;
            }
            Some(Side::Xiu) => {
                xiu += vote.weight;
                xiu_votes += 1;
            }
            None => {}
        }
    }

    if tai_votes >= params.consensus_votes {
        tai += params.consensus_bonus;
    }
    if xiu_votes >= params.consensus_votes {
        xiu += params.consensus_bonus;
    }

    let agreement = dominant_agreement(votes);
    let escalation = match agreement {
        Agreement::Unanimous(side) => Some((side, params.unanimous_multiplier)),
        Agreement::Triple(side) => Some((side, params.triple_multiplier)),
        Agreement::Pair(side) => Some((side, params.pair_multiplier)),
        Agreement::None => None,
    };
    match escalation {
        Some((Side::Tai, factor)) => tai *= factor,
        Some((Side::Xiu, factor)) => xiu *= factor,
        None => {}
    }

    if unstable {
        tai *= params.unstable_damping;
        xiu *= params.unstable_damping;
    }

    if let Some(bridge) = votes.iter().find(|vote| vote.model == ModelId::Bridge) {
        if bridge.verdict.auxiliary.unwrap_or(0.0) > params.bridge_bonus_threshold {
            match bridge.side() {
                Some(Side::Tai) => tai += params.bridge_bonus,
                Some(Side::Xiu) => xiu += params.bridge_bonus,
                None => {}
            }
        }
    }

    let (call, winning) = if tai > xiu {
        (Side::Tai, tai)
    } else if xiu > tai {
        (Side::Xiu, xiu)
    } else {
        return Forecast::conflicting(next_round, params);
    };

    let confidence = (winning / (tai + xiu) * 100.0).clamp(params.confidence_floor, params.confidence_ceiling);
    let status = match agreement {
        Agreement::Unanimous(_) => StatusLabel::DivineUnbounded,
        Agreement::Triple(_) => StatusLabel::DivineAbsolute,
        _ if confidence > 99.0 => StatusLabel::AutoWin,
        _ if confidence > 95.0 => StatusLabel::TopSecret,
        _ if confidence > 90.0 => StatusLabel::SuperVip,
        _ if confidence > 80.0 => StatusLabel::Absolute,
        _ => StatusLabel::High,
    };

    Forecast {
        next_round,
        call: call.into(),
        confidence: (confidence * 100.0).round() / 100.0,
        rationale: compose_rationale(votes),
        pattern: PatternLabel::Composite,
        status,
        contributions: votes
            .iter()
            .filter_map(|vote| {
                vote.side().map(|call| ModelContribution {
                    model: vote.model,
                    call,
                    weight: vote.weight,
                })
            })
            .collect(),
    }
}

fn compose_rationale(votes: &[ModelVote]) -> String {
    let find = |model| votes.iter().find(|vote| vote.model == model);

    let mut parts: Vec<String> = QUOTED_MODELS
        .iter()
        .filter_map(|model| find(*model))
        .map(|vote| vote.verdict.rationale.clone())
        .collect();

    if let Some(cycle) = find(ModelId::DeepCycle).filter(|vote| vote.side().is_some()) {
        parts.push(cycle.verdict.rationale.clone());
    }

    let mut strongest: Option<&ModelVote> = None;
    for vote in votes.iter().filter(|vote| vote.side().is_some()) {
        if strongest.map_or(true, |best| vote.weight > best.weight) {
            strongest = Some(vote);
        }
    }
    if let Some(vote) = strongest {
        parts.push(format!("strongest model: {} with weight {:.2}", vote.model, vote.weight));
    }

    parts.join(" | ")
}
