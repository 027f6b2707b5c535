//! Atmospheric snippets and their read-time aggregation.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::config::VibeAggregationConfig;
use crate::models::ids::{MoleculeId, VibeId};
use crate::models::stats::StatVector;
use crate::utils::math::centroid;
use crate::utils::text::TextSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Steady,
}

/// Dominant mood of an atmospheric snippet; selects the stat bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Mood {
    Fear,
    Tension,
    Wonder,
    Decay,
    Neutral,
}

impl Mood {
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Fear => "fear",
            Mood::Tension => "tension",
            Mood::Wonder => "wonder",
            Mood::Decay => "decay",
            Mood::Neutral => "neutral",
        }
    }
}

/// One atmospheric mention, attached to exactly one Location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vibe {
    pub id: VibeId,
    pub location_id: MoleculeId,
    pub text: String,
    pub span: TextSpan,
    pub mood: Mood,
    pub embedding: Vec<f32>,
    pub intensity: f32,
    pub trend: Trend,
    /// Narrative time: the episode index the snippet came from.
    pub tick: u64,
    pub stats: StatVector,
}

/// Aggregated view of a Location's Vibes at read time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Atmosphere {
    pub location_id: MoleculeId,
    pub mood: Mood,
    pub intensity: f32,
    pub stats: StatVector,
    pub embedding: Vec<f32>,
    pub samples: usize,
}

/// Read-time aggregation of a Location's Vibe history.
pub trait VibeAggregation: Send + Sync {
    /// `vibes` must all belong to one Location. Returns `None` when empty.
    fn aggregate(&self, vibes: &[Vibe]) -> Option<Atmosphere>;
}

/// The newest Vibe describes the Location.
pub struct LatestWins;

impl VibeAggregation for LatestWins {
    fn aggregate(&self, vibes: &[Vibe]) -> Option<Atmosphere> {
        let latest = vibes.iter().max_by_key(|v| v.tick)?;
        Some(Atmosphere {
            location_id: latest.location_id.clone(),
            mood: latest.mood,
            intensity: latest.intensity,
            stats: latest.stats,
            embedding: latest.embedding.clone(),
            samples: vibes.len(),
        })
    }
}

/// Exponentially decayed blend; a Vibe `half_life` ticks older than the
/// newest counts half as much.
pub struct DecayedBlend {
    pub half_life: f32,
}

impl VibeAggregation for DecayedBlend {
    fn aggregate(&self, vibes: &[Vibe]) -> Option<Atmosphere> {
        let latest = vibes.iter().max_by_key(|v| v.tick)?;
        let half_life = self.half_life.max(f32::EPSILON);
        let weights: Vec<f32> = vibes
            .iter()
            .map(|v| 0.5f32.powf(latest.tick.saturating_sub(v.tick) as f32 / half_life))
            .collect();
        let total: f32 = weights.iter().sum();

        let stats = StatVector::blend(
            &vibes
                .iter()
                .zip(&weights)
                .map(|(v, w)| (v.stats, *w))
                .collect::<Vec<_>>(),
        )?;
        let intensity = vibes
            .iter()
            .zip(&weights)
            .map(|(v, w)| v.intensity * w)
            .sum::<f32>()
            / total;
        let weighted: Vec<Vec<f32>> = vibes
            .iter()
            .zip(&weights)
            .map(|(v, w)| v.embedding.iter().map(|x| x * w * vibes.len() as f32 / total).collect())
            .collect();

        Some(Atmosphere {
            location_id: latest.location_id.clone(),
            mood: latest.mood,
            intensity,
            stats,
            embedding: centroid(&weighted).unwrap_or_default(),
            samples: vibes.len(),
        })
    }
}

/// Build the configured aggregation policy.
pub fn aggregation_policy(config: VibeAggregationConfig) -> Box<dyn VibeAggregation> {
    match config {
        VibeAggregationConfig::LatestWins => Box::new(LatestWins),
        VibeAggregationConfig::DecayedBlend { half_life } => Box::new(DecayedBlend { half_life }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vibe(tick: u64, intensity: f32, stat: f32) -> Vibe {
        Vibe {
            id: VibeId::mint(),
            location_id: MoleculeId::from("mol-tower"),
            text: format!("tick {tick}"),
            span: TextSpan::new(0, 1),
            mood: if tick == 0 { Mood::Wonder } else { Mood::Fear },
            embedding: vec![stat, 1.0 - stat],
            intensity,
            trend: Trend::Steady,
            tick,
            stats: StatVector::splat(stat),
        }
    }

    #[test]
    fn test_latest_wins_picks_newest_tick() {
        let vibes = vec![vibe(3, 0.9, 0.9), vibe(0, 0.1, 0.1)];
        let atmosphere = LatestWins.aggregate(&vibes).unwrap();
        assert_eq!(atmosphere.intensity, 0.9);
        assert_eq!(atmosphere.mood, Mood::Fear);
        assert_eq!(atmosphere.samples, 2);
    }

    #[test]
    fn test_decayed_blend_favors_recent() {
        let vibes = vec![vibe(0, 0.0, 0.0), vibe(1, 1.0, 1.0)];
        let atmosphere = DecayedBlend { half_life: 1.0 }.aggregate(&vibes).unwrap();
        // weights 0.5 and 1.0
        assert!((atmosphere.intensity - 2.0 / 3.0).abs() < 1e-5);
        assert!((atmosphere.stats.material - 2.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_empty_history() {
        assert!(LatestWins.aggregate(&[]).is_none());
        assert!(DecayedBlend { half_life: 2.0 }.aggregate(&[]).is_none());
    }
}
