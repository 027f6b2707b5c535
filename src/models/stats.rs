use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::utils::math::clamp_unit;

/// One of the four game axes every entity is scored on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Axis {
    Material,
    Vitality,
    Social,
    Cognitive,
}

impl Axis {
    pub const ALL: [Axis; 4] = [Axis::Material, Axis::Vitality, Axis::Social, Axis::Cognitive];

    pub fn index(self) -> usize {
        match self {
            Axis::Material => 0,
            Axis::Vitality => 1,
            Axis::Social => 2,
            Axis::Cognitive => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Axis::Material => "material",
            Axis::Vitality => "vitality",
            Axis::Social => "social",
            Axis::Cognitive => "cognitive",
        }
    }
}

/// Four bounded scores in `[0, 1]`.
///
/// Values are locally comparable after projection and globally comparable
/// only after the per-document normalization pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct StatVector {
    pub material: f32,
    pub vitality: f32,
    pub social: f32,
    pub cognitive: f32,
}

impl Default for StatVector {
    fn default() -> Self {
        Self::splat(0.5)
    }
}

impl StatVector {
    pub fn new(material: f32, vitality: f32, social: f32, cognitive: f32) -> Self {
        Self {
            material,
            vitality,
            social,
            cognitive,
        }
        .clamped()
    }

    pub fn splat(v: f32) -> Self {
        Self::new(v, v, v, v)
    }

    pub fn from_array(values: [f32; 4]) -> Self {
        Self::new(values[0], values[1], values[2], values[3])
    }

    pub fn to_array(self) -> [f32; 4] {
        [self.material, self.vitality, self.social, self.cognitive]
    }

    pub fn get(&self, axis: Axis) -> f32 {
        self.to_array()[axis.index()]
    }

    pub fn set(&mut self, axis: Axis, value: f32) {
        let mut values = self.to_array();
        values[axis.index()] = value;
        *self = Self::from_array(values);
    }

    pub fn clamped(self) -> Self {
        Self {
            material: clamp_unit(self.material),
            vitality: clamp_unit(self.vitality),
            social: clamp_unit(self.social),
            cognitive: clamp_unit(self.cognitive),
        }
    }

    /// Multiply each axis by its weight, then clamp.
    pub fn weighted(self, weights: &AxisWeights) -> Self {
        let v = self.to_array();
        let w = weights.0;
        Self::from_array([v[0] * w[0], v[1] * w[1], v[2] * w[2], v[3] * w[3]])
    }

    /// Incremental mean: fold `sample` into a mean of `count` prior samples.
    pub fn running_mean(self, sample: StatVector, count: u32) -> Self {
        let n = count as f32;
        let mut out = self.to_array();
        for (acc, b) in out.iter_mut().zip(sample.to_array()) {
            *acc = (*acc * n + b) / (n + 1.0);
        }
        Self::from_array(out)
    }

    /// Weighted blend of several vectors. `None` if weights sum to zero.
    pub fn blend(items: &[(StatVector, f32)]) -> Option<Self> {
        let total: f32 = items.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return None;
        }
        let mut out = [0.0; 4];
        for (stats, w) in items {
            for (acc, v) in out.iter_mut().zip(stats.to_array()) {
                *acc += v * w / total;
            }
        }
        Some(Self::from_array(out))
    }

    /// Mean absolute distance from the neutral midpoint, scaled to `[0, 1]`.
    pub fn deviation_from_neutral(&self) -> f32 {
        let sum: f32 = self.to_array().iter().map(|v| (v - 0.5).abs()).sum();
        clamp_unit(sum / 4.0 * 2.0)
    }
}

/// Per-axis multipliers from the static bias tables. May exceed 1 or go
/// negative; the result is clamped after weighting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisWeights(pub [f32; 4]);

impl AxisWeights {
    pub const NEUTRAL: AxisWeights = AxisWeights([1.0, 1.0, 1.0, 1.0]);

    pub const fn new(material: f32, vitality: f32, social: f32, cognitive: f32) -> Self {
        Self([material, vitality, social, cognitive])
    }
}
