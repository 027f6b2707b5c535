//! Stat Normalizer: per-document min-max rescaling of Molecule stats.
//!
//! Guarded by a one-shot marker node (`normalization:{document_id}`): once
//! it exists and every Molecule still holds normalized stats, a second pass
//! changes nothing. Rescaling always reads the pre-normalization running
//! means, never already-rescaled values, so Molecules refined or added by a
//! later run of the same document are folded in by rescaling the whole
//! document again.

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::models::{Axis, StatVector};
use crate::services::identity::IdentityRegistry;
use crate::services::report::EntityFailure;
use crate::services::writer::{CommitOutcome, GraphWriter, WorldEntity};
use crate::store::Payload;
use crate::TaleforgeError;

/// Per-axis (min, max) before rescaling, in `Axis::ALL` order.
pub type AxisRanges = [(f32, f32); 4];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum NormalizationOutcome {
    Normalized {
        molecules: usize,
        ranges: AxisRanges,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        failures: Vec<EntityFailure>,
    },
    /// The document's marker already existed and no Molecule changed since;
    /// nothing was touched.
    AlreadyNormalized,
    Skipped,
}

pub fn marker_id(document_id: &str) -> String {
    format!("normalization:{document_id}")
}

/// Rescale each axis so its observed max is 1.0 and min is 0.0. An axis
/// with no spread maps every value to 0.5.
pub fn min_max_rescale(values: &[StatVector]) -> (Vec<StatVector>, AxisRanges) {
    let mut ranges = [(0.0f32, 0.0f32); 4];
    for axis in Axis::ALL {
        let i = axis.index();
        let (min, max) = values.iter().map(|v| v.get(axis)).fold(
            (f32::INFINITY, f32::NEG_INFINITY),
            |(lo, hi), x| (lo.min(x), hi.max(x)),
        );
        ranges[i] = if values.is_empty() { (0.0, 0.0) } else { (min, max) };
    }

    let rescaled = values
        .iter()
        .map(|v| {
            let mut out = *v;
            for axis in Axis::ALL {
                let (min, max) = ranges[axis.index()];
                let spread = max - min;
                let value = if spread <= f32::EPSILON {
                    0.5
                } else {
                    (v.get(axis) - min) / spread
                };
                out.set(axis, value);
            }
            out
        })
        .collect();
    (rescaled, ranges)
}

pub struct StatNormalizer<'a> {
    identity: &'a IdentityRegistry,
    writer: &'a GraphWriter,
}

impl<'a> StatNormalizer<'a> {
    pub fn new(identity: &'a IdentityRegistry, writer: &'a GraphWriter) -> Self {
        Self { identity, writer }
    }

    /// `normalize(all_molecule_stats)`. A no-op once the document is
    /// normalized and unchanged.
    pub async fn normalize(&self, document_id: &str) -> Result<NormalizationOutcome, TaleforgeError> {
        let molecules = self.identity.molecules();
        let changed = molecules.iter().filter(|m| !m.is_normalized()).count();

        let mut properties = Payload::new();
        properties.insert("document_id".into(), json!(document_id));
        properties.insert("molecules".into(), json!(molecules.len()));
        properties.insert("normalized_at".into(), json!(chrono::Utc::now().to_rfc3339()));
        let claimed = self
            .writer
            .claim_marker(&marker_id(document_id), properties)
            .await?;
        if !claimed {
            if changed == 0 {
                warn!(document = document_id, "stats already normalized, skipping");
                return Ok(NormalizationOutcome::AlreadyNormalized);
            }
            info!(
                document = document_id,
                changed, "molecules changed since the last normalization, rescaling from raw stats"
            );
        }

        let stats: Vec<StatVector> = molecules.iter().map(|m| m.unnormalized_stats()).collect();
        let (rescaled, ranges) = min_max_rescale(&stats);

        let mut failures = Vec::new();
        for ((mut molecule, raw), new_stats) in molecules.into_iter().zip(stats.iter().copied()).zip(rescaled) {
            self.identity.apply_normalized(&molecule.id, raw, new_stats);
            molecule.stats = new_stats;
            molecule.raw_stats = Some(raw);
            let id = molecule.id.to_string();
            let vector = self.identity.embedding(&molecule.id);
            match self
                .writer
                .commit(WorldEntity::Molecule { molecule, vector })
                .await
            {
                Ok(CommitOutcome::Ack) => {}
                Ok(CommitOutcome::Retry(e)) | Err(e) => {
                    warn!(molecule = %id, error = %e, "normalized stats not written");
                    failures.push(EntityFailure::new(id, &e));
                }
            }
        }

        info!(
            document = document_id,
            molecules = stats.len(),
            failures = failures.len(),
            "Stats normalized"
        );
        Ok(NormalizationOutcome::Normalized {
            molecules: stats.len(),
            ranges,
            failures,
        })
    }
}
