use serde::{Deserialize, Serialize};

use crate::models::ids::{EventId, MoleculeId, VerbId};
use crate::models::stats::StatVector;
use crate::utils::text::TextSpan;

/// A mechanic occurrence mapped to a closed-registry Game Primitive.
/// Immutable once committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verb {
    pub id: VerbId,
    pub primitive_id: String,
    /// Surface phrase as narrated ("slashed at").
    pub phrase: String,
    pub span: TextSpan,
    pub actor: MoleculeId,
    #[serde(default)]
    pub target: Option<MoleculeId>,
    pub episode_index: usize,
    #[serde(default)]
    pub event_id: Option<EventId>,
    pub stats: StatVector,
}
