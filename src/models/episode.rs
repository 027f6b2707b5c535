use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::ids::MoleculeId;
use crate::utils::text::TextSpan;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SceneType {
    Physical,
    Memory,
    Dream,
    Document,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRef {
    pub id: MoleculeId,
    pub name: String,
    /// True while no Topology Template is bound.
    pub stub: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CastMember {
    pub id: MoleculeId,
    pub name: String,
}

/// A contiguous scene of the source document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Episode {
    pub index: usize,
    pub span: TextSpan,
    pub text: String,
    pub label: String,
    pub scene_type: SceneType,
    pub location: LocationRef,
    #[serde(default)]
    pub cast: Vec<CastMember>,
}
