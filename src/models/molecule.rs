use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::ids::MoleculeId;
use crate::models::stats::StatVector;

/// Subtype of a Molecule.
///
/// `Artifact` is unique (the Vorpal Sword), `Commodity` is fungible (gold coins).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MoleculeKind {
    Agent,
    Group,
    Artifact,
    Commodity,
    Location,
    Construct,
    Lore,
}

impl MoleculeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MoleculeKind::Agent => "agent",
            MoleculeKind::Group => "group",
            MoleculeKind::Artifact => "artifact",
            MoleculeKind::Commodity => "commodity",
            MoleculeKind::Location => "location",
            MoleculeKind::Construct => "construct",
            MoleculeKind::Lore => "lore",
        }
    }

    /// Kinds that may name the same referent. Extraction often confuses an
    /// artifact with a commodity, or a construct with lore.
    pub fn is_compatible(self, other: MoleculeKind) -> bool {
        use MoleculeKind::*;
        self == other
            || matches!(
                (self, other),
                (Artifact, Commodity) | (Commodity, Artifact) | (Construct, Lore) | (Lore, Construct)
            )
    }
}

/// Location binding to a Topology Template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TopologyRef {
    /// No template matched yet; may be promoted later.
    Stub,
    Template { template_id: String, name: String },
}

/// Where a Molecule's current stats came from. Extracted stats always win
/// over template stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatSource {
    Unset,
    Template,
    Extracted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReviewStatus {
    Confirmed,
    NeedsReview { reason: String },
}

impl ReviewStatus {
    pub fn needs_review(&self) -> bool {
        matches!(self, ReviewStatus::NeedsReview { .. })
    }
}

/// A persistent world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Molecule {
    pub id: MoleculeId,
    pub name: String,
    /// Normalized surface forms; append-only.
    pub aliases: BTreeSet<String>,
    pub kind: MoleculeKind,
    #[serde(default)]
    pub description: Option<String>,
    /// Only meaningful for `MoleculeKind::Location`.
    #[serde(default)]
    pub topology: Option<TopologyRef>,
    /// Static properties inherited from a template.
    #[serde(default)]
    pub properties: Vec<String>,
    pub stats: StatVector,
    pub stat_source: StatSource,
    /// Number of projected samples folded into `stats`.
    #[serde(default)]
    pub stat_samples: u32,
    /// Running mean before normalization. `Some` only while `stats` holds
    /// its rescaled value; any new sample clears it.
    #[serde(default)]
    pub raw_stats: Option<StatVector>,
    /// Document whose run minted this Molecule.
    #[serde(default)]
    pub document_id: Option<String>,
    pub status: ReviewStatus,
}

impl Molecule {
    pub fn new(name: impl Into<String>, kind: MoleculeKind) -> Self {
        let name = name.into();
        let topology = (kind == MoleculeKind::Location).then_some(TopologyRef::Stub);
        Self {
            id: MoleculeId::mint(),
            aliases: BTreeSet::new(),
            name,
            kind,
            description: None,
            topology,
            properties: Vec::new(),
            stats: StatVector::default(),
            stat_source: StatSource::Unset,
            stat_samples: 0,
            raw_stats: None,
            document_id: None,
            status: ReviewStatus::Confirmed,
        }
    }

    pub fn is_stub_location(&self) -> bool {
        matches!(self.topology, Some(TopologyRef::Stub))
    }

    /// Stats as they were before the last normalization.
    pub fn unnormalized_stats(&self) -> StatVector {
        self.raw_stats.unwrap_or(self.stats)
    }

    pub fn is_normalized(&self) -> bool {
        self.raw_stats.is_some()
    }

    /// Text used for embedding and stat projection.
    pub fn semantic_text(&self) -> String {
        match &self.description {
            Some(d) if !d.is_empty() => format!("{} ({}): {}", self.name, self.kind.as_str(), d),
            _ => format!("{} ({})", self.name, self.kind.as_str()),
        }
    }
}
