use std::collections::BTreeSet;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::models::ids::{EventId, MoleculeId};
use crate::models::stats::StatVector;
use crate::utils::text::TextSpan;

/// How a beat relates causally to what came before.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CausalTag {
    /// Immediate consequence of the previous beat.
    Direct,
    /// Made possible by an earlier beat.
    Enable,
    /// Driven by a character's motive formed earlier.
    Motivate,
}

/// Coarse event category; selects the stat bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum EventArchetype {
    ConflictPhysical,
    ConflictSocial,
    Discovery,
    Transition,
    Creation,
    Memory,
    Generic,
}

impl EventArchetype {
    pub fn as_str(self) -> &'static str {
        match self {
            EventArchetype::ConflictPhysical => "conflict_physical",
            EventArchetype::ConflictSocial => "conflict_social",
            EventArchetype::Discovery => "discovery",
            EventArchetype::Transition => "transition",
            EventArchetype::Creation => "creation",
            EventArchetype::Memory => "memory",
            EventArchetype::Generic => "generic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Directly narrated; lives on the main chain.
    Narrated,
    /// Known only through a backward reference; no chain position yet.
    DetachedMemory,
}

/// A chronology beat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub document_id: String,
    pub kind: EventKind,
    /// Position on the main chain. `None` while detached.
    pub sequence: Option<u64>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub span: Option<TextSpan>,
    #[serde(default)]
    pub episode_index: Option<usize>,
    pub flashback: bool,
    #[serde(default)]
    pub causal_tags: Vec<CausalTag>,
    pub archetype: EventArchetype,
    #[serde(default)]
    pub participants: Vec<MoleculeId>,
    #[serde(default)]
    pub location: Option<MoleculeId>,
    #[serde(default)]
    pub arcs: BTreeSet<String>,
    pub stats: StatVector,
}

impl Event {
    pub fn is_detached(&self) -> bool {
        self.kind == EventKind::DetachedMemory && self.sequence.is_none()
    }

    pub fn semantic_text(&self) -> String {
        if self.description.is_empty() {
            self.title.clone()
        } else {
            format!("{}: {}", self.title, self.description)
        }
    }
}
