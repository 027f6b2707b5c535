//! Static entity-type bias tables applied after axis projection.

use crate::models::{AxisWeights, EventArchetype, MoleculeKind, Mood};
use crate::registries::ActionSystem;

/// What a piece of projected text describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Molecule(MoleculeKind),
    Event(EventArchetype),
    Action(ActionSystem),
    Vibe(Mood),
}

impl EntityType {
    pub fn bias(self) -> AxisWeights {
        match self {
            EntityType::Molecule(kind) => molecule_bias(kind),
            EntityType::Event(archetype) => event_bias(archetype),
            EntityType::Action(system) => action_bias(system),
            EntityType::Vibe(mood) => vibe_bias(mood),
        }
    }
}

pub fn molecule_bias(kind: MoleculeKind) -> AxisWeights {
    match kind {
        MoleculeKind::Agent => AxisWeights::new(0.5, 1.2, 1.2, 1.2),
        MoleculeKind::Group => AxisWeights::new(0.2, 0.8, 2.0, 1.0),
        MoleculeKind::Artifact | MoleculeKind::Commodity => AxisWeights::new(1.5, 0.5, 0.1, 0.3),
        MoleculeKind::Location => AxisWeights::new(1.2, 1.0, 0.5, 0.5),
        MoleculeKind::Construct => AxisWeights::new(0.1, 0.5, 0.8, 1.5),
        MoleculeKind::Lore => AxisWeights::new(0.0, 0.0, 0.5, 2.0),
    }
}

pub fn event_bias(archetype: EventArchetype) -> AxisWeights {
    match archetype {
        EventArchetype::ConflictPhysical => AxisWeights::new(1.1, 1.8, 0.4, 0.6),
        EventArchetype::ConflictSocial => AxisWeights::new(0.2, 0.6, 1.8, 1.2),
        EventArchetype::Discovery => AxisWeights::new(0.8, 0.5, 0.3, 1.5),
        EventArchetype::Transition => AxisWeights::new(1.0, 1.2, 0.5, 0.5),
        EventArchetype::Creation => AxisWeights::new(1.3, 0.6, 0.4, 1.4),
        EventArchetype::Memory => AxisWeights::new(0.4, 0.6, 0.8, 1.4),
        EventArchetype::Generic => AxisWeights::NEUTRAL,
    }
}

pub fn action_bias(system: ActionSystem) -> AxisWeights {
    match system {
        ActionSystem::Combat => AxisWeights::new(1.2, 1.5, 0.3, 0.6),
        ActionSystem::Magic => AxisWeights::new(0.5, 0.8, 0.5, 1.8),
        ActionSystem::Social => AxisWeights::new(0.2, 0.5, 1.8, 1.2),
        ActionSystem::Explore => AxisWeights::new(1.0, 1.0, 0.2, 1.5),
        ActionSystem::Stealth => AxisWeights::new(0.5, 0.8, 0.5, 1.5),
        ActionSystem::Flavor => AxisWeights::new(0.8, 0.8, 0.8, 0.8),
    }
}

pub fn vibe_bias(mood: Mood) -> AxisWeights {
    match mood {
        Mood::Fear => AxisWeights::new(0.5, 0.3, 0.2, 2.0),
        Mood::Tension => AxisWeights::new(0.8, 1.2, 0.5, 1.5),
        Mood::Wonder => AxisWeights::new(0.5, 0.5, 1.2, 1.8),
        Mood::Decay => AxisWeights::new(1.5, -0.5, 0.1, 0.5),
        Mood::Neutral => AxisWeights::NEUTRAL,
    }
}
