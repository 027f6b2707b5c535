pub mod arc;
pub mod episode;
pub mod event;
pub mod ids;
pub mod molecule;
pub mod stats;
pub mod verb;
pub mod vibe;

pub use arc::ArcInstance;
pub use episode::{CastMember, Episode, LocationRef, SceneType};
pub use event::{CausalTag, Event, EventArchetype, EventKind};
pub use ids::{ArcInstanceId, EventId, MoleculeId, VerbId, VibeId};
pub use molecule::{Molecule, MoleculeKind, ReviewStatus, StatSource, TopologyRef};
pub use stats::{Axis, AxisWeights, StatVector};
pub use verb::Verb;
pub use vibe::{
    aggregation_policy, Atmosphere, DecayedBlend, LatestWins, Mood, Trend, Vibe, VibeAggregation,
};
pub use crate::utils::text::TextSpan;
