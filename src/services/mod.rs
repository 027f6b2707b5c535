pub mod arc;
pub mod chronicle;
pub mod classifier;
pub mod identity;
pub mod mechanics;
pub mod normalizer;
pub mod pipeline;
pub mod progress;
pub mod projector;
pub mod report;
pub mod segmenter;
pub mod topology;
pub mod vibe;
pub mod writer;

pub use arc::{ArcDetector, ArcReport};
pub use chronicle::{ChronicleBuilder, DraftEvent, LinkOutcome};
pub use classifier::{
    Candidate, ClassificationStrategy, Classifier, ClassifyQuery, Labeled, Selection, Thresholds,
    Tier,
};
pub use identity::{IdentityRegistry, Resolution};
pub use mechanics::{MechanicExtractor, MechanicVerdict, MechanicsCache};
pub use normalizer::{min_max_rescale, NormalizationOutcome, StatNormalizer};
pub use pipeline::Pipeline;
pub use progress::{noop_progress, LogProgressReporter, NoopProgressReporter, ProgressReporter};
pub use projector::SemanticProjector;
pub use report::{AtmosphereSummary, DocumentReport, EntityFailure, EpisodeSummary, ReviewItem};
pub use segmenter::Segmenter;
pub use topology::TopologyMatcher;
pub use vibe::{location_atmosphere, VibeProjector};
pub use writer::{CommitOutcome, CommitReport, GraphWriter, SettleReport, WorldEntity};
