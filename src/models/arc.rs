use serde::{Deserialize, Serialize};

use crate::models::ids::{ArcInstanceId, EventId};

/// A run of consecutive main-chain Events matching one trope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcInstance {
    pub id: ArcInstanceId,
    pub document_id: String,
    pub trope_id: String,
    pub label: String,
    /// Events in chain order.
    pub events: Vec<EventId>,
    /// Best window similarity.
    pub score: f32,
}
