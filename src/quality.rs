//! Coarse connection health derived from the ICE connection state.

use crate::peer::transport::TransportState;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    Good,
    Medium,
    Poor,
}

/// Nominated candidate pair, informational only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathStats {
    pub local_candidate_id: String,
    pub remote_candidate_id: String,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QualityReading {
    pub tier: QualityTier,
    pub state: TransportState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathStats>,
}

pub fn tier_for(state: TransportState) -> QualityTier {
    match state {
        TransportState::Connected | TransportState::Completed => QualityTier::Good,
        TransportState::Checking => QualityTier::Medium,
        TransportState::New
        | TransportState::Disconnected
        | TransportState::Failed
        | TransportState::Closed => QualityTier::Poor,
    }
}

pub fn reading_for(state: TransportState, path: Option<PathStats>) -> QualityReading {
    let tier = tier_for(state);
    QualityReading {
        tier,
        state,
        // stats only enrich good readings
        path: if tier == QualityTier::Good { path } else { None },
    }
}
