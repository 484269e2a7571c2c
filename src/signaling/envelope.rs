use crate::error::SignalingError;
use crate::types::{IceCandidate, Role, RoomId, SessionDescription};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DescriptionPayload {
    pub room: RoomId,
    pub description: SessionDescription,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CandidatePayload {
    pub room: RoomId,
    pub role: Role,
    pub candidate: IceCandidate,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ByePayload {
    pub room: RoomId,
}

/// One signaling event per socket message: `{"type": ..., "payload": ...}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum SignalEnvelope {
    Offer(DescriptionPayload),
    Answer(DescriptionPayload),
    Candidate(CandidatePayload),
    /// The caller deleted the room
    Bye(ByePayload),
}

impl SignalEnvelope {
    pub fn room(&self) -> &RoomId {
        match self {
            SignalEnvelope::Offer(p) | SignalEnvelope::Answer(p) => &p.room,
            SignalEnvelope::Candidate(p) => &p.room,
            SignalEnvelope::Bye(p) => &p.room,
        }
    }

    pub fn encode(&self) -> Result<String, SignalingError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(text: &str) -> Result<Self, SignalingError> {
        Ok(serde_json::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_is_type_and_payload() {
        let env = SignalEnvelope::Candidate(CandidatePayload {
            room: RoomId::new("r1"),
            role: Role::Callee,
            candidate: IceCandidate::new("candidate:1"),
        });
        let value: serde_json::Value = serde_json::from_str(&env.encode().unwrap()).unwrap();
        assert_eq!(value["type"], "candidate");
        assert_eq!(value["payload"]["role"], "callee");
        assert_eq!(value["payload"]["room"], "r1");
    }

    #[test]
    fn decodes_offer() {
        let text = json!({
            "type": "offer",
            "payload": {"room": "r9", "description": {"type": "offer", "sdp": "v=0"}}
        })
        .to_string();
        let env = SignalEnvelope::decode(&text).unwrap();
        assert_eq!(env.room().as_str(), "r9");
        assert!(matches!(env, SignalEnvelope::Offer(_)));
    }

    #[test]
    fn unknown_type_is_a_decode_error() {
        let err = SignalEnvelope::decode(r#"{"type":"hello","payload":{}}"#).unwrap_err();
        assert!(matches!(err, SignalingError::Decode(_)));
    }
}
