use crate::peer::transport::NegotiationState;
use crate::types::IceCandidate;

/// A remote candidate may only reach the transport once the remote
/// description is applied and negotiation has settled.
pub fn can_apply(has_remote_description: bool, negotiation: NegotiationState) -> bool {
    has_remote_description && negotiation == NegotiationState::Stable
}

/// Remote candidates held back until [`can_apply`] holds, in arrival order
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<IceCandidate>,
}

impl CandidateBuffer {
    pub fn push(&mut self, candidate: IceCandidate) {
        self.pending.push(candidate);
    }

    /// Empties the buffer, oldest first
    pub fn take_all(&mut self) -> Vec<IceCandidate> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_requires_remote_and_stable() {
        assert!(can_apply(true, NegotiationState::Stable));
        assert!(!can_apply(false, NegotiationState::Stable));
        assert!(!can_apply(true, NegotiationState::HaveRemoteOffer));
        assert!(!can_apply(true, NegotiationState::HaveLocalOffer));
    }

    #[test]
    fn take_all_keeps_arrival_order_and_empties() {
        let mut buffer = CandidateBuffer::default();
        for c in ["c1", "c2", "c3"] {
            buffer.push(IceCandidate::new(c));
        }
        let drained: Vec<_> = buffer.take_all().into_iter().map(|c| c.candidate).collect();
        assert_eq!(drained, vec!["c1", "c2", "c3"]);
        assert!(buffer.is_empty());
        assert!(buffer.take_all().is_empty());
    }
}
