use crate::config::DEFAULT_LOG_FILTER;
use crate::types::IceCandidate;
use std::fmt;
use tracing::{debug, warn};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::EnvFilter;

/// Local wall-clock timestamps with millisecond precision
struct LocalTimestamp;

impl FormatTime for LocalTimestamp {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
    }
}

/// Installs the global subscriber. Safe to call more than once.
pub fn init() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(LocalTimestamp)
        .with_target(false)
        .try_init();
}

/// Trickle-ICE trace of a candidate as it is produced or received
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index, cand.username_fragment
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateMix {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn candidate_kind_counts(candidates: &[IceCandidate]) -> CandidateMix {
    let mut mix = CandidateMix::default();
    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            mix.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            mix.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            mix.relay += 1;
        }
    }

    debug!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        mix.host, mix.srflx, mix.relay
    );
    if !candidates.is_empty() && mix.relay == 0 {
        warn!("No TURN relay candidates found, connection through strict NAT may fail");
    }
    mix
}
