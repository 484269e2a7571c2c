//! webrtc-rs backed peer transport.

use crate::error::TransportError;
use crate::peer::media::LocalMedia;
use crate::peer::transport::{
    NegotiationState, PeerTransport, TransportEvent, TransportEventSink, TransportFactory,
    TransportState,
};
use crate::quality::PathStats;
use crate::types::{IceCandidate, IceServerConfig, SdpKind, SessionDescription};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::offer_answer_options::RTCOfferOptions;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::signaling_state::RTCSignalingState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

const ICE_CANDIDATE_POOL_SIZE: u8 = 10;

/// Peer connection config for the given STUN/TURN servers
pub fn rtc_config(servers: &[IceServerConfig]) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: servers.iter().map(to_rtc_server).collect(),
        ice_candidate_pool_size: ICE_CANDIDATE_POOL_SIZE,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn to_rtc_server(server: &IceServerConfig) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
    }
}

fn to_rtc_description(desc: &SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let parsed = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.body.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(desc.body.clone()),
    };
    parsed.map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<TransportState> {
    Some(match state {
        RTCIceConnectionState::New => TransportState::New,
        RTCIceConnectionState::Checking => TransportState::Checking,
        RTCIceConnectionState::Connected => TransportState::Connected,
        RTCIceConnectionState::Completed => TransportState::Completed,
        RTCIceConnectionState::Disconnected => TransportState::Disconnected,
        RTCIceConnectionState::Failed => TransportState::Failed,
        RTCIceConnectionState::Closed => TransportState::Closed,
        RTCIceConnectionState::Unspecified => return None,
    })
}

fn map_signaling_state(state: RTCSignalingState) -> Option<NegotiationState> {
    Some(match state {
        RTCSignalingState::Stable => NegotiationState::Stable,
        RTCSignalingState::HaveLocalOffer => NegotiationState::HaveLocalOffer,
        RTCSignalingState::HaveRemoteOffer => NegotiationState::HaveRemoteOffer,
        RTCSignalingState::HaveLocalPranswer => NegotiationState::HaveLocalPranswer,
        RTCSignalingState::HaveRemotePranswer => NegotiationState::HaveRemotePranswer,
        RTCSignalingState::Closed => NegotiationState::Closed,
        RTCSignalingState::Unspecified => return None,
    })
}

fn from_candidate_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

pub struct RtcTransportFactory {
    api: API,
}

impl RtcTransportFactory {
    pub fn new() -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();
        Ok(Self { api })
    }
}

#[async_trait]
impl TransportFactory for RtcTransportFactory {
    async fn create(
        &self,
        servers: &[IceServerConfig],
        events: TransportEventSink,
    ) -> Result<Arc<dyn PeerTransport>, TransportError> {
        let pc = Arc::new(self.api.new_peer_connection(rtc_config(servers)).await?);
        debug!("Peer connection created with {} ICE servers", servers.len());

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
            let sink = sink.clone();
            Box::pin(async move {
                match cand {
                    Some(c) => match c.to_json() {
                        Ok(init) => sink(TransportEvent::LocalCandidate(from_candidate_init(init))),
                        Err(e) => warn!("Failed to serialize local candidate: {:?}", e),
                    },
                    // None marks the end of gathering
                    None => sink(TransportEvent::GatheringComplete),
                }
            })
        }));

        let sink = events.clone();
        pc.on_ice_connection_state_change(Box::new(move |st: RTCIceConnectionState| {
            debug!("ICE connection state changed to: {:?}", st);
            if let Some(state) = map_ice_state(st) {
                sink(TransportEvent::StateChanged(state));
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_signaling_state_change(Box::new(move |st: RTCSignalingState| {
            debug!("Signaling state changed to: {:?}", st);
            if let Some(state) = map_signaling_state(st) {
                sink(TransportEvent::NegotiationChanged(state));
            }
            Box::pin(async {})
        }));

        let sink = events;
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                sink(TransportEvent::RemoteTrack {
                    kind: track.kind().to_string(),
                    id: track.id(),
                });
                Box::pin(async {})
            },
        ));

        Ok(Arc::new(RtcTransport { pc }))
    }
}

pub struct RtcTransport {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerTransport for RtcTransport {
    async fn attach_media(&self, media: &LocalMedia) -> Result<(), TransportError> {
        for track in &media.tracks {
            let sender = self
                .pc
                .add_track(Arc::clone(track) as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            // RTCP has to be drained for the interceptors to run
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }
        Ok(())
    }

    async fn create_offer(&self, ice_restart: bool) -> Result<SessionDescription, TransportError> {
        let options = ice_restart.then(|| RTCOfferOptions {
            ice_restart: true,
            ..Default::default()
        });
        let offer = self.pc.create_offer(options).await?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        let answer = self.pc.create_answer(None).await?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), TransportError> {
        self.pc.set_local_description(to_rtc_description(desc)?).await?;
        Ok(())
    }

    async fn set_remote_description(
        &self,
        desc: &SessionDescription,
    ) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc_description(desc)?)
            .await?;
        Ok(())
    }

    async fn has_remote_description(&self) -> bool {
        self.pc.remote_description().await.is_some()
    }

    fn negotiation_state(&self) -> NegotiationState {
        map_signaling_state(self.pc.signaling_state()).unwrap_or(NegotiationState::Stable)
    }

    fn connection_state(&self) -> TransportState {
        map_ice_state(self.pc.ice_connection_state()).unwrap_or(TransportState::New)
    }

    async fn add_remote_candidate(&self, candidate: &IceCandidate) -> Result<(), TransportError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn update_servers(&self, servers: &[IceServerConfig]) -> Result<(), TransportError> {
        self.pc.set_configuration(rtc_config(servers)).await?;
        Ok(())
    }

    async fn selected_path(&self) -> Option<PathStats> {
        let stats = self.pc.get_stats().await;
        stats.reports.into_values().find_map(|report| match report {
            StatsReportType::CandidatePair(pair) if pair.nominated => Some(PathStats {
                local_candidate_id: pair.local_candidate_id,
                remote_candidate_id: pair.remote_candidate_id,
                bytes_sent: pair.bytes_sent,
                bytes_received: pair.bytes_received,
            }),
            _ => None,
        })
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.pc.close().await?;
        Ok(())
    }
}
