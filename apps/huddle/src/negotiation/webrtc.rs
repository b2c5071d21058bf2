use async_trait::async_trait;
use huddle_protocol::{IceCandidate, ParticipantId, SdpKind, SessionDescription};
use std::sync::Arc;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::{
    ConnectivityStatus, EventSink, NegotiationError, NegotiationEvent, Negotiator,
    NegotiatorFactory, RemoteMedia,
};
use crate::capture::{LocalStream, TrackKind};

fn backend(err: impl std::fmt::Display) -> NegotiationError {
    NegotiationError::Backend(err.to_string())
}

/// Shares one media engine and ICE configuration across every peer
/// connection of a participant.
pub struct WebRtcFactory {
    api: API,
    configuration: RTCConfiguration,
}

impl WebRtcFactory {
    pub fn new(ice_servers: &[String]) -> Result<Self, NegotiationError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(backend)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: ice_servers.to_vec(),
                ..Default::default()
            }]
        };
        Ok(Self {
            api,
            configuration: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
        })
    }
}

#[async_trait]
impl NegotiatorFactory for WebRtcFactory {
    async fn create(
        &self,
        remote: &ParticipantId,
        local_media: Option<&LocalStream>,
        events: EventSink,
    ) -> Result<Arc<dyn Negotiator>, NegotiationError> {
        let pc = Arc::new(
            self.api
                .new_peer_connection(self.configuration.clone())
                .await
                .map_err(backend)?,
        );

        match local_media {
            Some(stream) if !stream.tracks.is_empty() => {
                for track in &stream.tracks {
                    let mime_type = match track.kind {
                        TrackKind::Audio => MIME_TYPE_OPUS,
                        TrackKind::Video => MIME_TYPE_VP8,
                    };
                    let local = Arc::new(TrackLocalStaticSample::new(
                        RTCRtpCodecCapability {
                            mime_type: mime_type.to_owned(),
                            ..Default::default()
                        },
                        track.id.clone(),
                        stream.id.clone(),
                    ));
                    pc.add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                        .await
                        .map_err(backend)?;
                }
            }
            _ => {
                // Without a local track the offer would carry no media
                // section and the remote could never send us video.
                pc.add_transceiver_from_kind(RTPCodecType::Video, None)
                    .await
                    .map_err(backend)?;
            }
        }

        install_handlers(&pc, remote, events);
        debug!(remote = %remote, "peer connection created");
        Ok(Arc::new(WebRtcNegotiator { pc }))
    }
}

fn install_handlers(pc: &Arc<RTCPeerConnection>, remote: &ParticipantId, events: EventSink) {
    let candidate_events = events.clone();
    let candidate_remote = remote.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let events = candidate_events.clone();
        let remote = candidate_remote.clone();
        Box::pin(async move {
            // None marks the end of gathering; nothing to forward.
            let Some(candidate) = candidate else {
                trace!(remote = %remote, "candidate gathering complete");
                return;
            };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = events.send(NegotiationEvent::Candidate(from_init(init)));
                }
                Err(err) => warn!(remote = %remote, "failed to serialize candidate: {}", err),
            }
        })
    }));

    let status_events = events.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        if let Some(status) = map_ice_state(state) {
            let _ = status_events.send(NegotiationEvent::Status(status));
        }
        Box::pin(async {})
    }));

    pc.on_track(Box::new(move |track: Arc<TrackRemote>, _receiver, _transceiver| {
        let kind = match track.kind() {
            RTPCodecType::Audio => TrackKind::Audio,
            _ => TrackKind::Video,
        };
        let _ = events.send(NegotiationEvent::RemoteTrack(RemoteMedia {
            stream_id: track.stream_id(),
            track_id: track.id(),
            kind,
        }));
        Box::pin(async {})
    }));
}

fn map_ice_state(state: RTCIceConnectionState) -> Option<ConnectivityStatus> {
    match state {
        RTCIceConnectionState::New => Some(ConnectivityStatus::New),
        RTCIceConnectionState::Checking => Some(ConnectivityStatus::Checking),
        RTCIceConnectionState::Connected | RTCIceConnectionState::Completed => {
            Some(ConnectivityStatus::Connected)
        }
        RTCIceConnectionState::Disconnected => Some(ConnectivityStatus::Disconnected),
        RTCIceConnectionState::Failed => Some(ConnectivityStatus::Failed),
        RTCIceConnectionState::Closed => Some(ConnectivityStatus::Closed),
        _ => None,
    }
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_init(candidate: IceCandidate) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate,
        sdp_mid: candidate.sdp_mid,
        sdp_mline_index: candidate.sdp_mline_index,
        username_fragment: candidate.username_fragment,
    }
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, NegotiationError> {
    match description.kind {
        SdpKind::Offer => RTCSessionDescription::offer(description.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(description.sdp),
    }
    .map_err(backend)
}

pub struct WebRtcNegotiator {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self.pc.create_offer(None).await.map_err(backend)?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        let answer = self.pc.create_answer(None).await.map_err(backend)?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_local_description(to_rtc(description)?)
            .await
            .map_err(backend)
    }

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.pc
            .set_remote_description(to_rtc(description)?)
            .await
            .map_err(backend)
    }

    async fn add_candidate(&self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        self.pc
            .add_ice_candidate(to_init(candidate))
            .await
            .map_err(backend)
    }

    async fn close(&self) -> Result<(), NegotiationError> {
        self.pc.close().await.map_err(backend)
    }
}
