//! Peer connection lifecycle.
//!
//! [`Session`] is a pure state machine: it consumes [`Event`]s and answers
//! with the [`Action`]s the driver has to perform. Protocol violations move
//! the session into the matching [`AppState::Error`] and are reported as a
//! [`ProtocolError`].

use super::message::{self, ServerMessage};
use crate::consts::SIGNALLING_ID_RANGE;
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// The stage a session failed at.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Local inconsistency, not attributable to a protocol stage.
    App,
    /// Connecting to the signalling server.
    ServerConnection,
    /// Registering with the signalling server.
    ServerRegistration,
    /// Asking the server for a session with the peer.
    PeerConnection,
    /// Negotiating or running the call.
    PeerCall,
}

/// State of a peer session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppState {
    /// Not started.
    Unknown,
    /// Failed at the given stage. Terminal.
    Error(Stage),
    /// Opening the WebSocket.
    ServerConnecting,
    /// WebSocket open.
    ServerConnected,
    /// `HELLO <id>` sent.
    ServerRegistering,
    /// Registration accepted.
    ServerRegistered,
    /// The server went away. Terminal.
    ServerClosed,
    /// `SESSION <peer>` sent.
    PeerConnecting,
    /// The server paired us with the peer.
    PeerConnected,
    /// Offer sent or being created.
    PeerCallNegotiating,
    /// Answer applied, media flowing.
    PeerCallStarted,
    /// Close sent, waiting for the server.
    PeerCallStopping,
    /// Closed on our request. Terminal.
    PeerCallStopped,
}

impl AppState {
    /// Numeric code of the state, as reported in logs.
    #[must_use]
    pub fn code(self) -> u32 {
        match self {
            Self::Unknown => 0,
            Self::Error(Stage::App) => 1,
            Self::ServerConnecting => 1000,
            Self::Error(Stage::ServerConnection) => 1001,
            Self::ServerConnected => 1002,
            Self::ServerRegistering => 2000,
            Self::Error(Stage::ServerRegistration) => 2001,
            Self::ServerRegistered => 2002,
            Self::ServerClosed => 2003,
            Self::PeerConnecting => 3000,
            Self::Error(Stage::PeerConnection) => 3001,
            Self::PeerConnected => 3002,
            Self::PeerCallNegotiating => 4000,
            Self::PeerCallStarted => 4001,
            Self::PeerCallStopping => 4002,
            Self::PeerCallStopped => 4003,
            Self::Error(Stage::PeerCall) => 4004,
        }
    }

    /// Whether the session is over and has to be torn down.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::ServerClosed | Self::PeerCallStopped | Self::Error(_))
    }

    /// Whether an offer/answer exchange has begun.
    #[must_use]
    pub fn in_call(self) -> bool {
        matches!(self, Self::PeerCallNegotiating | Self::PeerCallStarted)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(stage) => write!(f, "Error({stage:?})/{}", self.code()),
            state => write!(f, "{state:?}/{}", state.code()),
        }
    }
}

/// Input of the state machine.
#[derive(Debug)]
pub enum Event {
    /// The WebSocket handshake completed.
    Connected,
    /// The WebSocket could not be opened.
    ConnectFailed(String),
    /// A text frame from the signalling server.
    Server(ServerMessage),
    /// The signalling connection is gone.
    ServerClosed,
    /// `webrtcbin` wants an offer.
    NegotiationNeeded,
    /// `webrtcbin` produced the local offer.
    OfferCreated(String),
    /// `webrtcbin` gathered a local ICE candidate.
    LocalIceCandidate {
        /// Media line the candidate belongs to.
        sdp_m_line_index: u32,
        /// Candidate line.
        candidate: String,
    },
    /// The local endpoint failed.
    EndpointFailed(String),
    /// The data channel with the peer closed or failed.
    DataChannelClosed(String),
    /// The owner asks the session to end.
    Stop(String),
}

/// Work the driver performs on behalf of the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Send a text frame to the signalling server.
    Send(String),
    /// Build the local WebRTC endpoint.
    StartEndpoint,
    /// Ask the endpoint for an offer.
    CreateOffer,
    /// Apply the peer's answer.
    SetRemoteAnswer(String),
    /// Hand a remote ICE candidate to the endpoint.
    AddIceCandidate {
        /// Media line the candidate belongs to.
        sdp_m_line_index: u32,
        /// Candidate line.
        candidate: String,
    },
    /// Close the signalling connection.
    Close {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// WebSocket close code used when the owner stops a session.
pub const STOP_CLOSE_CODE: u16 = 1007;

/// Signalling protocol violation. Each variant ends the session in a
/// specific error state, see [`ProtocolError::stage`].
#[allow(missing_docs)]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("failed to connect to the signalling server: {0}")]
    Connect(String),
    #[error("received HELLO when not registering, state {0}")]
    UnexpectedHello(AppState),
    #[error("peer id is blank")]
    BlankPeerId,
    #[error("received SESSION_OK when not calling, state {0}")]
    UnexpectedSessionOk(AppState),
    #[error("signalling server reported: {message}")]
    Server { message: String, stage: Stage },
    #[error("negotiation needed outside of a peer session, state {0}")]
    UnexpectedNegotiation(AppState),
    #[error("can't send offer, not negotiating, state {0}")]
    OfferNotNegotiating(AppState),
    #[error("can't send ICE candidate, not in call, state {0}")]
    LocalIceNotInCall(AppState),
    #[error("received SDP when not negotiating, state {0}")]
    UnexpectedSdp(AppState),
    #[error("received SDP without 'type'")]
    SdpWithoutType,
    #[error("expected SDP message type 'answer', got '{0}'")]
    NotAnAnswer(String),
    #[error("received SDP without 'sdp' text")]
    SdpWithoutText,
    #[error("received ICE candidate when not in call, state {0}")]
    UnexpectedIce(AppState),
    #[error("received ICE candidate without 'candidate' or 'sdpMLineIndex'")]
    MalformedIce,
    #[error("local WebRTC endpoint failed: {0}")]
    Endpoint(String),
}

impl ProtocolError {
    /// The stage the error is attributed to.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::Connect(_) => Stage::ServerConnection,
            Self::UnexpectedHello(_)
            | Self::UnexpectedNegotiation(_)
            | Self::OfferNotNegotiating(_)
            | Self::LocalIceNotInCall(_) => Stage::App,
            Self::UnexpectedSessionOk(_) => Stage::PeerConnection,
            Self::Server { stage, .. } => *stage,
            Self::BlankPeerId
            | Self::UnexpectedSdp(_)
            | Self::SdpWithoutType
            | Self::NotAnAnswer(_)
            | Self::SdpWithoutText
            | Self::UnexpectedIce(_)
            | Self::MalformedIce
            | Self::Endpoint(_) => Stage::PeerCall,
        }
    }
}

/// Signalling session with one remote peer.
#[derive(Debug)]
pub struct Session {
    peer_id: String,
    our_id: u32,
    state: AppState,
}

impl Session {
    /// Creates a session calling `peer_id`, registering under a random id.
    #[must_use]
    pub fn new(peer_id: impl Into<String>) -> Self {
        Self::with_id(peer_id, rand::thread_rng().gen_range(SIGNALLING_ID_RANGE))
    }

    /// Creates a session calling `peer_id`, registering under `our_id`.
    #[must_use]
    pub fn with_id(peer_id: impl Into<String>, our_id: u32) -> Self {
        Self { peer_id: peer_id.into(), our_id, state: AppState::Unknown }
    }

    /// Remote peer id.
    #[must_use]
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Id registered with the signalling server.
    #[must_use]
    pub fn our_id(&self) -> u32 {
        self.our_id
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Marks the start of the connection attempt.
    pub fn connecting(&mut self) {
        self.set_state(AppState::ServerConnecting);
    }

    /// Feeds `event` to the state machine.
    ///
    /// Events arriving after the session reached a terminal state are
    /// dropped, as are late call events while the session is stopping.
    pub fn handle(&mut self, event: Event) -> Result<Vec<Action>, ProtocolError> {
        if self.state.is_terminal()
            || (self.state == AppState::PeerCallStopping && is_call_event(&event))
        {
            tracing::trace!("Peer {}: dropping {event:?} in state {}", self.peer_id, self.state);
            return Ok(Vec::new());
        }
        let result = self.transition(event);
        if let Err(err) = &result {
            self.set_state(AppState::Error(err.stage()));
        }
        result
    }

    fn transition(&mut self, event: Event) -> Result<Vec<Action>, ProtocolError> {
        match event {
            Event::Connected => {
                self.set_state(AppState::ServerConnected);
                self.set_state(AppState::ServerRegistering);
                Ok(vec![Action::Send(message::hello(self.our_id))])
            }
            Event::ConnectFailed(err) => Err(ProtocolError::Connect(err)),
            Event::Server(message) => self.on_server_message(message),
            Event::ServerClosed => {
                if self.state == AppState::PeerCallStopping {
                    self.set_state(AppState::PeerCallStopped);
                } else {
                    self.set_state(AppState::ServerClosed);
                }
                Ok(Vec::new())
            }
            Event::NegotiationNeeded => match self.state {
                AppState::PeerConnected
                | AppState::PeerCallNegotiating
                | AppState::PeerCallStarted => {
                    self.set_state(AppState::PeerCallNegotiating);
                    Ok(vec![Action::CreateOffer])
                }
                state => Err(ProtocolError::UnexpectedNegotiation(state)),
            },
            Event::OfferCreated(sdp) => {
                if self.state != AppState::PeerCallNegotiating {
                    return Err(ProtocolError::OfferNotNegotiating(self.state));
                }
                Ok(vec![Action::Send(message::offer(&sdp))])
            }
            Event::LocalIceCandidate { sdp_m_line_index, candidate } => {
                if !self.state.in_call() {
                    return Err(ProtocolError::LocalIceNotInCall(self.state));
                }
                Ok(vec![Action::Send(message::ice_candidate(sdp_m_line_index, &candidate))])
            }
            Event::EndpointFailed(err) => Err(ProtocolError::Endpoint(err)),
            Event::DataChannelClosed(reason) => {
                tracing::info!("Peer {}: {reason}", self.peer_id);
                Ok(self.stop(1000, String::new()))
            }
            Event::Stop(reason) => Ok(self.stop(STOP_CLOSE_CODE, reason)),
        }
    }

    fn on_server_message(&mut self, message: ServerMessage) -> Result<Vec<Action>, ProtocolError> {
        match message {
            ServerMessage::Hello => {
                if self.state != AppState::ServerRegistering {
                    return Err(ProtocolError::UnexpectedHello(self.state));
                }
                self.set_state(AppState::ServerRegistered);
                tracing::info!("Registered with server as {}", self.our_id);
                self.setup_call()
            }
            ServerMessage::SessionOk => {
                if self.state != AppState::PeerConnecting {
                    return Err(ProtocolError::UnexpectedSessionOk(self.state));
                }
                self.set_state(AppState::PeerConnected);
                Ok(vec![Action::StartEndpoint])
            }
            ServerMessage::Error(message) => {
                let stage = match self.state {
                    AppState::ServerConnecting => Stage::ServerConnection,
                    AppState::ServerRegistering => Stage::ServerRegistration,
                    AppState::PeerConnecting => Stage::PeerConnection,
                    AppState::PeerConnected | AppState::PeerCallNegotiating => Stage::PeerCall,
                    _ => Stage::App,
                };
                Err(ProtocolError::Server { message, stage })
            }
            ServerMessage::Sdp(description) => {
                if self.state != AppState::PeerCallNegotiating {
                    return Err(ProtocolError::UnexpectedSdp(self.state));
                }
                let kind = description.kind.ok_or(ProtocolError::SdpWithoutType)?;
                if kind != "answer" {
                    return Err(ProtocolError::NotAnAnswer(kind));
                }
                let sdp = description.sdp.ok_or(ProtocolError::SdpWithoutText)?;
                tracing::info!("Received answer:\n{sdp}");
                self.set_state(AppState::PeerCallStarted);
                Ok(vec![Action::SetRemoteAnswer(sdp)])
            }
            ServerMessage::Ice(ice) => {
                if !self.state.in_call() {
                    return Err(ProtocolError::UnexpectedIce(self.state));
                }
                let (Some(candidate), Some(sdp_m_line_index)) = (ice.candidate, ice.sdp_m_line_index)
                else {
                    return Err(ProtocolError::MalformedIce);
                };
                Ok(vec![Action::AddIceCandidate { sdp_m_line_index, candidate }])
            }
            ServerMessage::Unknown(text) => {
                tracing::warn!("Peer {}: ignoring unknown message {text:?}", self.peer_id);
                Ok(Vec::new())
            }
        }
    }

    fn setup_call(&mut self) -> Result<Vec<Action>, ProtocolError> {
        if self.peer_id.trim().is_empty() {
            return Err(ProtocolError::BlankPeerId);
        }
        tracing::info!("Setting up signalling server call with {}", self.peer_id);
        self.set_state(AppState::PeerConnecting);
        Ok(vec![Action::Send(message::session(&self.peer_id))])
    }

    fn stop(&mut self, code: u16, reason: String) -> Vec<Action> {
        match self.state {
            AppState::Unknown | AppState::ServerConnecting => {
                self.set_state(AppState::PeerCallStopped);
                Vec::new()
            }
            AppState::PeerCallStopping => Vec::new(),
            _ => {
                self.set_state(AppState::PeerCallStopping);
                vec![Action::Close { code, reason }]
            }
        }
    }

    fn set_state(&mut self, state: AppState) {
        tracing::debug!("Peer {}: {} -> {state}", self.peer_id, self.state);
        self.state = state;
    }
}

/// Events webrtcbin or the remote peer may still produce after the close was
/// sent.
fn is_call_event(event: &Event) -> bool {
    matches!(
        event,
        Event::NegotiationNeeded
            | Event::OfferCreated(_)
            | Event::LocalIceCandidate { .. }
            | Event::EndpointFailed(_)
            | Event::DataChannelClosed(_)
            | Event::Server(ServerMessage::Sdp(_) | ServerMessage::Ice(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signalling::message::{IceCandidate, SessionDescription};

    fn server(text: &str) -> Event {
        Event::Server(ServerMessage::parse(text))
    }

    fn answer(sdp: &str) -> Event {
        Event::Server(ServerMessage::Sdp(SessionDescription {
            kind: Some("answer".to_owned()),
            sdp: Some(sdp.to_owned()),
        }))
    }

    /// Drives a fresh session up to `PeerConnected`.
    fn connected_session() -> Session {
        let mut session = Session::with_id("5338", 42);
        session.connecting();
        assert_eq!(
            session.handle(Event::Connected).unwrap(),
            vec![Action::Send("HELLO 42".to_owned())]
        );
        assert_eq!(session.state(), AppState::ServerRegistering);
        assert_eq!(
            session.handle(server("HELLO")).unwrap(),
            vec![Action::Send("SESSION 5338".to_owned())]
        );
        assert_eq!(session.state(), AppState::PeerConnecting);
        assert_eq!(session.handle(server("SESSION_OK")).unwrap(), vec![Action::StartEndpoint]);
        assert_eq!(session.state(), AppState::PeerConnected);
        session
    }

    #[test]
    fn codes() {
        assert_eq!(AppState::Unknown.code(), 0);
        assert_eq!(AppState::Error(Stage::App).code(), 1);
        assert_eq!(AppState::Error(Stage::ServerConnection).code(), 1001);
        assert_eq!(AppState::ServerClosed.code(), 2003);
        assert_eq!(AppState::Error(Stage::PeerConnection).code(), 3001);
        assert_eq!(AppState::PeerCallStopped.code(), 4003);
        assert_eq!(AppState::Error(Stage::PeerCall).code(), 4004);
        assert_eq!(AppState::PeerCallStarted.to_string(), "PeerCallStarted/4001");
    }

    #[test]
    fn random_id_in_range() {
        let session = Session::new("1");
        assert!(SIGNALLING_ID_RANGE.contains(&session.our_id()));
    }

    #[test]
    fn full_call() {
        let mut session = connected_session();
        assert_eq!(session.handle(Event::NegotiationNeeded).unwrap(), vec![Action::CreateOffer]);
        assert_eq!(session.state(), AppState::PeerCallNegotiating);

        let actions = session.handle(Event::OfferCreated("v=0\r\n".to_owned())).unwrap();
        assert_eq!(actions, vec![Action::Send(message::offer("v=0\r\n"))]);

        let actions = session
            .handle(Event::LocalIceCandidate { sdp_m_line_index: 0, candidate: "c".to_owned() })
            .unwrap();
        assert_eq!(actions, vec![Action::Send(message::ice_candidate(0, "c"))]);

        assert_eq!(
            session.handle(answer("v=0\r\n")).unwrap(),
            vec![Action::SetRemoteAnswer("v=0\r\n".to_owned())]
        );
        assert_eq!(session.state(), AppState::PeerCallStarted);

        let remote = Event::Server(ServerMessage::Ice(IceCandidate {
            candidate: Some("r".to_owned()),
            sdp_m_line_index: Some(1),
        }));
        assert_eq!(
            session.handle(remote).unwrap(),
            vec![Action::AddIceCandidate { sdp_m_line_index: 1, candidate: "r".to_owned() }]
        );

        // Renegotiation is allowed once the call runs.
        assert_eq!(session.handle(Event::NegotiationNeeded).unwrap(), vec![Action::CreateOffer]);
        assert_eq!(session.state(), AppState::PeerCallNegotiating);
    }

    #[test]
    fn hello_outside_registration() {
        let mut session = connected_session();
        let err = session.handle(server("HELLO")).unwrap_err();
        assert_eq!(err, ProtocolError::UnexpectedHello(AppState::PeerConnected));
        assert_eq!(session.state(), AppState::Error(Stage::App));
    }

    #[test]
    fn blank_peer_id() {
        let mut session = Session::with_id("  ", 42);
        session.connecting();
        session.handle(Event::Connected).unwrap();
        assert_eq!(session.handle(server("HELLO")).unwrap_err(), ProtocolError::BlankPeerId);
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));
    }

    #[test]
    fn session_ok_outside_peer_connecting() {
        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(Event::Connected).unwrap();
        assert!(session.handle(server("SESSION_OK")).is_err());
        assert_eq!(session.state(), AppState::Error(Stage::PeerConnection));
    }

    #[test]
    fn server_errors_map_to_the_current_stage() {
        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(server("ERROR oops")).unwrap_err();
        assert_eq!(session.state(), AppState::Error(Stage::ServerConnection));

        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(Event::Connected).unwrap();
        session.handle(server("ERROR oops")).unwrap_err();
        assert_eq!(session.state(), AppState::Error(Stage::ServerRegistration));

        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(Event::Connected).unwrap();
        session.handle(server("HELLO")).unwrap();
        let err = session.handle(server("ERROR peer '1' not found")).unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Server {
                message: "ERROR peer '1' not found".to_owned(),
                stage: Stage::PeerConnection,
            }
        );
        assert_eq!(session.state(), AppState::Error(Stage::PeerConnection));

        let mut session = connected_session();
        session.handle(server("ERROR gone")).unwrap_err();
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));

        let mut session = connected_session();
        session.handle(Event::NegotiationNeeded).unwrap();
        session.handle(answer("v=0")).unwrap();
        session.handle(server("ERROR late")).unwrap_err();
        assert_eq!(session.state(), AppState::Error(Stage::App));
    }

    #[test]
    fn negotiation_needs_a_peer() {
        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(Event::Connected).unwrap();
        assert!(session.handle(Event::NegotiationNeeded).is_err());
        assert_eq!(session.state(), AppState::Error(Stage::App));
    }

    #[test]
    fn local_offer_and_ice_need_a_call() {
        let mut session = connected_session();
        assert!(session.handle(Event::OfferCreated("v=0".to_owned())).is_err());
        assert_eq!(session.state(), AppState::Error(Stage::App));

        let mut session = connected_session();
        let event = Event::LocalIceCandidate { sdp_m_line_index: 0, candidate: "c".to_owned() };
        assert!(session.handle(event).is_err());
        assert_eq!(session.state(), AppState::Error(Stage::App));
    }

    #[test]
    fn bad_answers() {
        let mut session = connected_session();
        assert!(matches!(
            session.handle(answer("v=0")).unwrap_err(),
            ProtocolError::UnexpectedSdp(AppState::PeerConnected)
        ));
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));

        let cases = [
            (SessionDescription { kind: None, sdp: Some("v=0".to_owned()) }, ProtocolError::SdpWithoutType),
            (
                SessionDescription { kind: Some("offer".to_owned()), sdp: Some("v=0".to_owned()) },
                ProtocolError::NotAnAnswer("offer".to_owned()),
            ),
            (SessionDescription { kind: Some("answer".to_owned()), sdp: None }, ProtocolError::SdpWithoutText),
        ];
        for (description, expected) in cases {
            let mut session = connected_session();
            session.handle(Event::NegotiationNeeded).unwrap();
            let err = session.handle(Event::Server(ServerMessage::Sdp(description))).unwrap_err();
            assert_eq!(err, expected);
            assert_eq!(session.state(), AppState::Error(Stage::PeerCall));
        }
    }

    #[test]
    fn bad_remote_ice() {
        let mut session = connected_session();
        let ice = r#"{"ice": {"candidate": "c", "sdpMLineIndex": 0}}"#;
        assert!(matches!(session.handle(server(ice)).unwrap_err(), ProtocolError::UnexpectedIce(_)));
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));

        let mut session = connected_session();
        session.handle(Event::NegotiationNeeded).unwrap();
        let ice = r#"{"ice": {"candidate": "c"}}"#;
        assert_eq!(session.handle(server(ice)).unwrap_err(), ProtocolError::MalformedIce);
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));
    }

    #[test]
    fn unknown_messages_are_ignored() {
        let mut session = connected_session();
        assert!(session.handle(server("what?")).unwrap().is_empty());
        assert!(session.handle(server(r#"{"other": 1}"#)).unwrap().is_empty());
        assert_eq!(session.state(), AppState::PeerConnected);
    }

    #[test]
    fn endpoint_failure() {
        let mut session = connected_session();
        assert!(session.handle(Event::EndpointFailed("no webrtcbin".to_owned())).is_err());
        assert_eq!(session.state(), AppState::Error(Stage::PeerCall));
    }

    #[test]
    fn stop_closes_with_reason() {
        let mut session = connected_session();
        let actions = session.handle(Event::Stop("bye".to_owned())).unwrap();
        assert_eq!(actions, vec![Action::Close { code: STOP_CLOSE_CODE, reason: "bye".to_owned() }]);
        assert_eq!(session.state(), AppState::PeerCallStopping);
        // A second request does not close twice.
        assert!(session.handle(Event::Stop("bye".to_owned())).unwrap().is_empty());
        session.handle(Event::ServerClosed).unwrap();
        assert_eq!(session.state(), AppState::PeerCallStopped);
        assert!(session.state().is_terminal());
    }

    #[test]
    fn late_call_events_while_stopping_are_dropped() {
        let mut session = connected_session();
        session.handle(Event::NegotiationNeeded).unwrap();
        session.handle(Event::Stop("bye".to_owned())).unwrap();
        assert_eq!(session.state(), AppState::PeerCallStopping);

        let late = [
            Event::LocalIceCandidate { sdp_m_line_index: 0, candidate: "c".to_owned() },
            Event::OfferCreated("v=0\r\n".to_owned()),
            Event::NegotiationNeeded,
            Event::DataChannelClosed("closed".to_owned()),
            Event::EndpointFailed("state changed".to_owned()),
            answer("v=0\r\n"),
            server(r#"{"ice": {"candidate": "r", "sdpMLineIndex": 0}}"#),
        ];
        for event in late {
            assert!(session.handle(event).unwrap().is_empty());
            assert_eq!(session.state(), AppState::PeerCallStopping);
        }

        session.handle(Event::ServerClosed).unwrap();
        assert_eq!(session.state(), AppState::PeerCallStopped);
    }

    #[test]
    fn data_channel_close_stops_the_call() {
        let mut session = connected_session();
        let actions = session.handle(Event::DataChannelClosed("closed".to_owned())).unwrap();
        assert_eq!(actions, vec![Action::Close { code: 1000, reason: String::new() }]);
        assert_eq!(session.state(), AppState::PeerCallStopping);
    }

    #[test]
    fn stop_before_connect() {
        let mut session = Session::with_id("1", 42);
        session.connecting();
        assert!(session.handle(Event::Stop("bye".to_owned())).unwrap().is_empty());
        assert_eq!(session.state(), AppState::PeerCallStopped);
    }

    #[test]
    fn server_closed_without_stop() {
        let mut session = connected_session();
        session.handle(Event::ServerClosed).unwrap();
        assert_eq!(session.state(), AppState::ServerClosed);
    }

    #[test]
    fn terminal_states_swallow_events() {
        let mut session = Session::with_id("1", 42);
        session.connecting();
        session.handle(Event::ConnectFailed("refused".to_owned())).unwrap_err();
        assert_eq!(session.state(), AppState::Error(Stage::ServerConnection));
        assert!(session.handle(Event::Connected).unwrap().is_empty());
        assert_eq!(session.state(), AppState::Error(Stage::ServerConnection));
    }
}
