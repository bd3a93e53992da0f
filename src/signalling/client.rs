//! Drives a [`Session`] over a WebSocket connection.

use super::{
    message::ServerMessage,
    state::{Action, AppState, Event, ProtocolError, Session},
};
use crate::config::Config;
use eyre::Result;
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::{collections::VecDeque, time::Duration};
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{self, Instant},
};
use tokio_tungstenite::{
    tungstenite::{protocol::CloseFrame, Message},
    Connector, MaybeTlsStream, WebSocketStream,
};

/// Channel the endpoint and the session owner post [`Event`]s to.
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Receiving half of [`EventSender`].
pub type EventReceiver = mpsc::UnboundedReceiver<Event>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Local WebRTC endpoint of a session.
///
/// Methods are called from the session thread only. Asynchronous results
/// (offers, ICE candidates, data channel state) are posted to the
/// [`EventSender`] handed to [`PeerEndpoint::start`].
pub trait PeerEndpoint: Send {
    /// Builds the endpoint.
    fn start(&mut self, events: EventSender) -> Result<()>;

    /// Starts creating a local offer, answered with [`Event::OfferCreated`].
    fn create_offer(&mut self) -> Result<()>;

    /// Applies the remote answer.
    fn set_remote_answer(&mut self, sdp: &str) -> Result<()>;

    /// Adds a remote ICE candidate.
    fn add_ice_candidate(&mut self, sdp_m_line_index: u32, candidate: &str) -> Result<()>;

    /// Releases everything `start` created. Must tolerate a partial or
    /// missing start.
    fn teardown(&mut self);
}

/// Signalling connection settings.
#[derive(Clone, Debug)]
pub struct SessionSettings {
    /// `ws://` or `wss://` URL of the signalling server.
    pub server_url: String,
    /// Accept any TLS certificate.
    pub skip_certificate_checks: bool,
    /// How long to wait for the server to acknowledge our close.
    pub close_timeout: Duration,
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            server_url: config.signalling_server.clone(),
            skip_certificate_checks: config.skip_certificate_checks(),
            close_timeout: config.close_timeout(),
        }
    }
}

/// Runs the session with `peer_id` to its end and returns the terminal
/// state.
///
/// `events` must be the receiver paired with `events_tx`. The endpoint is
/// torn down exactly once, whichever way the session ends.
pub async fn run<E: PeerEndpoint>(
    peer_id: String,
    settings: &SessionSettings,
    mut endpoint: E,
    events_tx: EventSender,
    mut events: EventReceiver,
) -> AppState {
    let mut session = Session::new(peer_id);
    session.connecting();
    tracing::info!(
        "Peer {}: connecting to signalling server {}",
        session.peer_id(),
        settings.server_url
    );
    let connected = tokio::select! {
        connected = connect(settings) => connected,
        reason = wait_for_stop(&mut events) => {
            let result = session.handle(Event::Stop(reason));
            report(&session, result);
            endpoint.teardown();
            return finish(&session);
        }
    };
    let ws = match connected {
        Ok(ws) => ws,
        Err(err) => {
            let result = session.handle(Event::ConnectFailed(format!("{err:#}")));
            report(&session, result);
            endpoint.teardown();
            return finish(&session);
        }
    };
    let (sink, mut stream) = ws.split();
    let mut driver = Driver {
        session,
        endpoint,
        events_tx,
        sink,
        close_timeout: settings.close_timeout,
        close_deadline: None,
    };

    let mut pending = VecDeque::from([Event::Connected]);
    loop {
        while let Some(event) = pending.pop_front() {
            if let Some(follow_up) = driver.dispatch(event).await {
                pending.push_back(follow_up);
            }
        }
        if driver.session.state().is_terminal() {
            break;
        }
        let deadline = driver.close_deadline;
        let event = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("Peer {}: received {text}", driver.session.peer_id());
                    Event::Server(ServerMessage::parse(&text))
                }
                Some(Ok(Message::Binary(_))) => {
                    tracing::warn!("Received unknown binary message, ignoring");
                    continue;
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::debug!("Peer {}: server closed with {frame:?}", driver.session.peer_id());
                    continue;
                }
                Some(Ok(_)) => continue,
                Some(Err(err)) => {
                    tracing::warn!("Peer {}: signalling connection failed: {err}", driver.session.peer_id());
                    Event::ServerClosed
                }
                None => Event::ServerClosed,
            },
            event = events.recv() => match event {
                Some(event) => event,
                None => continue,
            },
            () = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                tracing::warn!(
                    "Peer {}: server did not acknowledge the close in time",
                    driver.session.peer_id()
                );
                Event::ServerClosed
            }
        };
        pending.push_back(event);
    }

    let Driver { session, mut endpoint, mut sink, close_timeout, .. } = driver;
    if time::timeout(close_timeout, sink.close()).await.is_err() {
        tracing::warn!("Peer {}: timed out closing the signalling connection", session.peer_id());
    }
    endpoint.teardown();
    finish(&session)
}

struct Driver<E> {
    session: Session,
    endpoint: E,
    events_tx: EventSender,
    sink: SplitSink<WsStream, Message>,
    close_timeout: Duration,
    close_deadline: Option<Instant>,
}

impl<E: PeerEndpoint> Driver<E> {
    /// Feeds `event` to the session and performs the resulting actions.
    /// Returns the event describing a failed action, if any.
    async fn dispatch(&mut self, event: Event) -> Option<Event> {
        let actions = match self.session.handle(event) {
            Ok(actions) => actions,
            Err(err) => {
                tracing::error!("Peer {}: {err}", self.session.peer_id());
                return None;
            }
        };
        for action in actions {
            if let Err(event) = self.perform(action).await {
                return Some(event);
            }
        }
        None
    }

    async fn perform(&mut self, action: Action) -> Result<(), Event> {
        match action {
            Action::Send(text) => {
                tracing::trace!("Peer {}: sending {text}", self.session.peer_id());
                self.sink.send(Message::Text(text)).await.map_err(|err| {
                    tracing::warn!("Peer {}: failed to send: {err}", self.session.peer_id());
                    Event::ServerClosed
                })?;
            }
            Action::StartEndpoint => {
                self.endpoint.start(self.events_tx.clone()).map_err(|err| endpoint_failed(&err))?;
            }
            Action::CreateOffer => self.endpoint.create_offer().map_err(|err| endpoint_failed(&err))?,
            Action::SetRemoteAnswer(sdp) => {
                self.endpoint.set_remote_answer(&sdp).map_err(|err| endpoint_failed(&err))?;
            }
            Action::AddIceCandidate { sdp_m_line_index, candidate } => self
                .endpoint
                .add_ice_candidate(sdp_m_line_index, &candidate)
                .map_err(|err| endpoint_failed(&err))?,
            Action::Close { code, reason } => {
                tracing::info!("Peer {}: closing signalling connection", self.session.peer_id());
                let frame = CloseFrame { code: code.into(), reason: reason.into() };
                self.close_deadline = Some(Instant::now() + self.close_timeout);
                self.sink.send(Message::Close(Some(frame))).await.map_err(|err| {
                    tracing::warn!("Peer {}: failed to send close: {err}", self.session.peer_id());
                    Event::ServerClosed
                })?;
            }
        }
        Ok(())
    }
}

fn report<T>(session: &Session, result: Result<T, ProtocolError>) {
    if let Err(err) = result {
        tracing::error!("Peer {}: {err}", session.peer_id());
    }
}

fn finish(session: &Session) -> AppState {
    tracing::info!("Peer {}: session ended in state {}", session.peer_id(), session.state());
    session.state()
}

fn endpoint_failed(err: &eyre::Report) -> Event {
    Event::EndpointFailed(format!("{err:#}"))
}

async fn wait_for_stop(events: &mut EventReceiver) -> String {
    loop {
        match events.recv().await {
            Some(Event::Stop(reason)) => return reason,
            Some(event) => tracing::debug!("Dropping {event:?} while connecting"),
            None => return String::from("session owner is gone"),
        }
    }
}

async fn connect(settings: &SessionSettings) -> Result<WsStream> {
    let tls = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(settings.skip_certificate_checks)
        .danger_accept_invalid_hostnames(settings.skip_certificate_checks)
        .build()?;
    let (ws, response) = tokio_tungstenite::connect_async_tls_with_config(
        settings.server_url.as_str(),
        None,
        false,
        Some(Connector::NativeTls(tls)),
    )
    .await?;
    tracing::debug!("Signalling handshake answered with {}", response.status());
    Ok(ws)
}
