#![allow(dead_code)]

use futures::prelude::*;
use gstreamer::ElementFactory;
use rtsp_relay::signalling::{EventSender, PeerEndpoint};
use std::sync::{Arc, Mutex};
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};

pub type ServerStream = WebSocketStream<TcpStream>;

/// Initializes GStreamer and checks that every element in `elements` can be
/// created. Tests skip themselves when this returns false.
pub fn gstreamer_with(elements: &[&str]) -> bool {
    if let Err(err) = gstreamer::init() {
        eprintln!("GStreamer unavailable: {err}");
        return false;
    }
    for element in elements {
        if ElementFactory::find(element).is_none() {
            eprintln!("GStreamer element {element} unavailable");
            return false;
        }
    }
    true
}

/// Accepts one WebSocket connection and runs `script` on it.
pub async fn signalling_server<F, Fut>(script: F) -> (String, JoinHandle<()>)
where
    F: FnOnce(ServerStream) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        script(ws).await;
    });
    (url, handle)
}

/// Next text frame from the client.
pub async fn next_text(ws: &mut ServerStream) -> String {
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return text,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

pub async fn send_text(ws: &mut ServerStream, text: &str) {
    ws.send(Message::Text(text.to_owned())).await.unwrap();
}

/// How a [`FakeEndpoint`] reacts to being started.
#[derive(Clone, Copy, Debug)]
pub enum OnStart {
    Negotiate,
    Stop,
    Fail,
}

/// Endpoint recording the calls made on it.
#[derive(Clone)]
pub struct FakeEndpoint {
    pub calls: Arc<Mutex<Vec<String>>>,
    on_start: OnStart,
    events: Option<EventSender>,
}

impl FakeEndpoint {
    pub fn new(on_start: OnStart) -> Self {
        Self { calls: Arc::default(), on_start, events: None }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

impl PeerEndpoint for FakeEndpoint {
    fn start(&mut self, events: EventSender) -> eyre::Result<()> {
        self.record("start");
        match self.on_start {
            OnStart::Negotiate => {
                events.send(rtsp_relay::signalling::Event::NegotiationNeeded).unwrap();
            }
            OnStart::Stop => {
                events.send(rtsp_relay::signalling::Event::Stop("going away".to_owned())).unwrap();
            }
            OnStart::Fail => eyre::bail!("no webrtcbin"),
        }
        self.events = Some(events);
        Ok(())
    }

    fn create_offer(&mut self) -> eyre::Result<()> {
        self.record("create_offer");
        let events = self.events.as_ref().unwrap();
        events.send(rtsp_relay::signalling::Event::OfferCreated("v=0\r\n".to_owned())).unwrap();
        events
            .send(rtsp_relay::signalling::Event::LocalIceCandidate {
                sdp_m_line_index: 0,
                candidate: "candidate:local".to_owned(),
            })
            .unwrap();
        Ok(())
    }

    fn set_remote_answer(&mut self, sdp: &str) -> eyre::Result<()> {
        self.record(format!("answer {sdp}"));
        Ok(())
    }

    fn add_ice_candidate(&mut self, sdp_m_line_index: u32, candidate: &str) -> eyre::Result<()> {
        self.record(format!("ice {sdp_m_line_index} {candidate}"));
        Ok(())
    }

    fn teardown(&mut self) {
        self.record("teardown");
    }
}
