//! Per-viewer `webrtcbin` branch hanging off the relay tee.

use super::sdp;
use crate::{
    config::Config,
    consts::{H264_PAYLOAD_TYPE, VIDEO_TEE_NAME},
    signalling::{Event, EventSender, PeerEndpoint},
};
use eyre::{eyre, Result, WrapErr};
use gstreamer::{glib, prelude::*, ElementFactory, Pipeline};
use gstreamer_sdp::SDPMessage;
use gstreamer_webrtc::{
    WebRTCDataChannel, WebRTCRTPTransceiver, WebRTCRTPTransceiverDirection, WebRTCSDPType,
    WebRTCSessionDescription,
};
use std::sync::{Arc, Mutex, PoisonError};

const DATA_CHANNEL_LABEL: &str = "channel";
const DATA_CHANNEL_GREETING: &str = "Hi! from GStreamer";
const DATA_CHANNEL_PAYLOAD: &[u8] = b"data";

/// `queue ! rtph264pay ! webrtcbin` branch of one viewer.
pub struct WebrtcBranch {
    pipeline: Pipeline,
    peer_id: String,
    stun_server: Option<String>,
    profile_level_id: Option<String>,
    webrtcbin: Option<gstreamer::Element>,
    events: Option<EventSender>,
    channels: Arc<Mutex<Vec<WebRTCDataChannel>>>,
    incoming: Incoming,
}

impl WebrtcBranch {
    /// Creates a branch for `peer_id` on `pipeline`. Nothing is built until
    /// the session starts it.
    #[must_use]
    pub fn new(pipeline: Pipeline, peer_id: &str, config: &Config) -> Self {
        Self {
            pipeline,
            peer_id: peer_id.to_owned(),
            stun_server: config.stun_server.clone(),
            profile_level_id: config
                .rewrite_profile_level_id
                .then(|| config.profile_level_id.clone()),
            webrtcbin: None,
            events: None,
            channels: Arc::new(Mutex::new(Vec::new())),
            incoming: Incoming::default(),
        }
    }

    fn queue_name(&self) -> String {
        format!("queue-{}", self.peer_id)
    }

    fn payloader_name(&self) -> String {
        format!("rtph264pay-{}", self.peer_id)
    }

    fn webrtcbin_name(&self) -> String {
        format!("webrtcbin-{}", self.peer_id)
    }

    fn webrtcbin(&self) -> Result<&gstreamer::Element> {
        self.webrtcbin.as_ref().ok_or_else(|| eyre!("webrtcbin of peer {} is not running", self.peer_id))
    }

    fn build(&mut self, events: &EventSender) -> Result<()> {
        let queue = ElementFactory::make("queue").name(self.queue_name()).build()?;
        let payloader = ElementFactory::make("rtph264pay")
            .name(self.payloader_name())
            .property("config-interval", 1_i32)
            .property("pt", H264_PAYLOAD_TYPE)
            .build()?;
        let webrtcbin = ElementFactory::make("webrtcbin").name(self.webrtcbin_name()).build()?;
        if let Some(stun_server) = &self.stun_server {
            webrtcbin.set_property("stun-server", stun_server);
        }
        self.webrtcbin = Some(webrtcbin.clone());
        self.connect_webrtcbin_signals(&webrtcbin, events);

        self.pipeline.add_many([&queue, &payloader, &webrtcbin])?;
        queue.link(&payloader)?;
        let payloader_src =
            payloader.static_pad("src").ok_or_else(|| eyre!("rtph264pay has no src pad"))?;
        let webrtc_sink = webrtcbin
            .request_pad_simple("sink_%u")
            .ok_or_else(|| eyre!("webrtcbin refused a sink pad"))?;
        payloader_src.link(&webrtc_sink)?;

        let transceiver =
            webrtcbin.emit_by_name::<Option<WebRTCRTPTransceiver>>("get-transceiver", &[&0_i32]);
        match transceiver {
            Some(transceiver) => {
                transceiver.set_property("direction", WebRTCRTPTransceiverDirection::Sendonly);
            }
            None => tracing::warn!("Peer {}: no transceiver to make send-only", self.peer_id),
        }

        let channel = webrtcbin.emit_by_name::<Option<WebRTCDataChannel>>(
            "create-data-channel",
            &[&DATA_CHANNEL_LABEL, &None::<gstreamer::Structure>],
        );
        match channel {
            Some(channel) => {
                tracing::info!("Peer {}: created data channel", self.peer_id);
                connect_data_channel_signals(&channel, events.clone());
                lock(&self.channels).push(channel);
            }
            None => tracing::warn!("Peer {}: could not create data channel, is usrsctp available?", self.peer_id),
        }

        let tee = self
            .pipeline
            .by_name(VIDEO_TEE_NAME)
            .ok_or_else(|| eyre!("pipeline has no {VIDEO_TEE_NAME}"))?;
        let tee_src =
            tee.request_pad_simple("src_%u").ok_or_else(|| eyre!("tee refused a src pad"))?;
        let queue_sink = queue.static_pad("sink").ok_or_else(|| eyre!("queue has no sink pad"))?;
        tee_src.link(&queue_sink)?;

        for element in [&queue, &payloader, &webrtcbin] {
            element.sync_state_with_parent()?;
        }
        Ok(())
    }

    fn connect_webrtcbin_signals(&self, webrtcbin: &gstreamer::Element, events: &EventSender) {
        let tx = events.clone();
        webrtcbin.connect("on-negotiation-needed", false, move |_| {
            tx.send(Event::NegotiationNeeded).ok();
            None
        });

        let tx = events.clone();
        webrtcbin.connect("on-ice-candidate", false, move |values| {
            let sdp_m_line_index = values.get(1).and_then(|value| value.get::<u32>().ok());
            let candidate = values.get(2).and_then(|value| value.get::<String>().ok());
            if let (Some(sdp_m_line_index), Some(candidate)) = (sdp_m_line_index, candidate) {
                tx.send(Event::LocalIceCandidate { sdp_m_line_index, candidate }).ok();
            } else {
                tracing::warn!("Malformed on-ice-candidate arguments");
            }
            None
        });

        let tx = events.clone();
        let channels = Arc::clone(&self.channels);
        let peer_id = self.peer_id.clone();
        webrtcbin.connect("on-data-channel", false, move |values| {
            match values.get(1).and_then(|value| value.get::<WebRTCDataChannel>().ok()) {
                Some(channel) => {
                    tracing::info!("Peer {peer_id}: received data channel");
                    connect_data_channel_signals(&channel, tx.clone());
                    lock(&channels).push(channel);
                }
                None => tracing::warn!("Peer {peer_id}: malformed on-data-channel arguments"),
            }
            None
        });

        let pipeline = self.pipeline.downgrade();
        let incoming = Arc::clone(&self.incoming);
        let peer_id = self.peer_id.clone();
        webrtcbin.connect_pad_added(move |_, pad| {
            let Some(pipeline) = pipeline.upgrade() else { return };
            if let Err(err) = on_incoming_stream(&pipeline, pad, &peer_id, &incoming) {
                tracing::error!("Failed to handle incoming stream: {err:#}");
            }
        });
    }
}

impl PeerEndpoint for WebrtcBranch {
    fn start(&mut self, events: EventSender) -> Result<()> {
        tracing::info!("Peer {}: adding webrtc branch", self.peer_id);
        self.events = Some(events.clone());
        self.build(&events).wrap_err_with(|| format!("failed to start peer {}", self.peer_id))
    }

    fn create_offer(&mut self) -> Result<()> {
        let webrtcbin = self.webrtcbin()?.downgrade();
        let events =
            self.events.clone().ok_or_else(|| eyre!("peer {} is not started", self.peer_id))?;
        let profile_level_id = self.profile_level_id.clone();
        let promise = gstreamer::Promise::with_change_func(move |reply| {
            let Some(webrtcbin) = webrtcbin.upgrade() else { return };
            if let Err(err) = on_offer_created(&webrtcbin, reply, profile_level_id.as_deref(), &events)
            {
                events.send(Event::EndpointFailed(format!("{err:#}"))).ok();
            }
        });
        self.webrtcbin()?
            .emit_by_name::<()>("create-offer", &[&None::<gstreamer::Structure>, &promise]);
        Ok(())
    }

    fn set_remote_answer(&mut self, sdp: &str) -> Result<()> {
        let message = SDPMessage::parse_buffer(sdp.as_bytes())
            .map_err(|err| eyre!("failed to parse SDP answer: {err}"))?;
        let answer = WebRTCSessionDescription::new(WebRTCSDPType::Answer, message);
        self.webrtcbin()?
            .emit_by_name::<()>("set-remote-description", &[&answer, &None::<gstreamer::Promise>]);
        Ok(())
    }

    fn add_ice_candidate(&mut self, sdp_m_line_index: u32, candidate: &str) -> Result<()> {
        self.webrtcbin()?.emit_by_name::<()>("add-ice-candidate", &[&sdp_m_line_index, &candidate]);
        Ok(())
    }

    fn teardown(&mut self) {
        tracing::info!("Peer {}: removing webrtc branch", self.peer_id);
        lock(&self.channels).clear();
        self.webrtcbin = None;
        self.events = None;
        let incoming: Vec<_> = lock(&self.incoming).drain(..).collect();
        for element in incoming {
            if let Err(err) = element.set_state(gstreamer::State::Null) {
                tracing::warn!("Failed to stop {}: {err}", element.name());
            }
            if self.pipeline.remove(&element).is_err() {
                tracing::debug!("{} was never added", element.name());
            }
        }
        if let Some(queue) = self.pipeline.by_name(&self.queue_name()) {
            let tee_src = queue.static_pad("sink").and_then(|sink| sink.peer());
            if let Some(tee_src) = tee_src {
                if let Some(tee) = tee_src.parent_element() {
                    tee.release_request_pad(&tee_src);
                }
            }
        }
        for name in [self.webrtcbin_name(), self.payloader_name(), self.queue_name()] {
            let Some(element) = self.pipeline.by_name(&name) else { continue };
            if let Err(err) = element.set_state(gstreamer::State::Null) {
                tracing::warn!("Failed to stop {name}: {err}");
            }
            if let Err(err) = self.pipeline.remove(&element) {
                tracing::warn!("Failed to remove {name}: {err}");
            }
        }
    }
}

fn on_offer_created(
    webrtcbin: &gstreamer::Element,
    reply: Result<Option<&gstreamer::StructureRef>, gstreamer::PromiseError>,
    profile_level_id: Option<&str>,
    events: &EventSender,
) -> Result<()> {
    let reply = match reply {
        Ok(Some(reply)) => reply,
        Ok(None) => return Err(eyre!("offer creation got no reply")),
        Err(err) => return Err(eyre!("offer creation failed: {err:?}")),
    };
    let offer = reply
        .get::<WebRTCSessionDescription>("offer")
        .map_err(|err| eyre!("reply has no offer: {err}"))?;
    let offer = match profile_level_id {
        Some(profile_level_id) => {
            let mut message = offer.sdp().to_owned();
            sdp::rewrite_offer(&mut message, profile_level_id);
            WebRTCSessionDescription::new(WebRTCSDPType::Offer, message)
        }
        None => offer,
    };
    let text = offer.sdp().as_text().map_err(|err| eyre!("failed to render offer: {err}"))?;
    tracing::info!("Sending offer:\n{text}");
    // Queue the offer before ICE gathering starts, so it goes out first.
    events.send(Event::OfferCreated(text)).map_err(|_| eyre!("session is gone"))?;
    webrtcbin.emit_by_name::<()>("set-local-description", &[&offer, &None::<gstreamer::Promise>]);
    Ok(())
}

fn connect_data_channel_signals(channel: &WebRTCDataChannel, events: EventSender) {
    let tx = events.clone();
    channel.connect("on-error", false, move |_| {
        tracing::error!("Data channel error");
        tx.send(Event::DataChannelClosed("data channel error".to_owned())).ok();
        None
    });
    channel.connect("on-open", false, |values| {
        if let Some(channel) = values.first().and_then(|value| value.get::<WebRTCDataChannel>().ok())
        {
            tracing::info!("Data channel opened");
            channel.emit_by_name::<()>("send-string", &[&DATA_CHANNEL_GREETING]);
            let data = glib::Bytes::from_static(DATA_CHANNEL_PAYLOAD);
            channel.emit_by_name::<()>("send-data", &[&data]);
        }
        None
    });
    channel.connect("on-close", false, move |_| {
        events.send(Event::DataChannelClosed("data channel closed".to_owned())).ok();
        None
    });
    channel.connect("on-message-string", false, |values| {
        if let Some(text) = values.get(1).and_then(|value| value.get::<Option<String>>().ok()) {
            tracing::info!("Received data channel message: {}", text.unwrap_or_default());
        }
        None
    });
}

type Incoming = Arc<Mutex<Vec<gstreamer::Element>>>;

/// Makes an element decoding what the viewer sends, named after the peer and
/// recorded for teardown.
fn make_incoming(factory: &str, peer_id: &str, incoming: &Incoming) -> Result<gstreamer::Element> {
    let mut elements = lock(incoming);
    let element = ElementFactory::make(factory)
        .name(format!("{factory}-{peer_id}-in{}", elements.len()))
        .build()?;
    elements.push(element.clone());
    Ok(element)
}

fn on_incoming_stream(
    pipeline: &Pipeline,
    pad: &gstreamer::Pad,
    peer_id: &str,
    incoming: &Incoming,
) -> Result<()> {
    if pad.direction() != gstreamer::PadDirection::Src {
        return Ok(());
    }
    let decodebin = make_incoming("decodebin", peer_id, incoming)?;
    let weak_pipeline = pipeline.downgrade();
    let peer = peer_id.to_owned();
    let decoded = Arc::clone(incoming);
    decodebin.connect_pad_added(move |_, pad| {
        let Some(pipeline) = weak_pipeline.upgrade() else { return };
        if let Err(err) = on_incoming_decodebin_stream(&pipeline, pad, &peer, &decoded) {
            tracing::error!("Failed to handle decoded stream: {err:#}");
        }
    });
    pipeline.add(&decodebin)?;
    decodebin.sync_state_with_parent()?;
    let sink = decodebin.static_pad("sink").ok_or_else(|| eyre!("decodebin has no sink pad"))?;
    pad.link(&sink)?;
    Ok(())
}

fn on_incoming_decodebin_stream(
    pipeline: &Pipeline,
    pad: &gstreamer::Pad,
    peer_id: &str,
    incoming: &Incoming,
) -> Result<()> {
    let caps = pad.current_caps().ok_or_else(|| eyre!("pad {} has no caps", pad.name()))?;
    let name = caps.structure(0).map(|structure| structure.name().to_string()).unwrap_or_default();
    let converters: &[&str] = if name.starts_with("video") {
        &["videoconvert"]
    } else if name.starts_with("audio") {
        &["audioconvert", "audioresample"]
    } else {
        tracing::warn!("Unknown pad {}, ignoring", pad.name());
        return Ok(());
    };
    let mut elements = vec![make_incoming("queue", peer_id, incoming)?];
    for converter in converters {
        elements.push(make_incoming(converter, peer_id, incoming)?);
    }
    elements.push(make_incoming("fakesink", peer_id, incoming)?);
    pipeline.add_many(&elements)?;
    gstreamer::Element::link_many(&elements)?;
    for element in &elements {
        element.sync_state_with_parent()?;
    }
    let sink = elements[0].static_pad("sink").ok_or_else(|| eyre!("queue has no sink pad"))?;
    pad.link(&sink)?;
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
