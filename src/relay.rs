//! RTSP source pipelines fanned out to WebRTC viewers.
//!
//! Each [`RtspPipelineHandler`] owns one pipeline:
//!
//! ```text
//! rtspsrc ! rtph264depay ! tee ─┬─ queue ! fakesink
//!                               ├─ queue ! h264parse ! mp4mux ! filesink
//!                               └─ queue ! rtph264pay ! webrtcbin   (per viewer)
//! ```
//!
//! When the RTSP source becomes unreachable the pipeline is torn down, the
//! viewers are sent away, and a new pipeline (with a new recording file) is
//! started once the source accepts TCP connections again.

use crate::{
    bus::{self, Verdict},
    config::Config,
    consts::{RECORDING_FINALIZE_DELAY, SOURCE_DISCONNECTED_REASON, VIDEO_TEE_NAME},
    recording::{self, FileNamer},
    signalling::SessionSettings,
    utils::{probe_tcp, rtsp_socket_addr, spawn_named_thread},
    webrtc::{viewer, PeerMap, WebrtcBranch},
};
use eyre::{bail, eyre, Result};
use gstreamer::{glib, prelude::*, ClockTime, Pipeline, State};
use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, Weak,
    },
    thread,
};

const BUS_POLL_INTERVAL: ClockTime = ClockTime::from_mseconds(500);

/// Pipeline of one RTSP source and the viewers attached to it.
pub struct RtspPipelineHandler {
    execution_id: u32,
    device_id: String,
    rtsp_url: String,
    config: Arc<Config>,
    pipeline: Mutex<Option<Pipeline>>,
    namer: Mutex<FileNamer>,
    peers: PeerMap,
    closed: AtomicBool,
}

impl RtspPipelineHandler {
    /// Creates a handler. An empty `device_id` falls back to the configured
    /// default.
    #[must_use]
    pub fn new(execution_id: u32, device_id: &str, rtsp_url: &str, config: Arc<Config>) -> Arc<Self> {
        let device_id = if device_id.is_empty() {
            tracing::info!("Using default device id {}", config.default_device_id);
            config.default_device_id.clone()
        } else {
            device_id.to_owned()
        };
        Arc::new(Self {
            execution_id,
            device_id,
            rtsp_url: rtsp_url.to_owned(),
            namer: Mutex::new(FileNamer::new(&config.recording_dir)),
            config,
            pipeline: Mutex::new(None),
            peers: PeerMap::default(),
            closed: AtomicBool::new(false),
        })
    }

    /// Pipeline execution id.
    #[must_use]
    pub fn execution_id(&self) -> u32 {
        self.execution_id
    }

    /// Device id used in recording names.
    #[must_use]
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Whether the pipeline is running.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        lock(&self.pipeline).is_some()
    }

    /// Ids of the live viewers.
    #[must_use]
    pub fn peer_ids(&self) -> Vec<String> {
        viewer::lock_peers(&self.peers).keys().cloned().collect()
    }

    /// Launch line of the source pipeline.
    #[must_use]
    pub fn launch_line(&self) -> String {
        format!(
            "tee name={VIDEO_TEE_NAME} ! queue ! fakesink \
             rtspsrc name=rtspsource location={} latency={} drop-on-latency=true ! \
             rtph264depay name=rtspdepay ! {VIDEO_TEE_NAME}.",
            self.rtsp_url, self.config.rtsp_latency_ms
        )
    }

    /// Returns the next recording file:
    /// `<dir>/<device>__<execution-id>-<n>__<random>.mp4`.
    pub fn prepare_next_file_name(&self) -> PathBuf {
        let stem = format!("{}__{}", self.device_id, self.execution_id);
        lock(&self.namer).next(&stem)
    }

    /// Builds the pipeline and starts playing it. Viewers can be added once
    /// this returns. Fails once the handler is closed.
    pub fn start_streaming(self: &Arc<Self>) -> Result<()> {
        let mut current = lock(&self.pipeline);
        // Checked under the pipeline lock, which `close` takes after setting
        // the flag.
        if self.closed.load(Ordering::SeqCst) {
            bail!("pipeline {} is closed", self.execution_id);
        }
        if current.is_some() {
            bail!("pipeline {} is already streaming", self.execution_id);
        }
        tracing::info!("Starting pipeline {} for {}", self.execution_id, self.rtsp_url);
        let pipeline = gstreamer::parse::launch(&self.launch_line())?
            .downcast::<Pipeline>()
            .map_err(|_| eyre!("launch line did not produce a pipeline"))?;
        let tee =
            pipeline.by_name(VIDEO_TEE_NAME).ok_or_else(|| eyre!("pipeline has no {VIDEO_TEE_NAME}"))?;
        recording::attach_recorder(&pipeline, &tee, &self.prepare_next_file_name())?;

        let bus = pipeline.bus().ok_or_else(|| eyre!("pipeline has no bus"))?;
        let handler = Arc::downgrade(self);
        let watched = pipeline.downgrade();
        spawn_named_thread(format!("bus-{}", self.execution_id), move || {
            watch_bus(&handler, &watched, &bus);
        })?;

        if let Err(err) = pipeline.set_state(State::Playing) {
            pipeline.set_state(State::Null).ok();
            bail!("unable to set pipeline {} to playing: {err}", self.execution_id);
        }
        tracing::info!("Pipeline {} playing, no viewers yet", self.execution_id);
        *current = Some(pipeline);
        Ok(())
    }

    /// Finalizes the recording, stops every viewer and shuts the pipeline
    /// down. Does nothing when not streaming.
    pub fn stop_streaming(&self) -> Result<()> {
        let Some(pipeline) = lock(&self.pipeline).take() else {
            tracing::debug!("Pipeline {} is not streaming", self.execution_id);
            return Ok(());
        };
        tracing::info!("Stopping pipeline {} for {}", self.execution_id, self.rtsp_url);
        if let Err(err) = recording::finish_recording(&pipeline) {
            tracing::warn!("Failed to finish recording: {err:#}");
        }
        viewer::stop_all(&self.peers, SOURCE_DISCONNECTED_REASON);
        if !pipeline.send_event(gstreamer::event::Eos::new()) {
            tracing::warn!("Pipeline {} did not accept EOS", self.execution_id);
        }
        thread::sleep(RECORDING_FINALIZE_DELAY);
        pipeline.set_state(State::Paused)?;
        pipeline.set_state(State::Null)?;
        tracing::info!("Pipeline {} stopped", self.execution_id);
        Ok(())
    }

    /// Stops streaming for good. A restart in progress gives up.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.stop_streaming()
    }

    /// Attaches a viewer and starts its signalling session.
    pub fn add_peer(&self, peer_id: &str) -> Result<()> {
        let pipeline =
            lock(&self.pipeline).clone().ok_or_else(|| eyre!("pipeline is not streaming"))?;
        let branch = WebrtcBranch::new(pipeline, peer_id, &self.config);
        viewer::spawn(peer_id, SessionSettings::from(&*self.config), branch, &self.peers)?;
        tracing::info!("Peer {peer_id} added to pipeline {}", self.execution_id);
        Ok(())
    }

    fn restart(self: &Arc<Self>) {
        tracing::warn!("RTSP source {} is unreachable, restarting", self.rtsp_url);
        if let Err(err) = self.stop_streaming() {
            tracing::error!("Failed to stop pipeline {}: {err:#}", self.execution_id);
        }
        let Some(addr) = rtsp_socket_addr(&self.rtsp_url) else {
            tracing::error!("Can't probe {}, giving up", self.rtsp_url);
            return;
        };
        let interval = self.config.source_retry_interval();
        while !probe_tcp(&addr, interval) {
            if self.closed.load(Ordering::SeqCst) {
                return;
            }
            thread::sleep(interval);
        }
        match self.start_streaming() {
            Ok(()) => {}
            Err(err) if self.closed.load(Ordering::SeqCst) => {
                tracing::info!("Not restarting pipeline {}: {err:#}", self.execution_id);
            }
            Err(err) => {
                tracing::error!("Failed to restart pipeline {}: {err:#}", self.execution_id);
            }
        }
    }
}

fn watch_bus(
    handler: &Weak<RtspPipelineHandler>,
    pipeline: &glib::WeakRef<Pipeline>,
    bus: &gstreamer::Bus,
) {
    loop {
        if pipeline.upgrade().is_none() {
            break;
        }
        let Some(message) = bus.timed_pop(BUS_POLL_INTERVAL) else {
            continue;
        };
        match bus::classify(&message) {
            Verdict::Continue => {}
            Verdict::Stop => break,
            Verdict::Restart => {
                if let Some(handler) = handler.upgrade() {
                    handler.restart();
                }
                break;
            }
        }
    }
    tracing::debug!("Bus watch finished");
}

/// Running pipelines keyed by execution id.
#[derive(Default)]
pub struct PipelineHandlers {
    handlers: Mutex<HashMap<u32, Arc<RtspPipelineHandler>>>,
}

impl PipelineHandlers {
    /// Registers `handler`, replacing any with the same execution id.
    pub fn insert(&self, handler: Arc<RtspPipelineHandler>) {
        lock(&self.handlers).insert(handler.execution_id(), handler);
    }

    /// Looks up a handler.
    #[must_use]
    pub fn get(&self, execution_id: u32) -> Option<Arc<RtspPipelineHandler>> {
        lock(&self.handlers).get(&execution_id).cloned()
    }

    /// Unregisters a handler without stopping it.
    pub fn remove(&self, execution_id: u32) -> Option<Arc<RtspPipelineHandler>> {
        lock(&self.handlers).remove(&execution_id)
    }

    /// Closes and unregisters every handler.
    pub fn close_all(&self) {
        let handlers: Vec<_> = lock(&self.handlers).drain().map(|(_, handler)| handler).collect();
        for handler in handlers {
            if let Err(err) = handler.close() {
                tracing::error!("Failed to close pipeline {}: {err:#}", handler.execution_id());
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(device_id: &str) -> Arc<RtspPipelineHandler> {
        let config = Config { recording_dir: PathBuf::from("/var/rec"), ..Config::default() };
        RtspPipelineHandler::new(17, device_id, "rtsp://10.0.0.5:8554/cam", Arc::new(config))
    }

    #[test]
    fn file_names() {
        let handler = handler("");
        assert_eq!(handler.device_id(), "test_device");
        let first = handler.prepare_next_file_name();
        let second = handler.prepare_next_file_name();
        let first = first.strip_prefix("/var/rec").unwrap().to_str().unwrap().to_owned();
        let second = second.strip_prefix("/var/rec").unwrap().to_str().unwrap().to_owned();
        assert!(first.starts_with("test_device__17-1__"), "{first}");
        assert!(second.starts_with("test_device__17-2__"), "{second}");
    }

    #[test]
    fn launch_line() {
        let handler = handler("gate");
        assert_eq!(
            handler.launch_line(),
            "tee name=videotee ! queue ! fakesink rtspsrc name=rtspsource \
             location=rtsp://10.0.0.5:8554/cam latency=10 drop-on-latency=true ! \
             rtph264depay name=rtspdepay ! videotee."
        );
    }

    #[test]
    fn peers_need_a_running_pipeline() {
        let handler = handler("gate");
        assert!(!handler.is_streaming());
        assert!(handler.add_peer("1").is_err());
        assert!(handler.peer_ids().is_empty());
        handler.stop_streaming().unwrap();
    }

    #[test]
    fn closed_handler_does_not_start() {
        let handler = handler("gate");
        handler.close().unwrap();
        assert!(handler.start_streaming().is_err());
        assert!(!handler.is_streaming());
    }

    #[test]
    fn registry() {
        let handlers = PipelineHandlers::default();
        handlers.insert(handler("gate"));
        assert_eq!(handlers.get(17).map(|handler| handler.execution_id()), Some(17));
        assert!(handlers.get(18).is_none());
        handlers.close_all();
        assert!(handlers.get(17).is_none());
        assert!(handlers.remove(17).is_none());
    }
}
