//! Recorder pipeline feeding a second pipeline through `proxysink`/`proxysrc`.
//!
//! Both pipelines run on the same system clock with the same base time so
//! buffers crossing the proxy keep their running time.

use crate::{
    bus,
    consts::{MULTI_PIPELINE_RTSP_LATENCY_MS, MULTI_PIPELINE_WATCHDOG_TIMEOUT_MS, VIDEO_TEE_NAME},
    recording::{self, FileNamer},
};
use eyre::{eyre, Result};
use gstreamer::{prelude::*, BusSyncReply, ClockTime, ElementFactory, Pipeline, State};
use std::path::Path;

const MAIN_PIPELINE_NAME: &str = "pipeline_1";
const SECOND_PIPELINE_NAME: &str = "pipeline_2";
const PROXY_SINK_NAME: &str = "psink";
const PROXY_SRC_NAME: &str = "proxysrc";

/// Main RTSP recorder pipeline plus an optional second pipeline fed from
/// its proxy sink.
pub struct MultiPipeline {
    main: Pipeline,
    clock: gstreamer::Clock,
    second: Option<Pipeline>,
    namer: FileNamer,
}

/// Launch line of the main pipeline.
#[must_use]
pub fn main_launch_line(rtsp_url: &str) -> String {
    format!(
        "tee name={VIDEO_TEE_NAME} allow-not-linked=true ! queue ! fakesink \
         rtspsrc name=rtspsource location={rtsp_url} latency={MULTI_PIPELINE_RTSP_LATENCY_MS} \
         drop-on-latency=true ! watchdog timeout={MULTI_PIPELINE_WATCHDOG_TIMEOUT_MS} ! \
         rtph264depay name=rtspdepay ! {VIDEO_TEE_NAME}."
    )
}

/// Launch line of the second pipeline, recording to `location`.
#[must_use]
pub fn second_launch_line(location: &Path) -> String {
    format!(
        "{PROXY_SRC_NAME} name={PROXY_SRC_NAME} ! queue leaky=2 ! h264parse config-interval=1 ! \
         mp4mux ! filesink location=\"{}\"",
        location.display()
    )
}

impl MultiPipeline {
    /// Starts the main pipeline reading `rtsp_url` and recording with names
    /// from `namer`.
    pub fn start(rtsp_url: &str, mut namer: FileNamer) -> Result<Self> {
        let main = parse_pipeline(&main_launch_line(rtsp_url))?;
        log_bus_synchronously(&main, MAIN_PIPELINE_NAME)?;
        let clock = gstreamer::SystemClock::obtain();
        main.set_base_time(ClockTime::ZERO);
        main.use_clock(Some(&clock));
        let tee = main.by_name(VIDEO_TEE_NAME).ok_or_else(|| eyre!("pipeline has no {VIDEO_TEE_NAME}"))?;
        recording::attach_recorder(&main, &tee, &namer.next("main_pipeline"))?;
        tracing::info!("Starting pipeline, not transmitting yet");
        if let Err(err) = main.set_state(State::Playing) {
            main.set_state(State::Null).ok();
            return Err(eyre!("unable to start the main pipeline: {err}"));
        }
        tracing::info!("Started main pipeline");
        Ok(Self { main, clock, second: None, namer })
    }

    /// Links a `proxysink` named `psink` to the tee, with a buffer probe on
    /// its sink pad.
    pub fn attach_proxy_sink(&self) -> Result<()> {
        if self.main.by_name(PROXY_SINK_NAME).is_some() {
            return Err(eyre!("{PROXY_SINK_NAME} is already attached"));
        }
        tracing::info!("Proxy sink starting for {MAIN_PIPELINE_NAME}");
        let proxysink = ElementFactory::make("proxysink").name(PROXY_SINK_NAME).build()?;
        self.main.add(&proxysink)?;
        proxysink.sync_state_with_parent()?;
        let tee = self
            .main
            .by_name(VIDEO_TEE_NAME)
            .ok_or_else(|| eyre!("pipeline has no {VIDEO_TEE_NAME}"))?;
        let tee_src =
            tee.request_pad_simple("src_%u").ok_or_else(|| eyre!("tee refused a src pad"))?;
        let sink = proxysink.static_pad("sink").ok_or_else(|| eyre!("proxysink has no sink pad"))?;
        add_buffer_probe(&sink, "proxysink - sink");
        tee_src.link(&sink)?;
        tracing::info!("Proxy sink linked for {MAIN_PIPELINE_NAME}");
        Ok(())
    }

    /// Starts a second pipeline recording what `psink` receives. Replaces a
    /// second pipeline started earlier.
    pub fn start_second_recording(&mut self) -> Result<()> {
        let proxysink = self
            .main
            .by_name(PROXY_SINK_NAME)
            .ok_or_else(|| eyre!("attach {PROXY_SINK_NAME} first"))?;
        self.stop_second();
        let second = parse_pipeline(&second_launch_line(&self.namer.next("test_multipipeline")))?;
        log_bus_synchronously(&second, SECOND_PIPELINE_NAME)?;
        let proxysrc =
            second.by_name(PROXY_SRC_NAME).ok_or_else(|| eyre!("pipeline has no {PROXY_SRC_NAME}"))?;
        proxysrc.set_property("proxysink", &proxysink);
        second.use_clock(Some(&self.clock));
        second.set_base_time(self.main.base_time().unwrap_or(ClockTime::ZERO));
        tracing::info!("Starting {SECOND_PIPELINE_NAME}");
        if let Err(err) = second.set_state(State::Playing) {
            second.set_state(State::Null).ok();
            return Err(eyre!("unable to start {SECOND_PIPELINE_NAME}: {err}"));
        }
        let src = proxysrc.static_pad("src").ok_or_else(|| eyre!("proxysrc has no src pad"))?;
        add_buffer_probe(&src, SECOND_PIPELINE_NAME);
        tracing::info!("Started {SECOND_PIPELINE_NAME}");
        self.second = Some(second);
        Ok(())
    }

    fn stop_second(&mut self) {
        if let Some(second) = self.second.take() {
            if let Err(err) = second.set_state(State::Null) {
                tracing::warn!("Failed to stop {SECOND_PIPELINE_NAME}: {err}");
            }
        }
    }

    /// Stops both pipelines.
    pub fn stop(mut self) {
        self.stop_second();
        if let Err(err) = self.main.set_state(State::Null) {
            tracing::warn!("Failed to stop {MAIN_PIPELINE_NAME}: {err}");
        }
    }
}

fn parse_pipeline(launch_line: &str) -> Result<Pipeline> {
    gstreamer::parse::launch(launch_line)?
        .downcast::<Pipeline>()
        .map_err(|_| eyre!("launch line did not produce a pipeline"))
}

fn log_bus_synchronously(pipeline: &Pipeline, name: &'static str) -> Result<()> {
    let bus = pipeline.bus().ok_or_else(|| eyre!("pipeline has no bus"))?;
    bus.set_sync_handler(move |_, message| {
        bus::log_message(name, message);
        BusSyncReply::Drop
    });
    Ok(())
}

fn add_buffer_probe(pad: &gstreamer::Pad, label: &'static str) {
    pad.add_probe(gstreamer::PadProbeType::BUFFER, move |_, _| {
        tracing::trace!("Buffer passing {label}");
        gstreamer::PadProbeReturn::Ok
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn launch_lines() {
        assert_eq!(
            main_launch_line("rtsp://10.0.0.5/z3-1.mp4"),
            "tee name=videotee allow-not-linked=true ! queue ! fakesink rtspsrc name=rtspsource \
             location=rtsp://10.0.0.5/z3-1.mp4 latency=100 drop-on-latency=true ! \
             watchdog timeout=5000 ! rtph264depay name=rtspdepay ! videotee."
        );
        assert_eq!(
            second_launch_line(Path::new("/rec/test_multipipeline-2__5.mp4")),
            "proxysrc name=proxysrc ! queue leaky=2 ! h264parse config-interval=1 ! mp4mux ! \
             filesink location=\"/rec/test_multipipeline-2__5.mp4\""
        );
    }
}
