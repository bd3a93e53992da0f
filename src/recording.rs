//! MP4 recording branch and recording file names.

use eyre::{eyre, Result, WrapErr};
use gstreamer::{prelude::*, ElementFactory, Pipeline};
use rand::Rng;
use std::{
    fs,
    path::{Path, PathBuf},
};

const QUEUE_NAME: &str = "queue-recorder";
const PARSER_NAME: &str = "h264parse-recorder";
const MUXER_NAME: &str = "mp4mux-recorder";
const SINK_NAME: &str = "filesink-recorder";

/// Hands out recording file names in a directory.
#[derive(Debug)]
pub struct FileNamer {
    dir: PathBuf,
    count: u32,
}

impl FileNamer {
    /// Creates a namer for `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), count: 0 }
    }

    /// Returns `<dir>/<stem>-<n>__<random>.mp4`, `n` counting from 1.
    pub fn next(&mut self, stem: &str) -> PathBuf {
        self.count += 1;
        let suffix = rand::thread_rng().gen_range(0..i32::MAX);
        let path = self.dir.join(format!("{stem}-{}__{suffix}.mp4", self.count));
        tracing::info!("Next recording file: {}", path.display());
        path
    }

    /// Number of names handed out so far.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }
}

/// Attaches `queue ! h264parse ! mp4mux ! filesink` to a request pad of
/// `tee`, recording to `location`.
pub fn attach_recorder(pipeline: &Pipeline, tee: &gstreamer::Element, location: &Path) -> Result<()> {
    if let Some(dir) = location.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .wrap_err_with(|| format!("failed to create recording directory {}", dir.display()))?;
    }
    let queue = ElementFactory::make("queue").name(QUEUE_NAME).build()?;
    let parser = ElementFactory::make("h264parse")
        .name(PARSER_NAME)
        .property("config-interval", 1_i32)
        .build()?;
    let muxer = ElementFactory::make("mp4mux").name(MUXER_NAME).build()?;
    let sink = ElementFactory::make("filesink")
        .name(SINK_NAME)
        .property("location", &*location.to_string_lossy())
        .build()?;
    pipeline.add_many([&queue, &parser, &muxer, &sink])?;
    gstreamer::Element::link_many([&queue, &parser, &muxer, &sink])?;
    let tee_src = tee.request_pad_simple("src_%u").ok_or_else(|| eyre!("tee refused a src pad"))?;
    let queue_sink = queue.static_pad("sink").ok_or_else(|| eyre!("queue has no sink pad"))?;
    tee_src.link(&queue_sink)?;
    for element in [&queue, &parser, &muxer, &sink] {
        element.sync_state_with_parent()?;
    }
    tracing::info!("Recording to {}", location.display());
    Ok(())
}

/// Pushes EOS into the recorder branch so the muxer writes its index while
/// the rest of the pipeline keeps running.
pub fn finish_recording(pipeline: &Pipeline) -> Result<()> {
    let queue = pipeline.by_name(QUEUE_NAME).ok_or_else(|| eyre!("pipeline has no recorder"))?;
    // Forward the EOS to the bus so the rest of the pipeline notices it.
    pipeline.set_property("message-forward", true);
    let sink = queue.static_pad("sink").ok_or_else(|| eyre!("queue has no sink pad"))?;
    if !sink.send_event(gstreamer::event::Eos::new()) {
        tracing::warn!("Recorder did not accept EOS");
    }
    Ok(())
}
