//! GStreamer demo programs built around an RTSP to WebRTC relay.
//!
//! # Architecture
//!
//! The heavy lifting (RTP, SDP, ICE, DTLS, muxing) is done by GStreamer
//! elements. This crate wires them together:
//!
//! - [`relay`] runs an RTSP source pipeline that records to MP4 and fans the
//!   H.264 stream out to one `webrtcbin` per remote viewer.
//! - [`signalling`] is the per-viewer session: a state machine driven by the
//!   signalling server and by `webrtcbin` callbacks, see [`signalling::state`].
//! - [`webrtc`] builds and releases the per-viewer GStreamer branch.
//! - [`rtsp_server`], [`proxy`] and the `videotest` binary are smaller demos.
//!
//! # Guidelines
//!
//! The code should be formatted with Rustfmt using the project-level
//! `rustfmt.toml`. E.g. run from the command line: `cargo fmt`.
//!
//! The code should pass clippy lints in pedantic mode. E.g. run from the
//! command line: `cargo clippy`. It's fine to suppress some lint locally with
//! `#[allow(clippy:<lint>)]` attribute.

#![warn(missing_docs, unsafe_op_in_unsafe_fn)]
#![warn(clippy::pedantic)]
#![allow(clippy::doc_markdown, clippy::missing_errors_doc, clippy::missing_panics_doc)]

pub mod bus;
pub mod cli;
pub mod config;
pub mod consts;
pub mod klv;
pub mod logger;
pub mod plugins;
pub mod proxy;
pub mod recording;
pub mod relay;
pub mod rtsp_server;
pub mod signalling;
pub mod utils;
pub mod webrtc;

use eyre::Result;

/// Runs common initialization routines shared by all binaries: error report
/// hooks, logging and GStreamer itself.
pub fn init() -> Result<()> {
    color_eyre::install()?;
    logger::init::<false>();
    gstreamer::init()?;
    tracing::debug!("GStreamer {} initialized", gstreamer::version_string());
    Ok(())
}
