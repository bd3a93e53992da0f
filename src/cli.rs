//! Command Line Interfaces of the binaries.

use crate::consts::DEFAULT_RTSP_PORT;
use clap::Parser;
use std::path::PathBuf;

/// Plays a test video pattern in a window.
#[derive(Parser, Debug)]
#[clap(about, version = env!("GIT_VERSION"))]
pub struct VideoTestCli {}

/// Test RTSP server streaming KLV metadata.
#[derive(Parser, Debug)]
#[clap(about, version = env!("GIT_VERSION"))]
pub struct KlvServerCli {
    /// Port to listen on.
    #[clap(short = 'p', long, default_value = DEFAULT_RTSP_PORT)]
    pub port: String,
}

/// Records an RTSP stream and forwards it to a second pipeline on demand.
#[derive(Parser, Debug)]
#[clap(about, version = env!("GIT_VERSION"))]
pub struct MultiPipelineCli {
    /// Load config from file.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
}

/// Relays an RTSP stream to WebRTC viewers and records it.
#[derive(Parser, Debug)]
#[clap(about, version = env!("GIT_VERSION"))]
pub struct RelayCli {
    /// Load config from file.
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,
}
