#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::Result;
use gstreamer::glib;
use gstreamer_rtsp_server::prelude::*;
use rtsp_relay::{cli::KlvServerCli, consts::KLV_MOUNT_POINT, rtsp_server};

fn main() -> Result<()> {
    let cli = KlvServerCli::parse();
    rtsp_relay::init()?;

    let main_loop = glib::MainLoop::new(None, false);
    let server = rtsp_server::build(&cli.port)?;
    let _source = server.attach(None)?;
    tracing::info!("Stream ready at rtsp://127.0.0.1:{}{KLV_MOUNT_POINT}", cli.port);
    main_loop.run();
    Ok(())
}
