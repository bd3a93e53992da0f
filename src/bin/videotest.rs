#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::{eyre, Result};
use gstreamer::{glib, prelude::*, ElementFactory, MessageView, Pipeline, State};
use rtsp_relay::cli::VideoTestCli;

fn main() -> Result<()> {
    VideoTestCli::parse();
    rtsp_relay::init()?;

    let main_loop = glib::MainLoop::new(None, false);
    let pipeline = Pipeline::with_name("videotest-pipeline");
    let source = ElementFactory::make("videotestsrc").name("testsource").build()?;
    let sink = ElementFactory::make("autovideosink").name("videosink").build()?;
    pipeline.add_many([&source, &sink])?;
    source.link(&sink)?;

    let bus = pipeline.bus().ok_or_else(|| eyre!("pipeline has no bus"))?;
    let quit = main_loop.clone();
    let _watch = bus.add_watch(move |_, message| {
        match message.view() {
            MessageView::Eos(_) => {
                tracing::info!("End of stream");
                quit.quit();
            }
            MessageView::Error(err) => {
                tracing::error!("Error: {} ({:?})", err.error(), err.debug());
                quit.quit();
            }
            _ => {}
        }
        glib::ControlFlow::Continue
    })?;

    tracing::info!("Now set pipeline in state playing");
    pipeline.set_state(State::Playing)?;
    tracing::info!("Running...");
    main_loop.run();

    tracing::info!("Returned, stopping playback");
    pipeline.set_state(State::Null)?;
    Ok(())
}
