#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::Result;
use rtsp_relay::{
    cli::MultiPipelineCli, config::Config, proxy::MultiPipeline, recording::FileNamer,
    utils::prompt_line,
};

fn main() -> Result<()> {
    let cli = MultiPipelineCli::parse();
    rtsp_relay::init()?;
    let config = Config::load(cli.config.as_deref())?;

    let mut pipelines = MultiPipeline::start(
        &config.default_rtsp_url,
        FileNamer::new(&config.recording_dir),
    )?;
    while let Some(input) = prompt_line("Please enter anything key to start:")? {
        match input.as_str() {
            "" => {}
            "!" => break,
            "psink" => {
                if let Err(err) = pipelines.attach_proxy_sink() {
                    tracing::error!("Failed to attach proxy sink: {err:#}");
                }
            }
            _ => {
                if let Err(err) = pipelines.start_second_recording() {
                    tracing::error!("Failed to start second pipeline: {err:#}");
                }
                println!("Please wait...");
            }
        }
    }
    pipelines.stop();
    Ok(())
}
