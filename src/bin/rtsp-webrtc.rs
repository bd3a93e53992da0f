#![warn(clippy::pedantic)]

use clap::Parser;
use eyre::Result;
use rtsp_relay::{
    cli::RelayCli,
    config::Config,
    consts::RELAY_REQUIRED_PLUGINS,
    plugins,
    relay::{PipelineHandlers, RtspPipelineHandler},
    utils::prompt_line,
};
use std::sync::Arc;

fn main() -> Result<()> {
    let cli = RelayCli::parse();
    rtsp_relay::init()?;
    plugins::check(RELAY_REQUIRED_PLUGINS)?;
    let config = Arc::new(Config::load(cli.config.as_deref())?);

    let rtsp_url = match prompt_line("Please enter rtsp url:")? {
        Some(url) if !url.is_empty() => url,
        _ => {
            tracing::info!("Using default rtsp url {}", config.default_rtsp_url);
            config.default_rtsp_url.clone()
        }
    };
    let device_id = prompt_line("Please enter device name:")?.unwrap_or_default();

    let handlers = PipelineHandlers::default();
    let handler =
        RtspPipelineHandler::new(rand::random(), &device_id, &rtsp_url, Arc::clone(&config));
    handler.start_streaming()?;
    handlers.insert(Arc::clone(&handler));

    while let Some(peer_id) = prompt_line("Please enter a peer id:")? {
        match peer_id.as_str() {
            "" => tracing::error!("peer-id is a required argument"),
            "exit" => {
                tracing::info!("Exiting program");
                break;
            }
            peer_id => {
                if let Err(err) = handler.add_peer(peer_id) {
                    tracing::error!("Failed to add peer {peer_id}: {err:#}");
                }
            }
        }
    }
    handlers.close_all();
    Ok(())
}
