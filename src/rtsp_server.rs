//! Test RTSP server streaming KLV metadata.

use crate::{
    consts::{KLV_MOUNT_POINT, KLV_PAYLOAD_TYPE},
    klv,
};
use eyre::{eyre, Result};
use gstreamer::prelude::*;
use gstreamer_app::AppSrc;
use gstreamer_rtsp_server::{prelude::*, RTSPMedia, RTSPMediaFactory, RTSPServer};

const APPSRC_NAME: &str = "mysrc";

/// Launch line of the KLV media.
#[must_use]
pub fn launch_line() -> String {
    format!("( appsrc name={APPSRC_NAME} ! rtpklvpay name=pay0 pt={KLV_PAYLOAD_TYPE} )")
}

/// Builds a server listening on `port` with the KLV media mounted. The
/// caller attaches it to a main context.
pub fn build(port: &str) -> Result<RTSPServer> {
    let server = RTSPServer::new();
    server.set_service(port);
    let mounts = server.mount_points().ok_or_else(|| eyre!("RTSP server has no mount points"))?;
    let factory = RTSPMediaFactory::new();
    factory.set_launch(&launch_line());
    factory.connect_media_configure(|_, media| {
        if let Err(err) = configure_media(media) {
            tracing::error!("Failed to configure KLV media: {err:#}");
        }
    });
    mounts.add_factory(KLV_MOUNT_POINT, factory);
    Ok(server)
}

fn configure_media(media: &RTSPMedia) -> Result<()> {
    let element = media.element();
    let bin = element
        .downcast_ref::<gstreamer::Bin>()
        .ok_or_else(|| eyre!("media element is not a bin"))?;
    let appsrc = bin
        .by_name_recurse_up(APPSRC_NAME)
        .ok_or_else(|| eyre!("media has no {APPSRC_NAME}"))?
        .downcast::<AppSrc>()
        .map_err(|_| eyre!("{APPSRC_NAME} is not an appsrc"))?;
    klv::configure_appsrc(&appsrc);
    klv::feed_on_need_data(&appsrc);
    tracing::info!("KLV media configured");
    Ok(())
}
