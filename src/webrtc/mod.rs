//! WebRTC side of the relay: the per-viewer GStreamer branch and the viewer
//! sessions driving it.

pub mod branch;
pub mod sdp;
pub mod viewer;

pub use self::{
    branch::WebrtcBranch,
    viewer::{PeerMap, ViewerHandle},
};
