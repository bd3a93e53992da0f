//! KLV metadata source.
//!
//! Feeds copies of one MISB ST 0601 UAS datalink local set into an `appsrc`.

use crate::consts::KLV_FRAMES_PER_REQUEST;
use gstreamer::{Buffer, Caps, FlowError, Format};
use gstreamer_app::{AppSrc, AppSrcCallbacks};

/// Sample KLV packet: the 16-byte universal key, a BER long-form length of
/// 0x91 and the local set itself.
pub const KLV_FRAME: [u8; 163] = [
    0x06, 0x0e, 0x2b, 0x34, 0x02, 0x0b, 0x01, 0x01, 0x0e, 0x01, 0x03, 0x01, 0x01, 0x00, 0x00, 0x00,
    0x81, 0x91, 0x02, 0x08, 0x00, 0x04, 0x6c, 0x8e, 0x20, 0x03, 0x83, 0x85, 0x41, 0x01, 0x01, 0x05,
    0x02, 0x3d, 0x3b, 0x06, 0x02, 0x15, 0x80, 0x07, 0x02, 0x01, 0x52, 0x0b, 0x03, 0x45, 0x4f, 0x4e,
    0x0c, 0x0e, 0x47, 0x65, 0x6f, 0x64, 0x65, 0x74, 0x69, 0x63, 0x20, 0x57, 0x47, 0x53, 0x38, 0x34,
    0x0d, 0x04, 0x4d, 0xc4, 0xdc, 0xbb, 0x0e, 0x04, 0xb1, 0xa8, 0x6c, 0xfe, 0x0f, 0x02, 0x1f, 0x4a,
    0x10, 0x02, 0x00, 0x85, 0x11, 0x02, 0x00, 0x4b, 0x12, 0x04, 0x20, 0xc8, 0xd2, 0x7d, 0x13, 0x04,
    0xfc, 0xdd, 0x02, 0xd8, 0x14, 0x04, 0xfe, 0xb8, 0xcb, 0x61, 0x15, 0x04, 0x00, 0x8f, 0x3e, 0x61,
    0x16, 0x04, 0x00, 0x00, 0x01, 0xc9, 0x17, 0x04, 0x4d, 0xdd, 0x8c, 0x2a, 0x18, 0x04, 0xb1, 0xbe,
    0x9e, 0xf4, 0x19, 0x02, 0x0b, 0x85, 0x28, 0x04, 0x4d, 0xdd, 0x8c, 0x2a, 0x29, 0x04, 0xb1, 0xbe,
    0x9e, 0xf4, 0x2a, 0x02, 0x0b, 0x85, 0x38, 0x01, 0x2e, 0x39, 0x04, 0x00, 0x8d, 0xd4, 0x29, 0x01,
    0x02, 0x1c, 0x5f,
];

/// Caps of parsed KLV packets.
#[must_use]
pub fn klv_caps() -> Caps {
    Caps::builder("meta/x-klv").field("parsed", true).build()
}

/// Configures `appsrc` as a live KLV source in time format.
pub fn configure_appsrc(appsrc: &AppSrc) {
    appsrc.set_is_live(true);
    appsrc.set_format(Format::Time);
    appsrc.set_do_timestamp(true);
    appsrc.set_caps(Some(&klv_caps()));
}

/// Pushes `count` copies of [`KLV_FRAME`]. Returns how many were accepted.
pub fn push_frames(appsrc: &AppSrc, count: usize) -> Result<usize, FlowError> {
    for pushed in 0..count {
        if let Err(err) = appsrc.push_buffer(Buffer::from_slice(KLV_FRAME)) {
            tracing::error!("Error in push buffer after {pushed} frames: {err:?}");
            return if pushed == 0 { Err(err) } else { Ok(pushed) };
        }
    }
    Ok(count)
}

/// Feeds a batch of frames every time `appsrc` asks for data.
pub fn feed_on_need_data(appsrc: &AppSrc) {
    appsrc.set_callbacks(
        AppSrcCallbacks::builder()
            .need_data(|appsrc, _| {
                tracing::debug!("Read data started");
                let pushed = push_frames(appsrc, KLV_FRAMES_PER_REQUEST);
                tracing::debug!("Read data stopped: {pushed:?}");
            })
            .build(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_is_a_complete_packet() {
        // Universal key of the UAS datalink local set.
        assert_eq!(&KLV_FRAME[..4], &[0x06, 0x0e, 0x2b, 0x34]);
        // BER long form, one length byte.
        assert_eq!(KLV_FRAME[16], 0x81);
        assert_eq!(usize::from(KLV_FRAME[17]), KLV_FRAME.len() - 18);
    }

    #[test]
    fn appsrc_setup() {
        gstreamer::init().unwrap();
        let appsrc = AppSrc::builder().build();
        configure_appsrc(&appsrc);
        assert!(appsrc.is_live());
        assert_eq!(appsrc.format(), Format::Time);
        assert_eq!(appsrc.caps(), Some(klv_caps()));
    }
}
