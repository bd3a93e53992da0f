//! H.264 offer rewrite for browsers.
//!
//! Cameras often announce a `profile-level-id` browsers refuse to decode even
//! though the stream plays fine. The outgoing offer is patched to announce
//! constrained baseline and to allow level asymmetry.

use gstreamer_sdp::{SDPAttribute, SDPMessageRef};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

const LEVEL_ASYMMETRY_ALLOWED: &str = "level-asymmetry-allowed=1";

static PROFILE_LEVEL_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"profile-level-id=[0-9A-Za-z]*(;|$)").expect("bad regex"));

/// Rewrites an `fmtp` attribute value. Returns `None` when the value has no
/// `profile-level-id`.
#[must_use]
pub fn rewrite_fmtp(value: &str, profile_level_id: &str) -> Option<String> {
    if !value.contains("profile-level-id") {
        return None;
    }
    let mut value = value.to_owned();
    if !value.contains(LEVEL_ASYMMETRY_ALLOWED) {
        value.push(';');
        value.push_str(LEVEL_ASYMMETRY_ALLOWED);
    }
    let value = PROFILE_LEVEL_ID
        .replace(&value, |caps: &Captures| format!("profile-level-id={profile_level_id}{}", &caps[1]));
    Some(value.into_owned())
}

/// Rewrites the first `fmtp` attribute of the first media in `sdp`. Returns
/// whether anything changed.
pub fn rewrite_offer(sdp: &mut SDPMessageRef, profile_level_id: &str) -> bool {
    let Some(media) = sdp.media_mut(0) else {
        tracing::warn!("Offer has no media, leaving it as is");
        return false;
    };
    let rewritten = media.attributes().enumerate().find_map(|(idx, attribute)| {
        if attribute.key() != "fmtp" {
            return None;
        }
        let value = rewrite_fmtp(attribute.value()?, profile_level_id)?;
        Some((idx, value))
    });
    let Some((idx, value)) = rewritten else {
        return false;
    };
    #[allow(clippy::cast_possible_truncation)]
    match media.replace_attribute(idx as u32, SDPAttribute::new("fmtp", Some(&value))) {
        Ok(()) => {
            tracing::info!("Updated fmtp attribute as: {value}");
            true
        }
        Err(err) => {
            tracing::error!("Failed to replace fmtp attribute: {err}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gstreamer_sdp::SDPMessage;

    #[test]
    fn fmtp_rewrite() {
        assert_eq!(
            rewrite_fmtp("96 packetization-mode=1;profile-level-id=640028", "42e01f").as_deref(),
            Some("96 packetization-mode=1;profile-level-id=42e01f;level-asymmetry-allowed=1")
        );
        assert_eq!(
            rewrite_fmtp("96 profile-level-id=4d0029;packetization-mode=1", "42e01f").as_deref(),
            Some("96 profile-level-id=42e01f;packetization-mode=1;level-asymmetry-allowed=1")
        );
        // Already allowed, and the id is the last parameter.
        assert_eq!(
            rewrite_fmtp("96 level-asymmetry-allowed=1;profile-level-id=640028", "42e01f")
                .as_deref(),
            Some("96 level-asymmetry-allowed=1;profile-level-id=42e01f")
        );
        assert_eq!(rewrite_fmtp("96 packetization-mode=1", "42e01f"), None);
    }

    #[test]
    fn offer_rewrite() {
        gstreamer::init().unwrap();
        let text = "v=0\r\n\
                    o=- 1 0 IN IP4 0.0.0.0\r\n\
                    s=-\r\n\
                    t=0 0\r\n\
                    m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
                    c=IN IP4 0.0.0.0\r\n\
                    a=rtpmap:96 H264/90000\r\n\
                    a=fmtp:96 packetization-mode=1;profile-level-id=640028\r\n";
        let mut sdp = SDPMessage::parse_buffer(text.as_bytes()).unwrap();
        assert!(rewrite_offer(&mut sdp, "42e01f"));
        let media = sdp.media(0).unwrap();
        assert_eq!(
            media.attribute_val("fmtp"),
            Some("96 packetization-mode=1;profile-level-id=42e01f;level-asymmetry-allowed=1")
        );
        assert_eq!(media.attribute_val("rtpmap"), Some("96 H264/90000"));
    }
}
