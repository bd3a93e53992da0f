//! Project constants.

use std::time::Duration;

/// Default signalling server URL.
pub const DEFAULT_SIGNALLING_SERVER: &str = "wss://127.0.0.1:8443";

/// Default STUN server handed to every `webrtcbin`.
pub const DEFAULT_STUN_SERVER: &str = "stun://stun.l.google.com:19302";

/// Default directory for MP4 recordings.
pub const DEFAULT_RECORDING_DIR: &str = "recordings";

/// RTSP URL used when the operator enters none.
pub const DEFAULT_RTSP_URL: &str = "rtsp://127.0.0.1:8554/test";

/// Device name used in recording file names when the operator enters none.
pub const DEFAULT_DEVICE_ID: &str = "test_device";

/// Default RTSP port of the KLV server.
pub const DEFAULT_RTSP_PORT: &str = "8554";

/// Port assumed for `rtsp://` URLs without one.
pub const RTSP_WELL_KNOWN_PORT: u16 = 554;

/// Jitter buffer latency of the relay `rtspsrc`, in milliseconds.
pub const DEFAULT_RTSP_LATENCY_MS: u32 = 10;

/// Jitter buffer latency of the multi-pipeline `rtspsrc`, in milliseconds.
pub const MULTI_PIPELINE_RTSP_LATENCY_MS: u32 = 100;

/// Timeout of the multi-pipeline `watchdog`, in milliseconds.
pub const MULTI_PIPELINE_WATCHDOG_TIMEOUT_MS: u32 = 5000;

/// Interval between RTSP socket probes while waiting for the source to come
/// back, in milliseconds.
pub const DEFAULT_SOURCE_RETRY_INTERVAL_MS: u64 = 2000;

/// Grace period for the recorder to finalize the MP4 file after EOS.
pub const RECORDING_FINALIZE_DELAY: Duration = Duration::from_secs(2);

/// How long a session waits for the signalling server to acknowledge a close,
/// in milliseconds.
pub const DEFAULT_CLOSE_TIMEOUT_MS: u64 = 5000;

/// Name of the tee every consumer branch hangs off.
pub const VIDEO_TEE_NAME: &str = "videotee";

/// Range of the random id registered with the signalling server.
pub const SIGNALLING_ID_RANGE: std::ops::Range<u32> = 10..10000;

/// Close reason sent to viewers when their source pipeline goes away.
pub const SOURCE_DISCONNECTED_REASON: &str =
    "Pipeline closed due to source disconnection, please retry and connect again";

/// H.264 `profile-level-id` browsers accept for the relayed stream.
pub const H264_BROWSER_PROFILE_LEVEL_ID: &str = "42e01f";

/// RTP payload type of the relayed H.264 stream.
pub const H264_PAYLOAD_TYPE: u32 = 96;

/// RTP payload type of the KLV stream.
pub const KLV_PAYLOAD_TYPE: u32 = 98;

/// Mount point of the KLV RTSP server.
pub const KLV_MOUNT_POINT: &str = "/test";

/// Number of KLV frames pushed per `need-data` request.
pub const KLV_FRAMES_PER_REQUEST: usize = 100_000;

/// GStreamer plugins the RTSP to WebRTC relay needs.
pub const RELAY_REQUIRED_PLUGINS: &[&str] = &[
    "coreelements",
    "rtsp",
    "rtp",
    "rtpmanager",
    "videoparsersbad",
    "isomp4",
    "nice",
    "webrtc",
    "dtls",
    "srtp",
    "playback",
];
