//! Relay configuration settings.

use crate::consts::{
    DEFAULT_CLOSE_TIMEOUT_MS, DEFAULT_DEVICE_ID, DEFAULT_RECORDING_DIR,
    DEFAULT_RTSP_LATENCY_MS, DEFAULT_RTSP_URL, DEFAULT_SIGNALLING_SERVER,
    DEFAULT_SOURCE_RETRY_INTERVAL_MS, DEFAULT_STUN_SERVER, H264_BROWSER_PROFILE_LEVEL_ID,
};
use eyre::{ensure, Result, WrapErr};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use url::{Host, Url};

/// Relay configuration settings.
///
/// Every field has a default, so a config file only needs to list the ones it
/// overrides.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// WebSocket URL of the signalling server.
    pub signalling_server: String,
    /// Skip TLS certificate verification for the signalling server. Always
    /// skipped for `localhost` and `127.0.0.1`.
    pub accept_invalid_certs: bool,
    /// STUN server handed to every `webrtcbin`.
    pub stun_server: Option<String>,
    /// Directory for MP4 recordings.
    pub recording_dir: PathBuf,
    /// RTSP URL used when the operator enters none.
    pub default_rtsp_url: String,
    /// Device name used when the operator enters none.
    pub default_device_id: String,
    /// Jitter buffer latency of `rtspsrc`, in milliseconds.
    pub rtsp_latency_ms: u32,
    /// Interval between RTSP socket probes after the source went away, in
    /// milliseconds.
    pub source_retry_interval_ms: u64,
    /// How long a viewer waits for the signalling server to acknowledge a
    /// close, in milliseconds.
    pub close_timeout_ms: u64,
    /// Rewrite the H.264 `profile-level-id` of outgoing offers for browsers.
    pub rewrite_profile_level_id: bool,
    /// The `profile-level-id` written by the rewrite.
    pub profile_level_id: String,
}

impl Config {
    /// Loads the configuration from `path`, or returns the defaults when no
    /// path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            tracing::info!("No config file given, using defaults");
            return Ok(Self::default());
        };
        tracing::info!("Loading config from {}", path.display());
        let contents = fs::read_to_string(path)
            .wrap_err_with(|| format!("failed to read config file {}", path.display()))?;
        tracing::debug!("Config file contents: {contents:#?}");
        let config: Self = serde_json::from_str(&contents)
            .wrap_err_with(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.signalling_server).wrap_err_with(|| {
            format!("signalling server is not a valid URL: {}", self.signalling_server)
        })?;
        ensure!(
            matches!(url.scheme(), "ws" | "wss") && url.host().is_some(),
            "signalling server must be a ws:// or wss:// URL, got {}",
            self.signalling_server
        );
        ensure!(
            self.profile_level_id.len() == 6
                && self.profile_level_id.chars().all(|c| c.is_ascii_hexdigit()),
            "profile-level-id must be 6 hex digits, got {}",
            self.profile_level_id
        );
        ensure!(self.source_retry_interval_ms > 0, "source retry interval must not be zero");
        Ok(())
    }

    /// Interval between RTSP socket probes.
    #[must_use]
    pub fn source_retry_interval(&self) -> Duration {
        Duration::from_millis(self.source_retry_interval_ms)
    }

    /// Close acknowledgement timeout of viewer sessions.
    #[must_use]
    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    /// Whether TLS certificate verification of the signalling server should
    /// be skipped.
    #[must_use]
    pub fn skip_certificate_checks(&self) -> bool {
        self.accept_invalid_certs || is_local_url(&self.signalling_server)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signalling_server: DEFAULT_SIGNALLING_SERVER.to_owned(),
            accept_invalid_certs: false,
            stun_server: Some(DEFAULT_STUN_SERVER.to_owned()),
            recording_dir: PathBuf::from(DEFAULT_RECORDING_DIR),
            default_rtsp_url: DEFAULT_RTSP_URL.to_owned(),
            default_device_id: DEFAULT_DEVICE_ID.to_owned(),
            rtsp_latency_ms: DEFAULT_RTSP_LATENCY_MS,
            source_retry_interval_ms: DEFAULT_SOURCE_RETRY_INTERVAL_MS,
            close_timeout_ms: DEFAULT_CLOSE_TIMEOUT_MS,
            rewrite_profile_level_id: true,
            profile_level_id: H264_BROWSER_PROFILE_LEVEL_ID.to_owned(),
        }
    }
}

/// Whether the host of `url` is the local machine.
fn is_local_url(url: &str) -> bool {
    let Ok(url) = Url::parse(url) else {
        return false;
    };
    match url.host() {
        Some(Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
        Some(Host::Ipv4(ip)) => ip.is_loopback(),
        Some(Host::Ipv6(ip)) => ip.is_loopback(),
        None => false,
    }
}
