//! Utils shared by the pipelines and the signalling sessions.

use crate::consts::RTSP_WELL_KNOWN_PORT;
use eyre::{eyre, Result};
use url::Url;
use std::{
    ffi::CString,
    io::{self, BufRead},
    net::{TcpStream, ToSocketAddrs},
    thread,
    time::Duration,
};

/// Sets the current thread's name as seen by the OS.
pub fn set_proc_name(name: impl AsRef<str>) {
    // Linux limits thread names to 15 bytes plus the terminating NUL.
    let name = name.as_ref().as_bytes();
    let name = &name[..name.len().min(15)];
    if let Ok(title) = CString::new(name) {
        unsafe { libc::prctl(libc::PR_SET_NAME, title.as_ptr(), 0, 0, 0) };
    }
}

/// Spawns a new thread, setting its unix name.
pub fn spawn_named_thread<F, T>(name: impl Into<String>, f: F) -> Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T,
    F: Send + 'static,
    T: Send + 'static,
{
    let name = name.into();
    thread::Builder::new()
        .name(name.clone())
        .spawn(move || {
            set_proc_name(name);
            f()
        })
        .map_err(|err| eyre!("failed to spawn thread: {err}"))
}

/// Extracts the `host:port` of an `rtsp://` URL, defaulting the port to 554.
#[must_use]
pub fn rtsp_socket_addr(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    if !matches!(url.scheme(), "rtsp" | "rtsps" | "rtspt") {
        return None;
    }
    let host = url.host_str().filter(|host| !host.is_empty())?;
    let port = url.port_or_known_default().unwrap_or(RTSP_WELL_KNOWN_PORT);
    Some(format!("{host}:{port}"))
}

/// Checks whether something accepts TCP connections on `addr`.
pub fn probe_tcp(addr: &str, timeout: Duration) -> bool {
    tracing::debug!("Checking RTSP connection to {addr}");
    let Ok(addrs) = addr.to_socket_addrs() else {
        tracing::warn!("Failed to resolve {addr}");
        return false;
    };
    for addr in addrs {
        if TcpStream::connect_timeout(&addr, timeout).is_ok() {
            tracing::debug!("Checking RTSP connection to {addr} - success");
            return true;
        }
    }
    tracing::debug!("Connection to {addr} failed");
    false
}

/// Prints `prompt` and reads one trimmed line from stdin. Returns `None` on
/// end of input.
pub fn prompt_line(prompt: &str) -> Result<Option<String>> {
    println!("{prompt}");
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim().to_owned()))
}
