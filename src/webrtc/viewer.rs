//! Viewer sessions and the peer map they live in.

use crate::{
    signalling::{self, AppState, Event, EventSender, PeerEndpoint, SessionSettings, Stage},
    utils::spawn_named_thread,
};
use eyre::{ensure, Result};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread::JoinHandle,
};
use tokio::{runtime, sync::mpsc};

/// Live viewer sessions keyed by remote peer id.
pub type PeerMap = Arc<Mutex<HashMap<String, ViewerHandle>>>;

/// Handle to a running viewer session.
pub struct ViewerHandle {
    events: EventSender,
    thread: JoinHandle<AppState>,
}

impl ViewerHandle {
    /// Asks the session to end with `reason`.
    pub fn stop(&self, reason: &str) {
        // The session may be gone already.
        self.events.send(Event::Stop(reason.to_owned())).ok();
    }

    /// Waits for the session thread and returns its terminal state.
    pub fn join(self) -> Option<AppState> {
        self.thread.join().ok()
    }
}

/// Locks the peer map.
pub fn lock_peers(peers: &PeerMap) -> MutexGuard<'_, HashMap<String, ViewerHandle>> {
    peers.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Starts a session with `peer_id` on its own thread and records it in
/// `peers`. The record is removed when the session ends.
///
/// Fails if `peer_id` already has a live session.
pub fn spawn<E>(peer_id: &str, settings: SessionSettings, endpoint: E, peers: &PeerMap) -> Result<()>
where
    E: PeerEndpoint + 'static,
{
    let mut map = lock_peers(peers);
    ensure!(!map.contains_key(peer_id), "peer {peer_id} is already connected");
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let peer = peer_id.to_owned();
    let session_tx = events_tx.clone();
    let session_peers = Arc::clone(peers);
    let thread = spawn_named_thread(format!("peer-{peer_id}"), move || {
        let mut endpoint = endpoint;
        let state = match runtime::Builder::new_current_thread().enable_all().build() {
            Ok(rt) => rt.block_on(signalling::run(
                peer.clone(),
                &settings,
                endpoint,
                session_tx,
                events_rx,
            )),
            Err(err) => {
                tracing::error!("Peer {peer}: failed to build the session runtime: {err}");
                endpoint.teardown();
                AppState::Error(Stage::App)
            }
        };
        lock_peers(&session_peers).remove(&peer);
        tracing::info!("Peer {peer} removed");
        state
    })?;
    map.insert(peer_id.to_owned(), ViewerHandle { events: events_tx, thread });
    Ok(())
}

/// Stops every session in `peers` with `reason` and waits for them to end.
pub fn stop_all(peers: &PeerMap, reason: &str) {
    let viewers: Vec<_> = lock_peers(peers).drain().collect();
    for (_, viewer) in &viewers {
        viewer.stop(reason);
    }
    for (peer_id, viewer) in viewers {
        match viewer.join() {
            Some(state) => tracing::info!("Peer {peer_id} stopped in state {state}"),
            None => tracing::error!("Peer {peer_id} session panicked"),
        }
    }
}
