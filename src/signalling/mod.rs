//! WebRTC signalling client.
//!
//! One session per remote viewer: register with the signalling server, ask it
//! for a session with the viewer, then exchange the offer/answer and ICE
//! candidates until either side hangs up.

pub mod client;
pub mod message;
pub mod state;

pub use self::{
    client::{run, EventReceiver, EventSender, PeerEndpoint, SessionSettings},
    message::ServerMessage,
    state::{Action, AppState, Event, ProtocolError, Session, Stage},
};
