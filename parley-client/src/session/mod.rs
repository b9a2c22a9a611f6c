//! Voice session management
//!
//! [`SessionController`] is the public face of the crate: it owns the
//! session object and drives negotiation against the signaling channel.

mod controller;
mod state;

pub use controller::SessionController;
pub use state::{SessionEvent, SessionPhase, SessionStatus};
