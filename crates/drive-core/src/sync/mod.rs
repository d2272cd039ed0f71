//! Session orchestration
//!
//! [`MirrorSession`] drives passes; [`SyncState`] decides when a pass may
//! start, so triggers that arrive during a pass collapse into one trailing
//! pass; [`Teardown`] releases the session's handles on every exit path.

mod session;
mod state;
mod teardown;

pub use session::{MirrorSession, SessionReport};
pub use state::{SyncState, Transition};
pub use teardown::Teardown;
