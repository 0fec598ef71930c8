//! Interactive receipt classification over chat
//!
//! - `intent` - Typed parsing of commands and per-stage answers
//! - `session` - Per-user queue and dialogue stage, behind per-user locks
//! - `engine` - The state machine and finalize procedure
//! - `messages` - Reply texts

mod engine;
pub mod intent;
pub mod messages;
mod session;

pub use engine::{ConversationEngine, FinalizeOutcome, Inbound, Upload};
pub use intent::{Answer, Command};
pub use session::{Session, SessionGuard, SessionStore, Stage};
