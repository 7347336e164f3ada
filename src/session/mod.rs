//! Trading sessions
//!
//! Turns ticks into trades for one symbol under a strategy and a risk policy,
//! publishing snapshots and events for whatever presents them.

mod bot;
mod types;

pub use bot::{BotSession, SessionHandle};
pub use types::{
    SessionError, SessionEvent, SessionReport, SessionSnapshot, SessionState, SessionStats,
    TradeRecord,
};
