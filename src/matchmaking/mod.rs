//! Matchmaking: FIFO queue, pending matches and the accept handshake

pub mod queue;
pub mod service;

pub use queue::PendingMatch;
pub use service::{MatchHandoff, MatchmakingHandle, MatchmakingService};
