//! Game simulation modules

pub mod battle;
pub mod combat;
pub mod player;
pub mod registry;
pub mod snapshot;
pub mod state;

pub use battle::BattleSession;
pub use registry::BattleRegistry;
