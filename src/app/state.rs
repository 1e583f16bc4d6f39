//! Application state shared across routes

use std::sync::Arc;

use crate::config::Config;
use crate::game::BattleRegistry;
use crate::matchmaking::{MatchmakingHandle, MatchmakingService};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub matchmaking: MatchmakingHandle,
    pub battles: BattleRegistry,
}

impl AppState {
    /// Build the state; the returned service must be spawned by the caller
    pub fn new(config: Config) -> (Self, MatchmakingService) {
        let config = Arc::new(config);

        // Accepted matches are handed to the battle registry
        let battles = BattleRegistry::new(config.battle.clone());

        let (service, matchmaking) =
            MatchmakingService::new(config.matchmaking.clone(), Arc::new(battles.clone()));

        let state = Self {
            config,
            matchmaking,
            battles,
        };

        (state, service)
    }
}
