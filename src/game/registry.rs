//! Directory of live battles

use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::BattleConfig;
use crate::matchmaking::{MatchHandoff, PendingMatch};
use crate::session::{JoinError, JoinOptions, SessionHandle};

use super::BattleSession;

/// A live battle and whether it is held for a matchmade pair
#[derive(Clone)]
struct BattleEntry {
    handle: SessionHandle,
    reserved: bool,
}

/// Registry of all active battles
#[derive(Clone)]
pub struct BattleRegistry {
    battles: Arc<DashMap<Uuid, BattleEntry>>,
    config: Arc<BattleConfig>,
}

impl BattleRegistry {
    pub fn new(config: BattleConfig) -> Self {
        Self {
            battles: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    /// Start an open battle under `id`; it unregisters itself when it ends
    pub fn spawn_battle(&self, id: Uuid) -> SessionHandle {
        let (battle, handle) = BattleSession::new(id, self.config.clone(), rand::random::<u64>());
        self.launch(battle, handle, false)
    }

    /// Start a battle that only the holders of `seats` may join
    pub fn spawn_reserved(&self, id: Uuid, seats: impl IntoIterator<Item = Uuid>) -> SessionHandle {
        let (battle, handle) = BattleSession::new(id, self.config.clone(), rand::random::<u64>());
        self.launch(battle.with_seats(seats), handle, true)
    }

    fn launch(&self, battle: BattleSession, handle: SessionHandle, reserved: bool) -> SessionHandle {
        let id = handle.id;
        self.battles.insert(
            id,
            BattleEntry {
                handle: handle.clone(),
                reserved,
            },
        );

        let battles = self.battles.clone();
        tokio::spawn(async move {
            battle.run().await;
            battles.remove(&id);
            info!(battle_id = %id, "Battle removed from registry");
        });

        handle
    }

    pub fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        self.battles
            .get(id)
            .map(|b| b.value().handle.clone())
            .filter(|handle| !handle.is_closed())
    }

    pub fn active_battles(&self) -> usize {
        self.battles.len()
    }

    pub fn total_players(&self) -> usize {
        self.battles.iter().map(|b| b.value().handle.member_count()).sum()
    }

    /// Find a running open battle with free seats
    pub fn find_available(&self) -> Option<SessionHandle> {
        self.battles
            .iter()
            .find(|b| {
                let entry = b.value();
                !entry.reserved
                    && !entry.handle.is_closed()
                    && entry.handle.member_count() < self.config.max_members
            })
            .map(|b| b.value().handle.clone())
    }

    /// Pick the battle a connection should join
    pub fn resolve(&self, options: &JoinOptions) -> Result<SessionHandle, JoinError> {
        if let Some(match_id) = options.match_id {
            return self.get(&match_id).ok_or(JoinError::MatchNotFound(match_id));
        }

        if self.config.require_matchmaking {
            return Err(JoinError::MatchRequired);
        }

        if let Some(battle) = self.find_available() {
            return Ok(battle);
        }
        Ok(self.spawn_battle(Uuid::new_v4()))
    }
}

impl MatchHandoff for BattleRegistry {
    fn start_match(&self, pending: &PendingMatch) {
        self.spawn_reserved(pending.match_id, pending.seats);
        info!(
            match_id = %pending.match_id,
            player1 = %pending.players[0].client_id,
            player2 = %pending.players[1].client_id,
            "Battle created for accepted match"
        );
    }
}
