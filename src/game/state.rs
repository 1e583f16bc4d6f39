//! Battle state owned by a single battle task

use std::collections::{HashMap, HashSet};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::session::ClientId;

use super::combat::{apply_damage, reported_damage, HitResult, Ray, SHOT_DAMAGE};
use super::player::{sanitize_name, PlayerState};

/// A validated shot, hit or miss
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShotOutcome {
    pub ray: Ray,
    pub hit: Option<HitResult>,
}

/// Authoritative player map plus start gating
pub struct BattleState {
    players: HashMap<ClientId, PlayerState>,
    ready: HashSet<ClientId>,
    ready_quorum: usize,
    can_start_announced: bool,
    rng: ChaCha8Rng,
}

impl BattleState {
    pub fn new(seed: u64, ready_quorum: usize) -> Self {
        Self {
            players: HashMap::new(),
            ready: HashSet::new(),
            ready_quorum,
            can_start_announced: false,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    pub fn players(&self) -> &HashMap<ClientId, PlayerState> {
        &self.players
    }

    #[cfg(test)]
    pub fn player(&self, id: &ClientId) -> Option<&PlayerState> {
        self.players.get(id)
    }

    pub fn join(&mut self, id: ClientId, name: Option<&str>) -> &PlayerState {
        let player = PlayerState::spawn(id, sanitize_name(name), &mut self.rng);
        self.players.entry(id).or_insert(player)
    }

    pub fn leave(&mut self, id: &ClientId) -> Option<PlayerState> {
        self.ready.remove(id);
        self.players.remove(id)
    }

    /// Record a ready signal. Returns true exactly once, when the quorum is first reached.
    pub fn set_ready(&mut self, id: ClientId) -> bool {
        if !self.players.contains_key(&id) {
            return false;
        }
        self.ready.insert(id);

        if !self.can_start_announced && self.ready.len() >= self.ready_quorum {
            self.can_start_announced = true;
            return true;
        }
        false
    }

    /// Overwrite a live player's position. Positions are client-reported and not validated.
    pub fn move_player(&mut self, id: &ClientId, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return false;
        }
        match self.players.get_mut(id) {
            Some(player) if player.alive => {
                player.x = x;
                player.y = y;
                true
            }
            _ => false,
        }
    }

    pub fn set_name(&mut self, id: &ClientId, raw: Option<&str>) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.name = sanitize_name(raw);
                true
            }
            None => false,
        }
    }

    /// Client-asserted hit. Only checks that both sides exist and are alive.
    pub fn report_hit(
        &mut self,
        shooter_id: &ClientId,
        target_id: &ClientId,
        raw_damage: Option<&serde_json::Value>,
    ) -> Option<HitResult> {
        if !self.is_alive(shooter_id) || !self.is_alive(target_id) {
            return None;
        }
        self.damage(target_id, reported_damage(raw_damage))
    }

    /// Hitscan from the shooter's claimed origin; the nearest live player on the ray takes the hit.
    pub fn shoot(
        &mut self,
        shooter_id: &ClientId,
        x: f64,
        y: f64,
        dx: f64,
        dy: f64,
    ) -> Option<ShotOutcome> {
        if ![x, y, dx, dy].iter().all(|v| v.is_finite()) || !self.is_alive(shooter_id) {
            return None;
        }

        let ray = Ray::new(x, y, dx, dy);
        let candidates = self
            .players
            .values()
            .filter(|p| p.alive && p.id != *shooter_id)
            .map(|p| (p.id, p.x, p.y));

        let hit = ray
            .first_hit(candidates)
            .and_then(|(target_id, _)| self.damage(&target_id, SHOT_DAMAGE));

        Some(ShotOutcome { ray, hit })
    }

    /// Restore a dead player. Returns false if the player has left.
    pub fn respawn(&mut self, id: &ClientId) -> bool {
        match self.players.get_mut(id) {
            Some(player) => {
                player.respawn(&mut self.rng);
                true
            }
            None => false,
        }
    }

    fn is_alive(&self, id: &ClientId) -> bool {
        self.players.get(id).is_some_and(|p| p.alive)
    }

    fn damage(&mut self, target_id: &ClientId, damage: u32) -> Option<HitResult> {
        let target = self.players.get_mut(target_id)?;
        let (new_hp, killed) = apply_damage(target.hp, damage);
        target.hp = new_hp;
        if killed {
            target.alive = false;
        }

        Some(HitResult {
            target_id: *target_id,
            damage,
            new_hp,
            killed,
        })
    }
}
