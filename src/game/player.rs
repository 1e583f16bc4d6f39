//! Per-combatant state

use rand::Rng;

use crate::session::ClientId;
use crate::ws::protocol::PlayerSnapshot;

pub const MAX_HP: u32 = 100;
pub const DEFAULT_NAME: &str = "Player";
pub const MAX_NAME_CHARS: usize = 16;

/// Spawn rectangle, half-open on the far edges
pub const SPAWN_X: std::ops::Range<u32> = 100..600;
pub const SPAWN_Y: std::ops::Range<u32> = 100..400;

/// Player state in a battle (authoritative)
///
/// `hp == 0` exactly when `alive == false`.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerState {
    pub id: ClientId,
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub hp: u32,
    pub alive: bool,
}

impl PlayerState {
    pub fn spawn<R: Rng>(id: ClientId, name: String, rng: &mut R) -> Self {
        let (x, y) = spawn_position(rng);
        Self {
            id,
            name,
            x,
            y,
            hp: MAX_HP,
            alive: true,
        }
    }

    /// Back to full health at a fresh spawn point
    pub fn respawn<R: Rng>(&mut self, rng: &mut R) {
        let (x, y) = spawn_position(rng);
        self.x = x;
        self.y = y;
        self.hp = MAX_HP;
        self.alive = true;
    }

    pub fn snapshot(&self) -> PlayerSnapshot {
        PlayerSnapshot {
            name: self.name.clone(),
            x: self.x,
            y: self.y,
            hp: self.hp,
            alive: self.alive,
        }
    }
}

/// Random point inside the spawn rectangle, on whole units
pub fn spawn_position<R: Rng>(rng: &mut R) -> (f64, f64) {
    (
        rng.gen_range(SPAWN_X) as f64,
        rng.gen_range(SPAWN_Y) as f64,
    )
}

/// Trim, cap at 16 characters, fall back to the default name
pub fn sanitize_name(raw: Option<&str>) -> String {
    let clean: String = raw
        .unwrap_or(DEFAULT_NAME)
        .trim()
        .chars()
        .take(MAX_NAME_CHARS)
        .collect();

    if clean.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        clean
    }
}

#[cfg(test)]
pub fn in_spawn_area(x: f64, y: f64) -> bool {
    (SPAWN_X.start as f64..SPAWN_X.end as f64).contains(&x)
        && (SPAWN_Y.start as f64..SPAWN_Y.end as f64).contains(&y)
}
