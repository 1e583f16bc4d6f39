//! Combat system - hitscan and damage

use crate::session::ClientId;

/// Furthest distance along the ray a shot can connect
pub const MAX_RANGE: f64 = 700.0;
/// Max perpendicular distance from the ray for a hit
pub const HIT_RADIUS: f64 = 22.0;
/// Damage dealt by a validated shot
pub const SHOT_DAMAGE: u32 = 10;

/// Client-reported damage bounds
pub const MIN_REPORTED_DAMAGE: u32 = 1;
pub const MAX_REPORTED_DAMAGE: u32 = 50;
pub const DEFAULT_REPORTED_DAMAGE: u32 = 10;

/// A shot ray with a normalized direction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin_x: f64,
    pub origin_y: f64,
    pub dir_x: f64,
    pub dir_y: f64,
}

impl Ray {
    /// Build a ray, normalizing the direction. A zero-length direction is kept as is.
    pub fn new(origin_x: f64, origin_y: f64, dx: f64, dy: f64) -> Self {
        let len = dx.hypot(dy);
        let len = if len == 0.0 { 1.0 } else { len };
        Self {
            origin_x,
            origin_y,
            dir_x: dx / len,
            dir_y: dy / len,
        }
    }

    /// Distance along the ray at which a target at (x, y) is hit, if it is
    pub fn intersect(&self, x: f64, y: f64) -> Option<f64> {
        let to_x = x - self.origin_x;
        let to_y = y - self.origin_y;
        let t = to_x * self.dir_x + to_y * self.dir_y;

        if !(0.0..=MAX_RANGE).contains(&t) {
            return None;
        }

        let closest_x = self.origin_x + self.dir_x * t;
        let closest_y = self.origin_y + self.dir_y * t;
        let distance = (x - closest_x).hypot(y - closest_y);

        (distance <= HIT_RADIUS).then_some(t)
    }

    /// The candidate the ray reaches first. Equal distances resolve to the lower id.
    pub fn first_hit<I>(&self, candidates: I) -> Option<(ClientId, f64)>
    where
        I: IntoIterator<Item = (ClientId, f64, f64)>,
    {
        candidates
            .into_iter()
            .filter_map(|(id, x, y)| self.intersect(x, y).map(|t| (id, t)))
            .min_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
    }
}

/// Clamp a client-asserted damage value. Missing or non-numeric values use the default.
pub fn reported_damage(raw: Option<&serde_json::Value>) -> u32 {
    match raw.and_then(|v| v.as_f64()).filter(|d| d.is_finite()) {
        Some(dmg) => dmg.clamp(MIN_REPORTED_DAMAGE as f64, MAX_REPORTED_DAMAGE as f64) as u32,
        None => DEFAULT_REPORTED_DAMAGE,
    }
}

/// Apply damage to health, returns (new_hp, is_dead)
pub fn apply_damage(hp: u32, damage: u32) -> (u32, bool) {
    let new_hp = hp.saturating_sub(damage);
    (new_hp, new_hp == 0)
}

/// Outcome of damage landing on a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitResult {
    pub target_id: ClientId,
    pub damage: u32,
    pub new_hp: u32,
    pub killed: bool,
}
