//! State synchronization: full snapshots on first contact, field diffs after

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::session::{ClientId, SessionRegistry};
use crate::ws::protocol::{PlayerPatch, PlayerSnapshot, ServerMsg};

use super::player::PlayerState;

/// Capture the player map in a stable order
pub fn capture(players: &HashMap<ClientId, PlayerState>) -> BTreeMap<ClientId, PlayerSnapshot> {
    players.iter().map(|(id, p)| (*id, p.snapshot())).collect()
}

/// Fields of `current` that differ from `previous`
pub fn diff_player(previous: &PlayerSnapshot, current: &PlayerSnapshot) -> PlayerPatch {
    PlayerPatch {
        name: (previous.name != current.name).then(|| current.name.clone()),
        x: (previous.x != current.x).then_some(current.x),
        y: (previous.y != current.y).then_some(current.y),
        hp: (previous.hp != current.hp).then_some(current.hp),
        alive: (previous.alive != current.alive).then_some(current.alive),
    }
}

fn full_patch(current: &PlayerSnapshot) -> PlayerPatch {
    PlayerPatch {
        name: Some(current.name.clone()),
        x: Some(current.x),
        y: Some(current.y),
        hp: Some(current.hp),
        alive: Some(current.alive),
    }
}

/// Difference between two captures
#[derive(Debug, Default, PartialEq)]
pub struct StateDiff {
    pub changed: BTreeMap<ClientId, PlayerPatch>,
    pub removed: Vec<ClientId>,
}

impl StateDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

pub fn diff(
    previous: &BTreeMap<ClientId, PlayerSnapshot>,
    current: &BTreeMap<ClientId, PlayerSnapshot>,
) -> StateDiff {
    let changed = current
        .iter()
        .filter_map(|(id, now)| {
            let patch = match previous.get(id) {
                Some(before) => diff_player(before, now),
                None => full_patch(now),
            };
            (!patch.is_empty()).then_some((*id, patch))
        })
        .collect();

    let removed = previous
        .keys()
        .filter(|id| !current.contains_key(id))
        .copied()
        .collect();

    StateDiff { changed, removed }
}

/// Pushes state to the members of one battle on every patch tick
#[derive(Default)]
pub struct StateSync {
    tick: u64,
    last: BTreeMap<ClientId, PlayerSnapshot>,
    synced: HashSet<ClientId>,
}

impl StateSync {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Send a full snapshot to members that have none yet and the diff to everyone else.
    /// A member whose delivery is dropped gets a full snapshot on the next tick.
    pub fn tick(&mut self, players: &HashMap<ClientId, PlayerState>, members: &SessionRegistry) {
        self.tick += 1;
        let current = capture(players);
        let diff = diff(&self.last, &current);

        let patch = (!diff.is_empty()).then(|| ServerMsg::Patch {
            tick: self.tick,
            changed: diff.changed,
            removed: diff.removed,
        });

        self.synced.retain(|id| members.contains(id));

        for id in members.ids() {
            let delivered = if !self.synced.contains(id) {
                members.send_to(
                    id,
                    ServerMsg::State {
                        tick: self.tick,
                        players: current.clone(),
                    },
                )
            } else if let Some(patch) = &patch {
                members.send_to(id, patch.clone())
            } else {
                true
            };

            if delivered {
                self.synced.insert(*id);
            } else {
                self.synced.remove(id);
            }
        }

        self.last = current;
    }
}
