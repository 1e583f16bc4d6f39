//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::session::ClientId;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct Ticket {
    pub client_id: ClientId,
    pub name: String,
    pub joined_at: Instant,
}

impl Ticket {
    pub fn new(client_id: ClientId, name: String) -> Self {
        Self {
            client_id,
            name,
            joined_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.joined_at.elapsed()
    }
}

/// FIFO queue of waiting players
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    queue: VecDeque<Ticket>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player at the tail. Returns false if the player is already queued.
    pub fn enqueue(&mut self, ticket: Ticket) -> bool {
        if self.contains(&ticket.client_id) {
            return false;
        }
        self.queue.push_back(ticket);
        true
    }

    /// Remove a player from the queue
    pub fn dequeue(&mut self, client_id: &ClientId) -> Option<Ticket> {
        let pos = self.queue.iter().position(|t| &t.client_id == client_id)?;
        self.queue.remove(pos)
    }

    /// Check if a player is in the queue
    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.queue.iter().any(|t| &t.client_id == client_id)
    }

    /// Get queue length
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Take the two longest-waiting players, if there are two
    pub fn pop_pair(&mut self) -> Option<(Ticket, Ticket)> {
        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;
        Some((first, second))
    }
}

/// A proposed pairing waiting for both players to accept
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub match_id: Uuid,
    pub players: [Ticket; 2],
    pub created_at: Instant,
    /// Battle seat tokens, one per player in `players` order
    pub seats: [Uuid; 2],
    accepted: Vec<ClientId>,
}

impl PendingMatch {
    pub fn new(first: Ticket, second: Ticket) -> Self {
        Self {
            match_id: Uuid::new_v4(),
            players: [first, second],
            created_at: Instant::now(),
            seats: [Uuid::new_v4(), Uuid::new_v4()],
            accepted: Vec::with_capacity(2),
        }
    }

    pub fn involves(&self, client_id: &ClientId) -> bool {
        self.players.iter().any(|t| &t.client_id == client_id)
    }

    /// The other participant
    pub fn opponent_of(&self, client_id: &ClientId) -> Option<&Ticket> {
        match &self.players {
            [a, b] if &a.client_id == client_id => Some(b),
            [a, b] if &b.client_id == client_id => Some(a),
            _ => None,
        }
    }

    pub fn seat_of(&self, client_id: &ClientId) -> Option<Uuid> {
        self.players
            .iter()
            .zip(self.seats)
            .find(|(t, _)| &t.client_id == client_id)
            .map(|(_, seat)| seat)
    }

    /// Record an accept. Non-participants and repeated accepts are not counted.
    pub fn accept(&mut self, client_id: ClientId) -> bool {
        if !self.involves(&client_id) || self.accepted.contains(&client_id) {
            return false;
        }
        self.accepted.push(client_id);
        true
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted.len() == self.players.len()
    }
}
