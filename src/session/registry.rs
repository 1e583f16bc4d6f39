//! Membership of a single session construct.
//!
//! Every inbound client message is checked against this registry before it
//! reaches game logic, and all outbound delivery goes through it.

use std::collections::BTreeMap;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use super::ClientId;
use crate::ws::protocol::ServerMsg;

/// Connected members of one session and their outbound channels
#[derive(Default)]
pub struct SessionRegistry {
    members: BTreeMap<ClientId, mpsc::Sender<ServerMsg>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a member. Returns false if the id was already present.
    pub fn insert(&mut self, client_id: ClientId, outbox: mpsc::Sender<ServerMsg>) -> bool {
        if self.members.contains_key(&client_id) {
            return false;
        }
        self.members.insert(client_id, outbox);
        true
    }

    pub fn remove(&mut self, client_id: &ClientId) -> bool {
        self.members.remove(client_id).is_some()
    }

    pub fn contains(&self, client_id: &ClientId) -> bool {
        self.members.contains_key(client_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &ClientId> {
        self.members.keys()
    }

    /// Deliver to one member without waiting. Returns false if it was not delivered.
    pub fn send_to(&self, client_id: &ClientId, msg: ServerMsg) -> bool {
        match self.members.get(client_id) {
            Some(outbox) => deliver(client_id, outbox, msg),
            None => false,
        }
    }

    /// Deliver to every member
    pub fn broadcast(&self, msg: &ServerMsg) {
        for (client_id, outbox) in &self.members {
            deliver(client_id, outbox, msg.clone());
        }
    }
}

fn deliver(client_id: &ClientId, outbox: &mpsc::Sender<ServerMsg>, msg: ServerMsg) -> bool {
    match outbox.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(client_id = %client_id, "Outbound buffer full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(client_id = %client_id, "Outbound channel closed");
            false
        }
    }
}
