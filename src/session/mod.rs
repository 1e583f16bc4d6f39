//! Session constructs: the shared envelope between connections and the
//! sequential tasks (matchmaking lobby, battles) that own game state.

pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

pub use registry::SessionRegistry;

/// Opaque per-connection identifier, unique within a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(Uuid);

impl ClientId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ClientId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Options supplied when a connection joins a session
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JoinOptions {
    /// Display name
    pub name: Option<String>,
    /// Match handed out by matchmaking (battles only)
    #[serde(alias = "matchId")]
    pub match_id: Option<Uuid>,
    /// Seat token from `match_start`, required by matchmade battles
    pub seat: Option<Uuid>,
}

/// Reasons a join is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("Session is full")]
    SessionFull,

    #[error("No battle exists for match {0}")]
    MatchNotFound(Uuid),

    #[error("Battles can only be joined through matchmaking")]
    MatchRequired,

    #[error("Battle is reserved for its matched players")]
    SeatNotReserved,

    #[error("Session is closed")]
    SessionClosed,
}

impl JoinError {
    /// Short machine-readable code for `error` messages
    pub fn code(&self) -> &'static str {
        match self {
            JoinError::SessionFull => "session_full",
            JoinError::MatchNotFound(_) => "match_not_found",
            JoinError::MatchRequired => "match_required",
            JoinError::SeatNotReserved => "seat_not_reserved",
            JoinError::SessionClosed => "session_closed",
        }
    }
}

/// Commands a connection sends to its session task
#[derive(Debug)]
pub enum SessionCommand {
    Join {
        client_id: ClientId,
        options: JoinOptions,
        outbox: mpsc::Sender<ServerMsg>,
        reply: oneshot::Sender<Result<(), JoinError>>,
    },
    Message {
        client_id: ClientId,
        msg: ClientMsg,
    },
    Leave {
        client_id: ClientId,
    },
}

/// Handle to a running session task
#[derive(Clone, Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub tx: mpsc::Sender<SessionCommand>,
    pub member_count: Arc<AtomicUsize>,
}

impl SessionHandle {
    pub fn new(id: Uuid, tx: mpsc::Sender<SessionCommand>) -> Self {
        Self {
            id,
            tx,
            member_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn member_count(&self) -> usize {
        self.member_count.load(Ordering::Relaxed)
    }

    /// True once the session task has stopped taking commands
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Join the session, waiting for it to accept or refuse
    pub async fn join(
        &self,
        client_id: ClientId,
        options: JoinOptions,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(), JoinError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(SessionCommand::Join {
                client_id,
                options,
                outbox,
                reply,
            })
            .await
            .map_err(|_| JoinError::SessionClosed)?;
        response.await.unwrap_or(Err(JoinError::SessionClosed))
    }

    /// Forward a client message, returns false if the session is gone
    pub async fn send_message(&self, client_id: ClientId, msg: ClientMsg) -> bool {
        self.tx
            .send(SessionCommand::Message { client_id, msg })
            .await
            .is_ok()
    }

    pub async fn leave(&self, client_id: ClientId) {
        let _ = self.tx.send(SessionCommand::Leave { client_id }).await;
    }
}
