//! Matchmaking service - pairs queued players and runs the accept handshake

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::MatchmakingConfig;
use crate::game::player::sanitize_name;
use crate::session::{ClientId, JoinOptions, SessionCommand, SessionHandle, SessionRegistry};
use crate::util::timers::TimerSet;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::queue::{MatchmakingQueue, PendingMatch, Ticket};

/// Receives matches once both players have accepted
pub trait MatchHandoff: Send + Sync {
    fn start_match(&self, pending: &PendingMatch);
}

/// Handle to the running matchmaking service
#[derive(Clone)]
pub struct MatchmakingHandle {
    pub session: SessionHandle,
    queued: Arc<AtomicUsize>,
}

impl MatchmakingHandle {
    /// Get current queue size
    pub fn queue_size(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

/// Matchmaking service
pub struct MatchmakingService {
    config: MatchmakingConfig,
    members: SessionRegistry,
    /// Names given at connect time, used when `join_queue` has none
    names: HashMap<ClientId, String>,
    queue: MatchmakingQueue,
    pending: HashMap<Uuid, PendingMatch>,
    timeouts: TimerSet<Uuid>,
    timeout_tx: mpsc::UnboundedSender<Uuid>,
    timeout_rx: mpsc::UnboundedReceiver<Uuid>,
    commands: mpsc::Receiver<SessionCommand>,
    handoff: Arc<dyn MatchHandoff>,
    member_count: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

impl MatchmakingService {
    pub fn new(config: MatchmakingConfig, handoff: Arc<dyn MatchHandoff>) -> (Self, MatchmakingHandle) {
        let (tx, commands) = mpsc::channel(1024);
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();
        let session = SessionHandle::new(Uuid::new_v4(), tx);
        let queued = Arc::new(AtomicUsize::new(0));

        let service = Self {
            config,
            members: SessionRegistry::new(),
            names: HashMap::new(),
            queue: MatchmakingQueue::new(),
            pending: HashMap::new(),
            timeouts: TimerSet::new(),
            timeout_tx,
            timeout_rx,
            commands,
            handoff,
            member_count: session.member_count.clone(),
            queued: queued.clone(),
        };

        (service, MatchmakingHandle { session, queued })
    }

    /// Process commands and match timeouts until every handle is dropped
    pub async fn run(mut self) {
        info!("Matchmaking service started");

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(match_id) = self.timeout_rx.recv() => {
                    self.handle_match_timeout(match_id);
                }
            }
        }

        info!("Matchmaking service stopped");
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Join {
                client_id,
                options,
                outbox,
                reply,
            } => {
                self.handle_join(client_id, options, outbox);
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Message { client_id, msg } => {
                if !self.members.contains(&client_id) {
                    debug!(client_id = %client_id, "Message from non-member dropped");
                    return;
                }
                self.handle_message(client_id, msg);
            }
            SessionCommand::Leave { client_id } => self.handle_leave(client_id),
        }
        self.update_counts();
    }

    fn handle_join(&mut self, client_id: ClientId, options: JoinOptions, outbox: mpsc::Sender<ServerMsg>) {
        if !self.members.insert(client_id, outbox) {
            return;
        }
        info!(
            client_id = %client_id,
            name = options.name.as_deref().unwrap_or_default(),
            "Player connected to matchmaking"
        );
        if let Some(name) = options.name {
            self.names.insert(client_id, name);
        }
    }

    fn handle_message(&mut self, client_id: ClientId, msg: ClientMsg) {
        match msg {
            ClientMsg::JoinQueue { name } => self.enqueue(client_id, name.as_deref()),
            ClientMsg::MatchAccepted { match_id } => self.accept(client_id, match_id),
            _ => debug!(client_id = %client_id, "Battle message ignored in matchmaking"),
        }
    }

    /// Queue a player and try to pair. Already queued or already matched players are ignored.
    fn enqueue(&mut self, client_id: ClientId, name: Option<&str>) {
        if self.pending.values().any(|m| m.involves(&client_id)) {
            debug!(client_id = %client_id, "Player already has a pending match");
            return;
        }

        let name = name.or_else(|| self.names.get(&client_id).map(String::as_str));
        let ticket = Ticket::new(client_id, sanitize_name(name));
        if !self.queue.enqueue(ticket) {
            debug!(client_id = %client_id, "Player already queued");
            return;
        }

        info!(client_id = %client_id, queue_size = self.queue.len(), "Player joined matchmaking queue");
        self.try_pair();
    }

    /// Pair the oldest tickets two at a time and start their accept timers
    fn try_pair(&mut self) {
        while let Some((first, second)) = self.queue.pop_pair() {
            let pending = PendingMatch::new(first, second);
            let match_id = pending.match_id;

            for (player, opponent) in [
                (&pending.players[0], &pending.players[1]),
                (&pending.players[1], &pending.players[0]),
            ] {
                self.members.send_to(
                    &player.client_id,
                    ServerMsg::MatchFound {
                        match_id,
                        opponent: opponent.name.clone(),
                        opponent_id: opponent.client_id,
                    },
                );
            }

            self.timeouts.schedule(
                match_id,
                self.config.accept_timeout,
                self.timeout_tx.clone(),
                match_id,
            );

            info!(
                match_id = %match_id,
                player1 = %pending.players[0].client_id,
                player2 = %pending.players[1].client_id,
                waited_ms = pending.players[0].wait_time().as_millis() as u64,
                "Match found"
            );

            self.pending.insert(match_id, pending);
        }
    }

    fn accept(&mut self, client_id: ClientId, match_id: Uuid) {
        let Some(pending) = self.pending.get_mut(&match_id) else {
            debug!(client_id = %client_id, match_id = %match_id, "Accept for unknown match");
            return;
        };

        if !pending.accept(client_id) {
            return;
        }

        debug!(
            match_id = %match_id,
            client_id = %client_id,
            accepted = pending.accepted_count(),
            "Match accepted"
        );

        if !pending.is_accepted() {
            return;
        }

        let Some(pending) = self.pending.remove(&match_id) else {
            return;
        };
        self.timeouts.cancel(&match_id);

        for (player, seat) in pending.players.iter().zip(pending.seats) {
            self.members
                .send_to(&player.client_id, ServerMsg::MatchStart { match_id, seat });
        }

        info!(
            match_id = %match_id,
            handshake_ms = pending.created_at.elapsed().as_millis() as u64,
            "Match starting"
        );
        self.handoff.start_match(&pending);
    }

    /// A participant leaving cancels their pending match. The other side is not re-queued.
    fn handle_leave(&mut self, client_id: ClientId) {
        if !self.members.remove(&client_id) {
            return;
        }
        self.names.remove(&client_id);
        self.queue.dequeue(&client_id);

        let cancelled: Vec<Uuid> = self
            .pending
            .values()
            .filter(|m| m.involves(&client_id))
            .map(|m| m.match_id)
            .collect();

        for match_id in cancelled {
            self.timeouts.cancel(&match_id);
            if let Some(pending) = self.pending.remove(&match_id) {
                if let Some(opponent) = pending.opponent_of(&client_id) {
                    self.members
                        .send_to(&opponent.client_id, ServerMsg::MatchCancelled { match_id });
                }
                info!(match_id = %match_id, client_id = %client_id, "Match cancelled, player left");
            }
        }

        info!(client_id = %client_id, "Player disconnected from matchmaking");
    }

    /// Unaccepted match expired: connected players go back to the tail of the queue
    fn handle_match_timeout(&mut self, match_id: Uuid) {
        self.timeouts.complete(&match_id);
        let Some(pending) = self.pending.remove(&match_id) else {
            return;
        };

        info!(
            match_id = %match_id,
            accepted = pending.accepted_count(),
            "Match accept timed out"
        );

        for player in pending.players {
            if !self.members.contains(&player.client_id) {
                continue;
            }
            self.members
                .send_to(&player.client_id, ServerMsg::MatchCancelled { match_id });
            self.queue.enqueue(Ticket::new(player.client_id, player.name));
        }

        self.try_pair();
        self.update_counts();
    }

    fn update_counts(&self) {
        self.member_count.store(self.members.len(), Ordering::Relaxed);
        self.queued.store(self.queue.len(), Ordering::Relaxed);
    }
}
