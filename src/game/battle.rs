//! Battle session task: one per match, owns its state and handles messages in order

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BattleConfig;
use crate::session::{ClientId, JoinError, JoinOptions, SessionCommand, SessionHandle, SessionRegistry};
use crate::util::time::unix_millis;
use crate::util::timers::TimerSet;
use crate::ws::protocol::{ClientMsg, ServerMsg};

use super::snapshot::StateSync;
use super::state::BattleState;

/// The authoritative battle
pub struct BattleSession {
    id: Uuid,
    config: Arc<BattleConfig>,
    state: BattleState,
    members: SessionRegistry,
    /// Reserved seat tokens and who holds them. Empty for open battles.
    seats: HashMap<Uuid, Option<ClientId>>,
    sync: StateSync,
    respawns: TimerSet<ClientId>,
    respawn_tx: mpsc::UnboundedSender<ClientId>,
    respawn_rx: mpsc::UnboundedReceiver<ClientId>,
    commands: mpsc::Receiver<SessionCommand>,
    member_count: Arc<AtomicUsize>,
    had_members: bool,
}

impl BattleSession {
    /// Create a new battle
    pub fn new(id: Uuid, config: Arc<BattleConfig>, seed: u64) -> (Self, SessionHandle) {
        let (tx, commands) = mpsc::channel(256);
        let (respawn_tx, respawn_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(id, tx);

        let battle = Self {
            id,
            state: BattleState::new(seed, config.ready_quorum),
            config,
            members: SessionRegistry::new(),
            seats: HashMap::new(),
            sync: StateSync::new(),
            respawns: TimerSet::new(),
            respawn_tx,
            respawn_rx,
            commands,
            member_count: handle.member_count.clone(),
            had_members: false,
        };

        (battle, handle)
    }

    /// Restrict joins to holders of these seat tokens
    pub fn with_seats(mut self, seats: impl IntoIterator<Item = Uuid>) -> Self {
        self.seats = seats.into_iter().map(|seat| (seat, None)).collect();
        self
    }

    /// Run until the last member leaves, or nobody shows up within the seat reservation
    pub async fn run(mut self) {
        info!(battle_id = %self.id, "Battle session opened");

        let mut patch_interval = interval(self.config.patch_rate);
        patch_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let reservation = tokio::time::sleep(self.config.seat_reservation);
        tokio::pin!(reservation);

        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => break,
                },
                Some(client_id) = self.respawn_rx.recv() => {
                    self.handle_respawn(client_id);
                }
                _ = patch_interval.tick() => {
                    self.sync.tick(self.state.players(), &self.members);
                }
                _ = &mut reservation, if !self.had_members => {
                    info!(battle_id = %self.id, ticks = self.sync.tick_count(), "Nobody joined, closing battle");
                    break;
                }
            }

            if self.had_members && self.members.is_empty() {
                info!(battle_id = %self.id, ticks = self.sync.tick_count(), "All players left, closing battle");
                break;
            }
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Join {
                client_id,
                options,
                outbox,
                reply,
            } => {
                let result = self.handle_join(client_id, options, outbox);
                let _ = reply.send(result);
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
    }

    fn handle_join(
        &mut self,
        client_id: ClientId,
        options: JoinOptions,
        outbox: mpsc::Sender<ServerMsg>,
    ) -> Result<(), JoinError> {
        if self.members.contains(&client_id) {
            return Ok(());
        }
        if self.members.len() >= self.config.max_members {
            warn!(battle_id = %self.id, client_id = %client_id, "Battle is full");
            return Err(JoinError::SessionFull);
        }
        if !self.seats.is_empty() {
            self.claim_seat(client_id, options.seat)?;
        }
        self.members.insert(client_id, outbox);

        let player = self.state.join(client_id, options.name.as_deref());
        info!(
            battle_id = %self.id,
            client_id = %client_id,
            name = %player.name,
            x = player.x,
            y = player.y,
            "Player joined battle"
        );

        self.had_members = true;
        self.update_member_count();
        Ok(())
    }

    fn handle_leave(&mut self, client_id: ClientId) {
        if !self.members.remove(&client_id) {
            return;
        }
        self.state.leave(&client_id);
        self.respawns.cancel(&client_id);
        for holder in self.seats.values_mut().filter(|h| **h == Some(client_id)) {
            *holder = None;
        }
        self.update_member_count();

        info!(
            battle_id = %self.id,
            client_id = %client_id,
            remaining = self.members.len(),
            "Player left battle"
        );
    }

    fn claim_seat(&mut self, client_id: ClientId, seat: Option<Uuid>) -> Result<(), JoinError> {
        let holder = seat.and_then(|seat| self.seats.get_mut(&seat));
        match holder {
            Some(holder) if holder.is_none() => {
                *holder = Some(client_id);
                Ok(())
            }
            _ => {
                warn!(battle_id = %self.id, client_id = %client_id, "Join without a free reserved seat");
                Err(JoinError::SeatNotReserved)
            }
        }
    }

    fn handle_message(&mut self, client_id: ClientId, msg: ClientMsg) {
        match msg {
            ClientMsg::Move { x, y } => {
                self.state.move_player(&client_id, x, y);
            }
            ClientMsg::SetName { name } => {
                self.state.set_name(&client_id, name.as_deref());
            }
            ClientMsg::GameReady => self.handle_ready(client_id),
            ClientMsg::Hit { target_id, dmg } => self.handle_hit(client_id, target_id, dmg),
            ClientMsg::Shoot { x, y, dx, dy } => self.handle_shoot(client_id, x, y, dx, dy),
            ClientMsg::StartGame => self.handle_start_request(client_id),
            ClientMsg::JoinQueue { .. } | ClientMsg::MatchAccepted { .. } => {
                debug!(client_id = %client_id, "Matchmaking message ignored in battle");
            }
        }
    }

    fn handle_ready(&mut self, client_id: ClientId) {
        if self.state.set_ready(client_id) {
            info!(battle_id = %self.id, "Ready quorum reached");
            self.members.broadcast(&ServerMsg::GameCanStart {
                timestamp: unix_millis(),
            });
        }
    }

    fn handle_hit(&mut self, shooter_id: ClientId, target_id: ClientId, dmg: Option<serde_json::Value>) {
        if !self.config.allow_client_hits {
            debug!(client_id = %shooter_id, "Client-reported hit rejected");
            return;
        }

        let Some(hit) = self.state.report_hit(&shooter_id, &target_id, dmg.as_ref()) else {
            return;
        };

        if hit.killed {
            self.schedule_respawn(hit.target_id);
        }

        self.members.broadcast(&ServerMsg::HitResult {
            target_id: hit.target_id,
            dmg: hit.damage,
            new_hp: hit.new_hp,
        });
    }

    fn handle_shoot(&mut self, shooter_id: ClientId, x: f64, y: f64, dx: f64, dy: f64) {
        let Some(shot) = self.state.shoot(&shooter_id, x, y, dx, dy) else {
            return;
        };

        if let Some(hit) = shot.hit.filter(|hit| hit.killed) {
            self.schedule_respawn(hit.target_id);
        }

        self.members.broadcast(&ServerMsg::Shot {
            from_id: shooter_id,
            x: shot.ray.origin_x,
            y: shot.ray.origin_y,
            dx: shot.ray.dir_x,
            dy: shot.ray.dir_y,
            hit_id: shot.hit.map(|hit| hit.target_id),
            hit_hp: shot.hit.map(|hit| hit.new_hp),
        });
    }

    fn handle_start_request(&mut self, client_id: ClientId) {
        let count = self.members.len();
        if count < self.config.min_start_members {
            self.members.send_to(
                &client_id,
                ServerMsg::StartBlocked {
                    message: format!(
                        "Need {} players to start. Currently: {}",
                        self.config.min_start_members, count
                    ),
                },
            );
            return;
        }

        info!(battle_id = %self.id, client_id = %client_id, "Game start requested");
        self.members.broadcast(&ServerMsg::GameStart {
            timestamp: unix_millis(),
        });
    }

    fn schedule_respawn(&mut self, client_id: ClientId) {
        self.respawns.schedule(
            client_id,
            self.config.respawn_delay,
            self.respawn_tx.clone(),
            client_id,
        );
        debug!(
            battle_id = %self.id,
            client_id = %client_id,
            pending_respawns = self.respawns.len(),
            "Player died"
        );
    }

    fn handle_respawn(&mut self, client_id: ClientId) {
        self.respawns.complete(&client_id);
        if self.state.respawn(&client_id) {
            debug!(battle_id = %self.id, client_id = %client_id, "Player respawned");
        }
    }

    fn update_member_count(&self) {
        self.member_count.store(self.members.len(), Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::player::{in_spawn_area, MAX_HP};
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio_test::assert_ok;

    struct TestClient {
        id: ClientId,
        rx: mpsc::Receiver<ServerMsg>,
    }

    impl TestClient {
        fn drain(&mut self) -> Vec<ServerMsg> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }

        /// Latest full view of the players built from the state and patch messages received
        fn apply_sync(&mut self, view: &mut BTreeMap<ClientId, crate::ws::protocol::PlayerSnapshot>) {
            for msg in self.drain() {
                match msg {
                    ServerMsg::State { players, .. } => *view = players,
                    ServerMsg::Patch { changed, removed, .. } => {
                        for id in removed {
                            view.remove(&id);
                        }
                        for (id, patch) in changed {
                            let entry = view.entry(id).or_insert_with(|| {
                                crate::ws::protocol::PlayerSnapshot {
                                    name: String::new(),
                                    x: 0.0,
                                    y: 0.0,
                                    hp: 0,
                                    alive: false,
                                }
                            });
                            if let Some(name) = patch.name {
                                entry.name = name;
                            }
                            if let Some(x) = patch.x {
                                entry.x = x;
                            }
                            if let Some(y) = patch.y {
                                entry.y = y;
                            }
                            if let Some(hp) = patch.hp {
                                entry.hp = hp;
                            }
                            if let Some(alive) = patch.alive {
                                entry.alive = alive;
                            }
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    fn test_config() -> BattleConfig {
        BattleConfig {
            max_members: 4,
            ..BattleConfig::default()
        }
    }

    fn spawn_battle(config: BattleConfig) -> (SessionHandle, tokio::task::JoinHandle<()>) {
        let (battle, handle) = BattleSession::new(Uuid::new_v4(), Arc::new(config), 7);
        let task = tokio::spawn(battle.run());
        (handle, task)
    }

    async fn join(handle: &SessionHandle, name: &str) -> TestClient {
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(256);
        let options = JoinOptions {
            name: Some(name.to_string()),
            ..JoinOptions::default()
        };
        assert_ok!(handle.join(id, options, tx).await);
        TestClient { id, rx }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_blocked_with_one_member() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "Solo").await;
        a.drain();

        handle.send_message(a.id, ClientMsg::StartGame).await;
        settle().await;

        let msgs = a.drain();
        let blocked: Vec<_> = msgs
            .iter()
            .filter_map(|m| match m {
                ServerMsg::StartBlocked { message } => Some(message.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(blocked, vec!["Need 2 players to start. Currently: 1"]);
        assert!(!msgs.iter().any(|m| matches!(m, ServerMsg::GameStart { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_broadcast_with_two_members() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        let mut b = join(&handle, "B").await;

        handle.send_message(b.id, ClientMsg::StartGame).await;
        settle().await;

        assert!(a.drain().iter().any(|m| matches!(m, ServerMsg::GameStart { .. })));
        assert!(b.drain().iter().any(|m| matches!(m, ServerMsg::GameStart { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_can_start_once_after_two_distinct_ready() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        let b = join(&handle, "B").await;

        handle.send_message(a.id, ClientMsg::GameReady).await;
        handle.send_message(a.id, ClientMsg::GameReady).await;
        settle().await;
        assert!(!a.drain().iter().any(|m| matches!(m, ServerMsg::GameCanStart { .. })));

        handle.send_message(b.id, ClientMsg::GameReady).await;
        handle.send_message(b.id, ClientMsg::GameReady).await;
        settle().await;
        let can_start = a
            .drain()
            .into_iter()
            .filter(|m| matches!(m, ServerMsg::GameCanStart { .. }))
            .count();
        assert_eq!(can_start, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shot_event_and_hit() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        let b = join(&handle, "B").await;

        handle.send_message(a.id, ClientMsg::Move { x: 0.0, y: 0.0 }).await;
        handle.send_message(b.id, ClientMsg::Move { x: 300.0, y: 0.0 }).await;
        settle().await;
        a.drain();

        handle
            .send_message(a.id, ClientMsg::Shoot { x: 0.0, y: 0.0, dx: 3.0, dy: 0.0 })
            .await;
        settle().await;

        let shot = a
            .drain()
            .into_iter()
            .find(|m| matches!(m, ServerMsg::Shot { .. }))
            .unwrap();
        match shot {
            ServerMsg::Shot { from_id, dx, dy, hit_id, hit_hp, .. } => {
                assert_eq!(from_id, a.id);
                assert_eq!((dx, dy), (1.0, 0.0));
                assert_eq!(hit_id, Some(b.id));
                assert_eq!(hit_hp, Some(90));
            }
            _ => unreachable!(),
        }

        // A miss is still replayed to everyone
        handle
            .send_message(a.id, ClientMsg::Shoot { x: 0.0, y: 0.0, dx: 0.0, dy: 1.0 })
            .await;
        settle().await;
        let miss = a.drain().into_iter().find(|m| matches!(m, ServerMsg::Shot { .. }));
        assert!(matches!(miss, Some(ServerMsg::Shot { hit_id: None, hit_hp: None, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_respawn_two_seconds_after_death() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        let b = join(&handle, "B").await;

        handle.send_message(b.id, ClientMsg::Move { x: 900.0, y: 900.0 }).await;
        for _ in 0..2 {
            handle
                .send_message(a.id, ClientMsg::Hit { target_id: b.id, dmg: Some(json!(50)) })
                .await;
        }
        settle().await;

        let results: Vec<u32> = a
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::HitResult { new_hp, .. } => Some(new_hp),
                _ => None,
            })
            .collect();
        assert_eq!(results, vec![50, 0]);

        let mut view = BTreeMap::new();
        tokio::time::sleep(Duration::from_millis(100)).await;
        a.apply_sync(&mut view);
        let dead = view.get(&b.id).unwrap();
        assert_eq!((dead.hp, dead.alive), (0, false));

        // Still dead just before the respawn
        tokio::time::sleep(Duration::from_millis(1850)).await;
        a.apply_sync(&mut view);
        assert!(!view.get(&b.id).unwrap().alive);

        tokio::time::sleep(Duration::from_millis(150)).await;
        a.apply_sync(&mut view);
        let respawned = view.get(&b.id).unwrap();
        assert_eq!((respawned.hp, respawned.alive), (MAX_HP, true));
        assert!(in_spawn_area(respawned.x, respawned.y));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shot_kill_respawns_two_seconds_later() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        let b = join(&handle, "B").await;

        handle.send_message(a.id, ClientMsg::Move { x: 0.0, y: 0.0 }).await;
        handle.send_message(b.id, ClientMsg::Move { x: 300.0, y: 0.0 }).await;
        for _ in 0..10 {
            handle
                .send_message(a.id, ClientMsg::Shoot { x: 0.0, y: 0.0, dx: 1.0, dy: 0.0 })
                .await;
        }
        settle().await;

        let mut view = BTreeMap::new();
        let hit_hps: Vec<Option<u32>> = a
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMsg::Shot { hit_hp, .. } => Some(hit_hp),
                ServerMsg::State { players, .. } => {
                    view = players;
                    None
                }
                _ => None,
            })
            .collect();
        let expected: Vec<Option<u32>> = (0..10).rev().map(|n| Some(n * 10)).collect();
        assert_eq!(hit_hps, expected);

        tokio::time::sleep(Duration::from_millis(100)).await;
        a.apply_sync(&mut view);
        let dead = view.get(&b.id).unwrap();
        assert_eq!((dead.hp, dead.alive), (0, false));

        tokio::time::sleep(Duration::from_millis(1850)).await;
        a.apply_sync(&mut view);
        assert!(!view.get(&b.id).unwrap().alive);

        tokio::time::sleep(Duration::from_millis(150)).await;
        a.apply_sync(&mut view);
        let respawned = view.get(&b.id).unwrap();
        assert_eq!((respawned.hp, respawned.alive), (MAX_HP, true));
        assert!(in_spawn_area(respawned.x, respawned.y));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaving_while_dead_cancels_respawn() {
        let (mut battle, _handle) = BattleSession::new(Uuid::new_v4(), Arc::new(test_config()), 7);
        let (a, b) = (ClientId::new(), ClientId::new());
        let (tx_a, _rx_a) = mpsc::channel(64);
        let (tx_b, _rx_b) = mpsc::channel(64);
        assert_ok!(battle.handle_join(a, JoinOptions::default(), tx_a));
        assert_ok!(battle.handle_join(b, JoinOptions::default(), tx_b));

        for _ in 0..2 {
            battle.handle_message(a, ClientMsg::Hit { target_id: b, dmg: Some(json!(50)) });
        }
        assert_eq!(battle.respawns.len(), 1);

        battle.handle_leave(b);
        assert_eq!(battle.respawns.len(), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(battle.respawn_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_seat_is_released_on_leave() {
        let seats = [Uuid::new_v4(), Uuid::new_v4()];
        let (battle, handle) = BattleSession::new(Uuid::new_v4(), Arc::new(test_config()), 7);
        let _task = tokio::spawn(battle.with_seats(seats).run());
        let seated = |seat: Uuid| JoinOptions {
            seat: Some(seat),
            ..JoinOptions::default()
        };

        let (tx, _rx_stay) = mpsc::channel(8);
        assert_ok!(handle.join(ClientId::new(), seated(seats[0]), tx).await);
        let first = ClientId::new();
        let (tx, _rx_first) = mpsc::channel(8);
        assert_ok!(handle.join(first, seated(seats[1]), tx).await);

        let (tx, _rx_taken) = mpsc::channel(8);
        let taken = handle.join(ClientId::new(), seated(seats[1]), tx).await;
        assert_eq!(taken, Err(JoinError::SeatNotReserved));

        // Reconnect after a dropped connection
        handle.leave(first).await;
        let (tx, _rx_back) = mpsc::channel(8);
        assert_ok!(handle.join(ClientId::new(), seated(seats[1]), tx).await);
        assert_eq!(handle.member_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_client_hits_can_be_disabled() {
        let config = BattleConfig {
            allow_client_hits: false,
            ..test_config()
        };
        let (handle, _task) = spawn_battle(config);
        let mut a = join(&handle, "A").await;
        let b = join(&handle, "B").await;

        handle
            .send_message(a.id, ClientMsg::Hit { target_id: b.id, dmg: Some(json!(50)) })
            .await;
        settle().await;
        assert!(!a.drain().iter().any(|m| matches!(m, ServerMsg::HitResult { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_battle_refuses_join() {
        let config = BattleConfig {
            max_members: 1,
            ..test_config()
        };
        let (handle, _task) = spawn_battle(config);
        let _a = join(&handle, "A").await;

        let (tx, _rx) = mpsc::channel(8);
        let result = handle.join(ClientId::new(), JoinOptions::default(), tx).await;
        assert_eq!(result, Err(JoinError::SessionFull));
        assert_eq!(handle.member_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_member_messages_are_dropped() {
        let (handle, _task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        a.drain();

        handle.send_message(ClientId::new(), ClientMsg::StartGame).await;
        settle().await;
        assert!(!a.drain().iter().any(|m| matches!(m, ServerMsg::StartBlocked { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_battle_closes_when_last_member_leaves() {
        let (handle, task) = spawn_battle(test_config());
        let mut a = join(&handle, "A").await;
        handle.leave(a.id).await;

        let finished = assert_ok!(tokio::time::timeout(Duration::from_secs(1), task).await);
        assert!(finished.is_ok());
        assert_eq!(handle.member_count(), 0);
        a.drain();
        assert!(matches!(a.rx.try_recv(), Err(TryRecvError::Disconnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclaimed_battle_closes_after_reservation() {
        let (_handle, task) = spawn_battle(test_config());
        let finished = assert_ok!(tokio::time::timeout(Duration::from_secs(16), task).await);
        assert!(finished.is_ok());
    }
}
