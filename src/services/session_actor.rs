//! Per-session actor.
//!
//! One task per session key owns the [`SessionState`], the connection registry
//! and the history scheduler, and handles one [`SessionCommand`] at a time.
//! Nothing else mutates that state, so no locking is involved; different
//! sessions run on independent tasks.

use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use axum::extract::ws::Message;
use tokio::{
    sync::{mpsc, oneshot},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    dto::ws::{SessionInboundMessage, SessionOutboundMessage, UpdateOkPayload, UpdateSongPayload},
    error::ServiceError,
    services::{history_scheduler::HistoryScheduler, identity::ConnectRole},
    state::{
        registry::{Connection, ConnectionId, ConnectionRegistry, OutboundSender, Role},
        session::{MasterIdentity, SessionState},
        storage::StorageSlot,
    },
};

/// Close code sent to a master socket displaced by a newer master.
pub const MASTER_REPLACED_CLOSE_CODE: u16 = 4000;
const MASTER_REPLACED_REASON: &str = "new master connected";

/// Events processed by a session actor, strictly in arrival order.
#[derive(Debug)]
pub enum SessionCommand {
    /// A WebSocket was upgraded; `tx` feeds its writer task.
    Connect {
        connection_id: ConnectionId,
        role: ConnectRole,
        tx: OutboundSender,
    },
    /// A parsed frame from an attached socket.
    Inbound {
        connection_id: ConnectionId,
        message: SessionInboundMessage,
    },
    /// The socket's reader loop ended.
    Closed { connection_id: ConnectionId },
    /// The debounce alarm armed with `generation` expired.
    AlarmFired { generation: u64 },
    /// One-shot read of the current state.
    Snapshot {
        respond_to: oneshot::Sender<SessionState>,
    },
    /// Storage became available; load persisted state if not done yet.
    Reload,
}

/// Cheap, cloneable address of a running session actor.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    key: Arc<str>,
    instance: u64,
    sender: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Wrap the command sender of the actor spawned as `instance` for `key`.
    pub fn new(key: Arc<str>, instance: u64, sender: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self {
            key,
            instance,
            sender,
        }
    }

    /// Session key the actor owns.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Distinguishes successive actors spawned for the same key.
    pub fn instance(&self) -> u64 {
        self.instance
    }

    /// `true` once the actor stopped accepting commands.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Queue a command, failing once the actor stopped.
    pub fn send(&self, command: SessionCommand) -> Result<(), ServiceError> {
        self.sender
            .send(command)
            .map_err(|_| ServiceError::SessionClosed(self.key.to_string()))
    }

    /// Read the current state through the actor loop.
    pub async fn snapshot(&self) -> Result<SessionState, ServiceError> {
        let (respond_to, response) = oneshot::channel();
        self.send(SessionCommand::Snapshot { respond_to })?;
        response
            .await
            .map_err(|_| ServiceError::SessionClosed(self.key.to_string()))
    }
}

/// Owner of one session's state, sockets and history scheduling.
pub struct SessionActor {
    key: String,
    state: SessionState,
    /// Persisted state has been loaded; nothing is written back before that.
    restored: bool,
    /// Song selected while persisted state was still unknown.
    song_touched: bool,
    /// Master connected while persisted state was still unknown.
    master_touched: bool,
    registry: ConnectionRegistry,
    /// Identity of the attached master; cleared when it disconnects while
    /// `state.master_*` keeps describing the last master.
    active_master: Option<MasterIdentity>,
    scheduler: HistoryScheduler,
    storage: Arc<StorageSlot>,
    receiver: mpsc::UnboundedReceiver<SessionCommand>,
    idle_eviction: Option<Duration>,
}

impl SessionActor {
    /// Build an actor and the sender used to address it.
    pub fn new(
        key: String,
        storage: Arc<StorageSlot>,
        debounce_window: Duration,
        idle_eviction: Option<Duration>,
    ) -> (Self, mpsc::UnboundedSender<SessionCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let scheduler =
            HistoryScheduler::new(key.clone(), debounce_window, storage.clone(), sender.clone());
        let actor = Self {
            key,
            state: SessionState::default(),
            restored: false,
            song_touched: false,
            master_touched: false,
            registry: ConnectionRegistry::new(),
            active_master: None,
            scheduler,
            storage,
            receiver,
            idle_eviction,
        };
        (actor, sender)
    }

    /// Restore persisted state, then process commands until evicted.
    ///
    /// `evict` is called once the actor has been idle for the configured period;
    /// it must unregister the actor from its hub and return `true` if it did.
    /// Commands that were already queued at that point are answered or
    /// rejected but never applied: a replacement actor may already own the key.
    pub async fn run<F>(mut self, evict: F)
    where
        F: Fn() -> bool + Send,
    {
        self.ensure_restored().await;
        info!(session = %self.key, restored = self.restored, "session actor started");

        loop {
            let next = match self.idle_eviction.filter(|_| self.is_idle()) {
                Some(limit) => match timeout(limit, self.receiver.recv()).await {
                    Ok(command) => command,
                    Err(_) if evict() => break,
                    Err(_) => continue,
                },
                None => self.receiver.recv().await,
            };

            match next {
                Some(command) => self.handle(command).await,
                None => break,
            }
        }

        self.receiver.close();
        while let Some(command) = self.receiver.recv().await {
            self.reject_after_eviction(command);
        }

        info!(session = %self.key, "session actor stopped");
    }

    fn is_idle(&self) -> bool {
        self.registry.is_empty() && !self.scheduler.has_pending()
    }

    /// Load the persisted state the first time a store is reachable.
    ///
    /// Until that succeeds the actor serves from memory and skips writes, so an
    /// empty in-memory state never overwrites a persisted one. Changes made in
    /// the meantime are layered over the loaded record and written back.
    async fn ensure_restored(&mut self) {
        if self.restored {
            return;
        }

        let store = match self.storage.require().await {
            Ok(store) => store,
            Err(err) => {
                debug!(session = %self.key, error = %err, "persisted session state not loaded yet");
                return;
            }
        };
        let persisted = match store.load_state(self.key.clone()).await {
            Ok(persisted) => persisted,
            Err(err) => {
                warn!(session = %self.key, error = %err, "failed to load session state; serving from memory");
                return;
            }
        };

        let mut state: SessionState = persisted.map(Into::into).unwrap_or_default();
        if self.song_touched {
            state.song_id = self.state.song_id.clone();
            state.transpose_steps = self.state.transpose_steps;
        }
        if self.master_touched {
            state.master_id = self.state.master_id.clone();
            state.master_nickname = self.state.master_nickname.clone();
            state.master_avatar = self.state.master_avatar.clone();
        }

        let changed = state != self.state;
        let local_changes = self.song_touched || self.master_touched;
        self.state = state;
        self.restored = true;
        debug!(session = %self.key, "restored persisted session state");

        if local_changes {
            self.persist_state().await;
        }
        if changed && !self.registry.is_empty() {
            self.broadcast(&self.state.sync_message());
        }

        self.scheduler.restore().await;
    }

    fn reject_after_eviction(&self, command: SessionCommand) {
        match command {
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
            SessionCommand::Connect {
                connection_id, tx, ..
            } => {
                // The client reconnects and reaches the live actor.
                debug!(session = %self.key, connection = %connection_id, "closing socket that raced the eviction");
                let _ = tx.send(Message::Close(None));
            }
            SessionCommand::Inbound { .. }
            | SessionCommand::Closed { .. }
            | SessionCommand::AlarmFired { .. }
            | SessionCommand::Reload => {}
        }
    }

    /// Process a single command.
    pub async fn handle(&mut self, command: SessionCommand) {
        self.ensure_restored().await;

        match command {
            SessionCommand::Connect {
                connection_id,
                role,
                tx,
            } => self.handle_connect(connection_id, role, tx).await,
            SessionCommand::Inbound {
                connection_id,
                message,
            } => self.handle_inbound(connection_id, message).await,
            SessionCommand::Closed { connection_id } => self.handle_closed(connection_id),
            SessionCommand::AlarmFired { generation } => self.scheduler.on_alarm(generation).await,
            SessionCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.state.clone());
            }
            SessionCommand::Reload => {}
        }
    }

    async fn handle_connect(&mut self, id: ConnectionId, role: ConnectRole, tx: OutboundSender) {
        let connection = match role {
            ConnectRole::Follower => Connection::new(id, Role::Follower, tx),
            ConnectRole::Master(identity) => {
                // The previous master is notified and closed before the new one is registered.
                if let Some(previous) = self.registry.take_master() {
                    info!(
                        session = %self.key,
                        previous = %previous.id(),
                        next = %id,
                        "master takeover"
                    );
                    let _ = previous.send(&SessionOutboundMessage::MasterReplaced);
                    let _ = previous.close(MASTER_REPLACED_CLOSE_CODE, MASTER_REPLACED_REASON);
                }

                self.state.set_master(&identity);
                self.master_touched |= !self.restored;
                self.active_master = Some(identity);
                self.persist_state().await;
                Connection::new(id, Role::Master, tx)
            }
        };

        info!(session = %self.key, connection = %id, role = ?connection.role(), "connection attached");
        if connection.send(&self.state.sync_message()).is_err() {
            debug!(session = %self.key, connection = %id, "socket closed before initial sync");
        }
        self.registry.attach(connection);
    }

    async fn handle_inbound(&mut self, id: ConnectionId, message: SessionInboundMessage) {
        match message {
            SessionInboundMessage::Ping => {
                if let Some(connection) = self.registry.get(id) {
                    let _ = connection.send(&SessionOutboundMessage::Pong);
                }
            }
            SessionInboundMessage::UpdateSong(payload) => self.handle_update_song(id, payload).await,
            SessionInboundMessage::Unknown => {}
        }
    }

    async fn handle_update_song(&mut self, id: ConnectionId, payload: UpdateSongPayload) {
        let is_current_master = self
            .registry
            .current_master()
            .is_some_and(|master| master.id() == id);
        let Some(master_id) = self
            .active_master
            .as_ref()
            .filter(|_| is_current_master)
            .map(|master| master.id.clone())
        else {
            debug!(session = %self.key, connection = %id, "dropping update-song from non-master socket");
            return;
        };

        if payload.song_id != self.state.song_id {
            if let Some(song_id) = payload.song_id.clone() {
                self.scheduler.schedule(master_id, song_id).await;
            }
        }

        self.state
            .select_song(payload.song_id, payload.transpose_steps.unwrap_or(0));
        self.song_touched |= !self.restored;
        self.persist_state().await;
        self.broadcast(&self.state.sync_message());

        let followers = self.registry.count(|connection| !connection.is_master());
        if let Some(master) = self.registry.current_master() {
            let _ = master.send(&SessionOutboundMessage::UpdateOk(UpdateOkPayload {
                connected_clients: followers,
            }));
        }
    }

    fn handle_closed(&mut self, id: ConnectionId) {
        let Some(connection) = self.registry.detach(id) else {
            return;
        };

        if connection.is_master() {
            self.active_master = None;
            info!(session = %self.key, connection = %id, "master disconnected");
        } else {
            debug!(session = %self.key, connection = %id, "follower disconnected");
        }
    }

    /// Deliver to every attached socket; a dead socket never stops the others.
    fn broadcast(&self, message: &SessionOutboundMessage) {
        for connection in self.registry.all() {
            if connection.send(message).is_err() {
                debug!(session = %self.key, connection = %connection.id(), "skipping closed socket during broadcast");
            }
        }
    }

    async fn persist_state(&self) {
        if !self.restored {
            debug!(session = %self.key, "persisted state not loaded yet; keeping change in memory");
            return;
        }

        let result = match self.storage.require().await {
            Ok(store) => store
                .save_state(self.key.clone(), self.state.to_entity(SystemTime::now()))
                .await
                .map_err(ServiceError::from),
            Err(err) => Err(err),
        };

        if let Err(err) = result {
            warn!(session = %self.key, error = %err, "failed to persist session state");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::dao::{
        models::SessionStateEntity,
        session_store::{SessionStore, memory::MemorySessionStore},
    };

    const WINDOW: Duration = Duration::from_secs(5);

    struct Socket {
        id: ConnectionId,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Socket {
        /// Next protocol message; panics on anything but a text frame.
        fn next(&mut self) -> SessionOutboundMessage {
            match self.rx.try_recv() {
                Ok(Message::Text(text)) => serde_json::from_str(text.as_str()).unwrap(),
                other => panic!("expected a text frame, got {other:?}"),
            }
        }

        fn next_frame(&mut self) -> Option<Message> {
            self.rx.try_recv().ok()
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "unexpected message");
        }
    }

    async fn actor_with_store() -> (SessionActor, MemorySessionStore) {
        let store = MemorySessionStore::new();
        let storage = Arc::new(StorageSlot::new());
        storage.install(Arc::new(store.clone())).await;
        let (actor, _sender) = SessionActor::new("alice".into(), storage, WINDOW, None);
        (actor, store)
    }

    fn master(id: &str) -> ConnectRole {
        ConnectRole::Master(MasterIdentity {
            id: id.into(),
            nickname: "alice".into(),
            avatar: None,
        })
    }

    async fn connect(actor: &mut SessionActor, role: ConnectRole) -> Socket {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = ConnectionId::new();
        actor
            .handle(SessionCommand::Connect {
                connection_id: id,
                role,
                tx,
            })
            .await;
        Socket { id, rx }
    }

    async fn update_song(actor: &mut SessionActor, socket: &Socket, song: &str, steps: i32) {
        actor
            .handle(SessionCommand::Inbound {
                connection_id: socket.id,
                message: SessionInboundMessage::UpdateSong(UpdateSongPayload {
                    song_id: Some(song.into()),
                    transpose_steps: Some(steps),
                }),
            })
            .await;
    }

    fn sync_song(message: SessionOutboundMessage) -> (Option<String>, Option<i32>, Option<String>) {
        match message {
            SessionOutboundMessage::Sync(payload) => {
                (payload.song_id, payload.transpose_steps, payload.master_id)
            }
            other => panic!("expected sync, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn master_follower_takeover_scenario() {
        let (mut actor, store) = actor_with_store().await;

        let mut first = connect(&mut actor, master("u1")).await;
        assert_eq!(sync_song(first.next()), (None, None, Some("u1".into())));

        update_song(&mut actor, &first, "amazing-grace", 0).await;
        assert_eq!(
            sync_song(first.next()),
            (Some("amazing-grace".into()), Some(0), Some("u1".into()))
        );
        assert_eq!(
            first.next(),
            SessionOutboundMessage::UpdateOk(UpdateOkPayload {
                connected_clients: 0
            })
        );

        let mut follower = connect(&mut actor, ConnectRole::Follower).await;
        assert_eq!(
            sync_song(follower.next()),
            (Some("amazing-grace".into()), Some(0), Some("u1".into()))
        );

        let mut second = connect(&mut actor, master("u2")).await;
        assert_eq!(first.next(), SessionOutboundMessage::MasterReplaced);
        match first.next_frame() {
            Some(Message::Close(Some(frame))) => {
                assert_eq!(frame.code, MASTER_REPLACED_CLOSE_CODE);
                assert_eq!(frame.reason.as_str(), "new master connected");
            }
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(
            sync_song(second.next()),
            (Some("amazing-grace".into()), Some(0), Some("u2".into()))
        );

        // A late update from the displaced master is ignored.
        update_song(&mut actor, &first, "how-great-thou-art", 3).await;
        first.assert_silent();
        follower.assert_silent();
        second.assert_silent();

        let persisted = store.load_state("alice".into()).await.unwrap().unwrap();
        assert_eq!(persisted.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(persisted.master_id.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn update_ok_counts_only_followers() {
        let (mut actor, _store) = actor_with_store().await;
        let mut host = connect(&mut actor, master("u1")).await;
        let mut followers = Vec::new();
        for _ in 0..3 {
            followers.push(connect(&mut actor, ConnectRole::Follower).await);
        }
        host.next();

        update_song(&mut actor, &host, "be-thou-my-vision", 2).await;

        host.next();
        assert_eq!(
            host.next(),
            SessionOutboundMessage::UpdateOk(UpdateOkPayload {
                connected_clients: 3
            })
        );
        for follower in followers.iter_mut() {
            follower.next();
            assert_eq!(
                sync_song(follower.next()),
                (Some("be-thou-my-vision".into()), Some(2), Some("u1".into()))
            );
            follower.assert_silent();
        }
    }

    #[tokio::test]
    async fn followers_cannot_update_but_can_ping() {
        let (mut actor, _store) = actor_with_store().await;
        let mut host = connect(&mut actor, master("u1")).await;
        let mut follower = connect(&mut actor, ConnectRole::Follower).await;
        host.next();
        follower.next();

        update_song(&mut actor, &follower, "rogue", 1).await;
        host.assert_silent();
        follower.assert_silent();

        actor
            .handle(SessionCommand::Inbound {
                connection_id: follower.id,
                message: SessionInboundMessage::Ping,
            })
            .await;
        assert_eq!(follower.next(), SessionOutboundMessage::Pong);
        host.assert_silent();

        // The follower's role never changes, whatever it sends.
        update_song(&mut actor, &follower, "rogue", 1).await;
        follower.assert_silent();
    }

    #[tokio::test]
    async fn broadcast_survives_a_dead_follower() {
        let (mut actor, _store) = actor_with_store().await;
        let mut host = connect(&mut actor, master("u1")).await;
        let mut alive_a = connect(&mut actor, ConnectRole::Follower).await;
        let dead = connect(&mut actor, ConnectRole::Follower).await;
        let mut alive_b = connect(&mut actor, ConnectRole::Follower).await;
        host.next();
        alive_a.next();
        alive_b.next();
        drop(dead.rx);

        update_song(&mut actor, &host, "amazing-grace", 0).await;

        assert!(matches!(alive_a.next(), SessionOutboundMessage::Sync(_)));
        assert!(matches!(alive_b.next(), SessionOutboundMessage::Sync(_)));
        host.next();
        assert_eq!(
            host.next(),
            SessionOutboundMessage::UpdateOk(UpdateOkPayload {
                connected_clients: 3
            })
        );
    }

    #[tokio::test]
    async fn master_disconnect_keeps_last_master_in_snapshot() {
        let (mut actor, _store) = actor_with_store().await;
        let host = connect(&mut actor, master("u1")).await;
        update_song(&mut actor, &host, "amazing-grace", -1).await;

        actor
            .handle(SessionCommand::Closed {
                connection_id: host.id,
            })
            .await;
        assert!(actor.registry.current_master().is_none());
        assert!(actor.active_master.is_none());

        let (respond_to, response) = oneshot::channel();
        actor.handle(SessionCommand::Snapshot { respond_to }).await;
        let snapshot = response.await.unwrap();
        assert_eq!(snapshot.master_id.as_deref(), Some("u1"));
        assert_eq!(snapshot.master_nickname.as_deref(), Some("alice"));
        assert_eq!(snapshot.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(snapshot.transpose_steps, Some(-1));
    }

    #[tokio::test]
    async fn transpose_only_change_does_not_schedule_history() {
        let (mut actor, _store) = actor_with_store().await;
        let host = connect(&mut actor, master("u1")).await;

        update_song(&mut actor, &host, "amazing-grace", 0).await;
        let generation = actor.scheduler.generation();
        update_song(&mut actor, &host, "amazing-grace", 4).await;

        assert_eq!(actor.scheduler.generation(), generation);
        assert_eq!(actor.state.transpose_steps, Some(4));
    }

    #[tokio::test]
    async fn stale_close_after_takeover_keeps_new_master() {
        let (mut actor, _store) = actor_with_store().await;
        let first = connect(&mut actor, master("u1")).await;
        let second = connect(&mut actor, master("u2")).await;

        actor
            .handle(SessionCommand::Closed {
                connection_id: first.id,
            })
            .await;

        assert_eq!(
            actor.registry.current_master().map(Connection::id),
            Some(second.id)
        );
        assert_eq!(
            actor.active_master.as_ref().map(|m| m.id.as_str()),
            Some("u2")
        );
    }

    #[tokio::test]
    async fn works_without_storage() {
        let storage = Arc::new(StorageSlot::new());
        let (mut actor, _sender) = SessionActor::new("alice".into(), storage, WINDOW, None);
        let mut host = connect(&mut actor, master("u1")).await;
        host.next();

        update_song(&mut actor, &host, "amazing-grace", 0).await;
        assert!(matches!(host.next(), SessionOutboundMessage::Sync(_)));
        assert!(matches!(host.next(), SessionOutboundMessage::UpdateOk(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_actor_coalesces_history_and_restores_state() {
        let store = MemorySessionStore::new();
        let storage = Arc::new(StorageSlot::new());
        storage.install(Arc::new(store.clone())).await;

        let (actor, sender) = SessionActor::new("alice".into(), storage.clone(), WINDOW, None);
        let task = tokio::spawn(actor.run(|| false));
        let handle = SessionHandle::new(Arc::from("alice"), 1, sender);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let host = ConnectionId::new();
        handle
            .send(SessionCommand::Connect {
                connection_id: host,
                role: master("u1"),
                tx,
            })
            .unwrap();
        for song in ["a", "b", "c"] {
            handle
                .send(SessionCommand::Inbound {
                    connection_id: host,
                    message: SessionInboundMessage::UpdateSong(UpdateSongPayload {
                        song_id: Some(song.into()),
                        transpose_steps: None,
                    }),
                })
                .unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert!(store.history().is_empty());
        tokio::time::sleep(WINDOW).await;

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].song_id, "c");
        assert_eq!(history[0].master_id, "u1");

        // Drain what the master received; the last sync carries song "c".
        let mut last_song = None;
        while let Ok(Message::Text(text)) = rx.try_recv() {
            if let Ok(SessionOutboundMessage::Sync(payload)) = serde_json::from_str(text.as_str()) {
                last_song = payload.song_id;
            }
        }
        assert_eq!(last_song.as_deref(), Some("c"));
        task.abort();

        // A fresh actor for the same key picks up the persisted state.
        let (actor, sender) = SessionActor::new("alice".into(), storage, WINDOW, None);
        tokio::spawn(actor.run(|| false));
        let handle = SessionHandle::new(Arc::from("alice"), 2, sender);
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.song_id.as_deref(), Some("c"));
        assert_eq!(snapshot.transpose_steps, Some(0));
    }

    fn persisted_state(song: &str, steps: i32, master_id: &str) -> SessionStateEntity {
        SessionStateEntity {
            song_id: Some(song.into()),
            transpose_steps: Some(steps),
            master_id: Some(master_id.into()),
            master_nickname: Some("alice".into()),
            master_avatar: None,
            updated_at: SystemTime::now(),
        }
    }

    #[tokio::test]
    async fn state_is_loaded_once_storage_comes_up() {
        let store = MemorySessionStore::new();
        store
            .save_state("alice".into(), persisted_state("amazing-grace", 3, "u0"))
            .await
            .unwrap();
        let storage = Arc::new(StorageSlot::new());
        let (mut actor, _sender) = SessionActor::new("alice".into(), storage.clone(), WINDOW, None);

        let mut early = connect(&mut actor, ConnectRole::Follower).await;
        assert_eq!(sync_song(early.next()), (None, None, None));

        storage.install(Arc::new(store.clone())).await;
        let (respond_to, response) = oneshot::channel();
        actor.handle(SessionCommand::Snapshot { respond_to }).await;
        let snapshot = response.await.unwrap();
        assert_eq!(snapshot.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(snapshot.transpose_steps, Some(3));
        // Sockets attached before the load are resynced.
        assert_eq!(
            sync_song(early.next()),
            (Some("amazing-grace".into()), Some(3), Some("u0".into()))
        );

        let mut host = connect(&mut actor, master("u1")).await;
        assert_eq!(
            sync_song(host.next()),
            (Some("amazing-grace".into()), Some(3), Some("u1".into()))
        );
        let persisted = store.load_state("alice".into()).await.unwrap().unwrap();
        assert_eq!(persisted.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(persisted.transpose_steps, Some(3));
        assert_eq!(persisted.master_id.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn master_connected_before_storage_is_layered_over_persisted_state() {
        let store = MemorySessionStore::new();
        store
            .save_state("alice".into(), persisted_state("amazing-grace", 3, "u0"))
            .await
            .unwrap();
        let storage = Arc::new(StorageSlot::new());
        let (mut actor, _sender) = SessionActor::new("alice".into(), storage.clone(), WINDOW, None);

        let mut host = connect(&mut actor, master("u1")).await;
        host.next();
        let untouched = store.load_state("alice".into()).await.unwrap().unwrap();
        assert_eq!(untouched.master_id.as_deref(), Some("u0"));

        storage.install(Arc::new(store.clone())).await;
        actor.handle(SessionCommand::Reload).await;

        assert_eq!(
            sync_song(host.next()),
            (Some("amazing-grace".into()), Some(3), Some("u1".into()))
        );
        let persisted = store.load_state("alice".into()).await.unwrap().unwrap();
        assert_eq!(persisted.song_id.as_deref(), Some("amazing-grace"));
        assert_eq!(persisted.master_id.as_deref(), Some("u1"));
    }

    #[tokio::test(start_paused = true)]
    async fn commands_queued_behind_eviction_are_not_applied() {
        let store = MemorySessionStore::new();
        let storage = Arc::new(StorageSlot::new());
        storage.install(Arc::new(store.clone())).await;
        let (actor, sender) = SessionActor::new(
            "alice".into(),
            storage,
            WINDOW,
            Some(Duration::from_secs(30)),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        let (respond_to, response) = oneshot::channel();
        let respond_to = std::sync::Mutex::new(Some(respond_to));
        let late = sender.clone();
        // Simulates a socket resolving the handle just before the hub drops it.
        let evict = move || {
            let _ = late.send(SessionCommand::Connect {
                connection_id: ConnectionId::new(),
                role: master("u9"),
                tx: tx.clone(),
            });
            if let Some(respond_to) = respond_to.lock().unwrap().take() {
                let _ = late.send(SessionCommand::Snapshot { respond_to });
            }
            true
        };

        let task = tokio::spawn(actor.run(evict));
        tokio::time::sleep(Duration::from_secs(31)).await;
        task.await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(Message::Close(None))));
        assert!(rx.try_recv().is_err());
        assert!(response.await.is_ok());
        assert!(sender.is_closed());
        assert!(store.load_state("alice".into()).await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn history_credits_the_master_of_the_last_update() {
        let (mut actor, store) = actor_with_store().await;

        let first = connect(&mut actor, master("u1")).await;
        update_song(&mut actor, &first, "a", 0).await;
        let second = connect(&mut actor, master("u2")).await;
        update_song(&mut actor, &second, "c", 0).await;

        let fired = actor.receiver.recv().await.unwrap();
        assert!(matches!(fired, SessionCommand::AlarmFired { .. }));
        actor.handle(fired).await;

        let history = store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].master_id, "u2");
        assert_eq!(history[0].song_id, "c");
    }

    #[tokio::test(start_paused = true)]
    async fn pending_history_write_blocks_idle_eviction() {
        let store = MemorySessionStore::new();
        let storage = Arc::new(StorageSlot::new());
        storage.install(Arc::new(store.clone())).await;
        let (actor, sender) = SessionActor::new(
            "alice".into(),
            storage,
            WINDOW,
            Some(Duration::from_secs(1)),
        );
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        tokio::spawn(actor.run(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            true
        }));
        let handle = SessionHandle::new(Arc::from("alice"), 1, sender);

        let (tx, _rx) = mpsc::unbounded_channel();
        let host = ConnectionId::new();
        handle
            .send(SessionCommand::Connect {
                connection_id: host,
                role: master("u1"),
                tx,
            })
            .unwrap();
        handle
            .send(SessionCommand::Inbound {
                connection_id: host,
                message: SessionInboundMessage::UpdateSong(UpdateSongPayload {
                    song_id: Some("amazing-grace".into()),
                    transpose_steps: None,
                }),
            })
            .unwrap();
        handle
            .send(SessionCommand::Closed {
                connection_id: host,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 0);
        assert!(!handle.is_closed());
        assert!(store.history().is_empty());

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(store.history().len(), 1);
        assert_eq!(evictions.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(evictions.load(Ordering::SeqCst), 1);
        assert!(handle.is_closed());
    }
}
