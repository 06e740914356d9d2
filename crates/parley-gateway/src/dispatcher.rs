use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, mpsc};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use parley_db::models::to_millis;
use parley_types::SyncError;
use parley_types::events::{ClientIntent, IntentLimits, ServerEvent};
use parley_types::models::{Message, MessageKind, MessageReceipt, PresenceState};

use crate::Services;
use crate::auth::TokenValidator;
use crate::locks::KeyedLocks;
use crate::membership::require_member;
use crate::presence::PresenceTracker;
use crate::typing::TypingTracker;

/// An authenticated connection. A user may hold several at once.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub limits: IntentLimits,
    /// Upper bound on the identify handshake and on `connect` itself.
    pub auth_timeout: Duration,
    pub typing_ttl: Duration,
    pub typing_sweep_interval: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            limits: IntentLimits::default(),
            auth_timeout: Duration::from_secs(10),
            typing_ttl: Duration::from_secs(6),
            typing_sweep_interval: Duration::from_secs(1),
            heartbeat_interval: Duration::from_secs(15),
        }
    }
}

struct SessionEntry {
    user_id: Uuid,
    tx: mpsc::UnboundedSender<ServerEvent>,
    chats: HashSet<Uuid>,
}

/// Live sessions and the rooms (chat -> session ids) they joined.
#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, SessionEntry>,
    rooms: HashMap<Uuid, HashSet<Uuid>>,
}

impl Registry {
    fn leave(&mut self, session_id: Uuid, chat_id: Uuid) {
        if let Some(room) = self.rooms.get_mut(&chat_id) {
            room.remove(&session_id);
            if room.is_empty() {
                self.rooms.remove(&chat_id);
            }
        }
    }
}

/// Routes intents to the aggregators and fans the resulting events out to
/// every session subscribed to the affected chat.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    config: DispatcherConfig,
    validator: TokenValidator,
    services: Arc<Services>,
    presence: PresenceTracker,
    typing: TypingTracker,

    /// Held from the store write through the broadcast, so per-chat
    /// broadcast order is commit order.
    chat_locks: KeyedLocks<Uuid>,

    /// Serializes presence transitions of one user with their fan-out.
    user_locks: KeyedLocks<Uuid>,

    registry: RwLock<Registry>,
}

impl Dispatcher {
    pub fn new(services: Arc<Services>, validator: TokenValidator, config: DispatcherConfig) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                presence: PresenceTracker::new(),
                typing: TypingTracker::new(config.typing_ttl),
                config,
                validator,
                services,
                chat_locks: KeyedLocks::new(),
                user_locks: KeyedLocks::new(),
                registry: RwLock::new(Registry::default()),
            }),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.inner.config
    }

    pub fn services(&self) -> Arc<Services> {
        self.inner.services.clone()
    }

    pub fn validator(&self) -> &TokenValidator {
        &self.inner.validator
    }

    // ── Session lifecycle ───────────────────────────────────────────────

    /// Authenticate and bind a new session. The returned queue starts with
    /// `session:ready`; the session joins no rooms.
    pub async fn connect(&self, token: &str) -> Result<(Session, mpsc::UnboundedReceiver<ServerEvent>), SyncError> {
        let session = tokio::time::timeout(self.inner.config.auth_timeout, self.authenticate(token))
            .await
            .map_err(|_| SyncError::Auth("authentication timed out".into()))??;

        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ServerEvent::Ready {
            user_id: session.user_id,
            username: session.username.clone(),
            session_id: session.id,
        });

        {
            let mut registry = self.inner.registry.write().await;
            registry.sessions.insert(
                session.id,
                SessionEntry {
                    user_id: session.user_id,
                    tx,
                    chats: HashSet::new(),
                },
            );
        }

        let _user_guard = self.inner.user_locks.lock(session.user_id).await;
        if self.inner.presence.on_connect(session.user_id) {
            info!("{} ({}) is online", session.username, session.user_id);
            let event = ServerEvent::UserOnline {
                user_id: session.user_id,
            };
            self.fan_out_presence(session.user_id, event).await;
        }

        Ok((session, rx))
    }

    async fn authenticate(&self, token: &str) -> Result<Session, SyncError> {
        let claims = self.inner.validator.validate(token)?;
        let (user_id, username) = (claims.sub, claims.username);

        let name = username.clone();
        self.blocking(move |s| Ok(s.db.upsert_user(&user_id.to_string(), &name)?))
            .await?;

        Ok(Session {
            id: Uuid::new_v4(),
            user_id,
            username,
        })
    }

    /// Leave every room and release the connection's presence.
    pub async fn disconnect(&self, session: &Session) {
        {
            let mut registry = self.inner.registry.write().await;
            if let Some(entry) = registry.sessions.remove(&session.id) {
                for chat_id in entry.chats {
                    registry.leave(session.id, chat_id);
                }
            }
        }

        let _user_guard = self.inner.user_locks.lock(session.user_id).await;
        let Some(last_seen) = self.inner.presence.on_disconnect(session.user_id, crate::now()) else {
            return;
        };
        info!("{} ({}) is offline", session.username, session.user_id);

        let user_id = session.user_id;
        if let Err(e) = self
            .blocking(move |s| Ok(s.db.set_last_seen(&user_id.to_string(), to_millis(last_seen))?))
            .await
        {
            warn!("Failed to persist last_seen for {}: {}", user_id, e);
        }

        self.fan_out_presence(user_id, ServerEvent::UserOffline { user_id, last_seen })
            .await;
    }

    /// Join the rooms of `chat_ids`. All-or-nothing: one chat the user is
    /// not a member of rejects the whole request.
    pub async fn subscribe(&self, session: &Session, chat_ids: &[Uuid]) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let chats = chat_ids.to_vec();
        let rosters = self
            .blocking(move |s| {
                let mut rosters = Vec::with_capacity(chats.len());
                for chat_id in chats {
                    let members = s.membership.members(chat_id)?;
                    if !members.iter().any(|m| m.user_id == user_id) {
                        return Err(SyncError::forbidden(format!("not a member of chat {}", chat_id)));
                    }
                    let ids: Vec<Uuid> = members.into_iter().map(|m| m.user_id).collect();
                    rosters.push((chat_id, ids));
                }
                Ok(rosters)
            })
            .await?;

        {
            let mut registry = self.inner.registry.write().await;
            let Some(entry) = registry.sessions.get_mut(&session.id) else {
                return Err(SyncError::Auth("session is closed".into()));
            };
            entry.chats.extend(chat_ids.iter().copied());
            for chat_id in chat_ids {
                registry.rooms.entry(*chat_id).or_default().insert(session.id);
            }
        }
        debug!("{} subscribed to {} chats", session.username, chat_ids.len());

        // Snapshot of who is already here
        let mut announced = HashSet::new();
        for (chat_id, members) in &rosters {
            for user_id in self.inner.presence.online_among(members) {
                if announced.insert(user_id) {
                    self.send_to_session(session.id, ServerEvent::UserOnline { user_id })
                        .await;
                }
            }
            for user_id in self.inner.typing.typing_in(*chat_id) {
                self.send_to_session(
                    session.id,
                    ServerEvent::TypingStart {
                        chat_id: *chat_id,
                        user_id,
                    },
                )
                .await;
            }
        }
        Ok(())
    }

    pub async fn unsubscribe(&self, session: &Session, chat_ids: &[Uuid]) {
        let mut registry = self.inner.registry.write().await;
        if let Some(entry) = registry.sessions.get_mut(&session.id) {
            for chat_id in chat_ids {
                entry.chats.remove(chat_id);
            }
        }
        for chat_id in chat_ids {
            registry.leave(session.id, *chat_id);
        }
    }

    // ── Intent routing ──────────────────────────────────────────────────

    /// Run one intent. Failures go back to the originating session only.
    pub async fn handle_intent(&self, session: &Session, intent: ClientIntent) {
        let name = intent.name();
        let reference = intent.reference();
        trace!("{} -> {}", session.username, name);

        if let Err(err) = self.route(session, intent).await {
            warn!("{} ({}) {} rejected: {}", session.username, session.user_id, name, err);
            self.send_to_session(session.id, ServerEvent::error(&err, Some(reference)))
                .await;
        }
    }

    pub async fn route(&self, session: &Session, intent: ClientIntent) -> Result<(), SyncError> {
        intent.validate(&self.inner.config.limits)?;

        match intent {
            ClientIntent::Identify { .. } => Err(SyncError::validation("session is already identified")),
            ClientIntent::Subscribe { chat_ids } => self.subscribe(session, &chat_ids).await,
            ClientIntent::Unsubscribe { chat_ids } => {
                self.unsubscribe(session, &chat_ids).await;
                Ok(())
            }
            ClientIntent::Send {
                chat_id,
                content,
                kind,
                reply_to_id,
                client_id,
            } => {
                self.send_message(session, chat_id, kind, content, reply_to_id, client_id)
                    .await
            }
            ClientIntent::Edit { id, content } => self.edit_message(session, id, content).await,
            ClientIntent::Delete { id } => self.delete_message(session, id).await,
            ClientIntent::ToggleReaction { message_id, emoji } => {
                self.toggle_reaction(session, message_id, emoji).await
            }
            ClientIntent::MarkRead { chat_id, upto } => {
                let user_id = session.user_id;
                let _guard = self.inner.chat_locks.lock(chat_id).await;
                let outcome = self
                    .blocking(move |s| s.receipts.mark_read(user_id, chat_id, upto))
                    .await?;
                self.broadcast(
                    chat_id,
                    ServerEvent::ReadUpdated {
                        chat_id,
                        user_id,
                        upto: outcome.upto,
                        receipts: outcome.receipts,
                    },
                )
                .await;
                Ok(())
            }
            ClientIntent::Pin { id } => self.toggle_pin(session, id).await,
            ClientIntent::TypingStart { chat_id } => {
                self.require_subscribed(session, chat_id).await?;
                self.require_still_member(session, chat_id).await?;
                let _guard = self.inner.chat_locks.lock(chat_id).await;
                if self.inner.typing.start(chat_id, session.user_id, Instant::now()) {
                    let event = ServerEvent::TypingStart {
                        chat_id,
                        user_id: session.user_id,
                    };
                    self.broadcast(chat_id, event).await;
                }
                Ok(())
            }
            ClientIntent::TypingStop { chat_id } => {
                self.require_subscribed(session, chat_id).await?;
                let _guard = self.inner.chat_locks.lock(chat_id).await;
                if self.inner.typing.stop(chat_id, session.user_id) {
                    let event = ServerEvent::TypingStop {
                        chat_id,
                        user_id: session.user_id,
                    };
                    self.broadcast(chat_id, event).await;
                }
                Ok(())
            }
            ClientIntent::Forward { id, target_chat_ids } => self.forward(session, id, target_chat_ids).await,
        }
    }

    async fn send_message(
        &self,
        session: &Session,
        chat_id: Uuid,
        kind: MessageKind,
        content: String,
        reply_to_id: Option<Uuid>,
        client_id: Option<Uuid>,
    ) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let _guard = self.inner.chat_locks.lock(chat_id).await;
        let (message, receipt) = self
            .blocking(move |s| {
                let message = s.messages.send(user_id, chat_id, kind, content, reply_to_id)?;
                let receipt = receipt_or_warn(s, &message);
                Ok((message, receipt))
            })
            .await?;

        if self.inner.typing.stop(chat_id, user_id) {
            self.broadcast(chat_id, ServerEvent::TypingStop { chat_id, user_id })
                .await;
        }
        self.broadcast(
            chat_id,
            ServerEvent::MessageNew {
                message,
                client_id,
                receipt,
            },
        )
        .await;
        Ok(())
    }

    async fn edit_message(&self, session: &Session, id: Uuid, content: String) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let chat_id = self.blocking(move |s| s.messages.chat_of(user_id, id)).await?;

        let _guard = self.inner.chat_locks.lock(chat_id).await;
        let message = self
            .blocking(move |s| s.messages.edit(user_id, id, content))
            .await?;
        let Some(edited_at) = message.edited_at else {
            error!("edit of {} returned no edited_at", id);
            return Err(SyncError::TransientStore("edit was not recorded".into()));
        };
        self.broadcast(
            chat_id,
            ServerEvent::MessageEdited {
                id,
                chat_id,
                content: message.content,
                edited_at,
            },
        )
        .await;
        Ok(())
    }

    async fn delete_message(&self, session: &Session, id: Uuid) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let chat_id = self.blocking(move |s| s.messages.chat_of(user_id, id)).await?;

        let _guard = self.inner.chat_locks.lock(chat_id).await;
        self.blocking(move |s| s.messages.delete(user_id, id)).await?;
        self.broadcast(chat_id, ServerEvent::MessageDeleted { chat_id, id })
            .await;
        Ok(())
    }

    async fn toggle_reaction(&self, session: &Session, message_id: Uuid, emoji: String) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let chat_id = self
            .blocking(move |s| s.messages.chat_of(user_id, message_id))
            .await?;

        let _guard = self.inner.chat_locks.lock(chat_id).await;
        let outcome = self
            .blocking(move |s| s.reactions.toggle(user_id, message_id, &emoji))
            .await?;
        self.broadcast(
            chat_id,
            ServerEvent::ReactionUpdated {
                message_id,
                chat_id: outcome.chat_id,
                reactions: outcome.snapshot,
            },
        )
        .await;
        Ok(())
    }

    async fn toggle_pin(&self, session: &Session, id: Uuid) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let chat_id = self.blocking(move |s| s.messages.chat_of(user_id, id)).await?;

        let _guard = self.inner.chat_locks.lock(chat_id).await;
        let message = self
            .blocking(move |s| s.messages.toggle_pin(user_id, id))
            .await?;
        self.broadcast(
            chat_id,
            ServerEvent::MessagePinned {
                id,
                chat_id,
                pinned: message.is_pinned(),
                pinned_by: message.pin.as_ref().map(|p| p.pinned_by),
                pinned_at: message.pin.as_ref().map(|p| p.pinned_at),
            },
        )
        .await;
        Ok(())
    }

    async fn forward(&self, session: &Session, id: Uuid, target_chat_ids: Vec<Uuid>) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let _guards = self
            .inner
            .chat_locks
            .lock_many(target_chat_ids.iter().copied())
            .await;
        let copies = self
            .blocking(move |s| {
                let copies = s.messages.forward(user_id, id, &target_chat_ids)?;
                Ok(copies
                    .into_iter()
                    .map(|message| {
                        let receipt = receipt_or_warn(s, &message);
                        (message, receipt)
                    })
                    .collect::<Vec<_>>())
            })
            .await?;

        for (message, receipt) in copies {
            let chat_id = message.chat_id;
            self.broadcast(
                chat_id,
                ServerEvent::MessageNew {
                    message,
                    client_id: None,
                    receipt,
                },
            )
            .await;
        }
        Ok(())
    }

    /// Membership may have been revoked since the session subscribed; a
    /// revoked session is dropped from the room.
    async fn require_still_member(&self, session: &Session, chat_id: Uuid) -> Result<(), SyncError> {
        let user_id = session.user_id;
        let result = self
            .blocking(move |s| require_member(s.membership.as_ref(), chat_id, user_id))
            .await;
        if let Err(SyncError::Forbidden(_)) = &result {
            self.evict(chat_id, &[session.id]).await;
        }
        result
    }

    async fn require_subscribed(&self, session: &Session, chat_id: Uuid) -> Result<(), SyncError> {
        let registry = self.inner.registry.read().await;
        let subscribed = registry
            .sessions
            .get(&session.id)
            .is_some_and(|entry| entry.chats.contains(&chat_id));
        if subscribed {
            Ok(())
        } else {
            Err(SyncError::forbidden(format!("not subscribed to chat {}", chat_id)))
        }
    }

    // ── Delivery ────────────────────────────────────────────────────────

    /// Queue `event` for every session in the chat's room, the sender
    /// included, whose user is still a member. Sessions of removed members
    /// are evicted from the room. Returns how many sessions it was queued for.
    pub async fn broadcast(&self, chat_id: Uuid, event: ServerEvent) -> usize {
        let members = match self.members_of(chat_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Broadcast to chat {} dropped, membership unavailable: {}", chat_id, e);
                return 0;
            }
        };

        let mut delivered = 0;
        let mut revoked = Vec::new();
        {
            let registry = self.inner.registry.read().await;
            let Some(room) = registry.rooms.get(&chat_id) else {
                return 0;
            };

            for session_id in room {
                let Some(entry) = registry.sessions.get(session_id) else {
                    continue;
                };
                if !members.contains(&entry.user_id) {
                    revoked.push(*session_id);
                    continue;
                }
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                } else {
                    warn!("Dropping event for closed session {} (user {})", session_id, entry.user_id);
                }
            }
        }

        if !revoked.is_empty() {
            self.evict(chat_id, &revoked).await;
        }
        delivered
    }

    async fn members_of(&self, chat_id: Uuid) -> Result<HashSet<Uuid>, SyncError> {
        self.blocking(move |s| {
            let members = s.membership.members(chat_id)?;
            Ok(members.into_iter().map(|m| m.user_id).collect())
        })
        .await
    }

    /// Remove sessions from a chat's room after their membership was revoked.
    async fn evict(&self, chat_id: Uuid, session_ids: &[Uuid]) {
        let mut registry = self.inner.registry.write().await;
        for session_id in session_ids {
            if let Some(entry) = registry.sessions.get_mut(session_id) {
                entry.chats.remove(&chat_id);
                info!("Session {} (user {}) left chat {}: no longer a member", session_id, entry.user_id, chat_id);
            }
            registry.leave(*session_id, chat_id);
        }
    }

    pub async fn send_to_session(&self, session_id: Uuid, event: ServerEvent) -> bool {
        let registry = self.inner.registry.read().await;
        match registry.sessions.get(&session_id) {
            Some(entry) => entry.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver a presence event once to every session sharing a chat with
    /// `user_id`.
    async fn fan_out_presence(&self, user_id: Uuid, event: ServerEvent) -> usize {
        let rosters = self
            .blocking(move |s| {
                let mut rosters = Vec::new();
                for chat_id in s.membership.chats_for_user(user_id)? {
                    let members: HashSet<Uuid> = s.membership.members(chat_id)?.into_iter().map(|m| m.user_id).collect();
                    rosters.push((chat_id, members));
                }
                Ok(rosters)
            })
            .await;
        let rosters = match rosters {
            Ok(rosters) => rosters,
            Err(e) => {
                warn!("Presence fan-out for {} skipped: {}", user_id, e);
                return 0;
            }
        };

        let registry = self.inner.registry.read().await;
        let mut targets = HashSet::new();
        for (chat_id, members) in &rosters {
            let Some(room) = registry.rooms.get(chat_id) else {
                continue;
            };
            for session_id in room {
                let member = registry
                    .sessions
                    .get(session_id)
                    .is_some_and(|entry| members.contains(&entry.user_id));
                if member {
                    targets.insert(*session_id);
                }
            }
        }

        let mut delivered = 0;
        for session_id in targets {
            if let Some(entry) = registry.sessions.get(&session_id) {
                if entry.tx.send(event.clone()).is_ok() {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    // ── Typing expiry ───────────────────────────────────────────────────

    /// Expire typing entries whose TTL passed and broadcast `typing:stop` for
    /// each. Returns how many expired.
    pub async fn expire_typing(&self, now: Instant) -> usize {
        let expired = self.inner.typing.expire(now);
        for (chat_id, user_id) in &expired {
            let _guard = self.inner.chat_locks.lock(*chat_id).await;
            // A start that slipped in after the sweep already announced itself
            if self.inner.typing.is_typing(*chat_id, *user_id) {
                continue;
            }
            self.broadcast(
                *chat_id,
                ServerEvent::TypingStop {
                    chat_id: *chat_id,
                    user_id: *user_id,
                },
            )
            .await;
        }
        expired.len()
    }

    /// Background sweeper; runs until the task is dropped.
    pub async fn run_typing_sweeper(self) {
        let mut interval = tokio::time::interval(self.inner.config.typing_sweep_interval);
        loop {
            interval.tick().await;
            let expired = self.expire_typing(Instant::now()).await;
            if expired > 0 {
                debug!("Typing sweep expired {} entries", expired);
            }
        }
    }

    // ── Presence queries ────────────────────────────────────────────────

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.presence.is_online(user_id)
    }

    pub fn presence(&self, user_id: Uuid) -> PresenceState {
        self.inner.presence.state(user_id)
    }

    pub fn is_typing(&self, chat_id: Uuid, user_id: Uuid) -> bool {
        self.inner.typing.is_typing(chat_id, user_id)
    }

    pub async fn session_count(&self) -> usize {
        self.inner.registry.read().await.sessions.len()
    }

    pub async fn room_size(&self, chat_id: Uuid) -> usize {
        let registry = self.inner.registry.read().await;
        registry.rooms.get(&chat_id).map_or(0, HashSet::len)
    }

    /// Run a store-backed aggregator call off the async workers.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        F: FnOnce(&Services) -> Result<T, SyncError> + Send + 'static,
        T: Send + 'static,
    {
        let services = self.inner.services.clone();
        tokio::task::spawn_blocking(move || f(&services))
            .await
            .map_err(|e| {
                error!("Blocking task failed: {}", e);
                SyncError::TransientStore("worker task failed".into())
            })?
    }
}

/// The message is already committed, so a failed count only drops the
/// aggregate from the event.
fn receipt_or_warn(services: &Services, message: &Message) -> Option<MessageReceipt> {
    match services.receipts.receipt_of(message) {
        Ok(receipt) => Some(receipt),
        Err(e) => {
            warn!("Receipt for new message {} unavailable: {}", message.id, e);
            None
        }
    }
}
