use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use parley_types::api::HistoryMessage;
use parley_types::error::ErrorCode;
use parley_types::events::{ClientIntent, IntentRef, ServerEvent};
use parley_types::models::{Message, MessageKind, PinInfo, PresenceState, PresenceStatus, ReactionMap};

use crate::timeline::{DeliveryStatus, Entry, Timeline};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChatView {
    pub timeline: Timeline,
    /// Local user's read watermark.
    pub watermark: Option<DateTime<Utc>>,
    pub typing: BTreeSet<Uuid>,
    /// The local view is known to be missing server state; refetch history.
    pub stale: bool,
}

/// Snapshot taken before the first unconfirmed toggle of (message, emoji).
#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingReaction {
    before: ReactionMap,
    was_mine: bool,
}

/// Everything one client knows, keyed by chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientState {
    me: Uuid,
    session_id: Option<Uuid>,
    chats: HashMap<Uuid, ChatView>,
    presence: HashMap<Uuid, PresenceState>,
    /// Best-effort: local toggles only. Reactions from another device are not
    /// known until a snapshot drops an emoji this set still holds.
    my_reactions: HashSet<(Uuid, String)>,
    pending_reactions: HashMap<(Uuid, String), PendingReaction>,
    /// Watermark to restore if a local mark-read is rejected.
    pending_reads: HashMap<Uuid, Option<DateTime<Utc>>>,
}

impl ClientState {
    pub fn new(me: Uuid) -> Self {
        Self {
            me,
            session_id: None,
            chats: HashMap::new(),
            presence: HashMap::new(),
            my_reactions: HashSet::new(),
            pending_reactions: HashMap::new(),
            pending_reads: HashMap::new(),
        }
    }

    pub fn me(&self) -> Uuid {
        self.me
    }

    pub fn session_id(&self) -> Option<Uuid> {
        self.session_id
    }

    pub fn chat(&self, chat_id: Uuid) -> Option<&ChatView> {
        self.chats.get(&chat_id)
    }

    fn chat_mut(&mut self, chat_id: Uuid) -> &mut ChatView {
        self.chats.entry(chat_id).or_default()
    }

    /// Chat holding `message_id`, if any local timeline has it.
    fn locate(&self, message_id: Uuid) -> Option<Uuid> {
        self.chats
            .iter()
            .find(|(_, view)| view.timeline.contains(message_id))
            .map(|(chat_id, _)| *chat_id)
    }

    fn entry_mut(&mut self, chat_id: Uuid, message_id: Uuid) -> Option<&mut Entry> {
        self.chats.get_mut(&chat_id)?.timeline.get_mut(message_id)
    }

    // -- Local actions --

    /// Add a pending message and return the intent that sends it.
    pub fn send(
        &mut self,
        chat_id: Uuid,
        content: String,
        kind: MessageKind,
        reply_to_id: Option<Uuid>,
        now: DateTime<Utc>,
    ) -> ClientIntent {
        let client_id = Uuid::new_v4();
        let provisional = Message {
            id: client_id,
            chat_id,
            author_id: self.me,
            kind,
            content: content.clone(),
            created_at: now,
            edited_at: None,
            reply_to_id,
            forwarded_from: None,
            pin: None,
        };
        self.chat_mut(chat_id).timeline.upsert(Entry {
            message: provisional,
            status: DeliveryStatus::Pending,
            client_id: Some(client_id),
            reactions: ReactionMap::new(),
            receipt: None,
        });

        ClientIntent::Send {
            chat_id,
            content,
            kind,
            reply_to_id,
            client_id: Some(client_id),
        }
    }

    /// Flip the local user's reaction right away.
    pub fn toggle_reaction(&mut self, message_id: Uuid, emoji: &str) -> ClientIntent {
        let key = (message_id, emoji.to_string());
        let was_mine = self.my_reactions.contains(&key);

        if let Some(chat_id) = self.locate(message_id) {
            if let Some(entry) = self.entry_mut(chat_id, message_id) {
                let before = entry.reactions.clone();
                if was_mine {
                    if let Some(count) = entry.reactions.get_mut(emoji) {
                        *count = count.saturating_sub(1);
                        if *count == 0 {
                            entry.reactions.remove(emoji);
                        }
                    }
                } else {
                    *entry.reactions.entry(emoji.to_string()).or_insert(0) += 1;
                }
                self.pending_reactions
                    .entry(key.clone())
                    .or_insert(PendingReaction { before, was_mine });
            }
        }

        if was_mine {
            self.my_reactions.remove(&key);
        } else {
            self.my_reactions.insert(key);
        }

        ClientIntent::ToggleReaction {
            message_id,
            emoji: emoji.to_string(),
        }
    }

    /// Advance the local watermark (zeroing the badge up to `upto`).
    pub fn mark_read(&mut self, chat_id: Uuid, upto: DateTime<Utc>) -> ClientIntent {
        let current = self.chat_mut(chat_id).watermark;
        self.pending_reads.entry(chat_id).or_insert(current);
        self.chat_mut(chat_id).watermark = current.max(Some(upto));
        ClientIntent::MarkRead { chat_id, upto }
    }

    /// Mark everything the server has delivered as read.
    pub fn mark_all_read(&mut self, chat_id: Uuid) -> Option<ClientIntent> {
        let latest = self
            .chat(chat_id)?
            .timeline
            .iter()
            .filter(|e| !e.is_pending())
            .map(|e| e.message.created_at)
            .last()?;
        Some(self.mark_read(chat_id, latest))
    }

    // -- Server events --

    /// Consume-and-return form of [`apply`](Self::apply).
    pub fn fold(mut self, event: &ServerEvent) -> Self {
        self.apply(event);
        self
    }

    pub fn apply(&mut self, event: &ServerEvent) {
        trace!("apply {:?}", event);
        match event {
            ServerEvent::Ready { user_id, session_id, .. } => {
                if *user_id == self.me {
                    self.session_id = Some(*session_id);
                }
            }

            ServerEvent::MessageNew {
                message,
                client_id,
                receipt,
            } => {
                let me = self.me;
                let view = self.chat_mut(message.chat_id);
                if let Some(provisional) = client_id.and_then(|c| view.timeline.find_pending(c)) {
                    view.timeline.remove(provisional);
                }
                let existing = view.timeline.get(message.id);
                let entry = Entry {
                    message: message.clone(),
                    status: DeliveryStatus::Sent,
                    client_id: *client_id,
                    reactions: existing.map(|e| e.reactions.clone()).unwrap_or_default(),
                    receipt: receipt.or_else(|| existing.and_then(|e| e.receipt)),
                };
                view.timeline.upsert(entry);
                view.typing.remove(&message.author_id);
                // The server advances the author's watermark on send
                if message.author_id == me {
                    view.watermark = view.watermark.max(Some(message.created_at));
                }
            }

            ServerEvent::MessageEdited {
                id,
                chat_id,
                content,
                edited_at,
            } => {
                if let Some(entry) = self.entry_mut(*chat_id, *id) {
                    entry.message.content = content.clone();
                    entry.message.edited_at = Some(*edited_at);
                }
            }

            ServerEvent::MessageDeleted { chat_id, id } => self.drop_message(*chat_id, *id),

            ServerEvent::ReactionUpdated {
                message_id,
                chat_id,
                reactions,
            } => {
                if let Some(entry) = self.entry_mut(*chat_id, *message_id) {
                    entry.reactions = reactions.clone();
                }
                self.pending_reactions.retain(|(m, _), _| m != message_id);
                self.forget_unlisted_reactions(*message_id, reactions);
            }

            ServerEvent::ReadUpdated {
                chat_id,
                user_id,
                upto,
                receipts,
            } => {
                let mine = *user_id == self.me;
                let view = self.chat_mut(*chat_id);
                for receipt in receipts {
                    if let Some(entry) = view.timeline.get_mut(receipt.message_id) {
                        entry.receipt = Some(*receipt);
                    }
                }
                if mine {
                    view.watermark = view.watermark.max(Some(*upto));
                    self.pending_reads.remove(chat_id);
                }
            }

            ServerEvent::MessagePinned {
                id,
                chat_id,
                pinned,
                pinned_by,
                pinned_at,
            } => {
                if let Some(entry) = self.entry_mut(*chat_id, *id) {
                    entry.message.pin = match (pinned, pinned_by, pinned_at) {
                        (true, Some(by), Some(at)) => Some(PinInfo {
                            pinned_by: *by,
                            pinned_at: *at,
                        }),
                        _ => None,
                    };
                }
            }

            ServerEvent::TypingStart { chat_id, user_id } => {
                self.chat_mut(*chat_id).typing.insert(*user_id);
            }
            ServerEvent::TypingStop { chat_id, user_id } => {
                self.chat_mut(*chat_id).typing.remove(user_id);
            }

            ServerEvent::UserOnline { user_id } => {
                let last_seen = self.presence.get(user_id).and_then(|p| p.last_seen);
                self.presence.insert(
                    *user_id,
                    PresenceState {
                        status: PresenceStatus::Online,
                        last_seen,
                    },
                );
            }
            ServerEvent::UserOffline { user_id, last_seen } => {
                self.presence.insert(
                    *user_id,
                    PresenceState {
                        status: PresenceStatus::Offline,
                        last_seen: Some(*last_seen),
                    },
                );
            }

            ServerEvent::Error { code, intent, message } => {
                debug!("server rejected {:?}: {}", intent, message);
                if let Some(intent) = intent {
                    self.revert(*code, intent);
                }
            }
        }
    }

    /// Undo the optimistic change behind a rejected intent.
    fn revert(&mut self, code: ErrorCode, intent: &IntentRef) {
        match intent {
            IntentRef::Send {
                chat_id,
                client_id: Some(client_id),
            } => {
                if let Some(view) = self.chats.get_mut(chat_id) {
                    if let Some(provisional) = view.timeline.find_pending(*client_id) {
                        view.timeline.remove(provisional);
                    }
                }
            }
            IntentRef::ToggleReaction { message_id, emoji } => {
                let key = (*message_id, emoji.clone());
                if let Some(pending) = self.pending_reactions.remove(&key) {
                    if pending.was_mine {
                        self.my_reactions.insert(key);
                    } else {
                        self.my_reactions.remove(&key);
                    }
                    if let Some(chat_id) = self.locate(*message_id) {
                        if let Some(entry) = self.entry_mut(chat_id, *message_id) {
                            entry.reactions = pending.before;
                        }
                    }
                }
            }
            IntentRef::MarkRead { chat_id } => {
                if let Some(previous) = self.pending_reads.remove(chat_id) {
                    self.chat_mut(*chat_id).watermark = previous;
                }
            }
            _ => {}
        }

        if code == ErrorCode::NotFound {
            let referenced = match intent {
                IntentRef::Edit { id } | IntentRef::Delete { id } | IntentRef::Pin { id } | IntentRef::Forward { id } => {
                    Some(*id)
                }
                IntentRef::ToggleReaction { message_id, .. } => Some(*message_id),
                _ => None,
            };
            if let Some(id) = referenced {
                if let Some(chat_id) = self.locate(id) {
                    self.drop_message(chat_id, id);
                    self.chat_mut(chat_id).stale = true;
                }
            }
        }
    }

    /// An emoji missing from the server's map cannot carry our reaction.
    fn forget_unlisted_reactions(&mut self, message_id: Uuid, reactions: &ReactionMap) {
        self.my_reactions
            .retain(|(m, emoji)| *m != message_id || reactions.contains_key(emoji));
    }

    fn drop_message(&mut self, chat_id: Uuid, id: Uuid) {
        if let Some(view) = self.chats.get_mut(&chat_id) {
            view.timeline.remove(id);
        }
        self.pending_reactions.retain(|(m, _), _| *m != id);
        self.my_reactions.retain(|(m, _)| *m != id);
    }

    /// Fold a freshly fetched history page in after a reconnect. Server rows
    /// overwrite local copies; unconfirmed local sends survive.
    pub fn merge_history(&mut self, chat_id: Uuid, page: Vec<HistoryMessage>) {
        for item in &page {
            self.forget_unlisted_reactions(item.message.id, &item.reactions);
        }
        let view = self.chat_mut(chat_id);
        for item in page {
            let existing = view.timeline.get(item.message.id);
            let entry = Entry {
                client_id: existing.and_then(|e| e.client_id),
                receipt: existing.and_then(|e| e.receipt),
                status: DeliveryStatus::Sent,
                reactions: item.reactions,
                message: item.message,
            };
            view.timeline.upsert(entry);
        }
        view.stale = false;
    }

    // -- Views --

    /// Messages by others newer than the local watermark.
    pub fn unread_count(&self, chat_id: Uuid) -> usize {
        let Some(view) = self.chats.get(&chat_id) else {
            return 0;
        };
        view.timeline
            .iter()
            .filter(|e| !e.is_pending() && e.message.author_id != self.me)
            .filter(|e| view.watermark.is_none_or(|w| e.message.created_at > w))
            .count()
    }

    /// Other users currently typing in the chat.
    pub fn typing_in(&self, chat_id: Uuid) -> Vec<Uuid> {
        self.chats
            .get(&chat_id)
            .map(|view| view.typing.iter().copied().filter(|u| *u != self.me).collect())
            .unwrap_or_default()
    }

    pub fn presence_of(&self, user_id: Uuid) -> Option<PresenceState> {
        self.presence.get(&user_id).copied()
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.presence
            .get(&user_id)
            .is_some_and(|p| p.status == PresenceStatus::Online)
    }

    pub fn has_reacted(&self, message_id: Uuid, emoji: &str) -> bool {
        self.my_reactions.contains(&(message_id, emoji.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use parley_types::models::MessageReceipt;

    fn server_message(chat_id: Uuid, author_id: Uuid, at: DateTime<Utc>, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id,
            author_id,
            kind: MessageKind::Text,
            content: content.into(),
            created_at: at,
            edited_at: None,
            reply_to_id: None,
            forwarded_from: None,
            pin: None,
        }
    }

    fn new_event(message: &Message) -> ServerEvent {
        ServerEvent::MessageNew {
            message: message.clone(),
            client_id: None,
            receipt: None,
        }
    }

    fn client_id_of(intent: &ClientIntent) -> Uuid {
        match intent {
            ClientIntent::Send {
                client_id: Some(id), ..
            } => *id,
            other => panic!("not a send: {:?}", other),
        }
    }

    #[test]
    fn echo_replaces_pending_send() {
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let mut state = ClientState::new(me);

        let intent = state.send(chat, "hi".into(), MessageKind::Text, None, Utc::now());
        let client_id = client_id_of(&intent);
        assert_eq!(state.chat(chat).unwrap().timeline.len(), 1);
        assert!(state.chat(chat).unwrap().timeline.iter().all(Entry::is_pending));

        let stored = server_message(chat, me, Utc::now(), "hi");
        let echo = ServerEvent::MessageNew {
            message: stored.clone(),
            client_id: Some(client_id),
            receipt: Some(MessageReceipt {
                message_id: stored.id,
                read_count: 1,
                total_members: 3,
            }),
        };
        state.apply(&echo);
        state.apply(&echo);

        let timeline = &state.chat(chat).unwrap().timeline;
        assert_eq!(timeline.len(), 1);
        let entry = timeline.get(stored.id).unwrap();
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert_eq!(entry.receipt.map(|r| r.read_count), Some(1));
    }

    #[test]
    fn echo_without_pending_inserts() {
        let chat = Uuid::new_v4();
        let mut state = ClientState::new(Uuid::new_v4());
        let m = server_message(chat, Uuid::new_v4(), Utc::now(), "from elsewhere");
        state.apply(&ServerEvent::MessageNew {
            message: m.clone(),
            client_id: Some(Uuid::new_v4()),
            receipt: None,
        });
        assert!(state.chat(chat).unwrap().timeline.contains(m.id));
    }

    #[test]
    fn every_event_is_idempotent() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let t0 = Utc::now();
        let m = server_message(chat, other, t0, "hello");

        let base = ClientState::new(me).fold(&new_event(&m));
        let events = vec![
            new_event(&m),
            ServerEvent::MessageEdited {
                id: m.id,
                chat_id: chat,
                content: "edited".into(),
                edited_at: t0 + Duration::seconds(1),
            },
            ServerEvent::ReactionUpdated {
                message_id: m.id,
                chat_id: chat,
                reactions: ReactionMap::from([("👍".to_string(), 2)]),
            },
            ServerEvent::ReadUpdated {
                chat_id: chat,
                user_id: me,
                upto: t0,
                receipts: vec![MessageReceipt {
                    message_id: m.id,
                    read_count: 2,
                    total_members: 2,
                }],
            },
            ServerEvent::MessagePinned {
                id: m.id,
                chat_id: chat,
                pinned: true,
                pinned_by: Some(other),
                pinned_at: Some(t0),
            },
            ServerEvent::TypingStart { chat_id: chat, user_id: other },
            ServerEvent::TypingStop { chat_id: chat, user_id: other },
            ServerEvent::UserOnline { user_id: other },
            ServerEvent::UserOffline {
                user_id: other,
                last_seen: t0,
            },
            ServerEvent::MessageDeleted { chat_id: chat, id: m.id },
        ];

        for event in &events {
            let once = base.clone().fold(event);
            let twice = base.clone().fold(event).fold(event);
            assert_eq!(once, twice, "not idempotent: {:?}", event);
        }
    }

    #[test]
    fn rejected_send_is_removed() {
        let chat = Uuid::new_v4();
        let mut state = ClientState::new(Uuid::new_v4());
        let intent = state.send(chat, "too long".into(), MessageKind::Text, None, Utc::now());

        state.apply(&ServerEvent::Error {
            code: ErrorCode::Validation,
            message: "content too long".into(),
            intent: Some(IntentRef::Send {
                chat_id: chat,
                client_id: Some(client_id_of(&intent)),
            }),
        });
        assert!(state.chat(chat).unwrap().timeline.is_empty());
    }

    #[test]
    fn reaction_toggle_is_optimistic_and_reverts() {
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let m = server_message(chat, Uuid::new_v4(), Utc::now(), "nice");
        let mut state = ClientState::new(me).fold(&new_event(&m));

        state.toggle_reaction(m.id, "👍");
        let reactions = &state.chat(chat).unwrap().timeline.get(m.id).unwrap().reactions;
        assert_eq!(reactions.get("👍"), Some(&1));
        assert!(state.has_reacted(m.id, "👍"));

        state.apply(&ServerEvent::Error {
            code: ErrorCode::TransientStore,
            message: "store unavailable".into(),
            intent: Some(IntentRef::ToggleReaction {
                message_id: m.id,
                emoji: "👍".into(),
            }),
        });
        assert!(state.chat(chat).unwrap().timeline.get(m.id).unwrap().reactions.is_empty());
        assert!(!state.has_reacted(m.id, "👍"));
    }

    #[test]
    fn server_snapshot_overwrites_optimistic_counts() {
        let chat = Uuid::new_v4();
        let m = server_message(chat, Uuid::new_v4(), Utc::now(), "nice");
        let mut state = ClientState::new(Uuid::new_v4()).fold(&new_event(&m));

        state.toggle_reaction(m.id, "🔥");
        state.apply(&ServerEvent::ReactionUpdated {
            message_id: m.id,
            chat_id: chat,
            reactions: ReactionMap::from([("🔥".to_string(), 4)]),
        });
        assert_eq!(
            state.chat(chat).unwrap().timeline.get(m.id).unwrap().reactions.get("🔥"),
            Some(&4)
        );
    }

    #[test]
    fn snapshot_without_emoji_clears_local_reaction() {
        let chat = Uuid::new_v4();
        let m = server_message(chat, Uuid::new_v4(), Utc::now(), "nice");
        let mut state = ClientState::new(Uuid::new_v4()).fold(&new_event(&m));

        state.toggle_reaction(m.id, "👍");
        state.apply(&ServerEvent::ReactionUpdated {
            message_id: m.id,
            chat_id: chat,
            reactions: ReactionMap::from([("👍".to_string(), 1)]),
        });
        assert!(state.has_reacted(m.id, "👍"));

        // Removed from another device
        state.apply(&ServerEvent::ReactionUpdated {
            message_id: m.id,
            chat_id: chat,
            reactions: ReactionMap::new(),
        });
        assert!(!state.has_reacted(m.id, "👍"));

        // The next toggle adds rather than subtracting from nothing
        state.toggle_reaction(m.id, "👍");
        assert_eq!(
            state.chat(chat).unwrap().timeline.get(m.id).unwrap().reactions.get("👍"),
            Some(&1)
        );
    }

    #[test]
    fn unread_badge_follows_watermark() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let t0 = Utc::now();
        let mut state = ClientState::new(me);
        for i in 0..3 {
            let m = server_message(chat, other, t0 + Duration::seconds(i), "ping");
            state.apply(&new_event(&m));
        }
        state.apply(&new_event(&server_message(chat, me, t0, "mine")));
        assert_eq!(state.unread_count(chat), 2);

        // Own send moved the watermark to t0; rejected mark-read restores it
        state.mark_all_read(chat).unwrap();
        assert_eq!(state.unread_count(chat), 0);
        state.apply(&ServerEvent::Error {
            code: ErrorCode::TransientStore,
            message: "busy".into(),
            intent: Some(IntentRef::MarkRead { chat_id: chat }),
        });
        assert_eq!(state.unread_count(chat), 2);

        state.apply(&ServerEvent::ReadUpdated {
            chat_id: chat,
            user_id: me,
            upto: t0 + Duration::seconds(1),
            receipts: vec![],
        });
        assert_eq!(state.unread_count(chat), 1);

        // Someone else's read does not touch the local badge
        state.apply(&ServerEvent::ReadUpdated {
            chat_id: chat,
            user_id: other,
            upto: t0 + Duration::seconds(10),
            receipts: vec![],
        });
        assert_eq!(state.unread_count(chat), 1);
    }

    #[test]
    fn not_found_drops_message_and_marks_stale() {
        let chat = Uuid::new_v4();
        let m = server_message(chat, Uuid::new_v4(), Utc::now(), "gone");
        let mut state = ClientState::new(Uuid::new_v4()).fold(&new_event(&m));

        state.apply(&ServerEvent::Error {
            code: ErrorCode::NotFound,
            message: "not found".into(),
            intent: Some(IntentRef::Edit { id: m.id }),
        });
        let view = state.chat(chat).unwrap();
        assert!(!view.timeline.contains(m.id));
        assert!(view.stale);
    }

    #[test]
    fn merge_history_keeps_pending_sends() {
        let me = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let t0 = Utc::now();
        let mut state = ClientState::new(me);
        state.send(chat, "still sending".into(), MessageKind::Text, None, t0);
        state.chat_mut(chat).stale = true;

        let fetched = server_message(chat, Uuid::new_v4(), t0 - Duration::seconds(5), "while away");
        state.merge_history(
            chat,
            vec![HistoryMessage {
                message: fetched.clone(),
                reactions: ReactionMap::from([("👀".to_string(), 1)]),
            }],
        );

        let view = state.chat(chat).unwrap();
        assert!(!view.stale);
        assert_eq!(view.timeline.len(), 2);
        assert_eq!(view.timeline.iter().filter(|e| e.is_pending()).count(), 1);
        assert_eq!(view.timeline.get(fetched.id).unwrap().reactions.get("👀"), Some(&1));
        // Oldest first
        assert_eq!(view.timeline.iter().next().unwrap().message.id, fetched.id);
    }

    #[test]
    fn presence_and_typing_views() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let chat = Uuid::new_v4();
        let t0 = Utc::now();
        let mut state = ClientState::new(me);

        state.apply(&ServerEvent::UserOffline {
            user_id: other,
            last_seen: t0,
        });
        state.apply(&ServerEvent::UserOnline { user_id: other });
        assert!(state.is_online(other));
        assert_eq!(state.presence_of(other).unwrap().last_seen, Some(t0));

        state.apply(&ServerEvent::TypingStart { chat_id: chat, user_id: other });
        state.apply(&ServerEvent::TypingStart { chat_id: chat, user_id: me });
        assert_eq!(state.typing_in(chat), vec![other]);

        // A message from the typist ends their indicator
        state.apply(&new_event(&server_message(chat, other, t0, "done")));
        assert!(state.typing_in(chat).is_empty());
    }
}
