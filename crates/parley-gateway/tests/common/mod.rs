#![allow(dead_code)]

use std::sync::Arc;

use jsonwebtoken::{EncodingKey, Header, encode};
use tokio::sync::mpsc::UnboundedReceiver;
use uuid::Uuid;

use parley_db::Database;
use parley_gateway::Services;
use parley_gateway::auth::TokenValidator;
use parley_gateway::dispatcher::{Dispatcher, DispatcherConfig, Session};
use parley_types::api::Claims;
use parley_types::events::{ClientIntent, ServerEvent};

pub const SECRET: &str = "integration-secret";

#[derive(Clone)]
pub struct User {
    pub id: Uuid,
    pub name: String,
}

impl User {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

pub fn token_for(user: &User, exp_offset_secs: i64) -> String {
    let claims = Claims {
        sub: user.id,
        username: user.name.clone(),
        exp: (chrono::Utc::now().timestamp() + exp_offset_secs) as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

pub struct Harness {
    pub db: Arc<Database>,
    pub dispatcher: Dispatcher,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(DispatcherConfig::default())
    }

    pub fn with_config(config: DispatcherConfig) -> Self {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let services = Arc::new(Services::new(db.clone()));
        let dispatcher = Dispatcher::new(services, TokenValidator::new(SECRET), config);
        Self { db, dispatcher }
    }

    /// A chat with `members`, all of whom exist as users.
    pub fn chat(&self, members: &[&User]) -> Uuid {
        let chat_id = Uuid::new_v4();
        self.db.create_chat(&chat_id.to_string(), "room", 0).unwrap();
        for user in members {
            self.db.upsert_user(&user.id.to_string(), &user.name).unwrap();
            self.db
                .add_member(&chat_id.to_string(), &user.id.to_string(), "member", 0)
                .unwrap();
        }
        chat_id
    }

    pub async fn connect(&self, user: &User) -> Client {
        let (session, rx) = self.dispatcher.connect(&token_for(user, 3600)).await.unwrap();
        let mut client = Client {
            session,
            rx,
            dispatcher: self.dispatcher.clone(),
        };
        let ready = client.drain();
        assert!(matches!(ready.first(), Some(ServerEvent::Ready { .. })));
        client
    }

    /// Connect and join `chat_id`, discarding the join snapshot.
    pub async fn join(&self, user: &User, chat_id: Uuid) -> Client {
        let mut client = self.connect(user).await;
        self.dispatcher.subscribe(&client.session, &[chat_id]).await.unwrap();
        client.drain();
        client
    }
}

pub struct Client {
    pub session: Session,
    pub rx: UnboundedReceiver<ServerEvent>,
    dispatcher: Dispatcher,
}

impl Client {
    pub async fn send(&self, intent: ClientIntent) {
        self.dispatcher.handle_intent(&self.session, intent).await;
    }

    /// Everything queued for this session so far.
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub async fn disconnect(self) {
        self.dispatcher.disconnect(&self.session).await;
    }
}
