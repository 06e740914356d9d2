pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod locks;
pub mod membership;
pub mod messages;
pub mod presence;
pub mod reactions;
pub mod receipts;
pub mod typing;

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parley_db::Database;

use crate::membership::Membership;
use crate::messages::Messages;
use crate::reactions::Reactions;
use crate::receipts::ReadReceipts;

/// The store-backed aggregators. Everything in here is synchronous and is
/// driven from `spawn_blocking` by the dispatcher.
pub struct Services {
    pub db: Arc<Database>,
    pub membership: Arc<dyn Membership>,
    pub messages: Messages,
    pub receipts: ReadReceipts,
    pub reactions: Reactions,
}

impl Services {
    /// Services whose membership answers come from the same database.
    pub fn new(db: Arc<Database>) -> Self {
        let membership: Arc<dyn Membership> = db.clone();
        Self::with_membership(db, membership)
    }

    pub fn with_membership(db: Arc<Database>, membership: Arc<dyn Membership>) -> Self {
        Self {
            messages: Messages::new(db.clone(), membership.clone()),
            receipts: ReadReceipts::new(db.clone(), membership.clone()),
            reactions: Reactions::new(db.clone(), membership.clone()),
            membership,
            db,
        }
    }
}

/// Current time truncated to the millisecond resolution the store keeps, so
/// what is broadcast equals what is persisted.
pub fn now() -> DateTime<Utc> {
    let ms = Utc::now().timestamp_millis();
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}
