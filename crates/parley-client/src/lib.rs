//! Client-side reconciliation of server events into a local view.
//!
//! Local actions are applied optimistically and return the intent to send;
//! server events are folded in with [`ClientState::apply`], which is
//! deterministic and idempotent: applying the same event twice leaves the
//! same state as applying it once.

pub mod state;
pub mod timeline;

pub use state::{ChatView, ClientState};
pub use timeline::{DeliveryStatus, Entry, Timeline};
