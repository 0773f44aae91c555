//! In-memory storage for the mail client.
//!
//! State lives for the process lifetime only; the [`MessageStore`] is the
//! single shared structure the UI reads from.

mod message_store;

pub use message_store::MessageStore;
