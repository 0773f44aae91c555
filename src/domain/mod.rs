//! Domain layer types for the mail client core.
//!
//! This module contains the records exchanged with the outside world
//! (accounts and drafts) and the message types held by the store.

mod account;
mod draft;
mod email;
mod types;

pub use account::{Account, AccountBook, Encryption, Endpoint, Preset, Protocol};
pub(crate) use draft::file_name;
pub use draft::{Draft, DraftError};
pub use email::{BodyFormat, Message, Partition};
pub use types::MessageId;
