//! Services layer.
//!
//! Services sit between the consumer and the protocol clients:
//!
//! ```text
//! Consumer (App, events, store)
//!          |
//!          v
//!    Services Layer
//!          |
//!          v
//!  Providers (IMAP, POP3, SMTP)
//! ```
//!
//! - [`ProtocolSession`]: live handles for the active account
//! - [`Orchestrator`]: single-flighted background connect, fetch and send
//! - [`Poller`]: periodic connect-or-fetch trigger
//! - [`NotificationService`]: user-facing notifications

mod flight;
mod notification_service;
mod orchestrator;
mod poller;
mod session;

pub use flight::{FlightTicket, SingleFlight};
#[cfg(test)]
pub use notification_service::MockNotificationSink;
pub use notification_service::{
    LogSink, Notification, NotificationCategory, NotificationService, NotificationSink,
};
pub use orchestrator::{Dispatch, Orchestrator};
pub use poller::Poller;
pub use session::{ProtocolSession, SessionState};
