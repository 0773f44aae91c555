//! External service implementations.
//!
//! - [`email`] - Mail protocol clients (IMAP, POP3, SMTP)

pub mod email;
