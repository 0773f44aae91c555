//! courier - mail-protocol client core
//!
//! This crate provides the engine of a desktop mail client: authenticated
//! IMAP/POP3 retrieval and SMTP submission, single-flighted background work,
//! periodic polling, and a partitioned in-memory mailbox the UI reads from.

pub mod app;
pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod storage;

pub use app::App;
