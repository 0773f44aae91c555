//! Configuration and settings management.
//!
//! Settings (the account list and notification preference) are stored in the
//! user's config directory as JSON. The timing and batch constants below are
//! fixed and deliberately not part of the settings file.

use std::time::Duration;

mod settings;

pub use settings::{ConfigError, Settings};

/// Interval between background mail checks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// How long a connect attempt may run before a timeout is reported.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Number of most recent messages fetched per check.
pub const FETCH_WINDOW: u32 = 10;

/// Upper bound on the combined size of a draft's attachments.
pub const MAX_ATTACHMENT_BYTES: u64 = 10 * 1024 * 1024;
