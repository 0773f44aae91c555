//! Notification service.
//!
//! Turns client activity (new mail, sends, failures) into `(title, body)`
//! notifications and hands them to a [`NotificationSink`], the tray or
//! desktop surface owned by the embedding application.

#[cfg(test)]
use mockall::automock;

/// Surface that shows notifications to the user.
#[cfg_attr(test, automock)]
pub trait NotificationSink: Send + Sync {
    /// Shows one notification.
    fn deliver(&self, title: &str, body: &str);
}

/// Sink that writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn deliver(&self, title: &str, body: &str) {
        tracing::info!(target: "courier::notify", %title, %body, "notification");
    }
}

/// Type of notification for categorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationCategory {
    /// New email received.
    NewEmail,
    /// Email sent successfully.
    EmailSent,
    /// Something failed.
    Error,
}

/// A notification request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Notification category.
    pub category: NotificationCategory,
    /// Title text.
    pub title: String,
    /// Body text.
    pub body: String,
}

impl Notification {
    /// Creates a notification.
    pub fn new(
        category: NotificationCategory,
        title: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            category,
            title: title.into(),
            body: body.into(),
        }
    }

    /// Creates a new email notification.
    pub fn new_email(sender: &str, subject: &str) -> Self {
        Self::new(
            NotificationCategory::NewEmail,
            "New email",
            format!("From: {}\nSubject: {}", sender, subject),
        )
    }

    /// Creates an email sent notification.
    pub fn email_sent(subject: &str) -> Self {
        Self::new(
            NotificationCategory::EmailSent,
            "Email sent",
            format!("Subject: {}", subject),
        )
    }

    /// Creates a send failure notification.
    pub fn send_failed() -> Self {
        Self::new(
            NotificationCategory::Error,
            "Send failed",
            "The message could not be sent",
        )
    }

    /// Creates an error notification.
    pub fn error(title: &str, detail: &str) -> Self {
        Self::new(NotificationCategory::Error, title, detail)
    }
}

/// Filters and forwards notifications to a sink.
pub struct NotificationService {
    sink: Box<dyn NotificationSink>,
    enabled: bool,
    muted: Vec<NotificationCategory>,
}

impl NotificationService {
    /// Creates a service delivering to `sink`.
    pub fn new(sink: Box<dyn NotificationSink>, enabled: bool) -> Self {
        Self {
            sink,
            enabled,
            muted: Vec::new(),
        }
    }

    /// Turns delivery on or off.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Stops delivering one category.
    pub fn mute(&mut self, category: NotificationCategory) {
        if !self.muted.contains(&category) {
            self.muted.push(category);
        }
    }

    /// Delivers `notification` unless disabled or muted. Returns whether it
    /// was delivered.
    pub fn notify(&self, notification: &Notification) -> bool {
        if !self.enabled || self.muted.contains(&notification.category) {
            return false;
        }
        self.sink.deliver(&notification.title, &notification.body);
        true
    }
}
