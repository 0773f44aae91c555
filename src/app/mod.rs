//! Consumer context.
//!
//! [`App`] is the single owner of the message store, the view state and the
//! account book. Background work reports back through the orchestrator's
//! event channel, which the app drains on one task, so every store update
//! happens in the order the events were produced.

mod events;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

pub use events::{ClientEvent, ErrorKind};
pub use state::ViewState;

use crate::config::Settings;
use crate::domain::{Account, AccountBook, Draft, DraftError, Message, MessageId, Partition};
use crate::providers::email::MailConnector;
use crate::services::{
    Dispatch, Notification, NotificationCategory, NotificationService, NotificationSink,
    Orchestrator, Poller, SessionState,
};
use crate::storage::MessageStore;

/// The mail client as seen by a front end.
pub struct App<C: MailConnector> {
    store: Arc<MessageStore>,
    orchestrator: Orchestrator<C>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    notifier: NotificationService,
    settings: Settings,
    settings_path: Option<PathBuf>,
    active: watch::Sender<Option<Account>>,
    view: ViewState,
}

impl<C: MailConnector> App<C> {
    /// Builds the client from persisted settings.
    pub fn new(connector: Arc<C>, settings: Settings, sink: Box<dyn NotificationSink>) -> Self {
        let (orchestrator, events) = Orchestrator::new(connector);
        let (active, _) = watch::channel(settings.accounts.active().cloned());
        Self {
            store: Arc::new(MessageStore::new()),
            orchestrator,
            events,
            notifier: NotificationService::new(sink, settings.notifications_enabled),
            settings,
            settings_path: None,
            active,
            view: ViewState::default(),
        }
    }

    /// Writes settings back to `path` whenever accounts or the notification
    /// toggle change.
    pub fn persist_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings_path = Some(path.into());
        self
    }

    /// Shared handle to the message store.
    pub fn store(&self) -> Arc<MessageStore> {
        Arc::clone(&self.store)
    }

    /// Current view state.
    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Configured accounts.
    pub fn accounts(&self) -> &AccountBook {
        &self.settings.accounts
    }

    /// Session state as last published.
    pub fn session_state(&self) -> SessionState {
        self.orchestrator.state()
    }

    /// Starts background polling and connects the active account, if any.
    pub fn start(&self) {
        Poller::new(self.orchestrator.clone(), self.active.subscribe()).start();
        self.refresh();
    }

    /// Applies one event from background work.
    pub fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::ConnectionStatusChanged(connected) => {
                self.view.connected = connected;
                if connected {
                    tracing::info!("mail server connected");
                    self.view.clear_error();
                    // Reconnects instead when the active account changed meanwhile.
                    self.refresh();
                } else {
                    tracing::info!("mail server disconnected");
                }
            }
            ClientEvent::MessageReceived(message) => self.receive(message),
            ClientEvent::SendCompleted { success, sent } => {
                self.view.sending = false;
                match sent {
                    Some(sent) if success => {
                        let subject = sent.subject.clone();
                        self.store.insert_sent(sent);
                        self.notifier.notify(&Notification::email_sent(&subject));
                    }
                    _ => {
                        self.notifier.notify(&Notification::send_failed());
                    }
                }
            }
            ClientEvent::Error { kind, detail } => {
                tracing::warn!(%kind, %detail, "mail error");
                self.notifier.notify(&Notification::error(&kind.to_string(), &detail));
                self.view.record_error(kind, detail);
            }
        }
    }

    fn receive(&mut self, message: Message) {
        let sender = message.sender.clone();
        let subject = message.subject.clone();
        match self.store.insert_received(message) {
            Some(id) => {
                tracing::info!(%id, %sender, %subject, "new message");
                self.notifier
                    .notify(&Notification::new_email(&sender, &subject));
            }
            None => tracing::debug!(%subject, "already have message"),
        }
    }

    /// Waits for the next event and applies it. Returns `false` once the
    /// channel has closed.
    pub async fn next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event);
                true
            }
            None => false,
        }
    }

    /// Applies every event that is already queued, without waiting.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            applied += 1;
        }
        applied
    }

    /// Processes events until `cancel` fires.
    pub async fn run_until(&mut self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                more = self.next_event() => {
                    if !more {
                        break;
                    }
                }
            }
        }
    }

    /// Makes the account with `address` active and reconnects to it.
    ///
    /// A connect already in flight for the previous account answers `Busy`;
    /// the next check then reconnects to this one.
    pub async fn switch_account(&mut self, address: &str) -> Option<Dispatch> {
        let account = self.settings.accounts.activate(address)?.clone();
        tracing::info!(account = %account.address, "switching account");
        self.active.send_replace(Some(account.clone()));
        self.persist().await;
        self.orchestrator.request_check(Some(&account))
    }

    /// Adds or replaces an account. Editing the active account republishes
    /// it and starts a new connect cycle with the edited record.
    pub async fn save_account(&mut self, account: Account) -> Option<Dispatch> {
        let address = account.address.clone();
        self.settings.accounts.upsert(account);
        self.persist().await;

        let saved = self
            .settings
            .accounts
            .active()
            .filter(|active| active.address.eq_ignore_ascii_case(&address))
            .cloned()?;
        tracing::info!(account = %saved.address, "active account edited");
        self.active.send_replace(Some(saved.clone()));
        self.orchestrator.request_check(Some(&saved))
    }

    /// Removes an account. Removing the active one closes the session.
    pub async fn remove_account(&mut self, address: &str) -> Option<Account> {
        let removed = self.settings.accounts.remove(address)?;
        if removed.active {
            tracing::info!(account = %removed.address, "active account removed");
            self.active.send_replace(None);
            self.orchestrator.disconnect().await;
        }
        self.persist().await;
        Some(removed)
    }

    /// Turns notifications on or off and saves the preference.
    pub async fn set_notifications_enabled(&mut self, enabled: bool) {
        self.notifier.set_enabled(enabled);
        self.settings.notifications_enabled = enabled;
        self.persist().await;
    }

    /// Silences one kind of notification for this run.
    pub fn mute_notifications(&mut self, category: NotificationCategory) {
        self.notifier.mute(category);
    }

    async fn persist(&self) {
        let Some(path) = self.settings_path.clone() else {
            return;
        };
        let settings = self.settings.clone();
        match tokio::task::spawn_blocking(move || settings.save(&path)).await {
            Ok(Ok(())) => tracing::debug!("settings saved"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to save settings"),
            Err(e) => tracing::warn!(error = %e, "settings writer did not finish"),
        }
    }

    /// Validates `draft` and starts sending it.
    pub async fn send(&mut self, draft: Draft) -> Result<Dispatch, DraftError> {
        draft.validate().await?;
        let dispatch = self.orchestrator.request_send(draft);
        if dispatch == Dispatch::Started {
            self.view.sending = true;
        }
        Ok(dispatch)
    }

    /// Checks for new mail now: fetches when connected to the active
    /// account, otherwise connects it.
    pub fn refresh(&self) -> Option<Dispatch> {
        let active = self.active.borrow().clone();
        self.orchestrator.request_check(active.as_ref())
    }

    /// Switches the visible partition.
    pub fn navigate_to(&mut self, partition: Partition) {
        self.view.navigate_to(partition);
    }

    /// Messages in the visible partition, newest first.
    pub fn visible_messages(&self) -> Vec<Message> {
        self.store.view(self.view.active_partition)
    }

    /// Opens a message in the visible partition, marking it read.
    pub fn open_message(&self, id: &MessageId) -> Option<Message> {
        if !self.store.mark_read(self.view.active_partition, id) {
            return None;
        }
        self.store.get(id)
    }

    /// Toggles the favorite flag of a message in the visible partition.
    pub fn toggle_favorite(&self, id: &MessageId) -> Option<bool> {
        self.store.toggle_favorite(self.view.active_partition, id)
    }

    /// Moves a message in the visible partition to Trash.
    pub fn trash(&self, id: &MessageId) -> bool {
        self.store.move_to_trash(self.view.active_partition, id)
    }

    /// Moves a trashed message back where it came from.
    pub fn restore(&self, id: &MessageId) -> bool {
        self.store.restore(id)
    }

    /// Starts a reply to a message in the visible partition.
    pub fn reply(&self, id: &MessageId) -> Option<Draft> {
        self.store
            .find(self.view.active_partition, id)
            .map(|message| Draft::reply_to(&message))
    }

    /// Closes the session.
    pub async fn disconnect(&self) {
        self.orchestrator.disconnect().await;
    }

    /// Stops polling, waits for background work and closes the session.
    pub async fn shutdown(&mut self) {
        self.orchestrator.shutdown().await;
        self.drain_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Preset, Protocol};
    use crate::providers::email::MemoryConnector;
    use crate::services::MockNotificationSink;
    use mockall::predicate::{eq, function};
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn settings(active: bool) -> Settings {
        let mut account =
            Account::from_preset(Preset::Gmail, "Me", "me@gmail.com", "pw", Protocol::Imap)
                .unwrap();
        account.active = active;
        Settings {
            accounts: AccountBook::new(vec![account]),
            notifications_enabled: true,
        }
    }

    fn two_accounts() -> Settings {
        let mut gmail =
            Account::from_preset(Preset::Gmail, "Me", "me@gmail.com", "pw", Protocol::Imap)
                .unwrap();
        gmail.active = true;
        let yeah = Account::from_preset(Preset::Yeah, "Me", "me@yeah.net", "pw", Protocol::Imap)
            .unwrap();
        Settings {
            accounts: AccountBook::new(vec![gmail, yeah]),
            notifications_enabled: true,
        }
    }

    fn quiet_sink() -> Box<dyn NotificationSink> {
        let mut sink = MockNotificationSink::new();
        sink.expect_deliver().return_const(());
        Box::new(sink)
    }

    #[tokio::test]
    async fn connect_triggers_fetch() {
        let connector = MemoryConnector::new();
        connector.deliver_simple("alice@example.com", "hello", "hi there");
        let mut app = App::new(Arc::new(connector.clone()), settings(true), quiet_sink());

        app.start();
        assert!(app.next_event().await);
        assert!(app.view().connected);

        assert!(app.next_event().await);
        let inbox = app.visible_messages();
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].subject, "hello");
        app.shutdown().await;
    }

    #[tokio::test]
    async fn new_mail_notifies() {
        let connector = MemoryConnector::new();
        let mut sink = MockNotificationSink::new();
        sink.expect_deliver()
            .with(
                eq("New email"),
                function(|body: &str| body.contains("Subject: hello")),
            )
            .times(1)
            .return_const(());
        let mut app = App::new(Arc::new(connector), settings(false), Box::new(sink));

        app.handle_event(ClientEvent::MessageReceived(Message::new(
            "alice@example.com",
            "hello",
            "body",
            Default::default(),
        )));
        assert_eq!(app.store().len(Partition::Inbox), 1);
    }

    #[tokio::test]
    async fn invalid_draft_is_rejected_before_dispatch() {
        let connector = MemoryConnector::new();
        let mut app = App::new(Arc::new(connector.clone()), settings(true), quiet_sink());

        let result = app.send(Draft::new("nobody", "Hi", "body")).await;
        assert!(matches!(result, Err(DraftError::InvalidRecipient(_))));
        assert!(!app.view().sending);
        assert_eq!(connector.submission_opens(), 0);
    }

    #[tokio::test]
    async fn switch_account_connects() {
        let connector = MemoryConnector::new();
        let mut app = App::new(Arc::new(connector.clone()), settings(false), quiet_sink());

        assert_eq!(app.refresh(), None);
        assert_eq!(app.switch_account("missing@example.com").await, None);
        assert_eq!(
            app.switch_account("ME@gmail.com").await,
            Some(Dispatch::Started)
        );
        assert!(app.next_event().await);
        assert!(app.view().connected);
        assert_eq!(app.accounts().active().unwrap().address, "me@gmail.com");
    }

    #[tokio::test]
    async fn errors_are_recorded() {
        let mut app = App::new(Arc::new(MemoryConnector::new()), settings(false), quiet_sink());
        app.handle_event(ClientEvent::Error {
            kind: ErrorKind::Auth,
            detail: "bad password".to_string(),
        });
        assert_eq!(
            app.view().last_error,
            Some((ErrorKind::Auth, "bad password".to_string()))
        );
    }

    #[tokio::test]
    async fn open_marks_read_in_visible_partition() {
        let app = App::new(Arc::new(MemoryConnector::new()), settings(false), quiet_sink());
        let id = app
            .store()
            .insert_received(Message::new("a", "s", "b", Default::default()))
            .unwrap();

        assert!(app.open_message(&id).unwrap().is_read);
        assert_eq!(app.toggle_favorite(&id), Some(true));
        assert!(app.trash(&id));
        assert!(app.visible_messages().is_empty());
    }

    #[tokio::test]
    async fn editing_active_account_reconnects_with_new_credential() {
        let connector = MemoryConnector::new();
        connector.require_credential("new-pw");
        let mut app = App::new(Arc::new(connector.clone()), settings(true), quiet_sink());

        app.start();
        assert!(app.next_event().await);
        assert!(app.next_event().await);
        assert_eq!(app.view().last_error.as_ref().map(|e| e.0), Some(ErrorKind::Auth));

        let mut edited = app.accounts().active().unwrap().clone();
        edited.credential = "new-pw".to_string();
        assert_eq!(app.save_account(edited).await, Some(Dispatch::Started));
        assert!(app.next_event().await);
        assert!(app.view().connected);
        assert_eq!(app.view().last_error, None);
        assert_eq!(
            app.orchestrator.connected_account().unwrap().credential,
            "new-pw"
        );
        app.shutdown().await;
    }

    #[tokio::test]
    async fn saving_inactive_account_does_not_connect() {
        let connector = MemoryConnector::new();
        let mut app = App::new(Arc::new(connector.clone()), settings(false), quiet_sink());

        let other =
            Account::from_preset(Preset::Yeah, "Me", "me@yeah.net", "pw", Protocol::Imap).unwrap();
        assert_eq!(app.save_account(other).await, None);
        assert_eq!(app.accounts().accounts().len(), 2);
        assert_eq!(connector.retrieval_opens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_during_connect_lands_on_new_account() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(2));
        let mut app = App::new(Arc::new(connector.clone()), two_accounts(), quiet_sink());

        app.start();
        assert_eq!(
            app.switch_account("me@yeah.net").await,
            Some(Dispatch::Busy)
        );

        // First connect lands on the old account; handling it reconnects.
        assert!(app.next_event().await);
        assert!(app.next_event().await);
        assert!(app.view().connected);
        assert_eq!(
            app.orchestrator.connected_account().unwrap().address,
            "me@yeah.net"
        );
        assert_eq!(connector.retrieval_opens(), 2);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn removing_active_account_disconnects() {
        let connector = MemoryConnector::new();
        let mut app = App::new(Arc::new(connector.clone()), settings(true), quiet_sink());
        app.start();
        assert!(app.next_event().await);
        assert!(app.view().connected);

        assert_eq!(app.remove_account("nobody@example.com").await, None);
        let removed = app.remove_account("me@gmail.com").await.unwrap();
        assert_eq!(removed.address, "me@gmail.com");
        assert!(app.accounts().accounts().is_empty());
        assert_eq!(app.session_state(), SessionState::Disconnected);
        assert_eq!(app.refresh(), None);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn account_changes_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let mut app = App::new(Arc::new(MemoryConnector::new()), settings(false), quiet_sink())
            .persist_to(&path);

        let other =
            Account::from_preset(Preset::Yeah, "Me", "me@yeah.net", "pw", Protocol::Imap).unwrap();
        app.save_account(other).await;
        app.switch_account("me@yeah.net").await;
        app.set_notifications_enabled(false).await;

        let saved = Settings::load(&path).unwrap();
        assert_eq!(saved.accounts.accounts().len(), 2);
        assert_eq!(saved.accounts.active().unwrap().address, "me@yeah.net");
        assert!(!saved.notifications_enabled);

        app.remove_account("me@gmail.com").await;
        assert_eq!(Settings::load(&path).unwrap().accounts.accounts().len(), 1);
        app.shutdown().await;
    }

    #[tokio::test]
    async fn muted_category_is_not_delivered() {
        let mut sink = MockNotificationSink::new();
        sink.expect_deliver().never();
        let mut app = App::new(
            Arc::new(MemoryConnector::new()),
            settings(false),
            Box::new(sink),
        );

        app.mute_notifications(NotificationCategory::NewEmail);
        app.handle_event(ClientEvent::MessageReceived(Message::new(
            "alice@example.com",
            "hello",
            "body",
            Default::default(),
        )));
        assert_eq!(app.store().len(Partition::Inbox), 1);
    }

    #[tokio::test]
    async fn reply_and_restore_from_visible_partition() {
        let mut app = App::new(Arc::new(MemoryConnector::new()), settings(false), quiet_sink());
        let id = app
            .store()
            .insert_received(Message::new(
                "Alice <alice@example.com>",
                "Re: lunch",
                "b",
                Default::default(),
            ))
            .unwrap();

        let draft = app.reply(&id).unwrap();
        assert_eq!(draft.recipient, "alice@example.com");
        assert_eq!(draft.subject, "Re: lunch");

        assert!(app.trash(&id));
        assert_eq!(app.reply(&id), None);
        app.navigate_to(Partition::Trash);
        assert!(app.reply(&id).is_some());

        assert!(app.restore(&id));
        assert!(app.visible_messages().is_empty());
        app.navigate_to(Partition::Inbox);
        assert_eq!(app.visible_messages().len(), 1);
    }
}
