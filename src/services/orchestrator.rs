//! Task orchestrator.
//!
//! Moves connect, fetch and send work off the caller onto tokio tasks. Two
//! single-flight gates keep at most one connect and one operation (fetch or
//! send) running; a request that finds its gate closed is dropped with
//! [`Dispatch::Busy`] rather than queued.
//!
//! Session state, and the account a live session serves, change only while
//! the session lock is held, so a connect result and a concurrent disconnect
//! are always published in the order they happened.
//!
//! Connects are watched: if one has not finished after
//! [`CONNECT_TIMEOUT`](crate::config::CONNECT_TIMEOUT) a timeout is reported
//! and the state becomes `Failed`, but the attempt itself keeps running. If it
//! later succeeds, that result replaces the timeout.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use super::flight::SingleFlight;
use super::session::{ProtocolSession, SessionState};
use crate::app::{ClientEvent, ErrorKind};
use crate::config::{CONNECT_TIMEOUT, FETCH_WINDOW};
use crate::domain::{Account, Draft};
use crate::providers::email::{FetchError, MailConnector};

/// Whether a request was accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The work was spawned.
    Started,
    /// The same kind of work is already in flight; nothing was queued.
    Busy,
}

/// Shared handle to the background machinery. Clones drive the same session.
pub struct Orchestrator<C: MailConnector> {
    session: Arc<Mutex<ProtocolSession<C>>>,
    connecting: SingleFlight,
    operating: SingleFlight,
    state: Arc<watch::Sender<SessionState>>,
    connected: Arc<watch::Sender<Option<Account>>>,
    events: mpsc::UnboundedSender<ClientEvent>,
    tracker: TaskTracker,
    cancel: CancellationToken,
    connect_timeout: Duration,
}

impl<C: MailConnector> Clone for Orchestrator<C> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            connecting: self.connecting.clone(),
            operating: self.operating.clone(),
            state: Arc::clone(&self.state),
            connected: Arc::clone(&self.connected),
            events: self.events.clone(),
            tracker: self.tracker.clone(),
            cancel: self.cancel.clone(),
            connect_timeout: self.connect_timeout,
        }
    }
}

impl<C: MailConnector> Orchestrator<C> {
    /// Creates the orchestrator and the receiving end of its event channel.
    pub fn new(connector: Arc<C>) -> (Self, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let (state, _) = watch::channel(SessionState::Disconnected);
        let (connected, _) = watch::channel(None);
        let orchestrator = Self {
            session: Arc::new(Mutex::new(ProtocolSession::new(connector))),
            connecting: SingleFlight::new(),
            operating: SingleFlight::new(),
            state: Arc::new(state),
            connected: Arc::new(connected),
            events,
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            connect_timeout: CONNECT_TIMEOUT,
        };
        (orchestrator, receiver)
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watches session state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Account the live session serves, if connected.
    pub fn connected_account(&self) -> Option<Account> {
        self.connected.borrow().clone()
    }

    /// Token cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Tracker that [`shutdown`](Self::shutdown) waits on.
    pub(crate) fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    fn publish(&self, state: SessionState) {
        tracing::debug!(%state, "session state");
        self.state.send_replace(state);
    }

    fn publish_connected(&self, account: Option<Account>) {
        self.connected.send_replace(account);
        self.publish(SessionState::Connected);
    }

    fn publish_down(&self, state: SessionState) {
        self.connected.send_replace(None);
        self.publish(state);
    }

    fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("event receiver dropped");
        }
    }

    /// Checks for mail on behalf of `active`: fetches when the live session
    /// already serves that account, otherwise connects it. Returns `None`
    /// when no account is active.
    pub fn request_check(&self, active: Option<&Account>) -> Option<Dispatch> {
        let active = active?;
        let serving = self.state().is_connected()
            && self
                .connected
                .borrow()
                .as_ref()
                .is_some_and(|account| account.same_connection(active));
        if serving {
            Some(self.request_fetch())
        } else {
            tracing::debug!(account = %active.address, "session does not serve the active account");
            Some(self.request_connect(active.clone()))
        }
    }

    /// Starts connecting to `account` unless a connect is already running.
    pub fn request_connect(&self, account: Account) -> Dispatch {
        if self.cancel.is_cancelled() {
            return Dispatch::Busy;
        }
        let Some(ticket) = self.connecting.try_begin() else {
            tracing::debug!(account = %account.address, "connect already in flight");
            return Dispatch::Busy;
        };
        self.publish(SessionState::Connecting);

        let finished = self.cancel.child_token();
        self.spawn_watchdog(finished.clone());

        let this = self.clone();
        self.tracker.spawn(async move {
            let result = tokio::select! {
                _ = this.cancel.cancelled() => return,
                result = async {
                    let mut session = this.session.lock().await;
                    let result = session.connect(&account).await;
                    finished.cancel();
                    match &result {
                        Ok(()) => this.publish_connected(session.account().cloned()),
                        Err(e) => this.publish_down(SessionState::Failed(e.to_string())),
                    }
                    result
                } => result,
            };
            drop(ticket);

            match result {
                Ok(()) => this.emit(ClientEvent::ConnectionStatusChanged(true)),
                Err(e) => {
                    this.emit(ClientEvent::ConnectionStatusChanged(false));
                    this.emit(ClientEvent::error(&e));
                }
            }
        });
        Dispatch::Started
    }

    /// Reports a timeout if `finished` is not cancelled in time. Does not
    /// touch the attempt itself.
    fn spawn_watchdog(&self, finished: CancellationToken) {
        let this = self.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                biased;
                _ = finished.cancelled() => {}
                _ = tokio::time::sleep(this.connect_timeout) => {
                    tracing::warn!(timeout = ?this.connect_timeout, "connect timed out");
                    this.emit(ClientEvent::Error {
                        kind: ErrorKind::ConnectTimeout,
                        detail: "connect timed out".to_string(),
                    });
                    this.publish(SessionState::Failed("connect timed out".to_string()));
                }
            }
        });
    }

    /// Fetches the most recent messages unless an operation is running.
    pub fn request_fetch(&self) -> Dispatch {
        if self.cancel.is_cancelled() {
            return Dispatch::Busy;
        }
        let Some(ticket) = self.operating.try_begin() else {
            tracing::debug!("operation already in flight, fetch skipped");
            return Dispatch::Busy;
        };

        let this = self.clone();
        self.tracker.spawn(async move {
            let outcome = tokio::select! {
                _ = this.cancel.cancelled() => return,
                outcome = async {
                    let mut session = this.session.lock().await;
                    let result = session.list_recent(FETCH_WINDOW).await;
                    let lost = match &result {
                        Err(FetchError::Network(reason)) => {
                            session.mark_failed(reason.clone());
                            this.publish_down(SessionState::Failed(reason.clone()));
                            true
                        }
                        // No live handle behind a published Connected.
                        Err(FetchError::ProtocolState(_)) if this.state().is_connected() => {
                            this.publish_down(SessionState::Disconnected);
                            true
                        }
                        _ => false,
                    };
                    (result, lost)
                } => outcome,
            };
            drop(ticket);

            match outcome {
                (Ok(messages), _) => {
                    tracing::info!(count = messages.len(), "fetch complete");
                    for message in messages {
                        this.emit(ClientEvent::MessageReceived(message));
                    }
                }
                (Err(e), lost) => {
                    tracing::warn!(error = %e, "fetch failed");
                    if lost {
                        this.emit(ClientEvent::ConnectionStatusChanged(false));
                    }
                    this.emit(ClientEvent::error(&e));
                }
            }
        });
        Dispatch::Started
    }

    /// Sends `draft` unless an operation is running.
    pub fn request_send(&self, draft: Draft) -> Dispatch {
        if self.cancel.is_cancelled() {
            return Dispatch::Busy;
        }
        let Some(ticket) = self.operating.try_begin() else {
            tracing::debug!(to = %draft.recipient, "operation already in flight, send refused");
            return Dispatch::Busy;
        };

        let this = self.clone();
        self.tracker.spawn(async move {
            let result = tokio::select! {
                _ = this.cancel.cancelled() => return,
                result = async { this.session.lock().await.submit(&draft).await } => result,
            };
            drop(ticket);

            match result {
                Ok(sent) => this.emit(ClientEvent::SendCompleted {
                    success: true,
                    sent: Some(sent),
                }),
                Err(e) => {
                    this.emit(ClientEvent::error(&e));
                    this.emit(ClientEvent::SendCompleted {
                        success: false,
                        sent: None,
                    });
                }
            }
        });
        Dispatch::Started
    }

    /// Closes the session and reports the disconnect.
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        session.close().await;
        self.publish_down(SessionState::Disconnected);
        drop(session);
        self.emit(ClientEvent::ConnectionStatusChanged(false));
    }

    /// Cancels outstanding work, waits for every task, then closes the
    /// session.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down");
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        let mut session = self.session.lock().await;
        session.close().await;
        self.publish_down(SessionState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Preset, Protocol};
    use crate::providers::email::MemoryConnector;
    use pretty_assertions::assert_eq;

    fn account() -> Account {
        Account::from_preset(Preset::Gmail, "Me", "me@gmail.com", "pw", Protocol::Imap).unwrap()
    }

    fn orchestrator(
        connector: &MemoryConnector,
    ) -> (
        Orchestrator<MemoryConnector>,
        mpsc::UnboundedReceiver<ClientEvent>,
    ) {
        Orchestrator::new(Arc::new(connector.clone()))
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    async fn settle<C: MailConnector>(orchestrator: &Orchestrator<C>) {
        while !orchestrator.tracker().is_empty() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn connect_emits_status() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);

        assert_eq!(orch.request_connect(account()), Dispatch::Started);
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));
        assert_eq!(orch.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn failed_connect_emits_error() {
        let connector = MemoryConnector::new();
        connector.require_credential("secret");
        let (orch, mut rx) = orchestrator(&connector);

        orch.request_connect(account());
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(false)));
        match rx.recv().await {
            Some(ClientEvent::Error { kind, .. }) => assert_eq!(kind, ErrorKind::Auth),
            other => panic!("expected auth error, got {:?}", other),
        }
        assert!(matches!(orch.state(), SessionState::Failed(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_connects_are_single_flighted() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(2));
        let (orch, mut rx) = orchestrator(&connector);

        assert_eq!(orch.request_connect(account()), Dispatch::Started);
        assert_eq!(orch.request_connect(account()), Dispatch::Busy);
        assert_eq!(orch.clone().request_connect(account()), Dispatch::Busy);

        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));
        assert_eq!(connector.retrieval_opens(), 1);

        // The gate reopens once the attempt finishes.
        settle(&orch).await;
        assert_eq!(orch.request_connect(account()), Dispatch::Started);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_connect_times_out_then_recovers() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(15));
        let (orch, mut rx) = orchestrator(&connector);
        let mut state = orch.subscribe_state();

        orch.request_connect(account());

        let first = rx.recv().await;
        assert_eq!(
            first,
            Some(ClientEvent::Error {
                kind: ErrorKind::ConnectTimeout,
                detail: "connect timed out".to_string()
            })
        );
        state.changed().await.unwrap();
        assert_eq!(
            *state.borrow_and_update(),
            SessionState::Failed("connect timed out".to_string())
        );

        // Still held by the running attempt.
        assert_eq!(orch.request_connect(account()), Dispatch::Busy);

        // The late success wins.
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));
        assert_eq!(orch.state(), SessionState::Connected);

        settle(&orch).await;
        let timeouts = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, ClientEvent::Error { kind: ErrorKind::ConnectTimeout, .. }))
            .count();
        assert_eq!(timeouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fast_connect_never_times_out() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(1));
        let (orch, mut rx) = orchestrator(&connector);

        orch.request_connect(account());
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));

        tokio::time::sleep(Duration::from_secs(30)).await;
        settle(&orch).await;
        assert!(drain(&mut rx).is_empty());
        assert_eq!(orch.state(), SessionState::Connected);
    }

    #[tokio::test]
    async fn fetch_emits_messages_in_order() {
        let connector = MemoryConnector::new();
        for i in 1..=12 {
            connector.deliver_simple("a@example.com", &format!("m{}", i), "body");
        }
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        assert_eq!(orch.request_fetch(), Dispatch::Started);
        let mut subjects = Vec::new();
        for _ in 0..10 {
            match rx.recv().await {
                Some(ClientEvent::MessageReceived(m)) => subjects.push(m.subject),
                other => panic!("unexpected {:?}", other),
            }
        }
        let expected: Vec<String> = (3..=12).map(|i| format!("m{}", i)).collect();
        assert_eq!(subjects, expected);
    }

    #[tokio::test]
    async fn fetch_network_failure_marks_failed() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        connector.set_offline(true);
        orch.request_fetch();
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(false)));
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Error { kind: ErrorKind::Network, .. })
        ));
        assert!(matches!(orch.state(), SessionState::Failed(_)));
    }

    #[tokio::test]
    async fn fetch_before_connect_reports_protocol_state() {
        let (orch, mut rx) = orchestrator(&MemoryConnector::new());
        orch.request_fetch();
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Error { kind: ErrorKind::Fetch, .. })
        ));
        assert_eq!(orch.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn fetch_and_send_share_a_gate() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        // Hold the session so the fetch cannot finish.
        let guard = orch.session.lock().await;
        assert_eq!(orch.request_fetch(), Dispatch::Started);
        assert_eq!(
            orch.request_send(Draft::new("bob@example.com", "Hi", "body")),
            Dispatch::Busy
        );
        assert_eq!(orch.request_fetch(), Dispatch::Busy);
        drop(guard);

        settle(&orch).await;
        assert_eq!(
            orch.request_send(Draft::new("bob@example.com", "Hi", "body")),
            Dispatch::Started
        );
    }

    #[tokio::test]
    async fn send_reports_completion() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        orch.request_send(Draft::new("bob@example.com", "Hi", "body"));
        match rx.recv().await {
            Some(ClientEvent::SendCompleted {
                success: true,
                sent: Some(sent),
            }) => assert_eq!(sent.subject, "Hi"),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(connector.submitted().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_reports_error_then_completion() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        let draft = Draft::new("bob@example.com", "Hi", "body").attach("/missing/file");
        orch.request_send(draft);
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Error { kind: ErrorKind::Attachment, .. })
        ));
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::SendCompleted {
                success: false,
                sent: None
            })
        );
    }

    #[tokio::test]
    async fn disconnect_reports_status() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        orch.disconnect().await;
        orch.disconnect().await;
        assert_eq!(
            drain(&mut rx),
            vec![
                ClientEvent::ConnectionStatusChanged(false),
                ClientEvent::ConnectionStatusChanged(false)
            ]
        );
        assert_eq!(orch.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_pending_work() {
        let connector = MemoryConnector::new();
        connector.set_connect_delay(Duration::from_secs(60));
        let (orch, mut rx) = orchestrator(&connector);

        orch.request_connect(account());
        orch.shutdown().await;

        assert!(orch.tracker().is_empty());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(orch.state(), SessionState::Disconnected);
        assert_eq!(orch.request_connect(account()), Dispatch::Busy);
    }

    #[tokio::test]
    async fn fetch_without_live_session_drops_connected() {
        let connector = MemoryConnector::new();
        let (orch, mut rx) = orchestrator(&connector);
        orch.request_connect(account());
        rx.recv().await;

        // The handle goes away while Connected is still published.
        orch.session.lock().await.close().await;
        assert!(orch.state().is_connected());

        assert_eq!(orch.request_fetch(), Dispatch::Started);
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(false)));
        assert!(matches!(
            rx.recv().await,
            Some(ClientEvent::Error { kind: ErrorKind::Fetch, .. })
        ));
        assert_eq!(orch.state(), SessionState::Disconnected);
        assert_eq!(orch.connected_account(), None);

        // The next check reconnects instead of fetching again.
        settle(&orch).await;
        assert_eq!(orch.request_check(Some(&account())), Some(Dispatch::Started));
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));
        assert_eq!(connector.retrieval_opens(), 2);
    }

    #[tokio::test]
    async fn check_fetches_only_for_the_served_account() {
        let connector = MemoryConnector::new();
        connector.deliver_simple("a@example.com", "hello", "body");
        let (orch, mut rx) = orchestrator(&connector);

        assert_eq!(orch.request_check(None), None);
        assert_eq!(orch.request_check(Some(&account())), Some(Dispatch::Started));
        rx.recv().await;
        assert_eq!(
            orch.connected_account().map(|a| a.address),
            Some("me@gmail.com".to_string())
        );

        settle(&orch).await;
        assert_eq!(orch.request_check(Some(&account())), Some(Dispatch::Started));
        assert!(matches!(rx.recv().await, Some(ClientEvent::MessageReceived(_))));
        assert_eq!(connector.retrieval_opens(), 1);

        // Another account, or the same one with a new credential, reconnects.
        settle(&orch).await;
        let mut rotated = account();
        rotated.credential = "rotated".to_string();
        assert_eq!(orch.request_check(Some(&rotated)), Some(Dispatch::Started));
        assert_eq!(rx.recv().await, Some(ClientEvent::ConnectionStatusChanged(true)));
        assert_eq!(connector.retrieval_opens(), 2);
        assert_eq!(
            orch.connected_account().map(|a| a.credential),
            Some("rotated".to_string())
        );

        orch.disconnect().await;
        assert_eq!(orch.connected_account(), None);
    }
}
