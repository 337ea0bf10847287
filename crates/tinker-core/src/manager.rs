//! Connection lifecycle.
//!
//! A [`ConnectionManager`] owns at most one [`Connection`] at a time. It
//! reuses the current one while it is open and transparently dials a
//! replacement when it is not. Reconnection is demand-driven: nothing
//! retries in the background.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::OutgoingCommand;
use crate::error::ConnectionError;
use crate::event::IncomingEvent;
use crate::transport::{Connector, Inbound};

/// Identity of one connection. Ids only grow within a manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Open,
    Closing,
    Closed,
}

impl ConnectionState {
    pub fn is_open(self) -> bool {
        self == Self::Open
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// State of the newest connection, tagged with its id so that a replaced
/// connection's pump can't overwrite it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Snapshot {
    connection: Option<ConnectionId>,
    state: ConnectionState,
}

impl Snapshot {
    const IDLE: Self = Self {
        connection: None,
        state: ConnectionState::Closed,
    };
}

/// Callback for parsed incoming events.
pub type IncomingHandler = Arc<dyn Fn(IncomingEvent) + Send + Sync>;
type HandlerSlot = Arc<RwLock<Option<IncomingHandler>>>;

/// Read-only view of the manager's connection state.
#[derive(Clone)]
pub struct StateWatch {
    rx: watch::Receiver<Snapshot>,
}

impl StateWatch {
    pub fn get(&self) -> ConnectionState {
        self.rx.borrow().state
    }

    pub fn is_open(&self) -> bool {
        self.get().is_open()
    }

    /// Id of the newest connection, if one was ever dialed.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.rx.borrow().connection
    }

    /// Wait until the state equals `target`. Returns immediately if it already does.
    pub async fn wait_for(&mut self, target: ConnectionState) {
        loop {
            if self.rx.borrow_and_update().state == target {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// One channel. Dropping it cancels its pump and closes the transport.
pub struct Connection {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<String>,
    status: Arc<watch::Sender<Snapshot>>,
    pump: JoinHandle<()>,
}

impl Connection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        let snapshot = *self.status.borrow();
        if snapshot.connection == Some(self.id) {
            snapshot.state
        } else {
            ConnectionState::Closed
        }
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    fn write(&self, frame: String) -> Result<(), ConnectionError> {
        self.outbound
            .send(frame)
            .map_err(|_| ConnectionError::SendOnClosedChannel)
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: String,
    open_timeout: Duration,
    current: Option<Connection>,
    next_id: u64,
    handler: HandlerSlot,
    status: Arc<watch::Sender<Snapshot>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, endpoint: impl Into<String>, open_timeout: Duration) -> Self {
        let (status, _) = watch::channel(Snapshot::IDLE);
        Self {
            connector,
            endpoint: endpoint.into(),
            open_timeout,
            current: None,
            next_id: 1,
            handler: Arc::new(RwLock::new(None)),
            status: Arc::new(status),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn current_state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub fn watch_state(&self) -> StateWatch {
        StateWatch {
            rx: self.status.subscribe(),
        }
    }

    /// Register the callback for incoming events. It stays bound across
    /// reconnects and replaces any earlier callback, including for the
    /// live connection.
    pub fn on_incoming<F>(&mut self, handler: F)
    where
        F: Fn(IncomingEvent) + Send + Sync + 'static,
    {
        let mut slot = self.handler.write().unwrap_or_else(PoisonError::into_inner);
        *slot = Some(Arc::new(handler));
    }

    /// Return the current connection if it is open, otherwise dial a new one
    /// and wait (up to the open timeout) for it to open.
    pub async fn ensure_open(&mut self) -> Result<&Connection, ConnectionError> {
        let reusable = self.current.as_ref().is_some_and(|c| c.is_open());
        if !reusable {
            self.reconnect().await?;
        }
        self.current.as_ref().ok_or(ConnectionError::SendOnClosedChannel)
    }

    /// Encode `command` and write it on an open connection. No acknowledgement
    /// is awaited; echoing the command locally is up to the caller.
    pub async fn send(&mut self, command: &OutgoingCommand) -> Result<(), ConnectionError> {
        let frame = command.to_wire()?;
        let connection = self.ensure_open().await?;
        let id = connection.id;

        if let Err(e) = connection.write(frame) {
            warn!(connection = %id, error = %e, "Write failed");
            mark_closed(&self.status, id);
            return Err(e);
        }
        debug!(connection = %id, "Frame written");
        Ok(())
    }

    /// Close the current connection, if any. Safe to call repeatedly.
    pub fn close(&mut self) {
        let Some(connection) = self.current.take() else {
            // A dial abandoned mid-flight leaves CONNECTING behind
            self.status.send_if_modified(|s| {
                if s.state == ConnectionState::Closed {
                    return false;
                }
                s.state = ConnectionState::Closed;
                true
            });
            return;
        };

        let id = connection.id;
        self.publish(id, ConnectionState::Closing);
        drop(connection);
        self.publish(id, ConnectionState::Closed);
        info!(connection = %id, "Connection closed");
    }

    async fn reconnect(&mut self) -> Result<(), ConnectionError> {
        if let Some(stale) = self.current.take() {
            debug!(connection = %stale.id, state = %stale.state(), "Releasing stale connection");
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.publish(id, ConnectionState::Connecting);
        debug!(connection = %id, endpoint = %self.endpoint, "Connecting");

        let dial = tokio::time::timeout(self.open_timeout, self.connector.connect(&self.endpoint)).await;
        let link = match dial {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                warn!(connection = %id, endpoint = %self.endpoint, error = %e, "Connect failed");
                self.publish(id, ConnectionState::Closed);
                return Err(e);
            }
            Err(_) => {
                warn!(connection = %id, endpoint = %self.endpoint, timeout = ?self.open_timeout, "Connect timed out");
                self.publish(id, ConnectionState::Closed);
                return Err(ConnectionError::OpenTimeout(self.open_timeout));
            }
        };

        self.publish(id, ConnectionState::Open);
        let pump = tokio::spawn(pump(
            id,
            link.inbound,
            Arc::clone(&self.handler),
            Arc::clone(&self.status),
        ));
        self.current = Some(Connection {
            id,
            outbound: link.outbound,
            status: Arc::clone(&self.status),
            pump,
        });
        info!(connection = %id, endpoint = %self.endpoint, "Connection open");
        Ok(())
    }

    fn publish(&self, id: ConnectionId, state: ConnectionState) {
        self.status.send_replace(Snapshot {
            connection: Some(id),
            state,
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Mark `id` closed, unless a newer connection has taken over the snapshot.
fn mark_closed(status: &watch::Sender<Snapshot>, id: ConnectionId) {
    status.send_if_modified(|s| {
        if s.connection != Some(id) || s.state == ConnectionState::Closed {
            return false;
        }
        s.state = ConnectionState::Closed;
        true
    });
}

/// Delivers one connection's inbound frames to the handler, in order, until
/// the link errors or closes.
async fn pump(
    id: ConnectionId,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    handler: HandlerSlot,
    status: Arc<watch::Sender<Snapshot>>,
) {
    while let Some(event) = inbound.recv().await {
        match event {
            Inbound::Frame(frame) => match IncomingEvent::parse(&frame) {
                Ok(incoming) => {
                    let handler = handler.read().unwrap_or_else(PoisonError::into_inner).clone();
                    match handler {
                        Some(handler) => handler(incoming),
                        None => debug!(connection = %id, "No incoming handler; event dropped"),
                    }
                }
                Err(e) => warn!(connection = %id, error = %e, "Dropping malformed frame"),
            },
            Inbound::Error(reason) => {
                warn!(connection = %id, %reason, "Connection error");
                break;
            }
            Inbound::Closed => {
                info!(connection = %id, "Remote closed connection");
                break;
            }
        }
    }
    mark_closed(&status, id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{DialBehavior, MockConnector, MockRemote};
    use crate::state::ChatHistory;

    const ENDPOINT: &str = "ws://device.local:8765";

    fn manager() -> (ConnectionManager, MockConnector, mpsc::UnboundedReceiver<MockRemote>) {
        let (connector, remotes) = MockConnector::new();
        let manager = ConnectionManager::new(Arc::new(connector.clone()), ENDPOINT, Duration::from_secs(10));
        (manager, connector, remotes)
    }

    fn capture(manager: &mut ConnectionManager) -> mpsc::UnboundedReceiver<IncomingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        manager.on_incoming(move |event| {
            let _ = tx.send(event);
        });
        rx
    }

    async fn settle(watch: &mut StateWatch, state: ConnectionState) {
        tokio::time::timeout(Duration::from_secs(5), watch.wait_for(state))
            .await
            .expect("state never reached");
    }

    #[tokio::test]
    async fn test_starts_closed() {
        let (manager, connector, _remotes) = manager();
        assert_eq!(manager.current_state(), ConnectionState::Closed);
        assert_eq!(manager.watch_state().connection(), None);
        assert_eq!(connector.dials(), 0);
    }

    #[tokio::test]
    async fn test_ensure_open_reuses_open_connection() {
        let (mut manager, connector, mut remotes) = manager();

        let first = manager.ensure_open().await.unwrap().id();
        let second = manager.ensure_open().await.unwrap().id();

        assert_eq!(first, second);
        assert_eq!(connector.dials(), 1);
        assert_eq!(manager.current_state(), ConnectionState::Open);
        assert_eq!(remotes.recv().await.unwrap().endpoint, ENDPOINT);
    }

    #[tokio::test]
    async fn test_sends_while_open_are_written_in_order() {
        let (mut manager, connector, mut remotes) = manager();

        manager.send(&OutgoingCommand::run_all()).await.unwrap();
        manager.send(&OutgoingCommand::user_message("blink twice")).await.unwrap();
        manager.send(&OutgoingCommand::stop()).await.unwrap();

        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(
            remote.next_frame().await.unwrap(),
            r#"{"command":"run","params":{"workflow":"full","use_hardware":true}}"#
        );
        assert_eq!(
            remote.next_frame().await.unwrap(),
            r#"{"command":"run","params":{"workflow":"assistant","message":"blink twice"}}"#
        );
        assert_eq!(remote.next_frame().await.unwrap(), r#"{"command":"stop"}"#);
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_closed_writes_only_after_open() {
        let (mut manager, connector, mut remotes) = manager();
        let mut watch = manager.watch_state();
        connector.set_behavior(DialBehavior::Delay(Duration::from_secs(2)));

        let task = tokio::spawn(async move {
            let result = manager.send(&OutgoingCommand::stop()).await;
            (manager, result)
        });

        settle(&mut watch, ConnectionState::Connecting).await;
        assert!(remotes.try_recv().is_err());

        let (manager, result) = task.await.unwrap();
        result.unwrap();
        assert_eq!(manager.current_state(), ConnectionState::Open);

        let mut remote = remotes.recv().await.unwrap();
        assert_eq!(remote.next_frame().await.unwrap(), r#"{"command":"stop"}"#);
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test]
    async fn test_remote_close_then_send_dials_new_connection() {
        let (mut manager, connector, mut remotes) = manager();
        let mut watch = manager.watch_state();

        let first = manager.ensure_open().await.unwrap().id();
        let old = remotes.recv().await.unwrap();
        old.hang_up();
        settle(&mut watch, ConnectionState::Closed).await;

        manager.send(&OutgoingCommand::stop()).await.unwrap();

        let mut fresh = remotes.recv().await.unwrap();
        assert_eq!(fresh.next_frame().await.unwrap(), r#"{"command":"stop"}"#);
        assert_eq!(connector.dials(), 2);
        assert!(watch.connection().unwrap() > first);
        assert!(old.is_released());
    }

    #[tokio::test]
    async fn test_transport_error_closes_connection() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut watch = manager.watch_state();

        manager.ensure_open().await.unwrap();
        remotes.recv().await.unwrap().fail("connection reset by peer");

        settle(&mut watch, ConnectionState::Closed).await;
        assert_eq!(manager.current_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_close_then_send_dials_new_connection() {
        let (mut manager, connector, mut remotes) = manager();

        let first = manager.ensure_open().await.unwrap().id();
        let mut old = remotes.recv().await.unwrap();

        manager.close();
        assert_eq!(manager.current_state(), ConnectionState::Closed);
        assert_eq!(old.next_frame().await, None);

        manager.send(&OutgoingCommand::run_all()).await.unwrap();
        assert_eq!(old.try_frame(), None);
        let second = manager.ensure_open().await.unwrap().id();

        assert_ne!(first, second);
        assert_eq!(connector.dials(), 2);
        assert!(remotes.recv().await.unwrap().next_frame().await.is_some());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut manager, _connector, _remotes) = manager();
        manager.close();
        manager.ensure_open().await.unwrap();
        manager.close();
        manager.close();
        assert_eq!(manager.current_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_incoming_message_becomes_single_remote_entry() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut events = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        remotes.recv().await.unwrap().reply(r#"{"message":"hello"}"#);

        let mut history = ChatHistory::new();
        let event = events.recv().await.unwrap();
        history.push_remote(event.message);

        assert_eq!(history.len(), 1);
        assert_eq!(history.entries()[0].text, "hello");
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_frame_is_dropped_and_connection_stays_open() {
        let (mut manager, connector, mut remotes) = manager();
        let mut events = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        let remote = remotes.recv().await.unwrap();
        remote.reply("definitely not json");
        remote.reply(r#"{"status":"no message field"}"#);
        remote.reply(r#"{"message":"still here"}"#);

        assert_eq!(events.recv().await.unwrap().message, "still here");
        assert!(events.try_recv().is_err());
        assert_eq!(manager.current_state(), ConnectionState::Open);

        manager.ensure_open().await.unwrap();
        assert_eq!(connector.dials(), 1);
    }

    #[tokio::test]
    async fn test_events_arrive_in_order() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut events = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        let remote = remotes.recv().await.unwrap();
        for step in ["one", "two", "three"] {
            remote.reply(format!(r#"{{"message":"{step}"}}"#));
        }

        for step in ["one", "two", "three"] {
            assert_eq!(events.recv().await.unwrap().message, step);
        }
    }

    #[tokio::test]
    async fn test_handler_rebinds_to_new_connection() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut events = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        let _old = remotes.recv().await.unwrap();
        manager.close();

        manager.ensure_open().await.unwrap();
        remotes.recv().await.unwrap().reply(r#"{"message":"after reconnect"}"#);

        assert_eq!(events.recv().await.unwrap().message, "after reconnect");
    }

    #[tokio::test]
    async fn test_later_handler_replaces_earlier_one() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut first = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        let mut second = capture(&mut manager);
        remotes.recv().await.unwrap().reply(r#"{"message":"ping"}"#);

        assert_eq!(second.recv().await.unwrap().message, "ping");
        assert!(first.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_replaced_connection_cannot_touch_new_state() {
        let (mut manager, _connector, mut remotes) = manager();
        let mut events = capture(&mut manager);

        manager.ensure_open().await.unwrap();
        let stale = remotes.recv().await.unwrap();
        manager.close();

        let fresh_id = manager.ensure_open().await.unwrap().id();
        let fresh = remotes.recv().await.unwrap();

        stale.reply(r#"{"message":"stale"}"#);
        stale.hang_up();
        fresh.reply(r#"{"message":"fresh"}"#);

        assert_eq!(events.recv().await.unwrap().message, "fresh");
        assert!(events.try_recv().is_err());
        assert_eq!(manager.current_state(), ConnectionState::Open);
        assert_eq!(manager.watch_state().connection(), Some(fresh_id));
    }

    #[test]
    fn test_stale_pump_close_is_ignored() {
        let (status, _rx) = watch::channel(Snapshot {
            connection: Some(ConnectionId(2)),
            state: ConnectionState::Open,
        });

        mark_closed(&status, ConnectionId(1));
        assert_eq!(status.borrow().state, ConnectionState::Open);

        mark_closed(&status, ConnectionId(2));
        assert_eq!(status.borrow().state, ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dial_that_never_opens_times_out() {
        let (mut manager, connector, _remotes) = manager();
        connector.set_behavior(DialBehavior::Hang);

        let err = manager.send(&OutgoingCommand::stop()).await.unwrap_err();

        assert_eq!(err, ConnectionError::OpenTimeout(Duration::from_secs(10)));
        assert_eq!(manager.current_state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_refused_dial_reports_and_next_send_retries() {
        let (mut manager, connector, mut remotes) = manager();
        connector.set_behavior(DialBehavior::Refuse("connection refused".to_string()));

        let err = manager.send(&OutgoingCommand::run_all()).await.unwrap_err();
        assert!(err.is_connect_failure());
        assert_eq!(manager.current_state(), ConnectionState::Closed);

        connector.set_behavior(DialBehavior::Accept);
        manager.send(&OutgoingCommand::run_all()).await.unwrap();

        assert_eq!(connector.dials(), 2);
        assert!(remotes.recv().await.unwrap().next_frame().await.is_some());
    }

    #[tokio::test]
    async fn test_dropping_manager_releases_connection() {
        let (mut manager, _connector, mut remotes) = manager();
        manager.ensure_open().await.unwrap();
        let mut remote = remotes.recv().await.unwrap();

        drop(manager);
        assert_eq!(remote.next_frame().await, None);
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(7).to_string(), "conn-7");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
