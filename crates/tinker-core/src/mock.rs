//! In-memory connector for tests and offline demos.
//!
//! Every accepted dial produces a [`MockRemote`]: the far end of the link,
//! which can read the frames the manager wrote and push frames, errors, or
//! a close back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ConnectionError;
use crate::transport::{Connector, Inbound, Link};

/// How the next dials behave.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DialBehavior {
    Accept,
    /// Accept after the given delay.
    Delay(Duration),
    Refuse(String),
    /// Never complete the handshake.
    Hang,
}

/// The far end of one accepted link.
pub struct MockRemote {
    pub endpoint: String,
    frames: mpsc::UnboundedReceiver<String>,
    events: mpsc::UnboundedSender<Inbound>,
}

impl MockRemote {
    /// Next frame written by the client; `None` once the client released the link.
    pub async fn next_frame(&mut self) -> Option<String> {
        self.frames.recv().await
    }

    pub fn try_frame(&mut self) -> Option<String> {
        self.frames.try_recv().ok()
    }

    pub fn reply(&self, frame: impl Into<String>) {
        let _ = self.events.send(Inbound::Frame(frame.into()));
    }

    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.events.send(Inbound::Error(reason.into()));
    }

    pub fn hang_up(&self) {
        let _ = self.events.send(Inbound::Closed);
    }

    /// Whether the client has dropped its side of the link.
    pub fn is_released(&self) -> bool {
        self.events.is_closed()
    }
}

struct Inner {
    dials: AtomicUsize,
    behavior: Mutex<DialBehavior>,
    remotes: mpsc::UnboundedSender<MockRemote>,
}

/// Cloneable handle; all clones share the dial counter and behavior.
#[derive(Clone)]
pub struct MockConnector {
    inner: Arc<Inner>,
}

impl MockConnector {
    /// Returns the connector and the stream of remotes it accepts.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockRemote>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connector = Self {
            inner: Arc::new(Inner {
                dials: AtomicUsize::new(0),
                behavior: Mutex::new(DialBehavior::Accept),
                remotes: tx,
            }),
        };
        (connector, rx)
    }

    pub fn set_behavior(&self, behavior: DialBehavior) {
        *self.inner.behavior.lock().unwrap_or_else(PoisonError::into_inner) = behavior;
    }

    /// Number of dial attempts so far, successful or not.
    pub fn dials(&self) -> usize {
        self.inner.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Link, ConnectionError> {
        self.inner.dials.fetch_add(1, Ordering::SeqCst);
        let behavior = self.inner.behavior.lock().unwrap_or_else(PoisonError::into_inner).clone();

        match behavior {
            DialBehavior::Accept => {}
            DialBehavior::Delay(delay) => tokio::time::sleep(delay).await,
            DialBehavior::Refuse(reason) => return Err(ConnectionError::Connect(reason)),
            DialBehavior::Hang => std::future::pending::<()>().await,
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let remote = MockRemote {
            endpoint: endpoint.to_string(),
            frames: out_rx,
            events: in_tx,
        };
        self.inner
            .remotes
            .send(remote)
            .map_err(|_| ConnectionError::Connect("mock remote listener dropped".to_string()))?;

        Ok(Link {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
