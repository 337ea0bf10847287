//! Drives a [`ConnectionManager`] from a request queue.
//!
//! The manager is `&mut self` and its sends may wait on a handshake, so a
//! front-end hands it to a [`Dispatcher`] and submits requests without
//! blocking. Requests are served strictly in submission order.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::command::OutgoingCommand;
use crate::error::ConnectionError;
use crate::manager::{ConnectionManager, ConnectionState, StateWatch};

/// How long `shutdown` waits for an in-flight request before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Result of one submitted send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered(OutgoingCommand),
    Undelivered {
        command: OutgoingCommand,
        error: ConnectionError,
    },
}

enum Request {
    Connect,
    Send(OutgoingCommand),
    Shutdown,
}

pub struct Dispatcher {
    requests: mpsc::UnboundedSender<Request>,
    state: StateWatch,
    endpoint: String,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Move `manager` onto a worker task. `outcomes` is called once per
    /// send, from the worker.
    pub fn spawn<F>(manager: ConnectionManager, outcomes: F) -> Self
    where
        F: Fn(Outcome) + Send + 'static,
    {
        let (requests, rx) = mpsc::unbounded_channel();
        let state = manager.watch_state();
        let endpoint = manager.endpoint().to_string();
        let worker = tokio::spawn(serve(manager, rx, outcomes));
        Self {
            requests,
            state,
            endpoint,
            worker,
        }
    }

    /// Open the connection ahead of the first send.
    pub fn connect(&self) {
        self.submit(Request::Connect);
    }

    pub fn send(&self, command: OutgoingCommand) {
        self.submit(Request::Send(command));
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn watch(&self) -> StateWatch {
        self.state.clone()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Stop the worker and close the connection.
    pub async fn shutdown(self) {
        self.submit(Request::Shutdown);
        let mut worker = self.worker;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut worker).await.is_err() {
            debug!("Dispatcher busy at shutdown; aborting");
            worker.abort();
            let _ = worker.await;
        }
    }

    fn submit(&self, request: Request) {
        if self.requests.send(request).is_err() {
            warn!("Dispatcher worker is gone; request dropped");
        }
    }
}

async fn serve<F>(mut manager: ConnectionManager, mut requests: mpsc::UnboundedReceiver<Request>, outcomes: F)
where
    F: Fn(Outcome) + Send + 'static,
{
    while let Some(request) = requests.recv().await {
        match request {
            Request::Connect => {
                if let Err(e) = manager.ensure_open().await {
                    warn!(endpoint = %manager.endpoint(), error = %e, "Eager connect failed");
                }
            }
            Request::Send(command) => match manager.send(&command).await {
                Ok(()) => outcomes(Outcome::Delivered(command)),
                Err(error) => {
                    warn!(endpoint = %manager.endpoint(), error = %error, "Send failed");
                    outcomes(Outcome::Undelivered { command, error });
                }
            },
            Request::Shutdown => break,
        }
    }
    manager.close();
}
