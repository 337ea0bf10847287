pub mod command;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod manager;
pub mod mock;
pub mod state;
pub mod transport;

// Re-export main types for convenience
pub use command::OutgoingCommand;
pub use config::Config;
pub use dispatcher::{Dispatcher, Outcome};
pub use error::ConnectionError;
pub use event::IncomingEvent;
pub use manager::{Connection, ConnectionId, ConnectionManager, ConnectionState, StateWatch};
pub use state::{ChatEntry, ChatHistory, Origin};
pub use transport::{Connector, Inbound, Link, WebSocketConnector};
