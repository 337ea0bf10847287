use std::time::Duration;

/// Failures surfaced by the connection layer.
///
/// None of these tear down the caller: dial failures and timeouts leave the
/// manager CLOSED (the next send dials again), malformed frames are dropped
/// by the pump.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connection did not open within {0:?}")]
    OpenTimeout(Duration),
    #[error("connection closed before the frame was written")]
    SendOnClosedChannel,
    #[error("malformed incoming frame: {0}")]
    MalformedIncoming(String),
    #[error("failed to encode envelope: {0}")]
    Encode(String),
}

impl ConnectionError {
    /// Whether the error came from establishing the connection (as opposed
    /// to a single frame).
    pub fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect(_) | Self::OpenTimeout(_))
    }
}
