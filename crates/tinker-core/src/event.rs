use serde::Deserialize;

use crate::error::ConnectionError;

/// A reply from the remote device: `{"message": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IncomingEvent {
    pub message: String,
}

impl IncomingEvent {
    /// Parse one text frame. Unknown fields are ignored; anything without a
    /// string `message` is rejected.
    pub fn parse(frame: &str) -> Result<Self, ConnectionError> {
        serde_json::from_str(frame).map_err(|e| ConnectionError::MalformedIncoming(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message() {
        let event = IncomingEvent::parse(r#"{"message":"hello"}"#).unwrap();
        assert_eq!(event.message, "hello");
    }

    #[test]
    fn test_parse_ignores_extra_fields() {
        let event = IncomingEvent::parse(r#"{"message":"done","status":"ok","step":3}"#).unwrap();
        assert_eq!(event.message, "done");
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = IncomingEvent::parse("not json").unwrap_err();
        assert!(matches!(err, ConnectionError::MalformedIncoming(_)));
    }

    #[test]
    fn test_parse_rejects_missing_message() {
        assert!(IncomingEvent::parse(r#"{"status":"ok"}"#).is_err());
    }

    #[test]
    fn test_parse_rejects_non_string_message() {
        assert!(IncomingEvent::parse(r#"{"message":42}"#).is_err());
    }
}
