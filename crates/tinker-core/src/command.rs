//! Commands sent to the remote device and their wire envelope.
//!
//! Every command serializes to `{"command": ..., "params": {...}}`, with
//! `params` and its optional fields omitted when absent.

use serde::Serialize;

use crate::error::ConnectionError;

/// Workflow that runs every block on the device.
pub const FULL_WORKFLOW: &str = "full";
/// Workflow that answers free-text chat messages.
pub const ASSISTANT_WORKFLOW: &str = "assistant";

/// A command issued by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutgoingCommand {
    Run { workflow: String, use_hardware: bool },
    Stop,
    /// Free text for the assistant workflow.
    UserMessage { text: String },
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum CommandName {
    Run,
    Stop,
}

#[derive(Serialize)]
struct Envelope<'a> {
    command: CommandName,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Params<'a>>,
}

#[derive(Serialize)]
struct Params<'a> {
    workflow: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_hardware: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'a str>,
}

impl OutgoingCommand {
    /// The "Run" button: full workflow on real hardware.
    pub fn run_all() -> Self {
        Self::Run {
            workflow: FULL_WORKFLOW.to_string(),
            use_hardware: true,
        }
    }

    pub fn stop() -> Self {
        Self::Stop
    }

    pub fn user_message(text: impl Into<String>) -> Self {
        Self::UserMessage { text: text.into() }
    }

    fn envelope(&self) -> Envelope<'_> {
        match self {
            Self::Run { workflow, use_hardware } => Envelope {
                command: CommandName::Run,
                params: Some(Params {
                    workflow,
                    use_hardware: Some(*use_hardware),
                    message: None,
                }),
            },
            Self::Stop => Envelope {
                command: CommandName::Stop,
                params: None,
            },
            Self::UserMessage { text } => Envelope {
                command: CommandName::Run,
                params: Some(Params {
                    workflow: ASSISTANT_WORKFLOW,
                    use_hardware: None,
                    message: Some(text),
                }),
            },
        }
    }

    /// Serialize to the JSON text frame written on the channel.
    pub fn to_wire(&self) -> Result<String, ConnectionError> {
        serde_json::to_string(&self.envelope()).map_err(|e| ConnectionError::Encode(e.to_string()))
    }

    /// Text of the local echo shown in the history once the command is sent.
    pub fn description(&self) -> String {
        match self {
            Self::Run { .. } => "Sent run command".to_string(),
            Self::Stop => "Sent stop command".to_string(),
            Self::UserMessage { text } => text.clone(),
        }
    }
}
