use crate::protocol::ChannelMethod;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ResolverError {
    #[error("Server reported failure: {0}")]
    Server(String),

    #[error("Connection not restored after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("Action cancelled by user")]
    UserCancelled,

    #[error("User requested a different verification channel")]
    ChannelSwitchRequested { requested: Option<ChannelMethod> },

    #[error("Device request declined: {0}")]
    UserDeclinedDeviceRequest(String),

    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        action: Option<String>,
        device: Option<String>,
    },

    #[error("Resolver session cancelled")]
    Cancelled,

    #[error("Invalid resolver state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResolverError {
    /// Protocol error without device context.
    pub fn protocol(message: impl Into<String>) -> Self {
        ResolverError::Protocol {
            message: message.into(),
            action: None,
            device: None,
        }
    }

    /// Protocol error tagged with the hardware action and device it came from.
    pub fn device_protocol(
        message: impl Into<String>,
        action: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        ResolverError::Protocol {
            message: message.into(),
            action: Some(action.into()),
            device: Some(device.into()),
        }
    }

    /// Whether the error ends the engine session.
    ///
    /// A declined device request only aborts the current device exchange; the
    /// caller may resume the same session afterwards.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ResolverError::UserDeclinedDeviceRequest(_))
    }

    /// Errors caused by an explicit human decision rather than a fault.
    pub fn is_user_initiated(&self) -> bool {
        matches!(
            self,
            ResolverError::UserCancelled
                | ResolverError::ChannelSwitchRequested { .. }
                | ResolverError::UserDeclinedDeviceRequest(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ResolverError>;
