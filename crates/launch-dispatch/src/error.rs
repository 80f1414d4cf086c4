use std::any::Any;
use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Enumerates why a cross-thread invocation was refused.
pub enum InvalidHandlerReason {
    NotRegistered,
    Unregistered,
    ArgumentTypeMismatch,
    ReturnTypeMismatch,
    Reentrant,
}

impl InvalidHandlerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotRegistered => "no handler registered under this name",
            Self::Unregistered => "handler registration was dropped",
            Self::ArgumentTypeMismatch => "argument type does not match the registration",
            Self::ReturnTypeMismatch => "return type does not match the registration",
            Self::Reentrant => "handler is already running",
        }
    }
}

impl fmt::Display for InvalidHandlerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates supported `DispatchError` values.
pub enum DispatchError {
    #[error("handler '{handler}' on '{target}' cannot be invoked: {reason}")]
    InvalidHandler {
        target: String,
        handler: String,
        reason: InvalidHandlerReason,
    },
    #[error("handler '{handler}' is already registered on '{target}'")]
    DuplicateHandler { target: String, handler: String },
    #[error("main-thread dispatcher has shut down")]
    Closed,
    #[error("main-thread work panicked: {0}")]
    WorkPanicked(String),
    #[error("main-thread work was dropped before it completed")]
    Cancelled,
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_string();
    }
    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }
    "non-string panic payload".to_string()
}
