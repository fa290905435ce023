use thiserror::Error;

use crate::runtime::registry::{Handle, ResourceKind};

/// Every failure the bridge reports. Nothing here is fatal to the bridge:
/// errors are returned to the caller (or logged on the producer side) and the
/// remaining resources keep working.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum BridgeError {
    #[error("{kind} handle {handle} not found")]
    NotFound { kind: ResourceKind, handle: Handle },

    #[error("{kind} index {index} out of range (have {available})")]
    InvalidIndex {
        kind: ResourceKind,
        index: usize,
        available: usize,
    },

    #[error("{0} is not connected")]
    NotConnected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("notification failed: {0}")]
    NotificationFailure(String),

    #[error("{kind} handle {handle} is already in use")]
    HandleInUse { kind: ResourceKind, handle: Handle },

    #[error("config error: {0}")]
    Config(String),

    #[error("invalid subject {0:?}")]
    InvalidSubject(String),
}

impl BridgeError {
    /// Stable negative code for consumers that speak integers only.
    pub fn code(&self) -> i32 {
        match self {
            BridgeError::NotFound { .. } => -1,
            BridgeError::InvalidIndex { .. } => -2,
            BridgeError::NotConnected(_) => -3,
            BridgeError::Transport(_) => -4,
            BridgeError::NotificationFailure(_) => -5,
            BridgeError::HandleInUse { .. } => -6,
            BridgeError::Config(_) => -7,
            BridgeError::InvalidSubject(_) => -8,
        }
    }

    pub fn transport(err: impl std::fmt::Display) -> Self {
        BridgeError::Transport(err.to_string())
    }
}

pub type BridgeResult<T> = Result<T, BridgeError>;

/// Folds a dispatcher result into the integer convention: the success value
/// (clamped to `i32::MAX`) or the error's negative code.
pub fn status<T: StatusValue>(result: &BridgeResult<T>) -> i32 {
    match result {
        Ok(value) => value.status_value(),
        Err(err) => err.code(),
    }
}

pub trait StatusValue {
    fn status_value(&self) -> i32;
}

impl StatusValue for () {
    fn status_value(&self) -> i32 {
        0
    }
}

impl StatusValue for usize {
    fn status_value(&self) -> i32 {
        i32::try_from(*self).unwrap_or(i32::MAX)
    }
}

impl StatusValue for Handle {
    fn status_value(&self) -> i32 {
        i32::try_from(*self).unwrap_or(i32::MAX)
    }
}
