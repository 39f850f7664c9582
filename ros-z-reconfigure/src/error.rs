use thiserror::Error;

use crate::names::NameError;
use crate::value::ParamType;

/// Errors raised by the reconfiguration core.
///
/// Schema and caller-contract violations (`UnknownParameter`,
/// `TypeMismatch`, `CallbackContractViolation`) go straight back to the
/// caller. Transport and persistence failures are reported with their
/// textual cause and never corrupt the in-memory configuration.
#[derive(Debug, Error)]
pub enum ReconfigureError {
    #[error("transport is not connected")]
    NotConnected,

    #[error("parameter '{name}' not found")]
    UnknownParameter { name: String },

    #[error("parameter '{name}': expected {expected} value, got {found}")]
    TypeMismatch {
        name: String,
        expected: ParamType,
        found: ParamType,
    },

    #[error("reconfigure callback must return a possibly updated configuration")]
    CallbackContractViolation,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid name: {0}")]
    InvalidName(#[from] NameError),

    #[error("endpoint already closed")]
    Closed,
}

impl ReconfigureError {
    pub(crate) fn unknown(name: impl Into<String>) -> Self {
        Self::UnknownParameter { name: name.into() }
    }

    pub(crate) fn mismatch(name: impl Into<String>, expected: ParamType, found: ParamType) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
            found,
        }
    }

    pub(crate) fn transport(e: impl std::fmt::Display) -> Self {
        Self::Transport(e.to_string())
    }

    pub(crate) fn persistence(e: impl std::fmt::Display) -> Self {
        Self::Persistence(e.to_string())
    }

    /// Whether the error is a caller bug rather than an environmental failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::UnknownParameter { .. } | Self::TypeMismatch { .. } | Self::CallbackContractViolation
        )
    }
}

pub type Result<T> = std::result::Result<T, ReconfigureError>;
