use serde::Serialize;
use std::{fmt, string::FromUtf8Error};
use strum_macros::{Display, EnumIter, EnumString};

/// the kind of an invocation failure.
///
/// Kinds are stable: they are what callers match on and what the caller-facing
/// error object reports. Only `NativeProtocolFailure` is recoverable.
#[derive(Debug, Copy, Clone, Display, PartialEq, Eq, Hash, EnumIter, EnumString, Serialize)]
pub enum ErrorKind {
    ConfigurationError,
    ServiceNotFoundError,
    RegistryUnavailableError,
    TypeSignatureError,
    ParameterCountMismatch,
    TypeMismatchError,
    NativeProtocolFailure,
    FallbackFailure,
    RemoteServiceException,
    TimeoutError,
}

impl ErrorKind {
    /// whether an invoker tier failing with this kind hands over to the next tier.
    pub fn is_recoverable(self) -> bool {
        self == ErrorKind::NativeProtocolFailure
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, error: E) -> Error
    where
        E: fmt::Display,
    {
        Error {
            kind,
            message: error.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// the caller-facing `{kind, message}` rendering.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind,
            message: self.message.clone(),
        }
    }
}

/// Failures of the byte stream itself are native protocol failures; a
/// connection reset mid-frame is never retried on the same tier.
impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::new(ErrorKind::NativeProtocolFailure, err)
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Self {
        Error::new(ErrorKind::NativeProtocolFailure, err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::new(ErrorKind::TypeMismatchError, err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

pub type Result<T> = std::result::Result<T, Error>;
