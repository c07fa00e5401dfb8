//! Error kinds surfaced to the embedding script runtime.
//!
//! Every fallible native operation reports one of a small set of kinds; the
//! embedding turns them into script error objects. Callbacks that fault are
//! logged and dispatch continues (the reactor never unwinds into the kernel
//! wait), so the kinds here cover everything a script can observe.

use std::io;
use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// An error reported by a native operation.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Allocation failure or an explicit allocation limit was hit.
    #[error("out of memory")]
    OutOfMemory,

    /// An index or length check failed.
    #[error("out of bounds: {0}")]
    OutOfBounds(&'static str),

    /// Handle-type mismatch, closed handle, or an operation already in flight.
    #[error("invalid access: {0}")]
    InvalidAccess(String),

    /// An OS-reported socket or file error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed ordered-serialization input or an invalid DEFLATE stream.
    #[error("bad format: {0}")]
    BadFormat(&'static str),

    /// The ordered serializer hit its recursion depth limit.
    #[error("maximum recursion depth reached")]
    RecursionLimit,

    /// The ordered serializer encountered an opaque handle reference.
    #[error("unserializable reference")]
    UnserializableRef,

    /// The platform cannot provide the requested feature.
    #[error("not supported: {0}")]
    NotSupported(&'static str),

    /// A caller-supplied argument failed validation.
    #[error("{0}")]
    InvalidArgument(String),
}

impl RuntimeError {
    /// Shorthand for an [`RuntimeError::InvalidAccess`] with a formatted message.
    pub fn invalid_access(msg: impl Into<String>) -> Self {
        Self::InvalidAccess(msg.into())
    }

    /// Shorthand for an [`RuntimeError::InvalidArgument`] with a formatted message.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}
