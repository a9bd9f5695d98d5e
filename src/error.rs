//! The crate-wide error type.
//!
//! Errors are `Clone` so that the [crate::CachedReader] can remember a failed
//! read and replay the original error on later lookups without redoing any
//! I/O.  For the same reason the reader-facing variants carry rendered
//! `String` reasons rather than source errors.
use crate::object::TypeId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// A type id or type name was looked up in the registry but nothing was
    /// registered under it.  Never retried; callers must register the type
    /// before loading data that mentions it.
    #[error("\"{0}\" is not a registered object type")]
    TypeNotRegistered(String),

    /// Stored data was written by a newer version of a type than the running
    /// code understands.  This is a genuine incompatibility and must
    /// propagate; it is never a transient condition.
    #[error("{type_name}: stored ioVersion {stored} is newer than supported version {supported}")]
    FormatTooNew {
        type_name: String,
        stored: u32,
        supported: u32,
    },

    /// A container entry was missing or of the wrong kind during load.
    #[error("container error: {0}")]
    Container(String),

    /// No file matched the path on the configured search path.
    #[error("\"{path}\" not found on the search path")]
    FileNotFound { path: String },

    /// The reader factory had no reader for the resolved file.
    #[error("no reader available for \"{path}\"")]
    NoReaderAvailable { path: String },

    /// The external reader failed while decoding the file.
    #[error("failed to decode \"{path}\": {reason}")]
    DecodeFailed { path: String, reason: String },

    /// The configured post-processing step rejected the decoded object.
    #[error("post-processing failed for \"{path}\": {reason}")]
    PostProcessFailed { path: String, reason: String },
}

impl Error {
    pub(crate) fn type_id_not_registered(id: TypeId) -> Error {
        Error::TypeNotRegistered(format!("{}", id))
    }

    pub(crate) fn missing_entry(name: &str) -> Error {
        Error::Container(format!("missing entry \"{}\"", name))
    }

    pub(crate) fn wrong_entry_kind(name: &str, expected: &str, found: &str) -> Error {
        Error::Container(format!(
            "entry \"{}\" holds a {} where a {} was expected",
            name, found, expected
        ))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
