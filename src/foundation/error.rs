/// Convenience result type for construction, configuration and CLI surfaces.
pub type ScrubResult<T> = Result<T, ScrubError>;

/// Top-level error taxonomy for everything outside the per-frame resolution path.
///
/// Per-frame failures never surface as `ScrubError`; the resolver records them as
/// [`FrameError`] in its state instead.
#[derive(thiserror::Error, Debug)]
pub enum ScrubError {
    /// Invalid user-provided options or identifiers.
    #[error("validation error: {0}")]
    Validation(String),

    /// Errors when serializing or deserializing configuration.
    #[error("serialization error: {0}")]
    Serde(String),

    /// Keyed store failure outside the resolver (opening, direct writes).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Wrapped lower-level error from dependencies or IO.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ScrubError {
    /// Build a [`ScrubError::Validation`] value.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Build a [`ScrubError::Serde`] value.
    pub fn serde(msg: impl Into<String>) -> Self {
        Self::Serde(msg.into())
    }
}

/// Failure reported by a [`crate::KeyedStore`].
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// No bytes are stored under the key.
    #[error("key not found: {key}")]
    NotFound {
        /// Encoded store key that was looked up.
        key: String,
    },

    /// Store transport or availability failure.
    #[error("store io error: {0}")]
    Io(String),
}

impl StoreError {
    /// Build a [`StoreError::Io`] value.
    pub fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }
}

/// Failure reported by a [`crate::FrameDecoder`].
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
#[error("decode error: {0}")]
pub struct DecodeError(pub String);

impl DecodeError {
    /// Build a decode error from any message.
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Observer-visible reason a frame request ended in `Failed`.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
    /// The frame was never written to the store.
    #[error("frame not found in store")]
    NotFound,

    /// Bytes were present but could not be decoded.
    #[error("frame bytes could not be decoded: {0}")]
    Decode(String),

    /// The store was unavailable or the read timed out.
    #[error("frame store io error: {0}")]
    Io(String),
}

/// Discriminant of [`FrameError`] without payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FrameErrorKind {
    /// See [`FrameError::NotFound`].
    NotFound,
    /// See [`FrameError::Decode`].
    Decode,
    /// See [`FrameError::Io`].
    Io,
}

impl FrameError {
    /// Payload-free discriminant, convenient for matching in observers.
    pub fn kind(&self) -> FrameErrorKind {
        match self {
            Self::NotFound => FrameErrorKind::NotFound,
            Self::Decode(_) => FrameErrorKind::Decode,
            Self::Io(_) => FrameErrorKind::Io,
        }
    }
}

impl From<StoreError> for FrameError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound { .. } => Self::NotFound,
            StoreError::Io(msg) => Self::Io(msg),
        }
    }
}

impl From<DecodeError> for FrameError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e.0)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/error.rs"]
mod tests;
