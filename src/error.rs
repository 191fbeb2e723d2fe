//! Error types for entry transformation.
//!
//! Core operations return a [`Result<T>`], an alias for `Result<T, TransformError>`.
//! Operations that run user hooks ([`handle_entry`], [`handle_end`], [`drive`]) return
//! [`anyhow::Result`] instead, so that whatever a hook raised reaches the caller untouched;
//! core failures on those paths can still be recovered with `downcast_ref::<TransformError>()`.
//!
//! # Error Categories
//!
//! - **Lifecycle misuse**: [`UnboundSink`], [`AlreadyBound`], [`HookNotImplemented`],
//!   [`AlreadyEnded`]
//! - **Sink state**: [`SinkClosed`], [`Aborted`]
//! - **Content draining**: [`StreamRead`], [`Decode`]
//! - **Archive framing**: [`Header`], [`SizeMismatch`], [`BadChecksum`], [`MalformedPax`],
//!   [`UnexpectedEof`], [`Io`]
//!
//! [`handle_entry`]: crate::TarEntryTransformer::handle_entry
//! [`handle_end`]: crate::TarEntryTransformer::handle_end
//! [`drive`]: crate::driver::drive
//! [`UnboundSink`]: TransformError::UnboundSink
//! [`AlreadyBound`]: TransformError::AlreadyBound
//! [`HookNotImplemented`]: TransformError::HookNotImplemented
//! [`AlreadyEnded`]: TransformError::AlreadyEnded
//! [`SinkClosed`]: TransformError::SinkClosed
//! [`Aborted`]: TransformError::Aborted
//! [`StreamRead`]: TransformError::StreamRead
//! [`Decode`]: TransformError::Decode
//! [`Header`]: TransformError::Header
//! [`SizeMismatch`]: TransformError::SizeMismatch
//! [`BadChecksum`]: TransformError::BadChecksum
//! [`MalformedPax`]: TransformError::MalformedPax
//! [`UnexpectedEof`]: TransformError::UnexpectedEof
//! [`Io`]: TransformError::Io

use crate::content::Encoding;

/// Result type alias for operations that may return a TransformError.
pub type Result<T> = std::result::Result<T, TransformError>;

/// Error types for entry transformation.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// The sink was accessed before one was bound to the transformer.
    #[error("no sink bound to transformer")]
    UnboundSink,

    /// A second sink was bound to a transformer that already has one.
    #[error("transformer is already bound to a sink")]
    AlreadyBound,

    /// An entry was handled but no per-entry hook was configured.
    #[error("per-entry hook not implemented")]
    HookNotImplemented,

    /// The transformer was driven after its end-of-stream hook already ran.
    #[error("transformer has already ended")]
    AlreadyEnded,

    /// An entry was pushed into a sink that was finished, aborted, or whose reader went away.
    #[error("sink is closed")]
    SinkClosed,

    /// The producing side of a sink terminated the stream with an error.
    #[error("stream aborted: {0}")]
    Aborted(String),

    /// Reading an entry's content stream failed.
    #[error("failed to read entry content: {0}")]
    StreamRead(#[source] std::io::Error),

    /// Entry content is not valid in the requested encoding.
    #[error("content is not valid {encoding}: {reason}")]
    Decode {
        /// The encoding that was requested.
        encoding: Encoding,
        /// What made the content invalid.
        reason: String,
    },

    /// A header field could not be set.
    #[error("invalid header field: {0}")]
    Header(#[source] std::io::Error),

    /// Content length disagrees with the size recorded in the header.
    #[error("{path}: header declares {expected} bytes but content has {actual}")]
    SizeMismatch {
        /// Path of the offending entry.
        path: String,
        /// Size recorded in the header.
        expected: u64,
        /// Bytes actually found in the content stream.
        actual: u64,
    },

    /// A header's stored checksum doesn't match its contents.
    #[error("header checksum mismatch: stored {stored}, computed {computed}")]
    BadChecksum {
        /// Checksum recorded in the header.
        stored: u32,
        /// Checksum of the header bytes.
        computed: u32,
    },

    /// A PAX extended header record could not be parsed.
    #[error("malformed PAX extension record")]
    MalformedPax,

    /// The archive ended in the middle of a header or entry content.
    #[error("unexpected end of archive")]
    UnexpectedEof,

    /// I/O error on the archive stream itself.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
