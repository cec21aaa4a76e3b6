//! Error types for the git-wire crate.
//!
//! This module defines a unified error enumeration used across pkt-line
//! framing, capability negotiation, reference advertisement, pack transfer,
//! transports and storage. It integrates with `thiserror` to provide rich
//! `Display` implementations and error source chaining where applicable.
//!
//! Notes:
//! - Variants that callers are expected to match on (for example
//!   [`GitError::NoChange`] or [`GitError::EmptyRemoteRepository`]) carry no
//!   payload and act as stable sentinels.
//! - Codec variants carry contextual details via their message payload.

use thiserror::Error;

#[derive(Error, Debug)]
/// Unified error enumeration for the git-wire library.
///
/// - Used across framing, negotiation, transports, pack transfer and storage.
/// - Implements `std::error::Error` via `thiserror`.
pub enum GitError {
    /// Pkt-line header that is neither a legal length nor a reserved sentinel.
    #[error("invalid pkt-line length header `{0}`")]
    InvalidPktLen(String),

    /// Pkt-line payload larger than the wire format permits.
    #[error("pkt-line payload of {0} bytes exceeds the maximum of 65520")]
    PayloadTooLong(usize),

    /// A capability that takes no argument received one, or an empty argument
    /// was supplied where a value is mandatory.
    #[error("capability `{0}` does not accept the supplied argument")]
    CapabilityArguments(String),

    /// A capability that requires an argument was added without one.
    #[error("capability `{0}` requires an argument")]
    CapabilityArgumentsRequired(String),

    /// A single-valued capability was added a second time.
    #[error("capability `{0}` accepts a single argument only")]
    CapabilityMultipleArguments(String),

    /// Sideband frame larger than the negotiated maximum.
    #[error("sideband frame of {0} bytes exceeds the negotiated maximum of {1}")]
    MaxPackedExceeded(usize, usize),

    /// Sideband channel outside the defined set {1, 2, 3}.
    #[error("unknown sideband channel {0}")]
    InvalidSidebandChannel(u8),

    /// The peer reported a fatal condition, either on sideband channel 3 or
    /// through an `ERR` advertisement line.
    #[error("remote error: {0}")]
    Remote(String),

    /// Malformed or unexpected content in a decoded protocol message.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A request violates the protocol preconditions (for example a fetch
    /// without wants or a push with duplicate reference names).
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The remote repository exists but advertises no references.
    #[error("remote repository is empty")]
    EmptyRemoteRepository,

    /// Successful termination of a fetch that has nothing to transfer.
    #[error("already up-to-date")]
    NoChange,

    /// The remote end does not know the requested repository.
    #[error("repository not found")]
    RepositoryNotFound,

    /// The peer demands credentials that were not supplied.
    #[error("authentication required")]
    AuthenticationRequired,

    /// Supplied credentials were rejected.
    #[error("authorization failed")]
    AuthorizationFailed,

    /// The authentication mechanism does not apply to this transport.
    #[error("invalid auth method")]
    InvalidAuthMethod,

    /// A second handshake was attempted on a live session.
    #[error("session already connected")]
    AlreadyConnected,

    /// The peer speaks a protocol version this crate does not implement.
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Service name outside `git-upload-pack`/`git-receive-pack`/`git-upload-archive`.
    #[error("unsupported service `{0}`")]
    UnsupportedService(String),

    /// No transport is registered for the endpoint scheme.
    #[error("unsupported URL scheme `{0}`")]
    UnsupportedScheme(String),

    /// An operation exceeded its deadline.
    #[error("timeout exceeded")]
    TimeoutExceeded,

    /// The storage backend cannot answer queries about packed objects.
    #[error("packed objects not supported")]
    PackedObjectsNotSupported,

    /// The in-flight operation was cancelled through its [`crate::transport::CancelFlag`].
    #[error("operation cancelled")]
    Cancelled,

    /// Malformed or unsupported pack file.
    #[error("the `{0}` is not a valid pack file")]
    InvalidPackFile(String),

    /// Invalid pack header magic or version.
    #[error("the `{0}` is not a valid pack header")]
    InvalidPackHeader(String),

    /// Delta object reconstruction error.
    #[error("delta object error: {0}")]
    DeltaObjectError(String),

    /// Invalid or unsupported git object type name.
    #[error("the `{0}` is not a valid git object type")]
    InvalidObjectType(String),

    /// Malformed commit object.
    #[error("invalid commit: {0}")]
    InvalidCommit(String),

    /// Malformed tree object.
    #[error("invalid tree: {0}")]
    InvalidTree(String),

    /// Malformed tag object.
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    /// Invalid hash formatting or value.
    #[error("the {0} is not a valid hash value")]
    InvalidHashValue(String),

    /// Object missing from storage, or present with a different type than the
    /// one requested.
    #[error("object not found: {0}")]
    ObjectNotFound(String),

    /// Reference missing from storage.
    #[error("reference not found: {0}")]
    ReferenceNotFound(String),

    /// Compare-and-swap on a reference observed a different current value.
    #[error("reference has changed concurrently")]
    ReferenceHasChanged,

    /// Resolving a symbolic reference followed a cycle.
    #[error("cycle in symbolic references at `{0}`")]
    SymrefCycle(String),

    /// Switching object formats on a store that already holds objects.
    #[error("object format is fixed once objects are stored")]
    ObjectFormatFixed,

    /// Malformed or unsupported git index file.
    #[error("the `{0}` is not a valid index file")]
    InvalidIndexFile(String),

    /// I/O error from an underlying reader, writer or filesystem.
    #[error("IO error: {0}")]
    IOError(#[from] std::io::Error),

    /// Generic custom error for miscellaneous failures.
    #[error("{0}")]
    CustomError(String),
}

impl GitError {
    /// True when the error is the benign end of the fetch short-circuit path.
    pub fn is_no_change(&self) -> bool {
        matches!(self, GitError::NoChange)
    }
}
