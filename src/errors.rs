//! Error kinds of the admission pipeline
//!
//! Each fallible per-request step has its own type so the dispatcher can
//! map it onto the right HTTP outcome: decode errors stay inside the
//! envelope, encode and write errors become `500`.

use thiserror::Error;

/// Failure to register a kind in the [`Scheme`](crate::scheme::Scheme)
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchemeError {
    #[error("invalid kind {kind:?} for apiVersion {api_version:?}: {reason}")]
    InvalidKind {
        api_version: String,
        kind: String,
        reason: &'static str,
    },
}

/// Failure to turn request bytes (or an embedded object) into typed values
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodeError {
    #[error("couldn't get version/kind; json parse error: {0}")]
    Syntax(#[source] serde_json::Error),
    #[error("Object 'Kind' is missing in '{0}'")]
    MissingKind(String),
    #[error("no kind {kind:?} is registered for version {api_version:?}")]
    Unregistered { api_version: String, kind: String },
    #[error("object is {found}, expected {expected}")]
    KindMismatch { expected: String, found: String },
    #[error("admission review does not contain a request")]
    MissingRequest,
    #[error("invalid {kind} object: {source}")]
    Object {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Failure to serialize an outbound envelope
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodeError {
    #[error("failed to serialize json patch: {0}")]
    Patch(#[source] serde_json::Error),
    #[error("failed to serialize admission review: {0}")]
    Review(#[source] serde_json::Error),
}

/// Failure to hand a response back to the client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteError {
    #[error("failed to build response: {0}")]
    Response(#[from] hyper::http::Error),
    #[error("connection failed: {0}")]
    Connection(#[from] hyper::Error),
}
