//! Manifest error taxonomy.

use thiserror::Error;

use crate::acl::decision::AuthError;

/// Default ensure failure message.
pub const DEFAULT_ENSURE_ERROR: &str = "An unknown request error has occurred";

/// Default ensure failure status code.
pub const DEFAULT_ENSURE_CODE: u16 = 400;

/// Errors raised while compiling or executing a manifest.
///
/// Every variant is terminal for the current request.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ManifestError {
    /// The manifest structure is malformed.
    #[error("manifest compile error: {0}")]
    Compile(String),

    /// A `#key` or capability path could not be resolved.
    #[error("unresolved reference: {0}")]
    Reference(String),

    /// A reference walked into request data the client did not supply.
    #[error("unresolved request data: {0}")]
    RequestData(String),

    /// Request parameters did not match the declared parameter set.
    #[error("{0}")]
    Request(String),

    /// A call result failed its `ensure` predicate.
    #[error("{message}")]
    Ensure {
        /// Client-facing message.
        message: String,
        /// Status code configured on the predicate.
        code: u16,
    },

    /// A capability raised an error while running.
    #[error("capability {path} failed: {source}")]
    Capability {
        /// Capability path that was invoked.
        path: String,
        /// Underlying failure.
        #[source]
        source: anyhow::Error,
    },

    /// The response could not be converted to JSON.
    #[error("failed to serialize response: {0}")]
    Serialize(String),
}

impl ManifestError {
    /// Numeric status code surfaced to the caller.
    ///
    /// Authorization failures raised inside a capability keep their own code.
    pub fn status(&self) -> u16 {
        match self {
            Self::Compile(_) | Self::RequestData(_) | Self::Request(_) => 400,
            Self::Ensure { code, .. } => *code,
            Self::Capability { source, .. } => {
                source.downcast_ref::<AuthError>().map_or(500, AuthError::status)
            }
            Self::Reference(_) | Self::Serialize(_) => 500,
        }
    }

    /// The authorization failure behind a capability error, if any.
    pub fn auth_error(&self) -> Option<&AuthError> {
        match self {
            Self::Capability { source, .. } => source.downcast_ref::<AuthError>(),
            _ => None,
        }
    }

    pub(crate) fn compile(msg: impl Into<String>) -> Self {
        Self::Compile(msg.into())
    }

    pub(crate) fn reference(msg: impl Into<String>) -> Self {
        Self::Reference(msg.into())
    }
}
