use thiserror::Error;

use shadelink_proto::ProtoError;

/// User-facing error type for the domain layer.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Required configuration is missing or unusable. Fatal at
    /// construction; retrying without fixing the config cannot help.
    #[error("configuration error: {0}")]
    Config(String),

    /// Failure in the underlying protocol client.
    #[error(transparent)]
    Proto(#[from] ProtoError),
}

impl BridgeError {
    /// Returns `true` if the error is transient and the operation is
    /// worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Proto(e) => e.is_transient(),
        }
    }
}
