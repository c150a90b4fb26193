use thiserror::Error;

/// Top-level error type for the `shadelink-proto` crate.
///
/// Covers every failure mode of the UDP client: socket I/O, request
/// timeouts, hub rejections, protocol violations, and write
/// preconditions. `shadelink-core` maps these into user-facing
/// diagnostics.
#[derive(Debug, Error)]
pub enum ProtoError {
    // ── Transport ───────────────────────────────────────────────────
    /// Socket-level I/O failure (bind, join, send, receive).
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// No response after the full retry schedule.
    #[error("request [{msg_type}] timed out after {retries} retries")]
    Timeout { msg_type: String, retries: u32 },

    /// Operation attempted before `start()` or after teardown.
    #[error("not connected")]
    NotConnected,

    /// The connection was torn down while a response was pending.
    #[error("connection lost while awaiting [{msg_type}]")]
    ConnectionLost { msg_type: String },

    /// The client was closed.
    #[error("client closed")]
    Closed,

    // ── Protocol ────────────────────────────────────────────────────
    /// The hub reports an incompatible protocol version. Fatal, no retry.
    #[error("protocol version mismatch: hub reports {actual}, expected {expected}")]
    VersionMismatch { expected: String, actual: String },

    /// The hub answered with a non-empty `actionResult`.
    #[error("hub rejected [{msg_type}]: {message}")]
    Rejected { msg_type: String, message: String },

    /// A response carried neither `data` nor an `actionResult`.
    #[error("failed to execute [{msg_type}]: empty response")]
    EmptyResponse { msg_type: String },

    /// An inbound payload could not be decoded. Non-fatal for
    /// notifications (logged and dropped), surfaced for responses.
    #[error("malformed message: {0}")]
    Malformed(String),

    // ── Requests ────────────────────────────────────────────────────
    /// A request with the same correlation handle is still in flight.
    #[error("request already in flight for [{handle}]")]
    RequestInFlight { handle: String },

    /// Write payload failed local validation, nothing was sent.
    #[error("invalid {field}: {value}")]
    Validation { field: &'static str, value: String },

    /// Write attempted before the hub issued a session token.
    #[error("missing session token (no device list fetched yet)")]
    MissingToken,

    /// The pre-shared key cannot be used as a cipher key.
    #[error("invalid pre-shared key: {0}")]
    Key(String),
}

impl ProtoError {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Socket(_) | Self::ConnectionLost { .. }
        )
    }

    /// Returns `true` if the error is fatal for the connection
    /// (reconnecting will not help).
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::VersionMismatch { .. } | Self::Key(_))
    }
}
