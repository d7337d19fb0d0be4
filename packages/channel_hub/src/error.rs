//! Error types for the dispatcher core.

/// Errors surfaced by the dispatcher core.
///
/// None of these reach the code that calls `broadcast`: resolution and
/// delivery faults are logged inside the dispatcher loop. The only error a
/// handle method returns is [`HubError::DispatcherStopped`].
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// The dispatcher loop has exited and no longer accepts commands.
    #[error("dispatcher is not running")]
    DispatcherStopped,

    #[error("unsupported payload kind: {kind}")]
    UnsupportedKind { kind: String },

    #[error("payload does not match kind '{kind}': {reason}")]
    InvalidPayload { kind: String, reason: String },

    #[error("failed to render frame: {0}")]
    Render(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Transport(String),
}
