use thiserror::Error;

/// Synchronous failures returned by outbound command methods.
///
/// Connection-level trouble never surfaces here; it only shows up as a
/// connection-status transition on the event bus.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("no conversation selected")]
    NoActiveConversation,
    #[error("channel is not open and authenticated")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint url: {0}")]
    InvalidEndpoint(String),
    #[error("failed to connect: {0}")]
    Connect(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("credential provider returned no token")]
    Unauthenticated,
    #[error("bootstrap fetch failed: {0}")]
    Bootstrap(anyhow::Error),
}
