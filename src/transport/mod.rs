//! Transport collaborator interface
//!
//! The transport establishes the physical link to the transmitter and yields
//! raw channel arrays. The controller core only talks to it through the
//! [`Transport`] trait; lifecycle callbacks raised by the transport are handed
//! to the controller as [`TransportEvent`]s so they are applied on the
//! controller's own task.

pub mod replay;

use async_trait::async_trait;

use crate::controller::channel_sample::ChannelSample;

pub use replay::ReplayTransport;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("Transmitter unreachable: {0}")]
    Unreachable(String),

    #[error("Connect rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    #[error("Not connected")]
    NotConnected,

    #[error("No sample available: {0}")]
    Unavailable(String),

    #[error("Fetch failed: {0}")]
    Failed(String),
}

// Lifecycle callbacks raised by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    ConnectFailed(ConnectError),
    Disconnected,
}

/// Link to the transmitter.
///
/// Implementations must be `Send + Sync` so one instance can be shared between
/// the controller task and the sampling task.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the link to the transmitter.
    async fn connect(&self) -> Result<(), ConnectError>;

    /// Tear the link down. Safe to call when not connected.
    async fn disconnect(&self);

    /// Request one snapshot of the current channel values.
    async fn fetch_sample(&self) -> Result<ChannelSample, FetchError>;
}
