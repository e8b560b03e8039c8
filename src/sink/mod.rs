//! Event sink collaborator interface
//!
//! A sink receives one [`DecodedFrame`] per decode cycle, in cycle order. The
//! sampling loop awaits each delivery before processing the next sample.

pub mod bridge;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::controller::input_decoder::DecodedFrame;

pub use bridge::{BridgeMessage, BridgeSink, ButtonTally, KeyAction};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Sink closed: {0}")]
    Closed(String),

    #[error("Delivery failed: {0}")]
    DeliveryFailed(String),
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn deliver(&self, frame: DecodedFrame) -> Result<(), SinkError>;
}

#[async_trait]
impl EventSink for mpsc::Sender<DecodedFrame> {
    async fn deliver(&self, frame: DecodedFrame) -> Result<(), SinkError> {
        self.send(frame)
            .await
            .map_err(|e| SinkError::Closed(e.to_string()))
    }
}
