//! Translation of decoded frames into host bridge messages
//!
//! The host application consumes key strokes (a down/up pair per key), button
//! notifications and the raw channel list. [`BridgeSink`] produces those
//! messages in the order the host expects and forwards them over an mpsc
//! channel; the actual cross-process delivery is left to the receiver.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::controller::classifier::KeyCode;
use crate::controller::edge_detector::Side;
use crate::controller::input_decoder::{DecodedFrame, DiscreteEvent};
use crate::sink::{EventSink, SinkError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeMessage {
    KeyStroke { code: KeyCode, action: KeyAction },
    LeftButtonPressed,
    RightButtonPressed,
    KeyChannels(Vec<i32>),
}

impl BridgeMessage {
    // Method name on the host side
    pub fn method_name(&self) -> &'static str {
        match self {
            BridgeMessage::KeyStroke { .. } => "dispatchKeyEvent",
            BridgeMessage::LeftButtonPressed => "onLeftButtonPressed",
            BridgeMessage::RightButtonPressed => "onRightButtonPressed",
            BridgeMessage::KeyChannels(_) => "onRcKeyChannels",
        }
    }
}

// Running count of button presses per side
#[derive(Debug, Default)]
pub struct ButtonTally {
    left: AtomicU64,
    right: AtomicU64,
}

impl ButtonTally {
    fn record(&self, side: Side) -> u64 {
        let counter = match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        };
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn get(&self, side: Side) -> u64 {
        match side {
            Side::Left => self.left.load(Ordering::Relaxed),
            Side::Right => self.right.load(Ordering::Relaxed),
        }
    }
}

/// Expands a frame into the ordered host messages.
pub fn bridge_messages(frame: &DecodedFrame) -> Vec<BridgeMessage> {
    let mut messages = Vec::with_capacity(frame.events.len() * 3 + 1);

    for event in &frame.events {
        match event {
            DiscreteEvent::ButtonPressed(Side::Left) => {
                messages.push(BridgeMessage::LeftButtonPressed)
            }
            DiscreteEvent::ButtonPressed(Side::Right) => {
                messages.push(BridgeMessage::RightButtonPressed)
            }
            DiscreteEvent::DirectionalKey(_) => {}
        }

        let code = event.key_code();
        messages.push(BridgeMessage::KeyStroke {
            code,
            action: KeyAction::Down,
        });
        messages.push(BridgeMessage::KeyStroke {
            code,
            action: KeyAction::Up,
        });
    }

    messages.push(BridgeMessage::KeyChannels(frame.channels.clone()));
    messages
}

pub struct BridgeSink {
    sender: mpsc::Sender<BridgeMessage>,
    tally: ButtonTally,
}

impl BridgeSink {
    pub fn new(sender: mpsc::Sender<BridgeMessage>) -> Self {
        Self {
            sender,
            tally: ButtonTally::default(),
        }
    }

    pub fn tally(&self) -> &ButtonTally {
        &self.tally
    }
}

#[async_trait]
impl EventSink for BridgeSink {
    async fn deliver(&self, frame: DecodedFrame) -> Result<(), SinkError> {
        for event in &frame.events {
            if let DiscreteEvent::ButtonPressed(side) = event {
                let total = self.tally.record(*side);
                info!("{:?} button pressed, total: {}", side, total);
            }
        }

        let messages = bridge_messages(&frame);
        debug!(
            "Forwarding {} bridge messages for frame at {}",
            messages.len(),
            frame.timestamp.format("%H:%M:%S.%3f")
        );

        for message in messages {
            self.sender
                .send(message)
                .await
                .map_err(|e| SinkError::Closed(e.to_string()))?;
        }
        Ok(())
    }
}
