use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::controller::channel_sample::{ChannelSample, Telemetry, MIN_CHANNELS};
use crate::controller::classifier::{classify_stick, KeyCode, Stick};
use crate::controller::edge_detector::{AuxChannel, ButtonPressed, EdgeDetector, Side};

// Decoded, de-duplicated event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscreteEvent {
    DirectionalKey(KeyCode),
    ButtonPressed(Side),
}

impl DiscreteEvent {
    // Key the host dispatches for this event
    pub fn key_code(&self) -> KeyCode {
        match self {
            DiscreteEvent::DirectionalKey(code) => *code,
            DiscreteEvent::ButtonPressed(Side::Left) => KeyCode::ButtonL2,
            DiscreteEvent::ButtonPressed(Side::Right) => KeyCode::ButtonR2,
        }
    }
}

// Output of one decode cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedFrame {
    pub events: Vec<DiscreteEvent>,
    pub telemetry: Telemetry,
    pub channels: Vec<i32>,
    pub timestamp: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Sample too short: {len} channels, need at least {}", MIN_CHANNELS)]
    TooShort { len: usize },
}

#[derive(Debug, Clone, Default)]
pub struct InputDecoder {
    edges: EdgeDetector,
}

impl InputDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes one sample into its ordered events.
    ///
    /// Slot 1 holds the left stick key and slot 2 the right stick key. A left
    /// or right aux press replaces the key in its own slot, so at most two
    /// events are produced per cycle. Incomplete samples are rejected before any
    /// state is touched.
    pub fn decode(&mut self, sample: &ChannelSample) -> Result<DecodedFrame, DecodeError> {
        let telemetry =
            Telemetry::from_sample(sample).ok_or(DecodeError::TooShort { len: sample.len() })?;

        let left_key = classify_stick(telemetry.left_stick_x, telemetry.left_stick_y, Stick::Left)
            .map(|symbol| DiscreteEvent::DirectionalKey(symbol.key_code()));
        let right_key =
            classify_stick(telemetry.right_stick_x, telemetry.right_stick_y, Stick::Right)
                .map(|symbol| DiscreteEvent::DirectionalKey(symbol.key_code()));

        let left_press = self.button_slot(telemetry.left_aux, AuxChannel::LeftAux);
        let right_press = self.button_slot(telemetry.right_aux, AuxChannel::RightAux);

        let events: Vec<DiscreteEvent> = [left_press.or(left_key), right_press.or(right_key)]
            .into_iter()
            .flatten()
            .collect();

        if !events.is_empty() {
            debug!("Decoded {} events: {:?}", events.len(), events);
        }

        Ok(DecodedFrame {
            events,
            telemetry,
            channels: sample.channels().to_vec(),
            timestamp: Local::now(),
        })
    }

    fn button_slot(&mut self, value: i32, channel: AuxChannel) -> Option<DiscreteEvent> {
        self.edges.observe(value, channel).map(|ButtonPressed(side)| {
            info!(
                "{:?} button pressed, dispatching {:?}",
                side,
                DiscreteEvent::ButtonPressed(side).key_code()
            );
            DiscreteEvent::ButtonPressed(side)
        })
    }

    pub fn last_aux(&self, channel: AuxChannel) -> i32 {
        self.edges.last_seen(channel)
    }

    pub fn reset(&mut self) {
        self.edges.reset();
    }
}
