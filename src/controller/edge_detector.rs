use serde::{Deserialize, Serialize};
use tracing::debug;

// Fully deflected aux readings used as click encodings
pub const AUX_CLICK_VALUES: [i32; 2] = [1050, 1950];

// Monitored aux channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuxChannel {
    LeftAux,
    RightAux,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Left,
    Right,
}

impl From<AuxChannel> for Side {
    fn from(channel: AuxChannel) -> Self {
        match channel {
            AuxChannel::LeftAux => Side::Left,
            AuxChannel::RightAux => Side::Right,
        }
    }
}

// Emitted on entry into a click value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ButtonPressed(pub Side);

// Last seen raw value per aux channel
#[derive(Debug, Clone, Default)]
struct EdgeState {
    last_left_aux: i32,
    last_right_aux: i32,
}

#[derive(Debug, Clone, Default)]
pub struct EdgeDetector {
    state: EdgeState,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `value` for `channel` and reports a press when the value changed
    /// into one of the click encodings. The stored value is updated on every
    /// call, whether or not a press is reported.
    pub fn observe(&mut self, value: i32, channel: AuxChannel) -> Option<ButtonPressed> {
        let last = match channel {
            AuxChannel::LeftAux => &mut self.state.last_left_aux,
            AuxChannel::RightAux => &mut self.state.last_right_aux,
        };

        let previous = std::mem::replace(last, value);
        if previous == value {
            return None;
        }

        debug!("{:?} changed: {} -> {}", channel, previous, value);
        if AUX_CLICK_VALUES.contains(&value) {
            Some(ButtonPressed(channel.into()))
        } else {
            None
        }
    }

    pub fn last_seen(&self, channel: AuxChannel) -> i32 {
        match channel {
            AuxChannel::LeftAux => self.state.last_left_aux,
            AuxChannel::RightAux => self.state.last_right_aux,
        }
    }

    pub fn reset(&mut self) {
        self.state = EdgeState::default();
    }
}
