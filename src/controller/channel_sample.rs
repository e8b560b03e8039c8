use serde::{Deserialize, Serialize};

// Minimum number of channels the transmitter must report for a decode
pub const MIN_CHANNELS: usize = 12;

/// Fixed channel layout reported by the transmitter
///
/// Discriminants are positions in the raw channel array. Positions 6 and 7
/// carry nothing the bridge uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelIndex {
    RightStickX = 0,
    LeftStickY = 1,
    RightStickY = 2,
    LeftStickX = 3,
    LeftTrigger = 4,
    RightTrigger = 5,
    LeftAuxButton = 8,
    RightAuxButton = 9,
    LeftWheel = 10,
    RightWheel = 11,
}

impl ChannelIndex {
    pub fn position(self) -> usize {
        self as usize
    }
}

/// One snapshot of raw channel readings
///
/// Samples are taken as reported and never modified. A sample shorter than
/// [`MIN_CHANNELS`] can still be stored and inspected but is rejected by the
/// decoder.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChannelSample {
    channels: Vec<i32>,
}

impl ChannelSample {
    pub fn new(channels: Vec<i32>) -> Self {
        Self { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    // A sample is decodable once every fixed index is present
    pub fn is_complete(&self) -> bool {
        self.channels.len() >= MIN_CHANNELS
    }

    pub fn get(&self, index: ChannelIndex) -> Option<i32> {
        self.channels.get(index.position()).copied()
    }

    pub fn channels(&self) -> &[i32] {
        &self.channels
    }
}

impl From<Vec<i32>> for ChannelSample {
    fn from(channels: Vec<i32>) -> Self {
        Self::new(channels)
    }
}

impl From<&[i32]> for ChannelSample {
    fn from(channels: &[i32]) -> Self {
        Self::new(channels.to_vec())
    }
}

/// Continuous channel values passed through to consumers
///
/// Nothing here is thresholded or de-duplicated; consumers that need analog
/// input (triggers, wheels) read it from every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub left_stick_x: i32,
    pub left_stick_y: i32,
    pub right_stick_x: i32,
    pub right_stick_y: i32,
    pub left_trigger: i32,
    pub right_trigger: i32,
    pub left_aux: i32,
    pub right_aux: i32,
    pub left_wheel: i32,
    pub right_wheel: i32,
}

impl Telemetry {
    // Returns None for incomplete samples
    pub fn from_sample(sample: &ChannelSample) -> Option<Self> {
        if !sample.is_complete() {
            return None;
        }

        Some(Self {
            left_stick_x: sample.get(ChannelIndex::LeftStickX)?,
            left_stick_y: sample.get(ChannelIndex::LeftStickY)?,
            right_stick_x: sample.get(ChannelIndex::RightStickX)?,
            right_stick_y: sample.get(ChannelIndex::RightStickY)?,
            left_trigger: sample.get(ChannelIndex::LeftTrigger)?,
            right_trigger: sample.get(ChannelIndex::RightTrigger)?,
            left_aux: sample.get(ChannelIndex::LeftAuxButton)?,
            right_aux: sample.get(ChannelIndex::RightAuxButton)?,
            left_wheel: sample.get(ChannelIndex::LeftWheel)?,
            right_wheel: sample.get(ChannelIndex::RightWheel)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn telemetry_reads_fixed_layout() {
        let sample = ChannelSample::new(vec![
            1510, 1420, 1580, 1390, 1000, 2000, 0, 0, 1950, 1050, 1300, 1700,
        ]);
        let telemetry = Telemetry::from_sample(&sample).unwrap();

        assert_eq!(telemetry.right_stick_x, 1510);
        assert_eq!(telemetry.left_stick_y, 1420);
        assert_eq!(telemetry.right_stick_y, 1580);
        assert_eq!(telemetry.left_stick_x, 1390);
        assert_eq!(telemetry.left_trigger, 1000);
        assert_eq!(telemetry.right_trigger, 2000);
        assert_eq!(telemetry.left_aux, 1950);
        assert_eq!(telemetry.right_aux, 1050);
        assert_eq!(telemetry.left_wheel, 1300);
        assert_eq!(telemetry.right_wheel, 1700);
    }

    #[test]
    fn short_sample_is_incomplete() {
        let sample = ChannelSample::new(vec![1500; 11]);
        assert!(!sample.is_complete());
        assert!(Telemetry::from_sample(&sample).is_none());
        assert_eq!(sample.get(ChannelIndex::LeftAuxButton), Some(1500));
        assert_eq!(sample.get(ChannelIndex::RightWheel), None);
    }

    #[test]
    fn borrowed_channels_are_copied() {
        let raw = [1500; 12];
        let sample = ChannelSample::from(&raw[..]);

        assert!(sample.is_complete());
        assert_eq!(sample.channels(), &raw[..]);
        assert_eq!(sample, ChannelSample::from(raw.to_vec()));
    }
}
