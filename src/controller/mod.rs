//! Controller subsystem for RC transmitter input handling
//!
//! Turns periodic snapshots of transmitter channels into discrete input events:
//!
//! 1. [`classifier`] - Stick values to directional symbols and key codes
//! 2. [`edge_detector`] - Click detection on the auxiliary button channels
//! 3. [`input_decoder`] - One [`channel_sample::ChannelSample`] to one [`input_decoder::DecodedFrame`]
//! 4. [`link_lifecycle`] - Connect/disconnect state of the sample pipeline
//! 5. [`sampling_loop`] - Periodic fetch, decode and delivery
//! 6. [`controller_handle`] - Unified API and lifecycle management
//!
//! # Architecture
//!
//! ```text
//! Transport ──► SamplingLoop ──► InputDecoder ──► EventSink
//!    │          (300ms ticks)    (Frames)
//!    └─ callbacks ──► ControllerManager ──► LinkLifecycle
//! ```
//!
//! The manager runs on its own task. Host commands and transport callbacks
//! are queued to it, so the link state only ever changes in one place.

pub mod channel_sample;
pub mod classifier;
pub mod controller_handle;
pub mod edge_detector;
pub mod input_decoder;
pub mod link_lifecycle;
pub mod sampling_loop;

pub use channel_sample::{ChannelIndex, ChannelSample, Telemetry};
pub use classifier::{classify, classify_stick, Axis, DirectionalSymbol, KeyCode, Stick};
pub use controller_handle::{ControllerError, ControllerHandle};
pub use edge_detector::{AuxChannel, ButtonPressed, EdgeDetector, Side};
pub use input_decoder::{DecodeError, DecodedFrame, DiscreteEvent, InputDecoder};
pub use link_lifecycle::{LinkLifecycle, LinkState, PipelineStats, SubChannel};
pub use sampling_loop::{SamplingLoop, SamplingSettings, SamplingStats};
