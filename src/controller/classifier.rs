//! Threshold-band classification of raw stick axes
//!
//! The left stick maps to four quadrant symbols (D-pad style). The right stick
//! maps each axis onto three tiers per direction around the 1500 center:
//!
//! ```text
//!  1050      1200      1350      1500      1650      1800      1950
//!   [ tier 3  )( tier 2  )( tier 1  )( tier 1  )( tier 2  )( tier 3  ]
//! ```
//!
//! Exact band edges (1200, 1350, 1500, 1650, 1800) are not covered by any band and
//! classify to no symbol.

use serde::{Deserialize, Serialize};

pub const LEFT_STICK_LOW: i32 = 1400;
pub const LEFT_STICK_HIGH: i32 = 1600;

pub const RIGHT_STICK_MIN: i32 = 1050;
pub const RIGHT_STICK_TIER3_LOW: i32 = 1200;
pub const RIGHT_STICK_TIER2_LOW: i32 = 1350;
pub const RIGHT_STICK_CENTER: i32 = 1500;
pub const RIGHT_STICK_TIER2_HIGH: i32 = 1650;
pub const RIGHT_STICK_TIER3_HIGH: i32 = 1800;
pub const RIGHT_STICK_MAX: i32 = 1950;

// Stick axis as seen by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    LeftX,
    LeftY,
    RightX,
    RightY,
}

// Joystick type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stick {
    Left,
    Right,
}

impl Stick {
    pub fn axes(self) -> (Axis, Axis) {
        match self {
            Stick::Left => (Axis::LeftX, Axis::LeftY),
            Stick::Right => (Axis::RightX, Axis::RightY),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Left,
    Right,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    One,
    Two,
    Three,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DirectionalSymbol {
    // Left stick, binary threshold
    Quadrant(Direction),
    // Right stick, six-band mapping
    Band(Direction, Tier),
}

/// Host key vocabulary. The discriminants are the Android `KeyEvent` codes the
/// host bridge dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCode {
    DpadUp = 19,
    DpadDown = 20,
    DpadLeft = 21,
    DpadRight = 22,
    ButtonL2 = 104,
    ButtonR2 = 105,
    Numpad1 = 145,
    Numpad2 = 146,
    Numpad3 = 147,
    Numpad4 = 148,
    Numpad5 = 149,
    Numpad6 = 150,
    Numpad7 = 151,
    Numpad8 = 152,
    Numpad9 = 153,
    NumpadDivide = 154,
    NumpadMultiply = 155,
    NumpadSubtract = 156,
}

impl KeyCode {
    pub fn android_code(self) -> i32 {
        self as i32
    }
}

impl DirectionalSymbol {
    pub fn key_code(self) -> KeyCode {
        match self {
            DirectionalSymbol::Quadrant(Direction::Left) => KeyCode::DpadLeft,
            DirectionalSymbol::Quadrant(Direction::Right) => KeyCode::DpadRight,
            DirectionalSymbol::Quadrant(Direction::Up) => KeyCode::DpadUp,
            DirectionalSymbol::Quadrant(Direction::Down) => KeyCode::DpadDown,

            DirectionalSymbol::Band(Direction::Left, Tier::One) => KeyCode::Numpad7,
            DirectionalSymbol::Band(Direction::Left, Tier::Two) => KeyCode::Numpad8,
            DirectionalSymbol::Band(Direction::Left, Tier::Three) => KeyCode::Numpad9,

            DirectionalSymbol::Band(Direction::Right, Tier::One) => KeyCode::NumpadDivide,
            DirectionalSymbol::Band(Direction::Right, Tier::Two) => KeyCode::NumpadMultiply,
            DirectionalSymbol::Band(Direction::Right, Tier::Three) => KeyCode::NumpadSubtract,

            DirectionalSymbol::Band(Direction::Down, Tier::One) => KeyCode::Numpad4,
            DirectionalSymbol::Band(Direction::Down, Tier::Two) => KeyCode::Numpad5,
            DirectionalSymbol::Band(Direction::Down, Tier::Three) => KeyCode::Numpad6,

            DirectionalSymbol::Band(Direction::Up, Tier::One) => KeyCode::Numpad1,
            DirectionalSymbol::Band(Direction::Up, Tier::Two) => KeyCode::Numpad2,
            DirectionalSymbol::Band(Direction::Up, Tier::Three) => KeyCode::Numpad3,
        }
    }
}

/// Classifies a single raw axis value.
pub fn classify(value: i32, axis: Axis) -> Option<DirectionalSymbol> {
    match axis {
        Axis::LeftX => quadrant(value, Direction::Left, Direction::Right),
        Axis::LeftY => quadrant(value, Direction::Up, Direction::Down),
        Axis::RightX => band(value, Direction::Left, Direction::Right),
        // Low Y readings are "down" on the right stick
        Axis::RightY => band(value, Direction::Down, Direction::Up),
    }
}

/// Classifies a whole stick. X is evaluated before Y and the first match wins,
/// so a stick yields at most one symbol per sample.
pub fn classify_stick(x: i32, y: i32, stick: Stick) -> Option<DirectionalSymbol> {
    let (x_axis, y_axis) = stick.axes();
    classify(x, x_axis).or_else(|| classify(y, y_axis))
}

fn quadrant(value: i32, low: Direction, high: Direction) -> Option<DirectionalSymbol> {
    if value < LEFT_STICK_LOW {
        Some(DirectionalSymbol::Quadrant(low))
    } else if value > LEFT_STICK_HIGH {
        Some(DirectionalSymbol::Quadrant(high))
    } else {
        None
    }
}

fn band(value: i32, low: Direction, high: Direction) -> Option<DirectionalSymbol> {
    let (direction, tier) = if value > RIGHT_STICK_TIER2_LOW && value < RIGHT_STICK_CENTER {
        (low, Tier::One)
    } else if value > RIGHT_STICK_TIER3_LOW && value < RIGHT_STICK_TIER2_LOW {
        (low, Tier::Two)
    } else if (RIGHT_STICK_MIN..RIGHT_STICK_TIER3_LOW).contains(&value) {
        (low, Tier::Three)
    } else if value > RIGHT_STICK_CENTER && value < RIGHT_STICK_TIER2_HIGH {
        (high, Tier::One)
    } else if value > RIGHT_STICK_TIER2_HIGH && value < RIGHT_STICK_TIER3_HIGH {
        (high, Tier::Two)
    } else if value > RIGHT_STICK_TIER3_HIGH && value <= RIGHT_STICK_MAX {
        (high, Tier::Three)
    } else {
        return None;
    };

    Some(DirectionalSymbol::Band(direction, tier))
}
