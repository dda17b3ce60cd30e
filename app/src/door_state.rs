use std::fmt;

use rppal::gpio::Level;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DoorState {
    Open,
    Closed,
}

/// The raw pin level that means "open". Reed switches come in both normally
/// open and normally closed variants so this is a wiring decision.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenLevel {
    High,
    Low,
}

impl Default for OpenLevel {
    fn default() -> Self {
        OpenLevel::High
    }
}

impl DoorState {
    pub fn from_level(level: Level, open_level: OpenLevel) -> Self {
        match (level, open_level) {
            (Level::High, OpenLevel::High) | (Level::Low, OpenLevel::Low) => DoorState::Open,
            (Level::Low, OpenLevel::High) | (Level::High, OpenLevel::Low) => DoorState::Closed,
        }
    }

    pub fn is_open(self) -> bool {
        self == DoorState::Open
    }
}

impl fmt::Display for DoorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DoorState::Open => f.write_str("open"),
            DoorState::Closed => f.write_str("closed"),
        }
    }
}
