//! Debounced sampling of the door sensor.
//!
//! Reed switches bounce when the door starts or stops moving and long cable
//! runs pick up noise. A single spurious read would otherwise restart the
//! open timer, so each poll only reports a level once it has held steady for
//! the whole settle window.

use std::thread;
use std::time::Duration;

use log::warn;
use rppal::gpio::{InputPin, Level, OutputPin};
use serde::{Deserialize, Serialize};

use crate::door_state::{DoorState, OpenLevel};

/// Reads beyond this many settle windows give up and keep the previous level.
const MAX_WINDOWS: u32 = 100;

/// Something that can report a raw digital level.
pub trait LevelInput {
    fn read_level(&mut self) -> Level;
}

/// Something that can show a binary on/off indication.
pub trait Indicator {
    fn set_lit(&mut self, lit: bool);
}

impl LevelInput for InputPin {
    fn read_level(&mut self) -> Level {
        self.read()
    }
}

impl Indicator for OutputPin {
    fn set_lit(&mut self, lit: bool) {
        if lit {
            self.set_high()
        } else {
            self.set_low()
        }
    }
}

/// Which door state lights the indicator.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LitWhen {
    Closed,
    Open,
}

impl Default for LitWhen {
    fn default() -> Self {
        LitWhen::Closed
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SamplerSettings {
    /// Number of consecutive identical reads required.
    pub settle_reads: u32,
    /// Pause between reads.
    pub interval: Duration,
    pub open_level: OpenLevel,
    pub lit_when: LitWhen,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        SamplerSettings {
            settle_reads: 10,
            interval: Duration::from_millis(1),
            open_level: OpenLevel::High,
            lit_when: LitWhen::Closed,
        }
    }
}

pub struct Sampler<I, L> {
    input: I,
    indicator: L,
    settings: SamplerSettings,
    /// Last level that held for a full window.
    settled: Option<Level>,
}

impl<I, L> Sampler<I, L>
where
    I: LevelInput,
    L: Indicator,
{
    pub fn new(input: I, indicator: L, settings: SamplerSettings) -> Self {
        Sampler {
            input,
            indicator,
            settings,
            settled: None,
        }
    }

    /// Block until the input has been stable for the settle window and return
    /// the resulting door state. The indicator is updated to match.
    pub fn sample(&mut self) -> DoorState {
        let level = self.settled_level();
        let state = DoorState::from_level(level, self.settings.open_level);
        let lit = match self.settings.lit_when {
            LitWhen::Closed => state == DoorState::Closed,
            LitWhen::Open => state == DoorState::Open,
        };
        self.indicator.set_lit(lit);
        state
    }

    fn settled_level(&mut self) -> Level {
        let settle_reads = self.settings.settle_reads.max(1);
        let max_reads = settle_reads.saturating_mul(MAX_WINDOWS);
        let mut reference = self.input.read_level();
        let mut stable = 0;
        let mut reads = 0;

        while stable < settle_reads {
            if reads >= max_reads {
                // Noise is never reported as a door state. With no earlier
                // settled level there is nothing better than the last read.
                let level = self.settled.unwrap_or(reference);
                warn!(
                    "door input did not settle after {} reads, keeping {:?}",
                    reads, level
                );
                return level;
            }
            thread::sleep(self.settings.interval);
            let level = self.input.read_level();
            reads += 1;
            if level == reference {
                stable += 1;
            } else {
                reference = level;
                stable = 0;
            }
        }

        self.settled = Some(reference);
        reference
    }

    pub fn indicator_mut(&mut self) -> &mut L {
        &mut self.indicator
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;

    use super::*;

    /// Replays a fixed sequence of levels, repeating the last one forever.
    pub(crate) struct Script {
        levels: VecDeque<Level>,
        last: Level,
        pub reads: usize,
    }

    impl Script {
        pub(crate) fn new(levels: &[Level]) -> Self {
            Script {
                levels: levels.iter().copied().collect(),
                last: levels.last().copied().unwrap_or(Level::Low),
                reads: 0,
            }
        }
    }

    impl LevelInput for Script {
        fn read_level(&mut self) -> Level {
            self.reads += 1;
            match self.levels.pop_front() {
                Some(level) => {
                    self.last = level;
                    level
                }
                None => self.last,
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct Led {
        pub lit: Option<bool>,
    }

    impl Indicator for Led {
        fn set_lit(&mut self, lit: bool) {
            self.lit = Some(lit);
        }
    }

    fn fast() -> SamplerSettings {
        SamplerSettings {
            interval: Duration::ZERO,
            ..SamplerSettings::default()
        }
    }

    #[test]
    fn steady_input() {
        let mut sampler = Sampler::new(Script::new(&[Level::High]), Led::default(), fast());
        assert_eq!(sampler.sample(), DoorState::Open);
        assert_eq!(sampler.input.reads, 11);
        assert_eq!(sampler.indicator.lit, Some(false));
    }

    #[test]
    fn glitch_is_filtered() {
        use Level::*;
        let levels = [Low, Low, Low, High, High, Low];
        let mut sampler = Sampler::new(Script::new(&levels), Led::default(), fast());
        assert_eq!(sampler.sample(), DoorState::Closed);
        assert_eq!(sampler.indicator.lit, Some(true));
    }

    #[test]
    fn change_restarts_window() {
        use Level::*;
        // Settles low, then the input flips high for the rest of the read.
        let mut levels = vec![Low; 9];
        levels.push(High);
        let mut sampler = Sampler::new(Script::new(&levels), Led::default(), fast());
        assert_eq!(sampler.sample(), DoorState::Open);
        // 9 low reads, the flip, then 10 more stable high reads
        assert_eq!(sampler.input.reads, 20);
    }

    fn flapping(reads: usize) -> impl Iterator<Item = Level> {
        (0..reads).map(|i| if i % 2 == 0 { Level::High } else { Level::Low })
    }

    #[test]
    fn flapping_input_gives_up() {
        let levels: Vec<Level> = flapping(2000).collect();
        let mut sampler = Sampler::new(Script::new(&levels), Led::default(), fast());
        // Nothing has settled yet, so the last read stands in.
        assert_eq!(sampler.sample(), DoorState::Open);
        assert_eq!(sampler.input.reads, 1001);
    }

    #[test]
    fn flapping_input_keeps_previous_state() {
        use Level::*;
        let mut levels = vec![Low; 11];
        // Never stable for a full window and ends on the open level.
        levels.extend(flapping(1001));
        levels.extend([Low; 11]);
        let mut sampler = Sampler::new(Script::new(&levels), Led::default(), fast());

        assert_eq!(sampler.sample(), DoorState::Closed);
        assert_eq!(sampler.sample(), DoorState::Closed);
        assert_eq!(sampler.input.reads, 11 + 1001);
        assert_eq!(sampler.indicator.lit, Some(true));
        assert_eq!(sampler.sample(), DoorState::Closed);
    }

    #[test]
    fn indicator_polarity() {
        let settings = SamplerSettings {
            lit_when: LitWhen::Open,
            ..fast()
        };
        let mut sampler = Sampler::new(Script::new(&[Level::High]), Led::default(), settings);
        assert_eq!(sampler.sample(), DoorState::Open);
        assert_eq!(sampler.indicator.lit, Some(true));
    }
}
