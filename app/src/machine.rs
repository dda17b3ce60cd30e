//! Open-duration tracking and alert deduplication.
//!
//! ```text
//!                 opens                  open > threshold
//!   Closed ───────────────► OpenBelow ───────────────────► OpenAlarmed
//!     ▲                        │                               │
//!     │   closes (no alert)    │        closes (Closed alert)  │
//!     └────────────────────────┴───────────────────────────────┘
//! ```
//!
//! A door that closes again before the threshold produces no alerts at all.

use std::time::{Duration, Instant};

use crate::alert::AlertKind;
use crate::DoorState;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Phase {
    Closed,
    OpenBelowThreshold,
    OpenAlarmed,
}

#[derive(Debug, Clone)]
pub struct DoorMachine {
    previous: DoorState,
    episode_start: Instant,
    alarm_sent: bool,
    open_threshold: Duration,
}

impl DoorMachine {
    /// Start tracking from the first sample. The startup state never alerts.
    pub fn new(initial: DoorState, now: Instant, open_threshold: Duration) -> Self {
        DoorMachine {
            previous: initial,
            episode_start: now,
            alarm_sent: false,
            open_threshold,
        }
    }

    /// Feed one debounced sample. Returns at most one alert.
    ///
    /// Transitions are handled before the open-duration check so a door that
    /// closes on the poll it would have alarmed reports `Closed` only.
    pub fn on_poll(&mut self, sampled: DoorState, now: Instant) -> Option<AlertKind> {
        let mut alert = None;

        if sampled != self.previous {
            if self.previous == DoorState::Open && self.exceeded(now) {
                self.alarm_sent = false;
                alert = Some(AlertKind::Closed);
            }
            self.previous = sampled;
            self.episode_start = now;
        }

        if sampled == DoorState::Open && !self.alarm_sent && self.exceeded(now) {
            self.alarm_sent = true;
            alert = Some(AlertKind::Opened);
        }

        alert
    }

    fn exceeded(&self, now: Instant) -> bool {
        self.elapsed(now) > self.open_threshold
    }

    /// Time spent in the current episode. Instants before the episode start
    /// count as zero.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.episode_start)
    }

    pub fn door_state(&self) -> DoorState {
        self.previous
    }

    pub fn episode_start(&self) -> Instant {
        self.episode_start
    }

    pub fn alarm_sent(&self) -> bool {
        self.alarm_sent
    }

    pub fn phase(&self) -> Phase {
        match (self.previous, self.alarm_sent) {
            (DoorState::Closed, _) => Phase::Closed,
            (DoorState::Open, false) => Phase::OpenBelowThreshold,
            (DoorState::Open, true) => Phase::OpenAlarmed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs(5 * 60);

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn startup_state_does_not_alert() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Open, t0, THRESHOLD);
        assert_eq!(machine.on_poll(DoorState::Open, t0), None);
        assert_eq!(machine.phase(), Phase::OpenBelowThreshold);
    }

    #[test]
    fn exactly_threshold_is_not_enough() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        assert_eq!(machine.on_poll(DoorState::Open, t0), None);
        assert_eq!(machine.on_poll(DoorState::Open, t0 + THRESHOLD), None);
        assert_eq!(
            machine.on_poll(DoorState::Open, t0 + THRESHOLD + secs(1)),
            Some(AlertKind::Opened)
        );
    }

    #[test]
    fn one_open_alert_per_episode() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        machine.on_poll(DoorState::Open, t0);
        assert_eq!(
            machine.on_poll(DoorState::Open, t0 + secs(301)),
            Some(AlertKind::Opened)
        );
        for n in 302..2000 {
            assert_eq!(machine.on_poll(DoorState::Open, t0 + secs(n)), None);
        }
        assert_eq!(machine.phase(), Phase::OpenAlarmed);
    }

    #[test]
    fn closing_after_alarm_reports_closed() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        machine.on_poll(DoorState::Open, t0);
        machine.on_poll(DoorState::Open, t0 + secs(301));
        assert_eq!(
            machine.on_poll(DoorState::Closed, t0 + secs(400)),
            Some(AlertKind::Closed)
        );
        assert!(!machine.alarm_sent());
        assert_eq!(machine.episode_start(), t0 + secs(400));
        assert_eq!(machine.on_poll(DoorState::Closed, t0 + secs(401)), None);
    }

    #[test]
    fn short_blip_is_silent() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        assert_eq!(machine.on_poll(DoorState::Open, t0 + secs(1)), None);
        assert_eq!(machine.on_poll(DoorState::Closed, t0 + secs(9)), None);
        assert_eq!(machine.episode_start(), t0 + secs(9));
        assert_eq!(machine.phase(), Phase::Closed);
    }

    #[test]
    fn close_on_alarm_poll_takes_precedence() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        machine.on_poll(DoorState::Open, t0);
        // No poll observed the door past the threshold while it was open.
        assert_eq!(
            machine.on_poll(DoorState::Closed, t0 + secs(600)),
            Some(AlertKind::Closed)
        );
        assert!(!machine.alarm_sent());
    }

    #[test]
    fn reopening_starts_a_new_episode() {
        let t0 = Instant::now();
        let mut machine = DoorMachine::new(DoorState::Closed, t0, THRESHOLD);
        machine.on_poll(DoorState::Open, t0);
        machine.on_poll(DoorState::Open, t0 + secs(301));
        machine.on_poll(DoorState::Closed, t0 + secs(302));
        machine.on_poll(DoorState::Open, t0 + secs(303));
        assert_eq!(machine.on_poll(DoorState::Open, t0 + secs(603)), None);
        assert_eq!(
            machine.on_poll(DoorState::Open, t0 + secs(604)),
            Some(AlertKind::Opened)
        );
    }

    #[test]
    fn earlier_instant_counts_as_zero() {
        let t0 = Instant::now() + secs(10);
        let machine = DoorMachine::new(DoorState::Open, t0, THRESHOLD);
        assert_eq!(machine.elapsed(t0 - secs(5)), Duration::ZERO);
    }
}
