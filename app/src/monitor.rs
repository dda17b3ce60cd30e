//! The poll loop.
//!
//! Everything that changes door state happens here, on one thread: sample
//! the sensor, advance the state machine, send whatever alert it asks for,
//! then sleep until the next poll. Sends block the loop until they finish.

use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::alert::{AlertKind, Dispatcher};
use crate::machine::DoorMachine;
use crate::sampler::{Indicator, LevelInput, Sampler};
use crate::telemetry::Telemetry;
use crate::Snapshot;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct MonitorSettings {
    pub poll_interval: Duration,
    pub open_threshold: Duration,
    pub heartbeat_interval: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        MonitorSettings {
            poll_interval: Duration::from_secs(1),
            open_threshold: Duration::from_secs(5 * 60),
            heartbeat_interval: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorError {
    /// The telemetry channel could not reconnect and gave up.
    TelemetryHalted,
}

impl fmt::Display for MonitorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MonitorError::TelemetryHalted => {
                f.write_str("telemetry connection lost, waiting to be restarted")
            }
        }
    }
}

impl Error for MonitorError {}

pub struct Monitor<I, L> {
    sampler: Sampler<I, L>,
    machine: DoorMachine,
    dispatcher: Dispatcher,
    telemetry: Option<Box<dyn Telemetry>>,
    status: Arc<RwLock<Snapshot>>,
    settings: MonitorSettings,
    last_heartbeat: Instant,
}

impl<I, L> Monitor<I, L>
where
    I: LevelInput,
    L: Indicator,
{
    /// Take the baseline sample and announce that monitoring has started.
    ///
    /// The "Guardian Ready" alert is sent exactly once here whatever state
    /// the door is in. An already open door starts its episode now.
    pub fn start(
        mut sampler: Sampler<I, L>,
        dispatcher: Dispatcher,
        mut telemetry: Option<Box<dyn Telemetry>>,
        settings: MonitorSettings,
        now: Instant,
    ) -> Self {
        sampler.indicator_mut().set_lit(false);

        let door_state = sampler.sample();
        info!("door is {} at startup", door_state);
        let machine = DoorMachine::new(door_state, now, settings.open_threshold);
        let status = Arc::new(RwLock::new(Snapshot {
            door_state,
            since: now,
            alarm_sent: false,
        }));

        if let Some(telemetry) = telemetry.as_mut() {
            telemetry.status(AlertKind::Ready.status());
        }
        let _ = dispatcher.dispatch(AlertKind::Ready);

        Monitor {
            sampler,
            machine,
            dispatcher,
            telemetry,
            status,
            settings,
            last_heartbeat: now,
        }
    }

    /// Shared view of the door for the status page.
    pub fn status(&self) -> Arc<RwLock<Snapshot>> {
        Arc::clone(&self.status)
    }

    pub fn machine(&self) -> &DoorMachine {
        &self.machine
    }

    /// Run one poll cycle at `now`, returning the alert raised, if any.
    pub fn poll(&mut self, now: Instant) -> Option<AlertKind> {
        let sampled = self.sampler.sample();
        let alert = self.machine.on_poll(sampled, now);

        if let Some(kind) = alert {
            // Delivery failures are logged by the dispatcher. The state
            // machine has already moved on so nothing is resent.
            let _ = self.dispatcher.dispatch(kind);
            if let Some(telemetry) = self.telemetry.as_mut() {
                telemetry.status(kind.status());
            }
        }

        if now.saturating_duration_since(self.last_heartbeat) >= self.settings.heartbeat_interval {
            if let Some(telemetry) = self.telemetry.as_mut() {
                debug!("sending heartbeat");
                telemetry.heartbeat();
            }
            self.last_heartbeat = now;
        }

        self.publish_status();
        alert
    }

    /// Poll until `term` is set. Returns an error only when the telemetry
    /// channel has halted.
    pub fn run(&mut self, term: &AtomicBool) -> Result<(), MonitorError> {
        while !term.load(Ordering::Relaxed) {
            self.check_telemetry()?;
            self.poll(Instant::now());
            thread::sleep(self.settings.poll_interval);
        }
        info!("poll loop exiting");
        Ok(())
    }

    fn check_telemetry(&self) -> Result<(), MonitorError> {
        match &self.telemetry {
            Some(telemetry) if telemetry.halted() => Err(MonitorError::TelemetryHalted),
            _ => Ok(()),
        }
    }

    fn publish_status(&self) {
        let snapshot = Snapshot {
            door_state: self.machine.door_state(),
            since: self.machine.episode_start(),
            alarm_sent: self.machine.alarm_sent(),
        };
        match self.status.write() {
            Ok(mut status) => *status = snapshot,
            Err(err) => warn!("unable to publish door status: {}", err),
        }
    }
}
