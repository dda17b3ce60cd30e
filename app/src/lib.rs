pub mod alert;
pub mod config;
mod door_state;
pub mod fingerprint;
pub mod http;
pub mod machine;
pub mod monitor;
pub mod notify;
pub mod sampler;
pub mod telemetry;
pub mod twilio;

use std::time::Instant;

pub use door_state::{DoorState, OpenLevel};

#[macro_export]
macro_rules! term_on_err {
    ($expr:expr, $term:expr) => {
        match $expr {
            std::result::Result::Ok(val) => val,
            std::result::Result::Err(err) => {
                ::log::error!("setting term due to error: {}", err);
                $term.store(true, std::sync::atomic::Ordering::SeqCst);
                break;
            }
        }
    };
}

/// Copy of the poll loop's view of the door, published for the status page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Snapshot {
    pub door_state: DoorState,
    pub since: Instant,
    pub alarm_sent: bool,
}
