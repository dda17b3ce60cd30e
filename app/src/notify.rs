//! Outbound notification transports.

use std::error::Error;
use std::fmt;

use log::info;

use crate::fingerprint::{Fingerprint, FingerprintError};

/// A single text message ready to hand to a transport.
#[derive(Debug, Clone, Copy)]
pub struct Outgoing<'a> {
    pub to: &'a str,
    pub from: &'a str,
    pub body: &'a str,
    pub media_url: Option<&'a str>,
    /// Certificate fingerprint the transport must pin, when one was fetched.
    pub trust: Option<&'a Fingerprint>,
}

/// Delivers messages. Implementations block until the remote end answers
/// and return its diagnostic response text on success.
pub trait Notifier {
    fn send(&self, message: &Outgoing<'_>) -> Result<String, NotifyError>;
}

#[derive(Debug)]
pub enum NotifyError {
    /// The request never got a response (DNS, connect, TLS, timeout).
    Transport(String),
    /// The service answered with an error status.
    Rejected { status: u16, response: String },
    /// The supplied fingerprint could not be turned into a TLS pin.
    Trust(FingerprintError),
}

impl fmt::Display for NotifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyError::Transport(msg) => write!(f, "transport error: {}", msg),
            NotifyError::Rejected { status, response } => {
                write!(f, "rejected with status {}: {}", status, response)
            }
            NotifyError::Trust(err) => write!(f, "unable to pin certificate: {}", err),
        }
    }
}

impl Error for NotifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            NotifyError::Trust(err) => Some(err),
            _ => None,
        }
    }
}

/// Writes messages to the log instead of sending them. Used when no messaging
/// account is configured.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, message: &Outgoing<'_>) -> Result<String, NotifyError> {
        info!("not sending to {}: {}", message.to, message.body);
        Ok(String::from("logged"))
    }
}
