use std::error::Error;
use std::fmt;

use log::{error, info};

use crate::fingerprint::{FingerprintError, TrustSource};
use crate::notify::{Notifier, NotifyError, Outgoing};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AlertKind {
    Ready,
    Opened,
    Closed,
}

impl AlertKind {
    /// Text message body.
    pub fn message(self) -> &'static str {
        match self {
            AlertKind::Ready => "Guardian Ready",
            AlertKind::Opened => "Garage is Open!",
            AlertKind::Closed => "Garage has Closed",
        }
    }

    /// Line published to the telemetry status feed alongside the alert.
    pub fn status(self) -> &'static str {
        match self {
            AlertKind::Ready => "Guardian Started",
            AlertKind::Opened => "Garage is open!",
            AlertKind::Closed => "Garage closed",
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertKind::Ready => f.write_str("ready"),
            AlertKind::Opened => f.write_str("opened"),
            AlertKind::Closed => f.write_str("closed"),
        }
    }
}

/// Addressing for every alert.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Recipient {
    pub to: String,
    pub from: String,
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sent {
    pub kind: AlertKind,
    pub response: String,
}

#[derive(Debug)]
pub enum DispatchError {
    Trust(FingerprintError),
    Notify(NotifyError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Trust(err) => write!(f, "{}", err),
            DispatchError::Notify(err) => write!(f, "{}", err),
        }
    }
}

impl Error for DispatchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DispatchError::Trust(err) => Some(err),
            DispatchError::Notify(err) => Some(err),
        }
    }
}

/// Sends alerts once, best effort. Nothing is retried: a failed send is
/// logged and forgotten.
pub struct Dispatcher {
    notifier: Box<dyn Notifier>,
    recipient: Recipient,
    trust: Option<Box<dyn TrustSource>>,
}

impl Dispatcher {
    pub fn new(notifier: Box<dyn Notifier>, recipient: Recipient) -> Self {
        Dispatcher {
            notifier,
            recipient,
            trust: None,
        }
    }

    /// Fetch a fresh certificate fingerprint from `trust` before every send.
    pub fn with_trust_source(mut self, trust: Box<dyn TrustSource>) -> Self {
        self.trust = Some(trust);
        self
    }

    pub fn dispatch(&self, kind: AlertKind) -> Result<Sent, DispatchError> {
        info!("{}", kind.message());
        let result = self.send(kind);
        match &result {
            Ok(sent) => info!("sent {} alert: {}", kind, sent.response),
            Err(err) => error!("unable to send {} alert: {}", kind, err),
        }
        result
    }

    fn send(&self, kind: AlertKind) -> Result<Sent, DispatchError> {
        let fingerprint = match &self.trust {
            Some(source) => Some(source.refresh().map_err(DispatchError::Trust)?),
            None => None,
        };
        let message = Outgoing {
            to: &self.recipient.to,
            from: &self.recipient.from,
            body: kind.message(),
            media_url: self.recipient.media_url.as_deref(),
            trust: fingerprint.as_ref(),
        };
        let response = self
            .notifier
            .send(&message)
            .map_err(DispatchError::Notify)?;
        Ok(Sent { kind, response })
    }
}
