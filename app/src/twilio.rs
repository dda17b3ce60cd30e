//! SMS delivery through the Twilio REST API.

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::fingerprint;
use crate::notify::{Notifier, NotifyError, Outgoing};

const API_BASE: &str = "https://api.twilio.com/2010-04-01";
const TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct TwilioNotifier {
    account_sid: String,
    authorization: String,
}

impl TwilioNotifier {
    pub fn new(account_sid: &str, auth_token: &str) -> Self {
        let credentials = STANDARD.encode(format!("{}:{}", account_sid, auth_token));
        TwilioNotifier {
            account_sid: account_sid.to_string(),
            authorization: format!("Basic {}", credentials),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/Accounts/{}/Messages.json", API_BASE, self.account_sid)
    }

    fn agent(&self, message: &Outgoing<'_>) -> Result<ureq::Agent, NotifyError> {
        let mut builder = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout(TIMEOUT);
        if let Some(trust) = message.trust {
            let tls = fingerprint::pinned_tls_config(trust).map_err(NotifyError::Trust)?;
            builder = builder.tls_config(tls);
        }
        Ok(builder.build())
    }
}

impl Notifier for TwilioNotifier {
    fn send(&self, message: &Outgoing<'_>) -> Result<String, NotifyError> {
        let agent = self.agent(message)?;
        let mut form = vec![
            ("To", message.to),
            ("From", message.from),
            ("Body", message.body),
        ];
        if let Some(media_url) = message.media_url.filter(|url| !url.is_empty()) {
            form.push(("MediaUrl", media_url));
        }

        let result = agent
            .post(&self.messages_url())
            .set("Authorization", &self.authorization)
            .send_form(&form);
        match result {
            Ok(response) => {
                let body = response.into_string().unwrap_or_default();
                Ok(describe_accepted(&body))
            }
            Err(ureq::Error::Status(status, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(NotifyError::Rejected {
                    status,
                    response: describe_rejected(&body),
                })
            }
            Err(ureq::Error::Transport(transport)) => {
                Err(NotifyError::Transport(transport.to_string()))
            }
        }
    }
}

/// Summarise a successful Messages resource, falling back to the raw body.
fn describe_accepted(body: &str) -> String {
    match json::parse(body) {
        Ok(value) => match (value["sid"].as_str(), value["status"].as_str()) {
            (Some(sid), Some(status)) => format!("{} ({})", sid, status),
            (Some(sid), None) => sid.to_string(),
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}

/// Twilio errors carry a numeric code and a human readable message.
fn describe_rejected(body: &str) -> String {
    match json::parse(body) {
        Ok(value) => match (value["code"].as_u32(), value["message"].as_str()) {
            (Some(code), Some(message)) => format!("{} (code {})", message, code),
            (None, Some(message)) => message.to_string(),
            _ => body.to_string(),
        },
        Err(_) => body.to_string(),
    }
}
