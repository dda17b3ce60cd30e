use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::alert::Recipient;
use crate::monitor::MonitorSettings;
use crate::sampler::{LitWhen, SamplerSettings};
use crate::telemetry::MqttSettings;
use crate::OpenLevel;

pub const DEFAULT_PATH: &str = "/etc/garage-guardian.toml";

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct RawConfig {
    pub sensor: Sensor,
    #[serde(default)]
    pub monitor: RawMonitor,
    pub twilio: Option<Twilio>,
    pub fingerprint: Option<FingerprintHost>,
    pub telemetry: Option<RawTelemetry>,
    pub http: Option<Http>,
}

impl RawConfig {
    /// Parse the config file at the specified path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at {:?}", path))?;
        toml::from_str(&contents).context("Failed to parse config file")
    }

    pub fn example() -> Self {
        RawConfig {
            sensor: Sensor::default(),
            monitor: RawMonitor::default(),
            twilio: Some(Twilio {
                account_sid: String::from("ACxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"),
                auth_token: String::from("your-auth-token"),
                to_number: String::from("+15550001111"),
                from_number: String::from("+15552223333"),
                media_url: None,
            }),
            fingerprint: Some(FingerprintHost {
                host: String::from("www.example.com"),
                port: 80,
                path: String::from("/fingerprint.txt"),
            }),
            telemetry: Some(RawTelemetry {
                host: String::from("io.adafruit.com"),
                port: 1883,
                username: String::from("your-username"),
                key: String::from("your-key"),
                status_topic: String::from("your-username/feeds/garage-status"),
                heartbeat_topic: String::from("your-username/feeds/garage-heartbeat"),
                heartbeat_interval_secs: default_heartbeat_interval_secs(),
            }),
            http: Some(Http::default()),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct Sensor {
    /// BCM number of the door switch input.
    pub door_pin: u8,
    /// BCM number of the indicator LED output.
    pub indicator_pin: u8,
    #[serde(default)]
    pub open_level: OpenLevel,
    #[serde(default)]
    pub indicator_lit_when: LitWhen,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

impl Default for Sensor {
    fn default() -> Self {
        Sensor {
            door_pin: 20,      // header pin 38
            indicator_pin: 21, // header pin 40
            open_level: OpenLevel::default(),
            indicator_lit_when: LitWhen::default(),
            debounce_ms: default_debounce_ms(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct RawMonitor {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_open_threshold_minutes")]
    pub open_threshold_minutes: u64,
}

impl Default for RawMonitor {
    fn default() -> Self {
        RawMonitor {
            poll_interval_ms: default_poll_interval_ms(),
            open_threshold_minutes: default_open_threshold_minutes(),
        }
    }
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct Twilio {
    pub account_sid: String,
    pub auth_token: String,
    pub to_number: String,
    pub from_number: String,
    /// Optional image attached to every message.
    pub media_url: Option<String>,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct FingerprintHost {
    pub host: String,
    #[serde(default = "default_fingerprint_port")]
    pub port: u16,
    pub path: String,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct RawTelemetry {
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub key: String,
    pub status_topic: String,
    pub heartbeat_topic: String,
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
}

#[derive(Debug, PartialEq, Deserialize, Serialize)]
pub struct Http {
    pub listen: SocketAddr,
}

impl Default for Http {
    fn default() -> Self {
        Http {
            listen: SocketAddr::from(([0, 0, 0, 0], 8888)),
        }
    }
}

fn default_debounce_ms() -> u64 {
    10
}

fn default_sample_interval_ms() -> u64 {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_open_threshold_minutes() -> u64 {
    5
}

fn default_fingerprint_port() -> u16 {
    80
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_heartbeat_interval_secs() -> u64 {
    60 * 60
}

/// Validated configuration.
#[derive(Debug)]
pub struct Config {
    pub door_pin: u8,
    pub indicator_pin: u8,
    pub sampler: SamplerSettings,
    pub monitor: MonitorSettings,
    pub twilio: Option<TwilioAccount>,
    pub fingerprint: Option<FingerprintHost>,
    pub telemetry: Option<MqttSettings>,
    pub http: Option<SocketAddr>,
}

#[derive(Debug)]
pub struct TwilioAccount {
    pub account_sid: String,
    pub auth_token: String,
    pub recipient: Recipient,
}

impl TryFrom<RawConfig> for Config {
    type Error = anyhow::Error;

    fn try_from(raw: RawConfig) -> Result<Self, Self::Error> {
        let sensor = raw.sensor;
        if sensor.door_pin == sensor.indicator_pin {
            bail!("door_pin and indicator_pin must differ");
        }
        if sensor.debounce_ms == 0 {
            bail!("debounce_ms must be greater than zero");
        }
        if sensor.sample_interval_ms == 0 {
            bail!("sample_interval_ms must be greater than zero");
        }
        if raw.monitor.poll_interval_ms == 0 {
            bail!("poll_interval_ms must be greater than zero");
        }

        // One read per sample interval for the whole window.
        let settle_reads = (sensor.debounce_ms / sensor.sample_interval_ms).max(1);
        let sampler = SamplerSettings {
            settle_reads: u32::try_from(settle_reads).context("debounce_ms is too large")?,
            interval: Duration::from_millis(sensor.sample_interval_ms),
            open_level: sensor.open_level,
            lit_when: sensor.indicator_lit_when,
        };

        let twilio = match raw.twilio {
            Some(twilio) => {
                for (name, value) in [
                    ("account_sid", &twilio.account_sid),
                    ("auth_token", &twilio.auth_token),
                    ("to_number", &twilio.to_number),
                    ("from_number", &twilio.from_number),
                ] {
                    if value.trim().is_empty() {
                        bail!("twilio.{} must not be empty", name);
                    }
                }
                Some(TwilioAccount {
                    account_sid: twilio.account_sid,
                    auth_token: twilio.auth_token,
                    recipient: Recipient {
                        to: twilio.to_number,
                        from: twilio.from_number,
                        media_url: twilio.media_url.filter(|url| !url.is_empty()),
                    },
                })
            }
            None => None,
        };

        if let Some(fingerprint) = &raw.fingerprint {
            if fingerprint.host.trim().is_empty() {
                bail!("fingerprint.host must not be empty");
            }
        }

        let mut heartbeat_interval = None;
        let telemetry = match raw.telemetry {
            Some(telemetry) => {
                if telemetry.status_topic.is_empty() || telemetry.heartbeat_topic.is_empty() {
                    bail!("telemetry topics must not be empty");
                }
                if telemetry.heartbeat_interval_secs == 0 {
                    bail!("heartbeat_interval_secs must be greater than zero");
                }
                heartbeat_interval = Some(Duration::from_secs(telemetry.heartbeat_interval_secs));
                Some(MqttSettings {
                    host: telemetry.host,
                    port: telemetry.port,
                    username: telemetry.username,
                    key: telemetry.key,
                    client_id: String::from("garage-guardian"),
                    status_topic: telemetry.status_topic,
                    heartbeat_topic: telemetry.heartbeat_topic,
                })
            }
            None => None,
        };

        let open_threshold_secs = match raw.monitor.open_threshold_minutes.checked_mul(60) {
            Some(secs) => secs,
            None => bail!("open_threshold_minutes is too large"),
        };
        let monitor = MonitorSettings {
            poll_interval: Duration::from_millis(raw.monitor.poll_interval_ms),
            open_threshold: Duration::from_secs(open_threshold_secs),
            heartbeat_interval: heartbeat_interval
                .unwrap_or_else(|| Duration::from_secs(default_heartbeat_interval_secs())),
        };

        Ok(Config {
            door_pin: sensor.door_pin,
            indicator_pin: sensor.indicator_pin,
            sampler,
            monitor,
            twilio,
            fingerprint: raw.fingerprint,
            telemetry,
            http: raw.http.map(|http| http.listen),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> anyhow::Result<Config> {
        let raw: RawConfig = toml::from_str(toml)?;
        Config::try_from(raw)
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = parse(
            r#"
            [sensor]
            door_pin = 20
            indicator_pin = 21
            "#,
        )
        .unwrap();
        assert_eq!(config.sampler.settle_reads, 10);
        assert_eq!(config.sampler.interval, Duration::from_millis(1));
        assert_eq!(config.sampler.open_level, OpenLevel::High);
        assert_eq!(config.monitor.poll_interval, Duration::from_secs(1));
        assert_eq!(config.monitor.open_threshold, Duration::from_secs(300));
        assert!(config.twilio.is_none());
        assert!(config.telemetry.is_none());
        assert!(config.http.is_none());
    }

    #[test]
    fn example_round_trips() {
        let text = toml::to_string(&RawConfig::example()).unwrap();
        let raw: RawConfig = toml::from_str(&text).unwrap();
        assert_eq!(raw, RawConfig::example());
        let config = Config::try_from(raw).unwrap();
        assert_eq!(config.http, Some(SocketAddr::from(([0, 0, 0, 0], 8888))));
        assert_eq!(
            config.monitor.heartbeat_interval,
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn full_config() {
        let config = parse(
            r#"
            [sensor]
            door_pin = 5
            indicator_pin = 2
            open_level = "low"
            indicator_lit_when = "open"
            debounce_ms = 20
            sample_interval_ms = 2

            [monitor]
            poll_interval_ms = 250
            open_threshold_minutes = 2

            [twilio]
            account_sid = "AC1"
            auth_token = "token"
            to_number = "+1"
            from_number = "+2"
            media_url = ""

            [fingerprint]
            host = "example.com"
            path = "/fp"

            [telemetry]
            host = "io.adafruit.com"
            status_topic = "me/feeds/status"
            heartbeat_topic = "me/feeds/heartbeat"
            "#,
        )
        .unwrap();
        assert_eq!(config.sampler.settle_reads, 10);
        assert_eq!(config.sampler.open_level, OpenLevel::Low);
        assert_eq!(config.sampler.lit_when, LitWhen::Open);
        assert_eq!(config.monitor.poll_interval, Duration::from_millis(250));
        assert_eq!(config.monitor.open_threshold, Duration::from_secs(120));
        let twilio = config.twilio.unwrap();
        assert_eq!(twilio.recipient.media_url, None);
        assert_eq!(config.fingerprint.unwrap().port, 80);
        assert_eq!(config.telemetry.unwrap().port, 1883);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = parse(
            r#"
            [sensor]
            door_pin = 20
            indicator_pin = 21
            [monitor]
            poll_interval_ms = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("poll_interval_ms"));
    }

    #[test]
    fn rejects_oversized_threshold() {
        let err = parse(
            r#"
            [sensor]
            door_pin = 20
            indicator_pin = 21
            [monitor]
            open_threshold_minutes = 9223372036854775807
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "open_threshold_minutes is too large");
    }

    #[test]
    fn rejects_blank_twilio_fields() {
        let err = parse(
            r#"
            [sensor]
            door_pin = 20
            indicator_pin = 21
            [twilio]
            account_sid = "AC1"
            auth_token = " "
            to_number = "+1"
            from_number = "+2"
            "#,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "twilio.auth_token must not be empty");
    }

    #[test]
    fn rejects_shared_pin() {
        assert!(parse(
            r#"
            [sensor]
            door_pin = 20
            indicator_pin = 20
            "#,
        )
        .is_err());
    }
}
