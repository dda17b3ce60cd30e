use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use anyhow::{anyhow, Context};
use clap::Parser;
use log::{error, info, LevelFilter};
use rppal::gpio::{Gpio, InputPin, OutputPin};
use syslog::Facility;

use garage_guardian::alert::{Dispatcher, Recipient};
use garage_guardian::config::{self, Config, RawConfig};
use garage_guardian::fingerprint::FingerprintSource;
use garage_guardian::monitor::Monitor;
use garage_guardian::notify::LogNotifier;
use garage_guardian::sampler::Sampler;
use garage_guardian::telemetry::{MqttTelemetry, Telemetry};
use garage_guardian::twilio::TwilioNotifier;
use garage_guardian::{http, OpenLevel};

#[derive(Parser, Debug)]
#[command(about, version)]
struct Args {
    /// Path to config file
    #[arg(short, long, default_value = config::DEFAULT_PATH)]
    config: PathBuf,

    /// Minimum level sent to syslog (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<LevelFilter>()
        .map_err(|_| anyhow!("invalid log level: {}", args.log_level))?;
    if let Err(err) = syslog::init(Facility::LOG_DAEMON, level, Some("garage-guardian")) {
        eprintln!("Unable to connect to syslog, continuing without logging: {}", err);
    }

    let raw_config = match RawConfig::load(&args.config) {
        Ok(val) => val,
        Err(err) => {
            eprintln!("Error: Failed to load config: {:#}", err);
            eprintln!();
            eprintln!(
                "Example config:\n\n{}",
                toml::to_string(&RawConfig::example())?
            );
            return Err(err);
        }
    };
    let config = Config::try_from(raw_config)?;

    let term = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&term))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&term))?;

    let (door, led) = setup_gpio(&config).context("Unable to set up GPIO")?;
    let sampler = Sampler::new(door, led, config.sampler);
    let dispatcher = build_dispatcher(&config);
    let telemetry = config
        .telemetry
        .as_ref()
        .map(|settings| Box::new(MqttTelemetry::connect(settings)) as Box<dyn Telemetry>);

    let mut monitor = Monitor::start(sampler, dispatcher, telemetry, config.monitor, Instant::now());

    let mut server = None;
    let mut threads = Vec::new();
    if let Some(addr) = config.http {
        match http::Server::new(addr) {
            Ok(http_server) => {
                info!("http server running on {}", addr);
                let http_server = Arc::new(http_server);
                let status = monitor.status();
                let term = Arc::clone(&term);
                let handle = Arc::clone(&http_server);
                threads.push(thread::spawn(move || handle.handle_requests(status, term)));
                server = Some(http_server);
            }
            // The status page is a convenience, alerts still work without it.
            Err(err) => error!("Unable to start http server on {}: {}", addr, err),
        }
    }

    let result = monitor.run(&term);

    term.store(true, Ordering::SeqCst);
    if let Some(server) = server {
        server.shutdown();
    }
    for thread in threads {
        let _ = thread.join();
    }

    result.map_err(|err| {
        error!("{}", err);
        anyhow::Error::from(err)
    })
}

fn build_dispatcher(config: &Config) -> Dispatcher {
    let dispatcher = match &config.twilio {
        Some(account) => Dispatcher::new(
            Box::new(TwilioNotifier::new(&account.account_sid, &account.auth_token)),
            account.recipient.clone(),
        ),
        None => {
            info!("no twilio account configured, alerts will only be logged");
            Dispatcher::new(Box::new(LogNotifier), Recipient::default())
        }
    };

    match &config.fingerprint {
        Some(host) => {
            let source = FingerprintSource::new(&host.host, host.port, &host.path);
            info!("pinning alert channel to fingerprint from {}", source.url());
            dispatcher.with_trust_source(Box::new(source))
        }
        None => dispatcher,
    }
}

fn setup_gpio(config: &Config) -> rppal::gpio::Result<(InputPin, OutputPin)> {
    let gpio = Gpio::new()?;
    let door_pin = gpio.get(config.door_pin)?;
    // Pull the input towards "closed" so a disconnected switch reads as closed.
    let door_pin = match config.sampler.open_level {
        OpenLevel::High => door_pin.into_input_pulldown(),
        OpenLevel::Low => door_pin.into_input_pullup(),
    };
    let led_pin = gpio.get(config.indicator_pin)?.into_output();
    Ok((door_pin, led_pin))
}
