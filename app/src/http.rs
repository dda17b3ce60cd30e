//! Health check page.
//!
//! Every request, whatever its path, gets the same small HTML page showing
//! whether the door is open or closed. Requests are answered one at a time
//! from a single thread.

use std::error::Error;
use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tiny_http::{Header, Response};

use crate::{term_on_err, Snapshot};

const HTML: &str = include_str!("home.html");
const RECV_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Server(tiny_http::Server);

impl Server {
    pub fn new<A>(addr: A) -> Result<Server, Box<dyn Error + Send + Sync + 'static>>
    where
        A: ToSocketAddrs,
    {
        tiny_http::Server::http(addr).map(Server)
    }

    /// Serve until `term` is set or the listener fails.
    pub fn handle_requests(&self, status: Arc<RwLock<Snapshot>>, term: Arc<AtomicBool>) {
        let html_content = Header::from_bytes(&b"Content-Type"[..], &b"text/html; charset=utf-8"[..]);
        while !term.load(Ordering::Relaxed) {
            let request = match self.0.recv_timeout(RECV_TIMEOUT) {
                Ok(Some(request)) => request,
                Ok(None) => continue,
                Err(err) => {
                    warn!("http server stopped accepting requests: {}", err);
                    break;
                }
            };
            debug!("{} {}", request.method(), request.url());

            let snapshot = { *term_on_err!(status.read(), term) };
            let mut response = Response::from_string(render(&snapshot, Instant::now()));
            if let Ok(header) = html_content.clone() {
                response = response.with_header(header);
            }

            // Ignoring I/O errors that occur here so that we don't take down the process if there
            // is an issue sending the response.
            let _ = request.respond(response);
        }
        info!("http server exiting");
    }

    pub fn shutdown(&self) {
        self.0.unblock();
    }
}

/// Fill in the status page for `snapshot`.
pub fn render(snapshot: &Snapshot, now: Instant) -> String {
    let duration = now.saturating_duration_since(snapshot.since);
    let formatter = timeago::Formatter::new();
    let mut detail = format!("Since {}.", formatter.convert(duration));
    if snapshot.alarm_sent {
        detail.push_str(" An open alert has been sent.");
    }
    HTML.replace("$doorstate$", &snapshot.door_state.to_string())
        .replace("$detail$", &detail)
}
