//! Certificate fingerprint refresh and pinning.
//!
//! Instead of shipping a CA bundle or a fixed certificate, the notification
//! channel trusts whatever leaf certificate matches a SHA-1 fingerprint that
//! is published as a plain text page on a host we control. The page is
//! fetched over plain HTTP before every send.
//!
//! The fingerprint is picked out of the page heuristically: it is the last
//! line at least [`MIN_LINE_LEN`] bytes long. This matches the format of the
//! existing page (`AB:CD:...`, 20 pairs) and nothing else is validated until
//! the pin is used.

use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, SignatureScheme};
use sha1::{Digest, Sha1};

/// 20 hex pairs and 19 separators.
pub const MIN_LINE_LEN: usize = 59;

const SHA1_LEN: usize = 20;
const TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new<S: Into<String>>(token: S) -> Self {
        Fingerprint(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Decode the token into raw digest bytes. Pairs may be separated by
    /// colons or spaces.
    pub fn digest(&self) -> Result<[u8; SHA1_LEN], FingerprintError> {
        let hex_digits: String = self
            .0
            .chars()
            .filter(|c| !matches!(c, ':' | ' ' | '-'))
            .collect();
        let bytes = hex::decode(&hex_digits)
            .map_err(|err| FingerprintError::Malformed(format!("{}: {}", self.0, err)))?;
        <[u8; SHA1_LEN]>::try_from(bytes.as_slice()).map_err(|_| {
            FingerprintError::Malformed(format!(
                "{:?} is {} bytes, expected {}",
                self.0,
                bytes.len(),
                SHA1_LEN
            ))
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub enum FingerprintError {
    Fetch(String),
    Status(u16),
    Malformed(String),
    Tls(String),
}

impl fmt::Display for FingerprintError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintError::Fetch(msg) => write!(f, "unable to fetch fingerprint: {}", msg),
            FingerprintError::Status(status) => {
                write!(f, "fingerprint host responded with status {}", status)
            }
            FingerprintError::Malformed(msg) => write!(f, "malformed fingerprint {}", msg),
            FingerprintError::Tls(msg) => write!(f, "TLS configuration failed: {}", msg),
        }
    }
}

impl Error for FingerprintError {}

/// Where trust tokens come from.
pub trait TrustSource {
    fn refresh(&self) -> Result<Fingerprint, FingerprintError>;
}

pub struct FingerprintSource {
    url: String,
    agent: ureq::Agent,
}

impl FingerprintSource {
    pub fn new(host: &str, port: u16, path: &str) -> Self {
        let path = path.trim_start_matches('/');
        FingerprintSource {
            url: format!("http://{}:{}/{}", host, port, path),
            agent: ureq::AgentBuilder::new()
                .timeout_connect(TIMEOUT)
                .timeout_read(TIMEOUT)
                .build(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl TrustSource for FingerprintSource {
    fn refresh(&self) -> Result<Fingerprint, FingerprintError> {
        debug!("fetching fingerprint from {}", self.url);
        let body = match self.agent.get(&self.url).call() {
            Ok(response) => response
                .into_string()
                .map_err(|err| FingerprintError::Fetch(err.to_string()))?,
            Err(ureq::Error::Status(status, _)) => return Err(FingerprintError::Status(status)),
            Err(ureq::Error::Transport(transport)) => {
                return Err(FingerprintError::Fetch(transport.to_string()))
            }
        };

        let fingerprint = extract(&body);
        if fingerprint.is_empty() {
            warn!("no fingerprint line found in response from {}", self.url);
        }
        Ok(fingerprint)
    }
}

/// Pick the last line of `body` that is at least [`MIN_LINE_LEN`] bytes
/// long. Returns an empty fingerprint when there is none.
pub fn extract(body: &str) -> Fingerprint {
    body.lines()
        .filter(|line| line.len() >= MIN_LINE_LEN)
        .last()
        .map(|line| Fingerprint::new(line.trim()))
        .unwrap_or_default()
}

/// Build a TLS client configuration that accepts exactly the leaf certificate
/// matching `fingerprint`. Handshake signatures are still verified.
pub fn pinned_tls_config(fingerprint: &Fingerprint) -> Result<Arc<ClientConfig>, FingerprintError> {
    let expected = fingerprint.digest()?;
    let provider = Arc::new(crypto::ring::default_provider());
    let verifier = PinnedCertVerifier {
        expected,
        algorithms: provider.signature_verification_algorithms,
    };
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|err| FingerprintError::Tls(err.to_string()))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();
    Ok(Arc::new(config))
}

#[derive(Debug)]
struct PinnedCertVerifier {
    expected: [u8; SHA1_LEN],
    algorithms: WebPkiSupportedAlgorithms,
}

impl PinnedCertVerifier {
    fn matches(&self, certificate: &[u8]) -> bool {
        Sha1::digest(certificate).as_slice() == &self.expected[..]
    }
}

impl ServerCertVerifier for PinnedCertVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        if self.matches(end_entity.as_ref()) {
            Ok(ServerCertVerified::assertion())
        } else {
            Err(rustls::Error::General(String::from(
                "server certificate does not match pinned fingerprint",
            )))
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "DA:39:A3:EE:5E:6B:4B:0D:32:55:BF:EF:95:60:18:90:AF:D8:07:09";

    #[test]
    fn token_length_matches_threshold() {
        assert_eq!(TOKEN.len(), MIN_LINE_LEN);
    }

    #[test]
    fn last_long_line_wins() {
        let older = "00:11:22:33:44:55:66:77:88:99:AA:BB:CC:DD:EE:FF:00:11:22:33";
        let body = format!(
            "<html>\r\n<body>\r\n{}\r\nshort line\r\n{}\r\n</body>\r\n",
            older, TOKEN
        );
        assert_eq!(extract(&body).as_str(), TOKEN);
    }

    #[test]
    fn no_qualifying_line_is_empty() {
        let body = "<html>\n58 chars is not enough\nDA:39:A3:EE:5E:6B:4B:0D:32:55:BF:EF:95:60:18:90:AF:D8:07:0\n";
        assert!(extract(body).is_empty());
        assert!(extract("").is_empty());
    }

    #[test]
    fn digest_decodes_separated_pairs() {
        let digest = Fingerprint::new(TOKEN).digest().unwrap();
        assert_eq!(digest[0], 0xDA);
        assert_eq!(digest[19], 0x09);

        let spaced = TOKEN.replace(':', " ");
        assert_eq!(Fingerprint::new(spaced).digest().unwrap(), digest);
    }

    #[test]
    fn garbage_is_rejected_at_use() {
        assert!(matches!(
            Fingerprint::default().digest(),
            Err(FingerprintError::Malformed(_))
        ));
        assert!(matches!(
            Fingerprint::new("<p>this page has moved somewhere else entirely, sorry!</p>").digest(),
            Err(FingerprintError::Malformed(_))
        ));
    }

    #[test]
    fn verifier_matches_sha1_of_certificate() {
        // SHA-1 of the empty input
        let verifier = PinnedCertVerifier {
            expected: Fingerprint::new(TOKEN).digest().unwrap(),
            algorithms: crypto::ring::default_provider().signature_verification_algorithms,
        };
        assert!(verifier.matches(b""));
        assert!(!verifier.matches(b"certificate"));
    }

    #[test]
    fn pinned_config_requires_valid_token() {
        assert!(pinned_tls_config(&Fingerprint::new(TOKEN)).is_ok());
        assert!(pinned_tls_config(&Fingerprint::default()).is_err());
    }

    #[test]
    fn source_url() {
        let source = FingerprintSource::new("example.com", 80, "/fingerprint.txt");
        assert_eq!(source.url(), "http://example.com:80/fingerprint.txt");
    }
}
