//! Telemetry publishing over MoQ.
//!
//! Publishes every telemetry event as one JSON object on a `telemetry` track
//! under `<path>/state`, so a browser dashboard subscribed to the relay can
//! follow the arm live. The relay connection uses the IETF MoQ Transport
//! protocol over WebTransport.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use moq_transport::coding::TrackNamespace;
use moq_transport::serve::{StreamWriter, Tracks, TracksRequest, TracksWriter};
use moq_transport::session::Session;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::telemetry::TelemetryEvent;

/// Default relay.
pub const DEFAULT_RELAY: &str = "https://cdn.moq.dev";
/// Default base path on the relay.
pub const DEFAULT_PATH: &str = "anon/bionic-arm";
/// Name of the track carrying telemetry events.
pub const TELEMETRY_TRACK: &str = "telemetry";

fn quic_endpoint(insecure: bool) -> Result<quinn::Endpoint> {
    // Both ring and aws-lc-rs can end up in the tree; pin ring.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let mut tls = if insecure {
        rustls::ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify))
            .with_no_client_auth()
    } else {
        let mut roots = rustls::RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth()
    };
    tls.alpn_protocols = vec![web_transport_quinn::ALPN.to_vec()];

    let crypto: quinn::crypto::rustls::QuicClientConfig = tls.try_into()?;
    let mut config = quinn::ClientConfig::new(Arc::new(crypto));

    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(Duration::from_secs(10).try_into()?));
    transport.keep_alive_interval(Some(Duration::from_secs(4)));
    config.transport_config(Arc::new(transport));

    let mut endpoint = quinn::Endpoint::client("0.0.0.0:0".parse()?)?;
    endpoint.set_default_client_config(config);
    Ok(endpoint)
}

/// Accepts any server certificate. Only used with `--moq-insecure` against
/// local relays.
#[derive(Debug)]
struct NoVerify;

impl rustls::client::danger::ServerCertVerifier for NoVerify {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

/// Builder for a telemetry publisher.
pub struct TelemetryPublisherBuilder {
    relay_url: String,
    path: String,
    token: Option<String>,
    insecure: bool,
}

impl TelemetryPublisherBuilder {
    pub fn new() -> Self {
        Self {
            relay_url: DEFAULT_RELAY.to_string(),
            path: DEFAULT_PATH.to_string(),
            token: None,
            insecure: false,
        }
    }

    /// Set the relay URL
    pub fn relay(mut self, url: &str) -> Self {
        self.relay_url = url.trim_end_matches('/').to_string();
        self
    }

    /// Set the base path; events go to `<path>/state`
    pub fn path(mut self, path: &str) -> Self {
        self.path = path.trim_matches('/').to_string();
        self
    }

    /// Set authentication token (JWT)
    pub fn token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Skip TLS certificate verification
    pub fn disable_tls_verify(mut self) -> Self {
        self.insecure = true;
        self
    }

    fn state_path(&self) -> String {
        format!("{}/state", self.path)
    }

    fn url(&self) -> Result<Url> {
        let base = format!("{}/{}", self.relay_url, self.state_path());
        let url = match &self.token {
            Some(token) => format!("{}?token={}", base, token),
            None => base,
        };
        Ok(Url::parse(&url)?)
    }

    /// Connect to the relay and announce the telemetry track.
    pub async fn connect(self) -> Result<TelemetryPublisher> {
        let url = self.url()?;
        let endpoint = quic_endpoint(self.insecure)?;

        let wt = web_transport_quinn::connect(&endpoint, &url).await?;
        let (session, publisher, _subscriber) =
            Session::connect(web_transport::Session::from(wt), None).await?;

        // The session has to keep running for announces and object delivery.
        let session_task = tokio::spawn(async move {
            if let Err(e) = session.run().await {
                tracing::warn!("MoQ session ended: {}", e);
            }
        });

        let namespace = TrackNamespace::from_utf8_path(&self.state_path());
        let (mut tracks_writer, tracks_request, tracks_reader) = Tracks::new(namespace).produce();

        let mut publisher = publisher;
        let announce_task = tokio::spawn(async move {
            if let Err(e) = publisher.announce(tracks_reader).await {
                tracing::warn!("MoQ announce failed: {}", e);
            }
        });

        let stream = tracks_writer
            .create(TELEMETRY_TRACK)
            .ok_or_else(|| anyhow::anyhow!("MoQ tracks reader dropped"))?
            .stream(0)
            .map_err(|e| anyhow::anyhow!("MoQ track mode error: {}", e))?;

        tracing::info!("Publishing telemetry to {}/{}", self.state_path(), TELEMETRY_TRACK);

        Ok(TelemetryPublisher {
            stream,
            _tracks_writer: tracks_writer,
            _tracks_request: tracks_request,
            _session_task: session_task,
            _announce_task: announce_task,
        })
    }
}

impl Default for TelemetryPublisherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A live MoQ publication of telemetry events. Dropping it closes the session.
pub struct TelemetryPublisher {
    stream: StreamWriter,
    _tracks_writer: TracksWriter,
    _tracks_request: TracksRequest,
    _session_task: tokio::task::JoinHandle<()>,
    _announce_task: tokio::task::JoinHandle<()>,
}

impl TelemetryPublisher {
    /// Publish one event as a new group.
    pub fn publish(&mut self, event: &TelemetryEvent) -> Result<()> {
        let json = serde_json::to_vec(event)?;
        let mut group = self
            .stream
            .append()
            .map_err(|e| anyhow::anyhow!("MoQ append failed: {}", e))?;
        group
            .write(Bytes::from(json))
            .map_err(|e| anyhow::anyhow!("MoQ write failed: {}", e))?;
        Ok(())
    }

    /// Forward events from a telemetry channel until it closes, or until
    /// `cancel` fires with nothing left queued. Publish failures are logged
    /// and skipped.
    pub async fn forward(
        mut self,
        mut rx: mpsc::Receiver<TelemetryEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                biased;
                event = rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
                _ = cancel.cancelled() => break,
            };
            if let Err(e) = self.publish(&event) {
                tracing::warn!("Dropping {} event: {}", event.event_type, e);
            }
        }
        tracing::debug!("Telemetry forwarding stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url() {
        let builder = TelemetryPublisherBuilder::new()
            .relay("https://relay.example/")
            .path("/lab/arm1/")
            .token("abc");
        assert_eq!(
            builder.url().unwrap().as_str(),
            "https://relay.example/lab/arm1/state?token=abc"
        );
        assert_eq!(
            TelemetryPublisherBuilder::default().url().unwrap().as_str(),
            "https://cdn.moq.dev/anon/bionic-arm/state"
        );
    }
}
