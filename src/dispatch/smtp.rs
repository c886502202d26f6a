//! SMTP relay transport built on `lettre`.

use std::time::Duration;

use lettre::address::Envelope;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Address, SmtpTransport, Transport};
use tracing::info;

use crate::config::{RelayConfig, TlsMode};
use crate::error::{RelayError, Result};
use crate::model::message::OutboundMessage;

use super::render::RenderedMessage;
use super::RelayTransport;

/// Relays rendered messages to a smart host.
///
/// The envelope may be rewritten (`envelope_from`, `forward_to`); the
/// message bytes never are.
pub struct SmtpRelay {
    transport: SmtpTransport,
    envelope_from: Option<Address>,
    forward_to: Vec<Address>,
}

impl SmtpRelay {
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let host = config
            .host
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
            .ok_or_else(|| RelayError::Config("relay host is not set".into()))?;

        let builder = match config.tls {
            TlsMode::Starttls => SmtpTransport::starttls_relay(host),
            TlsMode::Wrapper => SmtpTransport::relay(host),
            TlsMode::None => Ok(SmtpTransport::builder_dangerous(host)),
        }
        .map_err(|e| RelayError::Config(format!("relay host '{host}': {e}")))?;

        let mut builder = builder
            .port(config.port)
            .timeout(Some(Duration::from_secs(config.timeout_secs)));
        if let (Some(user), Some(pass)) = (&config.username, &config.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        let envelope_from = config
            .envelope_from
            .as_deref()
            .map(parse_address)
            .transpose()?;
        let forward_to = config
            .forward_to
            .iter()
            .map(|a| parse_address(a))
            .collect::<Result<Vec<_>>>()?;

        info!(host, port = config.port, tls = ?config.tls, "Configured SMTP relay");
        Ok(Self {
            transport: builder.build(),
            envelope_from,
            forward_to,
        })
    }

    /// Apply the configured rewrites to the envelope derived from the headers.
    fn envelope_for(&self, rendered: &RenderedMessage) -> Result<Envelope> {
        rewrite_envelope(&rendered.envelope, self.envelope_from.as_ref(), &self.forward_to)
    }
}

impl RelayTransport for SmtpRelay {
    fn send(&self, message: &OutboundMessage, rendered: &RenderedMessage) -> Result<()> {
        let envelope = self.envelope_for(rendered)?;
        self.transport
            .send_raw(&envelope, &rendered.bytes)
            .map_err(|e| RelayError::Transport(format!("'{}': {e}", message.subject)))?;
        info!(
            subject = %message.subject,
            recipients = envelope.to().len(),
            bytes = rendered.len(),
            "Relayed message"
        );
        Ok(())
    }
}

fn rewrite_envelope(
    original: &Envelope,
    from: Option<&Address>,
    to: &[Address],
) -> Result<Envelope> {
    let from = from.cloned().or_else(|| original.from().cloned());
    let to = if to.is_empty() {
        original.to().to_vec()
    } else {
        to.to_vec()
    };
    Envelope::new(from, to).map_err(|e| RelayError::Transport(format!("envelope: {e}")))
}

fn parse_address(raw: &str) -> Result<Address> {
    raw.trim()
        .parse()
        .map_err(|e| RelayError::Config(format!("address '{raw}': {e}")))
}
