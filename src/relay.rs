//! Delivery of accepted mail to the downstream relay.

use crate::config::RelayTarget;
use crate::greylist::Action;
use crate::smtp_server::Envelope;
use crate::utils::format_smtp_error;
use lettre::{AsyncSmtpTransport, AsyncTransport, Tokio1Executor};
use std::borrow::Cow;
use std::time::Duration;

/// Hands messages to the downstream MTA, one connection per message.
#[derive(Debug, Clone)]
pub struct Relay {
    target: Option<RelayTarget>,
    timeout: Duration,
}

impl Relay {
    /// A relay without a target accepts and drops every message.
    pub fn new(target: Option<RelayTarget>, timeout: Duration) -> Self {
        Self { target, timeout }
    }

    /// Carries out `action` for `envelope` and returns the reply for the sender.
    pub async fn deliver(&self, action: &Action, envelope: &Envelope) -> Result<String, String> {
        let data = match action {
            Action::Defer(reason) => {
                log::info!("Greylisting mail from {}: {}", envelope.mail_from, reason);
                return Err(format!("451 4.7.1 {reason}"));
            }
            Action::Prepend(header) => {
                log::debug!("Prepending header: {header}");
                Cow::Owned(prepend_header(header, &envelope.data))
            }
            Action::Pass => Cow::Borrowed(envelope.data.as_slice()),
        };

        self.send(envelope, &data).await?;
        Ok("250 Ok".to_string())
    }

    async fn send(&self, envelope: &Envelope, data: &[u8]) -> Result<(), String> {
        let Some(target) = &self.target else {
            log::debug!("Relay is None, dropping message!");
            return Ok(());
        };
        log::debug!("Relaying mail to {target}");

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(target.host.as_str())
            .port(target.port)
            .timeout(Some(self.timeout))
            .build();

        let envelope_data = lettre_envelope(envelope)?;

        // lettre ends DATA with CRLF.CRLF on its own, so the message's last
        // line break would otherwise show up as an extra empty line.
        let data = data.strip_suffix(b"\r\n").unwrap_or(data);

        mailer
            .send_raw(&envelope_data, data)
            .await
            .map_err(format_smtp_error)?;

        Ok(())
    }
}

/// Returns `header` and a line break followed by the original message.
fn prepend_header(header: &str, data: &[u8]) -> Vec<u8> {
    let mut prepended = Vec::with_capacity(header.len() + 2 + data.len());
    prepended.extend_from_slice(header.as_bytes());
    prepended.extend_from_slice(b"\r\n");
    prepended.extend_from_slice(data);
    prepended
}

fn lettre_envelope(envelope: &Envelope) -> Result<lettre::address::Envelope, String> {
    let mail_from = match envelope.mail_from.as_str() {
        "" => None,
        from => Some(
            from.parse()
                .map_err(|e| format!("553 5.1.3 Invalid from address <{from}>: {e}"))?,
        ),
    };
    let rcpt_to = envelope
        .rcpt_to
        .iter()
        .map(|addr| {
            addr.parse()
                .map_err(|e| format!("553 5.1.3 Invalid to address <{addr}>: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    lettre::address::Envelope::new(mail_from, rcpt_to)
        .map_err(|e| format!("554 5.5.1 Failed to create envelope: {e}"))
}
