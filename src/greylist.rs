//! Deciding whether a message gets greylisted.
//!
//! Only messages the spam filter scored at or above both thresholds are put
//! before the policy service. Its answer is turned into an [`Action`] which
//! the [`Relay`] then carries out.

use crate::config::Config;
use crate::error::Error;
use crate::policy_client::{self, PolicyQuery};
use crate::relay::Relay;
use crate::smtp_server::{Envelope, SmtpHandler};
use crate::spam_status::SpamStatus;
use crate::xforward::ForwardInfo;
use async_trait::async_trait;
use std::sync::Arc;

/// Reason given when the policy service defers without saying why.
pub const DEFAULT_DEFER_REASON: &str = "Greylisted";

/// What to do with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Relay unchanged.
    Pass,
    /// Refuse temporarily with the given reason.
    Defer(String),
    /// Relay with the given header line in front.
    Prepend(String),
}

/// Maps a raw `action=<TOKEN>[ <text>]` answer to an [`Action`].
pub fn interpret_response(response: &str) -> Result<Action, Error> {
    let (token, text) = match response.split_once(' ') {
        Some((token, text)) => (token, Some(text)),
        None => (response, None),
    };

    if token.ends_with("DEFER_IF_PERMIT") {
        let reason = text
            .filter(|text| !text.trim().is_empty())
            .unwrap_or(DEFAULT_DEFER_REASON);
        Ok(Action::Defer(reason.to_string()))
    } else if token.ends_with("PREPEND") {
        text.filter(|text| !text.trim().is_empty())
            .map(|header| Action::Prepend(header.to_string()))
            .ok_or(Error::MissingPrependHeader)
    } else {
        Ok(Action::Pass)
    }
}

/// Handler greylisting suspicious mail before relaying it.
#[derive(Debug)]
pub struct GreylistHandler {
    config: Arc<Config>,
    relay: Relay,
}

impl GreylistHandler {
    pub fn new(config: Config) -> Self {
        let relay = Relay::new(config.relay.clone(), config.relay_timeout());
        Self {
            config: Arc::new(config),
            relay,
        }
    }

    /// Decides what happens to `envelope`. Never fails: any trouble with the
    /// policy service lets the message pass.
    pub async fn decide(&self, fwd: &ForwardInfo, envelope: &Envelope) -> Action {
        let status = SpamStatus::from_message(&envelope.data);

        if !status.reaches(self.config.spam_threshold, self.config.bulk_threshold) {
            log::debug!(
                "Spam score ({}) or bulk score ({}) below threshold, not greylisting",
                status.spam,
                status.bulk
            );
            return Action::Pass;
        }

        log::debug!(
            "Spam score ({}) and bulk score ({}) conditions met, checking greylist",
            status.spam,
            status.bulk
        );
        match self.check_greylist(fwd, envelope).await {
            Ok(action) => action,
            Err(e) => {
                log::warn!("Problem while checking with greylisting server: {e}");
                Action::Pass
            }
        }
    }

    async fn check_greylist(&self, fwd: &ForwardInfo, envelope: &Envelope) -> Result<Action, Error> {
        let query = PolicyQuery {
            recipient: envelope.rcpt_to.first().ok_or(Error::NoRecipients)?,
            sender: &envelope.mail_from,
            client_address: fwd.client_address()?,
            client_name: fwd.client_name()?,
        };

        let timeout = self.config.policy_timeout();
        let response = tokio::time::timeout(
            timeout,
            policy_client::query(&self.config.policy_host, self.config.policy_port, &query),
        )
        .await
        .map_err(|_| Error::PolicyTimeout(timeout))??;
        log::debug!("greylist result: {response}");

        interpret_response(&response)
    }
}

#[async_trait]
impl SmtpHandler for GreylistHandler {
    async fn handle_data(&self, fwd: &ForwardInfo, envelope: &Envelope) -> Result<String, String> {
        log::info!(
            "Processing message from <{}> via {}[{}] (helo={}, proto={})",
            envelope.mail_from,
            fwd.name.as_deref().unwrap_or("unknown"),
            fwd.addr.as_deref().unwrap_or("unknown"),
            fwd.helo.as_deref().unwrap_or("unknown"),
            fwd.proto.as_deref().unwrap_or("unknown"),
        );
        let action = self.decide(fwd, envelope).await;
        log::debug!("Decision: {action:?}");
        self.relay.deliver(&action, envelope).await
    }
}
