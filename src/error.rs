//! Error types.

use std::time::Duration;

/// Error type for greylistproxy.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Proxy config is invalid: {0}")]
    Config(#[from] serini::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Policy service closed the connection without an answer")]
    EmptyPolicyResponse,
    #[error("Policy service did not answer within {0:?}")]
    PolicyTimeout(Duration),
    #[error("Policy service sent PREPEND without a header")]
    MissingPrependHeader,
    #[error("XFORWARD attribute {0} was not set for this session")]
    MissingForwardInfo(&'static str),
    #[error("Envelope has no recipients")]
    NoRecipients,
    #[error("Invalid XFORWARD argument: {0}")]
    InvalidXforward(String),
}
