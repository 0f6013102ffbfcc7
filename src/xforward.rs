//! Postfix XFORWARD support.
//!
//! The receiving MTA is the only peer the proxy talks to, so it passes the
//! real client's identity along with `XFORWARD NAME=.. ADDR=.. PROTO=.. HELO=..`.

use crate::error::Error;

/// Attributes advertised in the EHLO response.
pub const XFORWARD_ATTRIBUTES: &str = "NAME ADDR PROTO HELO";

const SYNTAX_ERROR_501: &str = "501 Syntax error";

/// Client identity forwarded by the upstream MTA for the current session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForwardInfo {
    pub name: Option<String>,
    pub addr: Option<String>,
    pub proto: Option<String>,
    pub helo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attribute {
    Name,
    Addr,
    Proto,
    Helo,
}

impl Attribute {
    fn from_key(key: &str) -> Option<Self> {
        match key {
            "NAME" => Some(Self::Name),
            "ADDR" => Some(Self::Addr),
            "PROTO" => Some(Self::Proto),
            "HELO" => Some(Self::Helo),
            _ => None,
        }
    }
}

impl ForwardInfo {
    /// Merges the attributes of an XFORWARD command into the session.
    ///
    /// Either every `KEY=VALUE` pair is valid and applied, or nothing changes.
    pub fn update(&mut self, args: &str) -> Result<(), Error> {
        let parsed = parse_args(args)?;
        for (attribute, value) in parsed {
            let slot = match attribute {
                Attribute::Name => &mut self.name,
                Attribute::Addr => &mut self.addr,
                Attribute::Proto => &mut self.proto,
                Attribute::Helo => &mut self.helo,
            };
            *slot = Some(value.to_string());
        }
        Ok(())
    }

    /// Forgets everything, as on RSET.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Forwarded client IP address, required for a policy query.
    pub fn client_address(&self) -> Result<&str, Error> {
        self.addr.as_deref().ok_or(Error::MissingForwardInfo("ADDR"))
    }

    /// Forwarded client hostname, required for a policy query.
    pub fn client_name(&self) -> Result<&str, Error> {
        self.name.as_deref().ok_or(Error::MissingForwardInfo("NAME"))
    }
}

fn parse_args(args: &str) -> Result<Vec<(Attribute, &str)>, Error> {
    let mut parsed = Vec::new();
    for token in args.split_whitespace() {
        let (key, value) = token
            .split_once('=')
            .ok_or_else(|| Error::InvalidXforward(token.to_string()))?;
        let attribute =
            Attribute::from_key(key).ok_or_else(|| Error::InvalidXforward(key.to_string()))?;
        parsed.push((attribute, value));
    }
    if parsed.is_empty() {
        return Err(Error::InvalidXforward(args.to_string()));
    }
    Ok(parsed)
}

/// Handles `XFORWARD <args>` and returns the reply for the client.
pub fn handle_xforward(fwd: &mut ForwardInfo, args: &str) -> Result<String, String> {
    log::debug!("XFORWARD: {args}");
    match fwd.update(args) {
        Ok(()) => {
            log::debug!("Forward info now: {fwd:?}");
            Ok("250 Ok".to_string())
        }
        Err(e) => {
            log::error!("Client sent invalid XFORWARD arguments: {e}");
            Err(SYNTAX_ERROR_501.to_string())
        }
    }
}
