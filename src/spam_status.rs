//! Reading the spam filter's verdict out of the message headers.
//!
//! SpamAssassin leaves its score in `X-Spam-Status` and, when the DCC plugin
//! is enabled, the bulk counts in `X-Spam-DCC`. Nothing past the header block
//! is ever looked at.

use regex::Regex;
use std::sync::LazyLock;

/// Spam score used when the message carries no `X-Spam-Status` header.
pub const DEFAULT_SPAM_SCORE: f64 = -999999.0;

/// Bulk score used when the message carries no usable `X-Spam-DCC` header.
pub const DEFAULT_BULK_SCORE: u64 = 0;

/// Bulk score standing in for DCC's `many`.
pub const BULK_SCORE_MANY: u64 = 999999;

static SPAM_STATUS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^X-Spam-Status: No, score=(\S+) .*$").expect("spam status pattern is valid")
});

// Every subfield either yields a count or `many`, or swallows a malformed
// token (such as a negative number) without capturing it.
static DCC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^X-Spam-DCC: .+?",
        r"(?:Body=(?:([0-9]+|many)|\S+?))?\s*",
        r"(?:Fuz1=(?:([0-9]+|many)|\S+?))?\s*",
        r"(?:Fuz2=(?:([0-9]+|many)|\S+?))?$",
    ))
    .expect("DCC pattern is valid")
});

/// Scores the upstream filter assigned to a message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpamStatus {
    pub spam: f64,
    pub bulk: u64,
}

impl Default for SpamStatus {
    fn default() -> Self {
        Self {
            spam: DEFAULT_SPAM_SCORE,
            bulk: DEFAULT_BULK_SCORE,
        }
    }
}

impl SpamStatus {
    /// Extracts the scores from the header block of a raw message.
    pub fn from_message(data: &[u8]) -> Self {
        let mut spam = None;
        let mut bulk = None;

        for line in byte_lines(data) {
            if line == b"\r\n" || line == b"\n" {
                log::debug!("End of headers");
                break;
            }

            let line = String::from_utf8_lossy(line);
            let line = line.trim_end_matches(['\r', '\n']);

            if spam.is_none()
                && let Some(score) = parse_spam_score(line)
            {
                log::debug!("Got spam score {score}");
                spam = Some(score);
                continue;
            }

            if let Some(score) = parse_bulk_score(line) {
                log::debug!("Got bulk score {score}");
                bulk = Some(bulk.map_or(score, |current: u64| current.max(score)));
            }

            if spam.is_some() && bulk.is_some() {
                break;
            }
        }

        let status = Self {
            spam: spam.unwrap_or(DEFAULT_SPAM_SCORE),
            bulk: bulk.unwrap_or(DEFAULT_BULK_SCORE),
        };
        log::debug!("Spam status: {status:?}");
        status
    }

    /// Whether both scores reach their thresholds.
    pub fn reaches(&self, spam_threshold: f64, bulk_threshold: u64) -> bool {
        self.spam >= spam_threshold && self.bulk >= bulk_threshold
    }
}

/// Splits `data` into lines, each keeping its trailing `\n`.
///
/// A final run of bytes without a newline is returned as the last line.
fn byte_lines(data: &[u8]) -> impl Iterator<Item = &[u8]> {
    data.split_inclusive(|&b| b == b'\n')
}

fn parse_spam_score(line: &str) -> Option<f64> {
    let captures = SPAM_STATUS_RE.captures(line)?;
    let raw = captures.get(1)?.as_str();
    match raw.parse() {
        Ok(score) => Some(score),
        Err(e) => {
            log::debug!("Ignoring unparsable spam score {raw:?}: {e}");
            None
        }
    }
}

/// Highest of the Body/Fuz1/Fuz2 counts on an `X-Spam-DCC` line.
fn parse_bulk_score(line: &str) -> Option<u64> {
    let captures = DCC_RE.captures(line)?;
    captures
        .iter()
        .skip(1)
        .flatten()
        .filter_map(|group| match group.as_str() {
            "many" => Some(BULK_SCORE_MANY),
            digits => digits.parse().ok(),
        })
        .max()
}
