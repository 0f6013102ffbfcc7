use mailparse::MailAddr;

/// Reply sent when the relay could not be reached or failed without an SMTP status.
pub const TEMPORARY_FAILURE_451: &str = "451 4.3.0 Could not process your message";

/// Extracts the first email address found in SMTP command or email header.
///
/// Return `None` if parsing fails.
///
/// Returns the first address if multiple are present. The address keeps its case.
pub fn extract_address(input: &str) -> Option<String> {
    let mut trimmed = strip_prefix_ignore_case(input, "mail from:")
        .or_else(|| strip_prefix_ignore_case(input, "rcpt to:"))
        .unwrap_or(input);

    let addr_end = trimmed.find('>').unwrap_or(trimmed.len().saturating_sub(1));
    trimmed = trimmed
        .split_at_checked(addr_end + 1)
        .map(|(address_raw, _)| address_raw)
        .unwrap_or(trimmed);

    mailparse::addrparse(trimmed)
        .ok()
        .and_then(|addr| match addr.first() {
            Some(MailAddr::Single(single)) => Some(single.addr.clone()),
            Some(MailAddr::Group(group)) => group.addrs.first().map(|single| single.addr.clone()),
            None => None,
        })
}

fn strip_prefix_ignore_case<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    let head = input.get(..prefix.len())?;
    if !head.eq_ignore_ascii_case(prefix) {
        return None;
    }
    input.get(prefix.len()..)
}

/// Like [`extract_address`], but maps the null reverse path `<>` to an empty string.
pub fn extract_reverse_path(input: &str) -> Option<String> {
    let path = input
        .split_once(':')
        .map(|(_, path)| path)
        .unwrap_or(input)
        .trim_start();
    if path.starts_with("<>") {
        return Some(String::new());
    }
    extract_address(input)
}

/// Turns a relay delivery error into the reply for the original sender.
///
/// SMTP rejections are passed on verbatim; everything else becomes a
/// temporary failure so the sender retries.
pub fn format_smtp_error(e: lettre::transport::smtp::Error) -> String {
    match e.status() {
        Some(code) => {
            let text = std::error::Error::source(&e)
                .map(|source| source.to_string())
                .unwrap_or_default();
            log::warn!("Relay rejected mail: {e}");
            format!("{code} {text}").trim_end().to_string()
        }
        None => {
            log::error!("Failed to relay mail: {e:?}");
            TEMPORARY_FAILURE_451.to_string()
        }
    }
}
