//! Client for the Postfix SMTP access policy delegation protocol.
//!
//! The greylisting service (e.g. postgrey) expects `name=value` lines closed
//! by an empty line and answers with a single `action=...` line, again
//! followed by an empty line.

use crate::error::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;

/// The triplet (plus client name) a greylisting decision is made on.
#[derive(Debug, Clone, Copy)]
pub struct PolicyQuery<'a> {
    pub recipient: &'a str,
    pub sender: &'a str,
    pub client_address: &'a str,
    pub client_name: &'a str,
}

impl PolicyQuery<'_> {
    fn to_request(self) -> String {
        format!(
            "request=smtpd_access_policy\n\
             recipient={}\n\
             sender={}\n\
             client_address={}\n\
             client_name={}\n\
             \n",
            self.recipient, self.sender, self.client_address, self.client_name
        )
    }
}

/// Asks the policy service at `host:port` about `query`.
///
/// Returns the last non-empty answer line, trimmed. A fresh connection is
/// used for every query and nothing is retried.
pub async fn query(host: &str, port: u16, query: &PolicyQuery<'_>) -> Result<String, Error> {
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;

    let (reader, writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut writer = BufWriter::new(writer);

    writer.write_all(query.to_request().as_bytes()).await?;
    writer.flush().await?;

    let mut answer = None;
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            if answer.is_some() {
                break;
            }
            continue;
        }
        answer = Some(trimmed.to_string());
    }

    // Both halves are dropped here, closing the connection on every path.
    answer.ok_or(Error::EmptyPolicyResponse)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::PolicyServer;
    use rstest::*;
    use testresult::TestResult;

    const QUERY: PolicyQuery<'static> = PolicyQuery {
        recipient: "fred@test.com",
        sender: "bob@test.com",
        client_address: "168.100.189.2",
        client_name: "spike.porcupine.org",
    };

    #[test]
    fn test_request_format() {
        assert_eq!(
            QUERY.to_request(),
            "request=smtpd_access_policy\n\
             recipient=fred@test.com\n\
             sender=bob@test.com\n\
             client_address=168.100.189.2\n\
             client_name=spike.porcupine.org\n\
             \n"
        );
    }

    #[rstest]
    #[case::single("action=DEFER_IF_PERMIT\n\n", "action=DEFER_IF_PERMIT")]
    #[case::with_text(
        "action=DEFER_IF_PERMIT Greylisted, see this URL\n\n",
        "action=DEFER_IF_PERMIT Greylisted, see this URL"
    )]
    #[case::leading_blank("\naction=DUNNO\n\n", "action=DUNNO")]
    #[case::keeps_last("action=DUNNO\naction=PREPEND X-Greylist: yes\n\n", "action=PREPEND X-Greylist: yes")]
    #[case::crlf("action=DUNNO\r\n\r\n", "action=DUNNO")]
    #[case::no_terminator("action=DUNNO\n", "action=DUNNO")]
    #[tokio::test]
    async fn test_query(#[case] answer: &'static str, #[case] expected: &str) -> TestResult {
        let server = PolicyServer::start(answer).await?;

        let result = query("127.0.0.1", server.port(), &QUERY).await?;

        assert_eq!(result, expected);
        assert_eq!(server.queries(), 1);
        let requests = server.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests.first().map(String::as_str), Some(QUERY.to_request().as_str()));
        Ok(())
    }

    #[tokio::test]
    async fn test_empty_answer() -> TestResult {
        let server = PolicyServer::start("\n").await?;
        let result = query("127.0.0.1", server.port(), &QUERY).await;
        assert!(matches!(result, Err(Error::EmptyPolicyResponse)));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_refused() -> TestResult {
        let port = crate::testing::unused_port().await?;
        let result = query("127.0.0.1", port, &QUERY).await;
        assert!(matches!(result, Err(Error::Io(_))));
        Ok(())
    }
}
