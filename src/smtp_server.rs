//! A simplified SMTP server implementation for the receiving MTA to talk to.

use crate::error::Error;
use crate::utils::{extract_address, extract_reverse_path};
use crate::xforward::{self, ForwardInfo, XFORWARD_ATTRIBUTES};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Longest command line accepted, CRLF included.
const MAX_COMMAND_LINE: u64 = 4096;

/// Represents an SMTP envelope with sender, recipients, and raw message data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub data: Vec<u8>,
}

/// Trait defining the SMTP handler interface.
#[async_trait]
pub trait SmtpHandler: Send + Sync {
    /// Handles the XFORWARD command.
    fn handle_xforward(&self, fwd: &mut ForwardInfo, args: &str) -> Result<String, String> {
        xforward::handle_xforward(fwd, args)
    }

    /// Handles the RSET command.
    fn handle_rset(&self, fwd: &mut ForwardInfo) {
        log::debug!("Handle RSET, clearing forward info");
        fwd.clear();
    }

    /// Handles a completed DATA transaction and returns the final reply.
    async fn handle_data(&self, fwd: &ForwardInfo, envelope: &Envelope) -> Result<String, String>;
}

/// Runs the SMTP server on the specified address with the given handler and maximum message size.
pub async fn run_smtp_server<H>(addr: &str, handler: Arc<H>, max_size: usize) -> Result<(), Error>
where
    H: SmtpHandler + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve(listener, handler, max_size).await
}

/// Accepts connections on `listener` forever, one task per connection.
pub async fn serve<H>(listener: TcpListener, handler: Arc<H>, max_size: usize) -> Result<(), Error>
where
    H: SmtpHandler + 'static,
{
    log::info!("entering serving loop");

    loop {
        let (socket, peer) = listener.accept().await?;
        log::debug!("Connection from {peer}");
        let handler = handler.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, handler, max_size).await {
                log::error!("Error handling connection: {}", e);
            }
        });
    }
}

/// Handles an individual SMTP connection.
async fn handle_connection<H>(socket: TcpStream, handler: Arc<H>, max_size: usize) -> Result<(), Error>
where
    H: SmtpHandler,
{
    let (reader, mut writer) = socket.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    writer.write_all(b"220 greylistproxy SMTP\r\n").await?;

    let mut envelope = Envelope::default();
    let mut fwd = ForwardInfo::default();

    'connection: loop {
        line.clear();
        let n = (&mut reader).take(MAX_COMMAND_LINE).read_line(&mut line).await?;
        if n == 0 {
            break 'connection;
        }
        if n as u64 == MAX_COMMAND_LINE && !line.ends_with("\r\n") {
            log::warn!("Command line too long! Closing connection.");
            writer.write_all(b"500 Line too long\r\n").await?;
            break 'connection;
        }

        // Remove CRLF
        // Note: this will kill the connection if any line doesn't end with CRLF.
        // This is intentional as stray LF most likely means an attempt to exploit the server.
        let Some(cmd) = line.strip_suffix("\r\n") else {
            log::warn!("Malformed command without CRLF ending! Closing connection.");
            break 'connection;
        };

        log::debug!("Received: {}", cmd);
        let upper = cmd.to_uppercase();

        if upper.starts_with("EHLO") {
            writer
                .write_all(
                    format!(
                        "250-greylistproxy\r\n\
                         250-XFORWARD {XFORWARD_ATTRIBUTES}\r\n\
                         250-8BITMIME\r\n\
                         250 SIZE {max_size}\r\n"
                    )
                    .as_bytes(),
                )
                .await?;
        } else if upper.starts_with("HELO") {
            writer.write_all(b"250 OK\r\n").await?;
        } else if upper.starts_with("XFORWARD") {
            let args = cmd.split_once(' ').map(|(_, args)| args).unwrap_or_default();
            let reply = match handler.handle_xforward(&mut fwd, args) {
                Ok(reply) | Err(reply) => reply,
            };
            writer.write_all(format!("{}\r\n", reply).as_bytes()).await?;
        } else if upper.starts_with("MAIL FROM:") {
            if let Some(from) = extract_reverse_path(cmd) {
                envelope.mail_from = from;
                writer.write_all(b"250 OK\r\n").await?;
            } else {
                log::debug!("Invalid MAIL FROM command. Can't extract address.");
                writer
                    .write_all(b"500 Invalid address in MAIL FROM\r\n")
                    .await?;
            }
        } else if upper.starts_with("RCPT TO:") {
            if let Some(to) = extract_address(cmd) {
                envelope.rcpt_to.push(to);
                writer.write_all(b"250 OK\r\n").await?;
            } else {
                writer
                    .write_all(b"500 Invalid address in RCPT TO\r\n")
                    .await?;
            }
        } else if upper.starts_with("DATA") {
            if envelope.rcpt_to.is_empty() {
                writer.write_all(b"503 Need RCPT command\r\n").await?;
                continue 'connection;
            }
            writer
                .write_all(b"354 End data with <CR><LF>.<CR><LF>\r\n")
                .await?;
            let mut data = Vec::new();
            let mut data_line = Vec::new();
            'data_read: loop {
                data_line.clear();
                // Room for one stuffed dot and CRLF beyond what may still fit.
                let limit = u64::try_from(max_size.saturating_sub(data.len()))
                    .unwrap_or(u64::MAX)
                    .saturating_add(3);
                let n = (&mut reader)
                    .take(limit)
                    .read_until(b'\n', &mut data_line)
                    .await?;

                if data_line == b".\r\n" {
                    break 'data_read;
                }

                if n as u64 == limit && !data_line.ends_with(b"\r\n") {
                    writer
                        .write_all(b"552 Message exceeds maximum size\r\n")
                        .await?;
                    break 'connection;
                }

                if !data_line.ends_with(b"\r\n") {
                    log::warn!("Malformed DATA line without CRLF ending! Closing connection.");
                    break 'connection;
                }

                // Undo dot-stuffing.
                let unstuffed = match data_line.strip_prefix(b".") {
                    Some(rest) => rest,
                    None => data_line.as_slice(),
                };
                data.extend_from_slice(unstuffed);

                if data.len() > max_size {
                    writer
                        .write_all(b"552 Message exceeds maximum size\r\n")
                        .await?;
                    break 'connection;
                }
            }

            envelope.data = data;

            // Process the message
            let reply = match handler.handle_data(&fwd, &envelope).await {
                Ok(reply) | Err(reply) => reply,
            };
            log::debug!("Sent: {}", reply);
            writer.write_all(format!("{}\r\n", reply).as_bytes()).await?;

            envelope = Envelope::default();
        } else if upper.starts_with("QUIT") {
            writer.write_all(b"221 OK\r\n").await?;
            break 'connection;
        } else if upper.starts_with("RSET") {
            envelope = Envelope::default();
            handler.handle_rset(&mut fwd);
            writer.write_all(b"250 OK\r\n").await?;
        } else if upper.starts_with("NOOP") {
            writer.write_all(b"250 OK\r\n").await?;
        } else {
            writer.write_all(b"500 Command not recognized\r\n").await?;
        }
    }

    Ok(())
}
