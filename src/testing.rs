//! In-process stand-ins for the policy service and the downstream relay.

use crate::config::{Config, RelayTarget};
use crate::smtp_server::{Envelope, SmtpHandler, serve};
use crate::xforward::ForwardInfo;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// Returns a local port nothing is listening on.
pub async fn unused_port() -> io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    Ok(listener.local_addr()?.port())
}

/// Proxy config pointing at a local policy service and the given relay.
pub fn config(policy_port: u16, relay: &str) -> Config {
    let content = format!(
        "[proxy]\n\
         relay = {relay}\n\
         spam_threshold = 1.0\n\
         bulk_threshold = 2\n\
         policy_host = 127.0.0.1\n\
         policy_port = {policy_port}\n\
         policy_timeout = 1\n\
         relay_timeout = 10\n"
    );
    Config::parse(&content).expect("test config is valid")
}

/// Policy service that gives the same answer to every query.
#[derive(Debug)]
pub struct PolicyServer {
    port: u16,
    queries: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl PolicyServer {
    pub async fn start(answer: &'static str) -> io::Result<Self> {
        Self::spawn(Some(answer)).await
    }

    /// Reads queries but never answers them.
    pub async fn silent() -> io::Result<Self> {
        Self::spawn(None).await
    }

    async fn spawn(answer: Option<&'static str>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = Self {
            port: listener.local_addr()?.port(),
            queries: Arc::default(),
            requests: Arc::default(),
        };
        let queries = server.queries.clone();
        let requests = server.requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                queries.fetch_add(1, Ordering::SeqCst);
                let requests = requests.clone();
                tokio::spawn(async move {
                    let _ = answer_query(stream, answer, requests).await;
                });
            }
        });
        Ok(server)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of connections accepted so far.
    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Raw text of every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

async fn answer_query(
    stream: TcpStream,
    answer: Option<&str>,
    requests: Arc<Mutex<Vec<String>>>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut request = String::new();
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        request.push_str(&line);
        if line == "\n" {
            break;
        }
    }
    if let Ok(mut requests) = requests.lock() {
        requests.push(request);
    }

    match answer {
        Some(answer) => {
            writer.write_all(answer.as_bytes()).await?;
            writer.shutdown().await
        }
        None => {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }
}

/// Records accepted messages and answers DATA with a fixed reply.
struct RecordingHandler {
    received: Arc<Mutex<Vec<Envelope>>>,
    reply: Result<String, String>,
}

#[async_trait]
impl SmtpHandler for RecordingHandler {
    async fn handle_data(&self, _fwd: &ForwardInfo, envelope: &Envelope) -> Result<String, String> {
        if self.reply.is_ok()
            && let Ok(mut received) = self.received.lock()
        {
            received.push(envelope.clone());
        }
        self.reply.clone()
    }
}

/// Downstream relay built on the proxy's own SMTP server.
#[derive(Debug)]
pub struct RelayServer {
    port: u16,
    received: Arc<Mutex<Vec<Envelope>>>,
}

impl RelayServer {
    pub async fn start() -> io::Result<Self> {
        Self::spawn(Ok("250 OK".to_string())).await
    }

    /// Relay that refuses every message with `reply`.
    pub async fn rejecting(reply: &str) -> io::Result<Self> {
        Self::spawn(Err(reply.to_string())).await
    }

    async fn spawn(reply: Result<String, String>) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let server = Self {
            port: listener.local_addr()?.port(),
            received: Arc::default(),
        };
        let handler = Arc::new(RecordingHandler {
            received: server.received.clone(),
            reply,
        });
        tokio::spawn(async move {
            let _ = serve(listener, handler, 1024 * 1024).await;
        });
        Ok(server)
    }

    pub fn target(&self) -> RelayTarget {
        RelayTarget {
            host: "127.0.0.1".to_string(),
            port: self.port,
        }
    }

    /// Messages accepted so far.
    pub fn received(&self) -> Vec<Envelope> {
        self.received.lock().map(|r| r.clone()).unwrap_or_default()
    }
}
