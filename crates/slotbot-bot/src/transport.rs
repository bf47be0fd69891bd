//! Chat transport boundary.
//!
//! The dispatcher only sees [`InboundEvent`]s on a channel and a [`Transport`]
//! to send replies through. [`StdioTransport`] is the local line-oriented
//! implementation: each stdin line is `"<chat_id> <text>"`, or bare text for
//! the configured local chat.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    pub requester_id: i64,
    pub chat_id: i64,
    /// Sender handle, when the transport knows one.
    pub username: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub chat_id: i64,
    pub text: String,
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, reply: Reply) -> Result<(), TransportError>;
}

/// Parses one input line. Blank lines yield nothing.
pub fn parse_line(line: &str, local_chat_id: i64) -> Option<InboundEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let (chat_id, text) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => match head.parse::<i64>() {
            Ok(id) => (id, rest.trim()),
            Err(_) => (local_chat_id, line),
        },
        None => (local_chat_id, line),
    };
    if text.is_empty() {
        return None;
    }

    // Private chats: the chat is the requester.
    Some(InboundEvent {
        requester_id: chat_id,
        chat_id,
        username: None,
        text: text.to_string(),
    })
}

pub struct StdioTransport {
    out: Mutex<tokio::io::Stdout>,
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }

    /// Feeds stdin lines into `events` until EOF, shutdown, or the receiver
    /// goes away. Dropping the sender on exit closes the channel.
    pub fn spawn_reader(
        local_chat_id: i64,
        events: mpsc::Sender<InboundEvent>,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            loop {
                let line = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    line = lines.next_line() => line,
                };
                match line {
                    Ok(Some(line)) => {
                        let Some(event) = parse_line(&line, local_chat_id) else {
                            continue;
                        };
                        debug!(chat_id = event.chat_id, "stdin event");
                        if events.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed");
                        break;
                    }
                    Err(e) => {
                        warn!("Failed to read stdin: {}", e);
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn send(&self, reply: Reply) -> Result<(), TransportError> {
        let mut out = self.out.lock().await;
        for line in reply.text.lines() {
            out.write_all(format!("[{}] {}\n", reply.chat_id, line).as_bytes())
                .await?;
        }
        out.flush().await?;
        Ok(())
    }
}
