//! TCP client: dial, login, run commands, close.
//!
//! One client owns one connection, and `run` takes `&mut self`, so command
//! interleaving on a single connection is impossible by construction. The
//! pooling layer above decides how many connections a router gets.

use std::time::Duration;

use tokio::io::{AsyncWriteExt, BufStream};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::reply::{Reply, Row};
use crate::sentence::Sentence;
use crate::word::{read_sentence, write_sentence};
use crate::ProtoError;

/// Dial parameters. The connect timeout is the caller's to choose (the
/// control plane uses tiered timeouts); the read timeout bounds every reply
/// sentence once the connection is up.
#[derive(Debug, Clone)]
pub struct DialConfig {
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(8),
            read_timeout: Duration::from_secs(15),
        }
    }
}

/// A logged-in management connection to one router.
pub struct Client {
    stream: Option<BufStream<TcpStream>>,
    read_timeout: Duration,
    peer: String,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("peer", &self.peer)
            .field("open", &self.stream.is_some())
            .finish()
    }
}

impl Client {
    /// Open a TCP connection, perform the login handshake and return a
    /// ready client.
    pub async fn dial(
        host: &str,
        port: u16,
        user: &str,
        secret: &str,
        config: DialConfig,
    ) -> Result<Self, ProtoError> {
        let addr = format!("{host}:{port}");
        let stream = timeout(config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ProtoError::ConnectTimeout {
                addr: addr.clone(),
                seconds: config.connect_timeout.as_secs(),
            })??;
        stream.set_nodelay(true)?;

        let mut client = Self {
            stream: Some(BufStream::new(stream)),
            read_timeout: config.read_timeout,
            peer: addr,
        };
        client.login(user, secret).await?;
        debug!(peer = %client.peer, "logged in");
        Ok(client)
    }

    /// Plain login (`/login` with name and password). Routers running the
    /// pre-6.43 challenge scheme answer with `=ret=`; that scheme is not
    /// spoken here and is reported as a rejection.
    async fn login(&mut self, user: &str, secret: &str) -> Result<(), ProtoError> {
        let sentence = Sentence::command("/login")
            .attribute("name", user)
            .attribute("password", secret);
        let reply = self.run_inner(sentence.words()).await.map_err(|e| match e {
            ProtoError::Trap { message } => ProtoError::LoginRejected(message),
            other => other,
        })?;
        if reply.done_ret.is_some() {
            return Err(ProtoError::LoginRejected(
                "device requested legacy challenge login".to_string(),
            ));
        }
        Ok(())
    }

    /// Send one sentence and collect the full reply.
    pub async fn run(&mut self, sentence: &Sentence) -> Result<Reply, ProtoError> {
        trace!(peer = %self.peer, command = sentence.path(), "run");
        self.run_inner(sentence.words()).await
    }

    async fn run_inner(&mut self, words: &[String]) -> Result<Reply, ProtoError> {
        let read_timeout = self.read_timeout;
        let mut stream = self.stream.take().ok_or(ProtoError::Closed)?;
        let result = Self::exchange(&mut stream, words, read_timeout).await;
        // A trap leaves the stream drained through !done and reusable; any
        // other failure leaves it in an unknown state, so it is dropped.
        if matches!(&result, Ok(_) | Err(ProtoError::Trap { .. })) {
            self.stream = Some(stream);
        }
        result
    }

    async fn exchange(
        stream: &mut BufStream<TcpStream>,
        words: &[String],
        read_timeout: Duration,
    ) -> Result<Reply, ProtoError> {
        write_sentence(stream, words).await?;

        let mut reply = Reply::default();
        let mut trap: Option<String> = None;
        loop {
            let sentence = timeout(read_timeout, read_sentence(stream))
                .await
                .map_err(|_| ProtoError::ReadTimeout {
                    seconds: read_timeout.as_secs(),
                })??;
            let Some(kind) = sentence.first() else {
                // Empty sentence: keepalive, ignore.
                continue;
            };
            match kind.as_str() {
                "!re" => reply.rows.push(Row::from_words(&sentence)),
                "!done" => {
                    let row = Row::from_words(&sentence);
                    if row.contains("ret") {
                        reply.done_ret = Some(row.get("ret").to_string());
                    }
                    return match trap {
                        Some(message) => Err(ProtoError::Trap { message }),
                        None => Ok(reply),
                    };
                }
                "!trap" => {
                    let row = Row::from_words(&sentence);
                    let message = if row.get("message").is_empty() {
                        "unspecified trap".to_string()
                    } else {
                        row.get("message").to_string()
                    };
                    // The device still sends !done after a trap; keep
                    // draining so the stream stays in sync.
                    trap.get_or_insert(message);
                }
                "!fatal" => {
                    let message = sentence.get(1).cloned().unwrap_or_default();
                    return Err(ProtoError::Fatal(message));
                }
                other => {
                    return Err(ProtoError::Fatal(format!("unexpected reply word {other}")));
                }
            }
        }
    }

    /// Tear the connection down. Safe to call more than once.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
            debug!(peer = %self.peer, "closed");
        }
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}
