//! TCP link from a gun to the server, reconnecting with backoff

use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::framing::{encode_line, LineBuffer};
use crate::client::{ClientMsgHandler, ReconnectPolicy};
use crate::protocol::message::HELLO;
use crate::protocol::{Envelope, ProtocolError};
use crate::util::time::Clock;

/// Why a session with the server ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// We were told to stop
    Shutdown,
    /// The socket closed, failed or the server spoke nonsense
    Lost,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientLinkError {
    #[error("Gave up reaching {addr} after {attempts} attempts")]
    GaveUp { addr: String, attempts: u32 },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// The gun's connection to the server.
///
/// Bodies queued on the handler's outbound channel are sent whenever a
/// session is up and wait in the channel while it is down.
pub struct ClientLink {
    server_addr: String,
    client_id: u64,
    clock: Arc<dyn Clock>,
    handler: ClientMsgHandler,
    outbound: mpsc::UnboundedReceiver<String>,
    shutdown: watch::Receiver<bool>,
    policy: ReconnectPolicy,
}

impl ClientLink {
    pub fn new(
        server_addr: impl Into<String>,
        client_id: u64,
        clock: Arc<dyn Clock>,
        handler: ClientMsgHandler,
        outbound: mpsc::UnboundedReceiver<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            server_addr: server_addr.into(),
            client_id,
            clock,
            handler,
            outbound,
            shutdown,
            policy: ReconnectPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep a session going until shutdown or the backoff runs out
    pub async fn run(mut self) -> Result<(), ClientLinkError> {
        let mut attempt = 0;
        loop {
            if *self.shutdown.borrow() {
                return Ok(());
            }

            let Some(delay) = self.policy.delay(attempt) else {
                error!(addr = %self.server_addr, attempts = attempt, "Giving up on the server");
                return Err(ClientLinkError::GaveUp {
                    addr: self.server_addr.clone(),
                    attempts: attempt,
                });
            };
            if !delay.is_zero() {
                info!(
                    addr = %self.server_addr,
                    wait_secs = delay.as_secs(),
                    "Disconnected from server, waiting to try again"
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    Ok(()) = self.shutdown.changed() => continue,
                }
            }

            info!(addr = %self.server_addr, "Connecting");
            let stream = match TcpStream::connect(&self.server_addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(addr = %self.server_addr, error = %e, "Connect failed");
                    attempt += 1;
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                debug!(error = %e, "Couldn't set TCP_NODELAY");
            }

            self.handler.connected();
            let end = run_session(
                stream,
                self.client_id,
                self.clock.as_ref(),
                &self.handler,
                &mut self.outbound,
                &mut self.shutdown,
            )
            .await?;
            self.handler.disconnected();

            match end {
                SessionEnd::Shutdown => return Ok(()),
                SessionEnd::Lost => attempt = 1,
            }
        }
    }
}

async fn send<W: AsyncWrite + Unpin>(
    writer: &mut W,
    client_id: u64,
    clock: &dyn Clock,
    body: String,
) -> std::io::Result<()> {
    let line = Envelope::new(client_id, clock.now(), body).to_line();
    debug!(line = %line, "Sending");
    writer.write_all(&encode_line(&line)).await
}

/// Say hello, then shuttle lines both ways until the session ends
pub async fn run_session<S>(
    stream: S,
    client_id: u64,
    clock: &dyn Clock,
    handler: &ClientMsgHandler,
    outbound: &mut mpsc::UnboundedReceiver<String>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<SessionEnd, ClientLinkError>
where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = tokio::io::split(stream);

    if let Err(e) = send(&mut writer, client_id, clock, HELLO.create(&[])?).await {
        warn!(error = %e, "Couldn't say hello");
        return Ok(SessionEnd::Lost);
    }

    let mut lines = LineBuffer::new();
    loop {
        tokio::select! {
            read = reader.read_buf(lines.buf_mut()) => {
                match read {
                    Ok(0) => {
                        info!("Server closed the connection");
                        return Ok(SessionEnd::Lost);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Read failed");
                        return Ok(SessionEnd::Lost);
                    }
                }
                while let Some(line) = lines.next_line() {
                    if line.is_empty() {
                        continue;
                    }
                    match handler.handle_line(&line) {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Dropping the connection");
                            return Ok(SessionEnd::Lost);
                        }
                        Err(e) => warn!(error = %e, line = %line, "Rejected line"),
                    }
                }
            }
            Some(body) = outbound.recv() => {
                if let Err(e) = send(&mut writer, client_id, clock, body).await {
                    warn!(error = %e, "Send failed");
                    return Ok(SessionEnd::Lost);
                }
            }
            Ok(()) = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }

        if *shutdown.borrow() {
            return Ok(SessionEnd::Shutdown);
        }
    }
}
