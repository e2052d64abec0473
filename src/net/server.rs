//! TCP transport for the server
//!
//! Every connection gets a reader loop feeding the message handler and a
//! writer task draining the connection's outbound queue. Two background tasks
//! ping every connection and flag the ones that have gone quiet.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::framing::{encode_line, LineBuffer};
use crate::app::AppState;
use crate::protocol::message::PING;
use crate::protocol::Envelope;
use crate::server::{ConnectionId, ServerConnection};
use crate::util::time::Clock;

/// Accept connections until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: impl Future<Output = ()>,
) -> std::io::Result<()> {
    let pinger = tokio::spawn(ping_loop(state.clone()));
    let scanner = tokio::spawn(out_of_contact_loop(state.clone()));

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!(peer = %peer, error = %e, "Couldn't set TCP_NODELAY");
                    }
                    let state = state.clone();
                    tokio::spawn(async move {
                        handle_socket(stream, peer, state).await;
                    });
                }
                Err(e) => {
                    error!(error = %e, "Accept failed");
                }
            }
        }
    }

    pinger.abort();
    scanner.abort();
    Ok(())
}

async fn handle_socket<S>(stream: S, peer: SocketAddr, state: AppState)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    info!(peer = %peer, "New connection");
    let id = run_connection(stream, state).await;
    info!(peer = %peer, connection = id, "Connection closed");
}

/// Run one connection to completion. Returns the id it was registered under.
pub async fn run_connection<S>(stream: S, state: AppState) -> ConnectionId
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let id = state.next_connection_id();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let conn = Arc::new(ServerConnection::new(id, outbound_tx, state.clock.now()));
    state.registry.register(Arc::clone(&conn));

    let (mut reader, writer) = tokio::io::split(stream);

    // Spawn writer task: outbound queue -> socket
    let mut writer_handle = tokio::spawn(write_loop(
        writer,
        outbound_rx,
        id,
        state.config.server_id,
        Arc::clone(&state.clock),
    ));

    // Reader loop: socket -> message handler
    let mut lines = LineBuffer::new();
    'read: loop {
        let read = tokio::select! {
            read = reader.read_buf(lines.buf_mut()) => read,
            _ = &mut writer_handle => {
                warn!(connection = id, "Writer stopped, dropping connection");
                break;
            }
        };
        match read {
            Ok(0) => {
                debug!(connection = id, "Peer closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection = id, error = %e, "Read failed");
                break;
            }
        }

        while let Some(line) = lines.next_line() {
            if line.is_empty() {
                continue;
            }
            match state.handler.handle_line(&conn, &line) {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    error!(connection = id, error = %e, "Closing connection");
                    break 'read;
                }
                Err(e) => {
                    warn!(connection = id, error = %e, line = %line, "Rejected line");
                }
            }
        }
    }

    // Cleanup on disconnect
    state.registry.lost_connection(&conn);
    writer_handle.abort();
    id
}

async fn write_loop<W>(
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<String>,
    id: ConnectionId,
    sender_id: u64,
    clock: Arc<dyn Clock>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(body) = outbound.recv().await {
        let line = Envelope::new(sender_id, clock.now(), body).to_line();
        debug!(connection = id, line = %line, "Sending");
        if let Err(e) = writer.write_all(&encode_line(&line)).await {
            warn!(connection = id, error = %e, "Send failed");
            break;
        }
    }
}

/// Ping every connection so latency stays measured and quiet clients answer
async fn ping_loop(state: AppState) {
    let mut ticker = interval(state.config.ping_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let body = match PING.create(&[]) {
            Ok(body) => body,
            Err(e) => {
                error!(error = %e, "Couldn't build ping");
                return;
            }
        };
        for conn in state.registry.connections() {
            conn.queue_message(body.as_str());
        }
    }
}

async fn out_of_contact_loop(state: AppState) {
    let mut ticker = interval(state.config.ooc_scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        let changes = state.registry.scan_out_of_contact(state.clock.now());
        if !changes.is_empty() {
            debug!(changes = changes.len(), "Out of contact flags changed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::game::PlayerKey;
    use crate::util::time::ManualClock;
    use crate::util::timer::ManualScheduler;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::oneshot;

    fn state(config: Config) -> AppState {
        AppState::new(
            config,
            Arc::new(ManualClock::new(300.0)),
            Arc::new(ManualScheduler::new()),
        )
    }

    async fn read_line<R: AsyncRead + Unpin>(reader: &mut R, lines: &mut LineBuffer) -> String {
        loop {
            if let Some(line) = lines.next_line() {
                return line;
            }
            let n = reader.read_buf(lines.buf_mut()).await.unwrap();
            assert!(n > 0, "stream closed before a full line");
        }
    }

    #[tokio::test]
    async fn malformed_line_is_skipped() {
        let state = state(Config::default());
        state.start_game(0.0).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(b"garbage\nE(abc,300,Recv(1,1,T))\n")
            .build();
        run_connection(stream, state.clone()).await;

        let shooter = state.log.player(PlayerKey::new(1, 1)).unwrap();
        assert_eq!(shooter.ammo, 99);
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn unknown_message_closes_the_connection() {
        let state = state(Config::default());
        state.start_game(0.0).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(b"E(abc,300,Frobnicate())\nE(abc,300,Recv(1,1,T))\n")
            .build();
        run_connection(stream, state.clone()).await;

        assert!(state.log.player(PlayerKey::new(1, 1)).is_none());
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn partial_lines_are_joined() {
        let state = state(Config::default());
        state.start_game(0.0).unwrap();

        let stream = tokio_test::io::Builder::new()
            .read(b"E(abc,300,Re")
            .read(b"cv(2,1,T))\n")
            .build();
        run_connection(stream, state.clone()).await;

        assert_eq!(state.log.player(PlayerKey::new(2, 1)).unwrap().ammo, 99);
    }

    #[tokio::test]
    async fn failed_send_drops_the_connection() {
        let state = state(Config::default());
        let stream = tokio_test::io::Builder::new()
            .read(b"E(abc,12,Ping())\n")
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"))
            .wait(Duration::from_secs(3600))
            .build();

        // The peer never closes, so only the failed write can end this
        tokio::time::timeout(Duration::from_secs(5), run_connection(stream, state.clone()))
            .await
            .unwrap();
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn replies_are_stamped_with_server_id_and_time() {
        let state = state(Config {
            server_id: 0x5e,
            ..Config::default()
        });
        let (client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(run_connection(server, state.clone()));

        let (mut rd, mut wr) = tokio::io::split(client);
        wr.write_all(b"E(abc,12,Ping())\n").await.unwrap();
        let mut lines = LineBuffer::new();
        assert_eq!(
            read_line(&mut rd, &mut lines).await,
            "E(5e,300.000000,Pong(12,1))"
        );
        assert_eq!(state.registry.connection_count(), 1);

        drop(wr);
        drop(rd);
        task.await.unwrap();
        assert_eq!(state.registry.connection_count(), 0);
    }

    #[tokio::test]
    async fn server_pings_its_connections() {
        let state = state(Config {
            ping_interval: Duration::from_millis(20),
            ..Config::default()
        });
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve(listener, state, async move {
            let _ = stop_rx.await;
        }));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        let mut lines = LineBuffer::new();
        let line = tokio::time::timeout(
            Duration::from_secs(5),
            read_line(&mut stream, &mut lines),
        )
        .await
        .unwrap();
        assert_eq!(line, "E(0,300.000000,Ping())");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
