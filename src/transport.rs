// src/transport.rs
//! Client transport: newline-delimited JSON over TCP
//!
//! Each client line is one [`ClientEvent`]. The relay pushes every broadcast
//! [`ServerEvent`] back as one JSON line, plus an `error` event when a line is
//! rejected. End of stream, a read error or an idle client is the raw
//! disconnect; clients with nothing to say send `ping`.

use crate::config::DEFAULT_CLIENT_TIMEOUT_SECS;
use crate::error::{RelayError, Result};
use crate::events::{ClientEvent, ServerEvent};
use crate::framing;
use crate::relay::{Relay, Session};
use crate::store::{CommandLog, TelemetryStore};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::{
    io::{AsyncBufRead, AsyncWrite, AsyncWriteExt, BufReader},
    net::TcpListener,
    sync::{
        broadcast::{self, error::RecvError},
        mpsc,
    },
    time::timeout,
};
use tracing::{debug, info, warn};

/// Longest client line accepted; a longer one ends the connection
pub const MAX_MESSAGE_LEN: usize = 4096;

/// How long a single push to the client may block
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-connection time limits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientTimeouts {
    /// Silence after which the client counts as dropped. Zero disables it.
    pub idle: Duration,
    /// Bound on each push, and on the final flush once reading has stopped
    pub write: Duration,
}

impl ClientTimeouts {
    pub fn new(idle: Duration) -> Self {
        Self {
            idle,
            write: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl Default for ClientTimeouts {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_CLIENT_TIMEOUT_SECS))
    }
}

/// Accept clients forever, one task per connection
pub async fn serve<S>(
    listener: TcpListener,
    relay: Arc<Relay<S>>,
    events: broadcast::Sender<ServerEvent>,
    timeouts: ClientTimeouts,
) -> Result<()>
where
    S: CommandLog + TelemetryStore + 'static,
{
    info!(addr = %listener.local_addr()?, idle = ?timeouts.idle, "listening for clients");

    loop {
        let (stream, peer) = listener.accept().await?;
        let relay = Arc::clone(&relay);
        let live = events.subscribe();

        tokio::spawn(async move {
            debug!(%peer, "client socket accepted");
            let (read, write) = stream.into_split();
            match handle_client(BufReader::new(read), write, relay, live, timeouts).await {
                Ok(replayed) => debug!(%peer, replayed, "client finished"),
                Err(e) => warn!(%peer, error = %e, "client connection error"),
            }
        });
    }
}

/// Run one client connection to completion and return how many commands
/// were replayed after it dropped.
///
/// The session ends when the client stops sending: end of stream, a read
/// error, an over-long line or the idle timeout. Pushes still pending at
/// that point get `timeouts.write` to go out and are then abandoned, so a
/// client that stopped reading never holds up the replay.
pub async fn handle_client<R, W, S>(
    reader: R,
    writer: W,
    relay: Arc<Relay<S>>,
    live: broadcast::Receiver<ServerEvent>,
    timeouts: ClientTimeouts,
) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    S: CommandLog + TelemetryStore,
{
    let session = relay.connect();
    let (direct_tx, direct_rx) = mpsc::channel(16);

    let pushed = {
        let inbound = read_events(reader, &session, direct_tx, timeouts.idle);
        let outbound = push_events(writer, direct_rx, live, timeouts.write);
        tokio::pin!(inbound, outbound);

        tokio::select! {
            () = &mut inbound => match timeout(timeouts.write, &mut outbound).await {
                Ok(pushed) => pushed,
                Err(_) => Err(RelayError::Connection(
                    "pending pushes abandoned after client stopped sending".to_string(),
                )),
            },
            pushed = &mut outbound => {
                inbound.await;
                pushed
            }
        }
    };

    if let Err(e) = pushed {
        debug!(session = session.id(), error = %e, "stopped pushing to client");
    }

    Ok(session.disconnect().await)
}

async fn read_events<R, S>(
    mut reader: R,
    session: &Session<S>,
    direct: mpsc::Sender<ServerEvent>,
    idle: Duration,
) where
    R: AsyncBufRead + Unpin,
    S: CommandLog + TelemetryStore,
{
    let mut buf = Vec::new();

    loop {
        let frame = framing::read_frame(&mut reader, &mut buf, MAX_MESSAGE_LEN);
        let read = if idle.is_zero() {
            frame.await
        } else {
            match timeout(idle, frame).await {
                Ok(read) => read,
                Err(_) => {
                    info!(session = session.id(), ?idle, "client idle, treating as dropped");
                    break;
                }
            }
        };

        match read {
            Ok(true) => {}
            Ok(false) => break, // EOF
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                warn!(session = session.id(), error = %e, "client line too long, closing");
                let reply = ServerEvent::Error {
                    message: e.to_string(),
                };
                let _ = direct.send(reply).await;
                break;
            }
            Err(e) => {
                debug!(session = session.id(), error = %e, "client read failed");
                break;
            }
        }

        let text = String::from_utf8_lossy(&buf);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }

        let outcome = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => session.handle(event).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = outcome {
            warn!(session = session.id(), error = %e, "rejected client message");
            let reply = ServerEvent::Error {
                message: e.to_string(),
            };
            let _ = direct.send(reply).await;
        }
    }
}

async fn push_events<W>(
    mut writer: W,
    mut direct: mpsc::Receiver<ServerEvent>,
    mut live: broadcast::Receiver<ServerEvent>,
    write_timeout: Duration,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    loop {
        let event = tokio::select! {
            biased;
            received = live.recv() => match received {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client lagging behind broadcast");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            received = direct.recv() => match received {
                Some(event) => event,
                None => break,
            },
        };

        let mut line = serde_json::to_string(&event)?;
        line.push('\n');

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        match timeout(write_timeout, write).await {
            Ok(written) => written?,
            Err(_) => {
                return Err(RelayError::Connection(format!(
                    "client write timed out after {:?}",
                    write_timeout
                )))
            }
        }
        debug!(event = event.name(), "pushed to client");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actuator::ActuatorHandle;
    use crate::gps::data::TelemetryFix;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use std::time::Duration;
    use tokio::io::{duplex, AsyncReadExt};
    use tokio::net::TcpStream;

    fn relay() -> (Arc<Relay<MemoryStore>>, mpsc::Receiver<String>) {
        let (actuator, rx) = ActuatorHandle::channel(64);
        let relay = Relay::new(Arc::new(MemoryStore::new()), Some(actuator), 1000);
        (Arc::new(relay), rx)
    }

    fn drain(rx: &mut mpsc::Receiver<String>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(cmd) = rx.try_recv() {
            out.push(cmd);
        }
        out
    }

    fn fix(id: i64) -> TelemetryFix {
        TelemetryFix {
            id,
            latitude: 48.1173,
            longitude: 11.516667,
            speed: 22.4,
            timestamp: Utc::now(),
            is_repeater: false,
        }
    }

    const MOVE_12: &str = r#"{"event":"move","data":{"left":1,"right":2}}"#;

    fn lines(out: &[u8]) -> Vec<serde_json::Value> {
        String::from_utf8_lossy(out)
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_drop_after_moves_replays() {
        let (relay, mut rx) = relay();
        let (events, live) = broadcast::channel(8);
        let input = concat!(
            r#"{"event":"move","data":{"left":1,"right":2}}"#,
            "\n",
            r#"{"event":"move","data":{"left":"3","right":"4"}}"#,
            "\n"
        );
        let mut out = Vec::new();

        let replayed = handle_client(
            input.as_bytes(),
            &mut out,
            relay,
            live,
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(replayed, 2);
        assert_eq!(drain(&mut rx), vec!["120", "340", "340", "120"]);
        assert!(lines(&out).is_empty());
        drop(events);
    }

    #[tokio::test]
    async fn test_soft_disconnect_then_drop() {
        let (relay, mut rx) = relay();
        let (_events, live) = broadcast::channel(8);
        let input = concat!(
            r#"{"event":"move","data":{"left":5,"right":5}}"#,
            "\n",
            r#"{"event":"soft_disconnect"}"#,
            "\n"
        );
        let mut out = Vec::new();

        let replayed = handle_client(
            input.as_bytes(),
            &mut out,
            relay,
            live,
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(replayed, 0);
        assert_eq!(drain(&mut rx), vec!["550"]);
    }

    #[tokio::test]
    async fn test_bad_lines_get_error_events() {
        let (relay, mut rx) = relay();
        let (_events, live) = broadcast::channel(8);
        let input = concat!(
            "not json\n",
            r#"{"event":"move","data":{"left":12,"right":0}}"#,
            "\n",
            r#"{"event":"soft_disconnect"}"#,
            "\n"
        );
        let mut out = Vec::new();

        handle_client(
            input.as_bytes(),
            &mut out,
            relay.clone(),
            live,
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        let pushed = lines(&out);
        assert_eq!(pushed.len(), 2);
        assert!(pushed.iter().all(|event| event["event"] == "error"));
        assert!(relay.store().recent(10).unwrap().is_empty());
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_is_pushed_to_client() {
        let (relay, _rx) = relay();
        let (events, live) = broadcast::channel(8);
        events.send(ServerEvent::GpsCoordinate(fix(1))).unwrap();

        let input = format!("{}\n", r#"{"event":"soft_disconnect"}"#);
        let mut out = Vec::new();
        handle_client(
            input.as_bytes(),
            &mut out,
            relay,
            live,
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        let pushed = lines(&out);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0]["event"], "gps_coordinate");
        assert_eq!(pushed[0]["data"]["id"], 1);
    }

    #[tokio::test]
    async fn test_serve_over_tcp() {
        let (relay, mut rx) = relay();
        let (events, _live) = broadcast::channel(8);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(serve(
            listener,
            relay,
            events,
            ClientTimeouts::default(),
        ));

        let mut client = TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"{\"event\":\"move\",\"data\":{\"left\":1,\"right\":2}}\n")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        let mut rest = Vec::new();
        client.read_to_end(&mut rest).await.unwrap();

        // Live move plus its replay after the drop
        let mut received = Vec::new();
        while received.len() < 2 {
            let cmd = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            received.push(cmd);
        }
        assert_eq!(received, vec!["120", "120"]);

        server.abort();
    }

    #[tokio::test]
    async fn test_unread_client_does_not_block_replay() {
        let (relay, mut rx) = relay();
        let (events, live) = broadcast::channel(64);
        for id in 0..32 {
            events.send(ServerEvent::GpsCoordinate(fix(id))).unwrap();
        }

        // Far end stays open but is never read, so the 16 byte pipe fills up
        let (sink, _far) = duplex(16);
        let input = format!("{}\n", MOVE_12);
        let timeouts = ClientTimeouts {
            idle: Duration::from_secs(60),
            write: Duration::from_millis(200),
        };

        let replayed = tokio::time::timeout(
            Duration::from_secs(2),
            handle_client(input.as_bytes(), sink, relay, live, timeouts),
        )
        .await
        .expect("session stuck behind a blocked push")
        .unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(drain(&mut rx), vec!["120", "120"]);
    }

    #[tokio::test]
    async fn test_silent_client_times_out_and_replays() {
        let (relay, mut rx) = relay();
        let (_events, live) = broadcast::channel(8);
        let (mut client, server_side) = duplex(1024);
        let (read, write) = tokio::io::split(server_side);
        let timeouts = ClientTimeouts::new(Duration::from_millis(150));

        client
            .write_all(format!("{}\n", MOVE_12).as_bytes())
            .await
            .unwrap();

        // The client never closes its end
        let replayed = tokio::time::timeout(
            Duration::from_secs(2),
            handle_client(BufReader::new(read), write, relay, live, timeouts),
        )
        .await
        .expect("idle client was never dropped")
        .unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(drain(&mut rx), vec!["120", "120"]);
        drop(client);
    }

    #[tokio::test]
    async fn test_pings_keep_session_alive() {
        let (relay, mut rx) = relay();
        let (_events, live) = broadcast::channel(8);
        let (mut client, server_side) = duplex(1024);
        let (read, write) = tokio::io::split(server_side);
        let timeouts = ClientTimeouts::new(Duration::from_millis(250));

        let session = tokio::spawn(handle_client(
            BufReader::new(read),
            write,
            relay,
            live,
            timeouts,
        ));

        client
            .write_all(format!("{}\n", MOVE_12).as_bytes())
            .await
            .unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            client.write_all(b"{\"event\":\"ping\"}\n").await.unwrap();
        }
        // Only reached if the pings held off the idle timeout
        client
            .write_all(b"{\"event\":\"soft_disconnect\"}\n")
            .await
            .unwrap();
        drop(client);

        let replayed = tokio::time::timeout(Duration::from_secs(2), session)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(replayed, 0);
        assert_eq!(drain(&mut rx), vec!["120"]);
    }

    #[tokio::test]
    async fn test_overlong_line_ends_session() {
        let (relay, mut rx) = relay();
        let (_events, live) = broadcast::channel(8);
        let input = format!(
            "{}\n{}\n{}\n",
            MOVE_12,
            "x".repeat(MAX_MESSAGE_LEN + 10),
            r#"{"event":"move","data":{"left":3,"right":4}}"#
        );
        let mut out = Vec::new();

        let replayed = handle_client(
            input.as_bytes(),
            &mut out,
            relay.clone(),
            live,
            ClientTimeouts::default(),
        )
        .await
        .unwrap();

        assert_eq!(replayed, 1);
        assert_eq!(drain(&mut rx), vec!["120", "120"]);
        assert_eq!(relay.store().recent(10).unwrap().len(), 1);

        let pushed = lines(&out);
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0]["event"], "error");
    }
}
