//! `Connection` against a minimal NATS server speaking over WebSocket.

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use speaker_bus::{ClientConfig, Connection, ConnectionStatus, Transport};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};

const WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, PartialEq)]
enum Op {
    Connect(Value),
    Sub { subject: String, sid: String },
    Unsub { sid: String },
    Pub { subject: String, payload: Vec<u8> },
    Ping,
    Pong,
}

/// Server side of one client session
struct Peer {
    ws: WebSocketStream<TcpStream>,
    buf: Vec<u8>,
}

impl Peer {
    async fn accept(listener: &TcpListener) -> Self {
        let (stream, _) = timeout(WAIT, listener.accept())
            .await
            .expect("client dialed")
            .unwrap();
        let ws = accept_async(stream).await.unwrap();
        Self {
            ws,
            buf: Vec::new(),
        }
    }

    async fn send(&mut self, data: &str) {
        self.ws
            .send(Message::Binary(data.as_bytes().to_vec()))
            .await
            .unwrap();
    }

    async fn send_info(&mut self, max_payload: usize) {
        let info = json!({
            "server_id": "NFAKE",
            "server_name": "fake",
            "version": "2.10.0",
            "go": "go1.22",
            "host": "127.0.0.1",
            "port": 4222,
            "headers": true,
            "max_payload": max_payload,
            "proto": 1,
        });
        self.send(&format!("INFO {}\r\n", info)).await;
    }

    /// Next complete client operation, reading more frames as needed
    async fn next_op(&mut self) -> Op {
        loop {
            if let Some(op) = self.parse() {
                return op;
            }
            let frame = timeout(WAIT, self.ws.next())
                .await
                .expect("client sent something")
                .expect("client kept the socket open")
                .unwrap();
            match frame {
                Message::Binary(data) => self.buf.extend_from_slice(&data),
                Message::Text(text) => self.buf.extend_from_slice(text.as_bytes()),
                Message::Close(_) => panic!("client closed the socket"),
                _ => {}
            }
        }
    }

    fn parse(&mut self) -> Option<Op> {
        let end = self.buf.windows(2).position(|w| w == b"\r\n")?;
        let line = String::from_utf8_lossy(&self.buf[..end]).to_string();
        let (verb, rest) = line.split_once(' ').unwrap_or((line.as_str(), ""));
        let args: Vec<&str> = rest.split_whitespace().collect();

        let op = match verb.to_ascii_uppercase().as_str() {
            "CONNECT" => Op::Connect(serde_json::from_str(rest).unwrap()),
            "PING" => Op::Ping,
            "PONG" => Op::Pong,
            "SUB" => Op::Sub {
                subject: args[0].to_string(),
                sid: args[args.len() - 1].to_string(),
            },
            "UNSUB" => Op::Unsub {
                sid: args[0].to_string(),
            },
            "PUB" => {
                let len: usize = args[args.len() - 1].parse().unwrap();
                let start = end + 2;
                if self.buf.len() < start + len + 2 {
                    return None;
                }
                let payload = self.buf[start..start + len].to_vec();
                self.buf.drain(..start + len + 2);
                return Some(Op::Pub {
                    subject: args[0].to_string(),
                    payload,
                });
            }
            other => panic!("unexpected client op {other:?}"),
        };
        self.buf.drain(..end + 2);
        Some(op)
    }

    /// INFO, then CONNECT and the PING that confirms it
    async fn handshake(&mut self, max_payload: usize) -> Value {
        self.send_info(max_payload).await;
        let connect = match self.next_op().await {
            Op::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {other:?}"),
        };
        assert_eq!(self.next_op().await, Op::Ping);
        self.send("PONG\r\n").await;
        connect
    }

    /// Next operation that is not keepalive traffic
    async fn expect(&mut self) -> Op {
        loop {
            match self.next_op().await {
                Op::Ping => self.send("PONG\r\n").await,
                Op::Pong => {}
                op => return op,
            }
        }
    }
}

async fn listen() -> (TcpListener, ClientConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let config = ClientConfig {
        connect_timeout_ms: 5000,
        ping_interval_secs: 600,
        ..ClientConfig::new(format!("ws://{addr}"))
    };
    (listener, config)
}

fn publish(subject: &str, payload: &[u8]) -> Op {
    Op::Pub {
        subject: subject.to_string(),
        payload: payload.to_vec(),
    }
}

#[tokio::test]
async fn publish_issued_before_the_handshake_is_delivered_after_it() {
    let (listener, config) = listen().await;
    let connection = Connection::open(&config).unwrap();
    connection
        .publish("speaker.query", Bytes::from_static(b"early"))
        .unwrap();
    assert_ne!(connection.status(), ConnectionStatus::Connected);

    let mut peer = Peer::accept(&listener).await;
    let connect = peer.handshake(1024 * 1024).await;
    assert_eq!(connect["name"], config.client_name);

    assert_eq!(peer.expect().await, publish("speaker.query", b"early"));
    connection.wait_connected(WAIT).await.unwrap();
    assert_eq!(connection.status(), ConnectionStatus::Connected);

    connection.shutdown().await;
    assert_eq!(connection.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn subscriptions_are_replayed_after_reconnect() {
    let (listener, config) = listen().await;
    let connection = Connection::open(&config).unwrap();
    let mut sub = connection.subscribe("speaker.event").unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.handshake(1024 * 1024).await;
    let sid = match peer.expect().await {
        Op::Sub { subject, sid } => {
            assert_eq!(subject, "speaker.event");
            sid
        }
        other => panic!("expected SUB, got {other:?}"),
    };
    connection.wait_connected(WAIT).await.unwrap();

    // Server goes away without a close frame
    drop(peer);
    let mut status = connection.watch_status();
    timeout(WAIT, status.wait_for(|s| *s == ConnectionStatus::Disconnected))
        .await
        .expect("disconnect noticed")
        .unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.handshake(1024 * 1024).await;
    assert_eq!(
        peer.expect().await,
        Op::Sub {
            subject: "speaker.event".into(),
            sid: sid.clone(),
        }
    );
    connection.wait_connected(WAIT).await.unwrap();

    peer.send(&format!("MSG speaker.event {sid} 5\r\nhello\r\n"))
        .await;
    let payload = timeout(WAIT, sub.recv()).await.unwrap();
    assert_eq!(payload, Some(Bytes::from_static(b"hello")));
}

#[tokio::test]
async fn server_ping_is_answered() {
    let (listener, config) = listen().await;
    let connection = Connection::open(&config).unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.handshake(1024 * 1024).await;
    connection.wait_connected(WAIT).await.unwrap();

    peer.send("PING\r\n").await;
    assert_eq!(peer.next_op().await, Op::Pong);
}

#[tokio::test]
async fn publish_over_the_server_limit_is_dropped() {
    let (listener, config) = listen().await;
    let connection = Connection::open(&config).unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.handshake(16).await;
    connection.wait_connected(WAIT).await.unwrap();

    connection
        .publish("echo", Bytes::from_static(b"tiny"))
        .unwrap();
    assert_eq!(peer.expect().await, publish("echo", b"tiny"));

    connection.publish("echo", Bytes::from(vec![b'x'; 64])).unwrap();
    connection
        .publish("echo", Bytes::from_static(b"after"))
        .unwrap();
    assert_eq!(peer.expect().await, publish("echo", b"after"));
    assert_eq!(connection.status(), ConnectionStatus::Connected);
}

#[tokio::test]
async fn unsubscribe_reaches_the_server() {
    let (listener, config) = listen().await;
    let connection = Connection::open(&config).unwrap();
    let mut sub = connection.subscribe("playlist.event").unwrap();

    let mut peer = Peer::accept(&listener).await;
    peer.handshake(1024 * 1024).await;
    let sid = match peer.expect().await {
        Op::Sub { sid, .. } => sid,
        other => panic!("expected SUB, got {other:?}"),
    };

    sub.unsubscribe();
    sub.unsubscribe();
    assert!(!sub.is_active());
    assert_eq!(peer.expect().await, Op::Unsub { sid });
}
