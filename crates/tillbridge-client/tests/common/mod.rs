//! In-process bridge for driving the client over a real socket.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tillbridge_client::ClientConfig;
use tillbridge_protocol::{Command, Frame, Heartbeat, Inbound, StompCodec};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

/// Upper bound for anything a test waits on.
pub const STEP: Duration = Duration::from_secs(2);

pub struct MockBridge {
    addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<TcpStream>,
}

impl MockBridge {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, accepted) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                if tx.send(stream).is_err() {
                    break;
                }
            }
        });

        Self { addr, accepted }
    }

    /// Config pointing at this bridge with heart-beats off.
    pub fn config(&self) -> ClientConfig {
        ClientConfig::new(self.addr.to_string())
            .with_connect_timeout(STEP)
            .with_heartbeat(Duration::ZERO, Duration::ZERO)
    }

    pub async fn accept(&mut self) -> BridgeConn {
        let stream = tokio::time::timeout(STEP, self.accepted.recv())
            .await
            .expect("no client connected")
            .expect("listener stopped");
        BridgeConn {
            framed: Framed::new(stream, StompCodec::new()),
        }
    }

    /// Assert no further client connects within `wait`.
    pub async fn expect_no_connection(&mut self, wait: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(wait, self.accepted.recv()).await {
            panic!("unexpected second connection");
        }
    }

    /// Accept a connection and complete the handshake.
    pub async fn accept_connected(&mut self) -> BridgeConn {
        let mut conn = self.accept().await;
        conn.handshake("0,0").await;
        conn
    }
}

pub struct BridgeConn {
    framed: Framed<TcpStream, StompCodec>,
}

impl BridgeConn {
    /// Read `CONNECT` and answer `CONNECTED` with the given heart-beat.
    pub async fn handshake(&mut self, heart_beat: &str) -> Frame {
        let connect = self.next_frame().await;
        assert_eq!(connect.command, Command::Connect);
        self.send(
            Frame::new(Command::Connected)
                .with_header("version", "1.2")
                .with_header("heart-beat", heart_beat),
        )
        .await;
        connect
    }

    /// Next inbound item, heart-beats included.
    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        tokio::time::timeout(STEP, self.framed.next())
            .await
            .expect("timed out waiting for client")
            .map(|item| item.unwrap())
    }

    /// Next frame, skipping heart-beats.
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            match self.next_inbound().await {
                Some(Inbound::Frame(frame)) => return frame,
                Some(Inbound::Heartbeat) => continue,
                Some(Inbound::Malformed(e)) => panic!("client sent malformed frame: {e}"),
                None => panic!("client closed the connection"),
            }
        }
    }

    /// Read a `SUBSCRIBE` for `destination` and return its id.
    pub async fn expect_subscribe(&mut self, destination: &str) -> String {
        let frame = self.next_frame().await;
        assert_eq!(frame.command, Command::Subscribe);
        assert_eq!(frame.destination(), Some(destination));
        frame.header("id").unwrap().to_string()
    }

    /// Read a `SEND` to `destination` and return its JSON body.
    pub async fn expect_send(&mut self, destination: &str) -> (Frame, Value) {
        let frame = self.next_frame().await;
        assert_eq!(frame.command, Command::Send);
        assert_eq!(frame.destination(), Some(destination));
        let body = serde_json::from_slice(&frame.body).unwrap();
        (frame, body)
    }

    pub async fn send(&mut self, frame: Frame) {
        self.framed.send(frame).await.unwrap();
    }

    pub async fn heartbeat(&mut self) {
        self.framed.send(Heartbeat).await.unwrap();
    }

    pub async fn message(&mut self, destination: &str, subscription: &str, body: Value) {
        self.send(
            Frame::new(Command::Message)
                .with_header("destination", destination)
                .with_header("subscription", subscription)
                .with_header("message-id", uuid::Uuid::new_v4().to_string())
                .with_header("content-type", "application/json")
                .with_body(body.to_string()),
        )
        .await;
    }

    /// Wait until the client closes its side.
    pub async fn expect_closed(&mut self) {
        loop {
            match tokio::time::timeout(STEP, self.framed.next())
                .await
                .expect("client did not close")
            {
                None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            }
        }
    }
}
