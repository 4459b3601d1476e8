//! In-process tool server for integration tests.
//!
//! Speaks the real wire protocol over a real socket. Request handling by
//! method name:
//! - `slow`: replies after `params.delay_ms`
//! - `silent`: never replies
//! - `explode`: replies with an error frame
//! - anything else: echoes `{method, params}` as the payload
//!
//! Pings are answered with a pong until [`TestServer::ignore_pings`].

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::{WebSocketStream, accept_async, tungstenite::Message};

use schemalink_transport_traits::{Frame, now_timestamp};

#[derive(Debug, Clone)]
enum Control {
    Push(String),
    Drop,
}

pub struct TestServer {
    addr: SocketAddr,
    received: Mutex<mpsc::UnboundedReceiver<Frame>>,
    control: broadcast::Sender<Control>,
    connections: Arc<AtomicUsize>,
    answer_pings: Arc<AtomicBool>,
    accept_task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, frames_rx) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));
        let answer_pings = Arc::new(AtomicBool::new(true));

        let accept_task = tokio::spawn({
            let control = control.clone();
            let connections = connections.clone();
            let answer_pings = answer_pings.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let Ok(ws) = accept_async(stream).await else {
                        continue;
                    };
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        ws,
                        frames_tx.clone(),
                        control.subscribe(),
                        answer_pings.clone(),
                    ));
                }
            }
        });

        Self {
            addr,
            received: Mutex::new(frames_rx),
            control,
            connections,
            answer_pings,
            accept_task,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// Connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Next frame received from any client
    pub async fn next_frame(&self) -> Frame {
        let mut received = self.received.lock().await;
        tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("no frame within 5s")
            .expect("server stopped")
    }

    /// Next received frame of type `frame_type`, skipping others
    pub async fn next_frame_of(&self, frame_type: &str) -> Frame {
        loop {
            let frame = self.next_frame().await;
            if frame.frame_type() == frame_type {
                return frame;
            }
        }
    }

    /// Frames received so far and not yet consumed
    pub async fn drain_frames(&self) -> Vec<Frame> {
        let mut received = self.received.lock().await;
        let mut frames = Vec::new();
        while let Ok(frame) = received.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Sends `frame` to every live connection
    pub fn push(&self, frame: &Frame) {
        let _ = self.control.send(Control::Push(frame.encode().unwrap()));
    }

    /// Sends raw text to every live connection
    pub fn push_text(&self, text: &str) {
        let _ = self.control.send(Control::Push(text.to_string()));
    }

    /// Stops answering pings, leaving connections half-open
    pub fn ignore_pings(&self) {
        self.answer_pings.store(false, Ordering::SeqCst);
    }

    /// Drops every live connection without a close handshake
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.accept_task.abort();
        let _ = self.control.send(Control::Drop);
    }
}

async fn serve(
    ws: WebSocketStream<TcpStream>,
    frames_tx: mpsc::UnboundedSender<Frame>,
    mut control_rx: broadcast::Receiver<Control>,
    answer_pings: Arc<AtomicBool>,
) {
    let (mut sink, mut stream) = ws.split();
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Frame>();

    loop {
        tokio::select! {
            control = control_rx.recv() => match control {
                Ok(Control::Push(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Drop) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            },

            Some(frame) = out_rx.recv() => {
                let text = frame.encode().unwrap();
                if sink.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }

            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let Ok(frame) = Frame::decode(text.as_str()) else {
                        continue;
                    };
                    let _ = frames_tx.send(frame.clone());
                    respond(frame, &out_tx, answer_pings.load(Ordering::SeqCst));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

fn echo(method: &str, params: &Value) -> Value {
    json!({ "method": method, "params": params })
}

fn respond(frame: Frame, out_tx: &mpsc::UnboundedSender<Frame>, answer_pings: bool) {
    match frame {
        Frame::Request {
            request_id,
            method,
            params,
            ..
        } => match method.as_str() {
            "silent" => {}
            "explode" => {
                let _ = out_tx.send(Frame::Error {
                    request_id: Some(request_id),
                    error: "boom".to_string(),
                    error_type: "ValueError".to_string(),
                });
            }
            "slow" => {
                let delay = params.get("delay_ms").and_then(Value::as_u64).unwrap_or(100);
                let out_tx = out_tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    let _ = out_tx.send(Frame::Response {
                        payload: echo(&method, &params),
                        request_id,
                    });
                });
            }
            _ => {
                let _ = out_tx.send(Frame::Response {
                    payload: echo(&method, &params),
                    request_id,
                });
            }
        },
        Frame::BatchRequest {
            request_id,
            requests,
        } => {
            let results = requests
                .iter()
                .map(|item| match item.method.as_str() {
                    "explode" => json!({
                        "type": "error",
                        "error": "boom",
                        "error_type": "ValueError",
                    }),
                    method => echo(method, &item.params),
                })
                .collect();
            let _ = out_tx.send(Frame::BatchResponse {
                request_id,
                results,
            });
        }
        Frame::Ping { .. } if answer_pings => {
            let _ = out_tx.send(Frame::Pong {
                timestamp: now_timestamp(),
                agent_id: None,
            });
        }
        _ => {}
    }
}
