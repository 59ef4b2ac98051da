//! WebSocket channel.
//!
//! Accepts TCP connections, performs the WebSocket handshake, and backs each
//! client with an on-demand face. Keep-alive parameters are fixed before the
//! channel starts listening.

use crate::channel::{AcceptFailedCallback, Channel, FaceCreatedCallback};
use crate::face::Face;
use crate::transport::websocket::WebSocketTransport;
use log::{debug, warn};
use rust_ndnd_common::uri::FaceUri;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;

pub struct WebSocketChannel {
    weak: Weak<Self>,
    local: SocketAddr,
    local_uri: FaceUri,
    ping_interval: Duration,
    pong_timeout: Duration,
    listening: AtomicBool,
    faces: Mutex<HashMap<SocketAddr, Arc<Face>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketChannel {
    pub fn new(local: SocketAddr, ping_interval: Duration, pong_timeout: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            local,
            local_uri: FaceUri::from_ws_addr("ws", local),
            ping_interval,
            pong_timeout,
            listening: AtomicBool::new(false),
            faces: Mutex::new(HashMap::new()),
            accept_task: Mutex::new(None),
        })
    }

    pub fn local_endpoint(&self) -> SocketAddr {
        self.local
    }

    /// Starts accepting connections. Idempotent.
    pub fn listen(
        &self,
        on_face_created: FaceCreatedCallback,
        on_accept_failed: AcceptFailedCallback,
    ) -> io::Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            warn!("[{}] Already listening", self.local_uri);
            return Ok(());
        }

        let listener = match crate::channel::bind_tcp_listener(self.local) {
            Ok(listener) => listener,
            Err(e) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let Some(channel) = self.weak.upgrade() else {
            return Ok(());
        };
        let task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        let channel = Arc::clone(&channel);
                        let on_face_created = Arc::clone(&on_face_created);
                        let on_accept_failed = Arc::clone(&on_accept_failed);
                        tokio::spawn(async move {
                            match accept_async(stream).await {
                                Ok(ws) => {
                                    debug!(
                                        "[{}] Accepted connection from {}",
                                        channel.local_uri, peer
                                    );
                                    let face = channel.register_face(ws, peer);
                                    on_face_created(face);
                                }
                                Err(e) => {
                                    warn!(
                                        "[{}] Handshake with {} failed: {}",
                                        channel.local_uri, peer, e
                                    );
                                    on_accept_failed(&e.to_string());
                                }
                            }
                        });
                    }
                    Err(e) => {
                        warn!("[{}] Accept failed: {}", channel.local_uri, e);
                        on_accept_failed(&e.to_string());
                    }
                }
            }
        });
        *self.accept_task.lock().unwrap() = Some(task);
        Ok(())
    }

    /// Stops the acceptor. Existing faces are unaffected.
    pub fn retire(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        self.listening.store(false, Ordering::SeqCst);
    }

    fn register_face(
        &self,
        ws: tokio_tungstenite::WebSocketStream<TcpStream>,
        peer: SocketAddr,
    ) -> Arc<Face> {
        let local = ws
            .get_ref()
            .local_addr()
            .unwrap_or(self.local);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = WebSocketTransport::spawn(
            ws,
            local,
            peer,
            self.ping_interval,
            self.pong_timeout,
            events_tx,
        );
        let face = Face::new(transport, events_rx, false);

        self.faces.lock().unwrap().insert(peer, Arc::clone(&face));

        let weak = self.weak.clone();
        face.on_closed(move || {
            if let Some(channel) = weak.upgrade() {
                channel.faces.lock().unwrap().remove(&peer);
            }
        });
        face
    }
}

impl Channel for WebSocketChannel {
    fn local_uri(&self) -> FaceUri {
        self.local_uri.clone()
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn size(&self) -> usize {
        self.faces.lock().unwrap().len()
    }
}
