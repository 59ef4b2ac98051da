//! TCP channel.

use crate::channel::{
    upgrade_persistency, AcceptFailedCallback, Channel, FaceCreatedCallback, FaceCreationError,
};
use crate::face::Face;
use crate::transport::stream::{Reconnector, StreamTransport, StreamTransportOptions};
use futures::future::BoxFuture;
use log::{debug, warn};
use rust_ndnd_common::face::{FacePersistency, FaceScope};
use rust_ndnd_common::uri::FaceUri;
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type ConnectResult = Result<Arc<Face>, FaceCreationError>;

#[derive(Default)]
struct Inner {
    faces: HashMap<SocketAddr, Arc<Face>>,
    /// Remotes with a connect in flight; late callers wait for the result.
    pending: HashMap<SocketAddr, Vec<oneshot::Sender<ConnectResult>>>,
}

pub struct TcpChannel {
    weak: Weak<Self>,
    local: SocketAddr,
    local_uri: FaceUri,
    listening: AtomicBool,
    inner: Mutex<Inner>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TcpChannel {
    pub fn new(local: SocketAddr) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            local,
            local_uri: FaceUri::from_tcp_addr(local),
            listening: AtomicBool::new(false),
            inner: Mutex::new(Inner::default()),
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
                        debug!("[{}] Accepted connection from {}", channel.local_uri, peer);
                        let face =
                            channel.register_face(stream, peer, FacePersistency::OnDemand, false);
                        on_face_created(face);
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

    /// Connects to `remote`, reusing an existing face when there is one.
    ///
    /// Concurrent connects to the same remote coalesce onto one attempt.
    pub async fn connect(
        &self,
        remote: SocketAddr,
        persistency: FacePersistency,
        timeout: Duration,
        bound_device: Option<String>,
    ) -> ConnectResult {
        enum Plan {
            Existing(Arc<Face>),
            Wait(oneshot::Receiver<ConnectResult>),
            Initiate,
        }

        let plan = {
            let mut inner = self.inner.lock().unwrap();
            if let Some(face) = inner.faces.get(&remote) {
                Plan::Existing(Arc::clone(face))
            } else if let Some(waiters) = inner.pending.get_mut(&remote) {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Plan::Wait(rx)
            } else {
                inner.pending.insert(remote, Vec::new());
                Plan::Initiate
            }
        };

        match plan {
            Plan::Existing(face) => {
                upgrade_persistency(&face, persistency);
                Ok(face)
            }
            Plan::Wait(rx) => {
                let result = rx.await.map_err(|_| {
                    FaceCreationError::new(500, "Connect attempt abandoned")
                })??;
                upgrade_persistency(&result, persistency);
                Ok(result)
            }
            Plan::Initiate => {
                let attempt =
                    tokio::time::timeout(timeout, open_stream(remote, bound_device.clone(), timeout))
                        .await;
                let result = match attempt {
                    Ok(Ok(stream)) => {
                        Ok(self.register_face_with_device(stream, remote, persistency, bound_device))
                    }
                    Ok(Err(e)) => Err(FaceCreationError::new(
                        504,
                        format!("Connect failed: {e}"),
                    )),
                    Err(_) => Err(FaceCreationError::new(
                        504,
                        "Connect to remote endpoint timed out",
                    )),
                };
                let waiters = {
                    self.inner
                        .lock()
                        .unwrap()
                        .pending
                        .remove(&remote)
                        .unwrap_or_default()
                };
                for waiter in waiters {
                    let _ = waiter.send(result.clone());
                }
                result
            }
        }
    }

    fn register_face(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        persistency: FacePersistency,
        outgoing: bool,
    ) -> Arc<Face> {
        self.register_face_inner(stream, peer, persistency, outgoing, None)
    }

    fn register_face_with_device(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        persistency: FacePersistency,
        bound_device: Option<String>,
    ) -> Arc<Face> {
        self.register_face_inner(stream, peer, persistency, true, bound_device)
    }

    fn register_face_inner(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        persistency: FacePersistency,
        outgoing: bool,
        bound_device: Option<String>,
    ) -> Arc<Face> {
        let local = stream.local_addr().unwrap_or(self.local);
        let scope = if local.ip().is_loopback() && peer.ip().is_loopback() {
            FaceScope::Local
        } else {
            FaceScope::NonLocal
        };

        let reconnect: Option<Reconnector<TcpStream>> = if outgoing {
            let device = bound_device.clone();
            Some(Box::new(move || {
                open_stream(peer, device.clone(), crate::DEFAULT_TCP_CONNECT_TIMEOUT)
            }))
        } else {
            None
        };
        let allowed = if outgoing {
            vec![FacePersistency::Persistent, FacePersistency::Permanent]
        } else {
            vec![FacePersistency::OnDemand, FacePersistency::Persistent]
        };

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = StreamTransport::spawn(
            stream,
            StreamTransportOptions {
                local_uri: FaceUri::from_tcp_addr(local),
                remote_uri: FaceUri::from_tcp_addr(peer),
                scope,
                persistency,
                allowed_persistencies: allowed,
            },
            reconnect,
            events_tx,
        );
        let face = Face::new(transport, events_rx, false);

        self.inner
            .lock()
            .unwrap()
            .faces
            .insert(peer, Arc::clone(&face));

        let weak = self.weak.clone();
        face.on_closed(move || {
            if let Some(channel) = weak.upgrade() {
                debug!("Erasing {} from channel face map", peer);
                channel.inner.lock().unwrap().faces.remove(&peer);
            }
        });
        face
    }
}

impl Channel for TcpChannel {
    fn local_uri(&self) -> FaceUri {
        self.local_uri.clone()
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn size(&self) -> usize {
        self.inner.lock().unwrap().faces.len()
    }
}

/// Opens an outgoing stream, optionally bound to a network device.
fn open_stream(
    remote: SocketAddr,
    bound_device: Option<String>,
    timeout: Duration,
) -> BoxFuture<'static, io::Result<TcpStream>> {
    Box::pin(async move {
        match bound_device {
            None => TcpStream::connect(remote).await,
            Some(device) => {
                let stream = tokio::task::spawn_blocking(move || -> io::Result<std::net::TcpStream> {
                    let domain = if remote.is_ipv4() {
                        Domain::IPV4
                    } else {
                        Domain::IPV6
                    };
                    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
                    socket.bind_device(Some(device.as_bytes()))?;
                    socket.connect_timeout(&remote.into(), timeout)?;
                    socket.set_nonblocking(true)?;
                    Ok(socket.into())
                })
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
                TcpStream::from_std(stream)
            }
        }
    })
}
