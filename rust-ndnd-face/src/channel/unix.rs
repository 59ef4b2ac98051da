//! Unix stream channel.
//!
//! Accepted faces are local scope and always on-demand; their remote URI is
//! the accepted descriptor (`fd://<n>`), there being no addressable peer.

use crate::channel::{AcceptFailedCallback, Channel, FaceCreatedCallback};
use crate::face::Face;
use crate::transport::stream::{StreamTransport, StreamTransportOptions};
use log::{debug, warn};
use rust_ndnd_common::face::{FacePersistency, FaceScope};
use rust_ndnd_common::uri::FaceUri;
use std::collections::HashMap;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

pub struct UnixStreamChannel {
    weak: Weak<Self>,
    path: PathBuf,
    local_uri: FaceUri,
    listening: AtomicBool,
    faces: Mutex<HashMap<i32, Arc<Face>>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl UnixStreamChannel {
    pub fn new(path: &Path) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            path: path.to_path_buf(),
            local_uri: FaceUri::from_unix_path(&path.to_string_lossy()),
            listening: AtomicBool::new(false),
            faces: Mutex::new(HashMap::new()),
            accept_task: Mutex::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
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

        let listener = match self.bind_listener() {
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
                    Ok((stream, _addr)) => {
                        let face = channel.register_face(stream);
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

    /// Stops the acceptor and removes the socket file.
    pub fn retire(&self) {
        if let Some(task) = self.accept_task.lock().unwrap().take() {
            task.abort();
        }
        self.listening.store(false, Ordering::SeqCst);
        let _ = std::fs::remove_file(&self.path);
    }

    fn bind_listener(&self) -> io::Result<tokio::net::UnixListener> {
        if self.path.exists() {
            // a live socket means another instance owns the path; a dead one
            // is a leftover we may reclaim
            match std::os::unix::net::UnixStream::connect(&self.path) {
                Ok(_) => {
                    return Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("{} is in use by another process", self.path.display()),
                    ));
                }
                Err(_) => {
                    debug!("[{}] Removing stale socket file", self.local_uri);
                    std::fs::remove_file(&self.path)?;
                }
            }
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = std::os::unix::net::UnixListener::bind(&self.path)?;
        listener.set_nonblocking(true)?;
        tokio::net::UnixListener::from_std(listener)
    }

    fn register_face(&self, stream: UnixStream) -> Arc<Face> {
        let fd = stream.as_raw_fd();
        debug!("[{}] Accepted connection on fd {}", self.local_uri, fd);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let transport = StreamTransport::spawn(
            stream,
            StreamTransportOptions {
                local_uri: self.local_uri.clone(),
                remote_uri: FaceUri::from_fd(fd),
                scope: FaceScope::Local,
                persistency: FacePersistency::OnDemand,
                allowed_persistencies: vec![FacePersistency::OnDemand],
            },
            None,
            events_tx,
        );
        let face = Face::new(transport, events_rx, false);

        self.faces.lock().unwrap().insert(fd, Arc::clone(&face));

        let weak = self.weak.clone();
        face.on_closed(move || {
            if let Some(channel) = weak.upgrade() {
                channel.faces.lock().unwrap().remove(&fd);
            }
        });
        face
    }
}

impl Channel for UnixStreamChannel {
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
