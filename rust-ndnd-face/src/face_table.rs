//! Face table: the registry that assigns face ids and holds strong
//! references.
//!
//! The face system only appends: channels and factories push newly created
//! faces through the "face created" callback. Entries leave the table when
//! their face reaches CLOSED.

use crate::face::Face;
use log::info;
use rust_ndnd_common::face::FaceId;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, Weak};
use tokio::sync::mpsc;

#[derive(Default)]
struct Inner {
    next_id: u64,
    faces: BTreeMap<u64, Arc<Face>>,
    subscriber: Option<mpsc::UnboundedSender<Arc<Face>>>,
}

pub struct FaceTable {
    weak: Weak<Self>,
    inner: Mutex<Inner>,
}

impl FaceTable {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            weak: weak.clone(),
            inner: Mutex::new(Inner {
                next_id: 1,
                faces: BTreeMap::new(),
                subscriber: None,
            }),
        })
    }

    /// Streams every face added after this call; one subscriber at a time.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Arc<Face>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().subscriber = Some(tx);
        rx
    }

    /// Registers a face, assigning the next id. Re-adding is a no-op.
    pub fn add(&self, face: Arc<Face>) {
        if face.id().is_valid() {
            return;
        }
        let id = {
            let mut inner = self.inner.lock().unwrap();
            let id = inner.next_id;
            inner.next_id += 1;
            face.set_id(FaceId(id));
            inner.faces.insert(id, Arc::clone(&face));
            if let Some(subscriber) = &inner.subscriber {
                let _ = subscriber.send(Arc::clone(&face));
            }
            id
        };
        info!(
            "Added face id={} remote={} local={}",
            id,
            face.remote_uri(),
            face.local_uri()
        );

        let table = self.weak.clone();
        face.on_closed(move || {
            if let Some(table) = table.upgrade() {
                table.remove(FaceId(id));
            }
        });
    }

    fn remove(&self, id: FaceId) {
        if self.inner.lock().unwrap().faces.remove(&id.0).is_some() {
            info!("Removed face id={}", id);
        }
    }

    pub fn get(&self, id: FaceId) -> Option<Arc<Face>> {
        self.inner.lock().unwrap().faces.get(&id.0).cloned()
    }

    pub fn faces(&self) -> Vec<Arc<Face>> {
        self.inner.lock().unwrap().faces.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().faces.is_empty()
    }
}
