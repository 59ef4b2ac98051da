//! Unix stream channel integration tests.

use rust_ndnd_common::face::{FacePersistency, FaceScope};
use rust_ndnd_common::ndn::{Interest, Name};
use rust_ndnd_face::channel::unix::UnixStreamChannel;
use rust_ndnd_face::channel::Channel;
use rust_ndnd_face::face::{Face, FaceEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::timeout;

fn accept_sink() -> (
    Arc<dyn Fn(Arc<Face>) + Send + Sync>,
    mpsc::UnboundedReceiver<Arc<Face>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(move |face| drop(tx.send(face))), rx)
}

#[tokio::test]
async fn accepts_local_on_demand_faces() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("face.sock");

    let channel = UnixStreamChannel::new(&path);
    let (on_created, mut created) = accept_sink();
    channel.listen(on_created, Arc::new(|_| {})).unwrap();
    assert!(channel.is_listening());

    let mut client = UnixStream::connect(&path).await.unwrap();
    let face = timeout(Duration::from_secs(5), created.recv())
        .await
        .expect("face creation timed out")
        .unwrap();

    assert_eq!(face.scope(), FaceScope::Local);
    assert_eq!(face.persistency(), FacePersistency::OnDemand);
    assert_eq!(face.remote_uri().scheme(), "fd");
    assert_eq!(channel.size(), 1);

    // accepted unix faces stay on-demand
    assert!(face.set_persistency(FacePersistency::Persistent).is_err());

    let interest = Interest::new(Name::from_string("/local/app").unwrap());
    client.write_all(&interest.to_wire()).await.unwrap();

    match timeout(Duration::from_secs(5), face.next_event())
        .await
        .expect("event timed out")
        .unwrap()
    {
        FaceEvent::Interest(received) => {
            assert_eq!(received.name().to_string(), "/local/app");
        }
        other => panic!("expected Interest, got {:?}", other),
    }
}

#[tokio::test]
async fn reclaims_stale_socket_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stale.sock");

    // a dead socket file nobody answers on
    drop(std::os::unix::net::UnixListener::bind(&path).unwrap());
    assert!(path.exists());

    let channel = UnixStreamChannel::new(&path);
    let (on_created, _created) = accept_sink();
    channel.listen(on_created, Arc::new(|_| {})).unwrap();

    // the stale file was replaced by a live socket
    UnixStream::connect(&path).await.expect("connect failed");
}

#[tokio::test]
async fn refuses_path_owned_by_live_listener() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.sock");

    let _owner = std::os::unix::net::UnixListener::bind(&path).unwrap();

    let channel = UnixStreamChannel::new(&path);
    let (on_created, _created) = accept_sink();
    let err = channel.listen(on_created, Arc::new(|_| {})).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::AddrInUse);
    assert!(!channel.is_listening());
}
