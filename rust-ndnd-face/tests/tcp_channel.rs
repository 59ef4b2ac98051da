//! TCP channel integration tests over loopback.

use bytes::Bytes;
use rust_ndnd_common::face::{FacePersistency, FaceScope, TransportState};
use rust_ndnd_common::ndn::{Data, Interest, Name};
use rust_ndnd_face::channel::tcp::TcpChannel;
use rust_ndnd_face::channel::Channel;
use rust_ndnd_face::face::{Face, FaceEvent};
use rust_ndnd_face::{FaceTable, DEFAULT_TCP_CONNECT_TIMEOUT};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

fn accept_sink() -> (
    Arc<dyn Fn(Arc<Face>) + Send + Sync>,
    mpsc::UnboundedReceiver<Arc<Face>>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(move |face| drop(tx.send(face))), rx)
}

async fn next_face(rx: &mut mpsc::UnboundedReceiver<Arc<Face>>) -> Arc<Face> {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("face creation timed out")
        .expect("channel dropped")
}

async fn next_event(face: &Face) -> FaceEvent {
    timeout(Duration::from_secs(5), face.next_event())
        .await
        .expect("event timed out")
        .expect("face event stream ended")
}

#[tokio::test]
async fn tcp_end_to_end() {
    let local: SocketAddr = "127.0.0.1:20070".parse().unwrap();
    let channel = TcpChannel::new(local);
    let (on_created, mut created) = accept_sink();
    channel
        .listen(on_created, Arc::new(|_| {}))
        .expect("listen failed");
    assert!(channel.is_listening());

    let mut client = TcpStream::connect(local).await.unwrap();
    let server_face = next_face(&mut created).await;
    assert_eq!(server_face.scope(), FaceScope::Local);
    assert_eq!(server_face.persistency(), FacePersistency::OnDemand);

    let interest = Interest::new(Name::from_string("/TpnzGvW9R").unwrap());
    let data = Data::new(Name::from_string("/KfczhUqVix").unwrap(), Bytes::new());
    let interest_wire = interest.to_wire();
    let data_wire = data.to_wire();

    client.write_all(&interest_wire).await.unwrap();
    client.write_all(&data_wire).await.unwrap();

    match next_event(&server_face).await {
        FaceEvent::Interest(received) => {
            assert_eq!(received.name().to_string(), "/TpnzGvW9R");
        }
        other => panic!("expected Interest, got {:?}", other),
    }
    match next_event(&server_face).await {
        FaceEvent::Data(received) => {
            assert_eq!(received.name().to_string(), "/KfczhUqVix");
        }
        other => panic!("expected Data, got {:?}", other),
    }

    let counters = server_face.counters();
    assert_eq!(counters.n_in_interests.value(), 1);
    assert_eq!(counters.n_in_data.value(), 1);
    assert_eq!(
        counters.n_in_bytes.value(),
        (interest_wire.len() + data_wire.len()) as u64
    );
    assert_eq!(channel.size(), 1);
}

#[tokio::test]
async fn connect_deduplicates_per_remote() {
    // a plain listener stands in for the remote forwarder
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });

    let channel = TcpChannel::new("127.0.0.1:0".parse().unwrap());
    let table = FaceTable::new();

    let first = channel
        .connect(
            remote,
            FacePersistency::Persistent,
            DEFAULT_TCP_CONNECT_TIMEOUT,
            None,
        )
        .await
        .expect("first connect failed");
    table.add(Arc::clone(&first));
    assert_eq!(channel.size(), 1);

    let second = channel
        .connect(
            remote,
            FacePersistency::Persistent,
            DEFAULT_TCP_CONNECT_TIMEOUT,
            None,
        )
        .await
        .expect("second connect failed");
    table.add(Arc::clone(&second));

    assert_eq!(second.id(), first.id());
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(channel.size(), 1);
}

#[tokio::test]
async fn concurrent_connects_coalesce() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });

    let channel = TcpChannel::new("127.0.0.1:0".parse().unwrap());
    let a = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            channel
                .connect(
                    remote,
                    FacePersistency::Persistent,
                    DEFAULT_TCP_CONNECT_TIMEOUT,
                    None,
                )
                .await
        })
    };
    let b = {
        let channel = Arc::clone(&channel);
        tokio::spawn(async move {
            channel
                .connect(
                    remote,
                    FacePersistency::Persistent,
                    DEFAULT_TCP_CONNECT_TIMEOUT,
                    None,
                )
                .await
        })
    };

    let a = a.await.unwrap().expect("connect a failed");
    let b = b.await.unwrap().expect("connect b failed");
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(channel.size(), 1);
}

#[tokio::test]
async fn oversize_declaration_fails_the_face() {
    let local: SocketAddr = "127.0.0.1:20071".parse().unwrap();
    let channel = TcpChannel::new(local);
    let (on_created, mut created) = accept_sink();
    channel.listen(on_created, Arc::new(|_| {})).unwrap();

    let mut client = TcpStream::connect(local).await.unwrap();
    let server_face = next_face(&mut created).await;

    // Interest TLV declaring a 60000-byte payload
    client.write_all(&[0x05, 253, 0xEA, 0x60]).await.unwrap();

    let mut states = Vec::new();
    loop {
        match next_event(&server_face).await {
            FaceEvent::StateChange { new, .. } => {
                states.push(new);
                if new == TransportState::Closed {
                    break;
                }
            }
            other => panic!("no block should be dispatched, got {:?}", other),
        }
    }
    assert_eq!(states, vec![TransportState::Failed, TransportState::Closed]);

    // the final CLOSED erases the face from the channel map
    timeout(Duration::from_secs(5), async {
        while channel.size() != 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("face map entry not erased");
}

#[tokio::test]
async fn listen_is_idempotent() {
    let channel = TcpChannel::new("127.0.0.1:20072".parse().unwrap());
    let (on_created, _created) = accept_sink();
    channel
        .listen(Arc::clone(&on_created), Arc::new(|_| {}))
        .unwrap();
    channel.listen(on_created, Arc::new(|_| {})).unwrap();
    assert!(channel.is_listening());
}

#[tokio::test]
async fn persistency_upgrade_is_monotone() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            held.push(stream);
        }
    });

    let channel = TcpChannel::new("127.0.0.1:0".parse().unwrap());
    let face = channel
        .connect(
            remote,
            FacePersistency::Persistent,
            DEFAULT_TCP_CONNECT_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert_eq!(face.persistency(), FacePersistency::Persistent);

    // an upgrade is applied on reconnect
    let same = channel
        .connect(
            remote,
            FacePersistency::Permanent,
            DEFAULT_TCP_CONNECT_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&face, &same));
    assert_eq!(face.persistency(), FacePersistency::Permanent);

    // a downgrade is silently ignored
    let same = channel
        .connect(
            remote,
            FacePersistency::Persistent,
            DEFAULT_TCP_CONNECT_TIMEOUT,
            None,
        )
        .await
        .unwrap();
    assert!(Arc::ptr_eq(&face, &same));
    assert_eq!(face.persistency(), FacePersistency::Permanent);
}
