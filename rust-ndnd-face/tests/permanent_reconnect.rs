//! Permanent stream transport reconnect behaviour.

use rust_ndnd_common::face::{FacePersistency, TransportState};
use rust_ndnd_face::channel::tcp::TcpChannel;
use rust_ndnd_face::face::FaceEvent;
use rust_ndnd_face::DEFAULT_TCP_CONNECT_TIMEOUT;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::time::timeout;

#[tokio::test]
async fn permanent_face_returns_to_up_after_peer_restart() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote = listener.local_addr().unwrap();

    // the first incarnation of the peer: accept one connection, then vanish
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);
        tokio::time::sleep(Duration::from_millis(100)).await;
        drop(stream);
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
        .expect("connect failed");
    // outgoing TCP transports accept the permanent upgrade
    face.set_persistency(FacePersistency::Permanent).unwrap();

    server.await.unwrap();

    // peer gone: the permanent transport goes DOWN instead of closing
    timeout(Duration::from_secs(5), async {
        loop {
            match face.next_event().await {
                Some(FaceEvent::StateChange { new, .. }) if new == TransportState::Down => break,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("no DOWN transition");

    // the peer reappears on the same endpoint
    let listener = TcpListener::bind(remote).await.unwrap();
    tokio::spawn(async move {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        // hold the connection open
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(stream);
    });

    // reconnect backoff starts at one second; allow a couple of attempts
    timeout(Duration::from_secs(10), async {
        loop {
            match face.next_event().await {
                Some(FaceEvent::StateChange { new, .. }) if new == TransportState::Up => break,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("no UP transition after peer restart");
    assert_eq!(face.state(), TransportState::Up);

    // explicit close cancels the machinery and terminates cleanly
    face.close();
    timeout(Duration::from_secs(5), async {
        loop {
            match face.next_event().await {
                Some(FaceEvent::StateChange { new, .. }) if new == TransportState::Closed => break,
                Some(_) => continue,
                None => break,
            }
        }
    })
    .await
    .expect("no CLOSED transition");
}

#[tokio::test]
async fn outgoing_face_rejects_on_demand() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let remote = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _held = listener.accept().await;
        tokio::time::sleep(Duration::from_secs(10)).await;
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

    // outgoing transports may become permanent, but never on-demand again
    assert!(face.set_persistency(FacePersistency::OnDemand).is_err());
}
