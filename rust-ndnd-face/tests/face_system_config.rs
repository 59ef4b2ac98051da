//! FaceSystem configuration processing tests.

use ipnetwork::IpNetwork;
use rust_ndnd_common::face::FacePersistency;
use rust_ndnd_face::config::ConfigSection;
use rust_ndnd_face::net::NetworkInterfaceInfo;
use rust_ndnd_face::{FaceCreateRequest, FaceSystem, FaceTable};

fn fake_netifs() -> Vec<NetworkInterfaceInfo> {
    let ips: Vec<IpNetwork> = vec![
        "192.0.2.1/24".parse().unwrap(),
        "192.0.2.2/24".parse().unwrap(),
    ];
    vec![
        NetworkInterfaceInfo {
            index: 1,
            name: "lo".into(),
            mac: None,
            ips: vec!["127.0.0.1/8".parse().unwrap()],
            is_up: true,
            is_loopback: true,
            is_multicast: false,
            is_broadcast: false,
        },
        NetworkInterfaceInfo {
            index: 2,
            name: "eth0".into(),
            mac: Some("3e:15:c2:8b:65:00".parse().unwrap()),
            ips,
            is_up: true,
            is_loopback: false,
            is_multicast: true,
            is_broadcast: true,
        },
    ]
}

fn face_system() -> FaceSystem {
    FaceSystem::with_netif_provider(FaceTable::new(), Box::new(fake_netifs))
}

fn sample_config(tcp_port: u16, udp_port: u16) -> ConfigSection {
    ConfigSection::new()
        .with_section(
            "tcp",
            ConfigSection::new()
                .with_value("port", tcp_port)
                .with_value("enable_v6", "no"),
        )
        .with_section(
            "udp",
            ConfigSection::new()
                .with_value("port", udp_port)
                .with_value("enable_v6", "no")
                .with_value("mcast", "no"),
        )
}

fn channel_uris(face_system: &FaceSystem) -> Vec<String> {
    let mut uris: Vec<String> = face_system
        .factory_ids()
        .into_iter()
        .filter_map(|id| face_system.factory_by_id(id))
        .flat_map(|factory| {
            factory
                .channels()
                .into_iter()
                .map(|channel| channel.local_uri().to_string())
                .collect::<Vec<_>>()
        })
        .collect();
    uris.sort();
    uris
}

#[tokio::test]
async fn dry_run_leaves_observable_state_unchanged() {
    let system = face_system();
    let section = sample_config(57011, 57012);

    system.process_config(&section, true).unwrap();

    assert!(channel_uris(&system).is_empty());
    assert!(system.factory_by_scheme("tcp4").is_none());
    assert!(system.factory_by_scheme("udp4").is_none());
    assert!(system.face_table().is_empty());
}

#[tokio::test]
async fn dry_run_reports_errors() {
    let system = face_system();

    let unknown_key = ConfigSection::new()
        .with_section("tcp", ConfigSection::new().with_value("bogus", 1));
    assert!(system.process_config(&unknown_key, true).is_err());

    let unknown_section =
        ConfigSection::new().with_section("carrier_pigeon", ConfigSection::new());
    let err = system.process_config(&unknown_section, true).unwrap_err();
    assert!(err
        .to_string()
        .contains("Unrecognized option face_system.carrier_pigeon"));

    let duplicate = ConfigSection::new()
        .with_section("tcp", ConfigSection::new())
        .with_section("tcp", ConfigSection::new());
    let err = system.process_config(&duplicate, true).unwrap_err();
    assert!(err.to_string().contains("Duplicate section face_system.tcp"));
}

#[tokio::test]
async fn commit_is_idempotent() {
    let system = face_system();
    let section = sample_config(57013, 57014);

    system.process_config(&section, false).unwrap();
    let first = channel_uris(&system);
    assert_eq!(first.len(), 2);

    system.process_config(&section, false).unwrap();
    let second = channel_uris(&system);
    assert_eq!(first, second);
}

#[tokio::test]
async fn scheme_index_follows_configuration() {
    let system = face_system();

    system
        .process_config(&sample_config(57015, 57016), false)
        .unwrap();
    assert!(system.factory_by_scheme("tcp4").is_some());
    assert!(system.factory_by_scheme("udp4").is_some());
    assert!(system.factory_by_scheme("udp4+dev").is_some());
    // v6 was disabled
    assert!(system.factory_by_scheme("tcp6").is_none());

    // dropping the tcp section retires its channels and schemes
    let without_tcp = ConfigSection::new().with_section(
        "udp",
        ConfigSection::new()
            .with_value("port", 57016)
            .with_value("enable_v6", "no")
            .with_value("mcast", "no"),
    );
    system.process_config(&without_tcp, false).unwrap();
    assert!(system.factory_by_scheme("tcp4").is_none());
    assert!(system.factory_by_scheme("udp4").is_some());
    assert_eq!(channel_uris(&system).len(), 1);
}

#[tokio::test]
async fn prohibited_endpoints_expand_wildcards() {
    let system = face_system();
    let section = ConfigSection::new().with_section(
        "udp",
        ConfigSection::new()
            .with_value("port", 57017)
            .with_value("enable_v6", "no")
            .with_value("mcast", "no"),
    );
    system.process_config(&section, false).unwrap();

    // every alias of the wildcard bind point is refused with 406
    for prohibited in [
        "udp4://192.0.2.1:57017",
        "udp4://192.0.2.2:57017",
        "udp4://192.0.2.255:57017",
        "udp4://255.255.255.255:57017",
        "udp4://0.0.0.0:57017",
    ] {
        let request = FaceCreateRequest::new(
            prohibited.parse().unwrap(),
            FacePersistency::Persistent,
        );
        let err = system.create_face(request).await.unwrap_err();
        assert_eq!(err.status, 406, "expected 406 for {prohibited}");
        assert!(err.reason.contains("prohibited"));
    }

    // a non-aliased endpoint connects fine
    let request = FaceCreateRequest::new(
        "udp4://127.0.0.1:57099".parse().unwrap(),
        FacePersistency::Persistent,
    );
    let face = system.create_face(request).await.unwrap();
    assert!(face.id().is_valid());
    assert_eq!(system.face_table().len(), 1);
}

#[tokio::test]
async fn unsupported_scheme_and_non_canonical_rejected() {
    let system = face_system();
    system
        .process_config(&sample_config(57018, 57019), false)
        .unwrap();

    let request = FaceCreateRequest::new(
        "quic://127.0.0.1:6363".parse().unwrap(),
        FacePersistency::Persistent,
    );
    let err = system.create_face(request).await.unwrap_err();
    assert_eq!(err.status, 406);
    assert!(err.reason.contains("Non-canonical") || err.reason.contains("Unsupported"));

    let request = FaceCreateRequest::new(
        "tcp4://example.net:6363".parse().unwrap(),
        FacePersistency::Persistent,
    );
    let err = system.create_face(request).await.unwrap_err();
    assert_eq!(err.status, 406);
}

#[tokio::test]
async fn netdev_rules_validated_on_commit() {
    let system = face_system();

    // udp4+dev is unavailable because no udp section is configured
    let section = ConfigSection::new().with_section(
        "netdev_bound",
        ConfigSection::new().with_section(
            "rule",
            ConfigSection::new().with_value("remote", "udp4://192.0.2.77:6363"),
        ),
    );
    let err = system.process_config(&section, false).unwrap_err();
    assert!(err.to_string().contains("udp4+dev"));

    // the same section passes dry-run: schemes are unknowable there
    system.process_config(&section, true).unwrap();
}
