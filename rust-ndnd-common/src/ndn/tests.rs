//! Unit tests for the NDN packet implementation

use super::*;

#[test]
fn test_name_creation() {
    let name = Name::from_string("/test/data/1").unwrap();

    assert_eq!(name.len(), 3);
    assert_eq!(name.get(0).unwrap().as_bytes().as_ref(), b"test");
    assert_eq!(name.get(1).unwrap().as_bytes().as_ref(), b"data");
    assert_eq!(name.get(2).unwrap().as_bytes().as_ref(), b"1");

    assert_eq!(name.to_string(), "/test/data/1");
}

#[test]
fn test_name_compare() {
    let name1 = Name::from_string("/a/b/c").unwrap();
    let name2 = Name::from_string("/a/b/c").unwrap();
    let name3 = Name::from_string("/a/b/d").unwrap();
    let name4 = Name::from_string("/a/b").unwrap();

    assert_eq!(name1, name2);
    assert_ne!(name1, name3);
    assert_ne!(name1, name4);

    assert!(name4.is_prefix_of(&name1));
    assert!(!name1.is_prefix_of(&name4));
    assert!(!name3.is_prefix_of(&name1));
}

#[test]
fn test_name_tlv_round_trip() {
    let name = Name::from_string("/round/trip").unwrap();
    let element = name.to_tlv();
    let parsed = Name::from_tlv(&element).unwrap();
    assert_eq!(parsed, name);
}

#[test]
fn test_interest_packet() {
    let name = Name::from_string("/test/interest").unwrap();
    let interest = Interest::new(name.clone())
        .with_can_be_prefix(true)
        .with_must_be_fresh(true)
        .with_nonce(42)
        .with_lifetime(4000)
        .with_hop_limit(32);

    assert_eq!(interest.name(), &name);
    assert!(interest.can_be_prefix);
    assert!(interest.must_be_fresh);
    assert_eq!(interest.nonce, Some(42));
    assert_eq!(interest.lifetime_ms, 4000);

    let wire = interest.to_wire();
    assert_eq!(wire[0], tlv::TLV_INTEREST as u8);
    let parsed = Interest::from_wire(&wire).unwrap();

    assert_eq!(parsed.name(), &name);
    assert!(parsed.can_be_prefix);
    assert!(parsed.must_be_fresh);
    assert_eq!(parsed.nonce, Some(42));
    assert_eq!(parsed.lifetime_ms, 4000);
    assert_eq!(parsed.hop_limit, Some(32));
}

#[test]
fn test_data_packet() {
    let name = Name::from_string("/test/data").unwrap();
    let content = Bytes::from_static(b"Hello, NDN!");
    let data = Data::new(name.clone(), content.clone()).with_freshness_period(10_000);

    assert_eq!(data.name(), &name);
    assert_eq!(data.content(), &content);

    let wire = data.to_wire();
    assert_eq!(wire[0], tlv::TLV_DATA as u8);
    let parsed = Data::from_wire(&wire).unwrap();

    assert_eq!(parsed.name(), &name);
    assert_eq!(parsed.content(), &content);
    assert_eq!(parsed.freshness_period_ms, Some(10_000));
}

#[test]
fn test_data_empty_content() {
    let data = Data::new(Name::from_string("/KfczhUqVix").unwrap(), Bytes::new());
    let parsed = Data::from_wire(&data.to_wire()).unwrap();
    assert!(parsed.content().is_empty());
    assert_eq!(parsed.name().to_string(), "/KfczhUqVix");
}

#[test]
fn test_nack_round_trip() {
    let interest = Interest::new(Name::from_string("/no/route").unwrap()).with_nonce(7);
    let nack = Nack::new(NackReason::NoRoute, interest.clone());

    let wire = nack.to_wire();
    assert_eq!(wire[0], tlv::TLV_LP_PACKET as u8);

    match NetworkPacket::from_wire(&wire).unwrap() {
        NetworkPacket::Nack(parsed) => {
            assert_eq!(parsed.reason, NackReason::NoRoute);
            assert_eq!(parsed.interest.name(), interest.name());
            assert_eq!(parsed.interest.nonce, Some(7));
        }
        other => panic!("expected Nack, got {}", other.packet_type()),
    }
}

#[test]
fn test_idle_lp_packet() {
    let lp = LpPacket::idle();
    assert!(lp.is_idle());

    let wire = lp.to_wire();
    let mut buf = Bytes::copy_from_slice(&wire);
    let outer = TlvElement::decode(&mut buf).unwrap();
    let parsed = LpPacket::from_tlv(&outer).unwrap();
    assert!(parsed.is_idle());
}

#[test]
fn test_network_packet_dispatch() {
    let interest = Interest::new(Name::from_string("/x").unwrap());
    let data = Data::new(Name::from_string("/y").unwrap(), Bytes::new());

    assert_eq!(
        NetworkPacket::from_wire(&interest.to_wire())
            .unwrap()
            .packet_type(),
        "Interest"
    );
    assert_eq!(
        NetworkPacket::from_wire(&data.to_wire())
            .unwrap()
            .packet_type(),
        "Data"
    );
    assert!(NetworkPacket::from_wire(&[0x63, 0x00]).is_err());
}
