//! NDN packet types and structures.
//!
//! This module provides the network-layer packet types (Interest, Data,
//! Nack) together with their TLV wire codecs, and the NDNLPv2 link packet
//! used by Nacks and by link layers that frame with LpPackets.

use crate::error::Error;
use crate::tlv::{self, TlvElement};
use bytes::{Buf, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an NDN name component.
pub const MAX_NAME_COMPONENT_LENGTH: usize = 255;
/// Maximum size of an NDN packet.
pub const MAX_NDN_PACKET_SIZE: usize = tlv::MAX_NDN_PACKET_SIZE;

/* ---------------------------------------------------------------- *\
 * Name and NameComponent
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NameComponent(pub Bytes);

impl NameComponent {
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.0
    }

    pub fn to_tlv(&self) -> TlvElement {
        TlvElement::new(tlv::TLV_COMPONENT, self.0.clone())
    }

    pub fn from_tlv(element: &TlvElement) -> Result<Self, Error> {
        if element.tlv_type != tlv::TLV_COMPONENT {
            return Err(Error::NdnPacket(format!(
                "Expected name component TLV type {}, got {}",
                tlv::TLV_COMPONENT,
                element.tlv_type
            )));
        }
        Ok(Self(element.value.clone()))
    }
}

impl fmt::Display for NameComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let printable = self.0.iter().all(|&b| b.is_ascii_graphic() || b == b' ');
        if printable {
            write!(f, "{}", String::from_utf8_lossy(&self.0))
        } else {
            write!(f, "0x")?;
            for &b in &self.0 {
                write!(f, "{:02x}", b)?;
            }
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Name {
    components: Vec<NameComponent>,
}

impl Name {
    pub fn new() -> Self {
        Self {
            components: Vec::new(),
        }
    }

    pub fn from_string(s: &str) -> Result<Self, Error> {
        let components: Vec<NameComponent> = s
            .split('/')
            .filter(|comp| !comp.is_empty())
            .map(|comp| NameComponent::new(comp.as_bytes().to_vec()))
            .collect();
        for c in &components {
            if c.0.len() > MAX_NAME_COMPONENT_LENGTH {
                return Err(Error::NdnPacket("Name component too long".into()));
            }
        }
        Ok(Self { components })
    }

    pub fn push(&mut self, component: NameComponent) -> &mut Self {
        self.components.push(component);
        self
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn components(&self) -> impl Iterator<Item = &NameComponent> {
        self.components.iter()
    }

    pub fn get(&self, index: usize) -> Option<&NameComponent> {
        self.components.get(index)
    }

    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.components.len() <= other.components.len()
            && self
                .components
                .iter()
                .zip(other.components.iter())
                .all(|(a, b)| a == b)
    }

    pub fn to_tlv(&self) -> TlvElement {
        let mut buf = BytesMut::new();
        for component in &self.components {
            component.to_tlv().encode(&mut buf);
        }
        TlvElement::new(tlv::TLV_NAME, buf.freeze())
    }

    pub fn from_tlv(element: &TlvElement) -> Result<Self, Error> {
        if element.tlv_type != tlv::TLV_NAME {
            return Err(Error::NdnPacket(format!(
                "Expected name TLV type {}, got {}",
                tlv::TLV_NAME,
                element.tlv_type
            )));
        }

        let mut components = Vec::new();
        let mut buf = element.value.clone();
        while buf.has_remaining() {
            let e = TlvElement::decode(&mut buf)?;
            components.push(NameComponent::from_tlv(&e)?);
        }
        Ok(Self { components })
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components.is_empty() {
            return write!(f, "/");
        }
        for component in &self.components {
            write!(f, "/{}", component)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Name::from_string(s)
    }
}

/* ---------------------------------------------------------------- *\
 * Interest
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq)]
pub struct Interest {
    pub name: Name,
    pub can_be_prefix: bool,
    pub must_be_fresh: bool,
    pub nonce: Option<u32>,
    pub lifetime_ms: u64,
    pub hop_limit: Option<u8>,
}

impl Interest {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            can_be_prefix: false,
            must_be_fresh: false,
            nonce: None,
            lifetime_ms: 4000,
            hop_limit: None,
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn with_nonce(mut self, nonce: u32) -> Self {
        self.nonce = Some(nonce);
        self
    }
    pub fn with_lifetime(mut self, lifetime_ms: u64) -> Self {
        self.lifetime_ms = lifetime_ms;
        self
    }
    pub fn with_can_be_prefix(mut self, can_be_prefix: bool) -> Self {
        self.can_be_prefix = can_be_prefix;
        self
    }
    pub fn with_must_be_fresh(mut self, must_be_fresh: bool) -> Self {
        self.must_be_fresh = must_be_fresh;
        self
    }
    pub fn with_hop_limit(mut self, hop_limit: u8) -> Self {
        self.hop_limit = Some(hop_limit);
        self
    }

    /// Encodes this Interest into its wire format.
    pub fn to_wire(&self) -> Bytes {
        let mut inner = BytesMut::new();
        self.name.to_tlv().encode(&mut inner);
        if self.can_be_prefix {
            TlvElement::new(tlv::TLV_CAN_BE_PREFIX, Bytes::new()).encode(&mut inner);
        }
        if self.must_be_fresh {
            TlvElement::new(tlv::TLV_MUST_BE_FRESH, Bytes::new()).encode(&mut inner);
        }
        if let Some(nonce) = self.nonce {
            TlvElement::new(tlv::TLV_NONCE, Bytes::copy_from_slice(&nonce.to_be_bytes()))
                .encode(&mut inner);
        }
        TlvElement::from_uint(tlv::TLV_INTEREST_LIFETIME, self.lifetime_ms).encode(&mut inner);
        if let Some(hop_limit) = self.hop_limit {
            TlvElement::new(tlv::TLV_HOP_LIMIT, Bytes::copy_from_slice(&[hop_limit]))
                .encode(&mut inner);
        }

        let mut wire = BytesMut::new();
        TlvElement::new(tlv::TLV_INTEREST, inner.freeze()).encode(&mut wire);
        wire.freeze()
    }

    /// Decodes an Interest from its wire format.
    pub fn from_wire(wire: &[u8]) -> Result<Self, Error> {
        let mut buf = Bytes::copy_from_slice(wire);
        let outer = TlvElement::decode(&mut buf)?;
        Self::from_tlv(&outer)
    }

    pub fn from_tlv(outer: &TlvElement) -> Result<Self, Error> {
        if outer.tlv_type != tlv::TLV_INTEREST {
            return Err(Error::NdnPacket(format!(
                "Expected Interest TLV type {}, got {}",
                tlv::TLV_INTEREST,
                outer.tlv_type
            )));
        }

        let mut name = None;
        let mut can_be_prefix = false;
        let mut must_be_fresh = false;
        let mut nonce = None;
        let mut lifetime_ms = 4000;
        let mut hop_limit = None;

        let mut buf = outer.value.clone();
        while buf.has_remaining() {
            let element = TlvElement::decode(&mut buf)?;
            match element.tlv_type {
                tlv::TLV_NAME => name = Some(Name::from_tlv(&element)?),
                tlv::TLV_CAN_BE_PREFIX => can_be_prefix = true,
                tlv::TLV_MUST_BE_FRESH => must_be_fresh = true,
                tlv::TLV_NONCE => {
                    if element.value.len() != 4 {
                        return Err(Error::NdnPacket("Nonce must be 4 bytes".into()));
                    }
                    let mut b = [0u8; 4];
                    b.copy_from_slice(&element.value);
                    nonce = Some(u32::from_be_bytes(b));
                }
                tlv::TLV_INTEREST_LIFETIME => lifetime_ms = element.value_as_uint()?,
                tlv::TLV_HOP_LIMIT => {
                    if element.value.len() != 1 {
                        return Err(Error::NdnPacket("HopLimit must be 1 byte".into()));
                    }
                    hop_limit = Some(element.value[0]);
                }
                // unrecognized elements are ignored
                _ => {}
            }
        }

        let name = name.ok_or_else(|| Error::NdnPacket("Interest has no Name".into()))?;
        Ok(Self {
            name,
            can_be_prefix,
            must_be_fresh,
            nonce,
            lifetime_ms,
            hop_limit,
        })
    }
}

/* ---------------------------------------------------------------- *\
 * Data
\* ---------------------------------------------------------------- */

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub name: Name,
    pub content_type: u64,
    pub freshness_period_ms: Option<u64>,
    pub content: Bytes,
    pub signature_value: Bytes,
}

impl Data {
    pub fn new(name: Name, content: impl Into<Bytes>) -> Self {
        Self {
            name,
            content_type: 0,
            freshness_period_ms: None,
            content: content.into(),
            signature_value: Bytes::from_static(&[0u8; 32]),
        }
    }

    pub fn name(&self) -> &Name {
        &self.name
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    pub fn with_freshness_period(mut self, freshness_ms: u64) -> Self {
        self.freshness_period_ms = Some(freshness_ms);
        self
    }

    /// Encodes this Data into its wire format.
    pub fn to_wire(&self) -> Bytes {
        let mut meta = BytesMut::new();
        TlvElement::from_uint(tlv::TLV_CONTENT_TYPE, self.content_type).encode(&mut meta);
        if let Some(freshness) = self.freshness_period_ms {
            TlvElement::from_uint(tlv::TLV_FRESHNESS_PERIOD, freshness).encode(&mut meta);
        }

        let mut sig_info = BytesMut::new();
        // SignatureType 0: DigestSha256
        TlvElement::from_uint(tlv::TLV_SIGNATURE_TYPE, 0).encode(&mut sig_info);

        let mut inner = BytesMut::new();
        self.name.to_tlv().encode(&mut inner);
        TlvElement::new(tlv::TLV_META_INFO, meta.freeze()).encode(&mut inner);
        TlvElement::new(tlv::TLV_CONTENT, self.content.clone()).encode(&mut inner);
        TlvElement::new(tlv::TLV_SIGNATURE_INFO, sig_info.freeze()).encode(&mut inner);
        TlvElement::new(tlv::TLV_SIGNATURE_VALUE, self.signature_value.clone())
            .encode(&mut inner);

        let mut wire = BytesMut::new();
        TlvElement::new(tlv::TLV_DATA, inner.freeze()).encode(&mut wire);
        wire.freeze()
    }

    /// Decodes a Data from its wire format.
    pub fn from_wire(wire: &[u8]) -> Result<Self, Error> {
        let mut buf = Bytes::copy_from_slice(wire);
        let outer = TlvElement::decode(&mut buf)?;
        Self::from_tlv(&outer)
    }

    pub fn from_tlv(outer: &TlvElement) -> Result<Self, Error> {
        if outer.tlv_type != tlv::TLV_DATA {
            return Err(Error::NdnPacket(format!(
                "Expected Data TLV type {}, got {}",
                tlv::TLV_DATA,
                outer.tlv_type
            )));
        }

        let mut name = None;
        let mut content_type = 0;
        let mut freshness_period_ms = None;
        let mut content = Bytes::new();
        let mut signature_value = Bytes::new();

        let mut buf = outer.value.clone();
        while buf.has_remaining() {
            let element = TlvElement::decode(&mut buf)?;
            match element.tlv_type {
                tlv::TLV_NAME => name = Some(Name::from_tlv(&element)?),
                tlv::TLV_META_INFO => {
                    let mut meta = element.value.clone();
                    while meta.has_remaining() {
                        let m = TlvElement::decode(&mut meta)?;
                        match m.tlv_type {
                            tlv::TLV_CONTENT_TYPE => content_type = m.value_as_uint()?,
                            tlv::TLV_FRESHNESS_PERIOD => {
                                freshness_period_ms = Some(m.value_as_uint()?)
                            }
                            _ => {}
                        }
                    }
                }
                tlv::TLV_CONTENT => content = element.value.clone(),
                tlv::TLV_SIGNATURE_VALUE => signature_value = element.value.clone(),
                _ => {}
            }
        }

        let name = name.ok_or_else(|| Error::NdnPacket("Data has no Name".into()))?;
        Ok(Self {
            name,
            content_type,
            freshness_period_ms,
            content,
            signature_value,
        })
    }
}

/* ---------------------------------------------------------------- *\
 * NDNLPv2 link packet and Nack
\* ---------------------------------------------------------------- */

/// Reason codes carried in an NDNLPv2 NackHeader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NackReason {
    None,
    Congestion,
    Duplicate,
    NoRoute,
}

impl NackReason {
    pub fn to_uint(self) -> u64 {
        match self {
            NackReason::None => 0,
            NackReason::Congestion => 50,
            NackReason::Duplicate => 100,
            NackReason::NoRoute => 150,
        }
    }

    pub fn from_uint(value: u64) -> Self {
        match value {
            50 => NackReason::Congestion,
            100 => NackReason::Duplicate,
            150 => NackReason::NoRoute,
            _ => NackReason::None,
        }
    }
}

impl fmt::Display for NackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NackReason::None => "None",
            NackReason::Congestion => "Congestion",
            NackReason::Duplicate => "Duplicate",
            NackReason::NoRoute => "NoRoute",
        };
        write!(f, "{}", s)
    }
}

/// A minimal NDNLPv2 link packet: optional NackHeader, optional fragment.
///
/// An LpPacket with neither field is an idle packet, usable as a link
/// heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct LpPacket {
    pub nack_reason: Option<NackReason>,
    pub fragment: Option<Bytes>,
}

impl LpPacket {
    pub fn idle() -> Self {
        Self {
            nack_reason: None,
            fragment: None,
        }
    }

    pub fn fragment(block: Bytes) -> Self {
        Self {
            nack_reason: None,
            fragment: Some(block),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.nack_reason.is_none() && self.fragment.is_none()
    }

    pub fn to_wire(&self) -> Bytes {
        let mut inner = BytesMut::new();
        if let Some(reason) = self.nack_reason {
            let mut header = BytesMut::new();
            TlvElement::from_uint(tlv::TLV_LP_NACK_REASON, reason.to_uint()).encode(&mut header);
            TlvElement::new(tlv::TLV_LP_NACK, header.freeze()).encode(&mut inner);
        }
        if let Some(fragment) = &self.fragment {
            TlvElement::new(tlv::TLV_LP_FRAGMENT, fragment.clone()).encode(&mut inner);
        }

        let mut wire = BytesMut::new();
        TlvElement::new(tlv::TLV_LP_PACKET, inner.freeze()).encode(&mut wire);
        wire.freeze()
    }

    pub fn from_tlv(outer: &TlvElement) -> Result<Self, Error> {
        if outer.tlv_type != tlv::TLV_LP_PACKET {
            return Err(Error::NdnPacket(format!(
                "Expected LpPacket TLV type {}, got {}",
                tlv::TLV_LP_PACKET,
                outer.tlv_type
            )));
        }

        let mut nack_reason = None;
        let mut fragment = None;

        let mut buf = outer.value.clone();
        while buf.has_remaining() {
            let element = TlvElement::decode(&mut buf)?;
            match element.tlv_type {
                tlv::TLV_LP_NACK => {
                    let mut reason = NackReason::None;
                    let mut header = element.value.clone();
                    while header.has_remaining() {
                        let h = TlvElement::decode(&mut header)?;
                        if h.tlv_type == tlv::TLV_LP_NACK_REASON {
                            reason = NackReason::from_uint(h.value_as_uint()?);
                        }
                    }
                    nack_reason = Some(reason);
                }
                tlv::TLV_LP_FRAGMENT => fragment = Some(element.value.clone()),
                _ => {}
            }
        }

        Ok(Self {
            nack_reason,
            fragment,
        })
    }
}

/// A network-layer Nack: a reason plus the Interest being refused.
#[derive(Debug, Clone, PartialEq)]
pub struct Nack {
    pub reason: NackReason,
    pub interest: Interest,
}

impl Nack {
    pub fn new(reason: NackReason, interest: Interest) -> Self {
        Self { reason, interest }
    }

    pub fn to_wire(&self) -> Bytes {
        LpPacket {
            nack_reason: Some(self.reason),
            fragment: Some(self.interest.to_wire()),
        }
        .to_wire()
    }

    pub fn from_lp(lp: &LpPacket) -> Result<Self, Error> {
        let reason = lp
            .nack_reason
            .ok_or_else(|| Error::NdnPacket("LpPacket has no NackHeader".into()))?;
        let fragment = lp
            .fragment
            .as_ref()
            .ok_or_else(|| Error::NdnPacket("Nack has no fragment".into()))?;
        let interest = Interest::from_wire(fragment)?;
        Ok(Self { reason, interest })
    }
}

/* ---------------------------------------------------------------- *\
 * NetworkPacket
\* ---------------------------------------------------------------- */

/// One network-layer packet, as dispatched by the link service.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkPacket {
    Interest(Interest),
    Data(Data),
    Nack(Nack),
}

impl NetworkPacket {
    /// Decodes one packet from a wire-format block.
    pub fn from_wire(wire: &[u8]) -> Result<Self, Error> {
        let mut buf = Bytes::copy_from_slice(wire);
        let outer = TlvElement::decode(&mut buf)?;
        match outer.tlv_type {
            tlv::TLV_INTEREST => Ok(NetworkPacket::Interest(Interest::from_tlv(&outer)?)),
            tlv::TLV_DATA => Ok(NetworkPacket::Data(Data::from_tlv(&outer)?)),
            tlv::TLV_LP_PACKET => {
                let lp = LpPacket::from_tlv(&outer)?;
                Ok(NetworkPacket::Nack(Nack::from_lp(&lp)?))
            }
            t => Err(Error::NdnPacket(format!("Unknown packet type: {}", t))),
        }
    }

    pub fn to_wire(&self) -> Bytes {
        match self {
            NetworkPacket::Interest(interest) => interest.to_wire(),
            NetworkPacket::Data(data) => data.to_wire(),
            NetworkPacket::Nack(nack) => nack.to_wire(),
        }
    }

    pub fn packet_type(&self) -> &'static str {
        match self {
            NetworkPacket::Interest(_) => "Interest",
            NetworkPacket::Data(_) => "Data",
            NetworkPacket::Nack(_) => "Nack",
        }
    }

    pub fn name(&self) -> &Name {
        match self {
            NetworkPacket::Interest(interest) => interest.name(),
            NetworkPacket::Data(data) => data.name(),
            NetworkPacket::Nack(nack) => nack.interest.name(),
        }
    }
}

#[cfg(test)]
mod tests;
