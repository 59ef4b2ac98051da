//! Link service: between network-layer packets and link-layer blocks.
//!
//! The default service is a thin bijection: a network packet's wire
//! encoding is the link block. Link types that frame with NDNLPv2 (Ethernet)
//! additionally wrap outgoing Interests and Data into an LpPacket fragment;
//! incoming LpPackets are unwrapped uniformly on every link.

use crate::transport::Transport;
use bytes::Bytes;
use log::warn;
use rust_ndnd_common::counters::FaceCounters;
use rust_ndnd_common::ndn::{Data, Interest, LpPacket, Nack, NetworkPacket};
use rust_ndnd_common::tlv::{self, TlvElement};
use std::sync::Arc;

pub struct LinkService {
    counters: Arc<FaceCounters>,
    /// Wrap outgoing Interests and Data into LpPacket fragments.
    lp_framing: bool,
}

impl LinkService {
    pub fn new(counters: Arc<FaceCounters>, lp_framing: bool) -> Self {
        Self {
            counters,
            lp_framing,
        }
    }

    pub fn send_interest(&self, interest: &Interest, transport: &dyn Transport) {
        self.counters.n_out_interests.increment();
        transport.send(self.wrap(interest.to_wire()));
    }

    pub fn send_data(&self, data: &Data, transport: &dyn Transport) {
        self.counters.n_out_data.increment();
        transport.send(self.wrap(data.to_wire()));
    }

    pub fn send_nack(&self, nack: &Nack, transport: &dyn Transport) {
        self.counters.n_out_nacks.increment();
        // a Nack's wire form already is an LpPacket
        transport.send(nack.to_wire());
    }

    fn wrap(&self, block: Bytes) -> Bytes {
        if self.lp_framing {
            LpPacket::fragment(block).to_wire()
        } else {
            block
        }
    }

    /// Decodes one link block into at most one network packet.
    ///
    /// Unrecognized or malformed blocks are counted and dropped; idle
    /// LpPackets count as keep-alive pongs.
    pub fn dispatch(&self, block: Bytes) -> Option<NetworkPacket> {
        let mut buf = block.clone();
        let outer = match TlvElement::decode(&mut buf) {
            Ok(outer) => outer,
            Err(e) => {
                warn!("Dropped undecodable link block: {}", e);
                self.counters.n_unknown.increment();
                return None;
            }
        };

        match outer.tlv_type {
            tlv::TLV_INTEREST => match Interest::from_tlv(&outer) {
                Ok(interest) => {
                    self.counters.n_in_interests.increment();
                    Some(NetworkPacket::Interest(interest))
                }
                Err(e) => {
                    warn!("Dropped malformed Interest: {}", e);
                    self.counters.n_unknown.increment();
                    None
                }
            },
            tlv::TLV_DATA => match Data::from_tlv(&outer) {
                Ok(data) => {
                    self.counters.n_in_data.increment();
                    Some(NetworkPacket::Data(data))
                }
                Err(e) => {
                    warn!("Dropped malformed Data: {}", e);
                    self.counters.n_unknown.increment();
                    None
                }
            },
            tlv::TLV_LP_PACKET => self.dispatch_lp(&outer),
            other => {
                warn!("Received unrecognized TLV block of type {}", other);
                self.counters.n_unknown.increment();
                None
            }
        }
    }

    fn dispatch_lp(&self, outer: &TlvElement) -> Option<NetworkPacket> {
        let lp = match LpPacket::from_tlv(outer) {
            Ok(lp) => lp,
            Err(e) => {
                warn!("Dropped malformed LpPacket: {}", e);
                self.counters.n_unknown.increment();
                return None;
            }
        };

        if lp.is_idle() {
            // link heartbeat
            self.counters.n_in_pongs.increment();
            return None;
        }

        if lp.nack_reason.is_some() {
            match Nack::from_lp(&lp) {
                Ok(nack) => {
                    self.counters.n_in_nacks.increment();
                    return Some(NetworkPacket::Nack(nack));
                }
                Err(e) => {
                    warn!("Dropped malformed Nack: {}", e);
                    self.counters.n_unknown.increment();
                    return None;
                }
            }
        }

        // plain fragment: the network packet of an LP-framed link
        match lp.fragment {
            Some(fragment) => self.dispatch(fragment),
            None => {
                self.counters.n_unknown.increment();
                None
            }
        }
    }
}
