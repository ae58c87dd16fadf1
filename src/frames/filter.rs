use std::net::{IpAddr, Ipv4Addr};

use etherparse::{LaxPacketHeaders, NetHeaders, TransportHeader};

use crate::capture::LinkLayer;
use crate::frames::envelope::{Envelope, MAX_PAYLOAD_LEN};

/// Outcome of the inspection of a raw frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Classification {
    /// Present iff an IPv4 header was parsed.
    pub source_address: Option<IpAddr>,
    /// Present iff a TCP header was parsed.
    pub destination_port: Option<u16>,
    /// Whether the destination port equals the target port.
    pub matched: bool,
}

/// Selects the frames destined to a given TCP port.
#[derive(Copy, Clone, Debug)]
pub struct FrameFilter {
    target_port: u16,
    link_layer: LinkLayer,
}

impl FrameFilter {
    pub fn new(target_port: u16, link_layer: LinkLayer) -> Self {
        Self {
            target_port,
            link_layer,
        }
    }

    /// Inspects the headers of a raw frame.
    ///
    /// Headers are parsed in a fixed order (link layer, IPv4, TCP), each step contributing
    /// an optional field. Frames that are not IPv4, or that are truncated or malformed,
    /// simply produce no match.
    pub fn classify(&self, frame: &[u8]) -> Classification {
        let Some(headers) = self.parse(frame) else {
            return Classification::default();
        };

        let Some(source) = ipv4_source(&headers) else {
            return Classification::default();
        };
        let destination_port = tcp_destination_port(&headers);

        Classification {
            source_address: Some(IpAddr::V4(source)),
            destination_port,
            matched: destination_port == Some(self.target_port),
        }
    }

    /// Builds the envelope for a matching frame, aliasing the frame as payload.
    ///
    /// Frames larger than an envelope can carry are not forwarded.
    pub fn envelope<'a>(&self, frame: &'a [u8]) -> Option<Envelope<'a>> {
        if frame.len() > MAX_PAYLOAD_LEN {
            return None;
        }
        let classification = self.classify(frame);
        if !classification.matched {
            return None;
        }
        let source_address = classification.source_address?;
        Some(Envelope::borrowed(source_address, frame))
    }

    fn parse<'a>(&self, frame: &'a [u8]) -> Option<LaxPacketHeaders<'a>> {
        match self.link_layer {
            LinkLayer::Ethernet => LaxPacketHeaders::from_ethernet(frame).ok(),
            LinkLayer::Ip => LaxPacketHeaders::from_ip(frame).ok(),
        }
    }
}

fn ipv4_source(headers: &LaxPacketHeaders) -> Option<Ipv4Addr> {
    match &headers.net {
        Some(NetHeaders::Ipv4(ip_header, _)) => Some(Ipv4Addr::from(ip_header.source)),
        _ => None,
    }
}

// fragmented IP payloads carry no parsed transport header
fn tcp_destination_port(headers: &LaxPacketHeaders) -> Option<u16> {
    match &headers.transport {
        Some(TransportHeader::Tcp(tcp_header)) => Some(tcp_header.destination_port),
        _ => None,
    }
}
