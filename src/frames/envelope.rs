use std::borrow::Cow;
use std::net::IpAddr;

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::error::DecodeError;

/// Largest payload an envelope can carry (maximum capture size).
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Upper bound for an encoded envelope: payload plus address, length fields and checksum.
pub const MAX_ENVELOPE_LEN: usize = MAX_PAYLOAD_LEN + 64;

const CHECKSUM_LEN: usize = 4;

/// Unit exchanged between agent and collector: the origin host of a captured frame,
/// together with the frame itself.
///
/// The envelope has no sequence number nor timestamp, so receivers cannot detect loss,
/// duplication or reordering from envelopes alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<'a> {
    /// Source address of the network-layer header of the frame.
    pub source_address: IpAddr,
    /// The raw captured frame.
    #[serde(with = "serde_bytes", borrow)]
    pub payload: Cow<'a, [u8]>,
}

impl<'a> Envelope<'a> {
    /// Builds an envelope aliasing the given frame.
    pub fn borrowed(source_address: IpAddr, payload: &'a [u8]) -> Self {
        Self {
            source_address,
            payload: Cow::Borrowed(payload),
        }
    }

    /// Detaches the envelope from the buffer it was read from.
    #[cfg(test)]
    pub fn into_owned(self) -> Envelope<'static> {
        Envelope {
            source_address: self.source_address,
            payload: Cow::Owned(self.payload.into_owned()),
        }
    }

    /// Serializes the envelope into a freshly allocated buffer.
    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.payload.len() + 32);
        self.encode_into(&mut buf);
        buf
    }

    /// Serializes the envelope into `buf`, discarding its previous content.
    ///
    /// The body is the bincode representation of the envelope followed by
    /// the little-endian CRC-32 of that representation.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.clear();
        codec()
            .serialize_into(&mut *buf, self)
            .expect("serializing an address and a byte string into a Vec cannot fail");
        let checksum = crc32fast::hash(buf);
        buf.extend_from_slice(&checksum.to_le_bytes());
    }

    /// Deserializes an envelope, borrowing its payload from `bytes`.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, DecodeError> {
        if bytes.len() > MAX_ENVELOPE_LEN {
            return Err(malformed(format!("{} bytes exceeds maximum size", bytes.len())));
        }
        let Some(body_len) = bytes.len().checked_sub(CHECKSUM_LEN) else {
            return Err(malformed(format!("truncated to {} bytes", bytes.len())));
        };
        let (body, checksum) = bytes.split_at(body_len);
        let expected = u32::from_le_bytes([checksum[0], checksum[1], checksum[2], checksum[3]]);
        if crc32fast::hash(body) != expected {
            return Err(malformed("checksum mismatch"));
        }

        let envelope: Envelope<'a> = codec()
            .with_limit(MAX_ENVELOPE_LEN as u64)
            .deserialize(body)
            .map_err(|e| malformed(e.to_string()))?;
        if envelope.payload.len() > MAX_PAYLOAD_LEN {
            return Err(malformed(format!(
                "payload of {} bytes exceeds maximum size",
                envelope.payload.len()
            )));
        }
        Ok(envelope)
    }
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
        .reject_trailing_bytes()
}

fn malformed(reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedEnvelope(reason.into())
}
