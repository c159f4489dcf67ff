//! RTP packet parsing and serialization (RFC 3550 §5.1).
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           Timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                             SSRC                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         CSRC list ...                         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The repacketizer only manipulates the sequence number, marker bit,
//! timestamp, and payload. Everything else (PT, SSRC, CSRCs, header
//! extension) round-trips through parse/serialize unchanged, so packets
//! rewritten by [`Repacketizer`](crate::Repacketizer) keep the upstream
//! stream's identity intact.

use crate::error::{ParseErrorKind, RepackError, Result};

/// Size of the fixed RTP header in bytes.
pub const FIXED_HEADER_LEN: usize = 12;

const RTP_VERSION: u8 = 2;

/// RTP header extension (RFC 3550 §5.3.1): a profile-defined 16-bit
/// identifier followed by a 32-bit-aligned data block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpExtension {
    pub profile: u16,
    /// Extension payload; length is always a multiple of 4.
    pub data: Vec<u8>,
}

/// A parsed RTP packet.
///
/// Padding (the P bit) is consumed at parse time and stripped from the
/// payload, so `payload` holds exactly the media bytes. Serialization
/// never re-adds padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrcs: Vec<u32>,
    pub extension: Option<RtpExtension>,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Parse an RTP packet from a datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < FIXED_HEADER_LEN {
            return Err(parse_error(ParseErrorKind::TruncatedHeader));
        }

        let b0 = data[0];
        let b1 = data[1];

        let version = b0 >> 6;
        if version != RTP_VERSION {
            return Err(parse_error(ParseErrorKind::UnsupportedVersion(version)));
        }

        let padding = b0 & 0x20 != 0;
        let has_extension = b0 & 0x10 != 0;
        let csrc_count = (b0 & 0x0f) as usize;

        let marker = b1 & 0x80 != 0;
        let payload_type = b1 & 0x7f;

        let sequence_number = u16::from_be_bytes([data[2], data[3]]);
        let timestamp = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
        let ssrc = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);

        let mut offset = FIXED_HEADER_LEN;
        if data.len() < offset + csrc_count * 4 {
            return Err(parse_error(ParseErrorKind::TruncatedExtension));
        }
        let mut csrcs = Vec::with_capacity(csrc_count);
        for _ in 0..csrc_count {
            csrcs.push(u32::from_be_bytes([
                data[offset],
                data[offset + 1],
                data[offset + 2],
                data[offset + 3],
            ]));
            offset += 4;
        }

        let extension = if has_extension {
            if data.len() < offset + 4 {
                return Err(parse_error(ParseErrorKind::TruncatedExtension));
            }
            let profile = u16::from_be_bytes([data[offset], data[offset + 1]]);
            let words = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
            offset += 4;
            if data.len() < offset + words * 4 {
                return Err(parse_error(ParseErrorKind::TruncatedExtension));
            }
            let ext_data = data[offset..offset + words * 4].to_vec();
            offset += words * 4;
            Some(RtpExtension {
                profile,
                data: ext_data,
            })
        } else {
            None
        };

        let mut payload_end = data.len();
        if padding {
            // Last octet counts the padding octets, itself included.
            let pad = data[payload_end - 1] as usize;
            if pad == 0 || offset + pad > payload_end {
                return Err(parse_error(ParseErrorKind::InvalidPadding));
            }
            payload_end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrcs,
            extension,
            payload: data[offset..payload_end].to_vec(),
        })
    }

    /// Serialize this packet as it stands.
    pub fn serialize(&self) -> Vec<u8> {
        self.serialize_with(self.sequence_number, self.marker, &self.payload)
    }

    /// Serialize with a substituted sequence number, marker bit, and
    /// payload, leaving `self` untouched.
    ///
    /// This is how the repacketizer re-sequences: the original packet acts
    /// as a header template for every packet derived from it, and the
    /// caller observes its input unmodified.
    pub fn serialize_with(&self, sequence_number: u16, marker: bool, payload: &[u8]) -> Vec<u8> {
        debug_assert!(self.csrcs.len() <= 15);

        let ext_len = self.extension.as_ref().map_or(0, |e| 4 + e.data.len());
        let mut buf =
            Vec::with_capacity(FIXED_HEADER_LEN + self.csrcs.len() * 4 + ext_len + payload.len());

        buf.push(
            (RTP_VERSION << 6)
                | ((self.extension.is_some() as u8) << 4)
                | (self.csrcs.len() as u8),
        );
        buf.push(((marker as u8) << 7) | self.payload_type);
        buf.extend_from_slice(&sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.ssrc.to_be_bytes());

        for csrc in &self.csrcs {
            buf.extend_from_slice(&csrc.to_be_bytes());
        }
        if let Some(ext) = &self.extension {
            buf.extend_from_slice(&ext.profile.to_be_bytes());
            buf.extend_from_slice(&((ext.data.len() / 4) as u16).to_be_bytes());
            buf.extend_from_slice(&ext.data);
        }

        buf.extend_from_slice(payload);
        buf
    }
}

fn parse_error(kind: ParseErrorKind) -> RepackError {
    RepackError::Parse { kind }
}
