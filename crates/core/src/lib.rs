//! # repack — H.264 RTP repacketizer for HomeKit Secure Video
//!
//! A Rust library that rewrites an RTP stream carrying H.264 so a HomeKit
//! Secure Video receiver can consume it: oversized packets are split (and
//! upstream fragment runs refragmented) to fit the receiver's maximum
//! payload size, SPS/PPS parameter sets are injected ahead of keyframes
//! when the upstream stream omits them, SEI units are stripped, and
//! sequence numbers, timestamps, and marker bits stay self-consistent
//! across the rewrite.
//!
//! ## Protocol references
//!
//! | RFC | Topic | How this crate uses it |
//! |-----|-------|----------------------|
//! | [RFC 3550](https://tools.ietf.org/html/rfc3550) | RTP | Packet parse/serialize, sequence/timestamp/marker semantics |
//! | [RFC 6184](https://tools.ietf.org/html/rfc6184) | H.264 RTP payload | NAL classification, STAP-A aggregation, FU-A fragmentation, sprop-parameter-sets |
//!
//! ## Architecture
//!
//! ```text
//! RtpPacket -> classify -> (buffer | split | aggregate | emit) -> bytes
//!
//! rtp       — RFC 3550 packet parse/serialize
//! h264      — NAL classification, FU-A and STAP-A wire structures
//! repack    — stateful Repacketizer engine (one per stream)
//! transport — UDP receive/send for the relay binary
//! error     — RepackError enum and Result alias
//! ```
//!
//! ## Quick start
//!
//! ```
//! use repack::{CodecInfo, Repacketizer, RtpPacket};
//!
//! let mut repacketizer = Repacketizer::new(1200, CodecInfo::default());
//! # let datagram: Vec<u8> = vec![0x80, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0x61, 0xaa];
//! let packet = RtpPacket::parse(&datagram)?;
//! for bytes in repacketizer.repacketize(&packet) {
//!     // hand each rewritten packet to the transport
//! }
//! # Ok::<(), repack::RepackError>(())
//! ```

pub mod error;
pub mod h264;
pub mod repack;
pub mod rtp;
pub mod transport;

pub use error::{RepackError, Result};
pub use repack::{CodecInfo, Repacketizer};
pub use rtp::RtpPacket;
pub use transport::UdpTransport;
