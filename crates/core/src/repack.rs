//! Stateful H.264 RTP stream rewriting for HomeKit Secure Video.
//!
//! A [`Repacketizer`] owns one RTP stream and rewrites it packet by
//! packet so the receiver gets:
//!
//! - payloads no larger than its advertised maximum (oversized NAL units
//!   are split or refragmented via FU-A, small ones aggregated via STAP-A),
//! - SPS/PPS ahead of every keyframe, synthesized from out-of-band
//!   [`CodecInfo`] when the upstream stream never carries them,
//! - no SEI units, which the receiver cannot tolerate,
//! - self-consistent sequence numbers and marker bits despite packets
//!   being inserted, split, merged, and dropped along the way.
//!
//! ## Buffering states
//!
//! ```text
//! Idle             recv single / STAP-A / FU-A -> process, may buffer
//! FUA buffering    same-timestamp FU-A         -> append; end bit -> flush
//! STAPA buffering  same-timestamp SPS/PPS      -> append; other input -> flush
//! ```
//!
//! Both buffers flush when the RTP timestamp changes: a new access unit
//! invalidates any in-progress aggregation. Every `repacketize` call
//! returns with both buffers either empty or holding only packets of the
//! current timestamp.

use std::collections::VecDeque;

use crate::h264::{
    self, FUA_HEADER_SIZE, NAL_TYPE_IDR, NAL_TYPE_PPS, NAL_TYPE_SEI, NAL_TYPE_SPS, NalKind,
};
use crate::rtp::RtpPacket;

/// Out-of-band H.264 parameter sets (SPS and PPS), as carried in the SDP
/// `sprop-parameter-sets` attribute (RFC 6184 §8.1).
///
/// An empty/default value disables SPS/PPS synthesis; the stream is then
/// forwarded on the assumption that the upstream carries its own
/// parameter sets.
#[derive(Debug, Clone, Default)]
pub struct CodecInfo {
    pub sps: Vec<u8>,
    pub pps: Vec<u8>,
}

impl CodecInfo {
    pub fn new(sps: Vec<u8>, pps: Vec<u8>) -> Self {
        Self { sps, pps }
    }

    /// Both parameter sets are present.
    pub fn is_complete(&self) -> bool {
        !self.sps.is_empty() && !self.pps.is_empty()
    }
}

/// H.264 RTP repacketizer.
///
/// One instance per RTP stream; strictly single-threaded. Feed packets in
/// transmission order via [`repacketize`](Self::repacketize) and forward
/// every returned buffer. A call may return nothing while fragments or
/// parameter sets are being buffered.
#[derive(Debug)]
pub struct Repacketizer {
    max_packet_size: usize,
    codec_info: CodecInfo,
    /// Net packets inserted minus packets dropped since construction,
    /// applied to the sequence number of every emission. Signed: dropping
    /// SEI or unknown NAL units drives it negative.
    extra_packets: i32,
    seen_sps: bool,
    /// FU-A fragments of one NAL unit in progress. All entries share a
    /// timestamp and original NAL type, with contiguous sequence numbers.
    pending_fu_a: Vec<RtpPacket>,
    /// SPS/PPS packets awaiting aggregation. All entries share a timestamp.
    pending_stap_a: Vec<RtpPacket>,
}

impl Repacketizer {
    /// Create a repacketizer emitting payloads of at most
    /// `max_packet_size` bytes.
    ///
    /// # Panics
    ///
    /// Panics if `max_packet_size` is smaller than 3, the minimum for
    /// STAP-A framing. HomeKit receivers typically advertise 1100–1300.
    pub fn new(max_packet_size: usize, codec_info: CodecInfo) -> Self {
        assert!(
            max_packet_size >= 3,
            "max_packet_size must fit stap a framing"
        );
        Self {
            max_packet_size,
            codec_info,
            extra_packets: 0,
            seen_sps: false,
            pending_fu_a: Vec::new(),
            pending_stap_a: Vec::new(),
        }
    }

    /// Net packets inserted minus dropped so far.
    pub fn extra_packets(&self) -> i32 {
        self.extra_packets
    }

    /// Whether an SPS has been observed on the stream, in any form.
    pub fn seen_sps(&self) -> bool {
        self.seen_sps
    }

    /// Rewrite one incoming packet into zero or more serialized RTP
    /// packets.
    ///
    /// The input is only borrowed; it is used as the header template for
    /// everything derived from it and is left unmodified.
    pub fn repacketize(&mut self, packet: &RtpPacket) -> Vec<Vec<u8>> {
        let mut out = Vec::new();

        // A new timestamp means a new access unit, which invalidates any
        // in-progress aggregation. Flush before classifying.
        if self
            .pending_fu_a
            .first()
            .is_some_and(|p| p.timestamp != packet.timestamp)
        {
            self.flush_pending_fu_a(&mut out);
        }
        if self
            .pending_stap_a
            .first()
            .is_some_and(|p| p.timestamp != packet.timestamp)
        {
            self.flush_pending_stap_a(&mut out);
        }

        let Some(&nal_header) = packet.payload.first() else {
            tracing::warn!(seq = packet.sequence_number, "empty rtp payload");
            self.extra_packets -= 1;
            return out;
        };

        match h264::classify(nal_header) {
            NalKind::FuA => self.handle_fu_a(packet, &mut out),
            NalKind::StapA => self.handle_stap_a(packet, &mut out),
            NalKind::Single(nal_type) => self.handle_single(packet, nal_type, &mut out),
            NalKind::Unknown(nal_type) => {
                tracing::warn!(nal_type, "unknown nal unit type");
                self.extra_packets -= 1;
            }
        }
        out
    }

    fn fua_max(&self) -> usize {
        self.max_packet_size - FUA_HEADER_SIZE
    }

    fn handle_single(&mut self, packet: &RtpPacket, nal_type: u8, out: &mut Vec<Vec<u8>>) {
        // A standalone NAL unit terminates any fragment run.
        self.flush_pending_fu_a(out);

        if nal_type == NAL_TYPE_SPS || nal_type == NAL_TYPE_PPS {
            if nal_type == NAL_TYPE_SPS {
                self.seen_sps = true;
            }
            // Hold codec NALs for aggregation; the next non-codec NAL or
            // a timestamp change forms the STAP-A.
            self.pending_stap_a.push(packet.clone());
            return;
        }

        self.flush_pending_stap_a(out);

        if nal_type == NAL_TYPE_SEI {
            // SEI units break the HomeKit receiver.
            self.extra_packets -= 1;
            return;
        }

        if nal_type == NAL_TYPE_IDR && !self.seen_sps {
            self.maybe_send_sps_pps(packet, out);
        }

        if packet.payload.len() > self.max_packet_size {
            let fragments = h264::packetize_fua(&packet.payload, self.fua_max(), false, false);
            self.create_rtp_packets(packet, &fragments, packet.marker, out);
        } else {
            out.push(self.create_packet(packet, &packet.payload, packet.marker));
        }
    }

    fn handle_stap_a(&mut self, packet: &RtpPacket, out: &mut Vec<Vec<u8>>) {
        self.flush_pending_fu_a(out);
        self.flush_pending_stap_a(out);

        let mut nals: VecDeque<Vec<u8>> = VecDeque::new();
        for nal in h264::depacketize_stap_a(&packet.payload) {
            let Some(&header) = nal.first() else {
                continue;
            };
            let nal_type = header & 0x1f;
            if nal_type == NAL_TYPE_SPS {
                self.seen_sps = true;
            }
            if nal_type == NAL_TYPE_SEI {
                continue;
            }
            nals.push_back(nal);
        }

        if nals.is_empty() {
            // Nothing survived the SEI filter; the packet disappears.
            self.extra_packets -= 1;
            return;
        }

        let aggregates = h264::packetize_stap_a(&mut nals, self.max_packet_size);
        self.create_rtp_packets(packet, &aggregates, packet.marker, out);
    }

    fn handle_fu_a(&mut self, packet: &RtpPacket, out: &mut Vec<Vec<u8>>) {
        self.flush_pending_stap_a(out);

        let payload = &packet.payload;
        if payload.len() < FUA_HEADER_SIZE {
            tracing::warn!(seq = packet.sequence_number, "truncated fu a packet");
            self.extra_packets -= 1;
            return;
        }

        let fu_header = payload[1];
        let original_nal_type = fu_header & 0x1f;
        let fu_start = fu_header & 0x80 != 0;

        if original_nal_type == NAL_TYPE_IDR && fu_start && !self.seen_sps {
            self.maybe_send_sps_pps(packet, out);
        }

        if self.pending_fu_a.is_empty() && payload.len() >= 2 * self.max_packet_size {
            // Fat fragments (typical of RTSP-over-TCP sources) are
            // refragmented directly, skipping reassembly. packetize_fua
            // carries the fragment's own start/end bits forward.
            let fragments = h264::packetize_fua(payload, self.fua_max(), false, false);
            self.create_rtp_packets(packet, &fragments, packet.marker, out);
            return;
        }

        self.pending_fu_a.push(packet.clone());

        if fu_header & 0x40 != 0 {
            self.flush_pending_fu_a(out);
        }
    }

    /// Reassemble the buffered fragment run and emit it refragmented to
    /// the target size.
    ///
    /// The group is dropped without emission when its fragments disagree
    /// on the original NAL type or have a sequence gap.
    fn flush_pending_fu_a(&mut self, out: &mut Vec<Vec<u8>>) {
        if self.pending_fu_a.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_fu_a);

        let first = &pending[0];
        let original_nal_type = first.payload[1] & 0x1f;

        if pending
            .iter()
            .any(|p| p.payload[1] & 0x1f != original_nal_type)
        {
            tracing::error!(nal_type = original_nal_type, "nal type mismatch");
            return;
        }
        for window in pending.windows(2) {
            if window[1].sequence_number != window[0].sequence_number.wrapping_add(1) {
                tracing::error!("fua packet is missing. skipping refragmentation.");
                return;
            }
        }

        let last = &pending[pending.len() - 1];
        let has_fu_start = first.payload[1] & 0x80 != 0;
        let has_fu_end = last.payload[1] & 0x40 != 0;
        let had_marker = last.marker;

        let body_len: usize = pending.iter().map(|p| p.payload.len() - FUA_HEADER_SIZE).sum();
        let mut defragmented = Vec::with_capacity(1 + body_len);
        defragmented.push((first.payload[0] & 0xe0) | original_nal_type);
        for p in &pending {
            defragmented.extend_from_slice(&p.payload[FUA_HEADER_SIZE..]);
        }

        let fragments =
            h264::packetize_fua(&defragmented, self.fua_max(), !has_fu_start, !has_fu_end);
        self.create_rtp_packets(&pending[0], &fragments, had_marker, out);
        self.extra_packets -= pending.len() as i32 - 1;
    }

    /// Aggregate the buffered SPS/PPS packets into a single STAP-A and
    /// emit it.
    fn flush_pending_stap_a(&mut self, out: &mut Vec<Vec<u8>>) {
        if self.pending_stap_a.is_empty() {
            return;
        }
        let pending = std::mem::take(&mut self.pending_stap_a);

        let mut nals: VecDeque<Vec<u8>> = pending.iter().map(|p| p.payload.clone()).collect();
        let aggregates = h264::packetize_stap_a(&mut nals, self.max_packet_size);
        if aggregates.len() != 1 {
            tracing::error!(
                count = aggregates.len(),
                "expected only 1 packet for sps/pps stapa"
            );
            return;
        }

        let had_marker = pending[0].marker;
        self.create_rtp_packets(&pending[0], &aggregates, had_marker, out);
        self.extra_packets -= pending.len() as i32 - 1;
    }

    /// Synthesize a STAP-A carrying the out-of-band SPS/PPS, emitted ahead
    /// of a keyframe so the receiver has codec configuration before it
    /// decodes.
    fn maybe_send_sps_pps(&mut self, template: &RtpPacket, out: &mut Vec<Vec<u8>>) {
        if !self.codec_info.is_complete() {
            return;
        }
        let mut nals: VecDeque<Vec<u8>> =
            vec![self.codec_info.sps.clone(), self.codec_info.pps.clone()].into();
        let aggregates = h264::packetize_stap_a(&mut nals, self.max_packet_size);
        if aggregates.len() != 1 {
            tracing::error!(
                count = aggregates.len(),
                "expected only 1 packet for sps/pps stapa"
            );
            return;
        }
        // The synthesized packet never ends the access unit.
        self.create_rtp_packets(template, &aggregates, false, out);
        self.extra_packets += 1;
    }

    /// Serialize one outgoing packet: the template's header with the
    /// sequence number shifted by `extra_packets` and the given marker
    /// and payload.
    fn create_packet(&self, template: &RtpPacket, payload: &[u8], marker: bool) -> Vec<u8> {
        if payload.len() > self.max_packet_size {
            tracing::warn!(
                size = payload.len(),
                max = self.max_packet_size,
                "packet exceeded max packet size."
            );
        }
        let sequence_number = template
            .sequence_number
            .wrapping_add(self.extra_packets as u16);
        template.serialize_with(sequence_number, marker, payload)
    }

    /// Emit one packet per chunk, counting every chunk beyond the first as
    /// an inserted packet. The marker lands on the final chunk iff the
    /// originating packet carried it.
    fn create_rtp_packets(
        &mut self,
        template: &RtpPacket,
        chunks: &[Vec<u8>],
        had_marker: bool,
        out: &mut Vec<Vec<u8>>,
    ) {
        for (i, chunk) in chunks.iter().enumerate() {
            if i != 0 {
                self.extra_packets += 1;
            }
            out.push(self.create_packet(template, chunk, had_marker && i == chunks.len() - 1));
        }
    }
}
