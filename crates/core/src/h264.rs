//! H.264 RTP payload structures (RFC 6184).
//!
//! A NAL unit starts with a one-byte header: `F (1) | NRI (2) | Type (5)`.
//! Types 1–23 are single NAL units carried directly as an RTP payload.
//! Two packetization structures matter here:
//!
//! - **STAP-A** (type 24, §5.7.1): several small NAL units aggregated into
//!   one packet, each prefixed with a 16-bit big-endian length.
//! - **FU-A** (type 28, §5.8): one large NAL unit split across packets,
//!   each fragment carrying `[FU indicator][FU header]` where the header
//!   bits are `S | E | R | Type(5)`.
//!
//! The functions in this module convert between whole NAL units and these
//! wire structures. They are stateless; the stateful stream rewriting
//! lives in [`repack`](crate::repack).

use std::collections::VecDeque;

pub const NAL_TYPE_IDR: u8 = 5;
pub const NAL_TYPE_SEI: u8 = 6;
pub const NAL_TYPE_SPS: u8 = 7;
pub const NAL_TYPE_PPS: u8 = 8;
pub const NAL_TYPE_STAP_A: u8 = 24;
pub const NAL_TYPE_FU_A: u8 = 28;

/// FU indicator + FU header, prepended to every FU-A fragment.
pub const FUA_HEADER_SIZE: usize = 2;

/// STAP-A per-NAL length prefix.
const LENGTH_SIZE: usize = 2;

/// Most NAL units a single STAP-A may aggregate.
const STAP_A_MAX_NALS: usize = 9;

const FU_START_BIT: u8 = 0x80;
const FU_END_BIT: u8 = 0x40;

/// Category of an H.264 RTP payload, read from the first payload byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    /// Single NAL unit packet (types 1–23), carrying the NAL type.
    Single(u8),
    /// Single-time aggregation packet (type 24).
    StapA,
    /// Fragmentation unit (type 28).
    FuA,
    /// Reserved or unsupported (STAP-B, MTAP, FU-B, ...).
    Unknown(u8),
}

/// Classify an RTP payload by its NAL header byte.
pub fn classify(nal_header: u8) -> NalKind {
    match nal_header & 0x1f {
        NAL_TYPE_STAP_A => NalKind::StapA,
        NAL_TYPE_FU_A => NalKind::FuA,
        nal_type @ 1..=23 => NalKind::Single(nal_type),
        nal_type => NalKind::Unknown(nal_type),
    }
}

/// Fragment a NAL unit into FU-A payloads of at most `fua_max + 2` bytes.
///
/// `data` is normally a whole NAL unit beginning with its header byte. It
/// may also be an existing FU-A payload; in that case the original NAL
/// header is reconstituted from the FU bytes and the input fragment's own
/// start/end bits are carried into `no_start`/`no_end`, so refragmenting a
/// middle fragment keeps its middle-ness.
///
/// `no_start`/`no_end` suppress the S/E bits when the produced sequence is
/// only part of a larger fragment run.
///
/// The remainder is spread evenly: fragment sizes differ by at most one
/// byte rather than leaving a short tail packet.
pub fn packetize_fua(data: &[u8], fua_max: usize, no_start: bool, no_end: bool) -> Vec<Vec<u8>> {
    let (nal_header, body, no_start, no_end) = if data[0] & 0x1f == NAL_TYPE_FU_A {
        (
            (data[0] & 0xe0) | (data[1] & 0x1f),
            &data[FUA_HEADER_SIZE..],
            no_start || data[1] & FU_START_BIT == 0,
            no_end || data[1] & FU_END_BIT == 0,
        )
    } else {
        (data[0], &data[1..], no_start, no_end)
    };

    let fu_indicator = (nal_header & 0xe0) | NAL_TYPE_FU_A;
    let nal_type = nal_header & 0x1f;

    let num_packets = body.len().div_ceil(fua_max).max(1);
    let chunk_size = body.len() / num_packets;
    let num_larger = body.len() % num_packets;

    let mut fragments = Vec::with_capacity(num_packets);
    let mut offset = 0;
    for i in 0..num_packets {
        let size = chunk_size + usize::from(i < num_larger);
        let mut fu_header = nal_type;
        if i == 0 && !no_start {
            fu_header |= FU_START_BIT;
        }
        if i == num_packets - 1 && !no_end {
            fu_header |= FU_END_BIT;
        }

        let mut fragment = Vec::with_capacity(FUA_HEADER_SIZE + size);
        fragment.push(fu_indicator);
        fragment.push(fu_header);
        fragment.extend_from_slice(&body[offset..offset + size]);
        fragments.push(fragment);
        offset += size;
    }
    fragments
}

/// Split a STAP-A payload into its component NAL units.
pub fn depacketize_stap_a(payload: &[u8]) -> Vec<Vec<u8>> {
    let mut nals = Vec::new();
    if payload.is_empty() {
        return nals;
    }
    let mut data = &payload[1..];
    while data.len() >= LENGTH_SIZE {
        let len = u16::from_be_bytes([data[0], data[1]]) as usize;
        if data.len() < LENGTH_SIZE + len {
            tracing::warn!(
                declared = len,
                remaining = data.len() - LENGTH_SIZE,
                "truncated stap a entry"
            );
            break;
        }
        nals.push(data[LENGTH_SIZE..LENGTH_SIZE + len].to_vec());
        data = &data[LENGTH_SIZE + len..];
    }
    nals
}

/// Build one STAP-A payload, consuming NAL units from the front of `datas`
/// until the next one no longer fits `max_packet_size`, nine have been
/// packed, or the queue is empty.
///
/// The aggregation header keeps the F bit as the OR and the NRI as the max
/// of all packed NAL headers (RFC 6184 §5.7.1).
///
/// If even the first NAL unit does not fit, it is popped and returned raw,
/// without STAP-A framing. The caller gets an oversized packet either way;
/// this keeps the stream moving instead of stalling on it.
pub fn packetize_one_stap_a(datas: &mut VecDeque<Vec<u8>>, max_packet_size: usize) -> Vec<u8> {
    let Some(first) = datas.front() else {
        return Vec::new();
    };

    let mut stap_header = NAL_TYPE_STAP_A | (first[0] & 0xe0);
    let mut available = max_packet_size.saturating_sub(1 + LENGTH_SIZE);
    let mut counter = 0;
    let mut body = Vec::new();

    while counter < STAP_A_MAX_NALS {
        match datas.front() {
            Some(nal) if LENGTH_SIZE + nal.len() <= available => {}
            _ => break,
        }
        let Some(nal) = datas.pop_front() else {
            break;
        };
        available -= LENGTH_SIZE + nal.len();

        stap_header |= nal[0] & 0x80;
        if (nal[0] & 0x60) > (stap_header & 0x60) {
            stap_header = (stap_header & !0x60) | (nal[0] & 0x60);
        }

        body.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        body.extend_from_slice(&nal);
        counter += 1;
    }

    if counter == 0 {
        let Some(nal) = datas.pop_front() else {
            return Vec::new();
        };
        tracing::warn!(size = nal.len(), max_packet_size, "stap a packet is too large");
        return nal;
    }

    let mut payload = Vec::with_capacity(1 + body.len());
    payload.push(stap_header);
    payload.extend_from_slice(&body);
    payload
}

/// Aggregate all of `datas` into as many STAP-A payloads as needed.
pub fn packetize_stap_a(datas: &mut VecDeque<Vec<u8>>, max_packet_size: usize) -> Vec<Vec<u8>> {
    let mut payloads = Vec::new();
    while !datas.is_empty() {
        payloads.push(packetize_one_stap_a(datas, max_packet_size));
    }
    payloads
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defragment(fragments: &[Vec<u8>]) -> Vec<u8> {
        let first = &fragments[0];
        let mut nal = vec![(first[0] & 0xe0) | (first[1] & 0x1f)];
        for fragment in fragments {
            nal.extend_from_slice(&fragment[FUA_HEADER_SIZE..]);
        }
        nal
    }

    // --- classification ---

    #[test]
    fn classify_by_type_field() {
        assert_eq!(classify(0x65), NalKind::Single(5));
        assert_eq!(classify(0x06), NalKind::Single(6));
        assert_eq!(classify(0x78), NalKind::StapA);
        assert_eq!(classify(0x7c), NalKind::FuA);
        assert_eq!(classify(0x00), NalKind::Unknown(0));
        assert_eq!(classify(0x19), NalKind::Unknown(25));
    }

    // --- FU-A ---

    #[test]
    fn fua_round_trip() {
        let mut nal = vec![0x65];
        nal.extend((0..2500u32).map(|i| i as u8));

        let fragments = packetize_fua(&nal, 998, false, false);
        assert_eq!(fragments.len(), 3);
        assert_eq!(defragment(&fragments), nal);
    }

    #[test]
    fn fua_start_end_bits() {
        let mut nal = vec![0x65];
        nal.extend(std::iter::repeat(0xAA).take(1000));

        let fragments = packetize_fua(&nal, 400, false, false);
        assert_eq!(fragments.len(), 3);

        assert_eq!(fragments[0][1] & FU_START_BIT, FU_START_BIT);
        assert_eq!(fragments[0][1] & FU_END_BIT, 0);
        assert_eq!(fragments[1][1] & (FU_START_BIT | FU_END_BIT), 0);
        assert_eq!(fragments[2][1] & FU_END_BIT, FU_END_BIT);
        assert_eq!(fragments[2][1] & FU_START_BIT, 0);

        for fragment in &fragments {
            assert_eq!(fragment[0] & 0x1f, NAL_TYPE_FU_A);
            assert_eq!(fragment[0] & 0xe0, 0x60); // NRI carried over
            assert_eq!(fragment[1] & 0x1f, 5);
        }
    }

    #[test]
    fn fua_even_chunk_distribution() {
        let mut nal = vec![0x41];
        nal.extend(std::iter::repeat(0).take(1003));

        let fragments = packetize_fua(&nal, 500, false, false);
        assert_eq!(fragments.len(), 3);

        // 1003 over 3 fragments: sizes differ by at most one byte.
        let sizes: Vec<usize> = fragments
            .iter()
            .map(|f| f.len() - FUA_HEADER_SIZE)
            .collect();
        assert_eq!(sizes, vec![335, 334, 334]);
    }

    #[test]
    fn fua_no_start_no_end_suppress_bits() {
        let mut nal = vec![0x41];
        nal.extend(std::iter::repeat(0).take(600));

        let fragments = packetize_fua(&nal, 300, true, true);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0][1] & FU_START_BIT, 0);
        assert_eq!(fragments[1][1] & FU_END_BIT, 0);
    }

    #[test]
    fn fua_refragments_existing_fragment() {
        // A middle fragment (neither S nor E set) of an IDR with NRI 3.
        let mut fragment = vec![0x7c, 0x05];
        fragment.extend(std::iter::repeat(0xBB).take(900));

        let refragmented = packetize_fua(&fragment, 300, false, false);
        assert_eq!(refragmented.len(), 3);

        // Middle-ness is preserved on the new first and last fragments.
        assert_eq!(refragmented[0][1] & FU_START_BIT, 0);
        assert_eq!(refragmented[2][1] & FU_END_BIT, 0);

        let total: usize = refragmented
            .iter()
            .map(|f| f.len() - FUA_HEADER_SIZE)
            .sum();
        assert_eq!(total, 900);
    }

    #[test]
    fn fua_refragment_keeps_start_bit_of_start_fragment() {
        let mut fragment = vec![0x7c, 0x85]; // S set, E clear
        fragment.extend(std::iter::repeat(0).take(600));

        let refragmented = packetize_fua(&fragment, 200, false, false);
        assert_eq!(refragmented[0][1] & FU_START_BIT, FU_START_BIT);
        let last = &refragmented[refragmented.len() - 1];
        assert_eq!(last[1] & FU_END_BIT, 0);
    }

    // --- STAP-A ---

    #[test]
    fn stap_a_round_trip() {
        let nals = vec![vec![0x67, 1, 2, 3], vec![0x68, 4, 5], vec![0x06, 6]];
        let mut queue: VecDeque<Vec<u8>> = nals.clone().into();

        let payloads = packetize_stap_a(&mut queue, 1200);
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0][0] & 0x1f, NAL_TYPE_STAP_A);
        assert_eq!(depacketize_stap_a(&payloads[0]), nals);
    }

    #[test]
    fn stap_a_header_takes_max_nri() {
        // NRI 1 first, NRI 3 second: header must end up with NRI 3.
        let mut queue: VecDeque<Vec<u8>> = vec![vec![0x28, 0], vec![0x68, 0]].into();
        let payload = packetize_one_stap_a(&mut queue, 1200);
        assert_eq!(payload[0] & 0x60, 0x60);
        assert_eq!(payload[0] & 0x1f, NAL_TYPE_STAP_A);
    }

    #[test]
    fn stap_a_header_ors_forbidden_bit() {
        let mut queue: VecDeque<Vec<u8>> = vec![vec![0x67, 0], vec![0xe8, 0]].into();
        let payload = packetize_one_stap_a(&mut queue, 1200);
        assert_eq!(payload[0] & 0x80, 0x80);
    }

    #[test]
    fn stap_a_caps_at_nine_nals() {
        let mut queue: VecDeque<Vec<u8>> = (0..12).map(|_| vec![0x67, 0]).collect();
        let payloads = packetize_stap_a(&mut queue, 1200);
        assert_eq!(payloads.len(), 2);
        assert_eq!(depacketize_stap_a(&payloads[0]).len(), 9);
        assert_eq!(depacketize_stap_a(&payloads[1]).len(), 3);
    }

    #[test]
    fn stap_a_splits_on_size() {
        let mut queue: VecDeque<Vec<u8>> = (0..4).map(|_| vec![0x67; 40]).collect();
        // Budget of 97 fits two 42-byte entries per aggregate.
        let payloads = packetize_stap_a(&mut queue, 100);
        assert_eq!(payloads.len(), 2);
        for payload in &payloads {
            assert!(payload.len() <= 100);
            assert_eq!(depacketize_stap_a(payload).len(), 2);
        }
    }

    #[test]
    fn stap_a_oversized_nal_returned_raw() {
        let big = vec![0x67; 300];
        let mut queue: VecDeque<Vec<u8>> = vec![big.clone()].into();
        let payload = packetize_one_stap_a(&mut queue, 100);
        assert_eq!(payload, big);
        assert!(queue.is_empty());
    }

    #[test]
    fn depacketize_ignores_truncated_tail() {
        let mut payload = vec![0x78];
        payload.extend_from_slice(&[0, 2, 0x67, 0x01]);
        payload.extend_from_slice(&[0, 9, 0x68]); // declares 9, has 1
        assert_eq!(depacketize_stap_a(&payload), vec![vec![0x67, 0x01]]);
    }
}
