use std::net::{SocketAddr, ToSocketAddrs};

use base64::Engine as _;
use clap::Parser;
use repack::{CodecInfo, Repacketizer, RtpPacket, UdpTransport};

#[derive(Parser)]
#[command(
    name = "repack-relay",
    about = "UDP relay that rewrites H.264 RTP for HomeKit Secure Video receivers"
)]
struct Args {
    /// Bind address for inbound RTP (host:port)
    #[arg(long, short, default_value = "0.0.0.0:5004")]
    listen: String,

    /// Destination address for rewritten RTP (host:port)
    #[arg(long, short)]
    forward: String,

    /// Maximum RTP payload size the receiver accepts, in bytes
    #[arg(long, default_value_t = 1200)]
    max_packet_size: usize,

    /// Out-of-band SPS/PPS, in SDP sprop-parameter-sets form:
    /// two base64 strings separated by a comma
    #[arg(long)]
    sprop: Option<String>,
}

/// Decode an RFC 6184 §8.1 `sprop-parameter-sets` value ("<sps>,<pps>",
/// both base64).
fn parse_sprop(sprop: &str) -> Option<CodecInfo> {
    let (sps, pps) = sprop.split_once(',')?;
    let engine = base64::engine::general_purpose::STANDARD;
    Some(CodecInfo::new(
        engine.decode(sps.trim()).ok()?,
        engine.decode(pps.trim()).ok()?,
    ))
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let codec_info = match &args.sprop {
        Some(sprop) => match parse_sprop(sprop) {
            Some(info) => info,
            None => {
                eprintln!("Invalid sprop-parameter-sets: {sprop}");
                return;
            }
        },
        None => CodecInfo::default(),
    };

    let forward: Option<SocketAddr> = args
        .forward
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next());
    let Some(forward) = forward else {
        eprintln!("Invalid forward address: {}", args.forward);
        return;
    };

    let transport = match UdpTransport::bind(&args.listen) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", args.listen, e);
            return;
        }
    };

    let mut repacketizer = Repacketizer::new(args.max_packet_size, codec_info);
    println!("Relaying RTP {} -> {}", args.listen, forward);

    let mut buf = [0u8; 65536];
    loop {
        let (len, from) = match transport.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!(error = %e, "recv failed");
                continue;
            }
        };

        let packet = match RtpPacket::parse(&buf[..len]) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::warn!(%from, error = %e, "dropping non-rtp datagram");
                continue;
            }
        };

        for bytes in repacketizer.repacketize(&packet) {
            if let Err(e) = transport.send_to(&bytes, forward) {
                tracing::warn!(error = %e, "send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sprop_decodes_both_parameter_sets() {
        // "Z0IAKQ==" = [0x67, 0x42, 0x00, 0x29], "aM4wpA==" = [0x68, 0xce, 0x30, 0xa4]
        let info = parse_sprop("Z0IAKQ==,aM4wpA==").unwrap();
        assert_eq!(info.sps, vec![0x67, 0x42, 0x00, 0x29]);
        assert_eq!(info.pps, vec![0x68, 0xce, 0x30, 0xa4]);
        assert!(info.is_complete());
    }

    #[test]
    fn sprop_rejects_missing_comma() {
        assert!(parse_sprop("Z0IAKQ==").is_none());
    }

    #[test]
    fn sprop_rejects_bad_base64() {
        assert!(parse_sprop("not base64!,aM4wpA==").is_none());
    }
}
