//! UDP transport for RTP relay.

use std::net::{SocketAddr, UdpSocket};

use crate::error::Result;

/// UDP socket wrapper for receiving upstream RTP and sending rewritten
/// packets onward.
///
/// This layer is deliberately address-only: it knows nothing about
/// streams or codec state. The caller owns the
/// [`Repacketizer`](crate::Repacketizer) and decides where each packet
/// goes.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Bind a socket for inbound RTP.
    pub fn bind(addr: &str) -> Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        Ok(Self { socket })
    }

    /// The locally bound address (useful when binding to port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one datagram; returns its length and the sender address.
    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr)> {
        Ok(self.socket.recv_from(buf)?)
    }

    /// Send raw bytes to a specific socket address.
    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.socket.send_to(payload, addr)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_send_recv() {
        let receiver = UdpTransport::bind("127.0.0.1:0").unwrap();
        let sender = UdpTransport::bind("127.0.0.1:0").unwrap();

        let addr = receiver.local_addr().unwrap();
        sender.send_to(&[1, 2, 3], addr).unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[1, 2, 3]);
        assert_eq!(from, sender.local_addr().unwrap());
    }
}
