use std::io;
use std::net::{SocketAddr, UdpSocket};

use tracing::{debug, trace};

use crate::errors::Result;
use crate::packet::DecodedPacket;

/// Reads datagrams from a socket and decodes them into packets
///
/// A read that times out or would block is not an error; it yields `None`.
pub struct Receiver;

impl Receiver {
    pub fn receive(socket: &UdpSocket, buffer: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match socket.recv_from(buffer) {
            Ok((received, sender)) => {
                trace!(%sender, bytes = received, "datagram received");
                Ok(Some((received, sender)))
            }
            Err(err) if is_idle(&err) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Receive one datagram and decode it
    ///
    /// Datagrams that fail CRC or framing checks are returned as errors so
    /// the caller can count them; the socket stays usable.
    pub fn receive_packet(
        socket: &UdpSocket,
        buffer: &mut [u8],
    ) -> Result<Option<(DecodedPacket, SocketAddr)>> {
        let Some((received, sender)) = Self::receive(socket, buffer)? else {
            return Ok(None);
        };

        let packet = DecodedPacket::decode(&buffer[..received]).map_err(|err| {
            debug!(%sender, error = %err, "undecodable datagram");
            err
        })?;
        Ok(Some((packet, sender)))
    }

    /// Read until the socket has nothing more, keeping only decodable packets
    pub fn drain(socket: &UdpSocket, buffer: &mut [u8]) -> Result<Vec<(DecodedPacket, SocketAddr)>> {
        let mut batch = Vec::new();

        loop {
            let Some((received, sender)) = Self::receive(socket, buffer)? else {
                break;
            };
            match DecodedPacket::decode(&buffer[..received]) {
                Ok(packet) => batch.push((packet, sender)),
                Err(err) => debug!(%sender, error = %err, "undecodable datagram skipped"),
            }
        }

        Ok(batch)
    }
}

fn is_idle(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
