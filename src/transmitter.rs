/// Transmitter module - datagram output over a std UDP socket
///
/// Connections only produce finished packets; this is the piece that puts
/// them on a real socket. A [`Session`](crate::Session) implementation
/// usually owns one transmitter and forwards `send_datagram` to it.
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::{debug, trace};

use crate::errors::{Result, RudpError};

/// Sends finished packets to peers
#[derive(Debug)]
pub struct UdpTransmitter {
    socket: UdpSocket,
    mtu: usize,
}

impl UdpTransmitter {
    /// Bind a fresh socket
    ///
    /// # Arguments
    /// * `address` - Local address, e.g. "127.0.0.1:0" for an ephemeral port
    /// * `mtu` - Largest datagram this transmitter will send
    pub fn bind(address: impl ToSocketAddrs, mtu: usize) -> Result<Self> {
        let socket = UdpSocket::bind(address)?;
        debug!(local = ?socket.local_addr().ok(), mtu, "transmitter bound");
        Ok(Self { socket, mtu })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Socket shared with a [`Receiver`](crate::receiver::Receiver)
    pub fn socket(&self) -> &UdpSocket {
        &self.socket
    }

    /// Block reads for at most `timeout`; `None` blocks forever
    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        Ok(self.socket.set_read_timeout(timeout)?)
    }

    /// Send one finished packet
    ///
    /// # Returns
    /// Number of bytes written, or `MessageTooLarge` if the datagram
    /// exceeds the configured MTU
    pub fn send_raw(&self, bytes: &[u8], destination: SocketAddr) -> Result<usize> {
        if bytes.len() > self.mtu {
            return Err(RudpError::MessageTooLarge {
                size: bytes.len(),
                capacity: self.mtu,
            });
        }

        let sent = self.socket.send_to(bytes, destination)?;
        trace!(%destination, bytes = sent, "datagram sent");
        Ok(sent)
    }
}
