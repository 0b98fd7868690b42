//! Socket links: TCP/UDP, Unix-domain and netlink.

use std::io::{self, Read, Write};
use std::net::{TcpStream, UdpSocket};
use std::os::unix::net::{UnixDatagram, UnixStream};

use crate::reactor::{Link, LinkKind};

impl Link for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Stream
    }

    fn prepare(&mut self) -> io::Result<()> {
        self.set_nodelay(true)?;
        TcpStream::set_nonblocking(self, true)
    }
}

impl Link for UnixStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Write::write(self, buf)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Stream
    }

    fn prepare(&mut self) -> io::Result<()> {
        UnixStream::set_nonblocking(self, true)
    }
}

/// Connected UDP socket.
impl Link for UdpSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Datagram
    }

    fn prepare(&mut self) -> io::Result<()> {
        UdpSocket::set_nonblocking(self, true)
    }
}

/// Connected (or socketpair) Unix datagram socket.
impl Link for UnixDatagram {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.recv(buf)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Datagram
    }

    fn prepare(&mut self) -> io::Result<()> {
        UnixDatagram::set_nonblocking(self, true)
    }
}

/// Netlink socket bound with [`crate::netlink::socket::open`].
///
/// Writes go to the kernel (the socket's default destination).
impl Link for netlink_sys::Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut window = buf;
        self.recv(&mut window, 0)
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.send(buf, 0)
    }

    fn kind(&self) -> LinkKind {
        LinkKind::Datagram
    }

    fn prepare(&mut self) -> io::Result<()> {
        self.set_non_blocking(true)
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;

    use super::*;

    #[test]
    fn test_datagram_link_would_block() {
        let (mut a, b) = UnixDatagram::pair().unwrap();
        a.prepare().unwrap();
        let mut buf = [0u8; 8];
        let err = Link::read(&mut a, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);

        b.send(b"ping").unwrap();
        assert_eq!(Link::read(&mut a, &mut buf).unwrap(), 4);
        assert_eq!(a.kind(), LinkKind::Datagram);
    }

    #[test]
    fn test_tcp_link() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut server, _) = listener.accept().unwrap();
        client.prepare().unwrap();
        assert_eq!(client.kind(), LinkKind::Stream);

        assert_eq!(Link::write(&mut client, b"abc").unwrap(), 3);
        let mut buf = [0u8; 3];
        server.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"abc");
    }
}
