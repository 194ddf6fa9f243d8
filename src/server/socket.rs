use crate::{errors::Error, limits::ConnLimits};
use socket2::{Domain, Protocol, SockAddr, TcpKeepalive, Type};
use std::{
    io::{self, Read},
    net::{Shutdown, SocketAddr},
    ops::Deref,
    time::Duration,
};
use tracing::debug;

/// Owned TCP socket.
///
/// The descriptor is released exactly once, when the handle is dropped.
/// Client sockets first send FIN and drain unread input for
/// [`ConnLimits::linger_drain`], so a response written just before the drop
/// is not cut off by a reset.
#[derive(Debug)]
pub(crate) struct Socket {
    inner: socket2::Socket,
    linger: Duration,
}

impl Socket {
    /// Creates, tunes, binds and starts the listening socket.
    pub(crate) fn listen(addr: SocketAddr, backlog: usize, limits: &ConnLimits) -> Result<Self, Error> {
        let inner = socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(Error::socket("create listening socket"))?;

        inner
            .set_reuse_address(true)
            .map_err(Error::socket("set SO_REUSEADDR"))?;
        inner
            .set_reuse_port(true)
            .map_err(Error::socket("set SO_REUSEPORT"))?;
        inner
            .set_read_timeout(Some(limits.socket_read_timeout))
            .map_err(Error::socket("set SO_RCVTIMEO"))?;
        inner
            .set_write_timeout(Some(limits.socket_write_timeout))
            .map_err(Error::socket("set SO_SNDTIMEO"))?;
        inner
            .set_keepalive(true)
            .map_err(Error::socket("set SO_KEEPALIVE"))?;

        inner
            .bind(&SockAddr::from(addr))
            .map_err(Error::socket("bind"))?;

        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        inner.listen(backlog).map_err(Error::socket("listen"))?;

        Ok(Self {
            inner,
            linger: Duration::ZERO,
        })
    }

    /// Waits for the next client. Fails with `WouldBlock`/`TimedOut` when
    /// the receive timeout elapses.
    #[inline]
    pub(crate) fn accept(&self, linger: Duration) -> io::Result<(Socket, Option<SocketAddr>)> {
        let (inner, addr) = self.inner.accept()?;
        Ok((Socket { inner, linger }, addr.as_socket()))
    }

    /// Applies the per-client timeouts and keep-alive probe cadence.
    pub(crate) fn configure_client(&self, limits: &ConnLimits) -> io::Result<()> {
        self.inner.set_read_timeout(Some(limits.socket_read_timeout))?;
        self.inner.set_write_timeout(Some(limits.socket_write_timeout))?;

        let keepalive = TcpKeepalive::new()
            .with_time(limits.keepalive_idle)
            .with_interval(limits.keepalive_interval)
            .with_retries(limits.keepalive_retries);
        self.inner.set_tcp_keepalive(&keepalive)
    }

    #[inline]
    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr().ok()?.as_socket()
    }

    /// Turns the drain on drop into a non-blocking one: FIN is still sent and
    /// input that already arrived is discarded, but nothing more is waited for.
    #[inline]
    pub(crate) fn close_without_waiting(&self) -> io::Result<()> {
        self.inner.set_nonblocking(true)
    }

    /// Second handle to the same descriptor, used to half-close the socket
    /// from another thread.
    #[inline]
    pub(crate) fn control_handle(&self) -> io::Result<socket2::Socket> {
        self.inner.try_clone()
    }
}

impl Deref for Socket {
    type Target = socket2::Socket;

    #[inline(always)]
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if self.linger.is_zero() || self.inner.shutdown(Shutdown::Write).is_err() {
            return;
        }

        if self.inner.set_read_timeout(Some(self.linger)).is_err() {
            return;
        }

        let mut scratch = [0u8; 512];
        for _ in 0..16 {
            match (&self.inner).read(&mut scratch) {
                Ok(0) | Err(_) => break,
                Ok(n) => debug!(bytes = n, "discarded unread input on close"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        io::Write,
        net::{Ipv4Addr, TcpStream},
    };

    fn listener() -> Socket {
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, 0));
        let limits = ConnLimits {
            socket_read_timeout: Duration::from_millis(200),
            ..ConnLimits::default()
        };
        Socket::listen(addr, 8, &limits).unwrap()
    }

    #[test]
    fn accept_and_exchange() {
        let listener = listener();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"ping").unwrap();

        let (server, peer) = listener.accept(Duration::from_millis(50)).unwrap();
        server.configure_client(&ConnLimits::default()).unwrap();
        assert_eq!(peer.map(|p| p.ip()), Some(Ipv4Addr::LOCALHOST.into()));

        let mut buf = [0u8; 4];
        (&*server).read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"ping");

        (&*server).write_all(b"pong").unwrap();
        drop(server);

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"pong");
    }

    #[test]
    fn accept_times_out() {
        let listener = listener();
        let err = listener.accept(Duration::ZERO).unwrap_err();

        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn drop_without_waiting() {
        let listener = listener();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(b"GET / HTTP/1.1\r\n\r\n").unwrap();

        let (server, _) = listener.accept(Duration::from_secs(5)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        (&*server).write_all(b"busy").unwrap();
        server.close_without_waiting().unwrap();

        // The client keeps its end open; a blocking drain would sit out the linger.
        let started = std::time::Instant::now();
        drop(server);
        assert!(started.elapsed() < Duration::from_secs(1), "{:?}", started.elapsed());

        let mut reply = Vec::new();
        client.read_to_end(&mut reply).unwrap();
        assert_eq!(reply, b"busy");
    }

    #[test]
    fn half_close_unblocks_read() {
        let listener = listener();
        let addr = listener.local_addr().unwrap();
        let _client = TcpStream::connect(addr).unwrap();

        let (server, _) = listener.accept(Duration::ZERO).unwrap();
        server.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        let control = server.control_handle().unwrap();

        let reader = std::thread::spawn(move || {
            let mut buf = [0u8; 16];
            (&*server).read(&mut buf).map_err(|e| e.kind())
        });

        std::thread::sleep(Duration::from_millis(50));
        control.shutdown(Shutdown::Read).unwrap();

        assert_eq!(reader.join().unwrap(), Ok(0));
    }
}
