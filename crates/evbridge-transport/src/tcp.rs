use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, TransportError};
use crate::stream::BusStream;

/// Opens client connections to a bridge.
pub struct TcpConnector;

impl TcpConnector {
    /// Connect to `host:port`, bounding each attempt by `timeout`.
    ///
    /// Every resolved address is tried in order; the error of the last
    /// attempt is returned when none accepts.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<BusStream> {
        let addr = format!("{host}:{port}");
        let candidates: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .map_err(|e| TransportError::Connect {
                addr: addr.clone(),
                source: e,
            })?
            .collect();

        if candidates.is_empty() {
            return Err(TransportError::Resolve { addr });
        }

        let mut last_err = None;
        for candidate in candidates {
            match connect_one(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(%candidate, "connected to bridge");
                    return Ok(BusStream::from_tcp(stream));
                }
                Err(err) => {
                    debug!(%candidate, error = %err, "connect attempt failed");
                    last_err = Some(err);
                }
            }
        }

        Err(TransportError::Connect {
            addr,
            source: last_err
                .unwrap_or_else(|| std::io::Error::other("no address accepted the connection")),
        })
    }
}

fn connect_one(addr: &SocketAddr, timeout: Duration) -> std::io::Result<TcpStream> {
    if timeout.is_zero() {
        TcpStream::connect(addr)
    } else {
        TcpStream::connect_timeout(addr, timeout)
    }
}

/// Server side of the bridge transport.
///
/// The client never listens; this exists for tools and tests that stand in
/// for the bus.
pub struct BridgeListener {
    listener: TcpListener,
    addr: SocketAddr,
}

impl BridgeListener {
    /// Bind and listen on `addr` (e.g. `127.0.0.1:0` for an ephemeral port).
    pub fn bind(addr: impl ToSocketAddrs + std::fmt::Display) -> Result<Self> {
        let display = addr.to_string();
        let listener = TcpListener::bind(&addr).map_err(|e| TransportError::Bind {
            addr: display.clone(),
            source: e,
        })?;
        let addr = listener.local_addr().map_err(|e| TransportError::Bind {
            addr: display,
            source: e,
        })?;
        info!(%addr, "listening for bridge connections");
        Ok(Self { listener, addr })
    }

    /// Accept an incoming connection (blocking).
    pub fn accept(&self) -> Result<BusStream> {
        let (stream, peer) = self.listener.accept().map_err(TransportError::Accept)?;
        stream.set_nodelay(true)?;
        debug!(%peer, "accepted bridge connection");
        Ok(BusStream::from_tcp(stream))
    }

    /// The bound address (with the actual port when bound to port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}
