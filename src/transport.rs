//! Stream abstraction and dialing.
//!
//! The connection core is generic over the byte stream it runs on: any
//! `AsyncRead + AsyncWrite` transport works, including TLS wrappers and
//! in-memory test streams. A [`StreamFactory`] dials the stream for an
//! [`Endpoint`]; the TCP implementation ships here, other transports plug
//! in through the same trait.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Byte stream the connection runs on.
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Stream for T {}

/// An owned, type-erased stream.
pub type BoxedStream = Box<dyn Stream>;

/// A remote server address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Create an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The host name or address.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for Endpoint {
    type Err = std::io::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("endpoint '{s}' is not host:port"),
            )
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("endpoint '{s}' has an invalid port"),
            )
        })?;
        Ok(Endpoint::new(host, port))
    }
}

/// Dials streams for a connection.
///
/// Factories are external collaborators: the core only asks for a stream
/// and wraps whatever I/O error comes back.
#[async_trait]
pub trait StreamFactory: Send + Sync {
    /// Dial a stream to `endpoint`, honoring `cancel`.
    async fn open(
        &self,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> std::io::Result<BoxedStream>;
}

/// Plain TCP stream factory.
#[derive(Debug, Clone)]
pub struct TcpStreamFactory {
    no_delay: bool,
}

impl TcpStreamFactory {
    /// Create a factory with Nagle's algorithm disabled.
    pub fn new() -> Self {
        Self { no_delay: true }
    }

    /// Configure whether `TCP_NODELAY` is set on dialed streams.
    pub fn no_delay(mut self, no_delay: bool) -> Self {
        self.no_delay = no_delay;
        self
    }
}

impl Default for TcpStreamFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamFactory for TcpStreamFactory {
    async fn open(
        &self,
        endpoint: &Endpoint,
        cancel: &CancellationToken,
    ) -> std::io::Result<BoxedStream> {
        let stream = tokio::select! {
            connected = TcpStream::connect((endpoint.host(), endpoint.port())) => connected?,
            () = cancel.cancelled() => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Interrupted,
                    "dial cancelled",
                ));
            }
        };

        if self.no_delay {
            stream.set_nodelay(true)?;
        }

        Ok(Box::new(stream))
    }
}
