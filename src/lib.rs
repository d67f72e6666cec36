//! # wiremux
//!
//! Duplex binary-framed connection core for database drivers.
//!
//! One [`Connection`] multiplexes many concurrent logical requests over a
//! single byte stream. Frames are length-prefixed; each reply carries a
//! *response-to* id naming the request it answers. There is no dedicated
//! reader task: the first caller waiting for a reply takes the reader
//! role, reads frames for everyone, and hands the role on when it is
//! done. The [`coordinator`] module implements that arbitration.
//!
//! ## Architecture
//!
//! - **Connection** (lifecycle, send/receive, telemetry): [`connection`]
//! - **Receive coordinator** (single reader role, reply routing): [`coordinator`]
//! - **Frame layout and pooled buffers**: [`protocol`]
//! - **Stream dialing**: [`transport`]
//! - **Handshake seam**: [`initializer`]
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use wiremux::{Connection, EncoderSettings, Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> wiremux::Result<()> {
//!     let connection = Connection::builder(Endpoint::new("db.example.com", 27017))
//!         .initializer(Arc::new(MyHandshake))
//!         .build();
//!
//!     let cancel = CancellationToken::new();
//!     connection.open(&cancel).await?;
//!
//!     let settings = EncoderSettings::default();
//!     connection.send(&mut [query], &settings, &cancel).await?;
//!     let reply = connection
//!         .receive(request_id, decode_reply, &settings, &cancel)
//!         .await?;
//!
//!     connection.close().await;
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod initializer;
pub mod message;
pub mod protocol;
pub mod transport;

pub use connection::{
    Connection, ConnectionBuilder, ConnectionId, ConnectionSettings, ConnectionState,
};
pub use coordinator::{ReceiveCoordinator, ReceiveInstruction};
pub use error::{Error, Result};
pub use events::{ConnectionEvent, EventSink};
pub use initializer::{ConnectionDescription, ConnectionInitializer, IdentityInitializer};
pub use message::{EncoderSettings, RequestMessage};
pub use protocol::{BufferReader, BufferWriter, ByteBuffer, ChunkPool};
pub use transport::{BoxedStream, Endpoint, Stream, StreamFactory, TcpStreamFactory};
